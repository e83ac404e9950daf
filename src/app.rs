//! # Receiver Runtime
//!
//! Wires the configuration together: opens the dongle, configures its link
//! modes, builds the meter instances and drives the serial manager loop
//! until a stop is requested. Telegram handling, meter updates and printing
//! all happen inside the loop callback, on the loop thread.

use crate::config::Configuration;
use crate::device::{open_device, DeviceType};
use crate::error::MetersError;
use crate::manager::SerialManager;
use crate::meters::register_meters;
use crate::printer::Printer;
use crate::telegram::{media_name, Telegram};

#[derive(Default)]
struct DropCounters {
    corrupt: u64,
    decrypt_failed: u64,
    decode_failed: u64,
}

/// Run the receiver until it stops. A clean stop (signal, `--exitafter`,
/// `--oneshot`) returns `Ok`; losing the last frame source or failing
/// before the loop starts returns the error for a nonzero exit.
pub async fn run(config: Configuration) -> Result<(), MetersError> {
    if let Some(pidfile) = &config.pidfile {
        std::fs::write(pidfile, format!("{}\n", std::process::id())).map_err(|e| {
            MetersError::ConfigInvalid(format!(
                "could not write pid file {}: {e}",
                pidfile.display()
            ))
        })?;
        log::info!("(app) wrote pid file {}", pidfile.display());
    }

    let mut manager = SerialManager::new();
    if let Some(duration) = config.exit_after {
        log::info!("(app) will exit after {}s", duration.as_secs());
        manager.schedule_exit_after(duration);
    }

    let mut dongle = open_device(&config.device, &mut manager).await?;
    dongle.set_link_modes(config.listen_modes()).await?;
    log::info!("(config) listening to {}", dongle.link_modes().hr());

    let mut meters = register_meters(config.meters)?;
    for meter in &mut meters {
        meter.add_conversions(&config.conversions);
        let keymsg = if meter.info().key.is_some() {
            "encrypted"
        } else {
            "not-encrypted"
        };
        log::info!(
            "(app) configured \"{}\" \"{}\" \"{}\" {}",
            meter.info().name,
            meter.info().family.name,
            meter.info().id,
            keymsg
        );
    }
    if meters.is_empty() {
        log::warn!("(app) no meters configured, printing the id of every telegram heard");
    }

    let printer = Printer {
        format: config.format,
        separator: config.separator,
        meterfiles: config.meterfiles.clone(),
        meterfiles_action: config.meterfiles_action,
        logfile: config.logfile.clone(),
        shells: config.shells.clone(),
    };

    if dongle.device_type() == DeviceType::Simulator {
        dongle.simulate().await?;
    }

    let stop = manager.stop_handle();
    let oneshot = config.oneshot;
    let logtelegrams = config.logtelegrams;
    let mut counters = DropCounters::default();

    let result = manager
        .run(|_token, bytes| {
            let telegram = match Telegram::parse(&bytes) {
                Ok(t) => t,
                Err(e) => {
                    counters.corrupt += 1;
                    log::debug!("(app) dropping corrupt frame: {e}");
                    return;
                }
            };
            if logtelegrams {
                println!("{}", telegram.to_simulation_line());
            }
            if meters.is_empty() {
                println!(
                    "Received telegram from: {} manufacturer: ({}) media: {}",
                    telegram.id,
                    telegram.manufacturer_ascii,
                    media_name(telegram.media)
                );
                return;
            }
            for meter in &mut meters {
                match meter.handle_telegram(&telegram) {
                    Ok(Some(reading)) => printer.print(meter, &telegram, &reading),
                    Ok(None) => {}
                    Err(MetersError::DecryptFailed(reason)) => {
                        counters.decrypt_failed += 1;
                        log::debug!("(meter) {}: decrypt failed: {reason}", meter.info().name);
                    }
                    Err(e) => {
                        counters.decode_failed += 1;
                        log::debug!("(meter) {}: {e}", meter.info().name);
                    }
                }
            }
            if oneshot && meters.iter().all(|m| m.num_updates() > 0) {
                log::info!("(app) all meters have received at least one update, stopping");
                stop.stop();
            }
        })
        .await;

    log::debug!(
        "(app) dropped frames: {} corrupt, {} decrypt failures, {} decode failures",
        counters.corrupt,
        counters.decrypt_failed,
        counters.decode_failed
    );
    result
}
