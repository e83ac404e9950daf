//! # Dongle Drivers
//!
//! Frame-level protocol drivers for the supported radios. Each driver
//! normalizes its wire envelope to raw wM-Bus frames and pushes them into
//! the serial manager's event channel; partial reads are buffered and a
//! frame is only released once fully accumulated and checksum-validated.
//!
//! Capabilities are fixed per device family:
//!
//! | device | simultaneously supported mode sets |
//! |---|---|
//! | IM871A | C1, T1, S1, C1+T1 |
//! | AMB8465 | C1, T1, S1 |
//! | RTL-SDR + rtl_wmbus | anything within C1+T1 |
//! | simulator | any |

pub mod amb8465;
pub mod im871a;
pub mod rtlwmbus;
pub mod simulator;

use crate::error::MetersError;
use crate::link_mode::LinkModeSet;
use crate::manager::SerialManager;
use async_trait::async_trait;
use std::path::Path;

/// The supported dongle families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Im871a,
    Amb8465,
    RtlWmbus,
    Simulator,
}

/// How the positional DEVICE argument was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    /// Probe the udev-provided links in a fixed order.
    Auto,
    /// A concrete serial device path.
    Tty(String),
    /// `rtlwmbus`, optionally with a frequency or a full command line.
    RtlWmbus(Option<String>),
    /// A `simulation_*.txt` replay file.
    Simulation(String),
}

impl DeviceSpec {
    /// Parse the DEVICE positional argument.
    pub fn parse(s: &str) -> DeviceSpec {
        if s == "auto" {
            DeviceSpec::Auto
        } else if s == "rtlwmbus" {
            DeviceSpec::RtlWmbus(None)
        } else if let Some(extra) = s.strip_prefix("rtlwmbus:") {
            DeviceSpec::RtlWmbus(Some(extra.to_string()))
        } else if Path::new(s)
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("simulation_") && n.ends_with(".txt"))
            .unwrap_or(false)
        {
            DeviceSpec::Simulation(s.to_string())
        } else {
            DeviceSpec::Tty(s.to_string())
        }
    }
}

/// The common dongle contract.
#[async_trait(?Send)]
pub trait Dongle {
    fn device_type(&self) -> DeviceType;

    /// The mode sets this device can listen to at the same time.
    fn supported_sets(&self) -> &'static [LinkModeSet];

    /// Currently configured link modes.
    fn link_modes(&self) -> LinkModeSet;

    /// Configure the radio. Fails with `LinkModeUnsupported` when the
    /// requested set is not a subset of one simultaneously-supported set;
    /// the configured set is never silently narrowed.
    async fn set_link_modes(&mut self, modes: LinkModeSet) -> Result<(), MetersError>;

    /// Replay the input file. Only the simulator does anything here.
    async fn simulate(&mut self) -> Result<(), MetersError> {
        Ok(())
    }
}

/// Subset check shared by all drivers.
pub(crate) fn check_link_modes(
    device: &str,
    supported: &'static [LinkModeSet],
    requested: LinkModeSet,
) -> Result<(), MetersError> {
    if requested.is_empty() {
        return Err(MetersError::LinkModeUnsupported(format!(
            "no link modes requested for {device}"
        )));
    }
    if supported.iter().any(|set| set.contains(requested)) {
        return Ok(());
    }
    Err(MetersError::LinkModeUnsupported(format!(
        "{device} cannot listen to {} simultaneously",
        requested.hr()
    )))
}

/// Open the device named on the command line.
///
/// `auto` walks the udev links and tries the next candidate when a probe
/// answers with `DeviceUnsupported`; a concrete path is probed as IM871A
/// then AMB8465 and is fatal when neither answers.
pub async fn open_device(
    spec: &DeviceSpec,
    manager: &mut SerialManager,
) -> Result<Box<dyn Dongle>, MetersError> {
    match spec {
        DeviceSpec::Auto => {
            let candidates: &[(&str, DeviceType)] = &[
                ("/dev/im871a", DeviceType::Im871a),
                ("/dev/amb8465", DeviceType::Amb8465),
                ("/dev/rtlsdr", DeviceType::RtlWmbus),
            ];
            for (path, device_type) in candidates {
                if !Path::new(path).exists() {
                    continue;
                }
                let result: Result<Box<dyn Dongle>, MetersError> = match device_type {
                    DeviceType::Im871a => im871a::Im871a::open(path, manager)
                        .await
                        .map(|d| Box::new(d) as Box<dyn Dongle>),
                    DeviceType::Amb8465 => amb8465::Amb8465::open(path, manager)
                        .await
                        .map(|d| Box::new(d) as Box<dyn Dongle>),
                    DeviceType::RtlWmbus => rtlwmbus::RtlWmbus::open(None, manager)
                        .await
                        .map(|d| Box::new(d) as Box<dyn Dongle>),
                    DeviceType::Simulator => unreachable!(),
                };
                match result {
                    Ok(dongle) => {
                        log::info!("(device) detected {:?} on {path}", dongle.device_type());
                        return Ok(dongle);
                    }
                    Err(MetersError::DeviceUnsupported(reason)) => {
                        log::debug!("(device) {path} is not usable: {reason}");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(MetersError::DeviceNotFound(
                "no wmbus device found among the auto candidates".to_string(),
            ))
        }
        DeviceSpec::Tty(path) => {
            if !Path::new(path).exists() {
                return Err(MetersError::DeviceNotFound(path.clone()));
            }
            match im871a::Im871a::open(path, manager).await {
                Ok(dongle) => {
                    log::info!("(im871a) detected on {path}");
                    return Ok(Box::new(dongle));
                }
                Err(MetersError::DeviceUnsupported(_)) => {}
                Err(e) => return Err(e),
            }
            match amb8465::Amb8465::open(path, manager).await {
                Ok(dongle) => {
                    log::info!("(amb8465) detected on {path}");
                    Ok(Box::new(dongle))
                }
                Err(MetersError::DeviceUnsupported(_)) => Err(MetersError::DeviceUnsupported(
                    format!("{path} answered neither as IM871A nor as AMB8465"),
                )),
                Err(e) => Err(e),
            }
        }
        DeviceSpec::RtlWmbus(extra) => {
            let dongle = rtlwmbus::RtlWmbus::open(extra.clone(), manager).await?;
            Ok(Box::new(dongle))
        }
        DeviceSpec::Simulation(path) => {
            let dongle = simulator::Simulator::open(path, manager).await?;
            Ok(Box::new(dongle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_spec_parse() {
        assert_eq!(DeviceSpec::parse("auto"), DeviceSpec::Auto);
        assert_eq!(
            DeviceSpec::parse("/dev/ttyUSB0"),
            DeviceSpec::Tty("/dev/ttyUSB0".to_string())
        );
        assert_eq!(DeviceSpec::parse("rtlwmbus"), DeviceSpec::RtlWmbus(None));
        assert_eq!(
            DeviceSpec::parse("rtlwmbus:868.9M"),
            DeviceSpec::RtlWmbus(Some("868.9M".to_string()))
        );
        assert_eq!(
            DeviceSpec::parse("rtlwmbus:rtl_sdr -f 868.95M - | rtl_wmbus"),
            DeviceSpec::RtlWmbus(Some("rtl_sdr -f 868.95M - | rtl_wmbus".to_string()))
        );
        assert_eq!(
            DeviceSpec::parse("tests/simulation_c1.txt"),
            DeviceSpec::Simulation("tests/simulation_c1.txt".to_string())
        );
    }

    #[test]
    fn test_check_link_modes_subset_rule() {
        const SETS: &[LinkModeSet] = &[
            LinkModeSet::C1,
            LinkModeSet::T1,
            LinkModeSet::S1,
            LinkModeSet::C1.union(LinkModeSet::T1),
        ];
        assert!(check_link_modes("im871a", SETS, LinkModeSet::C1).is_ok());
        assert!(check_link_modes("im871a", SETS, LinkModeSet::C1 | LinkModeSet::T1).is_ok());
        assert!(matches!(
            check_link_modes("im871a", SETS, LinkModeSet::C1 | LinkModeSet::S1),
            Err(MetersError::LinkModeUnsupported(_))
        ));
        assert!(matches!(
            check_link_modes("im871a", SETS, LinkModeSet::empty()),
            Err(MetersError::LinkModeUnsupported(_))
        ));
    }
}
