//! # Simulation File Driver
//!
//! Replays telegrams from a text file, one `telegram=|HEX|` line per frame.
//! `#` introduces a comment. Delivery preserves file order with no
//! artificial delay, which makes the replay deterministic for tests and for
//! reproducing field captures taken with `--logtelegrams`.

use crate::device::Dongle;
use crate::error::MetersError;
use crate::link_mode::LinkModeSet;
use crate::manager::{SerialManager, SourceEvent, SourceToken};
use crate::util::hex::parse_hex_lenient;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

const SUPPORTED: &[LinkModeSet] = &[LinkModeSet::all()];

/// Parse one simulation line into frame bytes.
///
/// The hex may carry decorative separators such as the underscore that
/// marks where the record area starts.
pub(crate) fn parse_line(line: &str) -> Option<Vec<u8>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let rest = line.strip_prefix("telegram=|")?;
    let hex = rest.strip_suffix('|')?;
    parse_hex_lenient(hex).ok()
}

/// Replays a simulation file through the serial manager.
pub struct Simulator {
    path: PathBuf,
    token: SourceToken,
    event_tx: mpsc::UnboundedSender<SourceEvent>,
    link_modes: LinkModeSet,
}

impl Simulator {
    pub async fn open(path: &str, manager: &mut SerialManager) -> Result<Simulator, MetersError> {
        if !Path::new(path).exists() {
            return Err(MetersError::DeviceNotFound(path.to_string()));
        }
        let (token, event_tx) = manager.register_source(&format!("simulation {path}"));
        Ok(Simulator {
            path: PathBuf::from(path),
            token,
            event_tx,
            link_modes: LinkModeSet::empty(),
        })
    }
}

#[async_trait(?Send)]
impl Dongle for Simulator {
    fn device_type(&self) -> crate::device::DeviceType {
        crate::device::DeviceType::Simulator
    }

    fn supported_sets(&self) -> &'static [LinkModeSet] {
        SUPPORTED
    }

    fn link_modes(&self) -> LinkModeSet {
        self.link_modes
    }

    async fn set_link_modes(&mut self, modes: LinkModeSet) -> Result<(), MetersError> {
        self.link_modes = modes;
        log::info!("(simulator) pretending to listen to {}", modes.hr());
        Ok(())
    }

    async fn simulate(&mut self) -> Result<(), MetersError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| MetersError::DeviceNotFound(format!("{}: {e}", self.path.display())))?;

        let mut delivered = 0usize;
        for (lineno, line) in content.lines().enumerate() {
            match parse_line(line) {
                Some(bytes) => {
                    delivered += 1;
                    let _ = self.event_tx.send(SourceEvent::Frame {
                        token: self.token,
                        bytes,
                    });
                }
                None => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() && !trimmed.starts_with('#') {
                        log::warn!(
                            "(simulator) {}:{} is not a telegram line",
                            self.path.display(),
                            lineno + 1
                        );
                    }
                }
            }
        }
        log::info!(
            "(simulator) replayed {delivered} telegrams from {}",
            self.path.display()
        );
        Ok(())
    }
}
