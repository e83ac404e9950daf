//! # RTL-SDR Driver
//!
//! Runs the external `rtl_sdr | rtl_wmbus` pipeline and reads demodulated
//! telegrams from its stdout. Each line looks like
//!
//! ```text
//! T1;1;1;2019-02-09 07:14:18.000;117;102;76348799;0x2A442D2C...
//! ```
//!
//! the last field being the frame hex. rtl_wmbus demodulates T1 and C1
//! simultaneously, so the device accepts any requested subset of those; no
//! command is sent anywhere.

use crate::device::{check_link_modes, Dongle};
use crate::error::MetersError;
use crate::link_mode::LinkModeSet;
use crate::manager::{SerialManager, SourceEvent, SourceToken};
use crate::util::hex::parse_hex_lenient;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc;

const SUPPORTED: &[LinkModeSet] = &[LinkModeSet::C1.union(LinkModeSet::T1)];

const DEFAULT_FREQUENCY: &str = "868.95M";

/// Build the shell command line from the device argument.
///
/// `rtlwmbus` runs the default pipeline, `rtlwmbus:868.9M` retunes it, and
/// anything else after the colon is taken as a complete command line.
pub(crate) fn command_line(extra: Option<&str>) -> String {
    match extra {
        None => format!("rtl_sdr -f {DEFAULT_FREQUENCY} -s 1.6e6 - 2>/dev/null | rtl_wmbus"),
        Some(arg) if is_frequency(arg) => {
            format!("rtl_sdr -f {arg} -s 1.6e6 - 2>/dev/null | rtl_wmbus")
        }
        Some(command) => command.to_string(),
    }
}

/// A frequency argument is digits and dots with an optional M/k suffix.
pub(crate) fn is_frequency(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == 'M' || c == 'k')
        && s.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Extract the frame bytes from one rtl_wmbus output line.
pub(crate) fn parse_line(line: &str) -> Option<Vec<u8>> {
    let line = line.trim();
    if !(line.starts_with("T1;") || line.starts_with("C1;")) {
        return None;
    }
    let hex = line.rsplit(';').next()?;
    let hex = hex.strip_prefix("0x").unwrap_or(hex);
    parse_hex_lenient(hex).ok()
}

async fn reader_loop(
    stdout: ChildStdout,
    token: SourceToken,
    event_tx: mpsc::UnboundedSender<SourceEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(bytes) = parse_line(&line) {
                    let _ = event_tx.send(SourceEvent::Frame { token, bytes });
                } else if !line.trim().is_empty() {
                    log::debug!("(rtlwmbus) ignoring line: {line}");
                }
            }
            Ok(None) => {
                let _ = event_tx.send(SourceEvent::Closed {
                    token,
                    reason: "rtl_wmbus pipe closed".to_string(),
                });
                return;
            }
            Err(e) => {
                let _ = event_tx.send(SourceEvent::Closed {
                    token,
                    reason: format!("rtl_wmbus read error: {e}"),
                });
                return;
            }
        }
    }
}

/// The rtl_sdr | rtl_wmbus child process pair.
pub struct RtlWmbus {
    // Held so the pipeline is signaled when the receiver shuts down
    _child: Child,
    link_modes: LinkModeSet,
}

impl RtlWmbus {
    pub async fn open(
        extra: Option<String>,
        manager: &mut SerialManager,
    ) -> Result<RtlWmbus, MetersError> {
        let command = command_line(extra.as_deref());
        log::info!("(rtlwmbus) using command: {command}");

        let mut child = tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MetersError::DeviceNotFound(format!("cannot spawn \"{command}\": {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MetersError::ChildProcessExited("rtl_wmbus stdout not captured".to_string())
        })?;

        let (token, event_tx) = manager.register_source("rtlwmbus");
        tokio::spawn(reader_loop(stdout, token, event_tx));

        Ok(RtlWmbus {
            _child: child,
            link_modes: LinkModeSet::empty(),
        })
    }
}

#[async_trait(?Send)]
impl Dongle for RtlWmbus {
    fn device_type(&self) -> crate::device::DeviceType {
        crate::device::DeviceType::RtlWmbus
    }

    fn supported_sets(&self) -> &'static [LinkModeSet] {
        SUPPORTED
    }

    fn link_modes(&self) -> LinkModeSet {
        self.link_modes
    }

    async fn set_link_modes(&mut self, modes: LinkModeSet) -> Result<(), MetersError> {
        check_link_modes("rtlwmbus", SUPPORTED, modes)?;
        self.link_modes = modes;
        log::info!("(rtlwmbus) listening to {}", modes.hr());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_forms() {
        assert_eq!(
            command_line(None),
            "rtl_sdr -f 868.95M -s 1.6e6 - 2>/dev/null | rtl_wmbus"
        );
        assert_eq!(
            command_line(Some("868.9M")),
            "rtl_sdr -f 868.9M -s 1.6e6 - 2>/dev/null | rtl_wmbus"
        );
        assert_eq!(command_line(Some("my_sdr | my_wmbus")), "my_sdr | my_wmbus");
    }

    #[test]
    fn test_is_frequency() {
        assert!(is_frequency("868.95M"));
        assert!(is_frequency("868950000"));
        assert!(!is_frequency("rtl_sdr -f 868.95M"));
        assert!(!is_frequency(""));
    }

    #[test]
    fn test_parse_line() {
        let line = "T1;1;1;2019-02-09 07:14:18.000;117;102;76348799;0x2A442D2C99873476";
        let bytes = parse_line(line).unwrap();
        assert_eq!(bytes[0], 0x2A);
        assert_eq!(bytes.len(), 8);

        assert!(parse_line("").is_none());
        assert!(parse_line("rtl_wmbus: startup message").is_none());
        assert!(parse_line("C1;1;1;2019;1;1;1;0x1E44AE4C").is_some());
    }
}
