//! # AMB8465 Driver
//!
//! Amber AMB8465 USB stick. Commands and indications share one envelope:
//!
//! ```text
//! ┌──────┬─────┬─────┬─────────┬──────────┐
//! │ 0xFF │ cmd │ len │ payload │ checksum │
//! └──────┴─────┴─────┴─────────┴──────────┘
//! ```
//!
//! The checksum is the XOR of every byte from the start byte through the
//! payload. Confirmations echo the command id with bit 7 set; received
//! telegrams arrive as data indications with the complete wM-Bus frame
//! (L-field first) as payload.

use crate::device::{check_link_modes, Dongle};
use crate::error::MetersError;
use crate::link_mode::LinkModeSet;
use crate::manager::{SerialManager, SourceEvent, SourceToken};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

const START_BYTE: u8 = 0xFF;
const CONFIRMATION_BIT: u8 = 0x80;

const CMD_DATA_IND: u8 = 0x03;
const CMD_SET_MODE_REQ: u8 = 0x04;
const CMD_GET_REQ: u8 = 0x0A;

// Radio mode bytes of the SET_MODE request
const MODE_S1: u8 = 0x01;
const MODE_T1: u8 = 0x05;
const MODE_C1: u8 = 0x0E;

const SUPPORTED: &[LinkModeSet] = &[LinkModeSet::C1, LinkModeSet::T1, LinkModeSet::S1];

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, PartialEq)]
pub(crate) struct Amb8465Frame {
    pub cmd: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Extracted {
    Frame(Amb8465Frame),
    Corrupt(usize),
    NeedMore,
}

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Encode a command frame as sent to the stick.
pub(crate) fn encode_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(START_BYTE);
    frame.push(cmd);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(xor_checksum(&frame));
    frame
}

/// Pull the next complete frame out of `buf`.
pub(crate) fn extract_frame(buf: &mut Vec<u8>) -> Extracted {
    if let Some(start) = buf.iter().position(|&b| b == START_BYTE) {
        if start > 0 {
            buf.drain(..start);
            return Extracted::Corrupt(start);
        }
    } else if !buf.is_empty() {
        let n = buf.len();
        buf.clear();
        return Extracted::Corrupt(n);
    }

    if buf.len() < 4 {
        return Extracted::NeedMore;
    }
    let cmd = buf[1];
    let length = buf[2] as usize;
    let total = 3 + length + 1;
    if buf.len() < total {
        return Extracted::NeedMore;
    }

    let expected = buf[total - 1];
    let calculated = xor_checksum(&buf[..total - 1]);
    if expected != calculated {
        buf.drain(..total);
        return Extracted::Corrupt(total);
    }

    let frame = Amb8465Frame {
        cmd,
        payload: buf[3..3 + length].to_vec(),
    };
    buf.drain(..total);
    Extracted::Frame(frame)
}

async fn reader_loop(
    mut read_half: ReadHalf<SerialStream>,
    token: SourceToken,
    event_tx: mpsc::UnboundedSender<SourceEvent>,
    response_tx: mpsc::UnboundedSender<Amb8465Frame>,
) {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 256];
    let mut corrupt_frames = 0u64;
    let mut throttle = crate::logging::LogThrottle::new(1000, 5);

    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                let _ = event_tx.send(SourceEvent::Closed {
                    token,
                    reason: "end of stream".to_string(),
                });
                return;
            }
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match extract_frame(&mut buf) {
                        Extracted::Frame(frame) => {
                            if frame.cmd == CMD_DATA_IND {
                                let _ = event_tx.send(SourceEvent::Frame {
                                    token,
                                    bytes: frame.payload,
                                });
                            } else if frame.cmd & CONFIRMATION_BIT != 0 {
                                let _ = response_tx.send(frame);
                            } else {
                                log::debug!("(amb8465) ignoring command 0x{:02X}", frame.cmd);
                            }
                        }
                        Extracted::Corrupt(n) => {
                            corrupt_frames += 1;
                            if throttle.allow() {
                                log::debug!(
                                    "(amb8465) dropped {n} corrupt bytes ({corrupt_frames} total)"
                                );
                            }
                        }
                        Extracted::NeedMore => break,
                    }
                }
            }
            Err(e) => {
                let _ = event_tx.send(SourceEvent::Closed {
                    token,
                    reason: format!("read error: {e}"),
                });
                return;
            }
        }
    }
}

/// An opened AMB8465 stick.
pub struct Amb8465 {
    writer: WriteHalf<SerialStream>,
    response_rx: mpsc::UnboundedReceiver<Amb8465Frame>,
    link_modes: LinkModeSet,
}

impl Amb8465 {
    /// Probe and open the stick; probing reads one configuration byte and
    /// expects the confirmation echo.
    pub async fn open(path: &str, manager: &mut SerialManager) -> Result<Amb8465, MetersError> {
        let port = tokio_serial::new(path, 9600)
            .open_native_async()
            .map_err(|e| MetersError::DeviceNotFound(format!("{path}: {e}")))?;

        let (read_half, write_half) = tokio::io::split(port);
        let (token, event_tx) = manager.register_source(&format!("amb8465 {path}"));
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        tokio::spawn(reader_loop(read_half, token, event_tx, response_tx));

        let mut dongle = Amb8465 {
            writer: write_half,
            response_rx,
            link_modes: LinkModeSet::empty(),
        };

        // Read one byte of the volatile settings block
        dongle
            .command(CMD_GET_REQ, &[0x00, 0x01])
            .await
            .map_err(|_| {
                MetersError::DeviceUnsupported(format!("{path} did not answer the amb8465 probe"))
            })?;
        Ok(dongle)
    }

    async fn command(&mut self, cmd: u8, payload: &[u8]) -> Result<Amb8465Frame, MetersError> {
        let frame = encode_frame(cmd, payload);
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| MetersError::DeviceNotFound(format!("write failed: {e}")))?;

        let deadline = tokio::time::Instant::now() + RESPONSE_TIMEOUT;
        loop {
            let response = tokio::time::timeout_at(deadline, self.response_rx.recv())
                .await
                .map_err(|_| {
                    MetersError::DeviceUnsupported("no response from amb8465".to_string())
                })?;
            match response {
                Some(frame) if frame.cmd == cmd | CONFIRMATION_BIT => return Ok(frame),
                Some(frame) => {
                    log::debug!("(amb8465) skipping confirmation 0x{:02X}", frame.cmd);
                }
                None => {
                    return Err(MetersError::DeviceUnsupported(
                        "amb8465 reader closed".to_string(),
                    ))
                }
            }
        }
    }
}

#[async_trait(?Send)]
impl Dongle for Amb8465 {
    fn device_type(&self) -> crate::device::DeviceType {
        crate::device::DeviceType::Amb8465
    }

    fn supported_sets(&self) -> &'static [LinkModeSet] {
        SUPPORTED
    }

    fn link_modes(&self) -> LinkModeSet {
        self.link_modes
    }

    async fn set_link_modes(&mut self, modes: LinkModeSet) -> Result<(), MetersError> {
        check_link_modes("amb8465", SUPPORTED, modes)?;
        let mode_byte = if modes == LinkModeSet::C1 {
            MODE_C1
        } else if modes == LinkModeSet::T1 {
            MODE_T1
        } else {
            MODE_S1
        };
        self.command(CMD_SET_MODE_REQ, &[mode_byte])
            .await
            .map_err(|_| {
                MetersError::LinkModeUnsupported(format!(
                    "amb8465 did not confirm link modes {}",
                    modes.hr()
                ))
            })?;
        self.link_modes = modes;
        log::info!("(amb8465) listening to {}", modes.hr());
        Ok(())
    }
}
