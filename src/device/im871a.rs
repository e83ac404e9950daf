//! # IM871A Driver
//!
//! iM871A-USB dongle speaking the IMST HCI protocol over 57600 baud serial:
//!
//! ```text
//! ┌──────┬───────────────┬────────┬────────┬─────────┬───────────┐
//! │ 0xA5 │ ctrl/endpoint │ msg id │ length │ payload │ CRC16 opt │
//! └──────┴───────────────┴────────┴────────┴─────────┴───────────┘
//! ```
//!
//! The low nibble of the second byte selects the endpoint, the high nibble
//! carries control bits; bit 3 announces a trailing CRC. Device management
//! responses are routed to the command path, radio link indications carry
//! complete wM-Bus telegrams (L-field first) and go to the serial manager.

use crate::device::{check_link_modes, Dongle};
use crate::error::MetersError;
use crate::link_mode::LinkModeSet;
use crate::manager::{SerialManager, SourceEvent, SourceToken};
use crate::telegram::crc16_en13757;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

const SOF: u8 = 0xA5;
const CRC_BIT: u8 = 0x80;

const DEVMGMT_ID: u8 = 0x01;
const RADIOLINK_ID: u8 = 0x02;

const DEVMGMT_MSG_PING_REQ: u8 = 0x01;
const DEVMGMT_MSG_PING_RSP: u8 = 0x02;
const DEVMGMT_MSG_SET_CONFIG_REQ: u8 = 0x03;
const DEVMGMT_MSG_SET_CONFIG_RSP: u8 = 0x04;
const RADIOLINK_MSG_WMBUSMSG_IND: u8 = 0x03;

// Radio mode bytes of the SET_CONFIG request
const LINK_MODE_S1: u8 = 0x00;
const LINK_MODE_T1: u8 = 0x03;
const LINK_MODE_C1A: u8 = 0x06;
const LINK_MODE_CT: u8 = 0x09;

const SUPPORTED: &[LinkModeSet] = &[
    LinkModeSet::C1,
    LinkModeSet::T1,
    LinkModeSet::S1,
    LinkModeSet::C1.union(LinkModeSet::T1),
];

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1500);

/// One decoded HCI frame.
#[derive(Debug, PartialEq)]
pub(crate) struct HciFrame {
    pub endpoint: u8,
    pub msg_id: u8,
    pub payload: Vec<u8>,
}

/// Result of trying to pull a frame out of the accumulation buffer.
#[derive(Debug, PartialEq)]
pub(crate) enum Extracted {
    Frame(HciFrame),
    /// A frame failed validation; the count of discarded bytes.
    Corrupt(usize),
    NeedMore,
}

/// Encode an HCI frame without CRC, as sent to the dongle.
pub(crate) fn encode_frame(endpoint: u8, msg_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(SOF);
    frame.push(endpoint & 0x0F);
    frame.push(msg_id);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame
}

/// Pull the next complete frame out of `buf`, discarding garbage before a
/// start-of-frame byte.
pub(crate) fn extract_frame(buf: &mut Vec<u8>) -> Extracted {
    // Resynchronize on SOF
    if let Some(start) = buf.iter().position(|&b| b == SOF) {
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
    let ctrl = buf[1];
    let msg_id = buf[2];
    let length = buf[3] as usize;
    let has_crc = ctrl & CRC_BIT != 0;
    let total = 4 + length + if has_crc { 2 } else { 0 };
    if buf.len() < total {
        return Extracted::NeedMore;
    }

    if has_crc {
        let expected = u16::from_le_bytes([buf[total - 2], buf[total - 1]]);
        let calculated = crc16_en13757(&buf[1..4 + length]);
        if expected != calculated {
            buf.drain(..total);
            return Extracted::Corrupt(total);
        }
    }

    let frame = HciFrame {
        endpoint: ctrl & 0x0F,
        msg_id,
        payload: buf[4..4 + length].to_vec(),
    };
    buf.drain(..total);
    Extracted::Frame(frame)
}

async fn reader_loop(
    mut read_half: ReadHalf<SerialStream>,
    token: SourceToken,
    event_tx: mpsc::UnboundedSender<SourceEvent>,
    response_tx: mpsc::UnboundedSender<HciFrame>,
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
                        Extracted::Frame(frame) => match frame.endpoint {
                            RADIOLINK_ID if frame.msg_id == RADIOLINK_MSG_WMBUSMSG_IND => {
                                let _ = event_tx.send(SourceEvent::Frame {
                                    token,
                                    bytes: frame.payload,
                                });
                            }
                            DEVMGMT_ID => {
                                let _ = response_tx.send(frame);
                            }
                            other => {
                                log::debug!("(im871a) ignoring endpoint 0x{other:02X}");
                            }
                        },
                        Extracted::Corrupt(n) => {
                            corrupt_frames += 1;
                            if throttle.allow() {
                                log::debug!(
                                    "(im871a) dropped {n} corrupt bytes ({corrupt_frames} total)"
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

/// An opened iM871A dongle.
pub struct Im871a {
    writer: WriteHalf<SerialStream>,
    response_rx: mpsc::UnboundedReceiver<HciFrame>,
    link_modes: LinkModeSet,
}

impl Im871a {
    /// Probe and open the dongle. A missing ping answer means the device on
    /// this path is something else.
    pub async fn open(path: &str, manager: &mut SerialManager) -> Result<Im871a, MetersError> {
        let port = tokio_serial::new(path, 57600)
            .open_native_async()
            .map_err(|e| MetersError::DeviceNotFound(format!("{path}: {e}")))?;

        let (read_half, write_half) = tokio::io::split(port);
        let (token, event_tx) = manager.register_source(&format!("im871a {path}"));
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        tokio::spawn(reader_loop(read_half, token, event_tx, response_tx));

        let mut dongle = Im871a {
            writer: write_half,
            response_rx,
            link_modes: LinkModeSet::empty(),
        };

        dongle
            .command(DEVMGMT_MSG_PING_REQ, &[], DEVMGMT_MSG_PING_RSP)
            .await
            .map_err(|_| {
                MetersError::DeviceUnsupported(format!("{path} did not answer the im871a ping"))
            })?;
        Ok(dongle)
    }

    async fn command(
        &mut self,
        msg_id: u8,
        payload: &[u8],
        expected_rsp: u8,
    ) -> Result<HciFrame, MetersError> {
        let frame = encode_frame(DEVMGMT_ID, msg_id, payload);
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| MetersError::DeviceNotFound(format!("write failed: {e}")))?;

        let deadline = tokio::time::Instant::now() + RESPONSE_TIMEOUT;
        loop {
            let response = tokio::time::timeout_at(deadline, self.response_rx.recv())
                .await
                .map_err(|_| {
                    MetersError::DeviceUnsupported("no response from im871a".to_string())
                })?;
            match response {
                Some(frame) if frame.msg_id == expected_rsp => return Ok(frame),
                Some(frame) => {
                    log::debug!("(im871a) skipping unsolicited response 0x{:02X}", frame.msg_id);
                }
                None => {
                    return Err(MetersError::DeviceUnsupported(
                        "im871a reader closed".to_string(),
                    ))
                }
            }
        }
    }
}

#[async_trait(?Send)]
impl Dongle for Im871a {
    fn device_type(&self) -> crate::device::DeviceType {
        crate::device::DeviceType::Im871a
    }

    fn supported_sets(&self) -> &'static [LinkModeSet] {
        SUPPORTED
    }

    fn link_modes(&self) -> LinkModeSet {
        self.link_modes
    }

    async fn set_link_modes(&mut self, modes: LinkModeSet) -> Result<(), MetersError> {
        check_link_modes("im871a", SUPPORTED, modes)?;
        let mode_byte = if modes == LinkModeSet::C1 | LinkModeSet::T1 {
            LINK_MODE_CT
        } else if modes == LinkModeSet::C1 {
            LINK_MODE_C1A
        } else if modes == LinkModeSet::T1 {
            LINK_MODE_T1
        } else {
            LINK_MODE_S1
        };
        // 0x00 selects the volatile configuration, 0x01 flags the radio
        // mode field as present
        self.command(
            DEVMGMT_MSG_SET_CONFIG_REQ,
            &[0x00, 0x01, mode_byte],
            DEVMGMT_MSG_SET_CONFIG_RSP,
        )
        .await
        .map_err(|_| {
            MetersError::LinkModeUnsupported(format!(
                "im871a did not confirm link modes {}",
                modes.hr()
            ))
        })?;
        self.link_modes = modes;
        log::info!("(im871a) listening to {}", modes.hr());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(DEVMGMT_ID, DEVMGMT_MSG_PING_REQ, &[]);
        assert_eq!(frame, vec![0xA5, 0x01, 0x01, 0x00]);
    }

    #[test]
    fn test_extract_frame_roundtrip() {
        let mut buf = encode_frame(RADIOLINK_ID, RADIOLINK_MSG_WMBUSMSG_IND, &[0x2A, 0x44]);
        match extract_frame(&mut buf) {
            Extracted::Frame(frame) => {
                assert_eq!(frame.endpoint, RADIOLINK_ID);
                assert_eq!(frame.msg_id, RADIOLINK_MSG_WMBUSMSG_IND);
                assert_eq!(frame.payload, vec![0x2A, 0x44]);
            }
            other => panic!("expected frame, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_extract_frame_needs_more() {
        let full = encode_frame(DEVMGMT_ID, DEVMGMT_MSG_PING_RSP, &[0x01, 0x02, 0x03]);
        let mut buf = full[..5].to_vec();
        assert_eq!(extract_frame(&mut buf), Extracted::NeedMore);
        buf.extend_from_slice(&full[5..]);
        assert!(matches!(extract_frame(&mut buf), Extracted::Frame(_)));
    }

    #[test]
    fn test_extract_frame_resyncs_on_garbage() {
        let mut buf = vec![0x00, 0x13, 0x37];
        buf.extend_from_slice(&encode_frame(DEVMGMT_ID, DEVMGMT_MSG_PING_RSP, &[]));
        assert_eq!(extract_frame(&mut buf), Extracted::Corrupt(3));
        assert!(matches!(extract_frame(&mut buf), Extracted::Frame(_)));
    }

    #[test]
    fn test_extract_frame_verifies_crc() {
        // Build a frame that announces a CRC and corrupt it
        let mut frame = vec![SOF, DEVMGMT_ID | CRC_BIT, DEVMGMT_MSG_PING_RSP, 0x00];
        let crc = crc16_en13757(&frame[1..]);
        frame.extend_from_slice(&crc.to_le_bytes());

        let mut good = frame.clone();
        assert!(matches!(extract_frame(&mut good), Extracted::Frame(_)));

        let mut bad = frame.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        assert_eq!(extract_frame(&mut bad), Extracted::Corrupt(6));
    }
}
