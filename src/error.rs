//! # Receiver Error Handling
//!
//! This module defines the MetersError enum, the process-level error type of
//! the wmbusmeters crate. Module-local error types (telegram parsing, crypto,
//! unit conversion) convert into it at the component boundary.

use thiserror::Error;

/// Represents the different error kinds that can occur in the receiver.
#[derive(Debug, Error)]
pub enum MetersError {
    /// The command line or config files could not be turned into a runnable
    /// configuration.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The device path does not exist or could not be opened.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A device was opened but its identification bytes did not match any
    /// supported dongle.
    #[error("Device not supported: {0}")]
    DeviceUnsupported(String),

    /// The dongle cannot listen to the requested link modes simultaneously.
    #[error("Link modes not supported: {0}")]
    LinkModeUnsupported(String),

    /// A wire frame failed envelope checksum or structural validation.
    #[error("Corrupt frame: {0}")]
    FrameCorrupt(String),

    /// Decryption with the configured key did not produce a well-formed
    /// record stream.
    #[error("Decryption failed: {0}")]
    DecryptFailed(String),

    /// The family decoder could not project the records into a reading.
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// A printer sink (stdout, meter file, shell hook) failed.
    #[error("Output failed: {0}")]
    OutputFailed(String),

    /// A dongle child process (rtl_sdr | rtl_wmbus) exited.
    #[error("Child process exited: {0}")]
    ChildProcessExited(String),
}

impl From<crate::telegram::TelegramError> for MetersError {
    fn from(e: crate::telegram::TelegramError) -> Self {
        MetersError::FrameCorrupt(e.to_string())
    }
}

impl From<crate::telegram::crypto::CryptoError> for MetersError {
    fn from(e: crate::telegram::crypto::CryptoError) -> Self {
        MetersError::DecryptFailed(e.to_string())
    }
}

impl From<crate::units::ConversionError> for MetersError {
    fn from(e: crate::units::ConversionError) -> Self {
        MetersError::ConfigInvalid(e.to_string())
    }
}
