use std::io;
use thiserror::Error;

/// The primary error type for the `lhygl` library.
#[derive(Error, Debug)]
pub enum LhyError {
    #[error("USB device not found. Is the laser cutter connected and powered?")]
    DeviceNotFound,

    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] nusb::transfer::TransferError),

    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("Timeout during USB operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("Device stopped responding after {retries} consecutive timeouts")]
    DeviceTimeout { retries: u32 },

    #[error("Frame checksum rejected by device after {retries} resends")]
    CrcMismatch { retries: u32 },

    #[error("Stopped by user")]
    Cancelled,

    #[error("Distance {0} is not a whole number of device ticks")]
    InvalidDistance(f64),

    #[error("Line encoding drift: requested ({dx},{dy}), emitted ({got_dx},{got_dy})")]
    LineMismatch {
        dx: i64,
        dy: i64,
        got_dx: i64,
        got_dy: i64,
    },

    #[error("Malformed speed code at offset {offset}: {message}")]
    MalformedSpeedCode { offset: usize, message: String },

    #[error("Unknown board name: {0}")]
    UnknownBoard(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl LhyError {
    pub(crate) fn bad_code(offset: usize, message: impl Into<String>) -> Self {
        LhyError::MalformedSpeedCode {
            offset,
            message: message.into(),
        }
    }
}
