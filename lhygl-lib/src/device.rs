//! Device session: exclusive ownership of the open USB handle and the
//! high-level operations built on the link layer.

use crate::constants::{HOME_SEQUENCE, STOP_SEQUENCE, UNLOCK_SEQUENCE};
use crate::error::LhyError;
use crate::frame::Frame;
use crate::link::{Link, LinkConfig, Transport};
use bytes::Bytes;
use nusb::transfer::RequestBuffer;
use nusb::{Device, Interface};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

// USB identification of the LHYMICRO-GL controller
pub const VID: u16 = 0x1A86;
pub const PID: u16 = 0x5512;
pub const ENDPOINT_OUT: u8 = 0x02;
pub const ENDPOINT_IN: u8 = 0x82;

/// Bulk transport over the claimed USB interface. Every call is wrapped in
/// the configured hard timeout; a blocked transfer cannot be interrupted
/// mid-flight, only abandoned on the next loop iteration.
pub struct UsbTransport {
    device: Device,
    interface: Interface,
    io_timeout: Duration,
}

impl UsbTransport {
    pub async fn open(io_timeout: Duration) -> Result<Self, LhyError> {
        info!("Searching for laser controller...");
        let device_info = nusb::list_devices()?
            .find(|d| d.vendor_id() == VID && d.product_id() == PID)
            .ok_or(LhyError::DeviceNotFound)?;

        info!(
            "Found controller on bus {} addr {}",
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info.open()?;
        device.reset()?;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let interface = device.detach_and_claim_interface(0)?;
        info!("Interface claimed successfully.");

        Ok(UsbTransport {
            device,
            interface,
            io_timeout,
        })
    }
}

impl Transport for UsbTransport {
    async fn write_bulk(&mut self, data: &[u8]) -> Result<usize, LhyError> {
        let transfer = self.interface.bulk_out(ENDPOINT_OUT, data.to_vec());
        let completion = timeout(self.io_timeout, transfer).await?;
        let sent = completion.into_result()?;
        Ok(sent.actual_length())
    }

    async fn read_bulk(&mut self, len: usize) -> Result<Vec<u8>, LhyError> {
        let transfer = self.interface.bulk_in(ENDPOINT_IN, RequestBuffer::new(len));
        let completion = timeout(self.io_timeout, transfer).await?;
        let data = completion.into_result()?;
        Ok(data)
    }

    async fn reinitialize(&mut self) -> Result<(), LhyError> {
        warn!("resetting USB device");
        self.device.reset()?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }
}

/// An open session with one controller. The USB handle is exclusively owned
/// for the session's lifetime; release it (drop the session) before
/// re-acquiring, e.g. on error recovery.
pub struct LhySession {
    link: Link<UsbTransport>,
}

impl LhySession {
    /// Find, open, reset and claim the device. Absence or claim failure is
    /// fatal here; no device identity exists yet to retry against.
    pub async fn open() -> Result<Self, LhyError> {
        Self::open_with(LinkConfig::default()).await
    }

    pub async fn open_with(config: LinkConfig) -> Result<Self, LhyError> {
        let transport = UsbTransport::open(config.io_timeout).await?;
        let mut link = Link::new(transport, config);
        // A freshly reset controller may answer the first hello with a junk
        // code; read it once so later polls see real statuses.
        let status = link.query_status().await?;
        debug!(%status, "initial controller status");
        Ok(LhySession { link })
    }

    /// Shared flag a worker thread can set to abort the running operation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.link.cancel_flag()
    }

    pub fn set_progress<F>(&mut self, callback: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.link.set_progress(callback);
    }

    async fn send_sequence(&mut self, seq: &[u8]) -> Result<(), LhyError> {
        let frame = Frame::build(seq)?;
        self.link.send_frame_checked(&frame).await
    }

    /// Drive the head to the home switches.
    pub async fn home(&mut self) -> Result<(), LhyError> {
        self.send_sequence(HOME_SEQUENCE).await
    }

    /// Release the stepper rail so the head can be moved by hand.
    pub async fn unlock_rail(&mut self) -> Result<(), LhyError> {
        self.send_sequence(UNLOCK_SEQUENCE).await
    }

    /// Interrupt whatever the controller is doing, immediately.
    pub async fn emergency_stop(&mut self) -> Result<(), LhyError> {
        self.send_sequence(STOP_SEQUENCE).await
    }

    /// Transmit an encoded job stream and block until the controller
    /// reports the task complete.
    pub async fn send_job(&mut self, stream: Bytes) -> Result<(), LhyError> {
        self.link.send_stream(&stream).await?;
        self.link.wait_for_completion().await
    }
}
