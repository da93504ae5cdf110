//! Link layer: framed delivery with status polling, bounded retry and
//! cooperative cancellation.
//!
//! The sending path is a single logical thread: every frame write and status
//! poll is an awaited transport call with its own hard timeout. Cancellation
//! is a shared flag checked between frames and polls, never preemptive.

use crate::constants::{FRAME_PAYLOAD_SIZE, STATUS_QUERY, STOP_SEQUENCE};
use crate::error::LhyError;
use crate::frame::Frame;
use num_enum::FromPrimitive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Device status codes returned by the 1-byte hello query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromPrimitive)]
#[repr(u8)]
pub enum LinkStatus {
    Ok = 206,
    CrcError = 207,
    TaskComplete = 236,
    BufferFull = 238,
    #[num_enum(catch_all)]
    Unexpected(u8),
}

/// The bulk transport seam. Production code uses [`crate::device::UsbTransport`];
/// tests substitute a scripted mock.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn write_bulk(&mut self, data: &[u8]) -> Result<usize, LhyError>;
    async fn read_bulk(&mut self, len: usize) -> Result<Vec<u8>, LhyError>;
    /// Attempt to recover a wedged device.
    async fn reinitialize(&mut self) -> Result<(), LhyError>;
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Hard timeout backing each transport call.
    pub io_timeout: Duration,
    /// Consecutive I/O timeouts before the link is declared dead.
    pub max_timeouts: u32,
    /// Timeout count past which a warning is surfaced.
    pub warn_after: u32,
    /// Timeout count past which device re-initialization is attempted.
    pub reinit_after: u32,
    /// Checksum-rejected resends of one frame before giving up.
    pub max_crc_resends: u32,
    /// Delay between buffer-full and completion polls.
    pub poll_interval: Duration,
    /// Minimum spacing between progress-callback invocations.
    pub progress_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            io_timeout: Duration::from_millis(200),
            max_timeouts: 30,
            warn_after: 3,
            reinit_after: 10,
            max_crc_resends: 10,
            poll_interval: Duration::from_millis(5),
            progress_interval: Duration::from_millis(250),
        }
    }
}

pub struct Link<T: Transport> {
    transport: T,
    config: LinkConfig,
    cancel: Arc<AtomicBool>,
    progress: Option<Box<dyn FnMut(&str) + Send>>,
    last_progress: Option<Instant>,
    just_reinitialized: bool,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, config: LinkConfig) -> Self {
        Link {
            transport,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
            last_progress: None,
            just_reinitialized: false,
        }
    }

    /// Tear down the link and recover the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Shared cancellation flag; set it from any thread to stop the job at
    /// the next frame or poll boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Progress callback, invoked from the sending task only, at most once
    /// per `progress_interval`.
    pub fn set_progress<F>(&mut self, callback: F)
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    fn report(&mut self, msg: &str) {
        debug!("{msg}");
        if let Some(cb) = self.progress.as_mut() {
            let now = Instant::now();
            let due = self
                .last_progress
                .is_none_or(|t| now.duration_since(t) >= self.config.progress_interval);
            if due {
                cb(msg);
                self.last_progress = Some(now);
            }
        }
    }

    /// Check the cancellation flag. On cancellation the emergency-stop frame
    /// goes out best-effort before the send loop unwinds.
    async fn ensure_live(&mut self) -> Result<(), LhyError> {
        if self.cancel.load(Ordering::Relaxed) {
            warn!("job cancelled, sending emergency stop");
            if let Ok(stop) = Frame::build(STOP_SEQUENCE) {
                let _ = self.transport.write_bulk(stop.as_bytes()).await;
            }
            return Err(LhyError::Cancelled);
        }
        Ok(())
    }

    /// Send the hello byte and read back the status code.
    pub async fn query_status(&mut self) -> Result<LinkStatus, LhyError> {
        self.transport.write_bulk(&[STATUS_QUERY]).await?;
        let data = self
            .transport
            .read_bulk(crate::constants::STATUS_READ_SIZE)
            .await?;
        let code = *data
            .get(1)
            .ok_or_else(|| LhyError::Protocol("short status read".into()))?;
        Ok(LinkStatus::from_primitive(code))
    }

    /// Deliver one frame reliably.
    ///
    /// Buffer-full back-pressure waits indefinitely (bounded only by
    /// cancellation). I/O timeouts and checksum rejections each carry their
    /// own escalating counter; a checksum rejection resends the identical
    /// frame bytes so the retransmission cannot diverge from what the CRC
    /// was computed over.
    pub async fn send_frame_checked(&mut self, frame: &Frame) -> Result<(), LhyError> {
        let mut timeouts = 0u32;
        let mut crc_resends = 0u32;
        loop {
            self.ensure_live().await?;
            match self.query_status().await {
                Ok(LinkStatus::BufferFull) => {
                    self.report("controller buffer full, waiting");
                    sleep(self.config.poll_interval).await;
                    continue;
                }
                Ok(_) => {}
                Err(LhyError::Timeout(_)) => {
                    timeouts += 1;
                    self.escalate_timeout(timeouts).await?;
                    continue;
                }
                Err(e) => return Err(e),
            }

            match self.transport.write_bulk(frame.as_bytes()).await {
                Ok(n) => {
                    debug!(bytes = n, "frame written");
                    timeouts = 0;
                }
                Err(LhyError::Timeout(_)) => {
                    timeouts += 1;
                    self.escalate_timeout(timeouts).await?;
                    continue;
                }
                Err(e) => return Err(e),
            }

            match self.query_status().await {
                Ok(LinkStatus::CrcError) => {
                    crc_resends += 1;
                    if crc_resends >= self.config.max_crc_resends {
                        return Err(LhyError::CrcMismatch {
                            retries: crc_resends,
                        });
                    }
                    self.report("checksum rejected, resending frame");
                }
                Ok(LinkStatus::Unexpected(code)) => {
                    if self.just_reinitialized {
                        self.just_reinitialized = false;
                    } else {
                        warn!(code, "unexpected status after frame write");
                    }
                    return Ok(());
                }
                Ok(_) => return Ok(()),
                Err(LhyError::Timeout(_)) => {
                    timeouts += 1;
                    self.escalate_timeout(timeouts).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn escalate_timeout(&mut self, timeouts: u32) -> Result<(), LhyError> {
        if timeouts >= self.config.max_timeouts {
            return Err(LhyError::DeviceTimeout { retries: timeouts });
        }
        if timeouts >= self.config.reinit_after {
            warn!(timeouts, "device unresponsive, reinitializing");
            self.transport.reinitialize().await?;
            self.just_reinitialized = true;
        } else if timeouts >= self.config.warn_after {
            self.report("device is slow to respond");
        }
        Ok(())
    }

    /// Chunk an encoded job stream into frames and deliver each.
    pub async fn send_stream(&mut self, stream: &[u8]) -> Result<(), LhyError> {
        let total = stream.len();
        info!(bytes = total, "sending job stream");
        let mut sent = 0usize;
        for chunk in stream.chunks(FRAME_PAYLOAD_SIZE) {
            let frame = Frame::build(chunk)?;
            self.send_frame_checked(&frame).await?;
            sent += chunk.len();
            self.report(&format!("sent {sent} of {total} bytes"));
        }
        Ok(())
    }

    /// Poll until the device reports the job finished. Cancellable; gives up
    /// after the unresponsive bound.
    pub async fn wait_for_completion(&mut self) -> Result<(), LhyError> {
        let mut misses = 0u32;
        loop {
            self.ensure_live().await?;
            match self.query_status().await {
                Ok(LinkStatus::TaskComplete) => {
                    info!("task complete");
                    return Ok(());
                }
                Ok(_) => {
                    misses = 0;
                    self.report("waiting for job to finish");
                }
                Err(LhyError::Timeout(_)) => {
                    misses += 1;
                    if misses >= self.config.max_timeouts {
                        return Err(LhyError::DeviceTimeout { retries: misses });
                    }
                }
                Err(e) => return Err(e),
            }
            sleep(self.config.poll_interval).await;
        }
    }
}
