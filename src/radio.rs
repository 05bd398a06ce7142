//! Contract between the pulse pipeline and the SDR front-end.
//!
//! The scheduler thread owns a [`TxStream`] and an [`RxCommand`] handle, the
//! accumulator thread owns the matching [`RxStream`]; the SDK is assumed to
//! permit concurrent use of distinct streamers. Only the complex-float CPU
//! sample format is supported, and only a single channel. All times are in
//! seconds on the radio's own time base.

use failure::Error;
use num::complex::Complex;
use std::fmt;

/// Receive-side error codes, mirroring the metadata codes the hardware
/// reports per capture. These are per-pulse conditions, not transport
/// failures; the pipeline counts them and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
    /// No samples arrived before the recv timeout expired.
    Timeout,
    /// The device ran out of buffer space and dropped samples.
    Overflow,
    /// The capture command arrived after its requested start time.
    LateCommand,
    /// A samples gap was detected mid-capture.
    BrokenChain,
    Alignment,
    BadPacket,
}

impl fmt::Display for RxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RxError::Timeout => "timeout before first sample",
            RxError::Overflow => "overflow on the receive chain",
            RxError::LateCommand => "stream command was issued too late",
            RxError::BrokenChain => "broken chain, samples dropped mid-capture",
            RxError::Alignment => "multi-channel alignment failed",
            RxError::BadPacket => "bad packet from the transport",
        };
        f.write_str(s)
    }
}

/// Metadata attached to every receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct RxMetadata {
    /// `None` means a clean capture.
    pub error: Option<RxError>,
    /// Timestamp of the first sample. Meaningless when `error` is set.
    pub time: f64,
}

impl RxMetadata {
    pub fn ok(time: f64) -> Self {
        RxMetadata { error: None, time }
    }

    pub fn err(code: RxError) -> Self {
        RxMetadata {
            error: Some(code),
            time: 0.0,
        }
    }
}

/// Wall clock of the radio's time base.
pub trait RadioClock {
    fn now(&self) -> f64;
}

/// Timed transmit side of the device.
pub trait TxStream: Send {
    /// Send `buf` as a single burst starting at `start_time`. Returns the
    /// number of samples the transport accepted; a short count is possible
    /// and left to the receive side to notice.
    fn send_at(
        &mut self,
        buf: &[Complex<f32>],
        start_time: f64,
        timeout: f64,
    ) -> Result<usize, Error>;
}

/// Command half of the receive side, held by the scheduler thread.
pub trait RxCommand: Send {
    /// Schedule a one-shot capture of exactly `num_samps` at `start_time`.
    fn issue_at(&mut self, start_time: f64, num_samps: usize) -> Result<(), Error>;
}

/// Data half of the receive side, held by the accumulator thread.
pub trait RxStream: Send {
    /// Block until a scheduled capture completes or `timeout` seconds pass.
    /// Fills `buf` and returns how many samples were produced plus the
    /// capture metadata. An `Err` is a transport failure and fatal to the
    /// run; per-pulse problems come back through [`RxMetadata`].
    fn recv(&mut self, buf: &mut [Complex<f32>], timeout: f64)
        -> Result<(usize, RxMetadata), Error>;
}
