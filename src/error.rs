//! Error taxonomy for device access, tuning and capture.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the library. Every operation reports to its caller
/// instead of retrying; the only absorbed failures are the pre-capture
/// discard read and the cleanup filter stop.
#[derive(Debug, Error)]
pub enum DvbError {
    /// One of the two chardev nodes could not be opened.
    #[error("could not open {device}: {source}")]
    OpenFailed {
        device: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An adapter/frontend/demux index exceeds what the kernel exposes.
    #[error("{kind} index {index} is too high (maximum 63)")]
    AddressOutOfRange { kind: &'static str, index: u32 },

    /// The frontend identity/capability query failed or reported a device
    /// this library cannot drive.
    #[error("could not query device information: {0}")]
    QueryFailed(String),

    /// The tuning request was rejected. Retrying is caller policy.
    #[error("unable to tune: {0}")]
    TuneFailed(#[source] io::Error),

    /// Reading lock status or telemetry from the frontend failed.
    #[error("unable to read device status: {0}")]
    StatusReadFailed(#[source] io::Error),

    /// The demux rejected a filter or buffer configuration request.
    #[error("could not configure demux ({kind}): {source}")]
    FilterInstallFailed {
        kind: &'static str,
        #[source]
        source: io::Error,
    },

    /// A stream read returned an error.
    #[error("unable to read stream data: {0}")]
    ReadFailed(#[source] io::Error),

    /// The tap returned end-of-stream before the quota was met.
    #[error("stream ended after {captured} of {quota} bytes")]
    StreamEnded { captured: u64, quota: u64 },

    /// The output sink refused the captured bytes.
    #[error("could not write to output sink: {0}")]
    WriteFailed(#[source] io::Error),

    /// A capture session was requested without a positive byte quota.
    #[error("capture quota must be positive")]
    InvalidQuota,

    /// A capture session was started before a lock was observed.
    #[error("frontend has no lock; tune and wait for lock first")]
    NotLocked,

    /// The cancellation token was tripped.
    #[error("operation cancelled")]
    Cancelled,

    /// The handle was closed and can no longer reach the hardware.
    #[error("device handle is closed")]
    Closed,
}
