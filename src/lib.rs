//! dvblib - DVB-T frontend tuning and filtered stream capture.
//!
//! This library drives the Linux DVB character devices directly: it opens an
//! adapter's frontend/demux pair, tunes to a frequency, waits for signal
//! lock, installs a section or PES filter and reads the resulting byte
//! stream in bounded chunks while sampling receiver telemetry.

pub mod capture;
pub mod device;
pub mod error;
pub mod filter;
pub mod frontend;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use capture::{CancelToken, CaptureSession, ChunkReport, MAX_CHUNK_SIZE};
pub use device::{
    CharDevices, DeviceAddress, DeviceClass, DeviceHandle, DeviceProvider, FrontendInfo,
};
pub use error::DvbError;
pub use filter::{StreamKind, StreamSelector};
pub use frontend::{LockStatus, Telemetry, TuningParameters};
