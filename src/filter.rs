//! Demux filter configuration: selecting which sub-stream the tap carries.
//!
//! The hardware model supports one active filter per demux node; installing
//! a new one supersedes whatever was active before.

use std::fmt;

use log::{debug, warn};

use crate::device::DeviceHandle;
use crate::error::DvbError;

/// Raw `dmx_ts_pes` codes from the demux ABI.
mod hw {
    pub const PES_AUDIO: u32 = 0;
    pub const PES_VIDEO: u32 = 1;
    pub const PES_TELETEXT: u32 = 2;
    pub const PES_SUBTITLE: u32 = 3;
    pub const PES_PCR: u32 = 4;
    pub const PES_OTHER: u32 = 20;
}

/// Elementary stream classification for PES filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StreamKind {
    Video,
    Audio,
    Teletext,
    Subtitle,
    /// Program clock reference stream.
    ClockReference,
    Other,
}

impl StreamKind {
    pub const ALL: [StreamKind; 6] = [
        StreamKind::Video,
        StreamKind::Audio,
        StreamKind::Teletext,
        StreamKind::Subtitle,
        StreamKind::ClockReference,
        StreamKind::Other,
    ];

    /// Total mapping to the hardware PES type code. Kinds without a
    /// dedicated slot land on the generic "other" code.
    pub fn pes_code(self) -> u32 {
        match self {
            StreamKind::Video => hw::PES_VIDEO,
            StreamKind::Audio => hw::PES_AUDIO,
            StreamKind::Teletext => hw::PES_TELETEXT,
            StreamKind::Subtitle => hw::PES_SUBTITLE,
            StreamKind::ClockReference => hw::PES_PCR,
            StreamKind::Other => hw::PES_OTHER,
        }
    }

    /// Numeric selector as accepted on the command surface. Out-of-range
    /// values deliberately resolve to [`StreamKind::Other`] instead of
    /// failing.
    pub fn from_index(index: u32) -> Self {
        match index {
            0 => StreamKind::Video,
            1 => StreamKind::Audio,
            2 => StreamKind::Teletext,
            3 => StreamKind::Subtitle,
            4 => StreamKind::ClockReference,
            _ => StreamKind::Other,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Teletext => "teletext",
            StreamKind::Subtitle => "subtitle",
            StreamKind::ClockReference => "clock-reference",
            StreamKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Which sub-stream of the multiplex to extract, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelector {
    /// Raw data-table sections for the given stream identifier.
    Section { pid: u16 },
    /// An elementary stream's packetized payload, tagged by content type.
    Pes { pid: u16, kind: StreamKind },
}

impl StreamSelector {
    pub fn pid(&self) -> u16 {
        match *self {
            StreamSelector::Section { pid } => pid,
            StreamSelector::Pes { pid, .. } => pid,
        }
    }
}

impl fmt::Display for StreamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSelector::Section { pid } => write!(f, "section filter on PID {pid}"),
            StreamSelector::Pes { pid, kind } => write!(f, "{kind} PES filter on PID {pid}"),
        }
    }
}

impl DeviceHandle {
    /// Installs whichever filter the selector names.
    pub fn install_filter(&mut self, selector: StreamSelector) -> Result<(), DvbError> {
        match selector {
            StreamSelector::Section { pid } => self.install_section_filter(pid),
            StreamSelector::Pes { pid, kind } => self.install_pes_filter(pid, kind),
        }
    }

    /// Routes the named PID to the readable tap as raw sections and starts
    /// capturing immediately.
    pub fn install_section_filter(&mut self, pid: u16) -> Result<(), DvbError> {
        debug!("installing section filter, PID {pid}");
        let res = self
            .demux_mut()?
            .set_section_filter(pid)
            .map_err(|source| DvbError::FilterInstallFailed {
                kind: "section filter",
                source,
            });
        self.note(res)
    }

    /// As above, but selects the elementary stream classification.
    pub fn install_pes_filter(&mut self, pid: u16, kind: StreamKind) -> Result<(), DvbError> {
        debug!("installing {kind} PES filter, PID {pid}");
        let res = self
            .demux_mut()?
            .set_pes_filter(pid, kind.pes_code())
            .map_err(|source| DvbError::FilterInstallFailed {
                kind: "PES filter",
                source,
            });
        self.note(res)
    }

    /// Resizes the demux's internal buffer for the tap.
    pub fn set_stream_buffer_size(&mut self, bytes: usize) -> Result<(), DvbError> {
        let res = self
            .demux_mut()?
            .set_buffer_size(bytes)
            .map_err(|source| DvbError::FilterInstallFailed {
                kind: "buffer size",
                source,
            });
        self.note(res)
    }

    /// Deactivates the active filter, best-effort. This is a cleanup step,
    /// not a data-path operation, so its own failure is logged and absorbed.
    pub fn stop_filter(&mut self) {
        if let Ok(demux) = self.demux_mut() {
            if let Err(e) = demux.stop() {
                warn!("failed to stop demux filter: {e}");
            }
        }
    }
}
