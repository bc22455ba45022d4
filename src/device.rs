//! Device lifecycle: the frontend/demux chardev pair behind one adapter.
//!
//! A [`DeviceHandle`] owns both kernel-facing resources exclusively. They are
//! acquired together by [`DeviceHandle::open`] and released together, in
//! reverse order of acquisition, by [`DeviceHandle::close`] or on drop. The
//! actual resource access goes through the [`FrontendPort`] and [`DemuxPort`]
//! traits so that everything above this module can run against mocks.

use std::fmt;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::DvbError;
use crate::frontend::TuningParameters;

#[cfg(target_os = "linux")]
pub use self::linux::CharDevices;
#[cfg(not(target_os = "linux"))]
pub use self::unsupported::CharDevices;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod unsupported;

/// Highest node index the kernel driver exposes per adapter directory.
const MAX_NODE_INDEX: u32 = 63;

/// Raw `fe_type` identifiers reported by the frontend query.
mod fe_type {
    pub const QPSK: u32 = 0;
    pub const QAM: u32 = 1;
    pub const OFDM: u32 = 2;
}

/// Raw `fe_caps` bits this library insists on before accepting a device.
mod fe_caps {
    pub const CAN_INVERSION_AUTO: u32 = 0x1;
    pub const CAN_FEC_AUTO: u32 = 0x200;
    pub const CAN_QAM_AUTO: u32 = 0x1_0000;
    pub const CAN_TRANSMISSION_MODE_AUTO: u32 = 0x2_0000;
    pub const CAN_BANDWIDTH_AUTO: u32 = 0x4_0000;
    pub const CAN_GUARD_INTERVAL_AUTO: u32 = 0x8_0000;
}

/// Adapter/frontend/demux indices addressing one chardev pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddress {
    pub adapter: u32,
    pub frontend: u32,
    pub demux: u32,
}

impl DeviceAddress {
    pub fn new(adapter: u32, frontend: u32, demux: u32) -> Self {
        DeviceAddress {
            adapter,
            frontend,
            demux,
        }
    }

    pub fn frontend_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "/dev/dvb/adapter{}/frontend{}",
            self.adapter, self.frontend
        ))
    }

    pub fn demux_path(&self) -> PathBuf {
        PathBuf::from(format!(
            "/dev/dvb/adapter{}/demux{}",
            self.adapter, self.demux
        ))
    }

    fn validate(&self) -> Result<(), DvbError> {
        for (kind, index) in [
            ("adapter", self.adapter),
            ("frontend", self.frontend),
            ("demux", self.demux),
        ] {
            if index > MAX_NODE_INDEX {
                return Err(DvbError::AddressOutOfRange { kind, index });
            }
        }
        Ok(())
    }
}

/// Identity and capability report from the frontend query, still carrying
/// the raw hardware codes.
#[derive(Debug, Clone)]
pub struct FrontendInfo {
    pub name: String,
    /// Raw `fe_type` code, decoded via [`DeviceClass::from_hw_code`].
    pub kind: u32,
    /// Raw `fe_caps` bit set.
    pub caps: u32,
}

/// Hardware class of the tuner behind the frontend node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Terrestrial,
    Satellite,
    Cable,
}

impl DeviceClass {
    /// Decodes the raw `fe_type` identifier. Each code maps to exactly one
    /// class; unrecognized codes are rejected rather than defaulted.
    pub fn from_hw_code(code: u32) -> Option<Self> {
        match code {
            fe_type::QPSK => Some(DeviceClass::Satellite),
            fe_type::QAM => Some(DeviceClass::Cable),
            fe_type::OFDM => Some(DeviceClass::Terrestrial),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceClass::Terrestrial => "terrestrial",
            DeviceClass::Satellite => "satellite",
            DeviceClass::Cable => "cable",
        };
        f.write_str(s)
    }
}

/// Tuner-facing control resource: tuning requests, status and telemetry.
pub trait FrontendPort {
    fn query_info(&mut self) -> io::Result<FrontendInfo>;
    fn set_tuning(&mut self, params: &TuningParameters) -> io::Result<()>;
    /// Raw `fe_status` word; decoding happens in the frontend controller.
    fn read_status(&mut self) -> io::Result<u32>;
    fn read_signal_strength(&mut self) -> io::Result<i16>;
    fn read_snr(&mut self) -> io::Result<i16>;
    fn read_ber(&mut self) -> io::Result<u32>;
    fn read_uncorrected_blocks(&mut self) -> io::Result<u32>;
}

/// Demux-facing resource: filter selection and the readable tap.
pub trait DemuxPort: Read {
    fn set_section_filter(&mut self, pid: u16) -> io::Result<()>;
    fn set_pes_filter(&mut self, pid: u16, pes_code: u32) -> io::Result<()>;
    fn set_buffer_size(&mut self, bytes: usize) -> io::Result<()>;
    fn stop(&mut self) -> io::Result<()>;
}

/// Factory for the two kernel-facing resources. [`CharDevices`] is the real
/// one; tests inject their own.
pub trait DeviceProvider {
    fn open_frontend(&self, path: &Path) -> io::Result<Box<dyn FrontendPort>>;
    fn open_demux(&self, path: &Path) -> io::Result<Box<dyn DemuxPort>>;
}

/// An open adapter. Both ports are either present or the handle is closed;
/// a partially-opened state never escapes the constructors.
pub struct DeviceHandle {
    frontend: Option<Box<dyn FrontendPort>>,
    demux: Option<Box<dyn DemuxPort>>,
    name: String,
    class: DeviceClass,
    last_error: Option<String>,
}

impl DeviceHandle {
    /// Opens the chardev pair addressed by `addr` using the platform backend.
    pub fn open(addr: DeviceAddress) -> Result<Self, DvbError> {
        Self::open_with(&CharDevices, addr)
    }

    /// Opens the pair through an injected provider. If the demux open or the
    /// identity query fails, the resources already acquired are released in
    /// reverse order before the error is returned.
    pub fn open_with(provider: &dyn DeviceProvider, addr: DeviceAddress) -> Result<Self, DvbError> {
        addr.validate()?;
        let fe_path = addr.frontend_path();
        let dmx_path = addr.demux_path();

        let frontend = provider
            .open_frontend(&fe_path)
            .map_err(|source| DvbError::OpenFailed {
                device: fe_path.clone(),
                source,
            })?;
        let demux = provider
            .open_demux(&dmx_path)
            .map_err(|source| DvbError::OpenFailed {
                device: dmx_path,
                source,
            })?;

        let handle = Self::from_ports(frontend, demux)?;
        debug!(
            "opened {} ({}) via {}",
            handle.name,
            handle.class,
            fe_path.display()
        );
        Ok(handle)
    }

    /// Finishes construction from already-open ports: queries identity,
    /// verifies the auto-detection capabilities and decodes the device class.
    /// On failure both ports are dropped, demux first.
    pub fn from_ports(
        mut frontend: Box<dyn FrontendPort>,
        demux: Box<dyn DemuxPort>,
    ) -> Result<Self, DvbError> {
        let info = frontend
            .query_info()
            .map_err(|e| DvbError::QueryFailed(e.to_string()))?;
        check_caps(info.caps)?;
        let class = DeviceClass::from_hw_code(info.kind).ok_or_else(|| {
            DvbError::QueryFailed(format!("unrecognized frontend type code {}", info.kind))
        })?;

        Ok(DeviceHandle {
            frontend: Some(frontend),
            demux: Some(demux),
            name: info.name,
            class,
            last_error: None,
        })
    }

    /// Hardware name reported by the frontend.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// Human-readable reason of the most recent failing operation on this
    /// handle, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.frontend.is_some() && self.demux.is_some()
    }

    /// Releases whichever ports are still held, demux before frontend.
    /// Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(demux) = self.demux.take() {
            drop(demux);
        }
        if let Some(frontend) = self.frontend.take() {
            drop(frontend);
        }
    }

    /// Reads from the filtered tap. Returns the number of bytes placed in
    /// `buf`; zero means end of stream.
    pub fn read_stream(&mut self, buf: &mut [u8]) -> Result<usize, DvbError> {
        let res = self.demux_mut()?.read(buf).map_err(DvbError::ReadFailed);
        self.note(res)
    }

    pub(crate) fn frontend_mut(&mut self) -> Result<&mut (dyn FrontendPort + 'static), DvbError> {
        self.frontend.as_deref_mut().ok_or(DvbError::Closed)
    }

    pub(crate) fn demux_mut(&mut self) -> Result<&mut (dyn DemuxPort + 'static), DvbError> {
        self.demux.as_deref_mut().ok_or(DvbError::Closed)
    }

    /// Records the failure reason in the handle's error slot on the way out.
    pub(crate) fn note<T>(&mut self, res: Result<T, DvbError>) -> Result<T, DvbError> {
        if let Err(e) = &res {
            self.last_error = Some(e.to_string());
        }
        res
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("open", &self.is_open())
            .finish()
    }
}

fn check_caps(caps: u32) -> Result<(), DvbError> {
    let required = [
        (fe_caps::CAN_INVERSION_AUTO, "INVERSION_AUTO"),
        (fe_caps::CAN_FEC_AUTO, "FEC_AUTO"),
        (fe_caps::CAN_QAM_AUTO, "QAM_AUTO"),
        (fe_caps::CAN_TRANSMISSION_MODE_AUTO, "TRANSMISSION_MODE_AUTO"),
        (fe_caps::CAN_BANDWIDTH_AUTO, "BANDWIDTH_AUTO"),
        (fe_caps::CAN_GUARD_INTERVAL_AUTO, "GUARD_INTERVAL_AUTO"),
    ];
    for (bit, cap) in required {
        if caps & bit == 0 {
            return Err(DvbError::QueryFailed(format!(
                "device cannot auto-detect {cap}"
            )));
        }
    }
    Ok(())
}
