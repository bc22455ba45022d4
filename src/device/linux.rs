//! Linux chardev backend: the real frontend/demux nodes under `/dev/dvb`.
//!
//! Talks the V3 DVB API (ioctl group `'o'`) directly, the same surface the
//! kernel has kept stable since 2.6. All structs below mirror the kernel ABI
//! layout exactly.

use std::fs::{File, OpenOptions};
use std::io;
use std::io::Read;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use super::{DemuxPort, DeviceProvider, FrontendInfo, FrontendPort};
use crate::frontend::TuningParameters;

#[repr(C)]
#[allow(dead_code)]
struct DvbFrontendInfo {
    name: [u8; 128],
    kind: u32,
    frequency_min: u32,
    frequency_max: u32,
    frequency_stepsize: u32,
    frequency_tolerance: u32,
    symbol_rate_min: u32,
    symbol_rate_max: u32,
    symbol_rate_tolerance: u32,
    notifier_delay: u32,
    caps: u32,
}

/// The kernel struct ends in a parameter union; OFDM is its largest member,
/// so carrying the OFDM fields inline reproduces the exact C layout.
#[repr(C)]
#[allow(dead_code)]
struct DvbFrontendParameters {
    frequency: u32,
    inversion: u32,
    bandwidth: u32,
    code_rate_hp: u32,
    code_rate_lp: u32,
    constellation: u32,
    transmission_mode: u32,
    guard_interval: u32,
    hierarchy: u32,
}

const DMX_FILTER_SIZE: usize = 16;

#[repr(C)]
#[allow(dead_code)]
struct DmxSctFilterParams {
    pid: u16,
    filter: [u8; DMX_FILTER_SIZE],
    mask: [u8; DMX_FILTER_SIZE],
    mode: [u8; DMX_FILTER_SIZE],
    timeout: u32,
    flags: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct DmxPesFilterParams {
    pid: u16,
    input: u32,
    output: u32,
    pes_type: u32,
    flags: u32,
}

const DMX_IN_FRONTEND: u32 = 0;
const DMX_OUT_TAP: u32 = 1;
const DMX_IMMEDIATE_START: u32 = 4;

nix::ioctl_read!(fe_get_info, b'o', 61, DvbFrontendInfo);
nix::ioctl_read!(fe_read_status, b'o', 69, u32);
nix::ioctl_read!(fe_read_ber, b'o', 70, u32);
nix::ioctl_read!(fe_read_signal_strength, b'o', 71, u16);
nix::ioctl_read!(fe_read_snr, b'o', 72, u16);
nix::ioctl_read!(fe_read_uncorrected_blocks, b'o', 73, u32);
nix::ioctl_write_ptr!(fe_set_frontend, b'o', 76, DvbFrontendParameters);
nix::ioctl_none!(dmx_stop, b'o', 42);
nix::ioctl_write_ptr!(dmx_set_filter, b'o', 43, DmxSctFilterParams);
nix::ioctl_write_ptr!(dmx_set_pes_filter, b'o', 44, DmxPesFilterParams);
nix::ioctl_write_int_bad!(dmx_set_buffer_size, nix::request_code_none!(b'o', 45));

/// Opens the real chardev nodes read/write.
pub struct CharDevices;

impl DeviceProvider for CharDevices {
    fn open_frontend(&self, path: &Path) -> io::Result<Box<dyn FrontendPort>> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Box::new(CharFrontend { file }))
    }

    fn open_demux(&self, path: &Path) -> io::Result<Box<dyn DemuxPort>> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Box::new(CharDemux { file }))
    }
}

struct CharFrontend {
    file: File,
}

impl FrontendPort for CharFrontend {
    fn query_info(&mut self) -> io::Result<FrontendInfo> {
        let mut raw: DvbFrontendInfo = unsafe { mem::zeroed() };
        unsafe { fe_get_info(self.file.as_raw_fd(), &mut raw) }.map_err(io::Error::from)?;
        let len = raw.name.iter().position(|&b| b == 0).unwrap_or(raw.name.len());
        Ok(FrontendInfo {
            name: String::from_utf8_lossy(&raw.name[..len]).into_owned(),
            kind: raw.kind,
            caps: raw.caps,
        })
    }

    fn set_tuning(&mut self, params: &TuningParameters) -> io::Result<()> {
        let raw = DvbFrontendParameters {
            frequency: params.frequency,
            inversion: params.inversion.hw_code(),
            bandwidth: params.bandwidth.hw_code(),
            code_rate_hp: params.code_rate_hp.hw_code(),
            code_rate_lp: params.code_rate_lp.hw_code(),
            constellation: params.constellation.hw_code(),
            transmission_mode: params.transmission_mode.hw_code(),
            guard_interval: params.guard_interval.hw_code(),
            hierarchy: params.hierarchy.hw_code(),
        };
        unsafe { fe_set_frontend(self.file.as_raw_fd(), &raw) }.map_err(io::Error::from)?;
        Ok(())
    }

    fn read_status(&mut self) -> io::Result<u32> {
        let mut status: u32 = 0;
        unsafe { fe_read_status(self.file.as_raw_fd(), &mut status) }.map_err(io::Error::from)?;
        Ok(status)
    }

    fn read_signal_strength(&mut self) -> io::Result<i16> {
        let mut value: u16 = 0;
        unsafe { fe_read_signal_strength(self.file.as_raw_fd(), &mut value) }
            .map_err(io::Error::from)?;
        Ok(value as i16)
    }

    fn read_snr(&mut self) -> io::Result<i16> {
        let mut value: u16 = 0;
        unsafe { fe_read_snr(self.file.as_raw_fd(), &mut value) }.map_err(io::Error::from)?;
        Ok(value as i16)
    }

    fn read_ber(&mut self) -> io::Result<u32> {
        let mut value: u32 = 0;
        unsafe { fe_read_ber(self.file.as_raw_fd(), &mut value) }.map_err(io::Error::from)?;
        Ok(value)
    }

    fn read_uncorrected_blocks(&mut self) -> io::Result<u32> {
        let mut value: u32 = 0;
        unsafe { fe_read_uncorrected_blocks(self.file.as_raw_fd(), &mut value) }
            .map_err(io::Error::from)?;
        Ok(value)
    }
}

struct CharDemux {
    file: File,
}

impl Read for CharDemux {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl DemuxPort for CharDemux {
    fn set_section_filter(&mut self, pid: u16) -> io::Result<()> {
        let mut raw: DmxSctFilterParams = unsafe { mem::zeroed() };
        raw.pid = pid;
        raw.flags = DMX_IMMEDIATE_START;
        unsafe { dmx_set_filter(self.file.as_raw_fd(), &raw) }.map_err(io::Error::from)?;
        Ok(())
    }

    fn set_pes_filter(&mut self, pid: u16, pes_code: u32) -> io::Result<()> {
        let raw = DmxPesFilterParams {
            pid,
            input: DMX_IN_FRONTEND,
            output: DMX_OUT_TAP,
            pes_type: pes_code,
            flags: DMX_IMMEDIATE_START,
        };
        unsafe { dmx_set_pes_filter(self.file.as_raw_fd(), &raw) }.map_err(io::Error::from)?;
        Ok(())
    }

    fn set_buffer_size(&mut self, bytes: usize) -> io::Result<()> {
        unsafe { dmx_set_buffer_size(self.file.as_raw_fd(), bytes as i32) }
            .map_err(io::Error::from)?;
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        unsafe { dmx_stop(self.file.as_raw_fd()) }.map_err(io::Error::from)?;
        Ok(())
    }
}
