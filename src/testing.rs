//! Scripted port implementations used by the unit tests in place of real
//! chardev nodes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;

use crate::device::{DemuxPort, DeviceProvider, FrontendInfo, FrontendPort};
use crate::frontend::{Telemetry, TuningParameters};

/// The capability bits [`crate::device`] insists on.
pub fn all_caps() -> u32 {
    0x1 | 0x200 | 0x1_0000 | 0x2_0000 | 0x4_0000 | 0x8_0000
}

/// Lifecycle events recorded by [`MockProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    FrontendOpened,
    FrontendClosed,
    DemuxOpened,
    DemuxClosed,
    DemuxOpenFailed,
}

/// Operations recorded by [`MockDemux`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxOp {
    SectionFilter { pid: u16 },
    PesFilter { pid: u16, code: u32 },
    BufferSize { bytes: usize },
    Stop,
    Read { requested: usize, returned: usize },
}

pub struct MockFrontend {
    info: FrontendInfo,
    fail_query: bool,
    statuses: VecDeque<u32>,
    telemetry: Telemetry,
    events: Option<Rc<RefCell<Vec<PortEvent>>>>,
}

impl MockFrontend {
    pub fn new() -> Self {
        MockFrontend {
            info: FrontendInfo {
                name: "Mock DVB-T Frontend".to_string(),
                kind: 2,
                caps: all_caps(),
            },
            fail_query: false,
            statuses: VecDeque::new(),
            telemetry: Telemetry::default(),
            events: None,
        }
    }

    pub fn with_kind(mut self, kind: u32) -> Self {
        self.info.kind = kind;
        self
    }

    pub fn with_caps(mut self, caps: u32) -> Self {
        self.info.caps = caps;
        self
    }

    /// Raw status words served in order; the final one repeats forever.
    pub fn with_statuses(mut self, statuses: &[u32]) -> Self {
        self.statuses = statuses.iter().copied().collect();
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    fn with_fail_query(mut self, fail: bool) -> Self {
        self.fail_query = fail;
        self
    }

    fn with_events(mut self, events: Rc<RefCell<Vec<PortEvent>>>) -> Self {
        self.events = Some(events);
        self
    }
}

impl FrontendPort for MockFrontend {
    fn query_info(&mut self) -> io::Result<FrontendInfo> {
        if self.fail_query {
            return Err(io::Error::new(io::ErrorKind::Other, "query refused"));
        }
        Ok(self.info.clone())
    }

    fn set_tuning(&mut self, _params: &TuningParameters) -> io::Result<()> {
        Ok(())
    }

    fn read_status(&mut self) -> io::Result<u32> {
        Ok(if self.statuses.len() > 1 {
            self.statuses.pop_front().unwrap()
        } else {
            self.statuses.front().copied().unwrap_or(0)
        })
    }

    fn read_signal_strength(&mut self) -> io::Result<i16> {
        Ok(self.telemetry.signal_strength)
    }

    fn read_snr(&mut self) -> io::Result<i16> {
        Ok(self.telemetry.snr)
    }

    fn read_ber(&mut self) -> io::Result<u32> {
        Ok(self.telemetry.ber)
    }

    fn read_uncorrected_blocks(&mut self) -> io::Result<u32> {
        Ok(self.telemetry.uncorrected_blocks)
    }
}

impl Drop for MockFrontend {
    fn drop(&mut self) {
        if let Some(events) = &self.events {
            events.borrow_mut().push(PortEvent::FrontendClosed);
        }
    }
}

pub struct MockDemux {
    ops: Rc<RefCell<Vec<DemuxOp>>>,
    available: u64,
    served: u64,
    reads: usize,
    pattern: bool,
    fail_filters: bool,
    fail_stop: bool,
    fail_first_read: bool,
    fail_read_at: Option<usize>,
    events: Option<Rc<RefCell<Vec<PortEvent>>>>,
}

impl MockDemux {
    pub fn new() -> Self {
        MockDemux {
            ops: Rc::new(RefCell::new(Vec::new())),
            available: u64::MAX,
            served: 0,
            reads: 0,
            pattern: false,
            fail_filters: false,
            fail_stop: false,
            fail_first_read: false,
            fail_read_at: None,
            events: None,
        }
    }

    /// Shared log of demux operations, usable after the mock is boxed away.
    pub fn ops(&self) -> Rc<RefCell<Vec<DemuxOp>>> {
        self.ops.clone()
    }

    /// Caps the bytes served after the discard read; later reads return 0.
    pub fn with_available(mut self, bytes: u64) -> Self {
        self.available = bytes;
        self
    }

    /// Serves a deterministic byte pattern instead of zeroes.
    pub fn with_pattern(mut self) -> Self {
        self.pattern = true;
        self
    }

    pub fn fail_filters(mut self) -> Self {
        self.fail_filters = true;
        self
    }

    pub fn fail_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn fail_first_read(mut self) -> Self {
        self.fail_first_read = true;
        self
    }

    /// Fails the nth read (0 is the discard read).
    pub fn fail_read_at(mut self, index: usize) -> Self {
        self.fail_read_at = Some(index);
        self
    }

    fn with_events(mut self, events: Rc<RefCell<Vec<PortEvent>>>) -> Self {
        self.events = Some(events);
        self
    }
}

impl Read for MockDemux {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let index = self.reads;
        self.reads += 1;
        if self.fail_read_at == Some(index) {
            return Err(io::Error::new(io::ErrorKind::Other, "read refused"));
        }
        if self.fail_first_read && index == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "stale drain refused"));
        }
        if index == 0 {
            // Nothing stale buffered; the discard read comes up empty.
            self.ops.borrow_mut().push(DemuxOp::Read {
                requested: buf.len(),
                returned: 0,
            });
            return Ok(0);
        }

        let n = (buf.len() as u64).min(self.available) as usize;
        if self.pattern {
            for (i, byte) in buf[..n].iter_mut().enumerate() {
                *byte = ((self.served + i as u64) % 251) as u8;
            }
        }
        self.available -= n as u64;
        self.served += n as u64;
        self.ops.borrow_mut().push(DemuxOp::Read {
            requested: buf.len(),
            returned: n,
        });
        Ok(n)
    }
}

impl DemuxPort for MockDemux {
    fn set_section_filter(&mut self, pid: u16) -> io::Result<()> {
        if self.fail_filters {
            return Err(io::Error::new(io::ErrorKind::Other, "filter refused"));
        }
        self.ops.borrow_mut().push(DemuxOp::SectionFilter { pid });
        Ok(())
    }

    fn set_pes_filter(&mut self, pid: u16, pes_code: u32) -> io::Result<()> {
        if self.fail_filters {
            return Err(io::Error::new(io::ErrorKind::Other, "filter refused"));
        }
        self.ops.borrow_mut().push(DemuxOp::PesFilter {
            pid,
            code: pes_code,
        });
        Ok(())
    }

    fn set_buffer_size(&mut self, bytes: usize) -> io::Result<()> {
        self.ops.borrow_mut().push(DemuxOp::BufferSize { bytes });
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        self.ops.borrow_mut().push(DemuxOp::Stop);
        if self.fail_stop {
            return Err(io::Error::new(io::ErrorKind::Other, "stop refused"));
        }
        Ok(())
    }
}

impl Drop for MockDemux {
    fn drop(&mut self) {
        if let Some(events) = &self.events {
            events.borrow_mut().push(PortEvent::DemuxClosed);
        }
    }
}

/// A [`DeviceProvider`] handing out mocks and logging the lifecycle.
pub struct MockProvider {
    events: Rc<RefCell<Vec<PortEvent>>>,
    fail_demux: bool,
    fail_query: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        MockProvider {
            events: Rc::new(RefCell::new(Vec::new())),
            fail_demux: false,
            fail_query: false,
        }
    }

    pub fn fail_demux(mut self) -> Self {
        self.fail_demux = true;
        self
    }

    pub fn fail_query(mut self) -> Self {
        self.fail_query = true;
        self
    }

    pub fn events(&self) -> Vec<PortEvent> {
        self.events.borrow().clone()
    }
}

impl DeviceProvider for MockProvider {
    fn open_frontend(&self, _path: &Path) -> io::Result<Box<dyn FrontendPort>> {
        self.events.borrow_mut().push(PortEvent::FrontendOpened);
        Ok(Box::new(
            MockFrontend::new()
                .with_statuses(&[0x1F])
                .with_fail_query(self.fail_query)
                .with_events(self.events.clone()),
        ))
    }

    fn open_demux(&self, _path: &Path) -> io::Result<Box<dyn DemuxPort>> {
        if self.fail_demux {
            self.events.borrow_mut().push(PortEvent::DemuxOpenFailed);
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such node"));
        }
        self.events.borrow_mut().push(PortEvent::DemuxOpened);
        Ok(Box::new(MockDemux::new().with_events(self.events.clone())))
    }
}
