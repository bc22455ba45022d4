//! Bounded stream capture with interleaved telemetry sampling.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::device::DeviceHandle;
use crate::error::DvbError;
use crate::filter::StreamSelector;
use crate::frontend::{LockStatus, Telemetry};

/// Upper bound for a single demux read.
pub const MAX_CHUNK_SIZE: usize = 16 * 1024;

/// Cooperative cancellation flag, typically tripped from a Ctrl-C handler.
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Progress record emitted after every captured chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkReport {
    /// Bytes this chunk delivered.
    pub read: usize,
    /// Cumulative bytes captured so far.
    pub captured: u64,
    /// Requested total.
    pub quota: u64,
    pub telemetry: Telemetry,
    pub status: LockStatus,
}

/// One bounded capture run over a borrowed, locked device.
pub struct CaptureSession<'a> {
    dev: &'a mut DeviceHandle,
    selector: StreamSelector,
    quota: u64,
    captured: u64,
}

impl<'a> std::fmt::Debug for CaptureSession<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("selector", &self.selector)
            .field("quota", &self.quota)
            .field("captured", &self.captured)
            .finish_non_exhaustive()
    }
}

impl<'a> CaptureSession<'a> {
    /// A session needs a positive byte quota; open-ended capture is not a
    /// mode this library supports.
    pub fn new(
        dev: &'a mut DeviceHandle,
        selector: StreamSelector,
        quota: u64,
    ) -> Result<Self, DvbError> {
        if quota == 0 {
            return Err(DvbError::InvalidQuota);
        }
        Ok(CaptureSession {
            dev,
            selector,
            quota,
            captured: 0,
        })
    }

    /// Installs the selector's filter and pumps chunks into `sink` until the
    /// quota is met, reporting each chunk to `observe`. Requires a current
    /// signal lock. The filter is stopped on every exit path before the
    /// outcome, success or error, is surfaced.
    pub fn run<W, F>(
        mut self,
        sink: &mut W,
        mut observe: F,
        cancel: &CancelToken,
    ) -> Result<u64, DvbError>
    where
        W: Write + ?Sized,
        F: FnMut(&ChunkReport),
    {
        if !self.dev.read_status()?.has_lock() {
            return Err(DvbError::NotLocked);
        }

        info!("starting capture: {}, quota {} bytes", self.selector, self.quota);
        self.dev.install_filter(self.selector)?;
        let outcome = self.pump(sink, &mut observe, cancel);
        self.dev.stop_filter();
        outcome
    }

    fn pump<W, F>(
        &mut self,
        sink: &mut W,
        observe: &mut F,
        cancel: &CancelToken,
    ) -> Result<u64, DvbError>
    where
        W: Write + ?Sized,
        F: FnMut(&ChunkReport),
    {
        let mut buf = vec![0u8; MAX_CHUNK_SIZE];

        // Drain whatever accumulated in the tap before the filter became
        // meaningful. This read is allowed to fail.
        let _ = self.dev.read_stream(&mut buf);

        while self.captured < self.quota {
            if cancel.is_cancelled() {
                return Err(DvbError::Cancelled);
            }

            // The final chunk is sized exactly so we never read past quota.
            let remaining = self.quota - self.captured;
            let want = remaining.min(MAX_CHUNK_SIZE as u64) as usize;
            let got = self.dev.read_stream(&mut buf[..want])?;
            if got == 0 {
                return Err(DvbError::StreamEnded {
                    captured: self.captured,
                    quota: self.quota,
                });
            }

            sink.write_all(&buf[..got]).map_err(DvbError::WriteFailed)?;
            self.captured += got as u64;

            let telemetry = self.dev.read_telemetry()?;
            let status = self.dev.read_status()?;
            let report = ChunkReport {
                read: got,
                captured: self.captured,
                quota: self.quota,
                telemetry,
                status,
            };
            debug!(
                "read {}, done {}/{}, snr {}, ss {}, ber {}, unc {}, flags {}",
                report.read,
                report.captured,
                report.quota,
                telemetry.snr,
                telemetry.signal_strength,
                telemetry.ber,
                telemetry.uncorrected_blocks,
                status
            );
            observe(&report);
        }

        Ok(self.captured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceHandle;
    use crate::testing::{DemuxOp, MockDemux, MockFrontend};

    const LOCKED: u32 = 0x1F;

    fn locked_handle(demux: MockDemux) -> DeviceHandle {
        let frontend = MockFrontend::new().with_statuses(&[LOCKED]);
        DeviceHandle::from_ports(Box::new(frontend), Box::new(demux)).unwrap()
    }

    fn read_sizes(ops: &[DemuxOp]) -> Vec<(usize, usize)> {
        ops.iter()
            .filter_map(|op| match op {
                DemuxOp::Read { requested, returned } => Some((*requested, *returned)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn quota_is_met_with_bounded_chunks() {
        // 40000 over 16 KiB chunks: 16384, 16384, 7232.
        let demux = MockDemux::new();
        let ops = demux.ops();
        let mut dev = locked_handle(demux);
        let mut sink = Vec::new();
        let mut totals = Vec::new();

        let session =
            CaptureSession::new(&mut dev, StreamSelector::Section { pid: 0x12 }, 40_000).unwrap();
        let captured = session
            .run(&mut sink, |r| totals.push((r.read, r.captured)), &CancelToken::new())
            .unwrap();

        assert_eq!(captured, 40_000);
        assert_eq!(sink.len(), 40_000);
        assert_eq!(totals, vec![(16_384, 16_384), (16_384, 32_768), (7_232, 40_000)]);

        let reads = read_sizes(&ops.borrow());
        // First read is the stale-data discard, then the sized chunks.
        assert_eq!(
            reads,
            vec![
                (MAX_CHUNK_SIZE, 0),
                (16_384, 16_384),
                (16_384, 16_384),
                (7_232, 7_232),
            ]
        );
    }

    #[test]
    fn arbitrary_quotas_terminate_exactly() {
        for quota in [1u64, 100, 16_383, 16_384, 16_385, 100_000] {
            let demux = MockDemux::new();
            let mut dev = locked_handle(demux);
            let mut sink = Vec::new();
            let session =
                CaptureSession::new(&mut dev, StreamSelector::Section { pid: 1 }, quota).unwrap();
            let captured = session.run(&mut sink, |r| {
                assert!(r.read <= MAX_CHUNK_SIZE);
            }, &CancelToken::new());
            assert_eq!(captured.unwrap(), quota);
            assert_eq!(sink.len() as u64, quota);
        }
    }

    #[test]
    fn zero_byte_read_before_quota_is_stream_ended_and_stops_the_filter() {
        let demux = MockDemux::new().with_available(30_000);
        let ops = demux.ops();
        let mut dev = locked_handle(demux);
        let mut sink = Vec::new();

        let session =
            CaptureSession::new(&mut dev, StreamSelector::Section { pid: 0x12 }, 40_000).unwrap();
        let err = session
            .run(&mut sink, |_| {}, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(
            err,
            DvbError::StreamEnded { captured: 30_000, quota: 40_000 }
        ));
        assert_eq!(sink.len(), 30_000);
        // Filter deactivation happens before the error surfaces.
        assert_eq!(ops.borrow().last(), Some(&DemuxOp::Stop));
    }

    #[test]
    fn discard_read_failure_does_not_abort_the_session() {
        let demux = MockDemux::new().fail_first_read();
        let mut dev = locked_handle(demux);
        let mut sink = Vec::new();
        let session =
            CaptureSession::new(&mut dev, StreamSelector::Section { pid: 0x12 }, 1_000).unwrap();
        let captured = session.run(&mut sink, |_| {}, &CancelToken::new()).unwrap();
        assert_eq!(captured, 1_000);
    }

    #[test]
    fn mid_stream_read_failure_surfaces_after_filter_stop() {
        let demux = MockDemux::new().fail_read_at(2);
        let ops = demux.ops();
        let mut dev = locked_handle(demux);
        let mut sink = Vec::new();
        let session =
            CaptureSession::new(&mut dev, StreamSelector::Section { pid: 0x12 }, 40_000).unwrap();
        let err = session
            .run(&mut sink, |_| {}, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, DvbError::ReadFailed(_)));
        assert_eq!(ops.borrow().last(), Some(&DemuxOp::Stop));
    }

    #[test]
    fn zero_quota_is_rejected() {
        let mut dev = locked_handle(MockDemux::new());
        let err = CaptureSession::new(&mut dev, StreamSelector::Section { pid: 1 }, 0).unwrap_err();
        assert!(matches!(err, DvbError::InvalidQuota));
    }

    #[test]
    fn capture_requires_a_lock() {
        let frontend = MockFrontend::new().with_statuses(&[0x03]);
        let mut dev =
            DeviceHandle::from_ports(Box::new(frontend), Box::new(MockDemux::new())).unwrap();
        let mut sink = Vec::new();
        let session =
            CaptureSession::new(&mut dev, StreamSelector::Section { pid: 1 }, 100).unwrap();
        let err = session
            .run(&mut sink, |_| {}, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, DvbError::NotLocked));
    }

    #[test]
    fn cancellation_interrupts_the_loop() {
        let demux = MockDemux::new();
        let ops = demux.ops();
        let mut dev = locked_handle(demux);
        let mut sink = Vec::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let session =
            CaptureSession::new(&mut dev, StreamSelector::Section { pid: 1 }, 40_000).unwrap();
        let err = session.run(&mut sink, |_| {}, &cancel).unwrap_err();
        assert!(matches!(err, DvbError::Cancelled));
        assert_eq!(ops.borrow().last(), Some(&DemuxOp::Stop));
    }

    #[test]
    fn captured_bytes_reach_the_sink_in_order() {
        let demux = MockDemux::new().with_pattern();
        let mut dev = locked_handle(demux);
        let mut sink = Vec::new();
        let session =
            CaptureSession::new(&mut dev, StreamSelector::Section { pid: 1 }, 600).unwrap();
        session.run(&mut sink, |_| {}, &CancelToken::new()).unwrap();
        let expected: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(sink, expected);
    }
}
