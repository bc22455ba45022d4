//! Frontend control: tuning requests, lock status decoding and telemetry.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::thread;
use std::time::Duration;

use log::trace;

use crate::device::DeviceHandle;
use crate::error::DvbError;

/// Raw `fe_status` condition bits reported by the hardware.
mod hw {
    pub const HAS_SIGNAL: u32 = 0x01;
    pub const HAS_CARRIER: u32 = 0x02;
    pub const HAS_VITERBI: u32 = 0x04;
    pub const HAS_SYNC: u32 = 0x08;
    pub const HAS_LOCK: u32 = 0x10;
    pub const TIMEDOUT: u32 = 0x20;
    pub const REINIT: u32 = 0x40;
}

/// Receiver condition flags. The flags are independent and additive; any
/// subset may be set at once and only [`LockStatus::HAS_LOCK`] gates capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockStatus {
    bits: u8,
}

impl LockStatus {
    pub const HAS_SIGNAL: LockStatus = LockStatus { bits: 1 << 0 };
    pub const HAS_CARRIER: LockStatus = LockStatus { bits: 1 << 1 };
    pub const HAS_VITERBI: LockStatus = LockStatus { bits: 1 << 2 };
    pub const HAS_SYNC: LockStatus = LockStatus { bits: 1 << 3 };
    pub const HAS_LOCK: LockStatus = LockStatus { bits: 1 << 4 };
    pub const TIMED_OUT: LockStatus = LockStatus { bits: 1 << 5 };
    pub const NEEDS_REINIT: LockStatus = LockStatus { bits: 1 << 6 };

    pub const fn empty() -> Self {
        LockStatus { bits: 0 }
    }

    /// Decodes the raw hardware status word. Every condition is tested on
    /// its own bit so no flag can mask or imply a neighbour.
    pub fn from_raw(raw: u32) -> Self {
        let mut status = LockStatus::empty();
        if raw & hw::HAS_SIGNAL != 0 {
            status |= Self::HAS_SIGNAL;
        }
        if raw & hw::HAS_CARRIER != 0 {
            status |= Self::HAS_CARRIER;
        }
        if raw & hw::HAS_VITERBI != 0 {
            status |= Self::HAS_VITERBI;
        }
        if raw & hw::HAS_SYNC != 0 {
            status |= Self::HAS_SYNC;
        }
        if raw & hw::HAS_LOCK != 0 {
            status |= Self::HAS_LOCK;
        }
        if raw & hw::TIMEDOUT != 0 {
            status |= Self::TIMED_OUT;
        }
        if raw & hw::REINIT != 0 {
            status |= Self::NEEDS_REINIT;
        }
        status
    }

    pub fn contains(self, other: LockStatus) -> bool {
        self.bits & other.bits == other.bits
    }

    pub fn has_lock(self) -> bool {
        self.contains(Self::HAS_LOCK)
    }

    pub fn is_empty(self) -> bool {
        self.bits == 0
    }
}

impl BitOr for LockStatus {
    type Output = LockStatus;

    fn bitor(self, rhs: LockStatus) -> LockStatus {
        LockStatus {
            bits: self.bits | rhs.bits,
        }
    }
}

impl BitOrAssign for LockStatus {
    fn bitor_assign(&mut self, rhs: LockStatus) {
        self.bits |= rhs.bits;
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let names = [
            (Self::HAS_SIGNAL, "SIGNAL"),
            (Self::HAS_CARRIER, "CARRIER"),
            (Self::HAS_VITERBI, "VITERBI"),
            (Self::HAS_SYNC, "SYNC"),
            (Self::HAS_LOCK, "LOCK"),
            (Self::TIMED_OUT, "TIMEDOUT"),
            (Self::NEEDS_REINIT, "REINIT"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Spectral inversion handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inversion {
    Off,
    On,
    Auto,
}

/// Channel bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    Mhz8,
    Mhz7,
    Mhz6,
    Auto,
}

/// Forward error correction rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRate {
    None,
    Auto,
}

/// Constellation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constellation {
    Qam16,
    Qam64,
    Auto,
}

/// OFDM transmission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionMode {
    Mode2k,
    Mode8k,
    Auto,
}

/// Guard interval fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardInterval {
    OneThirtySecond,
    OneSixteenth,
    OneEighth,
    OneQuarter,
    Auto,
}

/// Hierarchical transmission setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hierarchy {
    None,
    Auto,
}

/// A DVB-T tuning request: the target frequency plus the modulation and
/// robustness knobs. [`TuningParameters::terrestrial`] pins everything except
/// the frequency to auto-detection; satellite and cable delivery need their
/// own parameter sets and are an extension point, not covered here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningParameters {
    /// Target frequency in Hz.
    pub frequency: u32,
    pub inversion: Inversion,
    pub bandwidth: Bandwidth,
    pub code_rate_hp: CodeRate,
    pub code_rate_lp: CodeRate,
    pub constellation: Constellation,
    pub transmission_mode: TransmissionMode,
    pub guard_interval: GuardInterval,
    pub hierarchy: Hierarchy,
}

impl TuningParameters {
    /// Terrestrial reception with every robustness parameter left to the
    /// receiver's detection. 8 MHz channels, as deployed across Europe.
    pub fn terrestrial(frequency: u32) -> Self {
        TuningParameters {
            frequency,
            inversion: Inversion::Auto,
            bandwidth: Bandwidth::Mhz8,
            code_rate_hp: CodeRate::Auto,
            code_rate_lp: CodeRate::Auto,
            constellation: Constellation::Auto,
            transmission_mode: TransmissionMode::Auto,
            guard_interval: GuardInterval::Auto,
            hierarchy: Hierarchy::None,
        }
    }
}

// Raw codes from the V3 frontend ABI, consumed by the chardev backend.

impl Inversion {
    pub(crate) fn hw_code(self) -> u32 {
        match self {
            Inversion::Off => 0,
            Inversion::On => 1,
            Inversion::Auto => 2,
        }
    }
}

impl Bandwidth {
    pub(crate) fn hw_code(self) -> u32 {
        match self {
            Bandwidth::Mhz8 => 0,
            Bandwidth::Mhz7 => 1,
            Bandwidth::Mhz6 => 2,
            Bandwidth::Auto => 3,
        }
    }
}

impl CodeRate {
    pub(crate) fn hw_code(self) -> u32 {
        match self {
            CodeRate::None => 0,
            CodeRate::Auto => 9,
        }
    }
}

impl Constellation {
    pub(crate) fn hw_code(self) -> u32 {
        match self {
            Constellation::Qam16 => 1,
            Constellation::Qam64 => 3,
            Constellation::Auto => 6,
        }
    }
}

impl TransmissionMode {
    pub(crate) fn hw_code(self) -> u32 {
        match self {
            TransmissionMode::Mode2k => 0,
            TransmissionMode::Mode8k => 1,
            TransmissionMode::Auto => 2,
        }
    }
}

impl GuardInterval {
    pub(crate) fn hw_code(self) -> u32 {
        match self {
            GuardInterval::OneThirtySecond => 0,
            GuardInterval::OneSixteenth => 1,
            GuardInterval::OneEighth => 2,
            GuardInterval::OneQuarter => 3,
            GuardInterval::Auto => 4,
        }
    }
}

impl Hierarchy {
    pub(crate) fn hw_code(self) -> u32 {
        match self {
            Hierarchy::None => 0,
            Hierarchy::Auto => 4,
        }
    }
}

/// Point-in-time receiver quality readings. Sampled, never accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Telemetry {
    pub signal_strength: i16,
    pub snr: i16,
    pub ber: u32,
    pub uncorrected_blocks: u32,
}

impl DeviceHandle {
    /// Tunes to `frequency` Hz with the terrestrial auto-detection defaults.
    /// A rejected request is reported, not retried; some receivers need a
    /// cool-down before a retry makes sense, so that is caller policy.
    pub fn tune(&mut self, frequency: u32) -> Result<(), DvbError> {
        self.tune_with(&TuningParameters::terrestrial(frequency))
    }

    pub fn tune_with(&mut self, params: &TuningParameters) -> Result<(), DvbError> {
        trace!("tuning request: {params:?}");
        let res = self
            .frontend_mut()?
            .set_tuning(params)
            .map_err(DvbError::TuneFailed);
        self.note(res)
    }

    /// Samples and decodes the current receiver condition flags.
    pub fn read_status(&mut self) -> Result<LockStatus, DvbError> {
        let res = self
            .frontend_mut()?
            .read_status()
            .map(LockStatus::from_raw)
            .map_err(DvbError::StatusReadFailed);
        self.note(res)
    }

    /// Samples signal strength, S/N, bit error rate and uncorrected blocks.
    pub fn read_telemetry(&mut self) -> Result<Telemetry, DvbError> {
        fn sample(fe: &mut dyn crate::device::FrontendPort) -> std::io::Result<Telemetry> {
            Ok(Telemetry {
                signal_strength: fe.read_signal_strength()?,
                snr: fe.read_snr()?,
                ber: fe.read_ber()?,
                uncorrected_blocks: fe.read_uncorrected_blocks()?,
            })
        }
        let res = sample(self.frontend_mut()?).map_err(DvbError::StatusReadFailed);
        self.note(res)
    }

    /// Lazily polls the receiver status once per `interval`. The sequence
    /// ends after the first sample carrying [`LockStatus::HAS_LOCK`] (or a
    /// status read error); it imposes no timeout of its own, so callers cap
    /// it with their own deadline or attempt budget.
    pub fn poll_lock(&mut self, interval: Duration) -> LockPoll<'_> {
        LockPoll {
            dev: self,
            interval,
            first: true,
            done: false,
        }
    }
}

/// Iterator produced by [`DeviceHandle::poll_lock`]. Sleeps between polls,
/// never before the first one, and performs no work besides status reads.
pub struct LockPoll<'a> {
    dev: &'a mut DeviceHandle,
    interval: Duration,
    first: bool,
    done: bool,
}

impl Iterator for LockPoll<'_> {
    type Item = Result<LockStatus, DvbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.first {
            self.first = false;
        } else {
            thread::sleep(self.interval);
        }
        match self.dev.read_status() {
            Ok(status) => {
                if status.has_lock() {
                    self.done = true;
                }
                Some(Ok(status))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
