use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;

use dvblib::StreamKind;

#[derive(Debug, Parser)]
#[clap(name = "captool")]
#[clap(about = "Tune a DVB-T adapter and dump a filtered stream to a file.", long_about = None)]
#[clap(version)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Which demux filter to install on the capture tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum FilterKind {
    /// Raw data-table sections.
    Section,
    /// An elementary stream's packetized payload.
    Pes,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Capture a fixed amount of stream data.{n}
    /// Tunes the frontend, waits for signal lock, installs the requested
    /// filter and reads until the byte quota is met. The captured bytes are
    /// written to the output file as a raw dump, no framing or metadata.
    Capture {
        /// Number of bytes to capture. Must be positive.
        #[clap(short, long, required = true)]
        amount: u64,

        /// Target frequency in Hz.
        #[clap(short, long, required = true)]
        frequency: u32,

        /// Stream identifier to extract (decimal or 0x-prefixed hex).
        #[clap(short, long, value_parser = maybe_hex::<u16>, required = true)]
        pid: u16,

        /// Demux filter flavour.
        #[clap(value_enum, long, default_value = "section")]
        filter: FilterKind,

        /// Elementary stream classification. Required with a PES filter.
        #[clap(value_enum, long = "stream-type", required_if_eq("filter", "pes"))]
        stream_type: Option<StreamKind>,

        /// DVB adapter index under /dev/dvb.
        #[clap(long, default_value = "0")]
        adapter: u32,

        /// Frontend node index within the adapter directory.
        #[clap(long, default_value = "0")]
        frontend: u32,

        /// Demux node index within the adapter directory.
        #[clap(long, default_value = "0")]
        demux: u32,

        /// Lock poll interval in milliseconds.
        #[clap(long, default_value = "100")]
        poll_interval: u64,

        /// Give up if no lock is acquired within this many seconds.
        #[clap(long, default_value = "30")]
        lock_timeout: u64,

        /// Output file for the raw stream bytes.
        #[clap(required = true)]
        output: PathBuf,
    },

    /// Signal test.{n}
    /// Tunes the frontend and prints the lock flags and telemetry (signal
    /// strength, S/N, bit error rate, uncorrected blocks) once per interval
    /// until interrupted.
    Checksignal {
        /// Target frequency in Hz.
        #[clap(short, long, required = true)]
        frequency: u32,

        /// DVB adapter index under /dev/dvb.
        #[clap(long, default_value = "0")]
        adapter: u32,

        /// Frontend node index within the adapter directory.
        #[clap(long, default_value = "0")]
        frontend: u32,

        /// Demux node index within the adapter directory.
        #[clap(long, default_value = "0")]
        demux: u32,

        /// Sample interval in milliseconds.
        #[clap(long, default_value = "1000")]
        interval: u64,
    },
}
