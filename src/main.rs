//! captool binary: argument handling and capture session orchestration.

use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use log::{error, info, warn};

use dvblib::{
    CancelToken, CaptureSession, DeviceAddress, DeviceHandle, DvbError, StreamKind,
    StreamSelector, MAX_CHUNK_SIZE,
};

mod context;

use context::{Cli, Commands, FilterKind};

type CliError = Box<dyn Error>;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            warn!("could not install Ctrl-C handler: {e}");
        }
    }

    let result = match cli.command {
        Commands::Capture {
            amount,
            frequency,
            pid,
            filter,
            stream_type,
            adapter,
            frontend,
            demux,
            poll_interval,
            lock_timeout,
            output,
        } => run_capture(
            amount,
            frequency,
            pid,
            filter,
            stream_type,
            DeviceAddress::new(adapter, frontend, demux),
            Duration::from_millis(poll_interval),
            Duration::from_secs(lock_timeout),
            output,
            &cancel,
        ),
        Commands::Checksignal {
            frequency,
            adapter,
            frontend,
            demux,
            interval,
        } => run_checksignal(
            frequency,
            DeviceAddress::new(adapter, frontend, demux),
            Duration::from_millis(interval),
            &cancel,
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_capture(
    amount: u64,
    frequency: u32,
    pid: u16,
    filter: FilterKind,
    stream_type: Option<StreamKind>,
    addr: DeviceAddress,
    poll_interval: Duration,
    lock_timeout: Duration,
    output: PathBuf,
    cancel: &CancelToken,
) -> Result<(), CliError> {
    let selector = match filter {
        FilterKind::Section => StreamSelector::Section { pid },
        // clap enforces the stream type for PES; the fallback keeps the
        // mapping total anyway.
        FilterKind::Pes => StreamSelector::Pes {
            pid,
            kind: stream_type.unwrap_or(StreamKind::Other),
        },
    };

    let mut sink = BufWriter::new(File::create(&output)?);

    let mut dev = DeviceHandle::open(addr)?;
    info!("device: {} ({})", dev.name(), dev.class());

    dev.set_stream_buffer_size(2 * MAX_CHUNK_SIZE)?;

    info!("tuning to {frequency} Hz");
    dev.tune(frequency)?;
    wait_for_lock(&mut dev, poll_interval, lock_timeout, cancel)?;

    let bar = ProgressBar::new(amount);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} {msg}").unwrap(),
    );

    let session = CaptureSession::new(&mut dev, selector, amount)?;
    let outcome = session.run(
        &mut sink,
        |report| {
            bar.set_position(report.captured);
            bar.set_message(format!(
                "SNR {} SS {} BER {} UNC {} [{}]",
                report.telemetry.snr,
                report.telemetry.signal_strength,
                report.telemetry.ber,
                report.telemetry.uncorrected_blocks,
                report.status
            ));
        },
        cancel,
    );
    bar.finish_and_clear();

    let captured = outcome?;
    sink.flush()?;
    info!(
        "captured {} to {}",
        HumanBytes(captured),
        output.display()
    );
    Ok(())
}

/// Applies the hard deadline the library's lock polling deliberately leaves
/// to the caller.
fn wait_for_lock(
    dev: &mut DeviceHandle,
    interval: Duration,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(), CliError> {
    info!("waiting for lock ...");
    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(120));

    let deadline = Instant::now() + timeout;
    let mut poll = dev.poll_lock(interval);
    while let Some(sample) = poll.next() {
        let status = sample?;
        spinner.set_message(format!("status: {status}"));
        if status.has_lock() {
            spinner.finish_and_clear();
            info!("lock acquired: {status}");
            return Ok(());
        }
        if cancel.is_cancelled() {
            spinner.finish_and_clear();
            return Err(Box::new(DvbError::Cancelled));
        }
        if Instant::now() >= deadline {
            spinner.finish_and_clear();
            return Err(format!("no lock within {} seconds", timeout.as_secs()).into());
        }
    }
    spinner.finish_and_clear();
    Err("status polling ended without a lock".into())
}

fn run_checksignal(
    frequency: u32,
    addr: DeviceAddress,
    interval: Duration,
    cancel: &CancelToken,
) -> Result<(), CliError> {
    let mut dev = DeviceHandle::open(addr)?;
    info!("device: {} ({})", dev.name(), dev.class());

    info!("tuning to {frequency} Hz");
    dev.tune(frequency)?;

    while !cancel.is_cancelled() {
        let status = dev.read_status()?;
        let telemetry = dev.read_telemetry()?;
        let flags = if status.has_lock() {
            status.to_string().green()
        } else {
            status.to_string().yellow()
        };
        println!(
            "SS {:>6}  SNR {:>6}  BER {:>8}  UNC {:>8}  [{}]",
            telemetry.signal_strength,
            telemetry.snr,
            telemetry.ber,
            telemetry.uncorrected_blocks,
            flags
        );
        thread::sleep(interval);
    }
    Ok(())
}
