//! Run an acquisition method against a simulated instrument.
//!
//! The thread layout mirrors a live deployment: a submission worker pulls
//! requests from the planner and hands them to the instrument, while the
//! main thread plays the part of the result callback, feeding completed
//! scans back and releasing the ready gate.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::{unbounded, RecvTimeoutError};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mzacquire::config::{AcquisitionConfig, ConfigError};
use mzacquire::driver::{DriverError, PlannerHandle, ReadyGate, SubmissionWorker};
use mzacquire::planner::build_planner;

mod instrument;

use crate::instrument::{SimulatedInstrument, SCAN_TIME};

#[derive(Debug, Error)]
enum SimError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] figment::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("The submission worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Parser)]
#[command(name = "mzacquire-sim", about = "Simulate an adaptive acquisition run")]
struct SimArgs {
    /// TOML acquisition configuration; defaults apply when omitted.
    /// Any field can also be set as MZACQUIRE_<SECTION>__<FIELD>.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated run length in seconds
    #[arg(short, long, default_value_t = 30.0)]
    duration: f64,

    /// Seed for the synthesized spectra
    #[arg(short, long, default_value_t = 42)]
    seed: u64,
}

impl SimArgs {
    fn load_config(&self) -> Result<AcquisitionConfig, figment::Error> {
        let mut figment = Figment::new();
        if let Some(path) = &self.config {
            figment = figment.merge(Toml::file_exact(path));
        }
        figment.merge(Env::prefixed("MZACQUIRE_").split("__")).extract()
    }
}

fn configure_log() {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_timer(fmt::time::ChronoLocal::rfc_3339())
                .with_writer(io::stderr)
                .with_filter(
                EnvFilter::builder()
                    .with_default_directive(tracing::Level::INFO.into())
                    .from_env_lossy(),
            ),
        )
        .init();
}

fn main() -> Result<(), SimError> {
    configure_log();
    let args = SimArgs::parse();
    let config = args.load_config()?;
    let ready_timeout = config.ready_timeout_seconds.map(Duration::from_secs_f64);

    let planner = PlannerHandle::new(build_planner(&config)?);
    planner.initialize();

    let gate = ReadyGate::new();
    let stop = Arc::new(AtomicBool::new(false));
    let (results_tx, results_rx) = unbounded();
    let instrument = SimulatedInstrument::new(args.seed, results_tx);

    let mut worker = SubmissionWorker::new(
        planner.clone(),
        gate.clone(),
        instrument,
        stop.clone(),
        ready_timeout,
    );
    let worker_thread = thread::spawn(move || worker.run());

    let deadline = Instant::now() + Duration::from_secs_f64(args.duration);
    let mut scans_received = 0u64;
    while Instant::now() < deadline {
        match results_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(result) => {
                // The instrument answers instantly; pace the run here.
                thread::sleep(SCAN_TIME);
                planner.receive_scan(result);
                scans_received += 1;
                gate.notify();
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    stop.store(true, Ordering::Relaxed);
    // Release the worker if it is parked on the gate.
    gate.notify();
    worker_thread
        .join()
        .map_err(|_| SimError::WorkerPanicked)??;

    planner.cleanup();
    info!(scans_received, "simulation finished");
    Ok(())
}
