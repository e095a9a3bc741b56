//! ward - replays the hospital coordination scenarios on top of `ccp`.
//!
//! Prints the fetched patient data, the collected medical records (in
//! completion order), the bed and admission counters, and the interleaving of
//! "processing" and "barrier" lines produced by the barrier queue.

use anyhow::Result;
use ccp::{
    config::Config, counter::IsolatedCounter, executor::FanOut, queue::BarrierQueue,
    wait_group::WaitGroup,
};
use clap::Parser;
use std::{convert::Infallible, sync::Arc, thread, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

const TOTAL_BEDS: i64 = 10;
const BED_BURST: usize = 5;
const ADMISSIONS: usize = 100;
const RECORDS: usize = 5;
const PATIENTS_PER_SIDE: usize = 5;

/// Replays the hospital coordination scenarios
#[derive(Parser, Debug)]
#[command(name = "ward", version, about, long_about = None)]
struct Args {
    /// Worker threads in the shared pool [default: available parallelism]
    #[arg(short = 'w', long = "workers")]
    workers: Option<usize>,

    /// Base simulated delay in milliseconds
    #[arg(short = 'd', long = "delay-ms", default_value_t = 100)]
    delay_ms: u64,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Config {
        let config = Config::default().with_default_delay(Duration::from_millis(self.delay_ms));
        match self.workers {
            Some(workers) => config.with_worker_pool_size(workers),
            None => config,
        }
    }
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn fetch_patient_data(fan_out: &FanOut) -> Result<()> {
    let delay = fan_out.default_delay() * 2;
    let data = fan_out
        .run_with_delays(1, |_| delay, |_| Ok::<_, Infallible>("Patient data fetched"))
        .into_outputs()?;
    for line in data {
        println!("{line}");
    }
    Ok(())
}

fn fetch_medical_records(fan_out: &FanOut) -> Result<()> {
    let step = fan_out.default_delay();
    let records = fan_out
        .run_with_delays(
            RECORDS,
            |index| step * u32::try_from(index + 1).unwrap_or(u32::MAX),
            |index| Ok::<_, Infallible>(format!("Medical record for patient {}", index + 1)),
        )
        .into_outputs()?;
    println!("{records:?}");
    Ok(())
}

fn allocate_beds() -> Result<()> {
    let beds = IsolatedCounter::new("availableBeds", TOTAL_BEDS)?;
    println!("{}", beds.mutate(-1));
    thread::scope(|scope| {
        for _ in 0..BED_BURST {
            scope.spawn(|| beds.mutate(-1));
        }
    });
    println!("Available beds: {}", beds.read());
    Ok(())
}

fn admit_patients() -> Result<()> {
    let hospital = Arc::new(IsolatedCounter::new("admittedPatients", 0)?);
    let group = WaitGroup::new();
    for _ in 0..ADMISSIONS {
        let member = group.enter();
        let hospital = Arc::clone(&hospital);
        thread::spawn(move || {
            hospital.mutate(1);
            member.leave();
        });
    }
    group.wait();
    println!("Admitted patients: {}", hospital.read());
    Ok(())
}

fn update_records(queue: &BarrierQueue) -> Result<()> {
    let mut tickets = Vec::with_capacity(PATIENTS_PER_SIDE * 2 + 1);
    for patient in 1..=PATIENTS_PER_SIDE {
        tickets.push(queue.submit(move || println!("Processing patient {patient}")));
    }
    tickets.push(queue.submit_barrier(|| println!("Updating all patient records")));
    for patient in PATIENTS_PER_SIDE + 1..=PATIENTS_PER_SIDE * 2 {
        tickets.push(queue.submit(move || println!("Processing patient {patient}")));
    }
    for ticket in tickets {
        ticket.wait()?;
    }
    queue.wait_idle();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let config = args.config();
    info!(
        workers = config.worker_pool_size,
        delay = ?config.default_delay,
        "starting ward"
    );
    let pool = config.build_pool()?;
    let fan_out = FanOut::new(Arc::clone(&pool), config.default_delay);
    let queue = BarrierQueue::new("concurrentQueue", pool);

    info!("fetching patient data");
    fetch_patient_data(&fan_out)?;
    info!("fetching medical records");
    fetch_medical_records(&fan_out)?;
    info!("allocating beds");
    allocate_beds()?;
    info!("admitting patients");
    admit_patients()?;
    info!("updating records behind a barrier");
    update_records(&queue)?;
    Ok(())
}
