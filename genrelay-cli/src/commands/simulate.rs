//! `genrelay simulate` - synthetic workload against a simulated service.
//!
//! Requests draw from a small pool of distinct inputs so repeats exercise
//! deduplication and caching. The simulated service fails, throttles and
//! stalls at the configured rates.

use clap::Args;
use futures::future::join_all;
use genrelay::logging::{default_log_dir, default_log_file, init_logging};
use genrelay::{
    GeneratedOutput, GenerationRequest, GenerationService, Orchestrator, PressureLevel, Priority,
    RemoteFailure, RequestError,
};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::load_config;
use crate::error::CliError;

const STYLES: [&str; 3] = ["watercolor", "sketch", "photoreal"];

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Total requests to issue
    #[arg(long, default_value_t = 200)]
    pub requests: usize,

    /// Distinct inputs the requests are drawn from
    #[arg(long, default_value_t = 40)]
    pub unique: usize,

    /// Probability that a remote call fails transiently
    #[arg(long, default_value_t = 0.1)]
    pub failure_rate: f64,

    /// Probability that a remote call is throttled
    #[arg(long, default_value_t = 0.05)]
    pub rate_limit_rate: f64,

    /// Probability that a remote call fails permanently
    #[arg(long, default_value_t = 0.01)]
    pub fatal_rate: f64,

    /// Mean latency of a remote call in milliseconds
    #[arg(long, default_value_t = 40)]
    pub latency_ms: u64,

    /// Gap between request arrivals in milliseconds (randomized up to this)
    #[arg(long, default_value_t = 5)]
    pub arrival_ms: u64,

    /// Pressure level reported halfway through the run
    #[arg(long)]
    pub pressure: Option<PressureLevel>,

    /// Config file to load (default: ~/.genrelay/config.ini)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log at info level to the console
    #[arg(long)]
    pub verbose: bool,
}

impl SimulateArgs {
    fn validate(&self) -> Result<(), CliError> {
        if self.requests == 0 || self.unique == 0 {
            return Err(CliError::InvalidArgument(
                "--requests and --unique must be at least 1".to_string(),
            ));
        }
        let rates = [self.failure_rate, self.rate_limit_rate, self.fatal_rate];
        let out_of_range = rates.iter().any(|rate| !(0.0..=1.0).contains(rate));
        if out_of_range || rates.iter().sum::<f64>() > 1.0 {
            return Err(CliError::InvalidArgument(
                "failure rates must be between 0 and 1 and sum to at most 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Remote service stand-in with configurable failure behaviour.
pub struct SimulatedService {
    failure_rate: f64,
    rate_limit_rate: f64,
    fatal_rate: f64,
    latency: Duration,
}

impl SimulatedService {
    pub fn new(args: &SimulateArgs) -> Self {
        Self {
            failure_rate: args.failure_rate,
            rate_limit_rate: args.rate_limit_rate,
            fatal_rate: args.fatal_rate,
            latency: Duration::from_millis(args.latency_ms),
        }
    }

    /// Picks the outcome and latency of one call.
    fn roll(&self) -> (Option<RemoteFailure>, Duration) {
        let mut rng = rand::thread_rng();
        let latency = self.latency.mul_f64(rng.gen_range(0.5..1.5));

        let roll: f64 = rng.gen();
        let failure = if roll < self.fatal_rate {
            Some(RemoteFailure::fatal("simulated: unsupported input"))
        } else if roll < self.fatal_rate + self.rate_limit_rate {
            let hint = rng
                .gen_bool(0.5)
                .then(|| Duration::from_millis(rng.gen_range(50..250)));
            Some(RemoteFailure::rate_limited(hint))
        } else if roll < self.fatal_rate + self.rate_limit_rate + self.failure_rate {
            Some(RemoteFailure::transient("simulated: connection reset"))
        } else {
            None
        };
        (failure, latency)
    }
}

impl GenerationService for SimulatedService {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedOutput, RemoteFailure> {
        let (failure, latency) = self.roll();
        tokio::time::sleep(latency).await;

        match failure {
            Some(failure) => Err(failure),
            None => {
                let style = request.param("style").unwrap_or("default");
                let mut payload = request.input().to_vec();
                payload.extend_from_slice(style.as_bytes());
                Ok(GeneratedOutput::new(payload).with_content_type("application/octet-stream"))
            }
        }
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// Tally of request outcomes as seen by callers.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OutcomeTally {
    pub succeeded: usize,
    pub failed: usize,
    pub rejected: usize,
    pub other: usize,
}

impl OutcomeTally {
    fn record(&mut self, outcome: &Result<GeneratedOutput, RequestError>) {
        match outcome {
            Ok(_) => self.succeeded += 1,
            Err(RequestError::Failed { .. }) => self.failed += 1,
            Err(RequestError::Rejected(_)) => self.rejected += 1,
            Err(_) => self.other += 1,
        }
    }
}

pub fn run(args: SimulateArgs) -> Result<(), CliError> {
    args.validate()?;
    let config = load_config(args.config.as_deref())?.to_orchestrator_config();

    let level = if args.verbose { "info" } else { "warn" };
    let _logging_guard = init_logging(&default_log_dir(), default_log_file(), level)
        .map_err(CliError::LoggingInit)?;

    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    let orchestrator = Orchestrator::new(SimulatedService::new(&args), config);

    let (tally, elapsed) = runtime.block_on(drive(Arc::new(orchestrator), &args, |o| {
        println!();
        println!("{}", o.snapshot());
    }));

    println!(
        "Requests: {} in {:.1}s - {} succeeded, {} failed, {} rejected, {} other",
        args.requests,
        elapsed.as_secs_f64(),
        tally.succeeded,
        tally.failed,
        tally.rejected,
        tally.other
    );
    Ok(())
}

/// Issues the workload, waits for every request, then shuts down.
async fn drive<F>(
    orchestrator: Arc<Orchestrator<SimulatedService>>,
    args: &SimulateArgs,
    report: F,
) -> (OutcomeTally, Duration)
where
    F: FnOnce(&Orchestrator<SimulatedService>),
{
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = shutdown.clone();
        async move { orchestrator.run(shutdown).await }
    });

    let started = Instant::now();
    let mut pending = Vec::with_capacity(args.requests);
    for n in 0..args.requests {
        if let Some(level) = args.pressure.filter(|_| n == args.requests / 2) {
            info!(level = %level, "Simulating pressure change");
            orchestrator.on_pressure_change(level);
        }

        let (request, priority, gap) = {
            let mut rng = rand::thread_rng();
            let key = rng.gen_range(0..args.unique);
            let style = STYLES[key % STYLES.len()];
            let request = GenerationRequest::new(format!("input-{key}").into_bytes())
                .with_param("style", style);
            let priority = Priority::ALL[rng.gen_range(0..Priority::ALL.len())];
            let gap = Duration::from_millis(rng.gen_range(0..=args.arrival_ms));
            (request, priority, gap)
        };

        pending.push(orchestrator.submit(request, priority));
        if !gap.is_zero() {
            tokio::time::sleep(gap).await;
        }
    }

    let mut tally = OutcomeTally::default();
    for outcome in join_all(pending.into_iter().map(|p| p.wait())).await {
        tally.record(&outcome);
    }
    let elapsed = started.elapsed();

    shutdown.cancel();
    let _ = runner.await;
    report(&orchestrator);

    (tally, elapsed)
}
