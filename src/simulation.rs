//! Running an allocation simulation off the caller's thread.
//!
//! The engine itself is an opaque collaborator behind [`SimulationEngine`].
//! This module splits a run into batches of replicates, reports progress after
//! each batch, honours cancellation between batches, and averages replicate
//! metrics into a [`SimulationReport`].

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};
use crate::options::SimulationOptions;
use crate::policy::{PolicyCatalog, PolicySelection};

/// Identifies one replicate within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplicateContext {
    pub index: usize,
    /// Seed derived from the run's base seed.
    pub seed: u64,
}

/// Outcome counts of a single replicate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateMetrics {
    pub waitlist_deaths: u64,
    pub transplants: u64,
}

/// A transplant allocation simulator.
///
/// Implementations must be safe to call from several threads at once;
/// replicates of one batch run in parallel.
pub trait SimulationEngine: Send + Sync {
    /// Short name recorded in reports.
    fn name(&self) -> &str;

    /// Runs one replicate of the configured policy.
    fn run_replicate(
        &self,
        options: &SimulationOptions,
        context: &ReplicateContext,
    ) -> Result<ReplicateMetrics>;
}

/// Stand-in engine that waits and then reports fixed metrics.
///
/// Used to exercise the run pipeline end to end without a real simulator.
#[derive(Clone, Debug)]
pub struct SmokeTestEngine {
    delay: Duration,
    metrics: ReplicateMetrics,
}

impl SmokeTestEngine {
    /// Engine that sleeps for `delay` in every replicate.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Override the metrics every replicate reports.
    pub fn with_metrics(mut self, metrics: ReplicateMetrics) -> Self {
        self.metrics = metrics;
        self
    }
}

impl Default for SmokeTestEngine {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            metrics: ReplicateMetrics {
                waitlist_deaths: 12,
                transplants: 45,
            },
        }
    }
}

impl SimulationEngine for SmokeTestEngine {
    fn name(&self) -> &str {
        "smoke-test"
    }

    fn run_replicate(
        &self,
        _options: &SimulationOptions,
        _context: &ReplicateContext,
    ) -> Result<ReplicateMetrics> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(self.metrics)
    }
}

/// Status update emitted while a run progresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub message: String,
    pub completed_batches: usize,
    pub total_batches: usize,
}

impl ProgressEvent {
    fn new(message: impl Into<String>, completed_batches: usize, total_batches: usize) -> Self {
        Self {
            message: message.into(),
            completed_batches,
            total_batches,
        }
    }

    /// Fraction of batches completed, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total_batches == 0 {
            return 1.0;
        }
        self.completed_batches as f64 / self.total_batches as f64
    }
}

/// Averaged result of a completed run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Name of the engine that produced the metrics.
    pub engine: String,
    pub selection: PolicySelection,
    pub years: u32,
    /// Per-replicate metrics in replicate order.
    pub replicates: Vec<ReplicateMetrics>,
    pub avg_waitlist_deaths: f64,
    pub avg_transplants: f64,
}

/// Derives one seed per replicate from the base seed.
///
/// `StdRng` is platform independent, so a base seed yields the same replicate
/// seeds on every target. The sequence is only fixed within one `rand` minor
/// line, since `rand` may change the algorithm behind `StdRng` between them.
pub fn replicate_seeds(seed: u64, count: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen::<u64>()).collect()
}

/// Splits `replicates` into at most `batches` contiguous, non-empty ranges.
fn batch_ranges(replicates: usize, batches: usize) -> Vec<Range<usize>> {
    let batches = batches.clamp(1, replicates.max(1));
    let base = replicates / batches;
    let extra = replicates % batches;
    let mut ranges = Vec::with_capacity(batches);
    let mut start = 0;
    for batch in 0..batches {
        let len = base + usize::from(batch < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Runs simulations of catalog policies on a given engine.
#[derive(Clone)]
pub struct SimulationRunner {
    engine: Arc<dyn SimulationEngine>,
    catalog: PolicyCatalog,
}

impl SimulationRunner {
    /// Creates a runner over the default policy catalog.
    pub fn new(engine: Arc<dyn SimulationEngine>) -> Self {
        Self {
            engine,
            catalog: PolicyCatalog::default(),
        }
    }

    /// Replace the catalog used to resolve policies.
    pub fn with_catalog(mut self, catalog: PolicyCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Catalog used to resolve policies.
    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    /// Runs to completion on the calling thread.
    pub fn run_blocking<F>(
        &self,
        options: &SimulationOptions,
        mut on_progress: F,
    ) -> Result<SimulationReport>
    where
        F: FnMut(ProgressEvent),
    {
        let selection = options.resolve(&self.catalog)?;
        let never = AtomicBool::new(false);
        execute(self.engine.as_ref(), options, selection, &never, &mut on_progress)
    }

    /// Validates the options and starts the run on a worker thread.
    pub fn spawn(&self, options: SimulationOptions) -> Result<SimulationHandle> {
        let selection = options.resolve(&self.catalog)?;
        let engine = Arc::clone(&self.engine);
        let cancel = Arc::new(AtomicBool::new(false));
        let (progress_tx, progress_rx) = unbounded::<ProgressEvent>();
        let (result_tx, result_rx) = bounded::<Result<SimulationReport>>(1);

        let worker_cancel = Arc::clone(&cancel);
        let worker = thread::Builder::new()
            .name(format!("simulation-{}", engine.name()))
            .spawn(move || {
                let mut forward = |event: ProgressEvent| {
                    let _ = progress_tx.send(event);
                };
                let outcome = execute(
                    engine.as_ref(),
                    &options,
                    selection,
                    &worker_cancel,
                    &mut forward,
                );
                let _ = result_tx.send(outcome);
            })
            .map_err(|err| {
                PolicyError::engine(format!("failed to start simulation worker: {err}"))
            })?;

        Ok(SimulationHandle {
            progress: progress_rx,
            result: result_rx,
            cancel,
            worker: Some(worker),
        })
    }
}

/// Handle to a run started with [`SimulationRunner::spawn`].
///
/// Dropping the handle requests cancellation without waiting for the worker.
pub struct SimulationHandle {
    progress: Receiver<ProgressEvent>,
    result: Receiver<Result<SimulationReport>>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulationHandle {
    /// Stream of progress events; closes when the run ends.
    pub fn progress(&self) -> &Receiver<ProgressEvent> {
        &self.progress
    }

    /// Asks the worker to stop before its next batch.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(true, |worker| worker.is_finished())
    }

    /// Blocks until the run ends and returns its outcome.
    pub fn wait(mut self) -> Result<SimulationReport> {
        let outcome = self.result.recv();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        outcome.map_err(|_| PolicyError::WorkerDisconnected)?
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn execute(
    engine: &dyn SimulationEngine,
    options: &SimulationOptions,
    selection: PolicySelection,
    cancel: &AtomicBool,
    on_progress: &mut dyn FnMut(ProgressEvent),
) -> Result<SimulationReport> {
    let seeds = replicate_seeds(options.seed, options.replicates);
    let ranges = batch_ranges(options.replicates, options.batches);
    let total = ranges.len();

    log::info!(
        "starting {} simulation of {}/{} for {} years ({} replicates)",
        engine.name(),
        selection.policy,
        selection.algorithm,
        options.years,
        options.replicates
    );
    on_progress(ProgressEvent::new("Starting simulation...", 0, total));

    let mut replicates = Vec::with_capacity(options.replicates);
    for (batch, range) in ranges.into_iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            log::warn!("simulation cancelled after {batch} of {total} batches");
            return Err(PolicyError::Cancelled {
                completed_batches: batch,
                total_batches: total,
            });
        }

        let metrics = range
            .into_par_iter()
            .map(|index| {
                let context = ReplicateContext {
                    index,
                    seed: seeds[index],
                };
                engine.run_replicate(options, &context)
            })
            .collect::<Result<Vec<_>>>()?;
        replicates.extend(metrics);

        on_progress(ProgressEvent::new(
            format!("Processing Batch {}/{}...", batch + 1, total),
            batch + 1,
            total,
        ));
    }

    let deaths = DVector::from_iterator(
        replicates.len(),
        replicates.iter().map(|m| m.waitlist_deaths as f64),
    );
    let transplants = DVector::from_iterator(
        replicates.len(),
        replicates.iter().map(|m| m.transplants as f64),
    );

    let report = SimulationReport {
        engine: engine.name().to_string(),
        selection,
        years: options.years,
        avg_waitlist_deaths: deaths.mean(),
        avg_transplants: transplants.mean(),
        replicates,
    };
    log::info!(
        "simulation complete: avg waitlist deaths {:.2}, avg transplants {:.2}",
        report.avg_waitlist_deaths,
        report.avg_transplants
    );
    on_progress(ProgressEvent::new("Simulation Complete!", total, total));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use approx::assert_relative_eq;

    use super::*;

    struct SeedEchoEngine;

    impl SimulationEngine for SeedEchoEngine {
        fn name(&self) -> &str {
            "seed-echo"
        }

        fn run_replicate(
            &self,
            _options: &SimulationOptions,
            context: &ReplicateContext,
        ) -> Result<ReplicateMetrics> {
            Ok(ReplicateMetrics {
                waitlist_deaths: context.index as u64,
                transplants: context.seed % 100,
            })
        }
    }

    struct FailingEngine;

    impl SimulationEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        fn run_replicate(
            &self,
            _options: &SimulationOptions,
            context: &ReplicateContext,
        ) -> Result<ReplicateMetrics> {
            if context.index == 1 {
                return Err(PolicyError::engine("donor pool exhausted"));
            }
            Ok(ReplicateMetrics::default())
        }
    }

    #[test]
    fn batch_ranges_cover_every_replicate() {
        assert_eq!(batch_ranges(3, 3), vec![0..1, 1..2, 2..3]);
        assert_eq!(batch_ranges(7, 3), vec![0..3, 3..5, 5..7]);
        assert_eq!(batch_ranges(2, 5), vec![0..1, 1..2]);
    }

    #[test]
    fn replicate_seeds_are_reproducible() {
        assert_eq!(replicate_seeds(7, 4), replicate_seeds(7, 4));
        assert_ne!(replicate_seeds(7, 4), replicate_seeds(8, 4));
    }

    #[test]
    fn longer_runs_extend_the_same_seed_sequence() {
        let short = replicate_seeds(42, 2);
        let long = replicate_seeds(42, 6);
        assert_eq!(short.as_slice(), &long[..2]);

        let mut distinct = long.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct.len(), long.len());
    }

    #[test]
    fn smoke_engine_reports_fixed_averages() {
        let runner = SimulationRunner::new(Arc::new(SmokeTestEngine::default()));
        let mut messages = Vec::new();
        let report = runner
            .run_blocking(&SimulationOptions::default(), |event| messages.push(event.message))
            .unwrap();

        assert_relative_eq!(report.avg_waitlist_deaths, 12.0);
        assert_relative_eq!(report.avg_transplants, 45.0);
        assert_eq!(report.selection.algorithm, "NORMAL");
        assert_eq!(
            messages,
            [
                "Starting simulation...",
                "Processing Batch 1/3...",
                "Processing Batch 2/3...",
                "Processing Batch 3/3...",
                "Simulation Complete!",
            ]
        );
    }

    #[test]
    fn replicates_keep_order_and_seeds() {
        let runner = SimulationRunner::new(Arc::new(SeedEchoEngine));
        let options = SimulationOptions::default().with_replicates(5).with_seed(11);
        let report = runner.run_blocking(&options, |_| {}).unwrap();

        let seeds = replicate_seeds(11, 5);
        for (index, metrics) in report.replicates.iter().enumerate() {
            assert_eq!(metrics.waitlist_deaths, index as u64);
            assert_eq!(metrics.transplants, seeds[index] % 100);
        }
        assert_relative_eq!(report.avg_waitlist_deaths, 2.0);
    }

    #[test]
    fn engine_failure_surfaces_as_error() {
        let runner = SimulationRunner::new(Arc::new(FailingEngine));
        let err = runner
            .run_blocking(&SimulationOptions::default(), |_| {})
            .unwrap_err();
        assert!(matches!(err, PolicyError::Engine { .. }));
    }

    #[test]
    fn invalid_options_fail_before_spawning() {
        let runner = SimulationRunner::new(Arc::new(SmokeTestEngine::default()));
        let err = runner
            .spawn(SimulationOptions::default().with_years(60))
            .err()
            .unwrap();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn spawned_run_streams_progress() {
        let engine = SmokeTestEngine::new(Duration::from_millis(5));
        let runner = SimulationRunner::new(Arc::new(engine));
        let handle = runner.spawn(SimulationOptions::default()).unwrap();
        let events: Vec<ProgressEvent> = handle.progress().iter().collect();
        let report = handle.wait().unwrap();

        assert_eq!(events.len(), 5);
        assert_relative_eq!(events.last().unwrap().fraction(), 1.0);
        assert_eq!(report.replicates.len(), 3);
    }

    struct GatedEngine {
        gate: Mutex<Receiver<()>>,
    }

    impl SimulationEngine for GatedEngine {
        fn name(&self) -> &str {
            "gated"
        }

        fn run_replicate(
            &self,
            _options: &SimulationOptions,
            _context: &ReplicateContext,
        ) -> Result<ReplicateMetrics> {
            let gate = self.gate.lock().map_err(|_| PolicyError::engine("gate poisoned"))?;
            let _ = gate.recv();
            Ok(ReplicateMetrics::default())
        }
    }

    #[test]
    fn cancel_stops_before_next_batch() {
        let (gate_tx, gate_rx) = unbounded();
        let engine = GatedEngine {
            gate: Mutex::new(gate_rx),
        };
        let runner = SimulationRunner::new(Arc::new(engine));
        let options = SimulationOptions::default().with_replicates(2).with_batches(2);
        let handle = runner.spawn(options).unwrap();

        handle.cancel();
        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();

        let err = handle.wait().unwrap_err();
        match err {
            PolicyError::Cancelled {
                completed_batches,
                total_batches,
            } => {
                assert_eq!(total_batches, 2);
                assert!(completed_batches < 2);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}
