//! Multi-worker fitness evaluation.
//!
//! Evaluation is the only phase that runs on more than one thread. The
//! coordinating thread publishes the flattened genome sequence of a
//! [`Population`] on a [`WorkerCoordinator`]; workers and the coordinator
//! itself then pull genomes through a shared cursor until it is exhausted.
//! Every genome is claimed exactly once. Once every claim has been submitted
//! or dropped, the fitness values are written back onto the population in
//! cursor order and idle workers block until the next generation is
//! published.
//!
//! A [`Claim`] dropped without a result (an evaluator that panicked) still
//! releases the barrier; its genome is left unevaluated and counted in
//! [`EvaluationReport::lost`].
//!
//! Cancellation is checked only where a worker would block. An evaluation
//! already in flight always runs to completion, and a stuck evaluation
//! stalls the generation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::genome::{Genome, UNEVALUATED};
use crate::population::Population;

/// Scores one genome. Higher is better.
///
/// Implemented for every `Fn(&Genome) -> f64 + Send + Sync`.
pub trait FitnessEvaluator: Send + Sync {
    fn evaluate(&self, genome: &Genome) -> f64;
}

impl<F> FitnessEvaluator for F
where
    F: Fn(&Genome) -> f64 + Send + Sync,
{
    #[inline]
    fn evaluate(&self, genome: &Genome) -> f64 {
        self(genome)
    }
}

/// Outcome of one [`WorkerCoordinator::evaluate_population`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvaluationReport {
    /// Genomes that received a fitness.
    pub evaluated: usize,
    /// Of those, the genomes scored by the calling thread.
    pub by_caller: usize,
    /// Genomes whose claim was dropped without a result.
    pub lost: usize,
}

/// An exclusively claimed genome.
///
/// Hand it back with [`WorkerCoordinator::submit`]. Dropping it unsubmitted
/// releases the slot and marks the result as lost.
#[derive(Debug)]
pub struct Claim<'a> {
    coordinator: &'a WorkerCoordinator,
    epoch: u64,
    submitted: bool,
    /// Position in the flattened genome sequence.
    pub index: usize,
    pub genome: Arc<Genome>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.submitted {
            self.coordinator.release(self.epoch, self.index, None);
        }
    }
}

#[derive(Debug, Default)]
struct Board {
    epoch: u64,
    jobs: Vec<Arc<Genome>>,
    cursor: usize,
    results: Vec<Option<f64>>,
    in_flight: usize,
    lost: usize,
}

impl Board {
    fn exhausted(&self) -> bool {
        self.cursor >= self.jobs.len()
    }
}

/// Claim cursor, evaluation barrier and cancel flag shared by the
/// coordinating thread and its workers.
#[derive(Debug, Default)]
pub struct WorkerCoordinator {
    board: Mutex<Board>,
    work_ready: Condvar,
    work_done: Condvar,
    cancelled: AtomicBool,
}

impl WorkerCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next unevaluated genome, if any is left.
    pub fn claim_next(&self) -> Option<Claim<'_>> {
        let mut board = self.board.lock();
        if board.exhausted() {
            return None;
        }
        let index = board.cursor;
        board.cursor += 1;
        board.in_flight += 1;
        Some(Claim {
            coordinator: self,
            epoch: board.epoch,
            submitted: false,
            index,
            genome: Arc::clone(&board.jobs[index]),
        })
    }

    /// Record the fitness computed for `claim`.
    ///
    /// Claims from an earlier generation are ignored.
    pub fn submit(&self, mut claim: Claim<'_>, fitness: f64) {
        claim.submitted = true;
        self.release(claim.epoch, claim.index, Some(fitness));
    }

    fn release(&self, epoch: u64, index: usize, fitness: Option<f64>) {
        let mut board = self.board.lock();
        if epoch != board.epoch {
            return;
        }
        match fitness {
            Some(fitness) => {
                if let Some(slot) = board.results.get_mut(index) {
                    *slot = Some(fitness);
                }
            }
            None => {
                board.lost += 1;
                warn!("evaluation of genome #{index} was abandoned");
            }
        }
        board.in_flight = board.in_flight.saturating_sub(1);
        if board.exhausted() && board.in_flight == 0 {
            self.work_done.notify_all();
        }
    }

    /// Block until unclaimed work is published or the coordinator is
    /// cancelled. Returns `false` on cancellation.
    pub fn wait_for_work(&self) -> bool {
        let mut board = self.board.lock();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if !board.exhausted() {
                return true;
            }
            self.work_ready.wait(&mut board);
        }
    }

    /// Run the worker loop until cancelled: wait for work, then claim and
    /// evaluate genomes until the cursor is exhausted.
    pub fn worker_loop(&self, evaluator: &dyn FitnessEvaluator) {
        debug!("worker {:?} started", thread::current().id());
        while self.wait_for_work() {
            self.drain(evaluator);
        }
        debug!("worker {:?} stopped", thread::current().id());
    }

    fn drain(&self, evaluator: &dyn FitnessEvaluator) -> usize {
        let mut evaluated = 0;
        while let Some(claim) = self.claim_next() {
            let fitness = evaluator.evaluate(&claim.genome);
            self.submit(claim, fitness);
            evaluated += 1;
        }
        evaluated
    }

    fn publish(&self, jobs: Vec<Arc<Genome>>) {
        let mut board = self.board.lock();
        board.epoch += 1;
        board.results = vec![None; jobs.len()];
        board.jobs = jobs;
        board.cursor = 0;
        board.in_flight = 0;
        board.lost = 0;
        self.work_ready.notify_all();
    }

    /// Wait for every outstanding claim, then take the results.
    fn collect(&self) -> (Vec<Option<f64>>, usize) {
        let mut board = self.board.lock();
        while board.in_flight > 0 {
            self.work_done.wait(&mut board);
        }
        board.jobs.clear();
        (std::mem::take(&mut board.results), board.lost)
    }

    /// Evaluate every genome of `population`, taking part as one of the
    /// evaluators, and write the results back in flattened order.
    ///
    /// Genomes whose evaluation was lost are reset to
    /// [`UNEVALUATED`](crate::UNEVALUATED).
    pub fn evaluate_population(
        &self,
        population: &mut Population,
        evaluator: &dyn FitnessEvaluator,
    ) -> EvaluationReport {
        self.publish(population.genomes().cloned().map(Arc::new).collect());
        let by_caller = self.drain(evaluator);
        let (results, lost) = self.collect();

        let mut evaluated = 0;
        for (genome, fitness) in population.genomes_mut().zip(results) {
            genome.fitness = match fitness {
                Some(fitness) => {
                    evaluated += 1;
                    fitness
                }
                None => UNEVALUATED,
            };
        }
        EvaluationReport {
            evaluated,
            by_caller,
            lost,
        }
    }

    /// Set the cancel flag and wake every blocked thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let board = self.board.lock();
        if !board.exhausted() || board.in_flight > 0 {
            warn!(
                "evaluation cancelled with {} unclaimed and {} in-flight genomes",
                board.jobs.len().saturating_sub(board.cursor),
                board.in_flight
            );
        }
        self.work_ready.notify_all();
        self.work_done.notify_all();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A fixed set of worker threads sharing one [`WorkerCoordinator`].
///
/// With `threads` evaluators in total, `threads - 1` workers are spawned;
/// the thread calling [`evaluate`](Self::evaluate) is the last one.
pub struct EvaluationPool {
    coordinator: Arc<WorkerCoordinator>,
    evaluator: Arc<dyn FitnessEvaluator>,
    workers: Vec<JoinHandle<()>>,
}

impl EvaluationPool {
    #[must_use]
    pub fn new(threads: usize, evaluator: Arc<dyn FitnessEvaluator>) -> Self {
        let coordinator = Arc::new(WorkerCoordinator::new());
        let workers = (1..threads.max(1))
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let evaluator = Arc::clone(&evaluator);
                thread::spawn(move || coordinator.worker_loop(evaluator.as_ref()))
            })
            .collect();
        Self {
            coordinator,
            evaluator,
            workers,
        }
    }

    /// Total number of evaluating threads, the caller included.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len() + 1
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<WorkerCoordinator> {
        &self.coordinator
    }

    /// Evaluate every genome of `population`.
    pub fn evaluate(&self, population: &mut Population) -> EvaluationReport {
        self.coordinator
            .evaluate_population(population, self.evaluator.as_ref())
    }

    /// Cancel the coordinator and join every worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.coordinator.cancel();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("evaluation worker panicked");
            }
        }
    }
}

impl Drop for EvaluationPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for EvaluationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationPool")
            .field("threads", &self.threads())
            .field("cancelled", &self.coordinator.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkShape, PoolConfig, SeedStrategy};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn population() -> Population {
        let mut config = PoolConfig::new(NetworkShape::new(3, 1));
        config.speciation.population = 24;
        config.default_genome.connection_type = SeedStrategy::Direct;
        config.default_genome.hidden = 1;
        Population::new(config, &mut test_rng()).unwrap()
    }

    fn by_key(genome: &Genome) -> f64 {
        genome.key as f64 * 0.5
    }

    fn jobs(pop: &Population) -> Vec<Arc<Genome>> {
        pop.genomes().cloned().map(Arc::new).collect()
    }

    #[test]
    fn test_closures_are_evaluators() {
        let evaluator: &dyn FitnessEvaluator = &|g: &Genome| g.key as f64;
        let pop = population();
        let g = pop.genomes().next().unwrap();
        assert_eq!(evaluator.evaluate(g), g.key as f64);
    }

    #[test]
    fn test_single_thread_evaluation() {
        let mut pop = population();
        let coordinator = WorkerCoordinator::new();
        let report = coordinator.evaluate_population(&mut pop, &by_key);
        assert_eq!(report.evaluated, pop.genome_count());
        assert_eq!(report.by_caller, pop.genome_count());
        assert_eq!(report.lost, 0);
        for g in pop.genomes() {
            assert_eq!(g.fitness, by_key(g));
        }
        assert!(coordinator.claim_next().is_none());
    }

    #[test]
    fn test_pool_evaluates_each_genome_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let evaluator = {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            move |g: &Genome| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert!(seen.lock().insert(g.key), "genome {} evaluated twice", g.key);
                by_key(g)
            }
        };

        let mut pop = population();
        let pool = EvaluationPool::new(4, Arc::new(evaluator));
        assert_eq!(pool.threads(), 4);
        let report = pool.evaluate(&mut pop);
        assert_eq!(report.evaluated, pop.genome_count());
        assert_eq!(calls.load(Ordering::SeqCst), pop.genome_count());
        for g in pop.genomes() {
            assert_eq!(g.fitness, by_key(g));
        }

        // a second generation reuses the same workers
        seen.lock().clear();
        pop.new_generation(&mut test_rng());
        pool.evaluate(&mut pop);
        assert!(pop.genomes().all(Genome::is_evaluated));
        pool.shutdown();
    }

    #[test]
    fn test_claims_are_exclusive_across_threads() {
        let mut pop = population();
        let coordinator = Arc::new(WorkerCoordinator::new());
        let claimed = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    if coordinator.wait_for_work() {
                        while let Some(claim) = coordinator.claim_next() {
                            claimed.lock().push(claim.index);
                            coordinator.submit(claim, 1.0);
                        }
                    }
                });
            }
            coordinator.evaluate_population(&mut pop, &|_: &Genome| 1.0);
            coordinator.cancel();
        });

        let mut indices = claimed.into_inner();
        let total = indices.len();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), total);
        assert!(pop.genomes().all(|g| g.fitness == 1.0));
    }

    #[test]
    fn test_stale_claims_are_ignored() {
        let mut pop = population();
        let coordinator = WorkerCoordinator::new();
        coordinator.evaluate_population(&mut pop, &by_key);
        let stale = Claim {
            coordinator: &coordinator,
            epoch: 0,
            submitted: false,
            index: 0,
            genome: Arc::new(pop.genomes().next().unwrap().clone()),
        };
        coordinator.submit(stale, 100.0);
        let report = coordinator.evaluate_population(&mut pop, &by_key);
        assert_eq!(report.lost, 0);
        assert!(pop.genomes().all(|g| g.fitness == by_key(g)));
    }

    #[test]
    fn test_dropped_claim_releases_barrier() {
        let pop = population();
        let coordinator = WorkerCoordinator::new();
        coordinator.publish(jobs(&pop));

        let claim = coordinator.claim_next().unwrap();
        assert_eq!(claim.index, 0);
        drop(claim);
        while let Some(claim) = coordinator.claim_next() {
            coordinator.submit(claim, 2.0);
        }

        let (results, lost) = coordinator.collect();
        assert_eq!(lost, 1);
        assert_eq!(results[0], None);
        assert!(results[1..].iter().all(|r| *r == Some(2.0)));
    }

    #[test]
    fn test_panicking_worker_does_not_hang() {
        let pop = population();
        let coordinator = WorkerCoordinator::new();
        coordinator.publish(jobs(&pop));

        thread::scope(|scope| {
            let worker = scope.spawn(|| {
                let _claim = coordinator.claim_next();
                panic!("evaluator failed");
            });
            assert!(worker.join().is_err());
        });
        while let Some(claim) = coordinator.claim_next() {
            coordinator.submit(claim, 1.0);
        }
        let (results, lost) = coordinator.collect();
        assert_eq!(lost, 1);
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
    }

    #[test]
    fn test_pool_survives_evaluator_panics() {
        let caller = thread::current().id();
        let evaluator = move |g: &Genome| {
            if thread::current().id() != caller && g.key % 2 == 0 {
                panic!("cannot score genome {}", g.key);
            }
            by_key(g)
        };

        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut pop = population();
            let pool = EvaluationPool::new(2, Arc::new(evaluator));
            let report = pool.evaluate(&mut pop);
            let consistent = pop
                .genomes()
                .all(|g| g.fitness == by_key(g) || !g.is_evaluated());
            let _ = tx.send((report, pop.genome_count(), consistent));
        });

        let (report, total, consistent) = rx
            .recv_timeout(Duration::from_secs(10))
            .expect("evaluation hung after a worker panic");
        assert_eq!(report.evaluated + report.lost, total);
        assert!(consistent);
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_releases_blocked_workers() {
        let coordinator = Arc::new(WorkerCoordinator::new());
        let worker = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.wait_for_work())
        };
        coordinator.cancel();
        assert!(!worker.join().unwrap());
        assert!(coordinator.is_cancelled());
        assert!(!coordinator.wait_for_work());
    }

    #[test]
    fn test_drop_joins_workers() {
        let pool = EvaluationPool::new(3, Arc::new(by_key));
        let coordinator = Arc::clone(pool.coordinator());
        drop(pool);
        assert!(coordinator.is_cancelled());
        assert_eq!(Arc::strong_count(&coordinator), 1);
    }
}
