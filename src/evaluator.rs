//! Cross-validation driver: generates folds, evaluates every algorithm on
//! every fold and streams the results into a sink.
//!
//! A run moves through
//! `Initializing -> GeneratingFolds -> Evaluating -> Finalizing -> Done`,
//! or ends in `Failed` from any of them. Failures of a single
//! (fold, algorithm) unit are recorded in the summary and do not stop the
//! run; configuration, data, and I/O errors do.
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use tracing::{error, info, info_span, warn, Span};

use super::algorithms::Algorithm;
use super::data::RatingStore;
use super::evaluation::evaluate;
use super::folds::{Fold, FoldGenerator};
use super::sink::ResultSink;
use super::split::ProfileSplitter;
use super::{EvalError, UserId};

/// Stage of an evaluation run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EvaluatorState {
    /// Validating the run parameters.
    Initializing,
    /// Partitioning users and splitting profiles.
    GeneratingFolds,
    /// Running (fold, algorithm) units.
    Evaluating,
    /// Flushing the sink.
    Finalizing,
    /// The run completed.
    Done,
    /// The run was aborted by a fatal error.
    Failed,
}

/// Logging context threaded through a run. Every unit logs inside a child
/// span of `span`.
#[derive(Clone, Debug)]
pub struct EvalContext {
    span: Span,
}

impl EvalContext {
    /// Log under `span`.
    pub fn new(span: Span) -> Self {
        EvalContext { span }
    }

    /// The parent span.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        EvalContext::new(info_span!("crossfold"))
    }
}

/// How a unit ended.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Every test rating was predicted.
    Completed,
    /// Training or prediction failed.
    Failed {
        /// Description of the failure.
        reason: String,
    },
}

/// Result of one (fold, algorithm) unit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnitReport {
    /// Fold index.
    pub fold_index: usize,
    /// Algorithm identifier.
    pub algorithm_id: String,
    /// Rows written by the unit.
    pub rows: usize,
    /// How the unit ended.
    pub outcome: UnitOutcome,
}

/// A unit that failed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnitFailure {
    /// Fold index.
    pub fold_index: usize,
    /// Algorithm identifier.
    pub algorithm_id: String,
    /// Description of the failure.
    pub reason: String,
}

/// Summary of a completed run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvalSummary {
    /// Number of folds.
    pub num_folds: usize,
    /// Total rows written to the sink.
    pub rows_written: usize,
    /// Number of units run.
    pub units_attempted: usize,
    /// Every unit, fold-major then in algorithm order.
    pub units: Vec<UnitReport>,
    /// Units that failed.
    pub failures: Vec<UnitFailure>,
}

impl EvalSummary {
    /// Number of failed units.
    pub fn units_failed(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for EvalSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{} folds, {} units attempted, {} failed, {} rows written",
            self.num_folds,
            self.units_attempted,
            self.units_failed(),
            self.rows_written
        )?;

        for failure in &self.failures {
            writeln!(
                f,
                "  fold {} / {}: {}",
                failure.fold_index, failure.algorithm_id, failure.reason
            )?;
        }

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One (fold, algorithm) pair, at `position` in fold-major order.
struct Unit<'a> {
    position: usize,
    fold: &'a Fold,
    algorithm: &'a dyn Algorithm,
}

/// Shared state of the units of one run.
struct Progress<'s, K: ?Sized> {
    sink: Mutex<&'s mut K>,
    abort: AtomicBool,
    fatal: Mutex<Option<EvalError>>,
    rows_written: AtomicUsize,
    reports: Mutex<Vec<Option<UnitReport>>>,
}

impl<'s, K: ResultSink + ?Sized> Progress<'s, K> {
    fn fail(&self, err: EvalError) {
        self.abort.store(true, Ordering::SeqCst);

        let mut fatal = lock(&self.fatal);
        if fatal.is_none() {
            *fatal = Some(err);
        }
    }
}

/// K-fold cross-validation of a list of algorithms.
pub struct CrossfoldEvaluator {
    algorithms: Vec<Box<dyn Algorithm>>,
    num_folds: usize,
    splitter: Box<dyn ProfileSplitter>,
    seed: u64,
    num_threads: usize,
    context: EvalContext,
    state: EvaluatorState,
}

impl fmt::Debug for CrossfoldEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CrossfoldEvaluator")
            .field(
                "algorithms",
                &self.algorithms.iter().map(|x| x.id()).collect::<Vec<_>>(),
            )
            .field("num_folds", &self.num_folds)
            .field("holdout_fraction", &self.splitter.holdout_fraction())
            .field("seed", &self.seed)
            .field("num_threads", &self.num_threads)
            .field("state", &self.state)
            .finish()
    }
}

impl CrossfoldEvaluator {
    /// Build an evaluator for `algorithms`, evaluated in order on each of
    /// `num_folds` folds whose test users are split by `splitter`.
    pub fn new(
        algorithms: Vec<Box<dyn Algorithm>>,
        num_folds: usize,
        splitter: Box<dyn ProfileSplitter>,
    ) -> Self {
        CrossfoldEvaluator {
            algorithms,
            num_folds,
            splitter,
            seed: 0,
            num_threads: rayon::current_num_threads(),
            context: EvalContext::default(),
            state: EvaluatorState::Initializing,
        }
    }

    /// Set the seed used to assign users to folds.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of units evaluated concurrently. With a single thread
    /// units run, and rows arrive, in fold-major order.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the logging context.
    pub fn context(mut self, context: EvalContext) -> Self {
        self.context = context;
        self
    }

    /// Current stage of the last (or ongoing) run.
    pub fn state(&self) -> EvaluatorState {
        self.state
    }

    /// Evaluate on every user in `store`.
    pub fn run<S, K>(&mut self, store: &S, sink: &mut K) -> Result<EvalSummary, EvalError>
    where
        S: RatingStore + ?Sized,
        K: ResultSink + ?Sized,
    {
        self.drive(None, store, sink)
    }

    /// Evaluate on the given users only.
    pub fn run_users<S, K>(
        &mut self,
        users: &[UserId],
        store: &S,
        sink: &mut K,
    ) -> Result<EvalSummary, EvalError>
    where
        S: RatingStore + ?Sized,
        K: ResultSink + ?Sized,
    {
        self.drive(Some(users), store, sink)
    }

    fn drive<S, K>(
        &mut self,
        users: Option<&[UserId]>,
        store: &S,
        sink: &mut K,
    ) -> Result<EvalSummary, EvalError>
    where
        S: RatingStore + ?Sized,
        K: ResultSink + ?Sized,
    {
        let span = self.context.span.clone();
        let _entered = span.enter();

        let result = self.execute(users, store, sink);

        match result {
            Ok(ref summary) => {
                self.state = EvaluatorState::Done;
                info!(
                    rows = summary.rows_written,
                    units = summary.units_attempted,
                    failed = summary.units_failed(),
                    "evaluation finished"
                );
            }
            Err(ref err) => {
                self.state = EvaluatorState::Failed;
                error!(error = %err, "evaluation failed");
            }
        }

        result
    }

    fn validate(&self) -> Result<(), EvalError> {
        if self.algorithms.is_empty() {
            return Err(EvalError::config("no algorithms to evaluate"));
        }

        if self.num_folds < 1 {
            return Err(EvalError::config("number of folds must be at least 1"));
        }

        if !(0.0..1.0).contains(&self.splitter.holdout_fraction()) {
            return Err(EvalError::config(format!(
                "holdout fraction must be in [0, 1), got {}",
                self.splitter.holdout_fraction()
            )));
        }

        if self.num_threads < 1 {
            return Err(EvalError::config("number of threads must be at least 1"));
        }

        for (idx, algorithm) in self.algorithms.iter().enumerate() {
            if self.algorithms[..idx].iter().any(|x| x.id() == algorithm.id()) {
                return Err(EvalError::config(format!(
                    "duplicate algorithm id {:?}",
                    algorithm.id()
                )));
            }
        }

        Ok(())
    }

    fn execute<S, K>(
        &mut self,
        users: Option<&[UserId]>,
        store: &S,
        sink: &mut K,
    ) -> Result<EvalSummary, EvalError>
    where
        S: RatingStore + ?Sized,
        K: ResultSink + ?Sized,
    {
        self.state = EvaluatorState::Initializing;
        self.validate()?;

        self.state = EvaluatorState::GeneratingFolds;
        let users = match users {
            Some(users) => users.to_owned(),
            None => store.user_ids()?,
        };
        let folds = FoldGenerator::new(self.num_folds, self.seed).generate(
            &users,
            store,
            self.splitter.as_ref(),
        )?;

        info!(
            users = users.len(),
            folds = folds.len(),
            algorithms = self.algorithms.len(),
            "generated folds"
        );

        self.state = EvaluatorState::Evaluating;
        let units = self.evaluate_units(&folds, sink)?;

        self.state = EvaluatorState::Finalizing;
        sink.finish()?;

        let rows_written = units.iter().map(|x| x.rows).sum();
        let failures = units
            .iter()
            .filter_map(|unit| match unit.outcome {
                UnitOutcome::Failed { ref reason } => Some(UnitFailure {
                    fold_index: unit.fold_index,
                    algorithm_id: unit.algorithm_id.clone(),
                    reason: reason.clone(),
                }),
                UnitOutcome::Completed => None,
            })
            .collect();

        Ok(EvalSummary {
            num_folds: folds.len(),
            rows_written,
            units_attempted: units.len(),
            units,
            failures,
        })
    }

    fn evaluate_units<K>(&self, folds: &[Fold], sink: &mut K) -> Result<Vec<UnitReport>, EvalError>
    where
        K: ResultSink + ?Sized,
    {
        let units: Vec<Unit> = iproduct!(folds, &self.algorithms)
            .enumerate()
            .map(|(position, (fold, algorithm))| Unit {
                position,
                fold,
                algorithm: algorithm.as_ref(),
            })
            .collect();

        let progress = Progress {
            sink: Mutex::new(sink),
            abort: AtomicBool::new(false),
            fatal: Mutex::new(None),
            rows_written: AtomicUsize::new(0),
            reports: Mutex::new(vec![None; units.len()]),
        };

        if self.num_threads == 1 {
            units.iter().for_each(|unit| self.run_unit(unit, &progress));
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_threads)
                .build()
                .map_err(|err| EvalError::config(format!("cannot start worker pool: {}", err)))?;

            pool.install(|| {
                units
                    .par_iter()
                    .for_each(|unit| self.run_unit(unit, &progress))
            });
        }

        let Progress {
            fatal,
            reports,
            rows_written,
            ..
        } = progress;

        let reports = reports.into_inner().unwrap_or_else(PoisonError::into_inner);

        if let Some(err) = fatal.into_inner().unwrap_or_else(PoisonError::into_inner) {
            warn!(
                rows = rows_written.load(Ordering::SeqCst),
                skipped = reports.iter().filter(|x| x.is_none()).count(),
                "aborting evaluation"
            );
            return Err(err);
        }

        Ok(reports.into_iter().flatten().collect())
    }

    fn run_unit<K>(&self, unit: &Unit, progress: &Progress<K>)
    where
        K: ResultSink + ?Sized,
    {
        if progress.abort.load(Ordering::SeqCst) {
            return;
        }

        let report = self.evaluate_unit(unit.fold, unit.algorithm, progress);
        lock(&progress.reports)[unit.position] = report;
    }

    /// Run one unit. Returns `None` if the unit was abandoned because of a
    /// fatal error.
    fn evaluate_unit<K>(
        &self,
        fold: &Fold,
        algorithm: &dyn Algorithm,
        progress: &Progress<K>,
    ) -> Option<UnitReport>
    where
        K: ResultSink + ?Sized,
    {
        let span = info_span!(
            parent: &self.context.span,
            "unit",
            fold = fold.index(),
            algorithm = algorithm.id()
        );
        let _entered = span.enter();

        let mut rows = 0;

        let outcome = match evaluate(fold, algorithm) {
            Err(err) => UnitOutcome::Failed {
                reason: err.to_string(),
            },
            Ok(results) => {
                let mut outcome = UnitOutcome::Completed;

                for row in results {
                    let row = match row {
                        Ok(row) => row,
                        Err(err) => {
                            outcome = UnitOutcome::Failed {
                                reason: err.to_string(),
                            };
                            break;
                        }
                    };

                    if progress.abort.load(Ordering::SeqCst) {
                        return None;
                    }

                    let written = lock(&progress.sink).write_row(&row);
                    if let Err(err) = written {
                        progress.fail(err);
                        return None;
                    }

                    rows += 1;
                    progress.rows_written.fetch_add(1, Ordering::SeqCst);
                }

                outcome
            }
        };

        match outcome {
            UnitOutcome::Completed => info!(rows, "unit completed"),
            UnitOutcome::Failed { ref reason } => warn!(rows, reason = %reason, "unit failed"),
        }

        Some(UnitReport {
            fold_index: fold.index(),
            algorithm_id: algorithm.id().to_owned(),
            rows,
            outcome,
        })
    }
}
