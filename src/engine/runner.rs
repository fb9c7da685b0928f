//! Workflow execution.
//!
//! A bounded pool of worker threads executes `(step, repository)` pairs.
//! The scheduler enqueues a pair only when every ancestor step has completed
//! for that repository, and dispatches at most one pair per repository at a
//! time; a per-repository mutex keyed by canonical path backs that guarantee
//! at the worktree level. A pair whose ancestor failed (or was skipped) is
//! skipped with a `TASK_SKIP` event instead of executed. Cancellation stops
//! dispatch; pairs already running finish (or observe the token themselves),
//! pending pairs are abandoned.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, unbounded};
use dashmap::DashMap;

use crate::cancel::CancelToken;
use crate::confirm::Gate;
use crate::discover::RepoRecord;
use crate::ops::{Clock, ExecutorContext, RuntimeOptions};
use crate::report::{Event, Reporter, codes};

use super::task::ActionDispatcher;
use super::{ResolvedWorkflow, template};

/// How often the scheduler wakes to re-check cancellation while idle.
const SCHEDULER_POLL: Duration = Duration::from_millis(50);

/// One fatally-failed `(step, repository)` pair.
#[derive(Debug, Clone)]
pub struct PairFailure {
    pub step: String,
    pub repository: PathBuf,
    pub message: String,
}

/// Aggregate outcome of a workflow run.
#[derive(Debug, Default)]
pub struct EngineReport {
    pub executed: usize,
    pub skipped: usize,
    pub abandoned: usize,
    pub failures: Vec<PairFailure>,
}

impl EngineReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

enum PairOutcome {
    Success,
    Failed(String),
    Abandoned,
}

struct RepoSlot {
    record: Mutex<RepoRecord>,
}

pub struct Engine<'a> {
    pub dispatcher: &'a dyn ActionDispatcher,
    pub reporter: &'a Reporter,
    pub gate: &'a Gate,
    pub runtime: RuntimeOptions,
    pub cancel: CancelToken,
    pub clock: &'a dyn Clock,
}

impl Engine<'_> {
    /// Execute the workflow across the given repositories.
    ///
    /// Returns `Err` only for configuration problems (unknown actions);
    /// per-pair failures are aggregated in the report.
    pub fn run(
        &self,
        workflow: &ResolvedWorkflow,
        records: Vec<RepoRecord>,
    ) -> anyhow::Result<EngineReport> {
        for step in &workflow.steps {
            if !self.dispatcher.knows_action(&step.action) {
                anyhow::bail!("step {} uses unknown action {}", step.name, step.action);
            }
        }

        let n_steps = workflow.steps.len();
        let n_repos = records.len();
        let mut report = EngineReport::default();
        if n_steps == 0 || n_repos == 0 {
            self.dispatcher.finish()?;
            return Ok(report);
        }

        let slots: Vec<Arc<RepoSlot>> = records
            .into_iter()
            .map(|record| {
                Arc::new(RepoSlot {
                    record: Mutex::new(record),
                })
            })
            .collect();
        let dependents = workflow.dependents();
        // Worktree-level serialisation, keyed by canonical absolute path
        let locks: DashMap<PathBuf, Arc<Mutex<()>>> = DashMap::new();

        // Per-repository scheduling state
        let mut deps_remaining: Vec<Vec<usize>> = (0..n_repos)
            .map(|_| workflow.steps.iter().map(|s| s.deps.len()).collect())
            .collect();
        let mut ancestor_bad = vec![vec![false; n_steps]; n_repos];
        let mut ready: Vec<Vec<usize>> = vec![Vec::new(); n_repos];
        let mut busy = vec![false; n_repos];

        let total = n_steps * n_repos;
        let mut settled = 0usize;
        let mut in_flight = 0usize;

        let (pair_tx, pair_rx) = unbounded::<(usize, usize)>();
        let (done_tx, done_rx) = unbounded::<(usize, usize, PairOutcome)>();

        thread::scope(|scope| {
            let workers = self.runtime.workers.max(1);
            for _ in 0..workers {
                let pair_rx = pair_rx.clone();
                let done_tx = done_tx.clone();
                let slots = &slots;
                let locks = &locks;
                scope.spawn(move || {
                    for (step_index, repo_index) in pair_rx.iter() {
                        if self.cancel.is_cancelled() {
                            let _ = done_tx.send((step_index, repo_index, PairOutcome::Abandoned));
                            continue;
                        }
                        let outcome =
                            self.execute_pair(workflow, &slots[repo_index], locks, step_index);
                        let _ = done_tx.send((step_index, repo_index, outcome));
                    }
                });
            }
            drop(pair_rx);
            drop(done_tx);

            // Seed: dependency-free steps, repositories in canonical order
            for repo_index in 0..n_repos {
                for &step_index in &workflow.topo_order {
                    if deps_remaining[repo_index][step_index] == 0 {
                        ready[repo_index].push(step_index);
                    }
                }
                Self::dispatch_next(
                    workflow,
                    &pair_tx,
                    &mut ready[repo_index],
                    &mut busy[repo_index],
                    repo_index,
                    &mut in_flight,
                );
            }

            while settled < total {
                if self.cancel.is_cancelled() && in_flight == 0 {
                    report.abandoned += total - settled;
                    break;
                }
                let (step_index, repo_index, outcome) = match done_rx.recv_timeout(SCHEDULER_POLL)
                {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };

                settled += 1;
                in_flight -= 1;
                busy[repo_index] = false;

                let failed = match outcome {
                    PairOutcome::Success => {
                        report.executed += 1;
                        false
                    }
                    PairOutcome::Failed(message) => {
                        let slot_path = slots[repo_index].record.lock().unwrap().path.clone();
                        report.failures.push(PairFailure {
                            step: workflow.steps[step_index].name.clone(),
                            repository: slot_path,
                            message,
                        });
                        true
                    }
                    PairOutcome::Abandoned => {
                        report.abandoned += 1;
                        true
                    }
                };

                // Unblock dependents; descendants of a failed pair are
                // skipped for this repository only.
                let mut cascade = vec![(step_index, failed)];
                while let Some((done_step, bad)) = cascade.pop() {
                    for &dependent in &dependents[done_step] {
                        ancestor_bad[repo_index][dependent] |= bad;
                        deps_remaining[repo_index][dependent] -= 1;
                        if deps_remaining[repo_index][dependent] > 0 {
                            continue;
                        }
                        if ancestor_bad[repo_index][dependent] {
                            settled += 1;
                            report.skipped += 1;
                            self.emit_task_skip(&slots[repo_index], workflow, dependent);
                            cascade.push((dependent, true));
                        } else {
                            ready[repo_index].push(dependent);
                        }
                    }
                }

                if !self.cancel.is_cancelled() {
                    Self::dispatch_next(
                        workflow,
                        &pair_tx,
                        &mut ready[repo_index],
                        &mut busy[repo_index],
                        repo_index,
                        &mut in_flight,
                    );
                }
            }

            drop(pair_tx);
        });

        self.dispatcher.finish()?;
        Ok(report)
    }

    /// Dispatch the lowest-topo-order ready step for one repository, if the
    /// repository is idle. One pair per repository keeps worktree mutations
    /// strictly serialised.
    fn dispatch_next(
        workflow: &ResolvedWorkflow,
        pair_tx: &crossbeam_channel::Sender<(usize, usize)>,
        ready: &mut Vec<usize>,
        busy: &mut bool,
        repo_index: usize,
        in_flight: &mut usize,
    ) {
        if *busy || ready.is_empty() {
            return;
        }
        // Lowest topological position first for deterministic per-repo order
        let position = |step: usize| {
            workflow
                .topo_order
                .iter()
                .position(|&s| s == step)
                .unwrap_or(usize::MAX)
        };
        let best = ready
            .iter()
            .enumerate()
            .min_by_key(|&(_, &step)| position(step))
            .map(|(i, _)| i)
            .expect("ready is non-empty");
        let step_index = ready.remove(best);
        *busy = true;
        *in_flight += 1;
        let _ = pair_tx.send((step_index, repo_index));
    }

    fn execute_pair(
        &self,
        workflow: &ResolvedWorkflow,
        slot: &RepoSlot,
        locks: &DashMap<PathBuf, Arc<Mutex<()>>>,
        step_index: usize,
    ) -> PairOutcome {
        let step = &workflow.steps[step_index];

        let key = {
            let record = slot.record.lock().unwrap();
            dunce::canonicalize(&record.path).unwrap_or_else(|_| record.path.clone())
        };
        let lock = locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().unwrap();

        let started = Instant::now();
        let result = {
            let mut record = slot.record.lock().unwrap();
            let ctx = ExecutorContext {
                reporter: self.reporter,
                gate: self.gate,
                runtime: &self.runtime,
                cancel: &self.cancel,
                clock: self.clock,
            };
            template::render_options(&step.with, &record)
                .and_then(|options| self.dispatcher.execute(&ctx, step, &options, &mut record))
        };
        self.reporter
            .record_operation_duration(&step.action, started.elapsed());

        match result {
            Ok(()) => PairOutcome::Success,
            Err(err) => {
                let record = slot.record.lock().unwrap();
                self.reporter.report(
                    &Event::error(codes::TASK_FAIL)
                        .repo(record.identity(), &record.path)
                        .detail("step", &step.name)
                        .message(format!("{err:#}")),
                );
                PairOutcome::Failed(format!("{err:#}"))
            }
        }
    }

    fn emit_task_skip(&self, slot: &RepoSlot, workflow: &ResolvedWorkflow, step_index: usize) {
        let record = slot.record.lock().unwrap();
        self.reporter.report(
            &Event::warn(codes::TASK_SKIP)
                .repo(record.identity(), &record.path)
                .detail("step", &workflow.steps[step_index].name)
                .detail("reason", "ancestor_failed"),
        );
    }
}
