//! Fork/join evaluation over clones of a [`RuntimeEnv`].
//!
//! Each forked task runs against its own [`RuntimeEnv::fork`]; the forking
//! environment keeps a FIFO queue of [`PendingAction`]s that only it pops.
//! Results flow back through caller-owned buffers such as [`SlotBuffer`],
//! written at disjoint indices.

use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tracing::{debug, info, instrument, trace};

use crate::env::{resolve_runtime, Environment, RuntimeEnv};
use crate::error::{Error, EvalError};
use crate::Value;

/// How long a joining worker parks when it finds nothing to help with.
const HELP_PARK: Duration = Duration::from_millis(1);

/// Lifecycle of a scheduled unit of work.
///
/// `Pending -> Running -> {Completed | Failed}`, or `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ActionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Cancelled
        )
    }
}

struct ActionState {
    status: ActionStatus,
    failure: Option<EvalError>,
}

struct ActionCell {
    state: Mutex<ActionState>,
    done: Condvar,
}

/// Handle to a forked task.
#[derive(Clone)]
pub struct PendingAction {
    cell: Arc<ActionCell>,
}

impl PendingAction {
    fn new() -> Self {
        Self {
            cell: Arc::new(ActionCell {
                state: Mutex::new(ActionState {
                    status: ActionStatus::Pending,
                    failure: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// An action that is never scheduled.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::new()
    }

    fn lock(&self) -> MutexGuard<'_, ActionState> {
        self.cell
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn status(&self) -> ActionStatus {
        self.lock().status
    }

    /// Cancel the action if it has not started.
    ///
    /// Returns `false` when the action already started or finished; that is
    /// not an error, the action simply runs to completion.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if state.status != ActionStatus::Pending {
            return false;
        }
        state.status = ActionStatus::Cancelled;
        drop(state);
        self.cell.done.notify_all();
        true
    }

    fn start(&self) -> bool {
        let mut state = self.lock();
        if state.status != ActionStatus::Pending {
            return false;
        }
        state.status = ActionStatus::Running;
        true
    }

    fn finish(&self, result: Result<(), EvalError>) {
        let mut state = self.lock();
        match result {
            Ok(()) => state.status = ActionStatus::Completed,
            Err(err) => {
                state.status = ActionStatus::Failed;
                state.failure = Some(err);
            }
        }
        drop(state);
        self.cell.done.notify_all();
    }

    /// Block until the action is finished or cancelled.
    ///
    /// A pool worker that joins keeps executing other queued work from its
    /// pool while it waits, so nested forks cannot starve the pool.
    ///
    /// # Errors
    ///
    /// The task's own error if it failed. A cancelled action joins as `Ok`.
    pub fn join(&self) -> Result<(), EvalError> {
        let helping = rayon::current_thread_index().is_some();
        let mut state = self.lock();
        while !state.status.is_terminal() {
            if helping {
                drop(state);
                if !matches!(rayon::yield_now(), Some(rayon::Yield::Executed)) {
                    let guard = self.lock();
                    if !guard.status.is_terminal() {
                        let _ = self
                            .cell
                            .done
                            .wait_timeout(guard, HELP_PARK)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                }
                state = self.lock();
            } else {
                state = self
                    .cell
                    .done
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        // Kept for later joins through any clone of the handle.
        match &state.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAction")
            .field("status", &self.status())
            .finish()
    }
}

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServiceConfig {
    /// Worker count; `None` uses the available hardware parallelism.
    pub threads: Option<usize>,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            threads: None,
            thread_name: "rule-worker".to_owned(),
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn resolved_threads(&self) -> usize {
        self.threads.filter(|&n| n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        })
    }
}

/// Builder for an [`ExecutionService`].
#[derive(Debug, Default)]
pub struct ServiceBuilder {
    config: ServiceConfig,
}

impl ServiceBuilder {
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = Some(threads);
        self
    }

    #[must_use]
    pub fn thread_name(mut self, name: &str) -> Self {
        name.clone_into(&mut self.config.thread_name);
        self
    }

    /// # Errors
    ///
    /// [`Error::ThreadPool`] if the worker threads cannot be spawned.
    pub fn build(self) -> Result<ExecutionService, Error> {
        ExecutionService::with_config(self.config)
    }
}

/// Counters describing how forks were scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceStats {
    /// Forks made from inside a worker, pushed onto that worker's own deque.
    pub inline_forks: usize,
    /// Forks submitted from outside the pool.
    pub submitted: usize,
}

/// Fixed-size work-stealing pool that runs forked tasks against clones of
/// the forking environment.
///
/// Owned by the host and attached to environments with
/// [`RuntimeEnv::with_service`]; several services can coexist in a process.
pub struct ExecutionService {
    pool: rayon::ThreadPool,
    config: ServiceConfig,
    inline_forks: AtomicUsize,
    submitted: AtomicUsize,
}

impl ExecutionService {
    #[must_use]
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    /// A service sized to the available hardware parallelism.
    ///
    /// # Errors
    ///
    /// [`Error::ThreadPool`] if the worker threads cannot be spawned.
    pub fn new() -> Result<Self, Error> {
        Self::with_config(ServiceConfig::default())
    }

    /// # Errors
    ///
    /// [`Error::ThreadPool`] if the worker threads cannot be spawned.
    pub fn with_config(config: ServiceConfig) -> Result<Self, Error> {
        let threads = config.resolved_threads();
        let prefix = config.thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()?;
        info!(threads, name = %config.thread_name, "execution service started");
        Ok(Self {
            pool,
            config,
            inline_forks: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            inline_forks: self.inline_forks.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
        }
    }

    /// Fork `task` against a clone of the concrete environment behind `env`
    /// and queue its handle on that environment.
    ///
    /// Called from one of this service's workers, the task is pushed onto the
    /// worker's local deque; otherwise it is injected into the pool.
    ///
    /// # Errors
    ///
    /// [`EvalError::EnvironmentDepth`] if `env` cannot be unwrapped.
    pub fn execute<F>(&self, env: &mut dyn Environment, task: F) -> Result<PendingAction, EvalError>
    where
        F: FnOnce(&mut RuntimeEnv) -> Result<(), EvalError> + Send + 'static,
    {
        let runtime = resolve_runtime(env)?;
        let forked = runtime.fork();
        let action = PendingAction::new();
        runtime.push_action(action.clone());

        let handle = action.clone();
        let job = move || run_forked(&handle, forked, task);
        if self.pool.current_thread_index().is_some() {
            self.inline_forks.fetch_add(1, Ordering::Relaxed);
            trace!("forking inline on worker");
            rayon::spawn(job);
        } else {
            self.submitted.fetch_add(1, Ordering::Relaxed);
            trace!("submitting fork to pool");
            self.pool.spawn(job);
        }
        Ok(action)
    }

    /// Wait for every action queued on `env`, in fork order.
    ///
    /// On the first failure, every remaining not-yet-started action is
    /// cancelled and the failure is returned. Started siblings are left to
    /// finish on their own.
    ///
    /// # Errors
    ///
    /// [`EvalError::TaskFailed`] wrapping the first failure observed.
    #[instrument(skip_all)]
    pub fn join(&self, env: &mut dyn Environment) -> Result<(), EvalError> {
        let runtime = resolve_runtime(env)?;
        join_actions(runtime)
    }
}

impl fmt::Debug for ExecutionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionService")
            .field("threads", &self.threads())
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

pub(crate) fn join_actions(runtime: &mut RuntimeEnv) -> Result<(), EvalError> {
    while let Some(action) = runtime.pop_action() {
        if let Err(cause) = action.join() {
            let cancelled = runtime.drain_actions().filter(PendingAction::cancel).count();
            debug!(cancelled, error = %cause, "forked task failed");
            return Err(EvalError::task_failed(cause));
        }
    }
    Ok(())
}

fn run_forked<F>(action: &PendingAction, mut env: RuntimeEnv, task: F)
where
    F: FnOnce(&mut RuntimeEnv) -> Result<(), EvalError>,
{
    if !action.start() {
        trace!("skipping cancelled action");
        return;
    }
    let result = match panic::catch_unwind(AssertUnwindSafe(|| task(&mut env))) {
        Ok(result) => result,
        Err(payload) => Err(EvalError::TaskPanicked {
            message: panic_message(payload.as_ref()),
        }),
    };
    // Forks the task made itself and left unjoined are joined before it
    // counts as finished. On failure, those not yet started are cancelled.
    let result = match result {
        Ok(()) => join_actions(&mut env),
        Err(err) => {
            let cancelled = env.drain_actions().filter(PendingAction::cancel).count();
            if cancelled > 0 {
                debug!(cancelled, error = %err, "forked task failed with pending children");
            }
            Err(err)
        }
    };
    action.finish(result);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Pre-sized output buffer of set-once slots.
///
/// Sibling tasks may write concurrently as long as each writes its own index.
#[derive(Debug)]
pub struct SlotBuffer {
    slots: Box<[OnceLock<Value>]>,
}

impl SlotBuffer {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Write slot `index`. Returns `false` if it is out of range or was
    /// already written; the first write wins.
    pub fn set(&self, index: usize, value: Value) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.set(value).is_ok())
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index).and_then(OnceLock::get)
    }

    /// Current contents, with unwritten slots as [`Value::Null`].
    #[must_use]
    pub fn snapshot(&self) -> Vec<Value> {
        self.slots
            .iter()
            .map(|slot| slot.get().cloned().unwrap_or_default())
            .collect()
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.slots
            .into_vec()
            .into_iter()
            .map(|slot| slot.into_inner().unwrap_or_default())
            .collect()
    }
}
