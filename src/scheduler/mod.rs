//! Keyed registry of recurring tasks.
//!
//! Each task runs on its own tokio task driven by an interval. A tick first
//! tries to take the task's busy flag; if the previous invocation is still
//! in flight the tick is dropped, never queued. Registering under a key that
//! is already active cancels the old task first, so at most one task exists
//! per key.
//!
//! Cancellation stops future ticks immediately but cannot abort a request
//! already on the wire. Actions receive their own [`TaskHandle`] and must
//! check [`TaskHandle::is_active`] before applying a result.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Smallest cadence accepted; tokio intervals reject a zero period.
const MIN_CADENCE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    ResourceRefresh,
    EnvironmentList,
    NamespaceWatch,
    Named(String),
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKey::ResourceRefresh => write!(f, "resource-refresh"),
            TaskKey::EnvironmentList => write!(f, "environment-list"),
            TaskKey::NamespaceWatch => write!(f, "namespace-watch"),
            TaskKey::Named(name) => write!(f, "{}", name),
        }
    }
}

type TaskAction = Arc<dyn Fn(TaskHandle) -> BoxFuture<'static, ()> + Send + Sync>;

/// Identity of one registration. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    key: TaskKey,
    generation: u64,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once cancelled, superseded, or reset.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

struct TaskEntry {
    generation: u64,
    cadence: Duration,
    token: CancellationToken,
    busy: Arc<AtomicBool>,
}

/// Holds a task's busy flag for as long as it lives.
struct BusyGuard {
    flag: Arc<AtomicBool>,
}

impl BusyGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct PollingScheduler {
    registry: Mutex<HashMap<TaskKey, TaskEntry>>,
    next_generation: AtomicU64,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Registers `action` to run every `cadence`, first tick one cadence
    /// from now. Supersedes any task already registered under `key`.
    pub fn schedule<F, Fut>(&self, key: TaskKey, cadence: Duration, action: F) -> TaskHandle
    where
        F: Fn(TaskHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cadence = cadence.max(MIN_CADENCE);
        let action: TaskAction = Arc::new(move |handle| action(handle).boxed());

        let handle = TaskHandle {
            key: key.clone(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        };
        let busy = Arc::new(AtomicBool::new(false));

        {
            let mut registry = self.registry();
            if let Some(previous) = registry.remove(&key) {
                previous.token.cancel();
                debug!(task = %key, generation = previous.generation, "superseded recurring task");
            }
            registry.insert(
                key.clone(),
                TaskEntry {
                    generation: handle.generation,
                    cadence,
                    token: handle.token.clone(),
                    busy: busy.clone(),
                },
            );
        }

        debug!(task = %key, generation = handle.generation, cadence_ms = cadence.as_millis() as u64, "scheduled recurring task");
        tokio::spawn(run_ticks(handle.clone(), cadence, busy, action));
        handle
    }

    /// Stops future ticks of `handle`. Safe to repeat, and safe to call
    /// from inside the task's own action.
    pub fn cancel(&self, handle: &TaskHandle) {
        handle.token.cancel();
        let mut registry = self.registry();
        let current = registry.get(&handle.key).map(|entry| entry.generation);
        if current == Some(handle.generation) {
            registry.remove(&handle.key);
            debug!(task = %handle.key, generation = handle.generation, "cancelled recurring task");
        }
    }

    /// Cancels whatever is registered under `key`. Returns whether anything was.
    pub fn cancel_key(&self, key: &TaskKey) -> bool {
        match self.registry().remove(key) {
            Some(entry) => {
                entry.token.cancel();
                debug!(task = %key, generation = entry.generation, "cancelled recurring task");
                true
            }
            None => false,
        }
    }

    /// Runs `action` once, sharing the busy flag of the task under `key`
    /// when one is registered. Returns `None` if that task was mid-flight.
    pub async fn run_once<Fut, T>(&self, key: &TaskKey, action: Fut) -> Option<T>
    where
        Fut: Future<Output = T>,
    {
        let busy = self.registry().get(key).map(|entry| entry.busy.clone());
        let _guard = match busy {
            Some(flag) => match BusyGuard::try_acquire(&flag) {
                Some(guard) => Some(guard),
                None => {
                    debug!(task = %key, "manual run skipped, task already in flight");
                    return None;
                }
            },
            None => None,
        };
        Some(action.await)
    }

    /// Cancels and forgets every registered task.
    pub fn reset_all(&self) -> usize {
        let drained: Vec<(TaskKey, TaskEntry)> = self.registry().drain().collect();
        for (key, entry) in &drained {
            entry.token.cancel();
            debug!(task = %key, generation = entry.generation, "reset recurring task");
        }
        drained.len()
    }

    pub fn is_scheduled(&self, key: &TaskKey) -> bool {
        self.registry().contains_key(key)
    }

    pub fn cadence(&self, key: &TaskKey) -> Option<Duration> {
        self.registry().get(key).map(|entry| entry.cadence)
    }

    pub fn active_count(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<TaskKey, TaskEntry>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PollingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.reset_all();
    }
}

async fn run_ticks(handle: TaskHandle, cadence: Duration, busy: Arc<AtomicBool>, action: TaskAction) {
    let mut ticker = interval_at(Instant::now() + cadence, cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = handle.token.cancelled() => {
                trace!(task = %handle.key, generation = handle.generation, "tick loop stopped");
                break;
            }
            _ = ticker.tick() => {
                let Some(guard) = BusyGuard::try_acquire(&busy) else {
                    debug!(task = %handle.key, "tick skipped, previous run still in flight");
                    continue;
                };
                let run = action(handle.clone());
                tokio::spawn(async move {
                    let _guard = guard;
                    run.await;
                });
            }
        }
    }
}
