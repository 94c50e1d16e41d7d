//! Scheduler - 名前付きトリガーのレジストリとループ
//!
//! One loop task per scheduler. Due triggers fire sequentially; each body runs
//! in its own tokio task so a panic is contained to that firing.
//!
//! Lifecycle per trigger: `Registered -> Running -> Stopped`. Registering an
//! existing name replaces the previous trigger; the old one never fires again
//! even if it is mid-execution when replaced.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::SchedulerError;
use crate::ports::Clock;

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

#[derive(Debug, Clone)]
pub enum Schedule {
    /// Every `d`, first firing one interval after start/registration.
    Interval(Duration),
    /// Once at the given wall-clock time, then removed.
    Once(DateTime<Utc>),
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Parse a cron expression (seconds field included, e.g. `0 */5 * * * *`).
    pub fn cron(expr: &str) -> Result<Self, SchedulerError> {
        cron::Schedule::from_str(expr)
            .map(|s| Schedule::Cron(Box::new(s)))
            .map_err(|source| SchedulerError::InvalidCron {
                expr: expr.to_string(),
                source,
            })
    }

    /// Monotonic instant of the next firing after `now`.
    fn next_fire(&self, now: Instant, clock: &dyn Clock) -> Option<Instant> {
        let until = |at: DateTime<Utc>| {
            let wait = (at - clock.now()).to_std().unwrap_or(Duration::ZERO);
            now + wait
        };
        match self {
            Schedule::Interval(d) => Some(now + *d),
            Schedule::Once(at) => Some(until(*at)),
            Schedule::Cron(s) => s.after(&clock.now()).next().map(until),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Registered,
    Running,
    Stopped,
}

/// Named unit of scheduled work.
#[derive(Clone)]
pub struct Trigger {
    name: String,
    schedule: Schedule,
    task: TaskFn,
    enabled: bool,
}

impl Trigger {
    pub fn new<F, Fut>(name: impl Into<String>, schedule: Schedule, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule,
            task: Arc::new(move || -> TaskFuture { Box::pin(f()) }),
            enabled: true,
        }
    }

    /// Registered but not firing until `set_enabled(name, true)`.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

struct Slot {
    trigger: Trigger,
    state: TriggerState,
    next_fire: Option<Instant>,
    /// Bumped on every (re)registration; a firing only reschedules its own generation.
    generation: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    running: bool,
    next_generation: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    notify: Notify,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Collect due, enabled triggers and clear their next firing.
    fn take_due(&self, now: Instant) -> Vec<(String, u64, TaskFn)> {
        let mut inner = self.lock();
        let mut due: Vec<(Instant, String, u64, TaskFn)> = inner
            .slots
            .values_mut()
            .filter(|s| s.trigger.enabled)
            .filter_map(|s| {
                let at = s.next_fire.filter(|at| *at <= now)?;
                s.next_fire = None;
                Some((at, s.trigger.name.clone(), s.generation, Arc::clone(&s.trigger.task)))
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        due.into_iter().map(|(_, n, g, t)| (n, g, t)).collect()
    }

    fn earliest(&self) -> Option<Instant> {
        self.lock()
            .slots
            .values()
            .filter(|s| s.trigger.enabled)
            .filter_map(|s| s.next_fire)
            .min()
    }

    fn reschedule(&self, name: &str, generation: u64) {
        let mut inner = self.lock();
        let running = inner.running;
        let Some(slot) = inner.slots.get_mut(name) else {
            return;
        };
        if slot.generation != generation {
            // replaced while firing
            return;
        }
        if matches!(slot.trigger.schedule, Schedule::Once(_)) {
            inner.slots.remove(name);
            debug!(trigger = name, "one-shot trigger removed");
            return;
        }
        if running {
            slot.next_fire = slot
                .trigger
                .schedule
                .next_fire(Instant::now(), self.clock.as_ref());
        }
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Process-wide trigger registry. Construct once and pass it to whoever owns
/// its lifecycle.
pub struct Scheduler {
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                notify: Notify::new(),
                clock,
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Add a trigger, replacing any trigger with the same name.
    pub fn register(&self, trigger: Trigger) -> Result<(), SchedulerError> {
        if let Schedule::Interval(d) = trigger.schedule {
            if d.is_zero() {
                return Err(SchedulerError::InvalidInterval(trigger.name));
            }
        }

        let mut inner = self.shared.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;
        let running = inner.running;

        let next_fire = if running {
            trigger
                .schedule
                .next_fire(Instant::now(), self.shared.clock.as_ref())
        } else {
            None
        };
        let name = trigger.name.clone();
        let replaced = inner.slots.insert(
            name.clone(),
            Slot {
                trigger,
                state: if running {
                    TriggerState::Running
                } else {
                    TriggerState::Registered
                },
                next_fire,
                generation,
            },
        );
        drop(inner);

        if replaced.is_some() {
            info!(trigger = %name, "trigger replaced");
        } else {
            debug!(trigger = %name, "trigger registered");
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn schedule_once<F, Fut>(
        &self,
        name: impl Into<String>,
        at: DateTime<Utc>,
        f: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Trigger::new(name, Schedule::Once(at), f))
    }

    pub fn schedule_interval<F, Fut>(
        &self,
        name: impl Into<String>,
        every: Duration,
        f: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Trigger::new(name, Schedule::Interval(every), f))
    }

    pub fn schedule_cron<F, Fut>(
        &self,
        name: impl Into<String>,
        expr: &str,
        f: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Trigger::new(name, Schedule::cron(expr)?, f))
    }

    /// Returns whether a trigger was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.shared.lock().slots.remove(name).is_some();
        if removed {
            debug!(trigger = name, "trigger unregistered");
            self.shared.notify.notify_one();
        }
        removed
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut inner = self.shared.lock();
        let running = inner.running;
        let slot = inner
            .slots
            .get_mut(name)
            .ok_or_else(|| SchedulerError::UnknownTrigger(name.to_string()))?;
        slot.trigger.enabled = enabled;
        if enabled && running && slot.next_fire.is_none() {
            slot.next_fire = slot
                .trigger
                .schedule
                .next_fire(Instant::now(), self.shared.clock.as_ref());
        }
        drop(inner);
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn trigger_state(&self, name: &str) -> Option<TriggerState> {
        self.shared.lock().slots.get(name).map(|s| s.state)
    }

    /// Sorted.
    pub fn trigger_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.lock().slots.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Activate every registered trigger. No-op when already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("scheduler already running");
            return;
        }

        {
            let mut inner = self.shared.lock();
            inner.running = true;
            let now = Instant::now();
            for slot in inner.slots.values_mut() {
                slot.state = TriggerState::Running;
                slot.next_fire = slot.trigger.schedule.next_fire(now, self.shared.clock.as_ref());
            }
            info!(triggers = inner.slots.len(), "scheduler started");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run_loop(Arc::clone(&self.shared), shutdown_rx));
        *running = Some(Running { shutdown_tx, join });
    }

    /// Stop firing and wait for the trigger body in progress, if any.
    pub async fn stop(&self) {
        let Some(Running { shutdown_tx, join }) = self.running.lock().await.take() else {
            return;
        };
        // the loop may already have exited
        let _ = shutdown_tx.send(true);
        if let Err(e) = join.await {
            error!(error = %e, "scheduler loop failed");
        }

        let mut inner = self.shared.lock();
        inner.running = false;
        for slot in inner.slots.values_mut() {
            slot.state = TriggerState::Stopped;
            slot.next_fire = None;
        }
        info!("scheduler stopped");
    }
}

async fn run_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let due = shared.take_due(Instant::now());
        if !due.is_empty() {
            for (name, generation, task) in due {
                if *shutdown_rx.borrow() {
                    break;
                }
                debug!(trigger = %name, "trigger firing");
                if let Err(e) = tokio::spawn(task()).await {
                    error!(trigger = %name, error = %e, "trigger body panicked");
                }
                shared.reschedule(&name, generation);
            }
            continue;
        }

        let next = shared.earliest();
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shared.notify.notified() => {}
            _ = async {
                match next {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            } => {}
        }
    }
    debug!("scheduler loop exited");
}
