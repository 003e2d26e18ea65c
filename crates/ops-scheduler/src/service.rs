//! Timer driver
//!
//! Owns one periodic timer per task. Each tick runs in its own spawned task so
//! an error or a panic is caught at the tick boundary and the timer keeps
//! going. Ticks of one task never overlap; a slow tick delays only its own
//! timer.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ops_notify::NotificationDispatcher;
use ops_store::SessionFactory;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::escalation::{EscalationChecker, EscalationPolicy};
use crate::heartbeat::AuditHeartbeat;
use crate::reminder::{ReminderTemplate, UnblockReminder};
use crate::{SchedulerError, TaskSchedule, TimerConfig, TimerTask};

/// Per-task statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub name: String,
    pub enabled: bool,
    pub interval_secs: u64,
    pub runs: u64,
    pub failures: u64,
    pub last_started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_summary: Option<String>,
}

impl TaskStatus {
    fn new(name: &str, schedule: TaskSchedule) -> Self {
        Self {
            name: name.to_string(),
            enabled: schedule.enabled,
            interval_secs: schedule.interval.as_secs(),
            runs: 0,
            failures: 0,
            last_started: None,
            last_finished: None,
            last_error: None,
            last_summary: None,
        }
    }
}

struct TimerSlot {
    task: Arc<dyn TimerTask>,
    schedule: TaskSchedule,
    status: Arc<Mutex<TaskStatus>>,
}

pub struct EscalationTimerService {
    enabled: bool,
    shutdown_grace: Duration,
    slots: Vec<TimerSlot>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EscalationTimerService {
    /// Wire the heartbeat, escalation and reminder tasks from `config`
    pub fn new(
        config: TimerConfig,
        factory: Arc<dyn SessionFactory>,
        dispatcher: NotificationDispatcher,
    ) -> crate::Result<Self> {
        let policy = EscalationPolicy::new(config.return_after)?;
        let heartbeat = AuditHeartbeat::new(factory.clone(), config.system_user_id.clone());
        let escalation = EscalationChecker::new(factory.clone(), policy);
        let reminder = UnblockReminder::new(
            factory,
            dispatcher,
            ReminderTemplate::new(config.locale, config.link_template.clone()),
        );

        let tasks: Vec<(Arc<dyn TimerTask>, TaskSchedule)> = vec![
            (Arc::new(heartbeat), config.heartbeat),
            (Arc::new(escalation), config.escalation),
            (Arc::new(reminder), config.reminder),
        ];
        Ok(Self::with_tasks(&config, tasks))
    }

    /// Drive an arbitrary set of tasks; `config` supplies the global switch and grace period
    pub fn with_tasks(
        config: &TimerConfig,
        tasks: Vec<(Arc<dyn TimerTask>, TaskSchedule)>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let slots = tasks
            .into_iter()
            .map(|(task, schedule)| TimerSlot {
                status: Arc::new(Mutex::new(TaskStatus::new(task.name(), schedule))),
                task,
                schedule,
            })
            .collect();

        Self {
            enabled: config.enabled,
            shutdown_grace: config.shutdown_grace,
            slots,
            running: AtomicBool::new(false),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self) {
        if !self.enabled {
            info!("Escalation timer service is disabled");
            return;
        }

        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Escalation timer service already running");
            return;
        }

        let mut handles = self.handles.lock();
        for slot in &self.slots {
            let name = slot.task.name();
            if !slot.schedule.enabled {
                info!(task = name, "Timer disabled");
                continue;
            }
            if slot.schedule.interval.is_zero() {
                warn!(task = name, "Timer has a zero interval, not starting");
                continue;
            }

            let task = slot.task.clone();
            let status = slot.status.clone();
            let interval = slot.schedule.interval;
            let shutdown_rx = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(run_timer(task, interval, status, shutdown_rx)));
            info!(task = name, interval_secs = interval.as_secs(), "Timer started");
        }

        metrics::gauge!("scheduler.running").set(1.0);
        info!(timers = handles.len(), "Escalation timer service started");
    }

    /// Signal every timer and wait for it to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Escalation timer service not running");
            return;
        }

        info!("Stopping escalation timer service");
        let _ = self.shutdown_tx.send(());

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.shutdown_grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Timer exited abnormally"),
                Err(_) => {
                    warn!(
                        grace_secs = self.shutdown_grace.as_secs(),
                        "Timer did not stop in time, aborting"
                    );
                    abort.abort();
                }
            }
        }

        metrics::gauge!("scheduler.running").set(0.0);
        info!("Escalation timer service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Vec<TaskStatus> {
        self.slots.iter().map(|slot| slot.status.lock().clone()).collect()
    }
}

async fn run_timer(
    task: Arc<dyn TimerTask>,
    interval: Duration,
    status: Arc<Mutex<TaskStatus>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    // first tick completes immediately
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // shutdown wins over a tick that became due while the last one ran
            biased;

            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                if !matches!(shutdown_rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)) {
                    break;
                }
                run_tick(&task, &status).await;
            }
        }
    }

    info!(task = task.name(), "Timer shutting down");
}

async fn run_tick(task: &Arc<dyn TimerTask>, status: &Mutex<TaskStatus>) {
    let name = task.name();
    let now = Utc::now();
    let span = info_span!("timer_tick", task = name, tick_id = %Uuid::new_v4());

    status.lock().last_started = Some(now);
    metrics::counter!("scheduler.ticks_total", "task" => name).increment(1);
    let started = Instant::now();

    let worker = task.clone();
    let handle = tokio::spawn(async move { worker.tick(now).await }.instrument(span.clone()));
    let outcome = match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(SchedulerError::TickAborted(panic_message(e.into_panic()))),
        Err(e) => Err(SchedulerError::TickAborted(e.to_string())),
    };

    metrics::histogram!("scheduler.tick_duration_seconds", "task" => name)
        .record(started.elapsed().as_secs_f64());

    let mut status = status.lock();
    status.runs += 1;
    status.last_finished = Some(Utc::now());
    match outcome {
        Ok(summary) => {
            span.in_scope(|| info!(%summary, "Tick completed"));
            status.last_summary = Some(summary);
            status.last_error = None;
        }
        Err(e) => {
            span.in_scope(|| error!(error = %e, "Tick failed"));
            metrics::counter!("scheduler.tick_failures_total", "task" => name).increment(1);
            status.failures += 1;
            status.last_error = Some(e.to_string());
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
