//! Scheduler — periodic driver of generated properties.
//!
//! ```text
//! IDLE ──start──▶ RUNNING ──stop──▶ STOPPING ──(tick done)──▶ STOPPED
//! ```
//!
//! Each tick enumerates every generated property, asks the
//! [`ValueGenerator`] for its next value and submits it as a generator-origin
//! command through the [`EventBridge`]. Properties run as independent tasks,
//! so one slow or failing property never holds back its siblings. A tick has
//! a soft deadline: properties not started by then are deferred, and the next
//! tick starts with them. Thermostat devices are evaluated once generation is
//! done.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use vconnector_domain::command::Command;
use vconnector_domain::device::ConnectionState;
use vconnector_domain::error::{ConnectorError, LifecycleError, UnknownPropertyError};
use vconnector_domain::key::PropertyKey;
use vconnector_domain::state_change::StateChange;

use crate::generator::ValueGenerator;
use crate::ports::EventPublisher;
use crate::services::event_bridge::EventBridge;
use crate::store::DeviceStateStore;
use crate::thermostat;

/// Lifecycle state of the [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Timing of the periodic driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Pause between the end of one tick and the start of the next.
    pub interval: Duration,
    /// Upper bound of a random delay added to each interval.
    pub jitter: Duration,
    /// Soft deadline for starting property updates within one tick.
    pub deadline: Duration,
    /// Property updates running at once within one tick.
    pub parallelism: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter: Duration::ZERO,
            deadline: Duration::from_secs(1),
            parallelism: 8,
        }
    }
}

impl SchedulerConfig {
    fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..=self.jitter);
        self.interval + jitter
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Generated values committed.
    pub committed: usize,
    /// Properties whose generation or commit failed.
    pub failed: usize,
    /// Properties not started before the deadline.
    pub deferred: usize,
    /// Thermostat devices that reported a configuration fault.
    pub faults: usize,
}

struct TickRunner<P> {
    bridge: Arc<EventBridge<P>>,
    generator: Arc<ValueGenerator>,
    deadline: Duration,
    parallelism: usize,
    cursor: Mutex<usize>,
}

/// Periodic driver of generated properties.
pub struct Scheduler<P> {
    runner: Arc<TickRunner<P>>,
    config: SchedulerConfig,
    state: watch::Sender<SchedulerState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P> Scheduler<P>
where
    P: EventPublisher + 'static,
{
    pub fn new(
        bridge: Arc<EventBridge<P>>,
        generator: Arc<ValueGenerator>,
        config: SchedulerConfig,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            runner: Arc::new(TickRunner {
                bridge,
                generator,
                deadline: config.deadline,
                parallelism: config.parallelism.max(1),
                cursor: Mutex::new(0),
            }),
            config,
            state,
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Start ticking. The first tick happens one interval from now.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyStarted`] unless the scheduler is idle.
    pub fn start(&self) -> Result<(), LifecycleError> {
        if !self.transition(SchedulerState::Idle, SchedulerState::Running) {
            return Err(LifecycleError::AlreadyStarted);
        }

        let runner = Arc::clone(&self.runner);
        let config = self.config.clone();
        let mut state = self.state.subscribe();

        let handle = tokio::spawn(async move {
            tracing::info!(interval = ?config.interval, "scheduler running");
            loop {
                tokio::select! {
                    biased;
                    _ = state.wait_for(|s| *s != SchedulerState::Running) => break,
                    () = tokio::time::sleep(config.next_delay()) => {}
                }
                if *state.borrow() != SchedulerState::Running {
                    break;
                }

                let report = runner.tick().await;
                tracing::debug!(
                    committed = report.committed,
                    failed = report.failed,
                    deferred = report.deferred,
                    faults = report.faults,
                    "tick finished"
                );
            }
        });

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stop ticking, letting an in-flight tick finish first.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] unless the scheduler is running.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        if !self.transition(SchedulerState::Running, SchedulerState::Stopping) {
            return Err(LifecycleError::NotRunning);
        }

        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "scheduler task failed");
            }
        }

        self.state.send_replace(SchedulerState::Stopped);
        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// Run one tick immediately, outside the timer.
    pub async fn tick(&self) -> TickReport {
        self.runner.tick().await
    }

    fn transition(&self, from: SchedulerState, to: SchedulerState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

impl<P> TickRunner<P>
where
    P: EventPublisher + 'static,
{
    fn store(&self) -> &Arc<DeviceStateStore> {
        self.bridge.processor().store()
    }

    async fn tick(self: &Arc<Self>) -> TickReport {
        let started = Instant::now();
        let mut keys = self.store().generated_properties();
        let total = keys.len();
        let offset = if total == 0 {
            0
        } else {
            *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) % total
        };
        keys.rotate_left(offset);

        let permits = Arc::new(Semaphore::new(self.parallelism));
        let mut updates = JoinSet::new();
        let mut launched = 0;

        for key in keys {
            let remaining = self.deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            let Ok(Ok(permit)) =
                tokio::time::timeout(remaining, Arc::clone(&permits).acquire_owned()).await
            else {
                break;
            };

            let runner = Arc::clone(self);
            updates.spawn(async move {
                let _permit = permit;
                match runner.update(&key).await {
                    Ok(_) => true,
                    Err(err) => {
                        tracing::warn!(property = %key, error = ?err, "generated update skipped");
                        false
                    }
                }
            });
            launched += 1;
        }

        let mut report = TickReport {
            deferred: total - launched,
            ..TickReport::default()
        };
        if total > 0 {
            *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = (offset + launched) % total;
        }
        if report.deferred > 0 {
            tracing::warn!(deferred = report.deferred, "tick deadline reached");
        }

        while let Some(result) = updates.join_next().await {
            match result {
                Ok(true) => report.committed += 1,
                Ok(false) => report.failed += 1,
                Err(err) => {
                    tracing::error!(error = %err, "generated update task failed");
                    report.failed += 1;
                }
            }
        }

        report.faults = self.control_thermostats().await;
        report
    }

    async fn update(&self, key: &PropertyKey) -> Result<StateChange, ConnectorError> {
        let snapshot = self
            .store()
            .snapshot(key)
            .ok_or_else(|| UnknownPropertyError { key: key.clone() })?;
        let Some(rule) = &snapshot.definition.generation else {
            return Err(UnknownPropertyError { key: key.clone() }.into());
        };

        let value = self
            .generator
            .next(rule, &snapshot.definition, snapshot.value.as_ref())?;
        self.bridge
            .submit(&Command::generated(key.clone(), value))
            .await
    }

    async fn control_thermostats(&self) -> usize {
        let store = self.store();
        let mut faults = 0;

        for device in store.device_keys() {
            let Some(snapshot) = store.describe(&device) else {
                continue;
            };
            if !thermostat::is_thermostat(&snapshot)
                || snapshot.connection == ConnectionState::Alert
            {
                continue;
            }
            let Some(outcome) = thermostat::evaluate(&snapshot) else {
                continue;
            };

            for (key, value) in outcome.writes {
                if let Err(err) = self.bridge.submit(&Command::generated(key.clone(), value)).await {
                    tracing::warn!(property = %key, error = ?err, "thermostat output rejected");
                }
            }

            if let Some(fault) = outcome.fault {
                faults += 1;
                tracing::warn!(device = %device, reason = fault.reason, "thermostat misconfigured");
                if let Some(change) = store.set_connection_state(&device, ConnectionState::Alert) {
                    self.bridge.publish_connection_change(&change).await;
                }
            }
        }

        faults
    }
}
