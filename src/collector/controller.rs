//! Lifecycle controller: periodic tick loop with idempotent stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use strum_macros::{AsRefStr, Display};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::collector::round::{Coordinator, RoundSummary};
use crate::collector::{CollectorError, FederationSource, QueryApi};
use crate::config::Config;
use crate::normalize::Normalizer;
use crate::sink::Sink;

/// Where the tick loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ControllerState {
    /// Constructed, or between rounds.
    Idle,
    /// Waiting for the next tick.
    AwaitingTick,
    /// A round is in flight.
    Collecting,
    /// The loop has exited.
    Stopped,
}

/// Drives collection rounds on a fixed period until stopped.
///
/// Rounds never overlap: the next tick is only awaited once the previous
/// round has joined. A round that overruns the period delays the schedule
/// rather than bunching up ticks.
pub struct Controller {
    coordinator: Coordinator,
    period: Duration,
    sink: Arc<dyn Sink>,
    shutdown: CancellationToken,
    running: AtomicBool,
    stopped: AtomicBool,
    state: watch::Sender<ControllerState>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("period", &self.period)
            .field("state", &self.state())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Create a controller around a prepared coordinator.
    ///
    /// # Errors
    /// Returns [`CollectorError::Config`] if `period` is zero.
    pub fn new(
        coordinator: Coordinator,
        period: Duration,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, CollectorError> {
        if period.is_zero() {
            return Err(CollectorError::Config("period must be non-zero".to_string()));
        }
        let (state, _) = watch::channel(ControllerState::Idle);
        Ok(Self {
            coordinator,
            period,
            sink,
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            state,
        })
    }

    /// Wire a controller from configuration.
    pub fn from_config(
        config: &Config,
        api: Arc<dyn QueryApi>,
        federation: Arc<dyn FederationSource>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, CollectorError> {
        let coordinator = Coordinator::new(
            config.queries.clone(),
            config.matchers.clone(),
            api,
            federation,
            Arc::clone(&sink),
            Normalizer::new(config.name.clone()),
        );
        Self::new(coordinator, config.period, sink)
    }

    /// Current loop state.
    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    /// Whether [`Controller::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Run rounds until [`Controller::stop`] is called.
    ///
    /// The first round starts one full period after the call. Returns once
    /// the loop has observed the stop; in-flight round tasks are abandoned
    /// and aborted rather than awaited.
    ///
    /// # Errors
    /// Returns [`CollectorError::Config`] if the loop is already running.
    pub async fn run(&self) -> Result<(), CollectorError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(CollectorError::Config(
                "controller is already running".to_string(),
            ));
        }

        tracing::info!(
            period = ?self.period,
            tasks = self.coordinator.task_count(),
            "Collector started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.set_state(ControllerState::AwaitingTick);
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.set_state(ControllerState::Collecting);
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Stop requested during round, abandoning in-flight tasks");
                    break;
                }
                summary = self.coordinator.run_round(&self.shutdown) => {
                    self.report(&summary);
                }
            }
            self.set_state(ControllerState::Idle);
        }

        self.set_state(ControllerState::Stopped);
        tracing::info!(rounds = self.coordinator.rounds(), "Collector stopped");
        Ok(())
    }

    /// Stop the loop and close the sink.
    ///
    /// Safe to call any number of times from any task; only the first call
    /// has an effect.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!("Collector already stopping");
            return;
        }
        tracing::info!("Stopping collector");
        self.sink.close();
        self.shutdown.cancel();
    }

    fn set_state(&self, state: ControllerState) {
        self.state.send_replace(state);
    }

    fn report(&self, summary: &RoundSummary) {
        if summary.elapsed > self.period {
            tracing::warn!(
                round = summary.round,
                elapsed = ?summary.elapsed,
                period = ?self.period,
                "Round overran period, next tick delayed"
            );
        }
    }
}
