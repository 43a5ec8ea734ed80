//! Degradation controller.
//!
//! # State Machine
//!
//! ```text
//! any --[event(level), sequence > last]--> level
//! any --[event, sequence <= last]--> unchanged (stale)
//! Critical --[cooldown elapsed]--> Elevated --[cooldown elapsed]--> Normal
//! ```
//!
//! # Thread Safety
//!
//! The current [`DegradationState`] is an immutable value behind an
//! `ArcSwap`, so readers on the request path never lock. Writers are
//! serialized by a mutex so the stale-event check and the swap are atomic
//! with respect to each other.
//!
//! # Sequencing
//!
//! The controller owns the sequence counter. [`on_pressure_change`] and
//! every [`PressureSender`] draw from it, so events from both paths are
//! ordered by when they were issued. Events applied with an external
//! sequence advance the counter past it.
//!
//! [`on_pressure_change`]: DegradationController::on_pressure_change
//! [`PressureSender`]: super::PressureSender

use super::{DegradationConfig, PressureEvent, PressureLevel, RecoveryPolicy};
use crate::request::Priority;
use crate::telemetry::TelemetryRecorder;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Smallest interval between recovery checks.
const MIN_RECOVERY_TICK: Duration = Duration::from_millis(10);

/// Immutable snapshot of the degradation state.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradationState {
    pub level: PressureLevel,
    pub concurrency_limit: usize,
    pub caching_enabled: bool,
    pub cache_budget_percent: u8,
    /// Sequence of the last applied event (0 before any event).
    pub last_event_sequence: u64,
    /// When the current level was entered.
    pub entered_at: Instant,
    /// When the last non-stale event arrived.
    pub last_event_at: Instant,
}

impl DegradationState {
    fn for_level(config: &DegradationConfig, level: PressureLevel, now: Instant) -> Self {
        let (concurrency_limit, caching_enabled, cache_budget_percent) = match level {
            PressureLevel::Normal => (config.base_limit, true, 100),
            PressureLevel::Elevated => {
                (config.elevated_limit(), true, config.elevated_cache_percent)
            }
            PressureLevel::Critical => (config.critical_limit.min(config.base_limit), false, 0),
        };

        Self {
            level,
            concurrency_limit,
            caching_enabled,
            cache_budget_percent,
            last_event_sequence: 0,
            entered_at: now,
            last_event_at: now,
        }
    }

    /// Whether submissions at this priority are admitted.
    pub fn accepts(&self, priority: Priority) -> bool {
        self.level != PressureLevel::Critical || priority == Priority::Interactive
    }
}

/// Maps platform pressure onto concurrency, caching and admission limits.
pub struct DegradationController {
    config: DegradationConfig,
    state: ArcSwap<DegradationState>,
    /// Serializes writers; readers go through `state` only
    write_lock: Mutex<()>,
    level_tx: watch::Sender<PressureLevel>,
    /// Last sequence handed out, shared with channel senders
    pub(super) sequence: Arc<AtomicU64>,
    telemetry: Option<Arc<TelemetryRecorder>>,
}

impl DegradationController {
    /// Creates a controller at Normal pressure.
    pub fn new(config: DegradationConfig) -> Self {
        let state = DegradationState::for_level(&config, PressureLevel::Normal, Instant::now());
        let (level_tx, _) = watch::channel(PressureLevel::Normal);
        Self {
            config,
            state: ArcSwap::from_pointee(state),
            write_lock: Mutex::new(()),
            level_tx,
            sequence: Arc::new(AtomicU64::new(0)),
            telemetry: None,
        }
    }

    /// Mirrors level transitions into the recorder's gauges.
    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryRecorder>) -> Self {
        let state = self.state.load();
        telemetry.record_pressure(state.level, state.concurrency_limit);
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(&self) -> &DegradationConfig {
        &self.config
    }

    /// Returns the current state.
    pub fn state(&self) -> Arc<DegradationState> {
        self.state.load_full()
    }

    pub fn level(&self) -> PressureLevel {
        self.state.load().level
    }

    /// Worker slots available to newly dispatched tasks.
    pub fn current_limit(&self) -> usize {
        self.state.load().concurrency_limit
    }

    /// Whether submissions at this priority are admitted.
    pub fn should_accept_priority(&self, priority: Priority) -> bool {
        self.state.load().accepts(priority)
    }

    /// Whether cache writes are allowed.
    pub fn caching_enabled(&self) -> bool {
        self.state.load().caching_enabled
    }

    /// Share of the cache budget currently usable (0 - 100).
    pub fn cache_budget_percent(&self) -> u8 {
        self.state.load().cache_budget_percent
    }

    /// Receiver that observes every level transition.
    pub fn subscribe(&self) -> watch::Receiver<PressureLevel> {
        self.level_tx.subscribe()
    }

    /// Applies a pressure event.
    ///
    /// Returns false if the event is stale and was ignored. An event at the
    /// current level is applied without a transition and restarts the
    /// recovery cooldown.
    pub fn apply(&self, event: PressureEvent) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.state.load_full();

        if event.sequence <= current.last_event_sequence {
            debug!(
                level = %event.level,
                sequence = event.sequence,
                last_sequence = current.last_event_sequence,
                "Ignoring stale pressure event"
            );
            return false;
        }

        self.sequence.fetch_max(event.sequence, Ordering::AcqRel);
        self.apply_locked(&current, event.level, event.sequence);
        true
    }

    /// Applies a level change stamped with the next sequence number.
    ///
    /// Channel events issued before this call become stale; events issued
    /// after it are applied.
    pub fn on_pressure_change(&self, level: PressureLevel) {
        let _guard = self.write_lock.lock();
        let current = self.state.load_full();
        self.sequence
            .fetch_max(current.last_event_sequence, Ordering::AcqRel);
        let sequence = self.next_sequence();
        self.apply_locked(&current, level, sequence);
    }

    /// Hands out the next event sequence.
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn apply_locked(&self, current: &DegradationState, level: PressureLevel, sequence: u64) {
        let now = Instant::now();

        if level == current.level {
            self.state.store(Arc::new(DegradationState {
                last_event_sequence: sequence,
                last_event_at: now,
                ..current.clone()
            }));
            return;
        }

        let mut next = DegradationState::for_level(&self.config, level, now);
        next.last_event_sequence = sequence;
        self.transition(current, next, "pressure event");
    }

    /// Steps down one level if the cooldown has elapsed.
    ///
    /// Returns true if the level changed. Always false under
    /// [`RecoveryPolicy::Explicit`].
    pub fn maybe_recover(&self) -> bool {
        let RecoveryPolicy::Cooldown(cooldown) = self.config.recovery else {
            return false;
        };

        let _guard = self.write_lock.lock();
        let current = self.state.load_full();
        let Some(lower) = current.level.step_down() else {
            return false;
        };

        let quiet_since = current.entered_at.max(current.last_event_at);
        if quiet_since.elapsed() < cooldown {
            return false;
        }

        let mut next = DegradationState::for_level(&self.config, lower, Instant::now());
        next.last_event_sequence = current.last_event_sequence;
        next.last_event_at = current.last_event_at;
        self.transition(&current, next, "cooldown");
        true
    }

    fn transition(&self, current: &DegradationState, next: DegradationState, cause: &str) {
        info!(
            from = %current.level,
            to = %next.level,
            concurrency_limit = next.concurrency_limit,
            caching = next.caching_enabled,
            cache_budget_percent = next.cache_budget_percent,
            cause,
            "Pressure level changed"
        );

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_pressure(next.level, next.concurrency_limit);
        }

        let level = next.level;
        self.state.store(Arc::new(next));
        self.level_tx.send_replace(level);
    }

    /// Runs cooldown recovery until shutdown is signalled.
    ///
    /// Returns immediately under [`RecoveryPolicy::Explicit`].
    pub async fn run_recovery(self: Arc<Self>, shutdown: CancellationToken) {
        let RecoveryPolicy::Cooldown(cooldown) = self.config.recovery else {
            return;
        };

        let tick = (cooldown / 4).max(MIN_RECOVERY_TICK);
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = interval.tick() => {
                    self.maybe_recover();
                }
            }
        }
    }
}

impl std::fmt::Debug for DegradationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationController")
            .field("config", &self.config)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> DegradationController {
        DegradationController::new(DegradationConfig::new(8))
    }

    #[test]
    fn test_starts_normal() {
        let controller = controller();
        assert_eq!(controller.level(), PressureLevel::Normal);
        assert_eq!(controller.current_limit(), 8);
        assert!(controller.caching_enabled());
        assert_eq!(controller.cache_budget_percent(), 100);
        for priority in Priority::ALL {
            assert!(controller.should_accept_priority(priority));
        }
    }

    #[test]
    fn test_elevated_limits() {
        let controller = controller();
        controller.on_pressure_change(PressureLevel::Elevated);

        assert_eq!(controller.current_limit(), 4);
        assert!(controller.caching_enabled());
        assert_eq!(controller.cache_budget_percent(), 50);
        assert!(controller.should_accept_priority(Priority::Prefetch));
    }

    #[test]
    fn test_critical_limits() {
        let controller = controller();
        controller.on_pressure_change(PressureLevel::Critical);

        assert_eq!(controller.current_limit(), 1);
        assert!(!controller.caching_enabled());
        assert!(controller.should_accept_priority(Priority::Interactive));
        assert!(!controller.should_accept_priority(Priority::Background));
        assert!(!controller.should_accept_priority(Priority::Prefetch));
    }

    #[test]
    fn test_stale_event_ignored() {
        let controller = controller();
        assert!(controller.apply(PressureEvent::new(PressureLevel::Critical, 5)));
        assert!(!controller.apply(PressureEvent::new(PressureLevel::Normal, 4)));
        assert!(!controller.apply(PressureEvent::new(PressureLevel::Normal, 5)));
        assert_eq!(controller.level(), PressureLevel::Critical);

        assert!(controller.apply(PressureEvent::new(PressureLevel::Normal, 6)));
        assert_eq!(controller.level(), PressureLevel::Normal);
    }

    #[test]
    fn test_on_pressure_change_follows_external_sequence() {
        let controller = controller();
        controller.apply(PressureEvent::new(PressureLevel::Elevated, 41));
        controller.on_pressure_change(PressureLevel::Normal);

        let state = controller.state();
        assert_eq!(state.level, PressureLevel::Normal);
        assert_eq!(state.last_event_sequence, 42);
    }

    #[test]
    fn test_critical_limit_never_exceeds_base() {
        let controller =
            DegradationController::new(DegradationConfig::new(4).with_critical_limit(16));
        controller.on_pressure_change(PressureLevel::Critical);
        assert_eq!(controller.current_limit(), 4);
    }

    #[test]
    fn test_channel_event_after_direct_change_is_applied() {
        let controller = controller();
        let (sender, _rx) = controller.pressure_channel(4);

        controller.on_pressure_change(PressureLevel::Critical);
        assert!(controller.apply(sender.stamp(PressureLevel::Normal)));
        assert_eq!(controller.level(), PressureLevel::Normal);
    }

    #[test]
    fn test_channel_event_issued_before_direct_change_is_stale() {
        let controller = controller();
        let (sender, _rx) = controller.pressure_channel(4);

        let early = sender.stamp(PressureLevel::Normal);
        controller.on_pressure_change(PressureLevel::Critical);
        assert!(!controller.apply(early));
        assert_eq!(controller.level(), PressureLevel::Critical);

        controller.apply(PressureEvent::new(PressureLevel::Elevated, 50));
        assert!(controller.apply(sender.stamp(PressureLevel::Normal)));
        assert_eq!(controller.state().last_event_sequence, 51);
    }

    #[test]
    fn test_same_level_event_keeps_entered_at() {
        let controller = controller();
        controller.on_pressure_change(PressureLevel::Elevated);
        let entered = controller.state().entered_at;

        controller.on_pressure_change(PressureLevel::Elevated);
        let state = controller.state();
        assert_eq!(state.entered_at, entered);
        assert_eq!(state.last_event_sequence, 2);
    }

    #[test]
    fn test_transitions_are_published() {
        let controller = controller();
        let mut rx = controller.subscribe();
        assert!(!rx.has_changed().unwrap());

        controller.on_pressure_change(PressureLevel::Critical);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), PressureLevel::Critical);

        // No transition, no notification
        controller.on_pressure_change(PressureLevel::Critical);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_transitions_mirrored_to_telemetry() {
        let telemetry = Arc::new(TelemetryRecorder::new());
        let controller = controller().with_telemetry(Arc::clone(&telemetry));
        assert_eq!(telemetry.snapshot().concurrency_limit, 8);

        controller.on_pressure_change(PressureLevel::Elevated);
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.pressure_level, PressureLevel::Elevated);
        assert_eq!(snapshot.concurrency_limit, 4);
    }

    #[test]
    fn test_explicit_policy_never_recovers() {
        let controller = controller();
        controller.on_pressure_change(PressureLevel::Critical);
        assert!(!controller.maybe_recover());
        assert_eq!(controller.level(), PressureLevel::Critical);
    }

    #[test]
    fn test_cooldown_steps_down_one_level() {
        let controller = DegradationController::new(
            DegradationConfig::new(8)
                .with_recovery(RecoveryPolicy::Cooldown(Duration::from_millis(20))),
        );
        controller.on_pressure_change(PressureLevel::Critical);
        assert!(!controller.maybe_recover());

        std::thread::sleep(Duration::from_millis(30));
        assert!(controller.maybe_recover());
        assert_eq!(controller.level(), PressureLevel::Elevated);

        // Cooldown restarts after each step
        assert!(!controller.maybe_recover());
        std::thread::sleep(Duration::from_millis(30));
        assert!(controller.maybe_recover());
        assert_eq!(controller.level(), PressureLevel::Normal);
        assert!(!controller.maybe_recover());
    }

    #[test]
    fn test_recovery_keeps_sequence() {
        let controller = DegradationController::new(
            DegradationConfig::new(8).with_recovery(RecoveryPolicy::Cooldown(Duration::ZERO)),
        );
        controller.apply(PressureEvent::new(PressureLevel::Elevated, 7));
        assert!(controller.maybe_recover());
        assert_eq!(controller.state().last_event_sequence, 7);
        assert!(!controller.apply(PressureEvent::new(PressureLevel::Critical, 7)));
    }

    #[tokio::test]
    async fn test_run_recovery_loop() {
        let controller = Arc::new(DegradationController::new(
            DegradationConfig::new(4)
                .with_recovery(RecoveryPolicy::Cooldown(Duration::from_millis(20))),
        ));
        controller.on_pressure_change(PressureLevel::Elevated);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&controller).run_recovery(shutdown.clone()));

        let mut rx = controller.subscribe();
        tokio::select! {
            _ = rx.wait_for(|level| *level == PressureLevel::Normal) => {}
            _ = tokio::time::sleep(Duration::from_secs(2)) => panic!("did not recover"),
        }

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_recovery_explicit_returns() {
        let controller = Arc::new(controller());
        controller.run_recovery(CancellationToken::new()).await;
    }
}
