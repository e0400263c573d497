//! Purchase dispatcher.
//!
//! The dispatcher is the single owner of the purchase machine, the active
//! session, the statistics and the timer slot. Everything that can change
//! the flow reaches it as a message on one of four inputs:
//!
//! - commands from the UI through a [`DispatcherHandle`]
//! - timer firings from the [`TimerSlot`]
//! - door and health events from the hardware manager
//! - results of its own background tasks (authorization polling,
//!   completion reporting, motor spins)
//!
//! Events are processed one at a time and the intents of a transition run
//! to completion before the next event is taken, so no two transitions ever
//! interleave. Readers observe the flow through a `watch` channel of
//! [`SessionSnapshot`]s.
//!
//! A failed lock or unlock command leaves a compartment in an unknown state.
//! The dispatcher then injects a `Reset` ahead of any other input, which
//! force-locks the affected level and returns the kiosk to `Idle`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stockbox_core::{KioskConfig, Level, SessionId};
use stockbox_hardware::{Animation, DeviceKind, DoorState, HardwareEvent, HardwareManager};
use stockbox_network::{
    AuthorizationStatus, CompletionReport, PendingCause, PurchaseAuthorizer,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{FlowError, Result};
use crate::session::{ActiveTimer, PurchaseSession, SessionSnapshot, default_message};
use crate::state_machine::{
    AnimationCue, FlowEvent, Intent, PurchaseMachine, PurchaseState, StatKind, Step, TimerKind,
    Transition,
};
use crate::stats::Statistics;
use crate::telemetry::{StatisticRecord, TelemetryRecord, TelemetrySink, TransitionRecord};
use crate::timer::TimerSlot;

const COMMAND_QUEUE_SIZE: usize = 32;
const INTERNAL_QUEUE_SIZE: usize = 64;

/// Answer to a level selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionResult {
    /// A session was opened and the purchase check started.
    Accepted(SessionId),

    /// Another purchase is in progress.
    Busy,

    /// The kiosk is asleep; a touch wakes it first.
    Asleep,

    /// No such level on this kiosk.
    InvalidLevel,
}

enum Command {
    Select {
        level: u16,
        reply: oneshot::Sender<SelectionResult>,
    },
    Event(FlowEvent),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Internal {
    Authorization {
        session: SessionId,
        status: AuthorizationStatus,
    },
    CompletionAcked {
        session: SessionId,
    },
    ReportAbandoned {
        purchase_id: String,
    },
    SpinFinished(stockbox_hardware::Result<()>),
}

#[derive(Debug, Clone)]
struct FlowTimings {
    sleep: Duration,
    purchase: Duration,
    door_unlock: Duration,
    door_alarm: Duration,
    poll_interval: Duration,
}

impl FlowTimings {
    fn duration(&self, kind: TimerKind) -> Duration {
        match kind {
            TimerKind::Sleep => self.sleep,
            TimerKind::Purchase => self.purchase,
            TimerKind::DoorUnlock => self.door_unlock,
            TimerKind::DoorAlarm => self.door_alarm,
        }
    }
}

#[derive(Debug, Clone)]
struct ReportPolicy {
    initial_backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
}

/// Client side of a running [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl DispatcherHandle {
    /// Ask to buy from `level`.
    pub async fn select_level(&self, level: u16) -> Result<SelectionResult> {
        let (reply, answer) = oneshot::channel();
        self.send(Command::Select { level, reply }).await?;
        answer.await.map_err(|_| FlowError::DispatcherClosed)
    }

    /// Report a touch on the screen.
    pub async fn touch(&self) -> Result<()> {
        self.send(Command::Event(FlowEvent::TouchDetected)).await
    }

    /// Abort whatever is in progress and return to `Idle`.
    pub async fn reset(&self) -> Result<()> {
        self.send(Command::Event(FlowEvent::Reset)).await
    }

    /// Run the dispensing spindle while a compartment is unlocked.
    pub async fn request_spin(&self) -> Result<()> {
        self.send(Command::Event(FlowEvent::SpinRequested)).await
    }

    /// Stop the dispatcher and wait until it has locked up.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        done.await.map_err(|_| FlowError::DispatcherClosed)
    }

    /// Subscribe to snapshot updates.
    pub fn snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// The most recently published snapshot.
    pub fn current(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FlowError::DispatcherClosed)
    }
}

/// Serializes every purchase-flow event and executes the resulting intents.
pub struct Dispatcher<A, S> {
    machine: PurchaseMachine,
    session: Option<PurchaseSession>,
    statistics: Statistics,
    timers: TimerSlot,

    hardware: HardwareManager,
    hardware_events: Option<mpsc::Receiver<HardwareEvent>>,
    authorizer: Arc<A>,
    sink: S,

    machine_id: String,
    levels: u16,
    timings: FlowTimings,
    report_policy: ReportPolicy,

    commands: mpsc::Receiver<Command>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
    snapshot: watch::Sender<SessionSnapshot>,

    background: CancellationToken,
    poller: Option<CancellationToken>,

    /// Level whose lock state is unknown after a failed relay command.
    unsafe_level: Option<Level>,
    reset_pending: bool,
    spinning: bool,
    message: Option<String>,
    degraded: Vec<DeviceKind>,
}

impl<A: PurchaseAuthorizer, S: TelemetrySink> Dispatcher<A, S> {
    pub fn new(
        hardware: HardwareManager,
        authorizer: A,
        sink: S,
        config: &KioskConfig,
    ) -> (Self, DispatcherHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_QUEUE_SIZE);
        let (snapshot, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let timing = &config.timings;
        let dispatcher = Self {
            machine: PurchaseMachine::new(),
            session: None,
            statistics: Statistics::default(),
            timers: TimerSlot::new(),
            hardware,
            hardware_events: None,
            authorizer: Arc::new(authorizer),
            sink,
            machine_id: config.kiosk.machine_id.clone(),
            levels: config.kiosk.levels,
            timings: FlowTimings {
                sleep: timing.sleep_timeout(),
                purchase: timing.purchase_timeout(),
                door_unlock: timing.door_unlock_timeout(),
                door_alarm: timing.door_alarm_timeout(),
                poll_interval: timing.poll_interval(),
            },
            report_policy: ReportPolicy {
                initial_backoff: config.authorization.report_initial_backoff(),
                max_backoff: config.authorization.report_max_backoff(),
                max_attempts: config.authorization.report_max_attempts.max(1),
            },
            commands,
            internal_tx,
            internal_rx,
            snapshot,
            background: CancellationToken::new(),
            poller: None,
            unsafe_level: None,
            reset_pending: false,
            spinning: false,
            message: None,
            degraded: Vec::new(),
        };

        let handle = DispatcherHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        };
        (dispatcher, handle)
    }

    /// Start from persisted counters.
    pub fn with_statistics(mut self, statistics: Statistics) -> Self {
        self.statistics = statistics;
        self.snapshot.send_modify(|snapshot| snapshot.statistics = statistics);
        self
    }

    /// Feed door and health events from the hardware manager.
    pub fn with_hardware_events(mut self, events: mpsc::Receiver<HardwareEvent>) -> Self {
        self.hardware_events = Some(events);
        self
    }

    /// Process events until shut down or every handle is dropped.
    pub async fn run(mut self) {
        info!(
            "Purchase dispatcher started ({} levels, machine {})",
            self.levels, self.machine_id
        );
        self.degraded = self.hardware.device_records().fallbacks().collect();
        self.arm(TimerKind::Sleep);
        self.animate(AnimationCue::Idle).await;
        self.publish();

        loop {
            if self.reset_pending {
                self.reset_pending = false;
                warn!("Compartment state unknown, resetting");
                self.dispatch(FlowEvent::Reset).await;
                continue;
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.stop().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(Command::Select { level, reply }) => {
                        let result = self.select(level).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Event(event)) => self.dispatch(event).await,
                    None => break,
                },
                kind = self.timers.fired() => {
                    debug!("{} timer fired", kind);
                    self.dispatch(kind.event()).await;
                }
                Some(message) = self.internal_rx.recv() => self.handle_internal(message).await,
                event = recv_optional(&mut self.hardware_events) => match event {
                    Some(event) => self.handle_hardware(event).await,
                    None => {
                        warn!("Hardware event stream closed");
                        self.hardware_events = None;
                    }
                },
            }
        }

        self.stop().await;
    }

    async fn select(&mut self, raw: u16) -> SelectionResult {
        let Ok(level) = Level::new(raw).and_then(|level| level.within(self.levels)) else {
            debug!("Rejecting selection of unknown level {}", raw);
            return SelectionResult::InvalidLevel;
        };

        match self.machine.state() {
            PurchaseState::Idle if self.session.is_none() => {}
            PurchaseState::Sleep => return SelectionResult::Asleep,
            state => {
                info!("Level {} selected in {}, rejected as busy", level, state);
                return SelectionResult::Busy;
            }
        }

        let session = PurchaseSession::new(level);
        let id = session.id;
        info!("Session {} opened for level {}", id, level);
        self.session = Some(session);
        self.dispatch(FlowEvent::LevelSelected(level)).await;
        SelectionResult::Accepted(id)
    }

    async fn dispatch(&mut self, event: FlowEvent) {
        let mut level = self.session.as_ref().map(|session| session.level);
        if event == FlowEvent::Reset {
            level = level.or(self.unsafe_level);
        }
        let session_id = self.session.as_ref().map(|session| session.id);

        let transition = match self.machine.apply(level, event) {
            Step::Moved(transition) => transition,
            Step::Ignored => {
                debug!("Ignoring {} in {}", event, self.machine.state());
                return;
            }
        };

        info!(
            "Session {}: {} -> {} on {}",
            session_label(session_id),
            transition.from,
            transition.to,
            event
        );
        self.sink.record(TelemetryRecord::Transition(TransitionRecord {
            session_id,
            level,
            from: transition.from,
            to: transition.to,
            event,
            occurred_at: Utc::now(),
        }));

        if let Some(session) = self.session.as_mut() {
            session.enter(transition.to);
        }
        self.message = transition_message(&transition);

        for intent in transition.intents.iter().copied() {
            self.execute(intent).await;
        }
        self.publish();
    }

    async fn execute(&mut self, intent: Intent) {
        match intent {
            Intent::StartTimer(kind) => self.arm(kind),
            Intent::CancelTimer(kind) => {
                if self.timers.cancel(kind) {
                    self.clear_active_timer();
                }
            }
            Intent::CancelAllTimers => {
                self.timers.cancel_all();
                self.clear_active_timer();
            }
            Intent::Unlock(level) => {
                if let Err(e) = self.hardware.unlock(level).await {
                    error!("Failed to unlock level {}: {}", level, e);
                    self.schedule_reset(level);
                }
            }
            Intent::Lock(level) => {
                if let Err(e) = self.hardware.lock(level).await {
                    error!("Failed to lock level {}: {}", level, e);
                    self.schedule_reset(level);
                }
            }
            Intent::ForceLock(level) => self.force_lock(level).await,
            Intent::StartAuthorizationPoll(level) => self.start_poller(level),
            Intent::StopAuthorizationPoll => self.stop_poller(),
            Intent::ReportCompletion => self.start_reporter(),
            Intent::PlaySound(cue) => {
                if let Err(e) = self.hardware.play(cue.name()).await {
                    warn!("Failed to play {} sound: {}", cue.name(), e);
                }
            }
            Intent::Animate(cue) => self.animate(cue).await,
            Intent::HighlightLevel(level) => {
                if let Err(e) = self.hardware.highlight_level(level).await {
                    warn!("Failed to highlight level {}: {}", level, e);
                }
            }
            Intent::StopAlarm => {
                if let Err(e) = self.hardware.stop_sound().await {
                    warn!("Failed to stop alarm sound: {}", e);
                }
                if let Err(e) = self.hardware.animate(Animation::Off).await {
                    warn!("Failed to stop alarm animation: {}", e);
                }
            }
            Intent::SpinMotor => self.start_spin(),
            Intent::IncrementStat(kind) => self.increment(kind),
            Intent::ClearSession => {
                if let Some(session) = self.session.take() {
                    info!("Session {} closed in {}", session.id, session.state);
                }
            }
        }
    }

    fn schedule_reset(&mut self, level: Level) {
        self.unsafe_level = Some(level);
        self.reset_pending = true;
    }

    async fn force_lock(&mut self, level: Level) {
        match self.hardware.lock(level).await {
            Ok(()) => {
                if self.unsafe_level == Some(level) {
                    self.unsafe_level = None;
                }
            }
            Err(e) => {
                // keep the level so the next reset tries again
                error!("Forced lock of level {} failed: {}", level, e);
                self.unsafe_level = Some(level);
            }
        }

        match self.hardware.door_state().await {
            Ok(DoorState::Open) => {
                warn!("Level {} locked on reset while its door still reads open", level)
            }
            Ok(DoorState::Closed) => {}
            Err(e) => debug!("Door state unavailable after reset: {}", e),
        }
    }

    fn arm(&mut self, kind: TimerKind) {
        let deadline = self.timers.arm(kind, self.timings.duration(kind));
        if let Some(session) = self.session.as_mut() {
            session.active_timer = Some(ActiveTimer { kind, deadline });
        }
    }

    fn clear_active_timer(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.active_timer = None;
        }
    }

    async fn animate(&self, cue: AnimationCue) {
        if let Err(e) = self.hardware.animate(cue.into()).await {
            warn!("Failed to show {:?} animation: {}", cue, e);
        }
    }

    fn increment(&mut self, kind: StatKind) {
        let value = self.statistics.increment(kind);
        debug!("{} = {}", kind, value);
        self.sink.record(TelemetryRecord::Statistic(StatisticRecord {
            kind,
            value,
            occurred_at: Utc::now(),
        }));
    }

    fn start_poller(&mut self, level: Level) {
        self.stop_poller();
        let Some(session_id) = self.session.as_ref().map(|session| session.id) else {
            warn!("Purchase check for level {} requested without a session", level);
            return;
        };

        let token = self.background.child_token();
        tokio::spawn(poll_authorization(
            Arc::clone(&self.authorizer),
            level,
            session_id,
            self.timings.poll_interval,
            token.clone(),
            self.internal_tx.clone(),
        ));
        self.poller = Some(token);
    }

    fn stop_poller(&mut self) {
        if let Some(token) = self.poller.take() {
            token.cancel();
        }
    }

    fn start_reporter(&mut self) {
        let Some(session) = self.session.as_ref() else {
            warn!("Completion report requested without a session");
            return;
        };

        let report = CompletionReport {
            purchase_id: session.report_id(),
            machine_id: self.machine_id.clone(),
            level: session.level,
            success: true,
        };
        tokio::spawn(report_completion(
            Arc::clone(&self.authorizer),
            report,
            session.id,
            self.report_policy.clone(),
            self.background.child_token(),
            self.internal_tx.clone(),
        ));
    }

    fn start_spin(&mut self) {
        if self.spinning {
            debug!("Spin already running");
            return;
        }
        self.spinning = true;

        let hardware = self.hardware.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = hardware.spin_motor().await;
            let _ = tx.send(Internal::SpinFinished(result)).await;
        });
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.session.as_ref().is_some_and(|session| session.id == id)
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Authorization { session, status } => {
                self.on_authorization(session, status).await
            }
            Internal::CompletionAcked { session } => {
                if self.is_current(session) {
                    self.dispatch(FlowEvent::CompletionAcked).await;
                } else {
                    debug!("Completion ack for finished session {}", session);
                }
            }
            Internal::ReportAbandoned { purchase_id } => {
                error!("Completion report for purchase {} abandoned", purchase_id);
                self.increment(StatKind::ServerIncidents);
                self.publish();
            }
            Internal::SpinFinished(result) => {
                self.spinning = false;
                if let Err(e) = result {
                    warn!("Dispense spin failed: {}", e);
                }
            }
        }
    }

    async fn on_authorization(&mut self, session_id: SessionId, status: AuthorizationStatus) {
        if !self.is_current(session_id) || self.machine.state() != PurchaseState::CheckingPurchase
        {
            debug!("Dropping stale purchase check for session {}", session_id);
            return;
        }

        match status {
            AuthorizationStatus::Valid { purchase_id } => {
                if let Some(session) = self.session.as_mut() {
                    session.purchase_id = purchase_id;
                }
                self.dispatch(FlowEvent::PurchaseValid).await;
            }
            AuthorizationStatus::Invalid => self.dispatch(FlowEvent::PurchaseInvalid).await,
            AuthorizationStatus::Pending(cause) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                let incident = match cause {
                    PendingCause::NetworkUnreachable if !session.network_incident_counted => {
                        session.network_incident_counted = true;
                        Some(StatKind::NetworkIncidents)
                    }
                    PendingCause::ServerError if !session.server_incident_counted => {
                        session.server_incident_counted = true;
                        Some(StatKind::ServerIncidents)
                    }
                    _ => None,
                };

                if let Some(kind) = incident {
                    warn!("Purchase check for session {} pending: {}", session_id, cause);
                    self.increment(kind);
                }
                self.message = Some(pending_message(cause).to_string());
                self.publish();
            }
        }
    }

    async fn handle_hardware(&mut self, event: HardwareEvent) {
        match event {
            HardwareEvent::Door(DoorState::Open) => self.dispatch(FlowEvent::DoorOpened).await,
            HardwareEvent::Door(DoorState::Closed) => self.dispatch(FlowEvent::DoorClosed).await,
            HardwareEvent::Health(record) => {
                if record.using_fallback {
                    if !self.degraded.contains(&record.kind) {
                        warn!("{} degraded to simulated driver", record.kind);
                        self.degraded.push(record.kind);
                    }
                } else if self.degraded.contains(&record.kind) {
                    info!("{} back on its real driver", record.kind);
                    self.degraded.retain(|kind| *kind != record.kind);
                }
                self.publish();
            }
            other => debug!("Unhandled hardware event {:?}", other),
        }
    }

    fn publish(&self) {
        let state = self.machine.state();
        let level = self.session.as_ref().map(|session| session.level);
        let snapshot = SessionSnapshot {
            state,
            level,
            session_id: self.session.as_ref().map(|session| session.id),
            remaining: self.timers.remaining(),
            statistics: self.statistics,
            message: self
                .message
                .clone()
                .unwrap_or_else(|| default_message(state, level)),
            degraded: self.degraded.clone(),
        };
        self.snapshot.send_replace(snapshot);
    }

    async fn stop(&mut self) {
        info!("Purchase dispatcher stopping");
        self.background.cancel();
        self.poller = None;
        self.timers.cancel_all();

        let level = self
            .session
            .take()
            .map(|session| {
                warn!("Session {} interrupted in {}", session.id, self.machine.state());
                session.level
            })
            .or(self.unsafe_level.take());
        if let Some(level) = level
            && let Err(e) = self.hardware.lock(level).await
        {
            error!("Failed to lock level {} on shutdown: {}", level, e);
        }
    }
}

async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn session_label(id: Option<SessionId>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}

fn transition_message(transition: &Transition) -> Option<String> {
    if transition.to != PurchaseState::Idle {
        return None;
    }
    let message = match transition.event {
        FlowEvent::PurchaseInvalid => "Purchase not authorized",
        FlowEvent::TimeoutPurchase => "Payment not received",
        FlowEvent::TimeoutDoorUnlock => "Compartment locked again",
        _ => return None,
    };
    Some(message.to_string())
}

fn pending_message(cause: PendingCause) -> &'static str {
    match cause {
        PendingCause::AwaitingPayment => "Waiting for payment",
        PendingCause::NetworkUnreachable => "Waiting for connection",
        PendingCause::ServerError => "Purchase server busy",
    }
}

/// Ask the server about `session` every `period` until it answers for good.
async fn poll_authorization<A: PurchaseAuthorizer>(
    authorizer: Arc<A>,
    level: Level,
    session: SessionId,
    period: Duration,
    token: CancellationToken,
    tx: mpsc::Sender<Internal>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interval.tick() => {}
        }

        let status = tokio::select! {
            _ = token.cancelled() => return,
            status = authorizer.check_purchase(level, session) => status,
        };
        debug!("Purchase check for session {}: {:?}", session, status);

        let settled = !status.is_pending();
        if tx
            .send(Internal::Authorization { session, status })
            .await
            .is_err()
            || settled
        {
            return;
        }
    }
}

/// Report a finished purchase, retrying with exponential backoff.
///
/// The flow is acknowledged after the first attempt whatever its outcome;
/// retries continue in the background until they succeed, run out, or the
/// dispatcher stops.
async fn report_completion<A: PurchaseAuthorizer>(
    authorizer: Arc<A>,
    report: CompletionReport,
    session: SessionId,
    policy: ReportPolicy,
    token: CancellationToken,
    tx: mpsc::Sender<Internal>,
) {
    let first = tokio::select! {
        _ = token.cancelled() => return,
        result = authorizer.confirm_completion(&report) => result,
    };
    if tx.send(Internal::CompletionAcked { session }).await.is_err() {
        return;
    }
    let Err(mut last_error) = first else {
        debug!("Completion for purchase {} reported", report.purchase_id);
        return;
    };

    let mut backoff = policy.initial_backoff;
    for attempt in 2..=policy.max_attempts {
        warn!(
            "Completion report for purchase {} failed (attempt {}/{}): {}, retrying in {:?}",
            report.purchase_id,
            attempt - 1,
            policy.max_attempts,
            last_error,
            backoff
        );
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }

        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = authorizer.confirm_completion(&report) => result,
        };
        match result {
            Ok(()) => {
                info!(
                    "Completion for purchase {} reported on attempt {}",
                    report.purchase_id, attempt
                );
                return;
            }
            Err(e) => last_error = e,
        }
        backoff = backoff.saturating_mul(2).min(policy.max_backoff);
    }

    error!(
        "Giving up on completion report for purchase {} after {} attempts: {}",
        report.purchase_id, policy.max_attempts, last_error
    );
    let _ = tx
        .send(Internal::ReportAbandoned {
            purchase_id: report.purchase_id,
        })
        .await;
}
