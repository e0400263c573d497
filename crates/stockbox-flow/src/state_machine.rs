//! Purchase flow state machine.
//!
//! The machine is a pure function of `(state, active level, event)`. It
//! never performs I/O: every side effect is returned as an ordered list of
//! [`Intent`]s that the dispatcher executes.
//!
//! # States
//!
//! - `Idle`: waiting for a selection, sleep timer armed
//! - `Sleep`: screen dimmed, waiting for a touch
//! - `CheckingPurchase`: polling the purchase server, purchase timer armed
//! - `DoorUnlocked`: compartment unlocked, unlock timer armed
//! - `DoorOpened`: door open, alarm timer armed
//! - `DoorAlarm`: door left open too long
//! - `Completing`: door closed and locked, completion being reported
//!
//! # Transitions
//!
//! ```text
//!            TimeoutSleep              TouchDetected
//!   Idle ────────────────► Sleep ─────────────────► Idle
//!
//!   Idle ──LevelSelected──► CheckingPurchase ──PurchaseValid──► DoorUnlocked
//!                               │  PurchaseInvalid / TimeoutPurchase     │
//!                               └──────────────► Idle ◄──────────────────┤ TimeoutDoorUnlock
//!                                                                        │ DoorOpened
//!   Idle ◄──CompletionAcked── Completing ◄──DoorClosed── DoorOpened ◄────┘
//!                                 ▲                          │ TimeoutDoorAlarm
//!                                 └───────DoorClosed──── DoorAlarm
//!
//!   any ──Reset──► Idle
//! ```
//!
//! Unmatched `(state, event)` pairs are ignored, which makes late or repeated
//! deliveries harmless: a second `PurchaseValid` in `DoorUnlocked` changes
//! nothing.
//!
//! # Examples
//!
//! ```
//! use stockbox_core::Level;
//! use stockbox_flow::state_machine::{decide, FlowEvent, Intent, PurchaseState, Step};
//!
//! let level = Level::new(3).unwrap();
//! let step = decide(PurchaseState::Idle, None, FlowEvent::LevelSelected(level));
//!
//! let Step::Moved(transition) = step else { panic!("selection ignored") };
//! assert_eq!(transition.to, PurchaseState::CheckingPurchase);
//! assert!(transition.intents.contains(&Intent::StartAuthorizationPoll(level)));
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockbox_core::Level;
use stockbox_hardware::Animation;
use tokio::time::Instant;

/// Maximum number of transitions kept in the machine history.
pub const MAX_HISTORY_SIZE: usize = 100;

/// Phase of the purchase flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    Idle,
    Sleep,
    CheckingPurchase,
    DoorUnlocked,
    DoorOpened,
    DoorAlarm,
    Completing,
}

impl fmt::Display for PurchaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            PurchaseState::Idle => "Idle",
            PurchaseState::Sleep => "Sleep",
            PurchaseState::CheckingPurchase => "CheckingPurchase",
            PurchaseState::DoorUnlocked => "DoorUnlocked",
            PurchaseState::DoorOpened => "DoorOpened",
            PurchaseState::DoorAlarm => "DoorAlarm",
            PurchaseState::Completing => "Completing",
        };
        write!(f, "{}", state_str)
    }
}

impl PurchaseState {
    /// The timer armed while in this state, if any.
    pub fn timer(&self) -> Option<TimerKind> {
        match self {
            PurchaseState::Idle => Some(TimerKind::Sleep),
            PurchaseState::CheckingPurchase => Some(TimerKind::Purchase),
            PurchaseState::DoorUnlocked => Some(TimerKind::DoorUnlock),
            PurchaseState::DoorOpened => Some(TimerKind::DoorAlarm),
            _ => None,
        }
    }

    /// States in which a compartment may be unlocked.
    pub fn allows_unlocked(&self) -> bool {
        matches!(
            self,
            PurchaseState::DoorUnlocked | PurchaseState::DoorOpened | PurchaseState::DoorAlarm
        )
    }

    /// A purchase session exists in this state.
    pub fn is_active(&self) -> bool {
        !matches!(self, PurchaseState::Idle | PurchaseState::Sleep)
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEvent {
    TouchDetected,
    LevelSelected(Level),
    PurchaseValid,
    PurchaseInvalid,
    DoorOpened,
    DoorClosed,
    TimeoutSleep,
    TimeoutPurchase,
    TimeoutDoorUnlock,
    TimeoutDoorAlarm,
    CompletionAcked,
    Reset,

    /// Operator asked for the dispensing spindle to run.
    SpinRequested,
}

impl fmt::Display for FlowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowEvent::TouchDetected => write!(f, "TouchDetected"),
            FlowEvent::LevelSelected(level) => write!(f, "LevelSelected({})", level),
            FlowEvent::PurchaseValid => write!(f, "PurchaseValid"),
            FlowEvent::PurchaseInvalid => write!(f, "PurchaseInvalid"),
            FlowEvent::DoorOpened => write!(f, "DoorOpened"),
            FlowEvent::DoorClosed => write!(f, "DoorClosed"),
            FlowEvent::TimeoutSleep => write!(f, "TimeoutSleep"),
            FlowEvent::TimeoutPurchase => write!(f, "TimeoutPurchase"),
            FlowEvent::TimeoutDoorUnlock => write!(f, "TimeoutDoorUnlock"),
            FlowEvent::TimeoutDoorAlarm => write!(f, "TimeoutDoorAlarm"),
            FlowEvent::CompletionAcked => write!(f, "CompletionAcked"),
            FlowEvent::Reset => write!(f, "Reset"),
            FlowEvent::SpinRequested => write!(f, "SpinRequested"),
        }
    }
}

/// State-scoped timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Sleep,
    Purchase,
    DoorUnlock,
    DoorAlarm,
}

impl TimerKind {
    /// Event delivered when this timer fires.
    pub fn event(&self) -> FlowEvent {
        match self {
            TimerKind::Sleep => FlowEvent::TimeoutSleep,
            TimerKind::Purchase => FlowEvent::TimeoutPurchase,
            TimerKind::DoorUnlock => FlowEvent::TimeoutDoorUnlock,
            TimerKind::DoorAlarm => FlowEvent::TimeoutDoorAlarm,
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::Sleep => write!(f, "sleep"),
            TimerKind::Purchase => write!(f, "purchase"),
            TimerKind::DoorUnlock => write!(f, "door unlock"),
            TimerKind::DoorAlarm => write!(f, "door alarm"),
        }
    }
}

/// Statistics counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    CompletedPurchases,
    FailedPurchases,
    NetworkIncidents,
    ServerIncidents,
}

impl StatKind {
    pub const ALL: [StatKind; 4] = [
        StatKind::CompletedPurchases,
        StatKind::FailedPurchases,
        StatKind::NetworkIncidents,
        StatKind::ServerIncidents,
    ];

    /// Stable name used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::CompletedPurchases => "completed_purchases",
            StatKind::FailedPurchases => "failed_purchases",
            StatKind::NetworkIncidents => "network_incidents",
            StatKind::ServerIncidents => "server_incidents",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feedback sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundCue {
    Select,
    Success,
    Error,
    Alarm,
    Wake,
}

impl SoundCue {
    /// Key into the configured sound map.
    pub fn name(&self) -> &'static str {
        match self {
            SoundCue::Select => "select",
            SoundCue::Success => "success",
            SoundCue::Error => "error",
            SoundCue::Alarm => "alarm",
            SoundCue::Wake => "wake",
        }
    }
}

/// Light strip preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationCue {
    Idle,
    Sleep,
    Wake,
    ValidPurchase,
    InvalidPurchase,
    DoorAlarm,
}

impl From<AnimationCue> for Animation {
    fn from(cue: AnimationCue) -> Self {
        match cue {
            AnimationCue::Idle => Animation::Idle,
            AnimationCue::Sleep => Animation::Sleep,
            AnimationCue::Wake => Animation::Wake,
            AnimationCue::ValidPurchase => Animation::ValidPurchase,
            AnimationCue::InvalidPurchase => Animation::InvalidPurchase,
            AnimationCue::DoorAlarm => Animation::DoorAlarm,
        }
    }
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    StartTimer(TimerKind),
    CancelTimer(TimerKind),
    CancelAllTimers,
    Unlock(Level),
    Lock(Level),

    /// Lock regardless of what the door sensor reads.
    ForceLock(Level),
    StartAuthorizationPoll(Level),
    StopAuthorizationPoll,
    ReportCompletion,
    PlaySound(SoundCue),
    Animate(AnimationCue),
    HighlightLevel(Level),
    StopAlarm,
    SpinMotor,
    IncrementStat(StatKind),
    ClearSession,
}

impl Intent {
    /// Failure of this intent leaves a compartment in an unknown state.
    pub fn is_safety_relevant(&self) -> bool {
        matches!(
            self,
            Intent::Unlock(_) | Intent::Lock(_) | Intent::ForceLock(_)
        )
    }
}

/// Outcome of a state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: PurchaseState,
    pub to: PurchaseState,
    pub event: FlowEvent,
    pub intents: Vec<Intent>,
}

/// Result of feeding one event to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The event has no meaning in the current state.
    Ignored,
    Moved(Transition),
}

impl Step {
    pub fn transition(&self) -> Option<&Transition> {
        match self {
            Step::Ignored => None,
            Step::Moved(transition) => Some(transition),
        }
    }
}

/// Intents for a return to `Idle` once a session ends.
fn back_to_idle(intents: &mut Vec<Intent>) {
    intents.push(Intent::Animate(AnimationCue::Idle));
    intents.push(Intent::ClearSession);
    intents.push(Intent::StartTimer(TimerKind::Sleep));
}

/// Decide the next state and side effects.
///
/// `level` is the level of the active session, if any. Returns
/// [`Step::Ignored`] for events that have no effect in `state`.
pub fn decide(state: PurchaseState, level: Option<Level>, event: FlowEvent) -> Step {
    use FlowEvent as E;
    use Intent as I;
    use PurchaseState as S;

    let (to, intents) = match (state, event) {
        (_, E::Reset) => {
            let mut intents = vec![I::CancelAllTimers, I::StopAuthorizationPoll];
            if let Some(level) = level {
                intents.push(I::ForceLock(level));
            }
            if state == S::DoorAlarm {
                intents.push(I::StopAlarm);
            }
            back_to_idle(&mut intents);
            (S::Idle, intents)
        }

        (S::Idle, E::TimeoutSleep) => (
            S::Sleep,
            vec![
                I::CancelTimer(TimerKind::Sleep),
                I::Animate(AnimationCue::Sleep),
            ],
        ),

        (S::Sleep, E::TouchDetected) => (
            S::Idle,
            vec![
                I::Animate(AnimationCue::Wake),
                I::PlaySound(SoundCue::Wake),
                I::StartTimer(TimerKind::Sleep),
            ],
        ),

        (S::Idle, E::LevelSelected(selected)) => (
            S::CheckingPurchase,
            vec![
                I::CancelTimer(TimerKind::Sleep),
                I::StartTimer(TimerKind::Purchase),
                I::HighlightLevel(selected),
                I::PlaySound(SoundCue::Select),
                I::StartAuthorizationPoll(selected),
            ],
        ),

        (S::CheckingPurchase, E::PurchaseValid) => {
            let Some(level) = level else {
                return Step::Ignored;
            };
            (
                S::DoorUnlocked,
                vec![
                    I::CancelTimer(TimerKind::Purchase),
                    I::StopAuthorizationPoll,
                    I::Unlock(level),
                    I::StartTimer(TimerKind::DoorUnlock),
                    I::PlaySound(SoundCue::Success),
                    I::Animate(AnimationCue::ValidPurchase),
                ],
            )
        }

        // the rejection animation stays up until the next selection
        (S::CheckingPurchase, E::PurchaseInvalid) => (
            S::Idle,
            vec![
                I::CancelTimer(TimerKind::Purchase),
                I::StopAuthorizationPoll,
                I::PlaySound(SoundCue::Error),
                I::Animate(AnimationCue::InvalidPurchase),
                I::IncrementStat(StatKind::FailedPurchases),
                I::ClearSession,
                I::StartTimer(TimerKind::Sleep),
            ],
        ),

        (S::CheckingPurchase, E::TimeoutPurchase) => {
            let mut intents = vec![
                I::CancelTimer(TimerKind::Purchase),
                I::StopAuthorizationPoll,
                I::IncrementStat(StatKind::FailedPurchases),
            ];
            back_to_idle(&mut intents);
            (S::Idle, intents)
        }

        (S::DoorUnlocked, E::DoorOpened) => (
            S::DoorOpened,
            vec![
                I::CancelTimer(TimerKind::DoorUnlock),
                I::StartTimer(TimerKind::DoorAlarm),
            ],
        ),

        (S::DoorUnlocked, E::TimeoutDoorUnlock) => {
            let Some(level) = level else {
                return Step::Ignored;
            };
            let mut intents = vec![
                I::CancelTimer(TimerKind::DoorUnlock),
                I::Lock(level),
                I::IncrementStat(StatKind::FailedPurchases),
            ];
            back_to_idle(&mut intents);
            (S::Idle, intents)
        }

        (S::DoorOpened, E::DoorClosed) => {
            let Some(level) = level else {
                return Step::Ignored;
            };
            (
                S::Completing,
                vec![
                    I::CancelTimer(TimerKind::DoorAlarm),
                    I::Lock(level),
                    I::ReportCompletion,
                ],
            )
        }

        (S::DoorOpened, E::TimeoutDoorAlarm) => (
            S::DoorAlarm,
            vec![
                I::CancelTimer(TimerKind::DoorAlarm),
                I::PlaySound(SoundCue::Alarm),
                I::Animate(AnimationCue::DoorAlarm),
            ],
        ),

        (S::DoorAlarm, E::DoorClosed) => {
            let Some(level) = level else {
                return Step::Ignored;
            };
            (
                S::Completing,
                vec![I::StopAlarm, I::Lock(level), I::ReportCompletion],
            )
        }

        (S::Completing, E::CompletionAcked) => {
            let mut intents = vec![I::IncrementStat(StatKind::CompletedPurchases)];
            back_to_idle(&mut intents);
            (S::Idle, intents)
        }

        (S::DoorUnlocked | S::DoorOpened, E::SpinRequested) => (state, vec![I::SpinMotor]),

        _ => return Step::Ignored,
    };

    Step::Moved(Transition {
        from: state,
        to,
        event,
        intents,
    })
}

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PurchaseState,
    pub to: PurchaseState,
    pub event: FlowEvent,
    pub timestamp: DateTime<Utc>,
}

/// Stateful wrapper around [`decide`] with a bounded transition history.
#[derive(Debug)]
pub struct PurchaseMachine {
    current_state: PurchaseState,
    state_entered_at: Instant,
    history: VecDeque<StateTransition>,
}

impl PurchaseMachine {
    /// A machine in `Idle`.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> PurchaseMachineBuilder {
        PurchaseMachineBuilder::default()
    }

    pub fn state(&self) -> PurchaseState {
        self.current_state
    }

    pub fn time_in_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Feed one event.
    ///
    /// Self-loops are recorded in the history but keep the state entry
    /// time.
    pub fn apply(&mut self, level: Option<Level>, event: FlowEvent) -> Step {
        let step = decide(self.current_state, level, event);

        if let Step::Moved(transition) = &step {
            if transition.from != transition.to || event == FlowEvent::Reset {
                self.state_entered_at = Instant::now();
            }
            self.current_state = transition.to;
            self.add_to_history(StateTransition {
                from: transition.from,
                to: transition.to,
                event,
                timestamp: Utc::now(),
            });
        }

        step
    }

    fn add_to_history(&mut self, transition: StateTransition) {
        self.history.push_back(transition);
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
    }
}

impl Default for PurchaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for restoring a [`PurchaseMachine`] in a given state.
#[derive(Debug)]
pub struct PurchaseMachineBuilder {
    initial_state: PurchaseState,
    history: VecDeque<StateTransition>,
}

impl PurchaseMachineBuilder {
    pub fn with_initial_state(mut self, state: PurchaseState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn with_history(mut self, history: VecDeque<StateTransition>) -> Self {
        self.history = history;
        self
    }

    pub fn build(mut self) -> PurchaseMachine {
        while self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        PurchaseMachine {
            current_state: self.initial_state,
            state_entered_at: Instant::now(),
            history: self.history,
        }
    }
}

impl Default for PurchaseMachineBuilder {
    fn default() -> Self {
        Self {
            initial_state: PurchaseState::Idle,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use std::collections::HashSet;

    fn level(n: u16) -> Level {
        Level::new(n).unwrap()
    }

    fn moved(step: Step) -> Transition {
        match step {
            Step::Moved(transition) => transition,
            Step::Ignored => panic!("expected a transition"),
        }
    }

    #[rstest]
    #[case(PurchaseState::Idle, FlowEvent::TimeoutSleep, PurchaseState::Sleep)]
    #[case(PurchaseState::Sleep, FlowEvent::TouchDetected, PurchaseState::Idle)]
    #[case(PurchaseState::Idle, FlowEvent::LevelSelected(level(3)), PurchaseState::CheckingPurchase)]
    #[case(PurchaseState::CheckingPurchase, FlowEvent::PurchaseValid, PurchaseState::DoorUnlocked)]
    #[case(PurchaseState::CheckingPurchase, FlowEvent::PurchaseInvalid, PurchaseState::Idle)]
    #[case(PurchaseState::CheckingPurchase, FlowEvent::TimeoutPurchase, PurchaseState::Idle)]
    #[case(PurchaseState::DoorUnlocked, FlowEvent::DoorOpened, PurchaseState::DoorOpened)]
    #[case(PurchaseState::DoorUnlocked, FlowEvent::TimeoutDoorUnlock, PurchaseState::Idle)]
    #[case(PurchaseState::DoorOpened, FlowEvent::DoorClosed, PurchaseState::Completing)]
    #[case(PurchaseState::DoorOpened, FlowEvent::TimeoutDoorAlarm, PurchaseState::DoorAlarm)]
    #[case(PurchaseState::DoorAlarm, FlowEvent::DoorClosed, PurchaseState::Completing)]
    #[case(PurchaseState::Completing, FlowEvent::CompletionAcked, PurchaseState::Idle)]
    #[case(PurchaseState::DoorOpened, FlowEvent::Reset, PurchaseState::Idle)]
    #[case(PurchaseState::Sleep, FlowEvent::Reset, PurchaseState::Idle)]
    fn test_transition_table(
        #[case] from: PurchaseState,
        #[case] event: FlowEvent,
        #[case] to: PurchaseState,
    ) {
        let transition = moved(decide(from, Some(level(3)), event));
        assert_eq!(transition.from, from);
        assert_eq!(transition.to, to);
        assert_eq!(transition.event, event);
    }

    #[rstest]
    #[case(PurchaseState::Idle, FlowEvent::PurchaseValid)]
    #[case(PurchaseState::Idle, FlowEvent::DoorOpened)]
    #[case(PurchaseState::Idle, FlowEvent::TouchDetected)]
    #[case(PurchaseState::Sleep, FlowEvent::LevelSelected(level(1)))]
    #[case(PurchaseState::CheckingPurchase, FlowEvent::LevelSelected(level(2)))]
    #[case(PurchaseState::DoorUnlocked, FlowEvent::PurchaseValid)]
    #[case(PurchaseState::DoorUnlocked, FlowEvent::DoorClosed)]
    #[case(PurchaseState::DoorUnlocked, FlowEvent::TimeoutDoorAlarm)]
    #[case(PurchaseState::DoorAlarm, FlowEvent::TimeoutDoorAlarm)]
    #[case(PurchaseState::Completing, FlowEvent::DoorClosed)]
    #[case(PurchaseState::CheckingPurchase, FlowEvent::SpinRequested)]
    fn test_unmatched_events_are_ignored(#[case] state: PurchaseState, #[case] event: FlowEvent) {
        assert_eq!(decide(state, Some(level(1)), event), Step::Ignored);
    }

    #[test]
    fn test_selection_intents() {
        let transition = moved(decide(
            PurchaseState::Idle,
            None,
            FlowEvent::LevelSelected(level(3)),
        ));
        assert_eq!(
            transition.intents,
            vec![
                Intent::CancelTimer(TimerKind::Sleep),
                Intent::StartTimer(TimerKind::Purchase),
                Intent::HighlightLevel(level(3)),
                Intent::PlaySound(SoundCue::Select),
                Intent::StartAuthorizationPoll(level(3)),
            ]
        );
    }

    #[test]
    fn test_valid_purchase_unlocks_once() {
        let transition = moved(decide(
            PurchaseState::CheckingPurchase,
            Some(level(3)),
            FlowEvent::PurchaseValid,
        ));
        let unlocks = transition
            .intents
            .iter()
            .filter(|intent| matches!(intent, Intent::Unlock(_)))
            .count();
        assert_eq!(unlocks, 1);
        assert!(transition.intents.contains(&Intent::Unlock(level(3))));

        // late duplicate
        assert_eq!(
            decide(
                PurchaseState::DoorUnlocked,
                Some(level(3)),
                FlowEvent::PurchaseValid
            ),
            Step::Ignored
        );
    }

    #[test]
    fn test_invalid_purchase_never_touches_locks() {
        let transition = moved(decide(
            PurchaseState::CheckingPurchase,
            Some(level(5)),
            FlowEvent::PurchaseInvalid,
        ));
        assert!(!transition.intents.iter().any(Intent::is_safety_relevant));
        assert!(
            transition
                .intents
                .contains(&Intent::IncrementStat(StatKind::FailedPurchases))
        );
    }

    #[test]
    fn test_door_closed_locks_then_reports() {
        let transition = moved(decide(
            PurchaseState::DoorOpened,
            Some(level(3)),
            FlowEvent::DoorClosed,
        ));
        let lock = transition
            .intents
            .iter()
            .position(|intent| *intent == Intent::Lock(level(3)))
            .unwrap();
        let report = transition
            .intents
            .iter()
            .position(|intent| *intent == Intent::ReportCompletion)
            .unwrap();
        assert!(lock < report);
    }

    #[test]
    fn test_alarm_stops_before_lock() {
        let transition = moved(decide(
            PurchaseState::DoorAlarm,
            Some(level(2)),
            FlowEvent::DoorClosed,
        ));
        assert_eq!(
            transition.intents,
            vec![
                Intent::StopAlarm,
                Intent::Lock(level(2)),
                Intent::ReportCompletion
            ]
        );
    }

    #[test]
    fn test_reset_force_locks_active_level() {
        let transition = moved(decide(
            PurchaseState::DoorOpened,
            Some(level(4)),
            FlowEvent::Reset,
        ));
        assert_eq!(transition.intents[0], Intent::CancelAllTimers);
        assert!(transition.intents.contains(&Intent::ForceLock(level(4))));

        let transition = moved(decide(PurchaseState::Idle, None, FlowEvent::Reset));
        assert!(
            !transition
                .intents
                .iter()
                .any(|intent| matches!(intent, Intent::ForceLock(_)))
        );
    }

    #[test]
    fn test_spin_is_a_self_loop() {
        let transition = moved(decide(
            PurchaseState::DoorOpened,
            Some(level(1)),
            FlowEvent::SpinRequested,
        ));
        assert_eq!(transition.to, PurchaseState::DoorOpened);
        assert_eq!(transition.intents, vec![Intent::SpinMotor]);
    }

    #[test]
    fn test_machine_records_history() {
        let mut machine = PurchaseMachine::new();
        machine.apply(None, FlowEvent::LevelSelected(level(1)));
        machine.apply(Some(level(1)), FlowEvent::PurchaseValid);
        machine.apply(Some(level(1)), FlowEvent::PurchaseValid);

        assert_eq!(machine.state(), PurchaseState::DoorUnlocked);
        assert_eq!(machine.history().len(), 2);
        assert_eq!(machine.history()[1].event, FlowEvent::PurchaseValid);
    }

    #[test]
    fn test_history_size_limit() {
        let mut machine = PurchaseMachine::new();
        for _ in 0..(MAX_HISTORY_SIZE + 20) {
            machine.apply(None, FlowEvent::Reset);
        }
        assert_eq!(machine.history().len(), MAX_HISTORY_SIZE);
    }

    #[test]
    fn test_builder_restores_state() {
        let machine = PurchaseMachine::builder()
            .with_initial_state(PurchaseState::Completing)
            .build();
        assert_eq!(machine.state(), PurchaseState::Completing);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_state_display_and_serde() {
        assert_eq!(PurchaseState::CheckingPurchase.to_string(), "CheckingPurchase");
        assert_eq!(
            serde_json::to_string(&PurchaseState::DoorAlarm).unwrap(),
            "\"door_alarm\""
        );
        assert_eq!(
            FlowEvent::LevelSelected(level(7)).to_string(),
            "LevelSelected(7)"
        );
    }

    #[test]
    fn test_stat_kind_names_round_trip() {
        for kind in StatKind::ALL {
            assert_eq!(StatKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(StatKind::from_name("unknown"), None);
    }

    fn any_event() -> impl Strategy<Value = FlowEvent> {
        prop_oneof![
            Just(FlowEvent::TouchDetected),
            (1u16..=4).prop_map(|n| FlowEvent::LevelSelected(Level::new(n).unwrap())),
            Just(FlowEvent::PurchaseValid),
            Just(FlowEvent::PurchaseInvalid),
            Just(FlowEvent::DoorOpened),
            Just(FlowEvent::DoorClosed),
            Just(FlowEvent::TimeoutSleep),
            Just(FlowEvent::TimeoutPurchase),
            Just(FlowEvent::TimeoutDoorUnlock),
            Just(FlowEvent::TimeoutDoorAlarm),
            Just(FlowEvent::CompletionAcked),
            Just(FlowEvent::Reset),
            Just(FlowEvent::SpinRequested),
        ]
    }

    proptest! {
        #[test]
        fn prop_locked_outside_door_states(events in prop::collection::vec(any_event(), 0..64)) {
            let mut state = PurchaseState::Idle;
            let mut session: Option<Level> = None;
            let mut unlocked: HashSet<Level> = HashSet::new();

            for event in events {
                let Step::Moved(transition) = decide(state, session, event) else {
                    continue;
                };
                for intent in &transition.intents {
                    match intent {
                        Intent::Unlock(level) => { unlocked.insert(*level); }
                        Intent::Lock(level) | Intent::ForceLock(level) => { unlocked.remove(level); }
                        Intent::ClearSession => session = None,
                        _ => {}
                    }
                }
                if let FlowEvent::LevelSelected(level) = event {
                    session = Some(level);
                }
                state = transition.to;

                if !state.allows_unlocked() {
                    prop_assert!(unlocked.is_empty(), "{} with unlocked {:?}", state, unlocked);
                }
                prop_assert!(unlocked.len() <= 1);
            }
        }

        #[test]
        fn prop_one_live_timer_matching_state(events in prop::collection::vec(any_event(), 0..64)) {
            let mut state = PurchaseState::Idle;
            let mut session: Option<Level> = None;
            let mut live: Option<TimerKind> = Some(TimerKind::Sleep);

            for event in events {
                let Step::Moved(transition) = decide(state, session, event) else {
                    continue;
                };
                for intent in &transition.intents {
                    match intent {
                        Intent::CancelTimer(kind) => {
                            prop_assert_eq!(live, Some(*kind));
                            live = None;
                        }
                        Intent::CancelAllTimers => live = None,
                        Intent::StartTimer(kind) => {
                            prop_assert!(live.is_none(), "armed {} over {:?}", kind, live);
                            live = Some(*kind);
                        }
                        Intent::ClearSession => session = None,
                        _ => {}
                    }
                }
                if let FlowEvent::LevelSelected(level) = event {
                    session = Some(level);
                }
                state = transition.to;
                prop_assert_eq!(live, state.timer());
            }
        }

        #[test]
        fn prop_at_most_one_session(events in prop::collection::vec(any_event(), 0..64)) {
            let mut state = PurchaseState::Idle;
            let mut session: Option<Level> = None;

            for event in events {
                let step = decide(state, session, event);
                if let FlowEvent::LevelSelected(_) = event && session.is_some() {
                    prop_assert_eq!(&step, &Step::Ignored);
                }
                let Step::Moved(transition) = step else {
                    continue;
                };
                if let FlowEvent::LevelSelected(level) = event {
                    session = Some(level);
                }
                if transition.intents.contains(&Intent::ClearSession) {
                    session = None;
                }
                state = transition.to;
                prop_assert_eq!(session.is_some(), state.is_active());
            }
        }
    }
}
