//! Purchase flow for the stockbox kiosk.
//!
//! The flow is split in two halves:
//!
//! - [`state_machine`]: a pure transition function, [`decide`], mapping a
//!   state and an event to the next state and a list of [`Intent`]s. It
//!   never performs I/O and is exhaustively testable.
//! - [`dispatcher`]: the [`Dispatcher`] task that owns the machine, the
//!   session, the statistics and the timer slot, serializes every event and
//!   carries out intents against the hardware manager and the purchase
//!   authorizer.
//!
//! # Example
//!
//! ```no_run
//! use stockbox_core::KioskConfig;
//! use stockbox_flow::{Dispatcher, SelectionResult, TracingSink};
//! use stockbox_hardware::HardwareManager;
//! use stockbox_network::ScriptedAuthorizer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = KioskConfig::default();
//! let (hardware, mut monitors) = HardwareManager::builder(&config).build();
//! hardware.connect_all().await;
//! monitors.start_monitors(&hardware);
//!
//! let (dispatcher, handle) =
//!     Dispatcher::new(hardware, ScriptedAuthorizer::new(), TracingSink, &config);
//! let dispatcher = match monitors.take_events() {
//!     Some(events) => dispatcher.with_hardware_events(events),
//!     None => dispatcher,
//! };
//! tokio::spawn(dispatcher.run());
//!
//! if let SelectionResult::Accepted(session) = handle.select_level(3).await? {
//!     println!("session {} started", session);
//! }
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod session;
pub mod state_machine;
pub mod stats;
pub mod telemetry;
pub mod timer;

pub use dispatcher::{Dispatcher, DispatcherHandle, SelectionResult};
pub use error::{FlowError, Result};
pub use session::{ActiveTimer, PurchaseSession, SessionSnapshot};
pub use state_machine::{
    FlowEvent, Intent, PurchaseMachine, PurchaseState, StatKind, StateTransition, Step,
    TimerKind, Transition, decide,
};
pub use stats::Statistics;
pub use telemetry::{
    ChannelSink, StatisticRecord, TelemetryRecord, TelemetrySink, TracingSink, TransitionRecord,
};
pub use timer::TimerSlot;
