//! Purchase server access for the stockbox kiosk.
//!
//! The purchase flow only depends on the [`PurchaseAuthorizer`] trait. Two
//! implementations are provided:
//!
//! - [`HttpPurchaseClient`]: JSON over HTTP with reqwest, one request per
//!   call, per-request timeout from configuration.
//! - [`ScriptedAuthorizer`]: canned answers for tests and `--simulate`.
//!
//! Transport failures never surface as a rejected purchase. A check that
//! cannot reach the server answers
//! [`Pending(NetworkUnreachable)`](PendingCause::NetworkUnreachable) and the
//! caller keeps polling.

pub mod authorizer;
pub mod client;
pub mod error;
pub mod scripted;

pub use authorizer::{
    AnyAuthorizer, AuthorizationStatus, CompletionReport, PendingCause, PurchaseAuthorizer,
};
pub use client::HttpPurchaseClient;
pub use error::{ClientError, Result};
pub use scripted::ScriptedAuthorizer;
