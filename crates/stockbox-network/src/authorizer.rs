//! Contract between the purchase flow and the purchase server.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use stockbox_core::{Level, SessionId};

use crate::client::HttpPurchaseClient;
use crate::error::Result;
use crate::scripted::ScriptedAuthorizer;

/// Why an authorization is still undecided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingCause {
    /// The server has no payment for this level yet.
    AwaitingPayment,

    /// The server could not be reached.
    NetworkUnreachable,

    /// The server answered with an error.
    ServerError,
}

impl fmt::Display for PendingCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingCause::AwaitingPayment => write!(f, "awaiting payment"),
            PendingCause::NetworkUnreachable => write!(f, "network unreachable"),
            PendingCause::ServerError => write!(f, "server error"),
        }
    }
}

/// Answer to one authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// Paid. The server may assign its own purchase id.
    Valid { purchase_id: Option<String> },

    /// Rejected for good.
    Invalid,

    /// Ask again later.
    Pending(PendingCause),
}

impl AuthorizationStatus {
    pub fn valid() -> Self {
        Self::Valid { purchase_id: None }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Completion notice sent once the compartment is closed and locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub purchase_id: String,
    pub machine_id: String,
    pub level: Level,
    pub success: bool,
}

/// Remote purchase authorization.
///
/// Both calls must be safe to repeat. `check_purchase` never fails:
/// transport trouble is reported as [`AuthorizationStatus::Pending`], never
/// as `Invalid`.
pub trait PurchaseAuthorizer: Send + Sync + 'static {
    fn check_purchase(
        &self,
        level: Level,
        session_id: SessionId,
    ) -> impl Future<Output = AuthorizationStatus> + Send;

    fn confirm_completion(
        &self,
        report: &CompletionReport,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Either authorizer, chosen at startup.
#[derive(Debug, Clone)]
pub enum AnyAuthorizer {
    Http(HttpPurchaseClient),
    Scripted(ScriptedAuthorizer),
}

impl PurchaseAuthorizer for AnyAuthorizer {
    async fn check_purchase(&self, level: Level, session_id: SessionId) -> AuthorizationStatus {
        match self {
            AnyAuthorizer::Http(client) => client.check_purchase(level, session_id).await,
            AnyAuthorizer::Scripted(script) => script.check_purchase(level, session_id).await,
        }
    }

    async fn confirm_completion(&self, report: &CompletionReport) -> Result<()> {
        match self {
            AnyAuthorizer::Http(client) => client.confirm_completion(report).await,
            AnyAuthorizer::Scripted(script) => script.confirm_completion(report).await,
        }
    }
}
