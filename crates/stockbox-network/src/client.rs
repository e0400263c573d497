//! HTTP client for the purchase server.
//!
//! ```text
//! POST {base_url}{check_path}     { machine_id, level, session_id }
//!   200 { "valid": true, "purchase_id": "..." }  -> Valid
//!   200 { "valid": false }                        -> Pending(AwaitingPayment)
//!   200 { "status": "invalid" }                   -> Invalid
//!   404                                           -> Pending(AwaitingPayment)
//!   429, 5xx                                      -> Pending(ServerError)
//!   other 4xx                                     -> Invalid
//!   no answer                                     -> Pending(NetworkUnreachable)
//!
//! POST {base_url}{complete_path}  { purchase_id, machine_id, level, success }
//!   2xx -> Ok, anything else -> Err
//! ```
//!
//! The client performs exactly one request per call. Polling and retry
//! policy belong to the caller.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use stockbox_core::{AuthorizationConfig, Level, SessionId};
use tracing::{debug, info, warn};

use crate::authorizer::{
    AuthorizationStatus, CompletionReport, PendingCause, PurchaseAuthorizer,
};
use crate::error::{ClientError, Result};

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    machine_id: &'a str,
    level: Level,
    session_id: SessionId,
}

#[derive(Debug, Default, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    valid: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    purchase_id: Option<String>,
}

/// 429 Too Many Requests and 425 Too Early ask the client to come back.
fn is_retry_later(status: StatusCode) -> bool {
    matches!(status.as_u16(), 425 | 429)
}

/// Map an HTTP answer to an authorization status.
fn interpret(status: StatusCode, body: Option<CheckResponse>) -> AuthorizationStatus {
    if status == StatusCode::NOT_FOUND {
        return AuthorizationStatus::Pending(PendingCause::AwaitingPayment);
    }
    // timed out before the server decided
    if status == StatusCode::REQUEST_TIMEOUT {
        return AuthorizationStatus::Pending(PendingCause::NetworkUnreachable);
    }
    if status.is_server_error() || is_retry_later(status) {
        return AuthorizationStatus::Pending(PendingCause::ServerError);
    }
    if status.is_client_error() {
        return AuthorizationStatus::Invalid;
    }
    if !status.is_success() {
        return AuthorizationStatus::Pending(PendingCause::ServerError);
    }

    let Some(body) = body else {
        return AuthorizationStatus::Pending(PendingCause::ServerError);
    };

    match body.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("valid" | "paid" | "approved") => AuthorizationStatus::Valid {
            purchase_id: body.purchase_id,
        },
        Some("invalid" | "rejected" | "declined") => AuthorizationStatus::Invalid,
        Some("pending") => AuthorizationStatus::Pending(PendingCause::AwaitingPayment),
        _ => match body.valid {
            Some(true) => AuthorizationStatus::Valid {
                purchase_id: body.purchase_id,
            },
            Some(false) => AuthorizationStatus::Pending(PendingCause::AwaitingPayment),
            None => AuthorizationStatus::Pending(PendingCause::ServerError),
        },
    }
}

/// reqwest-backed [`PurchaseAuthorizer`].
#[derive(Debug, Clone)]
pub struct HttpPurchaseClient {
    client: reqwest::Client,
    check_url: String,
    complete_url: String,
    machine_id: String,
}

impl HttpPurchaseClient {
    /// Build a client for `config`, identifying as `machine_id`.
    pub fn new(config: &AuthorizationConfig, machine_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::configuration(format!("failed to build HTTP client: {e}")))?;

        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            check_url: format!("{}{}", base, config.check_path),
            complete_url: format!("{}{}", base, config.complete_path),
            machine_id: machine_id.into(),
        })
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }
}

impl PurchaseAuthorizer for HttpPurchaseClient {
    async fn check_purchase(&self, level: Level, session_id: SessionId) -> AuthorizationStatus {
        let request = CheckRequest {
            machine_id: &self.machine_id,
            level,
            session_id,
        };

        let response = match self.client.post(&self.check_url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Purchase check for level {} failed: {}", level, e);
                return AuthorizationStatus::Pending(PendingCause::NetworkUnreachable);
            }
        };

        let status = response.status();
        let body = if status.is_success() {
            match response.json::<CheckResponse>().await {
                Ok(body) => Some(body),
                Err(e) => {
                    warn!("Unreadable purchase check response: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let answer = interpret(status, body);
        debug!(
            "Purchase check level {} session {}: HTTP {} -> {:?}",
            level, session_id, status, answer
        );
        answer
    }

    async fn confirm_completion(&self, report: &CompletionReport) -> Result<()> {
        let response = self
            .client
            .post(&self.complete_url)
            .json(report)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "Completion report for {} rejected: HTTP {}",
                report.purchase_id, status
            );
            return Err(ClientError::status(status.as_u16()));
        }

        info!("Completion reported for purchase {}", report.purchase_id);
        Ok(())
    }
}
