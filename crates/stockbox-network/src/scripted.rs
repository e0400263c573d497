//! Scripted purchase server for tests and simulation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stockbox_core::{Level, SessionId};

use crate::authorizer::{
    AuthorizationStatus, CompletionReport, PendingCause, PurchaseAuthorizer,
};
use crate::error::{ClientError, Result};

#[derive(Debug)]
struct Script {
    answers: VecDeque<AuthorizationStatus>,
    default_answer: AuthorizationStatus,
    checks: Vec<(Level, SessionId)>,
    reports: Vec<CompletionReport>,
    failing_reports: u32,
}

/// Answers checks from a queue and records completion reports.
///
/// Queued answers are consumed one per check; once empty, the default
/// answer (initially "awaiting payment") is returned. Clones share the
/// script.
#[derive(Debug, Clone)]
pub struct ScriptedAuthorizer {
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAuthorizer {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                answers: VecDeque::new(),
                default_answer: AuthorizationStatus::Pending(PendingCause::AwaitingPayment),
                checks: Vec::new(),
                reports: Vec::new(),
                failing_reports: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue one answer.
    pub fn push(&self, answer: AuthorizationStatus) {
        self.lock().answers.push_back(answer);
    }

    /// Answer returned once the queue is empty.
    pub fn set_default(&self, answer: AuthorizationStatus) {
        self.lock().default_answer = answer;
    }

    /// Fail the next `count` completion reports with HTTP 503.
    pub fn fail_reports(&self, count: u32) {
        self.lock().failing_reports = count;
    }

    /// Every check received, oldest first.
    pub fn checks(&self) -> Vec<(Level, SessionId)> {
        self.lock().checks.clone()
    }

    /// Every completion report accepted, oldest first.
    pub fn reports(&self) -> Vec<CompletionReport> {
        self.lock().reports.clone()
    }
}

impl PurchaseAuthorizer for ScriptedAuthorizer {
    async fn check_purchase(&self, level: Level, session_id: SessionId) -> AuthorizationStatus {
        let mut script = self.lock();
        script.checks.push((level, session_id));
        match script.answers.pop_front() {
            Some(answer) => answer,
            None => script.default_answer.clone(),
        }
    }

    async fn confirm_completion(&self, report: &CompletionReport) -> Result<()> {
        let mut script = self.lock();
        if script.failing_reports > 0 {
            script.failing_reports -= 1;
            return Err(ClientError::status(503));
        }
        script.reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(n: u16) -> Level {
        Level::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_queue_then_default() {
        let script = ScriptedAuthorizer::new();
        script.push(AuthorizationStatus::Pending(PendingCause::NetworkUnreachable));
        script.set_default(AuthorizationStatus::valid());

        let session = SessionId::new();
        assert_eq!(
            script.check_purchase(level(2), session).await,
            AuthorizationStatus::Pending(PendingCause::NetworkUnreachable)
        );
        assert_eq!(
            script.check_purchase(level(2), session).await,
            AuthorizationStatus::valid()
        );
        assert_eq!(script.checks(), vec![(level(2), session); 2]);
    }

    #[tokio::test]
    async fn test_failing_reports() {
        let script = ScriptedAuthorizer::new();
        script.fail_reports(1);
        let report = CompletionReport {
            purchase_id: "p".to_string(),
            machine_id: "m".to_string(),
            level: level(1),
            success: true,
        };

        assert!(script.confirm_completion(&report).await.is_err());
        assert!(script.confirm_completion(&report).await.is_ok());
        assert_eq!(script.reports(), vec![report]);
    }
}
