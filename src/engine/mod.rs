//! Rule processing engine
//!
//! Top-level orchestrator: loads the account's active rules, evaluates each
//! candidate message against each rule and drives the per-pair pipeline
//! (match, dedup check, inbox actions, notification fan-out, outcome
//! recording, processed marker).

pub mod actions;
pub mod dispatch;
pub mod recorder;

#[cfg(test)]
mod tests;

pub use dispatch::{DispatchOutcome, NotificationDispatcher};

use crate::channels::{EmailChannel, WhatsappChannel};
use crate::config::EngineConfig;
use crate::db::{ActivityStatus, Database, DbError, NewActivityLogEntry};
use crate::mail::{DateRange, HistoryDelta, MailError, MailProvider, Message};
use crate::rules::{matcher, Rule};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Engine error types
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Mail provider error: {0}")]
    Mail(#[from] MailError),
}

/// How a run ended, for the dashboard to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No candidate messages were supplied or found
    NothingToProcess,
    /// Candidates were evaluated but no rule fired
    NoMatches,
    /// At least one rule fired
    Completed,
    /// No valid mail-provider credential; run aborted with zero matches
    NotConnected,
    /// Run-level failure (e.g. the rule list could not be loaded)
    Failed(String),
}

/// Summary of one engine invocation
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Pairs where the matcher fired, including already-processed ones
    pub matched: u32,
    /// Pairs that went through the full pipeline this run
    pub processed: u32,
    /// Per-pair errors that were caught and skipped
    pub errors: Vec<String>,
}

impl RunSummary {
    fn new(outcome: RunOutcome) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            outcome,
            matched: 0,
            processed: 0,
            errors: Vec::new(),
        }
    }
}

enum PairOutcome {
    NoMatch,
    AlreadyProcessed,
    Processed,
}

/// Settings key holding the incremental history cursor for an account
fn cursor_key(account_id: i64) -> String {
    format!("history_cursor:{}", account_id)
}

/// Rule processing engine for one account
pub struct Engine {
    db: Database,
    provider: Arc<dyn MailProvider>,
    dispatcher: NotificationDispatcher,
    account_id: i64,
    scan_limit: u32,
}

impl Engine {
    pub fn new(
        db: Database,
        provider: Arc<dyn MailProvider>,
        email: Option<Arc<dyn EmailChannel>>,
        whatsapp: Option<Arc<dyn WhatsappChannel>>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            db,
            dispatcher: NotificationDispatcher::new(email, whatsapp, config.account_id),
            provider,
            account_id: config.account_id,
            scan_limit: config.scan_limit,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Full scan over the most recent unread messages (manual "check now"
    /// and poll ticks)
    pub async fn check_now(&self) -> RunSummary {
        log::info!(
            "Checking {} most recent unread messages for account {}",
            self.scan_limit,
            self.account_id
        );

        match self.provider.list_unread(self.scan_limit).await {
            Ok(messages) => self.process_messages(&messages).await,
            Err(MailError::NotConnected) => {
                log::warn!("Mail provider not connected for account {}", self.account_id);
                RunSummary::new(RunOutcome::NotConnected)
            }
            Err(e) => self.failed_run(format!("Failed to list unread messages: {}", e)),
        }
    }

    /// Full scan over all of today's messages, paginated until exhaustion
    /// (scheduled batch job)
    pub async fn process_today(&self) -> RunSummary {
        let now = Utc::now();
        let range = DateRange {
            after: now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().to_rfc3339())
                .unwrap_or_else(|| now.to_rfc3339()),
            before: now.to_rfc3339(),
        };

        let mut messages = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = match self
                .provider
                .list_by_date_range(&range, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(MailError::NotConnected) => {
                    return RunSummary::new(RunOutcome::NotConnected);
                }
                Err(e) => {
                    return self.failed_run(format!("Failed to list today's messages: {}", e));
                }
            };

            messages.extend(page.messages);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        log::info!(
            "Processing {} messages from today for account {}",
            messages.len(),
            self.account_id
        );
        self.process_messages(&messages).await
    }

    /// Incremental run from a push-notification cursor. An expired cursor
    /// falls back to a full unread scan.
    pub async fn process_push(&self, cursor: &str) -> RunSummary {
        match self.provider.history_since(cursor).await {
            Ok(HistoryDelta::Messages {
                messages,
                new_cursor,
            }) => {
                if let Err(e) = self.db.set_setting(&cursor_key(self.account_id), &new_cursor) {
                    log::warn!("Failed to persist history cursor: {}", e);
                }
                log::info!(
                    "Incremental run: {} new messages for account {}",
                    messages.len(),
                    self.account_id
                );
                self.process_messages(&messages).await
            }
            Ok(HistoryDelta::CursorExpired) => {
                log::info!("History cursor expired, falling back to full scan");
                self.check_now().await
            }
            Err(MailError::NotConnected) => RunSummary::new(RunOutcome::NotConnected),
            Err(e) => self.failed_run(format!("History fetch failed: {}", e)),
        }
    }

    /// Last persisted incremental cursor for this account
    pub fn stored_cursor(&self) -> Option<String> {
        self.db
            .get_setting(&cursor_key(self.account_id))
            .unwrap_or_default()
    }

    /// Evaluate the supplied candidate messages against the account's
    /// active rules
    pub async fn process_messages(&self, messages: &[Message]) -> RunSummary {
        if messages.is_empty() {
            return RunSummary::new(RunOutcome::NothingToProcess);
        }

        let rules = match self.db.list_active_rules(self.account_id) {
            Ok(rules) => rules,
            Err(e) => {
                return self.failed_run(format!("Failed to load rules: {}", e));
            }
        };

        if rules.is_empty() {
            log::debug!("No active rules for account {}", self.account_id);
            return RunSummary::new(RunOutcome::NoMatches);
        }

        let mut summary = RunSummary::new(RunOutcome::NoMatches);
        log::info!(
            "Run {}: {} messages x {} rules",
            summary.run_id,
            messages.len(),
            rules.len()
        );

        for message in messages {
            for rule in &rules {
                match self.process_pair(message, rule).await {
                    Ok(PairOutcome::NoMatch) => {}
                    Ok(PairOutcome::AlreadyProcessed) => {
                        summary.matched += 1;
                    }
                    Ok(PairOutcome::Processed) => {
                        summary.matched += 1;
                        summary.processed += 1;
                    }
                    Err(e) => {
                        // One bad pair never aborts the batch
                        let detail = format!(
                            "Rule '{}' on message {}: {}",
                            rule.name, message.id, e
                        );
                        log::error!("Pair processing failed: {}", detail);
                        self.log_pair_error(rule, message, &e);
                        summary.errors.push(detail);
                    }
                }
            }
        }

        if summary.matched > 0 {
            summary.outcome = RunOutcome::Completed;
        }

        log::info!(
            "Run {} finished: {} matched, {} processed, {} errors",
            summary.run_id,
            summary.matched,
            summary.processed,
            summary.errors.len()
        );
        summary
    }

    async fn process_pair(&self, message: &Message, rule: &Rule) -> Result<PairOutcome, EngineError> {
        let outcome = matcher::evaluate(message, rule);
        if !outcome.is_match {
            return Ok(PairOutcome::NoMatch);
        }

        if self.db.has_processed(&message.id, rule.id)? {
            log::debug!(
                "Message {} already processed by rule '{}', skipping",
                message.id,
                rule.name
            );
            return Ok(PairOutcome::AlreadyProcessed);
        }

        log::info!(
            "Rule '{}' matched message '{}' ({})",
            rule.name,
            message.subject,
            message.id
        );

        let actions_taken = actions::apply_actions(&self.provider, message, rule).await;
        let dispatch = self.dispatcher.dispatch(message, rule, &outcome.criteria).await;

        recorder::record_match(
            &self.db,
            rule,
            message,
            &actions_taken,
            &outcome.criteria,
            &dispatch,
        )?;

        // Marker policy: write when something was delivered, or when the
        // rule has no deliverable channel at all. All-channels-failed means
        // no marker, so the pair retries next run.
        if dispatch.any_sent() || rule.has_no_channels() {
            self.db
                .mark_processed(self.account_id, &message.id, rule.id, "notification")?;
        }

        Ok(PairOutcome::Processed)
    }

    fn failed_run(&self, message: String) -> RunSummary {
        log::error!("Run aborted: {}", message);

        let entry = NewActivityLogEntry {
            account_id: self.account_id,
            event_type: "run_failure".to_string(),
            title: "Rule processing failed".to_string(),
            description: message.clone(),
            status: ActivityStatus::Error,
            details: None,
        };
        if let Err(e) = self.db.insert_log_entry(&entry) {
            log::error!("Failed to record run failure: {}", e);
        }

        RunSummary::new(RunOutcome::Failed(message))
    }

    fn log_pair_error(&self, rule: &Rule, message: &Message, error: &EngineError) {
        let entry = NewActivityLogEntry {
            account_id: self.account_id,
            event_type: "rule_error".to_string(),
            title: rule.name.clone(),
            description: format!(
                "Error processing message \"{}\": {}",
                message.subject, error
            ),
            status: ActivityStatus::Error,
            details: Some(serde_json::json!({ "message_id": message.id })),
        };
        if let Err(e) = self.db.insert_log_entry(&entry) {
            log::error!("Failed to record pair error: {}", e);
        }
    }
}
