//! Engine integration tests: full pipeline against an in-memory store with
//! fake provider and channels.

use super::*;
use crate::channels::{ChannelError, SendResult};
use crate::mail::{MailResult, MessagePage};
use crate::rules::{MatchCondition, NewRule, RuleActions, RuleStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeProvider {
    unread: Mutex<Vec<Message>>,
    pages: Mutex<Vec<MessagePage>>,
    history: Mutex<Option<HistoryDelta>>,
    not_connected: bool,
    mark_read_calls: AtomicU32,
    archive_calls: AtomicU32,
    label_calls: AtomicU32,
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn list_unread(&self, limit: u32) -> MailResult<Vec<Message>> {
        if self.not_connected {
            return Err(MailError::NotConnected);
        }
        let unread = self.unread.lock().unwrap();
        Ok(unread.iter().take(limit as usize).cloned().collect())
    }

    async fn list_by_date_range(
        &self,
        _range: &DateRange,
        _page_token: Option<&str>,
    ) -> MailResult<MessagePage> {
        let mut pages = self.pages.lock().unwrap();
        if pages.is_empty() {
            Ok(MessagePage::default())
        } else {
            Ok(pages.remove(0))
        }
    }

    async fn mark_read(&self, _message_id: &str) -> MailResult<()> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn archive(&self, _message_id: &str) -> MailResult<()> {
        self.archive_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn apply_label(&self, _message_id: &str, _label_id: &str) -> MailResult<()> {
        self.label_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn history_since(&self, _cursor: &str) -> MailResult<HistoryDelta> {
        match self.history.lock().unwrap().take() {
            Some(delta) => Ok(delta),
            None => Ok(HistoryDelta::Messages {
                messages: vec![],
                new_cursor: "0".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct CountingEmail {
    sent: Mutex<Vec<String>>,
    fail_all: bool,
}

#[async_trait]
impl crate::channels::EmailChannel for CountingEmail {
    async fn send(&self, to: &str, _subject: &str, _html: &str, _text: &str) -> SendResult {
        if self.fail_all {
            return Err(ChannelError::Send("relay down".to_string()));
        }
        self.sent.lock().unwrap().push(to.to_string());
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn message(id: &str, subject: &str, from: &str) -> Message {
    Message {
        id: id.to_string(),
        thread_id: format!("t-{}", id),
        subject: subject.to_string(),
        from: from.to_string(),
        to: "me@example.com".to_string(),
        date: "2025-06-01T10:00:00Z".to_string(),
        snippet: String::new(),
        label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
        is_unread: true,
    }
}

fn invoice_rule(emails: &[&str]) -> NewRule {
    NewRule {
        account_id: 1,
        name: "Invoices".to_string(),
        subject_filter: Some("invoice".to_string()),
        sender_filter: None,
        keywords: vec![],
        condition: MatchCondition::Contains,
        status: RuleStatus::Active,
        notification_emails: emails.iter().map(|s| s.to_string()).collect(),
        whatsapp_numbers: vec![],
        actions: None,
    }
}

struct Harness {
    engine: Engine,
    provider: Arc<FakeProvider>,
    email: Arc<CountingEmail>,
}

fn harness(provider: FakeProvider, email: CountingEmail) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let db = Database::in_memory().unwrap();
    let provider = Arc::new(provider);
    let email = Arc::new(email);
    let config = EngineConfig::default();

    let engine = Engine::new(
        db,
        provider.clone() as Arc<dyn MailProvider>,
        Some(email.clone() as Arc<dyn crate::channels::EmailChannel>),
        None,
        &config,
    );

    Harness {
        engine,
        provider,
        email,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_contains_match_sends_email() {
    let h = harness(FakeProvider::default(), CountingEmail::default());
    h.engine.database().insert_rule(&invoice_rule(&["alerts@me.com"])).unwrap();

    let summary = h
        .engine
        .process_messages(&[message("m1", "Invoice #123", "billing@vendor.com")])
        .await;

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.processed, 1);
    assert!(summary.errors.is_empty());
    assert_eq!(*h.email.sent.lock().unwrap(), vec!["alerts@me.com"]);

    let records = h.engine.database().list_notifications(1, 10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, "sent");
}

#[tokio::test]
async fn test_no_match_no_side_effects() {
    let h = harness(FakeProvider::default(), CountingEmail::default());
    let rule_id = {
        let mut rule = invoice_rule(&["alerts@me.com"]);
        rule.condition = MatchCondition::Exact;
        h.engine.database().insert_rule(&rule).unwrap()
    };

    let summary = h
        .engine
        .process_messages(&[message("m1", "Hello", "x@y.com")])
        .await;

    assert_eq!(summary.outcome, RunOutcome::NoMatches);
    assert_eq!(summary.matched, 0);
    assert!(h.email.sent.lock().unwrap().is_empty());
    assert!(!h.engine.database().has_processed("m1", rule_id).unwrap());
    assert!(h.engine.database().list_notifications(1, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = harness(FakeProvider::default(), CountingEmail::default());
    let mut rule = invoice_rule(&["alerts@me.com"]);
    rule.actions = Some(RuleActions {
        mark_as_read: true,
        archive: false,
        apply_label: None,
    });
    h.engine.database().insert_rule(&rule).unwrap();

    let candidates = [message("m1", "Invoice #123", "billing@vendor.com")];

    let first = h.engine.process_messages(&candidates).await;
    assert_eq!(first.processed, 1);
    assert_eq!(h.provider.mark_read_calls.load(Ordering::SeqCst), 1);

    let second = h.engine.process_messages(&candidates).await;
    assert_eq!(second.matched, 1);
    assert_eq!(second.processed, 0);

    // No new sends, no new provider mutations, no new history rows
    assert_eq!(h.email.sent.lock().unwrap().len(), 1);
    assert_eq!(h.provider.mark_read_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.database().list_notifications(1, 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_all_sends_failed_pair_retries_next_run() {
    let h = harness(
        FakeProvider::default(),
        CountingEmail {
            fail_all: true,
            ..Default::default()
        },
    );
    let rule_id = h.engine.database().insert_rule(&invoice_rule(&["alerts@me.com"])).unwrap();

    let candidates = [message("m1", "Invoice #123", "billing@vendor.com")];
    h.engine.process_messages(&candidates).await;

    // Nothing delivered: no marker, so the pair is retried
    assert!(!h.engine.database().has_processed("m1", rule_id).unwrap());

    h.engine.process_messages(&candidates).await;
    let records = h.engine.database().list_notifications(1, 10).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == "failed"));
}

#[tokio::test]
async fn test_rule_without_channels_marked_processed() {
    let h = harness(FakeProvider::default(), CountingEmail::default());
    let mut rule = invoice_rule(&[]);
    rule.actions = Some(RuleActions {
        mark_as_read: true,
        archive: true,
        apply_label: None,
    });
    let rule_id = h.engine.database().insert_rule(&rule).unwrap();

    let candidates = [message("m1", "Invoice #123", "billing@vendor.com")];
    h.engine.process_messages(&candidates).await;

    // No deliverable channel, but the marker still prevents reprocessing
    assert!(h.engine.database().has_processed("m1", rule_id).unwrap());

    h.engine.process_messages(&candidates).await;
    assert_eq!(h.provider.mark_read_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.provider.archive_calls.load(Ordering::SeqCst), 1);

    let entries = h.engine.database().list_log_entries(1, 10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, "info");
}

#[tokio::test]
async fn test_empty_candidates_reports_nothing_to_process() {
    let h = harness(FakeProvider::default(), CountingEmail::default());
    h.engine.database().insert_rule(&invoice_rule(&["alerts@me.com"])).unwrap();

    let summary = h.engine.process_messages(&[]).await;
    assert_eq!(summary.outcome, RunOutcome::NothingToProcess);
}

#[tokio::test]
async fn test_not_connected_aborts_with_zero_matches() {
    let h = harness(
        FakeProvider {
            not_connected: true,
            ..Default::default()
        },
        CountingEmail::default(),
    );
    h.engine.database().insert_rule(&invoice_rule(&["alerts@me.com"])).unwrap();

    let summary = h.engine.check_now().await;
    assert_eq!(summary.outcome, RunOutcome::NotConnected);
    assert_eq!(summary.matched, 0);
    assert!(h.email.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_check_now_respects_scan_limit() {
    let unread: Vec<Message> = (0..50)
        .map(|i| message(&format!("m{}", i), "Invoice", "billing@vendor.com"))
        .collect();
    let h = harness(
        FakeProvider {
            unread: Mutex::new(unread),
            ..Default::default()
        },
        CountingEmail::default(),
    );
    h.engine.database().insert_rule(&invoice_rule(&["alerts@me.com"])).unwrap();

    let summary = h.engine.check_now().await;

    // Default scan limit is 20
    assert_eq!(summary.processed, 20);
}

#[tokio::test]
async fn test_process_today_paginates_until_exhaustion() {
    let pages = vec![
        MessagePage {
            messages: vec![message("m1", "Invoice A", "x@y.com")],
            next_page_token: Some("page-2".to_string()),
        },
        MessagePage {
            messages: vec![message("m2", "Invoice B", "x@y.com")],
            next_page_token: None,
        },
    ];
    let h = harness(
        FakeProvider {
            pages: Mutex::new(pages),
            ..Default::default()
        },
        CountingEmail::default(),
    );
    h.engine.database().insert_rule(&invoice_rule(&["alerts@me.com"])).unwrap();

    let summary = h.engine.process_today().await;
    assert_eq!(summary.processed, 2);
}

#[tokio::test]
async fn test_incremental_run_stores_cursor() {
    let h = harness(
        FakeProvider {
            history: Mutex::new(Some(HistoryDelta::Messages {
                messages: vec![message("m1", "Invoice #9", "billing@vendor.com")],
                new_cursor: "cursor-99".to_string(),
            })),
            ..Default::default()
        },
        CountingEmail::default(),
    );
    h.engine.database().insert_rule(&invoice_rule(&["alerts@me.com"])).unwrap();

    let summary = h.engine.process_push("cursor-42").await;

    assert_eq!(summary.processed, 1);
    assert_eq!(h.engine.stored_cursor(), Some("cursor-99".to_string()));
}

#[tokio::test]
async fn test_stale_cursor_falls_back_to_full_scan() {
    let h = harness(
        FakeProvider {
            unread: Mutex::new(vec![message("m1", "Invoice #9", "billing@vendor.com")]),
            history: Mutex::new(Some(HistoryDelta::CursorExpired)),
            ..Default::default()
        },
        CountingEmail::default(),
    );
    h.engine.database().insert_rule(&invoice_rule(&["alerts@me.com"])).unwrap();

    let summary = h.engine.process_push("ancient-cursor").await;

    // Fallback processed the unread scan instead of erroring
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.processed, 1);
    assert_eq!(*h.email.sent.lock().unwrap(), vec!["alerts@me.com"]);
}

#[tokio::test]
async fn test_paused_rules_are_not_evaluated() {
    let h = harness(FakeProvider::default(), CountingEmail::default());
    let rule_id = h.engine.database().insert_rule(&invoice_rule(&["alerts@me.com"])).unwrap();
    h.engine
        .database()
        .set_rule_status(rule_id, RuleStatus::Paused)
        .unwrap();

    let summary = h
        .engine
        .process_messages(&[message("m1", "Invoice #123", "billing@vendor.com")])
        .await;

    assert_eq!(summary.outcome, RunOutcome::NoMatches);
    assert!(h.email.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_multiple_rules_one_message() {
    let h = harness(FakeProvider::default(), CountingEmail::default());
    h.engine.database().insert_rule(&invoice_rule(&["a@me.com"])).unwrap();
    let mut always = invoice_rule(&["b@me.com"]);
    always.name = "Everything".to_string();
    always.subject_filter = None;
    always.condition = MatchCondition::Always;
    h.engine.database().insert_rule(&always).unwrap();

    let summary = h
        .engine
        .process_messages(&[message("m1", "Invoice #123", "billing@vendor.com")])
        .await;

    assert_eq!(summary.processed, 2);
    let mut sent = h.email.sent.lock().unwrap().clone();
    sent.sort();
    assert_eq!(sent, vec!["a@me.com", "b@me.com"]);
    assert_eq!(h.engine.database().list_log_entries(1, 10).unwrap().len(), 2);
}
