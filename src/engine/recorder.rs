//! Outcome recorder
//!
//! Persists the result of one rule match: one notification-history row per
//! channel-recipient attempt, and exactly one activity-log row summarizing
//! the event. The history is a per-recipient ledger; the log is the
//! per-event narrative the dashboard renders.

use super::dispatch::DispatchOutcome;
use crate::channels::ChannelResult;
use crate::db::{
    ActivityStatus, Database, DbResult, NewActivityLogEntry, NewNotificationRecord,
    NotificationStatus,
};
use crate::mail::Message;
use crate::rules::Rule;

/// Record the outcome of a processed (message, rule) match
pub fn record_match(
    db: &Database,
    rule: &Rule,
    message: &Message,
    actions_taken: &[String],
    criteria: &[String],
    outcome: &DispatchOutcome,
) -> DbResult<()> {
    for result in &outcome.email_results {
        insert_channel_record(db, rule, "email", result)?;
    }
    for result in &outcome.whatsapp_results {
        insert_channel_record(db, rule, "whatsapp", result)?;
    }

    let sent = outcome
        .email_results
        .iter()
        .chain(&outcome.whatsapp_results)
        .filter(|r| r.sent)
        .count();

    let status = if outcome.any_sent() {
        ActivityStatus::Success
    } else if outcome.attempts() == 0 {
        // Rule matched but has no deliverable channel configured
        ActivityStatus::Info
    } else {
        ActivityStatus::Error
    };

    let mut description = format!(
        "{} of {} notifications sent for message \"{}\"",
        sent,
        outcome.attempts(),
        message.subject
    );
    if !actions_taken.is_empty() {
        description.push_str(&format!("; actions: {}", actions_taken.join(", ")));
    }

    db.insert_log_entry(&NewActivityLogEntry {
        account_id: rule.account_id,
        event_type: "rule_match".to_string(),
        title: rule.name.clone(),
        description,
        status,
        details: Some(serde_json::json!({
            "message_id": message.id,
            "thread_id": message.thread_id,
            "criteria": criteria,
            "emails_sent": outcome.email_results.iter().filter(|r| r.sent).count(),
            "whatsapp_sent": outcome.whatsapp_results.iter().filter(|r| r.sent).count(),
            "actions": actions_taken,
        })),
    })?;

    Ok(())
}

fn insert_channel_record(
    db: &Database,
    rule: &Rule,
    channel: &str,
    result: &ChannelResult,
) -> DbResult<()> {
    db.insert_notification(&NewNotificationRecord {
        account_id: rule.account_id,
        rule_name: rule.name.clone(),
        channel: channel.to_string(),
        recipient: result.recipient.clone(),
        status: if result.sent {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        },
        error: result.error.clone(),
    })?;
    Ok(())
}
