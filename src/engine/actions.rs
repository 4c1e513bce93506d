//! Inbox action executor
//!
//! Applies a matched rule's configured mailbox mutations through the mail
//! provider. Mutations are independent: one failed provider call is logged
//! and the remaining mutations still run.

use crate::mail::{MailProvider, Message};
use crate::rules::Rule;
use std::sync::Arc;

/// Apply the rule's configured actions to a message.
/// Returns human-readable descriptions of the actions that succeeded.
pub async fn apply_actions(
    provider: &Arc<dyn MailProvider>,
    message: &Message,
    rule: &Rule,
) -> Vec<String> {
    let Some(actions) = &rule.actions else {
        return Vec::new();
    };

    let mut applied = Vec::new();

    if actions.mark_as_read {
        match provider.mark_read(&message.id).await {
            Ok(()) => applied.push("marked as read".to_string()),
            Err(e) => log::warn!(
                "Rule '{}': failed to mark message {} as read: {}",
                rule.name,
                message.id,
                e
            ),
        }
    }

    if actions.archive {
        match provider.archive(&message.id).await {
            Ok(()) => applied.push("archived".to_string()),
            Err(e) => log::warn!(
                "Rule '{}': failed to archive message {}: {}",
                rule.name,
                message.id,
                e
            ),
        }
    }

    if let Some(label_id) = &actions.apply_label {
        match provider.apply_label(&message.id, label_id).await {
            Ok(()) => applied.push(format!("label {} applied", label_id)),
            Err(e) => log::warn!(
                "Rule '{}': failed to apply label {} to message {}: {}",
                rule.name,
                label_id,
                message.id,
                e
            ),
        }
    }

    applied
}
