//! Notification dispatcher
//!
//! Fans a matched rule out to its email and WhatsApp recipients. Recipients
//! are independent: sends within a channel run concurrently and one failure
//! never blocks the others. Writing the outcome to the history store is the
//! recorder's job, not the dispatcher's.

use crate::channels::{ChannelResult, EmailChannel, WhatsappChannel};
use crate::mail::Message;
use crate::rules::Rule;
use futures::future::join_all;
use std::sync::Arc;

/// Aggregated fan-out result for one rule match
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub email_results: Vec<ChannelResult>,
    pub whatsapp_results: Vec<ChannelResult>,
}

impl DispatchOutcome {
    /// True when at least one recipient on any channel got the notification
    pub fn any_sent(&self) -> bool {
        self.email_results.iter().any(|r| r.sent)
            || self.whatsapp_results.iter().any(|r| r.sent)
    }

    /// Total attempts across both channels
    pub fn attempts(&self) -> usize {
        self.email_results.len() + self.whatsapp_results.len()
    }
}

/// Dispatches notifications for matched rules
pub struct NotificationDispatcher {
    email: Option<Arc<dyn EmailChannel>>,
    whatsapp: Option<Arc<dyn WhatsappChannel>>,
    account_id: i64,
}

impl NotificationDispatcher {
    pub fn new(
        email: Option<Arc<dyn EmailChannel>>,
        whatsapp: Option<Arc<dyn WhatsappChannel>>,
        account_id: i64,
    ) -> Self {
        Self {
            email,
            whatsapp,
            account_id,
        }
    }

    /// Fan out to all configured recipients of the rule
    pub async fn dispatch(
        &self,
        message: &Message,
        rule: &Rule,
        criteria: &[String],
    ) -> DispatchOutcome {
        let (email_results, whatsapp_results) = tokio::join!(
            self.dispatch_email(message, rule, criteria),
            self.dispatch_whatsapp(message, rule, criteria),
        );

        DispatchOutcome {
            email_results,
            whatsapp_results,
        }
    }

    async fn dispatch_email(
        &self,
        message: &Message,
        rule: &Rule,
        criteria: &[String],
    ) -> Vec<ChannelResult> {
        let recipients = rule.email_recipients();
        if recipients.is_empty() {
            return Vec::new();
        }

        let Some(channel) = &self.email else {
            log::warn!(
                "Rule '{}' has email recipients but no email channel is configured",
                rule.name
            );
            return recipients
                .into_iter()
                .map(|r| ChannelResult::failed(r, "Email channel not configured"))
                .collect();
        };

        let subject = render_email_subject(rule);
        let body_html = render_email_html(message, rule, criteria);
        let body_text = render_email_text(message, rule, criteria);

        let sends = recipients.into_iter().map(|recipient| {
            let channel = Arc::clone(channel);
            let subject = subject.clone();
            let body_html = body_html.clone();
            let body_text = body_text.clone();
            async move {
                match channel.send(&recipient, &subject, &body_html, &body_text).await {
                    Ok(()) => ChannelResult::sent(recipient),
                    Err(e) => {
                        log::warn!("Email to {} failed: {}", recipient, e);
                        ChannelResult::failed(recipient, e.to_string())
                    }
                }
            }
        });

        join_all(sends).await
    }

    async fn dispatch_whatsapp(
        &self,
        message: &Message,
        rule: &Rule,
        criteria: &[String],
    ) -> Vec<ChannelResult> {
        let recipients = rule.whatsapp_recipients();
        if recipients.is_empty() {
            return Vec::new();
        }

        let Some(channel) = &self.whatsapp else {
            log::warn!(
                "Rule '{}' has WhatsApp recipients but no gateway is configured",
                rule.name
            );
            return recipients
                .into_iter()
                .map(|r| ChannelResult::failed(r, "WhatsApp channel not configured"))
                .collect();
        };

        // No connected instance: skip the whole branch, record nothing
        let instance_id = match channel.connected_instance(self.account_id).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                log::info!(
                    "Rule '{}': no WhatsApp instance connected for account {}, skipping",
                    rule.name,
                    self.account_id
                );
                return Vec::new();
            }
            Err(e) => {
                log::warn!("WhatsApp instance lookup failed: {}", e);
                return recipients
                    .into_iter()
                    .map(|r| ChannelResult::failed(r, e.to_string()))
                    .collect();
            }
        };

        let text = render_whatsapp_text(message, rule, criteria);

        let sends = recipients.into_iter().map(|recipient| {
            let channel = Arc::clone(channel);
            let instance_id = instance_id.clone();
            let text = text.clone();
            async move {
                match channel.send(&instance_id, &recipient, &text).await {
                    Ok(()) => ChannelResult::sent(recipient),
                    Err(e) => {
                        log::warn!("WhatsApp to {} failed: {}", recipient, e);
                        ChannelResult::failed(recipient, e.to_string())
                    }
                }
            }
        });

        join_all(sends).await
    }
}

fn render_email_subject(rule: &Rule) -> String {
    format!("🔔 Regra \"{}\" ativada", rule.name)
}

fn render_email_html(message: &Message, rule: &Rule, criteria: &[String]) -> String {
    let criteria_items: String = criteria
        .iter()
        .map(|c| format!("<li>{}</li>", c))
        .collect();

    format!(
        "<h2>Regra \"{}\" encontrou uma nova mensagem</h2>\
         <p><strong>De:</strong> {}</p>\
         <p><strong>Assunto:</strong> {}</p>\
         <p><strong>Resumo:</strong> {}</p>\
         <p><strong>Critérios atendidos:</strong></p>\
         <ul>{}</ul>",
        rule.name, message.from, message.subject, message.snippet, criteria_items
    )
}

fn render_email_text(message: &Message, rule: &Rule, criteria: &[String]) -> String {
    format!(
        "Regra \"{}\" encontrou uma nova mensagem\n\n\
         De: {}\n\
         Assunto: {}\n\
         Resumo: {}\n\n\
         Critérios atendidos:\n{}",
        rule.name,
        message.from,
        message.subject,
        message.snippet,
        criteria
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n")
    )
}

fn render_whatsapp_text(message: &Message, rule: &Rule, criteria: &[String]) -> String {
    format!(
        "🔔 *{}*\n\nDe: {}\nAssunto: {}\n\n{}\n\nCritérios: {}",
        rule.name,
        message.from,
        message.subject,
        message.snippet,
        criteria.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelError, SendResult};
    use crate::rules::{MatchCondition, RuleStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeEmail {
        fail_for: Vec<String>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailChannel for FakeEmail {
        async fn send(&self, to: &str, _subject: &str, _html: &str, _text: &str) -> SendResult {
            if self.fail_for.iter().any(|f| f == to) {
                return Err(ChannelError::Send("mailbox unavailable".to_string()));
            }
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    struct FakeWhatsapp {
        instance: Option<String>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WhatsappChannel for FakeWhatsapp {
        async fn connected_instance(&self, _account_id: i64) -> Result<Option<String>, ChannelError> {
            Ok(self.instance.clone())
        }

        async fn send(&self, _instance_id: &str, to_number: &str, _text: &str) -> SendResult {
            self.sent.lock().unwrap().push(to_number.to_string());
            Ok(())
        }
    }

    fn test_rule(emails: &[&str], numbers: &[&str]) -> Rule {
        Rule {
            id: 1,
            account_id: 1,
            name: "Invoices".to_string(),
            subject_filter: Some("invoice".to_string()),
            sender_filter: None,
            keywords: vec![],
            condition: MatchCondition::Contains,
            status: RuleStatus::Active,
            notification_emails: emails.iter().map(|s| s.to_string()).collect(),
            notification_email: None,
            whatsapp_numbers: numbers.iter().map(|s| s.to_string()).collect(),
            actions: None,
            created_at: "2025-01-01".to_string(),
            updated_at: "2025-01-01".to_string(),
        }
    }

    fn test_message() -> Message {
        Message {
            id: "msg-1".to_string(),
            thread_id: "t-1".to_string(),
            subject: "Invoice #123".to_string(),
            from: "billing@vendor.com".to_string(),
            to: "me@example.com".to_string(),
            date: "2025-06-01T10:00:00Z".to_string(),
            snippet: "Your invoice is attached".to_string(),
            label_ids: vec![],
            is_unread: true,
        }
    }

    #[tokio::test]
    async fn test_partial_failure_independence() {
        let email = Arc::new(FakeEmail {
            fail_for: vec!["broken@example.com".to_string()],
            sent: Mutex::new(vec![]),
        });
        let dispatcher = NotificationDispatcher::new(Some(email.clone()), None, 1);
        let rule = test_rule(&["broken@example.com", "ok@example.com"], &[]);

        let outcome = dispatcher.dispatch(&test_message(), &rule, &[]).await;

        assert_eq!(outcome.email_results.len(), 2);
        assert!(!outcome.email_results[0].sent);
        assert!(outcome.email_results[0].error.is_some());
        assert!(outcome.email_results[1].sent);
        assert!(outcome.any_sent());
        assert_eq!(*email.sent.lock().unwrap(), vec!["ok@example.com"]);
    }

    #[tokio::test]
    async fn test_fanout_cardinality() {
        let email = Arc::new(FakeEmail {
            fail_for: vec![],
            sent: Mutex::new(vec![]),
        });
        let whatsapp = Arc::new(FakeWhatsapp {
            instance: Some("inst-1".to_string()),
            sent: Mutex::new(vec![]),
        });
        let dispatcher = NotificationDispatcher::new(Some(email), Some(whatsapp), 1);
        let rule = test_rule(
            &["a@example.com", "b@example.com", "c@example.com"],
            &["5511999999999"],
        );

        let outcome = dispatcher.dispatch(&test_message(), &rule, &[]).await;

        assert_eq!(outcome.email_results.len(), 3);
        assert_eq!(outcome.whatsapp_results.len(), 1);
        assert_eq!(outcome.attempts(), 4);
        assert!(outcome.any_sent());
    }

    #[tokio::test]
    async fn test_no_instance_skips_whatsapp_branch() {
        let email = Arc::new(FakeEmail {
            fail_for: vec![],
            sent: Mutex::new(vec![]),
        });
        let whatsapp = Arc::new(FakeWhatsapp {
            instance: None,
            sent: Mutex::new(vec![]),
        });
        let dispatcher = NotificationDispatcher::new(Some(email), Some(whatsapp.clone()), 1);
        let rule = test_rule(&["a@example.com"], &["5511999999999"]);

        let outcome = dispatcher.dispatch(&test_message(), &rule, &[]).await;

        // No ChannelResult at all for WhatsApp; email branch unaffected
        assert!(outcome.whatsapp_results.is_empty());
        assert_eq!(outcome.email_results.len(), 1);
        assert!(outcome.email_results[0].sent);
        assert!(whatsapp.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_channels_configured() {
        let dispatcher = NotificationDispatcher::new(None, None, 1);
        let rule = test_rule(&[], &[]);

        let outcome = dispatcher.dispatch(&test_message(), &rule, &[]).await;

        assert_eq!(outcome.attempts(), 0);
        assert!(!outcome.any_sent());
    }

    #[tokio::test]
    async fn test_missing_channel_records_failures() {
        let dispatcher = NotificationDispatcher::new(None, None, 1);
        let rule = test_rule(&["a@example.com"], &[]);

        let outcome = dispatcher.dispatch(&test_message(), &rule, &[]).await;

        assert_eq!(outcome.email_results.len(), 1);
        assert!(!outcome.email_results[0].sent);
        assert!(!outcome.any_sent());
    }

    #[test]
    fn test_render_includes_criteria() {
        let rule = test_rule(&[], &[]);
        let criteria = vec!["Filtro \"Contém\": \"invoice\"".to_string()];

        let html = render_email_html(&test_message(), &rule, &criteria);
        let text = render_email_text(&test_message(), &rule, &criteria);

        assert!(html.contains("Filtro \"Contém\": \"invoice\""));
        assert!(html.contains("billing@vendor.com"));
        assert!(text.contains("Invoice #123"));
    }
}
