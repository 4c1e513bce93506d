//! Notification rules
//!
//! Rule model for the automation engine: which messages to match and what
//! to do when they match (inbox actions + notification fan-out).

pub mod matcher;

pub use matcher::{evaluate, MatchOutcome};

use serde::{Deserialize, Serialize};

/// Notification rule stored in database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    /// Subject filter; `None` or empty means no subject constraint
    pub subject_filter: Option<String>,
    /// Sender filter (substring match); `None` or empty means no constraint
    pub sender_filter: Option<String>,
    /// Keywords matched against subject and snippet; empty means no constraint
    pub keywords: Vec<String>,
    pub condition: MatchCondition,
    pub status: RuleStatus,
    pub notification_emails: Vec<String>,
    /// Legacy single-address column kept for older rule rows
    pub notification_email: Option<String>,
    pub whatsapp_numbers: Vec<String>,
    pub actions: Option<RuleActions>,
    pub created_at: String,
    pub updated_at: String,
}

/// New rule for insertion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub account_id: i64,
    pub name: String,
    pub subject_filter: Option<String>,
    pub sender_filter: Option<String>,
    pub keywords: Vec<String>,
    pub condition: MatchCondition,
    pub status: RuleStatus,
    pub notification_emails: Vec<String>,
    pub whatsapp_numbers: Vec<String>,
    pub actions: Option<RuleActions>,
}

/// How the subject filter is compared against the message subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchCondition {
    #[default]
    Contains,
    StartsWith,
    EndsWith,
    Exact,
    Always,
}

impl MatchCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchCondition::Contains => "contains",
            MatchCondition::StartsWith => "starts_with",
            MatchCondition::EndsWith => "ends_with",
            MatchCondition::Exact => "exact",
            MatchCondition::Always => "always",
        }
    }

    /// Parse a stored condition value. Unknown values degrade to `Contains`
    /// so a malformed rule row still matches the least-surprising way.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "contains" => MatchCondition::Contains,
            "starts_with" => MatchCondition::StartsWith,
            "ends_with" => MatchCondition::EndsWith,
            "exact" => MatchCondition::Exact,
            "always" => MatchCondition::Always,
            _ => MatchCondition::Contains,
        }
    }

    /// Label used in the human-readable match criteria
    pub fn label(&self) -> &'static str {
        match self {
            MatchCondition::Contains => "Contém",
            MatchCondition::StartsWith => "Começa com",
            MatchCondition::EndsWith => "Termina com",
            MatchCondition::Exact => "Exato",
            MatchCondition::Always => "Sempre",
        }
    }
}

/// Rule lifecycle status; only active rules are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    #[default]
    Active,
    Paused,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Active => "active",
            RuleStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "paused" => RuleStatus::Paused,
            _ => RuleStatus::Active,
        }
    }
}

/// Inbox mutations to perform on a matched message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleActions {
    #[serde(default)]
    pub mark_as_read: bool,
    #[serde(default)]
    pub archive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_label: Option<String>,
}

impl RuleActions {
    pub fn is_empty(&self) -> bool {
        !self.mark_as_read && !self.archive && self.apply_label.is_none()
    }
}

impl Rule {
    /// All configured email recipients: legacy single-address column merged
    /// with the list column, first occurrence wins.
    pub fn email_recipients(&self) -> Vec<String> {
        let mut recipients = Vec::new();
        if let Some(legacy) = &self.notification_email {
            if !legacy.trim().is_empty() {
                recipients.push(legacy.trim().to_string());
            }
        }
        for addr in &self.notification_emails {
            let addr = addr.trim();
            if !addr.is_empty() && !recipients.iter().any(|r| r == addr) {
                recipients.push(addr.to_string());
            }
        }
        recipients
    }

    /// Configured WhatsApp destinations, blank entries removed
    pub fn whatsapp_recipients(&self) -> Vec<String> {
        self.whatsapp_numbers
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect()
    }

    /// True when the rule has no notification destination at all
    pub fn has_no_channels(&self) -> bool {
        self.email_recipients().is_empty() && self.whatsapp_recipients().is_empty()
    }
}
