//! Rule matching logic
//!
//! Pure evaluation of a rule against a message. No side effects; a message
//! with missing fields simply fails the corresponding category.

use super::{MatchCondition, Rule};
use crate::mail::Message;

/// Result of evaluating one rule against one message
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub is_match: bool,
    /// Human-readable descriptions of the criteria that matched, embedded
    /// in notification bodies and the activity log
    pub criteria: Vec<String>,
}

/// Evaluate a rule against a message.
///
/// Comparisons are case-insensitive (ASCII-approximate lowercase folding).
/// Filter categories combine with OR: any configured category that matches
/// makes the rule fire. This mirrors the shipped behavior of the original
/// dashboard; see DESIGN.md before changing it to AND.
pub fn evaluate(message: &Message, rule: &Rule) -> MatchOutcome {
    let subject = message.subject.to_lowercase();
    let from = message.from.to_lowercase();
    let snippet = message.snippet.to_lowercase();

    let mut criteria = Vec::new();

    let subject_filter = rule
        .subject_filter
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());
    let sender_filter = rule
        .sender_filter
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());
    let keywords: Vec<&str> = rule
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();

    // Subject test, only when a subject filter is configured
    if let Some(filter) = subject_filter {
        let needle = filter.to_lowercase();
        let matched = match rule.condition {
            MatchCondition::Contains => subject.contains(&needle),
            MatchCondition::StartsWith => subject.starts_with(&needle),
            MatchCondition::EndsWith => subject.ends_with(&needle),
            MatchCondition::Exact => subject == needle,
            MatchCondition::Always => true,
        };
        if matched {
            criteria.push(format!("Filtro \"{}\": \"{}\"", rule.condition.label(), filter));
        }
    }

    // Sender test: substring match against From
    if let Some(filter) = sender_filter {
        if from.contains(&filter.to_lowercase()) {
            criteria.push(format!("Remetente contém: \"{}\"", filter));
        }
    }

    // Keyword test: any keyword in subject or snippet
    for keyword in &keywords {
        let needle = keyword.to_lowercase();
        if subject.contains(&needle) || snippet.contains(&needle) {
            criteria.push(format!("Palavra-chave: \"{}\"", keyword));
            break;
        }
    }

    // A rule with condition ALWAYS and nothing configured matches everything
    if criteria.is_empty()
        && rule.condition == MatchCondition::Always
        && subject_filter.is_none()
        && sender_filter.is_none()
        && keywords.is_empty()
    {
        criteria.push("Always".to_string());
    }

    MatchOutcome {
        is_match: !criteria.is_empty(),
        criteria,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleStatus;

    fn test_message(subject: &str, from: &str, snippet: &str) -> Message {
        Message {
            id: "msg-1".to_string(),
            thread_id: "thread-1".to_string(),
            subject: subject.to_string(),
            from: from.to_string(),
            to: "me@example.com".to_string(),
            date: "2025-06-01T10:00:00Z".to_string(),
            snippet: snippet.to_string(),
            label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
            is_unread: true,
        }
    }

    fn test_rule() -> Rule {
        Rule {
            id: 1,
            account_id: 1,
            name: "Test Rule".to_string(),
            subject_filter: None,
            sender_filter: None,
            keywords: vec![],
            condition: MatchCondition::Contains,
            status: RuleStatus::Active,
            notification_emails: vec![],
            notification_email: None,
            whatsapp_numbers: vec![],
            actions: None,
            created_at: "2025-01-01".to_string(),
            updated_at: "2025-01-01".to_string(),
        }
    }

    #[test]
    fn test_subject_contains_case_insensitive() {
        let message = test_message("Invoice #123", "billing@vendor.com", "");
        let mut rule = test_rule();
        rule.subject_filter = Some("invoice".to_string());

        let outcome = evaluate(&message, &rule);
        assert!(outcome.is_match);
        assert_eq!(outcome.criteria, vec!["Filtro \"Contém\": \"invoice\""]);
    }

    #[test]
    fn test_subject_exact_no_partial_match() {
        let message = test_message("Hello", "someone@example.com", "");
        let mut rule = test_rule();
        rule.subject_filter = Some("invoice".to_string());
        rule.condition = MatchCondition::Exact;

        let outcome = evaluate(&message, &rule);
        assert!(!outcome.is_match);
        assert!(outcome.criteria.is_empty());
    }

    #[test]
    fn test_subject_exact_case_folded_equality() {
        let message = test_message("Monthly REPORT", "x@y.com", "");
        let mut rule = test_rule();
        rule.subject_filter = Some("monthly report".to_string());
        rule.condition = MatchCondition::Exact;

        assert!(evaluate(&message, &rule).is_match);
    }

    #[test]
    fn test_starts_with_and_ends_with() {
        let message = test_message("Invoice #123 due", "x@y.com", "");

        let mut rule = test_rule();
        rule.subject_filter = Some("invoice".to_string());
        rule.condition = MatchCondition::StartsWith;
        assert!(evaluate(&message, &rule).is_match);

        rule.condition = MatchCondition::EndsWith;
        assert!(!evaluate(&message, &rule).is_match);

        rule.subject_filter = Some("due".to_string());
        assert!(evaluate(&message, &rule).is_match);
    }

    #[test]
    fn test_always_with_no_filters_matches_everything() {
        let mut rule = test_rule();
        rule.condition = MatchCondition::Always;

        for (subject, from) in [("", ""), ("anything", "anyone@x.com"), ("ça va", "über@x.de")] {
            let outcome = evaluate(&test_message(subject, from, ""), &rule);
            assert!(outcome.is_match);
            assert_eq!(outcome.criteria, vec!["Always"]);
        }
    }

    #[test]
    fn test_sender_substring() {
        let message = test_message("Anything", "Billing <billing@vendor.com>", "");
        let mut rule = test_rule();
        rule.sender_filter = Some("VENDOR.com".to_string());

        let outcome = evaluate(&message, &rule);
        assert!(outcome.is_match);
        assert_eq!(outcome.criteria, vec!["Remetente contém: \"VENDOR.com\""]);
    }

    #[test]
    fn test_keyword_matches_snippet() {
        let message = test_message("Hi", "x@y.com", "your payment is overdue");
        let mut rule = test_rule();
        rule.keywords = vec!["urgent".to_string(), "overdue".to_string()];

        let outcome = evaluate(&message, &rule);
        assert!(outcome.is_match);
        assert_eq!(outcome.criteria, vec!["Palavra-chave: \"overdue\""]);
    }

    #[test]
    fn test_or_semantics_across_categories() {
        // Subject filter misses but sender filter hits: rule still fires.
        let message = test_message("Hello", "billing@vendor.com", "");
        let mut rule = test_rule();
        rule.subject_filter = Some("invoice".to_string());
        rule.sender_filter = Some("vendor.com".to_string());

        let outcome = evaluate(&message, &rule);
        assert!(outcome.is_match);
        assert_eq!(outcome.criteria.len(), 1);
    }

    #[test]
    fn test_no_filters_no_always_does_not_match() {
        let message = test_message("Anything", "x@y.com", "text");
        let rule = test_rule();

        assert!(!evaluate(&message, &rule).is_match);
    }

    #[test]
    fn test_blank_filters_treated_as_unconfigured() {
        let message = test_message("Anything", "x@y.com", "");
        let mut rule = test_rule();
        rule.subject_filter = Some("   ".to_string());
        rule.sender_filter = Some("".to_string());
        rule.keywords = vec!["".to_string()];

        assert!(!evaluate(&message, &rule).is_match);
    }
}
