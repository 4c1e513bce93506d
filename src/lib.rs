//! # Mailwarden
//!
//! Rule matching and notification dispatch engine for an email-automation
//! dashboard. Watches candidate inbox messages, fires user-defined rules,
//! applies inbox actions and fans out email/WhatsApp notifications exactly
//! once per (message, rule) pair.
//!
//! The engine is a library: triggers (manual check, interval poll,
//! push-notification webhook, scheduled batch job) call into [`engine::Engine`]
//! in-process. The mail provider and the remote ends of the outbound
//! channels are external collaborators behind traits.

pub mod channels;
pub mod config;
pub mod db;
pub mod engine;
pub mod mail;
pub mod rules;
pub mod scheduler;

pub use channels::{ChannelError, ChannelResult, EmailChannel, WhatsappChannel};
pub use config::{ConfigError, EngineConfig};
pub use db::{Database, DbError, DbResult};
pub use engine::{Engine, EngineError, RunOutcome, RunSummary};
pub use mail::{HistoryDelta, MailError, MailProvider, MailResult, Message};
pub use rules::{MatchCondition, Rule, RuleActions, RuleStatus};
pub use scheduler::{PollScheduler, SchedulerConfig, SchedulerError, SchedulerState};
