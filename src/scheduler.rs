//! Poll trigger
//!
//! Periodic full scans at a configurable interval. The scheduler is an
//! owned instance with explicit start/stop calls; observers subscribe to a
//! watch channel of state transitions instead of polling a global.

use crate::db::Database;
use crate::engine::Engine;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

const SETTINGS_KEY: &str = "poll_scheduler_config";
const MIN_INTERVAL_MINUTES: u64 = 1;
const MAX_INTERVAL_MINUTES: u64 = 1440;

/// Scheduler configuration stored in the settings table
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_minutes: u64,
    /// ISO 8601 timestamp of the last completed tick
    pub last_run: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 5,
            last_run: None,
        }
    }
}

/// Observable scheduler state, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not started, or waiting between ticks
    Idle,
    /// A poll tick is currently processing
    Running,
    /// Stopped via `stop()`
    Stopped,
}

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

/// Background poll scheduler driving periodic engine runs
pub struct PollScheduler {
    db: Database,
    engine: Arc<Engine>,
    config: Arc<RwLock<SchedulerConfig>>,
    running: Arc<AtomicBool>,
    task_handle: StdMutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<SchedulerState>,
}

impl PollScheduler {
    /// Create a scheduler for the given engine
    pub fn new(db: Database, engine: Arc<Engine>) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);

        Self {
            db,
            engine,
            config: Arc::new(RwLock::new(SchedulerConfig::default())),
            running: Arc::new(AtomicBool::new(false)),
            task_handle: StdMutex::new(None),
            state_tx,
        }
    }

    /// Subscribe to scheduler state transitions
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// Load configuration from the settings table
    pub async fn load_config(&self) -> Result<(), SchedulerError> {
        let config: SchedulerConfig = self
            .db
            .get_setting(SETTINGS_KEY)
            .map_err(|e| SchedulerError::Database(e.to_string()))?
            .unwrap_or_default();

        *self.config.write().await = config;
        Ok(())
    }

    /// Save configuration to the settings table
    pub async fn save_config(&self) -> Result<(), SchedulerError> {
        let config = self.config.read().await.clone();
        self.db
            .set_setting(SETTINGS_KEY, &config)
            .map_err(|e| SchedulerError::Database(e.to_string()))?;
        Ok(())
    }

    /// Get current configuration
    pub async fn get_config(&self) -> SchedulerConfig {
        self.config.read().await.clone()
    }

    /// Update interval/enabled and persist; restarts the loop when it was
    /// already running
    pub async fn update_config(&self, enabled: bool, interval_minutes: u64) -> Result<(), SchedulerError> {
        validate_interval(interval_minutes)?;

        {
            let mut config = self.config.write().await;
            config.enabled = enabled;
            config.interval_minutes = interval_minutes;
        }
        self.save_config().await?;

        if self.is_running() {
            let _ = self.stop();
        }
        if enabled {
            self.start().await?;
        }

        log::info!(
            "Poll scheduler config updated: enabled={}, interval={} minutes",
            enabled,
            interval_minutes
        );
        Ok(())
    }

    /// Start the background poll loop
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let interval_minutes = self.config.read().await.interval_minutes;
        validate_interval(interval_minutes)?;

        self.running.store(true, Ordering::Relaxed);
        let _ = self.state_tx.send(SchedulerState::Idle);

        let running = self.running.clone();
        let db = self.db.clone();
        let config = self.config.clone();
        let engine = self.engine.clone();
        let state_tx = self.state_tx.clone();

        let handle = tokio::spawn(async move {
            Self::poll_loop(running, db, config, engine, state_tx).await;
        });

        *self.task_handle.lock().unwrap() = Some(handle);

        log::info!("Poll scheduler started (interval: {} minutes)", interval_minutes);
        Ok(())
    }

    /// Stop the background poll loop
    pub fn stop(&self) -> Result<(), SchedulerError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(SchedulerError::NotRunning);
        }

        self.running.store(false, Ordering::Relaxed);

        if let Some(handle) = self.task_handle.lock().unwrap().take() {
            handle.abort();
        }
        let _ = self.state_tx.send(SchedulerState::Stopped);

        log::info!("Poll scheduler stopped");
        Ok(())
    }

    /// Whether the poll loop is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    async fn poll_loop(
        running: Arc<AtomicBool>,
        db: Database,
        config: Arc<RwLock<SchedulerConfig>>,
        engine: Arc<Engine>,
        state_tx: watch::Sender<SchedulerState>,
    ) {
        let interval_minutes = config.read().await.interval_minutes;
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(60 * interval_minutes));
        // The first tick fires immediately; skip it so the first scan
        // happens one interval after start
        interval.tick().await;

        log::info!("Poll loop started (interval: {} minutes)", interval_minutes);

        loop {
            interval.tick().await;

            if !running.load(Ordering::Relaxed) {
                break;
            }

            let _ = state_tx.send(SchedulerState::Running);
            log::info!("Poll tick: checking inbox");

            let summary = engine.check_now().await;
            log::info!(
                "Poll tick finished: {:?}, {} matched, {} processed",
                summary.outcome,
                summary.matched,
                summary.processed
            );

            {
                let mut cfg = config.write().await;
                cfg.last_run = Some(Utc::now().to_rfc3339());
            }
            if let Err(e) = db.set_setting(SETTINGS_KEY, &*config.read().await) {
                log::error!("Failed to save last_run timestamp: {}", e);
            }

            let _ = state_tx.send(SchedulerState::Idle);
        }

        log::info!("Poll loop exited");
    }
}

fn validate_interval(interval_minutes: u64) -> Result<(), SchedulerError> {
    if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&interval_minutes) {
        return Err(SchedulerError::InvalidInterval(format!(
            "Interval must be {}-{} minutes, got {}",
            MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES, interval_minutes
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
