//! Operational helpers: logging and an in-memory record of job updates.

use std::sync::Arc;

use pivot_types::{config::OpsConfig, events::JobUpdate, job::JobState, PivotError, Result};
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| PivotError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| PivotError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Append-only history of job updates for the current session.
#[derive(Clone, Default)]
pub struct UpdateLog {
    updates: Arc<Mutex<Vec<JobUpdate>>>,
}

impl UpdateLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, update: JobUpdate) {
        self.updates.lock().await.push(update);
    }

    pub async fn snapshot(&self) -> Vec<JobUpdate> {
        self.updates.lock().await.clone()
    }

    /// Progress values reported while the job was running, in order.
    pub async fn progress_trail(&self) -> Vec<u8> {
        self.updates
            .lock()
            .await
            .iter()
            .filter_map(|update| match update.state {
                JobState::Running { progress } => Some(progress),
                _ => None,
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.updates.lock().await.clear();
    }
}
