//! Per-placed-instance lifecycle: `idle -> loading -> {loaded | error}`.
//!
//! A load attempt races the fetch+compile future against a fixed timeout;
//! whichever settles first wins and a late result is ignored for that
//! attempt. Failed attempts are retryable up to a bound, after which
//! further retries are refused as a terminal, visible state, not a crash.
//! The last successfully loaded component is kept in its own slot, separate
//! from the current attempt, so a failing retry never blanks a surface
//! that has rendered once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::component::CompiledComponent;
use crate::error::{PipelineError, Result};

/// Retries allowed after the initial failed attempt.
pub const MAX_RETRIES: u32 = 3;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Error(String),
}

#[derive(Debug)]
pub struct InstanceLifecycle {
    instance_id: String,
    state: LoadState,
    failures: u32,
    load_timeout: Duration,
    last_good: Option<Arc<CompiledComponent>>,
}

impl InstanceLifecycle {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self::with_timeout(instance_id, DEFAULT_LOAD_TIMEOUT)
    }

    pub fn with_timeout(instance_id: impl Into<String>, load_timeout: Duration) -> Self {
        InstanceLifecycle {
            instance_id: instance_id.into(),
            state: LoadState::Idle,
            failures: 0,
            load_timeout,
            last_good: None,
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether another attempt would be accepted.
    pub fn can_retry(&self) -> bool {
        self.failures <= MAX_RETRIES
    }

    /// The component the surface should render right now: the last good
    /// load, surviving later failed attempts as a fallback.
    pub fn current(&self) -> Option<&Arc<CompiledComponent>> {
        self.last_good.as_ref()
    }

    /// Drive one load attempt (first mount or explicit retry). The future
    /// is dropped unpolled when the retry budget is already spent.
    pub async fn load<F>(&mut self, fut: F) -> Result<Arc<CompiledComponent>>
    where
        F: Future<Output = Result<CompiledComponent>>,
    {
        if !self.can_retry() {
            warn!(instance = %self.instance_id, "retry refused, budget exhausted");
            return Err(PipelineError::Exhausted {
                attempts: self.failures,
            });
        }

        self.state = LoadState::Loading;
        debug!(instance = %self.instance_id, "load attempt started");

        match timeout(self.load_timeout, fut).await {
            Ok(Ok(component)) => {
                let component = Arc::new(component);
                self.state = LoadState::Loaded;
                self.failures = 0;
                self.last_good = Some(component.clone());
                debug!(instance = %self.instance_id, "load attempt succeeded");
                Ok(component)
            }
            Ok(Err(e)) => {
                self.fail(e.to_string());
                Err(e)
            }
            Err(_elapsed) => {
                let millis = self.load_timeout.as_millis() as u64;
                self.fail(format!("load timed out after {}ms", millis));
                Err(PipelineError::Timeout { millis })
            }
        }
    }

    fn fail(&mut self, message: String) {
        self.failures += 1;
        warn!(
            instance = %self.instance_id,
            failures = self.failures,
            %message,
            "load attempt failed"
        );
        self.state = LoadState::Error(message);
    }
}
