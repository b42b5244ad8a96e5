//! Health Monitor
//!
//! Background watchdog that evaluates a probe against a target on a fixed
//! interval and publishes a tri-state status through a single atomic.
//!
//! - The first check runs immediately on `start()`
//! - A probe that errors, panics or exceeds its timeout counts as unhealthy
//! - `stop()` cancels the task and waits a bounded time for it to end
//!
//! Readers ([`HealthReader`]) never block the monitor and may observe a value
//! up to one check interval old.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HealthStatus {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl HealthStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub check_interval: Duration,
    pub probe_timeout: Duration,
    /// Bound on how long `stop()` waits for the task to finish
    pub stop_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

/// Read-only view of a monitor's status
#[derive(Debug, Clone)]
pub struct HealthReader {
    name: Arc<str>,
    status: Arc<AtomicU8>,
}

impl HealthReader {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status() == HealthStatus::Unhealthy
    }
}

type Probe<T> = Arc<dyn Fn(Arc<T>) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

pub struct HealthMonitor<T: ?Sized> {
    name: Arc<str>,
    target: Arc<T>,
    probe: Probe<T>,
    config: HealthConfig,
    status: Arc<AtomicU8>,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

impl<T: ?Sized + Send + Sync + 'static> HealthMonitor<T> {
    pub fn new<F, Fut>(name: &str, target: Arc<T>, config: HealthConfig, probe: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self {
            name: Arc::from(name),
            target,
            probe: Arc::new(move |target| probe(target).boxed()),
            config,
            status: Arc::new(AtomicU8::new(HealthStatus::Unknown as u8)),
            task: None,
        }
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn reader(&self) -> HealthReader {
        HealthReader {
            name: self.name.clone(),
            status: self.status.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Spawn the periodic check. No-op while already running.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!(monitor = %self.name, "Health monitor already running");
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_checks(
            self.name.clone(),
            self.target.clone(),
            self.probe.clone(),
            self.status.clone(),
            self.config.clone(),
            token.clone(),
        ));

        info!(
            monitor = %self.name,
            interval_ms = self.config.check_interval.as_millis() as u64,
            "Health monitor started"
        );
        self.task = Some((token, handle));
    }

    /// Cancel the check task and wait for it, bounded by `stop_timeout`.
    /// No-op when not running.
    pub async fn stop(&mut self) {
        let Some((token, mut handle)) = self.task.take() else {
            return;
        };

        token.cancel();
        if tokio::time::timeout(self.config.stop_timeout, &mut handle)
            .await
            .is_err()
        {
            warn!(monitor = %self.name, "Health monitor did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
        }

        info!(monitor = %self.name, "Health monitor stopped");
    }
}

impl<T: ?Sized> Drop for HealthMonitor<T> {
    fn drop(&mut self) {
        if let Some((token, handle)) = self.task.take() {
            token.cancel();
            handle.abort();
        }
    }
}

async fn run_checks<T: ?Sized + Send + Sync + 'static>(
    name: Arc<str>,
    target: Arc<T>,
    probe: Probe<T>,
    status: Arc<AtomicU8>,
    config: HealthConfig,
    token: CancellationToken,
) {
    loop {
        let checked = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            checked = check_once(&name, target.clone(), &probe, config.probe_timeout) => checked,
        };

        let previous = HealthStatus::from_u8(status.swap(checked as u8, Ordering::AcqRel));
        if previous != checked {
            if checked == HealthStatus::Healthy {
                info!(monitor = %name, from = previous.as_str(), "Endpoint healthy");
            } else {
                warn!(monitor = %name, from = previous.as_str(), "Endpoint unhealthy");
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(config.check_interval) => {}
        }
    }
}

async fn check_once<T: ?Sized + Send + Sync + 'static>(
    name: &str,
    target: Arc<T>,
    probe: &Probe<T>,
    probe_timeout: Duration,
) -> HealthStatus {
    let probe = probe.clone();
    let attempt = AssertUnwindSafe(async move { probe(target).await }).catch_unwind();

    match tokio::time::timeout(probe_timeout, attempt).await {
        Ok(Ok(Ok(true))) => HealthStatus::Healthy,
        Ok(Ok(Ok(false))) => HealthStatus::Unhealthy,
        Ok(Ok(Err(e))) => {
            warn!(monitor = %name, error = %e, "Health probe failed");
            HealthStatus::Unhealthy
        }
        Ok(Err(_)) => {
            warn!(monitor = %name, "Health probe panicked");
            HealthStatus::Unhealthy
        }
        Err(_) => {
            warn!(
                monitor = %name,
                timeout_ms = probe_timeout.as_millis() as u64,
                "Health probe timed out"
            );
            HealthStatus::Unhealthy
        }
    }
}
