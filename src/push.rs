//! Push client: ships backend snapshots to a remote gateway.
//!
//! A push is read-only with respect to the engine. It either delivers the
//! snapshot or returns [`Error::Push`]; nothing is retried here.

use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::Snapshot;
use crate::engine::Engine;
use crate::error::{Error, Result};

/// Default request timeout for a single push.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP transport for snapshots.
#[derive(Clone)]
pub struct PushClient {
    http: reqwest::Client,
    timeout: Duration,
    token: Option<SecretString>,
}

impl Default for PushClient {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_TIMEOUT)
    }
}

impl std::fmt::Debug for PushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushClient")
            .field("timeout", &self.timeout)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl PushClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            token: None,
        }
    }

    /// Send `token` as a bearer credential with every push.
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Gateway URL for a job: `{endpoint}/metrics/job/{job}`.
    pub fn gateway_url(endpoint: &str, job: &str) -> Result<Url> {
        let push_error = |reason: String| Error::Push {
            endpoint: endpoint.to_string(),
            reason,
        };
        if job.trim().is_empty() {
            return Err(push_error("job name is empty".to_string()));
        }
        let mut url =
            Url::parse(endpoint).map_err(|e| push_error(format!("invalid endpoint URL: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| push_error("endpoint URL cannot have a path".to_string()))?;
            segments.pop_if_empty().extend(["metrics", "job", job]);
        }
        Ok(url)
    }

    /// POST `snapshot` to the gateway, tagged with `job`.
    pub async fn send(&self, snapshot: &Snapshot, endpoint: &str, job: &str) -> Result<()> {
        let url = Self::gateway_url(endpoint, job)?;
        let push_error = |reason: String| Error::Push {
            endpoint: endpoint.to_string(),
            reason,
        };

        let mut request = self
            .http
            .post(url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, snapshot.content_type.as_str())
            .body(snapshot.body.clone());
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                push_error(format!("timed out after {:?}", self.timeout))
            } else {
                push_error(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(push_error(format!("gateway answered {status}: {}", body.trim())));
        }
        Ok(())
    }
}

/// Where periodic pushes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub endpoint: String,
    pub job: String,
}

/// Handle to a running periodic push task.
pub struct PeriodicPush {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PeriodicPush {
    /// Stop the task and wait for it to finish. A push already in flight
    /// completes first; it is bounded by the push timeout.
    ///
    /// Returns `false` if the task had panicked or was cancelled.
    pub async fn shutdown(self) -> bool {
        self.shutdown.notify_one();
        join_push_task(self.task).await
    }
}

async fn join_push_task(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "periodic push task ended abnormally");
            false
        }
    }
}

/// Push the engine's snapshot to `target` every `interval`.
///
/// Failures are logged and counted, never propagated: the task keeps
/// running until [`PeriodicPush::shutdown`].
pub fn spawn_periodic_push(
    engine: Arc<Engine>,
    target: PushTarget,
    interval: Duration,
) -> PeriodicPush {
    let shutdown = Arc::new(Notify::new());
    let stop = Arc::clone(&shutdown);

    let task = tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(endpoint = %target.endpoint, job = %target.job, ?interval, "periodic push started");

        loop {
            tokio::select! {
                _ = stop.notified() => {
                    info!("periodic push stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = engine.push(&target.endpoint, &target.job).await {
                        warn!(error = %e, "periodic push failed");
                    }
                }
            }
        }
    });

    PeriodicPush { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_appends_job_path() {
        let url = PushClient::gateway_url("http://localhost:9091", "test_job").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9091/metrics/job/test_job");

        let url = PushClient::gateway_url("http://gw:9091/base/", "a b").unwrap();
        assert_eq!(url.as_str(), "http://gw:9091/base/metrics/job/a%20b");
    }

    #[test]
    fn gateway_url_rejects_bad_input() {
        assert!(matches!(
            PushClient::gateway_url("not a url", "job"),
            Err(Error::Push { .. })
        ));
        assert!(matches!(
            PushClient::gateway_url("http://localhost:9091", "  "),
            Err(Error::Push { .. })
        ));
    }

    #[tokio::test]
    async fn panicked_push_task_is_reported() {
        let task: JoinHandle<()> = tokio::spawn(async { panic!("push task blew up") });
        assert!(!join_push_task(task).await);

        let task = tokio::spawn(async {});
        assert!(join_push_task(task).await);
    }
}
