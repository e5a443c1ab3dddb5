use std::time::Duration;

use backoff::{future::retry, Error as BackoffError, ExponentialBackoff};

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("backend not reachable: {0}")]
    Unreachable(String),
}

/// Wait for the local generation backend to become reachable, polling its
/// template endpoint under a bounded retry budget. Any HTTP response
/// counts as ready; launching and supervising the process is the shell's
/// job, not ours.
pub async fn wait_until_ready(base_url: &str, budget: Duration) -> Result<(), HealthError> {
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| HealthError::Unreachable(e.to_string()))?;
    let url = format!("{}/template", base_url.trim_end_matches('/'));

    let operation = || async {
        http.get(&url)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| BackoffError::transient(HealthError::Unreachable(e.to_string())))
    };

    let backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(250),
        max_interval: Duration::from_secs(2),
        max_elapsed_time: Some(budget),
        ..Default::default()
    };

    retry(backoff, operation).await
}
