//! Resilient startup
//!
//! Probes every configured downstream in parallel, each under the shared
//! initialization budget, retrying with exponential backoff and jitter.
//! When the budget expires the bridge starts anyway with whatever subset
//! initialized; requests to missing group types return 503 until the
//! health monitor resurrects them.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bridge::SharedBridge;
use crate::bridge::downstream::DownstreamStatus;
use crate::errors::{RegistryError, RegistryResult};
use crate::models::{Capabilities, RegistryModel};

/// Fragments captured from a successful probe.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub capabilities: Option<Capabilities>,
    pub model: Option<RegistryModel>,
}

/// Result of one full initialization pass.
#[derive(Debug, Clone)]
pub struct InitOutcome {
    pub initialized: usize,
    pub total: usize,
    pub failed: Vec<String>,
}

impl InitOutcome {
    pub fn any_initialized(&self) -> bool {
        self.initialized > 0
    }
}

/// Probe one downstream: `GET {url}/capabilities`, falling back to
/// `GET {url}/model`. Either succeeding marks the downstream initialized.
pub async fn probe_downstream(
    client: &reqwest::Client,
    base_url: &str,
) -> RegistryResult<ProbeOutcome> {
    let capabilities_url = format!("{base_url}/capabilities");
    match fetch_json(client, &capabilities_url).await {
        Ok(value) => {
            let capabilities = serde_json::from_value::<Capabilities>(value).ok();
            // The model fragment is wanted for the merged `/model`, but a
            // downstream without one is still usable.
            let model = match fetch_json(client, &format!("{base_url}/model")).await {
                Ok(value) => serde_json::from_value::<RegistryModel>(value).ok(),
                Err(_) => None,
            };
            Ok(ProbeOutcome {
                capabilities,
                model,
            })
        }
        Err(capabilities_err) => {
            debug!(
                url = %capabilities_url,
                error = %capabilities_err,
                "capabilities probe failed, trying model"
            );
            let value = fetch_json(client, &format!("{base_url}/model")).await?;
            Ok(ProbeOutcome {
                capabilities: None,
                model: serde_json::from_value::<RegistryModel>(value).ok(),
            })
        }
    }
}

async fn fetch_json(client: &reqwest::Client, url: &str) -> RegistryResult<serde_json::Value> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| RegistryError::from_transport(url, &e))?;
    if !response.status().is_success() {
        return Err(RegistryError::from_upstream_status(
            url,
            response.status().as_u16(),
        ));
    }
    response
        .json()
        .await
        .map_err(|e| RegistryError::unavailable(format!("{url} returned unparsable JSON: {e}")))
}

/// Backoff delay before attempt `k` (0-based): `initial * factor^k`,
/// capped at `max`, plus up to 10% jitter so retries against the same
/// dead downstream drift apart across processes.
pub fn backoff_delay(initial: Duration, max: Duration, factor: f64, attempt: u32) -> Duration {
    let scaled = initial.as_millis() as f64 * factor.powi(attempt as i32);
    let capped = (scaled as u64).min(max.as_millis() as u64);
    Duration::from_millis(capped + bounded_jitter(capped / 10))
}

/// Pseudo-random value in `0..=bound_ms`, seeded from the std hasher's
/// per-instance randomness. Scheduling-grade only.
fn bounded_jitter(bound_ms: u64) -> u64 {
    use std::hash::{BuildHasher, Hasher};

    if bound_ms == 0 {
        return 0;
    }
    let seed = std::collections::hash_map::RandomState::new()
        .build_hasher()
        .finish();
    seed % (bound_ms + 1)
}

/// Probe all downstreams in parallel under the configured budget.
/// Idempotent and re-entrant: already-initialized downstreams are verified
/// with a single probe and the health monitor reuses this for resurrection.
pub async fn initialize_all(state: &SharedBridge) -> InitOutcome {
    let budget = state.config.init.timeout();
    let deadline = Instant::now() + budget;
    let targets: Vec<String> = state.downstreams().iter().map(|d| d.base_url.clone()).collect();
    let total = targets.len();

    info!(
        downstreams = total,
        budget_secs = budget.as_secs(),
        "initializing downstreams"
    );

    let results = join_all(
        targets
            .iter()
            .map(|base_url| initialize_one(state, base_url, deadline)),
    )
    .await;

    let mut failed = Vec::new();
    let mut initialized = 0usize;
    for (base_url, ok) in targets.iter().zip(results) {
        if ok {
            initialized += 1;
        } else {
            failed.push(base_url.clone());
        }
    }

    if !failed.is_empty() {
        warn!(
            initialized,
            total,
            failed = ?failed,
            "initialization budget expired with unreachable downstreams"
        );
    }

    InitOutcome {
        initialized,
        total,
        failed,
    }
}

/// Retry-probe one downstream until it succeeds or the deadline passes.
pub async fn initialize_one(
    state: &SharedBridge,
    base_url: &str,
    deadline: Instant,
) -> bool {
    let init = &state.config.init;
    let mut attempt: u32 = 0;

    loop {
        if state.cancel.is_cancelled() {
            return false;
        }

        match probe_downstream(&state.probe_client, base_url).await {
            Ok(outcome) => {
                let mut became_routable = false;
                state.update_downstream(base_url, |record| {
                    became_routable = !record.is_routable();
                    record.initialized = true;
                    record.status = DownstreamStatus::Healthy;
                    record.capabilities = outcome.capabilities.clone();
                    record.model = outcome.model.clone();
                    record.last_checked = Some(chrono::Utc::now());
                    record.last_error = None;
                });
                if became_routable {
                    // Membership change: the unified root now covers this
                    // downstream's group types.
                    state.bump_epoch();
                }
                info!(url = base_url, attempts = attempt + 1, "downstream initialized");
                return true;
            }
            Err(error) => {
                state.update_downstream(base_url, |record| {
                    record.last_checked = Some(chrono::Utc::now());
                    record.last_error = Some(error.to_string());
                });

                let delay = backoff_delay(
                    init.retry_initial_delay(),
                    init.retry_max_delay(),
                    init.retry_backoff_factor,
                    attempt,
                );
                attempt += 1;
                let next = Instant::now() + delay;
                if next >= deadline {
                    debug!(url = base_url, attempts = attempt, "initialization budget exhausted");
                    return false;
                }
                debug!(
                    url = base_url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "probe failed, backing off"
                );
                tokio::select! {
                    _ = state.cancel.cancelled() => return false,
                    _ = tokio::time::sleep_until(next) => {}
                }
            }
        }
    }
}
