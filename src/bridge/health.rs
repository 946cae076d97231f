//! Health monitoring
//!
//! Periodically re-probes every downstream. Uninitialized downstreams get
//! the full initializer probe (resurrection); initialized ones get a
//! lightweight `GET /`. Any health transition or membership change bumps
//! the process-wide registry epoch and touches the root's `modifiedat`.

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::SharedBridge;
use crate::bridge::downstream::DownstreamStatus;
use crate::bridge::initializer::probe_downstream;
use crate::models::{HealthDocument, HealthStatus};

/// Assemble the `/health` document and the overall verdict.
pub fn health_document(state: &SharedBridge) -> HealthDocument {
    let downstreams = state.downstreams();
    let any_routable = downstreams.iter().any(|d| d.is_routable());

    let mut consolidated_groups: Vec<String> = downstreams
        .iter()
        .filter(|d| d.initialized)
        .flat_map(|d| d.group_types())
        .collect();
    consolidated_groups.sort();
    consolidated_groups.dedup();

    HealthDocument {
        status: if any_routable {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        timestamp: chrono::Utc::now(),
        downstreams: downstreams.iter().map(|d| d.health()).collect(),
        consolidated_groups,
    }
}

/// One monitoring sweep over every downstream. Returns the number of
/// state transitions observed.
pub async fn sweep(state: &SharedBridge) -> usize {
    let downstreams = state.downstreams();
    let results = join_all(downstreams.iter().map(|record| async {
        let base_url = record.base_url.clone();
        if record.initialized {
            (base_url, liveness_probe(state, &record.base_url).await, false)
        } else {
            // Resurrection path: a downstream that never initialized gets
            // the full probe so its fragments are captured when it appears.
            match probe_downstream(&state.probe_client, &record.base_url).await {
                Ok(outcome) => {
                    state.update_downstream(&record.base_url, |r| {
                        r.initialized = true;
                        r.capabilities = outcome.capabilities.clone();
                        r.model = outcome.model.clone();
                    });
                    (base_url, Ok(()), true)
                }
                Err(e) => (base_url, Err(e.to_string()), false),
            }
        }
    }))
    .await;

    let mut transitions = 0usize;
    for (base_url, result, newly_initialized) in results {
        let healthy = result.is_ok();
        let mut transitioned = newly_initialized;
        state.update_downstream(&base_url, |record| {
            let next = if healthy {
                DownstreamStatus::Healthy
            } else {
                DownstreamStatus::Unhealthy
            };
            if record.status != next {
                transitioned = true;
            }
            record.status = next;
            record.last_checked = Some(chrono::Utc::now());
            record.last_error = result.err();
        });
        if transitioned {
            transitions += 1;
            if healthy {
                info!(url = %base_url, "downstream became healthy");
            } else {
                warn!(url = %base_url, "downstream became unhealthy");
            }
        }
    }

    if transitions > 0 {
        let epoch = state.bump_epoch();
        debug!(transitions, epoch, "downstream membership changed");
    }
    transitions
}

async fn liveness_probe(state: &SharedBridge, base_url: &str) -> Result<(), String> {
    let url = format!("{base_url}/");
    let response = tokio::time::timeout(
        state.config.health.probe_timeout(),
        state.probe_client.get(&url).send(),
    )
    .await
    .map_err(|_| format!("health probe of {url} timed out"))?
    .map_err(|e| format!("health probe of {url} failed: {e}"))?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!("health probe of {url} returned {}", response.status()))
    }
}

/// Run [`sweep`] on the configured interval until the bridge shuts down.
pub fn spawn_monitor(state: SharedBridge) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = state.config.health.interval();
        loop {
            tokio::select! {
                _ = state.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            sweep(&state).await;
        }
    })
}
