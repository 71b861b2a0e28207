use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::client::DeliveryChannel;
use super::dispatch::Dispatcher;
use super::ConsumerConfig;
use crate::artifact::Artifact;
use crate::errors::{RelayError, RelayResult};
use crate::protocol::PendingItemsResponse;

/// One request to the pull channel.
pub async fn fetch_pending(
    http: &reqwest::Client,
    url: &str,
    limit: usize,
) -> RelayResult<Vec<Artifact>> {
    let response = http
        .get(url)
        .query(&[("limit", limit)])
        .send()
        .await?
        .error_for_status()?;
    let body: PendingItemsResponse = response.json().await?;

    if !body.success {
        return Err(RelayError::transport("pending-items reported failure"));
    }
    if !body.uses_flag {
        debug!("relay store has no delivery flag, relying on dedup");
    }
    Ok(body.items)
}

/// Poll the pull channel on a fixed cadence until shutdown.
///
/// Failures are logged and the next tick simply tries again. A slow request
/// delays the following tick instead of bunching up.
pub async fn run(
    config: Arc<ConsumerConfig>,
    http: reqwest::Client,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let url = config.api_url("/pending-items");
    let mut ticker = interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(url = %url, interval_ms = config.poll_interval_ms, "poll loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let result = tokio::select! {
            r = fetch_pending(&http, &url, config.pending_limit) => r,
            _ = shutdown.changed() => break,
        };

        match result {
            Ok(items) => {
                if !items.is_empty() {
                    debug!(count = items.len(), "pulled pending artifacts");
                }
                for artifact in items {
                    dispatcher.dispatch(artifact, DeliveryChannel::Pull).await;
                }
            }
            Err(e) => warn!(url = %url, error = %e, "poll failed, retrying next tick"),
        }
    }

    debug!("poll loop stopped");
}
