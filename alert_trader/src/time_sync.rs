/// time_sync.rs — Binance server clock offset
///
/// Signed requests are rejected (-1021) when `timestamp` drifts outside
/// `recvWindow` of server time, so every timestamp is shifted by the offset
/// measured here.
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tracing::info;

use crate::error::GatewayError;

#[derive(Deserialize)]
struct ServerTimeResponse {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

pub struct TimeSync {
    client:    Client,
    base_url:  String,
    offset_ms: AtomicI64,
    synced:    AtomicBool,
}

impl TimeSync {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url:  base_url.to_owned(),
            offset_ms: AtomicI64::new(0),
            synced:    AtomicBool::new(false),
        }
    }

    /// Measure the offset against `/fapi/v1/time`.
    pub async fn sync(&self) -> Result<i64, GatewayError> {
        let url = format!("{}/fapi/v1/time", self.base_url);

        let local_before = Utc::now().timestamp_millis();
        let response: ServerTimeResponse = self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::RemoteUnavailable(format!("server time: {e}")))?
            .json()
            .await
            .map_err(|e| GatewayError::RemoteUnavailable(format!("server time body: {e}")))?;
        let local_after = Utc::now().timestamp_millis();

        // offset = server_time − midpoint of the round trip
        let round_trip = local_after - local_before;
        let estimated_local = local_before + round_trip / 2;
        let offset = response.server_time - estimated_local;

        self.offset_ms.store(offset, Ordering::Relaxed);
        self.synced.store(true, Ordering::Release);
        info!("Time sync: offset {}ms (rtt {}ms)", offset, round_trip);
        Ok(offset)
    }

    /// Sync once; later calls reuse the measured offset.
    pub async fn ensure_synced(&self) -> Result<(), GatewayError> {
        if !self.synced.load(Ordering::Acquire) {
            self.sync().await?;
        }
        Ok(())
    }

    /// Server-synced timestamp in milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis() + self.offset_ms.load(Ordering::Relaxed)
    }
}
