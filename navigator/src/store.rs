//! Circuit store client.
//!
//! The store exposes a single JSON POST endpoint dispatched on an `action`
//! field in the body. Every call carries the application shared key in
//! `x-app-key` and the operator's session token as a bearer header. The
//! store owns all persistence; nothing here touches a database directly.

use nav_types::{GeoPoint, ReferenceTrajectory, Stop};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::recording::{RecordedStop, TracePoint};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store rejected '{action}' with status {status}: {message}")]
    Rejected {
        action: String,
        status: u16,
        message: String,
    },
    #[error("circuit has no stops")]
    EmptyCircuit,
}

pub struct StoreClient {
    client: reqwest::Client,
    endpoint: String,
    app_key: String,
    session_token: String,
}

impl StoreClient {
    pub fn new(endpoint: &str, app_key: &str, session_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            app_key: app_key.to_string(),
            session_token: session_token.to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        payload: Value,
    ) -> Result<T, StoreError> {
        debug!("Store call: {action}");
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-app-key", &self.app_key)
            .bearer_auth(&self.session_token)
            .json(&request_body(action, payload))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                action: action.to_string(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }

    /// Stop sequence for a circuit. An empty list is an error: a circuit
    /// without stops cannot be navigated.
    pub async fn get_stops(&self, circuit_id: &str) -> Result<Vec<Stop>, StoreError> {
        let resp: StopsResponse = self
            .call("get_stops", json!({ "circuitId": circuit_id }))
            .await?;
        if resp.stops.is_empty() {
            return Err(StoreError::EmptyCircuit);
        }
        Ok(resp.stops)
    }

    /// Recorded reference trajectory, if the circuit has one. Absence is
    /// normal (older circuits were built before recording existed).
    pub async fn get_reference_trajectory(
        &self,
        circuit_id: &str,
    ) -> Result<Option<ReferenceTrajectory>, StoreError> {
        let resp: TrajectoryResponse = self
            .call("get_reference_trajectory", json!({ "circuitId": circuit_id }))
            .await?;
        Ok(resp.trajectory.filter(|t| t.is_valid()))
    }

    pub async fn create_circuit(&self, name: &str) -> Result<String, StoreError> {
        let resp: CircuitIdResponse = self.call("create_circuit", json!({ "name": name })).await?;
        Ok(resp.circuit_id)
    }

    pub async fn rename_circuit(&self, circuit_id: &str, name: &str) -> Result<(), StoreError> {
        let _: Ack = self
            .call(
                "rename_circuit",
                json!({ "circuitId": circuit_id, "name": name }),
            )
            .await?;
        Ok(())
    }

    /// Open a new stop-list version on the circuit; subsequent appends land
    /// on the returned version.
    pub async fn start_version(&self, circuit_id: &str) -> Result<String, StoreError> {
        let resp: VersionResponse = self
            .call("start_version", json!({ "circuitId": circuit_id }))
            .await?;
        Ok(resp.version_id)
    }

    pub async fn append_stop(
        &self,
        circuit_id: &str,
        stop: &RecordedStop,
    ) -> Result<(), StoreError> {
        let _: Ack = self
            .call(
                "append_stop",
                json!({
                    "circuitId": circuit_id,
                    "index": stop.index,
                    "location": stop.location,
                    "label": stop.label,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_stop(&self, circuit_id: &str, index: usize) -> Result<(), StoreError> {
        let _: Ack = self
            .call(
                "remove_stop",
                json!({ "circuitId": circuit_id, "index": index }),
            )
            .await?;
        Ok(())
    }

    pub async fn save_trace(
        &self,
        circuit_id: &str,
        trace: &[TracePoint],
    ) -> Result<(), StoreError> {
        let points: Vec<TracePointWire> = trace
            .iter()
            .map(|p| TracePointWire {
                location: p.point,
                timestamp_ms: p.timestamp_ms,
            })
            .collect();
        let _: Ack = self
            .call(
                "save_trace",
                json!({ "circuitId": circuit_id, "points": points }),
            )
            .await?;
        Ok(())
    }
}

fn request_body(action: &str, payload: Value) -> Value {
    let mut body = payload;
    if let Value::Object(map) = &mut body {
        map.insert("action".to_string(), Value::String(action.to_string()));
    }
    body
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StopsResponse {
    #[serde(default)]
    stops: Vec<Stop>,
}

#[derive(Debug, Deserialize)]
struct TrajectoryResponse {
    #[serde(default)]
    trajectory: Option<ReferenceTrajectory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CircuitIdResponse {
    circuit_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    version_id: String,
}

/// Stores respond `{"ok": true}` on mutations.
#[derive(Debug, Deserialize)]
struct Ack {
    #[allow(dead_code)]
    ok: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TracePointWire {
    location: GeoPoint,
    timestamp_ms: i64,
}
