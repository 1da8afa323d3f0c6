//! Route provider client and maneuver cache.
//!
//! Legs are fetched from an OSRM-compatible HTTP endpoint and cached under
//! endpoint coordinates rounded to 4 decimal places (~11 m), so jittered
//! re-requests for the same physical leg hit the cache. Entries expire after
//! 10 minutes.
//!
//! Concurrency contract: at most one fetch is in flight per cache; a new
//! `request` aborts the previous one. Fetch results come back to the run
//! loop over an mpsc channel, and the run loop alone writes entries via
//! `complete` — the cache map has a single writer.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nav_types::{GeoPoint, Maneuver, RoutePlan};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::NavConfig;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("route provider rejected the request: {0}")]
    Provider(String),
    #[error("no route between the requested points")]
    NoRoute,
}

// ── Provider boundary ─────────────────────────────────────────────────────────

pub type RouteFuture = Pin<Box<dyn Future<Output = Result<RoutePlan, RouteError>> + Send>>;

/// Anything that can turn two points into a driveable leg.
pub trait RouteProvider: Send + Sync {
    fn fetch(&self, from: GeoPoint, to: GeoPoint) -> RouteFuture;
}

/// OSRM-compatible HTTP provider. The hard request timeout lives on the
/// client, so a stalled provider resolves as an error instead of hanging the
/// in-flight slot forever.
pub struct HttpRouteProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRouteProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RouteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl RouteProvider for HttpRouteProvider {
    fn fetch(&self, from: GeoPoint, to: GeoPoint) -> RouteFuture {
        let url = format!(
            "{}/route/v1/driving/{},{};{},{}?steps=true&overview=full&geometries=geojson",
            self.base_url, from.lon, from.lat, to.lon, to.lat
        );
        let client = self.client.clone();
        Box::pin(async move {
            let resp: OsrmResponse = client.get(&url).send().await?.json().await?;
            if resp.code != "Ok" {
                return Err(RouteError::Provider(resp.code));
            }
            let route = resp.routes.into_iter().next().ok_or(RouteError::NoRoute)?;
            Ok(route.into_plan())
        })
    }
}

// ── Provider wire format ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    #[serde(default)]
    legs: Vec<OsrmLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    /// GeoJSON order: [lon, lat].
    coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct OsrmLeg {
    #[serde(default)]
    steps: Vec<OsrmStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmStep {
    distance: f64,
    duration: f64,
    name: String,
    maneuver: OsrmManeuver,
    /// Some deployments inject pre-rendered text; OSRM proper does not.
    #[serde(default)]
    instruction: String,
}

#[derive(Debug, Deserialize)]
struct OsrmManeuver {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    modifier: String,
    location: [f64; 2],
}

impl OsrmRoute {
    fn into_plan(self) -> RoutePlan {
        let polyline = self
            .geometry
            .coordinates
            .iter()
            .map(|c| GeoPoint::new(c[1], c[0]))
            .collect();
        let maneuvers = self
            .legs
            .into_iter()
            .flat_map(|leg| leg.steps)
            .map(|s| Maneuver {
                distance_m: s.distance,
                duration_s: s.duration,
                street_name: s.name,
                instruction: s.instruction,
                maneuver_type: s.maneuver.kind,
                modifier: s.maneuver.modifier,
                location: GeoPoint::new(s.maneuver.location[1], s.maneuver.location[0]),
            })
            .collect();
        RoutePlan { polyline, maneuvers }
    }
}

// ── Cache ─────────────────────────────────────────────────────────────────────

/// Leg endpoints rounded to a fixed number of decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    from_lat: i64,
    from_lon: i64,
    to_lat: i64,
    to_lon: i64,
}

impl RouteKey {
    pub fn new(from: GeoPoint, to: GeoPoint, decimals: u32) -> Self {
        let scale = 10f64.powi(decimals as i32);
        let q = |v: f64| (v * scale).round() as i64;
        Self {
            from_lat: q(from.lat),
            from_lon: q(from.lon),
            to_lat: q(to.lat),
            to_lon: q(to.lon),
        }
    }
}

/// Outcome of one fetch, delivered to the run loop.
#[derive(Debug)]
pub struct RouteResult {
    pub key: RouteKey,
    pub from: GeoPoint,
    pub to: GeoPoint,
    pub outcome: Result<RoutePlan, RouteError>,
}

struct CachedRoute {
    plan: RoutePlan,
    fetched_at: Instant,
}

pub struct RouteCache {
    entries: HashMap<RouteKey, CachedRoute>,
    ttl: Duration,
    key_decimals: u32,
    provider: Arc<dyn RouteProvider>,
    inflight: Option<(RouteKey, JoinHandle<()>)>,
    results_tx: mpsc::Sender<RouteResult>,
}

impl RouteCache {
    pub fn new(
        provider: Arc<dyn RouteProvider>,
        cfg: &NavConfig,
        results_tx: mpsc::Sender<RouteResult>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: cfg.route_cache_ttl,
            key_decimals: cfg.route_key_decimals,
            provider,
            inflight: None,
            results_tx,
        }
    }

    pub fn key(&self, from: GeoPoint, to: GeoPoint) -> RouteKey {
        RouteKey::new(from, to, self.key_decimals)
    }

    /// Cache hit needs both a fresh entry and a usable polyline. A degenerate
    /// plan (fewer than 2 points) never satisfies a lookup.
    pub fn lookup(&self, from: GeoPoint, to: GeoPoint) -> Option<&RoutePlan> {
        let entry = self.entries.get(&self.key(from, to))?;
        if entry.fetched_at.elapsed() >= self.ttl || entry.plan.polyline.len() < 2 {
            return None;
        }
        Some(&entry.plan)
    }

    /// Start a fetch for this leg. Supersedes: an older in-flight fetch for a
    /// different leg is aborted; a fetch already running for the same key is
    /// left alone.
    pub fn request(&mut self, from: GeoPoint, to: GeoPoint) {
        let key = self.key(from, to);
        if let Some((inflight_key, handle)) = &self.inflight {
            if *inflight_key == key && !handle.is_finished() {
                debug!("Route fetch already in flight for this leg");
                return;
            }
            handle.abort();
        }

        let provider = Arc::clone(&self.provider);
        let tx = self.results_tx.clone();
        let handle = tokio::spawn(async move {
            let outcome = provider.fetch(from, to).await;
            if let Err(e) = &outcome {
                warn!("Route fetch failed: {e}");
            }
            let _ = tx.send(RouteResult { key, from, to, outcome }).await;
        });
        self.inflight = Some((key, handle));
    }

    /// Record a resolved fetch. Called by the run loop when it drains the
    /// results channel; failures leave the cache untouched.
    pub fn complete(&mut self, result: &RouteResult) {
        if let Some((key, _)) = &self.inflight {
            if *key == result.key {
                self.inflight = None;
            }
        }
        if let Ok(plan) = &result.outcome {
            self.entries.insert(
                result.key,
                CachedRoute { plan: plan.clone(), fetched_at: Instant::now() },
            );
        }
    }

    #[cfg(test)]
    fn insert_aged(&mut self, from: GeoPoint, to: GeoPoint, plan: RoutePlan, age: Duration) {
        let fetched_at = Instant::now().checked_sub(age).unwrap();
        self.entries
            .insert(self.key(from, to), CachedRoute { plan, fetched_at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider {
        delay: Duration,
    }

    impl RouteProvider for SlowProvider {
        fn fetch(&self, from: GeoPoint, to: GeoPoint) -> RouteFuture {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(RoutePlan { polyline: vec![from, to], maneuvers: vec![] })
            })
        }
    }

    fn cache(delay_ms: u64) -> (RouteCache, mpsc::Receiver<RouteResult>) {
        let (tx, rx) = mpsc::channel(8);
        let provider = Arc::new(SlowProvider { delay: Duration::from_millis(delay_ms) });
        (RouteCache::new(provider, &NavConfig::default(), tx), rx)
    }

    fn plan(points: usize) -> RoutePlan {
        RoutePlan {
            polyline: (0..points)
                .map(|i| GeoPoint::new(i as f64 * 0.001, 0.0))
                .collect(),
            maneuvers: vec![],
        }
    }

    #[test]
    fn key_rounds_to_four_decimals() {
        let a = RouteKey::new(
            GeoPoint::new(45.50004, -73.60003),
            GeoPoint::new(45.6, -73.7),
            4,
        );
        let b = RouteKey::new(
            GeoPoint::new(45.50001, -73.59998),
            GeoPoint::new(45.6, -73.7),
            4,
        );
        assert_eq!(a, b, "sub-11m jitter must map to the same leg");

        let c = RouteKey::new(
            GeoPoint::new(45.5002, -73.6),
            GeoPoint::new(45.6, -73.7),
            4,
        );
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn fresh_entry_hits_and_expired_entry_misses() {
        let (mut cache, _rx) = cache(1);
        let from = GeoPoint::new(45.5, -73.6);
        let to = GeoPoint::new(45.6, -73.7);

        cache.insert_aged(from, to, plan(3), Duration::from_secs(60));
        assert!(cache.lookup(from, to).is_some());

        cache.insert_aged(from, to, plan(3), Duration::from_secs(601));
        assert!(cache.lookup(from, to).is_none(), "past the 10 min TTL");
    }

    #[tokio::test]
    async fn degenerate_polyline_never_hits() {
        let (mut cache, _rx) = cache(1);
        let from = GeoPoint::new(45.5, -73.6);
        let to = GeoPoint::new(45.6, -73.7);
        cache.insert_aged(from, to, plan(1), Duration::from_secs(0));
        assert!(cache.lookup(from, to).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn new_request_aborts_the_previous_fetch() {
        let (mut cache, mut rx) = cache(50);
        let origin = GeoPoint::new(45.5, -73.6);
        let first = GeoPoint::new(45.6, -73.7);
        let second = GeoPoint::new(45.7, -73.8);

        cache.request(origin, first);
        cache.request(origin, second); // supersedes before the first resolves

        let result = rx.recv().await.expect("second fetch resolves");
        assert_eq!(result.to, second);

        // The aborted first fetch never delivers.
        let extra = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(extra.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_request_for_same_leg_is_coalesced() {
        let (mut cache, mut rx) = cache(50);
        let origin = GeoPoint::new(45.5, -73.6);
        let dest = GeoPoint::new(45.6, -73.7);

        cache.request(origin, dest);
        cache.request(origin, dest);

        let result = rx.recv().await.expect("one fetch resolves");
        cache.complete(&result);
        assert!(cache.lookup(origin, dest).is_some());

        let extra = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(extra.is_err(), "same-leg request must not double-fetch");
    }

    #[tokio::test]
    async fn failed_fetch_leaves_cache_untouched() {
        let (mut cache, _rx) = cache(1);
        let from = GeoPoint::new(45.5, -73.6);
        let to = GeoPoint::new(45.6, -73.7);
        cache.insert_aged(from, to, plan(3), Duration::from_secs(0));

        let result = RouteResult {
            key: cache.key(from, to),
            from,
            to,
            outcome: Err(RouteError::NoRoute),
        };
        cache.complete(&result);
        assert!(cache.lookup(from, to).is_some(), "stale plan retained");
    }

    #[test]
    fn provider_payload_parses_into_plan() {
        let raw = r#"{
            "code": "Ok",
            "routes": [{
                "geometry": { "coordinates": [[-73.6, 45.5], [-73.61, 45.51]] },
                "legs": [{
                    "steps": [{
                        "distance": 240.5,
                        "duration": 32.0,
                        "name": "Rue Principale",
                        "maneuver": {
                            "type": "turn",
                            "modifier": "right",
                            "location": [-73.605, 45.505]
                        }
                    }]
                }]
            }]
        }"#;
        let resp: OsrmResponse = serde_json::from_str(raw).unwrap();
        let plan = resp.routes.into_iter().next().unwrap().into_plan();
        assert_eq!(plan.polyline.len(), 2);
        assert_eq!(plan.polyline[0], GeoPoint::new(45.5, -73.6));
        assert_eq!(plan.maneuvers[0].street_name, "Rue Principale");
        assert_eq!(plan.maneuvers[0].modifier, "right");
        assert_eq!(plan.maneuvers[0].location, GeoPoint::new(45.505, -73.605));
    }
}
