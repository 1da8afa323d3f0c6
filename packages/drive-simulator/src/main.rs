//! main.rs — GPS drive simulator entry point
//!
//! Drives a simulated school bus along a configured route and feeds the
//! navigator's UDP listener with fix envelopes, so the whole guidance path
//! can be exercised on a desk:
//!   1. Physics tick at the configured GPS rate (speed lag, polyline follow)
//!   2. GPS sampling (Gaussian noise, heading jitter, reported accuracy)
//!   3. Optional fault scenario (degraded GPS, signal dropout, detour)
//!   4. UDP envelope transmission
//!
//! The simulator never crashes on I/O problems; send errors are logged and
//! the loop continues.

mod scenarios;
mod udp_tx;
mod vehicle_sim;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use nav_types::GeoPoint;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::interval;
use tracing::{info, warn};

use scenarios::ScenarioConfig;
use udp_tx::FixTransmitter;
use vehicle_sim::{GpsModel, VehicleSim};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "drive-sim", about = "Circuit Navigator GPS drive simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Navigator UDP address
    #[arg(long, default_value = "127.0.0.1:8765")]
    target: String,
    /// Simulation speed multiplier (1.0 = real-time)
    #[arg(long, default_value = "1.0")]
    speed: f64,
    /// Fault scenario preset: degraded | dropout | detour | default
    #[arg(long)]
    scenario: Option<String>,
    /// Source id carried in the fix envelopes
    #[arg(long, default_value = "drive-sim")]
    source: String,
}

// ── Config structs ────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct FullConfig {
    route: RouteConfig,
    vehicle: VehicleConfig,
    gps: GpsConfig,
}

#[derive(Debug, serde::Deserialize)]
struct RouteConfig {
    /// [lat, lon] pairs, in driving order.
    points: Vec<[f64; 2]>,
}

#[derive(Debug, serde::Deserialize)]
struct VehicleConfig {
    target_speed_mps: f64,
}

#[derive(Debug, serde::Deserialize)]
struct GpsConfig {
    rate_hz: f64,
    noise_sigma_m: f64,
    heading_jitter_deg: f64,
    accuracy_m: f64,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drive_simulator=info".into()),
        )
        .init();

    let args = Args::parse();

    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let cfg: FullConfig = toml::from_str(&config_str).expect("Invalid config.toml");
    assert!(cfg.route.points.len() >= 2, "route needs at least 2 points");

    let scenario = match args.scenario.as_deref() {
        Some(name) => scenarios::preset_by_name(name)
            .unwrap_or_else(|| panic!("Unknown scenario preset: {name}")),
        None => ScenarioConfig::default(),
    };

    let route: Vec<GeoPoint> = cfg
        .route
        .points
        .iter()
        .map(|p| GeoPoint::new(p[0], p[1]))
        .collect();

    info!(
        "🚌 Drive simulator — {} route points, {:.0} m/s target, {} Hz GPS, scenario {:?}",
        route.len(),
        cfg.vehicle.target_speed_mps,
        cfg.gps.rate_hz,
        scenario.active
    );

    let mut sim = VehicleSim::new(route, cfg.vehicle.target_speed_mps);
    let gps = GpsModel {
        noise_sigma_m: cfg.gps.noise_sigma_m,
        heading_jitter_deg: cfg.gps.heading_jitter_deg,
        accuracy_m: cfg.gps.accuracy_m,
    };
    let mut tx = FixTransmitter::new(&args.target, &args.source).expect("Failed to bind UDP socket");
    let mut rng = StdRng::from_entropy();

    let tick_ms = (1000.0 / cfg.gps.rate_hz) as u64;
    let mut ticker = interval(Duration::from_millis(tick_ms));
    let dt = (tick_ms as f64 / 1000.0) * args.speed;

    let mut sent: u64 = 0;
    let mut parked_logged = false;

    loop {
        ticker.tick().await;
        sim.tick(dt);

        if sim.at_route_end() && !parked_logged {
            info!("🏁 Route complete; bus parked, still emitting fixes");
            parked_logged = true;
        }

        if scenario.is_dropped(sim.t_elapsed) {
            warn!("📵 Signal dropout (t={:.0}s)", sim.t_elapsed);
            continue;
        }

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let fix = gps.sample(&sim, &scenario, &mut rng, timestamp_ms);
        tx.send_fix(&fix);
        sent += 1;

        if sent % 15 == 0 {
            info!(
                "📡 t={:.0}s | {:.5},{:.5} | {:.1} m/s | {} fixes sent",
                sim.t_elapsed,
                fix.lat,
                fix.lon,
                sim.speed_mps(),
                sent
            );
        }
    }
}
