//! circuit-nav — turn-by-turn guidance for school bus circuits.
//!
//! Two modes:
//!   navigate  drive a known circuit with spoken guidance
//!   record    drive a circuit once to capture its trace and stops
//!
//! Architecture:
//!   - UDP fix ingestion (location.rs) feeds the run loop over a channel
//!   - the run loop ticks the guidance engine and executes its events
//!   - speech requests drain on their own task (speech.rs)
//!   - route fetches resolve on their own task (route_cache.rs)
//!   - a thin axum surface publishes the run snapshot (server.rs)

mod config;
mod guidance;
mod instructions;
mod location;
mod recording;
mod route_cache;
mod server;
mod session;
mod speech;
mod store;
mod tracker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use nav_types::haversine_m;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::NavConfig;
use guidance::{GuidanceEngine, GuidanceEvent};
use location::LocationSource;
use recording::RecordingSession;
use route_cache::{HttpRouteProvider, RouteCache, RouteResult};
use server::{NavSnapshot, RunStatus, SharedSnapshot};
use session::SessionValidator;
use speech::{AudioBackend, SpeechGateway, SpeechRequest, Voice};
use store::StoreClient;
use tracker::PositionTracker;

const FIRST_FIX_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "circuit-nav", about = "School bus circuit guidance")]
struct Args {
    /// Circuit store RPC endpoint.
    #[arg(long, env = "NAV_STORE_URL")]
    store_url: String,

    /// UDP address for incoming GPS fixes.
    #[arg(long, default_value = "0.0.0.0:8765")]
    udp_listen: String,

    /// HTTP address for the status surface.
    #[arg(long, default_value = "0.0.0.0:3000")]
    http_listen: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a circuit with spoken guidance.
    Navigate {
        #[arg(long)]
        circuit_id: String,
        /// Route provider base URL (OSRM-compatible).
        #[arg(long, env = "NAV_ROUTE_URL")]
        route_url: String,
    },
    /// Record a new circuit: trace plus marked stops.
    Record {
        /// Display name for the new circuit.
        #[arg(long)]
        name: String,
    },
}

/// Headless audio backend: the cab head unit renders the actual sound; this
/// process logs what it asked for.
#[derive(Default)]
struct LogAudioBackend;

impl AudioBackend for LogAudioBackend {
    fn available_voices(&self) -> Vec<Voice> {
        vec![
            Voice { name: "Amélie".to_string(), locale: "fr-CA".to_string() },
            Voice { name: "Thomas".to_string(), locale: "fr-FR".to_string() },
        ]
    }
    fn speak(&mut self, text: &str, voice: Option<&Voice>) {
        match voice {
            Some(v) => info!("🔊 [{}] {text}", v.name),
            None => info!("🔊 {text}"),
        }
    }
    fn cancel(&mut self) {}
    fn is_busy(&self) -> bool {
        false
    }
    fn play_tone(&mut self, samples: &[f32], rate: u32) {
        info!("🔔 tone ({} samples @ {rate} Hz)", samples.len());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "circuit_nav=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = NavConfig::default();

    // Session first: everything downstream needs it.
    let token = std::env::var("NAV_SESSION_TOKEN")
        .context("NAV_SESSION_TOKEN is not set; sign in first")?;
    let validator = SessionValidator::from_env()?;
    let claims = validator
        .validate(&token)
        .context("session token is invalid or expired")?;
    info!("🚌 Session valid for {}", claims.sub);

    let app_key = std::env::var("NAV_APP_KEY").context("NAV_APP_KEY is not set")?;
    let store = StoreClient::new(&args.store_url, &app_key, &token);

    match args.command {
        Command::Navigate { circuit_id, route_url } => {
            navigate(args.udp_listen, args.http_listen, cfg, store, circuit_id, route_url).await
        }
        Command::Record { name } => record(args.udp_listen, cfg, store, name).await,
    }
}

async fn navigate(
    udp_listen: String,
    http_listen: String,
    cfg: NavConfig,
    store: StoreClient,
    circuit_id: String,
    route_url: String,
) -> anyhow::Result<()> {
    // Fatal-to-start: stops and a first fix. The reference trajectory only
    // degrades guidance when missing.
    let stops = store
        .get_stops(&circuit_id)
        .await
        .context("could not load the circuit's stops")?;
    info!("🗺️ Circuit {circuit_id}: {} stops", stops.len());

    let reference = match store.get_reference_trajectory(&circuit_id).await {
        Ok(t) => t,
        Err(e) => {
            warn!("Reference trajectory unavailable, falling back to routes: {e}");
            None
        }
    };

    let mut source = LocationSource::bind_udp(&udp_listen).await?;
    let Some(first) = source.first_fix(FIRST_FIX_TIMEOUT).await else {
        bail!("no GPS fix within {FIRST_FIX_TIMEOUT:?}; check the forwarder");
    };
    info!("📍 First fix at {:.5},{:.5}", first.lat, first.lon);

    let snapshot: SharedSnapshot = Arc::new(tokio::sync::RwLock::new(NavSnapshot::default()));
    tokio::spawn({
        let snapshot = snapshot.clone();
        async move {
            if let Err(e) = server::serve(&http_listen, snapshot).await {
                error!("Status surface failed: {e}");
            }
        }
    });

    let (speech_tx, speech_rx) = mpsc::channel::<SpeechRequest>(32);
    let gateway = SpeechGateway::new(LogAudioBackend, cfg.speech_cooldown, &cfg.locale);
    tokio::spawn(speech::run_speech_task(speech_rx, gateway));
    // Run start is the operator gesture that unlocks audio.
    let _ = speech_tx.send(SpeechRequest::Unlock).await;

    let provider = Arc::new(HttpRouteProvider::new(&route_url, cfg.route_timeout)?);
    let (route_tx, mut route_rx) = mpsc::channel::<RouteResult>(8);
    let mut cache = RouteCache::new(provider, &cfg, route_tx);

    let mut tracker = PositionTracker::new(&cfg);
    let mut engine = GuidanceEngine::new(cfg, stops, reference)?;

    {
        let mut snap = snapshot.write().await;
        snap.status = RunStatus::Running;
        snap.active_stop_index = Some(0);
        snap.active_stop_label = engine.active_stop().and_then(|s| s.label.clone());
    }

    // First leg.
    let smoothed = tracker.update(&first);
    if let Some(stop) = engine.active_stop() {
        cache.request(smoothed.point, stop.location);
    }

    loop {
        tokio::select! {
            fix = source.recv() => {
                let Some(fix) = fix else {
                    bail!("fix stream closed");
                };
                let smoothed = tracker.update(&fix);
                let events = engine.tick(&smoothed, Instant::now());
                for event in events {
                    handle_event(event, &mut engine, &mut cache, &speech_tx, &snapshot).await;
                }
                snapshot.write().await.off_route = engine.off_route_strikes() > 0;
                if engine.is_finished() {
                    break;
                }
            }
            Some(result) = route_rx.recv() => {
                cache.complete(&result);
                match &result.outcome {
                    Ok(plan) => {
                        // Only install the plan if it is still for the
                        // active leg; arrivals can outrun slow fetches.
                        let current = engine.active_stop().map(|s| s.location);
                        if current.map_or(false, |loc| haversine_m(loc, result.to) < 5.0) {
                            engine.set_route(plan.clone());
                            snapshot.write().await.last_error = None;
                        }
                    }
                    Err(e) => {
                        warn!("Route unavailable, keeping previous plan: {e}");
                        snapshot.write().await.last_error = Some(e.to_string());
                    }
                }
            }
        }
    }

    snapshot.write().await.status = RunStatus::Finished;
    let _ = speech_tx.send(SpeechRequest::Silence).await;
    info!("🏁 Circuit finished");
    Ok(())
}

async fn handle_event(
    event: GuidanceEvent,
    engine: &mut GuidanceEngine,
    cache: &mut RouteCache,
    speech_tx: &mpsc::Sender<SpeechRequest>,
    snapshot: &SharedSnapshot,
) {
    match event {
        GuidanceEvent::Speak { text, interrupt } => {
            snapshot.write().await.last_instruction = Some(text.clone());
            let _ = speech_tx.send(SpeechRequest::Speak { text, interrupt }).await;
        }
        GuidanceEvent::Ding => {
            let _ = speech_tx.send(SpeechRequest::Ding).await;
        }
        GuidanceEvent::Banner(banner) => {
            snapshot.write().await.banner = banner;
        }
        GuidanceEvent::StopAdvanced { index } => {
            info!("➡️ Stop {index} is now active");
            let mut snap = snapshot.write().await;
            snap.active_stop_index = Some(index);
            snap.active_stop_label = engine.active_stop().and_then(|s| s.label.clone());
        }
        GuidanceEvent::RouteRequest { from, to } => {
            // Cache first; fetch only on a miss.
            if let Some(plan) = cache.lookup(from, to) {
                engine.set_route(plan.clone());
            } else {
                cache.request(from, to);
            }
        }
        GuidanceEvent::Finished => {
            info!("🎉 All stops served");
        }
    }
}

async fn record(
    udp_listen: String,
    cfg: NavConfig,
    store: StoreClient,
    name: String,
) -> anyhow::Result<()> {
    let circuit_id = store
        .create_circuit(&name)
        .await
        .context("could not create the circuit")?;
    let version_id = store.start_version(&circuit_id).await?;
    info!("🎬 Recording circuit {circuit_id} (version {version_id})");

    let mut source = LocationSource::bind_udp(&udp_listen).await?;
    let Some(first) = source.first_fix(FIRST_FIX_TIMEOUT).await else {
        bail!("no GPS fix within {FIRST_FIX_TIMEOUT:?}; check the forwarder");
    };

    let mut tracker = PositionTracker::new(&cfg);
    let mut session = RecordingSession::new(&cfg);
    let mut last_smoothed = tracker.update(&first);
    session.offer_fix(&last_smoothed, Instant::now());

    info!("Commands: stop [label] | undo | pause | resume | done");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            fix = source.recv() => {
                let Some(fix) = fix else {
                    bail!("fix stream closed");
                };
                last_smoothed = tracker.update(&fix);
                if session.offer_fix(&last_smoothed, Instant::now()) {
                    info!("Trace: {} points", session.trace_len());
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Some(RecordCommand::Stop(label)) => {
                        let stop = session.mark_stop(&last_smoothed, label);
                        info!("📌 Stop {} marked at {:.5},{:.5}",
                            stop.index, stop.location.lat, stop.location.lon);
                    }
                    Some(RecordCommand::Undo) => match session.undo_stop() {
                        Some(s) => info!("↩️ Stop {} removed", s.index),
                        None => warn!("No stop to undo"),
                    },
                    Some(RecordCommand::Pause) => {
                        session.pause();
                        info!("⏸️ Trace paused (stop marking still active)");
                    }
                    Some(RecordCommand::Resume) => {
                        session.resume();
                        info!("▶️ Trace resumed");
                    }
                    Some(RecordCommand::Done) => break,
                    None => warn!("Unknown command: {line}"),
                }
            }
        }
    }

    let done = session.finish().context("recording rejected")?;
    store.save_trace(&circuit_id, &done.trace).await?;
    for stop in &done.stops {
        store.append_stop(&circuit_id, stop).await?;
    }
    info!(
        "💾 Saved circuit {circuit_id}: {} trace points, {} stops",
        done.trace.len(),
        done.stops.len()
    );
    Ok(())
}

enum RecordCommand {
    Stop(Option<String>),
    Undo,
    Pause,
    Resume,
    Done,
}

fn parse_command(line: &str) -> Option<RecordCommand> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };
    match verb {
        "stop" => Some(RecordCommand::Stop(
            (!rest.is_empty()).then(|| rest.to_string()),
        )),
        "undo" => Some(RecordCommand::Undo),
        "pause" => Some(RecordCommand::Pause),
        "resume" => Some(RecordCommand::Resume),
        "done" => Some(RecordCommand::Done),
        _ => None,
    }
}
