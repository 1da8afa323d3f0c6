//! Speech/alert gateway — one audio channel, no overlap, no rapid-fire.
//!
//! Every announcement in the app funnels through this gateway. The guidance
//! engine only *decides* what to say; requests travel over an mpsc queue and
//! are drained here under the gateway's own cooldown and interrupt policy,
//! so the tick logic stays testable without mocking audio.
//!
//! Platform audio sits behind [`AudioBackend`]. Playback failures are
//! best-effort by contract: nothing here returns an error to the caller, and
//! guidance state never depends on whether a sound actually played.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};

// ── Backend boundary ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub name: String,
    /// BCP-47 locale tag, e.g. "fr-CA".
    pub locale: String,
}

/// Platform text-to-speech and tone output. Implementations swallow their
/// own failures; the gateway never learns whether playback succeeded.
pub trait AudioBackend: Send {
    fn available_voices(&self) -> Vec<Voice>;
    fn speak(&mut self, text: &str, voice: Option<&Voice>);
    /// Stop the current utterance, if any.
    fn cancel(&mut self);
    fn is_busy(&self) -> bool;
    fn play_tone(&mut self, samples: &[f32], sample_rate: u32);
}

// ── Tone synthesis ────────────────────────────────────────────────────────────

pub const DING_FREQ_HZ: f64 = 880.0;
pub const DING_DURATION_S: f64 = 0.2;

/// Synthesize the proximity ding: a short 880 Hz tone with an exponential
/// decay envelope. No audio asset, zero fetch latency.
pub fn synth_ding(sample_rate: u32) -> Vec<f32> {
    let n = (sample_rate as f64 * DING_DURATION_S) as usize;
    (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            let envelope = (-t * 25.0).exp();
            (0.8 * (std::f64::consts::TAU * DING_FREQ_HZ * t).sin() * envelope) as f32
        })
        .collect()
}

/// A short silent buffer, used as the unlock gesture payload.
fn synth_silence(sample_rate: u32) -> Vec<f32> {
    vec![0.0; (sample_rate as f64 * 0.05) as usize]
}

// ── Voice selection ───────────────────────────────────────────────────────────

/// Exact regional match, then language-family match, then first available.
pub fn select_voice(voices: &[Voice], locale: &str) -> Option<Voice> {
    let wanted = locale.to_lowercase();
    let family = wanted.split('-').next().unwrap_or(&wanted).to_string();

    voices
        .iter()
        .find(|v| v.locale.to_lowercase() == wanted)
        .or_else(|| {
            voices
                .iter()
                .find(|v| v.locale.to_lowercase().starts_with(&family))
        })
        .or_else(|| voices.first())
        .cloned()
}

// ── Gateway ───────────────────────────────────────────────────────────────────

const TONE_SAMPLE_RATE: u32 = 44_100;

pub struct SpeechGateway<B: AudioBackend> {
    backend: B,
    cooldown: Duration,
    preferred_locale: String,
    unlocked: bool,
    voice: Option<Voice>,
    last_spoke_at: Option<Instant>,
}

impl<B: AudioBackend> SpeechGateway<B> {
    pub fn new(backend: B, cooldown: Duration, preferred_locale: &str) -> Self {
        Self {
            backend,
            cooldown,
            preferred_locale: preferred_locale.to_string(),
            unlocked: false,
            voice: None,
            last_spoke_at: None,
        }
    }

    /// One-time unlock: platforms gate audio behind a user gesture, so the
    /// caller invokes this from that gesture. Plays a silent buffer and
    /// warms the voice list. Until then every speak/ding is dropped.
    pub fn unlock(&mut self) {
        if self.unlocked {
            return;
        }
        self.backend.play_tone(&synth_silence(TONE_SAMPLE_RATE), TONE_SAMPLE_RATE);
        self.voice = select_voice(&self.backend.available_voices(), &self.preferred_locale);
        self.unlocked = true;
        match &self.voice {
            Some(v) => info!("Speech unlocked, voice: {} ({})", v.name, v.locale),
            None => info!("Speech unlocked, no voice available"),
        }
    }

    /// Locale tag of the selected voice (mirrors the voice, not the request).
    pub fn locale(&self) -> Option<&str> {
        self.voice.as_ref().map(|v| v.locale.as_str())
    }

    /// Returns true when the utterance was handed to the backend.
    pub fn speak(&mut self, text: &str, interrupt: bool, now: Instant) -> bool {
        if !self.unlocked {
            return false;
        }
        if let Some(last) = self.last_spoke_at {
            if now.duration_since(last) < self.cooldown {
                debug!("Speech suppressed by cooldown: {text}");
                return false;
            }
        }
        if self.backend.is_busy() {
            if interrupt {
                self.backend.cancel();
            } else {
                debug!("Speech dropped, channel busy: {text}");
                return false;
            }
        }
        self.backend.speak(text, self.voice.as_ref());
        self.last_spoke_at = Some(now);
        true
    }

    /// Play the proximity ding. Independent of the utterance cooldown — the
    /// ding is a cue, not speech.
    pub fn ding(&mut self) -> bool {
        if !self.unlocked {
            return false;
        }
        self.backend.play_tone(&synth_ding(TONE_SAMPLE_RATE), TONE_SAMPLE_RATE);
        true
    }

    /// Immediately silence the channel. Called when a run stops.
    pub fn silence(&mut self) {
        self.backend.cancel();
    }
}

// ── Outbound request queue ────────────────────────────────────────────────────

/// What the run loop is allowed to ask of the audio channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechRequest {
    Speak { text: String, interrupt: bool },
    Ding,
    Unlock,
    Silence,
}

/// Drain speech requests from the run loop. Runs as its own task so a slow
/// backend can never stall tick processing.
pub async fn run_speech_task<B: AudioBackend>(
    mut rx: mpsc::Receiver<SpeechRequest>,
    mut gateway: SpeechGateway<B>,
) {
    while let Some(req) = rx.recv().await {
        match req {
            SpeechRequest::Speak { text, interrupt } => {
                gateway.speak(&text, interrupt, Instant::now());
            }
            SpeechRequest::Ding => {
                gateway.ding();
            }
            SpeechRequest::Unlock => gateway.unlock(),
            SpeechRequest::Silence => gateway.silence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingBackend {
        spoken: Vec<(String, Option<String>)>,
        tones: usize,
        cancels: usize,
        busy: bool,
        voices: Vec<Voice>,
    }

    impl AudioBackend for RecordingBackend {
        fn available_voices(&self) -> Vec<Voice> {
            self.voices.clone()
        }
        fn speak(&mut self, text: &str, voice: Option<&Voice>) {
            self.spoken
                .push((text.to_string(), voice.map(|v| v.locale.clone())));
        }
        fn cancel(&mut self) {
            self.cancels += 1;
        }
        fn is_busy(&self) -> bool {
            self.busy
        }
        fn play_tone(&mut self, _samples: &[f32], _rate: u32) {
            self.tones += 1;
        }
    }

    fn voices() -> Vec<Voice> {
        vec![
            Voice { name: "Alice".into(), locale: "en-US".into() },
            Voice { name: "Chantal".into(), locale: "fr-FR".into() },
            Voice { name: "Amélie".into(), locale: "fr-CA".into() },
        ]
    }

    #[test]
    fn calls_before_unlock_are_dropped() {
        let mut g = SpeechGateway::new(
            RecordingBackend::default(),
            Duration::from_millis(1600),
            "fr-CA",
        );
        let now = Instant::now();
        assert!(!g.speak("Bonjour", false, now));
        assert!(!g.ding());
        g.unlock();
        assert!(g.speak("Bonjour", false, now));
        assert!(g.ding());
    }

    #[test]
    fn cooldown_suppresses_rapid_fire() {
        let mut g = SpeechGateway::new(
            RecordingBackend::default(),
            Duration::from_millis(1600),
            "fr-CA",
        );
        g.unlock();
        let t0 = Instant::now();
        assert!(g.speak("un", false, t0));
        assert!(!g.speak("deux", false, t0 + Duration::from_millis(500)));
        assert!(g.speak("trois", false, t0 + Duration::from_millis(1700)));
    }

    #[test]
    fn busy_channel_drops_unless_interrupt() {
        let backend = RecordingBackend { busy: true, ..Default::default() };
        let mut g = SpeechGateway::new(backend, Duration::from_millis(0), "fr-CA");
        g.unlock();
        let t0 = Instant::now();
        assert!(!g.speak("drop me", false, t0));
        assert!(g.speak("urgent", true, t0 + Duration::from_millis(1)));
    }

    #[test]
    fn exact_locale_voice_preferred() {
        let v = select_voice(&voices(), "fr-CA").unwrap();
        assert_eq!(v.name, "Amélie");
    }

    #[test]
    fn language_family_fallback() {
        let v = select_voice(&voices(), "fr-BE").unwrap();
        assert_eq!(v.locale, "fr-FR");
    }

    #[test]
    fn first_voice_fallback() {
        let v = select_voice(&voices(), "de-DE").unwrap();
        assert_eq!(v.locale, "en-US");
        assert!(select_voice(&[], "fr-CA").is_none());
    }

    #[test]
    fn ding_has_expected_length_and_decays() {
        let samples = synth_ding(44_100);
        assert_eq!(samples.len(), (44_100.0 * DING_DURATION_S) as usize);
        let head: f32 = samples[..2000].iter().map(|s| s.abs()).sum();
        let tail: f32 = samples[samples.len() - 2000..].iter().map(|s| s.abs()).sum();
        assert!(head > tail * 10.0, "envelope must decay: head={head} tail={tail}");
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn voice_locale_mirrored_after_unlock() {
        let backend = RecordingBackend { voices: voices(), ..Default::default() };
        let mut g = SpeechGateway::new(backend, Duration::from_millis(0), "fr-CA");
        assert!(g.locale().is_none());
        g.unlock();
        assert_eq!(g.locale(), Some("fr-CA"));
    }
}
