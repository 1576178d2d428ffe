//! Alarm playback engine with state machine.
//!
//! IDLE → RINGING_CHIME → RINGING_SPEECH → IDLE
//!
//! A new alarm first tears down whatever was sounding (previous alarm,
//! read-aloud playback — everything shares one output device), then rings a
//! synthetic chime while speech audio is resolved from the entry's cache or
//! the TTS backend. Once audio is available the chime stops and the speech
//! loops, with a 1.5s pause between passes, until the user dismisses it.
//! The engine never times out a ringing alarm.
//!
//! Sessions are identified by a monotonically increasing token. Every async
//! resume point re-checks the token so a dismissal or a newer alarm during a
//! fetch or a pause wins over the stale continuation.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::records::RecordStore;
use crate::scheduler::AlarmContext;
use crate::speech::SpeechSynthesizer;

/// Alarm audio is 16-bit mono PCM at this rate.
pub const SAMPLE_RATE: u32 = 24000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    RingingChime,
    RingingSpeech,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::RingingChime => write!(f, "RINGING_CHIME"),
            Self::RingingSpeech => write!(f, "RINGING_SPEECH"),
        }
    }
}

/// The shared audio output device. One producer at a time; `stop_all` is the
/// teardown every new session performs before making any sound. Kept behind
/// a trait so playback timing can be tested against a fake clock.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Start the repeating attention chime. Must not block and must not
    /// touch the network.
    fn start_chime(&self);

    fn stop_chime(&self);

    /// Play one pass of speech audio. Returns true when playback reached its
    /// natural end, false if it was stopped mid-way.
    async fn play_speech_once(&self, pcm: Vec<f32>) -> bool;

    /// Stop anything currently sounding, chime or speech.
    fn stop_all(&self);
}

/// Decode base64 16-bit little-endian PCM into f32 samples.
pub fn decode_alarm_audio(data: &str) -> Result<Vec<f32>, String> {
    // Cached blobs may carry a data-URL prefix.
    let clean = match data.find(";base64,") {
        Some(pos) => &data[pos + 8..],
        None => data,
    };
    let bytes = BASE64
        .decode(clean.trim())
        .map_err(|e| format!("Invalid alarm audio: {e}"))?;
    if bytes.len() % 2 != 0 {
        return Err("Invalid alarm audio: odd byte count".to_string());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect())
}

/// One second of the attention chime: a 0.3s 880→440Hz sweep with a fast
/// attack and exponential decay, then silence. Looped while ringing.
fn chime_pattern() -> Vec<f32> {
    let n = SAMPLE_RATE as usize;
    let mut samples = Vec::with_capacity(n);
    let mut phase = 0.0f32;
    for i in 0..n {
        let t = i as f32 / SAMPLE_RATE as f32;
        let freq = if t < 0.2 {
            880.0 * 0.5f32.powf(t / 0.2)
        } else {
            440.0
        };
        let gain = if t < 0.05 {
            0.5 * t / 0.05
        } else if t < 0.3 {
            0.5 * (0.01f32 / 0.5).powf((t - 0.05) / 0.25)
        } else {
            0.0
        };
        phase += 2.0 * PI * freq / SAMPLE_RATE as f32;
        samples.push(phase.sin() * gain);
    }
    samples
}

/// Rodio-backed output. The OutputStream is kept alive for the process
/// lifetime; sinks are created per sound and cancelled by taking them out of
/// their slot and stopping them.
pub struct RodioOutput {
    stream: OutputStream,
    chime_sink: Mutex<Option<Sink>>,
    speech_sink: Arc<Mutex<Option<Sink>>>,
}

impl RodioOutput {
    pub fn new() -> Result<Self, String> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| format!("Failed to open audio output: {e}"))?;
        Ok(Self {
            stream,
            chime_sink: Mutex::new(None),
            speech_sink: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl AudioOutput for RodioOutput {
    fn start_chime(&self) {
        let sink = Sink::connect_new(self.stream.mixer());
        let source = SamplesBuffer::new(1, SAMPLE_RATE, chime_pattern()).repeat_infinite();
        sink.append(source);
        if let Some(old) = self.chime_sink.lock().unwrap().replace(sink) {
            old.stop();
        }
    }

    fn stop_chime(&self) {
        if let Some(sink) = self.chime_sink.lock().unwrap().take() {
            sink.stop();
        }
    }

    async fn play_speech_once(&self, pcm: Vec<f32>) -> bool {
        let sink = Sink::connect_new(self.stream.mixer());
        sink.append(SamplesBuffer::new(1, SAMPLE_RATE, pcm));
        *self.speech_sink.lock().unwrap() = Some(sink);

        // Poll for completion; stop_all cancels by taking the sink.
        let slot = self.speech_sink.clone();
        let completed = tokio::task::spawn_blocking(move || loop {
            {
                let guard = slot.lock().unwrap();
                match guard.as_ref() {
                    Some(sink) if sink.empty() => break true,
                    Some(_) => {}
                    None => break false,
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        })
        .await
        .unwrap_or(false);

        self.speech_sink.lock().unwrap().take();
        completed
    }

    fn stop_all(&self) {
        self.stop_chime();
        if let Some(sink) = self.speech_sink.lock().unwrap().take() {
            sink.stop();
        }
    }
}

struct PlayerInner {
    output: Arc<dyn AudioOutput>,
    speech: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn RecordStore>,
    loop_pause: Duration,
    /// Monotonic session token; bumped on every trigger and dismiss.
    session: AtomicU64,
    cancel: Mutex<CancellationToken>,
    state: Mutex<PlaybackState>,
    active: Mutex<Option<AlarmContext>>,
}

/// The alarm playback engine. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct AlarmPlayer {
    inner: Arc<PlayerInner>,
}

impl AlarmPlayer {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        speech: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn RecordStore>,
        loop_pause: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                output,
                speech,
                store,
                loop_pause,
                session: AtomicU64::new(0),
                cancel: Mutex::new(CancellationToken::new()),
                state: Mutex::new(PlaybackState::Idle),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.inner.state.lock().unwrap()
    }

    pub fn active_alarm(&self) -> Option<AlarmContext> {
        self.inner.active.lock().unwrap().clone()
    }

    fn is_current(&self, token: u64) -> bool {
        self.inner.session.load(Ordering::SeqCst) == token
    }

    fn set_state(&self, next: PlaybackState) {
        let mut state = self.inner.state.lock().unwrap();
        info!("State: {} → {next}", *state);
        *state = next;
    }

    /// Tear down any previous session and claim the output device.
    /// Returns the new session token and its cancellation token.
    fn begin_session(&self, context: AlarmContext) -> (u64, CancellationToken) {
        let token = self.inner.session.fetch_add(1, Ordering::SeqCst) + 1;
        let fresh = {
            let mut cancel = self.inner.cancel.lock().unwrap();
            cancel.cancel();
            *cancel = CancellationToken::new();
            cancel.clone()
        };
        // Unconditional: a prior alarm, a pending replay, or unrelated
        // read-aloud playback all share this output device.
        self.inner.output.stop_all();
        *self.inner.active.lock().unwrap() = Some(context);
        (token, fresh)
    }

    /// Ring an alarm until dismissed or superseded by a newer one.
    pub async fn trigger(&self, context: AlarmContext) {
        info!("Alarm ringing: {} ({})", context.title, context.record_id);
        let (token, cancel) = self.begin_session(context.clone());

        // Instant feedback before any network wait.
        self.inner.output.start_chime();
        self.set_state(PlaybackState::RingingChime);

        let audio = self.resolve_audio(&context).await;

        // A dismissal or newer alarm during the fetch wins; this resume is stale.
        if !self.is_current(token) {
            debug!("Discarding stale speech fetch for {}", context.record_id);
            return;
        }

        let Some(audio) = audio else {
            // Synthesis failed: the chime keeps ringing until dismissed.
            return;
        };
        let pcm = match decode_alarm_audio(&audio) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("{e} — chime continues");
                return;
            }
        };

        self.inner.output.stop_chime();
        self.set_state(PlaybackState::RingingSpeech);

        loop {
            if !self.is_current(token) {
                break;
            }
            let completed = self.inner.output.play_speech_once(pcm.clone()).await;
            if !completed || !self.is_current(token) {
                break;
            }
            // Abortable pause between passes; dismiss cancels the timer
            // rather than leaving a replay pending.
            tokio::select! {
                _ = tokio::time::sleep(self.inner.loop_pause) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }

    /// Cached entry audio, or a fresh synthesis written back to the record.
    async fn resolve_audio(&self, context: &AlarmContext) -> Option<String> {
        if let Some(record) = self.inner.store.get_record(&context.record_id) {
            if let Some(audio) = record.alarm_audio(context.kind, context.index) {
                debug!("Using cached alarm audio for {}", context.record_id);
                return Some(audio.to_string());
            }
        }

        match self
            .inner
            .speech
            .synthesize(&context.speak_text, &context.language)
            .await
        {
            Ok(audio) => {
                if let Some(mut record) = self.inner.store.get_record(&context.record_id) {
                    if record.set_alarm_audio(context.kind, context.index, audio.clone()) {
                        self.inner.store.save_record(&record);
                        debug!("Cached alarm audio on record {}", context.record_id);
                    }
                }
                Some(audio)
            }
            Err(e) => {
                warn!("Alarm speech synthesis failed: {e} — chime keeps ringing");
                None
            }
        }
    }

    /// User acknowledgement. Stops whatever is sounding or pending and
    /// returns to IDLE. The only way a ringing alarm ends.
    pub fn dismiss(&self) {
        self.inner.session.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel.lock().unwrap().cancel();
        self.inner.output.stop_all();

        let dismissed = self.inner.active.lock().unwrap().take();
        match dismissed {
            Some(context) => {
                info!("Alarm dismissed: {}", context.title);
                self.set_state(PlaybackState::Idle);
            }
            None => debug!("Dismiss with no active alarm"),
        }
    }
}
