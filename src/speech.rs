//! Speech synthesis for alarm audio.
//!
//! Sends alarm text to the Gemini TTS endpoint and returns base64-encoded
//! 16-bit 24kHz mono PCM. Fallible by design: callers absorb failures (the
//! chime keeps ringing, pre-fetch skips the entry) rather than surfacing them.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::SpeechConfig;

const MAX_TTS_CHARS: usize = 500;

/// Seam between the alarm engine and the TTS backend, so playback and
/// pre-fetch can be exercised against a scripted synthesizer in tests.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in `language`. Returns base64 PCM on success.
    async fn synthesize(&self, text: &str, language: &str) -> Result<String, String>;
}

pub struct GeminiSpeech {
    config: SpeechConfig,
    api_key: String,
    client: Client,
}

impl GeminiSpeech {
    pub fn new(config: SpeechConfig) -> Self {
        let api_key = if config.api_key.is_empty() {
            std::env::var("GEMINI_API_KEY").unwrap_or_default()
        } else {
            config.api_key.clone()
        };

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            api_key,
            client,
        }
    }
}

/// Trim to the TTS length limit and strip markdown characters the model
/// would otherwise read aloud.
fn sanitize(text: &str) -> String {
    let mut out: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '#'))
        .collect();
    if out.len() > MAX_TTS_CHARS {
        let mut cut = MAX_TTS_CHARS;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

#[async_trait]
impl SpeechSynthesizer for GeminiSpeech {
    async fn synthesize(&self, text: &str, language: &str) -> Result<String, String> {
        let text = sanitize(text);
        if text.trim().is_empty() {
            return Err("TTS text is empty".to_string());
        }

        let body = json!({
            "contents": [{
                "parts": [{
                    "text": format!("Speak clearly in the selected language ({language}): {text}")
                }]
            }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.config.voice }
                    }
                }
            }
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.host, self.config.model, self.api_key
        );

        debug!("Requesting TTS for {} chars ({language})", text.len());

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    format!("Cannot connect to TTS backend at {}", self.config.host)
                } else if e.is_timeout() {
                    "TTS request timed out".to_string()
                } else {
                    format!("TTS request failed: {e}")
                }
            })?;

        if !resp.status().is_success() {
            warn!("TTS backend returned status {}", resp.status());
            return Err(format!("TTS backend returned status {}", resp.status()));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse TTS response: {e}"))?;

        let audio = data["candidates"][0]["content"]["parts"][0]["inlineData"]["data"]
            .as_str()
            .ok_or("No audio in TTS response")?;

        if audio.is_empty() {
            return Err("No audio in TTS response".to_string());
        }

        Ok(audio.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_markdown_and_truncates() {
        assert_eq!(sanitize("take *one* #tablet_"), "take one tablet");

        let long = "a".repeat(600);
        assert_eq!(sanitize(&long).len(), MAX_TTS_CHARS);
    }

    #[test]
    fn sanitize_respects_char_boundaries() {
        // Multi-byte text must not be cut mid-character.
        let long = "दवा ".repeat(200);
        let out = sanitize(&long);
        assert!(out.len() <= MAX_TTS_CHARS);
        assert!(out.is_char_boundary(out.len()));
    }
}
