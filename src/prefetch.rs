//! Background speech pre-fetch for newly scheduled reminders.
//!
//! Synthesizes alarm audio ahead of time so that when a reminder fires the
//! blob is already cached on the entry and the chime barely rings alone.
//! Entries are fetched concurrently and independently: a failed entry is
//! skipped (the playback engine will retry at fire time), and the record is
//! persisted once if anything new was cached.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::locale::{instruction_speak_text, medication_speak_text};
use crate::records::{EntryKind, MedicalRecord, RecordStore};
use crate::speech::SpeechSynthesizer;

pub struct AudioPrefetcher {
    speech: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn RecordStore>,
    ui_language: String,
}

impl AudioPrefetcher {
    pub fn new(
        speech: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn RecordStore>,
        ui_language: &str,
    ) -> Self {
        Self {
            speech,
            store,
            ui_language: ui_language.to_string(),
        }
    }

    /// Entries on `record` that want audio: active medications with at least
    /// one reminder and no cache, and instructions with at least one
    /// reminder and no cache.
    fn pending_entries(&self, record: &MedicalRecord) -> Vec<(EntryKind, usize, String)> {
        let lang = record
            .analysis_language
            .clone()
            .unwrap_or_else(|| self.ui_language.clone());

        let mut pending = Vec::new();
        for (idx, med) in record.medications.iter().enumerate() {
            if med.is_active && !med.reminders.is_empty() && med.alarm_audio.is_none() {
                pending.push((
                    EntryKind::Medication,
                    idx,
                    medication_speak_text(&lang, med),
                ));
            }
        }
        for (idx, inst) in record.instructions.iter().enumerate() {
            if !inst.reminders.is_empty() && inst.alarm_audio.is_none() {
                pending.push((
                    EntryKind::Instruction,
                    idx,
                    instruction_speak_text(&lang, inst),
                ));
            }
        }
        pending
    }

    /// Synthesize and cache audio for every entry on `record` that needs it.
    /// Persists the record once if any entry gained audio.
    pub async fn prefetch_record(&self, record: &MedicalRecord) {
        let pending = self.pending_entries(record);
        if pending.is_empty() {
            return;
        }
        debug!(
            "Pre-fetching alarm audio for {} entries of record {}",
            pending.len(),
            record.id
        );

        let lang = record
            .analysis_language
            .clone()
            .unwrap_or_else(|| self.ui_language.clone());

        let mut tasks = JoinSet::new();
        for (kind, idx, text) in pending {
            let speech = self.speech.clone();
            let lang = lang.clone();
            tasks.spawn(async move {
                match speech.synthesize(&text, &lang).await {
                    Ok(audio) => Some((kind, idx, audio)),
                    Err(e) => {
                        warn!("Pre-fetch failed for {kind} #{idx}: {e}");
                        None
                    }
                }
            });
        }

        let mut updated = record.clone();
        let mut cached = 0usize;
        while let Some(result) = tasks.join_next().await {
            let Ok(Some((kind, idx, audio))) = result else {
                continue;
            };
            if updated.set_alarm_audio(kind, idx, audio) {
                cached += 1;
            }
        }

        if cached > 0 {
            self.store.save_record(&updated);
            info!("Cached alarm audio for {cached} entries of record {}", record.id);
        }
    }

    /// Startup pass: warm the cache for every stored record.
    pub async fn prefetch_all(&self) {
        for record in self.store.list_records() {
            self.prefetch_record(&record).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Instruction, MemoryStore, Medication};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fails for any text containing a scripted marker; succeeds otherwise.
    struct FlakySynth {
        fail_on: &'static str,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FlakySynth {
        async fn synthesize(&self, text: &str, _language: &str) -> Result<String, String> {
            self.calls.lock().unwrap().push(text.to_string());
            if text.contains(self.fail_on) {
                Err("TTS request timed out".to_string())
            } else {
                Ok(format!("audio-for:{text}"))
            }
        }
    }

    fn record() -> MedicalRecord {
        MedicalRecord {
            id: "1".into(),
            analysis_language: Some("en".into()),
            medications: vec![
                Medication {
                    name: "Dolo 650".into(),
                    purpose: "Fever".into(),
                    reminders: vec!["08:00".into()],
                    is_active: true,
                    ..Default::default()
                },
                // Inactive: must be skipped even though it has reminders.
                Medication {
                    name: "Amoxicillin".into(),
                    reminders: vec!["09:00".into()],
                    is_active: false,
                    ..Default::default()
                },
                // Active but no reminders: nothing to schedule.
                Medication {
                    name: "Vitamin D".into(),
                    is_active: true,
                    ..Default::default()
                },
            ],
            instructions: vec![Instruction {
                description: "Drink warm water".into(),
                reminders: vec!["10:00".into()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn partial_failure_persists_only_successful_entries() {
        let store = Arc::new(MemoryStore::new(vec![record()]));
        let synth = Arc::new(FlakySynth {
            fail_on: "Drink warm water",
            calls: Mutex::new(Vec::new()),
        });
        let prefetcher = AudioPrefetcher::new(synth.clone(), store.clone(), "en");

        prefetcher.prefetch_record(&record()).await;

        let saved = store.get_record("1").unwrap();
        assert!(saved
            .alarm_audio(EntryKind::Medication, 0)
            .unwrap()
            .contains("Dolo 650"));
        assert_eq!(saved.alarm_audio(EntryKind::Instruction, 0), None);

        // Only the entries that need audio were requested.
        let calls: HashSet<String> = synth.calls.lock().unwrap().iter().cloned().collect();
        assert_eq!(calls.len(), 2);
        assert!(!calls.iter().any(|c| c.contains("Amoxicillin")));
        assert!(!calls.iter().any(|c| c.contains("Vitamin D")));
    }

    #[tokio::test]
    async fn nothing_pending_means_no_save() {
        let mut rec = record();
        rec.medications[0].alarm_audio = Some("cached".into());
        rec.instructions[0].alarm_audio = Some("cached".into());
        let store = Arc::new(MemoryStore::new(Vec::new()));
        let synth = Arc::new(FlakySynth {
            fail_on: "",
            calls: Mutex::new(Vec::new()),
        });
        let prefetcher = AudioPrefetcher::new(synth.clone(), store.clone(), "en");

        prefetcher.prefetch_record(&rec).await;

        // fail_on "" matches everything, but no entry should even be tried.
        assert!(synth.calls.lock().unwrap().is_empty());
        assert!(store.get_record("1").is_none());
    }

    #[tokio::test]
    async fn all_failures_leave_the_store_untouched() {
        let original = record();
        let store = Arc::new(MemoryStore::new(vec![original.clone()]));
        let synth = Arc::new(FlakySynth {
            fail_on: "Time to take",
            calls: Mutex::new(Vec::new()),
        });
        let prefetcher = AudioPrefetcher::new(synth, store.clone(), "en");

        prefetcher.prefetch_record(&original).await;

        let saved = store.get_record("1").unwrap();
        assert_eq!(saved.alarm_audio(EntryKind::Medication, 0), None);
        assert_eq!(saved.alarm_audio(EntryKind::Instruction, 0), None);
    }
}
