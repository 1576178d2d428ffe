//! Reminder scheduling: minute sampling, dedup, and alarm dispatch.
//!
//! Every tick the current wall-clock minute is sampled as a zero-padded
//! "HH:MM" bucket and matched against every reminder time on every stored
//! record. A per-minute ledger of fired alarm keys guarantees each
//! (record, entry, minute) fires at most once even though the tick cadence
//! is well below one minute. Matched alarms are delivered to two
//! independent sinks: the in-process channel the playback engine listens
//! on, and a best-effort desktop notification.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::locale::{instruction_speak_text, medication_speak_text, phrases};
use crate::notifier::Notifier;
use crate::records::{EntryKind, RecordStore};

/// Current local time truncated to minute resolution.
pub fn minute_bucket() -> String {
    Local::now().format("%H:%M").to_string()
}

/// Transient payload describing one fired reminder.
#[derive(Debug, Clone)]
pub struct AlarmContext {
    pub record_id: String,
    pub kind: EntryKind,
    pub index: usize,
    pub title: String,
    pub body: String,
    pub speak_text: String,
    /// Language for speech synthesis: the record's analysis language,
    /// falling back to the configured UI language.
    pub language: String,
}

/// Per-minute set of already-fired alarm keys.
///
/// Lifetime of an entry is exactly one minute bucket: `begin_minute` clears
/// the set in full whenever the sampled minute string changes, and it runs
/// before any match check in the new minute.
#[derive(Debug, Default)]
pub struct DedupLedger {
    minute: String,
    fired: HashSet<String>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to `minute`, clearing the ledger if the bucket changed.
    pub fn begin_minute(&mut self, minute: &str) {
        if self.minute != minute {
            debug!("Minute advanced to {minute}, clearing fired-alarm ledger");
            self.fired.clear();
            self.minute = minute.to_string();
        }
    }

    /// Record `key` as fired. Returns false if it already fired this minute.
    pub fn try_fire(&mut self, key: String) -> bool {
        self.fired.insert(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

pub struct ReminderScheduler {
    store: Arc<dyn RecordStore>,
    ledger: DedupLedger,
    notifier: Notifier,
    sink: Option<mpsc::Sender<AlarmContext>>,
    ui_language: String,
}

impl ReminderScheduler {
    pub fn new(store: Arc<dyn RecordStore>, notifier: Notifier, ui_language: &str) -> Self {
        Self {
            store,
            ledger: DedupLedger::new(),
            notifier,
            sink: None,
            ui_language: ui_language.to_string(),
        }
    }

    /// Register the in-app alarm sink. A later registration replaces the
    /// earlier one; at most one sink is active at a time.
    pub fn set_alarm_sink(&mut self, sink: mpsc::Sender<AlarmContext>) {
        self.sink = Some(sink);
    }

    /// Match all stored reminders against `current_minute`.
    ///
    /// Pure matching plus ledger mutation; never touches audio or delivery.
    /// Scanning the same minute twice never re-emits an alarm key.
    pub fn scan(&mut self, current_minute: &str) -> Vec<AlarmContext> {
        self.ledger.begin_minute(current_minute);

        let mut alarms = Vec::new();

        for record in self.store.list_records() {
            let lang = record
                .analysis_language
                .clone()
                .unwrap_or_else(|| self.ui_language.clone());
            let t = phrases(&lang);

            for (idx, med) in record.medications.iter().enumerate() {
                if !med.reminders.iter().any(|r| r == current_minute) {
                    continue;
                }
                let key = format!(
                    "{}-{}-{idx}-{current_minute}",
                    record.id,
                    EntryKind::Medication
                );
                if !self.ledger.try_fire(key) {
                    continue;
                }
                alarms.push(AlarmContext {
                    record_id: record.id.clone(),
                    kind: EntryKind::Medication,
                    index: idx,
                    title: format!("⏰ {}", med.name),
                    body: format!("{}: {}\n{}", t.medicine_purpose, med.purpose, med.dosage),
                    speak_text: medication_speak_text(&lang, med),
                    language: lang.clone(),
                });
            }

            for (idx, inst) in record.instructions.iter().enumerate() {
                if !inst.reminders.iter().any(|r| r == current_minute) {
                    continue;
                }
                let key = format!(
                    "{}-{}-{idx}-{current_minute}",
                    record.id,
                    EntryKind::Instruction
                );
                if !self.ledger.try_fire(key) {
                    continue;
                }
                alarms.push(AlarmContext {
                    record_id: record.id.clone(),
                    kind: EntryKind::Instruction,
                    index: idx,
                    title: format!("⏰ {}", t.instructions),
                    body: inst.description.clone(),
                    speak_text: instruction_speak_text(&lang, inst),
                    language: lang.clone(),
                });
            }
        }

        alarms
    }

    /// One scan-and-deliver pass for the current minute.
    fn dispatch(&mut self) {
        let minute = minute_bucket();
        for alarm in self.scan(&minute) {
            info!(
                "Alarm due at {minute}: record {} {} #{}",
                alarm.record_id, alarm.kind, alarm.index
            );

            // Two independent sinks. Neither failure path may affect the other.
            if let Some(sink) = &self.sink {
                if let Err(e) = sink.try_send(alarm.clone()) {
                    warn!("In-app alarm sink unavailable: {e}");
                }
            }
            self.notifier.notify(&alarm.title, &alarm.body);
        }
    }

    /// Run the tick loop until the scan-request channel closes.
    ///
    /// The interval's first tick fires immediately, so a reminder already due
    /// at startup rings without waiting a full period. `scan_rx` carries
    /// forced scans requested after record edits, so a newly added time can
    /// still fire within the current minute.
    pub async fn run(mut self, tick: Duration, mut scan_rx: mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(tick);
        info!("Reminder scheduler running (tick every {:?})", tick);

        loop {
            tokio::select! {
                _ = interval.tick() => self.dispatch(),
                forced = scan_rx.recv() => {
                    match forced {
                        Some(()) => {
                            debug!("Forced scan requested");
                            self.dispatch();
                        }
                        None => {
                            info!("Scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Instruction, MedicalRecord, Medication, MemoryStore};

    fn store_with(records: Vec<MedicalRecord>) -> Arc<dyn RecordStore> {
        Arc::new(MemoryStore::new(records))
    }

    fn record() -> MedicalRecord {
        MedicalRecord {
            id: "1".into(),
            analysis_language: Some("en".into()),
            medications: vec![Medication {
                name: "Dolo 650".into(),
                dosage: "1 tablet".into(),
                purpose: "Fever".into(),
                reminders: vec!["08:00".into(), "20:00".into()],
                is_active: true,
                ..Default::default()
            }],
            instructions: vec![Instruction {
                description: "Drink warm water".into(),
                reminders: vec!["08:00".into()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn scheduler(records: Vec<MedicalRecord>) -> ReminderScheduler {
        ReminderScheduler::new(store_with(records), Notifier::new(false), "en")
    }

    #[test]
    fn due_reminder_fires_once_with_localized_text() {
        let mut sched = scheduler(vec![record()]);

        let alarms = sched.scan("08:00");
        assert_eq!(alarms.len(), 2);

        let med = alarms
            .iter()
            .find(|a| a.kind == EntryKind::Medication)
            .unwrap();
        assert_eq!(med.record_id, "1");
        assert_eq!(med.index, 0);
        assert!(med.speak_text.contains("Dolo 650"));
        assert!(med.speak_text.contains("Fever"));
        assert!(med.title.contains("Dolo 650"));
        assert!(med.body.contains("1 tablet"));
    }

    #[test]
    fn same_minute_scan_is_idempotent() {
        let mut sched = scheduler(vec![record()]);

        assert_eq!(sched.scan("08:00").len(), 2);
        assert!(sched.scan("08:00").is_empty());
        assert!(sched.scan("08:00").is_empty());
    }

    #[test]
    fn minute_advance_clears_the_ledger() {
        let mut sched = scheduler(vec![record()]);

        assert_eq!(sched.scan("08:00").len(), 2);
        assert!(!sched.ledger.is_empty());

        // No reminders at 08:01, but the old minute's keys must be gone
        // before matching runs.
        assert!(sched.scan("08:01").is_empty());
        assert!(sched.ledger.is_empty());

        // The same wall-clock time the next day fires again.
        assert_eq!(sched.scan("08:00").len(), 2);
    }

    #[test]
    fn distinct_entries_get_distinct_keys() {
        let mut rec = record();
        rec.medications.push(Medication {
            name: "Amoxicillin".into(),
            reminders: vec!["08:00".into()],
            ..Default::default()
        });
        let mut sched = scheduler(vec![rec]);

        let alarms = sched.scan("08:00");
        let med_indexes: Vec<usize> = alarms
            .iter()
            .filter(|a| a.kind == EntryKind::Medication)
            .map(|a| a.index)
            .collect();
        assert_eq!(med_indexes, vec![0, 1]);
    }

    #[test]
    fn non_matching_minute_is_silent() {
        let mut sched = scheduler(vec![record()]);
        assert!(sched.scan("09:30").is_empty());
    }

    #[test]
    fn record_language_overrides_ui_language() {
        let mut rec = record();
        rec.analysis_language = Some("hi".into());
        let mut sched = scheduler(vec![rec]);

        let alarms = sched.scan("08:00");
        let med = alarms
            .iter()
            .find(|a| a.kind == EntryKind::Medication)
            .unwrap();
        assert_eq!(med.language, "hi");
        assert!(med.speak_text.contains(phrases("hi").set_alarm));
    }

    #[test]
    fn missing_record_language_falls_back_to_ui() {
        let mut rec = record();
        rec.analysis_language = None;
        let mut sched = ReminderScheduler::new(store_with(vec![rec]), Notifier::new(false), "sw");

        let alarms = sched.scan("08:00");
        assert_eq!(alarms[0].language, "sw");
    }

    #[tokio::test]
    async fn delivered_alarms_reach_the_registered_sink() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sched = scheduler(vec![record()]);
        sched.set_alarm_sink(tx);

        // dispatch() uses the real wall clock; drive delivery through scan +
        // the sink directly instead.
        for alarm in sched.scan("08:00") {
            sched.sink.as_ref().unwrap().try_send(alarm).unwrap();
        }

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
