//! Main service orchestration.
//!
//! Wires the reminder scheduler to the alarm player: the scheduler's in-app
//! sink feeds an mpsc channel this loop drains, and each delivered alarm is
//! handed to the playback engine. Stdin doubles as the acknowledgement
//! surface — `stop` is the big red dismiss button.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::notifier::Notifier;
use crate::playback::AlarmPlayer;
use crate::prefetch::AudioPrefetcher;
use crate::records::RecordStore;
use crate::scheduler::{AlarmContext, ReminderScheduler};

pub struct ReminderService {
    config: Config,
    store: Arc<dyn RecordStore>,
    player: AlarmPlayer,
    prefetcher: Arc<AudioPrefetcher>,
}

impl ReminderService {
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        player: AlarmPlayer,
        prefetcher: Arc<AudioPrefetcher>,
    ) -> Self {
        Self {
            config,
            store,
            player,
            prefetcher,
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let (alarm_tx, mut alarm_rx) = mpsc::channel::<AlarmContext>(16);
        let (scan_tx, scan_rx) = mpsc::channel::<()>(4);

        let mut scheduler = ReminderScheduler::new(
            self.store.clone(),
            Notifier::new(self.config.feedback.notifications),
            &self.config.language,
        );
        scheduler.set_alarm_sink(alarm_tx);

        let tick = Duration::from_secs(self.config.scheduler.tick_secs);
        tokio::spawn(scheduler.run(tick, scan_rx));

        // Warm the alarm-audio cache so due reminders rarely wait on the network.
        let prefetcher = self.prefetcher.clone();
        tokio::spawn(async move {
            prefetcher.prefetch_all().await;
        });

        info!("Service ready — type 'stop' to dismiss a ringing alarm, 'help' for commands");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                alarm = alarm_rx.recv() => {
                    match alarm {
                        Some(context) => {
                            let player = self.player.clone();
                            tokio::spawn(async move {
                                player.trigger(context).await;
                            });
                        }
                        None => {
                            warn!("Alarm channel closed");
                            break;
                        }
                    }
                }
                line = lines.next_line(), if stdin_open => {
                    match line? {
                        Some(command) => {
                            if !self.handle_command(command.trim(), &scan_tx) {
                                break;
                            }
                        }
                        None => {
                            // Detached from a terminal; keep running on timers.
                            info!("Stdin closed, running unattended");
                            stdin_open = false;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns false when the service should shut down.
    fn handle_command(&self, command: &str, scan_tx: &mpsc::Sender<()>) -> bool {
        match command {
            "" => {}
            "stop" | "dismiss" | "s" => self.player.dismiss(),
            "scan" => {
                // Out-of-cadence pass, e.g. right after editing a reminder.
                if scan_tx.try_send(()).is_err() {
                    warn!("Scheduler busy, scan request dropped");
                }
            }
            "list" => {
                if let Some(alarm) = self.player.active_alarm() {
                    println!("Ringing now: {}", alarm.title);
                }
                self.print_schedule();
            }
            "quit" | "exit" | "q" => {
                info!("Shutting down");
                return false;
            }
            _ => {
                println!("Commands: stop (dismiss alarm), scan, list, quit");
            }
        }
        true
    }

    fn print_schedule(&self) {
        let records = self.store.list_records();
        if records.is_empty() {
            println!("No records stored.");
            return;
        }
        for record in records {
            println!("Record {} ({}):", record.id, record.condition);
            for med in &record.medications {
                if !med.reminders.is_empty() {
                    println!("  {} at {} — {}", med.name, med.reminders.join(", "), med.dosage);
                }
            }
            for inst in &record.instructions {
                if !inst.reminders.is_empty() {
                    println!("  {} at {}", inst.description, inst.reminders.join(", "));
                }
            }
        }
    }
}
