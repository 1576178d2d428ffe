//! med-reminder-rs: medication reminder service with spoken alarms.

mod config;
mod locale;
mod notifier;
mod playback;
mod prefetch;
mod records;
mod scheduler;
mod service;
mod speech;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "med-reminder-rs", about = "Medication reminder service with spoken alarms")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,reqwest=info,hyper=info")
    } else {
        EnvFilter::new("info,reqwest=warn,hyper=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("med-reminder-rs starting");

    let config = config::Config::load(args.config.as_deref());
    info!(
        "Config loaded: tick every {}s, language '{}'",
        config.scheduler.tick_secs, config.language
    );

    let store: Arc<dyn records::RecordStore> = Arc::new(records::JsonFileStore::new(Some(
        config.storage.records_path.as_str(),
    )));
    info!("{} records stored", store.list_records().len());

    let speech: Arc<dyn speech::SpeechSynthesizer> =
        Arc::new(speech::GeminiSpeech::new(config.speech.clone()));

    let output = playback::RodioOutput::new()?;
    let player = playback::AlarmPlayer::new(
        Arc::new(output),
        speech.clone(),
        store.clone(),
        Duration::from_millis(config.playback.loop_pause_ms),
    );

    let prefetcher = Arc::new(prefetch::AudioPrefetcher::new(
        speech,
        store.clone(),
        &config.language,
    ));

    let mut service = service::ReminderService::new(config, store, player, prefetcher);
    service.run().await?;

    Ok(())
}
