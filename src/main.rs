//! Motion Alert Agent CLI
//!
//! Scores motion-sensor windows and alerts near a beacon while distracted.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use motion_alert_agent::{
    collector::{
        ChannelProximitySource, MotionProfile, ProximitySource, ReplaySource, SensorSource,
        SimulatedBeacon, SimulatedSensorSource, SourceError,
    },
    config::{Config, DEFAULT_BEACON_UUID},
    core::{
        create_shared_prediction, AlignedTriple, ClassifierGateway, FeatureBuilder, MotionVarianceClassifier,
        SyncedStream, WindowAggregator,
    },
    notify::{ConsoleNotifier, Notifier},
    pipeline::Pipeline,
    recording::{list_recordings, CsvRecorder, RecordingMode},
    stats::{create_shared_stats_with_persistence, StatsSnapshot},
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "motion-alert")]
#[command(version = VERSION)]
#[command(about = "Motion-sensor distraction detection with proximity alerts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Hands,
    Pocket,
}

impl From<Profile> for MotionProfile {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Hands => MotionProfile::Hands,
            Profile::Pocket => MotionProfile::Pocket,
        }
    }
}

impl From<Profile> for RecordingMode {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Hands => RecordingMode::Hands,
            Profile::Pocket => RecordingMode::Pocket,
        }
    }
}

#[derive(clap::Args)]
struct Overrides {
    /// Sensor sampling rate in Hz
    #[arg(long)]
    rate: Option<u32>,

    /// Triples per classification window
    #[arg(long)]
    window_size: Option<usize>,

    /// Prediction threshold for alerts
    #[arg(long)]
    threshold: Option<f64>,

    /// Restrict inference to the CPU
    #[arg(long)]
    background_safe: bool,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(rate) = self.rate {
            config.sample_rate_hz = rate;
        }
        if let Some(window_size) = self.window_size {
            config.window_size = window_size;
        }
        if let Some(threshold) = self.threshold {
            config.prediction_alert_threshold = threshold;
        }
        if self.background_safe {
            config.background_safe_inference = true;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live pipeline
    Start {
        /// Replay a recording instead of simulating sensors
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Motion profile of the simulated sensors
        #[arg(long, value_enum, default_value = "hands")]
        profile: Profile,

        /// Record aligned samples, labelled with this mode
        #[arg(long, value_enum)]
        record: Option<Profile>,

        /// Simulate a beacon ranging at this interval (seconds)
        #[arg(long)]
        beacon_interval: Option<f64>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Serve predictions and accept proximity events over HTTP (requires server feature)
        #[arg(long)]
        server: bool,

        /// Server port
        #[arg(long, default_value = "8787")]
        port: u16,

        /// POST alerts to this URL (requires webhook feature)
        #[arg(long)]
        webhook_url: Option<String>,

        /// Bearer token for the webhook
        #[arg(long)]
        webhook_token: Option<String>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Score a recording offline and print each window's prediction
    Replay {
        /// Recording file
        file: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// List recordings
    Recordings,

    /// Show configuration and cumulative statistics
    Status,

    /// Show configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            replay,
            profile,
            record,
            beacon_interval,
            duration,
            server,
            port,
            webhook_url,
            webhook_token,
            overrides,
        } => cmd_start(StartOptions {
            replay,
            profile,
            record,
            beacon_interval,
            duration: duration.map(Duration::from_secs),
            server,
            port,
            webhook_url,
            webhook_token,
            overrides,
        }),
        Commands::Replay { file, overrides } => cmd_replay(&file, &overrides),
        Commands::Recordings => cmd_recordings(),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

/// Logs go to stderr; CLI output stays on stdout.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,motion_alert_agent=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(overrides: &Overrides) -> anyhow::Result<Config> {
    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load config, using defaults");
        Config::default()
    });
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

struct StartOptions {
    replay: Option<PathBuf>,
    profile: Profile,
    record: Option<Profile>,
    beacon_interval: Option<f64>,
    duration: Option<Duration>,
    server: bool,
    port: u16,
    webhook_url: Option<String>,
    webhook_token: Option<String>,
    overrides: Overrides,
}

fn cmd_start(options: StartOptions) -> anyhow::Result<()> {
    println!("Motion Alert Agent v{VERSION}");
    println!();

    let config = load_config(&options.overrides)?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let sensors: Box<dyn SensorSource> = match options.replay {
        Some(ref path) => {
            println!("  Source: replay of {}", path.display());
            Box::new(ReplaySource::open(path)?.paced(true))
        }
        None => {
            let profile = MotionProfile::from(options.profile);
            println!("  Source: simulated ({profile:?})");
            Box::new(SimulatedSensorSource::new(profile))
        }
    };
    println!(
        "  Window: {} triples at {} Hz",
        config.window_size, config.sample_rate_hz
    );
    println!("  Alert threshold: {}", config.prediction_alert_threshold);

    let beacon_id = config.beacon_uuid.unwrap_or(DEFAULT_BEACON_UUID);
    let mut feeder = None;
    let proximity: Option<Box<dyn ProximitySource>> = match options.beacon_interval {
        Some(secs) => {
            let interval = Duration::try_from_secs_f64(secs).context("invalid beacon interval")?;
            println!("  Proximity: simulated beacon every {secs}s");
            Some(Box::new(SimulatedBeacon::new(beacon_id, interval)))
        }
        None if options.server => {
            let (f, source) = ChannelProximitySource::new(64);
            feeder = Some(f);
            println!("  Proximity: HTTP ingest");
            Some(Box::new(source))
        }
        None => {
            println!("  Proximity: none (alerts disabled)");
            None
        }
    };

    let notifier = create_notifier(options.webhook_url, options.webhook_token)?;

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let mut pipeline = Pipeline::new(
        config.clone(),
        Box::new(MotionVarianceClassifier::new()),
        notifier,
    )
    .with_stats(stats.clone());

    if let Some(mode) = options.record {
        let recorder = CsvRecorder::create(&config.recordings_path, mode.into(), config.timezone()?)?;
        println!("  Recording to: {}", recorder.path().display());
        pipeline = pipeline.with_log_sink(Box::new(recorder), mode.into());
    }

    let mut handle = pipeline.start(sensors.as_ref(), proximity.as_deref())?;

    #[cfg(feature = "server")]
    let _server = if options.server {
        let runtime = tokio::runtime::Runtime::new().context("failed to create runtime")?;
        let (addr, shutdown) = runtime.block_on(motion_alert_agent::server::run(
            motion_alert_agent::server::ServerConfig::new(options.port, config.prediction_alert_threshold),
            handle.prediction().clone(),
            stats.clone(),
            feeder.take(),
        ))?;
        println!("  Server: http://{addr}");
        Some((runtime, shutdown))
    } else {
        None
    };
    #[cfg(not(feature = "server"))]
    if options.server {
        let _ = (options.port, feeder.take());
        eprintln!("Warning: --server flag ignored (server feature not enabled at compile time)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let started = Instant::now();
    let mut last_printed: Option<u64> = None;
    while running.load(Ordering::SeqCst) && handle.is_running() {
        if options.duration.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        thread::sleep(Duration::from_millis(200));

        let history = handle.prediction().history();
        let fresh = history
            .iter()
            .filter(|r| last_printed.map_or(true, |last| r.window_sequence > last));
        for record in fresh {
            println!(
                "[{}] Window {}: {} ({})",
                record.at.format("%H:%M:%S"),
                record.window_sequence,
                record.score,
                record.score.label(config.prediction_alert_threshold)
            );
        }
        if let Some(last) = history.last() {
            last_printed = Some(last.window_sequence);
        }
    }

    println!();
    println!("Stopping...");
    if let Some(error) = handle.stop() {
        eprintln!("Sensor stream ended: {error}");
    }
    if let Some(error) = handle.alert_error() {
        eprintln!("Proximity stream ended: {error}");
    }

    #[cfg(feature = "server")]
    if let Some((runtime, shutdown)) = _server {
        let _ = shutdown.send(());
        runtime.shutdown_timeout(Duration::from_secs(1));
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save stats: {e}");
    }
    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn create_notifier(url: Option<String>, token: Option<String>) -> anyhow::Result<Box<dyn Notifier>> {
    #[cfg(feature = "webhook")]
    if let Some(url) = url {
        let mut webhook = motion_alert_agent::notify::WebhookConfig::new(url);
        if let Some(token) = token {
            webhook = webhook.with_token(token);
        }
        let notifier = motion_alert_agent::notify::WebhookNotifier::new(webhook)?;
        println!("  Notifications: webhook (device {})", notifier.device_id());
        return Ok(Box::new(notifier));
    }

    #[cfg(not(feature = "webhook"))]
    if url.is_some() || token.is_some() {
        eprintln!("Warning: --webhook-url ignored (webhook feature not enabled at compile time)");
    }

    println!("  Notifications: console");
    Ok(Box::new(ConsoleNotifier))
}

fn cmd_replay(file: &Path, overrides: &Overrides) -> anyhow::Result<()> {
    let config = load_config(overrides)?;
    let source = ReplaySource::open(file)?;
    if source.is_empty() {
        bail!("recording {} has no rows", file.display());
    }

    println!("Replaying {} ({} rows)", file.display(), source.len());
    println!();

    let subscriptions = source.subscribe_all(config.sample_rate_hz)?;
    let stream = SyncedStream::from_subscriptions(&subscriptions, config.sensor_backlog_capacity);
    let mut aggregator = WindowAggregator::new(config.window_size);
    let builder = FeatureBuilder::new(config.window_size);
    let gateway = ClassifierGateway::new(
        Box::new(MotionVarianceClassifier::new()),
        create_shared_prediction(),
        config.window_size,
        config.background_safe_inference,
    );

    let failure = drain_recording(stream, |triple| {
        let Some(window) = aggregator.push(triple) else {
            return Ok(());
        };
        let vector = builder.build(&window)?;
        match gateway.predict(&vector) {
            Ok(score) => println!(
                "Window {:>4}: {} ({})",
                window.sequence(),
                score,
                score.label(config.prediction_alert_threshold)
            ),
            Err(e) => println!("Window {:>4}: inference failed: {e}", window.sequence()),
        }
        Ok(())
    })?;

    let leftover = aggregator.discard_partial();
    println!();
    println!(
        "{} windows scored, {} trailing triples discarded",
        aggregator.completed_window_count(),
        leftover
    );
    if let Some(error) = failure {
        bail!("replay of {} failed: {error}", file.display());
    }
    Ok(())
}

/// Feed every aligned triple of a finite recording to `on_triple`.
///
/// Sources terminating is the normal end of a recording. Any other source
/// error stops the replay and is returned.
fn drain_recording<I, F>(stream: I, mut on_triple: F) -> anyhow::Result<Option<SourceError>>
where
    I: Iterator<Item = Result<AlignedTriple, SourceError>>,
    F: FnMut(AlignedTriple) -> anyhow::Result<()>,
{
    for item in stream {
        match item {
            Ok(triple) => on_triple(triple)?,
            Err(SourceError::Terminated { .. }) => return Ok(None),
            Err(error) => return Ok(Some(error)),
        }
    }
    Ok(None)
}

fn cmd_recordings() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let recordings = list_recordings(&config.recordings_path)?;

    println!("Recordings in {}", config.recordings_path.display());
    println!();
    if recordings.is_empty() {
        println!("No recordings found.");
    }
    for info in recordings {
        println!("  {:<32} {:>10} bytes", info.name, info.size_bytes);
    }
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Motion Alert Agent Status");
    println!("=========================");
    println!();

    println!("Configuration:");
    println!(
        "  Window: {} triples at {} Hz",
        config.window_size, config.sample_rate_hz
    );
    println!("  Alert threshold: {}", config.prediction_alert_threshold);
    println!(
        "  Throttle / cooldown: {:.1}s / {:.1}s",
        config.proximity_throttle.as_secs_f64(),
        config.alert_cooldown.as_secs_f64()
    );
    match config.beacon_uuid {
        Some(id) => println!("  Beacon region: {id}"),
        None => println!("  Beacon region: any"),
    }
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let content = std::fs::read_to_string(&stats_path)?;
        let stats: StatsSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("could not parse {}", stats_path.display()))?;
        println!("Cumulative Statistics:");
        println!("  Samples: {}", stats.samples);
        println!("  Windows: {} ({} dropped)", stats.windows_completed, stats.windows_dropped);
        println!(
            "  Predictions: {} ({} failed)",
            stats.predictions, stats.inference_failures
        );
        println!("  Alerts fired: {}", stats.alerts_fired);
    } else {
        println!("No statistics recorded yet.");
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_alert_agent::collector::Sample;

    fn triple(index: u64) -> AlignedTriple {
        let sample = Sample::new(index as f64 * 0.02, 0.0, 0.0, 1.0);
        AlignedTriple {
            index,
            accelerometer: sample,
            gyroscope: sample,
            magnetometer: sample,
        }
    }

    #[test]
    fn test_replay_ends_cleanly_when_sources_terminate() {
        let items = vec![
            Ok(triple(0)),
            Ok(triple(1)),
            Err(SourceError::terminated("replay-gyroscope")),
        ];
        let mut seen = 0;
        let failure = drain_recording(items.into_iter(), |_| {
            seen += 1;
            Ok(())
        })
        .unwrap();
        assert!(failure.is_none());
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_replay_surfaces_transport_error() {
        let items = vec![
            Ok(triple(0)),
            Err(SourceError::transport("replay-accelerometer", "corrupt row")),
            Ok(triple(1)),
        ];
        let mut seen = 0;
        let failure = drain_recording(items.into_iter(), |_| {
            seen += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(
            failure,
            Some(SourceError::transport("replay-accelerometer", "corrupt row"))
        );
        assert_eq!(seen, 1);
    }
}
