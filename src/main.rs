//! bagtrack - operator front end for bag scan ingestion
//!
//! Module structure:
//! - `domain/` - Stages, scans and the journey projection
//! - `io/` - External interfaces (ledger HTTP, camera, terminal keys)
//! - `services/` - Capture multiplexer, submission pipeline, cache, status
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::{bail, Context};
use bagtrack::domain::{
    BagRegistration, CachedReference, CheckpointStage, DeviceType, ScannerBinding,
    ScannerRegistration,
};
use bagtrack::infra::{Config, Metrics};
use bagtrack::io::{
    spawn_terminal_reader, CaptureDevice, HttpLedger, NoCamera, RawModeGuard, ReplayCamera,
    TerminalInput,
};
use bagtrack::services::pipeline::parse_batch_input;
use bagtrack::services::reference_cache::shared;
use bagtrack::services::{
    spawn_capture, BagReferenceCache, CaptureOutput, CaptureSettings, JourneyStatusService,
    JsonFileStore, ManualScan, ScanSubmissionPipeline, ScannerRegistry, SharedReferenceCache,
};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Bag scan ingestion and journey tracking
#[derive(Parser, Debug)]
#[command(name = "bagtrack", version, about)]
struct Cli {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the checkpoint stages known to the ledger
    Stages,
    /// Register a bag and remember its tag locally
    RegisterBag {
        tag_number: String,
        #[arg(long)]
        passenger: Option<String>,
        #[arg(long)]
        flight: Option<String>,
        #[arg(long)]
        origin: Option<String>,
        #[arg(long)]
        destination: Option<String>,
    },
    /// Record one scan (bag id or cached tag number)
    Scan {
        code: String,
        /// Explicit stage; without it the ledger resolves the stage
        #[arg(long)]
        stage: Option<CheckpointStage>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        scanner: Option<String>,
    },
    /// Record several bags at once (arguments, --file, or stdin)
    Batch {
        ids: Vec<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        stage: Option<CheckpointStage>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        scanner: Option<String>,
    },
    /// Show the journey state of a bag
    Status { code: String },
    /// List registered scanners
    Scanners {
        /// Include inactive scanners
        #[arg(long)]
        all: bool,
    },
    /// Register a scanner device
    RegisterScanner {
        name: String,
        location: String,
        #[arg(long)]
        stage: CheckpointStage,
        #[arg(long, default_value = "barcode", value_parser = parse_device_type)]
        device_type: DeviceType,
    },
    /// Recently seen bags, newest first
    Recent,
    /// Drop a bag from the recently-seen list
    Forget { bag_id: String },
    /// Capture scans from the terminal (keyboard wedge) and the camera
    Listen {
        /// Replay decoded frames from a file as the camera
        #[arg(long)]
        replay: Option<PathBuf>,
        #[arg(long)]
        scanner: Option<String>,
        #[arg(long)]
        stage: Option<CheckpointStage>,
        #[arg(long)]
        location: Option<String>,
    },
}

fn parse_device_type(value: &str) -> Result<DeviceType, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "barcode" => Ok(DeviceType::Barcode),
        "qr" => Ok(DeviceType::Qr),
        "rfid" => Ok(DeviceType::Rfid),
        "manual" => Ok(DeviceType::Manual),
        other => Err(format!("unknown device type {} (barcode, qr, rfid, manual)", other)),
    }
}

fn known_stage(stage: Option<CheckpointStage>) -> anyhow::Result<Option<CheckpointStage>> {
    match stage {
        Some(CheckpointStage::Unrecognized(token)) => bail!("Unknown checkpoint stage {}", token),
        other => Ok(other),
    }
}

struct App {
    config: Config,
    ledger: Arc<HttpLedger>,
    metrics: Arc<Metrics>,
    cache: SharedReferenceCache,
}

impl App {
    fn new(config: Config) -> anyhow::Result<Self> {
        let ledger = HttpLedger::new(config.ledger_base_url(), Duration::from_millis(config.ledger_timeout_ms()))
            .context("Failed to create ledger client")?;
        let store = JsonFileStore::new(config.cache_file(), config.cache_namespace());
        let cache = shared(BagReferenceCache::new(Box::new(store), config.cache_capacity()));
        Ok(Self { config, ledger: Arc::new(ledger), metrics: Arc::new(Metrics::new()), cache })
    }

    fn pipeline(&self) -> ScanSubmissionPipeline {
        ScanSubmissionPipeline::new(self.ledger.clone(), self.metrics.clone())
    }

    fn registry(&self) -> ScannerRegistry {
        ScannerRegistry::new(self.ledger.clone(), self.cache.clone())
    }

    /// A cached tag number resolves to its bag id; anything else passes through
    fn resolve(&self, code: &str) -> CachedReference {
        self.cache.lock().resolve(code).unwrap_or_else(|| CachedReference::new(code.trim()))
    }

    /// Binding from the command line, falling back to the `[scanner]` section
    async fn binding(
        &self,
        scanner: Option<String>,
        stage: Option<CheckpointStage>,
        location: Option<String>,
    ) -> anyhow::Result<ScannerBinding> {
        let scanner = scanner.or_else(|| self.config.scanner_id().map(str::to_string));
        let location = location.or_else(|| self.config.scanner_location().map(str::to_string));
        let mut binding = match scanner {
            Some(id) => self.registry().binding_for(&id, location).await?,
            None => ScannerBinding { location, ..ScannerBinding::unbound() },
        };
        match known_stage(stage)? {
            Some(stage) => binding.stage = Some(stage),
            None if binding.stage.is_none() => binding.stage = self.config.scanner_stage().cloned(),
            None => {}
        }
        Ok(binding)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging to stderr, level via RUST_LOG (default: info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };
    info!(
        git_hash = env!("GIT_HASH"),
        config_file = %config.config_file(),
        ledger = %config.ledger_base_url(),
        cache_file = %config.cache_file(),
        "bagtrack_starting"
    );

    let app = App::new(config)?;
    run(&app, cli.command).await
}

async fn run(app: &App, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Stages => {
            let status = JourneyStatusService::new(app.ledger.clone(), app.config.dwell_policy());
            for stage in status.catalog().await.stages() {
                let marker = if stage.is_exception() { " (exception)" } else { "" };
                println!("{}{}", stage.display_name(), marker);
            }
        }
        Commands::RegisterBag { tag_number, passenger, flight, origin, destination } => {
            let registration = BagRegistration {
                tag_number,
                passenger_name: passenger,
                flight_number: flight,
                origin,
                destination,
            };
            let bag = app.registry().register_bag(&registration).await?;
            println!("{}  {}", bag.id, bag.tag_number);
        }
        Commands::Scan { code, stage, location, note, scanner } => {
            let reference = app.resolve(&code);
            let receipt = match known_stage(stage)? {
                Some(stage) => {
                    let scan = ManualScan {
                        bag_id: reference.id.clone(),
                        stage: Some(stage),
                        location,
                        note,
                        scanner_id: scanner.or_else(|| app.config.scanner_id().map(str::to_string)),
                    };
                    app.pipeline().submit_manual(&scan).await?
                }
                None => {
                    let binding = app.binding(scanner, None, location).await?;
                    app.pipeline().submit_one(&reference.id, &binding).await?
                }
            };
            app.cache.lock().record_seen(reference);
            let event = receipt.event;
            println!("{}  {}  {}", event.bag_id, event.stage.display_name(), event.scanned_at.to_rfc3339());
        }
        Commands::Batch { mut ids, file, stage, location, scanner } => {
            if let Some(path) = file {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read batch file {}", path.display()))?;
                ids.extend(parse_batch_input(&text));
            } else if ids.is_empty() {
                let mut text = String::new();
                std::io::stdin().read_to_string(&mut text).context("Failed to read batch from stdin")?;
                ids.extend(parse_batch_input(&text));
            }
            let ids: Vec<String> = ids.iter().map(|code| app.resolve(code).id).collect();
            let binding = app.binding(scanner, stage, location).await?;
            let receipt = app.pipeline().submit_batch(&ids, &binding).await?;
            {
                let mut cache = app.cache.lock();
                for event in &receipt.accepted {
                    cache.record_seen(CachedReference::new(&event.bag_id));
                }
            }
            println!("{} of {} scans recorded", receipt.accepted_count(), receipt.requested.len());
            for id in &receipt.rejected {
                println!("  not recorded: {}", id);
            }
        }
        Commands::Status { code } => {
            let reference = app.resolve(&code);
            let status = JourneyStatusService::new(app.ledger.clone(), app.config.dwell_policy());
            let report = status.status(&reference.id).await?;
            let state = &report.state;
            let names = |stages: &[CheckpointStage]| {
                stages.iter().map(|s| s.display_name()).collect::<Vec<_>>().join(", ")
            };
            println!("{}  {}", report.bag.id, report.bag.tag_number);
            println!("status:    {} ({})", state.status_label, report.source.as_str());
            if let Some(risk) = state.risk_level {
                println!("risk:      {}", risk.as_str());
            }
            println!("completed: {}", names(&state.completed_stages));
            if let Some(next) = &state.expected_next_stage {
                println!("next:      {}", next.display_name());
            }
            if let Some(minutes) = state.minutes_since_last_scan {
                println!("last scan: {:.0} min ago", minutes);
            }
            for event in &report.history {
                println!(
                    "  {}  {:<22} {}",
                    event.scanned_at.to_rfc3339(),
                    event.stage.display_name(),
                    event.location.as_deref().unwrap_or("")
                );
            }
            app.cache.lock().record_seen(CachedReference::from(&report.bag));
        }
        Commands::Scanners { all } => {
            for scanner in app.registry().list(!all).await? {
                let active = if scanner.is_active { "" } else { " (inactive)" };
                println!(
                    "{}  {}  {}  {}  {}{}",
                    scanner.id,
                    scanner.name,
                    scanner.location,
                    scanner.stage.display_name(),
                    scanner.device_type.as_str(),
                    active
                );
            }
        }
        Commands::RegisterScanner { name, location, stage, device_type } => {
            let Some(stage) = known_stage(Some(stage))? else {
                bail!("A checkpoint stage is required");
            };
            let registration = ScannerRegistration { name, location, stage, device_type };
            let scanner = app.registry().register(&registration).await?;
            println!("{}  {}", scanner.id, scanner.name);
        }
        Commands::Recent => {
            for entry in app.cache.lock().list_recent() {
                println!("{}  {}", entry.id, entry.label.as_deref().unwrap_or(""));
            }
        }
        Commands::Forget { bag_id } => {
            if !app.cache.lock().remove(bag_id.trim()) {
                println!("{} was not in the recent list", bag_id.trim());
            }
        }
        Commands::Listen { replay, scanner, stage, location } => {
            let binding = app.binding(scanner, stage, location).await?;
            listen(app, replay, binding).await?;
        }
    }
    Ok(())
}

/// Raw mode needs explicit carriage returns
fn say(line: &str) {
    print!("{}\r\n", line);
}

fn report_output(output: CaptureOutput) {
    match output {
        CaptureOutput::Accepted { code, receipt } => {
            let event = receipt.event;
            say(&format!("recorded {} -> {} {}", code, event.bag_id, event.stage.display_name()));
        }
        CaptureOutput::Failed { code, error } => say(&format!("failed {}: {}", code, error)),
        CaptureOutput::SessionFault(error) => say(&format!("camera stopped: {}", error)),
    }
}

async fn listen(app: &App, replay: Option<PathBuf>, binding: ScannerBinding) -> anyhow::Result<()> {
    let device: Arc<dyn CaptureDevice> = match replay {
        Some(path) => Arc::new(ReplayCamera::new(path, Duration::from_millis(app.config.frame_interval_ms()))),
        None => Arc::new(NoCamera),
    };
    let pipeline = Arc::new(app.pipeline());
    let mut capture = spawn_capture(
        CaptureSettings::from_config(&app.config),
        device,
        pipeline,
        app.cache.clone(),
        app.metrics.clone(),
        binding,
    );
    let handle = capture.handle.clone();

    // Periodic metrics summary
    let metrics = app.metrics.clone();
    let interval_secs = app.config.metrics_interval_secs();
    let reporter = (interval_secs > 0).then(|| {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics.report().log();
            }
        })
    });

    let raw_mode = RawModeGuard::enable().context("Failed to enable raw terminal mode")?;
    say("Scan or type a code and press Enter. F2 camera, F3 pause keyboard, Esc quit.");

    let (input_tx, mut input_rx) = mpsc::channel(256);
    let reader = spawn_terminal_reader(input_tx);

    loop {
        tokio::select! {
            input = input_rx.recv() => match input {
                Some(TerminalInput::Key(key, at)) => handle.key_at(key, at).await?,
                Some(TerminalInput::ToggleCamera) => {
                    if handle.snapshot().await?.mode.is_optical() {
                        handle.stop_optical().await?;
                        say("camera off");
                    } else {
                        match handle.start_optical().await {
                            Ok(()) => say("camera on"),
                            Err(e) => say(&format!("camera error: {}", e)),
                        }
                    }
                }
                Some(TerminalInput::ToggleListening) => {
                    let listening = !handle.snapshot().await?.keystroke_listening;
                    handle.set_keystroke_listening(listening).await?;
                    say(if listening { "keyboard on" } else { "keyboard paused" });
                }
                Some(TerminalInput::Quit) | None => break,
            },
            output = capture.outputs.recv() => match output {
                Some(output) => report_output(output),
                None => break,
            },
        }
    }

    handle.shutdown().await?;
    drop(input_rx);
    // Codes recognized before quitting are still submitted and reported
    while let Some(output) = capture.outputs.recv().await {
        report_output(output);
    }
    capture.event_loop.await.context("Capture event loop failed")?;
    capture.worker.await.context("Submission worker failed")?;
    reader.await?.context("Terminal reader failed")?;
    drop(raw_mode);

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    app.metrics.report().log();
    info!("bagtrack_listen_stopped");
    Ok(())
}
