use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use intentsim_app::{
    COMMAND_QUEUE_CAPACITY, ControlHandle, KnobUpdate, create_command_bus, make_command_drain,
    run_frames, settle_cadence,
};
use intentsim_core::{
    AnomalyEvent, EngineObserver, InflationEvent, SimulationConfig, SimulationEngine,
};
use intentsim_storage::{StoragePipeline, restore_or_fresh};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "intentsim",
    version,
    about = "Run an intent-field particle simulation"
)]
struct Cli {
    /// JSON configuration file; omitted keys keep their defaults.
    #[arg(long, env = "INTENTSIM_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot file to resume from and write checkpoints to.
    #[arg(long, env = "INTENTSIM_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// RNG seed for reproducible runs.
    #[arg(long, env = "INTENTSIM_SEED")]
    seed: Option<u64>,

    /// Number of driver frames to run before exiting.
    #[arg(long, default_value_t = 1_000)]
    ticks: u64,

    /// Override the tick cadence in milliseconds; 0 runs as fast as possible.
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Knob overrides as `path=value`; values parse as JSON, falling back to strings.
    #[arg(long = "set", value_name = "PATH=VALUE")]
    overrides: Vec<String>,

    /// Print the configuration knobs as JSON and exit.
    #[arg(long)]
    list_knobs: bool,

    /// Print the final engine snapshot as JSON.
    #[arg(long)]
    report: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let mut engine = match &cli.snapshot {
        Some(path) => {
            let pipeline = StoragePipeline::new(path)
                .with_context(|| format!("failed to start snapshot writer for {}", path.display()))?;
            restore_or_fresh(config, path, Box::new(pipeline))?
        }
        None => SimulationEngine::new(config)?,
    };
    engine.add_observer(Box::new(TracingObserver));

    let (sender, receiver) = create_command_bus(COMMAND_QUEUE_CAPACITY);
    let shared = Arc::new(Mutex::new(engine));
    let control = ControlHandle::new(Arc::clone(&shared), sender);
    let drain = make_command_drain(receiver);

    if !cli.overrides.is_empty() {
        let updates = cli
            .overrides
            .iter()
            .map(|raw| parse_override(raw))
            .collect::<Result<Vec<_>>>()?;
        control.apply_updates(&updates)?;
    }

    let cadence = settle_cadence(&shared, &drain)?;
    if cli.list_knobs {
        println!("{}", serde_json::to_string_pretty(&control.list_knobs()?)?);
        return Ok(());
    }

    control.start()?;
    info!(
        frames = cli.ticks,
        cadence_ms = cadence.as_millis() as u64,
        "Starting IntentSim"
    );
    let ticks = run_frames(&shared, &drain, cli.ticks, cadence)?;

    let snapshot = control.engine_snapshot()?;
    info!(
        ticks,
        tick = snapshot.tick().0,
        particles = snapshot.particles.len(),
        interactions = snapshot.counters.interactions,
        emergence = snapshot.derived.emergence_index,
        inflated = snapshot.inflation.is_some(),
        "Simulation finished"
    );
    if cli.report {
        println!("{}", serde_json::to_string_pretty(&*snapshot)?);
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn load_config(cli: &Cli) -> Result<SimulationConfig> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.rng_seed = Some(seed);
    }
    if let Some(ms) = cli.tick_ms {
        config.tick_interval_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<SimulationConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut de = serde_json::Deserializer::from_str(&raw);
    serde_path_to_error::deserialize(&mut de)
        .map_err(|err| anyhow::anyhow!("{} at {} in {}", err, err.path(), path.display()))
}

fn parse_override(raw: &str) -> Result<KnobUpdate> {
    let Some((path, value)) = raw.split_once('=') else {
        bail!("knob override '{raw}' must look like path=value");
    };
    let path = path.trim();
    if path.is_empty() {
        bail!("knob override '{raw}' has an empty path");
    }
    let value = serde_json::from_str::<Value>(value.trim())
        .unwrap_or_else(|_| Value::String(value.trim().to_owned()));
    Ok(KnobUpdate {
        path: path.to_owned(),
        value,
    })
}

/// Surfaces engine events through the tracing subscriber.
struct TracingObserver;

impl EngineObserver for TracingObserver {
    fn on_inflation(&mut self, event: &InflationEvent) {
        info!(
            tick = event.tick.0,
            particles = event.particles_after,
            expansion = event.expansion_factor,
            field_energy_after = event.field_energy_after,
            "inflation event"
        );
    }

    fn on_anomaly(&mut self, event: &AnomalyEvent) {
        warn!(
            tick = event.tick.0,
            kind = ?event.kind,
            severity = event.severity,
            affected = event.affected_particles,
            "{}",
            event.description
        );
    }
}
