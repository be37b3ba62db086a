//! Command-line front end: single runs, MESI vs MOESI comparison, event traces and the
//! persisted session state.

use anyhow::{Context, Result};
use cachesync::core::CoreId;
use cachesync::metrics::{MetricKind, MetricsReport};
use cachesync::session::simulate;
use cachesync::simulator::{AccessOutcome, Simulator};
use cachesync::store::{FileStore, StateStore};
use cachesync::workload::{program_listing, EventSequence};
use cachesync::{InitializeRequest, Protocol, Seed, Session, SystemConfig};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cachesync", version, about = "MESI / MOESI cache-coherence simulator")]
struct Cli {
    #[command(flatten)]
    system: SystemArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct SystemArgs {
    /// JSON system configuration (missing fields use defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Number of processing elements
    #[arg(long, global = true)]
    cores: Option<usize>,
    /// Events issued by each processing element
    #[arg(long, global = true)]
    events: Option<usize>,
    /// Where the protocol and last seed are kept between runs
    #[arg(long, global = true, default_value = "cachesync-state.json")]
    state_file: PathBuf,
    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// One Initialize call: simulate and persist the seed
    Run {
        /// MESI or MOESI
        #[arg(long, default_value = "MESI")]
        protocol: String,
        /// Reuse the seed of the previous run
        #[arg(long)]
        last_code: bool,
    },
    /// Both protocols on the same event sequence
    Compare {
        /// Decimal or 0x-prefixed hex; a fresh seed when omitted
        #[arg(long, value_parser = parse_seed)]
        seed: Option<Seed>,
    },
    /// Event-by-event states and bus traffic
    Trace {
        #[arg(long, default_value = "MESI")]
        protocol: String,
        #[arg(long, value_parser = parse_seed)]
        seed: Option<Seed>,
    },
    /// Show the persisted session state
    State,
}

fn parse_seed(s: &str) -> Result<Seed, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map(Seed).map_err(|e| format!("invalid seed {s:?}: {e}"))
}

impl SystemArgs {
    fn load(&self) -> Result<SystemConfig> {
        let mut config = match &self.config {
            Some(path) => SystemConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => SystemConfig::default(),
        };
        if let Some(cores) = self.cores {
            config.workload.num_cores = cores;
        }
        if let Some(events) = self.events {
            config.workload.events_per_core = events;
        }
        config.validate().context("Invalid system configuration")?;
        Ok(config)
    }
}

fn print_report(report: &MetricsReport) {
    for metric in report.metrics() {
        println!("  {:<24} {}", metric.name, format_value(metric.kind, metric.value));
    }
}

fn format_value(kind: MetricKind, value: f64) -> String {
    match kind {
        MetricKind::Percentage => format!("{value:.2}%"),
        MetricKind::RawCount if value.fract() == 0.0 => format!("{value:.0}"),
        MetricKind::RawCount => format!("{value:.2}"),
    }
}

fn run(system: &SystemArgs, config: SystemConfig, protocol: String, last_code: bool) -> Result<()> {
    let session = Session::new(FileStore::new(&system.state_file), config)?;
    let report = session
        .initialize(&InitializeRequest::new(protocol, last_code))
        .context("Initialize failed")?;
    if system.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("=== {} (seed {}) ===\n", report.protocol, report.seed);
    print_report(&report.metrics);
    Ok(())
}

fn compare(system: &SystemArgs, config: &SystemConfig, seed: Option<Seed>) -> Result<()> {
    let seed = seed.unwrap_or_else(Seed::fresh);
    let mesi = simulate(Protocol::Mesi, config, seed).context("MESI run failed")?;
    let moesi = simulate(Protocol::Moesi, config, seed).context("MOESI run failed")?;
    if system.json {
        let value = serde_json::json!({
            "seed": seed,
            "MESI": mesi.report,
            "MOESI": moesi.report,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("=== MESI vs MOESI on seed {seed} ===\n");
    println!("  {:<24} {:>12} {:>12}", "metric", "MESI", "MOESI");
    for (a, b) in mesi.report.metrics().iter().zip(moesi.report.metrics()) {
        println!(
            "  {:<24} {:>12} {:>12}",
            a.name,
            format_value(a.kind, a.value),
            format_value(b.kind, b.value)
        );
    }

    let change = |name: &str| {
        let base = mesi.report.get(name).unwrap_or_default();
        let other = moesi.report.get(name).unwrap_or_default();
        if base > 0.0 {
            (base - other) / base * 100.0
        } else {
            0.0
        }
    };
    println!("\n--- Saved by the Owned state ---");
    println!("  Writebacks:  {:.2}%", change("Writebacks"));
    println!("  Cycles:      {:.2}%", change("Cycles"));
    println!("  Power:       {:.2}%", change("PowerConsumption"));
    Ok(())
}

fn trace(system: &SystemArgs, config: &SystemConfig, protocol: String, seed: Option<Seed>) -> Result<()> {
    let protocol: Protocol = protocol.parse()?;
    let seed = seed.unwrap_or_else(Seed::fresh);
    let events: Vec<_> = EventSequence::new(seed, &config.workload).collect();
    let mut sim = Simulator::seeded(protocol, config, seed)?;
    let outcomes = events
        .iter()
        .map(|e| sim.apply(e))
        .collect::<cachesync::Result<Vec<AccessOutcome>>>()
        .context("Trace aborted")?;
    let result = sim.finish();

    if system.json {
        let value = serde_json::json!({
            "seed": seed,
            "events": outcomes,
            "result": result,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("=== {protocol} trace (seed {seed}) ===\n");
    for core in 0..config.workload.num_cores {
        println!("{}: {}", CoreId(core), program_listing(&events, core).join(", "));
    }
    println!();
    for (i, out) in outcomes.iter().enumerate() {
        let detail = match out.access {
            Some(line) => format!(
                "{} {} -> {}{}{}{}",
                if line.hit { "hit " } else { "miss" },
                line.before,
                line.after,
                line.request.map(|r| format!(" {r}")).unwrap_or_default(),
                line.source.map(|s| format!(" from {s:?}")).unwrap_or_default(),
                if line.invalidated > 0 {
                    format!(" inv {}", line.invalidated)
                } else {
                    String::new()
                },
            ),
            None => String::from("register only"),
        };
        println!(
            "{:>4}  {:<18} {:<36} r={:<4} +{}",
            i,
            out.event.to_string(),
            detail,
            out.register,
            out.latency
        );
    }

    println!("\n--- Caches ---");
    for (core, lines) in result.caches.iter().enumerate() {
        let cells: Vec<String> = lines
            .iter()
            .map(|l| match l.address {
                Some(a) => format!("[{} {}={}]", l.state, a, l.data),
                None => String::from("[I]"),
            })
            .collect();
        println!("  {}: {}", CoreId(core), cells.join(" "));
    }
    println!("\n--- Per PE ---");
    for (core, counts) in result.per_core.iter().enumerate() {
        println!(
            "  {}: {} hits, {} misses, {} stall cycles",
            CoreId(core),
            counts.cache_hits,
            counts.cache_misses,
            counts.stall_cycles
        );
    }
    println!("  total stall cycles: {}", result.stall_cycles);
    println!("\n--- Memory ---\n  {:?}", result.memory);
    println!("\n--- Metrics ---");
    print_report(&result.report);
    Ok(())
}

fn show_state(system: &SystemArgs) -> Result<()> {
    let store = FileStore::new(&system.state_file);
    let state = store
        .load()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;
    if system.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }
    match (state.protocol, state.last_seed) {
        (Some(protocol), Some(seed)) => println!("protocol {protocol}, last seed {seed}"),
        _ => println!("no run recorded in {}", store.path().display()),
    }
    Ok(())
}

fn main() -> Result<()> {
    let env = Env::default()
        .filter_or("CACHESYNC_LOG", "info")
        .write_style_or("CACHESYNC_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let cli = Cli::parse();
    let config = cli.system.load()?;
    match cli.command {
        Command::Run { protocol, last_code } => run(&cli.system, config, protocol, last_code),
        Command::Compare { seed } => compare(&cli.system, &config, seed),
        Command::Trace { protocol, seed } => trace(&cli.system, &config, protocol, seed),
        Command::State => show_state(&cli.system),
    }
}
