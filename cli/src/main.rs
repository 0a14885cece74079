use clap::{Parser, Subcommand};
use rt_common::db::core::NetlistDB;
use rt_common::util::config::{Config, Stage};
use rt_common::util::{generator, logger};
use rt_router::RouteOutcome;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a design snapshot (JSON) and write the outcome.
    Route {
        #[arg(long, value_name = "FILE")]
        design: PathBuf,
        /// Comma-separated stage list overriding `[flow] stages`.
        #[arg(long, value_delimiter = ',')]
        stages: Option<Vec<String>>,
    },
    /// Write a synthetic design snapshot.
    Generate {
        #[arg(long, default_value_t = 200)]
        nets: usize,
        #[arg(long, default_value_t = 2000)]
        size: i32,
        #[arg(long, default_value_t = 4)]
        layers: u8,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long, default_value = "inputs/random.json")]
        output: String,
    },
    /// Generate a design in memory and run the whole flow on it.
    Demo {
        #[arg(long, default_value_t = 200)]
        nets: usize,
        #[arg(long, default_value_t = 1)]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if args.config.exists() {
        let config_str = std::fs::read_to_string(&args.config)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Config::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", args.config.display(), e))?
    } else {
        Config::default()
    };
    logger::init(config.io.level_filter()?);
    if args.config.exists() {
        log::info!("Loaded configuration from {:?}", args.config);
    } else {
        log::warn!(
            "Configuration file {:?} not found. Using internal defaults.",
            args.config
        );
    }

    let command = args.command.unwrap_or(Commands::Demo {
        nets: 200,
        seed: 1,
    });

    match command {
        Commands::Route { design, stages } => {
            let mut config = config;
            if let Some(names) = stages {
                config.flow.stages = parse_stages(&names)?;
                config.validate()?;
            }
            log::info!("Loading design snapshot: {}", design.display());
            let reader = BufReader::new(File::open(&design)?);
            let db: NetlistDB = serde_json::from_reader(reader).map_err(|e| {
                anyhow::anyhow!("Invalid design snapshot '{}': {}", design.display(), e)
            })?;
            let outcome = run_routing(&db, &config)?;
            write_outcome(&outcome, &config.io.output_path)?;
        }
        Commands::Generate {
            nets,
            size,
            layers,
            seed,
            output,
        } => {
            prepare_output_dir(&output)?;
            log::info!(
                "Generating random design (Nets: {}, Die: {}, Layers: {}, Seed: {})...",
                nets,
                size,
                layers,
                seed
            );
            let db = generator::generate_random_design(nets, size, layers, seed)?;
            let writer = BufWriter::new(File::create(&output)?);
            serde_json::to_writer(writer, &db)?;
            log::info!("Generated: {}", output);
        }
        Commands::Demo { nets, seed } => {
            let size = ((nets as f64).sqrt() * 150.0).ceil() as i32;
            let db = generator::generate_random_design(nets, size.max(1000), 4, seed)?;
            let outcome = run_routing(&db, &config)?;
            write_outcome(&outcome, &config.io.output_path)?;
        }
    }

    Ok(())
}

fn parse_stages(names: &[String]) -> anyhow::Result<Vec<Stage>> {
    names
        .iter()
        .map(|n| n.parse::<Stage>().map_err(anyhow::Error::from))
        .collect()
}

fn run_routing(db: &NetlistDB, config: &Config) -> anyhow::Result<RouteOutcome> {
    let outcome = rt_router::route(db, config)?;
    for stat in &outcome.stats {
        log::info!(
            "  {:<18} {:>10.1} ms  {:>8} KB  committed {:>6}  excluded {:>4}",
            stat.stage.name(),
            stat.elapsed_ms,
            stat.memory_delta_kb,
            stat.committed,
            stat.excluded
        );
    }
    if !outcome.summary.broken.is_empty() {
        log::warn!(
            "{} nets failed the connectivity check",
            outcome.summary.broken.len()
        );
    }
    Ok(outcome)
}

fn prepare_output_dir(path_str: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path_str).parent() {
        if !parent.exists() && !parent.as_os_str().is_empty() {
            log::info!("Creating output directory: {:?}", parent);
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn write_outcome(outcome: &RouteOutcome, path: &str) -> anyhow::Result<()> {
    prepare_output_dir(path)?;
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, outcome)?;
    log::info!("Wrote routing outcome to {}", path);
    Ok(())
}
