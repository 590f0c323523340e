use clap::{Parser, Subcommand};
use hotreload_core::cache::{BytecodeCache, CacheEntry, CacheError};
use hotreload_core::config::ReloaderConfig;
use hotreload_core::fs::{RealFileSystem, SourceLocator};
use hotreload_core::registry::SourceRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "hotreload.yaml";

/// hotreload - inspect and maintain the incremental bytecode cache
#[derive(Parser, Debug)]
#[command(name = "hotreload")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (default: ./hotreload.yaml if present)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override the run mode from the configuration
    #[arg(long, value_name = "MODE", global = true)]
    mode: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List the source units under the configured roots
    List,

    /// Show the cache state of every source unit
    Status,

    /// Decode the cache entry of one unit
    Inspect {
        #[arg(value_name = "UNIT")]
        unit: String,

        /// Print the header as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete the cache partition of the current run mode
    Clear,
}

fn main() -> anyhow::Result<()> {
    // Set RUST_LOG=debug for detailed logs; logs go to stderr so stdout
    // stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Init { force } => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
            init_config(&path, *force)
        }
        Command::List => {
            let (_, locator) = setup(&cli)?;
            list_units(&locator)
        }
        Command::Status => {
            let (config, locator) = setup(&cli)?;
            status(&config, locator)
        }
        Command::Inspect { unit, json } => {
            let (config, locator) = setup(&cli)?;
            inspect(&config, locator, unit, *json)
        }
        Command::Clear => {
            let (config, locator) = setup(&cli)?;
            clear(&config, locator)
        }
    }
}

/// Resolve the configuration and the source roots it names
fn setup(cli: &Cli) -> anyhow::Result<(ReloaderConfig, Arc<SourceLocator>)> {
    let config = load_config(cli)?;
    debug!("Source roots: {:?}", config.source_roots);
    debug!("Cache directory: {:?}", config.cache_dir);

    let locator = Arc::new(SourceLocator::new(
        Arc::new(RealFileSystem::new()),
        config.source_roots.clone(),
        config.source_extension.clone(),
    ));
    Ok((config, locator))
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    ReloaderConfig::init_file(path)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?;
    println!("Created {}", path.display());
    Ok(())
}

/// Load the configuration file (if any) and apply command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<ReloaderConfig> {
    let mut config = match &cli.config {
        Some(path) => ReloaderConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config file: {}", e))?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG);
            if default_path.exists() {
                ReloaderConfig::from_file(&default_path)
                    .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", DEFAULT_CONFIG, e))?
            } else {
                ReloaderConfig::default()
            }
        }
    };

    if let Some(mode) = &cli.mode {
        config.run_mode = mode.clone();
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
    }
    Ok(config)
}

fn open_cache(config: &ReloaderConfig, locator: Arc<SourceLocator>) -> BytecodeCache {
    let registry = Arc::new(SourceRegistry::new(locator));
    BytecodeCache::open(
        &config.cache_dir,
        &config.run_mode,
        &config.runtime_version,
        registry,
    )
}

/// Open the partition for reading; an absent or incompatible partition is
/// left as it is
fn open_cache_read_only(
    config: &ReloaderConfig,
    locator: Arc<SourceLocator>,
) -> Result<BytecodeCache, CacheError> {
    let registry = Arc::new(SourceRegistry::new(locator));
    BytecodeCache::open_existing(
        &config.cache_dir,
        &config.run_mode,
        &config.runtime_version,
        registry,
    )
}

fn list_units(locator: &SourceLocator) -> anyhow::Result<()> {
    for name in locator.list_units() {
        println!("{}", name);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Fresh,
    Stale,
    Missing,
    Corrupt,
}

impl EntryState {
    fn label(self) -> &'static str {
        match self {
            EntryState::Fresh => "fresh",
            EntryState::Stale => "stale",
            EntryState::Missing => "missing",
            EntryState::Corrupt => "corrupt",
        }
    }
}

fn entry_state(cache: &BytecodeCache, name: &str) -> EntryState {
    match cache.inspect(name) {
        Ok(None) => EntryState::Missing,
        Err(_) => EntryState::Corrupt,
        Ok(Some(_)) if cache.lookup(name, None).is_some() => EntryState::Fresh,
        Ok(Some(_)) => EntryState::Stale,
    }
}

fn status(config: &ReloaderConfig, locator: Arc<SourceLocator>) -> anyhow::Result<()> {
    let units = locator.list_units();
    let cache = match open_cache_read_only(config, locator) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!("{}", e);
            None
        }
    };

    let mut counts = [0usize; 4];
    for name in &units {
        let state = cache
            .as_ref()
            .map_or(EntryState::Missing, |cache| entry_state(cache, name));
        counts[state as usize] += 1;
        println!("{:<8} {}", state.label(), name);
    }
    println!(
        "{} unit(s): {} fresh, {} stale, {} missing, {} corrupt",
        units.len(),
        counts[EntryState::Fresh as usize],
        counts[EntryState::Stale as usize],
        counts[EntryState::Missing as usize],
        counts[EntryState::Corrupt as usize],
    );
    Ok(())
}

fn inspect(
    config: &ReloaderConfig,
    locator: Arc<SourceLocator>,
    unit: &str,
    json: bool,
) -> anyhow::Result<()> {
    let cache = open_cache_read_only(config, locator)?;
    let entry = cache
        .inspect(unit)
        .map_err(|e| anyhow::anyhow!("Failed to read cache entry for {}: {}", unit, e))?
        .ok_or_else(|| anyhow::anyhow!("No cache entry for {}", unit))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry_json(unit, &entry))?);
        return Ok(());
    }

    let header = &entry.header;
    println!("unit:                  {}", unit);
    println!("source hash:           {}", header.source_hash);
    println!("signature checksum:    {:08x}", header.signature_checksum);
    println!("static-final checksum: {:08x}", header.static_final_checksum);
    println!("bytecode:              {} bytes", entry.bytecode.len());
    if header.dependencies.is_empty() {
        println!("dependencies:          none");
    } else {
        println!("dependencies:");
        for dep in &header.dependencies {
            println!("  {} {:08x}", dep.name, dep.static_final_checksum);
        }
    }
    Ok(())
}

fn entry_json(unit: &str, entry: &CacheEntry) -> serde_json::Value {
    let header = &entry.header;
    serde_json::json!({
        "unit": unit,
        "sourceHash": header.source_hash.to_hex(),
        "signatureChecksum": header.signature_checksum,
        "staticFinalChecksum": header.static_final_checksum,
        "bytecodeLength": entry.bytecode.len(),
        "dependencies": header
            .dependencies
            .iter()
            .map(|dep| serde_json::json!({
                "name": dep.name,
                "staticFinalChecksum": dep.static_final_checksum,
            }))
            .collect::<Vec<_>>(),
    })
}

fn clear(config: &ReloaderConfig, locator: Arc<SourceLocator>) -> anyhow::Result<()> {
    let cache = open_cache(config, locator);
    cache
        .clear()
        .map_err(|e| anyhow::anyhow!("Failed to clear cache: {}", e))?;
    info!("Cleared run mode {}", config.run_mode);
    println!("Cleared {}", cache.partition().display());
    Ok(())
}
