/// Inspect and maintain persisted interval pool state
///
/// Reads the same TOML config as the host, so it looks in the configured
/// state directory with the configured file prefix.
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use colored::Colorize;
use interval_pool::config::{self, Config};
use interval_pool::interval_pool::{
    load_state, Clock, JsonFileStore, ManualClock, PersistedState, PoolState, StateStore,
    SystemClock, TIMESTAMP_FORMAT,
};
use interval_pool::logger;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(name = "tool_pool_state")]
#[clap(about = "Inspect and compact persisted interval pool state")]
struct Args {
    /// Config file (defaults apply when missing)
    #[clap(long, default_value = config::utils::CONFIG_FILE_PATH)]
    config: String,

    /// Evaluate the protected window as of this local time (YYYY-MM-DDTHH:MM:SS)
    #[clap(long)]
    now: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List subjects with stored state
    List,

    /// Show groups and counts for one subject
    Show {
        subject: String,

        /// Print every interval
        #[clap(short, long)]
        verbose: bool,
    },

    /// Run GC over the stored state and write it back
    Compact { subject: String },

    /// Print the default config as TOML
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_config_from_path(&args.config).map_err(anyhow::Error::msg)?;
    logger::init_with_config(config.logging.to_logger_config());

    let clock: Arc<dyn Clock> = match &args.now {
        Some(raw) => {
            let now = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
                .with_context(|| format!("--now '{}' is not {}", raw, TIMESTAMP_FORMAT))?;
            Arc::new(ManualClock::new(now))
        }
        None => Arc::new(SystemClock),
    };

    let store = JsonFileStore::new(
        config.storage.state_dir_path(),
        config.storage.file_prefix.clone(),
    );

    let result = match args.command {
        Command::List => list_subjects(&store).await,
        Command::Show { subject, verbose } => show_subject(&config, &store, clock, &subject, verbose).await,
        Command::Compact { subject } => compact_subject(&config, &store, clock, &subject).await,
        Command::DefaultConfig => {
            println!("{}", config::config_to_toml(&Config::default()).map_err(anyhow::Error::msg)?);
            Ok(())
        }
    };

    logger::flush();
    result
}

async fn list_subjects(store: &JsonFileStore) -> Result<()> {
    if !store.dir().exists() {
        println!("{} {}", "No state directory at".yellow(), store.dir().display());
        return Ok(());
    }

    let subjects = store
        .subjects()
        .await
        .with_context(|| format!("reading {}", store.dir().display()))?;

    println!("{} ({})", "Stored subjects".bold(), subjects.len());
    for subject in subjects {
        println!("  {}", subject.cyan());
    }
    Ok(())
}

async fn load_pool_state(
    config: &Config,
    store: &JsonFileStore,
    clock: Arc<dyn Clock>,
    subject: &str,
) -> Result<Option<PoolState>> {
    let groups = load_state(store, subject)
        .await
        .with_context(|| format!("loading state for '{}'", subject))?;

    Ok(groups.map(|groups| {
        let mut state = PoolState::new(clock, &config.pool);
        state.load_groups(groups);
        state
    }))
}

async fn show_subject(
    config: &Config,
    store: &JsonFileStore,
    clock: Arc<dyn Clock>,
    subject: &str,
    verbose: bool,
) -> Result<()> {
    let state = match load_pool_state(config, store, clock, subject).await? {
        Some(state) => state,
        None => {
            println!("{} '{}'", "No stored state for".yellow(), subject);
            return Ok(());
        }
    };

    let range = state.cache().protected_range();
    println!("{} {}", "Subject".bold(), subject.cyan());
    println!("  file:       {}", store.path_for(subject).display());
    println!("  groups:     {}", state.cache().group_count());
    println!(
        "  intervals:  {} (ceiling {})",
        state.live_count(),
        state.max_intervals()
    );
    println!("  protected:  {} in [{} -> {})", state.protected_count(), range.start, range.end);

    for group in state.cache().groups() {
        let first = group.intervals.first().map(|i| i.key()).unwrap_or_default();
        let last = group.intervals.last().map(|i| i.key()).unwrap_or_default();
        let marker = if group.intervals.iter().any(|i| range.contains_key(&i.key())) {
            "protected".green()
        } else {
            "evictable".dimmed()
        };

        println!(
            "  - fetched {}  {:>4} intervals  {} .. {}  {}",
            group.fetched_at.format(TIMESTAMP_FORMAT),
            group.len(),
            first,
            last,
            marker
        );

        if verbose {
            for interval in &group.intervals {
                println!(
                    "      {}  total={:.4} energy={:.4} tax={:.4} level={}",
                    interval.starts_at,
                    interval.total,
                    interval.energy,
                    interval.tax,
                    interval.level.as_str()
                );
            }
        }
    }
    Ok(())
}

async fn compact_subject(
    config: &Config,
    store: &JsonFileStore,
    clock: Arc<dyn Clock>,
    subject: &str,
) -> Result<()> {
    let state = match load_pool_state(config, store, clock, subject).await? {
        Some(state) => state,
        None => {
            println!("{} '{}'", "No stored state for".yellow(), subject);
            return Ok(());
        }
    };

    let bytes = PersistedState::capture(subject, &state).encode()?;
    store
        .save(subject, &bytes)
        .await
        .with_context(|| format!("writing state for '{}'", subject))?;

    println!(
        "{} {} ({} intervals in {} groups)",
        "Compacted".green().bold(),
        subject,
        state.live_count(),
        state.cache().group_count()
    );
    Ok(())
}
