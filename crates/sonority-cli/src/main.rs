use anyhow::Result;
use clap::Parser;
use sonority_core::model::Mbid;
use sonority_similarity::{Config, DistanceType};
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "sonority", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the database (default: ~/.local/share/sonority/sonority.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory holding built indexes (default: ~/.local/share/sonority/indices)
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show stored recordings, vectors, stats and indexes
    Status,
    /// List, compute or remove metric vectors
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },
    /// Normalization statistics
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },
    /// Build or remove approximate nearest-neighbour indexes
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Find the recordings most similar to one recording
    ///
    /// Requires an index built with `sonority index build` for the same
    /// metric, distance and tree count.
    Similar {
        /// Metric to compare by
        metric: String,
        /// MBID of the recording
        mbid: Mbid,
        /// Submission offset of the recording
        #[arg(long, default_value_t = 0)]
        offset: u32,
        /// Number of results
        #[arg(short, default_value_t = 10)]
        k: usize,
        #[command(flatten)]
        index: IndexArgs,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Distance between two recordings under the default index of a metric
    Distance {
        metric: String,
        mbid_a: Mbid,
        mbid_b: Mbid,
        #[arg(long, default_value_t = 0)]
        offset_a: u32,
        #[arg(long, default_value_t = 0)]
        offset_b: u32,
    },
    /// Walk from one recording to another through similar recordings
    ///
    /// Each step of the walk is closer to the end recording than the one
    /// before. The path always finishes at the end recording and holds at
    /// most --max-length entries.
    Path {
        start_mbid: Mbid,
        end_mbid: Mbid,
        #[arg(long, default_value_t = 0)]
        start_offset: u32,
        #[arg(long, default_value_t = 0)]
        end_offset: u32,
        /// Metric whose default index is walked
        #[arg(long, default_value = "mfccs")]
        metric: String,
        #[arg(long, default_value_t = 10)]
        max_length: usize,
        /// Print the path as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Index selection; unset values fall back to the `[index]` config section.
#[derive(Debug, clap::Args)]
struct IndexArgs {
    /// Distance type: angular, euclidean or manhattan
    #[arg(long)]
    distance: Option<DistanceType>,
    /// Number of trees
    #[arg(long)]
    trees: Option<u32>,
}

#[derive(Debug, clap::Subcommand)]
enum ConfigAction {
    /// Show the current effective configuration
    Show,
    /// Show the config file path
    Path,
    /// Show an example config file
    Example,
    /// Create the config file with defaults
    Init,
}

#[derive(Debug, clap::Subcommand)]
enum MetricsAction {
    /// List the metrics of the catalog by category
    List {
        /// Include hidden metrics
        #[arg(long)]
        all: bool,
    },
    /// Compute vectors for every recording that lacks one
    Add {
        /// Recordings committed per transaction
        #[arg(long)]
        batch_size: Option<usize>,
        /// Delete and recompute existing vectors and failures
        #[arg(long)]
        force: bool,
    },
    /// Register a hybrid metric named after its parts, e.g. mfccs_bpm
    AddHybrid {
        name: String,
        #[arg(long)]
        category: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Hide a metric from listings
    Hide { name: String },
    /// List a hidden metric again
    Show { name: String },
    /// Delete every stored vector of a metric
    Remove {
        name: String,
        /// Keep the metric's normalization stats
        #[arg(long)]
        keep_stats: bool,
    },
}

#[derive(Debug, clap::Subcommand)]
enum StatsAction {
    /// Sample documents and store normalization stats
    Compute {
        /// Number of documents to sample
        #[arg(long)]
        sample_size: Option<u64>,
        /// Replace existing stats
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, clap::Subcommand)]
enum IndexAction {
    /// Build an index from the stored vectors of a metric
    Build {
        metric: String,
        #[command(flatten)]
        index: IndexArgs,
    },
    /// Delete a built index
    Remove {
        metric: String,
        #[command(flatten)]
        index: IndexArgs,
    },
}

fn main() -> Result<()> {
    let Cli {
        command,
        db,
        index_dir,
        verbose,
    } = Cli::parse();

    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show_config(),
            ConfigAction::Path => commands::config::show_path(),
            ConfigAction::Example => commands::config::show_example(),
            ConfigAction::Init => commands::config::init_config(),
        },
        command => run(command, Config::load()?.with_overrides(db, index_dir)),
    }
}

fn run(command: Commands, config: Config) -> Result<()> {
    match command {
        // Handled in main without loading the config.
        Commands::Config { .. } => {}
        Commands::Status => commands::show_status(config)?,
        Commands::Metrics { action } => match action {
            MetricsAction::List { all } => commands::metrics::list_metrics(config, all)?,
            MetricsAction::Add { batch_size, force } => {
                commands::metrics::add_metrics(config, batch_size, force)?;
            }
            MetricsAction::AddHybrid {
                name,
                category,
                description,
            } => commands::metrics::add_hybrid(config, &name, &category, &description)?,
            MetricsAction::Hide { name } => commands::metrics::set_visibility(config, &name, false)?,
            MetricsAction::Show { name } => commands::metrics::set_visibility(config, &name, true)?,
            MetricsAction::Remove { name, keep_stats } => {
                commands::metrics::remove_metric(config, &name, keep_stats)?;
            }
        },
        Commands::Stats { action } => match action {
            StatsAction::Compute { sample_size, force } => {
                commands::stats::compute_stats(config, sample_size, force)?;
            }
        },
        Commands::Index { action } => match action {
            IndexAction::Build { metric, index } => {
                commands::index::build_index(config, &metric, index.distance, index.trees)?;
            }
            IndexAction::Remove { metric, index } => {
                commands::index::remove_index(config, &metric, index.distance, index.trees)?;
            }
        },
        Commands::Similar {
            metric,
            mbid,
            offset,
            k,
            index,
            json,
        } => {
            let query = commands::query::SimilarQuery {
                metric,
                mbid,
                offset,
                k,
                distance: index.distance,
                trees: index.trees,
            };
            commands::query::similar(config, &query, json)?;
        }
        Commands::Distance {
            metric,
            mbid_a,
            mbid_b,
            offset_a,
            offset_b,
        } => {
            commands::query::distance(config, &metric, (mbid_a, offset_a), (mbid_b, offset_b))?;
        }
        Commands::Path {
            start_mbid,
            end_mbid,
            start_offset,
            end_offset,
            metric,
            max_length,
            json,
        } => {
            commands::query::path(
                config,
                &metric,
                (start_mbid, start_offset),
                (end_mbid, end_offset),
                max_length,
                json,
            )?;
        }
    }

    Ok(())
}
