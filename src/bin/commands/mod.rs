use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use track_resolver::{
    ConcurrencyAdvisor, ExecutionModel, PerformanceCollector, ResolverConfig, TrackQuery,
    TrackResolver,
};

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a single track
    ///
    /// Usage examples:
    /// # Match by title and artist
    /// track-resolver resolve --title "One More Time" --artist "Daft Punk"
    ///
    /// # Use year and key for tie-breaking bonuses
    /// track-resolver resolve --title "Strobe" --artist deadmau5 --year 2009 --key "E major"
    Resolve {
        /// Track title
        #[arg(long)]
        title: String,

        /// Artist string, may list several artists
        #[arg(long, default_value = "")]
        artist: String,

        #[arg(long)]
        year: Option<i32>,

        /// Musical key in any common notation ("Am", "8A", "A minor")
        #[arg(long)]
        key: Option<String>,

        #[arg(long)]
        bpm: Option<f64>,

        /// Explicit mix descriptor ("Extended Mix")
        #[arg(long)]
        mix: Option<String>,

        /// Ignore the artist when searching and scoring
        #[arg(long)]
        title_only: bool,
    },

    /// Resolve every track of a JSON array of track records
    ///
    /// Usage examples:
    /// # Resolve with bounded concurrency and keep performance stats
    /// track-resolver batch tracks.json --concurrent --stats-out stats.json
    Batch {
        /// JSON file holding an array of track records
        input: PathBuf,

        /// Write the session's performance stats to this file
        #[arg(long)]
        stats_out: Option<PathBuf>,

        /// Use the bounded-concurrent execution model
        #[arg(long)]
        concurrent: bool,
    },

    /// Recommend an execution model from exported performance stats
    ///
    /// Usage examples:
    /// track-resolver advise stats.json
    Advise {
        /// Stats file written by `batch --stats-out`
        stats: PathBuf,
    },
}

/// Load the configuration file, if any, then apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<ResolverConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => ResolverConfig::load(path)?,
        None => ResolverConfig::default(),
    };
    let config = config.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

pub async fn execute_command(
    command: Commands,
    config: ResolverConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Resolve {
            title,
            artist,
            year,
            key,
            bpm,
            mix,
            title_only,
        } => {
            let track = TrackQuery {
                year,
                key,
                bpm,
                mix,
                title_only,
                ..TrackQuery::new(title, artist)
            };
            let resolver = TrackResolver::with_http_client(
                config,
                Box::new(http_client::native::NativeClient::new()),
            );
            let result = resolver.resolve(&track).await?;
            println!("{}", result.to_json()?);
            Ok(())
        }

        Commands::Batch {
            input,
            stats_out,
            concurrent,
        } => {
            let tracks: Vec<TrackQuery> =
                serde_json::from_str(&std::fs::read_to_string(&input)?)?;
            let config = if concurrent {
                ResolverConfig {
                    execution_model: ExecutionModel::BoundedConcurrent,
                    ..config
                }
            } else {
                config
            };
            log::info!(
                "Resolving {} tracks from {} ({:?})",
                tracks.len(),
                input.display(),
                config.execution_model
            );

            let collector = Arc::new(PerformanceCollector::new());
            collector.start_session()?;
            let resolver = TrackResolver::with_http_client(
                config,
                Box::new(http_client::native::NativeClient::new()),
            )
            .with_collector(collector.clone());

            let results = resolver.resolve_many(&tracks).await;
            let stats = collector.end_session()?;

            println!("{}", serde_json::to_string_pretty(&results)?);
            log::info!(
                "Matched {}/{} tracks ({:.1}%)",
                stats.matched_tracks,
                stats.total_tracks,
                stats.match_rate()
            );
            if let Some(path) = stats_out {
                stats.save(&path)?;
                log::info!("Performance stats written to {}", path.display());
            }
            Ok(())
        }

        Commands::Advise { stats } => {
            let report = ConcurrencyAdvisor::new().analyze_file(&stats)?;
            println!("{}", report.to_json()?);
            let suggested = report.apply_to(&config);
            log::info!("Suggested execution model: {:?}", suggested.execution_model);
            Ok(())
        }
    }
}
