use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tunelog::analysis::{self, AnalysisPeriod, AnalysisQuery, AnalysisSnapshot};
use tunelog::config::{self, PipelineConfig};
use tunelog::interchange::{DEFAULT_ANCHOR, SheetUpdate};
use tunelog::merge::DedupPolicy;
use tunelog::normalize::normalize_to_iso;
use tunelog::store::CsvStore;
use tunelog::table::IncrementSource;

#[derive(Parser, Debug)]
#[command(name = "tunelog")]
#[command(about = "Merge recent-plays exports into a canonical listening history")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $TUNELOG_CONFIG_DIR/pipeline.json).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge an increment into the historical store.
    Merge {
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,
        /// Increment CSV, or `-` for stdin.
        #[arg(long, value_name = "SOURCE")]
        increment: Option<IncrementSource>,
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
        #[arg(long, value_parser = parse_dedup)]
        dedup: Option<DedupPolicy>,
        /// Print the merge report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the canonical form of timestamp strings.
    Normalize {
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Summarize listening activity in a store.
    Report {
        #[arg(long, value_name = "FILE")]
        store: Option<PathBuf>,
        /// 30, 90, 365 or all.
        #[arg(long, value_parser = parse_period, default_value = "365")]
        period: AnalysisPeriod,
        /// Report every period in turn.
        #[arg(long, conflicts_with = "period")]
        all_periods: bool,
        #[arg(long, default_value_t = 10)]
        top: usize,
        #[arg(long, default_value_t = 7)]
        window: usize,
        #[arg(long)]
        json: bool,
    },
    /// Emit the store as a spreadsheet range update.
    ExportSheet {
        #[arg(long, value_name = "FILE")]
        store: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_ANCHOR)]
        anchor: String,
    },
    /// Write a default config file.
    Init {
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tunelog::logging::init_logging(cli.verbose);

    let load = || match &cli.config {
        Some(path) => config::load_config_from_path(path),
        None => config::load_config(),
    };

    match cli.command {
        Command::Merge {
            history,
            increment,
            output,
            dedup,
            json,
        } => {
            let mut pipeline = load()?;
            if let Some(history) = history {
                // A moved history also moves the default output.
                if output.is_none() {
                    pipeline.output_store_path = history.clone();
                }
                pipeline.historical_store_path = history;
            }
            if let Some(output) = output {
                pipeline.output_store_path = output;
            }
            if let Some(increment) = increment {
                pipeline.increment_source = increment;
            }
            if let Some(dedup) = dedup {
                pipeline.dedup = dedup;
            }
            run_merge(&pipeline, json)
        }
        Command::Normalize { values } => {
            for value in values {
                println!("{}", normalize_to_iso(&value).unwrap_or_else(|| "null".into()));
            }
            Ok(())
        }
        Command::Report {
            store,
            period,
            all_periods,
            top,
            window,
            json,
        } => {
            let pipeline = load()?;
            let store = store.unwrap_or(pipeline.output_store_path);
            let query = AnalysisQuery {
                period,
                top_count: top,
                rolling_window: window.max(1),
            };
            run_report(&store, &pipeline.identifier_columns, query, all_periods, json)
        }
        Command::ExportSheet { store, anchor } => {
            let pipeline = load()?;
            let store = store.unwrap_or(pipeline.output_store_path);
            let dataset = load_store(&store, &pipeline.identifier_columns)?;
            let update = SheetUpdate::from_dataset(&dataset, &anchor)?;
            println!("{}", serde_json::to_string_pretty(&update)?);
            Ok(())
        }
        Command::Init { force } => {
            let path = match &cli.config {
                Some(path) => path.clone(),
                None => config::config_path()?,
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            match &cli.config {
                Some(path) => config::save_config_to_path(path, &PipelineConfig::default())?,
                None => config::save_config(&PipelineConfig::default())?,
            }
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn run_merge(pipeline: &PipelineConfig, json: bool) -> Result<()> {
    let report = tunelog::pipeline::run(pipeline).with_context(|| {
        format!(
            "merge into {} failed",
            pipeline.output_store_path.display()
        )
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Data processed and saved to {}",
            pipeline.output_store_path.display()
        );
        println!("Total records: {}", report.total_rows);
        if report.duplicates_removed > 0 {
            println!("Duplicates removed: {}", report.duplicates_removed);
        }
        if report.unparsed_timestamps > 0 {
            println!("Unparsed play times: {}", report.unparsed_timestamps);
        }
    }
    Ok(())
}

fn load_store(
    path: &Path,
    identifier_columns: &[String],
) -> Result<tunelog::CanonicalDataset> {
    CsvStore::new(path)
        .with_identifier_columns(identifier_columns.to_vec())
        .load()?
        .with_context(|| format!("no dataset stored at {}", path.display()))
}

fn run_report(
    store: &Path,
    identifier_columns: &[String],
    query: AnalysisQuery,
    all_periods: bool,
    json: bool,
) -> Result<()> {
    let dataset = load_store(store, identifier_columns)?;

    let mut periods = vec![query.period];
    if all_periods {
        periods = vec![AnalysisPeriod::Days30];
        let mut period = AnalysisPeriod::Days30.next();
        while period != AnalysisPeriod::Days30 {
            periods.push(period);
            period = period.next();
        }
    }

    let snapshots: Vec<AnalysisSnapshot> = periods
        .into_iter()
        .map(|period| {
            analysis::analyze(
                &dataset,
                &AnalysisQuery {
                    period,
                    ..query.clone()
                },
            )
        })
        .collect();

    if json {
        if let [single] = snapshots.as_slice() {
            println!("{}", serde_json::to_string_pretty(single)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }
        return Ok(());
    }

    for snapshot in &snapshots {
        print!("{}", render_report(snapshot)?);
    }
    Ok(())
}

fn render_report(snapshot: &AnalysisSnapshot) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    let metrics = &snapshot.metrics;
    writeln!(out, "== {} ==", snapshot.period.label())?;
    if let Some(newest) = snapshot.newest_play {
        writeln!(out, "Newest play:      {newest}")?;
    }
    writeln!(out, "Total plays:      {}", metrics.total_plays)?;
    writeln!(out, "Unique artists:   {}", metrics.unique_artists)?;
    writeln!(out, "Unique songs:     {}", metrics.unique_songs)?;
    writeln!(out, "Avg daily plays:  {:.1}", metrics.avg_daily_plays)?;
    match metrics.most_active_hour {
        Some(hour) => writeln!(out, "Most active hour: {hour:02}:00")?,
        None => writeln!(out, "Most active hour: n/a")?,
    }

    if !snapshot.top_artists.is_empty() {
        writeln!(out, "\nTop artists")?;
        for (rank, entry) in snapshot.top_artists.iter().enumerate() {
            writeln!(out, "{:>3}. {} ({})", rank + 1, entry.artist, entry.plays)?;
        }
    }
    if !snapshot.top_songs.is_empty() {
        writeln!(out, "\nTop songs")?;
        for (rank, entry) in snapshot.top_songs.iter().enumerate() {
            writeln!(out, "{:>3}. {} ({})", rank + 1, entry.label(), entry.plays)?;
        }
    }

    writeln!(out, "\nPlays by weekday")?;
    for (idx, plays) in snapshot.weekday.iter().enumerate() {
        writeln!(
            out,
            "  {:<9} {plays}",
            AnalysisSnapshot::weekday_label(idx)
        )?;
    }

    let busy_hours: Vec<String> = snapshot
        .hourly
        .iter()
        .enumerate()
        .filter(|(_, plays)| **plays > 0)
        .map(|(hour, plays)| format!("{hour:02}h:{plays}"))
        .collect();
    if !busy_hours.is_empty() {
        writeln!(out, "\nPlays by hour: {}", busy_hours.join(" "))?;
    }

    if let Some(last) = snapshot.daily.last() {
        let rolling = last
            .rolling_avg
            .or_else(|| snapshot.daily.iter().rev().find_map(|point| point.rolling_avg));
        writeln!(
            out,
            "\nDaily series: {} days, last day {} with {} plays{}",
            snapshot.daily.len(),
            last.date,
            last.plays,
            rolling
                .map(|avg| format!(", latest rolling average {avg:.1}"))
                .unwrap_or_default()
        )?;
    }
    out.push('\n');
    Ok(out)
}

fn parse_dedup(value: &str) -> std::result::Result<DedupPolicy, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "exact" => Ok(DedupPolicy::Exact),
        "folded" => Ok(DedupPolicy::Folded),
        other => Err(format!("unknown dedup policy {other:?} (exact, folded)")),
    }
}

fn parse_period(value: &str) -> std::result::Result<AnalysisPeriod, String> {
    AnalysisPeriod::parse(value)
        .ok_or_else(|| format!("unknown period {value:?} (30, 90, 365, all)"))
}
