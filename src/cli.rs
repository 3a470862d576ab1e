//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};

use irsa_sync_core::{Condition, NightCursor, Partition, ProductKind};

/// Mirror survey archive metadata and download matching data products.
///
/// `sync` keeps a local metadata database up to date; `query` and `urls`
/// read it; `download` fetches the selected files and checks them.
#[derive(Parser, Debug)]
#[command(name = "irsa-sync")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/irsa-sync/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Local metadata database
    #[arg(long, global = true, value_name = "FILE")]
    pub database: Option<PathBuf>,

    /// Two-line credentials file (username, password)
    #[arg(long, global = true, value_name = "FILE")]
    pub credentials: Option<PathBuf>,

    /// Skip login and use public data only
    #[arg(long, global = true)]
    pub anonymous: bool,

    /// Archive base URL; search, data and login endpoints live beneath it
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring the local metadata store up to date
    Sync(SyncArgs),
    /// Show the sync state of each partition
    Status,
    /// List stored records
    Query(QueryArgs),
    /// Print data URLs for stored records
    Urls(UrlsArgs),
    /// Download data products for stored records
    Download(DownloadArgs),
    /// Cone search the remote archive around a sky position
    Position(PositionArgs),
}

#[derive(ClapArgs, Debug)]
pub struct SyncArgs {
    /// Partition to sync (sci, raw, cal, ref)
    #[arg(short, long, default_value = "sci")]
    pub partition: Partition,

    /// Re-fetch every night from zero
    #[arg(long, conflicts_with = "nights")]
    pub rebuild: bool,

    /// Fetch an explicit night range START..END (END exclusive)
    #[arg(long, value_name = "START..END", value_parser = parse_night_range)]
    pub nights: Option<(NightCursor, NightCursor)>,

    /// Chunks fetched concurrently (1-64)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub workers: Option<u8>,

    /// Nights (rebuild) or days (catch-up) per chunk
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=3650))]
    pub chunk: Option<u32>,
}

/// Record selection shared by `query`, `urls` and `download`.
#[derive(ClapArgs, Debug, Default)]
pub struct Selection {
    /// Filter on a stored field: name=value, name!=value, name>value, name>=value,
    /// name<value, name<=value or name=lo..hi
    #[arg(long = "where", value_name = "CONDITION")]
    pub conditions: Vec<Condition>,

    /// Return at most this many records
    #[arg(long)]
    pub limit: Option<u32>,
}

#[derive(ClapArgs, Debug)]
pub struct QueryArgs {
    /// Partition to read (sci, raw, cal, ref)
    #[arg(short, long, default_value = "sci")]
    pub partition: Partition,

    #[command(flatten)]
    pub selection: Selection,

    /// Print one JSON object per record
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct UrlsArgs {
    /// Product tag, e.g. sciimg, psfcat, bias, o, refimg
    #[arg(long)]
    pub product: ProductKind,

    #[command(flatten)]
    pub selection: Selection,
}

#[derive(ClapArgs, Debug)]
pub struct DownloadArgs {
    /// Product tag, e.g. sciimg, psfcat, bias, o, refimg
    #[arg(long)]
    pub product: ProductKind,

    #[command(flatten)]
    pub selection: Selection,

    /// Destination directory (default: config download_dir, then ".")
    #[arg(short, long, value_name = "DIR")]
    pub dest: Option<PathBuf>,

    /// Re-download files that already exist
    #[arg(long)]
    pub overwrite: bool,

    /// Report what would be downloaded without fetching anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip FITS header checks on downloaded files
    #[arg(long)]
    pub no_check: bool,

    /// Maximum concurrent downloads (1-64)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub workers: Option<u8>,

    /// Write buffer size in bytes
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=67_108_864))]
    pub chunk_size: Option<u64>,
}

#[derive(ClapArgs, Debug)]
pub struct PositionArgs {
    /// Partition to search (sci, raw, cal, ref)
    #[arg(short, long, default_value = "sci")]
    pub partition: Partition,

    /// Right ascension in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub ra: f64,

    /// Declination in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub dec: f64,

    /// Only observations from the last N days
    #[arg(long, value_name = "DAYS", group = "window")]
    pub last_days: Option<f64>,

    /// Only observations from one night (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", group = "window")]
    pub night: Option<NaiveDate>,

    /// Only observations with START <= obsjd <= END (Julian dates)
    #[arg(long, value_name = "START..END", group = "window", value_parser = parse_jd_range)]
    pub between: Option<(f64, f64)>,

    /// Print one JSON object per record
    #[arg(long)]
    pub json: bool,
}

fn split_range(raw: &str) -> Result<(&str, &str), String> {
    raw.split_once("..")
        .map(|(lo, hi)| (lo.trim(), hi.trim()))
        .ok_or_else(|| format!("expected START..END, got '{raw}'"))
}

fn parse_night_range(raw: &str) -> Result<(NightCursor, NightCursor), String> {
    let (lo, hi) = split_range(raw)?;
    let start: i64 = lo.parse().map_err(|_| format!("invalid night '{lo}'"))?;
    let end: i64 = hi.parse().map_err(|_| format!("invalid night '{hi}'"))?;
    if start < 0 || end <= start {
        return Err(format!("night range {start}..{end} is empty"));
    }
    Ok((NightCursor::new(start), NightCursor::new(end)))
}

fn parse_jd_range(raw: &str) -> Result<(f64, f64), String> {
    let (lo, hi) = split_range(raw)?;
    let start: f64 = lo.parse().map_err(|_| format!("invalid Julian date '{lo}'"))?;
    let end: f64 = hi.parse().map_err(|_| format!("invalid Julian date '{hi}'"))?;
    if !(start.is_finite() && end.is_finite()) || end < start {
        return Err(format!("Julian date range {start}..{end} is empty"));
    }
    Ok((start, end))
}
