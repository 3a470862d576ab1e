//! CLI entry point for irsa-sync.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use irsa_sync_core::auth::USERNAME_ENV;
use irsa_sync_core::{
    Archive, ArchiveConfig, AuthError, BatchReport, Credentials, Database, DownloadOptions,
    DownloadSource, FileConfig, MetadataRecord, MetadataStore, Partition, Session, StoreQuery,
    SyncOptions, SyncReport, TimeWindow, load_default_file_config, load_file_config,
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command, DownloadArgs, PositionArgs, QueryArgs, Selection, SyncArgs, UrlsArgs};

const DEFAULT_DATABASE: &str = "irsa-meta.db";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let file_config = load_config(args.config.as_deref())?;
    let archive_config = match &args.base_url {
        Some(base) => ArchiveConfig::for_base_url(base).with_timeouts(
            file_config.archive_config().connect_timeout_secs(),
            file_config.archive_config().read_timeout_secs(),
        ),
        None => file_config.archive_config(),
    };
    archive_config.validate()?;

    let db_path = args
        .database
        .clone()
        .or_else(|| file_config.database.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
    let db = Database::new_with_options(&db_path, file_config.database_options())
        .await
        .with_context(|| format!("opening metadata database {}", db_path.display()))?;
    let store = MetadataStore::new(db);

    let needs_network = matches!(
        args.command,
        Command::Sync(_) | Command::Download(_) | Command::Position(_)
    );
    let session = if needs_network && !args.anonymous {
        open_session(&archive_config, &args, &file_config).await?
    } else {
        Session::anonymous(&archive_config)?
    };
    let archive = Archive::new(&archive_config, store, &session);

    match args.command {
        Command::Sync(sync) => run_sync(&archive, &file_config, sync).await,
        Command::Status => run_status(&archive).await,
        Command::Query(query) => run_query(&archive, query).await,
        Command::Urls(urls) => run_urls(&archive, urls).await,
        Command::Download(download) => {
            run_download(archive, &file_config, download, args.quiet).await
        }
        Command::Position(position) => run_position(&archive, position).await,
    }
}

fn load_config(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }
    let loaded = load_default_file_config()?;
    if loaded.config.is_some()
        && let Some(path) = &loaded.path
    {
        info!(path = %path.display(), "loaded config file");
    }
    Ok(loaded.file_config())
}

async fn open_session(
    config: &ArchiveConfig,
    args: &Args,
    file_config: &FileConfig,
) -> Result<Session> {
    let credentials_file = args
        .credentials
        .as_deref()
        .or(file_config.credentials_file.as_deref());
    match Credentials::resolve(credentials_file) {
        Ok(credentials) => Ok(Session::login(config, &credentials).await?),
        Err(AuthError::MissingCredentials(reason)) => {
            warn!(
                %reason,
                "no credentials, continuing without login (set {USERNAME_ENV} for proprietary data)"
            );
            Ok(Session::anonymous(config)?)
        }
        Err(e) => Err(e.into()),
    }
}

fn store_query(selection: Selection) -> StoreQuery {
    let mut query = selection
        .conditions
        .into_iter()
        .fold(StoreQuery::new(), StoreQuery::with_condition);
    if let Some(limit) = selection.limit {
        query = query.limit(limit);
    }
    query
}

async fn run_sync(archive: &Archive, file_config: &FileConfig, args: SyncArgs) -> Result<ExitCode> {
    let mut options = SyncOptions::default();
    if let Some(workers) = args.workers.map(usize::from).or(file_config.max_workers) {
        options.max_workers = workers;
    }
    if let Some(nights) = file_config.chunk_nights {
        options.chunk_nights = nights;
    }
    if let Some(days) = file_config.chunk_days {
        options.chunk_days = days;
    }
    if let Some(chunk) = args.chunk {
        options.chunk_nights = chunk;
        options.chunk_days = chunk;
    }

    let syncer = archive.syncer(options)?;
    let state = syncer.state(args.partition).await?;
    info!(partition = %args.partition, %state, "starting sync");

    let report = if let Some((start, end)) = args.nights {
        syncer.sync_nights(args.partition, start, end).await?
    } else if args.rebuild {
        syncer.rebuild(args.partition).await?
    } else {
        syncer.sync(args.partition).await?
    };
    print_sync_report(&report);

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_sync_report(report: &SyncReport) {
    println!(
        "{}: {} chunks, {} inserted, {} already stored, {} failed",
        report.partition,
        report.chunks,
        report.inserted,
        report.conflicts,
        report.failed_chunks.len()
    );
    for failed in &report.failed_chunks {
        println!("  failed {}: {}", failed.chunk, failed.error);
    }
}

async fn run_status(archive: &Archive) -> Result<ExitCode> {
    let syncer = archive.syncer(SyncOptions::default())?;
    for partition in Partition::ALL {
        let state = syncer.state(partition).await?;
        let count = archive.store().count(partition).await?;
        println!("{partition}\t{state}\t{count} records");
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_query(archive: &Archive, args: QueryArgs) -> Result<ExitCode> {
    let records = archive
        .query(args.partition, &store_query(args.selection))
        .await?;
    print_records(&records, args.json)?;
    info!(records = records.len(), "query complete");
    Ok(ExitCode::SUCCESS)
}

fn print_records(records: &[MetadataRecord], json: bool) -> Result<()> {
    for record in records {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            let fields: Vec<String> = record
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}\t{}", record.id(), fields.join(" "));
        }
    }
    Ok(())
}

async fn run_urls(archive: &Archive, args: UrlsArgs) -> Result<ExitCode> {
    let resolved = archive
        .urls(args.product, DownloadSource::Query(store_query(args.selection)))
        .await?;
    for (_, url) in &resolved.urls {
        println!("{url}");
    }
    for (id, error) in &resolved.unresolved {
        warn!(record = %id, %error, "skipped record");
    }
    Ok(if resolved.unresolved.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run_download(
    archive: Archive,
    file_config: &FileConfig,
    args: DownloadArgs,
    quiet: bool,
) -> Result<ExitCode> {
    let mut options = DownloadOptions {
        overwrite: args.overwrite,
        dry_run: args.dry_run,
        check: !args.no_check,
        ..DownloadOptions::default()
    };
    if let Some(workers) = args.workers.map(usize::from).or(file_config.max_workers) {
        options.max_workers = workers;
    }
    if let Some(size) = args
        .chunk_size
        .and_then(|s| usize::try_from(s).ok())
        .or(file_config.chunk_size)
    {
        options.chunk_size = size;
    }
    let dest = args
        .dest
        .or_else(|| file_config.download_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let archive = if quiet || args.dry_run {
        archive
    } else {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} files ({elapsed})") {
            bar.set_style(style);
        }
        archive.with_progress(bar)
    };

    let report = archive
        .download(
            args.product,
            DownloadSource::Query(store_query(args.selection)),
            &dest,
            &options,
        )
        .await?;
    print_batch_report(&report);

    Ok(exit_code_for(&report, options.dry_run))
}

fn print_batch_report(report: &BatchReport) {
    for (url, outcome) in &report.outcomes {
        if !outcome.is_usable() {
            println!("{}: {url}: {outcome}", outcome.label());
        }
    }
    for (id, error) in &report.unresolved {
        println!("unresolved: {id}: {error}");
    }
    let summary = report.summary();
    println!(
        "{}: {} records, {} downloaded, {} already present, {} failed, {} failed checks, {} unresolved",
        report.product,
        report.requested,
        summary.downloaded,
        summary.already_present,
        summary.transport_failed,
        summary.integrity_failed,
        report.unresolved.len()
    );
    if summary.would_download > 0 {
        println!("dry run: {} files would be downloaded", summary.would_download);
    }
}

fn exit_code_for(report: &BatchReport, dry_run: bool) -> ExitCode {
    if dry_run {
        if report.unresolved.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    } else if report.is_fully_successful() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_position(archive: &Archive, args: PositionArgs) -> Result<ExitCode> {
    let window = if let Some(days) = args.last_days {
        TimeWindow::LastDays(days)
    } else if let Some(night) = args.night {
        TimeWindow::Night(night)
    } else if let Some((start_jd, end_jd)) = args.between {
        TimeWindow::Between { start_jd, end_jd }
    } else {
        TimeWindow::All
    };
    let records = archive
        .position(args.partition, args.ra, args.dec, &window)
        .await?;
    print_records(&records, args.json)?;
    Ok(ExitCode::SUCCESS)
}
