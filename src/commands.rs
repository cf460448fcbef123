//! Subcommand handlers. Each returns the process exit code on success.

use crate::error::{ErrorKind, Result};
use crate::wallpaper;
use apod_cache::{Database, Repository};
use apod_config::Config;
use apod_library::{AdmitResult, CacheManager};
use apod_remote::{ApodClient, ApodInfo};
use apod_storage::backend::LocalBackend;
use apod_storage::{format_capture_date, parse_capture_date};
use clap::Args;
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::macros::date;
use time::{Date, OffsetDateTime};

/// The first Astronomy Picture of the Day.
const FIRST_APOD: Date = date!(1995 - 06 - 16);

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Directory the images are cached in. Must already exist.
    pub cache_root: Option<PathBuf>,
    /// Date of the picture to fetch (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(value_parser = parse_date)]
    pub date: Option<Date>,
    /// Don't change the desktop background.
    #[arg(long)]
    pub no_wallpaper: bool,
}

#[derive(Args, Debug)]
pub struct AdmitArgs {
    /// Directory the images are cached in. Must already exist.
    pub cache_root: PathBuf,
    /// Local image file to admit into the cache.
    pub file: PathBuf,
    /// URL the image was fetched from; its last segment names the cached file.
    #[arg(long)]
    pub locator: String,
    /// Capture date of the image (YYYY-MM-DD). Defaults to today (UTC).
    #[arg(long, value_parser = parse_date)]
    pub date: Option<Date>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    pub cache_root: Option<PathBuf>,
    /// Only list images captured on this date (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    pub date: Option<Date>,
    /// Print the rows as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    pub cache_root: Option<PathBuf>,
}

pub fn parse_date(value: &str) -> std::result::Result<Date, String> {
    parse_capture_date(value).map_err(|_| "incorrect date format; should be YYYY-MM-DD".to_string())
}

/// Download the picture of the day, admit it to the cache and (optionally)
/// make it the desktop background.
pub async fn fetch(config: &Config, args: FetchArgs) -> Result<u8> {
    let root = cache_root(args.cache_root, config)?;
    let date = args.date.unwrap_or_else(today);
    check_apod_date(date)?;
    println!("APOD date: {}", format_capture_date(date));

    let client = ApodClient::new(&config.api).or_raise(|| ErrorKind::Remote)?;
    let info = client.info(date).await.or_raise(|| ErrorKind::Remote)?;
    let url = info.image_url(config.api.prefer_hd).or_raise(|| ErrorKind::Remote)?;
    let bytes = client.download(url).await.or_raise(|| ErrorKind::Remote)?;
    let capture_date = info.capture_date().unwrap_or(date);

    let (manager, db) = open(&root).await?;
    let result = manager.admit(&bytes, url, capture_date).await.or_raise(|| ErrorKind::Library);
    db.close().await;
    let result = result?;
    print_info(&info, url, &result);

    if config.wallpaper && !args.no_wallpaper {
        // The image is safely cached at this point; a desktop that can't be
        // changed doesn't make the run a failure.
        if let Err(e) = wallpaper::set(&result.artifact.stored_path).await {
            tracing::warn!(error = ?e, "could not set the desktop background");
        }
    }
    Ok(0)
}

/// Admit a local file without touching the network.
pub async fn admit(args: AdmitArgs) -> Result<u8> {
    let root = checked_root(args.cache_root)?;
    let bytes = tokio::fs::read(&args.file).await.or_raise(|| ErrorKind::Input(args.file.clone()))?;
    let date = args.date.unwrap_or_else(today);

    let (manager, db) = open(&root).await?;
    let result = manager.admit(&bytes, &args.locator, date).await.or_raise(|| ErrorKind::Library);
    db.close().await;
    let result = result?;
    println!("{}: {}", result.status, result.artifact.stored_path.display());
    Ok(0)
}

pub async fn list(config: &Config, args: ListArgs) -> Result<u8> {
    let root = cache_root(args.cache_root, config)?;
    let (manager, db) = open(&root).await?;
    let artifacts = match args.date {
        Some(date) => manager.repository().list_by_capture_date(date).await,
        None => manager.repository().list().await,
    }
    .or_raise(|| ErrorKind::Cache);
    db.close().await;
    let artifacts = artifacts?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&artifacts).or_raise(|| ErrorKind::Output)?);
        return Ok(0);
    }
    for artifact in &artifacts {
        println!(
            "{}  {}  {:>10}  {}",
            format_capture_date(artifact.capture_date),
            artifact.fingerprint.get(..12).unwrap_or(&artifact.fingerprint),
            artifact.size_bytes,
            artifact.stored_path.display(),
        );
    }
    Ok(0)
}

/// Exits with `1` when the metadata store and the cache root disagree.
pub async fn verify(config: &Config, args: VerifyArgs) -> Result<u8> {
    let root = cache_root(args.cache_root, config)?;
    let (manager, db) = open(&root).await?;
    let report = manager.verify().await.or_raise(|| ErrorKind::Library);
    db.close().await;
    let report = report?;

    for problem in &report.problems {
        println!("{problem}");
    }
    println!("checked {} artifacts, found {} problems", report.checked, report.problems.len());
    Ok(if report.is_consistent() { 0 } else { 1 })
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn check_apod_date(date: Date) -> Result<()> {
    if date < FIRST_APOD || date > today() {
        exn::bail!(ErrorKind::InvalidDate(format_capture_date(date)));
    }
    Ok(())
}

/// The cache root from the command line, falling back to the configuration.
fn cache_root(given: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    let path = given.or_else(|| config.cache_root.clone()).ok_or_raise(|| ErrorKind::MissingCacheRoot)?;
    checked_root(path)
}

fn checked_root(path: PathBuf) -> Result<PathBuf> {
    let absolute = std::path::absolute(&path).or_raise(|| ErrorKind::CacheRoot(path.clone()))?;
    if !absolute.is_dir() {
        exn::bail!(ErrorKind::CacheRoot(path));
    }
    Ok(absolute)
}

async fn open(root: &Path) -> Result<(CacheManager, Database)> {
    let backend = LocalBackend::new(root).or_raise(|| ErrorKind::CacheRoot(root.to_path_buf()))?;
    let db = Database::open_in(root).await.or_raise(|| ErrorKind::Cache)?;
    let manager = CacheManager::new(Arc::new(backend), Repository::from(&db));
    Ok((manager, db))
}

fn print_info(info: &ApodInfo, url: &str, result: &AdmitResult) {
    println!("Title: {}", info.title);
    if let Some(copyright) = &info.copyright {
        println!("Copyright: {}", copyright.trim());
    }
    println!("URL: {url}");
    println!("Path: {}", result.artifact.stored_path.display());
    println!("Size: {} bytes", result.artifact.size_bytes);
    println!("SHA-256: {}", result.artifact.fingerprint);
    println!("Status: {}", result.status);
    if !info.explanation.is_empty() {
        println!("\n{}", info.explanation);
    }
}
