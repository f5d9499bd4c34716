use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use shelf_pdf_engine::{default_engine, EngineKind, OpenSource, ScopedDocument};
use shelf_render::{DocumentFetcher, EngineRasterizer, ThumbnailFormat, ThumbnailImage};
use shelf_scheduler::{ThumbnailConfig, ThumbnailOutcome, ThumbnailScheduler};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "shelf")]
#[command(about = "Render document cover thumbnails")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a thumbnail for every document in a catalog.
    Thumbs(ThumbsArgs),
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct ThumbsArgs {
    /// Documents to render, by path or http(s) URL.
    #[arg(value_name = "FILES")]
    files: Vec<String>,
    /// JSON catalog: an array of `{"name", "path"}` entries.
    #[arg(long, value_name = "FILE")]
    manifest: Option<PathBuf>,
    #[arg(long, value_name = "DIR")]
    out_dir: PathBuf,
    /// TOML config file. Defaults to the platform config dir when present.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    cache_capacity: Option<usize>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// `png` or `jpeg`.
    #[arg(long)]
    format: Option<ThumbnailFormat>,
    /// JPEG quality, 1-100.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,
}

/// One document to render.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct CatalogEntry {
    name: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    first_page_size_pt: PageSizeOutput,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum ItemStatus {
    Rendered,
    Failed,
}

#[derive(Debug, Serialize)]
struct ItemReport {
    name: String,
    path: String,
    status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ThumbsReport {
    total: usize,
    rendered: usize,
    failed: usize,
    items: Vec<ItemReport>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();

    match cli.command {
        Commands::Thumbs(args) => run_thumbs(args),
        Commands::Info { file } => run_info(&file),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn engine_kind() -> EngineKind {
    #[cfg(feature = "pdfium")]
    {
        EngineKind::Pdfium
    }
    #[cfg(not(feature = "pdfium"))]
    {
        EngineKind::Lopdf
    }
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let mut engine = default_engine();
    let doc = ScopedDocument::open(&mut engine, OpenSource::from(file))
        .context("failed to open PDF")?;

    let page_count = doc.page_count()?;
    let size = doc.page_size(0)?;
    let payload = InfoOutput {
        path: file.display().to_string(),
        page_count,
        first_page_size_pt: PageSizeOutput { width: size.width_pt, height: size.height_pt },
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    Ok(())
}

fn run_thumbs(args: ThumbsArgs) -> Result<()> {
    let config = load_config(&args)?;
    let catalog = build_catalog(args.manifest.as_deref(), &args.files)?;
    if catalog.is_empty() {
        anyhow::bail!("no documents given: pass FILES or --manifest");
    }

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    tracing::info!(
        documents = catalog.len(),
        max_concurrent = config.max_concurrent,
        cache_capacity = config.cache_capacity,
        "rendering thumbnails"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let report = runtime.block_on(render_catalog(&config, &catalog, &args.out_dir))?;

    let json = serde_json::to_string_pretty(&report)?;
    println!("{json}");

    Ok(())
}

/// Config file, then environment, then command-line flags.
fn load_config(args: &ThumbsArgs) -> Result<ThumbnailConfig> {
    let config = match &args.config {
        Some(path) => ThumbnailConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let path = ThumbnailConfig::default_config_path();
            if path.is_file() {
                ThumbnailConfig::from_file(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?
            } else {
                ThumbnailConfig::default()
            }
        }
    };

    let mut config = config.apply_env().context("invalid SHELF_* environment variable")?;

    if let Some(limit) = args.concurrency {
        config.max_concurrent = limit;
    }
    if let Some(capacity) = args.cache_capacity {
        config.cache_capacity = capacity;
    }
    if let Some(width) = args.width {
        config.target_width = width;
    }
    if let Some(height) = args.height {
        config.target_height = height;
    }
    if let Some(format) = args.format {
        config.format = format;
    }
    if let Some(quality) = args.quality {
        config.format = config.format.with_quality(quality);
    }

    Ok(config)
}

/// Manifest entries first, then positional files, in order.
fn build_catalog(manifest: Option<&Path>, files: &[String]) -> Result<Vec<CatalogEntry>> {
    let mut catalog = match manifest {
        Some(path) => read_manifest(path)?,
        None => Vec::new(),
    };

    catalog.extend(files.iter().map(|file| CatalogEntry {
        name: display_name(file),
        path: file.clone(),
    }));

    Ok(catalog)
}

fn read_manifest(path: &Path) -> Result<Vec<CatalogEntry>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let entries: Vec<CatalogEntry> = serde_json::from_str(&contents)
        .with_context(|| format!("invalid manifest {}", path.display()))?;

    // Relative paths are relative to the manifest itself
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(entries
        .into_iter()
        .map(|entry| {
            let resolved = if DocumentFetcher::is_remote(&entry.path)
                || Path::new(&entry.path).is_absolute()
            {
                entry.path
            } else {
                base.join(&entry.path).to_string_lossy().into_owned()
            };
            CatalogEntry { name: entry.name, path: resolved }
        })
        .collect())
}

fn display_name(location: &str) -> String {
    let last = location.trim_end_matches('/').rsplit(['/', '\\']).next().unwrap_or(location);
    let stem = Path::new(last).file_stem().and_then(|s| s.to_str()).unwrap_or(last);
    if stem.is_empty() {
        "document".to_owned()
    } else {
        stem.to_owned()
    }
}

fn file_name_for(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ' ');
    if cleaned.is_empty() {
        "document".to_owned()
    } else {
        cleaned.to_owned()
    }
}

async fn render_catalog(
    config: &ThumbnailConfig,
    catalog: &[CatalogEntry],
    out_dir: &Path,
) -> Result<ThumbsReport> {
    let rasterizer = EngineRasterizer::new(engine_kind(), config.format);
    let scheduler = ThumbnailScheduler::new(config, rasterizer)?;

    let _progress = scheduler.subscribe(|snapshot| {
        tracing::info!(
            total = snapshot.total,
            remaining = snapshot.remaining,
            percent = snapshot.percent,
            "progress"
        );
    });

    let tickets: Vec<_> = catalog
        .iter()
        .map(|entry| scheduler.submit(scheduler.request(entry.path.as_str())))
        .collect();
    let outcomes = futures::future::join_all(tickets).await;

    let mut used_names = std::collections::HashSet::new();
    let mut items = Vec::with_capacity(catalog.len());

    for (entry, outcome) in catalog.iter().zip(outcomes) {
        let item = match outcome {
            ThumbnailOutcome::Ready(image) => {
                let file_name = unique_file_name(&mut used_names, &entry.name, &image);
                let output = out_dir.join(file_name);
                match fs::write(&output, image.bytes()) {
                    Ok(()) => rendered_item(entry, &output, &image),
                    Err(err) => {
                        let error = format!("failed to write {}: {err}", output.display());
                        failed_item(entry, error)
                    }
                }
            }
            ThumbnailOutcome::Failed(err) => failed_item(entry, err.to_string()),
        };
        items.push(item);
    }

    let stats = scheduler.stats();
    let released = scheduler.teardown();
    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        deduplicated = stats.deduplicated,
        released,
        "done"
    );

    let rendered = items.iter().filter(|item| matches!(item.status, ItemStatus::Rendered)).count();
    Ok(ThumbsReport { total: items.len(), rendered, failed: items.len() - rendered, items })
}

fn unique_file_name(
    used: &mut std::collections::HashSet<String>,
    name: &str,
    image: &ThumbnailImage,
) -> String {
    let base = file_name_for(name);
    let ext = image.format().extension();
    let mut candidate = format!("{base}.{ext}");
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{base}-{n}.{ext}");
        n += 1;
    }
    candidate
}

fn rendered_item(entry: &CatalogEntry, output: &Path, image: &ThumbnailImage) -> ItemReport {
    ItemReport {
        name: entry.name.clone(),
        path: entry.path.clone(),
        status: ItemStatus::Rendered,
        output: Some(output.display().to_string()),
        error: None,
        width: Some(image.width()),
        height: Some(image.height()),
    }
}

fn failed_item(entry: &CatalogEntry, error: String) -> ItemReport {
    ItemReport {
        name: entry.name.clone(),
        path: entry.path.clone(),
        status: ItemStatus::Failed,
        output: None,
        error: Some(error),
        width: None,
        height: None,
    }
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}
