//! tundra: cold-storage archive transfer CLI
//!
//! Commands:
//!   treehash <file>             - print the SHA-256 tree hash of a file
//!   upload <file>               - upload a file as one archive, part by part
//!   download <archive-id>       - retrieve an archive to {base_path}/{id}.tar.gz
//!   inventory                   - retrieve the vault inventory as JSON
//!   abort <upload-id>           - discard a dangling multipart upload
//!   status                      - show vault health
//!   config show                 - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use tundra_core::config::{FinalChecksum, StorageBackend, TundraConfig};
use tundra_core::PartSize;
use tundra_storage::{build_operator, check_health, S3Credentials, Vault};
use tundra_transfer::{
    download_retrieved_archive, download_retrieved_inventory, upload, ProgressFn, UploadOptions,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tundra",
    version,
    about = "Cold-storage archive transfer",
    long_about = "tundra: upload archives in tree-hash verified parts and download retrieval output by range"
)]
struct Cli {
    /// Path to tundra.toml configuration file
    #[arg(long, short = 'c', env = "TUNDRA_CONFIG", default_value = "/etc/tundra/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long, env = "TUNDRA_LOG")]
    log: Option<String>,

    /// Log format; overrides config
    #[arg(long, env = "TUNDRA_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the SHA-256 tree hash of a file
    Treehash {
        file: PathBuf,
        /// Also print the range and tree hash of every part of this size
        #[arg(long)]
        part_size_mib: Option<u64>,
    },

    /// Upload a file as a single archive
    Upload {
        file: PathBuf,
        /// Part size in MiB (power of two, at most 4096); overrides config
        #[arg(long, short = 'p')]
        part_size_mib: Option<u64>,
        /// Archive description stored with the archive
        #[arg(long, short = 'd')]
        description: Option<String>,
        /// Recompute the archive checksum by rereading the file
        #[arg(long)]
        reread: bool,
    },

    /// Retrieve an archive into the download directory
    Download {
        archive_id: String,
        /// Directory to write {archive_id}.tar.gz into; overrides config
        #[arg(long, short = 'b')]
        base_path: Option<PathBuf>,
        /// Part size in MiB used for ranged fetches; overrides config
        #[arg(long, short = 'p')]
        part_size_mib: Option<u64>,
    },

    /// Retrieve the vault inventory
    Inventory {
        /// Destination file; overrides config
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Discard the staged parts of an unfinished multipart upload
    Abort { upload_id: String },

    /// Show vault status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TundraConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);
    if let Some(notice) = missing_config_notice(&cli.config) {
        tracing::warn!("{notice}");
    }

    match cli.command {
        Commands::Treehash { file, part_size_mib } => cmd_treehash(&file, part_size_mib).await,
        Commands::Upload { file, part_size_mib, description, reread } => {
            cmd_upload(&config, &file, part_size_mib, description, reread).await
        }
        Commands::Download { archive_id, base_path, part_size_mib } => {
            cmd_download(&config, &archive_id, base_path.as_deref(), part_size_mib).await
        }
        Commands::Inventory { out } => cmd_inventory(&config, out.as_deref()).await,
        Commands::Abort { upload_id } => cmd_abort(&config, &upload_id).await,
        Commands::Status => cmd_status(&config).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so command output stays pipeable
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn missing_config_notice(path: &Path) -> Option<String> {
    (!path.exists()).then(|| format!("config file not found: {}  (using defaults)", path.display()))
}

fn open_vault(config: &TundraConfig) -> Result<Vault> {
    let creds = match config.storage.backend {
        StorageBackend::S3 => Some(S3Credentials::from_env()?),
        _ => None,
    };
    let op = build_operator(&config.storage, creds.as_ref())?;
    Ok(Vault::new(op, config.storage.vault.clone()))
}

fn resolve_part_size(config: &TundraConfig, override_mib: Option<u64>) -> Result<PartSize> {
    let part_size = match override_mib {
        Some(mib) => PartSize::from_mib(mib)?,
        None => config.transfer.part_size()?,
    };
    Ok(part_size)
}

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done: u64, total: u64, msg: &str| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `tundra treehash` ─────────────────────────────────────────────────────────

async fn cmd_treehash(file: &Path, part_size_mib: Option<u64>) -> Result<()> {
    let mut f = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let len = f.seek(std::io::SeekFrom::End(0)).await?;
    f.rewind().await?;

    if let Some(mib) = part_size_mib {
        let part_size = PartSize::from_mib(mib)?;
        let mut buf = Vec::new();
        for range in tundra_chunks::part_ranges(len, part_size.bytes()) {
            buf.resize(range.len() as usize, 0);
            f.read_exact(&mut buf)
                .await
                .with_context(|| format!("reading {} {}", file.display(), range))?;
            println!("{range}\t{}", tundra_chunks::tree_hash(&buf)?);
        }
        f.rewind().await?;
    }

    let digest = tundra_chunks::digest_reader(&mut f, len)
        .await
        .with_context(|| format!("hashing {}", file.display()))?;
    println!("{digest}  {}", file.display());
    Ok(())
}

// ── `tundra upload` ───────────────────────────────────────────────────────────

async fn cmd_upload(
    config: &TundraConfig,
    file: &Path,
    part_size_mib: Option<u64>,
    description: Option<String>,
    reread: bool,
) -> Result<()> {
    let vault = open_vault(config)?;
    let part_size = resolve_part_size(config, part_size_mib)?;
    let final_checksum = if reread {
        FinalChecksum::Reread
    } else {
        config.transfer.final_checksum
    };

    let mut source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let len = source.metadata().await?.len();

    let pb = make_progress_bar(len, "upload");
    let progress = progress_callback(&pb);
    let opts = UploadOptions {
        part_size,
        description,
        final_checksum,
        progress: Some(&progress),
    };

    let result = upload(&vault, &mut source, &opts)
        .await
        .with_context(|| format!("uploading {}", file.display()));
    pb.finish_and_clear();
    let result = result?;

    println!("archive_id: {}", result.archive.archive_id);
    println!("checksum:   {}", result.checksum);
    println!("size:       {} bytes in {} part(s) of {part_size}", result.total_size, result.parts);
    println!("location:   {}", result.archive.location);
    Ok(())
}

// ── `tundra download` ─────────────────────────────────────────────────────────

async fn cmd_download(
    config: &TundraConfig,
    archive_id: &str,
    base_path: Option<&Path>,
    part_size_mib: Option<u64>,
) -> Result<()> {
    let vault = open_vault(config)?;
    let part_size = resolve_part_size(config, part_size_mib)?;
    let base_path = base_path.unwrap_or(config.download.base_path.as_path());

    let job = vault
        .archive_job(archive_id)
        .await
        .with_context(|| format!("starting retrieval of archive {archive_id}"))?;

    let pb = make_progress_bar(job.job().archive_size.unwrap_or(0), "download");
    let progress = progress_callback(&pb);
    let result =
        download_retrieved_archive(&job, job.job(), part_size, base_path, Some(&progress)).await;
    pb.finish_and_clear();

    match result? {
        Some(path) => println!("{}", path.display()),
        None => println!("job {} has no archive output", job.job().job_id),
    }
    Ok(())
}

// ── `tundra inventory` ────────────────────────────────────────────────────────

async fn cmd_inventory(config: &TundraConfig, out: Option<&Path>) -> Result<()> {
    let vault = open_vault(config)?;
    let part_size = config.transfer.part_size()?;
    let dest = out.unwrap_or(config.download.inventory_path.as_path());

    let job = vault.inventory_job().await.context("starting inventory retrieval")?;
    let path = download_retrieved_inventory(&job, job.job(), part_size, dest, None).await?;
    println!("{}", path.display());
    Ok(())
}

// ── `tundra abort` ────────────────────────────────────────────────────────────

async fn cmd_abort(config: &TundraConfig, upload_id: &str) -> Result<()> {
    let vault = open_vault(config)?;
    vault
        .abort(upload_id)
        .await
        .with_context(|| format!("aborting upload {upload_id}"))?;
    println!("aborted {upload_id}");
    Ok(())
}

// ── `tundra status` ───────────────────────────────────────────────────────────

async fn cmd_status(config: &TundraConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let report = check_health(&vault).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serializing status")?
    );
    Ok(())
}

// ── `tundra config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &TundraConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
