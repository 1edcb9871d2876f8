//! FileVault
//!
//! Command-line front end and socket server for sandboxed file storage.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::files::{Identity, RelativePath, TenancyMode, UploadItem};
use daemon::ipc::{StorageClient, StorageServer};
use daemon::protocol::messages::{
    Bind, DirectoryCreate, ErrorCode, ErrorMessage, FileDelete, FileDownloadRequest, FileEntry,
    FileEntryType, FileListRequest, FileUploadBatch, FileUploadResult, Message, UploadPayload,
    UsageRequest, DEFAULT_CHUNK_SIZE,
};
use daemon::protocol::MAX_FRAME_SIZE;
use daemon::router::upload_result;
use daemon::{MessageRouter, StorageService};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

/// Bytes of file data sent in one upload batch over the socket.
const REMOTE_BATCH_BYTES: usize = MAX_FRAME_SIZE / 2;

/// FileVault - sandboxed per-identity file storage.
#[derive(Parser, Debug)]
#[command(name = "filevault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Identity whose storage root to operate on
    #[arg(short, long, global = true)]
    pub identity: Option<String>,

    /// Talk to the server on this socket instead of the local storage root
    #[arg(short, long, global = true, value_name = "SOCKET")]
    pub socket: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve the storage root on a Unix socket
    Serve,

    /// Create the storage root (or an identity's root) and its default folders
    Init,

    /// List a directory
    Ls {
        /// Directory relative to the storage root
        #[arg(default_value = "")]
        path: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Create a directory
    Mkdir {
        /// Parent directory relative to the storage root
        path: String,

        /// Name of the new directory
        name: String,
    },

    /// Delete a file or directory tree
    Rm {
        /// Path relative to the storage root
        path: String,
    },

    /// Upload files; directories are uploaded with their nested structure
    Put {
        /// Local files or directories
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Destination directory relative to the storage root
        #[arg(long, short, default_value = "")]
        dest: String,
    },

    /// Download a file
    Get {
        /// Path relative to the storage root
        path: String,

        /// Local file to write (defaults to the stored file's name)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show storage usage
    Usage {
        /// Subtree to measure (defaults to the whole root)
        path: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    let serving = matches!(cli.command, Commands::Serve);
    let _guard = init_tracing(&config, cli.verbose, serving && config.daemon.log_to_file)?;
    tracing::debug!(config = %config_path.display(), "Configuration loaded");

    match cli.command.clone() {
        Commands::Serve => {
            let socket = cli
                .socket
                .clone()
                .unwrap_or_else(|| config.server.socket_path.clone());
            run_server(config, &socket).await?;
        }
        Commands::Init => {
            if !config_path.exists() {
                config.save(&config_path)?;
                println!("Wrote default configuration to {}", config_path.display());
            }
            let service = StorageService::from_config(&config)?;
            let identity = cli.identity.as_deref().map(Identity::new).transpose()?;
            let root = service.provision(identity.as_ref())?;
            println!("Storage root ready at {}", root.path().display());
        }
        Commands::Ls { path, json } => {
            let mut backend = Backend::open(&cli, &config).await?;
            let reply = backend
                .call(Message::FileListRequest(FileListRequest { path }))
                .await?;
            let listing = match reply {
                Message::FileListResponse(listing) => listing,
                other => bail!("unexpected reply: {:?}", other),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("/{}", listing.breadcrumbs.join("/"));
                print_entries(&listing.entries);
            }
        }
        Commands::Mkdir { path, name } => {
            let mut backend = Backend::open(&cli, &config).await?;
            let reply = backend
                .call(Message::DirectoryCreate(DirectoryCreate { path, name }))
                .await?;
            let created = match reply {
                Message::DirectoryCreated(created) => created,
                other => bail!("unexpected reply: {:?}", other),
            };
            println!("Created {}", created.path);
        }
        Commands::Rm { path } => {
            let mut backend = Backend::open(&cli, &config).await?;
            let reply = backend.call(Message::FileDelete(FileDelete { path })).await?;
            let deleted = match reply {
                Message::FileDeleted(deleted) => deleted,
                other => bail!("unexpected reply: {:?}", other),
            };
            let kind = match deleted.entry_type {
                FileEntryType::Directory => "directory",
                FileEntryType::File => "file",
            };
            println!("Deleted {} {}", kind, deleted.path);
        }
        Commands::Put { files, dest } => {
            let uploads = collect_uploads(&files)?;
            if uploads.is_empty() {
                bail!("no files to upload");
            }
            let mut backend = Backend::open(&cli, &config).await?;
            let results = backend
                .upload(&dest, uploads, config.upload.max_batch_items)
                .await?;
            report_uploads(&results)?;
        }
        Commands::Get { path, output } => {
            let mut backend = Backend::open(&cli, &config).await?;
            let output = match output {
                Some(output) => output,
                None => default_output(&path)?,
            };
            let written = download(&mut backend, &path, &output).await?;
            println!("Saved {} ({})", output.display(), format_size(written));
        }
        Commands::Usage { path, json } => {
            let mut backend = Backend::open(&cli, &config).await?;
            let reply = backend
                .call(Message::UsageRequest(UsageRequest { path }))
                .await?;
            let usage = match reply {
                Message::UsageResponse(usage) => usage,
                other => bail!("unexpected reply: {:?}", other),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&usage)?);
            } else {
                println!("Total:       {}", format_size(usage.total_bytes));
                println!("Files:       {}", usage.file_count);
                println!("Directories: {}", usage.directory_count);
            }
        }
    }

    Ok(())
}

/// Install the tracing subscriber.
///
/// Logs go to stderr so command output on stdout stays parseable. With
/// `to_file`, a daily rolling log is also written under the data directory.
fn init_tracing(
    config: &Config,
    verbose: bool,
    to_file: bool,
) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = if to_file {
        let log_dir = config.log_dir();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
        let appender = tracing_appender::rolling::daily(&log_dir, "filevault.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// Serve the storage root until SIGTERM or SIGINT.
async fn run_server(config: Config, socket: &Path) -> anyhow::Result<()> {
    let service = StorageService::from_config(&config)?;
    if service.tenancy().mode() == TenancyMode::Single {
        service.provision(None)?;
    }
    let router = Arc::new(MessageRouter::new(Arc::new(service)));

    let server = StorageServer::bind(socket)
        .await
        .with_context(|| format!("Failed to bind socket: {}", socket.display()))?
        .with_request_timeout(Duration::from_secs(config.server.request_timeout_secs));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signals");
        }
        signal_token.cancel();
    });

    tracing::info!(
        root = %config.storage.root.display(),
        tenancy = ?config.storage.tenancy,
        "FileVault server starting"
    );
    server.serve(router, shutdown).await?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

/// Where requests go: the local engine, or a running server.
enum Backend {
    Local {
        router: MessageRouter,
        identity: Option<Identity>,
    },
    Remote(StorageClient),
}

impl Backend {
    async fn open(cli: &Cli, config: &Config) -> anyhow::Result<Self> {
        match &cli.socket {
            Some(socket) => {
                let timeout = Duration::from_secs(config.server.request_timeout_secs);
                let mut client = StorageClient::connect_with_timeout(socket, timeout)
                    .await
                    .with_context(|| format!("Cannot connect to server at {}", socket.display()))?;
                let reply = client
                    .request(Message::Bind(Bind {
                        identity: cli.identity.clone(),
                    }))
                    .await?;
                if let Message::Error(err) = reply {
                    bail!(render_error(&err));
                }
                Ok(Backend::Remote(client))
            }
            None => {
                let service = StorageService::from_config(config)?;
                let identity = cli.identity.as_deref().map(Identity::new).transpose()?;
                Ok(Backend::Local {
                    router: MessageRouter::new(Arc::new(service)),
                    identity,
                })
            }
        }
    }

    /// Send a request; error replies become `Err` with rendered text.
    async fn call(&mut self, message: Message) -> anyhow::Result<Message> {
        let reply = match self {
            Backend::Local { router, identity } => {
                match router.route(message, identity.as_ref()).await {
                    Ok(Some(reply)) => reply,
                    Ok(None) => bail!("request produced no reply"),
                    Err(e) => Message::Error(e.to_error_message(None)),
                }
            }
            Backend::Remote(client) => client.request(message).await?,
        };

        match reply {
            Message::Error(err) => Err(anyhow!(render_error(&err))),
            reply => Ok(reply),
        }
    }

    /// Upload `(name, local path)` pairs beneath `dest` in batches.
    async fn upload(
        &mut self,
        dest: &str,
        uploads: Vec<(String, PathBuf)>,
        max_batch_items: usize,
    ) -> anyhow::Result<Vec<FileUploadResult>> {
        let mut results = Vec::new();
        match self {
            Backend::Local { router, identity } => {
                // Local uploads stream straight from disk.
                let base = RelativePath::parse(dest)?;
                for batch in uploads.chunks(max_batch_items.max(1)) {
                    let service = Arc::clone(router.service());
                    let identity = identity.clone();
                    let base = base.clone();
                    let batch = batch.to_vec();
                    let result = tokio::task::spawn_blocking(move || {
                        let root = service.root_for(identity.as_ref())?;
                        let items = batch
                            .into_iter()
                            .map(|(name, path)| {
                                let file = File::open(&path)
                                    .with_context(|| format!("Failed to open {}", path.display()))?;
                                Ok(UploadItem::new(name, file))
                            })
                            .collect::<anyhow::Result<Vec<_>>>()?;
                        let report = service.ingest(&root, &base, items)?;
                        Ok::<_, anyhow::Error>(upload_result(&base, report))
                    })
                    .await??;
                    results.push(result);
                }
            }
            Backend::Remote(client) => {
                let mut batch: Vec<UploadPayload> = Vec::new();
                let mut batch_bytes = 0usize;
                for (name, path) in uploads {
                    let data = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    if data.len() > REMOTE_BATCH_BYTES {
                        bail!(
                            "{} is {}; files over {} must be uploaded without --socket",
                            path.display(),
                            format_size(data.len() as u64),
                            format_size(REMOTE_BATCH_BYTES as u64)
                        );
                    }
                    if !batch.is_empty()
                        && (batch.len() >= max_batch_items
                            || batch_bytes + data.len() > REMOTE_BATCH_BYTES)
                    {
                        results.push(send_batch(client, dest, std::mem::take(&mut batch)).await?);
                        batch_bytes = 0;
                    }
                    batch_bytes += data.len();
                    batch.push(UploadPayload { name, data });
                }
                if !batch.is_empty() {
                    results.push(send_batch(client, dest, batch).await?);
                }
            }
        }
        Ok(results)
    }
}

async fn send_batch(
    client: &mut StorageClient,
    dest: &str,
    items: Vec<UploadPayload>,
) -> anyhow::Result<FileUploadResult> {
    let reply = client
        .request(Message::FileUploadBatch(FileUploadBatch {
            path: dest.to_string(),
            items,
        }))
        .await?;
    match reply {
        Message::FileUploadResult(result) => Ok(result),
        Message::Error(err) => bail!(render_error(&err)),
        other => bail!("unexpected reply: {:?}", other),
    }
}

/// Expand the command-line paths into `(declared name, local path)` pairs.
///
/// A directory contributes every regular file beneath it, named relative to
/// the directory's parent so its structure is recreated on the server.
fn collect_uploads(paths: &[PathBuf]) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut uploads = Vec::new();
    for path in paths {
        let canonical = path
            .canonicalize()
            .with_context(|| format!("Cannot access {}", path.display()))?;
        let base_name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !canonical.is_dir() {
            uploads.push((base_name, canonical));
            continue;
        }

        for entry in WalkDir::new(&canonical)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&canonical)?;
            let mut name = base_name.clone();
            for component in relative.components() {
                name.push('/');
                name.push_str(&component.as_os_str().to_string_lossy());
            }
            uploads.push((name, entry.into_path()));
        }
    }
    Ok(uploads)
}

fn report_uploads(results: &[FileUploadResult]) -> anyhow::Result<()> {
    let mut stored = 0usize;
    let mut failed = 0usize;
    for result in results {
        for item in &result.committed {
            stored += 1;
            println!(
                "stored  {}  ({})  sha256:{}",
                item.stored_path,
                format_size(item.size),
                item.sha256
            );
        }
        for item in &result.failed {
            failed += 1;
            eprintln!(
                "failed  {}: {}",
                item.original_name,
                describe_code(item.code)
            );
        }
    }

    if failed > 0 {
        bail!("{} of {} files failed to upload", failed, stored + failed);
    }
    Ok(())
}

/// Local file name for a download when `--output` is not given.
fn default_output(path: &str) -> anyhow::Result<PathBuf> {
    let rel = RelativePath::parse(path)?;
    match rel.file_name() {
        Some(name) => Ok(PathBuf::from(name)),
        None => bail!("{}", describe_code(ErrorCode::NotAFile)),
    }
}

/// Download `path` chunk by chunk into `output`. Returns bytes written.
async fn download(backend: &mut Backend, path: &str, output: &Path) -> anyhow::Result<u64> {
    let mut file: Option<tokio::fs::File> = None;
    let mut offset = 0u64;

    loop {
        let reply = backend
            .call(Message::FileDownloadRequest(FileDownloadRequest {
                path: path.to_string(),
                offset,
                chunk_size: DEFAULT_CHUNK_SIZE,
            }))
            .await?;
        let chunk = match reply {
            Message::FileDownloadChunk(chunk) => chunk,
            other => bail!("unexpected reply: {:?}", other),
        };

        // Only create the output once the server has accepted the request.
        if file.is_none() {
            let created = tokio::fs::File::create(output)
                .await
                .with_context(|| format!("Failed to create {}", output.display()))?;
            file = Some(created);
        }
        if let Some(out) = file.as_mut() {
            out.write_all(&chunk.data).await?;
        }
        offset += chunk.data.len() as u64;

        if chunk.is_last {
            break;
        }
        if chunk.data.is_empty() {
            bail!("download of {} stalled at {} bytes", path, offset);
        }
    }

    if let Some(mut out) = file {
        out.flush().await?;
    }
    Ok(offset)
}

fn print_entries(entries: &[FileEntry]) {
    if entries.is_empty() {
        println!("(empty)");
        return;
    }

    for entry in entries {
        let (marker, size) = match entry.entry_type {
            FileEntryType::Directory => ("d", "-".to_string()),
            FileEntryType::File => ("f", format_size(entry.size.unwrap_or(0))),
        };
        println!(
            "{}  {:>12}  {:>8}  {}",
            marker,
            size,
            format_relative_time(entry.modified),
            entry.name
        );
    }
}

/// Human-readable text for an error reply.
fn render_error(err: &ErrorMessage) -> String {
    match &err.context {
        Some(context) => format!("{} ({}): {}", describe_code(err.code), context, err.message),
        None => format!("{}: {}", describe_code(err.code), err.message),
    }
}

fn describe_code(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Unknown => "Unknown error",
        ErrorCode::Unauthorized => "No storage for this identity",
        ErrorCode::PathEscape => "Path is outside the storage root",
        ErrorCode::NotFound => "No such file or directory",
        ErrorCode::AlreadyExists => "Already exists",
        ErrorCode::PermissionDenied => "Permission denied",
        ErrorCode::InvalidName => "Invalid name",
        ErrorCode::NotADirectory => "Not a directory",
        ErrorCode::NotAFile => "Not a file",
        ErrorCode::NoValidFiles => "No valid files selected",
        ErrorCode::FileTooLarge => "File too large",
        ErrorCode::InvalidRequest => "Invalid request",
        ErrorCode::IoError => "I/O error",
        ErrorCode::InternalError => "Internal server error",
        ErrorCode::Timeout => "Request timed out",
        ErrorCode::VersionMismatch => "Server speaks a different protocol version",
    }
}

/// Format a byte count as Bytes, KB or MB.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;

    if bytes < KB {
        format!("{} Bytes", bytes)
    } else if bytes < MB {
        format!("{} KB", round2(bytes as f64 / KB as f64))
    } else {
        format!("{} MB", round2(bytes as f64 / MB as f64))
    }
}

/// Two decimal places, trailing zeros dropped (but at least one kept).
fn round2(value: f64) -> String {
    let text = format!("{:.2}", value);
    let trimmed = text.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{}0", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Format a Unix timestamp as relative time (e.g., "5m ago").
fn format_relative_time(timestamp: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let elapsed = now.saturating_sub(timestamp);

    if elapsed < 60 {
        format!("{}s ago", elapsed)
    } else if elapsed < 3600 {
        format!("{}m ago", elapsed / 60)
    } else if elapsed < 86400 {
        format!("{}h ago", elapsed / 3600)
    } else {
        format!("{}d ago", elapsed / 86400)
    }
}
