mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use vaultctl::auth::{resolve_credentials, Credentials, SessionStore};
use vaultctl::client::{ArchiveClient, ClientConfig};
use vaultctl::common::config::{self, AppConfig};
use vaultctl::common::progress::{BatchProgress, ByteProgress};
use vaultctl::common::{ArchiveFormat, OperationSummary, OverwritePolicy};
use vaultctl::exam::classify_exam_root;
use vaultctl::transfer::{
    check_unique_paths, extract_session_archives, split_fixed, BatchProgressFn, ByteProgressFn,
    DownloadOptions, Downloader, UploadDestination, Uploader,
};

#[derive(Parser)]
#[command(name = "vaultctl")]
#[command(about = "Client for scientific imaging archive servers", version)]
struct Cli {
    /// Archive server URL (falls back to VAULT_URL or the config file)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Username (falls back to VAULT_USER or the config file)
    #[arg(long, global = true)]
    username: Option<String>,

    /// Password (falls back to VAULT_PASS or the config file)
    #[arg(long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate and cache a session token
    Login,
    /// Invalidate the cached session
    Logout,
    /// Show the cached session
    Status,
    /// Check server connectivity
    Ping,
    /// Show the server-side identity for the current session
    Whoami,
    /// Classify an exam directory without uploading anything
    Classify {
        /// Exam root directory
        root: PathBuf,
    },
    /// Extract previously downloaded session archives in place
    Extract {
        /// Directory containing fetched .zip archives
        dir: PathBuf,
        /// Keep archives after extraction
        #[arg(long)]
        keep_archives: bool,
    },
    /// Upload an exam directory as batched archives
    Upload {
        /// Exam root directory
        root: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        session: String,
        /// Files per batch archive
        #[arg(long)]
        batch_size: Option<usize>,
        /// Concurrent batch uploads
        #[arg(long)]
        workers: Option<usize>,
        /// Archive format: tar or zip
        #[arg(long)]
        format: Option<String>,
        /// Overwrite policy: none, append, or delete
        #[arg(long)]
        overwrite: Option<String>,
    },
    /// Download from the archive
    #[command(subcommand)]
    Download(DownloadCommands),
}

#[derive(Subcommand)]
enum DownloadCommands {
    /// An entire imaging session (all scans)
    Session {
        /// Session label or accession ID
        session: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = ".")]
        output: PathBuf,
        /// Keep the fetched archive packed
        #[arg(long)]
        no_extract: bool,
        /// Keep the archive after extraction
        #[arg(long)]
        keep_archive: bool,
    },
    /// A subset of scans in one request
    Scans {
        session: String,
        /// Comma-separated scan IDs (or ALL)
        #[arg(long, value_delimiter = ',', required = true)]
        scans: Vec<String>,
        /// Restrict to one resource type (e.g. DICOM)
        #[arg(long)]
        resource: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = ".")]
        output: PathBuf,
        #[arg(long)]
        no_extract: bool,
        #[arg(long)]
        keep_archive: bool,
    },
    /// A named file resource
    Resource {
        session: String,
        resource: String,
        /// Scan ID for scan-level resources
        #[arg(long)]
        scan: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value = ".")]
        output: PathBuf,
        #[arg(long)]
        no_extract: bool,
        #[arg(long)]
        keep_archive: bool,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        output::print_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load_config()?;
    let Cli {
        url,
        username,
        password,
        command,
    } = cli;

    match command {
        Commands::Login => {
            let client = build_client(&url, username, password, &config, true)?;
            let sp = output::spinner("Authenticating");
            match client.authenticate().await {
                Ok(_) => {
                    output::finish_spinner_success(
                        &sp,
                        &format!("Logged in to {}", client.base_url()),
                    );
                }
                Err(err) => {
                    output::finish_spinner_error(&sp, "Authentication failed");
                    return Err(err.into());
                }
            }
        }

        Commands::Logout => {
            let client = build_client(&url, username, password, &config, false)?;
            let cleared = client.logout().await;
            if cleared {
                output::print_success("Session cleared");
            } else {
                println!("No cached session");
            }
        }

        Commands::Status => {
            let store = SessionStore::default_location();
            match store.load(None) {
                Some(session) => {
                    println!("Server:   {}", session.url);
                    println!("User:     {}", session.username);
                    println!("Created:  {}", session.created_at.to_rfc3339());
                    match session.expires_at {
                        Some(expires_at) => println!("Expires:  {}", expires_at.to_rfc3339()),
                        None => println!("Expires:  unknown"),
                    }
                }
                None => println!("No cached session"),
            }
        }

        Commands::Ping => {
            let client = build_client(&url, username, password, &config, false)?;
            let sp = output::spinner("Contacting server");
            match client.ping().await {
                Ok(status) => {
                    output::finish_spinner_success(
                        &sp,
                        &format!(
                            "{} (version {}, {} ms)",
                            status.url, status.version, status.latency_ms
                        ),
                    );
                }
                Err(err) => {
                    output::finish_spinner_error(&sp, "Server unreachable");
                    return Err(err.into());
                }
            }
        }

        Commands::Whoami => {
            let client = build_client(&url, username, password, &config, false)?;
            let login = client.whoami().await?;
            println!("{login}");
        }

        Commands::Extract { dir, keep_archives } => {
            let (extracted, errors) = extract_session_archives(&dir, !keep_archives);
            if errors.is_empty() {
                output::print_success(&format!("Extracted {extracted} archive(s)"));
            } else {
                println!("Extracted: {extracted}, failed: {}", errors.len());
                for error in &errors {
                    output::print_error(error);
                }
                std::process::exit(1);
            }
        }

        Commands::Classify { root } => {
            let result = classify_exam_root(&root)?;
            println!("DICOM-like files:     {}", result.dicom_files.len());
            println!("Resource directories: {}", result.resource_dirs.len());
            for dir in &result.resource_dirs {
                println!("  {}", dir.display());
            }
            println!("Misc files:           {}", result.misc_files.len());
            for file in &result.misc_files {
                println!("  {}", file.display());
            }
        }

        Commands::Upload {
            root,
            project,
            subject,
            session,
            batch_size,
            workers,
            format,
            overwrite,
        } => {
            let classification = classify_exam_root(&root)?;
            let files = classification.dicom_files;
            if files.is_empty() {
                bail!("no DICOM-like files found under {}", root.display());
            }
            check_unique_paths(&files)?;

            let batch_size = batch_size.unwrap_or(config.transfer.batch_size);
            let workers = workers.unwrap_or(config.transfer.upload_workers);
            let format: ArchiveFormat = match format {
                Some(raw) => raw.parse()?,
                None => config.transfer.archive_format,
            };
            let overwrite: OverwritePolicy = match overwrite {
                Some(raw) => raw.parse()?,
                None => config.transfer.overwrite,
            };

            let batches = split_fixed(&files, batch_size);
            println!(
                "Uploading {} files in {} batches ({} workers)",
                files.len(),
                batches.len(),
                workers
            );

            let client = build_client(&url, username, password, &config, false)?;
            let uploader = Uploader::new(Arc::clone(&client), workers, format);
            let destination = UploadDestination {
                project,
                subject,
                session,
                overwrite,
                direct_archive: config.transfer.direct_archive,
            };

            let bar = output::batch_bar(batches.len() as u64);
            let bar_for_updates = bar.clone();
            let progress: BatchProgressFn = Arc::new(move |p: BatchProgress| {
                bar_for_updates.set_position(p.completed as u64);
                if !p.success {
                    bar_for_updates.set_message(format!("batch {} failed", p.batch_id));
                }
            });

            let summary = uploader
                .upload_batches(batches, &root, &destination, Some(progress))
                .await;
            bar.finish_and_clear();

            finish_operation("Upload", &summary);
        }

        Commands::Download(download) => {
            let (summary, label) = match download {
                DownloadCommands::Session {
                    session,
                    project,
                    output,
                    no_extract,
                    keep_archive,
                } => {
                    let client = build_client(&url, username, password, &config, false)?;
                    let downloader = Downloader::new(client);
                    let options = download_options(output, no_extract, keep_archive);
                    let (bar, progress) = byte_progress();
                    let summary = downloader
                        .download_session(project.as_deref(), &session, &options, Some(progress))
                        .await;
                    bar.finish_and_clear();
                    (summary, "Download")
                }
                DownloadCommands::Scans {
                    session,
                    scans,
                    resource,
                    project,
                    output,
                    no_extract,
                    keep_archive,
                } => {
                    let client = build_client(&url, username, password, &config, false)?;
                    let downloader = Downloader::new(client);
                    let options = download_options(output, no_extract, keep_archive);
                    let (bar, progress) = byte_progress();
                    let summary = downloader
                        .download_scans(
                            project.as_deref(),
                            &session,
                            &scans,
                            resource.as_deref(),
                            &options,
                            Some(progress),
                        )
                        .await;
                    bar.finish_and_clear();
                    (summary, "Download")
                }
                DownloadCommands::Resource {
                    session,
                    resource,
                    scan,
                    project,
                    output,
                    no_extract,
                    keep_archive,
                } => {
                    let client = build_client(&url, username, password, &config, false)?;
                    let downloader = Downloader::new(client);
                    let options = download_options(output, no_extract, keep_archive);
                    let (bar, progress) = byte_progress();
                    let summary = downloader
                        .download_resource(
                            project.as_deref(),
                            &session,
                            scan.as_deref(),
                            &resource,
                            &options,
                            Some(progress),
                        )
                        .await;
                    bar.finish_and_clear();
                    (summary, "Download")
                }
            };

            finish_operation(label, &summary);
        }
    }

    Ok(())
}

fn build_client(
    url: &Option<String>,
    username: Option<String>,
    password: Option<String>,
    config: &AppConfig,
    interactive: bool,
) -> Result<Arc<ArchiveClient>> {
    let base_url = url
        .clone()
        .or_else(config::url_from_env)
        .or_else(|| config.server.url.clone())
        .context("no server URL configured; pass --url, set VAULT_URL, or add it to the config file")?;

    let credentials = resolve_credentials(
        username,
        password,
        config.server.username.clone(),
        config.server.password.clone(),
    );
    let credentials = match (credentials, interactive) {
        (Some(credentials), _) => Some(credentials),
        (None, true) => Some(prompt_credentials()?),
        (None, false) => None,
    };

    let mut client_config = ClientConfig::new(base_url);
    client_config.verify_ssl = config.server.verify_ssl;
    client_config.timeout = Duration::from_secs(config.server.timeout_secs);

    let store = SessionStore::default_location();
    let client = ArchiveClient::new(client_config, store, credentials)?;
    Ok(Arc::new(client))
}

fn prompt_credentials() -> Result<Credentials> {
    let username: String = dialoguer::Input::new()
        .with_prompt("Username")
        .interact_text()
        .context("failed to read username")?;
    let password = dialoguer::Password::new()
        .with_prompt("Password")
        .interact()
        .context("failed to read password")?;
    Ok(Credentials { username, password })
}

fn download_options(output: PathBuf, no_extract: bool, keep_archive: bool) -> DownloadOptions {
    let mut options = DownloadOptions::new(output);
    options.extract = !no_extract;
    options.cleanup = !keep_archive;
    options
}

fn byte_progress() -> (indicatif::ProgressBar, ByteProgressFn) {
    let bar = output::byte_spinner();
    let bar_for_updates = bar.clone();
    let progress: ByteProgressFn = Arc::new(move |p: ByteProgress| {
        bar_for_updates.set_position(p.received);
    });
    (bar, progress)
}

fn finish_operation(label: &str, summary: &OperationSummary) {
    output::print_summary(label, summary);
    if !summary.success() {
        std::process::exit(1);
    }
}
