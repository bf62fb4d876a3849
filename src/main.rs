use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

// Added for tracing file logging
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use sendfile::config::AppConfig;
use sendfile::file_transfer::{Requester, SessionOptions, TransferError};
use sendfile::network::{FileServer, TcpTransport};
use sendfile::utils::format_size;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON config file; missing file means defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write daily rolling logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve files from a directory, one file per connection
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind to
        #[arg(short, long)]
        bind: Option<IpAddr>,

        /// Directory requested names are resolved against
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Seconds a session may stall on one read or write (0 disables)
        #[arg(long)]
        idle_timeout: Option<u64>,
    },
    /// Fetch one file from a server
    Fetch {
        /// Server host name or IP
        host: String,

        /// Server port
        port: u16,

        /// Name of the file on the server
        remote: String,

        /// Where to write the file locally
        local: PathBuf,

        /// Seconds the transfer may stall on one read or write
        #[arg(long)]
        idle_timeout: Option<u64>,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },
}

// Function to initialize tracing and optional file logging
// Returns a WorkerGuard that must be kept alive for logs to be written
fn init_logging(log_dir: Option<&Path>, log_file_prefix: &str) -> anyhow::Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var, default to info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, log_file_prefix);
            let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking_appender)
                .with_ansi(false); // Don't use ANSI codes in files
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let prefix = match &cli.command {
        Commands::Serve { .. } => "sendfile_server",
        Commands::Fetch { .. } => "sendfile_client",
    };
    // This guard needs to stay in scope, otherwise logs stop writing.
    let _guard = init_logging(cli.log_dir.as_deref(), prefix)?;

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            root,
            idle_timeout,
        } => {
            if let Some(p) = port {
                config.network.port = p;
            }
            if let Some(ip) = bind {
                config.network.bind_ip = ip;
            }
            if let Some(dir) = root {
                config.transfer.serve_root = dir;
            }
            if let Some(secs) = idle_timeout {
                config.transfer.idle_timeout_secs = secs;
            }
            config.validate()?;

            let server = FileServer::bind(&config)
                .await
                .with_context(|| format!("binding {}", config.network.get_socket_addr()))?;
            println!("server is ready at port: {}", server.local_addr()?.port());

            let summary = server.run_until(shutdown_signal()).await?;
            println!(
                "served {} connection(s): {} completed, {} not found, {} failed, {} aborted",
                summary.accepted, summary.completed, summary.not_found, summary.failed, summary.aborted
            );
        }
        Commands::Fetch {
            host,
            port,
            remote,
            local,
            idle_timeout,
            no_progress,
        } => {
            let mut options = SessionOptions::from(&config.transfer);
            options.idle_timeout = idle_timeout.filter(|s| *s > 0).map(Duration::from_secs);

            let addr = format!("{}:{}", host, port);
            info!("Fetching {:?} from {} into {}", remote, addr, local.display());

            let pb = if no_progress {
                ProgressBar::hidden()
            } else {
                let pb = ProgressBar::new(0);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")?,
                );
                pb
            };

            let requester = Requester::new(TcpTransport::new(), options);
            let progress = pb.clone();
            let result = requester
                .fetch_with_progress(&addr, remote.as_str(), &local, move |cursor| {
                    progress.set_length(cursor.total());
                    progress.set_position(cursor.offset());
                })
                .await;

            match result {
                Ok(report) => {
                    pb.finish_and_clear();
                    println!(
                        "received {} ({}) in {:.2?}, speed = {:.2} Mbits/sec",
                        report.name,
                        format_size(report.bytes),
                        report.elapsed,
                        report.mbps()
                    );
                }
                Err(TransferError::RemoteFileNotFound { name }) => {
                    pb.abandon();
                    anyhow::bail!("no such file {} on the server", name);
                }
                Err(e) => {
                    pb.abandon();
                    if let Some(offset) = e.achieved_offset() {
                        eprintln!(
                            "kept {} of partial data in {}",
                            format_size(offset),
                            local.display()
                        );
                    }
                    return Err(e).with_context(|| format!("fetching {:?} from {}", remote, addr));
                }
            }
        }
    }

    Ok(())
}
