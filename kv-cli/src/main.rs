use std::net::SocketAddr;
use std::panic;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use memkv::Storage;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::Mutex;

use memkv_cli::config::Config;
use memkv_cli::server::{http, protocol};
use memkv_cli::trace;

#[derive(Debug, Parser)]
#[command(version, author, about = "A durable, memcached-protocol-compatible key-value store daemon")]
pub struct Args {
    /// Path to the checkpoint database file.
    db_path: PathBuf,

    /// Bind address for the memcached text-protocol listener.
    #[clap(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port for the memcached text-protocol listener.
    #[clap(long, default_value_t = 11211)]
    port: u16,

    /// Configuration file path.
    #[clap(short = 'c', long = "config", default_value = "memkv.yaml")]
    config: PathBuf,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
pub async fn main() -> Result<()> {
    setup_panic_hooks();

    let args = Args::parse();

    let log_dir = format!("{}/.memkvd", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = trace::init_logging(&log_dir, &args.log_level).await?;
    info!("memkvd starting with args: {:?}", &args);

    let config = Config::load(&args.config).with_context(|| format!("loading config from {}", args.config.display()))?;
    info!("memkvd config: {:?}", &config);

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus metrics recorder")?;

    let storage = Storage::open(&args.db_path, &config.commit_log_path)
        .with_context(|| format!("opening storage at {} / {}", args.db_path.display(), config.commit_log_path.display()))?;
    let storage = Arc::new(Mutex::new(storage));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let flush_interval = std::time::Duration::from_secs(config.flush_interval_secs);
    let flush_handle = tokio::spawn(memkv::flush::run(storage.clone(), flush_interval, shutdown_rx));

    let http_addr: SocketAddr = format!("{}:{}", config.http_bind, config.http_port)
        .parse()
        .context("parsing http_bind/http_port")?;
    let http_storage = storage.clone();
    let http_metrics = metrics_handle.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(http_addr, http_storage, http_metrics).await {
            log::error!("http inspection endpoint exited: {err}");
        }
    });

    let bind_addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse().context("parsing --bind/--port")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding memcached listener on {bind_addr}"))?;
    info!("memkvd listening on {bind_addr}, http inspection on {http_addr}");

    let accept_storage = storage.clone();
    let mut accept_shutdown = shutdown_tx.subscribe();
    let accept_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let storage = accept_storage.clone();
                            tokio::spawn(async move {
                                log::debug!("connection from {peer}");
                                protocol::handle_connection(socket, storage).await;
                            });
                        }
                        Err(err) => log::warn!("accept failed: {err}"),
                    }
                }
                _ = accept_shutdown.changed() => break,
            }
        }
    });

    wait_for_ctrl_c().await?;
    info!("received shutdown signal, draining");

    let _ = shutdown_tx.send(true);
    let _ = accept_handle.await;
    // The HTTP listener has no graceful-shutdown hook wired (axum::serve
    // runs until the process exits); abort it rather than awaiting a
    // future that would otherwise never resolve.
    http_handle.abort();

    {
        let mut guard = storage.lock().await;
        if let Err(err) = guard.flush() {
            log::error!("final flush on shutdown failed: {err}");
        }
    }
    let _ = flush_handle.await;

    info!("memkvd shut down cleanly");
    Ok(())
}

async fn wait_for_ctrl_c() -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("installing Ctrl-C handler")?;

    tokio::task::spawn_blocking(move || rx.recv()).await.context("joining Ctrl-C watcher task")?.ok();
    Ok(())
}

fn setup_panic_hooks() {
    let meta = human_panic::Metadata {
        version: env!("CARGO_PKG_VERSION").into(),
        name: env!("CARGO_PKG_NAME").into(),
        authors: env!("CARGO_PKG_AUTHORS").replace(':', ", ").into(),
        homepage: env!("CARGO_PKG_HOMEPAGE").into(),
    };

    let default_hook = panic::take_hook();

    if std::env::var("RUST_BACKTRACE").is_err() {
        panic::set_hook(Box::new(move |info: &panic::PanicInfo| {
            default_hook(info);
            let file_path = human_panic::handle_dump(&meta, info);
            human_panic::print_msg(file_path, &meta).expect("human-panic: printing error message to console failed");
        }));
    }
}
