mod cli;
mod config;
mod contexts;
mod host;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::future::join_all;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use edge_interceptor::{EdgeInterceptor, FetchRequest, Interception};
use fetch_journal::{JournalEntry, JournalEvent, JournalSink};
use http::header::{HeaderName, HeaderValue};
use http::Method;

use crate::cli::Cli;
use crate::contexts::{ContextSettings, Contexts};
use crate::host::HostTransport;

const COMPONENT: &str = "tunnel-fetch";

/// How one fetch was carried.
#[derive(Debug, Clone, Copy)]
enum Route {
    Direct,
    Tunnel,
}

impl Route {
    fn as_str(self) -> &'static str {
        match self {
            Route::Direct => "direct",
            Route::Tunnel => "tunnel",
        }
    }
}

struct FetchReport {
    url: String,
    route: Route,
    outcome: Result<(u16, usize), String>,
}

/// Build the request for one URL from the command-line options.
fn build_request(
    url: &str,
    method: &str,
    headers: &[String],
    data: Option<&str>,
) -> Result<FetchRequest> {
    let url = Url::parse(url).with_context(|| format!("invalid url {url}"))?;
    let method = Method::from_bytes(method.as_bytes())
        .with_context(|| format!("invalid method {method}"))?;

    let mut request = FetchRequest::new(method, url);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("malformed header {header:?}, expected `name: value`"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .with_context(|| format!("invalid header name in {header:?}"))?;
        let value = HeaderValue::from_str(value.trim())
            .with_context(|| format!("invalid header value in {header:?}"))?;
        request = request.with_header(name, value);
    }
    if let Some(data) = data {
        request = request.with_body(data.as_bytes());
    }
    Ok(request)
}

async fn fetch_direct(
    client: &reqwest::Client,
    request: FetchRequest,
) -> Result<(u16, usize), String> {
    let scheme = request.url.scheme();
    if !matches!(scheme, "http" | "https") {
        return Err(format!("{scheme}: urls are resolved by the page, not fetched"));
    }

    let mut builder = client
        .request(request.method, request.url)
        .headers(request.headers);
    if !request.body.is_empty() {
        builder = builder.body(request.body);
    }

    let response = builder.send().await.map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(|e| e.to_string())?;
    Ok((status, body.len()))
}

/// Run one fetch through the worker and journal what happened.
async fn fetch_one(
    interceptor: &EdgeInterceptor,
    direct: &reqwest::Client,
    journal: &JournalSink,
    request: FetchRequest,
) -> FetchReport {
    let url = request.url.to_string();

    let (route, outcome) = match interceptor.handle_fetch(request).await {
        Ok(Interception::Passthrough(request)) => {
            journal
                .record(
                    JournalEntry::new(JournalEvent::FetchBypassed, COMPONENT, json!({}))
                        .with_url(&url),
                )
                .await;
            (Route::Direct, fetch_direct(direct, request).await)
        }
        Ok(Interception::Proxied {
            request_id,
            response,
        }) => {
            let status = response.status().as_u16();
            let bytes = response.body().len();
            journal
                .record(
                    JournalEntry::new(
                        JournalEvent::FetchProxied,
                        COMPONENT,
                        json!({ "status": status, "bytes": bytes }),
                    )
                    .with_request(request_id, &url),
                )
                .await;
            (Route::Tunnel, Ok((status, bytes)))
        }
        Err(err) => {
            let entry = JournalEntry::new(
                JournalEvent::FetchRejected,
                COMPONENT,
                json!({ "error": err.to_string() }),
            );
            let entry = match err.request_id() {
                Some(request_id) => entry.with_request(request_id, &url),
                None => entry.with_url(&url),
            };
            journal.record(entry).await;
            (Route::Tunnel, Err(err.to_string()))
        }
    };

    FetchReport {
        url,
        route,
        outcome,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let loaded = config::load(&cli.config)?;
    let config_found = loaded.is_some();
    let mut cfg = loaded.unwrap_or_default();

    if cli.no_parent {
        cfg.worker.parent_url = None;
    }
    if let Some(ref parent) = cli.parent {
        cfg.worker.parent_url = Some(Url::parse(parent).context("invalid parent url")?);
    }
    if let Some(ref proxy) = cli.proxy {
        cfg.transport.proxy_url = Some(proxy.clone());
    }

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    if !config_found {
        warn!(
            path = %cli.config.display(),
            "configuration file not found; using defaults"
        );
    }

    info!(
        config_file = %cli.config.display(),
        own_origin = %cfg.worker.own_origin,
        parent = cfg.worker.parent_url.as_ref().map(Url::as_str).unwrap_or("<unavailable>"),
        proxy = cfg.transport.proxy_url.as_deref().unwrap_or("<none>"),
        "tunnel-fetch starting"
    );

    // 4. Start the fetch journal.
    let (journal, journal_handle) = JournalSink::start(&cfg.logging.journal_path)
        .await
        .context("failed to start fetch journal")?;

    journal
        .record(JournalEntry::new(
            JournalEvent::ProcessStarted,
            COMPONENT,
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
                "urls": cli.urls.len(),
            }),
        ))
        .await;

    // 5. Build requests up front so bad input fails before anything runs.
    let requests = cli
        .urls
        .iter()
        .map(|url| build_request(url, &cli.method, &cli.headers, cli.data.as_deref()))
        .collect::<Result<Vec<_>>>()?;

    // 6. Set up shutdown signal (ctrl_c + SIGTERM).
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let shutdown_tx_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            info!("received SIGINT (ctrl-c)");
                        }
                        _ = sigterm.recv() => {
                            info!("received SIGTERM");
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "failed to register SIGTERM handler");
                    ctrl_c.await.ok();
                    info!("received SIGINT (ctrl-c)");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT (ctrl-c)");
        }

        let _ = shutdown_tx_signal.send(());
    });

    // 7. Start the worker, page and host contexts and register the worker.
    let host = Arc::new(HostTransport::new(&cfg.transport).context("failed to create host")?);
    let contexts = Contexts::spawn(ContextSettings::from_config(&cfg), host, &shutdown_tx);

    match contexts.relay().initialize().await {
        Some(registration) => {
            journal
                .record(JournalEntry::new(
                    JournalEvent::WorkerRegistered,
                    COMPONENT,
                    json!({
                        "script_url": registration.script_url,
                        "scope": registration.scope,
                    }),
                ))
                .await;
        }
        None => {
            warn!("fetch worker is not active; third-party requests will be rejected");
            journal
                .record(JournalEntry::new(
                    JournalEvent::RegistrationFailed,
                    COMPONENT,
                    json!({ "script_url": cfg.worker.script_url }),
                ))
                .await;
        }
    }

    // 8. Run every fetch concurrently, stopping early on a shutdown signal.
    let direct = reqwest::Client::new();
    let mut shutdown_rx = shutdown_tx.subscribe();
    let fetches = join_all(
        requests
            .into_iter()
            .map(|request| fetch_one(contexts.interceptor(), &direct, &journal, request)),
    );

    let reports = tokio::select! {
        reports = fetches => Some(reports),
        _ = shutdown_rx.recv() => {
            info!("interrupted before all fetches completed");
            None
        }
    };

    let mut failed = 0usize;
    let mut completed = 0usize;
    for report in reports.iter().flatten() {
        match &report.outcome {
            Ok((status, bytes)) => {
                completed += 1;
                println!("{}\t{}\t{}\t{} bytes", report.route.as_str(), status, report.url, bytes);
            }
            Err(err) => {
                failed += 1;
                println!("{}\tERR\t{}\t{}", report.route.as_str(), report.url, err);
            }
        }
    }

    // 9. Stop the contexts and log shutdown.
    let _ = shutdown_tx.send(());
    contexts.join().await;

    info!(completed, failed, "tunnel-fetch shutting down");

    journal
        .record(JournalEntry::new(
            JournalEvent::ProcessStopped,
            COMPONENT,
            json!({
                "completed": completed,
                "failed": failed,
                "interrupted": reports.is_none(),
            }),
        ))
        .await;

    drop(journal);
    if let Err(err) = journal_handle.await {
        warn!(%err, "journal writer task failed");
    }

    if failed > 0 {
        anyhow::bail!("{failed} fetch(es) failed");
    }
    Ok(())
}
