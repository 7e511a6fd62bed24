use std::sync::Arc;

use tracing::{info, warn};

use cleargate::core::config;
use cleargate::http;
use cleargate::session;
use cleargate::{AppState, Settings};

#[derive(Debug, Default)]
struct Flags {
    port: Option<u16>,
    /// Headless host: wrap every session in its own virtual display.
    server: bool,
    /// Silence per-round bypass logging.
    nolog: bool,
}

fn parse_flags() -> Flags {
    let mut flags = Flags::default();
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        match a.as_str() {
            "--port" => {
                if let Some(v) = args.next() {
                    if let Ok(p) = v.parse::<u16>() {
                        flags.port = Some(p);
                    }
                }
            }
            "--server" => flags.server = true,
            "--nolog" => flags.nolog = true,
            other => {
                if let Some(rest) = other.strip_prefix("--port=") {
                    if let Ok(p) = rest.parse::<u16>() {
                        flags.port = Some(p);
                    }
                }
            }
        }
    }
    flags
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let flags = parse_flags();
    let settings = Settings::from_env(flags.server, flags.nolog);
    info!(
        "Starting cleargate (server mode: {}, poll interval: {:?})",
        settings.server_mode, settings.poll_interval
    );

    // Preflight: the service still starts without a browser, but every
    // bypass request will fail until one is installed.
    match session::find_chrome_executable() {
        Some(exe) => info!("browser executable: {}", exe),
        None => warn!(
            "no Chromium-family browser found; set CHROME_EXECUTABLE or install Chrome/Chromium"
        ),
    }

    let state = Arc::new(AppState::new(settings));
    let app = http::router(state);

    let port: u16 = flags.port.or_else(config::port_from_env).unwrap_or(8000);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or run with --port {} (or set PORT/CLEARGATE_PORT).",
                bind_addr,
                port.saturating_add(1)
            )
        }
        Err(e) => return Err(e.into()),
    };
    info!("cleargate listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
