use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use shared::config::{LiveConfig, load_config};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use server::handlers::http::build_router;
use server::identity::JwtIdentityProvider;
use server::identity::password::hash_password;
use server::{AppState, app_service, request_body};

/// How often expired refresh tokens are swept from memory.
const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(name = "server", about = "Dashboard access gateway")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a password from stdin and print its argon2 PHC string for the
    /// `[[users]]` table.
    HashPassword,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Some(Command::HashPassword) = cli.command {
        let mut password = String::new();
        std::io::stdin()
            .read_to_string(&mut password)
            .context("Failed to read password from stdin")?;
        let phc = hash_password(password.trim_end_matches(['\r', '\n']))?;
        println!("{}", phc);
        return Ok(());
    }

    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;
    let secret = config
        .auth
        .resolved_jwt_secret()
        .context("No JWT secret configured")?;
    let addr = config.server.addr();
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);

    info!(
        "Loaded {} user(s); admin prefix {}, client prefix {}",
        config.users.len(),
        config.routes.admin_prefix,
        config.routes.client_prefix
    );

    let live = LiveConfig::new(config);
    let identity = Arc::new(JwtIdentityProvider::new(live.clone(), secret));
    let state = AppState::new(live.clone(), identity.clone());

    spawn_reload_on_sighup(live.clone(), cli.config.clone());
    spawn_refresh_token_pruner(identity);

    let app = app_service(state, build_router(), request_timeout);
    let service = ServiceBuilder::new()
        .map_request(|req: Request<Incoming>| req.map(request_body))
        .service(app);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        };

        let io = TokioIo::new(stream);
        let service = TowerToHyperService::new(service.clone());

        // Boxed so `Send` is proven with concrete types; rustc's higher-ranked
        // inference otherwise fails on the service stack inside the task.
        let conn: std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), hyper::Error>> + Send>,
        > = Box::pin(
            http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, service),
        );

        tokio::task::spawn(async move {
            if let Err(err) = conn.await
            {
                warn!("Error serving connection from {}: {:?}", peer, err);
            }
        });
    }

    info!("Server closed");
    Ok(())
}

/// Re-read the config file on SIGHUP. A file that fails validation is
/// logged and the running config stays in place.
#[cfg(unix)]
fn spawn_reload_on_sighup(live: LiveConfig, path: String) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };

        while hangup.recv().await.is_some() {
            match load_config(&path) {
                Ok(next) => {
                    live.reload(next).await;
                    info!("Configuration reloaded from {}", path);
                }
                Err(e) => error!("Config reload failed, keeping current config: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_live: LiveConfig, _path: String) {}

fn spawn_refresh_token_pruner(identity: Arc<JwtIdentityProvider>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            identity.prune().await;
        }
    });
}
