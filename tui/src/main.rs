use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use ratatui::DefaultTerminal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tui::app::{App, DASHBOARD_PATH, LOGIN_PATH};
use tui::identity::HttpIdentityClient;
use tui::navigator::Navigator;
use tui::session_store::SessionStore;

#[derive(Parser, Debug)]
#[command(name = "tui", about = "Terminal client for the site monitoring dashboard")]
struct Cli {
    /// Gateway base URL.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Write logs to this file. Without it logs are discarded, since the
    /// terminal belongs to the UI.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Give up on the start-up session check after this many milliseconds.
    #[arg(long, default_value_t = 3000)]
    resolve_timeout_ms: u64,

    /// Seconds between background session checks.
    #[arg(long, default_value_t = 60)]
    watch_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log.as_ref())?;

    let client = Arc::new(
        HttpIdentityClient::new(&cli.server, Duration::from_secs(10))
            .with_context(|| format!("Failed to create client for {}", cli.server))?,
    );
    let navigator = Navigator::new(DASHBOARD_PATH);
    let store = SessionStore::new(client.clone(), navigator.clone(), LOGIN_PATH);
    let tasks = store.start(Duration::from_millis(cli.resolve_timeout_ms));
    let watcher = client.spawn_watcher(Duration::from_secs(cli.watch_secs.max(1)));

    info!("Connecting to {}", cli.server);

    let mut app = App::new(store.clone(), navigator.clone());
    let terminal = ratatui::init();
    let result = run(terminal, &mut app, &store, &navigator).await;
    ratatui::restore();

    tasks.abort();
    watcher.abort();
    result
}

fn init_logging(path: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::sink)
                .init();
        }
    }
    Ok(())
}

async fn run(
    mut terminal: DefaultTerminal,
    app: &mut App<HttpIdentityClient>,
    store: &SessionStore<HttpIdentityClient>,
    navigator: &Navigator,
) -> Result<()> {
    let mut keys = spawn_key_reader();
    let mut sessions = store.subscribe();
    let mut paths = navigator.subscribe();

    loop {
        app.sync();
        terminal
            .draw(|f| app.draw(f))
            .context("Failed to draw frame")?;

        tokio::select! {
            key = keys.recv() => match key {
                Some(key) => {
                    if app.handle_key(key).await {
                        break;
                    }
                }
                None => break,
            },
            changed = sessions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = paths.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// crossterm's reader blocks, so it gets its own thread and feeds key
/// presses through a channel.
fn spawn_key_reader() -> mpsc::UnboundedReceiver<KeyEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            match event::poll(Duration::from_millis(200)) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                        if tx.send(key).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Terminal input failed: {}", e);
                        return;
                    }
                },
                Ok(false) => {
                    if tx.is_closed() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Terminal input failed: {}", e);
                    return;
                }
            }
        }
    });
    rx
}
