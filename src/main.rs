//! trend-digest: collect, score, alert and digest from the command line, or
//! serve the same commands over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trend_digest::commands::{self, Command, CommandOutcome};
use trend_digest::config::AppConfig;
use trend_digest::metrics::Metrics;
use trend_digest::App;

#[derive(Parser)]
#[command(name = "trend-digest", about = "Keyword trend detection and digests")]
struct Cli {
    /// Config file (defaults to $TREND_CONFIG_PATH, then config/trends.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Store counts, source health and the latest trends
    Status,
    /// Collect, score and build a digest
    Digest {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        skip_collect: bool,
        #[arg(long)]
        send: bool,
    },
    /// Build a digest and deliver it
    Send {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        skip_collect: bool,
    },
    /// Collect, score and evaluate alerts
    Event {
        #[arg(long)]
        skip_collect: bool,
        #[arg(long)]
        send: bool,
    },
    Keyword {
        #[command(subcommand)]
        action: KeywordAction,
    },
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },
    /// Free-text command, same grammar as POST /command
    Command { text: Vec<String> },
    /// Retry queued messages
    FlushOutbox,
    /// Run the HTTP server
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
}

#[derive(Subcommand)]
enum KeywordAction {
    Add { keyword: Vec<String> },
    Remove { keyword: Vec<String> },
}

#[derive(Subcommand)]
enum SourceAction {
    On { id: String },
    Off { id: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trend_digest=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn print(outcome: &CommandOutcome) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(outcome).context("serializing outcome")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config_path = AppConfig::resolve_path(cli.config.as_deref());
    tracing::debug!(config = %config_path.display(), "loading config");
    let mut app = App::open(&config_path).await?;
    let now = Utc::now();

    let command = match cli.cmd {
        Cmd::Serve { bind } => {
            Metrics::init()?;
            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            tracing::info!(%bind, "serving");
            axum::serve(listener, trend_digest::router(app))
                .await
                .context("http server")?;
            return Ok(());
        }
        Cmd::Command { text } => {
            let outcome = commands::run_text(&mut app, &text.join(" "), now).await?;
            print(&outcome)?;
            if !outcome.success {
                std::process::exit(1);
            }
            return Ok(());
        }
        Cmd::Status => Command::Status,
        Cmd::Digest {
            force,
            skip_collect,
            send,
        } => Command::Digest {
            force,
            skip_collect,
            send,
        },
        Cmd::Send {
            force,
            skip_collect,
        } => Command::Digest {
            force,
            skip_collect,
            send: true,
        },
        Cmd::Event { skip_collect, send } => Command::Event { skip_collect, send },
        Cmd::Keyword { action } => {
            let (add, words) = match action {
                KeywordAction::Add { keyword } => (true, keyword),
                KeywordAction::Remove { keyword } => (false, keyword),
            };
            let verb = if add { "add" } else { "remove" };
            match commands::parse(&format!("keyword {verb} {}", words.join(" "))) {
                Ok(c) => c,
                Err(e) => {
                    print(&CommandOutcome::error(&e))?;
                    std::process::exit(2);
                }
            }
        }
        Cmd::Source { action } => match action {
            SourceAction::On { id } => Command::SourceOn(id),
            SourceAction::Off { id } => Command::SourceOff(id),
        },
        Cmd::FlushOutbox => Command::FlushOutbox,
    };

    let outcome = commands::execute(&mut app, command, now).await?;
    print(&outcome)?;
    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}
