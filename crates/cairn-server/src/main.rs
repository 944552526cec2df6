mod error;
mod handlers;
mod state;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use cairn_core::backend::fs::FsBackend;
use cairn_core::repository::Repository;

use crate::state::AppState;

#[derive(Parser)]
#[command(
    name = "cairn-server",
    version,
    about = "HTTP API for cairn repositories",
    after_help = "\
Environment variables:
  CAIRN_REPOSITORY   Repository path (overridden by the positional argument)
  CAIRN_PASSPHRASE   Repository passphrase (skips interactive prompt)"
)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:9640")]
    listen: String,

    /// Repository path (defaults to CAIRN_REPOSITORY)
    repository: Option<String>,

    /// Log output format: "json" or "pretty"
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.log_format.as_str() {
        "json" => tracing_subscriber::fmt().json().init(),
        _ => tracing_subscriber::fmt().init(),
    }

    let repository = cli
        .repository
        .or_else(|| std::env::var("CAIRN_REPOSITORY").ok())
        .unwrap_or_else(|| {
            eprintln!("Error: no repository given (argument or CAIRN_REPOSITORY)");
            std::process::exit(1);
        });
    let passphrase = std::env::var("CAIRN_PASSPHRASE").ok();

    let repo = tokio::task::spawn_blocking(move || {
        Repository::open(Box::new(FsBackend::new(&repository)), passphrase.as_deref())
    })
    .await
    .expect("repository open task panicked")
    .unwrap_or_else(|e| {
        eprintln!("Error: cannot open repository: {e}");
        std::process::exit(2);
    });

    let app = handlers::router(AppState::new(repo));
    let listener = TcpListener::bind(&cli.listen).await.unwrap_or_else(|e| {
        eprintln!("Error: cannot bind {}: {e}", cli.listen);
        std::process::exit(1);
    });
    info!(listen = %cli.listen, "cairn-server listening");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Error: server failed: {e}");
        std::process::exit(2);
    }
}
