use std::sync::Arc;

use anyhow::Context;

use hextask::auth::SessionManager;
use hextask::cli::Repl;
use hextask::config::{BoardConfig, ServiceConfig};
use hextask::documents::DocumentLibrary;
use hextask::store::{Backend, RestBackend};
use hextask::tasks::Board;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let service = ServiceConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export HEXTASK_URL=https://<project>.example.co");
        eprintln!("  export HEXTASK_ANON_KEY=<anon key>");
        std::process::exit(1);
    });
    let board_config = BoardConfig::from_env()?;

    let (email, password) = match (
        std::env::var("HEXTASK_EMAIL"),
        std::env::var("HEXTASK_PASSWORD"),
    ) {
        (Ok(email), Ok(password)) => (email, password),
        _ => {
            eprintln!("Error: HEXTASK_EMAIL and HEXTASK_PASSWORD must be set");
            std::process::exit(1);
        }
    };

    eprintln!("📋 HexTask v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", service.url);
    eprintln!("   Bucket: {}", service.bucket);
    eprintln!("   Reorder: {:?}", board_config.reorder_policy);

    let backend: Arc<dyn Backend> =
        Arc::new(RestBackend::new(&service).context("Failed to build HTTP client")?);

    // ── Session ─────────────────────────────────────────────────────────
    let sessions = Arc::new(SessionManager::new(Arc::clone(&backend)));
    let session = sessions
        .sign_in(&email, &password)
        .await
        .with_context(|| format!("Sign-in as {email} failed"))?;
    eprintln!("   Signed in: {}", session.email.as_deref().unwrap_or(&email));

    // ── Board + documents ───────────────────────────────────────────────
    let board = Board::new(Arc::clone(&backend), board_config);
    let library = DocumentLibrary::new(Arc::clone(&backend));
    let (tasks, docs) = futures::join!(board.load(), library.refresh());
    if let Err(e) = tasks {
        eprintln!("   Warning: could not load tasks: {e}");
    }
    if let Err(e) = docs {
        eprintln!("   Warning: could not load documents: {e}");
    }
    eprintln!("   Type `help` for commands, `quit` to exit.\n");

    Repl::new(board, library, sessions).run().await?;
    Ok(())
}
