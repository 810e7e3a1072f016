use std::sync::Arc;

use anyhow::Context;
use secrecy::ExposeSecret;

use inbox_sentinel::config::Config;
use inbox_sentinel::mailbox::ImapSession;
use inbox_sentinel::oracle::{OllamaOracle, Oracle};
use inbox_sentinel::pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  required: SENTINEL_IMAP_HOST, SENTINEL_IMAP_USER, SENTINEL_IMAP_PASSWORD");
        std::process::exit(1);
    });

    eprintln!("📬 Inbox Sentinel v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {} on {}", config.mailbox, config.imap_host);
    eprintln!(
        "   Window: last {} day(s), {}",
        config.days_back,
        if config.use_sentdate { "by sent date" } else { "by arrival" }
    );
    eprintln!("   Model: {} at {}", config.oracle_model, config.oracle_url);
    eprintln!(
        "   Triage: {}, drafts: {}\n",
        if config.auto_triage { "on" } else { "off" },
        if config.auto_draft { "on" } else { "off" },
    );

    let oracle: Arc<dyn Oracle> = Arc::new(
        OllamaOracle::new(
            config.oracle_url.clone(),
            config.oracle_model.clone(),
            config.oracle_timeout,
        )
        .context("building the model client")?,
    );

    let host = config.imap_host.clone();
    let port = config.imap_port;
    let user = config.username.clone();
    let password = config.password.clone();
    let connect = move || {
        let mut session = ImapSession::connect(&host, port)?;
        session.login(&user, password.expose_secret())?;
        Ok(session)
    };

    let summary = pipeline::run(&config, oracle, connect)
        .await
        .context("triage run failed")?;

    eprintln!("\n✅ Run complete");
    eprintln!(
        "   Threads: {} from {} messages ({} ok, {} repaired, {} fallback)",
        summary.threads, summary.fetched, summary.ok, summary.repaired, summary.fallback,
    );
    if summary.drafts.generated + summary.drafts.skipped + summary.drafts.failed > 0 {
        eprintln!(
            "   Drafts: {} generated, {} skipped, {} failed",
            summary.drafts.generated, summary.drafts.skipped, summary.drafts.failed,
        );
    }
    if let Some(saves) = &summary.draft_saves {
        eprintln!("   Draft saves: {} saved, {} failed", saves.saved, saves.failed);
        for error in &saves.errors {
            eprintln!("     ! {}", error);
        }
    }
    if let Some(sort) = &summary.sort {
        eprintln!(
            "   Triage: {} filed, {} already sorted, {} failed",
            sort.processed, sort.skipped, sort.failed,
        );
        for error in &sort.errors {
            eprintln!("     ! {}", error);
        }
    }
    eprintln!("   Report: {}", summary.sorted_path.display());

    Ok(())
}
