use std::sync::Arc;

use mailcast::annotate::Annotator;
use mailcast::classify::PassthroughClassifier;
use mailcast::config::{Config, WsBind};
use mailcast::parse::MailParserStage;
use mailcast::registry::MailboxRegistry;
use mailcast::reply::{LogMailer, Mailer, SmtpMailer};
use mailcast::route::DeliveryRouter;
use mailcast::smtp::{self, SmtpServer};
use mailcast::ws;

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

    let config = Config::from_env();

    eprintln!("📬 mailcast v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   SMTP: {}:{}", config.smtp_host, config.smtp_port);
    match &config.ws_bind {
        WsBind::Tcp(port) => eprintln!("   Relay: ws://{}:{}/email", config.host, port),
        WsBind::Unix(path) => eprintln!("   Relay: {}", path.display()),
    }
    eprintln!("   Domain: {}", config.domain);

    let registry = Arc::new(MailboxRegistry::new());

    let mailer: Arc<dyn Mailer> = match &config.outbound_relay {
        Some(relay) => {
            eprintln!("   Outbound relay: {relay}\n");
            Arc::new(SmtpMailer::new(relay))
        }
        None => {
            eprintln!("   Outbound relay: none (auto-replies logged only)\n");
            Arc::new(LogMailer)
        }
    };

    let router = Arc::new(DeliveryRouter::new(
        Arc::clone(&registry),
        mailer,
        config.domain.clone(),
    ));

    let annotator = Arc::new(Annotator::new(
        Arc::new(PassthroughClassifier),
        Arc::new(MailParserStage),
        config.classify_timeout,
    ));

    let tls = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => Some(smtp::tls_acceptor(cert, key)?),
        _ => None,
    };

    let smtp_listener =
        tokio::net::TcpListener::bind((config.smtp_host.as_str(), config.smtp_port)).await?;
    let smtp_server = Arc::new(SmtpServer::new(
        config.domain.clone(),
        annotator,
        router,
        tls,
    ));
    tokio::spawn(async move {
        if let Err(e) = smtp_server.serve(smtp_listener).await {
            tracing::error!(error = %e, "mail server terminated");
        }
    });

    ws::serve(&config.host, &config.ws_bind, registry).await?;
    Ok(())
}
