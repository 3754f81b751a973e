use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use leadgen::api::{self, AppState};
use leadgen::campaigns::CampaignRunner;
use leadgen::config::{AppConfig, MailProvider};
use leadgen::contacts::{ContactResolver, EmailScraper, PlacesContactResolver};
use leadgen::mail::{SendGridSender, SmtpSender};
use leadgen::oauth::GoogleOAuth;
use leadgen::places::{PlaceDirectory, PlacesClient};
use leadgen::store::{Database, LibSqlBackend};

/// Used when no places key is configured: every lookup finds nothing.
struct NoContacts;

#[async_trait::async_trait]
impl ContactResolver for NoContacts {
    async fn resolve_email(
        &self,
        _recipient: &leadgen::campaigns::Recipient,
    ) -> Result<Option<String>, leadgen::error::PlacesError> {
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing; keep the file guard alive for the whole process
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_target(false);
    let _file_guard = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "leadgen.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), provider = ?config.mail_provider, "Starting leadgen");

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    info!(path = %config.db_path.display(), "Database ready");

    // ── Places + contact lookup ─────────────────────────────────────────
    let scraper = EmailScraper::new();
    let places: Option<Arc<dyn PlaceDirectory>> = config
        .places_api_key
        .clone()
        .map(|key| Arc::new(PlacesClient::new(key)) as Arc<dyn PlaceDirectory>);
    let resolver: Arc<dyn ContactResolver> = match &places {
        Some(places) => Arc::new(PlacesContactResolver::new(Arc::clone(places), scraper.clone())),
        None => {
            warn!("GOOGLE_PLACES_API_KEY not set; places search and email lookup are disabled");
            Arc::new(NoContacts)
        }
    };

    // ── Campaign runner ─────────────────────────────────────────────────
    let dispatch = config.dispatch.clone();
    let runner = match config.mail_provider {
        MailProvider::Gmail => CampaignRunner::with_gmail(Arc::clone(&db), resolver, dispatch),
        MailProvider::SendGrid => {
            let sendgrid = config.sendgrid.clone().context("SENDGRID_API_KEY not set")?;
            let from = sendgrid.from_address.clone();
            let sender = SendGridSender::new(sendgrid.api_key, from.clone());
            CampaignRunner::with_service(Arc::clone(&db), resolver, dispatch, Arc::new(sender), from)
        }
        MailProvider::Smtp => {
            let smtp = config.smtp.as_ref().context("SMTP_HOST not set")?;
            let sender = SmtpSender::new(smtp).context("Failed to configure SMTP transport")?;
            CampaignRunner::with_service(
                Arc::clone(&db),
                resolver,
                dispatch,
                Arc::new(sender),
                smtp.from_address.clone(),
            )
        }
    };
    let runner = Arc::new(runner);

    // ── Startup Recovery: close out runs cut short by a restart ─────────
    match runner.recover_interrupted().await {
        Ok(0) => {}
        Ok(n) => info!(campaigns = n, "Recovered interrupted campaigns"),
        Err(e) => warn!(error = %e, "Startup recovery failed"),
    }

    // ── HTTP ────────────────────────────────────────────────────────────
    let state = AppState {
        db,
        runner,
        places,
        scraper,
        oauth: config.google_oauth.clone().map(|c| Arc::new(GoogleOAuth::new(c))),
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "HTTP API listening");

    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
