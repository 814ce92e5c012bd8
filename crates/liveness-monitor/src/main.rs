//! Binary entry point: wires the Store, Mailer, Supervisor, Owner
//! Reconciler and admin API together for one replica, grounded on
//! `agent::main`'s explicit `tokio::runtime::Builder` + `async_main` split
//! (SPEC_FULL.md §10.1, §10.3).

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use liveness_core::{AckUrlConfig, OwnerReconciler, Supervisor};
use liveness_mailer::{DisabledMailer, Mailer, Renderer, SmtpMailer};

/// Configuration for one replica, read from CLI flags with environment
/// fallbacks matching spec.md §6.3's variable names verbatim. `Debug` is
/// implemented by hand below to redact `db_pass`/`smtp_password` before
/// they ever reach the startup log line.
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long = "db-host", env = "DB_HOST", default_value = "127.0.0.1")]
    db_host: String,
    #[clap(long = "db-port", env = "DB_PORT", default_value = "5432")]
    db_port: u16,
    #[clap(long = "db-user", env = "DB_USER", default_value = "postgres")]
    db_user: String,
    #[clap(long = "db-pass", env = "DB_PASS", default_value = "")]
    db_pass: String,
    #[clap(long = "db-name", env = "DB_NAME", default_value = "liveness")]
    db_name: String,

    /// SMTP relay host. When absent, alert mails are logged instead of sent
    /// (see [`DisabledMailer`]).
    #[clap(long = "smtp-server", env = "SMTP_SERVER")]
    smtp_server: Option<String>,
    #[clap(long = "smtp-port", env = "SMTP_PORT", default_value = "587")]
    smtp_port: u16,
    #[clap(long = "smtp-username", env = "SMTP_USERNAME", default_value = "")]
    smtp_username: String,
    #[clap(long = "smtp-password", env = "SMTP_PASSWORD", default_value = "")]
    smtp_password: String,
    /// `From:` address used for every outbound alert mail.
    #[clap(
        long = "mail-from",
        env = "MAIL_FROM",
        default_value = "alerts@liveness-monitor.invalid"
    )]
    mail_from: String,

    /// This replica's shard index. Fixed for the process lifetime; the
    /// Owner Reconciler re-reads it every refresh (spec.md §4.3).
    #[clap(long = "shard-index", env = "SHARD_INDEX")]
    shard_index: i32,

    /// Host and port embedded in acknowledgement URLs (spec.md §6.1).
    #[clap(long = "app-host", env = "APP_HOST", default_value = "localhost")]
    app_host: String,
    #[clap(long = "app-port", env = "APP_PORT", default_value = "8080")]
    app_port: u16,

    /// Cadence of the Owner Reconciler's refresh, externalized from
    /// spec.md §4.3's hardcoded one second (SPEC_FULL.md §6.3).
    #[clap(
        long = "owner-refresh-interval-ms",
        env = "OWNER_REFRESH_INTERVAL_MS",
        default_value = "1000"
    )]
    owner_refresh_interval_ms: u64,

    /// Origin to allow in CORS contexts. May be specified multiple times.
    #[clap(long = "allow-origin", env = "ALLOW_ORIGIN", value_delimiter = ',')]
    allow_origin: Vec<String>,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_pass", &"<redacted>")
            .field("db_name", &self.db_name)
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"<redacted>")
            .field("mail_from", &self.mail_from)
            .field("shard_index", &self.shard_index)
            .field("app_host", &self.app_host)
            .field("app_port", &self.app_port)
            .field("owner_refresh_interval_ms", &self.owner_refresh_interval_ms)
            .field("allow_origin", &self.allow_origin)
            .finish()
    }
}

fn main() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("failed to install default crypto provider");

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "starting liveness-monitor replica");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async_main(args));
    tracing::info!(?result, "replica shutting down");
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let api_listener = tokio::net::TcpListener::bind((args.app_host.as_str(), args.app_port))
        .await
        .context("failed to bind admin API port")?;

    let connect_options = liveness_store::connect_options(
        &args.db_host,
        args.db_port,
        &args.db_user,
        &args.db_pass,
        &args.db_name,
    );
    let store = Arc::new(
        liveness_store::connect(connect_options)
            .await
            .context("connecting to store")?,
    );

    let mailer = build_mailer(&args)?;
    let renderer = Arc::new(Renderer::try_new().context("registering mail templates")?);
    let http_client = reqwest::Client::new();
    let owned_set = liveness_core::new_owned_set();
    let ack_urls = AckUrlConfig {
        app_host: args.app_host.clone(),
        app_port: args.app_port,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        mailer,
        renderer,
        http_client,
        owned_set.clone(),
        args.shard_index,
        ack_urls,
        shutdown_rx.clone(),
    ));

    let reconciler = OwnerReconciler::new(
        store.clone(),
        args.shard_index,
        owned_set,
        std::time::Duration::from_millis(args.owner_refresh_interval_ms),
    );

    // Populate the owned set before any recovered Probers run their first
    // tick, so they do not mistake themselves for unowned (spec.md §4.3's
    // "Lifecycle" ordering requirement).
    reconciler.refresh_once().await;

    let summary = supervisor
        .recover()
        .await
        .context("running startup recovery")?;
    tracing::info!(
        probers_spawned = summary.probers_spawned,
        escalators_spawned = summary.escalators_spawned,
        "startup recovery complete"
    );

    let reconciler_shutdown = shutdown_rx.clone();
    let reconciler_task =
        tokio::spawn(async move { reconciler.run(reconciler_shutdown).await });

    let router = liveness_api::build_router(supervisor, &args.allow_origin)
        .context("building admin API router")?;

    let api_server =
        axum::serve(api_listener, router).with_graceful_shutdown(shutdown_signal());
    let serve_result = api_server.await.context("admin API server error");

    let _ = shutdown_tx.send(true);
    let _ = reconciler_task.await;

    serve_result
}

/// Which transport handles outbound alert mail, chosen once at startup from
/// whether `--smtp-server`/`SMTP_SERVER` was supplied. `Mailer::send`
/// returns `impl Future`, which is not object-safe, so the choice is a plain
/// enum delegating to one of the two concrete mailers rather than a boxed
/// trait object — `Supervisor<S, M>` still gets one concrete `M: Mailer`.
#[derive(Debug, Clone)]
enum AnyMailer {
    Smtp(SmtpMailer),
    Disabled(DisabledMailer),
}

impl Mailer for AnyMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        match self {
            AnyMailer::Smtp(mailer) => mailer.send(to, subject, body).await,
            AnyMailer::Disabled(mailer) => mailer.send(to, subject, body).await,
        }
    }
}

fn build_mailer(args: &Args) -> anyhow::Result<Arc<AnyMailer>> {
    match &args.smtp_server {
        Some(server) => {
            let mailer = SmtpMailer::new(
                server,
                args.smtp_port,
                &args.smtp_username,
                &args.smtp_password,
                args.mail_from.clone(),
            )
            .context("constructing SMTP mailer")?;
            Ok(Arc::new(AnyMailer::Smtp(mailer)))
        }
        None => {
            tracing::warn!("SMTP_SERVER not configured, alert mails will only be logged");
            Ok(Arc::new(AnyMailer::Disabled(DisabledMailer)))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
