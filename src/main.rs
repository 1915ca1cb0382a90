use city_weather_ingest::alert::{EmailNotifier, LogNotifier, Notifier};
use city_weather_ingest::config::Config;
use city_weather_ingest::db::Repository;
use city_weather_ingest::fetcher::Fetcher;
use city_weather_ingest::pipeline::Pipeline;
use city_weather_ingest::scheduler::Scheduler;
use city_weather_ingest::web::{self, AppState};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,city_weather_ingest=debug,sqlx=warn,tower_http=info")
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("City weather ingestion service starting...");

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
    let config = Config::load(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {}: {}\n\n\
             Make sure:\n\
             1. The config file exists (or set CONFIG_PATH)\n\
             2. All required environment variables are set (check .env.example)\n\
             3. Create a .env file if needed",
            config_path,
            e
        )
    })?;
    info!(
        "Configuration loaded: {} cities in {}",
        config.locations.cities.len(),
        config.locations.country_code
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(config.database.connect_options())
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to connect to database: {}\n\n\
                 Host: {}:{}\n\
                 Database: {}\n\
                 User: {}\n\n\
                 Common fixes:\n\
                 1. Ensure PostgreSQL is running\n\
                 2. Check username/password are correct (DB_USER, DB_PASSWORD)\n\
                 3. Verify database exists: createdb {}\n\
                 4. Check host and port (DB_HOST, DB_PORT)",
                e,
                config.database.host,
                config.database.port,
                config.database.name,
                config.database.user,
                config.database.name
            )
        })?;

    info!(
        "Connected to database: {}@{}:{}/{}",
        config.database.user, config.database.host, config.database.port, config.database.name
    );

    // Running against a store without its tables is pointless, so this is fatal
    let repository = Arc::new(Repository::new(pool));
    repository.init_schema().await?;

    let request_timeout = Duration::from_secs(config.source.request_timeout_seconds);
    let notifier: Arc<dyn Notifier> = match &config.notifications {
        Some(notifications) => {
            info!("Alert emails will be sent to {}", notifications.to);
            Arc::new(EmailNotifier::new(notifications, request_timeout)?)
        }
        None => {
            info!("No notification channel configured, alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let pipeline = Pipeline::new(
        Arc::new(Fetcher::new(&config.source)?),
        repository.clone(),
        notifier,
        config.locations.locations(),
        config.alerts,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving read endpoints on http://{}", addr);

    let app = web::router(AppState {
        repository: repository.clone(),
        thresholds: config.alerts,
    });
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    let mut scheduler =
        Scheduler::new(config.scheduler, pipeline, repository.clone(), shutdown_rx)?;

    if let Err(e) = scheduler.run().await {
        error!("Scheduler error: {}", e);
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server error: {}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
    }

    repository.close().await;
    info!("City weather ingestion service shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
