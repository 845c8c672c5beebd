use clap::Parser;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use wakeup_core::config::WebhookAuthMode;
use wakeup_core::WakeupConfig;
use wakeup_notify::{
    CallbackUrls, DeliveryReconciler, NotificationDispatcher, NotificationTransport,
    TwilioTransport,
};
use wakeup_scheduler::{
    ExecutionQueue, ExecutionRunner, InteractionHandler, JobStore, MessageComposer,
    SchedulerEngine, WorkerPool,
};
use wakeup_weather::{WeatherApiProvider, WeatherCache, WeatherProvider};

mod app;
mod http;
mod maintenance;

#[derive(Debug, Parser)]
#[command(name = "wakeup-gateway", version, about = "Wake-up call scheduler and callback gateway")]
struct Cli {
    /// Config file (default: $WAKEUP_CONFIG, then ~/.wakeup/wakeup.toml)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wakeup_gateway=info,wakeup_scheduler=info,wakeup_notify=info,\
                 wakeup_weather=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("WAKEUP_CONFIG").ok());
    let config = WakeupConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        WakeupConfig::default()
    });

    // single SQLite file shared by every subsystem
    config.database.ensure_parent_dir()?;
    info!(path = %config.database.path, "opening SQLite database");
    let conn = rusqlite::Connection::open(&config.database.path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    wakeup_scheduler::db::init_db(&conn)?;
    wakeup_notify::db::init_db(&conn)?;
    wakeup_weather::db::init_db(&conn)?;
    info!("database migrations complete");
    let db = Arc::new(Mutex::new(conn));

    let callback_token = match config.webhooks.auth_mode {
        WebhookAuthMode::Token => config.webhooks.secret.clone(),
        _ => None,
    };
    let urls = CallbackUrls::new(&config.notify.public_base_url, callback_token);

    let transport: Option<Arc<dyn NotificationTransport>> = match &config.notify.twilio {
        Some(twilio) => {
            info!(from = %twilio.from_number, "notification provider: Twilio");
            Some(Arc::new(TwilioTransport::new(twilio)))
        }
        None if config.notify.demo_mode => None,
        None => {
            warn!("no notification provider configured, every dispatch will fail");
            None
        }
    };
    let dispatcher = Arc::new(
        NotificationDispatcher::new(db.clone(), transport, config.notify.demo_mode)
            .with_status_callback(urls.delivery_status()),
    );

    let weather_provider: Option<Arc<dyn WeatherProvider>> = match &config.weather.api_key {
        Some(key) => Some(Arc::new(WeatherApiProvider::new(
            key.clone(),
            Some(config.weather.base_url.clone()),
            Duration::from_secs(config.weather.timeout_secs),
        ))),
        None => {
            warn!("no weather API key configured, weather will be announced as unavailable");
            None
        }
    };
    let weather = Arc::new(WeatherCache::new(
        db.clone(),
        weather_provider,
        config.weather.ttl_secs,
    ));

    let sched_cfg = config.scheduler.clone();
    let brand = config.content.brand.clone();
    let store = Arc::new(JobStore::new(db.clone()));
    let (queue, work_rx) = ExecutionQueue::channel(sched_cfg.queue_capacity, store.clone());
    let composer = MessageComposer::new(brand.clone(), sched_cfg.snooze_minutes);
    let runner = Arc::new(ExecutionRunner::new(
        store.clone(),
        weather.clone(),
        dispatcher.clone(),
        composer.clone(),
        urls.clone(),
    ));
    let engine = SchedulerEngine::new(store.clone(), queue.clone(), &sched_cfg);
    let reconciler = Arc::new(DeliveryReconciler::new(db.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let pool = WorkerPool::new(work_rx, runner, sched_cfg.workers);
    let pool_task = tokio::spawn(pool.run(shutdown_rx.clone()));
    let engine_task = tokio::spawn(engine.clone().run(shutdown_rx.clone()));
    let housekeeping = maintenance::Maintenance {
        store: store.clone(),
        dispatcher: dispatcher.clone(),
        reconciler: reconciler.clone(),
        weather: weather.clone(),
        config: config.maintenance.clone(),
        prefetch: config.weather.prefetch,
    };
    tokio::spawn(housekeeping.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState {
        interactions: InteractionHandler::new(
            store.clone(),
            queue,
            sched_cfg.snooze_minutes,
            brand,
        ),
        store,
        engine,
        composer,
        urls,
        reconciler,
        dispatcher,
        weather,
        config,
    });
    let router = app::build_router(state);

    info!("Wakeup gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // engine first so nothing new is enqueued, then drain running executions
    let _ = shutdown_tx.send(true);
    if let Err(e) = engine_task.await {
        warn!("scheduler task ended abnormally: {e}");
    }
    if let Err(e) = pool_task.await {
        warn!("worker pool task ended abnormally: {e}");
    }
    info!("Wakeup gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
