mod api;
mod app_state;
mod db;
mod env_config;
mod error;
mod gateway;
mod layers;
mod logger;
mod notifier;
mod services;
mod utils;

#[cfg(test)]
mod test_support;

use app_state::models::AppState;
use axum::{Router, routing::get};
use db::postgres::postgres_service::PostgresService;
use env_config::models::app_setting::AppSettings;
use gateway::{MarketDataGateway, YahooFinanceGateway};
use layers::{create_cors, create_trace};
use notifier::{MessageSink, TelegramSink};
use services::alerts::dispatcher::AlertDispatcher;
use services::fetcher::scheduler::FetchScheduler;
use services::status::tracker::StatusTracker;
use std::time::Duration;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    // Инициализация приложения
    let settings: Arc<AppSettings> = Arc::new(initialize_application());

    // Подключение к базе данных
    let postgres_service = initialize_database_connection(settings.clone()).await;

    // Настройка адреса сервера
    let server_address: SocketAddr = format!(
        "{}:{}",
        settings.app_env.server_address, settings.app_env.server_port,
    )
    .parse()
    .expect("Invalid server address configuration");

    info!("Server will listen on: {}", server_address);

    // Внешние источники данных и канал уведомлений
    let (gateway, sink) = initialize_external_clients(&settings);

    // Создание глобального состояния приложения
    let app_state: Arc<AppState> = Arc::new(AppState::new(
        settings.clone(),
        Arc::new(postgres_service),
        gateway,
        sink,
    ));

    // Канал остановки для фоновых задач и HTTP сервера
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Инициализация и запуск фоновых сервисов
    let scheduler_handle = initialize_background_services(app_state.clone(), shutdown_rx.clone()).await;

    // Создание API роутера
    let app_router = create_application_router(app_state.clone());

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Запуск HTTP сервера
    start_http_server(app_router, server_address, shutdown_rx).await;

    if let Some(handle) = scheduler_handle {
        if let Err(err) = handle.await {
            error!("Fetch scheduler task failed: {}", err);
        }
    }

    info!("Application stopped");
}

/// Инициализирует настройки и логирование приложения
fn initialize_application() -> AppSettings {
    // Загрузка переменных окружения и конфигурации
    if let Err(err) = dotenvy::dotenv() {
        eprintln!("No .env file loaded: {}", err);
    }

    let app_settings = match AppSettings::load() {
        Ok(settings) => settings,
        Err(err) => panic!("Failed to load configuration: {}", err),
    };

    // Настройка логирования с уровнем и форматом из конфигурации
    logger::init_logger(
        &app_settings.app_config.log.level,
        &app_settings.app_config.log.format,
        !app_settings.app_env.is_local(),
    )
    .expect("Failed to initialize logger");

    info!("Starting Stock Monitor application...");
    info!("Current environment: {}", app_settings.app_env.env);

    // Добавление подробного логирования в режиме разработки
    if app_settings.app_env.is_local() {
        info!("Running in local development mode");
        debug!("Configuration details: {:#?}", app_settings.app_config);
    } else {
        info!("Running in production mode");
    }

    app_settings
}

/// Устанавливает соединение с базой данных и создаёт схему
async fn initialize_database_connection(settings: Arc<AppSettings>) -> PostgresService {
    info!("Initializing database connection...");

    match PostgresService::new(&settings).await {
        Ok(service) => {
            info!("PostgreSQL connection established successfully");
            service
        }
        Err(err) => {
            error!("Failed to connect to PostgreSQL: {}", err);
            panic!("Cannot continue without PostgreSQL connection");
        }
    }
}

/// Создаёт клиентов Yahoo Finance и Telegram
fn initialize_external_clients(
    settings: &Arc<AppSettings>,
) -> (
    Arc<dyn MarketDataGateway + Send + Sync>,
    Arc<dyn MessageSink + Send + Sync>,
) {
    let config = &settings.app_config;

    let gateway = match YahooFinanceGateway::new(&config.gateway) {
        Ok(gateway) => gateway,
        Err(err) => panic!("Cannot build market data client: {}", err),
    };

    let sink = match TelegramSink::new(
        &config.telegram.api_url,
        &settings.app_env.telegram_bot_token,
        &settings.app_env.telegram_chat_id,
        Duration::from_secs(config.alerts.send_timeout_seconds),
    ) {
        Ok(sink) => sink,
        Err(err) => panic!("Cannot build Telegram client: {}", err),
    };

    info!("Market data from {}, notifications via Telegram", config.gateway.base_url);
    (Arc::new(gateway), Arc::new(sink))
}

/// Создает API роутер со всеми эндпоинтами и middleware
fn create_application_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api-health", get(api::health_api))
        .route("/db-health", get(api::health_db))
        .route("/status", get(api::status))
        .route("/alerts/recent", get(api::recent_alerts))
        .layer(axum::Extension(app_state))
        .layer(create_cors())
        .layer(create_trace())
}

/// Запускает HTTP сервер на указанном адресе
async fn start_http_server(app: Router, addr: SocketAddr, mut shutdown: watch::Receiver<bool>) {
    info!("Starting HTTP server on {}", addr);

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind to address {}: {}", addr, err);
            panic!("Cannot start server: {}", err);
        }
    };

    info!("Server started successfully, now accepting connections");

    let graceful = async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
        info!("HTTP server shutting down");
    };

    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(graceful).await {
        error!("Server error: {}", err);
        panic!("Server failed: {}", err);
    }
}

/// Инициализирует и запускает все фоновые сервисы
async fn initialize_background_services(
    app_state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let config = &app_state.settings.app_config;

    let dispatcher = Arc::new(AlertDispatcher::new(
        app_state.postgres_service.repository_alert_record.clone(),
        app_state.sink.clone(),
        StatusTracker::new(app_state.postgres_service.repository_component_status.clone()),
        chrono::Duration::seconds(config.alerts.cooldown_seconds as i64),
        Duration::from_secs(config.alerts.send_timeout_seconds),
    ));

    // Стартовое уведомление со списком отслеживаемых тикеров
    if config.alerts.startup_notification {
        match app_state
            .postgres_service
            .repository_watchlist
            .get_active_tickers()
            .await
        {
            Ok(tickers) => {
                dispatcher.notify_startup(&tickers, chrono::Utc::now()).await;
            }
            Err(err) => warn!("Skipping startup notification, watchlist unavailable: {}", err),
        }
    }

    // Запуск планировщика; первый цикл выполняется сразу
    let scheduler = Arc::new(FetchScheduler::from_app_state(&app_state, dispatcher));
    let handle = scheduler.start(shutdown);

    info!("Background services initialized successfully");
    handle
}

/// Ожидает SIGINT или SIGTERM
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
