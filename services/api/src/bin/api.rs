//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        tts::{speech_model, voice},
        DbAdapter, OpenAiCompletionAdapter, OpenAiIndexingAdapter, OpenAiTtsAdapter,
    },
    config::Config,
    error::ApiError,
    web::{api_routes, rest::ApiDoc, AppState, TurnGate},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    Router,
};
use bookwise_core::{
    chat::ChatService,
    events::{EventHub, DEFAULT_EVENT_CAPACITY},
    indexing::BookIndexer,
    memory::MemoryStore,
    ports::{KeyValueStore, LibraryStore, SessionStore, TextToSpeechService},
    settings::SettingsRepository,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// The three persistence ports, backed by one store.
struct Stores {
    sessions: Arc<dyn SessionStore>,
    library: Arc<dyn LibraryStore>,
    values: Arc<dyn KeyValueStore>,
}

async fn connect_stores(config: &Config) -> Result<Stores, ApiError> {
    let events = EventHub::new(DEFAULT_EVENT_CAPACITY);
    match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool, events));
            info!("Running database migrations...");
            db_adapter
                .run_migrations()
                .await
                .map_err(|e| ApiError::Internal(format!("Migrations failed: {}", e)))?;
            info!("Database migrations complete.");
            Ok(Stores {
                sessions: db_adapter.clone(),
                library: db_adapter.clone(),
                values: db_adapter,
            })
        }
        None => {
            warn!("DATABASE_URL is not set; sessions are kept in memory and lost on restart.");
            let store = Arc::new(MemoryStore::with_events(events));
            Ok(Stores {
                sessions: store.clone(),
                library: store.clone(),
                values: store,
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect the Stores ---
    let stores = connect_stores(&config).await?;

    // --- 3. Initialize Service Adapters ---
    let settings = SettingsRepository::new(stores.values, config.available_models.clone());
    let completion_config = OpenAIConfig::new()
        .with_api_key(config.require_completion_key()?)
        .with_api_base(&config.completion_api_base);
    let completion_client = Client::with_config(completion_config);
    let completion_adapter = Arc::new(OpenAiCompletionAdapter::new(
        completion_client.clone(),
        settings.defaults().model,
    ));
    let indexing_adapter = Arc::new(OpenAiIndexingAdapter::new(
        completion_client,
        settings.defaults().model,
    ));

    let tts_adapter: Option<Arc<dyn TextToSpeechService>> = match &config.speech_api_key {
        Some(key) => {
            let speech_config = OpenAIConfig::new()
                .with_api_key(key)
                .with_api_base(&config.speech_api_base);
            Some(Arc::new(OpenAiTtsAdapter::new(
                Client::with_config(speech_config),
                speech_model(&config.tts_model),
                voice(&config.tts_voice),
            )) as Arc<dyn TextToSpeechService>)
        }
        None => {
            warn!("No speech API key configured; voice mode replies will carry no audio.");
            None
        }
    };

    // --- 4. Build the Shared AppState ---
    let books = BookIndexer::new(indexing_adapter, stores.library.clone());
    let chat = ChatService::new(
        stores.sessions.clone(),
        stores.library.clone(),
        completion_adapter,
        tts_adapter,
    );
    let app_state = Arc::new(AppState {
        sessions: stores.sessions,
        library: stores.library,
        settings,
        chat,
        books,
        config: config.clone(),
        turns: TurnGate::new(),
    });

    // --- 5. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(api_lib::web::middleware::USER_ID_HEADER),
        ]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_routes(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
