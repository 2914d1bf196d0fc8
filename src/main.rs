use axum::{routing::get, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use linklian_api::{config, database, handlers, middleware};

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    let config = config::config();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting LinkLian API in {:?} mode", config.environment);

    let app = app();

    // Allow tests or deployments to override port via env
    let port = std::env::var("LINKLIAN_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    tracing::info!("LinkLian API server listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

fn app() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(import_routes())
        .merge(comment_routes())
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn import_routes() -> Router {
    use axum::routing::post;
    use handlers::import;

    Router::new()
        .route("/api/import/enrollment/validate", post(import::enrollment_validate))
        .route("/api/import/enrollment/save", post(import::enrollment_save))
        .route("/api/import/program/validate", post(import::program_validate))
        .route("/api/import/program/save", post(import::program_save))
        .route("/api/import/section-schedule/validate", post(import::schedule_validate))
        .route("/api/import/section-schedule/save", post(import::schedule_save))
        .layer(axum::middleware::from_fn(middleware::jwt_auth_middleware))
}

fn comment_routes() -> Router {
    use axum::routing::post;
    use handlers::comments;

    Router::new()
        .route("/api/post-comment", post(comments::create))
        // GET takes a post id; PUT/DELETE take a comment id
        .route(
            "/api/post-comment/:id",
            get(comments::get)
                .put(comments::update)
                .delete(comments::delete),
        )
}

async fn root() -> axum::response::Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": "LinkLian API",
            "version": version,
            "description": "School administration backend: bulk imports and section feeds",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "import": "/api/import/{enrollment,program,section-schedule}/{validate,save} (protected)",
                "comments": "/api/post-comment[/:id] (header identity)",
            }
        }
    }))
}

async fn health() -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match database::DatabaseManager::health_check().await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
