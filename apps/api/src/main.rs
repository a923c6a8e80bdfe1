mod audit;
mod auth;
mod availability;
mod booking;
mod config;
mod db;
mod handlers;
mod mail;
mod models;
mod passage;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use config::ConfigStore;
use mail::MailClient;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: ConfigStore,
    pub mailer: MailClient,
    pub admin_token: String,
    pub started_at: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:binfresh.db?mode=rwc".into());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".into());

    let admin_token = std::env::var("ADMIN_API_TOKEN").unwrap_or_default();
    if admin_token.is_empty() {
        tracing::warn!("ADMIN_API_TOKEN not set — all admin requests will be rejected");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let state = Arc::new(AppState {
        config: ConfigStore::new(pool.clone()),
        db: pool,
        mailer: MailClient::from_env(),
        admin_token,
        started_at: Instant::now(),
    });

    // ── CORS: whitelist FRONTEND_URL when configured, otherwise allow any ──
    let cors = match std::env::var("FRONTEND_URL") {
        Ok(url) if !url.is_empty() => {
            let origin: axum::http::HeaderValue = url
                .parse()
                .map_err(|e| anyhow::anyhow!("FRONTEND_URL is not a valid origin: {}", e))?;
            CorsLayer::new()
                .allow_origin(AllowOrigin::list([origin]))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    // ── Router ──

    // Health + payment callbacks: never behind auth
    let open_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route("/api/payment/webhook", post(handlers::payment::payment_webhook))
        .route("/api/payment/verify", post(handlers::payment::verify_payment));

    let public_routes = Router::new()
        .route("/api/services", get(handlers::public::list_services))
        .route("/api/cities", get(handlers::public::list_cities))
        .route("/api/config", get(handlers::public::public_config))
        .route(
            "/api/bookings/available-dates",
            get(handlers::public::available_dates),
        )
        .route("/api/booking", post(handlers::public::create_booking))
        .route("/api/quote", post(handlers::public::create_quote));

    let admin_routes = Router::new()
        .route("/api/admin/bookings", get(handlers::admin::list_bookings))
        .route(
            "/api/admin/bookings/{id}/status",
            put(handlers::admin::update_booking_status),
        )
        .route("/api/admin/quotes", get(handlers::admin::list_quotes))
        .route(
            "/api/admin/quotes/{id}/status",
            put(handlers::admin::update_quote_status),
        )
        .route("/api/admin/config", get(handlers::admin::get_config))
        .route("/api/admin/config", put(handlers::admin::put_config))
        .route("/api/admin/cities", get(handlers::admin::list_cities))
        .route("/api/admin/cities", post(handlers::admin::create_city))
        .route("/api/admin/cities/{id}", put(handlers::admin::update_city))
        .route("/api/admin/cities/{id}", delete(handlers::admin::delete_city))
        .route("/api/admin/services", post(handlers::admin::create_service))
        .route("/api/admin/services/{id}", put(handlers::admin::update_service))
        .route(
            "/api/admin/services/{id}/variants",
            post(handlers::admin::create_variant),
        )
        .route("/api/admin/variants/{id}", put(handlers::admin::update_variant))
        .route(
            "/api/admin/variants/{id}",
            delete(handlers::admin::delete_variant),
        )
        .route("/api/admin/payments", get(handlers::admin::list_payments))
        .route("/api/admin/audit", get(handlers::admin::list_audit))
        .route("/api/admin/rgpd/erase", post(handlers::admin::rgpd_erase))
        .route_layer(from_fn_with_state(state.clone(), auth::require_admin));

    let app = Router::new()
        .merge(open_routes)
        .merge(public_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("binfresh API starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
