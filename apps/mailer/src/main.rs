mod smtp;
mod template;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use smtp::SmtpSender;

pub struct AppState {
    pub smtp: SmtpSender,
    /// When set, requests must carry a matching X-Api-Key header.
    pub api_key: Option<String>,
    pub started_at: Instant,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub template: String,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

type SendError = (StatusCode, Json<ApiResponse<()>>);

fn bad_request(msg: impl Into<String>) -> SendError {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(msg)))
}

/// POST /api/send — render a named template and deliver it over SMTP.
async fn send_mail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendRequest>,
) -> Result<Json<ApiResponse<&'static str>>, SendError> {
    if let Some(expected) = &state.api_key {
        let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error("Clé API invalide")),
            ));
        }
    }

    if body.to.trim().is_empty() || !body.to.contains('@') {
        return Err(bad_request("Destinataire invalide"));
    }
    if body.subject.trim().is_empty() {
        return Err(bad_request("Sujet obligatoire"));
    }

    let tpl = template::lookup(&body.template)
        .ok_or_else(|| bad_request(format!("Template inconnu : {}", body.template)))?;

    let rendered = template::render(tpl.body, &body.vars);

    state
        .smtp
        .send(
            body.to.trim(),
            body.reply_to.as_deref(),
            body.subject.trim(),
            rendered,
        )
        .await
        .map_err(|e| match e {
            smtp::SmtpError::InvalidAddress(addr) => {
                bad_request(format!("Adresse invalide : {}", addr))
            }
            other => {
                tracing::error!("delivery failed for template {}: {}", body.template, other);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(ApiResponse::error("Échec de l'envoi du message")),
                )
            }
        })?;

    tracing::info!("mail sent: {} to {}", body.template, body.to);
    Ok(Json(ApiResponse::success("Message envoyé")))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} must be set", key))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let smtp_host = require_env("SMTP_HOST")?;
    let smtp_port: u16 = std::env::var("SMTP_PORT")
        .unwrap_or_else(|_| "587".into())
        .parse()
        .map_err(|_| anyhow::anyhow!("SMTP_PORT must be a port number"))?;
    let smtp_user = require_env("SMTP_USER")?;
    let smtp_pass = require_env("SMTP_PASS")?;
    let from_email = require_env("MAIL_FROM")?;
    let from_name = std::env::var("MAIL_FROM_NAME").unwrap_or_else(|_| "Binfresh".into());

    let api_key = std::env::var("MAIL_API_KEY").ok().filter(|v| !v.is_empty());
    if api_key.is_none() {
        tracing::warn!("MAIL_API_KEY not set — /api/send is unauthenticated");
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3002".into());

    let state = Arc::new(AppState {
        smtp: SmtpSender::new(smtp_host, smtp_port, smtp_user, smtp_pass, from_email, from_name),
        api_key,
        started_at: Instant::now(),
    });

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/send", post(send_mail))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("binfresh mailer starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
