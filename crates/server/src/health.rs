use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use payflow_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

/// Probe result for one dependency. `ok` drives the HTTP status; the
/// detail is for humans reading the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DependencyProbe {
    pub ok: bool,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub database: DependencyProbe,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

/// Bind the readiness listener and serve it on a background task.
pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(event_name = "system.health.listener_started", bind_address = %address, "readiness endpoint listening");

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "system.health.listener_failed",
                error = %error,
                "readiness endpoint terminated"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_probe(&state.db_pool).await;

    let payload = HealthResponse {
        status: if database.ok { "ready" } else { "degraded" },
        service: "payflow-server",
        version: env!("CARGO_PKG_VERSION"),
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code =
        if payload.database.ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_probe(pool: &DbPool) -> DependencyProbe {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => DependencyProbe {
            ok: true,
            detail: format!("reachable ({} of {} connections idle)", pool.num_idle(), pool.size()),
        },
        Err(error) => DependencyProbe { ok: false, detail: format!("query failed: {error}") },
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use payflow_db::connect_ephemeral;

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_reports_ready_when_database_is_reachable() {
        let pool = connect_ephemeral().await.expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert!(payload.database.ok);
        assert_eq!(payload.service, "payflow-server");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_reports_degraded_when_database_is_unavailable() {
        let pool = connect_ephemeral().await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert!(!payload.database.ok);
    }
}
