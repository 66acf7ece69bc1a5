use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use pulse_core::domain::{PipelineRun, TickerAggregate};
use pulse_core::storage::retry::RetryPolicy;
use pulse_core::storage::{PgStore, Store};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RECENT_RUNS_LIMIT: i64 = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = pulse_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(sentry_tracing::layer());
    if settings.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let store: Option<Arc<dyn Store>> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match pulse_core::storage::migrate(&pool).await {
                Ok(()) => {
                    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool, RetryPolicy::default()));
                    Some(store)
                }
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let app = router(AppState { store });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users/:user_id/runs", get(get_recent_runs))
        .route("/users/:user_id/sentiment/latest", get(get_latest_sentiment))
        .route("/users/:user_id/sentiment/:date", get(get_sentiment_by_date))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    store: Option<Arc<dyn Store>>,
}

impl AppState {
    fn store(&self) -> Result<&dyn Store, StatusCode> {
        self.store.as_deref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Debug, Serialize)]
struct ApiSentimentSnapshot {
    user_id: i64,
    report_date: NaiveDate,
    tickers: Vec<TickerAggregate>,
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %format!("{e:#}"), "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn ensure_user(store: &dyn Store, user_id: i64) -> Result<(), StatusCode> {
    store
        .get_user(user_id)
        .await
        .map_err(internal)?
        .map(|_| ())
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_recent_runs(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<PipelineRun>>, StatusCode> {
    let store = state.store()?;
    ensure_user(store, user_id).await?;

    let runs = store
        .latest_pipeline_runs(user_id, RECENT_RUNS_LIMIT)
        .await
        .map_err(internal)?;
    Ok(Json(runs))
}

async fn get_latest_sentiment(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ApiSentimentSnapshot>, StatusCode> {
    let store = state.store()?;
    sentiment_snapshot(store, user_id, None).await
}

async fn get_sentiment_by_date(
    State(state): State<AppState>,
    Path((user_id, date)): Path<(i64, String)>,
) -> Result<Json<ApiSentimentSnapshot>, StatusCode> {
    let store = state.store()?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;
    sentiment_snapshot(store, user_id, Some(date)).await
}

async fn sentiment_snapshot(
    store: &dyn Store,
    user_id: i64,
    date: Option<NaiveDate>,
) -> Result<Json<ApiSentimentSnapshot>, StatusCode> {
    let (report_date, tickers) = store
        .ticker_aggregates_for(user_id, date)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ApiSentimentSnapshot {
        user_id,
        report_date,
        tickers,
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &pulse_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::domain::{Holding, RiskTier};
    use pulse_core::storage::MemoryStore;

    fn state_with_snapshot() -> (AppState, i64) {
        let store = MemoryStore::new();
        let user_id = store
            .add_user(
                "api@example.com",
                vec![Holding {
                    ticker: "AAPL".to_string(),
                    weight: 1.0,
                }],
            )
            .unwrap();
        let store: Arc<dyn Store> = Arc::new(store);
        (AppState { store: Some(store) }, user_id)
    }

    fn aggregate() -> TickerAggregate {
        TickerAggregate {
            ticker: "AAPL".to_string(),
            sentiment_score: 0.4,
            avg_confidence: 0.8,
            article_count: 2,
            risk_tier: RiskTier::Medium,
        }
    }

    #[tokio::test]
    async fn degraded_mode_is_unavailable() {
        let state = AppState { store: None };
        let err = get_recent_runs(State(state), Path(1)).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (state, _) = state_with_snapshot();
        let err = get_recent_runs(State(state), Path(999)).await.unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sentiment_by_date_and_latest() {
        let (state, user_id) = state_with_snapshot();
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        state
            .store()
            .unwrap()
            .upsert_ticker_aggregates(user_id, day, &[aggregate()])
            .await
            .unwrap();

        let Json(latest) = get_latest_sentiment(State(state.clone()), Path(user_id))
            .await
            .unwrap();
        assert_eq!(latest.report_date, day);
        assert_eq!(latest.tickers, vec![aggregate()]);

        let err = get_sentiment_by_date(
            State(state.clone()),
            Path((user_id, "2026-03-01".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);

        let err = get_sentiment_by_date(State(state), Path((user_id, "yesterday".to_string())))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }
}
