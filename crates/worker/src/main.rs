use anyhow::Context;
use clap::Parser;
use pulse_core::config::{PipelineConfig, Settings};
use pulse_core::delivery::{channel_from_settings, DeliveryChannel, LogChannel};
use pulse_core::domain::Holding;
use pulse_core::error::PipelineError;
use pulse_core::news::{FinnhubClient, NewsApiClient, NewsFetcher, NewsProvider};
use pulse_core::pipeline::Orchestrator;
use pulse_core::portfolio_file::{load_portfolios, PortfolioFile};
use pulse_core::sentiment::{HttpSentimentModel, SentimentScorer};
use pulse_core::storage::retry::RetryPolicy;
use pulse_core::storage::{MemoryStore, PgStore, Store};
use pulse_core::summarize::SummaryFanOut;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "pulse_worker")]
struct Args {
    /// Run the pipeline for one user.
    #[arg(long, conflicts_with = "all_users")]
    user_id: Option<i64>,

    /// Run the pipeline for every user, one after another.
    #[arg(long)]
    all_users: bool,

    /// Create users and replace their holdings from a JSON file, then exit.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["user_id", "all_users", "dry_run"])]
    load_portfolio: Option<PathBuf>,

    /// Snapshot date (YYYY-MM-DD). Defaults to today's UTC date.
    #[arg(long)]
    report_date: Option<String>,

    /// Run against an in-memory store and log the report instead of sending it.
    /// Holdings come from --holding.
    #[arg(long)]
    dry_run: bool,

    /// Dry-run holding as TICKER=WEIGHT; repeatable.
    #[arg(long = "holding", value_parser = parse_holding, requires = "dry_run")]
    holdings: Vec<Holding>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);
    init_tracing(&settings);

    let args = Args::parse();
    let cfg = PipelineConfig::from_env()?;
    let report_date =
        pulse_core::time::resolve_report_date(args.report_date.as_deref(), chrono::Utc::now())?;

    if args.dry_run {
        return dry_run(&settings, cfg, report_date, args.holdings).await;
    }

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;
    pulse_core::storage::migrate(&pool).await?;

    let retry = RetryPolicy {
        attempts: cfg.storage_retry_attempts,
        base_backoff: cfg.storage_retry_backoff,
    };
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone(), retry));

    if let Some(path) = args.load_portfolio {
        let file = PortfolioFile::read(&path)?;
        tracing::info!(path = %path.display(), users = file.users.len(), "loading portfolios");
        let summary = load_portfolios(store.as_ref(), &file).await;
        tracing::info!(
            users = summary.users,
            portfolios = summary.portfolios,
            skipped = summary.skipped,
            failed = summary.failed,
            "portfolio loading complete"
        );
        return Ok(if summary.failed > 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let delivery = channel_from_settings(&settings)?;
    let orchestrator = build_orchestrator(&settings, cfg, store.clone(), delivery)?
        .with_report_date(report_date);

    let user_ids = match (args.user_id, args.all_users) {
        (Some(id), _) => vec![id],
        (None, true) => store.list_user_ids().await?,
        (None, false) => {
            anyhow::bail!("pass --user-id <ID>, --all-users, --dry-run or --load-portfolio <FILE>")
        }
    };
    tracing::info!(%report_date, users = user_ids.len(), "worker starting");

    let failures =
        run_each(&user_ids, |user_id| run_locked(&pool, &orchestrator, user_id)).await;

    if failures > 0 {
        tracing::error!(failures, "worker finished with failed runs");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Runs users in order and returns how many failed. An error for one user
/// is reported and counted; later users still run.
async fn run_each<F, Fut>(user_ids: &[i64], mut run: F) -> usize
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let mut failures = 0usize;
    for &user_id in user_ids {
        match run(user_id).await {
            Ok(true) => {}
            Ok(false) => failures += 1,
            Err(err) => {
                tracing::error!(user_id, error = %format!("{err:#}"), "run could not start");
                sentry_anyhow::capture_anyhow(&err);
                failures += 1;
            }
        }
    }
    failures
}

/// Holds the user's advisory lock on a dedicated connection for the whole
/// run. Returns false when the run failed or the report was not delivered.
async fn run_locked(
    pool: &sqlx::PgPool,
    orchestrator: &Orchestrator,
    user_id: i64,
) -> anyhow::Result<bool> {
    let mut conn = pool
        .acquire()
        .await
        .context("failed to acquire lock connection")?;
    let acquired = pulse_core::storage::lock::try_acquire_user_lock(&mut *conn, user_id).await?;
    if !acquired {
        tracing::warn!(user_id, "user lock not acquired; another run in progress");
        return Ok(false);
    }

    let ok = run_for_user(orchestrator, user_id).await;

    if let Err(err) = pulse_core::storage::lock::release_user_lock(&mut *conn, user_id).await {
        tracing::warn!(user_id, error = %format!("{err:#}"), "failed to release user lock");
    }
    Ok(ok)
}

async fn run_for_user(orchestrator: &Orchestrator, user_id: i64) -> bool {
    match orchestrator.run(user_id).await {
        Ok(result) if result.delivered => true,
        Ok(result) => {
            tracing::error!(user_id, run_id = %result.run_id, "run completed but report was not delivered");
            false
        }
        Err(err) => {
            report_failure(user_id, err);
            false
        }
    }
}

fn report_failure(user_id: i64, err: PipelineError) {
    if err.is_input_error() {
        tracing::warn!(user_id, error = %err, "run rejected");
    } else {
        tracing::error!(user_id, error = %err, "run failed");
    }
    sentry_anyhow::capture_anyhow(&anyhow::Error::new(err));
}

async fn dry_run(
    settings: &Settings,
    cfg: PipelineConfig,
    report_date: chrono::NaiveDate,
    holdings: Vec<Holding>,
) -> anyhow::Result<ExitCode> {
    anyhow::ensure!(!holdings.is_empty(), "--dry-run needs at least one --holding TICKER=WEIGHT");

    let store = Arc::new(MemoryStore::new());
    let user_id = store.add_user("dry-run@localhost", holdings)?;
    let orchestrator = build_orchestrator(settings, cfg, store.clone(), Arc::new(LogChannel))?
        .with_report_date(report_date);

    tracing::info!(%report_date, dry_run = true, "worker starting");
    if run_for_user(&orchestrator, user_id).await {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn build_orchestrator(
    settings: &Settings,
    cfg: PipelineConfig,
    store: Arc<dyn Store>,
    delivery: Arc<dyn DeliveryChannel>,
) -> anyhow::Result<Orchestrator> {
    let timeout = cfg.news.fetch_timeout;
    let primary: Arc<dyn NewsProvider> = Arc::new(NewsApiClient::from_settings(settings, timeout)?);
    let secondary: Option<Arc<dyn NewsProvider>> = if settings.finnhub_key.is_some() {
        let finnhub: Arc<dyn NewsProvider> =
            Arc::new(FinnhubClient::from_settings(settings, timeout)?);
        Some(finnhub)
    } else {
        tracing::warn!("FINNHUB_KEY not set; secondary news provider disabled");
        None
    };
    let news = NewsFetcher::new(primary, secondary, cfg.news.clone());

    let model = Arc::new(HttpSentimentModel::from_settings(settings)?);
    let scorer = SentimentScorer::new(model, cfg.sentiment.clone());

    let summarizer = pulse_core::llm::summarizer_from_settings(settings)?;
    let summaries = SummaryFanOut::new(summarizer, cfg.summary.clone());

    Ok(Orchestrator::new(store, news, scorer, summaries, delivery, cfg))
}

fn parse_holding(raw: &str) -> Result<Holding, String> {
    let (ticker, weight) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TICKER=WEIGHT, got {raw:?}"))?;
    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|_| format!("invalid weight in {raw:?}"))?;
    Ok(Holding {
        ticker: ticker.trim().to_string(),
        weight,
    })
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(sentry_tracing::layer());
    if settings.json_logs() {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
