//! Regime Lens: regime analysis for finished backtest runs
//!
//! Usage:
//!   regime-lens serve --port 3002                          Launch the JSON API
//!   regime-lens analyze --run demo --feature rsi --bins 8  Bucket returns by an indicator
//!   regime-lens seed-demo                                  Write a synthetic run to the database

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use engine::store::save_run;
use engine::synthetic::{self, WalkParams};
use engine::{
    AnalysisContext, AnalysisError, AnalysisResult, AnalysisSession, EngineConfig, EngineResult,
    EquityPoint, Horizon, PerformanceSummary, PriceColumn, RawBar, RegimeOutcome, ReturnColumn,
    RunId, SourcePolicy, SqliteRunStore,
};
use persistence::repository::RunRepository;
use persistence::Database;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

mod sessions;

use sessions::{SessionCache, DEFAULT_SESSION_CAPACITY};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

const HOUR_MS: i64 = 3_600_000;
const DEMO_START: &str = "2024-01-01T00:00:00Z";

#[derive(Parser)]
#[command(name = "regime-lens")]
#[command(about = "Regime analysis for finished backtest runs", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the JSON API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3002)]
        port: u16,
    },
    /// List stored runs
    Runs,
    /// List the indicators available to a run
    Indicators {
        #[arg(long)]
        run: String,
        /// crypto, index or none
        #[arg(long, default_value = "none")]
        context: String,
    },
    /// Bucket a return column by an indicator's value
    Analyze {
        #[arg(long)]
        run: String,
        #[arg(long, default_value = "none")]
        context: String,
        #[arg(long)]
        feature: String,
        #[arg(long, default_value_t = 10)]
        bins: usize,
        /// equity_return, cumulative_return, forward_return_1, forward_return_5 or forward_custom
        #[arg(long, default_value = "forward_return_1")]
        returns: String,
        /// Horizon for forward_custom, e.g. 4h, 2d, 30m, 1w or a bare period count
        #[arg(long)]
        horizon: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Overall and quartile performance for an indicator
    Summary {
        #[arg(long)]
        run: String,
        #[arg(long, default_value = "none")]
        context: String,
        #[arg(long)]
        feature: String,
        #[arg(long, default_value = "forward_return_1")]
        returns: String,
        #[arg(long)]
        horizon: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Write a deterministic synthetic run (equity, position series, hourly bars)
    SeedDemo {
        #[arg(long, default_value = "demo")]
        run: String,
        #[arg(long, default_value_t = 720)]
        bars: usize,
        /// Defaults to the configured synthetic seed
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
    config: Arc<EngineConfig>,
    policy: Arc<SourcePolicy>,
    sessions: Arc<SessionCache>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,regime_lens=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,regime_lens=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("REGIME_DB_PATH").unwrap_or_else(|_| "data/regime.db".to_string())
}

/// Open sessions kept by the API server
fn session_capacity() -> usize {
    std::env::var("REGIME_SESSION_CAPACITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SESSION_CAPACITY)
}

async fn open_db() -> anyhow::Result<(Database, String)> {
    let path = db_path();
    let db = Database::new(&path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!(path = %path, "Database opened");
    Ok((db, path))
}

fn parse_return_column(selector: &str, horizon: Option<&str>) -> EngineResult<ReturnColumn> {
    let horizon = horizon.map(str::parse::<Horizon>).transpose()?;
    ReturnColumn::parse(selector, horizon)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Runs => {
            cmd_runs().await?;
        }
        Commands::Indicators { run, context } => {
            cmd_indicators(&run, &context).await?;
        }
        Commands::Analyze {
            run,
            context,
            feature,
            bins,
            returns,
            horizon,
            json,
        } => {
            let column = parse_return_column(&returns, horizon.as_deref())?;
            let mut session = open_session(&run, &context).await?;
            let outcome = session.analyze(&feature, bins, &column)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_analysis(&outcome);
            }
        }
        Commands::Summary {
            run,
            context,
            feature,
            returns,
            horizon,
            json,
        } => {
            let column = parse_return_column(&returns, horizon.as_deref())?;
            let mut session = open_session(&run, &context).await?;
            let outcome = session.summarize(&feature, &column)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_summary(&outcome);
            }
        }
        Commands::SeedDemo { run, bars, seed } => {
            cmd_seed_demo(&run, bars, seed).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command (Axum JSON API)
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Regime Lens v{} starting...", APP_VERSION);

    let (db, path) = open_db().await?;
    let config = EngineConfig::from_env();
    let policy = SourcePolicy::from_config(&config);
    info!(
        live_fetch = policy.live_enabled(),
        seed = config.synthetic_seed,
        sessions = session_capacity(),
        "Context source policy ready"
    );

    let state = AppState {
        db: Arc::new(db),
        config: Arc::new(config),
        policy: Arc::new(policy),
        sessions: Arc::new(SessionCache::new(session_capacity())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/runs", get(api_runs))
        .route("/runs/:run_id/indicators", get(api_indicators))
        .route("/analyze", post(api_analyze))
        .route("/summary", post(api_summary))
        .route("/continuous", post(api_continuous))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Regime Lens v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health                    - Health check");
    println!("  GET  /api/runs                      - Stored runs");
    println!("  GET  /api/runs/:run_id/indicators   - Indicator catalog (?context=crypto|index|none)");
    println!("  POST /api/analyze                   - Binned regime analysis");
    println!("  POST /api/summary                   - Overall and quartile performance");
    println!("  POST /api/continuous                - Feature/return pairs with correlation");
    println!("\n  Database: {}", path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// CLI commands
// ============================================================================

async fn open_session(run: &str, context: &str) -> anyhow::Result<AnalysisSession> {
    let context: AnalysisContext = context.parse()?;
    let (db, _) = open_db().await?;
    let config = EngineConfig::from_env();
    let policy = SourcePolicy::from_config(&config);
    let store = SqliteRunStore::new(db.pool_clone());

    let session = AnalysisSession::open(&store, &policy, &config, run, context).await?;
    for warning in session.warnings() {
        match &warning.fallback {
            Some(fallback) => println!("  ! {}: {} ({})", warning.subject, warning.reason, fallback),
            None => println!("  ! {}: {}", warning.subject, warning.reason),
        }
    }
    Ok(session)
}

fn format_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

async fn cmd_runs() -> anyhow::Result<()> {
    let (db, _) = open_db().await?;
    let runs = RunRepository::new(db.pool()).list_runs().await?;
    if runs.is_empty() {
        println!("No runs stored. Try `regime-lens seed-demo`.");
        return Ok(());
    }

    println!("\n  {:<32} {:<24} {:<16}", "Run", "Label", "Created");
    println!("  {}", "-".repeat(74));
    for r in &runs {
        println!(
            "  {:<32} {:<24} {:<16}",
            r.run_id,
            r.label.as_deref().unwrap_or("-"),
            format_ms(r.created_at),
        );
    }
    Ok(())
}

async fn cmd_indicators(run: &str, context: &str) -> anyhow::Result<()> {
    let session = open_session(run, context).await?;
    println!("\nIndicators for {} ({}):", session.run_id(), session.context());
    println!(
        "  {:<24} {:<14} {:<12} {:>7}  {:<16} {:<16}",
        "Name", "Category", "Source", "Points", "First", "Last"
    );
    println!("  {}", "-".repeat(94));
    for entry in session.catalog() {
        let source = match &entry.origin {
            engine::SeriesOrigin::Computed => "computed",
            engine::SeriesOrigin::Precomputed => "stored",
            engine::SeriesOrigin::Live { .. } => "live",
            engine::SeriesOrigin::Synthetic { .. } => "synthetic",
        };
        println!(
            "  {:<24} {:<14} {:<12} {:>7}  {:<16} {:<16}",
            entry.name,
            entry.category.as_str(),
            source,
            entry.points,
            entry.first_timestamp.map(format_ms).unwrap_or_default(),
            entry.last_timestamp.map(format_ms).unwrap_or_default(),
        );
    }
    Ok(())
}

fn print_analysis(outcome: &RegimeOutcome<AnalysisResult>) {
    let result = match outcome {
        RegimeOutcome::Ready(result) => result,
        RegimeOutcome::NoData(no_data) => {
            println!("\nNo data: {}", no_data.reason);
            return;
        }
    };

    println!(
        "\n{} by {} ({} rows, {:?} bins)",
        result.return_column, result.feature, result.total_observations, result.bucketing
    );
    println!(
        "  {:>3}  {:<26} {:>6} {:>11} {:>11} {:>8} {:>6}",
        "#", "Range", "Count", "Mean", "Std", "Sharpe", "WR%"
    );
    println!("  {}", "-".repeat(78));
    for (range, stats) in result.bin_ranges.iter().zip(&result.bin_statistics) {
        println!(
            "  {:>3}  {:<26} {:>6} {:>+11.5} {:>11.5} {:>8.3} {:>5.1}%",
            range.bin_id,
            range.range_label,
            stats.count,
            stats.return_mean.unwrap_or(0.0),
            stats.return_std.unwrap_or(0.0),
            stats.sharpe_like,
            stats.win_rate * 100.0,
        );
    }
}

fn print_summary(outcome: &RegimeOutcome<PerformanceSummary>) {
    let summary = match outcome {
        RegimeOutcome::Ready(summary) => summary,
        RegimeOutcome::NoData(no_data) => {
            println!("\nNo data: {}", no_data.reason);
            return;
        }
    };

    println!("\n{} vs {}", summary.feature, summary.return_column);
    println!("  Observations: {}", summary.total_observations);
    match summary.correlation {
        Some(c) => println!("  Correlation:  {:+.4}", c),
        None => println!("  Correlation:  n/a"),
    }
    println!("  Mean return:  {:+.5}", summary.mean_return.unwrap_or(0.0));
    println!("  Sharpe-like:  {:.3}", summary.sharpe_ratio);
    println!("  Win rate:     {:.1}%", summary.win_rate * 100.0);
    println!("\n  {:<10} {:>6} {:>11} {:>6}", "Quartile", "Count", "Mean", "WR%");
    for q in &summary.quartile_performance {
        println!(
            "  {:<10} {:>6} {:>+11.5} {:>5.1}%",
            q.label,
            q.count,
            q.mean_return.unwrap_or(0.0),
            q.win_rate * 100.0,
        );
    }
}

// ============================================================================
// Seed-demo command
// ============================================================================

async fn cmd_seed_demo(run: &str, bars: usize, seed: Option<u64>) -> anyhow::Result<()> {
    let run = RunId::parse(run)?;
    let config = EngineConfig::from_env();
    let seed = seed.unwrap_or(config.synthetic_seed);
    let start = DateTime::parse_from_rfc3339(DEMO_START)?.timestamp_millis();

    let frame = synthetic::random_walk_frame(
        &WalkParams {
            start,
            interval_ms: HOUR_MS,
            length: bars,
            start_price: config.synthetic_start_price,
            volume_base: config.volume_base,
        },
        seed,
    )?;
    let open = frame.require(PriceColumn::Open, "seed-demo")?;
    let high = frame.require(PriceColumn::High, "seed-demo")?;
    let low = frame.require(PriceColumn::Low, "seed-demo")?;
    let close = frame.require(PriceColumn::Close, "seed-demo")?;
    let volume = frame.require(PriceColumn::Volume, "seed-demo")?;

    // long for the next bar after an up candle, flat otherwise
    let mut equity = Vec::with_capacity(frame.len());
    let mut position = Vec::with_capacity(frame.len());
    let mut value = 10_000.0;
    let mut exposure = 0.0;
    for (i, ts) in frame.timestamps().iter().enumerate() {
        if i > 0 {
            value *= 1.0 + exposure * (close[i] / close[i - 1] - 1.0);
        }
        equity.push(EquityPoint { timestamp: *ts, value });
        position.push((*ts, Some(exposure)));
        exposure = if close[i] > open[i] { 1.0 } else { 0.0 };
    }

    let price_bars: Vec<RawBar> = (0..frame.len())
        .map(|i| RawBar {
            timestamp: frame.timestamps()[i],
            open: Some(open[i]),
            high: Some(high[i]),
            low: Some(low[i]),
            close: Some(close[i]),
            volume: Some(volume[i]),
        })
        .collect();

    let mut indicators = BTreeMap::new();
    indicators.insert("position".to_string(), position);
    let mut instruments = BTreeMap::new();
    instruments.insert("DEMO".to_string(), price_bars);

    let (db, path) = open_db().await?;
    save_run(
        db.pool(),
        &run,
        Some("synthetic demo"),
        &equity,
        &indicators,
        &instruments,
    )
    .await?;

    info!(run = %run, bars = frame.len(), seed, "Demo run written");
    println!(
        "Seeded run '{}' with {} hourly bars (seed {}) into {}",
        run,
        frame.len(),
        seed,
        path
    );
    println!("Final equity: {:.2}", equity.last().map(|p| p.value).unwrap_or(value));
    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn api_error(e: &AnalysisError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        AnalysisError::Validation(_) | AnalysisError::UnknownIndicator { .. } => {
            StatusCode::BAD_REQUEST
        }
        AnalysisError::DataUnavailable(_) => StatusCode::NOT_FOUND,
        AnalysisError::MissingColumn { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisError::Fetch(_) => StatusCode::BAD_GATEWAY,
        AnalysisError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "Request failed");
    } else {
        warn!(error = %e, "Request rejected");
    }
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "message": e.to_string(),
        })),
    )
}

/// Run `f` against the cached session for `(run_id, context)`, opening it on first use
async fn with_session<T>(
    state: &AppState,
    run_id: &str,
    context: AnalysisContext,
    f: impl FnOnce(&mut AnalysisSession) -> EngineResult<T>,
) -> EngineResult<T> {
    let key = (run_id.to_string(), context);
    let shared = match state.sessions.get(&key).await {
        Some(shared) => shared,
        None => {
            let store = SqliteRunStore::new(state.db.pool_clone());
            let session =
                AnalysisSession::open(&store, &state.policy, &state.config, run_id, context)
                    .await?;
            state.sessions.insert(key, session).await
        }
    };
    let mut session = shared.lock().await;
    f(&mut *session)
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "regime-lens",
        "version": APP_VERSION,
    }))
}

/// GET /api/runs
async fn api_runs(State(state): State<AppState>) -> ApiResult {
    let runs = RunRepository::new(state.db.pool())
        .list_runs()
        .await
        .map_err(|e| api_error(&AnalysisError::Store(e)))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "count": runs.len(),
        "runs": runs,
    })))
}

#[derive(Deserialize)]
struct ContextParams {
    context: Option<String>,
}

fn parse_context(raw: Option<&str>) -> EngineResult<AnalysisContext> {
    raw.map(str::parse::<AnalysisContext>).transpose().map(Option::unwrap_or_default)
}

/// GET /api/runs/:run_id/indicators
async fn api_indicators(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<ContextParams>,
) -> ApiResult {
    let context = parse_context(params.context.as_deref()).map_err(|e| api_error(&e))?;
    let (catalog, warnings, price_origin) = with_session(&state, &run_id, context, |session| {
        Ok((
            session.catalog(),
            session.warnings().to_vec(),
            session.price_origin().cloned(),
        ))
    })
    .await
    .map_err(|e| api_error(&e))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "run_id": run_id,
        "context": context,
        "indicators": catalog,
        "price_origin": price_origin,
        "warnings": warnings,
    })))
}

fn default_bins() -> usize {
    10
}

/// Body shared by the analysis endpoints
#[derive(Deserialize)]
struct AnalysisRequest {
    run_id: String,
    context: Option<String>,
    feature: String,
    #[serde(default = "default_bins")]
    n_bins: usize,
    return_column: Option<String>,
    /// Forward horizon for `forward_custom` ("4h", "2d", "12")
    horizon: Option<String>,
}

impl AnalysisRequest {
    fn resolve(&self) -> EngineResult<(AnalysisContext, ReturnColumn)> {
        let context = parse_context(self.context.as_deref())?;
        let column = match &self.return_column {
            Some(selector) => parse_return_column(selector, self.horizon.as_deref())?,
            None => ReturnColumn::default(),
        };
        Ok((context, column))
    }
}

/// POST /api/analyze
async fn api_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult {
    let (context, column) = request.resolve().map_err(|e| api_error(&e))?;
    info!(
        run_id = %request.run_id,
        feature = %request.feature,
        n_bins = request.n_bins,
        "Analyze request"
    );
    let outcome = with_session(&state, &request.run_id, context, |session| {
        session.analyze(&request.feature, request.n_bins, &column)
    })
    .await
    .map_err(|e| api_error(&e))?;

    Ok(Json(serde_json::json!({ "success": true, "result": outcome })))
}

/// POST /api/summary
async fn api_summary(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult {
    let (context, column) = request.resolve().map_err(|e| api_error(&e))?;
    let outcome = with_session(&state, &request.run_id, context, |session| {
        session.summarize(&request.feature, &column)
    })
    .await
    .map_err(|e| api_error(&e))?;

    Ok(Json(serde_json::json!({ "success": true, "result": outcome })))
}

/// POST /api/continuous
async fn api_continuous(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult {
    let (context, column) = request.resolve().map_err(|e| api_error(&e))?;
    let outcome = with_session(&state, &request.run_id, context, |session| {
        session.continuous(&request.feature, &column)
    })
    .await
    .map_err(|e| api_error(&e))?;

    Ok(Json(serde_json::json!({ "success": true, "result": outcome })))
}
