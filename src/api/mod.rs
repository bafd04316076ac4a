use axum::{
    Router,
    extract::{
        Json, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::core::{
    GoalSeekConfig, ModelError, RunoutParams, RunoutRate, SimulationParameters, ThresholdMode,
    calculate_runout, seek_runout_rate, simulate, solve_with_config,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliThresholdMode {
    FirstCrossing,
    EveryMultiple,
}

impl From<CliThresholdMode> for ThresholdMode {
    fn from(value: CliThresholdMode) -> Self {
        match value {
            CliThresholdMode::FirstCrossing => ThresholdMode::FirstCrossing,
            CliThresholdMode::EveryMultiple => ThresholdMode::EveryMultiple,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ApiThresholdMode {
    #[serde(alias = "first_crossing", alias = "first-crossing")]
    FirstCrossing,
    #[serde(alias = "every_multiple", alias = "every-multiple")]
    EveryMultiple,
}

impl From<ApiThresholdMode> for CliThresholdMode {
    fn from(value: ApiThresholdMode) -> Self {
        match value {
            ApiThresholdMode::FirstCrossing => CliThresholdMode::FirstCrossing,
            ApiThresholdMode::EveryMultiple => CliThresholdMode::EveryMultiple,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "warranty-goalseek",
    about = "Break-even warranty rate solver for engine maintenance contracts"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        #[arg(long, env = "GOALSEEK_ADDR", default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
    /// Solve for the warranty rate that reaches the target profit.
    Solve(ScenarioArgs),
    /// Print the yearly profit trace at a fixed rate.
    Simulate {
        #[command(flatten)]
        scenario: ScenarioArgs,
        #[arg(long)]
        rate: f64,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
struct ScenarioArgs {
    #[arg(long, default_value_t = 10)]
    num_years: u32,
    #[arg(long, default_value_t = 450.0, help = "Annual operating hours")]
    au_hours: f64,
    #[arg(long, default_value_t = 100.0, help = "Time since new at the start")]
    initial_tsn: f64,
    #[arg(long, default_value_t = 5.0, help = "Annual rate escalation in percent")]
    rate_escalation: f64,
    #[arg(long, default_value_t = 10.0, help = "AIC uplift in percent")]
    aic: f64,
    #[arg(long, default_value_t = 1000.0)]
    hsi_tsn: f64,
    #[arg(long, default_value_t = 3000.0)]
    overhaul_tsn: f64,
    #[arg(long, default_value_t = 50_000.0)]
    hsi_cost: f64,
    #[arg(long, default_value_t = 100_000.0)]
    overhaul_cost: f64,
    #[arg(long, default_value_t = 3_000_000.0)]
    target_profit: f64,
    #[arg(long, default_value_t = 320.0, help = "Starting guess of the solver")]
    initial_rate: f64,
    #[arg(long, value_enum, default_value_t = CliThresholdMode::FirstCrossing)]
    threshold_mode: CliThresholdMode,
    #[arg(long, default_value_t = 100)]
    max_iterations: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GoalSeekPayload {
    num_years: Option<u32>,
    au_hours: Option<f64>,
    #[serde(alias = "initialTSN")]
    initial_tsn: Option<f64>,
    rate_escalation: Option<f64>,
    aic: Option<f64>,
    #[serde(alias = "hsitsn", alias = "hsiTSN")]
    hsi_tsn: Option<f64>,
    #[serde(alias = "overhaulTSN")]
    overhaul_tsn: Option<f64>,
    hsi_cost: Option<f64>,
    overhaul_cost: Option<f64>,
    target_profit: Option<f64>,
    initial_rate: Option<f64>,
    threshold_mode: Option<ApiThresholdMode>,
    max_iterations: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulatePayload {
    #[serde(flatten)]
    scenario: GoalSeekPayload,
    rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunoutSeekPayload {
    #[serde(flatten)]
    params: RunoutParams,
    target_revenue: f64,
    #[serde(default = "default_runout_rate")]
    solve_for: RunoutRate,
    #[serde(default)]
    max_iterations: Option<u32>,
}

fn default_runout_rate() -> RunoutRate {
    RunoutRate::Warranty
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GoalSeekResponse {
    final_cumulative_profit: f64,
    iterations: u32,
    optimal_warranty_rate: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Serve { addr } => run_http_server(addr).await?,
        Command::Solve(scenario) => {
            let params = build_parameters(&scenario)?;
            let started = Instant::now();
            let result = solve_with_config(&params, goal_seek_config(&scenario))?;
            let elapsed = started.elapsed();
            println!("Optimal warranty rate:   {:.6}", result.optimal_warranty_rate);
            println!("Iterations:              {}", result.iterations);
            println!("Final cumulative profit: {:.6}", result.final_cumulative_profit);
            println!("Response time:           {elapsed:?}");
        }
        Command::Simulate { scenario, rate } => {
            let params = build_parameters(&scenario)?;
            let result = simulate(&params, rate)?;
            println!(
                "{:>4} {:>10} {:>12} {:>14} {:>4} {:>4} {:>12} {:>16}",
                "year", "tsn", "rate", "revenue", "hsi", "ovh", "cost", "cumulative"
            );
            for year in &result.yearly_trace {
                println!(
                    "{:>4} {:>10.1} {:>12.4} {:>14.2} {:>4} {:>4} {:>12.2} {:>16.2}",
                    year.year,
                    year.tsn,
                    year.escalated_rate,
                    year.total_revenue,
                    year.hsi_events,
                    year.overhaul_events,
                    year.maintenance_cost,
                    year.cumulative_profit
                );
            }
        }
    }
    Ok(())
}

fn build_parameters(args: &ScenarioArgs) -> Result<SimulationParameters, ModelError> {
    let params = SimulationParameters {
        num_years: args.num_years,
        au_hours: args.au_hours,
        initial_tsn: args.initial_tsn,
        rate_escalation: args.rate_escalation,
        aic: args.aic,
        hsi_tsn: args.hsi_tsn,
        overhaul_tsn: args.overhaul_tsn,
        hsi_cost: args.hsi_cost,
        overhaul_cost: args.overhaul_cost,
        target_profit: args.target_profit,
        initial_rate: args.initial_rate,
        threshold_mode: args.threshold_mode.into(),
    };
    params.validate()?;
    Ok(params)
}

fn goal_seek_config(args: &ScenarioArgs) -> GoalSeekConfig {
    GoalSeekConfig {
        max_iterations: args.max_iterations,
        ..GoalSeekConfig::default()
    }
}

fn default_scenario_for_api() -> ScenarioArgs {
    ScenarioArgs {
        num_years: 10,
        au_hours: 450.0,
        initial_tsn: 100.0,
        rate_escalation: 5.0,
        aic: 10.0,
        hsi_tsn: 1000.0,
        overhaul_tsn: 3000.0,
        hsi_cost: 50_000.0,
        overhaul_cost: 100_000.0,
        target_profit: 3_000_000.0,
        initial_rate: 320.0,
        threshold_mode: CliThresholdMode::FirstCrossing,
        max_iterations: 100,
    }
}

fn scenario_from_payload(payload: GoalSeekPayload) -> ScenarioArgs {
    let mut scenario = default_scenario_for_api();

    if let Some(v) = payload.num_years {
        scenario.num_years = v;
    }
    if let Some(v) = payload.au_hours {
        scenario.au_hours = v;
    }
    if let Some(v) = payload.initial_tsn {
        scenario.initial_tsn = v;
    }
    if let Some(v) = payload.rate_escalation {
        scenario.rate_escalation = v;
    }
    if let Some(v) = payload.aic {
        scenario.aic = v;
    }
    if let Some(v) = payload.hsi_tsn {
        scenario.hsi_tsn = v;
    }
    if let Some(v) = payload.overhaul_tsn {
        scenario.overhaul_tsn = v;
    }
    if let Some(v) = payload.hsi_cost {
        scenario.hsi_cost = v;
    }
    if let Some(v) = payload.overhaul_cost {
        scenario.overhaul_cost = v;
    }
    if let Some(v) = payload.target_profit {
        scenario.target_profit = v;
    }
    if let Some(v) = payload.initial_rate {
        scenario.initial_rate = v;
    }
    if let Some(v) = payload.threshold_mode {
        scenario.threshold_mode = v.into();
    }
    if let Some(v) = payload.max_iterations {
        scenario.max_iterations = v;
    }

    scenario
}

fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/goalseek",
            get(goalseek_get_handler).post(goalseek_post_handler),
        )
        .route("/goal_seek", post(goalseek_post_handler))
        .route("/simulate", post(simulate_handler))
        .route("/runout", post(runout_handler))
        .route("/runout/goalseek", post(runout_goalseek_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "warranty goal seek API listening");

    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found", "NotFound")
}

async fn goalseek_get_handler(
    payload: Result<Query<GoalSeekPayload>, QueryRejection>,
) -> Response {
    match payload {
        Ok(Query(payload)) => run_blocking(move || goalseek_handler_impl(payload)).await,
        Err(rejection) => bad_request(&rejection.body_text()),
    }
}

async fn goalseek_post_handler(payload: Result<Json<GoalSeekPayload>, JsonRejection>) -> Response {
    match payload {
        Ok(Json(payload)) => run_blocking(move || goalseek_handler_impl(payload)).await,
        Err(rejection) => bad_request(&rejection.body_text()),
    }
}

fn goalseek_handler_impl(payload: GoalSeekPayload) -> Response {
    let scenario = scenario_from_payload(payload);
    let started = Instant::now();
    let result = build_parameters(&scenario)
        .and_then(|params| solve_with_config(&params, goal_seek_config(&scenario)));

    match result {
        Ok(result) => {
            info!(
                num_years = scenario.num_years,
                rate = result.optimal_warranty_rate,
                iterations = result.iterations,
                elapsed_us = started.elapsed().as_micros() as u64,
                "goal seek solved"
            );
            json_response(
                StatusCode::OK,
                GoalSeekResponse {
                    final_cumulative_profit: result.final_cumulative_profit,
                    iterations: result.iterations,
                    optimal_warranty_rate: result.optimal_warranty_rate,
                },
            )
        }
        Err(err) => model_error_response(&err),
    }
}

async fn simulate_handler(payload: Result<Json<SimulatePayload>, JsonRejection>) -> Response {
    match payload {
        Ok(Json(payload)) => run_blocking(move || simulate_handler_impl(payload)).await,
        Err(rejection) => bad_request(&rejection.body_text()),
    }
}

fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let scenario = scenario_from_payload(payload.scenario);
    match build_parameters(&scenario).and_then(|params| simulate(&params, payload.rate)) {
        Ok(result) => {
            info!(
                num_years = scenario.num_years,
                rate = payload.rate,
                "simulation complete"
            );
            json_response(StatusCode::OK, result)
        }
        Err(err) => model_error_response(&err),
    }
}

async fn runout_handler(payload: Result<Json<RunoutParams>, JsonRejection>) -> Response {
    match payload {
        Ok(Json(params)) => run_blocking(move || runout_handler_impl(params)).await,
        Err(rejection) => bad_request(&rejection.body_text()),
    }
}

fn runout_handler_impl(params: RunoutParams) -> Response {
    match calculate_runout(&params) {
        Ok(result) => {
            info!(
                periods = result.periods.len(),
                engines = params.engines.len(),
                "runout calculated"
            );
            json_response(StatusCode::OK, result)
        }
        Err(err) => model_error_response(&err),
    }
}

async fn runout_goalseek_handler(
    payload: Result<Json<RunoutSeekPayload>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(payload)) => run_blocking(move || runout_goalseek_handler_impl(payload)).await,
        Err(rejection) => bad_request(&rejection.body_text()),
    }
}

fn runout_goalseek_handler_impl(payload: RunoutSeekPayload) -> Response {
    let mut config = GoalSeekConfig::default();
    if let Some(max_iterations) = payload.max_iterations {
        config.max_iterations = max_iterations;
    }

    match seek_runout_rate(
        &payload.params,
        payload.target_revenue,
        payload.solve_for,
        config,
    ) {
        Ok(result) => {
            info!(
                solve_for = ?result.solve_for,
                rate = result.rate,
                iterations = result.iterations,
                "runout goal seek solved"
            );
            json_response(StatusCode::OK, result)
        }
        Err(err) => model_error_response(&err),
    }
}

/// Runs a model computation off the async workers.
async fn run_blocking<F>(work: F) -> Response
where
    F: FnOnce() -> Response + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "model computation task failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "computation failed",
                "Internal",
            )
        }
    }
}

fn status_for(err: &ModelError) -> StatusCode {
    match err {
        ModelError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
        ModelError::DidNotConverge { .. }
        | ModelError::DegenerateSlope { .. }
        | ModelError::NonFinite(_)
        | ModelError::NegativeRate { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str, kind: &'static str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
            kind,
        },
    )
}

fn bad_request(msg: &str) -> Response {
    warn!(error = msg, "rejected malformed request");
    error_response(StatusCode::BAD_REQUEST, msg, "InvalidRequest")
}

fn model_error_response(err: &ModelError) -> Response {
    warn!(kind = err.kind(), error = %err, "request failed");
    error_response(status_for(err), &err.to_string(), err.kind())
}
