use tracing::debug;

use super::engine::cumulative_profit_unchecked;
use super::types::{ModelError, SimulationParameters, SolverIteration, SolverResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalSeekConfig {
    /// Absolute tolerance on `|f(rate)|`.
    pub tolerance: f64,
    /// Step of the forward-difference derivative estimate.
    pub derivative_step: f64,
    pub max_iterations: u32,
}

impl Default for GoalSeekConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            derivative_step: 1e-6,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewtonOutcome {
    pub root: f64,
    pub iterations: u32,
    pub history: Vec<SolverIteration>,
}

/// Finds the warranty rate whose cumulative profit equals `params.target_profit`.
pub fn solve(params: &SimulationParameters) -> Result<SolverResult, ModelError> {
    solve_with_config(params, GoalSeekConfig::default())
}

pub fn solve_with_config(
    params: &SimulationParameters,
    config: GoalSeekConfig,
) -> Result<SolverResult, ModelError> {
    params.validate()?;

    let target = params.target_profit;
    let outcome = newton_raphson(
        |rate| Ok(cumulative_profit_unchecked(params, rate)? - target),
        params.initial_rate,
        config,
    )?;
    let final_cumulative_profit = cumulative_profit_unchecked(params, outcome.root)?;

    Ok(SolverResult {
        optimal_warranty_rate: outcome.root,
        iterations: outcome.iterations,
        final_cumulative_profit,
        history: outcome.history,
    })
}

/// Newton-Raphson root search on `objective` with a forward-difference slope.
///
/// Converges when `|objective(x)| < config.tolerance` and reports the number of
/// objective checks performed, so an initial guess that already satisfies the
/// tolerance reports one iteration.
pub fn newton_raphson<F>(
    objective: F,
    initial_guess: f64,
    config: GoalSeekConfig,
) -> Result<NewtonOutcome, ModelError>
where
    F: Fn(f64) -> Result<f64, ModelError>,
{
    validate_config(config)?;

    let mut x = initial_guess;
    let mut history = Vec::new();
    let mut last_residual = f64::NAN;

    for i in 0..config.max_iterations {
        let iteration = i + 1;
        let fx = objective(x)?;
        last_residual = fx;

        if fx.abs() < config.tolerance {
            history.push(SolverIteration {
                iteration,
                rate: x,
                residual: fx,
                slope: None,
            });
            debug!(iteration, rate = x, residual = fx, "goal seek converged");
            return Ok(NewtonOutcome {
                root: x,
                iterations: iteration,
                history,
            });
        }

        let step = config.derivative_step;
        let slope = (objective(x + step)? - fx) / step;
        history.push(SolverIteration {
            iteration,
            rate: x,
            residual: fx,
            slope: Some(slope),
        });
        debug!(iteration, rate = x, residual = fx, slope, "goal seek step");

        if slope == 0.0 || !slope.is_finite() {
            return Err(ModelError::DegenerateSlope { iteration, rate: x });
        }

        x -= fx / slope;
    }

    Err(ModelError::DidNotConverge {
        max_iterations: config.max_iterations,
        last_rate: x,
        last_residual,
    })
}

fn validate_config(config: GoalSeekConfig) -> Result<(), ModelError> {
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(ModelError::InvalidParameters(
            "tolerance must be > 0".to_string(),
        ));
    }
    if !config.derivative_step.is_finite() || config.derivative_step <= 0.0 {
        return Err(ModelError::InvalidParameters(
            "derivative_step must be > 0".to_string(),
        ));
    }
    if config.max_iterations == 0 {
        return Err(ModelError::InvalidParameters(
            "max_iterations must be > 0".to_string(),
        ));
    }
    Ok(())
}
