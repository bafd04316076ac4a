use serde::Serialize;
use thiserror::Error;

/// Longest horizon the simulator accepts.
pub const MAX_YEARS: u32 = 5_000;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ThresholdMode {
    /// An event fires once, in the year its threshold is first reached.
    #[default]
    FirstCrossing,
    /// An event fires once per threshold multiple crossed during the year.
    /// A multiple the starting TSN sits exactly on is charged in year 1.
    EveryMultiple,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParameters {
    pub num_years: u32,
    pub au_hours: f64,
    pub initial_tsn: f64,
    pub rate_escalation: f64,
    pub aic: f64,
    pub hsi_tsn: f64,
    pub overhaul_tsn: f64,
    pub hsi_cost: f64,
    pub overhaul_cost: f64,
    pub target_profit: f64,
    pub initial_rate: f64,
    pub threshold_mode: ThresholdMode,
}

impl SimulationParameters {
    /// Checks every precondition of the simulator and the solver seed.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.num_years == 0 {
            return Err(invalid("numYears must be >= 1"));
        }
        if self.num_years > MAX_YEARS {
            return Err(invalid(&format!("numYears must be <= {MAX_YEARS}")));
        }
        if !self.au_hours.is_finite() || self.au_hours <= 0.0 {
            return Err(invalid("auHours must be > 0"));
        }
        if !self.initial_tsn.is_finite() || self.initial_tsn < 0.0 {
            return Err(invalid("initialTSN must be >= 0"));
        }
        if !self.rate_escalation.is_finite() || self.rate_escalation < 0.0 {
            return Err(invalid("rateEscalation must be >= 0"));
        }
        if !(0.0..=100.0).contains(&self.aic) {
            return Err(invalid("aic must be between 0 and 100"));
        }
        if !self.hsi_tsn.is_finite() || self.hsi_tsn <= 0.0 {
            return Err(invalid("hsiTsn must be > 0"));
        }
        if !self.overhaul_tsn.is_finite() || self.overhaul_tsn <= 0.0 {
            return Err(invalid("overhaulTsn must be > 0"));
        }
        for (name, cost) in [
            ("hsiCost", self.hsi_cost),
            ("overhaulCost", self.overhaul_cost),
        ] {
            if !cost.is_finite() || cost < 0.0 {
                return Err(invalid(&format!("{name} must be >= 0")));
            }
        }
        if !self.target_profit.is_finite() || self.target_profit <= 0.0 {
            return Err(invalid("targetProfit must be > 0"));
        }
        if !self.initial_rate.is_finite() || self.initial_rate <= 0.0 {
            return Err(invalid("initialRate must be > 0"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ModelError {
    ModelError::InvalidParameters(msg.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearTrace {
    pub year: u32,
    pub tsn: f64,
    pub escalated_rate: f64,
    pub engine_revenue: f64,
    pub aic_revenue: f64,
    pub total_revenue: f64,
    pub hsi_events: u32,
    pub overhaul_events: u32,
    pub maintenance_cost: f64,
    pub profit: f64,
    pub cumulative_profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub cumulative_profit: f64,
    pub yearly_trace: Vec<YearTrace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverIteration {
    pub iteration: u32,
    pub rate: f64,
    pub residual: f64,
    pub slope: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverResult {
    pub optimal_warranty_rate: f64,
    pub iterations: u32,
    pub final_cumulative_profit: f64,
    pub history: Vec<SolverIteration>,
}

/// Failures of the simulator and the solver.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error(
        "did not converge within {max_iterations} iterations (last rate {last_rate}, residual {last_residual})"
    )]
    DidNotConverge {
        max_iterations: u32,
        last_rate: f64,
        last_residual: f64,
    },
    #[error("derivative is zero at iteration {iteration} (rate {rate}); update is undefined")]
    DegenerateSlope { iteration: u32, rate: f64 },
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("target requires a negative {field} ({rate})")]
    NegativeRate { field: &'static str, rate: f64 },
}

impl ModelError {
    /// Stable identifier reported at the service boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelError::InvalidParameters(_) => "InvalidParameters",
            ModelError::DidNotConverge { .. } => "DidNotConverge",
            ModelError::DegenerateSlope { .. } => "DegenerateSlope",
            ModelError::NonFinite(_) => "NonFinite",
            ModelError::NegativeRate { .. } => "NegativeRate",
        }
    }
}
