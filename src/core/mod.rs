mod engine;
mod runout;
mod solver;
mod types;

pub use engine::{cumulative_profit, simulate};
pub use runout::{
    ContractPeriod, EngineSchedule, EngineYear, RunoutParams, RunoutRate, RunoutResult,
    RunoutSeekResult, calculate as calculate_runout, contract_periods, seek_runout_rate,
};
pub use solver::{GoalSeekConfig, NewtonOutcome, newton_raphson, solve, solve_with_config};
pub use types::{
    MAX_YEARS, ModelError, SimulationParameters, SimulationResult, SolverIteration, SolverResult,
    ThresholdMode, YearTrace,
};
