//! Runout revenue model: contract-year revenue for engines moving from
//! warranty pricing through up to three run-rate tiers.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::solver::{GoalSeekConfig, newton_raphson};
use super::types::{ModelError, SolverIteration};

/// Contract years shorter than this are not billed.
const MIN_PERIOD_DAYS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSchedule {
    #[serde(default)]
    pub engine_id: Option<u64>,
    #[serde(deserialize_with = "date_or_timestamp")]
    pub warranty_exp_date: NaiveDate,
    #[serde(default)]
    pub warranty_exp_hours: f64,
    #[serde(deserialize_with = "date_or_timestamp")]
    pub first_run_rate_switch_date: NaiveDate,
    #[serde(deserialize_with = "date_or_timestamp")]
    pub second_run_rate_switch_date: NaiveDate,
    #[serde(deserialize_with = "date_or_timestamp")]
    pub third_run_rate_switch_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunoutParams {
    #[serde(deserialize_with = "date_or_timestamp")]
    pub contract_start_date: NaiveDate,
    #[serde(deserialize_with = "date_or_timestamp")]
    pub contract_end_date: NaiveDate,
    #[serde(alias = "AUHours")]
    pub au_hours: f64,
    pub warranty_rate: f64,
    #[serde(default)]
    pub first_run_rate: f64,
    #[serde(default)]
    pub second_run_rate: f64,
    #[serde(default)]
    pub third_run_rate: f64,
    #[serde(default)]
    pub management_fees: f64,
    #[serde(default)]
    pub aic_fees: f64,
    #[serde(default)]
    pub trust_load_fees: f64,
    #[serde(default)]
    pub buy_in: f64,
    #[serde(default)]
    pub rate_escalation: f64,
    #[serde(default)]
    pub flight_hours_minimum: f64,
    #[serde(default = "default_days_in_year")]
    pub num_of_days_in_year: f64,
    #[serde(default = "default_days_in_month")]
    pub num_of_days_in_month: f64,
    #[serde(default)]
    pub enrollment_fees: f64,
    #[serde(default)]
    pub num_engines: Option<usize>,
    #[serde(alias = "engineParams")]
    pub engines: Vec<EngineSchedule>,
}

fn default_days_in_year() -> f64 {
    365.0
}

fn default_days_in_month() -> f64 {
    30.0
}

impl RunoutParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.contract_end_date < self.contract_start_date {
            return Err(invalid("contractEndDate must not be before contractStartDate"));
        }
        if !self.au_hours.is_finite() || self.au_hours <= 0.0 {
            return Err(invalid("auHours must be > 0"));
        }
        for (name, value) in [
            ("warrantyRate", self.warranty_rate),
            ("firstRunRate", self.first_run_rate),
            ("secondRunRate", self.second_run_rate),
            ("thirdRunRate", self.third_run_rate),
            ("buyIn", self.buy_in),
            ("rateEscalation", self.rate_escalation),
            ("flightHoursMinimum", self.flight_hours_minimum),
            ("enrollmentFees", self.enrollment_fees),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(&format!("{name} must be >= 0")));
            }
        }
        for (name, fee) in [
            ("managementFees", self.management_fees),
            ("aicFees", self.aic_fees),
            ("trustLoadFees", self.trust_load_fees),
        ] {
            if !(0.0..=100.0).contains(&fee) {
                return Err(invalid(&format!("{name} must be between 0 and 100")));
            }
        }
        if !self.num_of_days_in_year.is_finite() || self.num_of_days_in_year <= 0.0 {
            return Err(invalid("numOfDaysInYear must be > 0"));
        }
        if !self.num_of_days_in_month.is_finite() || self.num_of_days_in_month <= 0.0 {
            return Err(invalid("numOfDaysInMonth must be > 0"));
        }
        if self.engines.is_empty() {
            return Err(invalid("at least one engine is required"));
        }
        if let Some(expected) = self.num_engines {
            if expected != self.engines.len() {
                return Err(invalid("numEngines must match the number of engines"));
            }
        }

        for (idx, engine) in self.engines.iter().enumerate() {
            let n = idx + 1;
            if engine.warranty_exp_date < self.contract_start_date {
                return Err(invalid(&format!(
                    "warrantyExpDate for engine {n} must not be before contractStartDate"
                )));
            }
            if !engine.warranty_exp_hours.is_finite() || engine.warranty_exp_hours < 0.0 {
                return Err(invalid(&format!(
                    "warrantyExpHours for engine {n} must be >= 0"
                )));
            }
            if engine.first_run_rate_switch_date < self.contract_start_date {
                return Err(invalid(&format!(
                    "firstRunRateSwitchDate for engine {n} must not be before contractStartDate"
                )));
            }
            if engine.second_run_rate_switch_date < engine.first_run_rate_switch_date {
                return Err(invalid(&format!(
                    "secondRunRateSwitchDate for engine {n} must not be before firstRunRateSwitchDate"
                )));
            }
            if engine.third_run_rate_switch_date < engine.second_run_rate_switch_date {
                return Err(invalid(&format!(
                    "thirdRunRateSwitchDate for engine {n} must not be before secondRunRateSwitchDate"
                )));
            }
        }
        Ok(())
    }

    /// Run rates after fallback: an unset tier bills at the previous tier's rate.
    fn effective_rates(&self) -> [f64; 4] {
        let warranty = self.warranty_rate;
        let first = fallback(self.first_run_rate, warranty);
        let second = fallback(self.second_run_rate, first);
        let third = fallback(self.third_run_rate, second);
        [warranty, first, second, third]
    }
}

fn fallback(rate: f64, previous: f64) -> f64 {
    if rate == 0.0 { previous } else { rate }
}

fn invalid(msg: &str) -> ModelError {
    ModelError::InvalidParameters(msg.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineYear {
    pub engine_id: u64,
    pub warranty_rate_days: i64,
    pub first_run_rate_days: i64,
    pub second_run_rate_days: i64,
    pub third_run_rate_days: i64,
    pub total_days: i64,
    pub fh_utilization: f64,
    pub shortfall: f64,
    pub warranty_calc: f64,
    pub first_run_rate_calc: f64,
    pub second_run_rate_calc: f64,
    pub third_run_rate_calc: f64,
    pub rates: f64,
    pub escalated_rate: f64,
    pub fh_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub num_of_days: i64,
    pub runout_start_date: NaiveDate,
    pub runout_end_date: NaiveDate,
    pub num_of_runout_days: i64,
    pub contract_year_number: u32,
    pub rate_trend: f64,
    pub engines: Vec<EngineYear>,
    pub total_fh_revenue: f64,
    pub mgmt_fee_revenue: f64,
    pub aic_revenue: f64,
    pub trust_load_revenue: f64,
    pub buy_in: f64,
    pub trust_revenue: f64,
    pub total_revenue: f64,
    pub cumulative_total_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunoutResult {
    pub periods: Vec<ContractPeriod>,
    pub total_fh_revenue: f64,
    pub mgmt_fee_revenue: f64,
    pub aic_revenue: f64,
    pub trust_load_revenue: f64,
    pub trust_revenue: f64,
    pub total_revenue: f64,
    pub enrollment_fees: f64,
    pub buy_in: f64,
    pub cumulative_total_revenue: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunoutRate {
    #[serde(alias = "warranty_rate", alias = "warrantyRate")]
    Warranty,
    #[serde(alias = "first_run_rate", alias = "firstRunRate")]
    FirstRun,
    #[serde(alias = "second_run_rate", alias = "secondRunRate")]
    SecondRun,
    #[serde(alias = "third_run_rate", alias = "thirdRunRate")]
    ThirdRun,
}

impl RunoutRate {
    fn field_name(self) -> &'static str {
        match self {
            RunoutRate::Warranty => "warrantyRate",
            RunoutRate::FirstRun => "firstRunRate",
            RunoutRate::SecondRun => "secondRunRate",
            RunoutRate::ThirdRun => "thirdRunRate",
        }
    }

    fn get(self, params: &RunoutParams) -> f64 {
        match self {
            RunoutRate::Warranty => params.warranty_rate,
            RunoutRate::FirstRun => params.first_run_rate,
            RunoutRate::SecondRun => params.second_run_rate,
            RunoutRate::ThirdRun => params.third_run_rate,
        }
    }

    fn set(self, params: &mut RunoutParams, value: f64) {
        match self {
            RunoutRate::Warranty => params.warranty_rate = value,
            RunoutRate::FirstRun => params.first_run_rate = value,
            RunoutRate::SecondRun => params.second_run_rate = value,
            RunoutRate::ThirdRun => params.third_run_rate = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunoutSeekResult {
    pub solve_for: RunoutRate,
    pub rate: f64,
    pub iterations: u32,
    pub cumulative_total_revenue: f64,
    pub history: Vec<SolverIteration>,
}

pub fn calculate(params: &RunoutParams) -> Result<RunoutResult, ModelError> {
    params.validate()?;
    Ok(compute(params))
}

/// Finds the value of `solve_for` that brings cumulative total revenue to `target_revenue`.
pub fn seek_runout_rate(
    params: &RunoutParams,
    target_revenue: f64,
    solve_for: RunoutRate,
    config: GoalSeekConfig,
) -> Result<RunoutSeekResult, ModelError> {
    params.validate()?;
    if !target_revenue.is_finite() || target_revenue <= 0.0 {
        return Err(invalid("targetRevenue must be > 0"));
    }

    let current = solve_for.get(params);
    let initial_guess = if current > 0.0 { current } else { 1.0 };
    let objective = |rate: f64| {
        let mut candidate = params.clone();
        solve_for.set(&mut candidate, rate);
        let revenue = compute(&candidate).cumulative_total_revenue;
        if revenue.is_finite() {
            Ok(revenue - target_revenue)
        } else {
            Err(ModelError::NonFinite("cumulative total revenue"))
        }
    };
    let outcome = newton_raphson(objective, initial_guess, config)?;
    if outcome.root < 0.0 {
        return Err(ModelError::NegativeRate {
            field: solve_for.field_name(),
            rate: outcome.root,
        });
    }

    let mut solved = params.clone();
    solve_for.set(&mut solved, outcome.root);
    Ok(RunoutSeekResult {
        solve_for,
        rate: outcome.root,
        iterations: outcome.iterations,
        cumulative_total_revenue: compute(&solved).cumulative_total_revenue,
        history: outcome.history,
    })
}

fn compute(params: &RunoutParams) -> RunoutResult {
    let mut periods = contract_periods(params.contract_start_date, params.contract_end_date);
    debug!(periods = periods.len(), "runout contract periods");

    let rates = params.effective_rates();
    let escalation_factor = 1.0 + params.rate_escalation / 100.0;
    let hours_per_day = params.au_hours / params.num_of_days_in_year;

    for (idx, period) in periods.iter_mut().enumerate() {
        period.rate_trend = escalation_factor.powi(idx as i32);
        let engines: Vec<EngineYear> = params
            .engines
            .iter()
            .enumerate()
            .map(|(engine_idx, engine)| {
                engine_year(period, engine, engine_idx, rates, hours_per_day, params)
            })
            .collect();
        period.engines = engines;
        period.total_fh_revenue = period.engines.iter().map(|e| e.fh_revenue).sum();
    }

    let management_share = params.management_fees / 100.0;
    let net_share = 1.0 - management_share;
    let mut result = RunoutResult {
        periods: Vec::new(),
        total_fh_revenue: 0.0,
        mgmt_fee_revenue: 0.0,
        aic_revenue: 0.0,
        trust_load_revenue: 0.0,
        trust_revenue: 0.0,
        total_revenue: 0.0,
        enrollment_fees: params.enrollment_fees,
        buy_in: params.buy_in,
        cumulative_total_revenue: 0.0,
    };

    let mut cumulative = 0.0;
    for (idx, period) in periods.iter_mut().enumerate() {
        let total_fh = period.total_fh_revenue;
        period.mgmt_fee_revenue = total_fh * management_share;
        period.aic_revenue = total_fh * net_share * (params.aic_fees / 100.0);
        period.trust_load_revenue = total_fh * net_share * (params.trust_load_fees / 100.0);
        period.buy_in = if idx == 0 { params.buy_in } else { 0.0 };
        period.trust_revenue = total_fh
            - (period.mgmt_fee_revenue
                + period.aic_revenue
                + period.trust_load_revenue
                + period.buy_in);
        period.total_revenue = period.mgmt_fee_revenue
            + period.aic_revenue
            + period.trust_load_revenue
            + period.buy_in
            + period.trust_revenue;
        cumulative += period.total_revenue;
        period.cumulative_total_revenue = cumulative;

        result.total_fh_revenue += total_fh;
        result.mgmt_fee_revenue += period.mgmt_fee_revenue;
        result.aic_revenue += period.aic_revenue;
        result.trust_load_revenue += period.trust_load_revenue;
        result.trust_revenue += period.trust_revenue;
        result.total_revenue += period.total_revenue;
    }

    result.cumulative_total_revenue = cumulative;
    result.periods = periods;
    result
}

fn engine_year(
    period: &ContractPeriod,
    engine: &EngineSchedule,
    engine_idx: usize,
    rates: [f64; 4],
    hours_per_day: f64,
    params: &RunoutParams,
) -> EngineYear {
    let window_start = period.runout_start_date;
    let window_end = period.runout_end_date;
    let within = |start: NaiveDate, end: NaiveDate| days_within(start, end, window_start, window_end);

    let warranty_rate_days = within(window_start, engine.warranty_exp_date);
    let first_run_rate_days = within(
        next_day(engine.warranty_exp_date),
        engine.first_run_rate_switch_date,
    );
    let second_run_rate_days = within(
        next_day(engine.first_run_rate_switch_date),
        engine.second_run_rate_switch_date,
    );
    // the last tier keeps billing past its switch date
    let third_run_rate_days = within(next_day(engine.second_run_rate_switch_date), window_end);
    let total_days =
        warranty_rate_days + first_run_rate_days + second_run_rate_days + third_run_rate_days;

    let warranty_calc = warranty_rate_days as f64 * rates[0];
    let first_run_rate_calc = first_run_rate_days as f64 * rates[1];
    let second_run_rate_calc = second_run_rate_days as f64 * rates[2];
    let third_run_rate_calc = third_run_rate_days as f64 * rates[3];
    let rates_total =
        warranty_calc + first_run_rate_calc + second_run_rate_calc + third_run_rate_calc;
    let escalated_rate = rates_total * period.rate_trend;

    let fh_utilization = hours_per_day * total_days as f64;
    let shortfall = (params.flight_hours_minimum - fh_utilization).max(0.0);

    EngineYear {
        engine_id: engine.engine_id.unwrap_or(engine_idx as u64 + 1),
        warranty_rate_days,
        first_run_rate_days,
        second_run_rate_days,
        third_run_rate_days,
        total_days,
        fh_utilization,
        shortfall,
        warranty_calc,
        first_run_rate_calc,
        second_run_rate_calc,
        third_run_rate_calc,
        rates: rates_total,
        escalated_rate,
        fh_revenue: escalated_rate * hours_per_day,
    }
}

/// Splits the contract into billing years.
///
/// A year starting on or before the 14th closes at the end of the previous
/// month one year later; a later start closes at the end of its own month.
/// The last year is clamped to the contract end, and years shorter than
/// [`MIN_PERIOD_DAYS`] are dropped.
pub fn contract_periods(start: NaiveDate, end: NaiveDate) -> Vec<ContractPeriod> {
    let mut periods = Vec::new();
    let mut current = start;
    let mut year_number = 1;

    while current <= end {
        let period_end = billing_year_end(current).min(end);
        let runout_start = period_end
            .checked_sub_months(Months::new(12))
            .map(next_day)
            .unwrap_or(current)
            .max(current);

        let num_of_days = inclusive_days(current, period_end);
        if num_of_days >= MIN_PERIOD_DAYS {
            periods.push(ContractPeriod {
                start_date: current,
                end_date: period_end,
                num_of_days,
                runout_start_date: runout_start,
                runout_end_date: period_end,
                num_of_runout_days: inclusive_days(runout_start, period_end),
                contract_year_number: year_number,
                rate_trend: 1.0,
                engines: Vec::new(),
                total_fh_revenue: 0.0,
                mgmt_fee_revenue: 0.0,
                aic_revenue: 0.0,
                trust_load_revenue: 0.0,
                buy_in: 0.0,
                trust_revenue: 0.0,
                total_revenue: 0.0,
                cumulative_total_revenue: 0.0,
            });
            year_number += 1;
        }

        match period_end.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }

    periods
}

fn billing_year_end(start: NaiveDate) -> NaiveDate {
    let year = start.year() + 1;
    let closing_month = if start.day() <= 14 {
        start.month()
    } else {
        start.month() + 1
    };
    // the day before the first of the month after the closing month
    let (year, month) = if closing_month > 12 {
        (year + 1, closing_month - 12)
    } else {
        (year, closing_month)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

fn days_within(start: NaiveDate, end: NaiveDate, window_start: NaiveDate, window_end: NaiveDate) -> i64 {
    if start > window_end || end < window_start {
        return 0;
    }
    inclusive_days(start.max(window_start), end.min(window_end))
}

fn inclusive_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

/// Accepts `2024-01-31` as well as RFC 3339 timestamps such as `2024-01-31T23:59:59Z`.
fn date_or_timestamp<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let date_part = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(serde::de::Error::custom)
}
