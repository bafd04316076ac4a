use super::types::{ModelError, SimulationParameters, SimulationResult, ThresholdMode, YearTrace};

/// Runs the year-by-year profit model at `rate` and returns the full trace.
pub fn simulate(params: &SimulationParameters, rate: f64) -> Result<SimulationResult, ModelError> {
    params.validate()?;
    let mut yearly_trace = Vec::with_capacity(params.num_years as usize);
    let cumulative_profit = run_years(params, rate, Some(&mut yearly_trace))?;
    Ok(SimulationResult {
        cumulative_profit,
        yearly_trace,
    })
}

/// Same arithmetic as [`simulate`] without building the trace.
pub fn cumulative_profit(params: &SimulationParameters, rate: f64) -> Result<f64, ModelError> {
    params.validate()?;
    run_years(params, rate, None)
}

/// Caller guarantees `params` already passed validation.
pub(crate) fn cumulative_profit_unchecked(
    params: &SimulationParameters,
    rate: f64,
) -> Result<f64, ModelError> {
    run_years(params, rate, None)
}

fn run_years(
    params: &SimulationParameters,
    rate: f64,
    mut trace: Option<&mut Vec<YearTrace>>,
) -> Result<f64, ModelError> {
    if !rate.is_finite() {
        return Err(ModelError::NonFinite("warranty rate"));
    }

    let escalation_factor = 1.0 + params.rate_escalation / 100.0;
    let mut cumulative_profit = 0.0;

    for year in 1..=params.num_years {
        let tsn = params.initial_tsn + params.au_hours * year as f64;
        let escalated_rate = rate * escalation_factor.powi(year as i32 - 1);
        if !escalated_rate.is_finite() {
            return Err(ModelError::NonFinite("escalated rate"));
        }

        let engine_revenue = params.au_hours * escalated_rate;
        let aic_revenue = engine_revenue * params.aic / 100.0;
        let total_revenue = engine_revenue + aic_revenue;
        if !total_revenue.is_finite() {
            return Err(ModelError::NonFinite("revenue"));
        }

        let hsi_events = threshold_events(params, year, tsn, params.hsi_tsn);
        let overhaul_events = threshold_events(params, year, tsn, params.overhaul_tsn);
        let hsi_cost = if hsi_events > 0 {
            params.hsi_cost * hsi_events as f64
        } else {
            0.0
        };
        let overhaul_cost = if overhaul_events > 0 {
            params.overhaul_cost * overhaul_events as f64
        } else {
            0.0
        };
        let maintenance_cost = hsi_cost + overhaul_cost;

        let profit = total_revenue - maintenance_cost;
        cumulative_profit += profit;
        if !cumulative_profit.is_finite() {
            return Err(ModelError::NonFinite("cumulative profit"));
        }

        if let Some(trace) = trace.as_deref_mut() {
            trace.push(YearTrace {
                year,
                tsn,
                escalated_rate,
                engine_revenue,
                aic_revenue,
                total_revenue,
                hsi_events,
                overhaul_events,
                maintenance_cost,
                profit,
                cumulative_profit,
            });
        }
    }

    Ok(cumulative_profit)
}

fn threshold_events(params: &SimulationParameters, year: u32, tsn: f64, threshold: f64) -> u32 {
    match params.threshold_mode {
        ThresholdMode::FirstCrossing => {
            let reached = tsn >= threshold && (year == 1 || tsn - params.au_hours < threshold);
            u32::from(reached)
        }
        ThresholdMode::EveryMultiple => {
            let previous_tsn = params.initial_tsn + params.au_hours * (year - 1) as f64;
            let already_counted = if year == 1 {
                // the multiple the engine starts on has not been charged yet
                ((previous_tsn / threshold).ceil() - 1.0).max(0.0)
            } else {
                (previous_tsn / threshold).floor()
            };
            let crossed = (tsn / threshold).floor() - already_counted;
            if crossed > 0.0 { crossed as u32 } else { 0 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MAX_YEARS;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_parameters(num_years: u32) -> SimulationParameters {
        SimulationParameters {
            num_years,
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
            threshold_mode: ThresholdMode::FirstCrossing,
        }
    }

    #[test]
    fn reference_parameters_yield_positive_profit_at_initial_rate() {
        let params = sample_parameters(10);
        let profit = cumulative_profit(&params, params.initial_rate).expect("valid parameters");
        assert!(profit > 0.0, "expected positive profit, got {profit}");
    }

    #[test]
    fn single_year_has_one_trace_entry_and_no_events_below_threshold() {
        let params = sample_parameters(1);
        let result = simulate(&params, 320.0).expect("valid parameters");

        assert_eq!(result.yearly_trace.len(), 1);
        let year = result.yearly_trace[0];
        assert_eq!(year.year, 1);
        assert_approx(year.tsn, 550.0);
        assert_approx(year.escalated_rate, 320.0);
        assert_approx(year.engine_revenue, 144_000.0);
        assert_approx(year.aic_revenue, 14_400.0);
        assert_approx(year.total_revenue, 158_400.0);
        assert_eq!(year.hsi_events, 0);
        assert_eq!(year.overhaul_events, 0);
        assert_approx(result.cumulative_profit, 158_400.0);
    }

    #[test]
    fn single_year_charges_event_when_first_year_reaches_threshold() {
        let mut params = sample_parameters(1);
        params.initial_tsn = 800.0;
        let result = simulate(&params, 320.0).expect("valid parameters");

        assert_eq!(result.yearly_trace[0].hsi_events, 1);
        assert_eq!(result.yearly_trace[0].overhaul_events, 0);
        assert_approx(result.cumulative_profit, 158_400.0 - 50_000.0);
    }

    #[test]
    fn maintenance_events_fire_in_the_crossing_year_only() {
        let params = sample_parameters(10);
        let result = simulate(&params, 320.0).expect("valid parameters");

        let hsi_years: Vec<u32> = result
            .yearly_trace
            .iter()
            .filter(|y| y.hsi_events > 0)
            .map(|y| y.year)
            .collect();
        let overhaul_years: Vec<u32> = result
            .yearly_trace
            .iter()
            .filter(|y| y.overhaul_events > 0)
            .map(|y| y.year)
            .collect();

        // tsn reaches 1000 in year 2 and 3250 in year 7
        assert_eq!(hsi_years, vec![2]);
        assert_eq!(overhaul_years, vec![7]);
        assert_approx(result.yearly_trace[1].maintenance_cost, 50_000.0);
        assert_approx(result.yearly_trace[6].maintenance_cost, 100_000.0);
    }

    #[test]
    fn trace_escalates_rate_and_accumulates_profit() {
        let params = sample_parameters(3);
        let result = simulate(&params, 100.0).expect("valid parameters");

        assert_approx(result.yearly_trace[0].escalated_rate, 100.0);
        assert_approx(result.yearly_trace[1].escalated_rate, 105.0);
        assert_approx(result.yearly_trace[2].escalated_rate, 110.25);

        let mut running = 0.0;
        for year in &result.yearly_trace {
            running += year.profit;
            assert_approx(year.cumulative_profit, running);
        }
        assert_approx(result.cumulative_profit, running);
    }

    #[test]
    fn every_multiple_mode_charges_recurring_inspections() {
        let first = sample_parameters(10);
        let mut recurring = first.clone();
        recurring.threshold_mode = ThresholdMode::EveryMultiple;

        let first_result = simulate(&first, 320.0).expect("valid parameters");
        let recurring_result = simulate(&recurring, 320.0).expect("valid parameters");

        // tsn runs 100 -> 4600: HSI multiples 1000..=4000, overhaul at 3000
        let hsi_total: u32 = recurring_result.yearly_trace.iter().map(|y| y.hsi_events).sum();
        let overhaul_total: u32 = recurring_result
            .yearly_trace
            .iter()
            .map(|y| y.overhaul_events)
            .sum();
        assert_eq!(hsi_total, 4);
        assert_eq!(overhaul_total, 1);
        assert_approx(
            first_result.cumulative_profit - recurring_result.cumulative_profit,
            150_000.0,
        );
    }

    #[test]
    fn every_multiple_mode_counts_several_crossings_in_one_year() {
        let mut params = sample_parameters(1);
        params.threshold_mode = ThresholdMode::EveryMultiple;
        params.initial_tsn = 0.0;
        params.au_hours = 2_500.0;

        let result = simulate(&params, 10.0).expect("valid parameters");
        assert_eq!(result.yearly_trace[0].hsi_events, 2);
        assert_approx(result.yearly_trace[0].maintenance_cost, 100_000.0);
    }

    #[test]
    fn starting_exactly_on_a_threshold_charges_year_one_in_both_modes() {
        for mode in [ThresholdMode::FirstCrossing, ThresholdMode::EveryMultiple] {
            let mut params = sample_parameters(2);
            params.threshold_mode = mode;
            params.initial_tsn = 1_000.0;

            let result = simulate(&params, 320.0).expect("valid parameters");
            assert_eq!(result.yearly_trace[0].hsi_events, 1, "{mode:?} year 1");
            assert_eq!(result.yearly_trace[1].hsi_events, 0, "{mode:?} year 2");
        }
    }

    #[test]
    fn horizon_at_the_year_cap_is_accepted() {
        let mut params = sample_parameters(MAX_YEARS);
        params.rate_escalation = 0.0;
        let result = simulate(&params, 1.0).expect("cap is inclusive");
        assert_eq!(result.yearly_trace.len(), MAX_YEARS as usize);
    }

    #[test]
    fn simulate_and_cumulative_profit_agree_bit_for_bit() {
        let params = sample_parameters(35);
        let traced = simulate(&params, 70.456).expect("valid parameters");
        let plain = cumulative_profit(&params, 70.456).expect("valid parameters");
        assert_eq!(traced.cumulative_profit.to_bits(), plain.to_bits());
    }

    #[test]
    fn rejects_zero_years() {
        let params = sample_parameters(0);
        let err = simulate(&params, 320.0).expect_err("must reject zero years");
        assert_eq!(err.kind(), "InvalidParameters");
        assert!(err.to_string().contains("numYears"));
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let cases: [(&str, fn(&mut SimulationParameters)); 12] = [
            ("numYears", |p| p.num_years = MAX_YEARS + 1),
            ("numYears", |p| p.num_years = 4_000_000_000),
            ("auHours", |p| p.au_hours = 0.0),
            ("initialTSN", |p| p.initial_tsn = -1.0),
            ("rateEscalation", |p| p.rate_escalation = -0.5),
            ("aic", |p| p.aic = 120.0),
            ("hsiTsn", |p| p.hsi_tsn = 0.0),
            ("overhaulTsn", |p| p.overhaul_tsn = -3.0),
            ("hsiCost", |p| p.hsi_cost = -1.0),
            ("overhaulCost", |p| p.overhaul_cost = f64::NAN),
            ("targetProfit", |p| p.target_profit = 0.0),
            ("initialRate", |p| p.initial_rate = -320.0),
        ];

        for (field, mutate) in cases {
            let mut params = sample_parameters(10);
            mutate(&mut params);
            let err = cumulative_profit(&params, 320.0).expect_err("must reject");
            assert!(
                err.to_string().contains(field),
                "expected error mentioning {field}, got {err}"
            );
        }
    }

    #[test]
    fn non_finite_rate_is_reported() {
        let params = sample_parameters(10);
        let err = simulate(&params, f64::INFINITY).expect_err("must reject infinite rate");
        assert_eq!(err, ModelError::NonFinite("warranty rate"));
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_profit_is_non_decreasing_in_rate(
            num_years in 1u32..60,
            au_hours in 1u32..5_000,
            initial_tsn in 0u32..10_000,
            escalation_bp in 0u32..1_500,
            aic in 0u32..101,
            rate_a in 0u32..200_000,
            rate_delta in 0u32..50_000,
        ) {
            let mut params = sample_parameters(num_years);
            params.au_hours = au_hours as f64;
            params.initial_tsn = initial_tsn as f64;
            params.rate_escalation = escalation_bp as f64 / 100.0;
            params.aic = aic as f64;

            let low_rate = rate_a as f64 / 100.0;
            let high_rate = low_rate + rate_delta as f64 / 100.0;
            let low = cumulative_profit(&params, low_rate).expect("valid parameters");
            let high = cumulative_profit(&params, high_rate).expect("valid parameters");
            prop_assert!(high >= low, "profit fell from {low} to {high}");
        }

        #[test]
        fn prop_simulation_is_deterministic(
            num_years in 1u32..60,
            rate in 1u32..100_000,
            every_multiple in proptest::bool::ANY,
        ) {
            let mut params = sample_parameters(num_years);
            if every_multiple {
                params.threshold_mode = ThresholdMode::EveryMultiple;
            }
            let rate = rate as f64 / 10.0;
            let first = simulate(&params, rate).expect("valid parameters");
            let second = simulate(&params, rate).expect("valid parameters");
            prop_assert_eq!(first.cumulative_profit.to_bits(), second.cumulative_profit.to_bits());
            prop_assert_eq!(first.yearly_trace.len(), num_years as usize);
            prop_assert_eq!(first, second);
        }
    }
}
