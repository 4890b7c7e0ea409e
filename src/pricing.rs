//! Cost estimation for interval usage
//!
//! Pure functions mapping a batch of interval readings and the configured
//! pricing model to a dollar amount. No I/O and no error paths: absent data
//! falls back to the fixed-rate formula.

use crate::config::{CostMode, PricingConfig};
use crate::provider::types::{BillForecast, IntervalReading};
use chrono::Timelike;

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Estimate the cost of `intervals` under the configured pricing model.
///
/// Returns 0.0 for an empty batch. In api-estimate mode the rate is derived
/// from the last bill when available, otherwise the fixed rate applies. The
/// time-of-use peak window is half-open on the interval start hour:
/// `[peak_start_hour, peak_end_hour)`.
pub fn calculate_cost(
    intervals: &[IntervalReading],
    pricing: &PricingConfig,
    forecast: Option<&BillForecast>,
) -> f64 {
    if intervals.is_empty() {
        return 0.0;
    }

    let total_kwh: f64 = intervals.iter().map(|i| i.consumption).sum();

    match pricing.cost_mode {
        CostMode::ApiEstimate => {
            if let Some(rate) = forecast.and_then(BillForecast::derived_rate)
                && rate > 0.0
            {
                return round_cents(total_kwh * rate);
            }
            // No usable derived rate yet, fall back to the flat rate
            round_cents(total_kwh * pricing.fixed_rate)
        }
        CostMode::Fixed => round_cents(total_kwh * pricing.fixed_rate),
        CostMode::TimeOfUse => {
            let mut cost = 0.0;
            for interval in intervals {
                let hour = interval.timestamp.hour();
                let in_peak =
                    pricing.peak_start_hour <= hour && hour < pricing.peak_end_hour;
                let rate = if in_peak {
                    pricing.peak_rate
                } else {
                    pricing.off_peak_rate
                };
                cost += interval.consumption * rate;
            }
            round_cents(cost)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(hour: u32, minute: u32, kwh: f64) -> IntervalReading {
        IntervalReading {
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(hour, minute, 0)
                .unwrap(),
            consumption: kwh,
        }
    }

    fn tou_pricing() -> PricingConfig {
        PricingConfig {
            cost_mode: CostMode::TimeOfUse,
            peak_rate: 0.15,
            off_peak_rate: 0.08,
            peak_start_hour: 14,
            peak_end_hour: 19,
            ..PricingConfig::default()
        }
    }

    #[test]
    fn empty_intervals_cost_nothing() {
        for mode in [CostMode::ApiEstimate, CostMode::Fixed, CostMode::TimeOfUse] {
            let pricing = PricingConfig {
                cost_mode: mode,
                ..PricingConfig::default()
            };
            assert_eq!(calculate_cost(&[], &pricing, None), 0.0);
        }
    }

    #[test]
    fn fixed_rate_is_total_times_rate() {
        let pricing = PricingConfig {
            cost_mode: CostMode::Fixed,
            fixed_rate: 0.12,
            ..PricingConfig::default()
        };
        let intervals = vec![reading(0, 0, 1.5), reading(0, 30, 2.5)];
        assert!((calculate_cost(&intervals, &pricing, None) - 0.48).abs() < 1e-9);
    }

    #[test]
    fn tou_window_is_half_open() {
        let pricing = tou_pricing();
        // Exactly at peak start: peak rate
        assert!((calculate_cost(&[reading(14, 0, 1.0)], &pricing, None) - 0.15).abs() < 1e-9);
        // Exactly at peak end: off-peak rate
        assert!((calculate_cost(&[reading(19, 0, 1.0)], &pricing, None) - 0.08).abs() < 1e-9);
    }

    #[test]
    fn tou_boundary_uses_interval_start() {
        // 19:30 starts after the window even though 19:00-19:30 straddles nothing
        let pricing = tou_pricing();
        let intervals = vec![reading(7, 0, 1.0), reading(19, 30, 2.0)];
        let cost = calculate_cost(&intervals, &pricing, None);
        assert!((cost - 0.24).abs() < 1e-9);
    }

    #[test]
    fn tou_equal_start_end_is_always_off_peak() {
        let mut pricing = tou_pricing();
        pricing.peak_start_hour = 14;
        pricing.peak_end_hour = 14;
        let cost = calculate_cost(&[reading(14, 0, 1.0)], &pricing, None);
        assert!((cost - 0.08).abs() < 1e-9);
    }

    #[test]
    fn api_estimate_uses_derived_rate() {
        let pricing = PricingConfig {
            cost_mode: CostMode::ApiEstimate,
            ..PricingConfig::default()
        };
        let forecast = BillForecast {
            last_bill_charges: 120.0,
            last_bill_usage_kwh: 800.0,
            current_usage_kwh: 50.0,
            current_period_start: NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(),
            current_period_end: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            is_tou: false,
        };
        // 50 kWh at the 0.15 derived rate
        let intervals: Vec<IntervalReading> =
            (0..50).map(|i| reading(i / 10, (i % 10) * 5, 1.0)).collect();
        let cost = calculate_cost(&intervals, &pricing, Some(&forecast));
        assert!((cost - 7.50).abs() < 1e-9);
    }

    #[test]
    fn api_estimate_falls_back_to_fixed_without_rate() {
        let pricing = PricingConfig {
            cost_mode: CostMode::ApiEstimate,
            fixed_rate: 0.12,
            ..PricingConfig::default()
        };
        let forecast = BillForecast {
            last_bill_charges: 120.0,
            last_bill_usage_kwh: 0.0,
            current_usage_kwh: 0.0,
            current_period_start: NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(),
            current_period_end: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            is_tou: false,
        };
        let intervals = vec![reading(10, 0, 2.0)];
        // Zero last-bill usage means no derived rate
        assert!((calculate_cost(&intervals, &pricing, Some(&forecast)) - 0.24).abs() < 1e-9);
        // Missing forecast behaves the same
        assert!((calculate_cost(&intervals, &pricing, None) - 0.24).abs() < 1e-9);
    }

    #[test]
    fn result_is_rounded_to_cents() {
        let pricing = PricingConfig {
            cost_mode: CostMode::Fixed,
            fixed_rate: 0.1234,
            ..PricingConfig::default()
        };
        let intervals = vec![reading(0, 0, 1.0)];
        assert!((calculate_cost(&intervals, &pricing, None) - 0.12).abs() < 1e-9);
    }
}
