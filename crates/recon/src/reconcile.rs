//! Invoice line consistency against a recomputed price-per-area.

use crate::model::{InvoiceLine, ReconciliationResult};

/// Absorbs binary float noise so a drift of exactly the tolerance in decimal
/// terms (e.g. 100.01 vs 100.00) still counts as within tolerance.
const FLOAT_SLACK: f64 = 1e-9;

/// Compare a stored amount against an expected amount.
///
/// The verdict depends only on `|actual - expected|`, so swapping the two
/// values never changes consistency, only the reported direction.
pub fn compare_amounts(expected: f64, actual: f64, tolerance: f64) -> ReconciliationResult {
    if (actual - expected).abs() <= tolerance + FLOAT_SLACK {
        ReconciliationResult::Consistent
    } else {
        ReconciliationResult::Drifted { expected, actual }
    }
}

/// Check `line.total_value` against `line.executed_area * expected_price_per_area`.
pub fn reconcile_invoice_line(
    line: &InvoiceLine,
    expected_price_per_area: f64,
    tolerance: f64,
) -> ReconciliationResult {
    let expected = line.executed_area * expected_price_per_area;
    compare_amounts(expected, line.total_value, tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_INVOICE_TOLERANCE;

    fn line(executed: f64, price: f64, total: f64) -> InvoiceLine {
        InvoiceLine {
            id: "fat_1".into(),
            site_id: "obra_1".into(),
            segment_id: "rua_1".into(),
            executed_area: executed,
            price_per_area: price,
            total_value: total,
            completed_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn exact_is_consistent() {
        let r = reconcile_invoice_line(&line(500.0, 13.0, 6500.0), 13.0, DEFAULT_INVOICE_TOLERANCE);
        assert_eq!(r, ReconciliationResult::Consistent);
    }

    #[test]
    fn one_cent_is_within_tolerance() {
        let r = reconcile_invoice_line(&line(10.0, 10.001, 100.01), 10.0, DEFAULT_INVOICE_TOLERANCE);
        assert!(r.is_consistent());
    }

    #[test]
    fn stale_price_drifts() {
        // Invoice was written at R$ 25/m2 but the site now prices at R$ 13/m2
        let r = reconcile_invoice_line(&line(500.0, 25.0, 12500.0), 13.0, DEFAULT_INVOICE_TOLERANCE);
        assert_eq!(
            r,
            ReconciliationResult::Drifted {
                expected: 6500.0,
                actual: 12500.0
            }
        );
        assert_eq!(r.delta(), 6000.0);
    }

    #[test]
    fn swap_keeps_verdict_flips_direction() {
        let a = compare_amounts(100.0, 100.5, 0.01);
        let b = compare_amounts(100.5, 100.0, 0.01);
        assert_eq!(a.is_consistent(), b.is_consistent());
        assert_eq!(a.delta(), -b.delta());
    }

    #[test]
    fn repeated_calls_agree() {
        let l = line(321.5, 12.0, 3858.2);
        let first = reconcile_invoice_line(&l, 12.0, 0.01);
        let second = reconcile_invoice_line(&l, 12.0, 0.01);
        assert_eq!(first, second);
    }
}
