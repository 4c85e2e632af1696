use std::collections::BTreeMap;

use crate::model::{
    InvoiceLine, ReconSummary, SegmentStatus, Severity, SiteReport, SiteTotals, StreetSegment,
    Valuation,
};

/// Per-site counts and money totals.
///
/// Status counts come from `all_segments` (deleted ones counted apart);
/// billable value is the sum of `valuations`.
pub fn compute_site_totals(
    all_segments: &[StreetSegment],
    valuations: &[Valuation],
    invoices: &[InvoiceLine],
) -> SiteTotals {
    let mut totals = SiteTotals::default();

    for seg in all_segments {
        if seg.is_deleted() {
            totals.deleted += 1;
            continue;
        }
        totals.segments += 1;
        match seg.status {
            SegmentStatus::Planned => totals.planned += 1,
            SegmentStatus::InProgress => totals.in_progress += 1,
            SegmentStatus::Completed => totals.completed += 1,
        }
        totals.planned_area += seg.planned_area;
        totals.executed_area += seg.executed();
    }

    totals.billable_value = valuations
        .iter()
        .map(|v| match v {
            Valuation::Valued { total_value, .. } => *total_value,
            Valuation::NotYetValuable => 0.0,
        })
        .sum();

    totals.invoiced_value = invoices
        .iter()
        .filter(|l| !l.is_deleted())
        .map(|l| l.total_value)
        .sum();

    totals
}

/// Compute summary statistics across all site reports.
pub fn compute_summary(sites: &[SiteReport]) -> ReconSummary {
    let mut anomaly_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut segments_valued = 0;
    let mut invoices_consistent = 0;
    let mut invoices_drifted = 0;
    let mut warnings = 0;
    let mut infos = 0;

    for site in sites {
        if !site.basis.zero_area_base {
            segments_valued += site
                .segments
                .iter()
                .filter(|s| s.is_completed() && s.has_execution_data())
                .count();
        }

        for inv in &site.invoices {
            if inv.result.is_consistent() {
                invoices_consistent += 1;
            } else {
                invoices_drifted += 1;
            }
        }

        for a in &site.anomalies {
            *anomaly_counts.entry(a.kind.to_string()).or_insert(0) += 1;
            match a.severity {
                Severity::Warning => warnings += 1,
                Severity::Info => infos += 1,
            }
        }
    }

    ReconSummary {
        sites: sites.len(),
        segments_valued,
        invoices_consistent,
        invoices_drifted,
        warnings,
        infos,
        anomaly_counts,
    }
}
