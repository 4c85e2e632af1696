//! Anomaly detection over one site's snapshot.
//!
//! Every check is advisory: it reports, it never patches. Soft-deleted
//! segments and invoice lines are invisible to all checks except
//! `InvoiceOnDeletedSegment`, which exists to find live invoices pointing at them.

use std::collections::{HashMap, HashSet};

use crate::model::{
    AnomalyKind, AnomalyReport, InvoiceLine, ReconciliationResult, Service, StreetSegment,
};
use crate::pricing::{active_segments, total_planned_area};
use crate::reconcile::compare_amounts;

/// Lifecycle violations and unscaled service quantities.
pub fn detect_anomalies(services: &[Service], segments: &[StreetSegment]) -> Vec<AnomalyReport> {
    let mut reports = detect_lifecycle_anomalies(segments);
    reports.extend(detect_unscaled_quantities(services, total_planned_area(segments)));
    reports
}

/// Segments with executed area whose status never reached completed.
pub fn detect_lifecycle_anomalies(segments: &[StreetSegment]) -> Vec<AnomalyReport> {
    active_segments(segments)
        .filter(|s| s.has_execution_data() && !s.is_completed())
        .map(|s| {
            AnomalyReport::new(
                AnomalyKind::LifecycleAnomaly,
                &s.site_id,
                &s.id,
                format!(
                    "executed area {:.2} m² but status is '{}'",
                    s.executed(),
                    s.status
                ),
            )
        })
        .collect()
}

/// Services whose quantity defaulted to 1 on a site with real planned area.
pub fn detect_unscaled_quantities(
    services: &[Service],
    total_planned_area: f64,
) -> Vec<AnomalyReport> {
    if total_planned_area <= 1.0 {
        return Vec::new();
    }

    services
        .iter()
        .filter(|s| (s.quantity - 1.0).abs() < f64::EPSILON)
        .map(|s| {
            AnomalyReport::new(
                AnomalyKind::LikelyUnscaledQuantity,
                &s.site_id,
                &s.id,
                format!(
                    "quantity is 1 but site planned area is {total_planned_area:.2} m²; \
                     scaled total would be {:.2}",
                    total_planned_area * s.unit_price
                ),
            )
        })
        .collect()
}

/// Services whose stored total disagrees with quantity x unit price.
pub fn detect_service_total_mismatches(services: &[Service], tolerance: f64) -> Vec<AnomalyReport> {
    services
        .iter()
        .filter_map(|s| match compare_amounts(s.expected_total(), s.total_value, tolerance) {
            ReconciliationResult::Consistent => None,
            ReconciliationResult::Drifted { expected, actual } => Some(AnomalyReport::new(
                AnomalyKind::ServiceTotalMismatch,
                &s.site_id,
                &s.id,
                format!("stored total {actual:.2}, quantity x unit price {expected:.2}"),
            )),
        })
        .collect()
}

/// Completed segments whose stored value disagrees with the site price.
///
/// An absent stored value reads as zero.
pub fn detect_segment_valuation_drift(
    segments: &[StreetSegment],
    price_per_area: f64,
    tolerance: f64,
) -> Vec<AnomalyReport> {
    active_segments(segments)
        .filter(|s| s.is_completed() && s.has_execution_data())
        .filter_map(|s| {
            let expected = s.executed() * price_per_area;
            let actual = s.total_value.unwrap_or(0.0);
            match compare_amounts(expected, actual, tolerance) {
                ReconciliationResult::Consistent => None,
                ReconciliationResult::Drifted { expected, actual } => Some(AnomalyReport::new(
                    AnomalyKind::SegmentValuationDrift,
                    &s.site_id,
                    &s.id,
                    format!(
                        "stored value {actual:.2}, expected {expected:.2} at {price_per_area:.2}/m²"
                    ),
                )),
            }
        })
        .collect()
}

/// Turn a drifted reconciliation into a report. `None` when consistent.
pub fn invoice_drift_report(
    line: &InvoiceLine,
    result: &ReconciliationResult,
) -> Option<AnomalyReport> {
    match result {
        ReconciliationResult::Consistent => None,
        ReconciliationResult::Drifted { expected, actual } => Some(AnomalyReport::new(
            AnomalyKind::InvoiceDrift,
            &line.site_id,
            &line.id,
            format!(
                "invoiced {actual:.2}, expected {expected:.2} for {:.2} m² (delta {:+.2})",
                line.executed_area,
                actual - expected
            ),
        )),
    }
}

/// Live invoices that point at deleted, unknown, foreign, or unfinished segments.
///
/// `segments` may span several sites: a segment is matched on the invoice's
/// own site first, and a match only under another site is reported as foreign.
pub fn detect_invoice_linkage(
    invoices: &[InvoiceLine],
    segments: &[StreetSegment],
) -> Vec<AnomalyReport> {
    let on_site: HashMap<(&str, &str), &StreetSegment> = segments
        .iter()
        .map(|s| ((s.site_id.as_str(), s.id.as_str()), s))
        .collect();
    let any_site: HashMap<&str, &StreetSegment> =
        segments.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut reports = Vec::new();
    for line in invoices.iter().filter(|l| !l.is_deleted()) {
        let key = (line.site_id.as_str(), line.segment_id.as_str());
        match on_site.get(&key) {
            Some(seg) if seg.is_deleted() => reports.push(AnomalyReport::new(
                AnomalyKind::InvoiceOnDeletedSegment,
                &line.site_id,
                &line.id,
                format!("segment '{}' is deleted", seg.id),
            )),
            Some(seg) if !seg.is_completed() => reports.push(AnomalyReport::new(
                AnomalyKind::InvoiceOnIncompleteSegment,
                &line.site_id,
                &line.id,
                format!("segment '{}' has status '{}'", seg.id, seg.status),
            )),
            Some(_) => {}
            None => match any_site.get(line.segment_id.as_str()) {
                Some(seg) => reports.push(AnomalyReport::new(
                    AnomalyKind::InvoiceOnForeignSegment,
                    &line.site_id,
                    &line.id,
                    format!("segment '{}' belongs to site '{}'", seg.id, seg.site_id),
                )),
                None => reports.push(AnomalyReport::new(
                    AnomalyKind::InvoiceOnDeletedSegment,
                    &line.site_id,
                    &line.id,
                    format!("segment '{}' not found", line.segment_id),
                )),
            },
        }
    }
    reports
}

/// Live invoices after the first one for the same segment.
pub fn detect_duplicate_invoices(invoices: &[InvoiceLine]) -> Vec<AnomalyReport> {
    let mut first_by_segment: HashMap<(&str, &str), &str> = HashMap::new();

    let mut reports = Vec::new();
    for line in invoices.iter().filter(|l| !l.is_deleted()) {
        let key = (line.site_id.as_str(), line.segment_id.as_str());
        match first_by_segment.get(&key) {
            Some(first) => reports.push(AnomalyReport::new(
                AnomalyKind::DuplicateInvoiceLine,
                &line.site_id,
                &line.id,
                format!(
                    "segment '{}' already invoiced by '{first}' ({:.2} billed again)",
                    line.segment_id, line.total_value
                ),
            )),
            None => {
                first_by_segment.insert(key, line.id.as_str());
            }
        }
    }
    reports
}

/// Completed segments with executed area and no live invoice line.
pub fn detect_missing_invoices(
    segments: &[StreetSegment],
    invoices: &[InvoiceLine],
) -> Vec<AnomalyReport> {
    let invoiced: HashSet<&str> = invoices
        .iter()
        .filter(|l| !l.is_deleted())
        .map(|l| l.segment_id.as_str())
        .collect();

    active_segments(segments)
        .filter(|s| s.is_completed() && s.has_execution_data())
        .filter(|s| !invoiced.contains(s.id.as_str()))
        .map(|s| {
            AnomalyReport::new(
                AnomalyKind::MissingInvoiceLine,
                &s.site_id,
                &s.id,
                format!("completed with {:.2} m² executed but never invoiced", s.executed()),
            )
        })
        .collect()
}

/// Completed segments valued without tonnage; their thickness was retained.
pub fn detect_incomplete_execution(segments: &[StreetSegment]) -> Vec<AnomalyReport> {
    active_segments(segments)
        .filter(|s| s.is_completed() && s.has_execution_data() && s.tonnage <= 0.0)
        .map(|s| {
            let detail = match s.thickness_cm {
                Some(t) => format!("no tonnage recorded; kept stored thickness {t:.2} cm"),
                None => "no tonnage recorded and no stored thickness".to_string(),
            };
            AnomalyReport::new(AnomalyKind::IncompleteExecutionData, &s.site_id, &s.id, detail)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SegmentStatus;
    use chrono::Utc;

    fn seg(id: &str, status: SegmentStatus, executed: Option<f64>) -> StreetSegment {
        StreetSegment {
            id: id.into(),
            site_id: "obra_1".into(),
            name: String::new(),
            planned_area: 1000.0,
            executed_area: executed,
            tonnage: 60.0,
            status,
            price_per_area: None,
            total_value: None,
            thickness_cm: None,
            deleted_at: None,
            completed_at: None,
        }
    }

    fn service(id: &str, quantity: f64, unit_price: f64, total: f64) -> Service {
        Service {
            id: id.into(),
            site_id: "obra_1".into(),
            description: "CBUQ".into(),
            unit: "m2".into(),
            quantity,
            unit_price,
            total_value: total,
        }
    }

    fn invoice(id: &str, segment_id: &str) -> InvoiceLine {
        InvoiceLine {
            id: id.into(),
            site_id: "obra_1".into(),
            segment_id: segment_id.into(),
            executed_area: 500.0,
            price_per_area: 13.0,
            total_value: 6500.0,
            completed_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn lifecycle_flags_stuck_segments_only() {
        let segments = vec![
            seg("r1", SegmentStatus::Planned, Some(120.0)),
            seg("r2", SegmentStatus::InProgress, Some(80.0)),
            seg("r3", SegmentStatus::Completed, Some(300.0)),
            seg("r4", SegmentStatus::Planned, None),
            seg("r5", SegmentStatus::InProgress, Some(0.0)),
        ];
        let reports = detect_lifecycle_anomalies(&segments);
        let ids: Vec<&str> = reports.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert!(reports.iter().all(|r| r.kind == AnomalyKind::LifecycleAnomaly));
        assert!(reports[0].detail.contains("planejada"));
    }

    #[test]
    fn lifecycle_ignores_deleted() {
        let mut gone = seg("r1", SegmentStatus::Planned, Some(120.0));
        gone.deleted_at = Some(Utc::now());
        assert!(detect_lifecycle_anomalies(&[gone]).is_empty());
    }

    #[test]
    fn unscaled_quantity_on_5700_m2_site() {
        let services = vec![service("s1", 1.0, 8.0, 8.0), service("s2", 5700.0, 5.0, 28500.0)];
        let reports = detect_unscaled_quantities(&services, 5700.0);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, AnomalyKind::LikelyUnscaledQuantity);
        assert_eq!(reports[0].entity_id, "s1");
        assert!(reports[0].detail.contains("45600.00"));
    }

    #[test]
    fn unscaled_quantity_needs_real_area() {
        let services = vec![service("s1", 1.0, 8.0, 8.0)];
        assert!(detect_unscaled_quantities(&services, 1.0).is_empty());
        assert!(detect_unscaled_quantities(&services, 0.0).is_empty());
    }

    #[test]
    fn combined_detection() {
        let services = vec![service("s1", 1.0, 8.0, 8.0)];
        let segments = vec![seg("r1", SegmentStatus::InProgress, Some(10.0))];
        let reports = detect_anomalies(&services, &segments);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].kind, AnomalyKind::LifecycleAnomaly);
        assert_eq!(reports[1].kind, AnomalyKind::LikelyUnscaledQuantity);
    }

    #[test]
    fn service_total_mismatch() {
        let services = vec![
            service("ok", 100.0, 8.0, 800.0),
            service("bad", 100.0, 8.0, 8.0),
        ];
        let reports = detect_service_total_mismatches(&services, 0.01);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].entity_id, "bad");
    }

    #[test]
    fn segment_valuation_drift_reads_absent_as_zero() {
        let mut priced = seg("r1", SegmentStatus::Completed, Some(500.0));
        priced.total_value = Some(6500.0);
        let unpriced = seg("r2", SegmentStatus::Completed, Some(100.0));
        let mut stale = seg("r3", SegmentStatus::Completed, Some(100.0));
        stale.total_value = Some(2500.0);

        let reports = detect_segment_valuation_drift(&[priced, unpriced, stale], 13.0, 0.01);
        let ids: Vec<&str> = reports.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
    }

    #[test]
    fn invoice_linkage() {
        let mut deleted = seg("r_del", SegmentStatus::Completed, Some(500.0));
        deleted.deleted_at = Some(Utc::now());
        let segments = vec![
            seg("r_ok", SegmentStatus::Completed, Some(500.0)),
            seg("r_wip", SegmentStatus::InProgress, Some(500.0)),
            deleted,
        ];
        let mut dead_invoice = invoice("f_dead", "r_wip");
        dead_invoice.deleted_at = Some(Utc::now());
        let invoices = vec![
            invoice("f_ok", "r_ok"),
            invoice("f_wip", "r_wip"),
            invoice("f_del", "r_del"),
            invoice("f_ghost", "r_missing"),
            dead_invoice,
        ];

        let reports = detect_invoice_linkage(&invoices, &segments);
        let pairs: Vec<(AnomalyKind, &str)> =
            reports.iter().map(|r| (r.kind, r.entity_id.as_str())).collect();
        assert_eq!(
            pairs,
            vec![
                (AnomalyKind::InvoiceOnIncompleteSegment, "f_wip"),
                (AnomalyKind::InvoiceOnDeletedSegment, "f_del"),
                (AnomalyKind::InvoiceOnDeletedSegment, "f_ghost"),
            ]
        );
    }

    #[test]
    fn invoice_on_other_site_is_foreign() {
        let mut elsewhere = seg("r_norte", SegmentStatus::Completed, Some(500.0));
        elsewhere.site_id = "obra_2".into();
        let segments = vec![seg("r1", SegmentStatus::Completed, Some(500.0)), elsewhere];

        let reports = detect_invoice_linkage(&[invoice("f1", "r_norte")], &segments);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, AnomalyKind::InvoiceOnForeignSegment);
        assert_eq!(reports[0].site_id, "obra_1");
        assert!(reports[0].detail.contains("obra_2"));

        // Same id on both sites: the invoice's own site wins
        let mut twin = seg("r1", SegmentStatus::Planned, None);
        twin.site_id = "obra_2".into();
        let segments = vec![twin, seg("r1", SegmentStatus::Completed, Some(500.0))];
        assert!(detect_invoice_linkage(&[invoice("f1", "r1")], &segments).is_empty());
    }

    #[test]
    fn duplicate_invoices_reported_per_extra_line() {
        let mut dead = invoice("f_dead", "r1");
        dead.deleted_at = Some(Utc::now());
        let invoices = vec![
            invoice("f1", "r1"),
            dead,
            invoice("f2", "r1"),
            invoice("f3", "r2"),
            invoice("f4", "r1"),
        ];
        let reports = detect_duplicate_invoices(&invoices);
        let ids: Vec<&str> = reports.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["f2", "f4"]);
        assert!(reports.iter().all(|r| r.kind == AnomalyKind::DuplicateInvoiceLine));
        assert!(reports[0].detail.contains("'f1'"));
    }

    #[test]
    fn deleted_duplicate_is_not_reported() {
        let mut dead = invoice("f2", "r1");
        dead.deleted_at = Some(Utc::now());
        assert!(detect_duplicate_invoices(&[invoice("f1", "r1"), dead]).is_empty());
    }

    #[test]
    fn missing_invoices_ignore_deleted_lines() {
        let segments = vec![
            seg("r1", SegmentStatus::Completed, Some(500.0)),
            seg("r2", SegmentStatus::Completed, Some(200.0)),
            seg("r3", SegmentStatus::Planned, None),
        ];
        let mut dead = invoice("f2", "r2");
        dead.deleted_at = Some(Utc::now());
        let reports = detect_missing_invoices(&segments, &[invoice("f1", "r1"), dead]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].entity_id, "r2");
    }

    #[test]
    fn incomplete_execution_is_info() {
        let mut no_tonnage = seg("r1", SegmentStatus::Completed, Some(500.0));
        no_tonnage.tonnage = 0.0;
        no_tonnage.thickness_cm = Some(4.0);
        let reports = detect_incomplete_execution(&[no_tonnage, seg("r2", SegmentStatus::Completed, Some(1.0))]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].severity, crate::model::Severity::Info);
        assert!(reports[0].detail.contains("4.00"));
    }

    #[test]
    fn drift_report_only_when_drifted() {
        let line = invoice("f1", "r1");
        assert!(invoice_drift_report(&line, &ReconciliationResult::Consistent).is_none());
        let r = invoice_drift_report(
            &line,
            &ReconciliationResult::Drifted { expected: 6000.0, actual: 6500.0 },
        )
        .unwrap();
        assert_eq!(r.kind, AnomalyKind::InvoiceDrift);
        assert!(r.detail.contains("+500.00"));
    }
}
