use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use csv::StringRecord;
use tracing::{debug, info, warn};

use crate::aggregate::group_by_site;
use crate::anomaly::{
    detect_anomalies, detect_duplicate_invoices, detect_incomplete_execution,
    detect_invoice_linkage, detect_lifecycle_anomalies, detect_missing_invoices,
    detect_segment_valuation_drift, detect_service_total_mismatches, invoice_drift_report,
};
use crate::config::{InvoiceColumns, ReconConfig, SegmentColumns, ServiceColumns};
use crate::error::ReconError;
use crate::evidence::{compute_site_totals, compute_summary};
use crate::model::{
    AnomalyKind, AnomalyReport, InvoiceLine, InvoiceReconciliation, ReconInput, ReconMeta,
    ReconResult, SegmentStatus, Service, Severity, SiteReport, StreetSegment,
};
use crate::pricing::price_basis;
use crate::reconcile::reconcile_invoice_line;
use crate::valuation::apply_valuation;

/// Run reconciliation per config. Returns per-site reports + summary.
pub fn run(config: &ReconConfig, input: &ReconInput) -> Result<ReconResult, ReconError> {
    config.pricing.validate()?;
    for line in &input.invoices {
        line.validate()?;
    }

    let mut sites = Vec::new();
    for (site_id, site_input) in group_by_site(input) {
        sites.push(reconcile_site(&site_id, &site_input, &input.segments, config)?);
    }

    let summary = compute_summary(&sites);
    info!(
        sites = summary.sites,
        warnings = summary.warnings,
        drifted = summary.invoices_drifted,
        "reconciliation finished"
    );

    Ok(ReconResult {
        meta: ReconMeta {
            config_name: config.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: Utc::now().to_rfc3339(),
            density_t_per_m3: config.pricing.density_t_per_m3,
            invoice_tolerance: config.pricing.invoice_tolerance,
        },
        summary,
        sites,
    })
}

/// Reconcile one site's snapshot.
///
/// `all_segments` is every loaded segment, used only to tell foreign segment
/// references apart from missing ones.
///
/// With a zero planned-area base the price is not meaningful: segments get
/// their thickness but no value, and value drift checks are skipped.
pub fn reconcile_site(
    site_id: &str,
    site: &ReconInput,
    all_segments: &[StreetSegment],
    config: &ReconConfig,
) -> Result<SiteReport, ReconError> {
    let pricing = &config.pricing;
    let checks = &config.checks;
    let tolerance = pricing.invoice_tolerance;

    let basis = price_basis(&site.services, &site.segments)?;
    debug!(
        site_id,
        total_service_value = basis.total_service_value,
        total_planned_area = basis.total_planned_area,
        price_per_area = basis.price_per_area,
        "price basis"
    );

    let mut anomalies = Vec::new();
    if basis.zero_area_base && !site.services.is_empty() {
        anomalies.push(AnomalyReport::new(
            AnomalyKind::ZeroAreaBase,
            site_id,
            site_id,
            format!(
                "services total {:.2} but no planned area; price reported as 0",
                basis.total_service_value
            ),
        ));
    }

    // Valuation of live segments
    let mut segments = Vec::new();
    let mut valuations = Vec::new();
    for seg in site.segments.iter().filter(|s| !s.is_deleted()) {
        let (mut updated, valuation) = apply_valuation(seg, basis.price_per_area, pricing)?;
        if basis.zero_area_base {
            // Thickness only
            updated.price_per_area = seg.price_per_area;
            updated.total_value = seg.total_value;
        } else {
            valuations.push(valuation);
        }
        segments.push(updated);
    }

    // Invoice reconciliation
    let mut invoices = Vec::new();
    if !basis.zero_area_base {
        for line in site.invoices.iter().filter(|l| !l.is_deleted()) {
            let result = reconcile_invoice_line(line, basis.price_per_area, tolerance);
            anomalies.extend(invoice_drift_report(line, &result));
            invoices.push(InvoiceReconciliation {
                invoice_id: line.id.clone(),
                segment_id: line.segment_id.clone(),
                result,
            });
        }
    }

    if checks.unscaled_quantity {
        anomalies.extend(detect_anomalies(&site.services, &site.segments));
    } else {
        anomalies.extend(detect_lifecycle_anomalies(&site.segments));
    }
    if checks.service_totals {
        anomalies.extend(detect_service_total_mismatches(&site.services, tolerance));
    }
    if checks.segment_valuation && !basis.zero_area_base {
        anomalies.extend(detect_segment_valuation_drift(
            &site.segments,
            basis.price_per_area,
            tolerance,
        ));
    }
    anomalies.extend(detect_invoice_linkage(&site.invoices, all_segments));
    anomalies.extend(detect_duplicate_invoices(&site.invoices));
    if checks.missing_invoices {
        anomalies.extend(detect_missing_invoices(&site.segments, &site.invoices));
    }
    if checks.incomplete_execution {
        anomalies.extend(detect_incomplete_execution(&site.segments));
    }

    let warning_count = anomalies
        .iter()
        .filter(|a| a.severity == Severity::Warning)
        .count();
    if warning_count > 0 {
        warn!(site_id, warnings = warning_count, "site has anomalies");
    }

    let totals = compute_site_totals(&site.segments, &valuations, &site.invoices);

    Ok(SiteReport {
        site_id: site_id.to_string(),
        basis,
        segments,
        invoices,
        anomalies,
        totals,
    })
}

// ---------------------------------------------------------------------------
// CSV loading
// ---------------------------------------------------------------------------

/// Header lookup for one CSV table.
struct Header {
    entity: &'static str,
    names: Vec<String>,
}

impl Header {
    fn read(entity: &'static str, reader: &mut csv::Reader<&[u8]>) -> Result<Self, ReconError> {
        let names = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        Ok(Self { entity, names })
    }

    fn required(&self, column: &str) -> Result<usize, ReconError> {
        self.optional(column).ok_or_else(|| ReconError::MissingColumn {
            entity: self.entity,
            column: column.to_string(),
        })
    }

    fn optional(&self, column: &str) -> Option<usize> {
        self.names.iter().position(|h| h == column)
    }
}

fn cell<'r>(record: &'r StringRecord, idx: Option<usize>) -> &'r str {
    idx.and_then(|i| record.get(i)).map(str::trim).unwrap_or("")
}

/// Empty cells and "null" read as absent.
fn parse_opt_f64(
    entity: &'static str,
    record_id: &str,
    field: &'static str,
    raw: &str,
) -> Result<Option<f64>, ReconError> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| ReconError::NumberParse {
            entity,
            record_id: record_id.to_string(),
            field,
            value: raw.to_string(),
        })
}

/// Absent numbers read as zero.
fn parse_f64(
    entity: &'static str,
    record_id: &str,
    field: &'static str,
    raw: &str,
) -> Result<f64, ReconError> {
    Ok(parse_opt_f64(entity, record_id, field, raw)?.unwrap_or(0.0))
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (date part kept).
fn parse_opt_date(
    entity: &'static str,
    record_id: &str,
    raw: &str,
) -> Result<Option<NaiveDate>, ReconError> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Some(d));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| Some(dt.date_naive()))
        .map_err(|_| ReconError::DateParse {
            entity,
            record_id: record_id.to_string(),
            value: raw.to_string(),
        })
}

/// Accepts an RFC 3339 timestamp or a bare date (midnight UTC).
fn parse_opt_timestamp(
    entity: &'static str,
    record_id: &str,
    raw: &str,
) -> Result<Option<DateTime<Utc>>, ReconError> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| Some(d.and_time(NaiveTime::MIN).and_utc()))
        .map_err(|_| ReconError::DateParse {
            entity,
            record_id: record_id.to_string(),
            value: raw.to_string(),
        })
}

fn reader(csv_data: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes())
}

/// Load service rows (`obras_servicos` export).
pub fn load_services(csv_data: &str, columns: &ServiceColumns) -> Result<Vec<Service>, ReconError> {
    const ENTITY: &str = "service";
    let mut rdr = reader(csv_data);
    let header = Header::read(ENTITY, &mut rdr)?;

    let id_idx = Some(header.required(&columns.id)?);
    let site_idx = Some(header.required(&columns.site_id)?);
    let quantity_idx = Some(header.required(&columns.quantity)?);
    let unit_price_idx = Some(header.required(&columns.unit_price)?);
    let total_idx = Some(header.required(&columns.total_value)?);
    let description_idx = header.optional(&columns.description);
    let unit_idx = header.optional(&columns.unit);

    let mut services = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let id = cell(&record, id_idx).to_string();

        services.push(Service {
            site_id: cell(&record, site_idx).to_string(),
            description: cell(&record, description_idx).to_string(),
            unit: cell(&record, unit_idx).to_string(),
            quantity: parse_f64(ENTITY, &id, "quantity", cell(&record, quantity_idx))?,
            unit_price: parse_f64(ENTITY, &id, "unit_price", cell(&record, unit_price_idx))?,
            total_value: parse_f64(ENTITY, &id, "total_value", cell(&record, total_idx))?,
            id,
        });
    }

    debug!(rows = services.len(), "loaded services");
    Ok(services)
}

/// Load street segment rows (`obras_ruas` export).
pub fn load_segments(
    csv_data: &str,
    columns: &SegmentColumns,
) -> Result<Vec<StreetSegment>, ReconError> {
    const ENTITY: &str = "segment";
    let mut rdr = reader(csv_data);
    let header = Header::read(ENTITY, &mut rdr)?;

    let id_idx = Some(header.required(&columns.id)?);
    let site_idx = Some(header.required(&columns.site_id)?);
    let planned_idx = Some(header.required(&columns.planned_area)?);
    let status_idx = Some(header.required(&columns.status)?);
    let name_idx = header.optional(&columns.name);
    let executed_idx = header.optional(&columns.executed_area);
    let tonnage_idx = header.optional(&columns.tonnage);
    let price_idx = header.optional(&columns.price_per_area);
    let total_idx = header.optional(&columns.total_value);
    let thickness_idx = header.optional(&columns.thickness_cm);
    let deleted_idx = header.optional(&columns.deleted_at);
    let completed_idx = header.optional(&columns.completed_at);

    let mut segments = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let id = cell(&record, id_idx).to_string();

        let raw_status = cell(&record, status_idx);
        let status: SegmentStatus = raw_status.parse().map_err(|_| ReconError::UnknownStatus {
            record_id: id.clone(),
            value: raw_status.to_string(),
        })?;

        segments.push(StreetSegment {
            site_id: cell(&record, site_idx).to_string(),
            name: cell(&record, name_idx).to_string(),
            planned_area: parse_f64(ENTITY, &id, "planned_area", cell(&record, planned_idx))?,
            executed_area: parse_opt_f64(ENTITY, &id, "executed_area", cell(&record, executed_idx))?,
            tonnage: parse_f64(ENTITY, &id, "tonnage", cell(&record, tonnage_idx))?,
            status,
            price_per_area: parse_opt_f64(ENTITY, &id, "price_per_area", cell(&record, price_idx))?,
            total_value: parse_opt_f64(ENTITY, &id, "total_value", cell(&record, total_idx))?,
            thickness_cm: parse_opt_f64(ENTITY, &id, "thickness_cm", cell(&record, thickness_idx))?,
            deleted_at: parse_opt_timestamp(ENTITY, &id, cell(&record, deleted_idx))?,
            completed_at: parse_opt_date(ENTITY, &id, cell(&record, completed_idx))?,
            id,
        });
    }

    debug!(rows = segments.len(), "loaded segments");
    Ok(segments)
}

/// Load invoice rows (`obras_financeiro_faturamentos` export).
pub fn load_invoices(
    csv_data: &str,
    columns: &InvoiceColumns,
) -> Result<Vec<InvoiceLine>, ReconError> {
    const ENTITY: &str = "invoice";
    let mut rdr = reader(csv_data);
    let header = Header::read(ENTITY, &mut rdr)?;

    let id_idx = Some(header.required(&columns.id)?);
    let site_idx = Some(header.required(&columns.site_id)?);
    let segment_idx = Some(header.required(&columns.segment_id)?);
    let executed_idx = Some(header.required(&columns.executed_area)?);
    let price_idx = Some(header.required(&columns.price_per_area)?);
    let total_idx = Some(header.required(&columns.total_value)?);
    let completed_idx = header.optional(&columns.completed_at);
    let deleted_idx = header.optional(&columns.deleted_at);

    let mut invoices = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let id = cell(&record, id_idx).to_string();

        invoices.push(InvoiceLine {
            site_id: cell(&record, site_idx).to_string(),
            segment_id: cell(&record, segment_idx).to_string(),
            executed_area: parse_f64(ENTITY, &id, "executed_area", cell(&record, executed_idx))?,
            price_per_area: parse_f64(ENTITY, &id, "price_per_area", cell(&record, price_idx))?,
            total_value: parse_f64(ENTITY, &id, "total_value", cell(&record, total_idx))?,
            completed_at: parse_opt_date(ENTITY, &id, cell(&record, completed_idx))?,
            deleted_at: parse_opt_timestamp(ENTITY, &id, cell(&record, deleted_idx))?,
            id,
        });
    }

    debug!(rows = invoices.len(), "loaded invoices");
    Ok(invoices)
}
