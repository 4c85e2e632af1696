use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Lifecycle of a street segment. Forward-only in normal flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentStatus {
    #[serde(rename = "planejada", alias = "planned")]
    Planned,
    #[serde(rename = "em_execucao", alias = "in_progress")]
    InProgress,
    #[serde(rename = "concluida", alias = "completed")]
    Completed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planejada",
            Self::InProgress => "em_execucao",
            Self::Completed => "concluida",
        }
    }
}

impl std::fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planejada" | "planned" => Ok(Self::Planned),
            "em_execucao" | "in_progress" | "in-progress" => Ok(Self::InProgress),
            "concluida" | "completed" => Ok(Self::Completed),
            other => Err(other.to_string()),
        }
    }
}

/// A contracted line item (material or labor) priced for a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub site_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    pub quantity: f64,
    pub unit_price: f64,
    /// Stored total. Should equal `quantity * unit_price` but is not guaranteed to.
    pub total_value: f64,
}

impl Service {
    pub fn expected_total(&self) -> f64 {
        self.quantity * self.unit_price
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        non_negative("service", &self.id, "quantity", self.quantity)?;
        non_negative("service", &self.id, "unit_price", self.unit_price)?;
        finite("service", &self.id, "total_value", self.total_value)
    }
}

/// A street or paving sub-area within a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreetSegment {
    pub id: String,
    pub site_id: String,
    #[serde(default)]
    pub name: String,
    pub planned_area: f64,
    /// Absent until work starts.
    pub executed_area: Option<f64>,
    #[serde(default)]
    pub tonnage: f64,
    pub status: SegmentStatus,
    pub price_per_area: Option<f64>,
    pub total_value: Option<f64>,
    pub thickness_cm: Option<f64>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<NaiveDate>,
}

impl StreetSegment {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.status == SegmentStatus::Completed
    }

    /// Executed area with "not started" read as zero.
    pub fn executed(&self) -> f64 {
        self.executed_area.unwrap_or(0.0)
    }

    pub fn has_execution_data(&self) -> bool {
        self.executed() > 0.0
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        non_negative("segment", &self.id, "planned_area", self.planned_area)?;
        if let Some(executed) = self.executed_area {
            non_negative("segment", &self.id, "executed_area", executed)?;
        }
        non_negative("segment", &self.id, "tonnage", self.tonnage)?;
        if let Some(thickness) = self.thickness_cm {
            non_negative("segment", &self.id, "thickness_cm", thickness)?;
        }
        Ok(())
    }
}

/// Billing snapshot for a completed segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: String,
    pub site_id: String,
    pub segment_id: String,
    pub executed_area: f64,
    pub price_per_area: f64,
    pub total_value: f64,
    pub completed_at: Option<NaiveDate>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl InvoiceLine {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        non_negative("invoice", &self.id, "executed_area", self.executed_area)?;
        non_negative("invoice", &self.id, "price_per_area", self.price_per_area)?;
        finite("invoice", &self.id, "total_value", self.total_value)
    }
}

fn non_negative(
    entity: &'static str,
    record_id: &str,
    field: &'static str,
    value: f64,
) -> Result<(), ReconError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ReconError::Validation {
            entity,
            record_id: record_id.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

fn finite(
    entity: &'static str,
    record_id: &str,
    field: &'static str,
    value: f64,
) -> Result<(), ReconError> {
    if !value.is_finite() {
        return Err(ReconError::Validation {
            entity,
            record_id: record_id.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

/// Pre-loaded records, any number of sites mixed together.
#[derive(Debug, Clone, Default)]
pub struct ReconInput {
    pub services: Vec<Service>,
    pub segments: Vec<StreetSegment>,
    pub invoices: Vec<InvoiceLine>,
}

// ---------------------------------------------------------------------------
// Pricing + valuation
// ---------------------------------------------------------------------------

/// Totals behind a site's derived price-per-area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceBasis {
    pub total_service_value: f64,
    pub total_planned_area: f64,
    pub price_per_area: f64,
    /// Planned area summed to zero; price is reported as 0.
    pub zero_area_base: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThicknessSource {
    /// Derived from tonnage and executed area.
    Computed,
    /// Execution data incomplete; the stored value was kept.
    Retained,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Valuation {
    Valued {
        total_value: f64,
        /// `None` only when nothing could be computed and nothing was stored.
        thickness_cm: Option<f64>,
        thickness_source: ThicknessSource,
    },
    /// Segment is not completed or has no executed area.
    NotYetValuable,
}

// ---------------------------------------------------------------------------
// Invoice reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ReconciliationResult {
    Consistent,
    Drifted { expected: f64, actual: f64 },
}

impl ReconciliationResult {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Signed drift (`actual - expected`); zero when consistent.
    pub fn delta(&self) -> f64 {
        match self {
            Self::Consistent => 0.0,
            Self::Drifted { expected, actual } => actual - expected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceReconciliation {
    pub invoice_id: String,
    pub segment_id: String,
    pub result: ReconciliationResult,
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Execution data present but status never advanced to completed.
    LifecycleAnomaly,
    /// Service quantity left at 1 on a site measured in hundreds of m².
    LikelyUnscaledQuantity,
    /// Stored service total disagrees with quantity x unit price.
    ServiceTotalMismatch,
    /// Stored segment value disagrees with executed area x price-per-area.
    SegmentValuationDrift,
    /// Invoice total disagrees with recomputation.
    InvoiceDrift,
    InvoiceOnIncompleteSegment,
    InvoiceOnDeletedSegment,
    /// Invoice names a segment that belongs to another site.
    InvoiceOnForeignSegment,
    MissingInvoiceLine,
    /// More than one live invoice for the same segment.
    DuplicateInvoiceLine,
    IncompleteExecutionData,
    ZeroAreaBase,
}

impl AnomalyKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::IncompleteExecutionData | Self::ZeroAreaBase => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LifecycleAnomaly => "lifecycle_anomaly",
            Self::LikelyUnscaledQuantity => "likely_unscaled_quantity",
            Self::ServiceTotalMismatch => "service_total_mismatch",
            Self::SegmentValuationDrift => "segment_valuation_drift",
            Self::InvoiceDrift => "invoice_drift",
            Self::InvoiceOnIncompleteSegment => "invoice_on_incomplete_segment",
            Self::InvoiceOnDeletedSegment => "invoice_on_deleted_segment",
            Self::InvoiceOnForeignSegment => "invoice_on_foreign_segment",
            Self::MissingInvoiceLine => "missing_invoice_line",
            Self::DuplicateInvoiceLine => "duplicate_invoice_line",
            Self::IncompleteExecutionData => "incomplete_execution_data",
            Self::ZeroAreaBase => "zero_area_base",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub site_id: String,
    pub entity_id: String,
    pub detail: String,
}

impl AnomalyReport {
    pub fn new(
        kind: AnomalyKind,
        site_id: impl Into<String>,
        entity_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            site_id: site_id.into(),
            entity_id: entity_id.into(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-site report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteTotals {
    pub segments: usize,
    pub planned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub deleted: usize,
    pub planned_area: f64,
    pub executed_area: f64,
    /// Sum of valuations of completed segments.
    pub billable_value: f64,
    /// Sum of live invoice totals as stored.
    pub invoiced_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteReport {
    pub site_id: String,
    pub basis: PriceBasis,
    /// Non-deleted segments with valuation fields applied.
    pub segments: Vec<StreetSegment>,
    pub invoices: Vec<InvoiceReconciliation>,
    pub anomalies: Vec<AnomalyReport>,
    pub totals: SiteTotals,
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconSummary {
    pub sites: usize,
    pub segments_valued: usize,
    pub invoices_consistent: usize,
    pub invoices_drifted: usize,
    pub warnings: usize,
    pub infos: usize,
    pub anomaly_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconResult {
    pub meta: ReconMeta,
    pub summary: ReconSummary,
    pub sites: Vec<SiteReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
    pub density_t_per_m3: f64,
    pub invoice_tolerance: f64,
}
