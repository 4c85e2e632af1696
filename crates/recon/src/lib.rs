//! `worldpav-recon`: paving price and billing reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded site snapshots (services, street
//! segments, invoice lines), returns derived prices, segment valuations,
//! invoice verdicts and anomaly reports. Never writes anything back.

pub mod aggregate;
pub mod anomaly;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod model;
pub mod pricing;
pub mod reconcile;
pub mod valuation;

pub use anomaly::detect_anomalies;
pub use config::{PricingConfig, ReconConfig, DEFAULT_ASPHALT_DENSITY};
pub use engine::run;
pub use error::ReconError;
pub use model::{
    AnomalyKind, AnomalyReport, InvoiceLine, ReconInput, ReconResult, ReconciliationResult,
    SegmentStatus, Service, StreetSegment, Valuation,
};
pub use pricing::compute_price_per_area;
pub use reconcile::reconcile_invoice_line;
pub use valuation::valuate_segment;
