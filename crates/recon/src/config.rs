use serde::Deserialize;

use crate::error::ReconError;

/// Asphalt mix density in t/m³.
pub const DEFAULT_ASPHALT_DENSITY: f64 = 2.4;

/// Currency rounding tolerance for invoice and valuation checks.
pub const DEFAULT_INVOICE_TOLERANCE: f64 = 0.01;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconConfig {
    pub name: String,
    pub inputs: InputFiles,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub checks: CheckConfig,
    #[serde(default)]
    pub columns: ColumnConfig,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// CSV files relative to the config file's directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputFiles {
    pub services: String,
    pub segments: String,
    #[serde(default)]
    pub invoices: Option<String>,
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    #[serde(default = "default_density")]
    pub density_t_per_m3: f64,
    #[serde(default = "default_tolerance")]
    pub invoice_tolerance: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            density_t_per_m3: DEFAULT_ASPHALT_DENSITY,
            invoice_tolerance: DEFAULT_INVOICE_TOLERANCE,
        }
    }
}

fn default_density() -> f64 {
    DEFAULT_ASPHALT_DENSITY
}

fn default_tolerance() -> f64 {
    DEFAULT_INVOICE_TOLERANCE
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Toggles for the checks beyond lifecycle and invoice drift, which always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    #[serde(default = "enabled")]
    pub unscaled_quantity: bool,
    #[serde(default = "enabled")]
    pub service_totals: bool,
    #[serde(default = "enabled")]
    pub segment_valuation: bool,
    #[serde(default = "enabled")]
    pub missing_invoices: bool,
    #[serde(default = "enabled")]
    pub incomplete_execution: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            unscaled_quantity: true,
            service_totals: true,
            segment_valuation: true,
            missing_invoices: true,
            incomplete_execution: true,
        }
    }
}

fn enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnConfig {
    #[serde(default)]
    pub services: ServiceColumns,
    #[serde(default)]
    pub segments: SegmentColumns,
    #[serde(default)]
    pub invoices: InvoiceColumns,
}

/// Header names default to the `obras_servicos` table columns.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceColumns {
    pub id: String,
    pub site_id: String,
    pub description: String,
    pub unit: String,
    pub quantity: String,
    pub unit_price: String,
    pub total_value: String,
}

impl Default for ServiceColumns {
    fn default() -> Self {
        Self {
            id: "id".into(),
            site_id: "obra_id".into(),
            description: "servico_nome".into(),
            unit: "unidade".into(),
            quantity: "quantidade".into(),
            unit_price: "preco_unitario".into(),
            total_value: "valor_total".into(),
        }
    }
}

/// Header names default to the `obras_ruas` table columns.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentColumns {
    pub id: String,
    pub site_id: String,
    pub name: String,
    pub planned_area: String,
    pub executed_area: String,
    pub tonnage: String,
    pub status: String,
    pub price_per_area: String,
    pub total_value: String,
    pub thickness_cm: String,
    pub deleted_at: String,
    pub completed_at: String,
}

impl Default for SegmentColumns {
    fn default() -> Self {
        Self {
            id: "id".into(),
            site_id: "obra_id".into(),
            name: "name".into(),
            planned_area: "metragem_planejada".into(),
            executed_area: "metragem_executada".into(),
            tonnage: "toneladas_utilizadas".into(),
            status: "status".into(),
            price_per_area: "preco_por_m2".into(),
            total_value: "valor_total".into(),
            thickness_cm: "espessura_calculada".into(),
            deleted_at: "deleted_at".into(),
            completed_at: "data_finalizacao".into(),
        }
    }
}

/// Header names default to the `obras_financeiro_faturamentos` table columns.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InvoiceColumns {
    pub id: String,
    pub site_id: String,
    pub segment_id: String,
    pub executed_area: String,
    pub price_per_area: String,
    pub total_value: String,
    pub completed_at: String,
    pub deleted_at: String,
}

impl Default for InvoiceColumns {
    fn default() -> Self {
        Self {
            id: "id".into(),
            site_id: "obra_id".into(),
            segment_id: "rua_id".into(),
            executed_area: "metragem_executada".into(),
            price_per_area: "preco_por_m2".into(),
            total_value: "valor_total".into(),
            completed_at: "data_finalizacao".into(),
            deleted_at: "deleted_at".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ReconConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: ReconConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.name.trim().is_empty() {
            return Err(ReconError::ConfigValidation("name must not be empty".into()));
        }

        if self.inputs.services.trim().is_empty() || self.inputs.segments.trim().is_empty() {
            return Err(ReconError::ConfigValidation(
                "inputs.services and inputs.segments are required".into(),
            ));
        }

        self.pricing.validate()
    }
}

impl PricingConfig {
    pub fn validate(&self) -> Result<(), ReconError> {
        let density = self.density_t_per_m3;
        if !density.is_finite() || density <= 0.0 {
            return Err(ReconError::ConfigValidation(format!(
                "pricing.density_t_per_m3 must be positive, got {density}"
            )));
        }

        let tolerance = self.invoice_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ReconError::ConfigValidation(format!(
                "pricing.invoice_tolerance must be >= 0, got {tolerance}"
            )));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name = "Obra Centro"

[inputs]
services = "servicos.csv"
segments = "ruas.csv"
"#;

    #[test]
    fn parse_minimal_uses_defaults() {
        let config = ReconConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.name, "Obra Centro");
        assert_eq!(config.inputs.services, "servicos.csv");
        assert!(config.inputs.invoices.is_none());
        assert_eq!(config.pricing.density_t_per_m3, DEFAULT_ASPHALT_DENSITY);
        assert_eq!(config.pricing.invoice_tolerance, DEFAULT_INVOICE_TOLERANCE);
        assert_eq!(config.checks, CheckConfig::default());
        assert_eq!(config.columns.segments.planned_area, "metragem_planejada");
        assert_eq!(config.columns.invoices.segment_id, "rua_id");
    }

    #[test]
    fn parse_full() {
        let input = r#"
name = "Obra Norte"

[inputs]
services = "s.csv"
segments = "r.csv"
invoices = "f.csv"

[pricing]
density_t_per_m3 = 2.35
invoice_tolerance = 0.05

[checks]
unscaled_quantity = false
missing_invoices = false

[columns.segments]
planned_area = "planned_m2"
status = "state"
"#;
        let config = ReconConfig::from_toml(input).unwrap();
        assert_eq!(config.inputs.invoices.as_deref(), Some("f.csv"));
        assert_eq!(config.pricing.density_t_per_m3, 2.35);
        assert_eq!(config.pricing.invoice_tolerance, 0.05);
        assert!(!config.checks.unscaled_quantity);
        assert!(!config.checks.missing_invoices);
        assert!(config.checks.service_totals);
        assert_eq!(config.columns.segments.planned_area, "planned_m2");
        assert_eq!(config.columns.segments.status, "state");
        // Untouched columns keep their defaults
        assert_eq!(config.columns.segments.tonnage, "toneladas_utilizadas");
    }

    #[test]
    fn reject_zero_density() {
        let input = format!("{MINIMAL}\n[pricing]\ndensity_t_per_m3 = 0.0\n");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("density_t_per_m3"));
    }

    #[test]
    fn reject_negative_tolerance() {
        let input = format!("{MINIMAL}\n[pricing]\ninvoice_tolerance = -0.5\n");
        let err = ReconConfig::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("invoice_tolerance"));
    }

    #[test]
    fn reject_unknown_check() {
        let input = format!("{MINIMAL}\n[checks]\nunscaled_quantiy = true\n");
        assert!(matches!(
            ReconConfig::from_toml(&input),
            Err(ReconError::ConfigParse(_))
        ));
    }

    #[test]
    fn reject_missing_inputs() {
        let err = ReconConfig::from_toml("name = \"x\"\n").unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }
}
