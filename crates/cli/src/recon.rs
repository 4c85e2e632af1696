//! `wpav recon`: config-driven price and billing reconciliation.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use tracing::debug;
use worldpav_recon::engine::{load_invoices, load_segments, load_services};
use worldpav_recon::model::{ReconInput, ReconResult, Severity};
use worldpav_recon::ReconConfig;

use crate::exit_codes::{recon_exit_code, EXIT_ERROR, EXIT_RECON_RUNTIME, EXIT_RECON_WARNINGS};
use crate::CliError;

#[derive(Subcommand)]
pub enum ReconCommands {
    /// Run reconciliation from a TOML config file
    #[command(after_help = "\
Examples:
  wpav recon run fevereiro.recon.toml
  wpav recon run fevereiro.recon.toml --json
  wpav recon run fevereiro.recon.toml --output result.json")]
    Run {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Validate a recon config without running
    #[command(after_help = "\
Examples:
  wpav recon validate fevereiro.recon.toml")]
    Validate {
        /// Path to the .recon.toml config file
        config: PathBuf,
    },
}

pub fn cmd_recon(cmd: ReconCommands) -> Result<(), CliError> {
    match cmd {
        ReconCommands::Run { config, json, output } => cmd_recon_run(config, json, output),
        ReconCommands::Validate { config } => cmd_recon_validate(config),
    }
}

fn recon_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn engine_err(err: worldpav_recon::ReconError) -> CliError {
    recon_err(recon_exit_code(&err), err.to_string())
}

fn read_config(config_path: &Path) -> Result<ReconConfig, CliError> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("cannot read config: {e}")))?;
    ReconConfig::from_toml(&config_str).map_err(|e| {
        engine_err(e).with_hint("config needs `name` and an [inputs] table with services and segments")
    })
}

fn read_input(base_dir: &Path, file: &str) -> Result<String, CliError> {
    let path = base_dir.join(file);
    debug!(path = %path.display(), "reading input");
    std::fs::read_to_string(&path)
        .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("cannot read {}: {e}", path.display())))
}

/// Load every CSV the config names, resolved relative to the config file.
fn load_input(config_path: &Path, config: &ReconConfig) -> Result<ReconInput, CliError> {
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let cols = &config.columns;

    let services = load_services(&read_input(base_dir, &config.inputs.services)?, &cols.services)
        .map_err(engine_err)?;
    let segments = load_segments(&read_input(base_dir, &config.inputs.segments)?, &cols.segments)
        .map_err(engine_err)?;
    let invoices = match config.inputs.invoices {
        Some(ref file) => {
            load_invoices(&read_input(base_dir, file)?, &cols.invoices).map_err(engine_err)?
        }
        None => Vec::new(),
    };

    Ok(ReconInput { services, segments, invoices })
}

fn cmd_recon_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = read_config(&config_path)?;
    let input = load_input(&config_path, &config)?;

    let result = worldpav_recon::run(&config, &input).map_err(engine_err)?;

    let json_str = serde_json::to_string_pretty(&result)
        .map_err(|e| recon_err(EXIT_ERROR, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| recon_err(EXIT_RECON_RUNTIME, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    } else {
        print_site_lines(&result);
    }

    // Human summary to stderr
    let s = &result.summary;
    eprintln!(
        "{} site(s): {} segments valued, {} invoices consistent, {} drifted, {} warnings, {} info",
        s.sites, s.segments_valued, s.invoices_consistent, s.invoices_drifted, s.warnings, s.infos,
    );

    if s.warnings > 0 {
        return Err(recon_err(EXIT_RECON_WARNINGS, "anomalies found"));
    }

    Ok(())
}

/// One line per site, then one per anomaly, to stderr.
fn print_site_lines(result: &ReconResult) {
    for site in &result.sites {
        eprintln!(
            "{}: {:.2}/m² ({:.2} over {:.2} m²), billable {:.2}, invoiced {:.2}",
            site.site_id,
            site.basis.price_per_area,
            site.basis.total_service_value,
            site.basis.total_planned_area,
            site.totals.billable_value,
            site.totals.invoiced_value,
        );
        for a in &site.anomalies {
            let level = match a.severity {
                Severity::Warning => "warn",
                Severity::Info => "info",
            };
            eprintln!("  {level} {} {}: {}", a.kind, a.entity_id, a.detail);
        }
    }
}

fn cmd_recon_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = read_config(&config_path)?;

    eprintln!(
        "valid: \"{}\" (density {} t/m³, tolerance {})",
        config.name, config.pricing.density_t_per_m3, config.pricing.invoice_tolerance,
    );

    Ok(())
}
