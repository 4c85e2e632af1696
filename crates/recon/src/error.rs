use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad density, missing input file, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A record failed a range check (negative area, negative tonnage, ...).
    #[error("{entity} '{record_id}': invalid {field} {value}")]
    Validation {
        entity: &'static str,
        record_id: String,
        field: &'static str,
        value: f64,
    },
    /// Missing required column in input data.
    #[error("{entity}: missing column '{column}'")]
    MissingColumn { entity: &'static str, column: String },
    /// Numeric cell could not be parsed.
    #[error("{entity} '{record_id}': cannot parse {field} '{value}'")]
    NumberParse {
        entity: &'static str,
        record_id: String,
        field: &'static str,
        value: String,
    },
    /// Date cell could not be parsed.
    #[error("{entity} '{record_id}': cannot parse date '{value}'")]
    DateParse {
        entity: &'static str,
        record_id: String,
        value: String,
    },
    /// Segment status not in the known lifecycle.
    #[error("segment '{record_id}': unknown status '{value}'")]
    UnknownStatus { record_id: String, value: String },
    /// IO / CSV reader error.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<csv::Error> for ReconError {
    fn from(err: csv::Error) -> Self {
        Self::Io(err.to_string())
    }
}
