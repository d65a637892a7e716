//! Error taxonomy for the analysis engine

use thiserror::Error;

use crate::types::PriceColumn;

/// Errors raised by indicator computation, session assembly and analysis requests.
///
/// Degraded-mode conditions (synthetic fallbacks, skipped optional indicators)
/// are not errors; they are collected as [`crate::types::DegradedWarning`].
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// An indicator's required input column is absent from the price data.
    /// Fatal to that indicator only.
    #[error("indicator '{indicator}' requires column '{column}' which is missing from the price data")]
    MissingColumn {
        indicator: String,
        column: PriceColumn,
    },

    /// Bad caller parameters. Fatal to the request.
    #[error("validation error: {0}")]
    Validation(String),

    /// No equity series for the run. Fatal to the session.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("unknown indicator type '{kind}' in category '{category}'")]
    UnknownIndicator { category: String, kind: String },

    /// A live data source could not deliver a series
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Store(#[from] persistence::DbError),
}

impl AnalysisError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AnalysisError::Validation(msg.into())
    }

    pub fn missing_column(indicator: impl Into<String>, column: PriceColumn) -> Self {
        AnalysisError::MissingColumn {
            indicator: indicator.into(),
            column,
        }
    }

    /// True for errors that abort the whole analysis session
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            AnalysisError::DataUnavailable(_) | AnalysisError::Store(_)
        )
    }
}

pub type EngineResult<T> = Result<T, AnalysisError>;
