use crate::schema::ProjectionMethod;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Duplicate line item '{name}' in {statement}")]
    DuplicateLineItem { statement: String, name: String },

    #[error("Invalid assumption {name} = {value}: {details}")]
    InvalidAssumption {
        name: String,
        value: f64,
        details: String,
    },

    #[error("Invalid engine setting {name} = {value}: {details}")]
    InvalidSetting {
        name: String,
        value: f64,
        details: String,
    },

    #[error("Invalid sensitivity range (min {min}, max {max}, step {step}): {details}")]
    InvalidSensitivityRange {
        min: f64,
        max: f64,
        step: f64,
        details: String,
    },

    #[error("Unknown line item: {0}")]
    UnknownLineItem(String),

    #[error("Period index {index} is outside the forecast horizon of {horizon} periods")]
    PeriodOutOfRange { index: usize, horizon: usize },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;

/// Recoverable conditions raised while a run proceeds. These never abort a run:
/// they are attached to the affected line item or period and logged.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    #[error("{item}: driver '{driver}' not found in the income statement forecast, projected as 0")]
    MissingDriver { item: String, driver: String },

    #[error("{item}: no classification, projected with the fallback growth rate")]
    Unclassified { item: String },

    #[error("{item}: classified with method {declared:?}, projected with its category's {applied:?}")]
    MethodMismatch {
        item: String,
        declared: ProjectionMethod,
        applied: ProjectionMethod,
    },

    #[error("{total}: no detectable children, structure is best-effort")]
    UnresolvedTotal { total: String },

    #[error("{key} could not be found by name, balancing skipped for this period")]
    MissingKeyTotal { key: String },

    #[error("No line item is classified as cash, balancing skipped for this period")]
    MissingPlug,

    #[error("{item}: computed value {raw_value:.2} floored at 0")]
    NegativeValueFloored { item: String, raw_value: f64 },

    #[error("Cash solution {unclamped:.2} floored at 0, balance sheet out by {imbalance:.2}")]
    NegativeCashClamped { unclamped: f64, imbalance: f64 },

    #[error("Balance sheet out of balance: assets {assets:.2} vs liabilities + equity {liabilities_and_equity:.2} (difference {difference:.2})")]
    OutOfBalance {
        assets: f64,
        liabilities_and_equity: f64,
        difference: f64,
    },

    #[error("Cash flow does not reconcile: calculated ending cash {calculated_ending_cash:.2} vs balance sheet cash {balance_sheet_cash:.2} (difference {difference:.2})")]
    NonReconciliation {
        calculated_ending_cash: f64,
        balance_sheet_cash: f64,
        difference: f64,
    },
}
