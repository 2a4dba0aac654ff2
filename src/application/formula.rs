// Formula contract used to derive synthetic series
use crate::domain::datapoint::Datapoint;
use crate::domain::series::Series;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,
    #[error("unexpected {found} at position {position}")]
    Unexpected { found: String, position: usize },
    #[error("unknown series [{0}]")]
    UnknownSeries(String),
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("unknown period {0}")]
    UnknownPeriod(String),
    #[error("wrong arguments to {0}")]
    Arity(String),
    #[error("formula evaluates to a constant, not a series")]
    ConstantResult,
}

/// Parses and evaluates synthetic series formulas.
pub trait FormulaEngine: Send + Sync {
    /// Names of the series a formula reads, in order of first appearance
    fn dependency_names(&self, formula: &str) -> Vec<String>;

    /// Evaluate `formula` over the current datapoints of its dependencies
    fn apply(&self, formula: &str, dependents: &[&Series]) -> Result<Vec<Datapoint>, FormulaError>;
}
