//! Typed errors which callers need to tell apart.
//!
//! Everything else is reported through [`anyhow::Error`] with context attached.
use thiserror::Error;

/// An embedded linear program could not be solved to optimality.
///
/// The simulator treats this as recoverable: the tuple or scenario being evaluated is skipped.
#[derive(Debug, Error)]
#[error("{problem} problem could not be solved: {status}")]
pub struct InfeasibleError {
    /// Which linear program failed
    pub problem: &'static str,
    /// The solver's model status
    pub status: String,
}

/// Input data breaks the contract expected by the engine. Always fatal.
#[derive(Debug, Error, PartialEq)]
pub enum DataContractError {
    /// The unit conversion matrix has no `unit` column
    #[error("Unit column is missing in conversion matrix: {0}")]
    MissingConversionUnitColumn(String),
    /// A table which must carry units has no `unit` column
    #[error("Unit column is missing in table: {0}")]
    MissingUnitColumn(String),
    /// A value is expressed in a unit the conversion matrix does not know
    #[error("This unit is not handled by the conversion matrix: {0}")]
    UnknownUnit(String),
    /// A moniker does not refer to any known entity
    #[error("Unknown moniker: {0}")]
    UnknownMoniker(String),
}
