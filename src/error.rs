//! Error types shared by the network and metric modules.

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("ignore_index must be non-negative, but given {0}")]
    NegativeIgnoreIndex(i64),

    #[error(
        "ignore index must be lower than the number of classes in confusion matrix ({num_classes}), but {ignore_index} was given"
    )]
    IgnoreIndexOutOfRange {
        ignore_index: usize,
        num_classes: usize,
    },

    #[error(
        "weights vector must be the same length as the number of classes ({num_classes}), but a size of {got} was given"
    )]
    WeightsSizeMismatch { got: usize, num_classes: usize },

    #[error("class weights must be supplied with every update")]
    MissingWeights,

    #[error("class index {value} is out of range for {num_classes} classes")]
    ClassOutOfRange { value: usize, num_classes: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("unknown {kind} layer: {name}")]
    UnknownLayer { kind: &'static str, name: String },

    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error("metric must have at least one example before it can be computed")]
    NotComputable,
}

impl Error {
    pub(crate) fn shape(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// True for errors raised by argument validation before any computation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::NegativeIgnoreIndex(_)
                | Error::IgnoreIndexOutOfRange { .. }
                | Error::WeightsSizeMismatch { .. }
                | Error::MissingWeights
                | Error::ClassOutOfRange { .. }
                | Error::InvalidConfig(_)
        )
    }
}
