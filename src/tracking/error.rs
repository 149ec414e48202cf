use super::mask::Label;

#[derive(thiserror::Error, Debug)]
pub enum TrackingError {
    #[error("invalid region: {0}")]
    InvalidRegion(String),
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("mask and graph disagree on the labels present in frame {frame} (e.g. label {label})")]
    LabelMismatch { frame: usize, label: Label },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("inconsistent graph state: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, TrackingError>;
