use thiserror::Error;

/// Errors surfaced by the box engine.
///
/// Every operation in this crate is pure and deterministic, so none of these
/// are retryable: a failure reproduces identically on the same input. Errors
/// propagate to the caller; this crate never logs or swallows them.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading an anchor file failed.
    #[error("anchor i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A box with non-positive width or height reached geometry or matching.
    /// Indicates corrupt annotation data or a malformed anchor record.
    #[error("invalid box: width={width}, height={height} (both must be > 0)")]
    InvalidBox { width: f32, height: f32 },

    /// Decoder input tensors disagree with each other or with the anchor
    /// count. Indicates a model / anchor-set version mismatch.
    #[error("shape mismatch: {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// A threshold or limit parameter is outside its valid range. Caller
    /// configuration bug.
    #[error("invalid parameter {name}: {value} (valid range: {valid})")]
    InvalidParameter {
        name: &'static str,
        value: f32,
        valid: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
