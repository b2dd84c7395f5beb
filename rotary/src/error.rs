//! rotary error types

use tensor::DataType;

/// rotary result type
pub type Result<T> = std::result::Result<T, Error>;

/// rotary errors
///
/// Every variant is a configuration error: the engine is pure arithmetic,
/// so nothing here is transient and nothing is worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `dim` does not split evenly across the heads
    #[error("dim {dim} is not divisible by n_heads {n_heads}")]
    IndivisibleHeads {
        /// Model dimension
        dim: usize,
        /// Number of heads
        n_heads: usize,
    },

    /// Rotation works on value pairs, so the head dimension must be even
    #[error("head_dim must be a positive even number, got {head_dim}")]
    OddHeadDim {
        /// Offending head dimension
        head_dim: usize,
    },

    /// The base angular rate is unusable
    #[error("theta must be finite and greater than one, got {theta}")]
    InvalidTheta {
        /// Offending theta
        theta: f32,
    },

    /// Scaling parameters that cannot produce finite frequencies
    #[error("invalid scaling parameters: {reason}")]
    InvalidScaling {
        /// Description of what went wrong
        reason: String,
    },

    /// `2 * max_seq_len` positions do not fit a table axis
    #[error("max_seq_len {max_seq_len} is too large for the frequency table")]
    TableTooLarge {
        /// Offending maximum sequence length
        max_seq_len: usize,
    },

    /// A strategy that cannot run without parameters got none
    #[error("{strategy} scaling requires scaling params")]
    MissingScalingParams {
        /// Name of the strategy
        strategy: &'static str,
    },

    /// The requested position window leaves the cached table
    #[error("positions [{start}, {start} + {len}) exceed the {rows} cached rows")]
    OutOfRange {
        /// First requested position
        start: u64,
        /// Number of requested positions
        len: u64,
        /// Rows in the table
        rows: u64,
    },

    /// Activation shape does not fit the engine
    #[error("shape mismatch: {reason}")]
    ShapeMismatch {
        /// Description of what went wrong
        reason: String,
    },

    /// Activation data type that cannot be rotated
    #[error("unsupported data type {0}")]
    UnsupportedDataType(DataType),
}
