//! Tree defaults and process exit codes.

/// Default polynomial order of the multiwavelet basis.
pub const DEFAULT_ORDER: usize = 5;

/// Default persistent node budget per tree.
pub const DEFAULT_MAX_NODES: usize = 1 << 17;

/// Coefficient values per generated-node chunk (8 MiB of `f64`).
pub const DEFAULT_CHUNK_VALUES: usize = 1 << 20;

/// Nodes per chunk for one- and two-dimensional trees.
pub const SMALL_DIMENSION_CHUNK: usize = 64;

/// Trees created between registration messages on rank 0.
pub const TREE_REPORT_INTERVAL: u64 = 10;

/// Process exit codes.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// Generic error.
    pub const ERROR_GENERIC: i32 = 1;
    /// Invalid configuration.
    pub const ERROR_CONFIG: i32 = 4;
}
