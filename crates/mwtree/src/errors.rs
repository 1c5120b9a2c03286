//! Error handling and exit codes.

use mwtree_arena::ArenaError;
use mwtree_core::{exit_codes, TreeError};

/// Exit code for a tree error.
pub fn handle_error(err: &TreeError) -> i32 {
    match err {
        TreeError::Config(_) | TreeError::Arena(ArenaError::InvalidConfig(_)) => {
            exit_codes::ERROR_CONFIG
        }
        TreeError::Arena(_)
        | TreeError::UnknownNode(_)
        | TreeError::AlreadyRefined(_)
        | TreeError::CoefficientLength { .. }
        | TreeError::Relocation(_) => exit_codes::ERROR_GENERIC,
    }
}

/// Exit code for any error reaching `main`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<TreeError>()
        .map_or(exit_codes::ERROR_GENERIC, handle_error)
}
