//! Workspace-level integration tests for mwtree live under `tests/`.
