//! mwtree library: application logic for the tree driver.

pub mod app;
pub mod config;
pub mod errors;
pub mod report;
