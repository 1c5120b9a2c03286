//! Application configuration from CLI flags and environment.

use clap::Parser;

/// mwtree: drive the node arenas of an adaptive multiwavelet tree.
#[derive(Parser, Debug)]
#[command(name = "mwtree", version, about)]
#[allow(clippy::struct_excessive_bools)]
pub struct AppConfig {
    /// Spatial dimension: 1, 2 or 3.
    #[arg(long, default_value = "3", env = "MWTREE_DIM")]
    pub dim: usize,

    /// Polynomial order k; blocks hold (k+1)^dim values.
    #[arg(short = 'k', long, default_value = "5", env = "MWTREE_ORDER")]
    pub order: usize,

    /// Uniform refinement depth below the roots.
    #[arg(short, long, default_value = "2")]
    pub depth: usize,

    /// Root boxes per axis.
    #[arg(long, default_value = "1")]
    pub boxes: usize,

    /// Persistent node budget (0 = derived from --memory-limit or default).
    #[arg(long, default_value = "0", env = "MWTREE_MAX_NODES")]
    pub max_nodes: usize,

    /// Generated node budget (0 = same as the persistent budget).
    #[arg(long, default_value = "0", env = "MWTREE_MAX_GEN_NODES")]
    pub max_gen_nodes: usize,

    /// Memory limit (e.g., "8G", "512M").
    #[arg(long, default_value = "", env = "MWTREE_MEMORY_LIMIT")]
    pub memory_limit: String,

    /// Worker threads for generated rounds (0 = all cores).
    #[arg(short, long, default_value = "0")]
    pub threads: usize,

    /// Rounds of generated-node allocation under every end node.
    #[arg(long, default_value = "1")]
    pub gen_rounds: usize,

    /// Remove the finest refinement level before reporting.
    #[arg(long)]
    pub coarsen: bool,

    /// Serialize the persistent chunks and rebuild them in a fresh tree.
    #[arg(long)]
    pub relocate: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Output file path.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Generate shell completion.
    #[arg(long, value_enum)]
    pub completion: Option<clap_complete::Shell>,
}

impl AppConfig {
    /// Parse CLI arguments.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
