//! Application entry point and dispatch.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info};

use mwtree_arena::{ChunkTable, NodeRecord, NodeRef, SerialIndex};
use mwtree_core::{
    parse_memory_limit, ArenaFootprint, BoundingBox, FunctionTree, ProcessContext, TreeError,
    TreeOptions,
};

use crate::config::AppConfig;
use crate::report::{render_text, write_to_file, RelocationReport, RunReport};

/// Run the application.
pub fn run(config: &AppConfig) -> Result<()> {
    // Handle shell completion
    if let Some(shell) = config.completion {
        let mut cmd = <AppConfig as clap::CommandFactory>::command();
        clap_complete::generate(shell, &mut cmd, "mwtree", &mut std::io::stdout());
        return Ok(());
    }

    let report = match config.dim {
        1 => run_dim::<1>(config)?,
        2 => run_dim::<2>(config)?,
        3 => run_dim::<3>(config)?,
        d => {
            return Err(TreeError::Config(format!("dimension must be 1, 2 or 3, got {d}")).into())
        }
    };
    present(config, &report)
}

fn present(config: &AppConfig, report: &RunReport) -> Result<()> {
    let rendered = if config.json {
        serde_json::to_string_pretty(report)?
    } else {
        render_text(report, config.verbose)
    };
    match &config.output {
        Some(path) => {
            write_to_file(path, &rendered).with_context(|| format!("writing report to {path}"))?;
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn run_dim<const D: usize>(config: &AppConfig) -> Result<RunReport> {
    let start = Instant::now();
    let bbox = BoundingBox::<D>::new(0, [0; D], [config.boxes; D])?;
    let roots = bbox.root_count();
    let options = tree_options::<D>(config, roots)?;
    check_budgets::<D>(config, &options, roots)?;
    let estimated_bytes = ArenaFootprint::estimate::<D>(&options, roots).total_bytes;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()?;

    let ctx = ProcessContext::global();
    let mut tree = FunctionTree::<D>::new(Arc::clone(&ctx), bbox, options.clone())?;
    refine_uniformly(&mut tree, config.depth)?;
    fill_end_nodes(&mut tree)?;
    info!(
        dimension = D,
        nodes = tree.node_count(),
        end_nodes = tree.end_node_table().len(),
        "Refined tree"
    );

    let peak_gen_nodes = generated_rounds(&tree, &pool, config.gen_rounds)?;

    let coarsened_groups = if config.coarsen {
        coarsen_finest(&mut tree)?
    } else {
        0
    };
    let square_norm = tree.calc_square_norm();

    let relocation = if config.relocate {
        Some(relocate(&tree, &ctx)?)
    } else {
        None
    };

    Ok(RunReport {
        dimension: D,
        order: options.order,
        roots,
        depth: tree.depth(),
        nodes: tree.node_count(),
        end_nodes: tree.end_node_table().len(),
        square_norm,
        gen_rounds: config.gen_rounds,
        peak_gen_nodes,
        coarsened_groups,
        estimated_bytes,
        elapsed: start.elapsed(),
        relocation,
        stats: tree.stats(),
    })
}

/// Options from the flags, with `max_nodes` derived from the memory limit
/// when only a limit is given.
fn tree_options<const D: usize>(config: &AppConfig, roots: usize) -> Result<TreeOptions, TreeError> {
    let limit = parse_memory_limit(&config.memory_limit).map_err(TreeError::Config)?;
    let mut options = TreeOptions {
        order: config.order,
        max_nodes: config.max_nodes,
        max_gen_nodes: config.max_gen_nodes,
        chunk_capacity: 0,
    };
    if limit > 0 && options.max_nodes == 0 {
        options.max_nodes = ArenaFootprint::max_nodes_for::<D>(limit, &options, roots);
        if options.max_nodes == 0 {
            return Err(TreeError::Config(format!(
                "memory limit ({} MB) cannot hold a single chunk",
                limit / (1024 * 1024)
            )));
        }
        debug!(limit, max_nodes = options.max_nodes, "Derived node budget");
    }
    let options = options.normalize();

    let footprint = ArenaFootprint::estimate::<D>(&options, roots);
    if !footprint.fits_in((limit > 0).then_some(limit)) {
        return Err(TreeError::Config(format!(
            "Estimated memory ({} MB) exceeds limit ({} MB)",
            footprint.total_bytes / (1024 * 1024),
            limit / (1024 * 1024)
        )));
    }
    Ok(options)
}

/// Refuse runs whose refinement would exhaust an arena.
fn check_budgets<const D: usize>(
    config: &AppConfig,
    options: &TreeOptions,
    roots: usize,
) -> Result<(), TreeError> {
    let branching = 1usize << D;
    let capacity = options.chunk_capacity_for(D, roots);
    let (nodes, end_nodes) = uniform_counts(branching, roots, config.depth).ok_or_else(|| {
        TreeError::Config(format!("depth {} overflows the node count", config.depth))
    })?;

    let needed = slots_needed(nodes, branching.max(roots), capacity);
    if needed > options.max_nodes {
        return Err(TreeError::Config(format!(
            "depth {} needs up to {needed} persistent slots, budget is {}",
            config.depth, options.max_nodes
        )));
    }
    if config.gen_rounds > 0 {
        // One generated group per end node, plus one nested group.
        let generated = end_nodes.saturating_add(1).saturating_mul(branching);
        let needed = slots_needed(generated, branching, capacity);
        if needed > options.max_gen_nodes {
            return Err(TreeError::Config(format!(
                "generated rounds need up to {needed} slots, budget is {}",
                options.max_gen_nodes
            )));
        }
    }
    Ok(())
}

/// Total and finest-level node counts of a uniform refinement.
fn uniform_counts(branching: usize, roots: usize, depth: usize) -> Option<(usize, usize)> {
    let mut level = roots;
    let mut total = roots;
    for _ in 0..depth {
        level = level.checked_mul(branching)?;
        total = total.checked_add(level)?;
    }
    Some((total, level))
}

/// Slots `nodes` can occupy when groups of `group` skip chunk tails.
fn slots_needed(nodes: usize, group: usize, capacity: usize) -> usize {
    nodes.saturating_add((nodes / capacity + 1).saturating_mul(group))
}

fn refine_uniformly<const D: usize>(tree: &mut FunctionTree<D>, depth: usize) -> Result<(), TreeError> {
    let mut level = tree.roots().to_vec();
    for _ in 0..depth {
        let mut next = Vec::with_capacity(level.len() << D);
        for parent in level {
            let first = tree.alloc_children(parent)?;
            next.extend((0..FunctionTree::<D>::BRANCHING).map(|i| first.add(i)));
        }
        level = next;
    }
    tree.reset_end_node_table();
    Ok(())
}

/// Give every end node a block of unit norm.
#[allow(clippy::cast_precision_loss)]
fn fill_end_nodes<const D: usize>(tree: &mut FunctionTree<D>) -> Result<(), TreeError> {
    let len = tree.persistent_arena().config().coefficients_per_node;
    let values = vec![(len as f64).sqrt().recip(); len];
    for serial in tree.end_node_table().to_vec() {
        tree.set_coefficients(NodeRef::persistent(serial), &values)?;
    }
    Ok(())
}

/// Materialize generated children under every end node, then drop them.
///
/// Returns the most generated nodes live at once.
fn generated_rounds<const D: usize>(
    tree: &FunctionTree<D>,
    pool: &ThreadPool,
    rounds: usize,
) -> Result<usize, TreeError> {
    let parents = tree.end_node_table();
    let block = vec![1.0; tree.generated_arena().lock().config().coefficients_per_node];
    let mut peak = 0;
    for round in 0..rounds {
        let bases = pool.install(|| {
            parents
                .par_iter()
                .map(|&p| tree.alloc_gen_children(NodeRef::persistent(p)))
                .collect::<Result<Vec<SerialIndex>, TreeError>>()
        })?;

        // One level deeper below the first generated child.
        if let Some(&base) = bases.first() {
            let nested = tree.alloc_gen_children(NodeRef::generated(base))?;
            for i in 0..FunctionTree::<D>::BRANCHING {
                tree.set_gen_coefficients(nested.add(i), &block)?;
            }
            peak = peak.max(tree.gen_node_count());
            tree.delete_gen_children(nested)?;
        }
        peak = peak.max(tree.gen_node_count());
        let dropped = tree.delete_generated();
        debug!(round, dropped, "Generated round finished");
    }
    Ok(peak)
}

/// Release the finest refinement level; returns the groups released.
fn coarsen_finest<const D: usize>(tree: &mut FunctionTree<D>) -> Result<usize, TreeError> {
    let depth = tree.depth();
    if depth == 0 {
        return Ok(0);
    }
    let parents: Vec<SerialIndex> = tree
        .persistent_arena()
        .iter()
        .filter(|n| n.path().depth() as usize == depth - 1 && n.first_child().is_some())
        .filter_map(NodeRecord::serial)
        .collect();
    // Latest groups first keeps the release near the top of the stack.
    for &parent in parents.iter().rev() {
        tree.delete_children(parent)?;
    }
    tree.reset_end_node_table();
    Ok(parents.len())
}

/// Ship the persistent chunks through JSON into a fresh tree.
fn relocate<const D: usize>(
    tree: &FunctionTree<D>,
    ctx: &Arc<ProcessContext>,
) -> Result<RelocationReport> {
    let encoded = serde_json::to_vec(&tree.export_chunks())?;
    let chunks: ChunkTable<D> = serde_json::from_slice(&encoded)?;
    let mut receiver =
        FunctionTree::<D>::new(Arc::clone(ctx), *tree.bounding_box(), tree.options().clone())?;
    let rebuild = receiver.rebuild(chunks)?;
    let matches = receiver.node_count() == tree.node_count()
        && receiver.depth_histogram() == tree.depth_histogram()
        && receiver.end_node_table() == tree.end_node_table();
    info!(bytes = encoded.len(), nodes = rebuild.nodes, matches, "Relocated tree");
    Ok(RelocationReport {
        bytes: encoded.len(),
        rebuild,
        matches,
    })
}
