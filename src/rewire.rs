//! Connectivity-preserving topology rewiring between steps.

use crate::config::DynamicsConfig;
use crate::network::Topology;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Bernoulli;
use serde::{Deserialize, Serialize};

/// What one rewiring step did to the topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewireReport {
    pub added: usize,
    pub removed: usize,
    /// Removals undone because they separated the endpoints.
    pub reverted: usize,
    /// Additions that fell back to a uniformly random node.
    pub fallbacks: usize,
    /// Fallbacks that hit a self-loop or an existing edge and added nothing.
    pub degenerate: usize,
}

/// Per-node edge addition and removal with Bernoulli selection.
#[derive(Debug, Clone)]
pub struct Rewirer {
    add_dist: Bernoulli,
    remove_dist: Bernoulli,
}

impl Rewirer {
    pub fn new(add_prob: f64, remove_prob: f64) -> Result<Self> {
        Ok(Self {
            add_dist: Bernoulli::new(add_prob).context("invalid edge addition probability")?,
            remove_dist: Bernoulli::new(remove_prob).context("invalid edge removal probability")?,
        })
    }

    pub fn from_config(cfg: &DynamicsConfig) -> Result<Self> {
        Self::new(cfg.add_prob, cfg.remove_prob)
    }

    /// Select the nodes to gain and to lose an edge, then apply removals before additions.
    ///
    /// Node count never changes and no removal leaves its endpoints disconnected.
    pub fn rewire(&self, topology: &mut Topology, rng: &mut dyn RngCore) -> RewireReport {
        let n_nodes = topology.n_nodes();
        let mut gain = Vec::new();
        let mut lose = Vec::new();
        for node in 0..n_nodes {
            if self.add_dist.sample(rng) {
                gain.push(node);
            }
            if self.remove_dist.sample(rng) {
                lose.push(node);
            }
        }

        let mut report = RewireReport::default();
        for node in lose {
            remove_edge(topology, node, rng, &mut report);
        }
        for node in gain {
            add_edge(topology, node, rng, &mut report);
        }
        if report.degenerate > 0 {
            log::warn!(
                "{} fallback edge additions were self-loops or duplicates",
                report.degenerate
            );
        }
        log::debug!("{report:?}");
        report
    }
}

fn remove_edge(
    topology: &mut Topology,
    node: usize,
    rng: &mut dyn RngCore,
    report: &mut RewireReport,
) {
    let nbrs: Vec<usize> = topology.neighbors(node).collect();
    let Some(&nbr) = nbrs.choose(rng) else {
        return;
    };
    topology.remove_edge(node, nbr);
    if topology.has_path(node, nbr) {
        report.removed += 1;
    } else {
        topology.add_edge(node, nbr);
        report.reverted += 1;
    }
}

fn add_edge(topology: &mut Topology, node: usize, rng: &mut dyn RngCore, report: &mut RewireReport) {
    let mut nbrs: Vec<usize> = topology.neighbors(node).collect();
    nbrs.shuffle(rng);
    for nbr in nbrs {
        let second: Vec<usize> = topology
            .neighbors(nbr)
            .filter(|&other| other != node && !topology.has_edge(node, other))
            .collect();
        if let Some(&other) = second.choose(rng) {
            topology.add_edge(node, other);
            report.added += 1;
            return;
        }
    }

    report.fallbacks += 1;
    let other = rng.random_range(0..topology.n_nodes());
    if topology.add_edge(node, other) {
        report.added += 1;
    } else {
        report.degenerate += 1;
    }
}
