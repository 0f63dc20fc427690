//! Undirected network topology and its generators.

use crate::config::NetworkConfig;
use anyhow::{Context, Result, bail};
use petgraph::{
    algo,
    graph::{NodeIndex, UnGraph},
    visit::{Bfs, EdgeRef},
};
use rand::prelude::*;
use rand_distr::Bernoulli;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::Path,
};

/// Simple undirected graph over the nodes `0..n_nodes`.
///
/// Self-loops and parallel edges are never stored. Nodes are never removed,
/// so node `i` is always `NodeIndex::new(i)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    graph: UnGraph<(), ()>,
}

/// Breadth-first visit of the nodes reachable from a source.
#[derive(Debug, Clone)]
pub struct BfsTree {
    /// Reachable nodes in visiting order, source first.
    pub order: Vec<usize>,
    pub parent: Vec<Option<usize>>,
    /// Hop distance from the source (`None` if unreachable).
    pub dist: Vec<Option<usize>>,
}

impl Topology {
    /// Create a topology with `n_nodes` isolated nodes.
    pub fn new(n_nodes: usize) -> Self {
        let mut graph = UnGraph::with_capacity(n_nodes, 0);
        for _ in 0..n_nodes {
            graph.add_node(());
        }
        Self { graph }
    }

    /// Create a topology from a list of edges.
    pub fn from_edges(n_nodes: usize, edges: &[(usize, usize)]) -> Self {
        let mut topology = Self::new(n_nodes);
        for &(u, v) in edges {
            topology.add_edge(u, v);
        }
        topology
    }

    pub fn graph(&self) -> &UnGraph<(), ()> {
        &self.graph
    }

    pub fn n_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn n_edges(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph.neighbors(NodeIndex::new(node)).map(|nbr| nbr.index())
    }

    pub fn degree(&self, node: usize) -> usize {
        self.graph.edges(NodeIndex::new(node)).count()
    }

    /// Every edge once, as `(u, v)` with `u < v`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.graph.edge_references().map(|edge| {
            let (u, v) = (edge.source().index(), edge.target().index());
            (u.min(v), u.max(v))
        })
    }

    pub fn has_edge(&self, u: usize, v: usize) -> bool {
        self.graph.contains_edge(NodeIndex::new(u), NodeIndex::new(v))
    }

    /// Add the edge `(u, v)`; returns `false` if it is a self-loop or already present.
    pub fn add_edge(&mut self, u: usize, v: usize) -> bool {
        if u == v || self.has_edge(u, v) {
            return false;
        }
        self.graph.add_edge(NodeIndex::new(u), NodeIndex::new(v), ());
        true
    }

    /// Remove the edge `(u, v)`; returns `false` if it was not present.
    pub fn remove_edge(&mut self, u: usize, v: usize) -> bool {
        match self.graph.find_edge(NodeIndex::new(u), NodeIndex::new(v)) {
            Some(edge) => self.graph.remove_edge(edge).is_some(),
            None => false,
        }
    }

    /// Check whether `dst` is reachable from `src`.
    pub fn has_path(&self, src: usize, dst: usize) -> bool {
        algo::has_path_connecting(&self.graph, NodeIndex::new(src), NodeIndex::new(dst), None)
    }

    pub fn is_connected(&self) -> bool {
        algo::connected_components(&self.graph) <= 1
    }

    /// Breadth-first tree rooted at `src`.
    pub fn bfs_tree(&self, src: usize) -> BfsTree {
        let n_nodes = self.n_nodes();
        let mut tree = BfsTree {
            order: Vec::with_capacity(n_nodes),
            parent: vec![None; n_nodes],
            dist: vec![None; n_nodes],
        };
        let mut rank = vec![usize::MAX; n_nodes];

        let mut bfs = Bfs::new(&self.graph, NodeIndex::new(src));
        while let Some(next) = bfs.next(&self.graph) {
            let node = next.index();
            // The node that discovered `node` is its earliest visited neighbour.
            let parent = self.neighbors(node).min_by_key(|&nbr| rank[nbr]);
            tree.dist[node] = match parent {
                Some(up) if node != src => {
                    tree.parent[node] = Some(up);
                    tree.dist[up].map(|d| d + 1)
                }
                _ => Some(0),
            };
            rank[node] = tree.order.len();
            tree.order.push(node);
        }
        tree
    }

    /// Save the topology to a MessagePack file.
    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize topology")?;
        Ok(())
    }

    /// Load a topology previously written by [`Topology::save`].
    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let topology = decode::from_read(&mut reader).context("failed to deserialize topology")?;
        Ok(topology)
    }
}

impl PartialEq for Topology {
    fn eq(&self, other: &Self) -> bool {
        let edge_set = |topology: &Topology| topology.edges().collect::<BTreeSet<_>>();
        self.n_nodes() == other.n_nodes() && edge_set(self) == edge_set(other)
    }
}

/// Produce a topology as described by the network configuration.
pub fn generate<R: Rng>(cfg: &NetworkConfig, rng: &mut R) -> Result<Topology> {
    let topology = match *cfg {
        NetworkConfig::Ring { n_nodes } => ring(n_nodes),
        NetworkConfig::ErdosRenyi { n_nodes, edge_prob } => erdos_renyi(n_nodes, edge_prob, rng)?,
        NetworkConfig::BarabasiAlbert { n_nodes, n_edges } => {
            barabasi_albert(n_nodes, n_edges, rng)?
        }
        NetworkConfig::WattsStrogatz {
            n_nodes,
            k_near,
            rewire_prob,
        } => newman_watts_strogatz(n_nodes, k_near, rewire_prob, rng)?,
        NetworkConfig::PowerlawCluster {
            n_nodes,
            n_edges,
            triangle_prob,
        } => powerlaw_cluster(n_nodes, n_edges, triangle_prob, rng)?,
        NetworkConfig::File { ref path } => {
            read_adjacency_list(path).with_context(|| format!("failed to read {path:?}"))?
        }
    };
    log::info!(
        "generated topology with {} nodes and {} edges",
        topology.n_nodes(),
        topology.n_edges()
    );
    if !topology.is_connected() {
        log::warn!("topology is disconnected, unreachable pairs are left out of distances");
    }
    Ok(topology)
}

pub fn ring(n_nodes: usize) -> Topology {
    let mut topology = Topology::new(n_nodes);
    for node in 0..n_nodes {
        topology.add_edge(node, (node + 1) % n_nodes);
    }
    topology
}

pub fn erdos_renyi<R: Rng>(n_nodes: usize, edge_prob: f64, rng: &mut R) -> Result<Topology> {
    let edge_dist = Bernoulli::new(edge_prob)?;
    let mut topology = Topology::new(n_nodes);
    for u in 0..n_nodes {
        for v in (u + 1)..n_nodes {
            if edge_dist.sample(rng) {
                topology.add_edge(u, v);
            }
        }
    }
    Ok(topology)
}

pub fn barabasi_albert<R: Rng>(n_nodes: usize, n_edges: usize, rng: &mut R) -> Result<Topology> {
    if n_edges < 1 || n_edges >= n_nodes {
        bail!("number of edges must be in the range 1..{n_nodes}, but is {n_edges}");
    }
    let mut topology = Topology::new(n_nodes);

    // Every node appears once per incident edge, so uniform picks are degree-proportional.
    let mut repeated = Vec::with_capacity(2 * n_nodes * n_edges);
    let mut targets: Vec<usize> = (0..n_edges).collect();
    for source in n_edges..n_nodes {
        for &target in &targets {
            topology.add_edge(source, target);
        }
        repeated.extend_from_slice(&targets);
        repeated.extend(std::iter::repeat_n(source, n_edges));
        targets = random_subset(&repeated, n_edges, rng)?;
    }
    Ok(topology)
}

pub fn newman_watts_strogatz<R: Rng>(
    n_nodes: usize,
    k_near: usize,
    rewire_prob: f64,
    rng: &mut R,
) -> Result<Topology> {
    let shortcut_dist = Bernoulli::new(rewire_prob)?;
    let mut topology = Topology::new(n_nodes);
    let mut lattice = Vec::with_capacity(n_nodes * k_near / 2);
    for offset in 1..=(k_near / 2) {
        for u in 0..n_nodes {
            let v = (u + offset) % n_nodes;
            if topology.add_edge(u, v) {
                lattice.push((u, v));
            }
        }
    }
    for (u, _) in lattice {
        if !shortcut_dist.sample(rng) || topology.degree(u) + 1 >= n_nodes {
            continue;
        }
        let mut w = rng.random_range(0..n_nodes);
        while w == u || topology.has_edge(u, w) {
            w = rng.random_range(0..n_nodes);
        }
        topology.add_edge(u, w);
    }
    Ok(topology)
}

/// Holme-Kim growth: preferential attachment plus triad formation.
pub fn powerlaw_cluster<R: Rng>(
    n_nodes: usize,
    n_edges: usize,
    triangle_prob: f64,
    rng: &mut R,
) -> Result<Topology> {
    if n_edges < 1 || n_edges >= n_nodes {
        bail!("number of edges must be in the range 1..{n_nodes}, but is {n_edges}");
    }
    let triad_dist = Bernoulli::new(triangle_prob)?;
    let mut topology = Topology::new(n_nodes);

    let mut repeated: Vec<usize> = (0..n_edges).collect();
    for source in n_edges..n_nodes {
        let mut targets = random_subset(&repeated, n_edges, rng)?;
        let mut target = targets.pop().context("failed to pick a target")?;
        topology.add_edge(source, target);
        repeated.push(target);

        let mut count = 1;
        while count < n_edges {
            if triad_dist.sample(rng) {
                let neighborhood: Vec<_> = topology
                    .neighbors(target)
                    .filter(|&nbr| nbr != source && !topology.has_edge(source, nbr))
                    .collect();
                if let Some(&nbr) = neighborhood.choose(rng) {
                    topology.add_edge(source, nbr);
                    repeated.push(nbr);
                    count += 1;
                    continue;
                }
            }
            target = targets.pop().context("failed to pick a target")?;
            topology.add_edge(source, target);
            repeated.push(target);
            count += 1;
        }
        repeated.extend(std::iter::repeat_n(source, n_edges));
    }
    Ok(topology)
}

/// Read a whitespace separated adjacency list.
///
/// Each line holds a node followed by its neighbours; `#` starts a comment.
/// Node labels are mapped to contiguous indices in increasing label order.
pub fn read_adjacency_list<P: AsRef<Path>>(file: P) -> Result<Topology> {
    let contents = fs::read_to_string(file.as_ref()).context("failed to read adjacency list")?;

    let mut lines = Vec::new();
    let mut labels = BTreeSet::new();
    for (i_line, line) in contents.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default();
        let tokens = line
            .split_whitespace()
            .map(str::parse::<i64>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid node label on line {}", i_line + 1))?;
        labels.extend(tokens.iter().copied());
        if !tokens.is_empty() {
            lines.push(tokens);
        }
    }

    let index: BTreeMap<i64, usize> = labels
        .into_iter()
        .enumerate()
        .map(|(idx, label)| (label, idx))
        .collect();
    let mut topology = Topology::new(index.len());
    for tokens in lines {
        let u = index[&tokens[0]];
        for label in &tokens[1..] {
            topology.add_edge(u, index[label]);
        }
    }
    Ok(topology)
}

fn random_subset<R: Rng>(seq: &[usize], size: usize, rng: &mut R) -> Result<Vec<usize>> {
    let distinct: HashSet<_> = seq.iter().collect();
    if distinct.len() < size {
        bail!("cannot draw {size} distinct nodes from {}", distinct.len());
    }
    let mut picked = Vec::with_capacity(size);
    while picked.len() < size {
        let &node = seq.choose(rng).context("failed to choose a node")?;
        if !picked.contains(&node) {
            picked.push(node);
        }
    }
    Ok(picked)
}
