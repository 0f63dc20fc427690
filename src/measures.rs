//! Static graph measures computed once per topology.

use crate::network::Topology;
use petgraph::{
    algo,
    graph::{DiGraph, EdgeReference, NodeIndex},
    visit::{Bfs, EdgeFiltered, EdgeRef},
};
use std::collections::BTreeMap;

const PAGE_RANK_DAMPING: f64 = 0.85;
const PAGE_RANK_ITER: usize = 100;

/// Read-only lookup tables over a single topology.
#[derive(Debug, Clone)]
pub struct StaticMeasures {
    pub degree: Vec<usize>,
    pub avg_neighbor_degree: Vec<f64>,
    pub node_avg_distance: Vec<f64>,
    pub traveler: Vec<bool>,
    pub vertex_cover: Vec<bool>,
    pub shortest_path_count: Vec<usize>,
    pub page_rank: Vec<f64>,
    pub clustering: Vec<f64>,
    pub avg_degree: f64,
    pub avg_distance: f64,
}

impl StaticMeasures {
    pub fn compute(topology: &Topology) -> Self {
        let n_nodes = topology.n_nodes();
        let degree: Vec<_> = (0..n_nodes).map(|node| topology.degree(node)).collect();

        let avg_neighbor_degree = (0..n_nodes)
            .map(|node| {
                let (sum, n) = topology
                    .neighbors(node)
                    .fold((0, 0), |(sum, n), nbr| (sum + degree[nbr], n + 1));
                if n == 0 { 0.0 } else { sum as f64 / n as f64 }
            })
            .collect();

        let distances: Vec<_> = (0..n_nodes)
            .map(|node| topology.bfs_tree(node).dist)
            .collect();

        let node_avg_distance = distances
            .iter()
            .enumerate()
            .map(|(src, row)| {
                let (sum, n) = reachable_sum(row.iter().enumerate().filter(|&(dst, _)| dst != src));
                if n == 0 { 0.0 } else { sum as f64 / n as f64 }
            })
            .collect();

        let (pair_sum, n_pairs) = reachable_sum(
            distances
                .iter()
                .enumerate()
                .flat_map(|(src, row)| row.iter().enumerate().skip(src + 1)),
        );
        let avg_distance = if n_pairs == 0 {
            0.0
        } else {
            pair_sum as f64 / n_pairs as f64
        };

        let avg_degree = if n_nodes == 0 {
            0.0
        } else {
            degree.iter().sum::<usize>() as f64 / n_nodes as f64
        };

        Self {
            avg_neighbor_degree,
            node_avg_distance,
            traveler: travelers(topology),
            vertex_cover: vertex_cover(topology),
            shortest_path_count: shortest_path_count(topology),
            page_rank: page_rank(topology),
            clustering: clustering(topology),
            degree,
            avg_degree,
            avg_distance,
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.degree.len()
    }
}

fn reachable_sum<'a, I>(row: I) -> (usize, usize)
where
    I: Iterator<Item = (usize, &'a Option<usize>)>,
{
    row.filter_map(|(_, dist)| *dist)
        .fold((0, 0), |(sum, n), dist| (sum + dist, n + 1))
}

/// Endpoints of minimum edge cuts between representatives of every pair of communities.
pub fn travelers(topology: &Topology) -> Vec<bool> {
    let mut traveler = vec![false; topology.n_nodes()];
    let reps: Vec<usize> = greedy_modularity_communities(topology)
        .iter()
        .filter_map(|community| community.first().copied())
        .collect();
    for (i, &src) in reps.iter().enumerate() {
        for &dst in &reps[(i + 1)..] {
            for (u, v) in minimum_edge_cut(topology, src, dst) {
                traveler[u] = true;
                traveler[v] = true;
            }
        }
    }
    traveler
}

/// Clauset-Newman-Moore agglomerative modularity maximisation.
///
/// Communities are returned largest first, each sorted by node index.
pub fn greedy_modularity_communities(topology: &Topology) -> Vec<Vec<usize>> {
    let n_nodes = topology.n_nodes();
    let n_edges = topology.n_edges();
    let mut members: Vec<Vec<usize>> = (0..n_nodes).map(|node| vec![node]).collect();
    if n_edges == 0 {
        return members;
    }

    let two_m = 2.0 * n_edges as f64;
    let mut a: Vec<f64> = (0..n_nodes)
        .map(|node| topology.degree(node) as f64 / two_m)
        .collect();
    let mut e: Vec<BTreeMap<usize, f64>> = (0..n_nodes)
        .map(|node| topology.neighbors(node).map(|nbr| (nbr, 1.0 / two_m)).collect())
        .collect();

    loop {
        let mut best: Option<(f64, usize, usize)> = None;
        for (i, row) in e.iter().enumerate() {
            for (&j, &e_ij) in row.range((i + 1)..) {
                let gain = 2.0 * (e_ij - a[i] * a[j]);
                if best.is_none_or(|(best_gain, _, _)| gain > best_gain) {
                    best = Some((gain, i, j));
                }
            }
        }
        let Some((gain, i, j)) = best else { break };
        if gain <= 0.0 {
            break;
        }

        // Merge community j into community i.
        let row_j = std::mem::take(&mut e[j]);
        for (k, e_jk) in row_j {
            e[k].remove(&j);
            if k == i {
                continue;
            }
            *e[i].entry(k).or_insert(0.0) += e_jk;
            *e[k].entry(i).or_insert(0.0) += e_jk;
        }
        a[i] += a[j];
        a[j] = 0.0;
        let moved = std::mem::take(&mut members[j]);
        members[i].extend(moved);
    }

    let mut communities: Vec<_> = members.into_iter().filter(|c| !c.is_empty()).collect();
    for community in &mut communities {
        community.sort_unstable();
    }
    communities.sort_by(|x, y| y.len().cmp(&x.len()).then(x[0].cmp(&y[0])));
    communities
}

/// Minimum set of edges whose removal separates `src` from `dst`.
///
/// Unit-capacity max flow over both orientations of every edge; the cut is
/// read from the nodes still reachable in the residual network.
pub fn minimum_edge_cut(topology: &Topology, src: usize, dst: usize) -> Vec<(usize, usize)> {
    if src == dst {
        return Vec::new();
    }

    // Arc 2k runs u -> v and arc 2k + 1 runs v -> u for the k-th edge (u, v).
    let edges: Vec<(usize, usize)> = topology.edges().collect();
    let mut network = DiGraph::<(), u32>::with_capacity(topology.n_nodes(), 2 * edges.len());
    for _ in 0..topology.n_nodes() {
        network.add_node(());
    }
    for &(u, v) in &edges {
        let (u, v) = (NodeIndex::new(u), NodeIndex::new(v));
        network.add_edge(u, v, 1);
        network.add_edge(v, u, 1);
    }

    let (_, flow) = algo::ford_fulkerson(&network, NodeIndex::new(src), NodeIndex::new(dst));
    let residual = EdgeFiltered::from_fn(&network, |arc: EdgeReference<'_, u32>| {
        let i_arc = arc.id().index();
        flow[i_arc] < *arc.weight() || flow[i_arc ^ 1] > 0
    });

    let mut reached = vec![false; topology.n_nodes()];
    let mut bfs = Bfs::new(&residual, NodeIndex::new(src));
    while let Some(node) = bfs.next(&residual) {
        reached[node.index()] = true;
    }
    edges
        .into_iter()
        .filter(|&(u, v)| reached[u] != reached[v])
        .collect()
}

/// 2-approximate minimum vertex cover: the endpoints of a maximal matching.
pub fn vertex_cover(topology: &Topology) -> Vec<bool> {
    let mut cover = vec![false; topology.n_nodes()];
    let matching = algo::greedy_matching(topology.graph());
    for node in matching.nodes() {
        cover[node.index()] = true;
    }
    cover
}

/// Number of node pairs whose BFS shortest path passes through each node as an interior vertex.
pub fn shortest_path_count(topology: &Topology) -> Vec<usize> {
    let n_nodes = topology.n_nodes();
    let mut count = vec![0; n_nodes];
    let mut below = vec![0usize; n_nodes];

    for src in 0..n_nodes {
        let tree = topology.bfs_tree(src);

        // Only targets above the source, so each unordered pair is counted once.
        for &node in &tree.order {
            below[node] = usize::from(node > src);
        }
        for &node in tree.order.iter().skip(1).rev() {
            count[node] += below[node] - usize::from(node > src);
            if let Some(up) = tree.parent[node] {
                below[up] += below[node];
            }
        }
    }
    count
}

pub fn page_rank(topology: &Topology) -> Vec<f64> {
    if topology.n_nodes() == 0 {
        return Vec::new();
    }
    algo::page_rank(topology.graph(), PAGE_RANK_DAMPING, PAGE_RANK_ITER)
}

/// Local clustering coefficient of every node.
pub fn clustering(topology: &Topology) -> Vec<f64> {
    let n_nodes = topology.n_nodes();
    let mut marked = vec![false; n_nodes];
    (0..n_nodes)
        .map(|node| {
            let nbrs: Vec<usize> = topology.neighbors(node).collect();
            let deg = nbrs.len();
            if deg < 2 {
                return 0.0;
            }
            nbrs.iter().for_each(|&nbr| marked[nbr] = true);
            let links: usize = nbrs
                .iter()
                .map(|&nbr| topology.neighbors(nbr).filter(|&x| marked[x]).count())
                .sum();
            nbrs.iter().for_each(|&nbr| marked[nbr] = false);
            links as f64 / (deg * (deg - 1)) as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network;

    /// Two triangles joined by the bridge (2, 3).
    fn barbell() -> Topology {
        Topology::from_edges(6, &[(0, 1), (1, 2), (0, 2), (2, 3), (3, 4), (4, 5), (3, 5)])
    }

    #[test]
    fn ring_measures() {
        let measures = StaticMeasures::compute(&network::ring(10));
        assert_eq!(measures.degree, vec![2; 10]);
        assert_eq!(measures.avg_degree, 2.0);
        // Distances 1,1,2,2,3,3,4,4,5 from every node.
        assert!((measures.node_avg_distance[3] - 25.0 / 9.0).abs() < 1e-12);
        assert!((measures.avg_distance - 25.0 / 9.0).abs() < 1e-12);
        assert!(measures.clustering.iter().all(|&c| c == 0.0));
        let rank = measures.page_rank[0];
        assert!(rank > 0.0);
        assert!(measures.page_rank.iter().all(|&r| (r - rank).abs() < 1e-9));
    }

    #[test]
    fn communities_split_at_bridge() {
        let communities = greedy_modularity_communities(&barbell());
        assert_eq!(communities, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn bridge_endpoints_are_travelers() {
        let traveler = travelers(&barbell());
        assert_eq!(traveler, vec![false, false, true, true, false, false]);
    }

    #[test]
    fn minimum_cut_of_cycle_has_two_edges() {
        let topology = network::ring(6);
        let cut = minimum_edge_cut(&topology, 0, 3);
        assert_eq!(cut.len(), 2);

        let mut cut_topology = topology.clone();
        for &(u, v) in &cut {
            cut_topology.remove_edge(u, v);
        }
        assert!(!cut_topology.has_path(0, 3));
    }

    #[test]
    fn bridge_is_the_whole_cut() {
        assert_eq!(minimum_edge_cut(&barbell(), 0, 5), [(2, 3)]);
        let isolated = Topology::from_edges(3, &[(0, 1)]);
        assert!(minimum_edge_cut(&isolated, 0, 2).is_empty());
    }

    #[test]
    fn vertex_cover_covers_every_edge() {
        let topology = barbell();
        let cover = vertex_cover(&topology);
        for u in 0..topology.n_nodes() {
            for v in topology.neighbors(u) {
                assert!(cover[u] || cover[v]);
            }
        }
    }

    #[test]
    fn path_interior_counts() {
        // 0 - 1 - 2 - 3: node 1 is interior to (0,2), (0,3); node 2 to (0,3), (1,3).
        let topology = Topology::from_edges(4, &[(0, 1), (1, 2), (2, 3)]);
        assert_eq!(shortest_path_count(&topology), vec![0, 2, 2, 0]);
    }

    #[test]
    fn triangle_clustering_and_neighbor_degree() {
        let measures = StaticMeasures::compute(&barbell());
        assert_eq!(measures.clustering[0], 1.0);
        assert!((measures.clustering[2] - 1.0 / 3.0).abs() < 1e-12);
        assert!((measures.avg_neighbor_degree[3] - 7.0 / 3.0).abs() < 1e-12);
        assert!(measures.page_rank[2] > measures.page_rank[0]);
        assert!((measures.page_rank[0] - measures.page_rank[5]).abs() < 1e-9);
    }
}
