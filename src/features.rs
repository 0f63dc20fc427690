//! Per-node feature tuples consumed by strategy programs.

use crate::measures::StaticMeasures;
use crate::network::Topology;
use crate::program::{Type, Value};
use crate::state::{EpidemicState, Status, StatusCounts};
use serde::{Deserialize, Serialize};

/// Named input a strategy can read about a candidate node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Degree,
    /// Average degree of the neighbours.
    NbDegree,
    /// Susceptible or exposed neighbours.
    NbSusexp,
    NbInfected,
    NbRemoved,
    Traveler,
    VertexCover,
    AvgDegree,
    AvgDist,
    NodeAvgDist,
    NumSusexp,
    NumInfected,
    NumRemoved,
    NumShortest,
    PageRank,
    Clustering,
    /// Budget still available in the current period.
    MitigationsLeft,
    Iteration,
}

impl Feature {
    pub fn ty(self) -> Type {
        match self {
            Feature::Traveler | Feature::VertexCover => Type::Bool,
            _ => Type::Float,
        }
    }

    /// Upper-case name used when rendering programs.
    pub fn label(self) -> &'static str {
        match self {
            Feature::Degree => "DEGREE",
            Feature::NbDegree => "NB_DEGREE",
            Feature::NbSusexp => "NB_SUSEXP",
            Feature::NbInfected => "NB_INFECTED",
            Feature::NbRemoved => "NB_REMOVED",
            Feature::Traveler => "TRAVELER",
            Feature::VertexCover => "VERTEX_COVER",
            Feature::AvgDegree => "AVG_DEGREE",
            Feature::AvgDist => "AVG_DIST",
            Feature::NodeAvgDist => "NODE_AVG_DIST",
            Feature::NumSusexp => "NUM_SUSEXP",
            Feature::NumInfected => "NUM_INFECTED",
            Feature::NumRemoved => "NUM_REMOVED",
            Feature::NumShortest => "NUM_SHORTEST",
            Feature::PageRank => "PAGE_RANK",
            Feature::Clustering => "CLUSTERING",
            Feature::MitigationsLeft => "MITIGATIONS_LEFT",
            Feature::Iteration => "ITERATION",
        }
    }

    fn reads_neighbors(self) -> bool {
        matches!(
            self,
            Feature::NbSusexp | Feature::NbInfected | Feature::NbRemoved
        )
    }
}

/// Period-level quantities shared by every candidate of one allocation pass.
#[derive(Debug, Clone, Copy)]
pub struct PeriodContext {
    pub iteration: usize,
    pub counts: StatusCounts,
    pub mitigations_left: usize,
}

/// Read-only view of the network a feature is computed against.
#[derive(Debug, Clone, Copy)]
pub struct NetworkView<'a> {
    pub topology: &'a Topology,
    pub measures: &'a StaticMeasures,
    pub state: &'a EpidemicState,
}

#[derive(Debug, Default)]
struct NeighborCounts {
    susexp: usize,
    infected: usize,
    removed: usize,
}

/// Builds the ordered argument tuple of a configured feature list.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    features: Vec<Feature>,
    reads_neighbors: bool,
}

impl FeatureExtractor {
    pub fn new(features: &[Feature]) -> Self {
        Self {
            features: features.to_vec(),
            reads_neighbors: features.iter().any(|f| f.reads_neighbors()),
        }
    }

    pub fn arity(&self) -> usize {
        self.features.len()
    }

    pub fn signature(&self) -> Vec<Type> {
        self.features.iter().map(|f| f.ty()).collect()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.features.iter().map(|f| f.label()).collect()
    }

    pub fn index_of(&self, feature: Feature) -> Option<usize> {
        self.features.iter().position(|&f| f == feature)
    }

    /// Write the feature tuple of `node` into `out`, replacing its contents.
    pub fn extract(
        &self,
        node: usize,
        view: &NetworkView<'_>,
        period: &PeriodContext,
        out: &mut Vec<Value>,
    ) {
        let nbrs = if self.reads_neighbors {
            neighbor_counts(node, view)
        } else {
            NeighborCounts::default()
        };
        let m = view.measures;
        let counts = &period.counts;

        out.clear();
        out.extend(self.features.iter().map(|&feature| match feature {
            Feature::Degree => Value::Float(m.degree[node] as f64),
            Feature::NbDegree => Value::Float(m.avg_neighbor_degree[node]),
            Feature::NbSusexp => Value::Float(nbrs.susexp as f64),
            Feature::NbInfected => Value::Float(nbrs.infected as f64),
            Feature::NbRemoved => Value::Float(nbrs.removed as f64),
            Feature::Traveler => Value::Bool(m.traveler[node]),
            Feature::VertexCover => Value::Bool(m.vertex_cover[node]),
            Feature::AvgDegree => Value::Float(m.avg_degree),
            Feature::AvgDist => Value::Float(m.avg_distance),
            Feature::NodeAvgDist => Value::Float(m.node_avg_distance[node]),
            Feature::NumSusexp => Value::Float((counts.susceptible + counts.exposed) as f64),
            Feature::NumInfected => Value::Float(counts.infected as f64),
            Feature::NumRemoved => Value::Float(counts.removed as f64),
            Feature::NumShortest => Value::Float(m.shortest_path_count[node] as f64),
            Feature::PageRank => Value::Float(m.page_rank[node]),
            Feature::Clustering => Value::Float(m.clustering[node]),
            Feature::MitigationsLeft => Value::Float(period.mitigations_left as f64),
            Feature::Iteration => Value::Float(period.iteration as f64),
        }));
    }
}

fn neighbor_counts(node: usize, view: &NetworkView<'_>) -> NeighborCounts {
    let mut nbrs = NeighborCounts::default();
    for nbr in view.topology.neighbors(node) {
        match view.state.status(nbr) {
            Status::Susceptible | Status::Exposed => nbrs.susexp += 1,
            Status::Infected => nbrs.infected += 1,
            Status::Removed => nbrs.removed += 1,
            Status::Mitigated => {}
        }
    }
    nbrs
}
