use crate::features::Feature;
use crate::fitness::Objective;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt::Debug,
    fs,
    hash::Hash,
    ops::RangeBounds,
    path::{Path, PathBuf},
};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Seed of the master random number generator (OS entropy if absent).
    #[serde(default)]
    pub seed: Option<u64>,

    pub model: ModelConfig,
    pub network: NetworkConfig,
    pub mitigation: MitigationConfig,
    #[serde(default)]
    pub dynamics: DynamicsConfig,
    pub evolution: EvolutionConfig,
}

/// Contagion model parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Exposure probability per infected neighbour.
    pub beta: f64,
    /// Exposed to infected probability.
    pub alpha: f64,
    /// Infected to removed probability.
    pub gamma: f64,
    /// Fraction of nodes initially infected.
    pub frac_infected: f64,
    /// Draw a fresh initial seeding between runs instead of restoring the first one.
    #[serde(default = "default_true")]
    pub reseed: bool,
}

/// Network topology to generate or load.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkConfig {
    Ring {
        n_nodes: usize,
    },
    ErdosRenyi {
        n_nodes: usize,
        edge_prob: f64,
    },
    BarabasiAlbert {
        n_nodes: usize,
        n_edges: usize,
    },
    WattsStrogatz {
        n_nodes: usize,
        k_near: usize,
        rewire_prob: f64,
    },
    PowerlawCluster {
        n_nodes: usize,
        n_edges: usize,
        triangle_prob: f64,
    },
    File {
        path: PathBuf,
    },
}

/// Mitigation protocol parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct MitigationConfig {
    /// Number of simulation steps per run.
    pub total_iterations: usize,
    /// Number of steps between mitigation periods.
    pub measure_every: usize,
    /// Mitigations available per period.
    pub capacity: usize,
    /// Carry unused mitigations over to the next period.
    #[serde(default)]
    pub rollover: bool,
    /// Spend the remaining budget with a secondary accept-all pass.
    #[serde(default)]
    pub use_all: bool,
    /// Ordered features a strategy receives as arguments.
    pub features: Vec<Feature>,
}

/// Dynamic topology parameters.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct DynamicsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Per node probability of gaining an edge each step.
    #[serde(default)]
    pub add_prob: f64,
    /// Per node probability of losing an edge each step.
    #[serde(default)]
    pub remove_prob: f64,
    /// Recompute the static measures after every rewiring step.
    #[serde(default)]
    pub recompute_measures: bool,
}

/// Evolutionary search parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    pub pop_size: usize,
    pub n_generations: usize,
    /// Crossover probability per offspring pair.
    pub prob_cx: f64,
    /// Mutation probability per offspring.
    pub prob_mut: f64,
    pub init_min_depth: usize,
    pub init_max_depth: usize,
    pub mut_max_depth: usize,
    /// Maximum tree height after any variation.
    pub max_height: usize,
    /// Maximum tree node count after any variation.
    pub max_size: usize,
    #[serde(default = "default_elitism")]
    pub elitism: bool,
    /// Objectives, from most to least significant.
    pub objectives: Vec<Objective>,
}

fn default_true() -> bool {
    true
}

fn default_elitism() -> bool {
    true
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate().context("invalid model config")?;
        self.network.validate().context("invalid network config")?;
        self.mitigation
            .validate()
            .context("invalid mitigation config")?;
        self.dynamics.validate().context("invalid dynamics config")?;
        self.evolution.validate().context("invalid evolution config")?;
        Ok(())
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.beta, 0.0..=1.0).context("invalid exposure probability")?;
        check_num(self.alpha, 0.0..=1.0).context("invalid incubation probability")?;
        check_num(self.gamma, 0.0..=1.0).context("invalid removal probability")?;
        check_num(self.frac_infected, 0.0..=1.0).context("invalid infected fraction")?;
        Ok(())
    }
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        match *self {
            NetworkConfig::Ring { n_nodes } => {
                check_num(n_nodes, 3..1_000_000).context("invalid number of nodes")?;
            }
            NetworkConfig::ErdosRenyi { n_nodes, edge_prob } => {
                check_num(n_nodes, 1..1_000_000).context("invalid number of nodes")?;
                check_num(edge_prob, 0.0..=1.0).context("invalid edge probability")?;
            }
            NetworkConfig::BarabasiAlbert { n_nodes, n_edges } => {
                check_num(n_nodes, 2..1_000_000).context("invalid number of nodes")?;
                check_num(n_edges, 1..n_nodes.max(2)).context("invalid number of edges")?;
            }
            NetworkConfig::WattsStrogatz {
                n_nodes,
                k_near,
                rewire_prob,
            } => {
                check_num(n_nodes, 3..1_000_000).context("invalid number of nodes")?;
                check_num(k_near, 2..n_nodes.max(3)).context("invalid number of neighbours")?;
                check_num(rewire_prob, 0.0..=1.0).context("invalid rewiring probability")?;
            }
            NetworkConfig::PowerlawCluster {
                n_nodes,
                n_edges,
                triangle_prob,
            } => {
                check_num(n_nodes, 2..1_000_000).context("invalid number of nodes")?;
                check_num(n_edges, 1..n_nodes.max(2)).context("invalid number of edges")?;
                check_num(triangle_prob, 0.0..=1.0).context("invalid triangle probability")?;
            }
            NetworkConfig::File { .. } => {}
        }
        Ok(())
    }
}

impl MitigationConfig {
    pub fn validate(&self) -> Result<()> {
        check_num(self.total_iterations, 1..1_000_000).context("invalid number of iterations")?;
        check_num(self.measure_every, 1..1_000_000).context("invalid measurement period")?;
        check_num(self.features.len(), 1..64).context("invalid number of features")?;
        check_unique(&self.features).context("invalid feature list")?;
        Ok(())
    }
}

impl DynamicsConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.add_prob, 0.0..=1.0).context("invalid edge addition probability")?;
        check_num(self.remove_prob, 0.0..=1.0).context("invalid edge removal probability")?;
        Ok(())
    }
}

impl EvolutionConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.pop_size, 2..1_000_000).context("invalid population size")?;
        check_num(self.n_generations, 0..1_000_000).context("invalid number of generations")?;
        check_num(self.prob_cx, 0.0..=1.0).context("invalid crossover probability")?;
        check_num(self.prob_mut, 0.0..=1.0).context("invalid mutation probability")?;
        check_num(self.init_max_depth, 0..=self.max_height)
            .context("invalid maximum initial depth")?;
        check_num(self.init_min_depth, 0..=self.init_max_depth)
            .context("invalid minimum initial depth")?;
        check_num(self.mut_max_depth, 0..=self.max_height)
            .context("invalid maximum mutation depth")?;
        check_num(self.max_size, 1..100_000).context("invalid maximum tree size")?;
        check_num(self.objectives.len(), 1..16).context("invalid number of objectives")?;
        check_unique(&self.objectives).context("invalid objective list")?;
        Ok(())
    }
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_unique<T: Eq + Hash + Debug>(items: &[T]) -> Result<()> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(item) {
            bail!("{item:?} appears more than once");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
seed = 7

[model]
beta = 0.09
alpha = 0.156
gamma = 0.133
frac_infected = 0.02

[network]
kind = "erdos_renyi"
n_nodes = 100
edge_prob = 0.05

[mitigation]
total_iterations = 28
measure_every = 7
capacity = 5
features = ["degree", "nb_infected", "traveler", "num_infected"]

[evolution]
pop_size = 8
n_generations = 2
prob_cx = 0.8
prob_mut = 0.1
init_min_depth = 1
init_max_depth = 4
mut_max_depth = 2
max_height = 5
max_size = 32
objectives = ["peak_infected", "cumulative_infected"]
"#;

    #[test]
    fn parses_sectioned_config() {
        let cfg: Config = toml::from_str(CONFIG).expect("failed to parse config");
        cfg.validate().expect("config should be valid");

        assert_eq!(cfg.seed, Some(7));
        assert!(cfg.model.reseed);
        assert_eq!(
            cfg.network,
            NetworkConfig::ErdosRenyi {
                n_nodes: 100,
                edge_prob: 0.05
            }
        );
        assert!(!cfg.mitigation.rollover);
        assert!(!cfg.dynamics.enabled);
        assert!(cfg.evolution.elitism);
        assert_eq!(cfg.mitigation.features[2], Feature::Traveler);
    }

    #[test]
    fn rejects_zero_measurement_period() {
        let mut cfg: Config = toml::from_str(CONFIG).expect("failed to parse config");
        cfg.mitigation.measure_every = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_features() {
        let mut cfg: Config = toml::from_str(CONFIG).expect("failed to parse config");
        cfg.mitigation.features.push(Feature::Degree);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_depth_range() {
        let mut cfg: Config = toml::from_str(CONFIG).expect("failed to parse config");
        cfg.evolution.init_min_depth = 4;
        cfg.evolution.init_max_depth = 2;
        assert!(cfg.validate().is_err());
    }
}
