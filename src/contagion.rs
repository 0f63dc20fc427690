//! Contagion transition models.

use crate::config::ModelConfig;
use crate::network::Topology;
use crate::state::Status;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Bernoulli;

/// Advances every node's status by one unit of simulated time.
///
/// Implementations must never move a node out of a terminal status
/// and must never produce [`Status::Mitigated`].
pub trait Contagion: Send + Sync {
    fn advance(
        &self,
        statuses: &[Status],
        topology: &Topology,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Status>>;
}

/// Discrete-time synchronous SEIR model.
#[derive(Debug, Clone)]
pub struct Seir {
    beta: f64,
    incubation_dist: Bernoulli,
    removal_dist: Bernoulli,
}

impl Seir {
    pub fn new(beta: f64, alpha: f64, gamma: f64) -> Result<Self> {
        Bernoulli::new(beta).context("invalid exposure probability")?;
        Ok(Self {
            beta,
            incubation_dist: Bernoulli::new(alpha).context("invalid incubation probability")?,
            removal_dist: Bernoulli::new(gamma).context("invalid removal probability")?,
        })
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        Self::new(cfg.beta, cfg.alpha, cfg.gamma)
    }
}

impl Contagion for Seir {
    fn advance(
        &self,
        statuses: &[Status],
        topology: &Topology,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Status>> {
        let mut next = statuses.to_vec();
        for (node, &status) in statuses.iter().enumerate() {
            next[node] = match status {
                Status::Susceptible => {
                    let n_infected = topology
                        .neighbors(node)
                        .filter(|&nbr| statuses[nbr] == Status::Infected)
                        .count();
                    let prob = (self.beta * n_infected as f64).min(1.0);
                    if n_infected > 0 && rng.random_bool(prob) {
                        Status::Exposed
                    } else {
                        Status::Susceptible
                    }
                }
                Status::Exposed if self.incubation_dist.sample(rng) => Status::Infected,
                Status::Infected if self.removal_dist.sample(rng) => Status::Removed,
                other => other,
            };
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn certain_transitions_follow_seir_order() {
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let topology = network::Topology::from_edges(3, &[(0, 1), (1, 2)]);
        let seir = Seir::new(1.0, 1.0, 1.0).expect("failed to build model");

        let statuses = [Status::Infected, Status::Susceptible, Status::Susceptible];
        let next = seir
            .advance(&statuses, &topology, &mut rng)
            .expect("failed to advance");
        assert_eq!(next, [Status::Removed, Status::Exposed, Status::Susceptible]);

        let next = seir.advance(&next, &topology, &mut rng).expect("failed to advance");
        assert_eq!(next, [Status::Removed, Status::Infected, Status::Susceptible]);
    }

    #[test]
    fn terminal_statuses_are_absorbing() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let topology = network::ring(4);
        let seir = Seir::new(1.0, 1.0, 1.0).expect("failed to build model");
        let statuses = [
            Status::Mitigated,
            Status::Infected,
            Status::Removed,
            Status::Infected,
        ];
        let next = seir
            .advance(&statuses, &topology, &mut rng)
            .expect("failed to advance");
        assert_eq!(next[0], Status::Mitigated);
        assert_eq!(next[2], Status::Removed);
    }

    #[test]
    fn rejects_invalid_probabilities() {
        assert!(Seir::new(1.5, 0.1, 0.1).is_err());
        assert!(Seir::new(0.1, -0.1, 0.1).is_err());
    }
}
