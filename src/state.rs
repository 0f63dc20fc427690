//! Per-node epidemic status register.

use crate::contagion::Contagion;
use crate::network::Topology;
use anyhow::{Context, Result, bail};
use rand::{RngCore, seq::index};
use serde::{Deserialize, Serialize};

/// Epidemic status of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Susceptible,
    Exposed,
    Infected,
    Removed,
    Mitigated,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Susceptible,
        Status::Exposed,
        Status::Infected,
        Status::Removed,
        Status::Mitigated,
    ];

    /// No transition ever leaves a terminal status within a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Removed | Status::Mitigated)
    }
}

/// Number of nodes in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub susceptible: usize,
    pub exposed: usize,
    pub infected: usize,
    pub removed: usize,
    pub mitigated: usize,
}

impl StatusCounts {
    pub fn from_statuses(statuses: &[Status]) -> Self {
        let mut counts = Self::default();
        for &status in statuses {
            *counts.get_mut(status) += 1;
        }
        counts
    }

    pub fn get(&self, status: Status) -> usize {
        match status {
            Status::Susceptible => self.susceptible,
            Status::Exposed => self.exposed,
            Status::Infected => self.infected,
            Status::Removed => self.removed,
            Status::Mitigated => self.mitigated,
        }
    }

    fn get_mut(&mut self, status: Status) -> &mut usize {
        match status {
            Status::Susceptible => &mut self.susceptible,
            Status::Exposed => &mut self.exposed,
            Status::Infected => &mut self.infected,
            Status::Removed => &mut self.removed,
            Status::Mitigated => &mut self.mitigated,
        }
    }

    pub fn total(&self) -> usize {
        Status::ALL.iter().map(|&status| self.get(status)).sum()
    }
}

/// Status counts recorded after one simulation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub iteration: usize,
    pub counts: StatusCounts,
}

/// Status register over a fixed node set.
///
/// Remembers its initial seeding so it can be restored with [`EpidemicState::reset`]
/// or redrawn with [`EpidemicState::reseed`].
#[derive(Debug, Clone)]
pub struct EpidemicState {
    statuses: Vec<Status>,
    initial: Vec<Status>,
    frac_infected: f64,
    iteration: usize,
}

impl EpidemicState {
    /// Seed `round(frac_infected * n_nodes)` distinct random nodes as infected.
    pub fn initialize(n_nodes: usize, frac_infected: f64, rng: &mut dyn RngCore) -> Result<Self> {
        if !(0.0..=1.0).contains(&frac_infected) {
            bail!("infected fraction must be in the range 0..=1, but is {frac_infected}");
        }
        let statuses = seed_statuses(n_nodes, frac_infected, rng);
        Ok(Self {
            initial: statuses.clone(),
            statuses,
            frac_infected,
            iteration: 0,
        })
    }

    /// Build a state from explicit statuses, used as its own initial seeding.
    pub fn from_statuses(statuses: Vec<Status>) -> Self {
        let n_nodes = statuses.len().max(1);
        let frac_infected = StatusCounts::from_statuses(&statuses).infected as f64 / n_nodes as f64;
        Self {
            initial: statuses.clone(),
            statuses,
            frac_infected,
            iteration: 0,
        }
    }

    /// Advance every node by one unit of simulated time.
    pub fn step(
        &mut self,
        contagion: &dyn Contagion,
        topology: &Topology,
        rng: &mut dyn RngCore,
    ) -> Result<Snapshot> {
        if topology.n_nodes() != self.statuses.len() {
            bail!(
                "topology has {} nodes, but state has {}",
                topology.n_nodes(),
                self.statuses.len()
            );
        }
        let next = contagion
            .advance(&self.statuses, topology, rng)
            .context("failed to advance contagion")?;
        if next.len() != self.statuses.len() {
            bail!(
                "contagion returned {} statuses, expected {}",
                next.len(),
                self.statuses.len()
            );
        }
        for (node, (&old, &new)) in self.statuses.iter().zip(&next).enumerate() {
            if old.is_terminal() && old != new {
                bail!("undefined transition {old:?} -> {new:?} for node {node}");
            }
            if new == Status::Mitigated && old != Status::Mitigated {
                bail!("contagion cannot mitigate node {node}");
            }
        }
        self.statuses = next;
        self.iteration += 1;

        Ok(Snapshot {
            iteration: self.iteration,
            counts: self.counts(),
        })
    }

    pub fn n_nodes(&self) -> usize {
        self.statuses.len()
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn status(&self, node: usize) -> Status {
        self.statuses[node]
    }

    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    pub fn count(&self, status: Status) -> usize {
        self.statuses.iter().filter(|&&s| s == status).count()
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_statuses(&self.statuses)
    }

    pub fn nodes_with(&self, status: Status) -> Vec<usize> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s == status)
            .map(|(node, _)| node)
            .collect()
    }

    /// Move a susceptible node to [`Status::Mitigated`].
    ///
    /// Returns `false`, leaving the node untouched, if it is not susceptible.
    pub fn mitigate(&mut self, node: usize) -> bool {
        if self.statuses[node] != Status::Susceptible {
            return false;
        }
        self.statuses[node] = Status::Mitigated;
        true
    }

    /// Restore the recorded initial seeding.
    pub fn reset(&mut self) {
        self.statuses.clone_from(&self.initial);
        self.iteration = 0;
    }

    /// Draw and record a fresh initial seeding.
    pub fn reseed(&mut self, rng: &mut dyn RngCore) {
        self.initial = seed_statuses(self.statuses.len(), self.frac_infected, rng);
        self.reset();
    }
}

fn seed_statuses(n_nodes: usize, frac_infected: f64, rng: &mut dyn RngCore) -> Vec<Status> {
    let n_infected = ((frac_infected * n_nodes as f64).round() as usize).min(n_nodes);
    let mut statuses = vec![Status::Susceptible; n_nodes];
    for node in index::sample(rng, n_nodes, n_infected) {
        statuses[node] = Status::Infected;
    }
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contagion::Seir;
    use crate::network;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn seeds_rounded_fraction() {
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let state = EpidemicState::initialize(500, 0.02, &mut rng).expect("failed to seed");
        assert_eq!(state.count(Status::Infected), 10);
        assert_eq!(state.count(Status::Susceptible), 490);
        assert_eq!(state.nodes_with(Status::Infected).len(), 10);
    }

    #[test]
    fn counts_are_conserved_across_steps() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let topology = network::erdos_renyi(200, 0.05, &mut rng).expect("failed to generate");
        let seir = Seir::new(0.2, 0.3, 0.1).expect("failed to build model");
        let mut state = EpidemicState::initialize(200, 0.05, &mut rng).expect("failed to seed");
        state.mitigate(state.nodes_with(Status::Susceptible)[0]);

        for _ in 0..50 {
            let snapshot = state.step(&seir, &topology, &mut rng).expect("failed to step");
            assert_eq!(snapshot.counts.total(), 200);
            assert_eq!(snapshot.counts.mitigated, 1);
        }
        assert_eq!(state.iteration(), 50);
    }

    #[test]
    fn mitigate_only_susceptible() {
        let mut state = EpidemicState::from_statuses(vec![
            Status::Susceptible,
            Status::Exposed,
            Status::Infected,
        ]);
        assert!(state.mitigate(0));
        assert!(!state.mitigate(0));
        assert!(!state.mitigate(1));
        assert!(!state.mitigate(2));
        assert_eq!(state.status(0), Status::Mitigated);
        assert_eq!(state.status(1), Status::Exposed);
    }

    #[test]
    fn reset_restores_initial_seeding() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let topology = network::ring(50);
        let seir = Seir::new(1.0, 1.0, 0.5).expect("failed to build model");
        let mut state = EpidemicState::initialize(50, 0.1, &mut rng).expect("failed to seed");
        let initial = state.statuses().to_vec();

        for _ in 0..5 {
            state.step(&seir, &topology, &mut rng).expect("failed to step");
        }
        assert_ne!(state.statuses(), initial.as_slice());

        state.reset();
        assert_eq!(state.statuses(), initial.as_slice());
        assert_eq!(state.iteration(), 0);

        state.reseed(&mut rng);
        assert_eq!(state.count(Status::Infected), 5);
    }

    struct Resurrect;

    impl Contagion for Resurrect {
        fn advance(
            &self,
            statuses: &[Status],
            _topology: &Topology,
            _rng: &mut dyn RngCore,
        ) -> Result<Vec<Status>> {
            Ok(vec![Status::Susceptible; statuses.len()])
        }
    }

    #[test]
    fn undefined_transition_is_fatal() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let topology = network::ring(3);
        let mut state =
            EpidemicState::from_statuses(vec![Status::Removed, Status::Susceptible, Status::Infected]);
        assert!(state.step(&Resurrect, &topology, &mut rng).is_err());
        assert_eq!(state.status(0), Status::Removed);
    }
}
