//! Single-run simulation driver.

use crate::allocator::{Allocator, MitigationRecord};
use crate::config::{Config, DynamicsConfig, MitigationConfig};
use crate::contagion::Contagion;
use crate::features::FeatureExtractor;
use crate::measures::StaticMeasures;
use crate::network::Topology;
use crate::program::Program;
use crate::rewire::Rewirer;
use crate::state::{EpidemicState, Snapshot};
use anyhow::{Context, Result, bail};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Everything a run records: one snapshot per step and one record per period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub snapshots: Vec<Snapshot>,
    pub mitigations: Vec<MitigationRecord>,
}

/// Runs strategies through the mitigation protocol on a shared topology.
///
/// Holds only read-only collaborators, so one instance can serve
/// concurrent runs as long as each brings its own state and generator.
pub struct Simulation<'a> {
    mitigation: MitigationConfig,
    dynamics: DynamicsConfig,
    reseed: bool,
    contagion: &'a dyn Contagion,
    extractor: &'a FeatureExtractor,
    accept_all: Program,
    rewirer: Option<Rewirer>,
}

impl<'a> Simulation<'a> {
    pub fn new(
        cfg: &Config,
        contagion: &'a dyn Contagion,
        extractor: &'a FeatureExtractor,
    ) -> Result<Self> {
        cfg.mitigation
            .validate()
            .context("invalid mitigation config")?;
        let rewirer = if cfg.dynamics.enabled {
            Some(Rewirer::from_config(&cfg.dynamics).context("failed to construct rewirer")?)
        } else {
            None
        };
        Ok(Self {
            mitigation: cfg.mitigation.clone(),
            dynamics: cfg.dynamics.clone(),
            reseed: cfg.model.reseed,
            contagion,
            extractor,
            accept_all: Program::constant(true, &extractor.signature()),
            rewirer,
        })
    }

    /// Run `program` for the configured number of steps starting from `state`.
    ///
    /// The base topology is never modified: in dynamic mode the run rewires a
    /// private copy. On success `state` is left ready for the next run, either
    /// restored to its seeding or freshly reseeded.
    pub fn evaluate(
        &self,
        program: &Program,
        topology: &Topology,
        measures: &StaticMeasures,
        state: &mut EpidemicState,
        rng: &mut dyn RngCore,
    ) -> Result<Trajectory> {
        if state.n_nodes() != topology.n_nodes() || measures.n_nodes() != topology.n_nodes() {
            bail!(
                "state, measures and topology disagree on the node count ({}, {}, {})",
                state.n_nodes(),
                measures.n_nodes(),
                topology.n_nodes()
            );
        }
        if state.iteration() != 0 {
            bail!("state has already advanced {} steps", state.iteration());
        }

        let secondary = self.mitigation.use_all.then_some(&self.accept_all);
        let mut allocator = Allocator::new(
            self.extractor,
            program,
            secondary,
            self.mitigation.capacity,
            self.mitigation.rollover,
        )
        .context("failed to construct allocator")?;

        let mut topology = Cow::Borrowed(topology);
        let mut measures = Cow::Borrowed(measures);
        let n_steps = self.mitigation.total_iterations;
        let mut trajectory = Trajectory {
            snapshots: Vec::with_capacity(n_steps),
            mitigations: Vec::with_capacity(n_steps / self.mitigation.measure_every),
        };

        for i_step in 0..n_steps {
            if i_step != 0 && i_step % self.mitigation.measure_every == 0 {
                let record = allocator.allocate(i_step, &topology, &measures, state, rng);
                trajectory.mitigations.push(record);
            }

            let snapshot = state
                .step(self.contagion, &topology, rng)
                .with_context(|| format!("failed to perform step {i_step}"))?;
            trajectory.snapshots.push(snapshot);

            if let Some(rewirer) = &self.rewirer {
                rewirer.rewire(topology.to_mut(), rng);
                if self.dynamics.recompute_measures {
                    measures = Cow::Owned(StaticMeasures::compute(&topology));
                    log::debug!("recomputed static measures after step {i_step}");
                }
            }
        }

        log::debug!("run ended with {} unused mitigations", allocator.carry());

        if self.reseed {
            state.reseed(rng);
        } else {
            state.reset();
        }

        Ok(trajectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contagion::Seir;
    use crate::features::Feature;
    use crate::network;
    use crate::state::Status;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    const CONFIG: &str = r#"
[model]
beta = 0.3
alpha = 0.3
gamma = 0.1
frac_infected = 0.05

[network]
kind = "erdos_renyi"
n_nodes = 80
edge_prob = 0.08

[mitigation]
total_iterations = 40
measure_every = 7
capacity = 4
rollover = true
features = ["degree", "nb_infected", "traveler"]

[evolution]
pop_size = 4
n_generations = 1
prob_cx = 0.8
prob_mut = 0.1
init_min_depth = 1
init_max_depth = 3
mut_max_depth = 2
max_height = 5
max_size = 32
objectives = ["peak_infected"]
"#;

    struct Fixture {
        cfg: Config,
        topology: Topology,
        measures: StaticMeasures,
        seir: Seir,
        extractor: FeatureExtractor,
    }

    impl Fixture {
        fn new(cfg: Config) -> Self {
            let mut rng = ChaCha12Rng::seed_from_u64(0);
            let topology = network::generate(&cfg.network, &mut rng).expect("failed to generate");
            Self {
                measures: StaticMeasures::compute(&topology),
                seir: Seir::from_config(&cfg.model).expect("failed to build model"),
                extractor: FeatureExtractor::new(&cfg.mitigation.features),
                topology,
                cfg,
            }
        }

        fn run(&self, program: &Program, seed: u64) -> Result<Trajectory> {
            let sim = Simulation::new(&self.cfg, &self.seir, &self.extractor)?;
            let mut rng = ChaCha12Rng::seed_from_u64(seed);
            let mut state = EpidemicState::initialize(
                self.topology.n_nodes(),
                self.cfg.model.frac_infected,
                &mut rng,
            )?;
            sim.evaluate(program, &self.topology, &self.measures, &mut state, &mut rng)
        }
    }

    fn config() -> Config {
        toml::from_str(CONFIG).expect("failed to parse config")
    }

    fn traveler_program(extractor: &FeatureExtractor) -> Program {
        let expr = crate::program::Expr::Arg {
            index: 2,
            ty: Feature::Traveler.ty(),
        };
        Program::compile(expr, &extractor.signature()).expect("failed to compile")
    }

    #[test]
    fn records_every_step_and_period() {
        let fx = Fixture::new(config());
        let always = Program::constant(true, &fx.extractor.signature());
        let trajectory = fx.run(&always, 1).expect("failed to run");

        assert_eq!(trajectory.snapshots.len(), 40);
        let periods: Vec<_> = trajectory.mitigations.iter().map(|r| r.iteration).collect();
        assert_eq!(periods, [7, 14, 21, 28, 35]);
        for (i, snapshot) in trajectory.snapshots.iter().enumerate() {
            assert_eq!(snapshot.iteration, i + 1);
            assert_eq!(snapshot.counts.total(), 80);
        }
    }

    #[test]
    fn mitigated_count_matches_effective_total() {
        let fx = Fixture::new(config());
        let always = Program::constant(true, &fx.extractor.signature());
        let trajectory = fx.run(&always, 2).expect("failed to run");

        let effective: usize = trajectory.mitigations.iter().map(|r| r.effective).sum();
        let last = trajectory.snapshots.last().expect("no snapshots");
        assert_eq!(last.counts.mitigated, effective);
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let fx = Fixture::new(config());
        let program = traveler_program(&fx.extractor);
        let a = fx.run(&program, 3).expect("failed to run");
        let b = fx.run(&program, 3).expect("failed to run");
        assert_eq!(a, b);

        let mut cfg = config();
        cfg.dynamics = DynamicsConfig {
            enabled: true,
            add_prob: 0.05,
            remove_prob: 0.05,
            recompute_measures: false,
        };
        let fx = Fixture::new(cfg);
        let a = fx.run(&program, 4).expect("failed to run");
        let b = fx.run(&program, 4).expect("failed to run");
        assert_eq!(a, b);
    }

    #[test]
    fn dynamic_mode_leaves_base_topology_untouched() {
        let mut cfg = config();
        cfg.dynamics = DynamicsConfig {
            enabled: true,
            add_prob: 0.2,
            remove_prob: 0.2,
            recompute_measures: true,
        };
        let fx = Fixture::new(cfg);
        let before = fx.topology.clone();
        let always = Program::constant(true, &fx.extractor.signature());
        let trajectory = fx.run(&always, 5).expect("failed to run");

        assert_eq!(fx.topology, before);
        assert!(trajectory.snapshots.iter().all(|s| s.counts.total() == 80));
    }

    #[test]
    fn state_is_ready_for_the_next_run() {
        let mut cfg = config();
        cfg.model.reseed = false;
        let fx = Fixture::new(cfg);
        let sim = Simulation::new(&fx.cfg, &fx.seir, &fx.extractor).expect("failed to build");
        let mut rng = ChaCha12Rng::seed_from_u64(6);
        let mut state = EpidemicState::initialize(80, 0.05, &mut rng).expect("failed to seed");
        let initial = state.statuses().to_vec();

        let always = Program::constant(true, &fx.extractor.signature());
        sim.evaluate(&always, &fx.topology, &fx.measures, &mut state, &mut rng)
            .expect("failed to run");
        assert_eq!(state.iteration(), 0);
        assert_eq!(state.statuses(), initial.as_slice());
        assert_eq!(state.count(Status::Mitigated), 0);
    }

    #[test]
    fn rejects_foreign_program_signature() {
        let fx = Fixture::new(config());
        let narrow = Program::constant(true, &fx.extractor.signature()[..1]);
        assert!(fx.run(&narrow, 7).is_err());
    }

    struct Faulty;

    impl Contagion for Faulty {
        fn advance(
            &self,
            _statuses: &[Status],
            _topology: &Topology,
            _rng: &mut dyn RngCore,
        ) -> Result<Vec<Status>> {
            bail!("transition table exhausted")
        }
    }

    #[test]
    fn contagion_failures_propagate() {
        let fx = Fixture::new(config());
        let sim = Simulation::new(&fx.cfg, &Faulty, &fx.extractor).expect("failed to build");
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let mut state = EpidemicState::initialize(80, 0.05, &mut rng).expect("failed to seed");
        let never = Program::constant(false, &fx.extractor.signature());
        let result = sim.evaluate(&never, &fx.topology, &fx.measures, &mut state, &mut rng);
        assert!(result.is_err());
    }
}
