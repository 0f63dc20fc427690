use crate::analysis::{Analyzer, write_trajectories};
use crate::baseline::StrategyName;
use crate::config::Config;
use crate::contagion::Seir;
use crate::evolution::{self, Evolution, Individual};
use crate::features::FeatureExtractor;
use crate::fitness::Fitness;
use crate::measures::StaticMeasures;
use crate::network::{self, Topology};
use crate::program::{Expr, Language, Program};
use crate::simulation::Simulation;
use crate::state::EpidemicState;
use anyhow::{Context, Result, bail};
use glob::glob;
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Evolve a population and save it together with its logbook in a new run dir.
    pub fn evolve(&self) -> Result<()> {
        let mut rng = self.master_rng()?;
        let topology = self
            .cached_topology(&mut rng)
            .context("failed to obtain topology")?;
        let measures = StaticMeasures::compute(&topology);
        log::info!("computed static measures");

        let seir = Seir::from_config(&self.cfg.model).context("failed to construct model")?;
        let extractor = FeatureExtractor::new(&self.cfg.mitigation.features);
        let sim = Simulation::new(&self.cfg, &seir, &extractor)
            .context("failed to construct simulation")?;
        let signature = extractor.signature();
        let objectives = &self.cfg.evolution.objectives;

        let evaluate_fn = |expr: &Expr, rng: &mut ChaCha12Rng| -> Result<Fitness> {
            let program = Program::compile(expr.clone(), &signature)?;
            let mut state = EpidemicState::initialize(
                topology.n_nodes(),
                self.cfg.model.frac_infected,
                &mut *rng,
            )?;
            let trajectory = sim.evaluate(&program, &topology, &measures, &mut state, rng)?;
            Ok(Fitness::new(objectives, &trajectory))
        };

        let language = Language::new(&signature);
        let mut evolution = Evolution::new(self.cfg.evolution.clone(), language, rng);
        let (population, logbook) = evolution
            .run(&evaluate_fn)
            .context("failed to run evolution")?;

        let run_idx = self
            .count_dirs("evolve-*")
            .context("failed to count evolve dirs")?;
        let run_dir = self.evolve_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        save_msgpack(run_dir.join("population.msgpack"), &population)
            .context("failed to save population")?;
        save_msgpack(run_dir.join("logbook.msgpack"), &logbook)
            .context("failed to save logbook")?;

        if let Some(best) = evolution::best(&population) {
            let labels = extractor.labels();
            log::info!(
                "best strategy {} with fitness {:?}",
                best.expr.display(&labels),
                best.fitness.as_ref().map(|fitness| &fitness.values)
            );
        }

        Ok(())
    }

    /// Run a strategy repeatedly and save every trajectory.
    pub fn evaluate(&self, strategy: StrategyName, n_runs: usize, new_topology: bool) -> Result<()> {
        let mut rng = self.master_rng()?;
        let seir = Seir::from_config(&self.cfg.model).context("failed to construct model")?;
        let extractor = FeatureExtractor::new(&self.cfg.mitigation.features);
        let sim = Simulation::new(&self.cfg, &seir, &extractor)
            .context("failed to construct simulation")?;

        let expr = match strategy {
            StrategyName::Best => self.best_evolved().context("failed to find best strategy")?,
            baseline => baseline
                .baseline_expr(&extractor)
                .context("failed to build baseline")?,
        };
        let program = Program::compile(expr, &extractor.signature())
            .with_context(|| format!("strategy {strategy} does not fit the configured features"))?;
        log::info!("evaluating {}", program.expr().display(&extractor.labels()));

        let run_dir = self.eval_dir(strategy);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let mut topology = self
            .cached_topology(&mut rng)
            .context("failed to obtain topology")?;
        let mut measures = StaticMeasures::compute(&topology);
        let mut state =
            EpidemicState::initialize(topology.n_nodes(), self.cfg.model.frac_infected, &mut rng)?;

        let trajectories = (0..n_runs).map(|i_run| {
            if new_topology && i_run > 0 {
                topology = network::generate(&self.cfg.network, &mut rng)
                    .context("failed to generate topology")?;
                measures = StaticMeasures::compute(&topology);
                state = EpidemicState::initialize(
                    topology.n_nodes(),
                    self.cfg.model.frac_infected,
                    &mut rng,
                )?;
            }
            sim.evaluate(&program, &topology, &measures, &mut state, &mut rng)
                .with_context(|| format!("failed to run {strategy} ({i_run})"))
        });
        write_trajectories(run_dir.join("trajectories.msgpack"), n_runs, trajectories)
            .context("failed to save trajectories")?;

        Ok(())
    }

    /// Summarise the trajectories of every evaluated strategy.
    pub fn analyze(&self) -> Result<()> {
        for run_dir in self.list_dirs("eval-*")? {
            let strategy = run_dir
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("eval-"))
                .context("invalid eval dir name")?
                .to_string();

            let mut analyzer = Analyzer::new(strategy);
            analyzer
                .add_file(run_dir.join("trajectories.msgpack"))
                .context("failed to add file")?;
            let summary = analyzer
                .save_results(run_dir.join("summary.msgpack"))
                .context("failed to save results")?;

            for (objective, report) in &summary.outcomes {
                log::info!(
                    "{} {objective:?}: {:.2} +- {:.2} over {} runs",
                    summary.strategy,
                    report.mean,
                    report.std_dev,
                    summary.n_runs
                );
            }
        }

        Ok(())
    }

    /// Remove every run dir and the cached topology.
    pub fn clean(&self) -> Result<()> {
        for pattern in ["evolve-*", "eval-*"] {
            for run_dir in self.list_dirs(pattern)? {
                fs::remove_dir_all(&run_dir)
                    .with_context(|| format!("failed to remove {run_dir:?}"))?;
                log::info!("removed {run_dir:?}");
            }
        }

        let network_file = self.network_file();
        if network_file.exists() {
            fs::remove_file(&network_file)
                .with_context(|| format!("failed to remove {network_file:?}"))?;
            log::info!("removed {network_file:?}");
        }

        Ok(())
    }

    fn master_rng(&self) -> Result<ChaCha12Rng> {
        let rng = match self.cfg.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };
        Ok(rng)
    }

    /// Load the saved topology, generating and saving it on first use.
    fn cached_topology(&self, rng: &mut ChaCha12Rng) -> Result<Topology> {
        let network_file = self.network_file();
        if network_file.exists() {
            let topology = Topology::load(&network_file)
                .with_context(|| format!("failed to load {network_file:?}"))?;
            log::info!("loaded {network_file:?}");
            return Ok(topology);
        }

        let topology =
            network::generate(&self.cfg.network, rng).context("failed to generate topology")?;
        topology
            .save(&network_file)
            .with_context(|| format!("failed to save {network_file:?}"))?;
        log::info!("saved {network_file:?}");
        Ok(topology)
    }

    fn best_evolved(&self) -> Result<Expr> {
        let n_runs = self
            .count_dirs("evolve-*")
            .context("failed to count evolve dirs")?;
        if n_runs == 0 {
            bail!("no evolution run found");
        }
        let file = self.evolve_dir(n_runs - 1).join("population.msgpack");
        let population: Vec<Individual> =
            load_msgpack(&file).with_context(|| format!("failed to load {file:?}"))?;
        let best = evolution::best(&population).context("population has no evaluated individual")?;
        Ok(best.expr.clone())
    }

    fn list_dirs(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join(pattern);
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let dirs = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .collect();
        Ok(dirs)
    }

    fn count_dirs(&self, pattern: &str) -> Result<usize> {
        Ok(self.list_dirs(pattern)?.len())
    }

    fn evolve_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("evolve-{run_idx:04}"))
    }

    fn eval_dir(&self, strategy: StrategyName) -> PathBuf {
        self.sim_dir.join(format!("eval-{}", strategy.slug()))
    }

    fn network_file(&self) -> PathBuf {
        self.sim_dir.join("network.msgpack")
    }
}

fn save_msgpack<P: AsRef<Path>, T: serde::Serialize>(file: P, value: &T) -> Result<()> {
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, value).context("failed to serialize value")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

fn load_msgpack<P: AsRef<Path>, T: serde::de::DeserializeOwned>(file: P) -> Result<T> {
    let file = file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);
    let value = decode::from_read(&mut reader).context("failed to deserialize value")?;
    Ok(value)
}

