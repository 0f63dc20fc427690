//! Generational genetic programming over decision programs.

use crate::config::EvolutionConfig;
use crate::fitness::Fitness;
use crate::program::{Expr, Language};
use crate::stats::{Accumulator, AccumulatorReport};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const TOURNAMENT_SIZE: usize = 2;
const MAX_INIT_ATTEMPTS: usize = 1000;

/// A program together with its last measured fitness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub expr: Expr,
    pub fitness: Option<Fitness>,
}

impl Individual {
    fn new(expr: Expr) -> Self {
        Self {
            expr,
            fitness: None,
        }
    }

    fn cmp_fitter(&self, other: &Self) -> Ordering {
        match (&self.fitness, &other.fitness) {
            (Some(a), Some(b)) => a.cmp_fitter(b),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Logbook entry summarising one evaluated generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: usize,
    /// One report per objective, in objective order.
    pub fitness: Vec<AccumulatorReport>,
    pub size: AccumulatorReport,
}

impl GenerationStats {
    pub fn compile(generation: usize, population: &[Individual]) -> Self {
        let n_objectives = population
            .iter()
            .filter_map(|ind| ind.fitness.as_ref())
            .map(|fitness| fitness.values.len())
            .max()
            .unwrap_or(0);
        let mut fitness = vec![Accumulator::new(); n_objectives];
        for values in population.iter().filter_map(|ind| ind.fitness.as_ref()) {
            for (acc, &val) in fitness.iter_mut().zip(&values.values) {
                acc.add(val);
            }
        }
        Self {
            generation,
            fitness: fitness.iter().map(Accumulator::report).collect(),
            size: population
                .iter()
                .map(|ind| ind.expr.size() as f64)
                .collect::<Accumulator>()
                .report(),
        }
    }

    fn log(&self) {
        let fitness: Vec<String> = self
            .fitness
            .iter()
            .map(|r| format!("{:.2}/{:.2}/{:.2}", r.min, r.mean, r.max))
            .collect();
        log::info!(
            "generation {:04}: fitness min/avg/max [{}], size {:.0}/{:.2}/{:.0}",
            self.generation,
            fitness.join(", "),
            self.size.min,
            self.size.mean,
            self.size.max
        );
    }
}

/// Fittest individual of a population, if any has been evaluated.
pub fn best(population: &[Individual]) -> Option<&Individual> {
    population
        .iter()
        .filter(|ind| ind.fitness.is_some())
        .max_by(|a, b| a.cmp_fitter(b))
}

/// Search driver owning the master generator.
pub struct Evolution {
    cfg: EvolutionConfig,
    language: Language,
    rng: ChaCha12Rng,
}

impl Evolution {
    pub fn new(cfg: EvolutionConfig, language: Language, rng: ChaCha12Rng) -> Self {
        Self { cfg, language, rng }
    }

    /// Ramped half-and-half population, every tree within the bloat limits.
    pub fn init_population(&mut self) -> Result<Vec<Individual>> {
        (0..self.cfg.pop_size)
            .map(|i_ind| {
                let expr = self
                    .init_expr()
                    .with_context(|| format!("failed to generate individual {i_ind}"))?;
                Ok(Individual::new(expr))
            })
            .collect()
    }

    fn init_expr(&mut self) -> Result<Expr> {
        for _ in 0..MAX_INIT_ATTEMPTS {
            let expr = self.language.half_and_half(
                self.cfg.init_min_depth,
                self.cfg.init_max_depth,
                &mut self.rng,
            );
            if self.admits(&expr) {
                return Ok(expr);
            }
        }
        bail!(
            "no tree of depth {}..={} fits within size {} after {MAX_INIT_ATTEMPTS} attempts",
            self.cfg.init_min_depth,
            self.cfg.init_max_depth,
            self.cfg.max_size
        )
    }

    /// Evaluate every individual concurrently, each with its own generator.
    ///
    /// Seeds are drawn in population order before the parallel map, so the
    /// outcome does not depend on scheduling. Any failure aborts the whole batch.
    pub fn evaluate<F>(&mut self, population: &mut [Individual], evaluate_fn: &F) -> Result<()>
    where
        F: Fn(&Expr, &mut ChaCha12Rng) -> Result<Fitness> + Sync,
    {
        let seeds: Vec<u64> = population.iter().map(|_| self.rng.random()).collect();
        population
            .par_iter_mut()
            .zip(seeds)
            .enumerate()
            .try_for_each(|(i_ind, (ind, seed))| {
                let mut rng = ChaCha12Rng::seed_from_u64(seed);
                let fitness = evaluate_fn(&ind.expr, &mut rng)
                    .with_context(|| format!("failed to evaluate individual {i_ind}"))?;
                ind.fitness = Some(fitness);
                Ok(())
            })
    }

    /// Evaluate and summarise `population`, then breed its successor.
    pub fn run_generation<F>(
        &mut self,
        generation: usize,
        mut population: Vec<Individual>,
        evaluate_fn: &F,
    ) -> Result<(Vec<Individual>, GenerationStats)>
    where
        F: Fn(&Expr, &mut ChaCha12Rng) -> Result<Fitness> + Sync,
    {
        self.evaluate(&mut population, evaluate_fn)
            .with_context(|| format!("failed to evaluate generation {generation}"))?;
        let stats = GenerationStats::compile(generation, &population);
        stats.log();

        let next = self.breed(&population).context("failed to breed population")?;
        Ok((next, stats))
    }

    /// Run the configured number of generations and evaluate the final population.
    pub fn run<F>(&mut self, evaluate_fn: &F) -> Result<(Vec<Individual>, Vec<GenerationStats>)>
    where
        F: Fn(&Expr, &mut ChaCha12Rng) -> Result<Fitness> + Sync,
    {
        let mut population = self
            .init_population()
            .context("failed to initialize population")?;
        let mut logbook = Vec::with_capacity(self.cfg.n_generations + 1);
        for generation in 0..self.cfg.n_generations {
            let (next, stats) = self.run_generation(generation, population, evaluate_fn)?;
            logbook.push(stats);
            population = next;
        }

        let generation = self.cfg.n_generations;
        self.evaluate(&mut population, evaluate_fn)
            .with_context(|| format!("failed to evaluate generation {generation}"))?;
        let stats = GenerationStats::compile(generation, &population);
        stats.log();
        logbook.push(stats);

        Ok((population, logbook))
    }

    fn breed(&mut self, population: &[Individual]) -> Result<Vec<Individual>> {
        if let Some(i_ind) = population.iter().position(|ind| ind.fitness.is_none()) {
            bail!("individual {i_ind} has not been evaluated");
        }

        let mut next = Vec::with_capacity(self.cfg.pop_size);
        if self.cfg.elitism
            && let Some(elite) = best(population)
        {
            next.push(elite.clone());
        }

        let n_offspring = self.cfg.pop_size - next.len();
        let mut offspring: Vec<Expr> = (0..n_offspring)
            .map(|_| self.tournament(population).expr.clone())
            .collect();

        for i_off in (1..offspring.len()).step_by(2) {
            if self.rng.random::<f64>() < self.cfg.prob_cx {
                let (head, tail) = offspring.split_at_mut(i_off);
                self.mate(&mut head[i_off - 1], &mut tail[0]);
            }
        }
        for expr in &mut offspring {
            if self.rng.random::<f64>() < self.cfg.prob_mut {
                self.mutate(expr);
            }
        }

        next.extend(offspring.into_iter().map(Individual::new));
        Ok(next)
    }

    fn tournament<'p>(&mut self, population: &'p [Individual]) -> &'p Individual {
        let mut winner = &population[self.rng.random_range(0..population.len())];
        for _ in 1..TOURNAMENT_SIZE {
            let aspirant = &population[self.rng.random_range(0..population.len())];
            if aspirant.cmp_fitter(winner) == Ordering::Greater {
                winner = aspirant;
            }
        }
        winner
    }

    fn admits(&self, expr: &Expr) -> bool {
        expr.height() <= self.cfg.max_height && expr.size() <= self.cfg.max_size
    }

    /// One-point crossover; a child over the limits reverts to its parent.
    fn mate(&mut self, a: &mut Expr, b: &mut Expr) {
        let (parent_a, parent_b) = (a.clone(), b.clone());
        self.language.crossover(a, b, &mut self.rng);
        if !self.admits(a) {
            *a = parent_a;
        }
        if !self.admits(b) {
            *b = parent_b;
        }
    }

    /// Uniform subtree mutation; a result over the limits reverts to the parent.
    fn mutate(&mut self, expr: &mut Expr) {
        let parent = expr.clone();
        self.language
            .mutate(expr, self.cfg.mut_max_depth, &mut self.rng);
        if !self.admits(expr) {
            *expr = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness::Objective;
    use crate::program::{Type, Value};

    const SIGNATURE: [Type; 3] = [Type::Float, Type::Bool, Type::Float];
    const OBJECTIVES: [Objective; 2] = [Objective::PeakInfected, Objective::FinalSusceptible];

    fn config() -> EvolutionConfig {
        EvolutionConfig {
            pop_size: 12,
            n_generations: 6,
            prob_cx: 0.8,
            prob_mut: 0.3,
            init_min_depth: 1,
            init_max_depth: 4,
            mut_max_depth: 2,
            max_height: 5,
            max_size: 20,
            elitism: true,
            objectives: OBJECTIVES.to_vec(),
        }
    }

    fn evolution(seed: u64) -> Evolution {
        Evolution::new(
            config(),
            Language::new(&SIGNATURE),
            ChaCha12Rng::seed_from_u64(seed),
        )
    }

    /// Rewards small programs, with noise from the per-individual generator.
    fn noisy_size(expr: &Expr, rng: &mut ChaCha12Rng) -> Result<Fitness> {
        let args = [Value::Float(3.0), Value::Bool(true), Value::Float(rng.random())];
        let decision = f64::from(u8::from(expr.eval_bool(&args)));
        Ok(Fitness::from_values(
            &OBJECTIVES,
            vec![expr.size() as f64, decision + rng.random::<f64>()],
        ))
    }

    #[test]
    fn offspring_respect_limits_and_types() {
        let mut evo = evolution(0);
        let (population, logbook) = evo.run(&noisy_size).expect("failed to evolve");

        assert_eq!(population.len(), 12);
        assert_eq!(logbook.len(), 7);
        for ind in &population {
            assert!(ind.fitness.is_some());
            assert!(ind.expr.height() <= 5 && ind.expr.size() <= 20);
            assert_eq!(ind.expr.check(&SIGNATURE).expect("ill-typed"), Type::Bool);
        }
        for stats in &logbook {
            assert_eq!(stats.fitness.len(), 2);
            assert_eq!(stats.size.n_vals, 12);
        }
    }

    #[test]
    fn variation_never_breaks_the_limits() {
        let mut evo = evolution(1);
        for _ in 0..25 {
            let population = evo.init_population().expect("failed to initialize");
            let mut exprs: Vec<Expr> = population.into_iter().map(|ind| ind.expr).collect();
            assert!(exprs.iter().all(|expr| expr.height() <= 5 && expr.size() <= 20));

            for pair in exprs.chunks_exact_mut(2) {
                let (a, b) = pair.split_at_mut(1);
                evo.mate(&mut a[0], &mut b[0]);
            }
            for expr in &mut exprs {
                evo.mutate(expr);
                assert!(expr.height() <= 5 && expr.size() <= 20);
            }
        }
    }

    #[test]
    fn elite_survives_unmodified() {
        let mut evo = evolution(2);
        let mut population = evo.init_population().expect("failed to initialize");
        evo.evaluate(&mut population, &noisy_size)
            .expect("failed to evaluate");
        let elite = best(&population).expect("no best").expr.clone();

        let next = evo.breed(&population).expect("failed to breed");
        assert_eq!(next.len(), 12);
        assert_eq!(next[0].expr, elite);
        assert!(next[1..].iter().all(|ind| ind.fitness.is_none()));
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let (a, log_a) = evolution(3).run(&noisy_size).expect("failed to evolve");
        let (b, log_b) = evolution(3).run(&noisy_size).expect("failed to evolve");
        assert_eq!(a, b);
        assert_eq!(log_a, log_b);
    }

    #[test]
    fn evaluation_failure_halts_the_generation() {
        let mut evo = evolution(4);
        let mut population = evo.init_population().expect("failed to initialize");
        let deep = Expr::Not(Box::new(Expr::Not(Box::new(Expr::Not(Box::new(Expr::Bool(true)))))));
        population.push(Individual::new(deep));
        let failing = |expr: &Expr, rng: &mut ChaCha12Rng| {
            if expr.size() > 3 {
                bail!("simulation diverged");
            }
            noisy_size(expr, rng)
        };
        assert!(evo.run_generation(0, population, &failing).is_err());
    }

    #[test]
    fn breeding_requires_evaluated_population() {
        let mut evo = evolution(5);
        let population = evo.init_population().expect("failed to initialize");
        assert!(evo.breed(&population).is_err());
    }
}
