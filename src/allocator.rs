//! Budgeted mitigation allocation.

use crate::features::{FeatureExtractor, NetworkView, PeriodContext};
use crate::measures::StaticMeasures;
use crate::network::Topology;
use crate::program::{Program, Value};
use crate::state::{EpidemicState, Status};
use anyhow::{Result, bail};
use rand::{RngCore, seq::SliceRandom};
use serde::{Deserialize, Serialize};

/// Outcome of one measurement period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationRecord {
    pub iteration: usize,
    /// Nodes moved to [`Status::Mitigated`] this period, in application order.
    pub mitigated: Vec<usize>,
    pub total: usize,
    pub effective: usize,
    pub ineffective: usize,
    pub rollover_in: usize,
    pub rollover_out: usize,
}

/// Applies a primary program, and optionally a secondary one, to the candidates
/// of each period within a shared budget.
#[derive(Debug)]
pub struct Allocator<'a> {
    extractor: &'a FeatureExtractor,
    primary: &'a Program,
    secondary: Option<&'a Program>,
    capacity: usize,
    rollover: bool,
    carry: usize,
}

#[derive(Debug, Default)]
struct Tally {
    used: usize,
    effective: usize,
    mitigated: Vec<usize>,
}

impl<'a> Allocator<'a> {
    /// Fails if a program does not take exactly the extractor's feature tuple.
    pub fn new(
        extractor: &'a FeatureExtractor,
        primary: &'a Program,
        secondary: Option<&'a Program>,
        capacity: usize,
        rollover: bool,
    ) -> Result<Self> {
        let signature = extractor.signature();
        for program in std::iter::once(primary).chain(secondary) {
            if program.signature() != signature.as_slice() {
                bail!(
                    "strategy expects {} arguments {:?}, but the features provide {:?}",
                    program.signature().len(),
                    program.signature(),
                    signature
                );
            }
        }
        Ok(Self {
            extractor,
            primary,
            secondary,
            capacity,
            rollover,
            carry: 0,
        })
    }

    /// Budget carried into the next period.
    pub fn carry(&self) -> usize {
        self.carry
    }

    /// Run one measurement period against the current state.
    pub fn allocate(
        &mut self,
        iteration: usize,
        topology: &Topology,
        measures: &StaticMeasures,
        state: &mut EpidemicState,
        rng: &mut dyn RngCore,
    ) -> MitigationRecord {
        let rollover_in = self.carry;
        let cap = self.capacity + rollover_in;
        let mut tally = Tally::default();
        // Global counts are read once, before any candidate is considered.
        let counts = state.counts();

        let exposed = state.nodes_with(Status::Exposed);
        let mut candidates = state.nodes_with(Status::Susceptible);
        candidates.extend_from_slice(&exposed);

        if cap > 0 && !candidates.is_empty() {
            candidates.shuffle(rng);
            let period = PeriodContext {
                iteration,
                counts,
                mitigations_left: cap,
            };
            let primary = self.primary;
            self.apply(primary, &candidates, cap, period, topology, measures, state, &mut tally);

            if let Some(secondary) = self.secondary
                && tally.used < cap
            {
                let mut candidates = state.nodes_with(Status::Susceptible);
                candidates.extend_from_slice(&exposed);
                candidates.shuffle(rng);
                self.apply(secondary, &candidates, cap, period, topology, measures, state, &mut tally);
            }
        }

        self.carry = if self.rollover { cap - tally.used } else { 0 };

        let record = MitigationRecord {
            iteration,
            total: tally.used,
            effective: tally.effective,
            ineffective: tally.used - tally.effective,
            mitigated: tally.mitigated,
            rollover_in,
            rollover_out: self.carry,
        };
        log::debug!(
            "period {iteration}: {} mitigations ({} effective), carry {}",
            record.total,
            record.effective,
            record.rollover_out
        );
        record
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        program: &Program,
        candidates: &[usize],
        cap: usize,
        mut period: PeriodContext,
        topology: &Topology,
        measures: &StaticMeasures,
        state: &mut EpidemicState,
        tally: &mut Tally,
    ) {
        let mut args: Vec<Value> = Vec::with_capacity(self.extractor.arity());
        for &node in candidates {
            if tally.used >= cap {
                break;
            }
            period.mitigations_left = cap - tally.used;
            let view = NetworkView {
                topology,
                measures,
                state: &*state,
            };
            self.extractor.extract(node, &view, &period, &mut args);
            if !program.decide(&args) {
                continue;
            }

            match state.status(node) {
                Status::Susceptible => {
                    state.mitigate(node);
                    tally.effective += 1;
                    tally.mitigated.push(node);
                }
                Status::Exposed => {}
                _ => continue,
            }
            tally.used += 1;
        }
    }
}
