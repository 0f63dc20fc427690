//! Objective aggregation over simulation trajectories.

use crate::allocator::MitigationRecord;
use crate::simulation::Trajectory;
use crate::state::{Snapshot, StatusCounts};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Scalar outcome of a run that the search can optimise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    PeakInfected,
    CumulativeInfected,
    FinalSusceptible,
    FinalRemoved,
    TotalMitigations,
    EffectiveMitigations,
    IneffectiveMitigations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    pub fn weight(self) -> f64 {
        match self {
            Direction::Minimize => -1.0,
            Direction::Maximize => 1.0,
        }
    }
}

impl Objective {
    pub fn direction(self) -> Direction {
        match self {
            Objective::FinalSusceptible => Direction::Maximize,
            _ => Direction::Minimize,
        }
    }

    pub fn measure(self, trajectory: &Trajectory) -> f64 {
        let snapshots = &trajectory.snapshots;
        let totals = mitigation_totals(&trajectory.mitigations);
        let value = match self {
            Objective::PeakInfected => peak_infected(snapshots),
            Objective::CumulativeInfected => cumulative_infected(snapshots),
            Objective::FinalSusceptible => final_counts(snapshots).susceptible,
            Objective::FinalRemoved => final_counts(snapshots).removed,
            Objective::TotalMitigations => totals.total,
            Objective::EffectiveMitigations => totals.effective,
            Objective::IneffectiveMitigations => totals.ineffective,
        };
        value as f64
    }
}

pub fn peak_infected(snapshots: &[Snapshot]) -> usize {
    snapshots
        .iter()
        .map(|snapshot| snapshot.counts.infected)
        .max()
        .unwrap_or(0)
}

/// Discrete area under the infected curve.
pub fn cumulative_infected(snapshots: &[Snapshot]) -> usize {
    snapshots.iter().map(|snapshot| snapshot.counts.infected).sum()
}

pub fn final_counts(snapshots: &[Snapshot]) -> StatusCounts {
    snapshots
        .last()
        .map(|snapshot| snapshot.counts)
        .unwrap_or_default()
}

/// Running mitigation totals up to some period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationTotals {
    pub total: usize,
    pub effective: usize,
    pub ineffective: usize,
}

/// Cumulative totals after each period.
pub fn mitigation_trend(records: &[MitigationRecord]) -> Vec<MitigationTotals> {
    records
        .iter()
        .scan(MitigationTotals::default(), |acc, record| {
            acc.total += record.total;
            acc.effective += record.effective;
            acc.ineffective += record.ineffective;
            Some(*acc)
        })
        .collect()
}

pub fn mitigation_totals(records: &[MitigationRecord]) -> MitigationTotals {
    mitigation_trend(records).last().copied().unwrap_or_default()
}

/// Objective vector of one evaluated strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fitness {
    pub values: Vec<f64>,
    weights: Vec<f64>,
}

impl Fitness {
    pub fn new(objectives: &[Objective], trajectory: &Trajectory) -> Self {
        let values = objectives.iter().map(|obj| obj.measure(trajectory)).collect();
        Self::from_values(objectives, values)
    }

    pub fn from_values(objectives: &[Objective], values: Vec<f64>) -> Self {
        debug_assert_eq!(objectives.len(), values.len());
        Self {
            values,
            weights: objectives.iter().map(|obj| obj.direction().weight()).collect(),
        }
    }

    /// Lexicographic comparison of weighted values; greater is fitter.
    pub fn cmp_fitter(&self, other: &Self) -> Ordering {
        let weighted = |fitness: &Self| {
            fitness
                .values
                .iter()
                .zip(&fitness.weights)
                .map(|(value, weight)| value * weight)
                .collect::<Vec<_>>()
        };
        let (lhs, rhs) = (weighted(self), weighted(other));
        lhs.iter()
            .zip(&rhs)
            .map(|(a, b)| a.total_cmp(b))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}
