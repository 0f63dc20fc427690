use crate::fitness::{Objective, mitigation_trend};
use crate::simulation::Trajectory;
use crate::stats::{Accumulator, AccumulatorReport};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

const OUTCOMES: [Objective; 7] = [
    Objective::PeakInfected,
    Objective::CumulativeInfected,
    Objective::FinalSusceptible,
    Objective::FinalRemoved,
    Objective::TotalMitigations,
    Objective::EffectiveMitigations,
    Objective::IneffectiveMitigations,
];

/// Cross-run statistics of one evaluated strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub strategy: String,
    pub n_runs: usize,
    pub outcomes: Vec<(Objective, AccumulatorReport)>,
    /// Infected count at each step.
    pub infected_curve: Vec<AccumulatorReport>,
    /// Cumulative mitigations after each period.
    pub mitigation_trend: Vec<AccumulatorReport>,
}

pub struct Analyzer {
    strategy: String,
    n_runs: usize,
    outcomes: Vec<Accumulator>,
    infected_curve: Vec<Accumulator>,
    mitigation_trend: Vec<Accumulator>,
}

impl Analyzer {
    pub fn new(strategy: String) -> Self {
        Self {
            strategy,
            n_runs: 0,
            outcomes: vec![Accumulator::new(); OUTCOMES.len()],
            infected_curve: Vec::new(),
            mitigation_trend: Vec::new(),
        }
    }

    pub fn update(&mut self, trajectory: &Trajectory) {
        self.n_runs += 1;
        for (acc, objective) in self.outcomes.iter_mut().zip(OUTCOMES) {
            acc.add(objective.measure(trajectory));
        }

        grow(&mut self.infected_curve, trajectory.snapshots.len());
        for (acc, snapshot) in self.infected_curve.iter_mut().zip(&trajectory.snapshots) {
            acc.add(snapshot.counts.infected as f64);
        }

        let trend = mitigation_trend(&trajectory.mitigations);
        grow(&mut self.mitigation_trend, trend.len());
        for (acc, totals) in self.mitigation_trend.iter_mut().zip(&trend) {
            acc.add(totals.total as f64);
        }
    }

    /// Add every trajectory stored in a file written by [`write_trajectories`].
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        let n_runs: usize = decode::from_read(&mut reader).context("failed to read run count")?;
        for i_run in 0..n_runs {
            let trajectory: Trajectory = decode::from_read(&mut reader)
                .with_context(|| format!("failed to read trajectory {i_run}"))?;
            self.update(&trajectory);
        }
        Ok(())
    }

    pub fn summary(&self) -> Summary {
        Summary {
            strategy: self.strategy.clone(),
            n_runs: self.n_runs,
            outcomes: OUTCOMES
                .iter()
                .copied()
                .zip(self.outcomes.iter().map(Accumulator::report))
                .collect(),
            infected_curve: self.infected_curve.iter().map(Accumulator::report).collect(),
            mitigation_trend: self
                .mitigation_trend
                .iter()
                .map(Accumulator::report)
                .collect(),
        }
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<Summary> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let summary = self.summary();
        encode::write(&mut writer, &summary).context("failed to serialize summary")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(summary)
    }
}

fn grow(accs: &mut Vec<Accumulator>, len: usize) {
    if accs.len() < len {
        accs.resize_with(len, Accumulator::new);
    }
}

/// Stream trajectories to a file, preceded by their count.
pub fn write_trajectories<P, I>(file: P, n_runs: usize, trajectories: I) -> Result<()>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = Result<Trajectory>>,
{
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);

    encode::write(&mut writer, &n_runs).context("failed to serialize run count")?;
    for (i_run, trajectory) in trajectories.into_iter().enumerate() {
        let trajectory = trajectory?;
        encode::write(&mut writer, &trajectory).context("failed to serialize trajectory")?;

        let progress = 100.0 * (i_run + 1) as f64 / n_runs as f64;
        log::info!("completed {progress:06.2}%");
    }

    writer.flush().context("failed to flush writer stream")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::MitigationRecord;
    use crate::state::{Snapshot, StatusCounts};
    use std::{env, fs};

    fn trajectory(infected: &[usize], mitigations: &[usize]) -> Trajectory {
        Trajectory {
            snapshots: infected
                .iter()
                .enumerate()
                .map(|(i, &infected)| Snapshot {
                    iteration: i + 1,
                    counts: StatusCounts {
                        susceptible: 10 - infected,
                        infected,
                        ..StatusCounts::default()
                    },
                })
                .collect(),
            mitigations: mitigations
                .iter()
                .map(|&total| MitigationRecord {
                    iteration: 7,
                    mitigated: Vec::new(),
                    total,
                    effective: total,
                    ineffective: 0,
                    rollover_in: 0,
                    rollover_out: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn summarises_stored_trajectories() {
        let dir = env::temp_dir().join(format!("mitigare-analysis-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("failed to create dir");
        let file = dir.join("trajectories.msgpack");

        let runs = vec![trajectory(&[1, 3, 2], &[2, 2]), trajectory(&[2, 5, 1], &[1, 3])];
        write_trajectories(&file, runs.len(), runs.into_iter().map(Ok))
            .expect("failed to write");

        let mut analyzer = Analyzer::new("random".to_string());
        analyzer.add_file(&file).expect("failed to read");
        let summary = analyzer
            .save_results(dir.join("summary.msgpack"))
            .expect("failed to save");

        assert_eq!(summary.n_runs, 2);
        let (objective, peak) = summary.outcomes[0];
        assert_eq!(objective, Objective::PeakInfected);
        assert_eq!(peak.mean, 4.0);
        assert_eq!(peak.min, 3.0);
        assert_eq!(summary.infected_curve.len(), 3);
        assert_eq!(summary.infected_curve[1].mean, 4.0);
        assert_eq!(summary.mitigation_trend[1].mean, 4.0);

        fs::remove_dir_all(&dir).ok();
    }
}
