//! Named reference strategies to compare evolved programs against.

use crate::features::{Feature, FeatureExtractor};
use crate::program::{CmpOp, Expr};
use anyhow::{Context, Result, bail};
use std::{fmt, str::FromStr};

/// Strategy selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StrategyName {
    /// Never mitigate.
    None,
    /// Mitigate every candidate; candidates arrive shuffled.
    Random,
    /// Mitigate travelers.
    Traveler,
    /// Mitigate nodes with degree above a threshold.
    Degree(u32),
    /// Fittest program of the latest evolution run.
    Best,
}

impl StrategyName {
    /// Program of a fixed baseline over the configured features.
    ///
    /// Fails for [`StrategyName::Best`] and when a required feature is not configured.
    pub fn baseline_expr(self, extractor: &FeatureExtractor) -> Result<Expr> {
        let arg = |feature: Feature| -> Result<Box<Expr>> {
            let index = extractor
                .index_of(feature)
                .with_context(|| format!("strategy {self} needs the {feature:?} feature"))?;
            Ok(Box::new(Expr::Arg {
                index,
                ty: feature.ty(),
            }))
        };
        let expr = match self {
            StrategyName::None => Expr::Bool(false),
            StrategyName::Random => Expr::Bool(true),
            StrategyName::Traveler => *arg(Feature::Traveler)?,
            StrategyName::Degree(threshold) => Expr::Compare(
                CmpOp::Gt,
                arg(Feature::Degree)?,
                Box::new(Expr::Float(f64::from(threshold))),
            ),
            StrategyName::Best => bail!("the best strategy is not a fixed baseline"),
        };
        Ok(expr)
    }

    /// Name usable as a path component.
    pub fn slug(self) -> String {
        match self {
            StrategyName::Degree(threshold) => format!("degree-{threshold}"),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyName::None => write!(f, "none"),
            StrategyName::Random => write!(f, "random"),
            StrategyName::Traveler => write!(f, "traveler"),
            StrategyName::Degree(threshold) => write!(f, "degree:{threshold}"),
            StrategyName::Best => write!(f, "best"),
        }
    }
}

impl FromStr for StrategyName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = match s {
            "none" => StrategyName::None,
            "random" => StrategyName::Random,
            "traveler" => StrategyName::Traveler,
            "best" => StrategyName::Best,
            _ => {
                let Some(threshold) = s.strip_prefix("degree:") else {
                    bail!("unknown strategy {s:?}");
                };
                let threshold = threshold
                    .parse()
                    .with_context(|| format!("invalid degree threshold in {s:?}"))?;
                StrategyName::Degree(threshold)
            }
        };
        Ok(name)
    }
}
