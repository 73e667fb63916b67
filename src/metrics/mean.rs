//! Weighted mean accumulator

use serde::{Deserialize, Serialize};

use super::{check_arity, MergeState, Metric, MetricInput};
use crate::error::{Error, Result};

/// Weight applied to a batch of values
#[derive(Debug, Clone, PartialEq)]
pub enum Weight {
    /// One weight broadcast to every value
    Scalar(f64),
    /// One weight per value; length must match the values
    PerElement(Vec<f64>),
}

impl Default for Weight {
    fn default() -> Self {
        Weight::Scalar(1.0)
    }
}

impl From<f64> for Weight {
    fn from(weight: f64) -> Self {
        Weight::Scalar(weight)
    }
}

impl From<Vec<f64>> for Weight {
    fn from(weights: Vec<f64>) -> Self {
        Weight::PerElement(weights)
    }
}

/// Weighted mean of every value seen since the last reset
///
/// `compute() = Σ wᵢ·vᵢ / Σ wᵢ`. Without weights this is the plain mean.
///
/// # Example
///
/// ```
/// use mlexptools::metrics::{Mean, Metric};
///
/// let mut mean = Mean::new();
/// mean.update_weighted(&[10.0], 0.0).unwrap();
/// mean.update_weighted(&[5.0], 1.0).unwrap();
/// assert_eq!(mean.compute(), 5.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mean {
    weighted_sum: f64,
    total_weight: f64,
}

impl Mean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate values with unit weight
    pub fn update_values(&mut self, values: &[f64]) -> &mut Self {
        self.weighted_sum += values.iter().sum::<f64>();
        self.total_weight += values.len() as f64;
        self
    }

    /// Accumulate values with a scalar or per-element weight
    pub fn update_weighted(&mut self, values: &[f64], weight: impl Into<Weight>) -> Result<&mut Self> {
        match weight.into() {
            Weight::Scalar(w) => {
                self.weighted_sum += w * values.iter().sum::<f64>();
                self.total_weight += w * values.len() as f64;
            }
            Weight::PerElement(weights) => {
                if weights.len() != values.len() {
                    return Err(Error::ShapeMismatch {
                        expected: vec![values.len()],
                        got: vec![weights.len()],
                    });
                }
                self.weighted_sum += values.iter().zip(&weights).map(|(v, w)| v * w).sum::<f64>();
                self.total_weight += weights.iter().sum::<f64>();
            }
        }
        Ok(self)
    }

    pub fn weighted_sum(&self) -> f64 {
        self.weighted_sum
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }
}

impl Metric for Mean {
    fn name(&self) -> &str {
        "Mean"
    }

    fn update(&mut self, inputs: &[MetricInput]) -> Result<()> {
        check_arity(self.name(), inputs, 1, 2)?;
        let values = inputs[0].to_values();
        let weight = match inputs.get(1) {
            None => Weight::default(),
            Some(MetricInput::Scalar(w)) => Weight::Scalar(*w),
            Some(MetricInput::Vector(w)) => Weight::PerElement(w.to_vec()),
            Some(other) => {
                return Err(Error::InvalidInput(format!(
                    "Mean weight must be a scalar or a vector, got {}",
                    other.kind()
                )))
            }
        };
        self.update_weighted(&values, weight)?;
        Ok(())
    }

    fn compute(&self) -> f64 {
        if self.total_weight == 0.0 {
            return f64::NAN;
        }
        self.weighted_sum / self.total_weight
    }

    fn reset(&mut self) {
        self.weighted_sum = 0.0;
        self.total_weight = 0.0;
    }

    fn snapshot(&self) -> Box<dyn Metric> {
        Box::new(self.clone())
    }
}

impl MergeState for Mean {
    fn merge_state<'a, I>(&mut self, peers: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        for peer in peers {
            self.weighted_sum += peer.weighted_sum;
            self.total_weight += peer.total_weight;
        }
        self
    }
}
