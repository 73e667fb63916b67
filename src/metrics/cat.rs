//! Raw concatenation of observed values

use serde::{Deserialize, Serialize};

use super::{check_arity, MergeState, Metric, MetricInput};
use crate::error::Result;

/// Collects every observed value in arrival order
///
/// Not reducible to a scalar: `compute` always returns NaN and collections
/// leave `Cat` fields out of their reductions. Read the data with
/// [`Cat::values`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cat {
    values: Vec<f64>,
}

impl Cat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_values(&mut self, values: &[f64]) -> &mut Self {
        self.values.extend_from_slice(values);
        self
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Metric for Cat {
    fn name(&self) -> &str {
        "Cat"
    }

    fn update(&mut self, inputs: &[MetricInput]) -> Result<()> {
        check_arity(self.name(), inputs, 1, 1)?;
        self.update_values(&inputs[0].to_values());
        Ok(())
    }

    fn compute(&self) -> f64 {
        f64::NAN
    }

    fn reset(&mut self) {
        self.values.clear();
    }

    fn is_scalar_reducible(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Box<dyn Metric> {
        Box::new(self.clone())
    }
}

impl MergeState for Cat {
    fn merge_state<'a, I>(&mut self, peers: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        for peer in peers {
            self.values.extend_from_slice(&peer.values);
        }
        self
    }
}
