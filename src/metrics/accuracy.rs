//! Micro-averaged multiclass accuracy and agreement

use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{argmax, check_arity, check_rows, check_scores, expect_matrix, MergeState, Metric, MetricInput};
use crate::error::{Error, Result};

/// Fraction of samples whose predicted class equals the target class
///
/// Predictions are either `[N, C]` scores (the argmax is taken per row) or
/// `N` predicted labels.
///
/// # Example
///
/// ```
/// use ndarray::array;
/// use mlexptools::metrics::{Metric, MulticlassAccuracy};
///
/// let mut acc = MulticlassAccuracy::new();
/// acc.update_scores(array![[0.1, 0.9], [0.8, 0.2]].view(), &[1, 1]).unwrap();
/// assert_eq!(acc.compute(), 0.5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MulticlassAccuracy {
    num_correct: u64,
    num_total: u64,
}

impl MulticlassAccuracy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score rows against class labels
    pub fn update_scores(&mut self, scores: ArrayView2<'_, f64>, targets: &[usize]) -> Result<&mut Self> {
        check_rows(scores.nrows(), targets.len())?;
        check_scores(self.name(), scores)?;
        let predicted: Vec<usize> = scores.axis_iter(Axis(0)).map(|row| argmax(row).0).collect();
        self.update_labels(&predicted, targets)
    }

    /// Predicted labels against class labels
    pub fn update_labels(&mut self, predicted: &[usize], targets: &[usize]) -> Result<&mut Self> {
        check_rows(predicted.len(), targets.len())?;
        self.num_correct += predicted.iter().zip(targets).filter(|(p, t)| p == t).count() as u64;
        self.num_total += targets.len() as u64;
        Ok(self)
    }

    pub fn num_correct(&self) -> u64 {
        self.num_correct
    }

    pub fn num_total(&self) -> u64 {
        self.num_total
    }
}

impl Metric for MulticlassAccuracy {
    fn name(&self) -> &str {
        "MulticlassAccuracy"
    }

    fn update(&mut self, inputs: &[MetricInput]) -> Result<()> {
        check_arity(self.name(), inputs, 2, 2)?;
        let targets = inputs[1].to_labels()?;
        match &inputs[0] {
            MetricInput::Matrix(scores) => self.update_scores(scores.view(), &targets)?,
            labels => self.update_labels(&labels.to_labels()?, &targets)?,
        };
        Ok(())
    }

    fn compute(&self) -> f64 {
        if self.num_total == 0 {
            return f64::NAN;
        }
        self.num_correct as f64 / self.num_total as f64
    }

    fn reset(&mut self) {
        self.num_correct = 0;
        self.num_total = 0;
    }

    fn snapshot(&self) -> Box<dyn Metric> {
        Box::new(self.clone())
    }
}

impl MergeState for MulticlassAccuracy {
    fn merge_state<'a, I>(&mut self, peers: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        for peer in peers {
            self.num_correct += peer.num_correct;
            self.num_total += peer.num_total;
        }
        self
    }
}

/// Agreement between two classifiers' top classes
///
/// Accuracy where the targets are themselves `[N, C]` score or one-hot rows;
/// the reference class is the argmax of each target row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MulticlassAgreement {
    inner: MulticlassAccuracy,
}

impl MulticlassAgreement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_batch(
        &mut self,
        scores: ArrayView2<'_, f64>,
        reference: ArrayView2<'_, f64>,
    ) -> Result<&mut Self> {
        if scores.dim() != reference.dim() {
            return Err(Error::ShapeMismatch {
                expected: scores.shape().to_vec(),
                got: reference.shape().to_vec(),
            });
        }
        check_scores(self.name(), reference)?;
        let targets: Vec<usize> = reference.axis_iter(Axis(0)).map(|row| argmax(row).0).collect();
        self.inner.update_scores(scores, &targets)?;
        Ok(self)
    }
}

impl Metric for MulticlassAgreement {
    fn name(&self) -> &str {
        "MulticlassAgreement"
    }

    fn update(&mut self, inputs: &[MetricInput]) -> Result<()> {
        check_arity(self.name(), inputs, 2, 2)?;
        let scores = expect_matrix(self.name(), &inputs[0])?;
        let reference = expect_matrix(self.name(), &inputs[1])?;
        self.update_batch(scores.view(), reference.view())?;
        Ok(())
    }

    fn compute(&self) -> f64 {
        self.inner.compute()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn snapshot(&self) -> Box<dyn Metric> {
        Box::new(self.clone())
    }
}

impl MergeState for MulticlassAgreement {
    fn merge_state<'a, I>(&mut self, peers: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        self.inner.merge_state(peers.into_iter().map(|peer| &peer.inner));
        self
    }
}
