//! Multiclass expected calibration error (ECE)
//!
//! Confidences are binned into `n_bins` equal-width, right-inclusive bins
//! `(k/n, (k+1)/n]` over `[0, 1]`. A confidence of exactly `0.0` falls into the
//! first bin and `1.0` into the last one.
//!
//! ECE = Σ_b |accuracy_b − confidence_b| · count_b / total

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{argmax, check_arity, check_rows, check_scores, expect_matrix, MergeState, Metric, MetricInput};
use crate::error::{Error, Result};

/// Default number of confidence bins
pub const DEFAULT_BINS: usize = 15;

/// Statistics of one confidence bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    /// Exclusive lower edge (inclusive for the first bin)
    pub lower: f64,
    /// Inclusive upper edge
    pub upper: f64,
    /// Number of observations in the bin
    pub count: usize,
    /// Mean confidence; 0 for an empty bin
    pub confidence: f64,
    /// Empirical accuracy; 0 for an empty bin
    pub accuracy: f64,
}

impl CalibrationBin {
    /// |accuracy − confidence|
    pub fn gap(&self) -> f64 {
        (self.accuracy - self.confidence).abs()
    }
}

/// Expected calibration error of a multiclass classifier
///
/// Each update records, per sample, the top-class confidence and whether the
/// top class matched the target. The buffers grow with every observation until
/// [`Metric::reset`]; memory is O(observations since the last reset).
///
/// # Example
///
/// ```
/// use ndarray::array;
/// use mlexptools::metrics::{Metric, MulticlassCalibrationError};
///
/// let mut ece = MulticlassCalibrationError::new();
/// // Probabilities are used as-is
/// ece.update_batch(array![[0.9, 0.1], [0.2, 0.8]].view(), &[0, 0]).unwrap();
/// let value = ece.compute();
/// assert!((value - 0.45).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulticlassCalibrationError {
    n_bins: usize,
    confidences: Vec<f64>,
    accuracies: Vec<f64>,
}

impl Default for MulticlassCalibrationError {
    fn default() -> Self {
        Self::new()
    }
}

impl MulticlassCalibrationError {
    /// Create with the default of 15 bins
    pub fn new() -> Self {
        Self {
            n_bins: DEFAULT_BINS,
            confidences: Vec::new(),
            accuracies: Vec::new(),
        }
    }

    /// Create with a custom number of bins (must be positive)
    pub fn with_bins(n_bins: usize) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::InvalidParameter(
                "n_bins must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            n_bins,
            ..Self::new()
        })
    }

    /// Record one batch of `[N, C]` predictions against `N` class labels
    ///
    /// Unless every value in the batch already lies in `[0, 1]`, each row is
    /// softmax-normalised first. A single out-of-range value renormalises the
    /// whole batch.
    pub fn update_batch(&mut self, predictions: ArrayView2<'_, f64>, targets: &[usize]) -> Result<&mut Self> {
        check_rows(predictions.nrows(), targets.len())?;
        check_scores(self.name(), predictions)?;

        let is_probability = predictions.iter().all(|&p| (0.0..=1.0).contains(&p));
        let normalised;
        let probs = if is_probability {
            predictions.reborrow()
        } else {
            normalised = softmax_rows(predictions);
            normalised.view()
        };

        self.confidences.reserve(targets.len());
        self.accuracies.reserve(targets.len());
        for (row, &target) in probs.axis_iter(Axis(0)).zip(targets) {
            let (predicted, confidence) = argmax(row);
            self.confidences.push(confidence);
            self.accuracies.push(if predicted == target { 1.0 } else { 0.0 });
        }
        Ok(self)
    }

    /// Per-bin statistics, including empty bins
    pub fn bins(&self) -> Vec<CalibrationBin> {
        let n = self.n_bins;
        let boundaries: Vec<f64> = (0..=n).map(|k| k as f64 / n as f64).collect();

        let mut counts = vec![0usize; n];
        let mut conf_sums = vec![0.0; n];
        let mut acc_sums = vec![0.0; n];
        for (&confidence, &accuracy) in self.confidences.iter().zip(&self.accuracies) {
            let idx = bin_index(confidence, &boundaries);
            counts[idx] += 1;
            conf_sums[idx] += confidence;
            acc_sums[idx] += accuracy;
        }

        (0..n)
            .map(|k| {
                let count = counts[k];
                let (confidence, accuracy) = if count == 0 {
                    (0.0, 0.0)
                } else {
                    (conf_sums[k] / count as f64, acc_sums[k] / count as f64)
                };
                CalibrationBin {
                    lower: boundaries[k],
                    upper: boundaries[k + 1],
                    count,
                    confidence,
                    accuracy,
                }
            })
            .collect()
    }

    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Recorded top-class confidences
    pub fn confidences(&self) -> &[f64] {
        &self.confidences
    }

    /// Recorded correctness indicators (1.0 correct, 0.0 wrong)
    pub fn accuracies(&self) -> &[f64] {
        &self.accuracies
    }

    /// Number of recorded observations
    pub fn len(&self) -> usize {
        self.confidences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confidences.is_empty()
    }
}

/// Bin of a confidence under right-inclusive edges
///
/// Counts the interior edges strictly below the confidence, so an exact edge
/// value lands in the lower bin and the index never exceeds `n_bins - 1`.
fn bin_index(confidence: f64, boundaries: &[f64]) -> usize {
    let interior = &boundaries[1..boundaries.len() - 1];
    interior.partition_point(|&edge| edge < confidence)
}

/// Row-wise softmax with max subtraction
fn softmax_rows(logits: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut out = logits.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }
    out
}

impl Metric for MulticlassCalibrationError {
    fn name(&self) -> &str {
        "MulticlassCalibrationError"
    }

    fn update(&mut self, inputs: &[MetricInput]) -> Result<()> {
        check_arity(self.name(), inputs, 2, 2)?;
        let predictions = expect_matrix(self.name(), &inputs[0])?;
        let targets = inputs[1].to_labels()?;
        self.update_batch(predictions.view(), &targets)?;
        Ok(())
    }

    fn compute(&self) -> f64 {
        if self.confidences.is_empty() {
            return f64::NAN;
        }
        let total = self.confidences.len() as f64;
        self.bins()
            .iter()
            .map(|bin| bin.gap() * bin.count as f64 / total)
            .sum()
    }

    fn reset(&mut self) {
        self.confidences.clear();
        self.accuracies.clear();
    }

    fn snapshot(&self) -> Box<dyn Metric> {
        Box::new(self.clone())
    }
}

impl MergeState for MulticlassCalibrationError {
    fn merge_state<'a, I>(&mut self, peers: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a,
    {
        for peer in peers {
            self.confidences.extend_from_slice(&peer.confidences);
            self.accuracies.extend_from_slice(&peer.accuracies);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_default_bins() {
        let ece = MulticlassCalibrationError::default();
        assert_eq!(ece.n_bins(), 15);
        assert!(ece.is_empty());
    }

    #[test]
    fn test_zero_bins_rejected() {
        let result = MulticlassCalibrationError::with_bins(0);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_probabilities_not_renormalised() {
        let mut ece = MulticlassCalibrationError::new();
        ece.update_batch(array![[0.7, 0.3]].view(), &[0]).unwrap();
        assert_abs_diff_eq!(ece.confidences()[0], 0.7, epsilon = 1e-15);
    }

    #[test]
    fn test_logits_are_softmaxed() {
        let mut ece = MulticlassCalibrationError::new();
        ece.update_batch(array![[2.0, 0.0]].view(), &[0]).unwrap();

        let expected = 2.0f64.exp() / (2.0f64.exp() + 1.0);
        assert_abs_diff_eq!(ece.confidences()[0], expected, epsilon = 1e-12);
        assert_eq!(ece.accuracies(), &[1.0]);
    }

    #[test]
    fn test_single_out_of_range_row_renormalises_whole_batch() {
        let mut ece = MulticlassCalibrationError::new();
        ece.update_batch(array![[0.7, 0.3], [2.0, 0.0]].view(), &[0, 1])
            .unwrap();

        // softmax([0.7, 0.3]) = 1 / (1 + e^-0.4)
        let first = 1.0 / (1.0 + (-0.4f64).exp());
        assert_abs_diff_eq!(ece.confidences()[0], first, epsilon = 1e-12);
        assert_eq!(ece.accuracies(), &[1.0, 0.0]);
    }

    #[test]
    fn test_argmax_ties_take_first_class() {
        let mut ece = MulticlassCalibrationError::new();
        ece.update_batch(array![[0.5, 0.5]].view(), &[0]).unwrap();
        assert_eq!(ece.accuracies(), &[1.0]);
    }

    #[test]
    fn test_perfectly_calibrated_is_zero() {
        let mut ece = MulticlassCalibrationError::with_bins(10).unwrap();
        let preds = Array2::from_shape_fn((100, 2), |(_, c)| if c == 0 { 0.8 } else { 0.2 });
        let targets: Vec<usize> = (0..100).map(|i| if i < 80 { 0 } else { 1 }).collect();
        ece.update_batch(preds.view(), &targets).unwrap();

        assert_abs_diff_eq!(ece.compute(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_overconfident() {
        let mut ece = MulticlassCalibrationError::new();
        let preds = Array2::from_shape_fn((100, 2), |(_, c)| if c == 0 { 0.95 } else { 0.05 });
        let targets: Vec<usize> = (0..100).map(|i| i % 2).collect();
        ece.update_batch(preds.view(), &targets).unwrap();

        assert_abs_diff_eq!(ece.compute(), 0.45, epsilon = 1e-9);
    }

    #[test]
    fn test_two_bins_weighted() {
        let mut ece = MulticlassCalibrationError::with_bins(10).unwrap();
        // 0.9 confident and right, 0.6 confident and wrong
        ece.update_batch(array![[0.9, 0.1], [0.6, 0.4]].view(), &[0, 1])
            .unwrap();
        // 0.5 * |1 - 0.9| + 0.5 * |0 - 0.6|
        assert_abs_diff_eq!(ece.compute(), 0.35, epsilon = 1e-12);
    }

    #[test]
    fn test_confidence_one_lands_in_last_bin() {
        let mut ece = MulticlassCalibrationError::with_bins(5).unwrap();
        ece.update_batch(array![[1.0, 0.0]].view(), &[0]).unwrap();

        let bins = ece.bins();
        assert_eq!(bins.len(), 5);
        assert_eq!(bins[4].count, 1);
        assert_eq!(ece.compute(), 0.0);
    }

    #[test]
    fn test_edge_confidence_lands_in_lower_bin() {
        let mut ece = MulticlassCalibrationError::with_bins(5).unwrap();
        ece.update_batch(array![[0.2, 0.2, 0.2, 0.2, 0.2]].view(), &[0])
            .unwrap();

        let bins = ece.bins();
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[1].count, 0);
    }

    #[test]
    fn test_zero_confidence_lands_in_first_bin() {
        assert_eq!(bin_index(0.0, &[0.0, 0.5, 1.0]), 0);
        assert_eq!(bin_index(0.5, &[0.0, 0.5, 1.0]), 0);
        assert_eq!(bin_index(0.51, &[0.0, 0.5, 1.0]), 1);
        assert_eq!(bin_index(1.0, &[0.0, 0.5, 1.0]), 1);
    }

    #[test]
    fn test_empty_bins_contribute_zero() {
        let mut ece = MulticlassCalibrationError::new();
        ece.update_batch(array![[0.55, 0.45]].view(), &[0]).unwrap();

        let bins = ece.bins();
        let empty: Vec<_> = bins.iter().filter(|b| b.count == 0).collect();
        assert_eq!(empty.len(), 14);
        assert!(empty.iter().all(|b| b.confidence == 0.0 && b.accuracy == 0.0));
        assert_abs_diff_eq!(ece.compute(), 0.45, epsilon = 1e-12);
    }

    #[test]
    fn test_reset_then_compute_is_nan() {
        let mut ece = MulticlassCalibrationError::new();
        ece.update_batch(array![[0.9, 0.1]].view(), &[0]).unwrap();
        ece.reset();

        assert!(ece.is_empty());
        assert!(ece.compute().is_nan());
    }

    #[test]
    fn test_row_count_mismatch() {
        let mut ece = MulticlassCalibrationError::new();
        let result = ece.update_batch(array![[0.9, 0.1], [0.3, 0.7]].view(), &[0]);

        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        assert!(ece.is_empty());
    }

    #[test]
    fn test_buffers_stay_aligned() {
        let mut ece = MulticlassCalibrationError::new();
        ece.update_batch(array![[0.9, 0.1], [0.3, 0.7]].view(), &[0, 0])
            .unwrap();
        ece.update_batch(array![[3.0, -1.0, 0.5]].view(), &[2]).unwrap();

        assert_eq!(ece.len(), 3);
        assert_eq!(ece.confidences().len(), ece.accuracies().len());
    }

    #[test]
    fn test_positional_update() {
        let mut ece = MulticlassCalibrationError::new();
        Metric::update(
            &mut ece,
            &[
                MetricInput::Matrix(array![[0.9, 0.1]]),
                MetricInput::Vector(array![0.0]),
            ],
        )
        .unwrap();
        assert_eq!(ece.accuracies(), &[1.0]);
    }

    #[test]
    fn test_positional_update_rejects_vector_predictions() {
        let mut ece = MulticlassCalibrationError::new();
        let result = Metric::update(
            &mut ece,
            &[
                MetricInput::Vector(array![0.9, 0.1]),
                MetricInput::Labels(array![0]),
            ],
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_positional_update_rejects_fractional_labels() {
        let mut ece = MulticlassCalibrationError::new();
        let result = Metric::update(
            &mut ece,
            &[
                MetricInput::Matrix(array![[0.9, 0.1]]),
                MetricInput::Vector(array![0.5]),
            ],
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_merge_state_concatenates() {
        let mut a = MulticlassCalibrationError::new();
        a.update_batch(array![[0.9, 0.1]].view(), &[0]).unwrap();
        let mut b = MulticlassCalibrationError::new();
        b.update_batch(array![[0.6, 0.4], [0.2, 0.8]].view(), &[1, 1])
            .unwrap();

        a.merge_state([&b]);

        assert_eq!(a.len(), 3);
        assert_eq!(a.accuracies(), &[1.0, 0.0, 1.0]);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_zero_class_batch_rejected() {
        let mut ece = MulticlassCalibrationError::new();
        let result = ece.update_batch(Array2::<f64>::zeros((2, 0)).view(), &[0, 0]);

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(ece.is_empty());
        assert!(ece.compute().is_nan());
    }

    #[test]
    fn test_non_finite_scores_rejected_without_state_change() {
        let mut ece = MulticlassCalibrationError::new();
        for bad in [
            array![[f64::NAN, 0.5]],
            array![[f64::INFINITY, 0.0]],
            array![[f64::NEG_INFINITY, 1.0]],
        ] {
            let result = ece.update_batch(bad.view(), &[0]);
            assert!(matches!(result, Err(Error::InvalidInput(_))));
        }
        assert!(ece.is_empty());

        ece.update_batch(array![[2.0, -1.0], [0.5, 3.0]].view(), &[0, 0])
            .unwrap();
        let value = ece.compute();
        assert!((0.0..=1.0).contains(&value));
        assert!(ece.confidences().iter().all(|c| (0.0..=1.0).contains(c)));
    }
}
