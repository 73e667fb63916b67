//! Stateful metric accumulators for training and validation loops
//!
//! Every accumulator implements [`Metric`]: `update` folds one batch into the
//! internal state, `compute` reduces the state to a scalar without mutating it,
//! `reset` restores the empty state.
//!
//! - **Mean**: weighted mean of every value seen
//! - **MulticlassCalibrationError**: expected calibration error (ECE)
//! - **MulticlassAccuracy / MulticlassAgreement**: micro-averaged accuracy
//! - **Cat**: raw concatenation, not reducible to a scalar
//!
//! # Empty state
//!
//! `compute` on an accumulator that has seen no observations returns
//! `f64::NAN` for every metric in this module. No metric panics or errors on
//! an empty state.
//!
//! # Example
//!
//! ```
//! use mlexptools::metrics::{Mean, Metric};
//!
//! let mut loss = Mean::new();
//! loss.update_values(&[1.0, 2.0, 3.0]);
//! assert_eq!(loss.compute(), 2.0);
//!
//! loss.reset();
//! assert!(loss.compute().is_nan());
//! ```

use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{Error, Result};

mod accuracy;
mod calibration;
mod cat;
mod mean;


pub use accuracy::{MulticlassAccuracy, MulticlassAgreement};
pub use calibration::{CalibrationBin, MulticlassCalibrationError};
pub use cat::Cat;
pub use mean::{Mean, Weight};

/// Capability set shared by every accumulator
///
/// The trait is object safe so collections can hold heterogeneous metrics.
/// Typed, chainable update methods live on the concrete types; `update` here
/// is the positional entry point used by collections.
pub trait Metric: fmt::Debug + Send + Sync {
    /// Type name of the accumulator, used when displaying collections
    fn name(&self) -> &str;

    /// Fold one batch of positional inputs into the state
    fn update(&mut self, inputs: &[MetricInput]) -> Result<()>;

    /// Reduce the current state to a scalar; NaN when nothing was observed
    fn compute(&self) -> f64;

    /// Restore the empty state
    fn reset(&mut self);

    /// Whether `compute` yields a meaningful scalar
    ///
    /// Raw collectors such as [`Cat`] return `false` and are skipped by
    /// collection reductions.
    fn is_scalar_reducible(&self) -> bool {
        true
    }

    /// Independent copy of this accumulator and its state
    fn snapshot(&self) -> Box<dyn Metric>;
}

impl Clone for Box<dyn Metric> {
    fn clone(&self) -> Self {
        self.snapshot()
    }
}

/// Folding state from peer accumulators of the same type
///
/// Used to combine partial results computed on separate shards or workers.
/// `self` is updated in place; peers are only read.
pub trait MergeState: Metric + Sized {
    fn merge_state<'a, I>(&mut self, peers: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a Self>,
        Self: 'a;
}

// =============================================================================
// Inputs
// =============================================================================

/// A single positional input to [`Metric::update`]
#[derive(Debug, Clone, PartialEq)]
pub enum MetricInput {
    /// A single value (or a broadcast weight)
    Scalar(f64),
    /// A flat batch of values
    Vector(Array1<f64>),
    /// A `[N, C]` batch of per-class scores, probabilities or one-hot rows
    Matrix(Array2<f64>),
    /// Integer class labels
    Labels(Array1<usize>),
}

impl MetricInput {
    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            MetricInput::Scalar(_) => "scalar",
            MetricInput::Vector(_) => "vector",
            MetricInput::Matrix(_) => "matrix",
            MetricInput::Labels(_) => "labels",
        }
    }

    /// Shape of the input (`[]` for scalars)
    pub fn shape(&self) -> Vec<usize> {
        match self {
            MetricInput::Scalar(_) => Vec::new(),
            MetricInput::Vector(v) => vec![v.len()],
            MetricInput::Matrix(m) => m.shape().to_vec(),
            MetricInput::Labels(l) => vec![l.len()],
        }
    }

    /// All elements as floats, flattened in row-major order
    pub(crate) fn to_values(&self) -> Vec<f64> {
        match self {
            MetricInput::Scalar(x) => vec![*x],
            MetricInput::Vector(v) => v.to_vec(),
            MetricInput::Matrix(m) => m.iter().copied().collect(),
            MetricInput::Labels(l) => l.iter().map(|&c| c as f64).collect(),
        }
    }

    /// Class labels; float vectors must hold non-negative integers
    pub(crate) fn to_labels(&self) -> Result<Vec<usize>> {
        match self {
            MetricInput::Labels(l) => Ok(l.to_vec()),
            MetricInput::Scalar(x) => float_to_label(*x).map(|c| vec![c]),
            MetricInput::Vector(v) => v.iter().map(|&x| float_to_label(x)).collect(),
            MetricInput::Matrix(m) => Err(Error::InvalidInput(format!(
                "expected class labels, got a matrix of shape {:?}",
                m.shape()
            ))),
        }
    }
}

fn float_to_label(x: f64) -> Result<usize> {
    if x.is_finite() && x >= 0.0 && x.fract() == 0.0 {
        Ok(x as usize)
    } else {
        Err(Error::InvalidInput(format!(
            "class label must be a non-negative integer, got {x}"
        )))
    }
}

impl From<f64> for MetricInput {
    fn from(value: f64) -> Self {
        MetricInput::Scalar(value)
    }
}

impl From<Vec<f64>> for MetricInput {
    fn from(values: Vec<f64>) -> Self {
        MetricInput::Vector(Array1::from(values))
    }
}

impl From<Array1<f64>> for MetricInput {
    fn from(values: Array1<f64>) -> Self {
        MetricInput::Vector(values)
    }
}

impl From<Array2<f64>> for MetricInput {
    fn from(values: Array2<f64>) -> Self {
        MetricInput::Matrix(values)
    }
}

impl From<Vec<usize>> for MetricInput {
    fn from(labels: Vec<usize>) -> Self {
        MetricInput::Labels(Array1::from(labels))
    }
}

impl From<Array1<usize>> for MetricInput {
    fn from(labels: Array1<usize>) -> Self {
        MetricInput::Labels(labels)
    }
}

/// Positional arguments for one metric inside a collection update
///
/// A single value converts to one argument; a tuple unpacks into several.
///
/// ```
/// use ndarray::array;
/// use mlexptools::metrics::MetricArgs;
///
/// let single = MetricArgs::from(vec![0.5, 0.25]);
/// assert_eq!(single.len(), 1);
///
/// let pair = MetricArgs::from((array![[0.9, 0.1]], vec![0usize]));
/// assert_eq!(pair.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricArgs(Vec<MetricInput>);

impl MetricArgs {
    pub fn new(inputs: Vec<MetricInput>) -> Self {
        Self(inputs)
    }

    pub fn as_slice(&self) -> &[MetricInput] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

macro_rules! impl_single_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for MetricArgs {
                fn from(value: $ty) -> Self {
                    MetricArgs(vec![MetricInput::from(value)])
                }
            }
        )*
    };
}

impl_single_arg!(f64, Vec<f64>, Array1<f64>, Array2<f64>, Vec<usize>, Array1<usize>);

impl From<MetricInput> for MetricArgs {
    fn from(input: MetricInput) -> Self {
        MetricArgs(vec![input])
    }
}

impl From<Vec<MetricInput>> for MetricArgs {
    fn from(inputs: Vec<MetricInput>) -> Self {
        MetricArgs(inputs)
    }
}

impl<A, B> From<(A, B)> for MetricArgs
where
    A: Into<MetricInput>,
    B: Into<MetricInput>,
{
    fn from((a, b): (A, B)) -> Self {
        MetricArgs(vec![a.into(), b.into()])
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Reject calls with an unexpected number of positional inputs
pub(crate) fn check_arity(
    metric: &str,
    inputs: &[MetricInput],
    min: usize,
    max: usize,
) -> Result<()> {
    if inputs.len() < min || inputs.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(Error::InvalidInput(format!(
            "{metric} expects {expected} inputs, got {}",
            inputs.len()
        )));
    }
    Ok(())
}

/// Borrow a `[N, C]` matrix input or fail naming the metric
pub(crate) fn expect_matrix<'a>(metric: &str, input: &'a MetricInput) -> Result<&'a Array2<f64>> {
    match input {
        MetricInput::Matrix(m) => Ok(m),
        other => Err(Error::InvalidInput(format!(
            "{metric} expects a [N, C] matrix, got {} of shape {:?}",
            other.kind(),
            other.shape()
        ))),
    }
}

/// Reject score matrices with no classes or with non-finite entries
pub(crate) fn check_scores(metric: &str, scores: ArrayView2<'_, f64>) -> Result<()> {
    if scores.ncols() == 0 {
        return Err(Error::InvalidInput(format!(
            "{metric} expects at least one class column, got shape {:?}",
            scores.shape()
        )));
    }
    if let Some(bad) = scores.iter().find(|x| !x.is_finite()) {
        return Err(Error::InvalidInput(format!(
            "{metric} scores must be finite, found {bad}"
        )));
    }
    Ok(())
}

/// Index and value of the first maximum of a row
pub(crate) fn argmax(row: ArrayView1<'_, f64>) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, &x) in row.iter().enumerate() {
        if x > best.1 {
            best = (i, x);
        }
    }
    best
}

pub(crate) fn check_rows(rows: usize, targets: usize) -> Result<()> {
    if rows != targets {
        return Err(Error::ShapeMismatch {
            expected: vec![rows],
            got: vec![targets],
        });
    }
    Ok(())
}
