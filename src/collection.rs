//! Fixed-schema collections of named metrics
//!
//! A collection owns a set of named accumulators declared up front and drives
//! them in unison: one `update` call feeds a batch to several metrics, one
//! `compute` call yields an ordered `name → value` mapping ready for
//! [`ExperimentWriter::log_metrics`](crate::writer::ExperimentWriter::log_metrics).
//!
//! Declare a collection with [`metric_collection!`](crate::metric_collection).
//! Every field type must implement [`Metric`]; anything else is rejected at
//! compile time.
//!
//! ```
//! use ndarray::array;
//! use mlexptools::metric_collection;
//! use mlexptools::collection::MetricCollection;
//! use mlexptools::metrics::{Mean, MetricArgs, MulticlassAccuracy};
//!
//! metric_collection! {
//!     #[derive(Default)]
//!     pub struct EpochMetrics {
//!         pub acc: MulticlassAccuracy,
//!         pub loss: Mean,
//!     }
//! }
//!
//! let mut metrics = EpochMetrics::default();
//! metrics
//!     .update([
//!         ("acc", MetricArgs::from((array![[0.2, 0.8], [0.9, 0.1]], vec![1usize, 1]))),
//!         ("loss", MetricArgs::from(vec![0.4, 0.6])),
//!     ])
//!     .unwrap();
//!
//! let values = metrics.compute_with_prefix("train");
//! assert_eq!(values.get("train_acc"), Some(0.5));
//! assert_eq!(values.get("train_loss"), Some(0.5));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::{Metric, MetricArgs};

// =============================================================================
// ComputedMetrics
// =============================================================================

/// Ordered `name → value` mapping produced by a collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputedMetrics {
    entries: Vec<(String, f64)>,
}

impl ComputedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing an existing key in place
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rename every key to `{prefix}_{key}`; an empty prefix changes nothing
    pub fn with_prefix(self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self;
        }
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|(k, v)| (format!("{prefix}_{k}"), v))
                .collect(),
        }
    }
}

impl FromIterator<(String, f64)> for ComputedMetrics {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

impl IntoIterator for ComputedMetrics {
    type Item = (String, f64);
    type IntoIter = std::vec::IntoIter<(String, f64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ComputedMetrics {
    type Item = (&'a str, f64);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, f64)>,
        fn(&'a (String, f64)) -> (&'a str, f64),
    >;

    fn into_iter(self) -> Self::IntoIter {
        fn entry(e: &(String, f64)) -> (&str, f64) {
            (e.0.as_str(), e.1)
        }
        self.entries.iter().map(entry as fn(&'a (String, f64)) -> (&'a str, f64))
    }
}

// =============================================================================
// MetricCollection
// =============================================================================

/// Operations shared by every metric collection
///
/// Implementors only list their fields; update, reduction, prefixing and reset
/// are provided. `Clone` must produce a deep, independent copy.
pub trait MetricCollection: Clone + fmt::Debug {
    /// Fields in declaration order
    fn metrics(&self) -> Vec<(&str, &dyn Metric)>;

    /// Mutable fields in declaration order
    fn metrics_mut(&mut self) -> Vec<(&str, &mut dyn Metric)>;

    fn metric(&self, name: &str) -> Option<&dyn Metric> {
        self.metrics()
            .into_iter()
            .find(|(field, _)| *field == name)
            .map(|(_, metric)| metric)
    }

    fn metric_mut(&mut self, name: &str) -> Option<&mut dyn Metric> {
        self.metrics_mut()
            .into_iter()
            .find(|(field, _)| *field == name)
            .map(|(_, metric)| metric)
    }

    fn field_names(&self) -> Vec<&str> {
        self.metrics().into_iter().map(|(field, _)| field).collect()
    }

    /// Feed one batch to the named metrics
    ///
    /// Every name is checked before any metric is touched, so an unknown name
    /// fails with [`Error::UnknownMetric`] and leaves the collection unchanged.
    /// An error raised by a metric's own update stops the call; metrics
    /// earlier in the batch keep their update.
    fn update<'a, I, A>(&mut self, batch: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, A)>,
        A: Into<MetricArgs>,
    {
        let batch: Vec<(&str, MetricArgs)> =
            batch.into_iter().map(|(name, args)| (name, args.into())).collect();

        let fields = self.field_names();
        if let Some((unknown, _)) = batch.iter().find(|(name, _)| !fields.contains(name)) {
            return Err(Error::UnknownMetric(unknown.to_string()));
        }

        for (name, args) in &batch {
            let metric = self
                .metric_mut(name)
                .ok_or_else(|| Error::UnknownMetric(name.to_string()))?;
            metric.update(args.as_slice())?;
        }
        Ok(())
    }

    /// Reduce every scalar metric, in declaration order
    ///
    /// Raw collectors (`is_scalar_reducible() == false`) are skipped.
    fn compute(&self) -> ComputedMetrics {
        self.metrics()
            .into_iter()
            .filter(|(_, metric)| metric.is_scalar_reducible())
            .map(|(field, metric)| (field.to_string(), metric.compute()))
            .collect()
    }

    /// [`compute`](Self::compute) with keys renamed to `{prefix}_{key}`
    fn compute_with_prefix(&self, prefix: &str) -> ComputedMetrics {
        self.compute().with_prefix(prefix)
    }

    /// Reset every metric in declaration order
    fn reset(&mut self) {
        for (_, metric) in self.metrics_mut() {
            metric.reset();
        }
    }
}

/// Render a collection as `Name(\n  (field): Type\n)`
pub fn fmt_collection(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    metrics: &[(&str, &dyn Metric)],
) -> fmt::Result {
    writeln!(f, "{name}(")?;
    for (field, metric) in metrics {
        writeln!(f, "  ({field}): {}", metric.name())?;
    }
    write!(f, ")")
}

/// Declare a struct of named metrics implementing [`MetricCollection`]
///
/// The struct derives `Debug` and `Clone`; extra attributes are forwarded.
/// Each field must implement [`Metric`](crate::metrics::Metric); any other
/// field type is rejected at compile time:
///
/// ```compile_fail
/// use mlexptools::metrics::Mean;
///
/// mlexptools::metric_collection! {
///     struct Broken {
///         loss: Mean,
///         name: String,
///     }
/// }
/// ```
#[macro_export]
macro_rules! metric_collection {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::collection::MetricCollection for $name {
            fn metrics(&self) -> ::std::vec::Vec<(&str, &dyn $crate::metrics::Metric)> {
                ::std::vec![
                    $( (::std::stringify!($field), &self.$field as &dyn $crate::metrics::Metric) ),*
                ]
            }

            fn metrics_mut(&mut self) -> ::std::vec::Vec<(&str, &mut dyn $crate::metrics::Metric)> {
                ::std::vec![
                    $( (::std::stringify!($field), &mut self.$field as &mut dyn $crate::metrics::Metric) ),*
                ]
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                $crate::collection::fmt_collection(
                    f,
                    ::std::stringify!($name),
                    &$crate::collection::MetricCollection::metrics(self),
                )
            }
        }
    };
}

// =============================================================================
// MetricSet
// =============================================================================

/// Collection whose fields are chosen at runtime
///
/// The schema is fixed once built: names must be non-empty and unique,
/// checked as each field is added.
///
/// ```
/// use mlexptools::collection::{MetricCollection, MetricSet};
/// use mlexptools::metrics::{Cat, Mean};
///
/// let set = MetricSet::new()
///     .with("loss", Mean::new())
///     .and_then(|s| s.with("raw", Cat::new()))
///     .unwrap();
/// assert_eq!(set.field_names(), vec!["loss", "raw"]);
/// assert!(MetricSet::new().with("loss", Mean::new()).unwrap().with("loss", Mean::new()).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricSet {
    entries: Vec<(String, Box<dyn Metric>)>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, builder style
    pub fn with(mut self, name: impl Into<String>, metric: impl Metric + 'static) -> Result<Self> {
        self.insert(name, Box::new(metric))?;
        Ok(self)
    }

    /// Add a field; empty or duplicate names are rejected
    pub fn insert(&mut self, name: impl Into<String>, metric: Box<dyn Metric>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidCollection(
                "metric field name must not be empty".to_string(),
            ));
        }
        if self.entries.iter().any(|(field, _)| *field == name) {
            return Err(Error::InvalidCollection(format!(
                "duplicate metric field '{name}'"
            )));
        }
        self.entries.push((name, metric));
        Ok(())
    }

    /// Build from `(name, metric)` pairs, failing on the first invalid name
    pub fn from_metrics<I, S>(metrics: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Box<dyn Metric>)>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for (name, metric) in metrics {
            set.insert(name, metric)?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetricCollection for MetricSet {
    fn metrics(&self) -> Vec<(&str, &dyn Metric)> {
        self.entries
            .iter()
            .map(|(name, metric)| (name.as_str(), metric.as_ref()))
            .collect()
    }

    fn metrics_mut(&mut self) -> Vec<(&str, &mut dyn Metric)> {
        self.entries
            .iter_mut()
            .map(|(name, metric)| (name.as_str(), metric.as_mut() as &mut dyn Metric))
            .collect()
    }
}

impl fmt::Display for MetricSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_collection(f, "MetricSet", &self.metrics())
    }
}
