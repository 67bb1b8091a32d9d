//! Name-to-constructor registry for metrics.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use tracing::debug;

use crate::confusion::{Average, Output};
use crate::error::{Error, Result};
use crate::metrics::{ClassScore, ConfusionMatrixMetric, Dice, GeneralizedDice, Metric, Reduction};

/// Metrics registered by [`MetricsFactory::new`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Dice,
    GeneralizedDice,
    Accuracy,
    Precision,
    Recall,
    IoU,
    MeanIoU,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::Dice,
        MetricKind::GeneralizedDice,
        MetricKind::Accuracy,
        MetricKind::Precision,
        MetricKind::Recall,
        MetricKind::IoU,
        MetricKind::MeanIoU,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Dice => "Dice",
            MetricKind::GeneralizedDice => "GeneralizedDice",
            MetricKind::Accuracy => "Accuracy",
            MetricKind::Precision => "Precision",
            MetricKind::Recall => "Recall",
            MetricKind::IoU => "IoU",
            MetricKind::MeanIoU => "mIoU",
        }
    }
}

impl AsRef<str> for MetricKind {
    fn as_ref(&self) -> &str {
        self.name()
    }
}

impl FromStr for MetricKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownMetric(s.to_string()))
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output hook shared by every metric built from the same [`MetricParams`]
pub type SharedOutputTransform = Rc<dyn Fn(Output) -> Output>;

/// Arguments handed to every metric constructor
#[derive(Clone, Default)]
pub struct MetricParams {
    /// Number of classes, background included
    pub num_classes: usize,
    pub reduction: Reduction,
    pub average: Option<Average>,
    pub ignore_index: Option<i64>,
    /// Applied to each [`Output`] before it reaches the confusion matrix
    pub output_transform: Option<SharedOutputTransform>,
}

impl fmt::Debug for MetricParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricParams")
            .field("num_classes", &self.num_classes)
            .field("reduction", &self.reduction)
            .field("average", &self.average)
            .field("ignore_index", &self.ignore_index)
            .field("output_transform", &self.output_transform.is_some())
            .finish()
    }
}

impl MetricParams {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Default::default()
        }
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn with_average(mut self, average: Average) -> Self {
        self.average = Some(average);
        self
    }

    pub fn with_ignore_index(mut self, ignore_index: i64) -> Self {
        self.ignore_index = Some(ignore_index);
        self
    }

    pub fn with_output_transform(mut self, transform: impl Fn(Output) -> Output + 'static) -> Self {
        self.output_transform = Some(Rc::new(transform));
        self
    }

    /// Owned copy of the hook, ready to hand to a metric constructor
    fn transform(&self) -> Option<impl Fn(Output) -> Output + 'static> {
        self.output_transform
            .clone()
            .map(|transform| move |output: Output| transform(output))
    }
}

pub type MetricCreator = Box<dyn Fn(&MetricParams) -> Result<Box<dyn Metric>>>;

pub struct MetricsFactory {
    metrics: HashMap<String, MetricCreator>,
}

impl Default for MetricsFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsFactory {
    pub fn new() -> Self {
        let mut factory = Self {
            metrics: HashMap::new(),
        };

        factory.register(MetricKind::Dice, |p: &MetricParams| {
            let mut metric = Dice::new(p.num_classes, p.reduction, p.average, p.ignore_index)?;
            if let Some(transform) = p.transform() {
                metric = metric.with_output_transform(transform);
            }
            Ok(Box::new(metric) as Box<dyn Metric>)
        });
        factory.register(MetricKind::GeneralizedDice, |p: &MetricParams| {
            let mut metric =
                GeneralizedDice::new(p.num_classes, p.reduction, p.average, p.ignore_index)?;
            if let Some(transform) = p.transform() {
                metric = metric.with_output_transform(transform);
            }
            Ok(Box::new(metric) as Box<dyn Metric>)
        });

        let scores = [
            (MetricKind::Accuracy, ClassScore::Accuracy, None),
            (MetricKind::Precision, ClassScore::Precision, None),
            (MetricKind::Recall, ClassScore::Recall, None),
            (MetricKind::IoU, ClassScore::IoU, None),
            (MetricKind::MeanIoU, ClassScore::IoU, Some(Reduction::Mean)),
        ];
        for (kind, score, forced_reduction) in scores {
            factory.register(kind, move |p: &MetricParams| {
                let reduction = forced_reduction.unwrap_or(p.reduction);
                let mut metric = ConfusionMatrixMetric::new(
                    score,
                    p.num_classes,
                    reduction,
                    p.average,
                    p.ignore_index,
                )?;
                if let Some(transform) = p.transform() {
                    metric = metric.with_output_transform(transform);
                }
                Ok(Box::new(metric) as Box<dyn Metric>)
            });
        }

        factory
    }

    /// Instantiates the metric registered under `metric`.
    pub fn create_metric(
        &self,
        metric: impl AsRef<str>,
        params: &MetricParams,
    ) -> Result<Box<dyn Metric>> {
        let name = metric.as_ref();
        let creator = self
            .metrics
            .get(name)
            .ok_or_else(|| Error::UnknownMetric(name.to_string()))?;
        debug!(metric = name, num_classes = params.num_classes, "creating metric");
        creator(params)
    }

    /// Adds or replaces the constructor registered under `metric`.
    pub fn register<F>(&mut self, metric: impl AsRef<str>, creator: F)
    where
        F: Fn(&MetricParams) -> Result<Box<dyn Metric>> + 'static,
    {
        self.metrics
            .insert(metric.as_ref().to_string(), Box::new(creator));
    }

    pub fn contains(&self, metric: impl AsRef<str>) -> bool {
        self.metrics.contains_key(metric.as_ref())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.metrics.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
