//! Segmentation metrics derived from a [`ConfusionMatrix`].

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::confusion::{Average, ConfusionMatrix, Output};
use crate::error::{Error, Result};

/// Guards every division against classes absent from both prediction and target
pub const EPSILON: f64 = 1e-15;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// One value per retained class
    #[default]
    None,
    /// Average of the retained per-class values
    Mean,
}

impl FromStr for Reduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Reduction::None),
            "mean" => Ok(Reduction::Mean),
            other => Err(Error::InvalidConfig(format!(
                "reduction must be none or mean; got {other}"
            ))),
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reduction::None => "none",
            Reduction::Mean => "mean",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Scalar(f64),
    /// One value per retained class, in class order
    PerClass(Array1<f64>),
}

impl MetricValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            MetricValue::PerClass(_) => None,
        }
    }

    pub fn as_per_class(&self) -> Option<&Array1<f64>> {
        match self {
            MetricValue::Scalar(_) => None,
            MetricValue::PerClass(values) => Some(values),
        }
    }
}

/// A metric fed batch by batch from an evaluation loop.
pub trait Metric {
    fn name(&self) -> &'static str;

    fn reset(&mut self);

    fn update(&mut self, output: Output) -> Result<()>;

    /// Update carrying per-class weights for this batch. Unweighted metrics
    /// ignore the weights.
    fn update_weighted(&mut self, output: Output, _weights: Array1<f64>) -> Result<()> {
        self.update(output)
    }

    /// Recomputes the value from the accumulated state.
    fn compute(&self) -> Result<MetricValue>;
}

pub fn validate_ignore_index(ignore_index: i64) -> Result<usize> {
    usize::try_from(ignore_index).map_err(|_| Error::NegativeIgnoreIndex(ignore_index))
}

pub fn validate_num_classes(ignore_index: usize, num_classes: usize) -> Result<()> {
    if ignore_index >= num_classes {
        return Err(Error::IgnoreIndexOutOfRange {
            ignore_index,
            num_classes,
        });
    }
    Ok(())
}

pub fn validate_weights_size(weights_size: usize, num_classes: usize) -> Result<()> {
    if weights_size != num_classes {
        return Err(Error::WeightsSizeMismatch {
            got: weights_size,
            num_classes,
        });
    }
    Ok(())
}

/// Checks an optional ignore index against the class count
fn resolve_ignore_index(ignore_index: Option<i64>, num_classes: usize) -> Result<Option<usize>> {
    ignore_index
        .map(|index| {
            let index = validate_ignore_index(index)?;
            validate_num_classes(index, num_classes)?;
            Ok(index)
        })
        .transpose()
}

/// Drops position `index`, keeping the order of the others
pub fn remove_index(values: &Array1<f64>, index: usize) -> Array1<f64> {
    let kept: Vec<usize> = (0..values.len()).filter(|&i| i != index).collect();
    values.select(Axis(0), &kept)
}

fn retain(values: Array1<f64>, ignore_index: Option<usize>) -> Array1<f64> {
    match ignore_index {
        Some(index) => remove_index(&values, index),
        None => values,
    }
}

fn square(cm: &Array2<f64>) -> Result<usize> {
    let (rows, cols) = cm.dim();
    if rows != cols {
        return Err(Error::shape("a square confusion matrix", format!("({rows}, {cols})")));
    }
    Ok(rows)
}

/// Row sum plus column sum for each class
fn margins(cm: &Array2<f64>) -> Array1<f64> {
    cm.sum_axis(Axis(1)) + cm.sum_axis(Axis(0))
}

/// Per-class Sørensen–Dice coefficient: `2 * TP / (|true| + |predicted|)`.
pub fn dice_coefficient(cm: &Array2<f64>, ignore_index: Option<i64>) -> Result<Array1<f64>> {
    let num_classes = square(cm)?;
    let ignore_index = resolve_ignore_index(ignore_index, num_classes)?;

    let dice = Zip::from(cm.diag())
        .and(&margins(cm))
        .map_collect(|&tp, &m| 2.0 * tp / (m + EPSILON));

    Ok(retain(dice, ignore_index))
}

/// Per-class Dice with every numerator and denominator term scaled by the class weight.
pub fn generalized_dice_coefficient(
    cm: &Array2<f64>,
    weights: &Array1<f64>,
    ignore_index: Option<i64>,
) -> Result<Array1<f64>> {
    let num_classes = square(cm)?;
    validate_weights_size(weights.len(), num_classes)?;
    let ignore_index = resolve_ignore_index(ignore_index, num_classes)?;

    let dice = Zip::from(cm.diag())
        .and(&margins(cm))
        .and(weights)
        .map_collect(|&tp, &m, &w| 2.0 * (tp * w) / (m * w + EPSILON));

    Ok(retain(dice, ignore_index))
}

pub fn mean_dice_coefficient(cm: &Array2<f64>, ignore_index: Option<i64>) -> Result<f64> {
    Ok(mean(&dice_coefficient(cm, ignore_index)?))
}

pub fn mean_generalized_dice_coefficient(
    cm: &Array2<f64>,
    weights: &Array1<f64>,
    ignore_index: Option<i64>,
) -> Result<f64> {
    Ok(mean(&generalized_dice_coefficient(cm, weights, ignore_index)?))
}

/// Per-class intersection over union: `TP / (|true| + |predicted| - TP)`.
pub fn iou(cm: &Array2<f64>, ignore_index: Option<i64>) -> Result<Array1<f64>> {
    let num_classes = square(cm)?;
    let ignore_index = resolve_ignore_index(ignore_index, num_classes)?;

    let iou = Zip::from(cm.diag())
        .and(&margins(cm))
        .map_collect(|&tp, &m| tp / (m - tp + EPSILON));

    Ok(retain(iou, ignore_index))
}

pub fn mean_iou(cm: &Array2<f64>, ignore_index: Option<i64>) -> Result<f64> {
    Ok(mean(&iou(cm, ignore_index)?))
}

/// Per-class precision: diagonal over column sums
pub fn precision(cm: &Array2<f64>, ignore_index: Option<i64>) -> Result<Array1<f64>> {
    let num_classes = square(cm)?;
    let ignore_index = resolve_ignore_index(ignore_index, num_classes)?;

    let precision = Zip::from(cm.diag())
        .and(&cm.sum_axis(Axis(0)))
        .map_collect(|&tp, &predicted| tp / (predicted + EPSILON));

    Ok(retain(precision, ignore_index))
}

/// Per-class recall: diagonal over row sums
pub fn recall(cm: &Array2<f64>, ignore_index: Option<i64>) -> Result<Array1<f64>> {
    let num_classes = square(cm)?;
    let ignore_index = resolve_ignore_index(ignore_index, num_classes)?;

    let recall = Zip::from(cm.diag())
        .and(&cm.sum_axis(Axis(1)))
        .map_collect(|&tp, &actual| tp / (actual + EPSILON));

    Ok(retain(recall, ignore_index))
}

/// Fraction of all counted voxels lying on the diagonal
pub fn accuracy(cm: &Array2<f64>) -> Result<f64> {
    square(cm)?;
    Ok(cm.diag().sum() / (cm.sum() + EPSILON))
}

/// Mean of the retained values; NaN when nothing is retained.
fn mean(values: &Array1<f64>) -> f64 {
    values.mean().unwrap_or(f64::NAN)
}

fn reduce(values: Array1<f64>, reduction: Reduction) -> MetricValue {
    match reduction {
        Reduction::None => MetricValue::PerClass(values),
        Reduction::Mean => MetricValue::Scalar(mean(&values)),
    }
}

/// The Dice metric over an accumulated confusion matrix.
#[derive(Debug)]
pub struct Dice {
    cm: ConfusionMatrix,
    reduction: Reduction,
    ignore_index: Option<i64>,
}

impl Dice {
    /// `num_classes` counts the background class as well.
    pub fn new(
        num_classes: usize,
        reduction: Reduction,
        average: Option<Average>,
        ignore_index: Option<i64>,
    ) -> Result<Self> {
        resolve_ignore_index(ignore_index, num_classes)?;
        Ok(Self {
            cm: ConfusionMatrix::new(num_classes).with_average(average),
            reduction,
            ignore_index,
        })
    }

    pub fn with_output_transform(mut self, transform: impl Fn(Output) -> Output + 'static) -> Self {
        self.cm = self.cm.with_output_transform(transform);
        self
    }

    pub fn confusion_matrix(&self) -> &ConfusionMatrix {
        &self.cm
    }
}

impl Metric for Dice {
    fn name(&self) -> &'static str {
        "Dice"
    }

    fn reset(&mut self) {
        self.cm.reset();
    }

    fn update(&mut self, output: Output) -> Result<()> {
        self.cm.update(output)
    }

    fn compute(&self) -> Result<MetricValue> {
        let dice = dice_coefficient(&self.cm.compute()?, self.ignore_index)?;
        Ok(reduce(dice, self.reduction))
    }
}

/// Dice weighted per class, with weights supplied on every update.
///
/// The value is always computed from the full accumulated matrix and the
/// weights of the most recent update.
#[derive(Debug)]
pub struct GeneralizedDice {
    cm: ConfusionMatrix,
    reduction: Reduction,
    ignore_index: Option<i64>,
    weights: Option<Array1<f64>>,
}

impl GeneralizedDice {
    pub fn new(
        num_classes: usize,
        reduction: Reduction,
        average: Option<Average>,
        ignore_index: Option<i64>,
    ) -> Result<Self> {
        resolve_ignore_index(ignore_index, num_classes)?;
        Ok(Self {
            cm: ConfusionMatrix::new(num_classes).with_average(average),
            reduction,
            ignore_index,
            weights: None,
        })
    }

    pub fn with_output_transform(mut self, transform: impl Fn(Output) -> Output + 'static) -> Self {
        self.cm = self.cm.with_output_transform(transform);
        self
    }

    pub fn confusion_matrix(&self) -> &ConfusionMatrix {
        &self.cm
    }

    /// Weights of the most recent update
    pub fn weights(&self) -> Option<&Array1<f64>> {
        self.weights.as_ref()
    }
}

impl Metric for GeneralizedDice {
    fn name(&self) -> &'static str {
        "GeneralizedDice"
    }

    fn reset(&mut self) {
        self.cm.reset();
        self.weights = None;
    }

    fn update(&mut self, _output: Output) -> Result<()> {
        Err(Error::MissingWeights)
    }

    fn update_weighted(&mut self, output: Output, weights: Array1<f64>) -> Result<()> {
        validate_weights_size(weights.len(), self.cm.num_classes())?;
        self.cm.update(output)?;
        self.weights = Some(weights);
        Ok(())
    }

    fn compute(&self) -> Result<MetricValue> {
        let weights = self.weights.as_ref().ok_or(Error::MissingWeights)?;
        let dice = generalized_dice_coefficient(&self.cm.compute()?, weights, self.ignore_index)?;
        Ok(reduce(dice, self.reduction))
    }
}

/// Classification scores read off the confusion matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassScore {
    Accuracy,
    Precision,
    Recall,
    IoU,
}

impl ClassScore {
    pub fn name(&self) -> &'static str {
        match self {
            ClassScore::Accuracy => "Accuracy",
            ClassScore::Precision => "Precision",
            ClassScore::Recall => "Recall",
            ClassScore::IoU => "IoU",
        }
    }
}

/// Accuracy, precision, recall or IoU over an accumulated confusion matrix.
///
/// Accuracy is always a scalar and ignores the ignore index.
#[derive(Debug)]
pub struct ConfusionMatrixMetric {
    score: ClassScore,
    cm: ConfusionMatrix,
    reduction: Reduction,
    ignore_index: Option<i64>,
}

impl ConfusionMatrixMetric {
    pub fn new(
        score: ClassScore,
        num_classes: usize,
        reduction: Reduction,
        average: Option<Average>,
        ignore_index: Option<i64>,
    ) -> Result<Self> {
        resolve_ignore_index(ignore_index, num_classes)?;
        Ok(Self {
            score,
            cm: ConfusionMatrix::new(num_classes).with_average(average),
            reduction,
            ignore_index,
        })
    }

    pub fn with_output_transform(mut self, transform: impl Fn(Output) -> Output + 'static) -> Self {
        self.cm = self.cm.with_output_transform(transform);
        self
    }

    pub fn score(&self) -> ClassScore {
        self.score
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }
}

impl Metric for ConfusionMatrixMetric {
    fn name(&self) -> &'static str {
        self.score.name()
    }

    fn reset(&mut self) {
        self.cm.reset();
    }

    fn update(&mut self, output: Output) -> Result<()> {
        self.cm.update(output)
    }

    fn compute(&self) -> Result<MetricValue> {
        let cm = self.cm.compute()?;
        let values = match self.score {
            ClassScore::Accuracy => return Ok(MetricValue::Scalar(accuracy(&cm)?)),
            ClassScore::Precision => precision(&cm, self.ignore_index)?,
            ClassScore::Recall => recall(&cm, self.ignore_index)?,
            ClassScore::IoU => iou(&cm, self.ignore_index)?,
        };
        Ok(reduce(values, self.reduction))
    }
}
