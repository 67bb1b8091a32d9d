//! Confusion matrix accumulated over an evaluation run.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayD, Axis, Zip};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::metrics::EPSILON;
use crate::utils::argmax;

/// Model output paired with ground truth.
///
/// `y_pred` holds class scores shaped `(B, C, ...)`; `y` holds class indices
/// shaped `(B, ...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub y_pred: ArrayD<f32>,
    pub y: ArrayD<usize>,
}

impl Output {
    pub fn new(y_pred: ArrayD<f32>, y: ArrayD<usize>) -> Self {
        Self { y_pred, y }
    }
}

/// Hook applied to every [`Output`] before it is accumulated
pub type OutputTransform = Box<dyn Fn(Output) -> Output>;

/// Normalization applied when the matrix is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Average {
    /// Divide by the number of examples seen
    Samples,
    /// Divide each row by its sum: the diagonal holds per-class recall
    Recall,
    /// Divide each column by its sum: the diagonal holds per-class precision
    Precision,
}

impl Average {
    pub fn name(&self) -> &'static str {
        match self {
            Average::Samples => "samples",
            Average::Recall => "recall",
            Average::Precision => "precision",
        }
    }
}

impl FromStr for Average {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "samples" => Ok(Average::Samples),
            "recall" => Ok(Average::Recall),
            "precision" => Ok(Average::Precision),
            other => Err(Error::InvalidConfig(format!(
                "average must be one of samples, recall, precision; got {other}"
            ))),
        }
    }
}

impl fmt::Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// C×C counts where entry (i, j) is the number of voxels of true class `i`
/// predicted as class `j`.
pub struct ConfusionMatrix {
    num_classes: usize,
    average: Option<Average>,
    matrix: Array2<u64>,
    num_examples: usize,
    output_transform: Option<OutputTransform>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            average: None,
            matrix: Array2::zeros((num_classes, num_classes)),
            num_examples: 0,
            output_transform: None,
        }
    }

    pub fn with_average(mut self, average: Option<Average>) -> Self {
        self.average = average;
        self
    }

    pub fn with_output_transform(mut self, transform: impl Fn(Output) -> Output + 'static) -> Self {
        self.output_transform = Some(Box::new(transform));
        self
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn average(&self) -> Option<Average> {
        self.average
    }

    pub fn num_examples(&self) -> usize {
        self.num_examples
    }

    /// Raw counts accumulated so far
    pub fn counts(&self) -> &Array2<u64> {
        &self.matrix
    }

    pub fn reset(&mut self) {
        self.matrix.fill(0);
        self.num_examples = 0;
    }

    fn check_shapes(&self, output: &Output) -> Result<()> {
        let pred = output.y_pred.shape();
        let target = output.y.shape();

        if pred.len() < 2 {
            return Err(Error::shape(
                "y_pred of shape (B, C, ...)",
                format!("{pred:?}"),
            ));
        }
        if pred[1] != self.num_classes {
            return Err(Error::shape(
                format!("{} classes on axis 1 of y_pred", self.num_classes),
                format!("{}", pred[1]),
            ));
        }
        if target.len() + 1 != pred.len() || target[0] != pred[0] || target[1..] != pred[2..] {
            return Err(Error::shape(
                format!("y of shape {:?}", [&pred[..1], &pred[2..]].concat()),
                format!("{target:?}"),
            ));
        }
        Ok(())
    }

    /// Accumulates one batch. Targets outside `[0, C)` are skipped.
    pub fn update(&mut self, output: Output) -> Result<()> {
        let output = match &self.output_transform {
            Some(transform) => transform(output),
            None => output,
        };
        self.check_shapes(&output)?;

        let predicted = argmax(&output.y_pred, 1)?;
        let num_classes = self.num_classes;
        let matrix = &mut self.matrix;
        let mut skipped = 0usize;

        Zip::from(&output.y).and(&predicted).for_each(|&target, &pred| {
            if target < num_classes {
                matrix[[target, pred]] += 1;
            } else {
                skipped += 1;
            }
        });

        if skipped > 0 {
            debug!(skipped, num_classes, "ignored targets outside the class range");
        }
        self.num_examples += output.y_pred.len_of(Axis(0));
        trace!(num_examples = self.num_examples, "confusion matrix updated");
        Ok(())
    }

    /// The accumulated matrix as `f64`, normalized per [`Average`].
    pub fn compute(&self) -> Result<Array2<f64>> {
        if self.num_examples == 0 {
            return Err(Error::NotComputable);
        }
        let cm = self.matrix.mapv(|v| v as f64);

        Ok(match self.average {
            None => cm,
            Some(Average::Samples) => cm / self.num_examples as f64,
            Some(Average::Recall) => {
                let rows = cm.sum_axis(Axis(1)).insert_axis(Axis(1));
                &cm / &(rows + EPSILON)
            }
            Some(Average::Precision) => {
                let cols = cm.sum_axis(Axis(0)).insert_axis(Axis(0));
                &cm / &(cols + EPSILON)
            }
        })
    }
}

impl fmt::Debug for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfusionMatrix")
            .field("num_classes", &self.num_classes)
            .field("average", &self.average)
            .field("matrix", &self.matrix)
            .field("num_examples", &self.num_examples)
            .finish_non_exhaustive()
    }
}
