//! Volumetric segmentation building blocks: a 3D U-Net assembled from a
//! [`ModelConfiguration`], Dice and Generalized Dice metrics over an
//! accumulated confusion matrix, and one-hot encoding of label volumes.

pub mod config;
pub mod confusion;
pub mod error;
pub mod factory;
pub mod metrics;
pub mod nn;
pub mod tensor;
pub mod unet;
pub mod utils;

pub use config::{ActivationKind, ModelConfiguration, PoolingKind};
pub use confusion::{Average, ConfusionMatrix, Output};
pub use error::{Error, Result};
pub use factory::{MetricKind, MetricParams, MetricsFactory};
pub use metrics::{Dice, GeneralizedDice, Metric, MetricValue, Reduction};
pub use nn::Module;
pub use unet::{Decoder, DoubleConv, Encoder, SingleConv, UNet3D};
pub use utils::{argmax, to_onehot};
