use ndarray::{Array1, Array5, Axis, s};
use rand::Rng;

use crate::config::{ActivationKind, PoolingKind};
use crate::error::{Error, Result};
use crate::tensor;

/// A layer applied to a `(N, C, D, H, W)` batch.
pub trait Module {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>>;

    /// Number of trainable scalars held by the layer
    fn num_params(&self) -> usize {
        0
    }
}

/// Xavier/Glorot uniform initialisation for a 5D kernel
fn xavier_kernel(
    shape: (usize, usize, usize, usize, usize),
    fan_in: usize,
    fan_out: usize,
) -> Array5<f32> {
    let mut rng = rand::rng();
    let scale = (2.0 / (fan_in + fan_out) as f32).sqrt();
    Array5::from_shape_fn(shape, |_| (rng.random::<f32>() - 0.5) * 2.0 * scale)
}

/// 3D convolution: y = conv(x, W) + b
#[derive(Debug, Clone)]
pub struct Conv3d {
    /// Weight tensor [out_channels, in_channels, k, k, k]
    pub weight: Array5<f32>,
    pub bias: Array1<f32>,
    pub stride: usize,
    /// Zero padding added on every spatial border
    pub padding: usize,
}

impl Conv3d {
    /// Creates a cubic-kernel convolution with stride 1 and no padding
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        let k3 = kernel_size.pow(3);
        Self {
            weight: xavier_kernel(
                (out_channels, in_channels, kernel_size, kernel_size, kernel_size),
                in_channels * k3,
                out_channels * k3,
            ),
            bias: Array1::zeros(out_channels),
            stride: 1,
            padding: 0,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.dim().2
    }
}

impl Module for Conv3d {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        tensor::conv3d(x, &self.weight, Some(&self.bias), self.stride, self.padding)
    }

    fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Learned upsampling by transposed 3D convolution
#[derive(Debug, Clone)]
pub struct ConvTranspose3d {
    /// Weight tensor [in_channels, out_channels, k, k, k]
    pub weight: Array5<f32>,
    pub bias: Array1<f32>,
    pub stride: usize,
    pub padding: usize,
    pub output_padding: usize,
}

impl ConvTranspose3d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        output_padding: usize,
    ) -> Self {
        let k3 = kernel_size.pow(3);
        Self {
            weight: xavier_kernel(
                (in_channels, out_channels, kernel_size, kernel_size, kernel_size),
                in_channels * k3,
                out_channels * k3,
            ),
            bias: Array1::zeros(out_channels),
            stride,
            padding,
            output_padding,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.weight.dim().0
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().1
    }
}

impl Module for ConvTranspose3d {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        tensor::conv_transpose3d(
            x,
            &self.weight,
            Some(&self.bias),
            self.stride,
            self.padding,
            self.output_padding,
        )
    }

    fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Border replication, padding given as (left, right, top, bottom, front, back)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationPad3d {
    pub padding: [usize; 6],
}

impl ReplicationPad3d {
    pub fn new(padding: [usize; 6]) -> Self {
        Self { padding }
    }
}

impl Module for ReplicationPad3d {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        tensor::replication_pad3d(x, self.padding)
    }
}

/// Group normalization over channel groups of each sample
#[derive(Debug, Clone)]
pub struct GroupNorm {
    pub num_groups: usize,
    pub weight: Array1<f32>,
    pub bias: Array1<f32>,
    pub eps: f32,
}

impl GroupNorm {
    pub fn new(num_groups: usize, num_channels: usize) -> Result<Self> {
        if num_groups == 0 || num_channels % num_groups != 0 {
            return Err(Error::InvalidConfig(format!(
                "num_channels ({num_channels}) must be divisible by num_groups ({num_groups})"
            )));
        }
        Ok(Self {
            num_groups,
            weight: Array1::ones(num_channels),
            bias: Array1::zeros(num_channels),
            eps: 1e-5,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.weight.len()
    }
}

impl Module for GroupNorm {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        let (n, c, _, _, _) = x.dim();
        if c != self.num_channels() {
            return Err(Error::shape(
                format!("{} channels", self.num_channels()),
                format!("{c} channels"),
            ));
        }
        let group_size = c / self.num_groups;
        let mut output = x.clone();

        for b in 0..n {
            for g in 0..self.num_groups {
                let channels = g * group_size..(g + 1) * group_size;
                let mut group = output.slice_mut(s![b, channels.clone(), .., .., ..]);

                let mean = group.mean().unwrap_or(0.0);
                let var = group.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
                let std = (var + self.eps).sqrt();

                for (offset, mut channel) in group.outer_iter_mut().enumerate() {
                    let ch = channels.start + offset;
                    let (gamma, beta) = (self.weight[ch], self.bias[ch]);
                    channel.mapv_inplace(|v| gamma * (v - mean) / std + beta);
                }
            }
        }

        Ok(output)
    }

    fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Batch normalization over (N, D, H, W) for each channel
#[derive(Debug, Clone)]
pub struct BatchNorm3d {
    pub weight: Array1<f32>,
    pub bias: Array1<f32>,
    pub running_mean: Array1<f32>,
    pub running_var: Array1<f32>,
    pub eps: f32,
    /// Batch statistics are used while training, running statistics otherwise
    pub training: bool,
}

impl BatchNorm3d {
    pub fn new(num_features: usize) -> Self {
        Self {
            weight: Array1::ones(num_features),
            bias: Array1::zeros(num_features),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            eps: 1e-5,
            training: true,
        }
    }

    pub fn num_features(&self) -> usize {
        self.weight.len()
    }

    pub fn train(&mut self, mode: bool) {
        self.training = mode;
    }
}

impl Module for BatchNorm3d {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        let c = x.dim().1;
        if c != self.num_features() {
            return Err(Error::shape(
                format!("{} channels", self.num_features()),
                format!("{c} channels"),
            ));
        }
        let mut output = x.clone();

        for (ch, mut channel) in output.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, var) = if self.training {
                let mean = channel.mean().unwrap_or(0.0);
                let var = channel.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
                (mean, var)
            } else {
                (self.running_mean[ch], self.running_var[ch])
            };
            let std = (var + self.eps).sqrt();
            let (gamma, beta) = (self.weight[ch], self.bias[ch]);
            channel.mapv_inplace(|v| gamma * (v - mean) / std + beta);
        }

        Ok(output)
    }

    fn num_params(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// GroupNorm when a group count is configured, BatchNorm3d otherwise
#[derive(Debug, Clone)]
pub enum Normalization {
    Group(GroupNorm),
    Batch(BatchNorm3d),
}

impl Normalization {
    pub fn new(num_groups: Option<usize>, num_channels: usize) -> Result<Self> {
        match num_groups {
            Some(groups) => Ok(Normalization::Group(GroupNorm::new(groups, num_channels)?)),
            None => Ok(Normalization::Batch(BatchNorm3d::new(num_channels))),
        }
    }
}

impl Module for Normalization {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        match self {
            Normalization::Group(norm) => norm.forward(x),
            Normalization::Batch(norm) => norm.forward(x),
        }
    }

    fn num_params(&self) -> usize {
        match self {
            Normalization::Group(norm) => norm.num_params(),
            Normalization::Batch(norm) => norm.num_params(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    ReLU,
    LeakyReLU { negative_slope: f32 },
    /// Single learnable slope shared by all channels
    PReLU { weight: f32 },
}

impl Activation {
    pub fn kind(&self) -> ActivationKind {
        match self {
            Activation::ReLU => ActivationKind::ReLU,
            Activation::LeakyReLU { .. } => ActivationKind::LeakyReLU,
            Activation::PReLU { .. } => ActivationKind::PReLU,
        }
    }

    fn apply(&self, x: f32) -> f32 {
        match *self {
            Activation::ReLU => x.max(0.0),
            Activation::LeakyReLU { negative_slope: a } | Activation::PReLU { weight: a } => {
                if x > 0.0 { x } else { a * x }
            }
        }
    }
}

impl From<ActivationKind> for Activation {
    fn from(kind: ActivationKind) -> Self {
        match kind {
            ActivationKind::ReLU => Activation::ReLU,
            ActivationKind::LeakyReLU => Activation::LeakyReLU {
                negative_slope: 0.01,
            },
            ActivationKind::PReLU => Activation::PReLU { weight: 0.25 },
        }
    }
}

impl Module for Activation {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        Ok(x.mapv(|v| self.apply(v)))
    }

    fn num_params(&self) -> usize {
        match self {
            Activation::PReLU { .. } => 1,
            _ => 0,
        }
    }
}

/// Downsampling applied at the start of every encoder stage but the first
#[derive(Debug, Clone)]
pub enum Pooling {
    Max { kernel_size: usize },
    Avg { kernel_size: usize },
    /// Learned strided convolution that keeps the channel count
    Conv(Conv3d),
}

impl Pooling {
    pub fn new(kind: PoolingKind, kernel_size: usize, channels: usize) -> Self {
        match kind {
            PoolingKind::MaxPool3d => Pooling::Max { kernel_size },
            PoolingKind::AvgPool3d => Pooling::Avg { kernel_size },
            PoolingKind::Conv3d => {
                Pooling::Conv(Conv3d::new(channels, channels, kernel_size).with_stride(kernel_size))
            }
        }
    }

    pub fn kind(&self) -> PoolingKind {
        match self {
            Pooling::Max { .. } => PoolingKind::MaxPool3d,
            Pooling::Avg { .. } => PoolingKind::AvgPool3d,
            Pooling::Conv(_) => PoolingKind::Conv3d,
        }
    }
}

impl Module for Pooling {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        match self {
            Pooling::Max { kernel_size } => tensor::max_pool3d(x, *kernel_size, *kernel_size),
            Pooling::Avg { kernel_size } => tensor::avg_pool3d(x, *kernel_size, *kernel_size),
            Pooling::Conv(conv) => conv.forward(x),
        }
    }

    fn num_params(&self) -> usize {
        match self {
            Pooling::Conv(conv) => conv.num_params(),
            _ => 0,
        }
    }
}
