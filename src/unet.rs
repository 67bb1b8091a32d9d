//! 3D U-Net from "3D U-Net: Learning Dense Volumetric Segmentation from Sparse
//! Annotation" (<https://arxiv.org/abs/1606.06650>).

use ndarray::Array5;
use tracing::{debug, trace};

use crate::config::{ActivationKind, ModelConfiguration};
use crate::error::{Error, Result};
use crate::nn::{
    Activation, Conv3d, ConvTranspose3d, Module, Normalization, Pooling, ReplicationPad3d,
};
use crate::tensor;

/// Replication padding (optional) + convolution + normalization + activation (optional)
#[derive(Debug, Clone)]
pub struct SingleConv {
    pub padding: Option<ReplicationPad3d>,
    pub conv: Conv3d,
    pub norm: Normalization,
    pub activation: Option<Activation>,
}

impl SingleConv {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        num_groups: Option<usize>,
        padding: Option<[usize; 6]>,
        activation: Option<ActivationKind>,
    ) -> Result<Self> {
        let conv = Conv3d::new(in_channels, out_channels, kernel_size);
        // Without explicit replication padding the convolution pads itself
        let (padding, conv) = match padding {
            Some(p) => (Some(ReplicationPad3d::new(p)), conv),
            None => (None, conv.with_padding(1)),
        };

        Ok(Self {
            padding,
            conv,
            norm: Normalization::new(num_groups, out_channels)?,
            activation: activation.map(Activation::from),
        })
    }
}

impl Module for SingleConv {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        let x = match &self.padding {
            Some(pad) => self.conv.forward(&pad.forward(x)?)?,
            None => self.conv.forward(x)?,
        };
        let x = self.norm.forward(&x)?;
        match &self.activation {
            Some(activation) => activation.forward(&x),
            None => Ok(x),
        }
    }

    fn num_params(&self) -> usize {
        self.conv.num_params()
            + self.norm.num_params()
            + self.activation.map_or(0, |a| a.num_params())
    }
}

/// Two consecutive [`SingleConv`] blocks.
///
/// In the encoder the first block narrows to `max(out / 2, in)` channels;
/// in the decoder both blocks produce `out` channels.
#[derive(Debug, Clone)]
pub struct DoubleConv {
    pub conv1: SingleConv,
    pub conv2: SingleConv,
}

impl DoubleConv {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        is_in_encoder: bool,
        kernel_size: usize,
        num_groups: Option<usize>,
        padding: Option<[usize; 6]>,
        activation: Option<ActivationKind>,
    ) -> Result<Self> {
        let (conv1_in, conv1_out) = if is_in_encoder {
            (in_channels, (out_channels / 2).max(in_channels))
        } else {
            (in_channels, out_channels)
        };

        Ok(Self {
            conv1: SingleConv::new(
                conv1_in,
                conv1_out,
                kernel_size,
                num_groups,
                padding,
                activation,
            )?,
            conv2: SingleConv::new(
                conv1_out,
                out_channels,
                kernel_size,
                num_groups,
                padding,
                activation,
            )?,
        })
    }

    fn from_config(
        in_channels: usize,
        out_channels: usize,
        is_in_encoder: bool,
        config: &ModelConfiguration,
    ) -> Result<Self> {
        Self::new(
            in_channels,
            out_channels,
            is_in_encoder,
            config.conv_kernel_size,
            config.num_groups,
            config.padding,
            config.activation,
        )
    }
}

impl Module for DoubleConv {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        self.conv2.forward(&self.conv1.forward(x)?)
    }

    fn num_params(&self) -> usize {
        self.conv1.num_params() + self.conv2.num_params()
    }
}

/// One level of the contracting path: optional pooling, then a [`DoubleConv`]
#[derive(Debug, Clone)]
pub struct Encoder {
    pub pooling: Option<Pooling>,
    pub basic_module: DoubleConv,
    in_channels: usize,
    out_channels: usize,
}

impl Encoder {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        config: &ModelConfiguration,
        apply_pooling: bool,
    ) -> Result<Self> {
        let pooling = apply_pooling
            .then(|| Pooling::new(config.pooling_type, config.pool_kernel_size, in_channels));

        Ok(Self {
            pooling,
            basic_module: DoubleConv::from_config(in_channels, out_channels, true, config)?,
            in_channels,
            out_channels,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl Module for Encoder {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        match &self.pooling {
            Some(pooling) => self.basic_module.forward(&pooling.forward(x)?),
            None => self.basic_module.forward(x),
        }
    }

    fn num_params(&self) -> usize {
        self.basic_module.num_params() + self.pooling.as_ref().map_or(0, |p| p.num_params())
    }
}

/// One level of the expanding path.
///
/// With interpolation the coarse input is resized to the skip connection and
/// concatenated after it; otherwise a transposed convolution projects it to
/// the skip width and the two are summed.
#[derive(Debug, Clone)]
pub struct Decoder {
    pub upsample: Option<ConvTranspose3d>,
    pub basic_module: DoubleConv,
    in_channels: usize,
    out_channels: usize,
}

impl Decoder {
    /// `coarse_channels` is the width of the incoming decoder (or bottleneck)
    /// output, `skip_channels` the width of the matching encoder output.
    pub fn new(
        coarse_channels: usize,
        skip_channels: usize,
        config: &ModelConfiguration,
    ) -> Result<Self> {
        if config.interpolation {
            let in_channels = coarse_channels + skip_channels;
            return Ok(Self {
                upsample: None,
                basic_module: DoubleConv::from_config(in_channels, skip_channels, false, config)?,
                in_channels,
                out_channels: skip_channels,
            });
        }

        let kernel = config.conv_kernel_size;
        let stride = config.scale_factor;
        let padding = kernel / 2;
        // Chosen so that each spatial dim is scaled by exactly `stride`
        let output_padding = (stride + 2 * padding).saturating_sub(kernel);

        Ok(Self {
            upsample: Some(ConvTranspose3d::new(
                coarse_channels,
                skip_channels,
                kernel,
                stride,
                padding,
                output_padding,
            )),
            basic_module: DoubleConv::from_config(skip_channels, skip_channels, false, config)?,
            in_channels: coarse_channels,
            out_channels: skip_channels,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn forward(&self, encoder_features: &Array5<f32>, x: &Array5<f32>) -> Result<Array5<f32>> {
        let size = tensor::spatial_dims(encoder_features);
        let joined = match &self.upsample {
            None => {
                let x = tensor::interpolate_nearest(x, size);
                tensor::concat_channels(encoder_features, &x)?
            }
            Some(upsample) => {
                let x = tensor::fit_spatial(&upsample.forward(x)?, size)?;
                tensor::add(&x, encoder_features)?
            }
        };
        self.basic_module.forward(&joined)
    }

    pub fn num_params(&self) -> usize {
        self.basic_module.num_params() + self.upsample.as_ref().map_or(0, |u| u.num_params())
    }
}

#[derive(Debug, Clone)]
pub struct UNet3D {
    pub encoders: Vec<Encoder>,
    pub decoders: Vec<Decoder>,
    pub final_conv: Conv3d,
}

impl UNet3D {
    pub fn new(config: &ModelConfiguration) -> Result<Self> {
        config.validate()?;
        let feature_maps = Self::feature_maps(config.feature_maps, config.num_levels)?;
        debug!(
            ?feature_maps,
            interpolation = config.interpolation,
            pooling = %config.pooling_type,
            "building 3D U-Net"
        );

        let encoders = Self::build_encoders(&feature_maps, config)?;
        let decoders = Self::build_decoders(&feature_maps, config)?;
        let final_conv = Conv3d::new(feature_maps[0], config.out_channels, 1);

        Ok(Self {
            encoders,
            decoders,
            final_conv,
        })
    }

    /// Encoder widths: `base * 2^k` for `k` in `0..num_levels`
    pub fn feature_maps(base: usize, num_levels: usize) -> Result<Vec<usize>> {
        if base == 0 {
            return Err(Error::InvalidConfig("feature_maps must be positive".into()));
        }
        let mut widths = Vec::new();
        let mut width = base;
        for level in 0..num_levels {
            if level > 0 {
                width = width.checked_mul(2).ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "feature map width overflows at level {level} starting from {base}"
                    ))
                })?;
            }
            widths.push(width);
        }
        Ok(widths)
    }

    fn build_encoders(feature_maps: &[usize], config: &ModelConfiguration) -> Result<Vec<Encoder>> {
        feature_maps
            .iter()
            .enumerate()
            .map(|(i, &out_channels)| match i {
                0 => Encoder::new(config.in_channels, out_channels, config, false),
                _ => Encoder::new(feature_maps[i - 1], out_channels, config, true),
            })
            .collect()
    }

    fn build_decoders(feature_maps: &[usize], config: &ModelConfiguration) -> Result<Vec<Decoder>> {
        let reversed: Vec<usize> = feature_maps.iter().rev().copied().collect();
        reversed
            .windows(2)
            .map(|w| Decoder::new(w[0], w[1], config))
            .collect()
    }
}

impl Module for UNet3D {
    fn forward(&self, x: &Array5<f32>) -> Result<Array5<f32>> {
        let mut features: Vec<Array5<f32>> = Vec::with_capacity(self.encoders.len());
        for (level, encoder) in self.encoders.iter().enumerate() {
            let input = features.last().unwrap_or(x);
            let out = encoder.forward(input)?;
            trace!(level, shape = ?out.shape(), "encoder stage");
            features.push(out);
        }

        // The deepest output seeds the decoder directly
        let mut x = features
            .pop()
            .ok_or_else(|| Error::InvalidConfig("network has no encoder stages".into()))?;

        for (level, (decoder, skip)) in self.decoders.iter().zip(features.iter().rev()).enumerate() {
            x = decoder.forward(skip, &x)?;
            trace!(level, shape = ?x.shape(), "decoder stage");
        }

        let x = self.final_conv.forward(&x)?;
        Ok(tensor::softmax_channels(&x))
    }

    fn num_params(&self) -> usize {
        self.encoders.iter().map(Module::num_params).sum::<usize>()
            + self.decoders.iter().map(Decoder::num_params).sum::<usize>()
            + self.final_conv.num_params()
    }
}
