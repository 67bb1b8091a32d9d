//! Network topology configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationKind {
    ReLU,
    LeakyReLU,
    PReLU,
}

impl ActivationKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActivationKind::ReLU => "ReLU",
            ActivationKind::LeakyReLU => "LeakyReLU",
            ActivationKind::PReLU => "PReLU",
        }
    }
}

impl FromStr for ActivationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ReLU" => Ok(ActivationKind::ReLU),
            "LeakyReLU" => Ok(ActivationKind::LeakyReLU),
            "PReLU" => Ok(ActivationKind::PReLU),
            other => Err(Error::UnknownLayer {
                kind: "activation",
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolingKind {
    MaxPool3d,
    AvgPool3d,
    /// Strided convolution
    Conv3d,
}

impl PoolingKind {
    pub fn name(&self) -> &'static str {
        match self {
            PoolingKind::MaxPool3d => "MaxPool3d",
            PoolingKind::AvgPool3d => "AvgPool3d",
            PoolingKind::Conv3d => "Conv3d",
        }
    }
}

impl FromStr for PoolingKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MaxPool3d" => Ok(PoolingKind::MaxPool3d),
            "AvgPool3d" => Ok(PoolingKind::AvgPool3d),
            "Conv3d" => Ok(PoolingKind::Conv3d),
            other => Err(Error::UnknownLayer {
                kind: "pooling",
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for PoolingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Topology of a [`UNet3D`](crate::UNet3D).
///
/// Built once (usually deserialized from a configuration file) and only read
/// while the network is assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfiguration {
    /// Width of the first encoder stage; doubles at every level
    pub feature_maps: usize,
    pub num_levels: usize,
    pub in_channels: usize,
    /// Number of target classes
    pub out_channels: usize,
    pub conv_kernel_size: usize,
    /// GroupNorm group count; BatchNorm3d is used when absent
    pub num_groups: Option<usize>,
    /// Replication padding (left, right, top, bottom, front, back).
    /// When absent every convolution uses a fixed zero padding of 1.
    pub padding: Option<[usize; 6]>,
    pub activation: Option<ActivationKind>,
    pub pooling_type: PoolingKind,
    pub pool_kernel_size: usize,
    /// Nearest-neighbour upsampling with concatenation when true,
    /// transposed convolution with summation otherwise
    pub interpolation: bool,
    pub scale_factor: usize,
}

impl Default for ModelConfiguration {
    fn default() -> Self {
        Self {
            feature_maps: 32,
            num_levels: 4,
            in_channels: 1,
            out_channels: 4,
            conv_kernel_size: 3,
            num_groups: Some(8),
            padding: Some([1; 6]),
            activation: Some(ActivationKind::ReLU),
            pooling_type: PoolingKind::MaxPool3d,
            pool_kernel_size: 2,
            interpolation: true,
            scale_factor: 2,
        }
    }
}

impl ModelConfiguration {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("feature_maps", self.feature_maps),
            ("num_levels", self.num_levels),
            ("in_channels", self.in_channels),
            ("out_channels", self.out_channels),
            ("conv_kernel_size", self.conv_kernel_size),
            ("pool_kernel_size", self.pool_kernel_size),
            ("scale_factor", self.scale_factor),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidConfig(format!("{field} must be positive")));
        }
        // widest encoder stage is feature_maps * 2^(num_levels - 1)
        let widest = u32::try_from(self.num_levels - 1)
            .ok()
            .and_then(|shift| 1usize.checked_shl(shift))
            .and_then(|scale| self.feature_maps.checked_mul(scale));
        if widest.is_none() {
            return Err(Error::InvalidConfig(format!(
                "{} levels starting at {} feature maps overflow the channel count",
                self.num_levels, self.feature_maps
            )));
        }
        if self.num_groups == Some(0) {
            return Err(Error::InvalidConfig("num_groups must be positive".into()));
        }
        Ok(())
    }
}
