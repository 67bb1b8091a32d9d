//! Forward kernels over volumetric batches laid out as `(N, C, D, H, W)`.

use ndarray::{Array1, Array2, Array5, ArrayView3, ArrayView4, Axis, Zip, s};

use crate::error::{Error, Result};

/// Spatial extent `(D, H, W)` of a volumetric batch.
pub fn spatial_dims(x: &Array5<f32>) -> [usize; 3] {
    let (_, _, d, h, w) = x.dim();
    [d, h, w]
}

/// Pads every spatial border with zeros.
pub fn zero_pad3d(x: &Array5<f32>, pad: usize) -> Array5<f32> {
    let (n, c, d, h, w) = x.dim();
    let mut out = Array5::zeros((n, c, d + 2 * pad, h + 2 * pad, w + 2 * pad));
    out.slice_mut(s![.., .., pad..pad + d, pad..pad + h, pad..pad + w])
        .assign(x);
    out
}

/// Pads by repeating the border voxels.
///
/// `padding` follows the `(left, right, top, bottom, front, back)` order,
/// i.e. W first, then H, then D.
pub fn replication_pad3d(x: &Array5<f32>, padding: [usize; 6]) -> Result<Array5<f32>> {
    let (n, c, d, h, w) = x.dim();
    if d == 0 || h == 0 || w == 0 {
        return Err(Error::shape("non-empty spatial dims", format!("{:?}", x.shape())));
    }
    let [left, right, top, bottom, front, back] = padding;
    let shape = (n, c, d + front + back, h + top + bottom, w + left + right);

    Ok(Array5::from_shape_fn(shape, |(b, ch, z, y, xx)| {
        let sz = z.saturating_sub(front).min(d - 1);
        let sy = y.saturating_sub(top).min(h - 1);
        let sx = xx.saturating_sub(left).min(w - 1);
        x[[b, ch, sz, sy, sx]]
    }))
}

/// Unfolds one sample `(C, D, H, W)` into a `(C * kd * kh * kw, od * oh * ow)` patch matrix.
fn im2col(
    x: ArrayView4<f32>,
    kernel: (usize, usize, usize),
    stride: usize,
    out: (usize, usize, usize),
) -> Array2<f32> {
    let (c, _, _, _) = x.dim();
    let (kd, kh, kw) = kernel;
    let (od, oh, ow) = out;

    Array2::from_shape_fn((c * kd * kh * kw, od * oh * ow), |(row, col)| {
        let kx = row % kw;
        let ky = (row / kw) % kh;
        let kz = (row / (kw * kh)) % kd;
        let ch = row / (kw * kh * kd);

        let ox = col % ow;
        let oy = (col / ow) % oh;
        let oz = col / (ow * oh);

        x[[ch, oz * stride + kz, oy * stride + ky, ox * stride + kx]]
    })
}

/// 3D cross-correlation with zero padding.
///
/// `weight` is `(C_out, C_in, kD, kH, kW)`.
pub fn conv3d(
    input: &Array5<f32>,
    weight: &Array5<f32>,
    bias: Option<&Array1<f32>>,
    stride: usize,
    padding: usize,
) -> Result<Array5<f32>> {
    let (n, c_in, _, _, _) = input.dim();
    let (c_out, w_in, kd, kh, kw) = weight.dim();
    if c_in != w_in {
        return Err(Error::shape(
            format!("{w_in} input channels"),
            format!("{c_in} channels"),
        ));
    }
    if stride == 0 {
        return Err(Error::InvalidConfig("convolution stride must be positive".into()));
    }

    let padded;
    let x = if padding > 0 {
        padded = zero_pad3d(input, padding);
        &padded
    } else {
        input
    };

    let [d, h, w] = spatial_dims(x);
    if d < kd || h < kh || w < kw {
        return Err(Error::shape(
            format!("spatial dims of at least ({kd}, {kh}, {kw})"),
            format!("({d}, {h}, {w})"),
        ));
    }
    let (od, oh, ow) = ((d - kd) / stride + 1, (h - kh) / stride + 1, (w - kw) / stride + 1);

    let kernel = weight.to_shape((c_out, c_in * kd * kh * kw))?;
    let mut output = Array5::zeros((n, c_out, od, oh, ow));

    for b in 0..n {
        let cols = im2col(x.index_axis(Axis(0), b), (kd, kh, kw), stride, (od, oh, ow));
        let mut out = kernel.dot(&cols);
        if let Some(bias) = bias {
            for (mut row, &bv) in out.outer_iter_mut().zip(bias.iter()) {
                row += bv;
            }
        }
        output
            .index_axis_mut(Axis(0), b)
            .assign(&out.into_shape_with_order((c_out, od, oh, ow))?);
    }

    Ok(output)
}

/// Output length of a transposed convolution along one axis.
pub fn conv_transpose_len(
    len: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    output_padding: usize,
) -> Option<usize> {
    ((len.checked_sub(1)? * stride) + kernel + output_padding).checked_sub(2 * padding)
}

/// 3D transposed convolution.
///
/// `weight` is `(C_in, C_out, kD, kH, kW)`; output length per axis is
/// `(L - 1) * stride - 2 * padding + kernel + output_padding`.
pub fn conv_transpose3d(
    input: &Array5<f32>,
    weight: &Array5<f32>,
    bias: Option<&Array1<f32>>,
    stride: usize,
    padding: usize,
    output_padding: usize,
) -> Result<Array5<f32>> {
    let (n, c_in, d, h, w) = input.dim();
    let (w_in, c_out, kd, kh, kw) = weight.dim();
    if c_in != w_in {
        return Err(Error::shape(
            format!("{w_in} input channels"),
            format!("{c_in} channels"),
        ));
    }

    let out_len = |len, k| conv_transpose_len(len, k, stride, padding, output_padding);
    let (od, oh, ow) = match (out_len(d, kd), out_len(h, kh), out_len(w, kw)) {
        (Some(od), Some(oh), Some(ow)) if od > 0 && oh > 0 && ow > 0 => (od, oh, ow),
        _ => {
            return Err(Error::shape(
                "a positive transposed convolution output",
                format!("input ({d}, {h}, {w}) with kernel ({kd}, {kh}, {kw})"),
            ));
        }
    };

    let kernel = weight.to_shape((c_in, c_out * kd * kh * kw))?;
    let mut output = Array5::zeros((n, c_out, od, oh, ow));

    for b in 0..n {
        let sample = input.index_axis(Axis(0), b);
        let sample = sample.to_shape((c_in, d * h * w))?;
        // (C_out * k^3, D * H * W): each column holds the contributions of one input voxel
        let cols = kernel.t().dot(&sample);

        let mut out = output.index_axis_mut(Axis(0), b);
        for ((row, col), &v) in cols.indexed_iter() {
            let kx = row % kw;
            let ky = (row / kw) % kh;
            let kz = (row / (kw * kh)) % kd;
            let co = row / (kw * kh * kd);

            let ix = col % w;
            let iy = (col / w) % h;
            let iz = col / (w * h);

            let (Some(z), Some(y), Some(x)) = (
                (iz * stride + kz).checked_sub(padding),
                (iy * stride + ky).checked_sub(padding),
                (ix * stride + kx).checked_sub(padding),
            ) else {
                continue;
            };
            if z < od && y < oh && x < ow {
                out[[co, z, y, x]] += v;
            }
        }
    }

    if let Some(bias) = bias {
        for (c, &bv) in bias.iter().enumerate() {
            let mut channel = output.index_axis_mut(Axis(1), c);
            channel += bv;
        }
    }

    Ok(output)
}

fn pool3d(
    x: &Array5<f32>,
    kernel: usize,
    stride: usize,
    reduce: impl Fn(ArrayView3<f32>) -> f32,
) -> Result<Array5<f32>> {
    let (n, c, d, h, w) = x.dim();
    if kernel == 0 || stride == 0 {
        return Err(Error::InvalidConfig(
            "pooling kernel and stride must be positive".into(),
        ));
    }
    if d < kernel || h < kernel || w < kernel {
        return Err(Error::shape(
            format!("spatial dims of at least {kernel}"),
            format!("({d}, {h}, {w})"),
        ));
    }
    let shape = (
        n,
        c,
        (d - kernel) / stride + 1,
        (h - kernel) / stride + 1,
        (w - kernel) / stride + 1,
    );

    Ok(Array5::from_shape_fn(shape, |(b, ch, z, y, xx)| {
        let (z0, y0, x0) = (z * stride, y * stride, xx * stride);
        reduce(x.slice(s![b, ch, z0..z0 + kernel, y0..y0 + kernel, x0..x0 + kernel]))
    }))
}

pub fn max_pool3d(x: &Array5<f32>, kernel: usize, stride: usize) -> Result<Array5<f32>> {
    pool3d(x, kernel, stride, |window| {
        window.fold(f32::NEG_INFINITY, |m, &v| m.max(v))
    })
}

pub fn avg_pool3d(x: &Array5<f32>, kernel: usize, stride: usize) -> Result<Array5<f32>> {
    pool3d(x, kernel, stride, |window| window.mean().unwrap_or(0.0))
}

/// Nearest-neighbour resize of the spatial dims to `size`.
pub fn interpolate_nearest(x: &Array5<f32>, size: [usize; 3]) -> Array5<f32> {
    let (n, c, d, h, w) = x.dim();
    let [td, th, tw] = size;
    Array5::from_shape_fn((n, c, td, th, tw), |(b, ch, z, y, xx)| {
        x[[b, ch, z * d / td, y * h / th, xx * w / tw]]
    })
}

/// Crops, or extends by repeating the trailing border, so the spatial dims equal `size`.
pub fn fit_spatial(x: &Array5<f32>, size: [usize; 3]) -> Result<Array5<f32>> {
    let (n, c, d, h, w) = x.dim();
    if spatial_dims(x) == size {
        return Ok(x.clone());
    }
    if d == 0 || h == 0 || w == 0 {
        return Err(Error::shape("non-empty spatial dims", format!("{:?}", x.shape())));
    }
    let [td, th, tw] = size;
    Ok(Array5::from_shape_fn((n, c, td, th, tw), |(b, ch, z, y, xx)| {
        x[[b, ch, z.min(d - 1), y.min(h - 1), xx.min(w - 1)]]
    }))
}

/// Concatenates two batches along the channel axis.
pub fn concat_channels(a: &Array5<f32>, b: &Array5<f32>) -> Result<Array5<f32>> {
    Ok(ndarray::concatenate(Axis(1), &[a.view(), b.view()])?)
}

/// Elementwise sum of two batches of identical shape.
pub fn add(a: &Array5<f32>, b: &Array5<f32>) -> Result<Array5<f32>> {
    if a.dim() != b.dim() {
        return Err(Error::shape(format!("{:?}", b.shape()), format!("{:?}", a.shape())));
    }
    Ok(Zip::from(a).and(b).map_collect(|&x, &y| x + y))
}

/// Softmax across the channel axis at every voxel.
pub fn softmax_channels(x: &Array5<f32>) -> Array5<f32> {
    let mut out = x.clone();
    for mut lane in out.lanes_mut(Axis(1)) {
        // Numerically stable softmax: subtract the max of each lane
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    out
}
