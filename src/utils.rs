use ndarray::{ArrayD, Axis, Dimension, IxDyn};

use crate::error::{Error, Result};

/// Converts class indices of shape `(N, ...)` to one-hot indicators of shape
/// `(N, num_classes, ...)`.
pub fn to_onehot(indices: &ArrayD<usize>, num_classes: usize) -> Result<ArrayD<f32>> {
    let shape = indices.shape();
    if shape.is_empty() {
        return Err(Error::shape("indices of shape (N, ...)", "a scalar"));
    }

    let mut onehot_shape = Vec::with_capacity(shape.len() + 1);
    onehot_shape.push(shape[0]);
    onehot_shape.push(num_classes);
    onehot_shape.extend_from_slice(&shape[1..]);

    let mut onehot = ArrayD::zeros(IxDyn(&onehot_shape));
    let mut position = vec![0; onehot_shape.len()];

    for (index, &class) in indices.indexed_iter() {
        if class >= num_classes {
            return Err(Error::ClassOutOfRange {
                value: class,
                num_classes,
            });
        }
        let index = index.slice();
        position[0] = index[0];
        position[1] = class;
        position[2..].copy_from_slice(&index[1..]);
        onehot[IxDyn(&position)] = 1.0;
    }

    Ok(onehot)
}

/// Index of the first maximum along `axis`; the axis is removed from the result.
pub fn argmax(x: &ArrayD<f32>, axis: usize) -> Result<ArrayD<usize>> {
    if axis >= x.ndim() {
        return Err(Error::shape(
            format!("an array with more than {axis} dimensions"),
            format!("{:?}", x.shape()),
        ));
    }
    if x.len_of(Axis(axis)) == 0 {
        return Err(Error::shape("a non-empty reduction axis", format!("{:?}", x.shape())));
    }

    Ok(x.map_axis(Axis(axis), |lane| {
        lane.iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                if v > max { (i, v) } else { (best, max) }
            })
            .0
    }))
}
