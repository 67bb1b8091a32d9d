use ndarray::{Array2, ArrayD, Axis, IxDyn};
use volseg::{Error, argmax, to_onehot};

#[test]
fn test_onehot_identity() {
    let indices = ArrayD::from_shape_vec(IxDyn(&[4]), vec![0, 1, 2, 3]).unwrap();
    let onehot = to_onehot(&indices, 4).unwrap();

    assert_eq!(onehot.shape(), &[4, 4]);
    let identity = Array2::<f32>::eye(4).into_dyn();
    assert_eq!(onehot, identity);
}

#[test]
fn test_onehot_inserts_class_axis() {
    let indices = ArrayD::from_shape_vec(IxDyn(&[2, 2, 3]), vec![0, 1, 2, 2, 1, 0, 1, 1, 1, 0, 0, 2])
        .unwrap();
    let onehot = to_onehot(&indices, 3).unwrap();

    assert_eq!(onehot.shape(), &[2, 3, 2, 3]);
    // one hot per voxel
    for lane in onehot.lanes(Axis(1)) {
        assert_eq!(lane.sum(), 1.0);
    }
    assert_eq!(onehot[[0, 2, 0, 2]], 1.0);
    assert_eq!(onehot[[1, 1, 0, 0]], 1.0);
}

#[test]
fn test_argmax_inverts_onehot() {
    let values: Vec<usize> = (0..2 * 4 * 4 * 4).map(|v| (v * 7 + v / 3) % 5).collect();
    let indices = ArrayD::from_shape_vec(IxDyn(&[2, 4, 4, 4]), values).unwrap();

    let onehot = to_onehot(&indices, 5).unwrap();
    assert_eq!(onehot.shape(), &[2, 5, 4, 4, 4]);
    assert_eq!(argmax(&onehot, 1).unwrap(), indices);
}

#[test]
fn test_onehot_rejects_out_of_range_class() {
    let indices = ArrayD::from_shape_vec(IxDyn(&[3]), vec![0, 4, 1]).unwrap();
    let err = to_onehot(&indices, 4).unwrap_err();
    assert!(matches!(
        err,
        Error::ClassOutOfRange {
            value: 4,
            num_classes: 4
        }
    ));
}

#[test]
fn test_onehot_rejects_scalar() {
    let indices = ArrayD::from_elem(IxDyn(&[]), 0usize);
    assert!(matches!(
        to_onehot(&indices, 2),
        Err(Error::ShapeMismatch { .. })
    ));
}

#[test]
fn test_argmax_picks_first_maximum() {
    let x = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 5.0, 5.0, -1.0, -3.0, -2.0]).unwrap();
    let idx = argmax(&x, 1).unwrap();
    assert_eq!(idx.iter().copied().collect::<Vec<_>>(), vec![1, 0]);

    assert!(argmax(&x, 2).is_err());
    let empty = ArrayD::<f32>::zeros(IxDyn(&[2, 0]));
    assert!(argmax(&empty, 1).is_err());
}
