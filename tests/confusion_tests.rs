use ndarray::{ArrayD, IxDyn, array};
use volseg::{Average, ConfusionMatrix, Error, Output, to_onehot};

/// Scores peaked at `preds`, paired with `targets`
fn batch(preds: Vec<usize>, targets: Vec<usize>, shape: &[usize], num_classes: usize) -> Output {
    let preds = ArrayD::from_shape_vec(IxDyn(shape), preds).unwrap();
    let y = ArrayD::from_shape_vec(IxDyn(shape), targets).unwrap();
    Output::new(to_onehot(&preds, num_classes).unwrap(), y)
}

#[test]
fn test_counts_rows_are_targets() {
    let mut cm = ConfusionMatrix::new(3);
    cm.update(batch(vec![0, 1, 1, 2], vec![0, 1, 2, 2], &[1, 4], 3))
        .unwrap();

    let expected = array![[1u64, 0, 0], [0, 1, 0], [0, 1, 1]];
    assert_eq!(cm.counts(), &expected);
    assert_eq!(cm.num_examples(), 1);

    let computed = cm.compute().unwrap();
    assert_eq!(computed, expected.mapv(|v| v as f64));
}

#[test]
fn test_accumulates_across_batches() {
    let mut cm = ConfusionMatrix::new(2);
    cm.update(batch(vec![0, 1], vec![0, 1], &[2, 1], 2)).unwrap();
    cm.update(batch(vec![1, 1], vec![0, 1], &[2, 1], 2)).unwrap();

    assert_eq!(cm.counts(), &array![[1u64, 1], [0, 2]]);
    assert_eq!(cm.num_examples(), 4);
}

#[test]
fn test_targets_out_of_range_are_skipped() {
    let mut cm = ConfusionMatrix::new(2);
    cm.update(batch(vec![0, 1, 1], vec![0, 5, 1], &[1, 3], 2))
        .unwrap();

    assert_eq!(cm.counts().sum(), 2);
}

#[test]
fn test_volumetric_batch() {
    let mut cm = ConfusionMatrix::new(2);
    let preds = vec![0, 1, 0, 1, 0, 1, 0, 1];
    cm.update(batch(preds.clone(), preds, &[1, 2, 2, 2], 2))
        .unwrap();

    assert_eq!(cm.counts(), &array![[4u64, 0], [0, 4]]);
}

#[test]
fn test_average_samples() {
    let mut cm = ConfusionMatrix::new(2).with_average(Some(Average::Samples));
    cm.update(batch(vec![0, 1, 1, 1], vec![0, 1, 0, 1], &[2, 2], 2))
        .unwrap();

    // 2 examples in the batch
    let m = cm.compute().unwrap();
    assert_eq!(m, array![[0.5, 0.5], [0.0, 1.0]]);
}

#[test]
fn test_average_recall_and_precision() {
    let output = || batch(vec![0, 1, 1, 2], vec![0, 1, 2, 2], &[1, 4], 3);

    let mut recall = ConfusionMatrix::new(3).with_average(Some(Average::Recall));
    recall.update(output()).unwrap();
    let m = recall.compute().unwrap();
    assert!((m[[2, 1]] - 0.5).abs() < 1e-12);
    assert!((m[[2, 2]] - 0.5).abs() < 1e-12);
    assert!((m[[1, 1]] - 1.0).abs() < 1e-12);

    let mut precision = ConfusionMatrix::new(3).with_average(Some(Average::Precision));
    precision.update(output()).unwrap();
    let m = precision.compute().unwrap();
    assert!((m[[1, 1]] - 0.5).abs() < 1e-12);
    assert!((m[[2, 1]] - 0.5).abs() < 1e-12);
    assert!((m[[2, 2]] - 1.0).abs() < 1e-12);
}

#[test]
fn test_reset() {
    let mut cm = ConfusionMatrix::new(2);
    cm.update(batch(vec![0, 1], vec![0, 1], &[1, 2], 2)).unwrap();
    cm.reset();

    assert_eq!(cm.counts().sum(), 0);
    assert_eq!(cm.num_examples(), 0);
    assert!(matches!(cm.compute(), Err(Error::NotComputable)));
}

#[test]
fn test_shape_checks() {
    let mut cm = ConfusionMatrix::new(3);

    // two classes of scores for a three-class matrix
    let err = cm
        .update(batch(vec![0, 1], vec![0, 1], &[1, 2], 2))
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));

    let y_pred = ArrayD::zeros(IxDyn(&[1, 3, 2]));
    let y = ArrayD::zeros(IxDyn(&[1, 3]));
    assert!(cm.update(Output::new(y_pred, y)).is_err());

    let y_pred = ArrayD::zeros(IxDyn(&[3]));
    let y = ArrayD::zeros(IxDyn(&[1]));
    assert!(cm.update(Output::new(y_pred, y)).is_err());

    assert_eq!(cm.num_examples(), 0);
}

#[test]
fn test_output_transform_runs_before_accumulation() {
    // replace predictions with the targets
    let mut cm = ConfusionMatrix::new(2).with_output_transform(|output: Output| {
        let y_pred = to_onehot(&output.y, 2).unwrap();
        Output::new(y_pred, output.y)
    });
    cm.update(batch(vec![1, 1, 1], vec![0, 0, 1], &[1, 3], 2))
        .unwrap();

    assert_eq!(cm.counts(), &array![[2u64, 0], [0, 1]]);
}

#[test]
fn test_average_parsing() {
    assert_eq!("recall".parse::<Average>().unwrap(), Average::Recall);
    assert_eq!(Average::Samples.to_string(), "samples");
    assert!("micro".parse::<Average>().is_err());
}
