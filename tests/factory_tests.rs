use ndarray::{ArrayD, IxDyn, array};
use volseg::{
    Error, Metric, MetricKind, MetricParams, MetricValue, MetricsFactory, Output, Reduction,
    to_onehot,
};

fn batch(preds: Vec<usize>, targets: Vec<usize>, num_classes: usize) -> Output {
    let shape = [1, preds.len()];
    let preds = ArrayD::from_shape_vec(IxDyn(&shape), preds).unwrap();
    let y = ArrayD::from_shape_vec(IxDyn(&shape), targets).unwrap();
    Output::new(to_onehot(&preds, num_classes).unwrap(), y)
}

/// Always reports the same value
struct Constant(f64);

impl Metric for Constant {
    fn name(&self) -> &'static str {
        "Constant"
    }

    fn reset(&mut self) {}

    fn update(&mut self, _output: Output) -> volseg::Result<()> {
        Ok(())
    }

    fn compute(&self) -> volseg::Result<MetricValue> {
        Ok(MetricValue::Scalar(self.0))
    }
}

#[test]
fn test_create_dice_by_name_and_kind() {
    let factory = MetricsFactory::new();
    let params = MetricParams::new(3);

    let by_name = factory.create_metric("Dice", &params).unwrap();
    let by_kind = factory.create_metric(MetricKind::Dice, &params).unwrap();
    assert_eq!(by_name.name(), "Dice");
    assert_eq!(by_kind.name(), "Dice");

    let generalized = factory
        .create_metric(MetricKind::GeneralizedDice, &params)
        .unwrap();
    assert_eq!(generalized.name(), "GeneralizedDice");
}

#[test]
fn test_created_metric_is_usable() {
    let factory = MetricsFactory::new();
    let params = MetricParams::new(3)
        .with_reduction(Reduction::Mean)
        .with_ignore_index(0);

    let mut dice = factory.create_metric("Dice", &params).unwrap();
    dice.update(batch(vec![0, 1, 2], vec![0, 1, 2], 3)).unwrap();
    let value = dice.compute().unwrap().as_scalar().unwrap();
    assert!((value - 1.0).abs() < 1e-9);

    let mut generalized = factory.create_metric("GeneralizedDice", &params).unwrap();
    generalized
        .update_weighted(batch(vec![0, 1, 2], vec![0, 1, 2], 3), array![1.0, 1.0, 1.0])
        .unwrap();
    assert!(generalized.compute().unwrap().as_scalar().is_some());
}

#[test]
fn test_unknown_metric() {
    let factory = MetricsFactory::new();
    let err = factory
        .create_metric("HausdorffDistance", &MetricParams::new(2))
        .err()
        .unwrap();
    assert!(matches!(err, Error::UnknownMetric(name) if name == "HausdorffDistance"));
}

#[test]
fn test_constructor_errors_propagate() {
    let factory = MetricsFactory::new();
    let params = MetricParams::new(2).with_ignore_index(5);

    let err = factory.create_metric("Dice", &params).err().unwrap();
    assert!(matches!(err, Error::IgnoreIndexOutOfRange { .. }));
}

#[test]
fn test_builtin_names() {
    let factory = MetricsFactory::new();
    let names = factory.names();

    assert_eq!(names.len(), MetricKind::ALL.len());
    for kind in MetricKind::ALL {
        assert!(factory.contains(kind), "missing {kind}");
    }
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);
}

#[test]
fn test_register_custom_metric() {
    let mut factory = MetricsFactory::new();
    assert!(!factory.contains("Constant"));

    factory.register("Constant", |_: &MetricParams| {
        Ok(Box::new(Constant(0.25)) as Box<dyn Metric>)
    });
    let metric = factory
        .create_metric("Constant", &MetricParams::default())
        .unwrap();
    assert_eq!(metric.compute().unwrap().as_scalar(), Some(0.25));
}

#[test]
fn test_register_overwrites() {
    let mut factory = MetricsFactory::new();
    factory.register(MetricKind::Dice, |_: &MetricParams| {
        Ok(Box::new(Constant(1.0)) as Box<dyn Metric>)
    });
    factory.register(MetricKind::Dice, |_: &MetricParams| {
        Ok(Box::new(Constant(2.0)) as Box<dyn Metric>)
    });

    let metric = factory.create_metric("Dice", &MetricParams::new(2)).unwrap();
    assert_eq!(metric.name(), "Constant");
    assert_eq!(metric.compute().unwrap().as_scalar(), Some(2.0));
    assert_eq!(factory.names().len(), MetricKind::ALL.len());
}

#[test]
fn test_mean_iou_is_scalar() {
    let factory = MetricsFactory::new();
    let params = MetricParams::new(2);

    let mut iou = factory.create_metric(MetricKind::IoU, &params).unwrap();
    let mut miou = factory.create_metric(MetricKind::MeanIoU, &params).unwrap();
    for metric in [&mut iou, &mut miou] {
        metric.update(batch(vec![0, 1, 1, 1], vec![0, 0, 1, 1], 2)).unwrap();
    }

    let per_class = iou.compute().unwrap();
    assert_eq!(per_class.as_per_class().unwrap().len(), 2);

    // IoU: [1/2, 2/3]
    let mean = miou.compute().unwrap().as_scalar().unwrap();
    assert!((mean - (0.5 + 2.0 / 3.0) / 2.0).abs() < 1e-9);
}

#[test]
fn test_accuracy_is_scalar() {
    let factory = MetricsFactory::new();
    let mut accuracy = factory
        .create_metric(MetricKind::Accuracy, &MetricParams::new(2))
        .unwrap();
    accuracy.update(batch(vec![0, 1, 1, 1], vec![0, 0, 1, 1], 2)).unwrap();

    let value = accuracy.compute().unwrap().as_scalar().unwrap();
    assert!((value - 0.75).abs() < 1e-9);
}

#[test]
fn test_metric_kind_parsing() {
    assert_eq!("mIoU".parse::<MetricKind>().unwrap(), MetricKind::MeanIoU);
    assert_eq!(MetricKind::GeneralizedDice.to_string(), "GeneralizedDice");
    assert!(matches!(
        "dice".parse::<MetricKind>(),
        Err(Error::UnknownMetric(_))
    ));
}

#[test]
fn test_output_transform_reaches_created_metrics() {
    let factory = MetricsFactory::new();
    // score the targets instead of the predictions
    let params = MetricParams::new(2).with_output_transform(|output: Output| {
        let y_pred = to_onehot(&output.y, 2).unwrap();
        Output::new(y_pred, output.y)
    });
    assert!(params.output_transform.is_some());

    let mut dice = factory.create_metric("Dice", &params).unwrap();
    let mut accuracy = factory.create_metric(MetricKind::Accuracy, &params).unwrap();
    let mut generalized = factory
        .create_metric(MetricKind::GeneralizedDice, &params)
        .unwrap();

    let wrong = || batch(vec![1, 1, 0, 0], vec![0, 0, 1, 1], 2);
    dice.update(wrong()).unwrap();
    accuracy.update(wrong()).unwrap();
    generalized
        .update_weighted(wrong(), array![1.0, 1.0])
        .unwrap();

    let dice = dice.compute().unwrap();
    assert!(dice.as_per_class().unwrap().iter().all(|d| (d - 1.0).abs() < 1e-9));
    let accuracy = accuracy.compute().unwrap().as_scalar().unwrap();
    assert!((accuracy - 1.0).abs() < 1e-9);
    let generalized = generalized.compute().unwrap();
    assert!(generalized.as_per_class().unwrap().iter().all(|d| (d - 1.0).abs() < 1e-9));

    // without the hook the same batch scores zero
    let mut plain = factory.create_metric("Dice", &MetricParams::new(2)).unwrap();
    plain.update(wrong()).unwrap();
    let plain = plain.compute().unwrap();
    assert!(plain.as_per_class().unwrap().iter().all(|&d| d == 0.0));
}
