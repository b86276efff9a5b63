use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::InMemDataset;
use burn::module::AutodiffModule;
use burn::optim::{Optimizer, SgdConfig};
use burn::prelude::*;
use image::{Rgb, Rgb32FImage};

use fashion_attrs::data::{ClassificationBatcher, FashionItem};
use fashion_attrs::model::{Backbone, ResNet};
use fashion_attrs::pretrained::{has_checkpoint, load_checkpoint, save_checkpoint};
use fashion_attrs::training::{output_rows, train_step, validate};

type B = NdArray<f32>;
type AB = Autodiff<B>;

const SIZE: u32 = 32;

fn item(shade: f32, label: usize) -> FashionItem {
    let img = Rgb32FImage::from_fn(SIZE, SIZE, |x, y| {
        Rgb([shade, x as f32 / SIZE as f32, y as f32 / SIZE as f32])
    });
    FashionItem::new(&img, label)
}

fn flat(output: Tensor<B, 2>) -> Vec<f32> {
    output_rows(output).unwrap().concat()
}

#[test]
fn forward_gives_one_row_per_image() {
    let device = NdArrayDevice::Cpu;
    let model = ResNet::<B>::new(Backbone::ResNet18, 5, &device);
    let batcher = ClassificationBatcher::<B>::new(device);

    let batch = batcher.batch(vec![item(0.1, 0), item(0.9, 4)]);
    assert_eq!(batch.images.dims(), [2, 3, SIZE as usize, SIZE as usize]);

    let output = model.forward(batch.images);
    assert_eq!(output.dims(), [2, 5]);
}

#[test]
fn new_head_matches_task_classes() {
    let device = NdArrayDevice::Cpu;
    let model = ResNet::<B>::new(Backbone::ResNet18, 1000, &device).with_head(8, &device);
    assert_eq!(model.num_classes(), 8);

    let batcher = ClassificationBatcher::<B>::new(device);
    let output = model.forward(batcher.batch(vec![item(0.5, 3)]).images);
    assert_eq!(output.dims(), [1, 8]);
}

#[test]
fn checkpoint_reload_is_stable() {
    let device = NdArrayDevice::Cpu;
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");

    let model = ResNet::<B>::new(Backbone::ResNet18, 6, &device);
    save_checkpoint(&model, &first).unwrap();
    assert!(has_checkpoint(&first));

    // Stored precision is lossy once, then exact.
    let loaded = load_checkpoint::<B>(Backbone::ResNet18, 6, &first, &device).unwrap();
    save_checkpoint(&loaded, &second).unwrap();
    let reloaded = load_checkpoint::<B>(Backbone::ResNet18, 6, &second, &device).unwrap();

    let batcher = ClassificationBatcher::<B>::new(device);
    let images = batcher.batch(vec![item(0.2, 0), item(0.7, 1)]).images;
    assert_eq!(
        flat(loaded.forward(images.clone())),
        flat(reloaded.forward(images))
    );
}

#[test]
fn missing_checkpoint_fails_to_load() {
    let device = NdArrayDevice::Cpu;
    let dir = tempfile::tempdir().unwrap();
    let stem = dir.path().join("absent");
    assert!(!has_checkpoint(&stem));
    assert!(load_checkpoint::<B>(Backbone::ResNet18, 5, &stem, &device).is_err());
}

#[test]
fn sharded_step_updates_the_model() {
    let device = NdArrayDevice::Cpu;
    let devices = vec![device, device];
    let model = ResNet::<AB>::new(Backbone::ResNet18, 5, &device);
    let batcher = ClassificationBatcher::<AB>::new(device);
    let reference = ClassificationBatcher::<B>::new(device)
        .batch(vec![item(0.3, 0)])
        .images;

    let before = flat(model.valid().forward(reference.clone()));

    let batch = batcher.batch(vec![item(0.1, 2), item(0.5, 0), item(0.9, 4)]);
    let step = train_step(&model, batch, &devices).unwrap();
    assert_eq!(step.labels, vec![2, 0, 4]);
    assert_eq!(step.outputs.len(), 3);
    assert!(step.outputs.iter().all(|row| row.len() == 5));
    assert!(step.loss.is_finite() && step.loss > 0.0);

    let mut optim = SgdConfig::new().init::<AB, ResNet<AB>>();
    let model = optim.step(0.1, model, step.grads);

    let after = flat(model.valid().forward(reference));
    assert!(before.iter().zip(&after).any(|(a, b)| (a - b).abs() > 0.0));
}

#[test]
fn validation_covers_every_sample() {
    let device = NdArrayDevice::Cpu;
    let model = ResNet::<B>::new(Backbone::ResNet18, 5, &device);
    let dataset = InMemDataset::new(vec![
        item(0.1, 0),
        item(0.3, 1),
        item(0.5, 2),
        item(0.7, 3),
        item(0.9, 4),
    ]);
    let dataloader = DataLoaderBuilder::new(ClassificationBatcher::<B>::new(device))
        .batch_size(2)
        .build(dataset);

    let metrics = validate(&model, &dataloader, &[device]).unwrap();
    assert_eq!(metrics.batches(), 3);
    assert!((0.0..=1.0).contains(&metrics.accuracy()));
    // Reciprocal ranks over five classes are never below 1/5.
    assert!(metrics.map() >= 0.2 && metrics.map() <= 1.0);
    assert!(metrics.loss().is_finite());
}
