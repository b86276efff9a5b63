use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rayon::prelude::*;

use crate::{
    config::TrainingConfig,
    data::{ClassificationBatcher, FashionBatch},
    dataset::{ImageFolder, LoadImage, Split},
    error::{FashionError, Result},
    metrics::EpochMetrics,
    model::ResNet,
    parallel::shard,
    pretrained::save_checkpoint,
    schedule::{EarlyStopping, StepDecay, Verdict},
};

/// Score rows of a `[N, C]` output, one `Vec` per sample.
pub fn output_rows<B: Backend>(output: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, classes] = output.dims();
    let values = output
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| FashionError::TensorData(format!("{err:?}")))?;
    Ok(values.chunks(classes.max(1)).map(<[f32]>::to_vec).collect())
}

pub fn target_labels<B: Backend>(targets: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let values = targets
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| FashionError::TensorData(format!("{err:?}")))?;
    Ok(values.into_iter().map(|v| v as usize).collect())
}

/// Outcome of one optimisation step.
pub struct StepOutput {
    pub grads: GradientsParams,
    pub labels: Vec<usize>,
    pub outputs: Vec<Vec<f32>>,
    pub loss: f64,
}

/// Forward and backward a batch split across `devices`, with gradients
/// gathered on the first device.
///
/// Each shard's mean loss is scaled by its share of the batch, so the
/// accumulated gradient is the gradient of the whole-batch mean loss.
pub fn train_step<B: AutodiffBackend>(
    model: &ResNet<B>,
    batch: FashionBatch<B>,
    devices: &[B::Device],
) -> Result<StepOutput> {
    let main_device = &devices[0];
    let mut accumulator = GradientsAccumulator::new();
    let mut labels = Vec::new();
    let mut outputs = Vec::new();
    let mut loss_sum = 0.0;

    for shard in shard(batch.images, batch.targets, devices) {
        let replica = model.clone().fork(&shard.device);
        let output = replica.forward(shard.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&shard.device)
            .forward(output.clone(), shard.targets.clone());

        let loss = loss.mul_scalar(shard.weight);
        loss_sum += loss.clone().into_scalar().elem::<f64>();

        let grads = GradientsParams::from_grads(loss.backward(), &replica)
            .to_device(main_device, model);
        accumulator.accumulate(model, grads);

        labels.extend(target_labels(shard.targets)?);
        outputs.extend(output_rows(output.detach())?);
    }

    Ok(StepOutput {
        grads: accumulator.grads(),
        labels,
        outputs,
        loss: loss_sum,
    })
}

/// Accuracy, mAP and mean loss over the validation split.
pub fn validate<B: Backend>(
    model: &ResNet<B>,
    dataloader: &Arc<dyn DataLoader<FashionBatch<B>>>,
    devices: &[B::Device],
) -> Result<EpochMetrics> {
    let mut metrics = EpochMetrics::new();

    for batch in dataloader.iter() {
        let mut labels = Vec::new();
        let mut outputs = Vec::new();
        let mut loss = 0.0;

        for shard in shard(batch.images, batch.targets, devices) {
            let replica = model.clone().fork(&shard.device);
            let output = replica.forward(shard.images);
            let shard_loss = CrossEntropyLossConfig::new()
                .init(&shard.device)
                .forward(output.clone(), shard.targets.clone());

            loss += shard_loss.into_scalar().elem::<f64>() * shard.weight;
            labels.extend(target_labels(shard.targets)?);
            outputs.extend(output_rows(output)?);
        }

        metrics.update(&labels, &outputs, loss);
    }

    Ok(metrics)
}

/// Shuffled sample indices for one epoch, grouped into full batches.
/// A trailing short batch is dropped.
pub fn epoch_batches<R: Rng>(len: usize, batch_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
    let mut indices = (0..len).collect::<Vec<_>>();
    indices.shuffle(rng);
    indices
        .chunks_exact(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}

/// What a call to [`train`] did.
#[derive(Clone, Debug, Default)]
pub struct TrainingReport {
    /// Epochs run, including the one that triggered early stopping.
    pub epochs: usize,
    /// Learning rate handed to the optimizer, per epoch.
    pub learning_rates: Vec<f64>,
    pub best_val_loss: f64,
    pub early_stopped: bool,
}

/// Fine-tune `model` on the task's training split.
///
/// Weights are written to `checkpoint` whenever validation loss improves on
/// the best seen so far; training stops after three consecutive epochs that
/// make it worse.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    mut model: ResNet<B>,
    data_dir: &Path,
    checkpoint: &Path,
    devices: &[B::Device],
) -> Result<(ResNet<B>, TrainingReport)> {
    tracing::info!(
        "Start Training for Task: {}, with model: {}",
        config.task,
        config.backbone
    );

    B::seed(config.seed);
    let device = devices[0].clone();

    let train_folder = ImageFolder::fashion(data_dir, config.task, Split::Train)?;
    let val_folder = ImageFolder::fashion(data_dir, config.task, Split::Val)?;
    let train_set = train_folder.dataset(LoadImage::new(Split::Train));
    let val_set = val_folder.dataset(LoadImage::new(Split::Val));
    let num_batch = train_set.len() / config.batch_size.max(1);
    tracing::info!(
        "{} training images ({} batches), {} validation images",
        train_set.len(),
        num_batch,
        val_set.len()
    );

    // Training batches are drawn from one shuffle of the whole split per
    // epoch and decoded on a pool of `num_workers` threads.
    let workers = rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_workers.max(1))
        .build()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let batcher_train = ClassificationBatcher::<B>::new(device.clone());

    let dataloader_valid = DataLoaderBuilder::new(ClassificationBatcher::<B::InnerBackend>::new(
        device.clone(),
    ))
    .batch_size(config.batch_size)
    .num_workers(config.num_workers.max(1))
    .build(val_set);

    let mut optim = config.optimizer.init();
    let mut schedule = StepDecay::new(
        config.learning_rate,
        config.lr_factor,
        config.lr_steps.clone(),
    );
    let mut stopper = EarlyStopping::new(config.best_val_loss.unwrap_or(f64::INFINITY));
    let mut train_metrics = EpochMetrics::new();
    let mut report = TrainingReport::default();

    for epoch in 0..config.num_epochs {
        let lr = schedule.lr_for_epoch(epoch);
        let tic = Instant::now();
        train_metrics.reset();
        report.epochs = epoch + 1;
        report.learning_rates.push(lr);

        for (i, indices) in epoch_batches(train_set.len(), config.batch_size, &mut rng)
            .into_iter()
            .enumerate()
        {
            let items = workers.install(|| {
                indices
                    .par_iter()
                    .filter_map(|&index| train_set.get(index))
                    .collect::<Vec<_>>()
            });

            let step = train_step(&model, batcher_train.batch(items), devices)?;
            model = optim.step(lr, model, step.grads);
            train_metrics.update(&step.labels, &step.outputs, step.loss);

            if config.log_interval > 0 && (i + 1) % config.log_interval == 0 {
                tracing::info!(
                    "[Epoch {}] Batch {}/{}: training loss {:.4}",
                    epoch + 1,
                    i + 1,
                    num_batch,
                    train_metrics.loss()
                );
            }
        }

        let val_metrics = validate(&model.valid(), &dataloader_valid, devices)?;
        let val_loss = val_metrics.loss();

        tracing::info!(
            "[Epoch {}] Train-acc: {:.3}, mAP: {:.3}, loss: {:.3} | Val-acc: {:.3}, mAP: {:.3}, loss: {:.3} | time: {:.1}",
            epoch + 1,
            train_metrics.accuracy(),
            train_metrics.map(),
            train_metrics.loss(),
            val_metrics.accuracy(),
            val_metrics.map(),
            val_loss,
            tic.elapsed().as_secs_f64()
        );

        match stopper.update(val_loss) {
            Verdict::Improved => {
                save_checkpoint(&model, checkpoint)?;
                tracing::debug!("Saved parameters, best validation loss {val_loss:.4}");
            }
            Verdict::Worse(count) => {
                tracing::debug!("No improvement for {count} epoch(s), lr {lr}");
            }
            Verdict::Unchanged => {}
            Verdict::Stop => {
                let bar = "=".repeat(20);
                tracing::info!("{bar}Early stopping{bar}");
                report.early_stopped = true;
                break;
            }
        }
    }

    report.best_val_loss = stopper.best();
    Ok((model, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_batches_are_full_and_disjoint() {
        let mut rng = StdRng::seed_from_u64(7);
        let batches = epoch_batches(68, 8, &mut rng);
        assert_eq!(batches.len(), 8);
        assert!(batches.iter().all(|b| b.len() == 8));

        let mut seen = batches.concat();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn class_sorted_samples_are_mixed_within_batches() {
        // 4 classes x 17 images, stored class by class.
        let labels = (0..68).map(|i| i / 17).collect::<Vec<usize>>();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..3 {
            for batch in epoch_batches(labels.len(), 8, &mut rng) {
                let first = labels[batch[0]];
                assert!(batch.iter().any(|&i| labels[i] != first), "{batch:?}");
            }
        }
    }

    #[test]
    fn epochs_reshuffle() {
        let mut rng = StdRng::seed_from_u64(3);
        let first = epoch_batches(32, 4, &mut rng);
        let second = epoch_batches(32, 4, &mut rng);
        assert_ne!(first, second);
    }

    #[test]
    fn tiny_split_yields_no_batches() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(epoch_batches(3, 4, &mut rng).is_empty());
    }
}
