use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    data::network::downloader,
    module::Module,
    prelude::*,
    record::{CompactRecorder, FullPrecisionSettings, Recorder},
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use crate::error::{FashionError, Result};
use crate::model::{Backbone, ResNet, ResNetRecord};

const IMAGENET_CLASSES: usize = 1000;

/// Path of the torchvision weights for `backbone`, downloading them into
/// `weights_dir` on first use.
pub fn fetch_weights(backbone: Backbone, weights_dir: &Path) -> Result<PathBuf> {
    let url = backbone.weights_url();
    let file_name = url.rsplit('/').next().unwrap_or(backbone.name());
    let path = weights_dir.join(file_name);

    if path.is_file() {
        return Ok(path);
    }

    fs::create_dir_all(weights_dir)?;
    tracing::info!("Downloading {} weights from {url}", backbone.name());
    let bytes = downloader::download_file_as_bytes(url, file_name);
    fs::write(&path, bytes)?;

    Ok(path)
}

/// ImageNet-pretrained backbone with a fresh `num_classes` head.
pub fn pretrained<B: Backend>(
    backbone: Backbone,
    num_classes: usize,
    weights_dir: &Path,
    device: &B::Device,
) -> Result<ResNet<B>> {
    let path = fetch_weights(backbone, weights_dir)?;
    let args = LoadArgs::new(path.clone())
        .with_key_remap(r"(.+)\.downsample\.0\.(.+)", "$1.downsample.conv.$2")
        .with_key_remap(r"(.+)\.downsample\.1\.(.+)", "$1.downsample.bn.$2");

    let record: ResNetRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|err| FashionError::Weights {
            path,
            reason: format!("{err:?}"),
        })?;

    Ok(ResNet::new(backbone, IMAGENET_CLASSES, device)
        .load_record(record)
        .with_head(num_classes, device))
}

/// Checkpoint file as written by `CompactRecorder` for `stem`.
pub fn checkpoint_file(stem: &Path) -> PathBuf {
    stem.with_extension("mpk")
}

/// True when a non-empty checkpoint exists for `stem`.
pub fn has_checkpoint(stem: &Path) -> bool {
    fs::metadata(checkpoint_file(stem))
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

pub fn save_checkpoint<B: Backend>(model: &ResNet<B>, stem: &Path) -> Result<()> {
    model
        .clone()
        .save_file(stem.to_path_buf(), &CompactRecorder::new())
        .map_err(|err| FashionError::Weights {
            path: checkpoint_file(stem),
            reason: format!("{err:?}"),
        })
}

pub fn load_checkpoint<B: Backend>(
    backbone: Backbone,
    num_classes: usize,
    stem: &Path,
    device: &B::Device,
) -> Result<ResNet<B>> {
    ResNet::new(backbone, num_classes, device)
        .load_file(stem.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|err| FashionError::Weights {
            path: checkpoint_file(stem),
            reason: format!("{err:?}"),
        })
}

/// Restore the checkpoint at `stem` when a non-empty one exists, otherwise
/// start from ImageNet weights with a new head.
pub fn load_or_pretrained<B: Backend>(
    backbone: Backbone,
    num_classes: usize,
    stem: &Path,
    weights_dir: &Path,
    device: &B::Device,
) -> Result<ResNet<B>> {
    if has_checkpoint(stem) {
        tracing::info!(
            "Load parameters from saved model: {}",
            checkpoint_file(stem).display()
        );
        load_checkpoint(backbone, num_classes, stem, device)
    } else {
        tracing::info!("Initialising {backbone} from ImageNet weights");
        pretrained(backbone, num_classes, weights_dir, device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_file_appends_extension() {
        let stem = Path::new("train/skirt_length_labels_a/skirt_length_labels_a");
        assert_eq!(
            checkpoint_file(stem),
            PathBuf::from("train/skirt_length_labels_a/skirt_length_labels_a.mpk")
        );
    }

    #[test]
    fn empty_checkpoint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("task");
        assert!(!has_checkpoint(&stem));

        fs::write(checkpoint_file(&stem), b"").unwrap();
        assert!(!has_checkpoint(&stem));

        fs::write(checkpoint_file(&stem), b"x").unwrap();
        assert!(has_checkpoint(&stem));
    }
}
