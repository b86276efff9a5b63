use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = FashionError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FashionError {
    #[error("image size {actual:?} is smaller than crop size {crop:?}")]
    CropTooLarge {
        actual: (u32, u32),
        crop: (u32, u32),
    },

    #[error("unknown task `{0}`, expected one of: {1}")]
    UnknownTask(String, String),

    #[error("unknown model `{0}`, expected one of: resnet18, resnet34, resnet50, resnet101, resnet152")]
    UnknownModel(String),

    #[error("invalid learning rate step `{0}`")]
    InvalidLrStep(String),

    #[error("malformed manifest line {line}: `{content}`")]
    Manifest { line: usize, content: String },

    #[error("no labelled images found in {0}")]
    EmptyDataset(PathBuf),

    #[error("{dir} has {found} class directories, task `{task}` expects {expected}")]
    ClassCount {
        dir: PathBuf,
        task: String,
        found: usize,
        expected: usize,
    },

    #[error("failed to load weights from {path}: {reason}")]
    Weights { path: PathBuf, reason: String },

    #[error("tensor data conversion failed: {0}")]
    TensorData(String),

    #[error("could not decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to start image loading workers: {0}")]
    Workers(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
