use std::fs;
use std::path::{Path, PathBuf};

use burn::data::dataset::transform::{Mapper, MapperDataset};
use burn::data::dataset::InMemDataset;
use image::ImageReader;
use rand::thread_rng;

use crate::augment::{train_transform, val_transform, ColorJitter};
use crate::data::FashionItem;
use crate::error::{FashionError, Result};
use crate::tasks::FashionTask;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

pub fn split_dir(data_dir: &Path, task: FashionTask, split: Split) -> PathBuf {
    data_dir
        .join("train_valid")
        .join(task.name())
        .join(split.dir_name())
}

/// An image path and its class index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// Decodes a sample and applies the split's transform.
#[derive(Clone, Debug)]
pub struct LoadImage {
    split: Split,
    jitter: ColorJitter,
}

impl LoadImage {
    pub fn new(split: Split) -> Self {
        Self {
            split,
            jitter: ColorJitter::default(),
        }
    }

    pub fn with_jitter(mut self, jitter: ColorJitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn load(&self, sample: &ImageSample) -> Result<FashionItem> {
        let path = &sample.path;
        let img = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|source| FashionError::Image {
                path: path.to_path_buf(),
                source,
            })?;

        let img = match self.split {
            Split::Train => train_transform(img, &self.jitter, &mut thread_rng())?,
            Split::Val => val_transform(img)?,
        };

        Ok(FashionItem::new(&img, sample.label))
    }
}

impl Mapper<ImageSample, FashionItem> for LoadImage {
    fn map(&self, sample: &ImageSample) -> FashionItem {
        // Unreadable training data is fatal.
        match self.load(sample) {
            Ok(item) => item,
            Err(err) => panic!("Failed to load {}: {err}", sample.path.display()),
        }
    }
}

/// Lazily decoded and transformed images of one split.
pub type FashionDataset = MapperDataset<InMemDataset<ImageSample>, LoadImage, ImageSample>;

/// Index of an image folder laid out as `<root>/<class>/<image>`.
///
/// Class indices follow the sorted class directory names.
#[derive(Clone, Debug)]
pub struct ImageFolder {
    root: PathBuf,
    samples: Vec<ImageSample>,
    classes: Vec<String>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

impl ImageFolder {
    pub fn scan(root: &Path) -> Result<Self> {
        let class_dirs = sorted_entries(root)?
            .into_iter()
            .filter(|path| path.is_dir())
            .collect::<Vec<_>>();

        let mut classes = Vec::with_capacity(class_dirs.len());
        let mut samples = Vec::new();
        for (label, class_dir) in class_dirs.iter().enumerate() {
            classes.push(
                class_dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );
            for path in sorted_entries(class_dir)? {
                if path.is_file() && is_image(&path) {
                    samples.push(ImageSample { path, label });
                }
            }
        }

        if samples.is_empty() {
            return Err(FashionError::EmptyDataset(root.to_path_buf()));
        }

        tracing::debug!(
            "Found {} images in {} classes under {}",
            samples.len(),
            classes.len(),
            root.display()
        );

        Ok(Self {
            root: root.to_path_buf(),
            samples,
            classes,
        })
    }

    /// Scan one split of `task`, requiring one directory per task class.
    pub fn fashion(data_dir: &Path, task: FashionTask, split: Split) -> Result<Self> {
        Self::scan(&split_dir(data_dir, task, split))?.expect_classes(task)
    }

    pub fn expect_classes(self, task: FashionTask) -> Result<Self> {
        if self.classes.len() != task.num_classes() {
            return Err(FashionError::ClassCount {
                dir: self.root,
                task: task.name().to_string(),
                found: self.classes.len(),
                expected: task.num_classes(),
            });
        }
        Ok(self)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dataset(&self, loader: LoadImage) -> FashionDataset {
        MapperDataset::new(InMemDataset::new(self.samples.clone()), loader)
    }
}
