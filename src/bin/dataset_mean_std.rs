use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use image::ImageReader;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use fashion_attrs::tasks::FashionTask;

/// Per-channel mean and standard deviation of a task's training images.
#[derive(Parser, Debug)]
#[command(name = "dataset_mean_std")]
struct Cli {
    #[arg(long)]
    task: FashionTask,

    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Where to write the statistics
    #[arg(long, default_value = "normalization_stats.json")]
    output: PathBuf,
}

#[derive(Serialize, Deserialize, Debug)]
struct NormalizationStats {
    mean: [f64; 3],
    std: [f64; 3],
    pixels: u64,
}

/// Running sums for one image or a set of images.
#[derive(Clone, Copy, Default)]
struct ChannelSums {
    sum: [f64; 3],
    sum_sq: [f64; 3],
    pixels: u64,
}

impl ChannelSums {
    fn of_image(img: &image::RgbImage) -> Self {
        let mut sums = Self::default();
        for pixel in img.pixels() {
            for c in 0..3 {
                let v = pixel[c] as f64 / 255.0;
                sums.sum[c] += v;
                sums.sum_sq[c] += v * v;
            }
        }
        sums.pixels = img.width() as u64 * img.height() as u64;
        sums
    }

    fn merge(mut self, other: Self) -> Self {
        for c in 0..3 {
            self.sum[c] += other.sum[c];
            self.sum_sq[c] += other.sum_sq[c];
        }
        self.pixels += other.pixels;
        self
    }

    fn stats(&self) -> NormalizationStats {
        let n = self.pixels.max(1) as f64;
        let mean = self.sum.map(|s| s / n);
        let mut std = [0.0; 3];
        for c in 0..3 {
            std[c] = (self.sum_sq[c] / n - mean[c] * mean[c]).max(0.0).sqrt();
        }
        NormalizationStats {
            mean,
            std,
            pixels: self.pixels,
        }
    }
}

fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for class in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let class = class?.path();
        if !class.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&class)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("png"))
                .unwrap_or(false);
            if is_image {
                files.push(path);
            }
        }
    }
    Ok(files)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().compact().with_target(false).init();
    let cli = Cli::parse();

    let dir = cli
        .data_dir
        .join("train_valid")
        .join(cli.task.name())
        .join("train");
    let files = image_files(&dir)?;
    tracing::info!("Loading {} images from {}", files.len(), dir.display());

    let totals = files
        .par_iter()
        .map(|path| -> Result<ChannelSums> {
            let img = ImageReader::open(path)?
                .decode()
                .with_context(|| format!("Failed to decode {}", path.display()))?
                .to_rgb8();
            Ok(ChannelSums::of_image(&img))
        })
        .try_reduce(ChannelSums::default, |a, b| Ok(a.merge(b)))?;

    let stats = totals.stats();
    fs::write(&cli.output, serde_json::to_string_pretty(&stats)?)?;

    tracing::info!("Statistics saved to {}", cli.output.display());
    tracing::info!("Mean: {:?}", stats.mean);
    tracing::info!("Std: {:?}", stats.std);
    Ok(())
}
