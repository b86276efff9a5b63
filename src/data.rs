use burn::{data::dataloader::batcher::Batcher, prelude::*};
use image::Rgb32FImage;

use crate::augment::to_chw;

// ImageNet mean and std values
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Normalizer for backbones pretrained on ImageNet.
#[derive(Clone, Debug)]
pub struct Normalizer<B: Backend> {
    pub mean: Tensor<B, 4>,
    pub std: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
    pub fn new(device: &Device<B>) -> Self {
        let mean = Tensor::<B, 1>::from_floats(MEAN, device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(STD, device).reshape([1, 3, 1, 1]);
        Self { mean, std }
    }

    /// The input image should be in the range [0, 1].
    ///
    /// `input = (input - mean) / std`
    pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        (input - self.mean.clone()) / self.std.clone()
    }
}

/// A transformed sample: CHW pixels in [0, 1] and its class index.
#[derive(Clone, Debug)]
pub struct FashionItem {
    pub image: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub label: usize,
}

impl FashionItem {
    pub fn new(image: &Rgb32FImage, label: usize) -> Self {
        let (w, h) = image.dimensions();
        Self {
            image: to_chw(image),
            height: h as usize,
            width: w as usize,
            label,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FashionBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatcher<B: Backend> {
    normalizer: Normalizer<B>,
    device: B::Device,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self {
            normalizer: Normalizer::<B>::new(&device),
            device,
        }
    }

    /// Stack already-cropped images into one normalised `[N, 3, H, W]` tensor.
    pub fn images(&self, crops: &[Rgb32FImage]) -> Tensor<B, 4> {
        let images = crops
            .iter()
            .map(|img| {
                let (w, h) = img.dimensions();
                let data = TensorData::new(to_chw(img), Shape::new([3, h as usize, w as usize]));
                Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), &self.device)
            })
            .collect();

        self.normalizer.normalize(Tensor::stack(images, 0))
    }
}

impl<B: Backend> Batcher<FashionItem, FashionBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<FashionItem>) -> FashionBatch<B> {
        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    TensorData::from([(item.label as i64).elem::<B::IntElem>()]),
                    &self.device,
                )
            })
            .collect();

        let images = items
            .into_iter()
            .map(|item| {
                TensorData::new(item.image, Shape::new([3, item.height, item.width]))
            })
            .map(|data| Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), &self.device))
            .collect();

        let images = Tensor::stack(images, 0);
        let targets = Tensor::cat(targets, 0);

        let images = self.normalizer.normalize(images);

        FashionBatch { images, targets }
    }
}
