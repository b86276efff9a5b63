//! ResNet backbones with a swappable classification head.
//!
//! Parameter names follow torchvision (`conv1`, `bn1`, `layer1.0.conv1`, ...,
//! `fc`) so ImageNet weights load with a single remap for `downsample`.

use std::fmt;
use std::str::FromStr;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::error::FashionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backbone {
    ResNet18,
    ResNet34,
    ResNet50,
    ResNet101,
    ResNet152,
}

impl Backbone {
    pub fn name(&self) -> &'static str {
        match self {
            Backbone::ResNet18 => "resnet18",
            Backbone::ResNet34 => "resnet34",
            Backbone::ResNet50 => "resnet50",
            Backbone::ResNet101 => "resnet101",
            Backbone::ResNet152 => "resnet152",
        }
    }

    /// Blocks per stage.
    pub fn layers(&self) -> [usize; 4] {
        match self {
            Backbone::ResNet18 => [2, 2, 2, 2],
            Backbone::ResNet34 => [3, 4, 6, 3],
            Backbone::ResNet50 => [3, 4, 6, 3],
            Backbone::ResNet101 => [3, 4, 23, 3],
            Backbone::ResNet152 => [3, 8, 36, 3],
        }
    }

    pub fn bottleneck(&self) -> bool {
        !matches!(self, Backbone::ResNet18 | Backbone::ResNet34)
    }

    pub fn expansion(&self) -> usize {
        if self.bottleneck() {
            4
        } else {
            1
        }
    }

    /// Width of the pooled features fed to the head.
    pub fn num_features(&self) -> usize {
        512 * self.expansion()
    }

    /// torchvision ImageNet-1k weights.
    pub fn weights_url(&self) -> &'static str {
        match self {
            Backbone::ResNet18 => "https://download.pytorch.org/models/resnet18-f37072fd.pth",
            Backbone::ResNet34 => "https://download.pytorch.org/models/resnet34-b627a593.pth",
            Backbone::ResNet50 => "https://download.pytorch.org/models/resnet50-0676ba61.pth",
            Backbone::ResNet101 => "https://download.pytorch.org/models/resnet101-63fe2227.pth",
            Backbone::ResNet152 => "https://download.pytorch.org/models/resnet152-394f9c45.pth",
        }
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backbone {
    type Err = FashionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resnet18" | "resnet18_v1" => Ok(Backbone::ResNet18),
            "resnet34" | "resnet34_v1" => Ok(Backbone::ResNet34),
            "resnet50" | "resnet50_v1" => Ok(Backbone::ResNet50),
            "resnet101" | "resnet101_v1" => Ok(Backbone::ResNet101),
            "resnet152" | "resnet152_v1" => Ok(Backbone::ResNet152),
            _ => Err(FashionError::UnknownModel(s.to_string())),
        }
    }
}

#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        Self { conv, bn }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Residual block. Basic blocks leave `conv3`/`bn3` empty; bottleneck
/// blocks use all three convolutions.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Option<Conv2d<B>>,
    bn3: Option<BatchNorm<B, 2>>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

fn conv3x3<B: Backend>(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

fn conv1x1<B: Backend>(in_channels: usize, out_channels: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [1, 1])
        .with_bias(false)
        .init(device)
}

impl<B: Backend> ResidualBlock<B> {
    fn basic(in_channels: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != planes)
            .then(|| Downsample::new(in_channels, planes, stride, device));

        Self {
            conv1: conv3x3(in_channels, planes, stride, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv3x3(planes, planes, 1, device),
            bn2: BatchNormConfig::new(planes).init(device),
            conv3: None,
            bn3: None,
            downsample,
            relu: Relu::new(),
        }
    }

    fn bottleneck(in_channels: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = planes * 4;
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1: conv1x1(in_channels, planes, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv3x3(planes, planes, stride, device),
            bn2: BatchNormConfig::new(planes).init(device),
            conv3: Some(conv1x1(planes, out_channels, device)),
            bn3: Some(BatchNormConfig::new(out_channels).init(device)),
            downsample,
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let mut out = self.bn2.forward(self.conv2.forward(out));

        if let (Some(conv3), Some(bn3)) = (&self.conv3, &self.bn3) {
            out = bn3.forward(conv3.forward(self.relu.forward(out)));
        }

        self.relu.forward(out + identity)
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: Vec<ResidualBlock<B>>,
    layer2: Vec<ResidualBlock<B>>,
    layer3: Vec<ResidualBlock<B>>,
    layer4: Vec<ResidualBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
    pub fn new(backbone: Backbone, num_classes: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([3, 64], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let [n1, n2, n3, n4] = backbone.layers();
        let mut in_channels = 64;
        let mut stage = |planes: usize, blocks: usize, stride: usize| {
            (0..blocks)
                .map(|i| {
                    let stride = if i == 0 { stride } else { 1 };
                    let block = if backbone.bottleneck() {
                        ResidualBlock::bottleneck(in_channels, planes, stride, device)
                    } else {
                        ResidualBlock::basic(in_channels, planes, stride, device)
                    };
                    in_channels = planes * backbone.expansion();
                    block
                })
                .collect::<Vec<_>>()
        };

        let layer1 = stage(64, n1, 1);
        let layer2 = stage(128, n2, 2);
        let layer3 = stage(256, n3, 2);
        let layer4 = stage(512, n4, 2);

        Self {
            conv1,
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            maxpool,
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(backbone.num_features(), num_classes).init(device),
        }
    }

    /// Replace the classification head with a Xavier-initialised one of
    /// `num_classes` outputs, keeping the backbone weights.
    pub fn with_head(mut self, num_classes: usize, device: &B::Device) -> Self {
        let [num_features, _] = self.fc.weight.dims();
        self.fc = LinearConfig::new(num_features, num_classes)
            .with_initializer(Initializer::XavierUniform { gain: 1.0 })
            .init(device);
        self
    }

    pub fn num_classes(&self) -> usize {
        self.fc.weight.dims()[1]
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.relu.forward(self.bn1.forward(x));
        let mut x = self.maxpool.forward(x);

        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }

        let x = self.avgpool.forward(x);
        let x = x.flatten(1, 3);

        self.fc.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backbone_names_round_trip() {
        for backbone in [
            Backbone::ResNet18,
            Backbone::ResNet34,
            Backbone::ResNet50,
            Backbone::ResNet101,
            Backbone::ResNet152,
        ] {
            assert_eq!(backbone.name().parse::<Backbone>().unwrap(), backbone);
        }
        assert_eq!("ResNet50_v1".parse::<Backbone>().unwrap(), Backbone::ResNet50);
        assert!("vgg16".parse::<Backbone>().is_err());
    }

    #[test]
    fn feature_width_follows_block_kind() {
        assert_eq!(Backbone::ResNet18.num_features(), 512);
        assert_eq!(Backbone::ResNet34.num_features(), 512);
        assert_eq!(Backbone::ResNet50.num_features(), 2048);
        assert_eq!(Backbone::ResNet152.layers().iter().sum::<usize>(), 50);
    }
}
