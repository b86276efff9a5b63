//! Image transforms for training, validation and test-time augmentation.
//!
//! Everything here works on `Rgb32FImage` with channel values in [0, 1].
//! Mean/std normalisation is left to the batcher, which does it on tensors.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, Rgb32FImage};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{FashionError, Result};

pub const RESIZE_SHORT: u32 = 256;
pub const CROP_SIZE: u32 = 224;

// ImageNet PCA lighting eigen decomposition.
const EIGVAL: [f32; 3] = [55.46, 4.794, 1.148];
const EIGVEC: [[f32; 3]; 3] = [
    [-0.5675, 0.7192, 0.4009],
    [-0.5808, -0.0045, -0.8140],
    [-0.5836, -0.6948, 0.4203],
];

// ITU-R 601 luma weights.
const GRAY_COEF: [f32; 3] = [0.299, 0.587, 0.114];

/// Strengths of the random colour perturbations applied during training.
#[derive(Clone, Debug)]
pub struct ColorJitter {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub hue: f32,
    pub pca_noise: f32,
    pub rand_gray: f64,
}

impl Default for ColorJitter {
    fn default() -> Self {
        Self {
            brightness: 0.5,
            contrast: 0.5,
            saturation: 0.5,
            hue: 0.5,
            pca_noise: 0.5,
            rand_gray: 0.1,
        }
    }
}

/// Decoded image scaled to floating point [0, 1].
pub fn to_float(img: DynamicImage) -> Rgb32FImage {
    img.into_rgb32f()
}

/// Resize so that the shorter side equals `size`, keeping the aspect ratio.
pub fn resize_short(img: &Rgb32FImage, size: u32) -> Rgb32FImage {
    let (w, h) = img.dimensions();
    let (new_w, new_h) = if h > w {
        (size, (size as u64 * h as u64 / w as u64) as u32)
    } else {
        ((size as u64 * w as u64 / h as u64) as u32, size)
    };
    imageops::resize(img, new_w, new_h, FilterType::Triangle)
}

/// Copy the `(w, h)` window whose top-left corner is `(x, y)`.
pub fn crop(img: &Rgb32FImage, x: u32, y: u32, size: (u32, u32)) -> Result<Rgb32FImage> {
    let (iw, ih) = img.dimensions();
    let (w, h) = size;
    if x + w > iw || y + h > ih {
        return Err(FashionError::CropTooLarge {
            actual: (iw, ih),
            crop: size,
        });
    }
    Ok(imageops::crop_imm(img, x, y, w, h).to_image())
}

pub fn center_crop(img: &Rgb32FImage, size: (u32, u32)) -> Result<Rgb32FImage> {
    let (iw, ih) = img.dimensions();
    let (w, h) = size;
    if iw < w || ih < h {
        return Err(FashionError::CropTooLarge {
            actual: (iw, ih),
            crop: size,
        });
    }
    crop(img, (iw - w) / 2, (ih - h) / 2, size)
}

pub fn random_crop<R: Rng>(img: &Rgb32FImage, size: (u32, u32), rng: &mut R) -> Result<Rgb32FImage> {
    let (iw, ih) = img.dimensions();
    let (w, h) = size;
    if iw < w || ih < h {
        return Err(FashionError::CropTooLarge {
            actual: (iw, ih),
            crop: size,
        });
    }
    let x = rng.gen_range(0..=iw - w);
    let y = rng.gen_range(0..=ih - h);
    crop(img, x, y, size)
}

/// Ten deterministic crops: center, top-left, bottom-left, top-right and
/// bottom-right of the image, followed by the same five of its mirror.
pub fn ten_crop(img: &Rgb32FImage, size: (u32, u32)) -> Result<Vec<Rgb32FImage>> {
    let (iw, ih) = img.dimensions();
    let (w, h) = size;
    if iw < w || ih < h {
        return Err(FashionError::CropTooLarge {
            actual: (iw, ih),
            crop: size,
        });
    }

    let corners = [
        ((iw - w) / 2, (ih - h) / 2),
        (0, 0),
        (0, ih - h),
        (iw - w, 0),
        (iw - w, ih - h),
    ];
    let flipped = imageops::flip_horizontal(img);

    let mut crops = Vec::with_capacity(10);
    for source in [img, &flipped] {
        for &(x, y) in &corners {
            crops.push(crop(source, x, y, size)?);
        }
    }
    Ok(crops)
}

fn luma(p: &Rgb<f32>) -> f32 {
    p.0[0] * GRAY_COEF[0] + p.0[1] * GRAY_COEF[1] + p.0[2] * GRAY_COEF[2]
}

fn brightness(img: &mut Rgb32FImage, alpha: f32) {
    for p in img.pixels_mut() {
        for c in p.0.iter_mut() {
            *c *= alpha;
        }
    }
}

fn contrast(img: &mut Rgb32FImage, alpha: f32) {
    let n = (img.width() * img.height()).max(1) as f32;
    let mean = img.pixels().map(luma).sum::<f32>() / n;
    let offset = (1.0 - alpha) * mean;
    for p in img.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = *c * alpha + offset;
        }
    }
}

fn saturation(img: &mut Rgb32FImage, alpha: f32) {
    for p in img.pixels_mut() {
        let gray = luma(p) * (1.0 - alpha);
        for c in p.0.iter_mut() {
            *c = *c * alpha + gray;
        }
    }
}

/// Rotate hue by `alpha * pi` radians in YIQ space.
fn hue(img: &mut Rgb32FImage, alpha: f32) {
    const TYIQ: [[f32; 3]; 3] = [
        [0.299, 0.587, 0.114],
        [0.596, -0.274, -0.321],
        [0.211, -0.523, 0.311],
    ];
    const ITYIQ: [[f32; 3]; 3] = [
        [1.0, 0.956, 0.621],
        [1.0, -0.272, -0.647],
        [1.0, -1.107, 1.705],
    ];
    let (u, w) = ((alpha * std::f32::consts::PI).cos(), (alpha * std::f32::consts::PI).sin());
    let bt = [[1.0, 0.0, 0.0], [0.0, u, -w], [0.0, w, u]];

    let mut t = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            let mut tmp = [0.0f32; 3];
            for k in 0..3 {
                tmp[k] = (0..3).map(|l| bt[k][l] * TYIQ[l][j]).sum();
            }
            t[i][j] = (0..3).map(|k| ITYIQ[i][k] * tmp[k]).sum();
        }
    }

    for p in img.pixels_mut() {
        let [r, g, b] = p.0;
        p.0 = [
            t[0][0] * r + t[0][1] * g + t[0][2] * b,
            t[1][0] * r + t[1][1] * g + t[1][2] * b,
            t[2][0] * r + t[2][1] * g + t[2][2] * b,
        ];
    }
}

fn lighting(img: &mut Rgb32FImage, alpha: [f32; 3]) {
    let mut rgb = [0.0f32; 3];
    for (c, value) in rgb.iter_mut().enumerate() {
        *value = (0..3).map(|k| EIGVEC[c][k] * alpha[k] * EIGVAL[k]).sum::<f32>() / 255.0;
    }
    for p in img.pixels_mut() {
        for c in 0..3 {
            p.0[c] += rgb[c];
        }
    }
}

// Box-Muller.
fn standard_normal<R: Rng>(rng: &mut R) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

fn grayscale(img: &mut Rgb32FImage) {
    for p in img.pixels_mut() {
        let gray = luma(p);
        p.0 = [gray; 3];
    }
}

impl ColorJitter {
    /// Apply the enabled perturbations with freshly drawn strengths.
    ///
    /// Brightness, contrast and saturation run in random order, then hue,
    /// PCA lighting noise and random grayscale.
    pub fn apply<R: Rng>(&self, img: &mut Rgb32FImage, rng: &mut R) {
        let mut order = [0usize, 1, 2];
        order.shuffle(rng);
        for step in order {
            match step {
                0 if self.brightness > 0.0 => {
                    let alpha = 1.0 + rng.gen_range(-self.brightness..=self.brightness);
                    brightness(img, alpha);
                }
                1 if self.contrast > 0.0 => {
                    let alpha = 1.0 + rng.gen_range(-self.contrast..=self.contrast);
                    contrast(img, alpha);
                }
                2 if self.saturation > 0.0 => {
                    let alpha = 1.0 + rng.gen_range(-self.saturation..=self.saturation);
                    saturation(img, alpha);
                }
                _ => {}
            }
        }

        if self.hue > 0.0 {
            hue(img, rng.gen_range(-self.hue..=self.hue));
        }

        if self.pca_noise > 0.0 {
            let alpha = [
                standard_normal(rng) * self.pca_noise,
                standard_normal(rng) * self.pca_noise,
                standard_normal(rng) * self.pca_noise,
            ];
            lighting(img, alpha);
        }

        if self.rand_gray > 0.0 && rng.gen_bool(self.rand_gray) {
            grayscale(img);
        }
    }
}

/// Training transform: resize, random crop, random mirror, colour jitter.
pub fn train_transform<R: Rng>(
    img: DynamicImage,
    jitter: &ColorJitter,
    rng: &mut R,
) -> Result<Rgb32FImage> {
    let img = resize_short(&to_float(img), RESIZE_SHORT);
    let mut img = random_crop(&img, (CROP_SIZE, CROP_SIZE), rng)?;
    if rng.gen_bool(0.5) {
        imageops::flip_horizontal_in_place(&mut img);
    }
    jitter.apply(&mut img, rng);
    Ok(img)
}

pub fn val_transform(img: DynamicImage) -> Result<Rgb32FImage> {
    let img = resize_short(&to_float(img), RESIZE_SHORT);
    center_crop(&img, (CROP_SIZE, CROP_SIZE))
}

pub fn predict_transform(img: DynamicImage) -> Result<Vec<Rgb32FImage>> {
    let img = resize_short(&to_float(img), RESIZE_SHORT);
    ten_crop(&img, (CROP_SIZE, CROP_SIZE))
}

/// Flatten an image to CHW order.
pub fn to_chw(img: &Rgb32FImage) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, p) in img.pixels().enumerate() {
        data[i] = p.0[0];
        data[plane + i] = p.0[1];
        data[2 * plane + i] = p.0[2];
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gradient(w: u32, h: u32) -> Rgb32FImage {
        Rgb32FImage::from_fn(w, h, |x, y| {
            Rgb([x as f32 / w as f32, y as f32 / h as f32, 0.5])
        })
    }

    #[test]
    fn ten_crop_returns_ten_mirrored_crops() {
        let img = gradient(9, 7);
        let crops = ten_crop(&img, (4, 3)).unwrap();

        assert_eq!(crops.len(), 10);
        for c in &crops {
            assert_eq!(c.dimensions(), (4, 3));
        }

        // Top-left of the mirror equals the mirrored top-right of the source.
        let top_right_flipped = imageops::flip_horizontal(&crops[3]);
        assert_eq!(crops[6], top_right_flipped);
        let bottom_right_flipped = imageops::flip_horizontal(&crops[4]);
        assert_eq!(crops[7], bottom_right_flipped);
        let top_left_flipped = imageops::flip_horizontal(&crops[1]);
        assert_eq!(crops[8], top_left_flipped);
        let bottom_left_flipped = imageops::flip_horizontal(&crops[2]);
        assert_eq!(crops[9], bottom_left_flipped);
    }

    #[test]
    fn ten_crop_center_matches_mirror_on_even_margin() {
        let img = gradient(8, 8);
        let crops = ten_crop(&img, (4, 4)).unwrap();
        assert_eq!(crops[5], imageops::flip_horizontal(&crops[0]));
    }

    #[test]
    fn ten_crop_corners_pick_expected_pixels() {
        let img = gradient(10, 10);
        let crops = ten_crop(&img, (4, 4)).unwrap();
        assert_eq!(crops[1].get_pixel(0, 0), img.get_pixel(0, 0));
        assert_eq!(crops[2].get_pixel(0, 0), img.get_pixel(0, 6));
        assert_eq!(crops[3].get_pixel(0, 0), img.get_pixel(6, 0));
        assert_eq!(crops[4].get_pixel(3, 3), img.get_pixel(9, 9));
        assert_eq!(crops[0].get_pixel(0, 0), img.get_pixel(3, 3));
    }

    #[test]
    fn ten_crop_rejects_small_image() {
        let img = gradient(5, 5);
        let err = ten_crop(&img, (6, 4)).unwrap_err();
        assert!(matches!(err, FashionError::CropTooLarge { .. }));
        assert!(center_crop(&img, (4, 6)).is_err());
    }

    #[test]
    fn resize_short_keeps_aspect() {
        let img = gradient(100, 50);
        let out = resize_short(&img, 20);
        assert_eq!(out.dimensions(), (40, 20));

        let img = gradient(30, 60);
        let out = resize_short(&img, 15);
        assert_eq!(out.dimensions(), (15, 30));
    }

    #[test]
    fn train_transform_yields_crop_size() {
        let mut rng = StdRng::seed_from_u64(7);
        let img = DynamicImage::ImageRgb32F(gradient(300, 280));
        let out = train_transform(img, &ColorJitter::default(), &mut rng).unwrap();
        assert_eq!(out.dimensions(), (CROP_SIZE, CROP_SIZE));
    }

    #[test]
    fn grayscale_equalises_channels() {
        let mut img = gradient(4, 4);
        grayscale(&mut img);
        for p in img.pixels() {
            assert_eq!(p.0[0], p.0[1]);
            assert_eq!(p.0[1], p.0[2]);
        }
    }

    #[test]
    fn zero_hue_rotation_is_near_identity() {
        let src = gradient(4, 4);
        let mut img = src.clone();
        hue(&mut img, 0.0);
        for (a, b) in src.pixels().zip(img.pixels()) {
            for c in 0..3 {
                assert!((a.0[c] - b.0[c]).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn chw_layout_splits_planes() {
        let img = Rgb32FImage::from_fn(2, 1, |x, _| Rgb([x as f32, 10.0 + x as f32, 20.0 + x as f32]));
        assert_eq!(to_chw(&img), vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0]);
    }
}
