use anyhow::{Result, ensure};
use image::DynamicImage;
use image::imageops::FilterType;
use ndarray::{Array3, Axis};

use super::{Model, Transform};

/// 缩放到固定边长，并转为取值 [0,1] 的 (C, H, W) 张量
pub struct ResizeTransform {
    size: u32,
}

impl ResizeTransform {
    pub fn new(size: u32) -> Self {
        Self { size }
    }
}

impl Transform for ResizeTransform {
    fn apply(&self, img: DynamicImage) -> Result<Array3<f32>> {
        let img = img.resize_exact(self.size, self.size, FilterType::Triangle).to_rgb8();
        let (width, height) = img.dimensions();
        let mut tensor = Array3::zeros((3, height as usize, width as usize));
        for (x, y, pixel) in img.enumerate_pixels() {
            for c in 0..3 {
                tensor[[c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }
        Ok(tensor)
    }
}

/// RGB 联合直方图特征，输出 bins^3 维的 L1 归一化向量
pub struct RgbHistModel {
    bins: usize,
}

impl RgbHistModel {
    pub fn new(bins: usize) -> Self {
        Self { bins }
    }

    fn histogram(&self, tensor: &Array3<f32>) -> Result<Vec<f32>> {
        let (channels, height, width) = tensor.dim();
        ensure!(channels == 3, "直方图特征需要 3 通道输入, 实际为 {} 通道", channels);

        let bin = |v: f32| ((v * self.bins as f32) as usize).min(self.bins - 1);
        let mut hist = vec![0f32; self.bins * self.bins * self.bins];
        for y in 0..height {
            for x in 0..width {
                let r = bin(tensor[[0, y, x]]);
                let g = bin(tensor[[1, y, x]]);
                let b = bin(tensor[[2, y, x]]);
                hist[r * self.bins * self.bins + g * self.bins + b] += 1.0;
            }
        }

        let total = (height * width) as f32;
        for v in &mut hist {
            *v /= total;
        }
        Ok(hist)
    }
}

impl Model for RgbHistModel {
    fn forward(&self, inputs: &[Array3<f32>]) -> Result<Vec<Vec<f32>>> {
        inputs.iter().map(|t| self.histogram(t)).collect()
    }
}

/// 每通道均值 + 标准差，输出 6 维向量
pub struct MeanRgbModel;

impl Model for MeanRgbModel {
    fn forward(&self, inputs: &[Array3<f32>]) -> Result<Vec<Vec<f32>>> {
        inputs
            .iter()
            .map(|tensor| {
                let (channels, _, _) = tensor.dim();
                ensure!(channels == 3, "均值特征需要 3 通道输入, 实际为 {} 通道", channels);
                let mut features = Vec::with_capacity(6);
                for c in 0..3 {
                    features.push(tensor.index_axis(Axis(0), c).mean().unwrap_or(0.0));
                }
                for c in 0..3 {
                    features.push(tensor.index_axis(Axis(0), c).std(0.0));
                }
                Ok(features)
            })
            .collect()
    }
}
