mod color;

use std::sync::Arc;

use anyhow::Result;
use clap::ValueEnum;
pub use color::*;
use image::DynamicImage;
use ndarray::Array3;

/// 图片预处理：解码后的图片 -> 模型输入张量 (C, H, W)
pub trait Transform: Send + Sync {
    fn apply(&self, img: DynamicImage) -> Result<Array3<f32>>;
}

/// 推理模型：一批输入张量 -> 等长的一批定长特征向量
///
/// 模型内部可以自行并行，调用方视角是同步阻塞的
pub trait Model: Send + Sync {
    fn forward(&self, inputs: &[Array3<f32>]) -> Result<Vec<Vec<f32>>>;
}

/// 内置任务名称，每个任务对应一组固定的 transform + model
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// 4x4x4 RGB 联合直方图，64 维
    RgbHist,
    /// 每通道均值和标准差，6 维
    MeanRgb,
}

/// 一组可插拔的预处理和模型实现，启动时按名称选择
pub struct Job {
    pub transform: Arc<dyn Transform>,
    pub model: Arc<dyn Model>,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        match kind {
            JobKind::RgbHist => Self {
                transform: Arc::new(ResizeTransform::new(64)),
                model: Arc::new(RgbHistModel::new(4)),
            },
            JobKind::MeanRgb => Self {
                transform: Arc::new(ResizeTransform::new(64)),
                model: Arc::new(MeanRgbModel),
            },
        }
    }
}
