use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, ensure};
use log::info;
use ndarray::Array3;
use rayon::prelude::*;

use crate::job::Transform;
use crate::pipeline::{BatchSource, InputBatch};

/// 数据集中的一条样本
#[derive(Debug)]
pub struct Sample {
    /// 图片的完整路径
    pub path: PathBuf,
    /// 类别标签
    pub label: i64,
    /// 透传给下游的相对路径
    pub payload: String,
}

/// 基于索引文件的图片数据集
///
/// 索引文件每行为 `相对路径<分隔符>标签`，例如：
/// ```text
/// train/n01440764/n01440764_10026.JPEG	449
/// ```
#[derive(Debug)]
pub struct IndexDataset {
    samples: Vec<Sample>,
}

impl IndexDataset {
    /// 读取索引文件，limit 限制最多读取的行数
    pub fn load(
        root: &Path,
        index: &Path,
        delimiter: &str,
        limit: Option<usize>,
    ) -> Result<Self> {
        let start = Instant::now();
        let file = File::open(index)
            .with_context(|| format!("无法打开索引文件: {}", index.display()))?;

        let mut samples = vec![];
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            if let Some(limit) = limit {
                if samples.len() >= limit {
                    break;
                }
            }
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (path, label) = line
                .split_once(delimiter)
                .with_context(|| format!("索引文件第 {} 行缺少分隔符: {:?}", lineno + 1, line))?;
            let label = label.trim().parse::<i64>().with_context(|| {
                format!("索引文件第 {} 行的标签不是整数: {:?}", lineno + 1, label)
            })?;
            samples.push(Sample { path: root.join(path), label, payload: path.to_string() });
        }

        info!("共读取 {} 条记录, 耗时 {:.3}s", samples.len(), start.elapsed().as_secs_f64());
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// 批次加载器：按 batch_size 切分数据集，完成图片读取和预处理
///
/// num_workers 大于 0 时在独立的 rayon 线程池里并行加载一个批次
pub struct BatchLoader {
    dataset: IndexDataset,
    transform: Arc<dyn Transform>,
    batch_size: usize,
    pool: Option<rayon::ThreadPool>,
    cursor: usize,
}

impl BatchLoader {
    pub fn new(
        dataset: IndexDataset,
        transform: Arc<dyn Transform>,
        batch_size: usize,
        num_workers: usize,
    ) -> Result<Self> {
        ensure!(batch_size > 0, "batch_size 必须大于 0");
        let pool = match num_workers {
            0 => None,
            n => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n.min(num_cpus::get()))
                    .build()
                    .context("无法创建数据加载线程池")?,
            ),
        };
        Ok(Self { dataset, transform, batch_size, pool, cursor: 0 })
    }

    fn load_one(transform: &dyn Transform, sample: &Sample) -> Result<Array3<f32>> {
        let img = image::open(&sample.path)
            .with_context(|| format!("无法读取图片: {}", sample.path.display()))?;
        transform.apply(img)
    }
}

impl BatchSource for BatchLoader {
    fn next_batch(&mut self) -> Result<Option<InputBatch>> {
        if self.cursor >= self.dataset.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.dataset.len());
        let chunk = &self.dataset.samples[self.cursor..end];
        self.cursor = end;

        let transform = &*self.transform;
        let inputs: Vec<Array3<f32>> = match &self.pool {
            Some(pool) => pool.install(|| {
                chunk.par_iter().map(|s| Self::load_one(transform, s)).collect::<Result<_>>()
            })?,
            None => chunk.iter().map(|s| Self::load_one(transform, s)).collect::<Result<_>>()?,
        };

        Ok(Some(InputBatch {
            inputs,
            labels: chunk.iter().map(|s| s.label).collect(),
            payloads: chunk.iter().map(|s| s.payload.clone()).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_index(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("index.txt");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_index() {
        let dir = TempDir::new().unwrap();
        let index = write_index(&dir, "a/1.jpg\t3\nb/2.jpg\t7\n");

        let dataset = IndexDataset::load(dir.path(), &index, "\t", None).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.samples[0].path, dir.path().join("a/1.jpg"));
        assert_eq!(dataset.samples[0].label, 3);
        assert_eq!(dataset.samples[0].payload, "a/1.jpg");
        assert_eq!(dataset.samples[1].label, 7);
    }

    #[test]
    fn test_load_index_custom_delimiter_and_limit() {
        let dir = TempDir::new().unwrap();
        let index = write_index(&dir, "a.jpg,1\nb.jpg,2\nc.jpg,3\n");

        let dataset = IndexDataset::load(dir.path(), &index, ",", Some(2)).unwrap();
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn test_load_index_missing_delimiter() {
        let dir = TempDir::new().unwrap();
        let index = write_index(&dir, "no-delimiter-here\n");

        let err = IndexDataset::load(dir.path(), &index, "\t", None).unwrap_err();
        assert!(err.to_string().contains("缺少分隔符"));
    }

    #[test]
    fn test_load_index_bad_label() {
        let dir = TempDir::new().unwrap();
        let index = write_index(&dir, "a.jpg\tcat\n");

        let err = IndexDataset::load(dir.path(), &index, "\t", None).unwrap_err();
        assert!(err.to_string().contains("不是整数"));
    }

    #[test]
    fn test_batch_loader_reads_images() {
        let dir = TempDir::new().unwrap();
        for (name, color) in [("red.png", [255u8, 0, 0]), ("blue.png", [0, 0, 255])] {
            image::RgbImage::from_pixel(4, 4, image::Rgb(color))
                .save(dir.path().join(name))
                .unwrap();
        }
        let index = write_index(&dir, "red.png\t0\nblue.png\t1\n");

        let dataset = IndexDataset::load(dir.path(), &index, "\t", None).unwrap();
        let transform: Arc<dyn Transform> = Arc::new(crate::job::ResizeTransform::new(8));
        let mut loader = BatchLoader::new(dataset, transform, 2, 0).unwrap();

        let batch = loader.next_batch().unwrap().unwrap();
        assert_eq!(batch.inputs.len(), 2);
        assert_eq!(batch.labels, vec![0, 1]);
        assert_eq!(batch.payloads, vec!["red.png", "blue.png"]);
        assert_eq!(batch.inputs[0].dim(), (3, 8, 8));

        assert!(loader.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_batch_loader_missing_image_is_fatal() {
        let dir = TempDir::new().unwrap();
        let index = write_index(&dir, "missing.png\t0\n");

        let dataset = IndexDataset::load(dir.path(), &index, "\t", None).unwrap();
        let transform: Arc<dyn Transform> = Arc::new(crate::job::ResizeTransform::new(8));
        let mut loader = BatchLoader::new(dataset, transform, 1, 0).unwrap();

        assert!(loader.next_batch().is_err());
    }
}
