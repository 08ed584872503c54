use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, ensure};
use indicatif::ProgressBar;
use log::{error, info, warn};
use ndarray::Array3;
use serde_json::json;

use crate::codec::FeatureRecord;
use crate::job::Model;
use crate::queue::{BatchQueue, ShutdownFlag};

/// 队列最多缓存的批次数量，用于吸收推理和写盘之间的短期吞吐差
pub const QUEUE_CAPACITY: usize = 10_000;
/// 消费者单次等待新批次的超时时间
pub const GET_TIMEOUT: Duration = Duration::from_secs(5);
/// 每处理多少个批次打印一次进度日志
pub const LOG_FREQUENCY: u64 = 10;

/// 一个批次的模型输入，三个字段按位置一一对应
pub struct InputBatch {
    pub inputs: Vec<Array3<f32>>,
    pub labels: Vec<i64>,
    pub payloads: Vec<String>,
}

/// 批次来源，通常由数据集加上预处理实现
pub trait BatchSource {
    /// 返回下一个批次，数据耗尽时返回 None；任何错误都视为致命错误
    fn next_batch(&mut self) -> Result<Option<InputBatch>>;
}

/// 一次完整运行的统计信息
#[derive(Debug)]
pub struct PipelineStats {
    pub batches: u64,
    pub records: u64,
    pub written: u64,
    pub elapsed: Duration,
}

/// 生产者：逐批驱动模型推理，把组装好的记录批量入队
struct InferenceDriver {
    model: Arc<dyn Model>,
    queue: BatchQueue<Vec<FeatureRecord>>,
    progress: ProgressBar,
}

impl InferenceDriver {
    fn run(&self, source: &mut dyn BatchSource) -> Result<(u64, u64)> {
        let start = Instant::now();
        let mut batches = 0u64;
        let mut records = 0u64;

        while let Some(batch) = source.next_batch()? {
            let features = self.model.forward(&batch.inputs)?;
            ensure!(
                features.len() == batch.labels.len() && features.len() == batch.payloads.len(),
                "批次内各字段长度不一致: features={} labels={} payloads={}",
                features.len(),
                batch.labels.len(),
                batch.payloads.len()
            );

            let mut out = Vec::with_capacity(features.len());
            for ((values, label), payload) in
                features.into_iter().zip(batch.labels).zip(batch.payloads)
            {
                out.push(make_record(values, label, &payload)?);
            }

            batches += 1;
            records += out.len() as u64;
            self.progress.inc(out.len() as u64);
            self.queue.put(out)?;

            if batches % LOG_FREQUENCY == 0 {
                info!(
                    "已处理 {} 个批次共 {} 条记录, 耗时 {:.3}s",
                    batches,
                    records,
                    start.elapsed().as_secs_f64()
                );
            }
        }
        Ok((batches, records))
    }
}

/// 由一条模型输出和对应的标签、来源路径组装一条记录
///
/// id 取来源路径的文件名，payload 是引用原始路径的 JSON 元数据
fn make_record(values: Vec<f32>, label: i64, source_path: &str) -> Result<FeatureRecord> {
    let id = Path::new(source_path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_path.to_string());
    let payload = serde_json::to_vec(&json!({ "img": source_path }))?;
    Ok(FeatureRecord { values, label, id, payload })
}

/// 消费者：在独立线程里排空队列，把记录逐条追加到输出文件
struct PersistWriter<W> {
    queue: BatchQueue<Vec<FeatureRecord>>,
    shutdown: ShutdownFlag,
    output: W,
}

impl<W: Write> PersistWriter<W> {
    /// 循环到关闭标志已置位且队列为空为止，保证关闭前入队的记录全部落盘
    fn run(mut self) -> u64 {
        let mut written = 0u64;
        while !(self.shutdown.is_set() && self.queue.is_empty()) {
            let Some(batch) = self.queue.get(GET_TIMEOUT) else {
                if !self.shutdown.is_set() {
                    warn!("写入队列可能为空, 继续等待");
                }
                continue;
            };
            for record in &batch {
                // 单条记录写入失败只记录日志，不中断整个管线；
                // 先完整编码再一次性写入，跳过的记录不会留下残缺的长度前缀
                let data = record.encode();
                match self.output.write_all(&data).and_then(|()| self.output.flush()) {
                    Ok(()) => written += 1,
                    Err(e) => error!("写入记录 {} 失败: {}", record.id, e),
                }
            }
        }
        written
    }
}

/// 管线控制器：启动写线程、驱动生产者、两阶段关闭、汇总统计
pub struct Pipeline {
    model: Arc<dyn Model>,
    capacity: usize,
    progress: ProgressBar,
}

impl Pipeline {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self { model, capacity: QUEUE_CAPACITY, progress: ProgressBar::hidden() }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// 阻塞运行整个管线直到数据耗尽
    ///
    /// 生产者出错时同样会置位关闭标志并等待写线程排空队列，
    /// 已入队的记录不会因此丢失
    pub fn run(&self, source: &mut dyn BatchSource, output: &Path) -> Result<PipelineStats> {
        let start = Instant::now();
        // 先打开输出文件，让配置错误在管线启动前暴露
        let file = File::create(output)
            .with_context(|| format!("无法创建输出文件: {}", output.display()))?;

        let queue = BatchQueue::with_capacity(self.capacity);
        let shutdown = ShutdownFlag::new();

        let writer = PersistWriter {
            queue: queue.clone(),
            shutdown: shutdown.clone(),
            output: BufWriter::new(file),
        };
        let writer_thread = thread::Builder::new()
            .name("persist-writer".to_string())
            .spawn(move || writer.run())
            .context("无法启动写线程")?;

        let driver =
            InferenceDriver { model: self.model.clone(), queue, progress: self.progress.clone() };
        let result = driver.run(source);

        // 无论成功与否都先通知写线程排空并退出
        shutdown.set();
        let written = writer_thread.join().map_err(|_| anyhow!("写线程发生 panic"))?;

        let (batches, records) = result?;
        let elapsed = start.elapsed();
        info!(
            "共处理 {} 个批次 {} 条记录, 落盘 {} 条, 耗时 {:.3}s",
            batches,
            records,
            written,
            elapsed.as_secs_f64()
        );
        Ok(PipelineStats { batches, records, written, elapsed })
    }
}
