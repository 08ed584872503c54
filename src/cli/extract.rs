use std::path::PathBuf;

use anyhow::ensure;
use clap::Parser;
use indicatif::ProgressBar;
use tokio::task::spawn_blocking;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::dataset::{BatchLoader, IndexDataset};
use crate::job::{Job, JobKind};
use crate::pipeline::Pipeline;
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    /// 图片根目录
    #[arg(short, long)]
    pub dir: PathBuf,
    /// 索引文件，每行为 相对路径<分隔符>标签
    #[arg(short, long)]
    pub input: PathBuf,
    /// 特征输出文件
    #[arg(short, long)]
    pub output: PathBuf,
    /// 使用的内置任务
    #[arg(short, long, value_enum)]
    pub job: JobKind,
    /// 索引文件的字段分隔符
    #[arg(long, default_value = "\t")]
    pub input_field_delimiter: String,
    /// 批大小
    #[arg(short, long, default_value_t = 1)]
    pub batch_size: usize,
    /// 加载图片的工作线程数量，0 表示在当前线程加载
    #[arg(short = 'w', long, default_value_t = 0)]
    pub num_workers: usize,
    /// 最多处理的样本数量
    #[arg(short, long)]
    pub limit: Option<usize>,
}

impl SubCommandExtend for ExtractCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        ensure!(self.dir.is_dir(), "--dir 必须是一个存在的目录: {}", self.dir.display());

        let job = Job::new(self.job);
        let dataset =
            IndexDataset::load(&self.dir, &self.input, &self.input_field_delimiter, self.limit)?;
        let pb = ProgressBar::new(dataset.len() as u64).with_style(pb_style());

        let mut loader =
            BatchLoader::new(dataset, job.transform.clone(), self.batch_size, self.num_workers)?;
        let pipeline = Pipeline::new(job.model.clone()).with_progress(pb.clone());

        let output = self.output.clone();
        let stats = spawn_blocking(move || pipeline.run(&mut loader, &output)).await??;

        pb.finish_with_message("特征提取完成");
        println!("共写入 {} 条记录, 耗时 {:.3}s", stats.written, stats.elapsed.as_secs_f64());
        Ok(())
    }
}
