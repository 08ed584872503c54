use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, ensure};
use clap::Parser;
use log::info;
use regex::Regex;
use walkdir::WalkDir;

use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    /// 要扫描的图片根目录
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png,webp")]
    pub suffix: String,
    /// 输出的索引文件，缺省时写到标准输出
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// 写入每一行的占位标签
    #[arg(short, long, default_value_t = 0)]
    pub label: i64,
    /// 字段分隔符
    #[arg(long, default_value = "\t")]
    pub input_field_delimiter: String,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        ensure!(self.path.is_dir(), "扫描路径必须是一个存在的目录: {}", self.path.display());

        let re_suf = format!("(?i)({})", self.suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf).expect("failed to build regex");

        let mut writer: Box<dyn Write> = match &self.output {
            Some(path) => Box::new(BufWriter::new(
                File::create(path)
                    .with_context(|| format!("无法创建索引文件: {}", path.display()))?,
            )),
            None => Box::new(std::io::stdout()),
        };

        let mut count = 0u64;
        for entry in WalkDir::new(&self.path).into_iter().filter_map(|entry| entry.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(ext) = path.extension() else {
                continue;
            };
            if !re_suf.is_match(&ext.to_string_lossy()) {
                continue;
            }
            let rel = path.strip_prefix(&self.path).unwrap_or(path);
            writeln!(writer, "{}{}{}", rel.display(), self.input_field_delimiter, self.label)?;
            count += 1;
        }
        writer.flush()?;

        info!("共扫描到 {} 张图片", count);
        Ok(())
    }
}
