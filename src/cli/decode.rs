use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use crate::cli::SubCommandExtend;
use crate::codec::FeatureRecord;
use crate::config::Opts;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    /// 逐字段打印
    Default,
    /// JSON 格式
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct DecodeCommand {
    /// 记录文件，缺省时从标准输入读取
    #[arg(short, long)]
    pub input: Option<PathBuf>,
    /// 输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Default)]
    pub format: OutputFormat,
    /// 最多解码的记录数量
    #[arg(short, long)]
    pub limit: Option<usize>,
}

impl SubCommandExtend for DecodeCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let mut reader: Box<dyn Read> = match &self.input {
            Some(path) => Box::new(BufReader::new(
                File::open(path).with_context(|| format!("无法打开记录文件: {}", path.display()))?,
            )),
            None => Box::new(std::io::stdin()),
        };

        let limit = self.limit.unwrap_or(usize::MAX);
        let mut count = 0usize;
        while count < limit {
            let Some(record) = FeatureRecord::read_from(&mut reader)? else {
                break;
            };
            count += 1;
            match self.format {
                OutputFormat::Default => {
                    let line = "-".repeat(40);
                    println!("{} 第 {:06} 条记录 {}", line, count, line);
                    println!("id: {}", record.id);
                    println!("label: {}", record.label);
                    println!("value: {:?}", record.values);
                    println!("payload: {}", String::from_utf8_lossy(&record.payload));
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
            }
        }
        Ok(())
    }
}
