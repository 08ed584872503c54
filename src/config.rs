use clap::{Parser, Subcommand};

use crate::cli::*;

#[derive(Parser, Debug, Clone)]
#[command(name = "imfeat", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 批量提取图片特征并写入二进制记录文件
    Extract(ExtractCommand),
    /// 解码并打印记录文件的内容
    Decode(DecodeCommand),
    /// 扫描目录生成索引文件
    Index(IndexCommand),
}
