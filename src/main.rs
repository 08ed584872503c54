use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use imfeat::cli::SubCommandExtend;
use imfeat::config::{Opts, SubCommand};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    match &opts.subcmd {
        SubCommand::Extract(cmd) => cmd.run(&opts).await,
        SubCommand::Decode(cmd) => cmd.run(&opts).await,
        SubCommand::Index(cmd) => cmd.run(&opts).await,
    }
}
