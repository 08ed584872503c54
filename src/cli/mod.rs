mod decode;
mod extract;
mod index;

pub use decode::*;
pub use extract::*;
pub use index::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
