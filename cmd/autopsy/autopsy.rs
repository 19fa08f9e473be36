use clap::Parser;
use tokio_util::sync::CancellationToken;

mod cli;
mod initializers;

use crate::cli::CLI;
use crate::initializers::init_tracing;

fn main() -> eyre::Result<()> {
    let CLI { opts, command } = CLI::parse();
    init_tracing(&opts);
    command.run(CancellationToken::new())
}
