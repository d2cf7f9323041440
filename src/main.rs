use anyhow::Result;
use clap::Parser;

use tilegraph::cli::{run, Cli};

fn main() -> Result<()> {
    run(Cli::parse())
}
