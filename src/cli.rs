///! CLI commands for tilegraph

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::builder::{build, BuildConfig};
use crate::osm::OsmData;

#[derive(Parser)]
#[command(name = "tilegraph")]
#[command(about = "Tiled road-network graph builder", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build routable graph tiles from parsed OSM artifacts
    Build {
        /// ways.bin from the parser
        #[arg(long)]
        ways: PathBuf,

        /// way_nodes.bin from the parser
        #[arg(long)]
        way_nodes: PathBuf,

        /// JSON side file with restrictions, refs, and name tables
        #[arg(long)]
        metadata: Option<PathBuf>,

        /// JSON build configuration (hierarchy, concurrency)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory for tiles
        #[arg(short, long)]
        outdir: PathBuf,

        /// Directory for the intermediate node/edge sequences
        /// (defaults to the output directory)
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Worker count override for tile building
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build {
            ways,
            way_nodes,
            metadata,
            config,
            outdir,
            workdir,
            concurrency,
        } => {
            let mut build_config = match config {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    serde_json::from_str::<BuildConfig>(&text)
                        .with_context(|| format!("Failed to parse {}", path.display()))?
                }
                None => BuildConfig::default(),
            };
            if let Some(n) = concurrency {
                build_config.concurrency = n;
            }

            let mut osmdata = match metadata {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    serde_json::from_str::<OsmData>(&text)
                        .with_context(|| format!("Failed to parse {}", path.display()))?
                }
                None => OsmData::default(),
            };
            osmdata.ways_file = ways;
            osmdata.way_nodes_file = way_nodes;

            let workdir = workdir.unwrap_or_else(|| outdir.clone());
            build(&build_config, &osmdata, &workdir, &outdir)?;
            Ok(())
        }
    }
}
