///! Driver: run the construction pipeline end to end
///!
///! construct -> sort -> reclassify -> tiles. The first three stages are
///! single-threaded passes over the disk-backed sequences; tile building
///! fans out over a worker pool. Statistics aggregate across workers and
///! print when the run completes.

use anyhow::Result;
use std::path::Path;
use std::time::Instant;

use crate::construct::construct_edges;
use crate::hierarchy::TileHierarchy;
use crate::osm::OsmData;
use crate::reclassify::reclassify_links;
use crate::sort::sort_graph;
use crate::stats::DataQuality;
use crate::tiles::{build_local_tiles, TileBuildContext};

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub hierarchy: TileHierarchy,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for BuildConfig {
    fn default() -> BuildConfig {
        BuildConfig {
            hierarchy: TileHierarchy::default(),
            concurrency: default_concurrency(),
        }
    }
}

/// Build the tiled graph. Intermediate sequences land in `work_dir`,
/// finished tiles in `out_dir`.
pub fn build(
    config: &BuildConfig,
    osmdata: &OsmData,
    work_dir: &Path,
    out_dir: &Path,
) -> Result<DataQuality> {
    let started = Instant::now();
    std::fs::create_dir_all(work_dir)?;
    std::fs::create_dir_all(out_dir)?;

    let nodes_file = work_dir.join("nodes.bin");
    let edges_file = work_dir.join("edges.bin");
    let level = config.hierarchy.local_level();

    construct_edges(osmdata, &nodes_file, &edges_file, &config.hierarchy, level)?;

    let tiles = sort_graph(&nodes_file, &edges_file)?;

    let mut stats = DataQuality::default();
    reclassify_links(&osmdata.ways_file, &nodes_file, &edges_file, &mut stats)?;

    let ctx = TileBuildContext {
        osmdata,
        nodes_file: &nodes_file,
        edges_file: &edges_file,
        out_dir,
    };
    build_local_tiles(config.concurrency, &ctx, &tiles, &mut stats)?;

    stats.log_statistics();
    stats.log_issues();
    println!(
        "✅ Built {} tiles in {:.2}s",
        tiles.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(stats)
}
