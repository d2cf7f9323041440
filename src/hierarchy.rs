///! Tile hierarchy: a grid of fixed geographic cells per level
///!
///! Tiles cover the world row-major from (-90, -180); the most detailed
///! level is where the routable graph is built.

use crate::graph::GraphId;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TileLevel {
    pub level: u8,
    /// Tile edge length in degrees.
    pub size: f64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TileHierarchy {
    levels: Vec<TileLevel>,
}

impl TileHierarchy {
    pub fn new(mut levels: Vec<TileLevel>) -> TileHierarchy {
        levels.sort_by_key(|l| l.level);
        TileHierarchy { levels }
    }

    pub fn levels(&self) -> &[TileLevel] {
        &self.levels
    }

    /// The most detailed level.
    pub fn local_level(&self) -> u8 {
        self.levels.last().map(|l| l.level).unwrap_or(0)
    }

    pub fn tile_size(&self, level: u8) -> f64 {
        self.levels
            .iter()
            .find(|l| l.level == level)
            .map(|l| l.size)
            .unwrap_or(0.25)
    }

    fn columns(&self, level: u8) -> u32 {
        (360.0 / self.tile_size(level)).round() as u32
    }

    /// Tile containing `(lat, lng)` at `level`.
    pub fn tile_id(&self, lat: f64, lng: f64, level: u8) -> u32 {
        let size = self.tile_size(level);
        let columns = self.columns(level);
        let rows = (180.0 / size).round() as u32;
        let row = (((lat + 90.0) / size).floor() as i64).clamp(0, rows as i64 - 1) as u32;
        let col = (((lng + 180.0) / size).floor() as i64).clamp(0, columns as i64 - 1) as u32;
        row * columns + col
    }

    /// Graph id (intra-tile id 0) of the tile containing `(lat, lng)`.
    pub fn graph_id(&self, lat: f64, lng: f64, level: u8) -> GraphId {
        GraphId::new(level, self.tile_id(lat, lng, level), 0)
    }
}

impl Default for TileHierarchy {
    fn default() -> TileHierarchy {
        TileHierarchy::new(vec![
            TileLevel { level: 0, size: 4.0 },
            TileLevel { level: 1, size: 1.0 },
            TileLevel { level: 2, size: 0.25 },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_id_grid() {
        let hierarchy = TileHierarchy::default();
        // (0, 0) at the local level: row 360, col 720 in a 1440-wide grid.
        assert_eq!(hierarchy.tile_id(0.0, 0.0, 2), 360 * 1440 + 720);
        // One tile east.
        assert_eq!(hierarchy.tile_id(0.0, 0.25, 2), 360 * 1440 + 721);
        // One tile north.
        assert_eq!(hierarchy.tile_id(0.25, 0.0, 2), 361 * 1440 + 720);
    }

    #[test]
    fn test_tile_assignment_is_pure() {
        let hierarchy = TileHierarchy::default();
        let a = hierarchy.graph_id(40.0412, -76.3001, 2);
        let b = hierarchy.graph_id(40.0412, -76.3001, 2);
        assert_eq!(a, b);
        assert_eq!(a.id(), 0);
        assert_eq!(a.level(), 2);
    }

    #[test]
    fn test_local_level_is_most_detailed() {
        let hierarchy = TileHierarchy::default();
        assert_eq!(hierarchy.local_level(), 2);
        assert_eq!(hierarchy.tile_size(2), 0.25);
        assert_eq!(hierarchy.tile_size(0), 4.0);
    }

    #[test]
    fn test_bounds_clamped() {
        let hierarchy = TileHierarchy::default();
        // Poles and the antimeridian stay inside the grid.
        let rows = (180.0 / 0.25f64).round() as u32;
        let cols = (360.0 / 0.25f64).round() as u32;
        assert!(hierarchy.tile_id(90.0, 180.0, 2) < rows * cols);
        assert_eq!(hierarchy.tile_id(-90.0, -180.0, 2), 0);
    }
}
