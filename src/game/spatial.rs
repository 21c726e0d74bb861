//! Uniform grid index over the arena for neighbour queries
//!
//! Divides the arena into square cells and files each entity under the cell
//! containing its position. Collision queries only check the entity's own
//! cell and its 8 neighbours.

use smallvec::SmallVec;

use crate::config::GameConfig;
use crate::game::entity::EntityId;
use crate::util::vec2::Vec2;

/// Initial capacity for entity vectors within cells
const CELL_INITIAL_CAPACITY: usize = 4;

/// Cell indices of one 3x3 neighbourhood
pub type Neighborhood = SmallVec<[usize; 9]>;

/// Indexing faults. The caller logs these and skips the entity for the tick.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpatialError {
    #[error("position ({0}, {1}) is not finite")]
    NonFinite(f32, f32),
    #[error("position ({x}, {y}) falls outside the {cells_per_row}x{cells_per_row} grid")]
    OutOfBounds { x: f32, y: f32, cells_per_row: usize },
    #[error("cell {0} does not exist")]
    InvalidCell(usize),
}

/// Dense spatial grid covering the whole arena
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    /// Inverse cell size for fast position-to-cell conversion
    inv_cell_size: f32,
    cells_per_row: usize,
    /// Whether neighbourhoods wrap around the arena edges
    wrap: bool,
    /// Flat bucket array, indexed by `row * cells_per_row + col`
    cells: Vec<Vec<EntityId>>,
    /// Pre-allocated neighbor offsets for 9-cell query
    neighbor_offsets: [(i64, i64); 9],
}

impl SpatialGrid {
    /// Create a grid of `cells_per_row`² cells of `cell_size` world units
    pub fn new(cell_size: f32, cells_per_row: usize, wrap: bool) -> Self {
        let cell_count = cells_per_row * cells_per_row;
        Self {
            inv_cell_size: 1.0 / cell_size,
            cells_per_row,
            wrap,
            cells: (0..cell_count)
                .map(|_| Vec::with_capacity(CELL_INITIAL_CAPACITY))
                .collect(),
            neighbor_offsets: [
                (-1, -1), (0, -1), (1, -1),
                (-1,  0), (0,  0), (1,  0),
                (-1,  1), (0,  1), (1,  1),
            ],
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.cell_size, config.cells_per_row(), config.wrap_neighbors)
    }

    /// Convert a world position to its flat cell index
    pub fn cell_for(&self, position: Vec2) -> Result<usize, SpatialError> {
        if !position.is_finite() {
            return Err(SpatialError::NonFinite(position.x, position.y));
        }
        let col = (position.x * self.inv_cell_size).floor() as i64;
        let row = (position.y * self.inv_cell_size).floor() as i64;
        let n = self.cells_per_row as i64;
        if col < 0 || row < 0 || col >= n || row >= n {
            return Err(SpatialError::OutOfBounds {
                x: position.x,
                y: position.y,
                cells_per_row: self.cells_per_row,
            });
        }
        Ok((row * n + col) as usize)
    }

    /// File an entity under a cell
    pub fn insert(&mut self, id: EntityId, cell: usize) -> Result<(), SpatialError> {
        let bucket = self
            .cells
            .get_mut(cell)
            .ok_or(SpatialError::InvalidCell(cell))?;
        bucket.push(id);
        Ok(())
    }

    /// Remove an entity from a cell.
    /// Returns true if the entity was found and removed
    pub fn remove(&mut self, id: EntityId, cell: usize) -> bool {
        if let Some(bucket) = self.cells.get_mut(cell) {
            if let Some(idx) = bucket.iter().position(|&other| other == id) {
                bucket.swap_remove(idx);
                return true;
            }
        }
        false
    }

    /// Move an entity to the cell matching `position`.
    ///
    /// Returns `Ok(Some(cell))` when the entity changed cells, `Ok(None)` when
    /// it stayed put. On error the entity is left in its previous cell.
    pub fn relocate(
        &mut self,
        id: EntityId,
        current: Option<usize>,
        position: Vec2,
    ) -> Result<Option<usize>, SpatialError> {
        let cell = self.cell_for(position)?;
        if current == Some(cell) {
            return Ok(None);
        }
        self.insert(id, cell)?;
        if let Some(previous) = current {
            self.remove(id, previous);
        }
        Ok(Some(cell))
    }

    /// Entities filed under one cell
    pub fn entities_in(&self, cell: usize) -> &[EntityId] {
        self.cells.get(cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The cell itself plus its 8 Moore neighbours.
    ///
    /// With wrapping enabled the neighbourhood continues across the arena
    /// edges; otherwise it is clipped. Duplicates (tiny grids) are dropped.
    pub fn neighbors(&self, cell: usize) -> Neighborhood {
        let mut result = Neighborhood::new();
        if cell >= self.cells.len() {
            return result;
        }
        let n = self.cells_per_row as i64;
        let col = cell as i64 % n;
        let row = cell as i64 / n;

        for &(dx, dy) in &self.neighbor_offsets {
            let (mut c, mut r) = (col + dx, row + dy);
            if self.wrap {
                c = c.rem_euclid(n);
                r = r.rem_euclid(n);
            } else if c < 0 || r < 0 || c >= n || r >= n {
                continue;
            }
            let idx = (r * n + c) as usize;
            if !result.contains(&idx) {
                result.push(idx);
            }
        }
        result
    }

    /// Entities in the 3x3 neighbourhood of `cell`
    pub fn query(&self, cell: usize) -> impl Iterator<Item = EntityId> + '_ {
        self.neighbors(cell)
            .into_iter()
            .flat_map(move |idx| self.cells[idx].iter().copied())
    }

    /// Get statistics about the grid
    pub fn stats(&self) -> SpatialGridStats {
        let non_empty_cells = self.cells.iter().filter(|c| !c.is_empty()).count();
        let total_entities: usize = self.cells.iter().map(|c| c.len()).sum();
        let max_per_cell = self.cells.iter().map(|c| c.len()).max().unwrap_or(0);

        SpatialGridStats {
            non_empty_cells,
            total_entities,
            max_per_cell,
        }
    }
}

/// Statistics about the spatial grid
#[derive(Debug, Clone)]
pub struct SpatialGridStats {
    pub non_empty_cells: usize,
    pub total_entities: usize,
    pub max_per_cell: usize,
}
