//! Per-cell member lists that survive between rebuilds.

use log::debug;

use crate::error::BinError;
use crate::settings::Settings;

#[cfg(test)]
mod tests {
    use super::*;

    fn small_policy() -> GrowthPolicy {
        GrowthPolicy {
            initial: 4,
            increment: 3,
        }
    }

    #[test]
    fn growth_keeps_every_member() {
        let mut store = CellStore::new(small_policy());
        store.resize(2).unwrap();
        for member in 0..1000 {
            store.insert(1, member).unwrap();
        }
        let members = store.members(1);
        assert_eq!(members.len(), 1000);
        assert!(members.iter().copied().eq(0..1000));
        // 4 + 3k >= 1000 first holds for k = 332
        assert_eq!(store.expansions(1), 332);
        assert!(store.members(0).is_empty());
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut store = CellStore::new(small_policy());
        store.resize(3).unwrap();
        for member in 0..10 {
            store.insert(2, member).unwrap();
        }
        let expansions = store.expansions(2);
        store.clear();
        assert!(store.members(2).is_empty());
        assert_eq!(store.expansions(2), expansions);
        assert_eq!(store.total_members(), 0);
    }

    #[test]
    fn resize_presizes_with_high_water_mark() {
        let mut store = CellStore::new(small_policy());
        store.resize(2).unwrap();
        for member in 0..11 {
            store.insert(0, member).unwrap();
        }
        assert_eq!(store.high_water_mark(), 3);

        store.resize(5).unwrap();
        assert_eq!(store.len(), 5);
        for cell in 0..5 {
            assert_eq!(store.expansions(cell), 3);
            assert!(store.members(cell).is_empty());
        }
        // capacity 4 + 3 * 3 = 13 holds 13 members without another expansion
        for member in 0..13 {
            store.insert(4, member).unwrap();
        }
        assert_eq!(store.expansions(4), 3);
        store.insert(4, 13).unwrap();
        assert_eq!(store.expansions(4), 4);
    }

    #[test]
    fn for_each_member_visits_in_insertion_order() {
        let mut store = CellStore::new(GrowthPolicy::default());
        store.resize(1).unwrap();
        for member in [7, 3, 9] {
            store.insert(0, member).unwrap();
        }
        let mut seen = Vec::new();
        store.for_each_member(0, |m| seen.push(m));
        assert_eq!(seen, vec![7, 3, 9]);
        assert_eq!(store.occupancy().collect::<Vec<_>>(), vec![3]);
    }
}

/// Capacity schedule of a cell: `initial` slots, then `increment` more per
/// expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    pub initial: usize,
    pub increment: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            initial: crate::settings::DEFAULT_CELL_CAPACITY,
            increment: crate::settings::DEFAULT_CELL_GROWTH,
        }
    }
}

impl GrowthPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            initial: settings.cell_capacity,
            increment: settings.cell_growth,
        }
    }

    /// Capacity of a cell after `expansions` expansions.
    pub fn capacity_after(&self, expansions: usize) -> usize {
        self.initial + expansions * self.increment
    }
}

/// Unordered member lists, one per cell of the grid.
///
/// **Context**: Cell occupancy is highly uneven. A cell deep inside a large
/// element holds that element and little else, while cells near an atomistic
/// region may hold hundreds of atoms and overlapping elements.
///
/// **How it Works**: Every cell grows by fixed increments and counts its own
/// expansions. Clearing keeps the allocations. When the grid changes size the
/// largest expansion count seen so far is applied to every cell up front.
#[derive(Debug, Clone, Default)]
pub struct CellStore {
    policy: GrowthPolicy,
    cells: Vec<Vec<usize>>,
    expansions: Vec<usize>,
}

impl CellStore {
    pub fn new(policy: GrowthPolicy) -> Self {
        Self {
            policy,
            cells: Vec::new(),
            expansions: Vec::new(),
        }
    }

    pub fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Empties every cell without releasing memory.
    pub fn clear(&mut self) {
        for cell in self.cells.iter_mut() {
            cell.clear();
        }
    }

    /// Sets the number of cells. Existing buffers are kept, new ones are
    /// added, and every cell is emptied and presized to the high-water mark.
    pub fn resize(&mut self, count: usize) -> Result<(), BinError> {
        if count == self.cells.len() {
            self.clear();
            return Ok(());
        }

        let mark = self.high_water_mark();
        let capacity = self.policy.capacity_after(mark);

        self.cells.truncate(count);
        self.cells.resize_with(count, Vec::new);
        self.expansions.clear();
        self.expansions.resize(count, mark);

        for (id, cell) in self.cells.iter_mut().enumerate() {
            cell.clear();
            if cell.capacity() < capacity {
                cell.try_reserve_exact(capacity)
                    .map_err(|_| BinError::OutOfMemory { cell: id, capacity })?;
            }
        }

        debug!(
            "resized cell store to {} cells with capacity {} each",
            count, capacity
        );
        Ok(())
    }

    /// Appends `member` to `cell`, expanding the cell first when it is full.
    pub fn insert(&mut self, cell: usize, member: usize) -> Result<(), BinError> {
        let size = self.cells[cell].len();
        if size >= self.policy.capacity_after(self.expansions[cell]) {
            self.expansions[cell] += 1;
            let capacity = self.policy.capacity_after(self.expansions[cell]);
            self.cells[cell]
                .try_reserve_exact(capacity - size)
                .map_err(|_| BinError::OutOfMemory { cell, capacity })?;
        }
        self.cells[cell].push(member);
        Ok(())
    }

    pub fn members(&self, cell: usize) -> &[usize] {
        &self.cells[cell]
    }

    pub fn for_each_member<F: FnMut(usize)>(&self, cell: usize, mut f: F) {
        for &member in &self.cells[cell] {
            f(member);
        }
    }

    /// Expansions cell `cell` has gone through.
    pub fn expansions(&self, cell: usize) -> usize {
        self.expansions[cell]
    }

    /// Largest expansion count over all cells.
    pub fn high_water_mark(&self) -> usize {
        self.expansions.iter().copied().max().unwrap_or(0)
    }

    /// Members per cell, in cell order.
    pub fn occupancy(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells.iter().map(|cell| cell.len())
    }

    pub fn total_members(&self) -> usize {
        self.occupancy().sum()
    }
}
