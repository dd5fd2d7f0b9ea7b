//! Sparse two-dimensional index over integer coordinates.

use crate::types::Point;
use std::collections::HashMap;

/// Sparse `(x, y) -> T` container.
///
/// Point lookup, insert and delete are O(1). `keys()` and `get_all()` borrow
/// the table, so a pass always sees one consistent snapshot and can be
/// restarted by calling them again.
#[derive(Debug, Clone, PartialEq)]
pub struct Table<T> {
    cells: HashMap<Point, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            cells: HashMap::new(),
        }
    }
}

impl<T> Table<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, x: i64, y: i64) -> Option<&T> {
        self.cells.get(&Point::new(x, y))
    }

    pub fn get_mut(&mut self, x: i64, y: i64) -> Option<&mut T> {
        self.cells.get_mut(&Point::new(x, y))
    }

    pub fn has(&self, x: i64, y: i64) -> bool {
        self.cells.contains_key(&Point::new(x, y))
    }

    /// Inserts or replaces the value at `(x, y)`, returning the old one.
    pub fn set(&mut self, x: i64, y: i64, value: T) -> Option<T> {
        self.cells.insert(Point::new(x, y), value)
    }

    /// Deletes the value at `(x, y)`. Returns whether anything was removed.
    pub fn remove(&mut self, x: i64, y: i64) -> bool {
        self.take(x, y).is_some()
    }

    pub fn take(&mut self, x: i64, y: i64) -> Option<T> {
        self.cells.remove(&Point::new(x, y))
    }

    /// Moves every entry matching `predicate` into a new table and returns it.
    pub fn remove_if<F>(&mut self, mut predicate: F) -> Table<T>
    where
        F: FnMut(Point, &T) -> bool,
    {
        let matched: Vec<Point> = self
            .cells
            .iter()
            .filter(|(point, value)| predicate(**point, value))
            .map(|(point, _)| *point)
            .collect();

        let mut removed = Table::new();
        for point in matched {
            if let Some(value) = self.cells.remove(&point) {
                removed.cells.insert(point, value);
            }
        }
        removed
    }

    pub fn keys(&self) -> impl Iterator<Item = Point> + '_ {
        self.cells.keys().copied()
    }

    pub fn get_all(&self) -> impl Iterator<Item = &T> + '_ {
        self.cells.values()
    }

    /// Visits present cells inside the inclusive rectangle `(x1, y1)..=(x2, y2)`.
    ///
    /// Order is unspecified. Small rectangles are walked cell by cell, large
    /// ones fall back to a filtered scan of the entries.
    pub fn iterate<F>(&self, x1: i64, y1: i64, x2: i64, y2: i64, mut visit: F)
    where
        F: FnMut(&T, Point),
    {
        let (min_x, max_x) = (x1.min(x2), x1.max(x2));
        let (min_y, max_y) = (y1.min(y2), y1.max(y2));

        let width = (max_x as i128 - min_x as i128) + 1;
        let height = (max_y as i128 - min_y as i128) + 1;

        if width.saturating_mul(height) <= self.cells.len() as i128 {
            for x in min_x..=max_x {
                for y in min_y..=max_y {
                    if let Some(value) = self.get(x, y) {
                        visit(value, Point::new(x, y));
                    }
                }
            }
        } else {
            for (point, value) in &self.cells {
                if (min_x..=max_x).contains(&point.x) && (min_y..=max_y).contains(&point.y) {
                    visit(value, *point);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

impl<T> FromIterator<(Point, T)> for Table<T> {
    fn from_iter<I: IntoIterator<Item = (Point, T)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}
