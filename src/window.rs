//! Windowing over a filtered table.
//!
//! A renderer asks for the rows around its scroll position and for the cells
//! of the visible columns only. Nothing here touches more than the window.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::filter::FilteredTable;

pub const DEFAULT_OVERSCAN: usize = 10;
/// Larger values only materialise rows nobody can see.
pub const MAX_OVERSCAN: usize = 10_000;

/// Geometry of the scrolling viewport, in any consistent unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    row_height: usize,
    viewport_height: usize,
    overscan: usize,
}

impl WindowSpec {
    pub fn new(row_height: usize, viewport_height: usize, overscan: usize) -> Self {
        Self {
            row_height: row_height.max(1),
            viewport_height,
            overscan,
        }
    }

    /// Rows needed to fill the viewport, without overscan.
    pub fn rows_per_page(&self) -> usize {
        self.viewport_height.div_ceil(self.row_height)
    }

    /// Contiguous range of rows to materialise for `scroll_offset`.
    ///
    /// Always `rows_per_page + 2 * overscan` rows, clamped to `total_rows`.
    /// Near either end the range is shifted rather than shortened.
    pub fn visible_range(&self, total_rows: usize, scroll_offset: usize) -> Range<usize> {
        let wanted = self
            .rows_per_page()
            .saturating_add(self.overscan.saturating_mul(2));
        let count = std::cmp::min(wanted, total_rows);
        let first_visible = scroll_offset / self.row_height;
        let start = std::cmp::min(
            first_visible.saturating_sub(self.overscan),
            total_rows - count,
        );
        start..start + count
    }
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self::new(1, 0, DEFAULT_OVERSCAN)
    }
}

/// Which columns get drawn. Indexes are always below the column count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleColumns {
    column_count: usize,
    selected: BTreeSet<usize>,
}

impl VisibleColumns {
    pub fn all(column_count: usize) -> Self {
        Self {
            column_count,
            selected: (0..column_count).collect(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn contains(&self, column: usize) -> bool {
        self.selected.contains(&column)
    }

    pub fn all_selected(&self) -> bool {
        self.column_count > 0 && self.selected.len() == self.column_count
    }

    pub fn toggle(&mut self, column: usize) {
        if column >= self.column_count {
            return;
        }
        if !self.selected.remove(&column) {
            self.selected.insert(column);
        }
    }

    /// All selected turns everything off, anything else turns everything on.
    pub fn toggle_all(&mut self) {
        if self.all_selected() {
            self.selected.clear();
        } else {
            self.selected = (0..self.column_count).collect();
        }
    }

    /// Visible columns in header order.
    pub fn ordered(&self) -> Vec<usize> {
        self.selected.iter().copied().collect()
    }
}

/// Per column display width, owned by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnWidths {
    widths: Vec<usize>,
    default_width: usize,
    min_width: usize,
}

impl ColumnWidths {
    pub fn new(column_count: usize, default_width: usize, min_width: usize) -> Self {
        let default_width = default_width.max(min_width);
        Self {
            widths: vec![default_width; column_count],
            default_width,
            min_width,
        }
    }

    pub fn len(&self) -> usize {
        self.widths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    pub fn get(&self, column: usize) -> usize {
        self.widths
            .get(column)
            .copied()
            .unwrap_or(self.default_width)
    }

    /// Apply a drag delta, never going below the minimum width.
    pub fn resize(&mut self, column: usize, delta: isize) -> usize {
        let min_width = self.min_width;
        match self.widths.get_mut(column) {
            Some(width) => {
                *width = width.saturating_add_signed(delta).max(min_width);
                *width
            }
            None => self.default_width,
        }
    }
}

/// Horizontal counterpart of [`WindowSpec::visible_range`].
///
/// Starting at `columns[first]`, take columns while they fit into
/// `viewport_width` (one separator cell between columns). The last column may
/// be cut off; its clipped width is returned with it.
pub fn column_span(
    columns: &[usize],
    widths: &ColumnWidths,
    first: usize,
    viewport_width: usize,
) -> Vec<(usize, usize)> {
    let mut span = Vec::new();
    let mut used = 0;
    for &column in columns.iter().skip(first) {
        if used >= viewport_width {
            break;
        }
        let width = widths.get(column);
        let remaining = viewport_width - used;
        if width >= remaining {
            span.push((column, remaining));
            break;
        }
        span.push((column, width));
        used += width + 1;
    }
    span
}

/// One materialised row: its position in the filtered table and the values
/// of the visible columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRow<'a> {
    pub index: usize,
    pub source_index: usize,
    pub cells: Vec<&'a str>,
}

/// Read-only view of a filtered table restricted to some columns.
pub struct ViewWindow<'a> {
    filtered: &'a FilteredTable,
    columns: Vec<usize>,
}

impl<'a> ViewWindow<'a> {
    pub fn new(filtered: &'a FilteredTable, visible: &VisibleColumns) -> Self {
        Self::with_columns(filtered, visible.ordered())
    }

    /// Restrict to an explicit column list, e.g. a horizontal span.
    pub fn with_columns(filtered: &'a FilteredTable, columns: Vec<usize>) -> Self {
        Self { filtered, columns }
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn total_rows(&self) -> usize {
        self.filtered.len()
    }

    pub fn header_cells(&self) -> Vec<&'a str> {
        let header = self.filtered.header();
        self.columns
            .iter()
            .map(|&c| header.get(c).map(String::as_str).unwrap_or(""))
            .collect()
    }

    pub fn row_cells(&self, index: usize) -> Vec<&'a str> {
        let filtered: &'a FilteredTable = self.filtered;
        self.columns
            .iter()
            .map(|&c| filtered.cell(index, c))
            .collect()
    }

    /// Build only the rows inside `range` (clamped to the table).
    pub fn materialize(&self, range: Range<usize>) -> Vec<WindowRow<'a>> {
        let end = std::cmp::min(range.end, self.total_rows());
        (range.start..end)
            .filter_map(|index| {
                self.filtered.source_index(index).map(|source_index| WindowRow {
                    index,
                    source_index,
                    cells: self.row_cells(index),
                })
            })
            .collect()
    }
}
