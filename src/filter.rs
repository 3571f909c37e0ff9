use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, error, info_span, trace};

use crate::domain::DVError;
use crate::table::{Row, Table};

/// Rows scanned between two checks of the abort condition.
const SCAN_BLOCK: usize = 16 * 1024;

/// Column index to substring predicate. Empty predicates are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnFilters {
    filters: BTreeMap<usize, String>,
}

impl ColumnFilters {
    /// Set the predicate for `column`. An empty value removes it, and columns
    /// outside `[0, column_count)` are ignored. Returns true on change.
    pub fn set(&mut self, column: usize, value: &str, column_count: usize) -> bool {
        if column >= column_count {
            return false;
        }
        if value.is_empty() {
            return self.clear(column);
        }
        match self.filters.get(&column) {
            Some(current) if current == value => false,
            _ => {
                self.filters.insert(column, value.to_string());
                true
            }
        }
    }

    pub fn clear(&mut self, column: usize) -> bool {
        self.filters.remove(&column).is_some()
    }

    pub fn clear_all(&mut self) {
        self.filters.clear();
    }

    pub fn get(&self, column: usize) -> Option<&str> {
        self.filters.get(&column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.filters.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterQuery {
    pub column_filters: ColumnFilters,
    pub global_search: String,
}

/// The header plus the data rows that passed, in original order.
///
/// Holds indexes into a shared table, never copies of rows.
#[derive(Debug, Clone)]
pub struct FilteredTable {
    table: Arc<Table>,
    rows: Arc<Vec<usize>>,
}

impl FilteredTable {
    pub fn unfiltered(table: Arc<Table>) -> Self {
        let rows = Arc::new((0..table.row_count()).collect());
        Self { table, rows }
    }

    pub fn empty() -> Self {
        Self::unfiltered(Arc::new(Table::default()))
    }

    fn from_indices(table: Arc<Table>, rows: Vec<usize>) -> Self {
        Self {
            table,
            rows: Arc::new(rows),
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn header(&self) -> &[String] {
        self.table.header()
    }

    /// Number of data rows that passed.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx).and_then(|&r| self.table.row(r))
    }

    /// Position of the filtered row `idx` in the full table.
    pub fn source_index(&self, idx: usize) -> Option<usize> {
        self.rows.get(idx).copied()
    }

    pub fn cell(&self, idx: usize, column: usize) -> &str {
        self.source_index(idx)
            .map(|r| self.table.cell(r, column))
            .unwrap_or("")
    }

    /// Header first, then every passing row.
    pub fn to_rows(&self) -> Vec<Row> {
        std::iter::once(self.table.header().to_vec())
            .chain(self.rows.iter().filter_map(|&r| self.table.row(r).cloned()))
            .collect()
    }
}

/// Lower-cased predicates, prepared once per recomputation.
struct Matcher {
    columns: Vec<(usize, String)>,
    global: Option<String>,
}

impl Matcher {
    fn new(column_filters: &ColumnFilters, global_search: &str) -> Self {
        Self {
            columns: column_filters
                .iter()
                .map(|(col, value)| (col, value.to_lowercase()))
                .collect(),
            global: (!global_search.is_empty()).then(|| global_search.to_lowercase()),
        }
    }

    fn is_active(&self) -> bool {
        !self.columns.is_empty() || self.global.is_some()
    }

    fn matches(&self, row: &Row) -> bool {
        let columns_pass = self.columns.iter().all(|(col, needle)| {
            let value = row.get(*col).map(String::as_str).unwrap_or("");
            contains_ignore_case(value, needle)
        });
        columns_pass
            && self
                .global
                .as_ref()
                .is_none_or(|needle| row.iter().any(|cell| contains_ignore_case(cell, needle)))
    }
}

/// `needle` must already be lower case.
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.is_ascii() && needle.is_ascii() {
        let (h, n) = (haystack.as_bytes(), needle.as_bytes());
        return n.len() <= h.len() && h.windows(n.len()).any(|w| w.eq_ignore_ascii_case(n));
    }
    haystack.to_lowercase().contains(needle)
}

/// Recompute the filtered table.
///
/// Column filters all have to match (missing cells read as empty), and a
/// non-empty global search has to match at least one cell. Comparison is
/// case-insensitive substring matching.
pub fn filter(
    table: &Arc<Table>,
    column_filters: &ColumnFilters,
    global_search: &str,
) -> FilteredTable {
    let query = FilterQuery {
        column_filters: column_filters.clone(),
        global_search: global_search.to_string(),
    };
    match filter_rows_until(table, &query, || false) {
        Some(rows) => FilteredTable::from_indices(Arc::clone(table), rows),
        None => FilteredTable::unfiltered(Arc::clone(table)),
    }
}

/// Same as [`filter`], returning matching row indexes, but gives up with
/// `None` as soon as `abort` returns true between two scan blocks.
pub fn filter_rows_until<A>(table: &Table, query: &FilterQuery, abort: A) -> Option<Vec<usize>>
where
    A: Fn() -> bool + Sync,
{
    let _span = info_span!("filter", rows = table.row_count()).entered();
    let nrows = table.row_count();
    let matcher = Matcher::new(&query.column_filters, &query.global_search);
    if !matcher.is_active() {
        return Some((0..nrows).collect());
    }

    let rows = table.rows();
    let mut matches = Vec::new();
    for start in (0..nrows).step_by(SCAN_BLOCK) {
        if abort() {
            return None;
        }
        let end = std::cmp::min(start + SCAN_BLOCK, nrows);
        let block: Vec<usize> = (start..end)
            .into_par_iter()
            .filter(|&idx| matcher.matches(&rows[idx]))
            .collect();
        matches.extend(block);
    }
    Some(matches)
}

struct FilterRequest {
    generation: u64,
    table: Arc<Table>,
    query: FilterQuery,
}

struct FilterResult {
    generation: u64,
    table: Arc<Table>,
    rows: Vec<usize>,
}

/// Recomputes filtered tables on a background thread.
///
/// Every request gets a new generation number. The thread skips queued
/// requests that were overtaken, abandons a scan once a newer generation is
/// requested, and `poll` drops any result that is not the latest one.
pub struct FilterWorker {
    requests: mpsc::Sender<FilterRequest>,
    results: mpsc::Receiver<FilterResult>,
    latest: Arc<AtomicU64>,
    applied: u64,
    ready: Option<FilteredTable>,
}

impl FilterWorker {
    pub fn spawn() -> Result<Self, DVError> {
        let (req_tx, req_rx) = mpsc::channel::<FilterRequest>();
        let (res_tx, res_rx) = mpsc::channel::<FilterResult>();
        let latest = Arc::new(AtomicU64::new(0));

        let worker_latest = Arc::clone(&latest);
        std::thread::Builder::new()
            .name("delview-filter".to_string())
            .spawn(move || {
                while let Ok(mut request) = req_rx.recv() {
                    while let Ok(newer) = req_rx.try_recv() {
                        request = newer;
                    }
                    let generation = request.generation;
                    if worker_latest.load(Ordering::SeqCst) != generation {
                        continue;
                    }

                    let start_time = Instant::now();
                    let rows = filter_rows_until(&request.table, &request.query, || {
                        worker_latest.load(Ordering::Relaxed) != generation
                    });
                    let Some(rows) = rows else {
                        debug!("Filter generation {generation} was superseded");
                        continue;
                    };
                    debug!(
                        "Filter generation {generation} kept {} of {} rows in {}ms",
                        rows.len(),
                        request.table.row_count(),
                        start_time.elapsed().as_millis()
                    );
                    let result = FilterResult {
                        generation,
                        table: request.table,
                        rows,
                    };
                    if res_tx.send(result).is_err() {
                        break;
                    }
                }
                trace!("Filter worker exiting");
            })?;

        Ok(Self {
            requests: req_tx,
            results: res_rx,
            latest,
            applied: 0,
            ready: None,
        })
    }

    /// Queue a recomputation. Any earlier, still pending request is stale.
    pub fn request(&mut self, table: Arc<Table>, query: FilterQuery) -> u64 {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("Filter request {generation}: {:?}", query);
        let request = FilterRequest {
            generation,
            table,
            query,
        };
        if let Err(mpsc::SendError(request)) = self.requests.send(request) {
            error!("Filter worker is gone, filtering inline");
            let filtered = filter(
                &request.table,
                &request.query.column_filters,
                &request.query.global_search,
            );
            self.ready = Some(filtered);
        }
        generation
    }

    /// Forget everything in flight, e.g. when a new file replaces the table.
    pub fn invalidate(&mut self) {
        self.applied = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.ready = None;
    }

    pub fn is_busy(&self) -> bool {
        self.applied != self.latest.load(Ordering::SeqCst)
    }

    /// The newest complete result, if the latest request has finished.
    pub fn poll(&mut self) -> Option<FilteredTable> {
        if let Some(filtered) = self.ready.take() {
            self.applied = self.latest.load(Ordering::SeqCst);
            return Some(filtered);
        }

        let mut newest = None;
        while let Ok(result) = self.results.try_recv() {
            if result.generation == self.latest.load(Ordering::SeqCst) {
                self.applied = result.generation;
                newest = Some(FilteredTable::from_indices(result.table, result.rows));
            } else {
                trace!("Dropping stale filter result {}", result.generation);
            }
        }
        newest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn row(values: &[&str]) -> Row {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn people() -> Arc<Table> {
        Arc::new(Table::from_rows(vec![
            row(&["name", "city"]),
            row(&["Ann", "NY"]),
            row(&["Bob", "LA"]),
            row(&["Ann", "LA"]),
        ]))
    }

    fn column_filters(entries: &[(usize, &str)], column_count: usize) -> ColumnFilters {
        let mut filters = ColumnFilters::default();
        for (col, value) in entries {
            filters.set(*col, value, column_count);
        }
        filters
    }

    #[test]
    fn column_filter_and_global_search_are_combined() {
        let table = people();
        let filtered = filter(&table, &column_filters(&[(0, "ann")], 2), "la");
        assert_eq!(
            filtered.to_rows(),
            vec![row(&["name", "city"]), row(&["Ann", "LA"])]
        );
    }

    #[test]
    fn global_search_matches_any_column() {
        let table = people();
        let filtered = filter(&table, &ColumnFilters::default(), "B");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.row(0), Some(&row(&["Bob", "LA"])));
        assert_eq!(filtered.source_index(0), Some(1));
    }

    #[test]
    fn column_filters_must_all_match() {
        let table = people();
        let filtered = filter(&table, &column_filters(&[(0, "o"), (1, "a")], 2), "");
        assert_eq!(filtered.to_rows()[1..], [row(&["Bob", "LA"])]);
    }

    #[test]
    fn header_survives_when_nothing_matches() {
        let table = people();
        let filtered = filter(&table, &ColumnFilters::default(), "zzz");
        assert!(filtered.is_empty());
        assert_eq!(filtered.to_rows(), vec![row(&["name", "city"])]);
    }

    #[test]
    fn no_predicates_keeps_everything() {
        let table = people();
        let filtered = filter(&table, &ColumnFilters::default(), "");
        assert_eq!(filtered.len(), 3);
        assert_eq!(filtered.to_rows().len(), 4);
    }

    #[test]
    fn filtering_is_idempotent_and_ordered() {
        let table = people();
        let filters = column_filters(&[(1, "a")], 2);
        let first = filter(&table, &filters, "n");
        let second = filter(&table, &filters, "n");
        assert_eq!(first.to_rows(), second.to_rows());
        assert_eq!(first.source_index(0), Some(2));
    }

    #[test]
    fn missing_cells_are_empty() {
        let table = Arc::new(Table::from_rows(vec![
            row(&["a", "b"]),
            row(&["1"]),
            row(&["2", "x"]),
        ]));
        let filtered = filter(&table, &column_filters(&[(1, "x")], 2), "");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.cell(0, 0), "2");
    }

    #[test]
    fn unicode_is_compared_case_insensitively() {
        let table = Arc::new(Table::from_rows(vec![
            row(&["city"]),
            row(&["ZÜRICH"]),
            row(&["Köln"]),
        ]));
        assert_eq!(filter(&table, &ColumnFilters::default(), "zürich").len(), 1);
        assert_eq!(filter(&table, &ColumnFilters::default(), "KÖ").len(), 1);
    }

    #[test]
    fn column_filter_set_keeps_its_invariants() {
        let mut filters = ColumnFilters::default();
        assert!(filters.set(1, "x", 2));
        assert!(!filters.set(1, "x", 2));
        assert!(!filters.set(2, "y", 2));
        assert_eq!(filters.len(), 1);
        assert!(filters.set(1, "", 2));
        assert!(filters.is_empty());
        assert!(!filters.clear(0));
    }

    #[test]
    fn abort_stops_the_scan() {
        let table = people();
        let query = FilterQuery {
            column_filters: ColumnFilters::default(),
            global_search: "a".to_string(),
        };
        assert!(filter_rows_until(&table, &query, || true).is_none());
        assert_eq!(filter_rows_until(&table, &query, || false), Some(vec![0, 1, 2]));
    }

    fn wait_for_result(worker: &mut FilterWorker) -> Vec<FilteredTable> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut results = Vec::new();
        while worker.is_busy() && Instant::now() < deadline {
            results.extend(worker.poll());
            std::thread::sleep(Duration::from_millis(1));
        }
        results
    }

    #[test]
    fn worker_delivers_only_the_latest_request() {
        let mut worker = FilterWorker::spawn().unwrap();
        let table = people();
        worker.request(
            Arc::clone(&table),
            FilterQuery {
                global_search: "ny".to_string(),
                ..FilterQuery::default()
            },
        );
        worker.request(
            Arc::clone(&table),
            FilterQuery {
                global_search: "bob".to_string(),
                ..FilterQuery::default()
            },
        );
        assert!(worker.is_busy());

        let results = wait_for_result(&mut worker);
        assert!(!worker.is_busy());
        assert!(!results.is_empty());
        for filtered in results {
            assert_eq!(filtered.to_rows()[1..], [row(&["Bob", "LA"])]);
        }
    }

    #[test]
    fn invalidate_drops_pending_results() {
        let mut worker = FilterWorker::spawn().unwrap();
        worker.request(people(), FilterQuery::default());
        worker.invalidate();
        assert!(!worker.is_busy());
        std::thread::sleep(Duration::from_millis(50));
        assert!(worker.poll().is_none());
    }
}
