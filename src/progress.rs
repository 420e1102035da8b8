//! Progress aggregation
//!
//! Each tracked item gets exactly one [`ProgressCell`], handed to the worker that
//! moves it. Cells are not `Clone`, so a value only ever has one writer; the
//! [`ProgressBoard`] reads every cell on demand to build the aggregate.

use crate::config::ProgressWeighting;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Cell values are stored in hundredths of a percent.
const SCALE: u32 = 10_000;

/// Callback invoked with the aggregate 0-100 completion value.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

struct Slot {
    name: String,
    weight: AtomicU64,
    value: AtomicU32,
}

/// Read side of the progress map.
#[derive(Clone)]
pub struct ProgressBoard {
    slots: Arc<Vec<Slot>>,
    weighting: ProgressWeighting,
}

/// Write side of one progress entry.
pub struct ProgressCell {
    slots: Arc<Vec<Slot>>,
    index: usize,
}

impl ProgressBoard {
    /// Build a board for `(name, size_hint)` entries and return one cell per entry,
    /// in the same order.
    pub fn new<I, S>(entries: I, weighting: ProgressWeighting) -> (Self, Vec<ProgressCell>)
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let slots: Vec<Slot> = entries
            .into_iter()
            .map(|(name, weight)| Slot {
                name: name.into(),
                weight: AtomicU64::new(weight),
                value: AtomicU32::new(0),
            })
            .collect();
        let slots = Arc::new(slots);
        let cells = (0..slots.len())
            .map(|index| ProgressCell {
                slots: slots.clone(),
                index,
            })
            .collect();
        (Self { slots, weighting }, cells)
    }

    /// Board tracking a single item.
    pub fn single(name: impl Into<String>, size: u64) -> (Self, ProgressCell) {
        let name: String = name.into();
        let (board, mut cells) = Self::new([(name, size)], ProgressWeighting::Equal);
        let cell = cells.remove(0);
        (board, cell)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current percentage of the named entry.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.value.load(Ordering::Relaxed) as f64 / 100.0)
    }

    /// Snapshot of every entry as `(name, percent)`.
    pub fn snapshot(&self) -> Vec<(String, f64)> {
        self.slots
            .iter()
            .map(|slot| {
                (
                    slot.name.clone(),
                    slot.value.load(Ordering::Relaxed) as f64 / 100.0,
                )
            })
            .collect()
    }

    /// Aggregate using the board's configured weighting.
    pub fn aggregate(&self) -> u8 {
        match self.weighting {
            ProgressWeighting::Equal => self.aggregate_equal(),
            ProgressWeighting::Bytes => self.aggregate_weighted(),
        }
    }

    /// Unweighted mean of every entry, truncated. An empty board counts as done.
    pub fn aggregate_equal(&self) -> u8 {
        if self.slots.is_empty() {
            return 100;
        }
        let sum: u64 = self
            .slots
            .iter()
            .map(|slot| slot.value.load(Ordering::Relaxed) as u64)
            .sum();
        let mean = sum / (self.slots.len() as u64 * 100);
        mean.min(100) as u8
    }

    /// Byte-weighted mean. Falls back to the unweighted mean while no entry
    /// has a known size. Not monotonic if weights are learned mid-transfer.
    pub fn aggregate_weighted(&self) -> u8 {
        let total_weight: u128 = self
            .slots
            .iter()
            .map(|slot| slot.weight.load(Ordering::Relaxed) as u128)
            .sum();
        if total_weight == 0 {
            return self.aggregate_equal();
        }
        let weighted: u128 = self
            .slots
            .iter()
            .map(|slot| {
                slot.weight.load(Ordering::Relaxed) as u128
                    * slot.value.load(Ordering::Relaxed) as u128
            })
            .sum();
        let mean = weighted / (total_weight * 100);
        mean.min(100) as u8
    }
}

impl ProgressCell {
    pub fn name(&self) -> &str {
        &self.slot().name
    }

    fn slot(&self) -> &Slot {
        &self.slots[self.index]
    }

    /// Current value in percent.
    pub fn percent(&self) -> f64 {
        self.slot().value.load(Ordering::Relaxed) as f64 / 100.0
    }

    /// Raise the value to `percent`. Lower values are ignored so an entry never
    /// moves backwards.
    pub fn set_percent(&self, percent: f64) {
        let scaled = (percent.clamp(0.0, 100.0) * 100.0) as u32;
        self.slot().value.fetch_max(scaled, Ordering::Relaxed);
    }

    /// Set from a `done / total` ratio. Unknown totals leave the value untouched.
    pub fn set_fraction(&self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let scaled = (done as u128 * SCALE as u128 / total as u128).min(SCALE as u128) as u32;
        self.slot().value.fetch_max(scaled, Ordering::Relaxed);
    }

    pub fn complete(&self) {
        self.slot().value.fetch_max(SCALE, Ordering::Relaxed);
    }

    /// Record the size once it becomes known (e.g. from a content-length header).
    pub fn set_weight(&self, bytes: u64) {
        self.slot().weight.store(bytes, Ordering::Relaxed);
    }
}

/// Forwards the aggregate to an observer, only when it increases.
///
/// The callback runs under the reporter's lock, so observers see a strictly
/// increasing sequence even when several workers report at once.
pub struct ProgressReporter {
    board: ProgressBoard,
    callback: Option<ProgressCallback>,
    last: Mutex<Option<u8>>,
}

impl ProgressReporter {
    pub fn new(board: ProgressBoard, callback: Option<ProgressCallback>) -> Self {
        Self {
            board,
            callback,
            last: Mutex::new(None),
        }
    }

    pub fn board(&self) -> &ProgressBoard {
        &self.board
    }

    /// Recompute the aggregate and notify if it moved forward.
    pub fn report(&self) -> u8 {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let value = self.board.aggregate();
        if last.map_or(true, |prev| value > prev) {
            *last = Some(value);
            if let Some(cb) = &self.callback {
                cb(value);
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn aggregate_is_truncated_mean() {
        let (board, cells) =
            ProgressBoard::new([("a", 0), ("b", 0), ("c", 0)], ProgressWeighting::Equal);
        assert_eq!(board.aggregate(), 0);
        cells[0].complete();
        cells[1].set_percent(50.0);
        // (100 + 50 + 0) / 3 = 50
        assert_eq!(board.aggregate(), 50);
        cells[2].set_percent(1.0);
        // 151 / 3 = 50.33 -> 50
        assert_eq!(board.aggregate(), 50);
        cells[1].complete();
        cells[2].complete();
        assert_eq!(board.aggregate(), 100);
    }

    #[test]
    fn cells_never_move_backwards() {
        let (board, cell) = ProgressBoard::single("model.glb", 0);
        cell.set_percent(70.0);
        cell.set_percent(20.0);
        cell.set_fraction(1, 10);
        assert_eq!(cell.percent(), 70.0);
        assert_eq!(board.get("model.glb"), Some(70.0));
    }

    #[test]
    fn unknown_total_leaves_value_untouched() {
        let (_board, cell) = ProgressBoard::single("scene.bin", 0);
        cell.set_fraction(4096, 0);
        assert_eq!(cell.percent(), 0.0);
        cell.complete();
        assert_eq!(cell.percent(), 100.0);
    }

    #[test]
    fn aggregate_is_monotonic_under_interleaved_updates() {
        let (board, cells) = ProgressBoard::new(
            (0..4).map(|i| (format!("item-{}", i), 0)),
            ProgressWeighting::Equal,
        );
        let mut last = board.aggregate();
        for step in 0..=20u64 {
            for (i, cell) in cells.iter().enumerate() {
                // each item advances at its own pace, sometimes with stale values
                let done = (step * (i as u64 + 1)).min(20);
                cell.set_fraction(done, 20);
                cell.set_fraction(done / 2, 20);
                let now = board.aggregate();
                assert!(now >= last, "aggregate went from {} to {}", last, now);
                last = now;
            }
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn weighted_aggregate_favours_large_items() {
        let (board, cells) =
            ProgressBoard::new([("big", 900), ("small", 100)], ProgressWeighting::Bytes);
        cells[1].complete();
        assert_eq!(board.aggregate_equal(), 50);
        assert_eq!(board.aggregate(), 10);
        cells[0].complete();
        assert_eq!(board.aggregate(), 100);
    }

    #[test]
    fn weighted_falls_back_without_sizes() {
        let (board, cells) = ProgressBoard::new([("a", 0), ("b", 0)], ProgressWeighting::Bytes);
        cells[0].complete();
        assert_eq!(board.aggregate(), 50);
    }

    #[test]
    fn empty_board_is_complete() {
        let (board, cells) =
            ProgressBoard::new(Vec::<(String, u64)>::new(), ProgressWeighting::Equal);
        assert!(cells.is_empty());
        assert_eq!(board.aggregate(), 100);
    }

    #[test]
    fn reporter_only_emits_increases() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (board, cells) = ProgressBoard::new([("a", 0), ("b", 0)], ProgressWeighting::Equal);
        let reporter = ProgressReporter::new(
            board,
            Some(Arc::new(move |p: u8| sink.lock().unwrap().push(p))),
        );

        reporter.report();
        reporter.report();
        cells[0].set_percent(40.0);
        reporter.report();
        reporter.report();
        cells[1].complete();
        cells[0].complete();
        reporter.report();

        assert_eq!(*seen.lock().unwrap(), vec![0, 20, 100]);
    }
}
