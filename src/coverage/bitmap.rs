//! Fixed-size atomic coverage bitmap
//!
//! One `u32` counter per instrumentation site, AFL style. The interpreter
//! marks the site of every opcode it dispatches; callers reset the bitmap at
//! the start of a measurement window and dump it at the end.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};

use super::labels::op_label;

/// Number of instrumentation slots (64K)
pub const COVERAGE_BITMAP_SIZE: usize = 65536;

/// Snapshot of every non-zero slot: index -> hit count
pub type CoverageDump = BTreeMap<usize, u32>;

/// Hit counters indexed by instrumentation site.
///
/// `mark` is lock-free and safe to call from any number of threads. `dump`
/// reads slot by slot without cross-slot synchronisation, so a snapshot taken
/// while marking is in progress may be inconsistent across slots. That is
/// fine for diagnostics, which is all it is used for.
pub struct CoverageBitmap {
    slots: Box<[AtomicU32]>,
}

impl CoverageBitmap {
    /// Create a zeroed bitmap
    pub fn new() -> Self {
        let slots = (0..COVERAGE_BITMAP_SIZE)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    /// Increment the counter at `index`. Out-of-range indices are ignored.
    #[inline]
    pub fn mark(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current count at `index` (0 when out of range)
    pub fn count(&self, index: usize) -> u32 {
        self.slots
            .get(index)
            .map(|slot| slot.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Every slot with a non-zero count
    pub fn dump(&self) -> CoverageDump {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let count = slot.load(Ordering::Relaxed);
                (count > 0).then_some((idx, count))
            })
            .collect()
    }

    /// Zero every slot
    pub fn reset(&self) {
        for slot in self.slots.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Number of slots with a non-zero count
    pub fn hit_sites(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed) > 0)
            .count()
    }

    /// Render the current contents, see [`render`]
    pub fn render(&self) -> String {
        render(&self.dump())
    }
}

impl Default for CoverageBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CoverageBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageBitmap")
            .field("size", &self.slots.len())
            .field("hit_sites", &self.hit_sites())
            .finish()
    }
}

/// Format a dump, one line per hit site.
///
/// Indices without an entry in the label table are shown as `unknown op`.
pub fn render(dump: &CoverageDump) -> String {
    let mut out = String::from("=== Coverage Bitmap ===\n");
    for (idx, count) in dump {
        let label = op_label(*idx).unwrap_or("unknown op");
        let _ = writeln!(out, "  - index={} ({}), count={}", idx, label, count);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Op;

    #[test]
    fn test_mark_and_dump() {
        let bitmap = CoverageBitmap::new();
        bitmap.mark(3);
        bitmap.mark(3);
        bitmap.mark(70);

        let dump = bitmap.dump();
        assert_eq!(dump.len(), 2);
        assert_eq!(dump[&3], 2);
        assert_eq!(dump[&70], 1);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let bitmap = CoverageBitmap::new();
        bitmap.mark(COVERAGE_BITMAP_SIZE);
        bitmap.mark(usize::MAX);

        assert!(bitmap.dump().is_empty());
        assert_eq!(bitmap.count(COVERAGE_BITMAP_SIZE), 0);
    }

    #[test]
    fn test_last_slot_is_valid() {
        let bitmap = CoverageBitmap::new();
        bitmap.mark(COVERAGE_BITMAP_SIZE - 1);
        assert_eq!(bitmap.count(COVERAGE_BITMAP_SIZE - 1), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let bitmap = CoverageBitmap::new();
        for idx in [0, 1, 500, 65535] {
            bitmap.mark(idx);
        }
        bitmap.reset();
        assert!(bitmap.dump().is_empty());
        assert_eq!(bitmap.hit_sites(), 0);
    }

    #[test]
    fn test_render_labels() {
        let mut dump = CoverageDump::new();
        dump.insert(Op::Call.index(), 4);
        dump.insert(40000, 1);

        let text = render(&dump);
        assert!(text.contains(&format!("index={} (OpCall), count=4", Op::Call.index())));
        assert!(text.contains("index=40000 (unknown op), count=1"));
    }

    #[test]
    fn test_concurrent_marks() {
        let bitmap = std::sync::Arc::new(CoverageBitmap::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bitmap = bitmap.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        bitmap.mark(9);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bitmap.count(9), 4000);
    }
}
