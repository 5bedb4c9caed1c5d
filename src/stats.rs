use serde::Serialize;
use std::fmt;

use crate::bitmap::Bitmap;
use crate::error::DecodeError;

/// A derived ratio. `Undefined` stands for a zero denominator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Metric {
    Defined(f64),
    Undefined,
}

impl Metric {
    pub fn ratio(numerator: f64, denominator: u64) -> Self {
        if denominator == 0 {
            Metric::Undefined
        } else {
            Metric::Defined(numerator / denominator as f64)
        }
    }

    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Self {
        match self {
            Metric::Defined(value) => Metric::Defined(f(value)),
            Metric::Undefined => Metric::Undefined,
        }
    }
}

/// Honors the formatter precision, `{:.2}` prints two decimals. Undefined
/// values print `n/a`.
impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, f.precision()) {
            (Metric::Defined(value), Some(precision)) => write!(f, "{:.*}", precision, value),
            (Metric::Defined(value), None) => write!(f, "{}", value),
            (Metric::Undefined, _) => f.write_str("n/a"),
        }
    }
}

/// Number of runs of consecutive block numbers in `blocks`, taken in the
/// order given. A new run starts wherever an entry is not exactly one past
/// the previous one.
pub fn count_segments(blocks: &[u64]) -> u64 {
    if blocks.is_empty() {
        return 0;
    }
    1 + blocks
        .windows(2)
        .filter(|pair| pair[0].checked_add(1) != Some(pair[1]))
        .count() as u64
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub group: u64,
    pub block_count: u64,
    pub used_blocks: u64,
    pub free_blocks: u64,
    pub used_inodes: u64,
    pub free_inodes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InodeSegments {
    pub inode: u64,
    pub mode: u16,
    pub size: u64,
    pub blocks: usize,
    pub segments: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InodeFailure {
    pub inode: u64,
    pub error: String,
}

/// Running totals of one pass over the volume.
#[derive(Debug, Default, Serialize)]
pub struct FragmentationStats {
    pub used_blocks: u64,
    pub free_blocks: u64,
    pub used_inodes: u64,
    pub free_inodes: u64,
    pub free_segments: u64,
    pub used_segments: u64,
    // Carried across group boundaries: a free run spanning two groups is one segment.
    #[serde(skip)]
    pub(crate) in_free_run: bool,
    pub groups: Vec<GroupSummary>,
    pub inodes: Vec<InodeSegments>,
    pub failures: Vec<InodeFailure>,
}

impl FragmentationStats {
    /// Feeds the next group's block bitmap into the volume-wide scan and
    /// returns how many of its blocks are in use.
    ///
    /// Bitmaps must arrive in ascending group order.
    pub fn record_block_bitmap(&mut self, bitmap: &Bitmap) -> u64 {
        let mut used = 0;
        for allocated in bitmap.iter() {
            if allocated {
                used += 1;
                self.in_free_run = false;
            } else if !self.in_free_run {
                self.in_free_run = true;
                self.free_segments += 1;
            }
        }
        self.used_blocks += used;
        self.free_blocks += bitmap.len() as u64 - used;
        used
    }

    /// Returns how many inodes of the group are in use.
    pub fn record_inode_bitmap(&mut self, bitmap: &Bitmap) -> u64 {
        let used = bitmap.count_used() as u64;
        self.used_inodes += used;
        self.free_inodes += bitmap.count_free() as u64;
        used
    }

    pub fn record_group(&mut self, summary: GroupSummary) {
        self.groups.push(summary);
    }

    pub fn record_inode(&mut self, entry: InodeSegments) {
        self.used_segments += entry.segments;
        self.inodes.push(entry);
    }

    pub fn record_failure(&mut self, inode: u64, error: &DecodeError) {
        self.failures.push(InodeFailure {
            inode,
            error: error.to_string(),
        });
    }

    /// Average size in bytes of a free extent.
    pub fn avg_free_extent(&self, block_size: u64) -> Metric {
        Metric::ratio((self.free_blocks * block_size) as f64, self.free_segments)
    }

    /// Average size in bytes of a used extent.
    pub fn avg_used_extent(&self, block_size: u64) -> Metric {
        Metric::ratio((self.used_blocks * block_size) as f64, self.used_segments)
    }

    /// Used segments per used inode.
    pub fn inode_fragmentation_ratio(&self) -> Metric {
        Metric::ratio(self.used_segments as f64, self.used_inodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap_bytes(len: usize, used: impl Fn(usize) -> bool) -> Vec<u8> {
        let mut raw = vec![0u8; len.div_ceil(8)];
        for i in (0..len).filter(|&i| used(i)) {
            raw[i / 8] |= 1 << (i % 8);
        }
        raw
    }

    #[test]
    fn segments_follow_encounter_order() {
        assert_eq!(count_segments(&[100, 101, 103, 104]), 2);
        assert_eq!(count_segments(&[]), 0);
        assert_eq!(count_segments(&[7]), 1);
        // Not sorted first: going backwards always starts a new run.
        assert_eq!(count_segments(&[5, 6, 1, 2]), 2);
        assert_eq!(count_segments(&[3, 2, 1]), 3);
    }

    #[test]
    fn used_run_in_middle_leaves_two_free_segments() {
        let raw = bitmap_bytes(100, |i| (50..60).contains(&i));
        let bitmap = Bitmap::new(&raw, 100).unwrap();
        let mut stats = FragmentationStats::default();
        assert_eq!(stats.record_block_bitmap(&bitmap), 10);
        assert_eq!(stats.free_segments, 2);
        assert_eq!(stats.free_blocks, 90);
    }

    #[test]
    fn used_run_at_edge_leaves_one_free_segment() {
        let raw = bitmap_bytes(100, |i| i < 10);
        let bitmap = Bitmap::new(&raw, 100).unwrap();
        let mut stats = FragmentationStats::default();
        stats.record_block_bitmap(&bitmap);
        assert_eq!(stats.free_segments, 1);
    }

    #[test]
    fn free_run_across_groups_counts_once() {
        // Same 16-unit pattern: used 0..4, free 4..12, used 12..16.
        let pattern = |i: usize| !(4..12).contains(&i);

        let whole = bitmap_bytes(16, pattern);
        let mut single = FragmentationStats::default();
        single.record_block_bitmap(&Bitmap::new(&whole, 16).unwrap());

        let first = bitmap_bytes(8, pattern);
        let second = bitmap_bytes(8, |i| pattern(i + 8));
        let mut split = FragmentationStats::default();
        split.record_block_bitmap(&Bitmap::new(&first, 8).unwrap());
        split.record_block_bitmap(&Bitmap::new(&second, 8).unwrap());

        assert_eq!(single.free_segments, 1);
        assert_eq!(split.free_segments, single.free_segments);
        assert_eq!(split.free_blocks, 8);
        assert_eq!(split.used_blocks, 8);
    }

    #[test]
    fn derived_metrics() {
        let mut stats = FragmentationStats {
            used_blocks: 60,
            free_blocks: 60,
            used_inodes: 15,
            free_segments: 2,
            ..Default::default()
        };
        for (inode, segments) in [(12, 1), (13, 3), (45, 2)] {
            stats.record_inode(InodeSegments {
                inode,
                mode: 0x81A4,
                size: 0,
                blocks: 0,
                segments,
            });
        }
        assert_eq!(stats.used_segments, 6);
        assert_eq!(stats.avg_free_extent(1024), Metric::Defined(30720.0));
        assert_eq!(stats.avg_used_extent(1024), Metric::Defined(10240.0));
        assert_eq!(stats.inode_fragmentation_ratio(), Metric::Defined(0.4));
    }

    #[test]
    fn zero_denominators_are_undefined() {
        let stats = FragmentationStats::default();
        assert_eq!(stats.avg_free_extent(4096), Metric::Undefined);
        assert_eq!(stats.avg_used_extent(4096), Metric::Undefined);
        assert_eq!(stats.inode_fragmentation_ratio(), Metric::Undefined);
        assert_eq!(format!("{:.2}", stats.inode_fragmentation_ratio()), "n/a");
    }

    #[test]
    fn metric_display_respects_precision() {
        assert_eq!(format!("{:.2}", Metric::Defined(1.0 / 3.0)), "0.33");
        assert_eq!(format!("{:.4}", Metric::Defined(50.0)), "50.0000");
    }
}
