use prettytable::format::{self, Alignment};
use prettytable::{Cell, Row, Table};
use serde::Serialize;
use serde_json::{json, Value};

use crate::groupdescriptor::GroupDescriptor;
use crate::inode::mode_to_string;
use crate::sizedist::SizeBucket;
use crate::stats::{FragmentationStats, Metric};
use crate::superblock::Superblock;
use crate::Analysis;

/// The figures printed at the end of a pass, sizes already scaled to KB.
#[derive(Debug, Serialize)]
pub struct FragReport {
    pub label: String,
    pub free_segments: u64,
    pub free_extent_kb: Metric,
    pub used_extent_kb: Metric,
    pub inode_frag_ratio: Metric,
    pub size_distribution: Vec<SizeBucket>,
}

fn per_segment(metric: Metric) -> String {
    match metric {
        Metric::Defined(_) => format!("{:.2} KB/seg", metric),
        Metric::Undefined => metric.to_string(),
    }
}

fn right(text: &str) -> Cell {
    Cell::new_align(text, Alignment::RIGHT)
}

impl FragReport {
    /// `label` heads the percentage column of the size table.
    pub fn from_analysis(analysis: &Analysis, label: &str) -> Self {
        let stats = &analysis.stats;
        let to_kb = |bytes: f64| bytes / 1024.0;
        FragReport {
            label: label.to_string(),
            free_segments: stats.free_segments,
            free_extent_kb: stats.avg_free_extent(analysis.block_size).map(to_kb),
            used_extent_kb: stats.avg_used_extent(analysis.block_size).map(to_kb),
            inode_frag_ratio: stats.inode_fragmentation_ratio(),
            size_distribution: analysis.sizes.buckets(),
        }
    }

    pub fn size_table(&self) -> Table {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_CLEAN);
        table.set_titles(Row::new(vec![right("size"), right(&self.label)]));
        for bucket in &self.size_distribution {
            let percent = bucket.fraction.map(|f| f * 100.0);
            let percent = match percent {
                Metric::Defined(_) => format!("{:.4}%", percent),
                Metric::Undefined => percent.to_string(),
            };
            table.add_row(Row::new(vec![right(&bucket.label), right(&percent)]));
        }
        table
    }

    /// The plain-text report, one metric per line followed by the size table.
    pub fn render(&self) -> String {
        let mut out = format!(
            "seg_contiguos_livres: {}\nfrag_livres: {}\nfrag_ocupados: {}\ntx_frag_i_nodes: {:.2}\n",
            self.free_segments,
            per_segment(self.free_extent_kb),
            per_segment(self.used_extent_kb),
            self.inode_frag_ratio
        );
        out.push_str(&self.size_table().to_string());
        out
    }

    pub fn to_json(&self, stats: &FragmentationStats) -> Value {
        json!({
            "report": self,
            "used_blocks": stats.used_blocks,
            "free_blocks": stats.free_blocks,
            "used_inodes": stats.used_inodes,
            "free_inodes": stats.free_inodes,
            "used_segments": stats.used_segments,
            "groups": stats.groups,
            "failures": stats.failures,
        })
    }
}

/// Key/value view of the superblock, built from its JSON form.
pub fn superblock_table(superblock: &Superblock) -> Table {
    let mut table = Table::new();
    if let Value::Object(fields) = superblock.to_json() {
        for (key, value) in fields {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            table.add_row(Row::new(vec![Cell::new(&key), Cell::new(&value)]));
        }
    }
    table
}

/// Descriptor locations next to the counts found in each group's bitmaps.
pub fn group_table(descriptors: &[GroupDescriptor], stats: &FragmentationStats) -> Table {
    let mut table = Table::new();
    table.set_titles(Row::new(
        [
            "Group",
            "Block bitmap",
            "Inode bitmap",
            "Inode table",
            "Blocks",
            "Used blocks",
            "Free blocks",
            "Used inodes",
            "Free inodes",
            "Dirs",
        ]
        .iter()
        .map(|title| Cell::new(title))
        .collect(),
    ));
    for (gd, summary) in descriptors.iter().zip(&stats.groups) {
        table.add_row(Row::new(vec![
            right(&summary.group.to_string()),
            right(&gd.bg_block_bitmap.to_string()),
            right(&gd.bg_inode_bitmap.to_string()),
            right(&gd.bg_inode_table.to_string()),
            right(&summary.block_count.to_string()),
            right(&summary.used_blocks.to_string()),
            right(&summary.free_blocks.to_string()),
            right(&summary.used_inodes.to_string()),
            right(&summary.free_inodes.to_string()),
            right(&gd.bg_used_dirs_count.to_string()),
        ]));
    }
    table
}

/// One row per analyzed inode, failures last.
pub fn inode_table(stats: &FragmentationStats) -> Table {
    let mut table = Table::new();
    table.set_titles(Row::new(vec![
        Cell::new("Inode"),
        Cell::new("Mode"),
        Cell::new("Size"),
        Cell::new("Blocks"),
        Cell::new("Segments"),
    ]));
    for entry in &stats.inodes {
        table.add_row(Row::new(vec![
            right(&entry.inode.to_string()),
            Cell::new(&mode_to_string(entry.mode)),
            right(&entry.size.to_string()),
            right(&entry.blocks.to_string()),
            right(&entry.segments.to_string()),
        ]));
    }
    for failure in &stats.failures {
        table.add_row(Row::new(vec![
            right(&failure.inode.to_string()),
            Cell::new("error"),
            Cell::new(&failure.error).with_hspan(3),
        ]));
    }
    table
}
