use serde::Serialize;

use crate::stats::Metric;

/// Thresholds run from 2^0 to 2^29 bytes.
pub const SIZE_THRESHOLD_EXPONENTS: std::ops::Range<u32> = 0..30;

/// Render a byte count with binary shifts: raw below 1 KiB, then whole KB, MB or GB.
pub fn format_human(n_bytes: u64) -> String {
    if n_bytes < 1 << 10 {
        n_bytes.to_string()
    } else if n_bytes < 1 << 20 {
        format!("{} KB", n_bytes >> 10)
    } else if n_bytes < 1 << 30 {
        format!("{} MB", n_bytes >> 20)
    } else {
        format!("{} GB", n_bytes >> 30)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SizeBucket {
    pub threshold: u64,
    pub label: String,
    /// Fraction of regular files strictly smaller than `threshold`.
    pub fraction: Metric,
}

/// Sizes of every regular file seen during the pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SizeDistribution {
    sizes: Vec<u64>,
}

impl SizeDistribution {
    pub fn record(&mut self, size: u64) {
        self.sizes.push(size);
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn fraction_below(&self, threshold: u64) -> Metric {
        let below = self.sizes.iter().filter(|&&size| size < threshold).count();
        Metric::ratio(below as f64, self.sizes.len() as u64)
    }

    /// Cumulative distribution at every power-of-two threshold.
    pub fn buckets(&self) -> Vec<SizeBucket> {
        SIZE_THRESHOLD_EXPONENTS
            .map(|exp| {
                let threshold = 1u64 << exp;
                SizeBucket {
                    threshold,
                    label: format_human(threshold),
                    fraction: self.fraction_below(threshold),
                }
            })
            .collect()
    }
}
