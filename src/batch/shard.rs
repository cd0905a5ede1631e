//! Splitting a batch into shards.

use std::ops::Range;

use crate::batch::config::ShardConfig;

/// Number of shards for `records` records totalling `total_bytes`.
///
/// One shard per `target_shard_bytes`, clamped to the configured bounds and
/// never more than the number of records. An empty batch has one (empty)
/// shard.
pub fn shard_count(total_bytes: usize, records: usize, config: &ShardConfig) -> usize {
    if records == 0 {
        return 1;
    }
    let min = config.min_shards.max(1);
    let max = config.max_shards.max(min);
    let by_bytes = total_bytes / config.target_shard_bytes.max(1);
    by_bytes.clamp(min, max).min(records)
}

/// Contiguous record ranges for `shards` shards, the first
/// `records % shards` of them one record longer.
pub fn shard_ranges(records: usize, shards: usize) -> Vec<Range<usize>> {
    let shards = shards.max(1);
    let base = records / shards;
    let extra = records % shards;
    let mut start = 0;
    (0..shards)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}
