use crate::model::FeedEntry;

/// Entries newer than the watermark and the watermark that covers the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filtered {
    pub accepted: Vec<FeedEntry>,
    pub watermark: i64,
}

/// Keep entries published strictly after `watermark` (epoch millis), in input
/// order. The returned watermark is the maximum of `watermark` and every
/// entry's published time, so it never moves backwards.
pub fn filter_new(entries: &[FeedEntry], watermark: i64) -> Filtered {
    let accepted = entries
        .iter()
        .filter(|e| e.published_millis() > watermark)
        .cloned()
        .collect();
    let newest = entries
        .iter()
        .map(FeedEntry::published_millis)
        .fold(watermark, i64::max);
    Filtered {
        accepted,
        watermark: newest,
    }
}
