//! Remote state prober.
//!
//! Looks up what the remote already holds for a batch, one bounded
//! sub-batch per call. There is no retry here: without knowing remote state
//! the run could issue duplicate writes, so any failure aborts the run.

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::models::ContentItem;
use crate::sink::RemoteSink;

/// Fetch stored fingerprints for `items` in sub-batches of `max_per_call`.
///
/// Returns `item_id → fingerprint` for the ids the remote knows; ids it
/// does not report are absent from the map. Entries for ids that were not
/// asked about are ignored.
pub async fn probe_remote(
    sink: &dyn RemoteSink,
    items: &[ContentItem],
    max_per_call: usize,
) -> Result<HashMap<String, String>> {
    let step = max_per_call.max(1);
    let mut known = HashMap::new();

    tracing::debug!(
        sink = %sink.label(),
        batch_size = step,
        total_ids = items.len(),
        "probing remote state"
    );

    for (n, group) in items.chunks(step).enumerate() {
        let got = sink
            .fetch_fingerprints(group)
            .await
            .with_context(|| format!("remote lookup failed on {}", sink.label()))?;

        for item in group {
            if let Some(h) = got.get(&item.item_id) {
                known.insert(item.item_id.clone(), h.clone());
            }
        }

        if n % 20 == 0 {
            tracing::debug!(batches = n + 1, remote_known = known.len(), "probe progress");
        }
    }

    Ok(known)
}
