//! Diff & budget planner.
//!
//! Drops items whose fingerprint already matches the remote, orders the rest
//! by `item_id`, and cuts the list down to the remaining write budget.
//! Items cut by the budget are deferred to a later run, not failed.

use std::collections::{BTreeMap, HashMap};

use crate::models::ContentItem;

/// What a flush should write.
#[derive(Debug, Default)]
pub struct Plan {
    /// Changed or never-synchronized items, sorted by id, within budget.
    pub to_write: Vec<ContentItem>,
    /// Items whose remote fingerprint already matches.
    pub unchanged: u64,
    /// Changed items left for a later run because the budget ran out.
    pub deferred: u64,
}

/// Deduplicate a buffered batch by `item_id` (last occurrence wins) and
/// sort it by id.
pub fn prepare_batch(items: Vec<ContentItem>) -> Vec<ContentItem> {
    let mut by_id = BTreeMap::new();
    for item in items {
        by_id.insert(item.item_id.clone(), item);
    }
    by_id.into_values().collect()
}

/// Diff `batch` against `remote` and fit the result into `remaining_budget`.
pub fn plan_writes(
    batch: Vec<ContentItem>,
    remote: &HashMap<String, String>,
    remaining_budget: u64,
) -> Plan {
    let mut plan = Plan::default();

    for item in batch {
        if remote.get(&item.item_id) == Some(&item.fingerprint) {
            plan.unchanged += 1;
        } else {
            plan.to_write.push(item);
        }
    }

    plan.to_write.sort_by(|a, b| a.item_id.cmp(&b.item_id));

    let budget = usize::try_from(remaining_budget).unwrap_or(usize::MAX);
    if plan.to_write.len() > budget {
        plan.deferred = (plan.to_write.len() - budget) as u64;
        plan.to_write.truncate(budget);
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::models::{ContentKind, Metadata};

    fn item(id: &str, text: &str) -> ContentItem {
        ContentItem {
            item_id: id.to_string(),
            kind: ContentKind::Comment,
            subreddit: "rust".into(),
            local_id: id.rsplit(':').next().unwrap().to_string(),
            text: text.to_string(),
            fingerprint: fingerprint(text),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn unchanged_items_are_dropped() {
        let batch = vec![item("r:c:rust:a", "same"), item("r:c:rust:b", "new")];
        let remote = HashMap::from([
            ("r:c:rust:a".to_string(), fingerprint("same")),
            ("r:c:rust:b".to_string(), fingerprint("old")),
        ]);
        let plan = plan_writes(batch, &remote, 100);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.to_write.len(), 1);
        assert_eq!(plan.to_write[0].item_id, "r:c:rust:b");
    }

    #[test]
    fn truncation_keeps_smallest_ids() {
        // Ten changed items in scrambled order, budget of three.
        let ids = ["j", "c", "h", "a", "f", "e", "b", "i", "d", "g"];
        let batch: Vec<_> = ids
            .iter()
            .map(|id| item(&format!("r:c:rust:{}", id), id))
            .collect();

        let plan = plan_writes(batch, &HashMap::new(), 3);
        let kept: Vec<_> = plan.to_write.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(kept, vec!["r:c:rust:a", "r:c:rust:b", "r:c:rust:c"]);
        assert_eq!(plan.deferred, 7);
    }

    #[test]
    fn nothing_to_write_when_everything_matches() {
        let batch = vec![item("r:c:rust:a", "x")];
        let remote = HashMap::from([("r:c:rust:a".to_string(), fingerprint("x"))]);
        let plan = plan_writes(batch, &remote, 10);
        assert!(plan.to_write.is_empty());
        assert_eq!(plan.deferred, 0);
    }

    #[test]
    fn zero_budget_defers_everything() {
        let batch = vec![item("r:c:rust:a", "x"), item("r:c:rust:b", "y")];
        let plan = plan_writes(batch, &HashMap::new(), 0);
        assert!(plan.to_write.is_empty());
        assert_eq!(plan.deferred, 2);
    }

    #[test]
    fn prepare_batch_dedups_last_wins_and_sorts() {
        let batch = vec![
            item("r:c:rust:b", "first"),
            item("r:c:rust:a", "x"),
            item("r:c:rust:b", "second"),
        ];
        let prepared = prepare_batch(batch);
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].item_id, "r:c:rust:a");
        assert_eq!(prepared[1].text, "second");
    }
}
