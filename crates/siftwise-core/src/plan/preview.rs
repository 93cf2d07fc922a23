use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Action, Mapping};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRow {
    pub label: String,
    pub action: Action,
    pub count: usize,
}

/// Counts keyed by (label, action), sorted.
pub fn preview_counts(mapping: &Mapping) -> Vec<PreviewRow> {
    let mut counts: BTreeMap<(String, Action), usize> = BTreeMap::new();
    for entry in mapping.iter() {
        *counts.entry((entry.label.clone(), entry.action)).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|((label, action), count)| PreviewRow { label, action, count })
        .collect()
}

/// Totals per action, for summaries.
pub fn action_totals(mapping: &Mapping) -> BTreeMap<Action, usize> {
    let mut totals = BTreeMap::new();
    for entry in mapping.iter() {
        *totals.entry(entry.action).or_insert(0) += 1;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MappingEntry;

    #[test]
    fn test_counts_grouped_and_sorted() {
        let mut a = MappingEntry::residual("/s/a".into(), "images".into(), 0.9, String::new(), 1);
        a.action = Action::Move;
        let mut b = a.clone();
        b.source_path = "/s/b".into();
        let c = MappingEntry::residual("/s/c".into(), String::new(), 0.0, "no label".into(), 1);
        let mapping = Mapping::from_entries(vec![a, b, c]);

        let rows = preview_counts(&mapping);
        assert_eq!(
            rows,
            vec![
                PreviewRow { label: String::new(), action: Action::Skip, count: 1 },
                PreviewRow { label: "images".into(), action: Action::Move, count: 2 },
            ]
        );
        assert_eq!(action_totals(&mapping)[&Action::Move], 2);
    }
}
