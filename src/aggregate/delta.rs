//! Source set changes between runs

use std::collections::BTreeSet;

use crate::models::SourceDelta;

/// Set difference of the current alive list against the previous one, sorted
pub fn compute_delta(previous: &[String], current: &[String]) -> SourceDelta {
    let previous: BTreeSet<&String> = previous.iter().collect();
    let current: BTreeSet<&String> = current.iter().collect();

    SourceDelta {
        new: current.difference(&previous).map(|s| s.to_string()).collect(),
        removed: previous.difference(&current).map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_delta_scenario() {
        let delta = compute_delta(&list(&["X", "Y"]), &list(&["Y", "Z"]));
        assert_eq!(delta.new, list(&["Z"]));
        assert_eq!(delta.removed, list(&["X"]));
    }

    #[test]
    fn test_delta_first_run_and_unchanged() {
        let delta = compute_delta(&[], &list(&["B", "A"]));
        assert_eq!(delta.new, list(&["A", "B"]));
        assert!(delta.removed.is_empty());

        assert_eq!(
            compute_delta(&list(&["A"]), &list(&["A"])),
            SourceDelta::default()
        );
    }
}
