use std::collections::HashSet;

use super::types::{HelperId, Preference};

/// A preference together with its position in submission order
#[derive(Debug, Clone, Copy)]
pub struct QueuedPreference<'a> {
    pub seq: usize,
    pub preference: &'a Preference,
}

/// Preferences split into the regular and substitute phases, each ordered by
/// priority (lower first). Missing priorities go last. Ties keep submission
/// order, so two runs over the same input always see the same sequence.
#[derive(Debug, Clone)]
pub struct PreferenceQueue<'a> {
    regular: Vec<QueuedPreference<'a>>,
    substitute: Vec<QueuedPreference<'a>>,
}

fn priority_key(p: &Preference) -> (bool, u32) {
    (p.priority.is_none(), p.priority.unwrap_or(0))
}

impl<'a> PreferenceQueue<'a> {
    pub fn new(preferences: &'a [Preference]) -> Self {
        let (mut substitute, mut regular): (Vec<_>, Vec<_>) = preferences
            .iter()
            .enumerate()
            .map(|(seq, preference)| QueuedPreference { seq, preference })
            .partition(|q| q.preference.is_substitute);

        // sort_by_key is stable
        regular.sort_by_key(|q| priority_key(q.preference));
        substitute.sort_by_key(|q| priority_key(q.preference));

        Self { regular, substitute }
    }

    pub fn regular(&self) -> &[QueuedPreference<'a>] {
        &self.regular
    }

    pub fn substitute(&self) -> &[QueuedPreference<'a>] {
        &self.substitute
    }

    /// Regular preferences of helpers not yet served in the current round
    pub fn next_regular_round(&self, already_assigned: &HashSet<HelperId>) -> Vec<QueuedPreference<'a>> {
        round(&self.regular, already_assigned)
    }

    pub fn next_substitute_round(&self, already_assigned: &HashSet<HelperId>) -> Vec<QueuedPreference<'a>> {
        round(&self.substitute, already_assigned)
    }
}

fn round<'a>(
    queue: &[QueuedPreference<'a>],
    already_assigned: &HashSet<HelperId>,
) -> Vec<QueuedPreference<'a>> {
    queue
        .iter()
        .filter(|q| !already_assigned.contains(&q.preference.helper_id))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pref(id: &str, helper: &str, priority: Option<u32>, substitute: bool) -> Preference {
        Preference {
            id: id.to_string(),
            helper_id: helper.to_string(),
            task_id: if substitute { None } else { Some("t".to_string()) },
            priority,
            is_substitute: substitute,
            desired_window: None,
            free_text: None,
        }
    }

    fn ids(queue: &[QueuedPreference<'_>]) -> Vec<String> {
        queue.iter().map(|q| q.preference.id.clone()).collect()
    }

    #[test]
    fn orders_by_priority_with_missing_last() {
        let prefs = vec![
            pref("p1", "h1", None, false),
            pref("p2", "h2", Some(2), false),
            pref("p3", "h3", Some(1), false),
            pref("p4", "h4", None, false),
            pref("p5", "h5", Some(2), false),
        ];
        let queue = PreferenceQueue::new(&prefs);
        assert_eq!(ids(queue.regular()), vec!["p3", "p2", "p5", "p1", "p4"]);
        assert!(queue.substitute().is_empty());
    }

    #[test]
    fn splits_substitutes_from_regulars() {
        let prefs = vec![
            pref("s1", "h1", None, true),
            pref("r1", "h1", Some(1), false),
            pref("s2", "h2", Some(1), true),
        ];
        let queue = PreferenceQueue::new(&prefs);
        assert_eq!(ids(queue.regular()), vec!["r1"]);
        assert_eq!(ids(queue.substitute()), vec!["s2", "s1"]);
    }

    #[test]
    fn round_skips_served_helpers() {
        let prefs = vec![
            pref("p1", "h1", Some(1), false),
            pref("p2", "h2", Some(1), false),
            pref("p3", "h1", Some(2), false),
        ];
        let queue = PreferenceQueue::new(&prefs);
        let served: HashSet<HelperId> = ["h1".to_string()].into_iter().collect();
        assert_eq!(ids(&queue.next_regular_round(&served)), vec!["p2"]);
        assert_eq!(ids(&queue.next_regular_round(&HashSet::new())), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn keeps_submission_sequence() {
        let prefs = vec![pref("p1", "h1", Some(3), false), pref("p2", "h2", Some(1), false)];
        let queue = PreferenceQueue::new(&prefs);
        let seqs: Vec<usize> = queue.regular().iter().map(|q| q.seq).collect();
        assert_eq!(seqs, vec![1, 0]);
    }
}
