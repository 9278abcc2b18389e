//! Present/absent/total counts over a roster.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use rollcall_core::{AttendanceStatus, UserId};

/// Counts over a class roster; `present + absent == total`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Roster students marked present.
    pub present: usize,
    /// Roster students not marked present.
    pub absent: usize,
    /// Roster size.
    pub total: usize,
}

impl Summary {
    /// Count roster students marked present; everyone else on the roster is
    /// absent, whether marked so or never marked.
    ///
    /// Marks for ids outside the roster are ignored, so `absent` never
    /// underflows and the counts agree with what a closure persists.
    pub fn compute(roster: &[UserId], attendance: &HashMap<UserId, AttendanceStatus>) -> Self {
        let total = roster.len();
        let present = roster
            .iter()
            .filter(|id| attendance.get(*id).is_some_and(|s| s.is_present()))
            .count();
        Self {
            present,
            absent: total - present,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(raw: &[&str]) -> Vec<UserId> {
        raw.iter().map(|s| UserId::from_raw(*s)).collect()
    }

    #[test]
    fn unmarked_students_count_as_absent() {
        let roster = ids(&["s1", "s2", "s3"]);
        let attendance = HashMap::from([
            (UserId::from_raw("s1"), AttendanceStatus::Present),
            (UserId::from_raw("s2"), AttendanceStatus::Absent),
        ]);
        assert_eq!(
            Summary::compute(&roster, &attendance),
            Summary { present: 1, absent: 2, total: 3 }
        );
    }

    #[test]
    fn marks_outside_roster_are_ignored() {
        let roster = ids(&["s1"]);
        let attendance = HashMap::from([
            (UserId::from_raw("s1"), AttendanceStatus::Present),
            (UserId::from_raw("ghost"), AttendanceStatus::Present),
        ]);
        assert_eq!(
            Summary::compute(&roster, &attendance),
            Summary { present: 1, absent: 0, total: 1 }
        );
    }

    #[test]
    fn empty_roster() {
        assert_eq!(Summary::compute(&[], &HashMap::new()), Summary::default());
    }

    proptest! {
        #[test]
        fn present_plus_absent_is_total(
            roster_size in 0usize..40,
            marks in proptest::collection::vec((0usize..60, any::<bool>()), 0..80),
        ) {
            let roster: Vec<UserId> = (0..roster_size).map(|i| UserId::from_raw(format!("s{i}"))).collect();
            let attendance: HashMap<UserId, AttendanceStatus> = marks
                .into_iter()
                .map(|(i, present)| {
                    let status = if present { AttendanceStatus::Present } else { AttendanceStatus::Absent };
                    (UserId::from_raw(format!("s{i}")), status)
                })
                .collect();

            let summary = Summary::compute(&roster, &attendance);
            prop_assert_eq!(summary.present + summary.absent, summary.total);
            prop_assert_eq!(summary.total, roster_size);
        }
    }
}
