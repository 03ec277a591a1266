use crate::types::{PersonId, RecognitionOutcome};
use std::collections::{BTreeSet, HashSet};

/// One outcome per roster member, in roster order.
///
/// Pure and total: people never seen (or never enrolled with reference
/// images) are reported absent rather than omitted. A person listed twice in
/// the roster is reported once, at their first position.
pub fn reconcile(roster: &[PersonId], recognized: &BTreeSet<PersonId>) -> Vec<RecognitionOutcome> {
    let mut seen = HashSet::with_capacity(roster.len());
    roster
        .iter()
        .filter(|person| seen.insert(*person))
        .map(|person| RecognitionOutcome {
            person_id: person.clone(),
            recognized: recognized.contains(person),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(ids: &[&str]) -> Vec<PersonId> {
        ids.iter().map(|s| PersonId::from(*s)).collect()
    }

    fn recognized(ids: &[&str]) -> BTreeSet<PersonId> {
        ids.iter().map(|s| PersonId::from(*s)).collect()
    }

    #[test]
    fn test_roster_order_and_status() {
        let out = reconcile(&roster(&["S1", "S2", "S3"]), &recognized(&["S1"]));
        let flat: Vec<_> = out.iter().map(|o| (o.person_id.as_str(), o.recognized)).collect();
        assert_eq!(flat, vec![("S1", true), ("S2", false), ("S3", false)]);
    }

    #[test]
    fn test_one_outcome_per_member_regardless_of_recognized() {
        let r = roster(&["c", "a", "b"]);
        for s in [
            recognized(&[]),
            recognized(&["a"]),
            recognized(&["a", "b", "c"]),
            recognized(&["stranger", "x"]),
        ] {
            let out = reconcile(&r, &s);
            assert_eq!(out.len(), r.len());
            for (outcome, person) in out.iter().zip(&r) {
                assert_eq!(&outcome.person_id, person);
            }
        }
    }

    #[test]
    fn test_recognized_outside_roster_is_ignored() {
        let out = reconcile(&roster(&["S1"]), &recognized(&["S1", "S9"]));
        assert_eq!(out.len(), 1);
        assert!(out[0].recognized);
    }

    #[test]
    fn test_empty_roster() {
        assert!(reconcile(&[], &recognized(&["S1"])).is_empty());
    }

    #[test]
    fn test_repeated_roster_entry_reported_once() {
        let out = reconcile(&roster(&["a", "b", "a"]), &recognized(&["a"]));
        let flat: Vec<_> = out.iter().map(|o| o.person_id.as_str()).collect();
        assert_eq!(flat, vec!["a", "b"]);
    }

    #[test]
    fn test_reconcile_is_pure() {
        let r = roster(&["S1", "S2", "S3"]);
        let s = recognized(&["S3"]);
        assert_eq!(reconcile(&r, &s), reconcile(&r, &s));
    }
}
