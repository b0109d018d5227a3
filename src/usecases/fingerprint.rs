//! Change-set fingerprint.
//!
//! Hash each change's canonical form, sort, and hash the sorted list. Row order in the
//! sheet does not matter; any content difference does.

use crate::domain::{Change, ChangeSetFingerprint};
use sha2::{Digest, Sha256};

pub fn fingerprint(changes: &[Change]) -> ChangeSetFingerprint {
    let mut digests: Vec<String> = changes.iter().map(Change::identity).collect();
    digests.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update((digests.len() as u64).to_be_bytes());
    for d in &digests {
        hasher.update(d.as_bytes());
        hasher.update(b"\n");
    }
    ChangeSetFingerprint::from_hex(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeKind;
    use chrono::NaiveDate;

    fn change(group: &str, start: &str, kind: ChangeKind) -> Change {
        Change {
            group_name: group.into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 23).unwrap(),
            time_start: start.into(),
            time_end: String::new(),
            subject: "Physics".into(),
            teacher: String::new(),
            classroom: String::new(),
            kind,
            original_subject: String::new(),
        }
    }

    #[test]
    fn order_does_not_matter() {
        let a = change("G1", "09:00", ChangeKind::Cancellation);
        let b = change("G2", "10:40", ChangeKind::Addition);
        assert_eq!(
            fingerprint(&[a.clone(), b.clone()]),
            fingerprint(&[b, a])
        );
    }

    #[test]
    fn content_matters() {
        let a = change("G1", "09:00", ChangeKind::Cancellation);
        let mut b = a.clone();
        b.kind = ChangeKind::Replacement;
        assert_ne!(fingerprint(&[a.clone()]), fingerprint(&[b]));

        let mut c = a.clone();
        c.teacher = "Petrov".into();
        assert_ne!(fingerprint(&[a.clone()]), fingerprint(&[c]));

        // Duplicates count.
        assert_ne!(fingerprint(&[a.clone()]), fingerprint(&[a.clone(), a]));
    }

    #[test]
    fn empty_set_is_stable() {
        let fp = fingerprint(&[]);
        assert_eq!(fp, fingerprint(&[]));
        assert_eq!(fp.as_str().len(), 64);
    }
}
