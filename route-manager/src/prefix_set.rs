// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A working set of textual CIDR prefixes and the set algebra the
//! reconcilers diff with.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

/// A set of CIDR prefixes in canonical textual form.
///
/// Equality is textual: callers canonicalize (mask host bits) before
/// insertion. Duplication is `Clone`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixSet {
    prefixes: AHashSet<String>,
}

impl PrefixSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prefix to the set.
    pub fn add(&mut self, prefix: impl Into<String>) {
        self.prefixes.insert(prefix.into());
    }

    /// Remove a prefix from the set.
    pub fn del(&mut self, prefix: &str) {
        self.prefixes.remove(prefix);
    }

    /// True when `prefix` is a member of the set.
    #[must_use]
    pub fn exists(&self, prefix: &str) -> bool {
        self.prefixes.contains(prefix)
    }

    /// The number of prefixes in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    /// True when the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Iterate over the members of the set in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.prefixes.iter().map(String::as_str)
    }

    /// Compute the two sets of operations that turn `current` into `self`:
    /// the prefixes to add (in `self` but not in `current`) and the
    /// prefixes to delete (in `current` but not in `self`).
    ///
    /// Pure: neither input is modified.
    #[must_use]
    pub fn distance(&self, current: &PrefixSet) -> (PrefixSet, PrefixSet) {
        let mut add_set = self.clone();
        let mut delete_set = PrefixSet::new();

        for prefix in current.iter() {
            if self.exists(prefix) {
                add_set.del(prefix);
            } else {
                delete_set.add(prefix);
            }
        }

        (add_set, delete_set)
    }
}

impl FromIterator<String> for PrefixSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            prefixes: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a str> for PrefixSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(str::to_owned).collect()
    }
}

impl Extend<String> for PrefixSet {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.prefixes.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::PrefixSet;
    use bolero::TypeGenerator;

    #[test]
    fn add_del_exists() {
        let mut set = PrefixSet::new();
        assert!(!set.exists("10.0.0.0/24"));
        set.add("10.0.0.0/24");
        assert!(set.exists("10.0.0.0/24"));
        set.add("10.0.0.0/24");
        assert_eq!(set.len(), 1);
        set.del("10.0.0.0/24");
        assert!(set.is_empty());
    }

    #[test]
    fn distance_is_symmetric_difference_split() {
        let desired: PrefixSet = ["10.0.0.0/24", "10.0.1.0/24", "fd00::/64"]
            .into_iter()
            .collect();
        let current: PrefixSet = ["10.0.1.0/24", "192.168.0.0/16"].into_iter().collect();

        let (add, del) = desired.distance(&current);

        let expected_add: PrefixSet = ["10.0.0.0/24", "fd00::/64"].into_iter().collect();
        let expected_del: PrefixSet = ["192.168.0.0/16"].into_iter().collect();
        assert_eq!(add, expected_add);
        assert_eq!(del, expected_del);

        // inputs unchanged
        assert_eq!(desired.len(), 3);
        assert_eq!(current.len(), 2);
    }

    #[test]
    fn distance_of_equal_sets_is_empty() {
        let set: PrefixSet = ["10.0.0.0/24", "fd00::/64"].into_iter().collect();
        let (add, del) = set.distance(&set.clone());
        assert!(add.is_empty());
        assert!(del.is_empty());
    }

    #[derive(Debug, TypeGenerator)]
    struct TwoSets {
        desired: Vec<u8>,
        current: Vec<u8>,
    }

    fn to_set(raw: &[u8]) -> PrefixSet {
        raw.iter().map(|b| format!("10.0.{b}.0/24")).collect()
    }

    #[test]
    fn distance_properties() {
        bolero::check!().with_type().for_each(|sets: &TwoSets| {
            let desired = to_set(&sets.desired);
            let current = to_set(&sets.current);
            let (add, del) = desired.distance(&current);

            for prefix in add.iter() {
                assert!(desired.exists(prefix));
                assert!(!current.exists(prefix));
            }
            for prefix in del.iter() {
                assert!(current.exists(prefix));
                assert!(!desired.exists(prefix));
            }
            for prefix in desired.iter() {
                assert_eq!(add.exists(prefix), !current.exists(prefix));
            }
            for prefix in current.iter() {
                assert_eq!(del.exists(prefix), !desired.exists(prefix));
            }
        });
    }
}
