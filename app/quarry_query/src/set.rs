/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::fmt;

use dupe::Dupe;
use fancy_regex::Regex;
use indexmap::IndexMap;
use quarry_node::label::Label;
use quarry_node::target::Target;

/// An insertion-ordered set of targets, indexed by label. A label inserted
/// twice keeps its first target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    targets: IndexMap<Label, Target>,
}

impl TargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target: Target) -> bool {
        match self.targets.entry(target.label().dupe()) {
            indexmap::map::Entry::Occupied(..) => false,
            indexmap::map::Entry::Vacant(e) => {
                e.insert(target);
                true
            }
        }
    }

    pub fn extend<I: IntoIterator<Item = Target>>(&mut self, targets: I) {
        for target in targets {
            self.insert(target);
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn contains(&self, label: &Label) -> bool {
        self.targets.contains_key(label)
    }

    pub fn get(&self, label: &Label) -> Option<&Target> {
        self.targets.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> + Clone {
        self.targets.values()
    }

    pub fn iter_labels(&self) -> impl Iterator<Item = &Label> + Clone {
        self.targets.keys()
    }

    pub fn union(&self, right: &TargetSet) -> TargetSet {
        let mut result = self.clone();
        for target in right.iter() {
            result.insert(target.dupe());
        }
        result
    }

    pub fn intersect(&self, right: &TargetSet) -> TargetSet {
        self.retain(|t| right.contains(t.label()))
    }

    pub fn difference(&self, right: &TargetSet) -> TargetSet {
        self.retain(|t| !right.contains(t.label()))
    }

    fn retain(&self, keep: impl Fn(&Target) -> bool) -> TargetSet {
        self.iter().filter(|t| keep(t)).map(Target::dupe).collect()
    }

    pub fn filter<F: Fn(&Target) -> anyhow::Result<bool>>(
        &self,
        filter: F,
    ) -> anyhow::Result<TargetSet> {
        let mut result = TargetSet::new();
        for target in self.iter() {
            if filter(target)? {
                result.insert(target.dupe());
            }
        }
        Ok(result)
    }

    /// Targets whose label matches the regex.
    pub fn filter_name(&self, regex: &str) -> anyhow::Result<TargetSet> {
        let re = Regex::new(regex)?;
        self.filter(|t| Ok(re.is_match(&t.label().to_string())?))
    }

    /// Targets whose kind string (`"<class> rule"`, `"source file"`, …)
    /// matches the regex.
    pub fn kind(&self, regex: &str) -> anyhow::Result<TargetSet> {
        let re = Regex::new(regex)?;
        self.filter(|t| Ok(re.is_match(&t.target_kind())?))
    }
}

impl FromIterator<Target> for TargetSet {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        let mut set = TargetSet::new();
        set.extend(iter);
        set
    }
}

impl IntoIterator for TargetSet {
    type Item = Target;
    type IntoIter = indexmap::map::IntoValues<Label, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.into_values()
    }
}

impl fmt::Display for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, label) in self.iter_labels().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", label)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use quarry_node::target::Rule;
    use quarry_node::target::Visibility;

    use super::*;

    fn rule(name: &str, class: &str) -> Target {
        Target::rule(Rule::new(
            Label::parse(name).unwrap(),
            class,
            vec![],
            vec![],
            Visibility::default(),
        ))
    }

    fn set(targets: &[Target]) -> TargetSet {
        targets.iter().map(Target::dupe).collect()
    }

    #[test]
    fn test_set_algebra() {
        let a = rule("//p:a", "cc_library");
        let b = rule("//p:b", "cc_binary");
        let c = rule("//p:c", "cc_library");
        let left = set(&[a.dupe(), b.dupe()]);
        let right = set(&[b.dupe(), c.dupe()]);

        assert_eq!(left.union(&right), set(&[a.dupe(), b.dupe(), c.dupe()]));
        assert_eq!(left.intersect(&right), set(&[b.dupe()]));
        assert_eq!(left.difference(&right), set(&[a.dupe()]));
    }

    #[test]
    fn test_insert_keeps_first() {
        let mut targets = TargetSet::new();
        assert!(targets.insert(rule("//p:a", "cc_library")));
        assert!(!targets.insert(rule("//p:a", "cc_binary")));
        assert_eq!(targets.len(), 1);
        assert_eq!(
            targets
                .get(&Label::parse("//p:a").unwrap())
                .unwrap()
                .target_kind(),
            "cc_library rule"
        );
    }

    #[test]
    fn test_regex_filters() {
        let targets = set(&[
            rule("//p:lib", "cc_library"),
            rule("//p:bin", "cc_binary"),
        ]);
        let kinds = targets.kind("cc_library").unwrap();
        assert_eq!(kinds.len(), 1);
        assert!(kinds.contains(&Label::parse("//p:lib").unwrap()));

        let names = targets.filter_name(":bin$").unwrap();
        assert_eq!(names.len(), 1);
        assert!(names.contains(&Label::parse("//p:bin").unwrap()));
    }
}
