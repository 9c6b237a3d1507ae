/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Allowed-dependency policy. The raw graph records every edge a target was
//! loaded with; a rule's outgoing edges must additionally be sanctioned by
//! its attributes (post filter), its visibility or its aspects.

use std::collections::HashSet;

use dupe::Dupe;
use quarry_node::label::Label;
use quarry_node::target::DependencyFilter;
use quarry_node::target::Rule;
use quarry_node::target::Target;

pub(crate) fn allowed_deps(rule: &Rule, filter: DependencyFilter) -> HashSet<Label> {
    let mut allowed: HashSet<Label> = rule.transitions(filter).map(Label::dupe).collect();
    allowed.extend(rule.visibility().dependency_labels().iter().map(Label::dupe));
    // Deps contributed by aspects would otherwise be filtered out.
    allowed.extend(rule.aspect_labels_superset(filter).map(Label::dupe));
    allowed
}

pub(crate) fn filter_fwd_deps(
    source: &Target,
    raw_deps: Vec<Target>,
    filter: DependencyFilter,
) -> Vec<Target> {
    match source.as_rule() {
        None => raw_deps,
        Some(rule) => {
            let allowed = allowed_deps(rule, filter);
            raw_deps
                .into_iter()
                .filter(|dep| allowed.contains(dep.label()))
                .collect()
        }
    }
}
