/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Materializes target objects for batches of traversal keys with one
//! package fetch per distinct package rather than one per target.

use std::collections::HashMap;

use anyhow::Context;
use dupe::Dupe;
use quarry_graph::key::GraphKey;
use quarry_graph::walkable::WalkableGraph;
use quarry_node::label::Label;
use quarry_node::target::Target;

/// Looks up the target behind each transitive-traversal key. Keys with any
/// other tag contribute nothing. A label whose package is loaded but which
/// no longer names a target is silently dropped: that is a normal outcome of
/// cycle breaking and universe filtering, not an error.
pub(crate) async fn targets_from_keys(
    graph: &dyn WalkableGraph,
    keys: impl IntoIterator<Item = &GraphKey>,
) -> anyhow::Result<HashMap<GraphKey, Target>> {
    let mut by_package: HashMap<GraphKey, Vec<(GraphKey, Label)>> = HashMap::new();
    for key in keys {
        if let Some(label) = key.as_transitive_traversal_label() {
            by_package
                .entry(GraphKey::Package(label.package_id().clone()))
                .or_default()
                .push((key.clone(), label.dupe()));
        }
    }

    let package_keys: Vec<GraphKey> = by_package.keys().cloned().collect();
    let package_values = graph.successful_values(&package_keys).await?;

    let mut result = HashMap::new();
    for (package_key, value) in &package_values {
        let package = value
            .as_package()
            .with_context(|| format!("unexpected value kind for {}", package_key))?;
        for (target_key, label) in &by_package[package_key] {
            if let Ok(target) = package.target(label.name()) {
                result.insert(target_key.clone(), target.dupe());
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use quarry_graph::memory::InMemoryGraph;
    use quarry_node::label::PackageId;
    use quarry_node::package::Package;
    use quarry_node::path::PathFragment;
    use quarry_node::target::Rule;
    use quarry_node::target::Visibility;

    use super::*;

    #[tokio::test]
    async fn test_missing_targets_and_foreign_keys_are_dropped() {
        let id = PackageId::new(PathFragment::new("a"));
        let graph = InMemoryGraph::builder()
            .package(
                Package::builder(id.clone())
                    .target(Target::rule(Rule::new(
                        Label::parse("//a:x").unwrap(),
                        "cc_library",
                        vec![],
                        vec![],
                        Visibility::default(),
                    )))
                    .build(),
            )
            .build();

        let present = GraphKey::transitive_traversal(&Label::parse("//a:x").unwrap());
        let absent = GraphKey::transitive_traversal(&Label::parse("//a:gone").unwrap());
        let foreign = GraphKey::Package(id);
        let keys = [present.clone(), absent, foreign];

        let targets = targets_from_keys(graph.as_ref(), keys.iter()).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[&present].label().to_string(), "//a:x");
    }
}
