/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Which packages' build files transitively depend on a set of file paths?
//!
//! Files influence packages through package-lookup intermediaries rather
//! than direct edges, and every package depends on the external package, so
//! the reverse walk here is tag-aware: an unfiltered reverse BFS would
//! either over-collect through subpackage-existence edges or stall at the
//! external-package hub.

use std::collections::HashMap;
use std::collections::HashSet;

use anyhow::Context;
use dupe::Dupe;
use indexmap::IndexSet;
use itertools::Itertools;
use quarry_graph::key::FunctionName;
use quarry_graph::key::GraphKey;
use quarry_graph::walkable::WalkableGraph;
use quarry_node::label::PackageId;
use quarry_node::package::WORKSPACE_FILE_NAME;
use quarry_node::path::PathFragment;
use quarry_node::path::RootedPath;
use quarry_node::target::Target;

use crate::callback::Callback;

/// Lookup keys for the directories that may contain the package owning
/// `original`. The workspace file is special: it belongs to the external
/// package, whose lookup lives under the external package identifier and
/// the empty main-repository path.
fn candidate_lookup_keys(original: &PathFragment, current: &PathFragment) -> Vec<GraphKey> {
    if original == current && original.as_str() == WORKSPACE_FILE_NAME {
        return vec![
            GraphKey::PackageLookup(PackageId::external()),
            GraphKey::PackageLookup(PackageId::new(PathFragment::empty())),
        ];
    }
    match current.parent() {
        Some(parent) => vec![GraphKey::PackageLookup(PackageId::new(parent))],
        None => Vec::new(),
    }
}

/// File keys that may be present in the graph for the given paths, found by
/// walking each path's ancestor directories until one contains a package.
/// The package lookup tells us which root the file key is anchored under.
pub(crate) async fn file_keys_for_paths(
    graph: &dyn WalkableGraph,
    paths: &[PathFragment],
) -> anyhow::Result<Vec<GraphKey>> {
    let mut result: IndexSet<GraphKey> = IndexSet::new();
    let mut current_to_original: Vec<(PathFragment, PathFragment)> =
        paths.iter().map(|p| (p.clone(), p.clone())).collect();

    while !current_to_original.is_empty() {
        let mut lookup_to_original: HashMap<GraphKey, Vec<PathFragment>> = HashMap::new();
        let mut lookup_to_current: HashMap<GraphKey, Vec<PathFragment>> = HashMap::new();
        for (current, original) in &current_to_original {
            for key in candidate_lookup_keys(original, current) {
                lookup_to_original
                    .entry(key.clone())
                    .or_default()
                    .push(original.clone());
                lookup_to_current.entry(key).or_default().push(current.clone());
            }
        }

        let keys: Vec<GraphKey> = lookup_to_original.keys().cloned().collect();
        let mut resolved: HashSet<PathFragment> = HashSet::new();
        for (key, value) in graph.successful_values(&keys).await? {
            let lookup = value
                .as_package_lookup()
                .with_context(|| format!("unexpected value kind for {}", key))?;
            let root = match lookup.root() {
                Some(root) => root,
                None => continue,
            };
            for original in &lookup_to_original[&key] {
                result.insert(GraphKey::File(RootedPath::new(
                    root.clone(),
                    original.clone(),
                )));
            }
            resolved.extend(lookup_to_current[&key].iter().cloned());
        }

        current_to_original = current_to_original
            .into_iter()
            .filter(|(current, _)| !resolved.contains(current))
            .filter_map(|(current, original)| {
                current.parent().map(|parent| (parent, original))
            })
            .collect();
    }
    Ok(result.into_iter().collect())
}

async fn flush_packages(
    graph: &dyn WalkableGraph,
    result_keys: &IndexSet<GraphKey>,
    batch_size: usize,
    callback: &dyn Callback,
) -> anyhow::Result<()> {
    let chunks: Vec<Vec<GraphKey>> = result_keys
        .iter()
        .cloned()
        .chunks(batch_size)
        .into_iter()
        .map(|chunk| chunk.collect())
        .collect();
    for keys in chunks {
        let values = graph.successful_values(&keys).await?;
        let build_files: Vec<Target> = values
            .values()
            .filter_map(|v| v.as_package())
            .filter(|p| !p.contains_errors())
            .map(|p| p.build_file().dupe())
            .collect();
        callback.process(build_files).await?;
    }
    Ok(())
}

/// Streams the build-file targets of every error-free package that
/// transitively depends on one of the given file paths.
pub(crate) async fn get_rbuildfiles(
    graph: &dyn WalkableGraph,
    batch_size: usize,
    paths: &[PathFragment],
    callback: &dyn Callback,
) -> anyhow::Result<()> {
    let file_keys = file_keys_for_paths(graph, paths).await?;
    let mut current: Vec<GraphKey> = graph
        .successful_values(&file_keys)
        .await?
        .into_keys()
        .collect();

    let external_package_key = GraphKey::Package(PackageId::external());
    let mut result_keys: IndexSet<GraphKey> = IndexSet::new();
    while !current.is_empty() {
        let reverse = graph.reverse_deps(&current).await?;
        current = Vec::new();
        for rdep in reverse.into_values().flatten() {
            match rdep.function_name() {
                FunctionName::Package => {
                    // Every package depends on the external package, so its
                    // reverse frontier must keep expanding.
                    let is_external = rdep == external_package_key;
                    result_keys.insert(rdep.clone());
                    if is_external {
                        current.push(rdep);
                    }
                }
                // Packages may depend on the existence of subpackages;
                // those edges are irrelevant here.
                FunctionName::PackageLookup => {}
                _ => current.push(rdep),
            }
        }
        if result_keys.len() >= batch_size {
            flush_packages(graph, &result_keys, batch_size, callback).await?;
            result_keys.clear();
        }
    }
    flush_packages(graph, &result_keys, batch_size, callback).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_keys_walk_to_parent() {
        let original = PathFragment::new("a/b/rules.bzl");
        let keys = candidate_lookup_keys(&original, &original);
        assert_eq!(
            keys,
            vec![GraphKey::PackageLookup(PackageId::new(PathFragment::new(
                "a/b"
            )))]
        );

        let at_root = PathFragment::new("file.txt");
        assert_eq!(
            candidate_lookup_keys(&at_root, &at_root),
            vec![GraphKey::PackageLookup(PackageId::new(
                PathFragment::empty()
            ))]
        );

        assert_eq!(
            candidate_lookup_keys(&original, &PathFragment::empty()),
            Vec::new()
        );
    }

    #[test]
    fn test_workspace_file_hits_the_external_package_branch() {
        let workspace = PathFragment::new(WORKSPACE_FILE_NAME);
        let keys = candidate_lookup_keys(&workspace, &workspace);
        assert_eq!(
            keys,
            vec![
                GraphKey::PackageLookup(PackageId::external()),
                GraphKey::PackageLookup(PackageId::new(PathFragment::empty())),
            ]
        );

        // Once the walk has moved past the original path the special case no
        // longer applies.
        let keys = candidate_lookup_keys(&workspace, &PathFragment::new("sub/WORKSPACE"));
        assert_eq!(
            keys,
            vec![GraphKey::PackageLookup(PackageId::new(PathFragment::new(
                "sub"
            )))]
        );
    }
}
