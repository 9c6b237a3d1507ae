/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! In-memory walkable graph, deriving the full node and edge structure from
//! declared packages. This is the fixture the engine's tests run against;
//! production embedders bring their own graph.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dupe::Dupe;
use indexmap::IndexSet;
use quarry_events::EventHandler;
use quarry_node::label::Label;
use quarry_node::label::PackageId;
use quarry_node::package::Package;
use quarry_node::path::PathFragment;
use quarry_node::path::RootedPath;
use quarry_node::target::Target;

use crate::key::GraphKey;
use crate::key::UniverseKey;
use crate::value::BlacklistedPrefixesValue;
use crate::value::FileValue;
use crate::value::GraphValue;
use crate::value::PackageLookupValue;
use crate::value::TransitiveTraversalValue;
use crate::walkable::EvaluationError;
use crate::walkable::EvaluationResult;
use crate::walkable::PathPackageLocator;
use crate::walkable::RecursivePackageProvider;
use crate::walkable::WalkableGraph;
use crate::walkable::WalkableGraphFactory;

/// Workspace-relative path of the file a build extension label refers to.
fn extension_file_path(label: &Label) -> PathFragment {
    label.package_id().path().join(label.name())
}

struct Node {
    value: Option<GraphValue>,
    exception: Option<String>,
}

pub struct InMemoryGraphBuilder {
    root: PathFragment,
    packages: Vec<Arc<Package>>,
    recovered_errors: HashMap<Label, String>,
    unrecovered_errors: HashMap<Label, String>,
    cycle_broken: HashSet<Label>,
    blacklist: IndexSet<PathFragment>,
}

impl InMemoryGraphBuilder {
    pub fn new() -> Self {
        Self {
            root: PathFragment::new("workspace"),
            packages: Vec::new(),
            recovered_errors: HashMap::new(),
            unrecovered_errors: HashMap::new(),
            cycle_broken: HashSet::new(),
            blacklist: IndexSet::new(),
        }
    }

    pub fn root(mut self, root: PathFragment) -> Self {
        self.root = root;
        self
    }

    pub fn package(mut self, package: Package) -> Self {
        self.packages.push(Arc::new(package));
        self
    }

    /// The target loaded, but its loading recovered from an error whose
    /// message the traversal value retains.
    pub fn recovered_error(mut self, label: Label, message: impl Into<String>) -> Self {
        self.recovered_errors.insert(label, message.into());
        self
    }

    /// The target's node is in the graph but holds a stored evaluation error
    /// instead of a value.
    pub fn unrecovered_error(mut self, label: Label, message: impl Into<String>) -> Self {
        self.unrecovered_errors.insert(label, message.into());
        self
    }

    /// The target's node is absent from the graph, as happens when it sits
    /// on a dependency cycle or outside the universe.
    pub fn cycle_broken(mut self, label: Label) -> Self {
        self.cycle_broken.insert(label);
        self
    }

    pub fn blacklist(mut self, prefix: PathFragment) -> Self {
        self.blacklist.insert(prefix);
        self
    }

    pub fn build(self) -> Arc<InMemoryGraph> {
        let mut nodes: HashMap<GraphKey, Node> = HashMap::new();
        let mut fwd: HashMap<GraphKey, IndexSet<GraphKey>> = HashMap::new();

        let has_external = self.packages.iter().any(|p| p.id().is_external());

        for package in &self.packages {
            let package_key = GraphKey::Package(package.id().clone());
            nodes.insert(
                package_key.clone(),
                Node {
                    value: Some(GraphValue::Package(package.clone())),
                    exception: None,
                },
            );

            let lookup_key = GraphKey::PackageLookup(package.id().clone());
            nodes.insert(
                lookup_key.clone(),
                Node {
                    value: Some(GraphValue::PackageLookup(PackageLookupValue::Package {
                        root: self.root.clone(),
                    })),
                    exception: None,
                },
            );

            let mut package_deps = IndexSet::new();
            package_deps.insert(lookup_key);

            let mut file_paths = vec![package.build_file_path().clone()];
            file_paths.extend(
                package
                    .subinclude_labels()
                    .iter()
                    .chain(package.load_labels().iter())
                    .map(extension_file_path),
            );
            for path in file_paths {
                let file_key =
                    GraphKey::File(RootedPath::new(self.root.clone(), path));
                nodes.entry(file_key.clone()).or_insert(Node {
                    value: Some(GraphValue::File(FileValue)),
                    exception: None,
                });
                package_deps.insert(file_key);
            }

            if has_external && !package.id().is_external() {
                package_deps.insert(GraphKey::Package(PackageId::external()));
            }
            fwd.insert(package_key, package_deps);

            for target in package.targets() {
                let label = target.label();
                if self.cycle_broken.contains(label) {
                    continue;
                }
                let key = GraphKey::transitive_traversal(label);
                let node = if let Some(message) = self.unrecovered_errors.get(label) {
                    Node {
                        value: None,
                        exception: Some(message.clone()),
                    }
                } else {
                    let value = match self.recovered_errors.get(label) {
                        Some(message) => TransitiveTraversalValue::with_error(message),
                        None => TransitiveTraversalValue::default(),
                    };
                    Node {
                        value: Some(GraphValue::TransitiveTraversal(value)),
                        exception: None,
                    }
                };
                nodes.insert(key.clone(), node);

                let mut deps = IndexSet::new();
                deps.insert(GraphKey::Package(package.id().clone()));
                match target {
                    Target::Rule(rule) => {
                        for dep in rule.raw_dependency_labels() {
                            deps.insert(GraphKey::transitive_traversal(dep));
                        }
                    }
                    Target::GeneratedFile(file) => {
                        deps.insert(GraphKey::transitive_traversal(
                            file.generating_rule(),
                        ));
                    }
                    _ => {}
                }
                fwd.insert(key, deps);
            }
        }

        nodes.insert(
            GraphKey::BlacklistPrefixes,
            Node {
                value: Some(GraphValue::BlacklistPrefixes(Arc::new(
                    BlacklistedPrefixesValue {
                        prefixes: self.blacklist,
                    },
                ))),
                exception: None,
            },
        );

        let mut rev: HashMap<GraphKey, IndexSet<GraphKey>> = HashMap::new();
        for (src, dsts) in &fwd {
            for dst in dsts {
                rev.entry(dst.clone()).or_default().insert(src.clone());
            }
        }

        Arc::new(InMemoryGraph {
            packages: self.packages,
            nodes,
            fwd,
            rev,
        })
    }
}

impl Default for InMemoryGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InMemoryGraph {
    packages: Vec<Arc<Package>>,
    nodes: HashMap<GraphKey, Node>,
    fwd: HashMap<GraphKey, IndexSet<GraphKey>>,
    rev: HashMap<GraphKey, IndexSet<GraphKey>>,
}

impl InMemoryGraph {
    pub fn builder() -> InMemoryGraphBuilder {
        InMemoryGraphBuilder::new()
    }

    fn node(&self, key: &GraphKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    fn edges(
        map: &HashMap<GraphKey, IndexSet<GraphKey>>,
        nodes: &HashMap<GraphKey, Node>,
        keys: &[GraphKey],
    ) -> HashMap<GraphKey, Vec<GraphKey>> {
        let mut result = HashMap::new();
        for key in keys {
            if !nodes.contains_key(key) {
                continue;
            }
            let deps = map
                .get(key)
                .map(|deps| deps.iter().cloned().collect())
                .unwrap_or_default();
            result.insert(key.clone(), deps);
        }
        result
    }
}

#[async_trait]
impl WalkableGraph for InMemoryGraph {
    async fn value(&self, key: &GraphKey) -> anyhow::Result<Option<GraphValue>> {
        Ok(self.node(key).and_then(|n| n.value.clone()))
    }

    async fn successful_values(
        &self,
        keys: &[GraphKey],
    ) -> anyhow::Result<HashMap<GraphKey, GraphValue>> {
        let mut result = HashMap::new();
        for key in keys {
            if let Some(value) = self.node(key).and_then(|n| n.value.clone()) {
                result.insert(key.clone(), value);
            }
        }
        Ok(result)
    }

    async fn exception(&self, key: &GraphKey) -> anyhow::Result<Option<String>> {
        Ok(self.node(key).and_then(|n| n.exception.clone()))
    }

    async fn missing_and_exceptions(
        &self,
        keys: &[GraphKey],
    ) -> anyhow::Result<HashMap<GraphKey, Option<String>>> {
        let mut result = HashMap::new();
        for key in keys {
            match self.node(key) {
                Some(node) if node.value.is_some() => {}
                Some(node) => {
                    result.insert(key.clone(), node.exception.clone());
                }
                None => {
                    result.insert(key.clone(), None);
                }
            }
        }
        Ok(result)
    }

    async fn direct_deps(
        &self,
        keys: &[GraphKey],
    ) -> anyhow::Result<HashMap<GraphKey, Vec<GraphKey>>> {
        Ok(Self::edges(&self.fwd, &self.nodes, keys))
    }

    async fn reverse_deps(
        &self,
        keys: &[GraphKey],
    ) -> anyhow::Result<HashMap<GraphKey, Vec<GraphKey>>> {
        Ok(Self::edges(&self.rev, &self.nodes, keys))
    }

    async fn exists(&self, key: &GraphKey) -> anyhow::Result<bool> {
        Ok(self.nodes.contains_key(key))
    }
}

#[async_trait]
impl RecursivePackageProvider for InMemoryGraph {
    async fn packages_under(
        &self,
        prefix: &PathFragment,
        excluded: &IndexSet<PathFragment>,
    ) -> anyhow::Result<Vec<PackageId>> {
        let mut ids: Vec<PackageId> = self
            .packages
            .iter()
            .map(|p| p.id().clone())
            .filter(|id| id.repo().is_main())
            .filter(|id| id.path().starts_with(prefix))
            .filter(|id| !excluded.iter().any(|e| id.path().starts_with(e)))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Factory handing out a pre-built in-memory graph, optionally simulating a
/// failed universe preparation.
pub struct InMemoryGraphFactory {
    graph: Arc<InMemoryGraph>,
    universe_error: Option<EvaluationError>,
}

impl InMemoryGraphFactory {
    pub fn new(graph: Arc<InMemoryGraph>) -> Self {
        Self {
            graph,
            universe_error: None,
        }
    }

    /// Universe preparation reports a cycle instead of a root value.
    pub fn with_universe_cycle(graph: Arc<InMemoryGraph>, message: impl Into<String>) -> Self {
        Self {
            graph,
            universe_error: Some(EvaluationError {
                message: message.into(),
                cycle: true,
            }),
        }
    }

    /// Universe preparation fails with a non-cycle error. The driver treats
    /// this as an invariant violation.
    pub fn with_universe_failure(graph: Arc<InMemoryGraph>, message: impl Into<String>) -> Self {
        Self {
            graph,
            universe_error: Some(EvaluationError {
                message: message.into(),
                cycle: false,
            }),
        }
    }
}

#[async_trait]
impl WalkableGraphFactory for InMemoryGraphFactory {
    async fn prepare_and_get(
        &self,
        universe_scope: &[String],
        parser_prefix: &str,
        threads: usize,
        pkg_path: &PathPackageLocator,
        _events: &dyn EventHandler,
    ) -> anyhow::Result<EvaluationResult> {
        tracing::debug!(
            universe = ?universe_scope,
            threads,
            roots = pkg_path.roots.len(),
            "preparing in-memory universe"
        );
        let (root_keys, error) = match &self.universe_error {
            Some(error) => (Vec::new(), Some(error.clone())),
            None => (
                vec![self.universe_key(universe_scope, parser_prefix)],
                None,
            ),
        };
        Ok(EvaluationResult {
            graph: self.graph.dupe() as Arc<dyn WalkableGraph>,
            package_provider: self.graph.dupe() as Arc<dyn RecursivePackageProvider>,
            root_keys,
            error,
        })
    }

    fn universe_key(&self, universe_scope: &[String], parser_prefix: &str) -> GraphKey {
        GraphKey::Universe(UniverseKey {
            patterns: universe_scope.to_vec(),
            parser_prefix: parser_prefix.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use quarry_node::target::Attribute;
    use quarry_node::target::Rule;
    use quarry_node::target::Visibility;

    use super::*;

    fn label(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    fn simple_rule(name: &str, deps: &[&str]) -> Target {
        let label = label(name);
        Target::rule(Rule::new(
            label.dupe(),
            "cc_library",
            vec![Attribute::new(
                "deps",
                deps.iter().map(|d| Label::parse(d).unwrap()).collect(),
            )],
            vec![],
            Visibility::default(),
        ))
    }

    fn graph() -> Arc<InMemoryGraph> {
        InMemoryGraph::builder()
            .package(
                Package::builder(PackageId::new(PathFragment::new("a")))
                    .target(simple_rule("//a:x", &["//a:y"]))
                    .target(simple_rule("//a:y", &[]))
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn test_derived_edges() {
        let graph = graph();
        let x = GraphKey::transitive_traversal(&label("//a:x"));
        let deps = graph.direct_deps(&[x.clone()]).await.unwrap();
        let x_deps = &deps[&x];
        assert!(x_deps.contains(&GraphKey::Package(PackageId::new(PathFragment::new("a")))));
        assert!(x_deps.contains(&GraphKey::transitive_traversal(&label("//a:y"))));

        let y = GraphKey::transitive_traversal(&label("//a:y"));
        let rdeps = graph.reverse_deps(&[y.clone()]).await.unwrap();
        assert!(rdeps[&y].contains(&x));
    }

    #[tokio::test]
    async fn test_missing_and_exceptions() {
        let graph = InMemoryGraph::builder()
            .package(
                Package::builder(PackageId::new(PathFragment::new("a")))
                    .target(simple_rule("//a:ok", &[]))
                    .target(simple_rule("//a:broken", &[]))
                    .target(simple_rule("//a:cyclic", &[]))
                    .build(),
            )
            .unrecovered_error(label("//a:broken"), "loading failed")
            .cycle_broken(label("//a:cyclic"))
            .build();

        let keys = vec![
            GraphKey::transitive_traversal(&label("//a:ok")),
            GraphKey::transitive_traversal(&label("//a:broken")),
            GraphKey::transitive_traversal(&label("//a:cyclic")),
        ];
        let result = graph.missing_and_exceptions(&keys).await.unwrap();
        assert!(!result.contains_key(&keys[0]));
        assert_eq!(result[&keys[1]], Some("loading failed".to_owned()));
        assert_eq!(result[&keys[2]], None);
        assert!(!graph.exists(&keys[2]).await.unwrap());
    }

    #[tokio::test]
    async fn test_packages_under_honors_excludes() {
        let graph = InMemoryGraph::builder()
            .package(Package::builder(PackageId::new(PathFragment::new("a"))).build())
            .package(Package::builder(PackageId::new(PathFragment::new("a/b"))).build())
            .package(Package::builder(PackageId::new(PathFragment::new("c"))).build())
            .build();

        let mut excluded = IndexSet::new();
        excluded.insert(PathFragment::new("a/b"));
        let ids = graph
            .packages_under(&PathFragment::new("a"), &excluded)
            .await
            .unwrap();
        assert_eq!(ids, vec![PackageId::new(PathFragment::new("a"))]);

        let all = graph
            .packages_under(&PathFragment::empty(), &IndexSet::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }
}
