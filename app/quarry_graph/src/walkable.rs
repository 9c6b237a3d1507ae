/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexSet;
use quarry_events::EventHandler;
use quarry_node::label::PackageId;
use quarry_node::path::PathFragment;

use crate::key::GraphKey;
use crate::value::GraphValue;

/// A read-only, thread-safe view of an already evaluated build graph.
///
/// All lookups are batched: a call carries many keys and returns partial
/// results. Keys may be absent because they are outside the universe, failed
/// to evaluate, or were dropped to break a cycle; callers treat absence as a
/// normal outcome. Stored evaluation errors surface as message strings.
#[async_trait]
pub trait WalkableGraph: Send + Sync {
    async fn value(&self, key: &GraphKey) -> anyhow::Result<Option<GraphValue>>;

    /// Values for the keys that evaluated successfully; failed or missing
    /// keys are simply absent from the result.
    async fn successful_values(
        &self,
        keys: &[GraphKey],
    ) -> anyhow::Result<HashMap<GraphKey, GraphValue>>;

    async fn exception(&self, key: &GraphKey) -> anyhow::Result<Option<String>>;

    /// For each key without a successful value: `None` if the node is absent
    /// from the graph entirely, otherwise the stored evaluation error.
    async fn missing_and_exceptions(
        &self,
        keys: &[GraphKey],
    ) -> anyhow::Result<HashMap<GraphKey, Option<String>>>;

    /// Forward edges. Keys absent from the graph are absent from the result.
    async fn direct_deps(
        &self,
        keys: &[GraphKey],
    ) -> anyhow::Result<HashMap<GraphKey, Vec<GraphKey>>>;

    /// Reverse edges. Keys absent from the graph are absent from the result.
    async fn reverse_deps(
        &self,
        keys: &[GraphKey],
    ) -> anyhow::Result<HashMap<GraphKey, Vec<GraphKey>>>;

    async fn exists(&self, key: &GraphKey) -> anyhow::Result<bool>;
}

/// Enumeration view of the universe's packages, needed to resolve
/// below-directory target patterns. Provided by the graph owner alongside
/// the walkable graph itself.
#[async_trait]
pub trait RecursivePackageProvider: Send + Sync {
    /// Identifiers of universe packages at or below `prefix`, skipping any
    /// package under one of the excluded directories.
    async fn packages_under(
        &self,
        prefix: &PathFragment,
        excluded: &IndexSet<PathFragment>,
    ) -> anyhow::Result<Vec<PackageId>>;
}

/// Source-tree roots under which packages are looked up.
#[derive(Debug, Clone, Default)]
pub struct PathPackageLocator {
    pub roots: Vec<PathFragment>,
}

/// Outcome of preparing a universe: either exactly one evaluated root value
/// (reported by key), or an error, which is ordinary when it is a cycle.
#[derive(Debug, Clone)]
pub struct EvaluationError {
    pub message: String,
    pub cycle: bool,
}

pub struct EvaluationResult {
    pub graph: Arc<dyn WalkableGraph>,
    pub package_provider: Arc<dyn RecursivePackageProvider>,
    pub root_keys: Vec<GraphKey>,
    pub error: Option<EvaluationError>,
}

/// Prepares the universe for one query and hands back the graph to walk.
#[async_trait]
pub trait WalkableGraphFactory: Send + Sync {
    async fn prepare_and_get(
        &self,
        universe_scope: &[String],
        parser_prefix: &str,
        threads: usize,
        pkg_path: &PathPackageLocator,
        events: &dyn EventHandler,
    ) -> anyhow::Result<EvaluationResult>;

    fn universe_key(&self, universe_scope: &[String], parser_prefix: &str) -> GraphKey;
}
