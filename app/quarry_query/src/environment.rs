/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! The graph-backed query environment and its one-shot evaluation driver.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use dupe::Dupe;
use indexmap::IndexSet;
use quarry_events::Event;
use quarry_events::EventHandler;
use quarry_graph::key::GraphKey;
use quarry_graph::walkable::PathPackageLocator;
use quarry_graph::walkable::WalkableGraph;
use quarry_graph::walkable::WalkableGraphFactory;
use quarry_node::label::Label;
use quarry_node::label::PackageId;
use quarry_node::package::BUILD_FILE_NAME;
use quarry_node::path::PathFragment;
use quarry_node::target::DependencyFilter;
use quarry_node::target::Target;
use tokio::sync::OnceCell;

use crate::callback::BatchStreamedCallback;
use crate::callback::Callback;
use crate::callback::Uniquifier;
use crate::error::QueryError;
use crate::error::QueryEvalResult;
use crate::eval;
use crate::expr::Argument;
use crate::expr::ExpressionMapper;
use crate::expr::QueryExpression;
use crate::functions::AllRdepsFunction;
use crate::functions::QueryFunction;
use crate::functions::QueryFunctions;
use crate::functions::RBuildFilesFunction;
use crate::pattern;
use crate::pattern::PatternResolver;
use crate::rbuildfiles;
use crate::set::TargetSet;
use crate::traversal::DepTraversal;

/// Balances amortizing per-call overhead of the consumer callback against
/// the memory retained between flushes.
pub const BATCH_CALLBACK_SIZE: usize = 10_000;

/// Evaluation settings reserved for dependency filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Setting {
    OnlyTargetDeps,
    NoImplicitDeps,
}

fn dependency_filter(settings: &IndexSet<Setting>) -> DependencyFilter {
    if settings.contains(&Setting::OnlyTargetDeps) {
        DependencyFilter::NoHostDeps
    } else if settings.contains(&Setting::NoImplicitDeps) {
        DependencyFilter::NoImplicitDeps
    } else {
        DependencyFilter::AllDeps
    }
}

pub struct QueryEnvironmentOptions {
    /// Report recoverable errors and keep evaluating instead of failing the
    /// query.
    pub keep_going: bool,
    /// Worker budget for parallel package resolution.
    pub loading_phase_threads: usize,
    pub settings: IndexSet<Setting>,
    /// Additional query primitives layered over the defaults.
    pub extra_functions: Vec<Arc<dyn QueryFunction>>,
    /// Workspace-relative prefix target patterns are absolutized against.
    pub parser_prefix: String,
    /// Target patterns bounding which targets are loadable. Must be
    /// non-empty.
    pub universe_scope: Vec<String>,
    pub pkg_path: PathPackageLocator,
}

impl Default for QueryEnvironmentOptions {
    fn default() -> Self {
        Self {
            keep_going: false,
            loading_phase_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            settings: IndexSet::new(),
            extra_functions: Vec::new(),
            parser_prefix: String::new(),
            universe_scope: Vec::new(),
            pkg_path: PathPackageLocator::default(),
        }
    }
}

/// The surface query functions evaluate against.
#[async_trait]
pub trait QueryEnvironment: Send + Sync {
    fn functions(&self) -> &QueryFunctions;

    fn events(&self) -> &dyn EventHandler;

    /// Filtered direct forward dependencies.
    async fn get_fwd_deps(&self, targets: &TargetSet)
        -> anyhow::Result<TargetSet>;

    /// Filtered direct reverse dependencies.
    async fn get_reverse_deps(
        &self,
        targets: &TargetSet,
    ) -> anyhow::Result<TargetSet>;

    /// Filtered forward closure.
    async fn get_transitive_closure(
        &self,
        targets: &TargetSet,
    ) -> anyhow::Result<TargetSet>;

    /// Targets on some forward path from `from` to `to`, or `None` if `to`
    /// is unreachable.
    async fn get_nodes_on_path(
        &self,
        from: &Target,
        to: &Target,
    ) -> anyhow::Result<Option<Vec<Target>>>;

    /// Streams targets matching a pattern. `owner` is the expression the
    /// pattern appeared in, for diagnostics.
    async fn get_targets_matching_pattern(
        &self,
        owner: &QueryExpression,
        pattern: &str,
        callback: &dyn Callback,
    ) -> anyhow::Result<()>;

    /// Build files and extension files of the given targets' packages,
    /// deduplicated by label.
    async fn get_build_files(
        &self,
        caller: &QueryExpression,
        nodes: &TargetSet,
        build_files: bool,
        subincludes: bool,
        loads: bool,
    ) -> anyhow::Result<TargetSet>;

    async fn get_target(&self, label: &Label) -> anyhow::Result<Target>;

    /// Error probe over an already loaded closure; the universe preparation
    /// did the actual loading, so `max_depth` is not consulted.
    async fn build_transitive_closure(
        &self,
        caller: &QueryExpression,
        targets: &TargetSet,
        max_depth: u32,
    ) -> anyhow::Result<()>;

    async fn rbuildfiles(
        &self,
        files: &[PathFragment],
        callback: &dyn Callback,
    ) -> anyhow::Result<()>;

    async fn eval(
        &self,
        expr: &QueryExpression,
        callback: &dyn Callback,
    ) -> anyhow::Result<()>;
}

struct EvalState {
    graph: Arc<dyn WalkableGraph>,
    resolver: PatternResolver,
}

/// Answers queries by introspecting a walkable graph prepared from the
/// universe scope. Results are unordered; the engine is single-shot.
pub struct GraphQueryEnvironment {
    keep_going: bool,
    loading_phase_threads: usize,
    dependency_filter: DependencyFilter,
    functions: QueryFunctions,
    parser_prefix: String,
    universe_scope: Vec<String>,
    pkg_path: PathPackageLocator,
    graph_factory: Arc<dyn WalkableGraphFactory>,
    events: Arc<dyn EventHandler>,
    state: OnceCell<EvalState>,
    evaluated: AtomicBool,
}

impl GraphQueryEnvironment {
    pub fn new(
        options: QueryEnvironmentOptions,
        graph_factory: Arc<dyn WalkableGraphFactory>,
        events: Arc<dyn EventHandler>,
    ) -> anyhow::Result<Self> {
        if options.universe_scope.is_empty() {
            return Err(QueryError::EmptyUniverse.into());
        }
        let mut functions = QueryFunctions::base();
        functions.add(Arc::new(AllRdepsFunction));
        functions.add(Arc::new(RBuildFilesFunction));
        for function in options.extra_functions {
            functions.add(function);
        }
        Ok(Self {
            keep_going: options.keep_going,
            loading_phase_threads: options.loading_phase_threads,
            dependency_filter: dependency_filter(&options.settings),
            functions,
            parser_prefix: options.parser_prefix,
            universe_scope: options.universe_scope,
            pkg_path: options.pkg_path,
            graph_factory,
            events,
            state: OnceCell::new(),
            evaluated: AtomicBool::new(false),
        })
    }

    /// Prepares the universe. Exactly one successful root value (the
    /// universe key) or a cycle error is expected; anything else is a
    /// violated invariant of the graph factory.
    async fn init(&self) -> anyhow::Result<()> {
        self.state
            .get_or_try_init(|| async {
                let result = self
                    .graph_factory
                    .prepare_and_get(
                        &self.universe_scope,
                        &self.parser_prefix,
                        self.loading_phase_threads,
                        &self.pkg_path,
                        self.events.as_ref(),
                    )
                    .await?;
                let universe_key = self
                    .graph_factory
                    .universe_key(&self.universe_scope, &self.parser_prefix);
                match (&result.root_keys[..], &result.error) {
                    ([root], None) if *root == universe_key => {}
                    ([], Some(error)) if error.cycle => {
                        tracing::debug!(
                            message = %error.message,
                            "universe evaluation reported a cycle"
                        );
                    }
                    _ => anyhow::bail!(
                        "universe query {:?} returned an unexpected evaluation result",
                        self.universe_scope
                    ),
                }
                let resolver = PatternResolver::new(
                    result.graph.dupe(),
                    result.package_provider.dupe(),
                    self.events.dupe(),
                    self.parser_prefix.clone(),
                    self.loading_phase_threads,
                );
                Ok(EvalState {
                    graph: result.graph,
                    resolver,
                })
            })
            .await
            .map(|_| ())
    }

    fn state(&self) -> anyhow::Result<&EvalState> {
        self.state
            .get()
            .context("query environment used before universe initialization")
    }

    fn traversal<'a>(&'a self, state: &'a EvalState) -> DepTraversal<'a> {
        DepTraversal::new(
            state.graph.as_ref(),
            self.events.as_ref(),
            self.dependency_filter,
        )
    }

    /// Rewrites every `rdeps(<literal>, …)` whose literal is the singleton
    /// universe scope into `allrdeps(…)`, which avoids recomputing universe
    /// membership. Skipped for multi-pattern universes.
    pub fn transform_parsed_query(&self, expr: &QueryExpression) -> QueryExpression {
        let [universe_pattern] = &self.universe_scope[..] else {
            return expr.clone();
        };
        let mapper = RdepsToAllRdeps {
            absolute_universe: pattern::absolutize(&self.parser_prefix, universe_pattern),
            parser_prefix: &self.parser_prefix,
        };
        let mapped = expr.map(&mapper);
        if mapped != *expr {
            tracing::info!(from = %expr, to = %mapped, "rewrote universe-scoped rdeps to allrdeps");
        }
        mapped
    }

    /// Runs one query to completion, streaming deduplicated targets to
    /// `callback` in batches.
    pub async fn evaluate_query(
        &self,
        expr: &QueryExpression,
        callback: &dyn Callback,
    ) -> anyhow::Result<QueryEvalResult> {
        if self.evaluated.swap(true, Ordering::SeqCst) {
            return Err(QueryError::AlreadyEvaluated.into());
        }
        // Errors may arrive both as hard failures and as sink events; the
        // result's error bit reflects only events observed by this query.
        self.events.reset_errors();
        self.init().await?;

        let expr = self.transform_parsed_query(expr);

        let uniquifier = Uniquifier::new();
        let aggregator = BatchStreamedCallback::new(callback, BATCH_CALLBACK_SIZE, &uniquifier);
        let empty = AtomicBool::new(true);
        let tracking = EmptyTrackingCallback {
            empty: &empty,
            inner: &aggregator,
        };

        eval::eval(self, &expr, &tracking)
            .await
            .with_context(|| format!("evaluation of query \"{}\" failed", expr))?;
        aggregator.flush().await?;

        if self.events.has_errors() {
            if !self.keep_going {
                return Err(QueryError::BuildFileErrors {
                    query: expr.to_string(),
                }
                .into());
            }
            self.events.handle(Event::warn(
                "--keep_going specified, ignoring errors. Results may be inaccurate",
            ));
        }

        Ok(QueryEvalResult {
            success: !self.events.has_errors(),
            empty: empty.load(Ordering::SeqCst),
        })
    }
}

struct EmptyTrackingCallback<'a> {
    empty: &'a AtomicBool,
    inner: &'a BatchStreamedCallback<'a>,
}

#[async_trait]
impl Callback for EmptyTrackingCallback<'_> {
    async fn process(&self, partial: Vec<Target>) -> anyhow::Result<()> {
        if !partial.is_empty() {
            self.empty.store(false, Ordering::SeqCst);
        }
        self.inner.process(partial).await
    }
}

struct RdepsToAllRdeps<'a> {
    absolute_universe: String,
    parser_prefix: &'a str,
}

impl ExpressionMapper for RdepsToAllRdeps<'_> {
    fn map_function(&self, name: &str, args: &[Argument]) -> Option<QueryExpression> {
        if name != "rdeps" {
            return None;
        }
        let Some(Argument::Expression(QueryExpression::TargetLiteral(universe))) = args.first()
        else {
            return None;
        };
        if pattern::absolutize(self.parser_prefix, universe) != self.absolute_universe {
            return None;
        }
        Some(QueryExpression::function("allrdeps", args[1..].to_vec()))
    }
}

#[async_trait]
impl QueryEnvironment for GraphQueryEnvironment {
    fn functions(&self) -> &QueryFunctions {
        &self.functions
    }

    fn events(&self) -> &dyn EventHandler {
        self.events.as_ref()
    }

    async fn get_fwd_deps(
        &self,
        targets: &TargetSet,
    ) -> anyhow::Result<TargetSet> {
        let state = self.state()?;
        self.traversal(state).fwd_deps(targets).await
    }

    async fn get_reverse_deps(
        &self,
        targets: &TargetSet,
    ) -> anyhow::Result<TargetSet> {
        let state = self.state()?;
        self.traversal(state).reverse_deps(targets).await
    }

    async fn get_transitive_closure(
        &self,
        targets: &TargetSet,
    ) -> anyhow::Result<TargetSet> {
        let state = self.state()?;
        self.traversal(state).transitive_closure(targets).await
    }

    async fn get_nodes_on_path(
        &self,
        from: &Target,
        to: &Target,
    ) -> anyhow::Result<Option<Vec<Target>>> {
        let state = self.state()?;
        self.traversal(state).nodes_on_path(from, to).await
    }

    async fn get_targets_matching_pattern(
        &self,
        owner: &QueryExpression,
        pattern: &str,
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        tracing::debug!(owner = %owner, pattern, "resolving target pattern");
        let state = self.state()?;
        state
            .resolver
            .targets_matching_pattern(pattern, callback)
            .await
    }

    async fn get_build_files(
        &self,
        caller: &QueryExpression,
        nodes: &TargetSet,
        build_files: bool,
        subincludes: bool,
        loads: bool,
    ) -> anyhow::Result<TargetSet> {
        tracing::debug!(caller = %caller, "collecting build files");
        let state = self.state()?;

        let package_ids: IndexSet<PackageId> =
            nodes.iter().map(|t| t.package_id().clone()).collect();
        let package_keys: Vec<GraphKey> = package_ids
            .iter()
            .map(|id| GraphKey::Package(id.clone()))
            .collect();
        let values = state.graph.successful_values(&package_keys).await?;

        let mut result = TargetSet::new();
        for id in package_ids {
            let key = GraphKey::Package(id.clone());
            let Some(value) = values.get(&key) else {
                self.events
                    .handle(Event::warn(format!("{} does not exist in graph", key)));
                continue;
            };
            let package = value
                .as_package()
                .with_context(|| format!("unexpected value kind for {}", key))?;

            if build_files {
                result.insert(package.build_file().dupe());
            }
            let mut extensions: Vec<&Label> = Vec::new();
            if subincludes {
                extensions.extend(package.subinclude_labels());
            }
            if loads {
                extensions.extend(package.load_labels());
            }
            for extension in extensions {
                result.insert(Target::fake_extension_file(
                    extension.dupe(),
                    package.id().clone(),
                ));
                if build_files {
                    // The extension's own package is declared by a build
                    // file too.
                    let build_label =
                        Label::new(extension.package_id().clone(), BUILD_FILE_NAME);
                    result.insert(Target::fake_extension_file(
                        build_label,
                        package.id().clone(),
                    ));
                }
            }
        }
        Ok(result)
    }

    async fn get_target(&self, label: &Label) -> anyhow::Result<Target> {
        let state = self.state()?;
        let package_key = GraphKey::Package(label.package_id().clone());
        if !state.graph.exists(&package_key).await? {
            return Err(QueryError::GraphNodeMissing(package_key).into());
        }
        match state.graph.value(&package_key).await? {
            Some(value) => {
                let package = value
                    .as_package()
                    .with_context(|| format!("unexpected value kind for {}", package_key))?;
                if package.contains_errors() {
                    return Err(
                        QueryError::PackageContainsErrors(label.package_id().clone()).into(),
                    );
                }
                match package.target(label.name()) {
                    Ok(target) => Ok(target.dupe()),
                    Err(..) => Err(QueryError::NoSuchTarget(label.dupe()).into()),
                }
            }
            None => {
                let error = anyhow::Error::new(QueryError::NoSuchTarget(label.dupe()));
                match state.graph.exception(&package_key).await? {
                    Some(message) => Err(error.context(message)),
                    None => Err(error),
                }
            }
        }
    }

    async fn build_transitive_closure(
        &self,
        caller: &QueryExpression,
        targets: &TargetSet,
        _max_depth: u32,
    ) -> anyhow::Result<()> {
        let state = self.state()?;
        self.traversal(state)
            .build_transitive_closure(caller, targets)
            .await
    }

    async fn rbuildfiles(
        &self,
        files: &[PathFragment],
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        let state = self.state()?;
        rbuildfiles::get_rbuildfiles(
            state.graph.as_ref(),
            BATCH_CALLBACK_SIZE,
            files,
            callback,
        )
        .await
    }

    async fn eval(
        &self,
        expr: &QueryExpression,
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        eval::eval(self, expr, callback).await
    }
}

#[cfg(test)]
mod tests {
    use quarry_events::CollectingEventHandler;
    use quarry_graph::memory::InMemoryGraph;
    use quarry_graph::memory::InMemoryGraphFactory;
    use quarry_node::package::Package;
    use quarry_node::target::Rule;
    use quarry_node::target::Visibility;

    use super::*;

    fn label(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    async fn test_env() -> GraphQueryEnvironment {
        let graph = InMemoryGraph::builder()
            .package(
                Package::builder(PackageId::new(PathFragment::new("a")))
                    .target(Target::rule(Rule::new(
                        label("//a:x"),
                        "cc_library",
                        vec![],
                        vec![],
                        Visibility::default(),
                    )))
                    .build(),
            )
            .package(
                Package::builder(PackageId::new(PathFragment::new("bad")))
                    .target(Target::rule(Rule::new(
                        label("//bad:t"),
                        "cc_library",
                        vec![],
                        vec![],
                        Visibility::default(),
                    )))
                    .contains_errors()
                    .build(),
            )
            .build();
        let env = GraphQueryEnvironment::new(
            QueryEnvironmentOptions {
                universe_scope: vec!["//...".to_owned()],
                ..Default::default()
            },
            Arc::new(InMemoryGraphFactory::new(graph)),
            Arc::new(CollectingEventHandler::new()),
        )
        .unwrap();
        env.init().await.unwrap();
        env
    }

    #[tokio::test]
    async fn test_get_target() {
        let env = test_env().await;
        let target = env.get_target(&label("//a:x")).await.unwrap();
        assert_eq!(target.label(), &label("//a:x"));

        let err = env.get_target(&label("//a:ghost")).await.unwrap_err();
        assert!(err.to_string().contains("no such target"));

        let err = env.get_target(&label("//bad:t")).await.unwrap_err();
        assert!(err.to_string().contains("contains errors"));

        let err = env.get_target(&label("//ghost:g")).await.unwrap_err();
        assert!(err.to_string().contains("does not exist in graph"));
    }

    #[tokio::test]
    async fn test_settings_derive_the_dependency_filter() {
        let mut settings = IndexSet::new();
        assert!(dependency_filter(&settings).is_all());
        settings.insert(Setting::NoImplicitDeps);
        assert_eq!(
            dependency_filter(&settings),
            DependencyFilter::NoImplicitDeps
        );
        settings.insert(Setting::OnlyTargetDeps);
        assert_eq!(dependency_filter(&settings), DependencyFilter::NoHostDeps);
    }
}
