/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! End-to-end query evaluation against an in-memory walkable graph.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexSet;
use parking_lot::Mutex;
use quarry_events::CollectingEventHandler;
use quarry_events::EventHandler;
use quarry_graph::memory::InMemoryGraph;
use quarry_graph::memory::InMemoryGraphBuilder;
use quarry_graph::memory::InMemoryGraphFactory;
use quarry_node::label::Label;
use quarry_node::label::PackageId;
use quarry_node::package::Package;
use quarry_node::path::PathFragment;
use quarry_node::target::Attribute;
use quarry_node::target::Rule;
use quarry_node::target::Target;
use quarry_node::target::Visibility;
use quarry_query::callback::Callback;
use quarry_query::environment::GraphQueryEnvironment;
use quarry_query::environment::QueryEnvironmentOptions;
use quarry_query::environment::Setting;
use quarry_query::error::QueryEvalResult;
use quarry_query::expr::Argument;
use quarry_query::expr::QueryExpression;
use quarry_query::expr::SetOperator;

fn label(s: &str) -> Label {
    Label::parse(s).unwrap()
}

fn rule(name: &str, deps: &[&str]) -> Target {
    Target::rule(Rule::new(
        label(name),
        "cc_library",
        vec![Attribute::new("deps", deps.iter().map(|d| label(d)).collect())],
        vec![],
        Visibility::default(),
    ))
}

fn package(path: &str, targets: Vec<Target>) -> Package {
    let mut builder = Package::builder(PackageId::new(PathFragment::new(path)));
    for target in targets {
        builder = builder.target(target);
    }
    builder.build()
}

/// `//a:x -> //a:y -> //a:z`.
fn chain_graph() -> InMemoryGraphBuilder {
    InMemoryGraph::builder().package(package(
        "a",
        vec![
            rule("//a:x", &["//a:y"]),
            rule("//a:y", &["//a:z"]),
            rule("//a:z", &[]),
        ],
    ))
}

fn make_env(
    graph: Arc<InMemoryGraph>,
    universe: &[&str],
    keep_going: bool,
    settings: &[Setting],
) -> (GraphQueryEnvironment, Arc<CollectingEventHandler>) {
    let events = Arc::new(CollectingEventHandler::new());
    let options = QueryEnvironmentOptions {
        keep_going,
        loading_phase_threads: 2,
        settings: settings.iter().copied().collect(),
        universe_scope: universe.iter().map(|s| (*s).to_owned()).collect(),
        ..Default::default()
    };
    let env = GraphQueryEnvironment::new(
        options,
        Arc::new(InMemoryGraphFactory::new(graph)),
        events.clone(),
    )
    .unwrap();
    (env, events)
}

fn deps(expr: QueryExpression) -> QueryExpression {
    QueryExpression::function("deps", vec![Argument::Expression(expr)])
}

fn union(operands: Vec<QueryExpression>) -> QueryExpression {
    QueryExpression::binary(SetOperator::Union, operands)
}

/// Records every delivery, so tests can check both contents and the
/// cross-batch uniqueness guarantee.
#[derive(Default)]
struct RecordingConsumer {
    deliveries: Mutex<Vec<Vec<Target>>>,
}

impl RecordingConsumer {
    fn sorted_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .deliveries
            .lock()
            .iter()
            .flatten()
            .map(|t| t.label().to_string())
            .collect();
        labels.sort();
        labels
    }

    fn assert_no_duplicate_labels(&self) {
        let labels = self.sorted_labels();
        let unique: IndexSet<String> = labels.iter().cloned().collect();
        assert_eq!(labels.len(), unique.len(), "duplicate labels delivered");
    }
}

#[async_trait]
impl Callback for RecordingConsumer {
    async fn process(&self, partial: Vec<Target>) -> anyhow::Result<()> {
        self.deliveries.lock().push(partial);
        Ok(())
    }
}

async fn run(
    env: &GraphQueryEnvironment,
    expr: &QueryExpression,
) -> (QueryEvalResult, Vec<String>) {
    let consumer = RecordingConsumer::default();
    let result = env.evaluate_query(expr, &consumer).await.unwrap();
    consumer.assert_no_duplicate_labels();
    (result, consumer.sorted_labels())
}

#[tokio::test]
async fn test_deps_computes_forward_closure() {
    let (env, _) = make_env(chain_graph().build(), &["//a/..."], false, &[]);
    let (result, labels) = run(&env, &deps(QueryExpression::target("//a:x"))).await;
    assert_eq!(labels, vec!["//a:x", "//a:y", "//a:z"]);
    assert!(result.success);
    assert!(!result.empty);
}

#[tokio::test]
async fn test_deps_with_depth_is_bounded() {
    let (env, _) = make_env(chain_graph().build(), &["//a/..."], false, &[]);
    let expr = QueryExpression::function(
        "deps",
        vec![
            Argument::Expression(QueryExpression::target("//a:x")),
            Argument::Integer(1),
        ],
    );
    let (_, labels) = run(&env, &expr).await;
    assert_eq!(labels, vec!["//a:x", "//a:y"]);
}

#[tokio::test]
async fn test_rdeps_of_universe_is_rewritten_to_allrdeps() {
    let (env, _) = make_env(chain_graph().build(), &["//a/..."], false, &[]);

    let rdeps = QueryExpression::function(
        "rdeps",
        vec![
            Argument::Expression(QueryExpression::target("//a/...")),
            Argument::Expression(QueryExpression::target("//a:z")),
        ],
    );
    assert_eq!(
        env.transform_parsed_query(&rdeps).to_string(),
        "allrdeps(//a:z)"
    );

    let (result, labels) = run(&env, &rdeps).await;
    assert_eq!(labels, vec!["//a:x", "//a:y", "//a:z"]);
    assert!(result.success);
}

#[tokio::test]
async fn test_rewrite_skipped_for_multi_pattern_universe() {
    let (env, _) = make_env(chain_graph().build(), &["//a/...", "//b/..."], false, &[]);
    let rdeps = QueryExpression::function(
        "rdeps",
        vec![
            Argument::Expression(QueryExpression::target("//a/...")),
            Argument::Expression(QueryExpression::target("//a:z")),
        ],
    );
    assert_eq!(env.transform_parsed_query(&rdeps), rdeps);
}

#[tokio::test]
async fn test_rdeps_equals_allrdeps_over_the_universe() {
    // Evaluate the unrewritten rdeps against one environment and allrdeps
    // against another; both engines are single-shot.
    let graph = chain_graph().build();
    let (env_a, _) = make_env(graph.clone(), &["//a/...", "//unused/..."], false, &[]);
    let rdeps = QueryExpression::function(
        "rdeps",
        vec![
            Argument::Expression(QueryExpression::target("//a/...")),
            Argument::Expression(QueryExpression::target("//a:z")),
        ],
    );
    let (_, rdeps_labels) = run(&env_a, &rdeps).await;

    let (env_b, _) = make_env(graph, &["//a/..."], false, &[]);
    let allrdeps = QueryExpression::function(
        "allrdeps",
        vec![Argument::Expression(QueryExpression::target("//a:z"))],
    );
    let (_, allrdeps_labels) = run(&env_b, &allrdeps).await;

    assert_eq!(rdeps_labels, allrdeps_labels);
}

#[tokio::test]
async fn test_reverse_deps_find_direct_parent() {
    let (env, _) = make_env(chain_graph().build(), &["//a/..."], false, &[]);
    let expr = QueryExpression::function(
        "rdeps",
        vec![
            Argument::Expression(QueryExpression::target("//a/...")),
            Argument::Expression(QueryExpression::target("//a:y")),
            Argument::Integer(1),
        ],
    );
    let (_, labels) = run(&env, &expr).await;
    assert_eq!(labels, vec!["//a:x", "//a:y"]);
}

#[tokio::test]
async fn test_allowed_dependency_filtering() {
    // //a:x declares //a:hidden only through a host attribute; under
    // OnlyTargetDeps the edge is not sanctioned even though the raw graph
    // records it.
    let graph = || {
        InMemoryGraph::builder().package(package(
            "a",
            vec![
                Target::rule(Rule::new(
                    label("//a:x"),
                    "cc_library",
                    vec![
                        Attribute::new("deps", vec![label("//a:y")]),
                        Attribute::new("tools", vec![label("//a:hidden")]).host(),
                    ],
                    vec![],
                    Visibility::new(vec![label("//a:vis")]),
                )),
                rule("//a:y", &[]),
                rule("//a:hidden", &[]),
                rule("//a:vis", &[]),
            ],
        ))
    };

    let (filtered_env, _) = make_env(
        graph().build(),
        &["//a/..."],
        false,
        &[Setting::OnlyTargetDeps],
    );
    let (_, labels) = run(&filtered_env, &deps(QueryExpression::target("//a:x"))).await;
    // Visibility edges stay sanctioned; the host attribute edge does not.
    assert_eq!(labels, vec!["//a:vis", "//a:x", "//a:y"]);

    let (unfiltered_env, _) = make_env(graph().build(), &["//a/..."], false, &[]);
    let (_, labels) = run(&unfiltered_env, &deps(QueryExpression::target("//a:x"))).await;
    assert_eq!(labels, vec!["//a:hidden", "//a:vis", "//a:x", "//a:y"]);
}

#[tokio::test]
async fn test_somepath_returns_a_chain() {
    let (env, _) = make_env(chain_graph().build(), &["//a/..."], false, &[]);
    let expr = QueryExpression::function(
        "somepath",
        vec![
            Argument::Expression(QueryExpression::target("//a:x")),
            Argument::Expression(QueryExpression::target("//a:z")),
        ],
    );
    let (_, labels) = run(&env, &expr).await;
    assert_eq!(labels, vec!["//a:x", "//a:y", "//a:z"]);
}

#[tokio::test]
async fn test_somepath_unreachable_is_empty() {
    let (env, _) = make_env(chain_graph().build(), &["//a/..."], false, &[]);
    let expr = QueryExpression::function(
        "somepath",
        vec![
            Argument::Expression(QueryExpression::target("//a:z")),
            Argument::Expression(QueryExpression::target("//a:x")),
        ],
    );
    let (result, labels) = run(&env, &expr).await;
    assert!(labels.is_empty());
    assert!(result.empty);
    assert!(result.success);
}

#[tokio::test]
async fn test_set_algebra_streams_combined_result() {
    let (env, _) = make_env(chain_graph().build(), &["//a/..."], false, &[]);
    let expr = QueryExpression::binary(
        SetOperator::Except,
        vec![
            deps(QueryExpression::target("//a:x")),
            QueryExpression::target("//a:y"),
        ],
    );
    let (_, labels) = run(&env, &expr).await;
    assert_eq!(labels, vec!["//a:x", "//a:z"]);
}

#[tokio::test]
async fn test_kind_and_filter_functions() {
    let graph = InMemoryGraph::builder()
        .package(package(
            "a",
            vec![
                Target::rule(Rule::new(
                    label("//a:bin"),
                    "cc_binary",
                    vec![],
                    vec![],
                    Visibility::default(),
                )),
                rule("//a:lib", &[]),
            ],
        ))
        .build();
    let (env, _) = make_env(graph, &["//a/..."], false, &[]);
    let expr = QueryExpression::function(
        "kind",
        vec![
            Argument::Word("cc_binary".to_owned()),
            Argument::Expression(QueryExpression::target("//a:*")),
        ],
    );
    let (_, labels) = run(&env, &expr).await;
    assert_eq!(labels, vec!["//a:bin"]);
}

#[tokio::test]
async fn test_pattern_matching_nothing_is_empty_success() {
    let (env, events) = make_env(chain_graph().build(), &["//..."], false, &[]);
    let (result, labels) = run(&env, &QueryExpression::target("//nothing/...")).await;
    assert!(labels.is_empty());
    assert!(result.success);
    assert!(result.empty);
    assert!(events.errors().is_empty());
}

#[tokio::test]
async fn test_blacklisted_prefixes_are_excluded_from_patterns() {
    let graph = InMemoryGraph::builder()
        .package(package("a", vec![rule("//a:x", &[])]))
        .package(package("secret/p", vec![rule("//secret/p:s", &[])]))
        .blacklist(PathFragment::new("secret"))
        .build();
    let (env, _) = make_env(graph, &["//..."], false, &[]);
    let (_, labels) = run(&env, &QueryExpression::target("//...")).await;
    assert_eq!(labels, vec!["//a:x"]);
}

#[tokio::test]
async fn test_set_literal_resolves_each_pattern() {
    let (env, _) = make_env(chain_graph().build(), &["//a/..."], false, &[]);
    let expr = QueryExpression::SetLiteral(vec!["//a:x".to_owned(), "//a:z".to_owned()]);
    let (_, labels) = run(&env, &expr).await;
    assert_eq!(labels, vec!["//a:x", "//a:z"]);
}

#[tokio::test]
async fn test_buildfiles_includes_extensions() {
    let graph = InMemoryGraph::builder()
        .package(package("a", vec![rule("//a:x", &[])]))
        .package(
            Package::builder(PackageId::new(PathFragment::new("b")))
                .target(rule("//b:y", &[]))
                .load(label("//a:ext.bzl"))
                .build(),
        )
        .build();
    let (env, _) = make_env(graph, &["//..."], false, &[]);
    let expr = QueryExpression::function(
        "buildfiles",
        vec![Argument::Expression(QueryExpression::target("//b:y"))],
    );
    let (_, labels) = run(&env, &expr).await;
    assert_eq!(labels, vec!["//a:BUILD", "//a:ext.bzl", "//b:BUILD"]);
}

#[tokio::test]
async fn test_rbuildfiles_follows_load_edges() {
    let graph = InMemoryGraph::builder()
        .package(package("a", vec![rule("//a:x", &[])]))
        .package(
            Package::builder(PackageId::new(PathFragment::new("b")))
                .target(rule("//b:y", &[]))
                .load(label("//a:ext.bzl"))
                .build(),
        )
        .build();
    let (env, _) = make_env(graph, &["//..."], false, &[]);
    let expr = QueryExpression::function(
        "rbuildfiles",
        vec![
            Argument::Word("a/BUILD".to_owned()),
            Argument::Word("a/ext.bzl".to_owned()),
        ],
    );
    let (result, labels) = run(&env, &expr).await;
    assert_eq!(labels, vec!["//a:BUILD", "//b:BUILD"]);
    assert!(result.success);
}

#[tokio::test]
async fn test_rbuildfiles_drops_packages_with_errors() {
    let graph = InMemoryGraph::builder()
        .package(package("a", vec![rule("//a:x", &[])]))
        .package(
            Package::builder(PackageId::new(PathFragment::new("b")))
                .target(rule("//b:y", &[]))
                .load(label("//a:ext.bzl"))
                .contains_errors()
                .build(),
        )
        .build();
    let (env, _) = make_env(graph, &["//..."], false, &[]);
    let expr = QueryExpression::function(
        "rbuildfiles",
        vec![Argument::Word("a/ext.bzl".to_owned())],
    );
    let (_, labels) = run(&env, &expr).await;
    assert!(labels.is_empty(), "error package must not be emitted: {labels:?}");
}

#[tokio::test]
async fn test_rbuildfiles_workspace_file_reaches_external_package() {
    let graph = InMemoryGraph::builder()
        .package(Package::builder(PackageId::external()).build())
        .package(package("a", vec![rule("//a:x", &[])]))
        .package(package("b", vec![rule("//b:y", &[])]))
        .build();
    let (env, _) = make_env(graph, &["//..."], false, &[]);
    let expr = QueryExpression::function(
        "rbuildfiles",
        vec![Argument::Word("WORKSPACE".to_owned())],
    );
    let (_, labels) = run(&env, &expr).await;
    assert_eq!(
        labels,
        vec!["//a:BUILD", "//b:BUILD", "//external:WORKSPACE"]
    );
}

#[tokio::test]
async fn test_keep_going_reports_errors_and_degrades() {
    let graph = chain_graph()
        .package(
            Package::builder(PackageId::new(PathFragment::new("bad")))
                .target(rule("//bad:broken", &[]))
                .contains_errors()
                .build(),
        )
        .recovered_error(label("//bad:broken"), "bad/BUILD:1: parse error")
        .build();
    let (env, events) = make_env(graph, &["//..."], true, &[]);

    let expr = deps(union(vec![
        QueryExpression::target("//a:x"),
        QueryExpression::target("//bad:broken"),
    ]));
    let (result, labels) = run(&env, &expr).await;

    assert!(!result.success);
    assert!(!result.empty);
    assert_eq!(labels, vec!["//a:x", "//a:y", "//a:z", "//bad:broken"]);
    assert!(events
        .errors()
        .iter()
        .any(|e| e.contains("parse error")));
    assert!(events
        .warnings()
        .iter()
        .any(|w| w.contains("keep_going")));
}

#[tokio::test]
async fn test_errors_fail_the_query_without_keep_going() {
    // The traversal value of //a:x retains the error its loading recovered
    // from somewhere in its closure.
    let graph = chain_graph()
        .recovered_error(label("//a:x"), "a/BUILD:2: parse error")
        .build();
    let (env, events) = make_env(graph, &["//a/..."], false, &[]);

    let consumer = RecordingConsumer::default();
    let err = env
        .evaluate_query(&deps(QueryExpression::target("//a:x")), &consumer)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("BUILD file errors"));
    assert!(events.has_errors());
}

#[tokio::test]
async fn test_cycle_broken_target_is_omitted_with_warning() {
    let graph = chain_graph().cycle_broken(label("//a:y")).build();
    let (env, events) = make_env(graph, &["//a/..."], false, &[]);

    let expr = deps(union(vec![
        QueryExpression::target("//a:x"),
        QueryExpression::target("//a:y"),
    ]));
    let (result, labels) = run(&env, &expr).await;

    // //a:y still appears as a seed, but nothing is reachable through it.
    assert!(result.success);
    assert!(!labels.contains(&"//a:z".to_owned()));
    assert!(events
        .warnings()
        .iter()
        .any(|w| w.contains("does not exist in graph")));
}

#[tokio::test]
async fn test_universe_cycle_is_an_acceptable_outcome() {
    let graph = chain_graph().build();
    let factory = InMemoryGraphFactory::with_universe_cycle(graph, "//a:x -> //a:x");
    let events = Arc::new(CollectingEventHandler::new());
    let env = GraphQueryEnvironment::new(
        QueryEnvironmentOptions {
            universe_scope: vec!["//a/...".to_owned()],
            ..Default::default()
        },
        Arc::new(factory),
        events,
    )
    .unwrap();

    let consumer = RecordingConsumer::default();
    let result = env
        .evaluate_query(&QueryExpression::target("//a:x"), &consumer)
        .await
        .unwrap();
    assert!(result.success);
}

#[tokio::test]
async fn test_non_cycle_universe_failure_is_fatal() {
    let graph = chain_graph().build();
    let factory = InMemoryGraphFactory::with_universe_failure(graph, "disk on fire");
    let events = Arc::new(CollectingEventHandler::new());
    let env = GraphQueryEnvironment::new(
        QueryEnvironmentOptions {
            universe_scope: vec!["//a/...".to_owned()],
            ..Default::default()
        },
        Arc::new(factory),
        events,
    )
    .unwrap();

    let consumer = RecordingConsumer::default();
    let err = env
        .evaluate_query(&QueryExpression::target("//a:x"), &consumer)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unexpected evaluation result"));
}

#[test]
fn test_empty_universe_is_a_configuration_error() {
    let graph = chain_graph().build();
    let err = GraphQueryEnvironment::new(
        QueryEnvironmentOptions::default(),
        Arc::new(InMemoryGraphFactory::new(graph)),
        Arc::new(CollectingEventHandler::new()),
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("empty universe"));
}

#[tokio::test]
async fn test_environment_is_single_shot() {
    let (env, _) = make_env(chain_graph().build(), &["//a/..."], false, &[]);
    let consumer = RecordingConsumer::default();
    env.evaluate_query(&QueryExpression::target("//a:x"), &consumer)
        .await
        .unwrap();
    let err = env
        .evaluate_query(&QueryExpression::target("//a:x"), &consumer)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("single-shot"));
}
