/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Forward and reverse dependency traversals over the filtered graph.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use dupe::Dupe;
use quarry_events::Event;
use quarry_events::EventHandler;
use quarry_graph::key::GraphKey;
use quarry_graph::walkable::WalkableGraph;
use quarry_node::label::Label;
use quarry_node::target::DependencyFilter;
use quarry_node::target::Target;

use crate::edges;
use crate::expr::QueryExpression;
use crate::materialize::targets_from_keys;
use crate::set::TargetSet;

pub(crate) struct DepTraversal<'a> {
    graph: &'a dyn WalkableGraph,
    events: &'a dyn EventHandler,
    filter: DependencyFilter,
}

fn traversal_keys<'t>(targets: impl IntoIterator<Item = &'t Target>) -> Vec<GraphKey> {
    targets
        .into_iter()
        .map(|t| GraphKey::transitive_traversal(t.label()))
        .collect()
}

impl<'a> DepTraversal<'a> {
    pub(crate) fn new(
        graph: &'a dyn WalkableGraph,
        events: &'a dyn EventHandler,
        filter: DependencyFilter,
    ) -> Self {
        Self {
            graph,
            events,
            filter,
        }
    }

    /// Materializes a raw key adjacency map into targets, dropping keys that
    /// produce no target.
    async fn targets_map(
        &self,
        raw: HashMap<GraphKey, Vec<GraphKey>>,
    ) -> anyhow::Result<Vec<(Target, Vec<Target>)>> {
        let neighbor_keys: HashSet<&GraphKey> = raw.values().flatten().collect();
        let neighbors = targets_from_keys(self.graph, neighbor_keys.into_iter()).await?;
        let sources = targets_from_keys(self.graph, raw.keys()).await?;

        let mut result = Vec::with_capacity(sources.len());
        for (key, neighbor_keys) in &raw {
            if let Some(source) = sources.get(key) {
                let materialized = neighbor_keys
                    .iter()
                    .filter_map(|k| neighbors.get(k))
                    .map(Target::dupe)
                    .collect();
                result.push((source.dupe(), materialized));
            }
        }
        Ok(result)
    }

    /// Targets may not be in the graph because they are outside the universe
    /// or depend on cycles.
    fn warn_if_missing_targets<'t>(
        &self,
        requested: &TargetSet,
        found: impl Iterator<Item = &'t Label>,
    ) {
        let found: HashSet<&Label> = found.collect();
        if found.len() == requested.len() {
            return;
        }
        let missing: Vec<String> = requested
            .iter_labels()
            .filter(|l| !found.contains(l))
            .map(Label::to_string)
            .collect();
        self.events.handle(Event::warn(format!(
            "Targets were missing from graph: [{}]",
            missing.join(", ")
        )));
    }

    /// Direct forward dependencies, pruned to each rule's allowed labels.
    pub(crate) async fn fwd_deps(&self, targets: &TargetSet) -> anyhow::Result<TargetSet> {
        let raw = self
            .graph
            .direct_deps(&traversal_keys(targets.iter()))
            .await?;
        let materialized = self.targets_map(raw).await?;
        self.warn_if_missing_targets(
            targets,
            materialized.iter().map(|(source, _)| source.label()),
        );

        let mut result = TargetSet::new();
        for (source, deps) in materialized {
            result.extend(edges::filter_fwd_deps(&source, deps, self.filter));
        }
        Ok(result)
    }

    /// Direct reverse dependencies. Raw reverse edges are unfiltered, so a
    /// filtered-mode parent rule only counts when at least one of its
    /// allowed labels actually points into the original target set.
    pub(crate) async fn reverse_deps(&self, targets: &TargetSet) -> anyhow::Result<TargetSet> {
        let raw = self
            .graph
            .reverse_deps(&traversal_keys(targets.iter()))
            .await?;
        let materialized = self.targets_map(raw).await?;
        self.warn_if_missing_targets(
            targets,
            materialized.iter().map(|(source, _)| source.label()),
        );

        let mut visited: HashSet<Label> = HashSet::new();
        let mut result = TargetSet::new();
        for (_, parents) in materialized {
            for parent in parents {
                if !visited.insert(parent.label().dupe()) {
                    continue;
                }
                match parent.as_rule() {
                    Some(rule) if !self.filter.is_all() => {
                        let allowed = edges::allowed_deps(rule, self.filter);
                        if allowed.iter().any(|l| targets.contains(l)) {
                            result.insert(parent);
                        }
                    }
                    _ => {
                        result.insert(parent);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Forward closure by layered breadth-first search. Sibling order is
    /// unspecified.
    pub(crate) async fn transitive_closure(
        &self,
        seeds: &TargetSet,
    ) -> anyhow::Result<TargetSet> {
        let mut visited = TargetSet::new();
        let mut current = seeds.clone();
        while !current.is_empty() {
            let to_visit = current.difference(&visited);
            if to_visit.is_empty() {
                break;
            }
            current = self.fwd_deps(&to_visit).await?;
            visited.extend(to_visit);
        }
        Ok(visited)
    }

    /// Finds targets on some path from `from` to `to` over filtered forward
    /// edges, exploring depth-first and recording each node's discoverer.
    /// Returns the chain `to → … → from`, or `None` when `to` is
    /// unreachable. `nodes_on_path(t, t)` is `[t]`.
    pub(crate) async fn nodes_on_path(
        &self,
        from: &Target,
        to: &Target,
    ) -> anyhow::Result<Option<Vec<Target>>> {
        let mut node_to_parent: HashMap<Label, Option<Label>> = HashMap::new();
        let mut discovered: HashMap<Label, Target> = HashMap::new();
        let mut to_visit: VecDeque<Target> = VecDeque::new();

        to_visit.push_back(from.dupe());
        node_to_parent.insert(from.label().dupe(), None);
        discovered.insert(from.label().dupe(), from.dupe());

        while let Some(current) = to_visit.pop_front() {
            if current.label() == to.label() {
                let mut path = Vec::new();
                let mut cursor = Some(to.label().dupe());
                while let Some(label) = cursor {
                    path.push(discovered[&label].dupe());
                    cursor = node_to_parent[&label].as_ref().map(Label::dupe);
                }
                return Ok(Some(path));
            }
            let singleton: TargetSet = [current.dupe()].into_iter().collect();
            for dep in self.fwd_deps(&singleton).await? {
                if !node_to_parent.contains_key(dep.label()) {
                    node_to_parent.insert(dep.label().dupe(), Some(current.label().dupe()));
                    discovered.insert(dep.label().dupe(), dep.dupe());
                    to_visit.push_front(dep);
                }
            }
        }
        Ok(None)
    }

    /// Error probe over an already loaded closure: surfaces recovered
    /// loading errors retained by traversal values, stored evaluation errors
    /// of failed nodes, and warns about nodes absent from the graph.
    pub(crate) async fn build_transitive_closure(
        &self,
        caller: &QueryExpression,
        targets: &TargetSet,
    ) -> anyhow::Result<()> {
        tracing::debug!(caller = %caller, targets = targets.len(), "checking closure for errors");
        let keys = traversal_keys(targets.iter());
        let mut error_messages: Vec<String> = Vec::new();

        // Successfully evaluated values may have recovered from an error.
        let successful = self.graph.successful_values(&keys).await?;
        for value in successful.values() {
            if let Some(traversal) = value.as_transitive_traversal() {
                if let Some(message) = &traversal.first_error_message {
                    error_messages.push(message.to_string());
                }
            }
        }

        let unsuccessful: Vec<GraphKey> = keys
            .into_iter()
            .filter(|k| !successful.contains_key(k))
            .collect();
        for (key, exception) in self.graph.missing_and_exceptions(&unsuccessful).await? {
            match exception {
                None => self
                    .events
                    .handle(Event::warn(format!("{} does not exist in graph", key))),
                Some(message) => error_messages.push(message),
            }
        }

        for message in error_messages {
            self.events.handle(Event::error(message));
        }
        Ok(())
    }
}
