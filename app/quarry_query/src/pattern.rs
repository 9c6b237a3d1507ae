/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Resolves target-pattern strings into target streams against the
//! universe, honoring the graph's blacklisted package prefixes.

use std::sync::Arc;

use dupe::Dupe;
use futures::StreamExt;
use indexmap::IndexSet;
use quarry_events::Event;
use quarry_events::EventHandler;
use quarry_graph::key::GraphKey;
use quarry_graph::walkable::RecursivePackageProvider;
use quarry_graph::walkable::WalkableGraph;
use quarry_node::label::Label;
use quarry_node::label::PackageId;
use quarry_node::package::Package;
use quarry_node::path::PathFragment;
use quarry_node::target::Target;
use tokio::sync::OnceCell;

use crate::callback::Callback;

#[derive(Debug, thiserror::Error)]
pub enum PatternParseError {
    #[error("invalid target pattern `{pattern}`: {message}")]
    Invalid { pattern: String, message: String },
}

/// A parsed, absolutized target pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPattern {
    SingleTarget(Label),
    TargetsInPackage {
        package: PackageId,
        rules_only: bool,
    },
    TargetsBelowDirectory {
        directory: PathFragment,
        rules_only: bool,
        excluded_subdirectories: IndexSet<PathFragment>,
    },
}

/// Makes a pattern absolute relative to the workspace-relative parser
/// prefix. Already absolute patterns pass through unchanged.
pub fn absolutize(parser_prefix: &str, pattern: &str) -> String {
    if pattern.starts_with("//") || pattern.starts_with('@') {
        return pattern.to_owned();
    }
    if parser_prefix.is_empty() {
        return format!("//{}", pattern);
    }
    if pattern.starts_with(':') {
        format!("//{}{}", parser_prefix, pattern)
    } else {
        format!("//{}/{}", parser_prefix, pattern)
    }
}

pub fn parse(parser_prefix: &str, pattern: &str) -> Result<TargetPattern, PatternParseError> {
    let absolute = absolutize(parser_prefix, pattern);
    let invalid = |message: &str| PatternParseError::Invalid {
        pattern: pattern.to_owned(),
        message: message.to_owned(),
    };

    if absolute.contains("...") {
        let rest = absolute
            .strip_prefix("//")
            .ok_or_else(|| invalid("recursive patterns must be in the main repository"))?;
        let idx = rest
            .find("...")
            .ok_or_else(|| invalid("`...` must follow the package path"))?;
        if idx != 0 && !rest[..idx].ends_with('/') {
            return Err(invalid("`...` must be a full path segment"));
        }
        let directory = if idx == 0 { "" } else { &rest[..idx - 1] };
        let rules_only = match &rest[idx + 3..] {
            "" | ":all" => true,
            ":*" => false,
            _ => return Err(invalid("unrecognized suffix after `...`")),
        };
        return Ok(TargetPattern::TargetsBelowDirectory {
            directory: PathFragment::new(directory),
            rules_only,
            excluded_subdirectories: IndexSet::new(),
        });
    }

    if let Some(pkg) = absolute.strip_suffix(":all") {
        let pkg = pkg
            .strip_prefix("//")
            .ok_or_else(|| invalid("package patterns must be in the main repository"))?;
        return Ok(TargetPattern::TargetsInPackage {
            package: PackageId::new(PathFragment::new(pkg)),
            rules_only: true,
        });
    }
    if let Some(pkg) = absolute.strip_suffix(":*") {
        let pkg = pkg
            .strip_prefix("//")
            .ok_or_else(|| invalid("package patterns must be in the main repository"))?;
        return Ok(TargetPattern::TargetsInPackage {
            package: PackageId::new(PathFragment::new(pkg)),
            rules_only: false,
        });
    }

    Label::parse(&absolute)
        .map(TargetPattern::SingleTarget)
        .map_err(|e| invalid(&e.to_string()))
}

/// Streams the targets matching a pattern to a callback. Package
/// enumeration for below-directory patterns is fanned out over the worker
/// budget; the blacklist is read from the graph once and memoized.
pub(crate) struct PatternResolver {
    graph: Arc<dyn WalkableGraph>,
    provider: Arc<dyn RecursivePackageProvider>,
    events: Arc<dyn EventHandler>,
    parser_prefix: String,
    threads: usize,
    blacklist: OnceCell<IndexSet<PathFragment>>,
}

impl PatternResolver {
    pub(crate) fn new(
        graph: Arc<dyn WalkableGraph>,
        provider: Arc<dyn RecursivePackageProvider>,
        events: Arc<dyn EventHandler>,
        parser_prefix: String,
        threads: usize,
    ) -> Self {
        Self {
            graph,
            provider,
            events,
            parser_prefix,
            threads: threads.max(1),
            blacklist: OnceCell::new(),
        }
    }

    async fn blacklisted_prefixes(&self) -> anyhow::Result<&IndexSet<PathFragment>> {
        self.blacklist
            .get_or_try_init(|| async {
                match self.graph.value(&GraphKey::BlacklistPrefixes).await? {
                    Some(value) => match value.as_blacklist() {
                        Some(blacklist) => Ok(blacklist.prefixes.clone()),
                        None => anyhow::bail!("unexpected value kind for the blacklist node"),
                    },
                    None => Ok(IndexSet::new()),
                }
            })
            .await
    }

    async fn package(&self, id: &PackageId) -> anyhow::Result<Option<Arc<Package>>> {
        let key = GraphKey::Package(id.clone());
        Ok(self
            .graph
            .value(&key)
            .await?
            .and_then(|v| v.as_package().map(Arc::clone)))
    }

    fn package_targets(package: &Package, rules_only: bool) -> Vec<Target> {
        package
            .targets()
            .filter(|t| !rules_only || t.as_rule().is_some())
            .map(Target::dupe)
            .collect()
    }

    /// Evaluates `pattern` and streams matches to `callback`. Parse failures
    /// and unresolvable targets are reported to the event sink as build-file
    /// errors; they do not abort the query.
    pub(crate) async fn targets_matching_pattern(
        &self,
        pattern: &str,
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        let parsed = match parse(&self.parser_prefix, pattern) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.events.handle(Event::error(e.to_string()));
                return Ok(());
            }
        };
        match parsed {
            TargetPattern::SingleTarget(label) => {
                match self.package(label.package_id()).await? {
                    Some(package) => match package.target(label.name()) {
                        Ok(target) => callback.process(vec![target.dupe()]).await?,
                        Err(e) => self.events.handle(Event::error(e.to_string())),
                    },
                    None => self.events.handle(Event::error(format!(
                        "no such package '{}'",
                        label.package_id()
                    ))),
                }
                Ok(())
            }
            TargetPattern::TargetsInPackage { package, rules_only } => {
                match self.package(&package).await? {
                    Some(package) => {
                        callback
                            .process(Self::package_targets(&package, rules_only))
                            .await?
                    }
                    None => self
                        .events
                        .handle(Event::error(format!("no such package '{}'", package))),
                }
                Ok(())
            }
            TargetPattern::TargetsBelowDirectory {
                directory,
                rules_only,
                excluded_subdirectories,
            } => {
                let mut excluded = excluded_subdirectories;
                excluded.extend(self.blacklisted_prefixes().await?.iter().cloned());

                let ids = self.provider.packages_under(&directory, &excluded).await?;
                let mut packages = futures::stream::iter(ids.into_iter().map(|id| {
                    let graph = self.graph.dupe();
                    async move {
                        let value = graph.value(&GraphKey::Package(id)).await?;
                        anyhow::Ok(value.and_then(|v| v.as_package().map(Arc::clone)))
                    }
                }))
                .buffer_unordered(self.threads);

                while let Some(package) = packages.next().await {
                    if let Some(package) = package? {
                        callback
                            .process(Self::package_targets(&package, rules_only))
                            .await?;
                    }
                }
                Ok(())
            }
        }
    }
}
