/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Query functions: the base set plus the registry that lets an environment
//! or a caller layer additional primitives on top.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use quarry_node::path::PathFragment;

use crate::callback::Callback;
use crate::environment::QueryEnvironment;
use crate::error::QueryError;
use crate::eval::eval_to_set;
use crate::expr::Argument;
use crate::expr::QueryExpression;
use crate::set::TargetSet;

#[async_trait]
pub trait QueryFunction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evaluates the function, streaming results to `callback`. `caller` is
    /// the function expression itself, available for diagnostics.
    async fn invoke(
        &self,
        env: &dyn QueryEnvironment,
        caller: &QueryExpression,
        args: &[Argument],
        callback: &dyn Callback,
    ) -> anyhow::Result<()>;
}

/// Name-keyed function lookup. Later additions win on name collision, which
/// is how caller-injected functions override the defaults.
#[derive(Default)]
pub struct QueryFunctions {
    functions: HashMap<String, Arc<dyn QueryFunction>>,
}

impl QueryFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `deps`, `rdeps`, `somepath`, `buildfiles`, `kind` and `filter`.
    pub fn base() -> Self {
        let mut functions = Self::new();
        functions.add(Arc::new(DepsFunction));
        functions.add(Arc::new(RdepsFunction));
        functions.add(Arc::new(SomepathFunction));
        functions.add(Arc::new(BuildFilesFunction));
        functions.add(Arc::new(KindFunction));
        functions.add(Arc::new(FilterFunction));
        functions
    }

    pub fn add(&mut self, function: Arc<dyn QueryFunction>) {
        self.functions.insert(function.name().to_owned(), function);
    }

    pub fn get(&self, name: &str) -> Option<&dyn QueryFunction> {
        self.functions.get(name).map(|f| f.as_ref())
    }
}

fn expression_arg<'a>(
    function: &str,
    args: &'a [Argument],
    index: usize,
) -> anyhow::Result<&'a QueryExpression> {
    match args.get(index) {
        Some(Argument::Expression(e)) => Ok(e),
        Some(..) => Err(QueryError::InvalidArgument {
            function: function.to_owned(),
            index,
            expected: "an expression",
        }
        .into()),
        None => Err(QueryError::TooFewArgs {
            function: function.to_owned(),
            min: index + 1,
            actual: args.len(),
        }
        .into()),
    }
}

fn word_arg<'a>(function: &str, args: &'a [Argument], index: usize) -> anyhow::Result<&'a str> {
    match args.get(index) {
        Some(Argument::Word(w)) => Ok(w),
        Some(..) => Err(QueryError::InvalidArgument {
            function: function.to_owned(),
            index,
            expected: "a word",
        }
        .into()),
        None => Err(QueryError::TooFewArgs {
            function: function.to_owned(),
            min: index + 1,
            actual: args.len(),
        }
        .into()),
    }
}

fn optional_integer_arg(
    function: &str,
    args: &[Argument],
    index: usize,
) -> anyhow::Result<Option<u64>> {
    match args.get(index) {
        None => Ok(None),
        Some(Argument::Integer(i)) => Ok(Some(*i)),
        Some(..) => Err(QueryError::InvalidArgument {
            function: function.to_owned(),
            index,
            expected: "an integer",
        }
        .into()),
    }
}

/// Iterated reverse-dependency expansion from `start`, optionally restricted
/// to a bounding set and capped at `depth` steps.
async fn rdeps_walk(
    env: &dyn QueryEnvironment,
    start: &TargetSet,
    bound: Option<&TargetSet>,
    depth: Option<u64>,
) -> anyhow::Result<TargetSet> {
    let restrict = |set: TargetSet| match bound {
        Some(bound) => set.intersect(bound),
        None => set,
    };
    let mut result = restrict(start.clone());
    let mut frontier = result.clone();
    let mut remaining = depth;
    while !frontier.is_empty() && remaining != Some(0) {
        let parents = restrict(env.get_reverse_deps(&frontier).await?);
        let fresh = parents.difference(&result);
        if fresh.is_empty() {
            break;
        }
        result = result.union(&fresh);
        frontier = fresh;
        remaining = remaining.map(|d| d - 1);
    }
    Ok(result)
}

/// Bounded forward expansion: the seeds plus everything reachable within
/// `depth` hops of filtered forward edges.
async fn deps_walk(
    env: &dyn QueryEnvironment,
    seeds: &TargetSet,
    depth: u64,
) -> anyhow::Result<TargetSet> {
    let mut result = seeds.clone();
    let mut frontier = seeds.clone();
    for _ in 0..depth {
        let next = env.get_fwd_deps(&frontier).await?.difference(&result);
        if next.is_empty() {
            break;
        }
        result = result.union(&next);
        frontier = next;
    }
    Ok(result)
}

pub struct DepsFunction;

#[async_trait]
impl QueryFunction for DepsFunction {
    fn name(&self) -> &'static str {
        "deps"
    }

    async fn invoke(
        &self,
        env: &dyn QueryEnvironment,
        caller: &QueryExpression,
        args: &[Argument],
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        let targets = eval_to_set(env, expression_arg("deps", args, 0)?).await?;
        let depth = optional_integer_arg("deps", args, 1)?;
        env.build_transitive_closure(caller, &targets, depth.unwrap_or(u64::MAX) as u32)
            .await?;
        let result = match depth {
            None => env.get_transitive_closure(&targets).await?,
            Some(depth) => deps_walk(env, &targets, depth).await?,
        };
        callback.process(result.into_iter().collect()).await
    }
}

pub struct RdepsFunction;

#[async_trait]
impl QueryFunction for RdepsFunction {
    fn name(&self) -> &'static str {
        "rdeps"
    }

    async fn invoke(
        &self,
        env: &dyn QueryEnvironment,
        caller: &QueryExpression,
        args: &[Argument],
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        let universe = eval_to_set(env, expression_arg("rdeps", args, 0)?).await?;
        let targets = eval_to_set(env, expression_arg("rdeps", args, 1)?).await?;
        let depth = optional_integer_arg("rdeps", args, 2)?;

        env.build_transitive_closure(caller, &universe, u32::MAX).await?;
        let closure = env.get_transitive_closure(&universe).await?;
        let result = rdeps_walk(env, &targets, Some(&closure), depth).await?;
        callback.process(result.into_iter().collect()).await
    }
}

/// Reverse dependencies within the whole universe. Cheaper than `rdeps`
/// against the universe pattern because universe membership needs no
/// recomputation; the driver rewrites eligible `rdeps` calls into this.
pub struct AllRdepsFunction;

#[async_trait]
impl QueryFunction for AllRdepsFunction {
    fn name(&self) -> &'static str {
        "allrdeps"
    }

    async fn invoke(
        &self,
        env: &dyn QueryEnvironment,
        caller: &QueryExpression,
        args: &[Argument],
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        let targets = eval_to_set(env, expression_arg("allrdeps", args, 0)?).await?;
        let depth = optional_integer_arg("allrdeps", args, 1)?;
        env.build_transitive_closure(caller, &targets, u32::MAX).await?;
        let result = rdeps_walk(env, &targets, None, depth).await?;
        callback.process(result.into_iter().collect()).await
    }
}

pub struct SomepathFunction;

#[async_trait]
impl QueryFunction for SomepathFunction {
    fn name(&self) -> &'static str {
        "somepath"
    }

    async fn invoke(
        &self,
        env: &dyn QueryEnvironment,
        caller: &QueryExpression,
        args: &[Argument],
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        let from = eval_to_set(env, expression_arg("somepath", args, 0)?).await?;
        let to = eval_to_set(env, expression_arg("somepath", args, 1)?).await?;
        env.build_transitive_closure(caller, &from, u32::MAX).await?;

        for start in from.iter() {
            for end in to.iter() {
                if let Some(path) = env.get_nodes_on_path(start, end).await? {
                    return callback.process(path).await;
                }
            }
        }
        Ok(())
    }
}

pub struct BuildFilesFunction;

#[async_trait]
impl QueryFunction for BuildFilesFunction {
    fn name(&self) -> &'static str {
        "buildfiles"
    }

    async fn invoke(
        &self,
        env: &dyn QueryEnvironment,
        caller: &QueryExpression,
        args: &[Argument],
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        let targets = eval_to_set(env, expression_arg("buildfiles", args, 0)?).await?;
        let files = env
            .get_build_files(caller, &targets, true, true, true)
            .await?;
        callback.process(files.into_iter().collect()).await
    }
}

pub struct KindFunction;

#[async_trait]
impl QueryFunction for KindFunction {
    fn name(&self) -> &'static str {
        "kind"
    }

    async fn invoke(
        &self,
        env: &dyn QueryEnvironment,
        _caller: &QueryExpression,
        args: &[Argument],
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        let regex = word_arg("kind", args, 0)?;
        let targets = eval_to_set(env, expression_arg("kind", args, 1)?).await?;
        callback
            .process(targets.kind(regex)?.into_iter().collect())
            .await
    }
}

pub struct FilterFunction;

#[async_trait]
impl QueryFunction for FilterFunction {
    fn name(&self) -> &'static str {
        "filter"
    }

    async fn invoke(
        &self,
        env: &dyn QueryEnvironment,
        _caller: &QueryExpression,
        args: &[Argument],
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        let regex = word_arg("filter", args, 0)?;
        let targets = eval_to_set(env, expression_arg("filter", args, 1)?).await?;
        callback
            .process(targets.filter_name(regex)?.into_iter().collect())
            .await
    }
}

/// `rbuildfiles(file…)`: the packages whose build files transitively depend
/// on the given workspace-relative file paths.
pub struct RBuildFilesFunction;

#[async_trait]
impl QueryFunction for RBuildFilesFunction {
    fn name(&self) -> &'static str {
        "rbuildfiles"
    }

    async fn invoke(
        &self,
        env: &dyn QueryEnvironment,
        _caller: &QueryExpression,
        args: &[Argument],
        callback: &dyn Callback,
    ) -> anyhow::Result<()> {
        if args.is_empty() {
            return Err(QueryError::TooFewArgs {
                function: "rbuildfiles".to_owned(),
                min: 1,
                actual: 0,
            }
            .into());
        }
        let mut paths = Vec::with_capacity(args.len());
        for index in 0..args.len() {
            paths.push(PathFragment::new(word_arg("rbuildfiles", args, index)?));
        }
        env.rbuildfiles(&paths, callback).await
    }
}
