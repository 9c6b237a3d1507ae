/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Dispatches query expressions to pattern resolution, set algebra and the
//! function registry.

use anyhow::Context;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::callback::Callback;
use crate::callback::CollectingCallback;
use crate::environment::QueryEnvironment;
use crate::error::QueryError;
use crate::expr::QueryExpression;
use crate::expr::SetOperator;
use crate::set::TargetSet;

/// Evaluates an expression, streaming partial results to `callback`.
/// Literals stream straight out of pattern resolution; set operations and
/// functions materialize what they must.
pub fn eval<'a>(
    env: &'a dyn QueryEnvironment,
    expr: &'a QueryExpression,
    callback: &'a dyn Callback,
) -> BoxFuture<'a, anyhow::Result<()>> {
    async move {
        match expr {
            QueryExpression::TargetLiteral(pattern) => {
                env.get_targets_matching_pattern(expr, pattern, callback)
                    .await
            }
            QueryExpression::SetLiteral(patterns) => {
                for pattern in patterns {
                    env.get_targets_matching_pattern(expr, pattern, callback)
                        .await?;
                }
                Ok(())
            }
            QueryExpression::BinaryOp { op, operands } => {
                let (first, rest) = operands
                    .split_first()
                    .context("set operation without operands")?;
                let mut acc = eval_to_set(env, first).await?;
                for operand in rest {
                    let rhs = eval_to_set(env, operand).await?;
                    acc = match op {
                        SetOperator::Union => acc.union(&rhs),
                        SetOperator::Intersect => acc.intersect(&rhs),
                        SetOperator::Except => acc.difference(&rhs),
                    };
                }
                callback.process(acc.into_iter().collect()).await
            }
            QueryExpression::Function { name, args } => match env.functions().get(name) {
                Some(function) => function.invoke(env, expr, args, callback).await,
                None => Err(QueryError::UnknownFunction(name.clone()).into()),
            },
        }
    }
    .boxed()
}

/// Evaluates an expression into a materialized set, for contexts that need
/// the whole result at once (set algebra, function arguments).
pub async fn eval_to_set(
    env: &dyn QueryEnvironment,
    expr: &QueryExpression,
) -> anyhow::Result<TargetSet> {
    let collector = CollectingCallback::new();
    eval(env, expr, &collector).await?;
    Ok(collector.into_set())
}
