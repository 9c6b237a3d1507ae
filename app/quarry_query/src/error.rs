/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use quarry_graph::key::GraphKey;
use quarry_node::label::Label;
use quarry_node::label::PackageId;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("no queries can be performed with an empty universe")]
    EmptyUniverse,
    #[error("evaluation of query \"{query}\" failed due to BUILD file errors")]
    BuildFileErrors { query: String },
    #[error("no such target '{0}'")]
    NoSuchTarget(Label),
    #[error("package '{0}' contains errors")]
    PackageContainsErrors(PackageId),
    #[error("{0} does not exist in graph")]
    GraphNodeMissing(GraphKey),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("too few arguments to '{function}': expected at least {min}, got {actual}")]
    TooFewArgs {
        function: String,
        min: usize,
        actual: usize,
    },
    #[error("invalid argument {index} to '{function}': expected {expected}")]
    InvalidArgument {
        function: String,
        index: usize,
        expected: &'static str,
    },
    #[error("query was cancelled")]
    Cancelled,
    #[error("reuse of the streaming callback is not allowed")]
    CallbackReuse,
    #[error("the query environment is single-shot and was already evaluated")]
    AlreadyEvaluated,
}

/// Outcome of one top-level query evaluation. `success` is false when the
/// event sink observed errors; `empty` is true when no non-empty partial
/// result was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryEvalResult {
    pub success: bool,
    pub empty: bool,
}
