/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use std::sync::Arc;

use indexmap::IndexSet;
use quarry_node::package::Package;
use quarry_node::path::PathFragment;

/// Per-target loading outcome. A present value may still carry the message
/// of an error the loader recovered from.
#[derive(Debug, Clone, Default)]
pub struct TransitiveTraversalValue {
    pub first_error_message: Option<Arc<str>>,
}

impl TransitiveTraversalValue {
    pub fn with_error(message: impl AsRef<str>) -> Self {
        Self {
            first_error_message: Some(Arc::from(message.as_ref())),
        }
    }
}

/// Whether a directory holds a package and, if so, under which package-path
/// root it was found.
#[derive(Debug, Clone)]
pub enum PackageLookupValue {
    Package { root: PathFragment },
    NoPackage,
}

impl PackageLookupValue {
    pub fn package_exists(&self) -> bool {
        matches!(self, PackageLookupValue::Package { .. })
    }

    pub fn root(&self) -> Option<&PathFragment> {
        match self {
            PackageLookupValue::Package { root } => Some(root),
            PackageLookupValue::NoPackage => None,
        }
    }
}

/// Existence marker for a tracked file. The engine only cares that the node
/// is in the graph; its metadata stays with the graph owner.
#[derive(Debug, Clone, Default)]
pub struct FileValue;

#[derive(Debug, Clone, Default)]
pub struct BlacklistedPrefixesValue {
    pub prefixes: IndexSet<PathFragment>,
}

#[derive(Debug, Clone)]
pub enum GraphValue {
    TransitiveTraversal(TransitiveTraversalValue),
    Package(Arc<Package>),
    PackageLookup(PackageLookupValue),
    File(FileValue),
    BlacklistPrefixes(Arc<BlacklistedPrefixesValue>),
}

impl GraphValue {
    pub fn as_transitive_traversal(&self) -> Option<&TransitiveTraversalValue> {
        match self {
            GraphValue::TransitiveTraversal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_package(&self) -> Option<&Arc<Package>> {
        match self {
            GraphValue::Package(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_package_lookup(&self) -> Option<&PackageLookupValue> {
        match self {
            GraphValue::PackageLookup(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blacklist(&self) -> Option<&Arc<BlacklistedPrefixesValue>> {
        match self {
            GraphValue::BlacklistPrefixes(v) => Some(v),
            _ => None,
        }
    }
}
