/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use derive_more::Display;
use dupe::Dupe;
use quarry_node::label::Label;
use quarry_node::label::PackageId;
use quarry_node::path::RootedPath;

/// Identifies the kind of node a [`GraphKey`] addresses. The reverse walks
/// dispatch on this tag, so it must stay cheap to read.
#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq, Hash, Display)]
pub enum FunctionName {
    TransitiveTraversal,
    Package,
    PackageLookup,
    File,
    BlacklistPrefixes,
    Universe,
}

/// Root key of one prepared universe. Only compared for identity against
/// the factory's reported root values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniverseKey {
    pub patterns: Vec<String>,
    pub parser_prefix: String,
}

/// Address of a node in the walkable graph. Opaque to the engine apart from
/// its tag and the payload of the tags it knows how to build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub enum GraphKey {
    #[display(fmt = "TransitiveTraversal({})", _0)]
    TransitiveTraversal(Label),
    #[display(fmt = "Package({})", _0)]
    Package(PackageId),
    #[display(fmt = "PackageLookup({})", _0)]
    PackageLookup(PackageId),
    #[display(fmt = "File({})", _0)]
    File(RootedPath),
    #[display(fmt = "BlacklistPrefixes")]
    BlacklistPrefixes,
    #[display(fmt = "Universe({:?})", "_0.patterns")]
    Universe(UniverseKey),
}

impl GraphKey {
    pub fn function_name(&self) -> FunctionName {
        match self {
            GraphKey::TransitiveTraversal(..) => FunctionName::TransitiveTraversal,
            GraphKey::Package(..) => FunctionName::Package,
            GraphKey::PackageLookup(..) => FunctionName::PackageLookup,
            GraphKey::File(..) => FunctionName::File,
            GraphKey::BlacklistPrefixes => FunctionName::BlacklistPrefixes,
            GraphKey::Universe(..) => FunctionName::Universe,
        }
    }

    pub fn transitive_traversal(label: &Label) -> GraphKey {
        GraphKey::TransitiveTraversal(label.dupe())
    }

    /// The label of a transitive-traversal key; `None` for every other tag.
    pub fn as_transitive_traversal_label(&self) -> Option<&Label> {
        match self {
            GraphKey::TransitiveTraversal(label) => Some(label),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use quarry_node::path::PathFragment;

    use super::*;

    #[test]
    fn test_tag_is_stable_across_payloads() {
        let a = GraphKey::Package(PackageId::new(PathFragment::new("a")));
        let b = GraphKey::Package(PackageId::external());
        assert_eq!(a.function_name(), b.function_name());
        assert_ne!(a, b);
    }

    #[test]
    fn test_traversal_label_roundtrip() {
        let label = Label::parse("//a:b").unwrap();
        let key = GraphKey::transitive_traversal(&label);
        assert_eq!(key.as_transitive_traversal_label(), Some(&label));
        assert_eq!(
            GraphKey::BlacklistPrefixes.as_transitive_traversal_label(),
            None
        );
    }
}
