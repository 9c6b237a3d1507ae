/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

use indexmap::IndexMap;

use crate::label::Label;
use crate::label::PackageId;
use crate::path::PathFragment;
use crate::target::Target;

/// File declaring a package's targets in the common case.
pub const BUILD_FILE_NAME: &str = "BUILD";

/// File declaring the external package. It lives at the workspace root, not
/// under the external package's own directory.
pub const WORKSPACE_FILE_NAME: &str = "WORKSPACE";

#[derive(Debug, thiserror::Error)]
#[error("no such target '{name}' in package '{package}'")]
pub struct NoSuchTarget {
    pub package: PackageId,
    pub name: String,
}

/// The targets declared by one build file, plus the extension files that
/// file pulled in. A package that failed to load cleanly is still usable but
/// carries `contains_errors`.
#[derive(Debug)]
pub struct Package {
    id: PackageId,
    build_file: Target,
    build_file_path: PathFragment,
    subincludes: Vec<Label>,
    loads: Vec<Label>,
    contains_errors: bool,
    targets: IndexMap<String, Target>,
}

impl Package {
    pub fn builder(id: PackageId) -> PackageBuilder {
        PackageBuilder {
            id,
            subincludes: Vec::new(),
            loads: Vec::new(),
            contains_errors: false,
            targets: IndexMap::new(),
        }
    }

    pub fn id(&self) -> &PackageId {
        &self.id
    }

    /// The build file as an addressable source-file target.
    pub fn build_file(&self) -> &Target {
        &self.build_file
    }

    /// Workspace-relative path of the build file.
    pub fn build_file_path(&self) -> &PathFragment {
        &self.build_file_path
    }

    pub fn subinclude_labels(&self) -> &[Label] {
        &self.subincludes
    }

    pub fn load_labels(&self) -> &[Label] {
        &self.loads
    }

    pub fn contains_errors(&self) -> bool {
        self.contains_errors
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.values()
    }

    pub fn target(&self, name: &str) -> Result<&Target, NoSuchTarget> {
        self.targets.get(name).ok_or_else(|| NoSuchTarget {
            package: self.id.clone(),
            name: name.to_owned(),
        })
    }
}

pub struct PackageBuilder {
    id: PackageId,
    subincludes: Vec<Label>,
    loads: Vec<Label>,
    contains_errors: bool,
    targets: IndexMap<String, Target>,
}

impl PackageBuilder {
    pub fn target(mut self, target: Target) -> Self {
        self.targets
            .insert(target.label().name().to_owned(), target);
        self
    }

    pub fn subinclude(mut self, label: Label) -> Self {
        self.subincludes.push(label);
        self
    }

    pub fn load(mut self, label: Label) -> Self {
        self.loads.push(label);
        self
    }

    pub fn contains_errors(mut self) -> Self {
        self.contains_errors = true;
        self
    }

    pub fn build(mut self) -> Package {
        // The external package is declared by the workspace file at the
        // workspace root; every other package by the BUILD file in its own
        // directory.
        let (build_file_name, build_file_path) = if self.id.is_external() {
            (WORKSPACE_FILE_NAME, PathFragment::new(WORKSPACE_FILE_NAME))
        } else {
            (BUILD_FILE_NAME, self.id.path().join(BUILD_FILE_NAME))
        };
        let build_file =
            Target::source_file(Label::new(self.id.clone(), build_file_name));
        self.targets
            .entry(build_file_name.to_owned())
            .or_insert_with(|| build_file.clone());
        let build_file = self.targets[build_file_name].clone();
        Package {
            id: self.id,
            build_file,
            build_file_path,
            subincludes: self.subincludes,
            loads: self.loads,
            contains_errors: self.contains_errors,
            targets: self.targets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Attribute;
    use crate::target::Rule;
    use crate::target::Visibility;

    #[test]
    fn test_build_file_is_addressable() {
        let id = PackageId::new(PathFragment::new("a/b"));
        let pkg = Package::builder(id.clone())
            .target(Target::rule(Rule::new(
                Label::new(id.clone(), "x"),
                "cc_library",
                vec![Attribute::new("deps", vec![])],
                vec![],
                Visibility::default(),
            )))
            .build();

        assert_eq!(pkg.build_file_path().as_str(), "a/b/BUILD");
        assert_eq!(pkg.build_file().label().to_string(), "//a/b:BUILD");
        assert!(pkg.target("BUILD").is_ok());
        assert!(pkg.target("x").is_ok());
        let err = pkg.target("missing").unwrap_err();
        assert_eq!(err.name, "missing");
    }

    #[test]
    fn test_external_package_build_file_is_workspace() {
        let pkg = Package::builder(PackageId::external()).build();
        assert_eq!(pkg.build_file_path().as_str(), "WORKSPACE");
        assert_eq!(pkg.build_file().label().to_string(), "//external:WORKSPACE");
    }
}
