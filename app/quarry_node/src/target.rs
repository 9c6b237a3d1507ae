/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! The tagged target sum and the rule dependency policy that the edge filter
//! consumes.

use std::sync::Arc;

use dupe::Dupe;

use crate::label::Label;
use crate::label::PackageId;

/// Selects which attribute edges count as dependencies. Opaque to the graph;
/// only the edge filter interprets it.
#[derive(Debug, Clone, Copy, Dupe, PartialEq, Eq)]
pub enum DependencyFilter {
    AllDeps,
    NoHostDeps,
    NoImplicitDeps,
}

impl DependencyFilter {
    pub fn accepts(self, attr: &Attribute) -> bool {
        match self {
            DependencyFilter::AllDeps => true,
            DependencyFilter::NoHostDeps => !attr.host,
            DependencyFilter::NoImplicitDeps => !attr.implicit,
        }
    }

    pub fn is_all(self) -> bool {
        matches!(self, DependencyFilter::AllDeps)
    }
}

/// A rule attribute carrying dependency labels. `host` marks tool
/// dependencies built for the execution machine; `implicit` marks
/// rule-class-injected dependencies not spelled out in the BUILD file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub labels: Vec<Label>,
    pub host: bool,
    pub implicit: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, labels: Vec<Label>) -> Self {
        Self {
            name: name.into(),
            labels,
            host: false,
            implicit: false,
        }
    }

    pub fn host(mut self) -> Self {
        self.host = true;
        self
    }

    pub fn implicit(mut self) -> Self {
        self.implicit = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Visibility {
    labels: Vec<Label>,
}

impl Visibility {
    pub fn new(labels: Vec<Label>) -> Self {
        Self { labels }
    }

    /// Labels a rule may depend on purely because its visibility names them.
    pub fn dependency_labels(&self) -> &[Label] {
        &self.labels
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Rule {
    label: Label,
    rule_class: String,
    attributes: Vec<Attribute>,
    aspect_attributes: Vec<Attribute>,
    visibility: Visibility,
}

impl Rule {
    pub fn new(
        label: Label,
        rule_class: impl Into<String>,
        attributes: Vec<Attribute>,
        aspect_attributes: Vec<Attribute>,
        visibility: Visibility,
    ) -> Self {
        Self {
            label,
            rule_class: rule_class.into(),
            attributes,
            aspect_attributes,
            visibility,
        }
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn rule_class(&self) -> &str {
        &self.rule_class
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    /// Labels of attribute edges that survive the dependency filter.
    pub fn transitions(
        &self,
        filter: DependencyFilter,
    ) -> impl Iterator<Item = &Label> {
        self.attributes
            .iter()
            .filter(move |attr| filter.accepts(attr))
            .flat_map(|attr| attr.labels.iter())
    }

    /// Labels contributed by aspects attached to this rule's attributes,
    /// filtered the same way as regular attribute edges.
    pub fn aspect_labels_superset(
        &self,
        filter: DependencyFilter,
    ) -> impl Iterator<Item = &Label> {
        self.aspect_attributes
            .iter()
            .filter(move |attr| filter.accepts(attr))
            .flat_map(|attr| attr.labels.iter())
    }

    /// Every dependency label, unfiltered. This is what the raw graph edges
    /// reflect.
    pub fn raw_dependency_labels(&self) -> impl Iterator<Item = &Label> {
        self.attributes
            .iter()
            .chain(self.aspect_attributes.iter())
            .flat_map(|attr| attr.labels.iter())
            .chain(self.visibility.labels.iter())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct SourceFile {
    label: Label,
}

#[derive(Debug, PartialEq, Eq)]
pub struct GeneratedFile {
    label: Label,
    generating_rule: Label,
}

impl GeneratedFile {
    pub fn generating_rule(&self) -> &Label {
        &self.generating_rule
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct PackageGroup {
    label: Label,
    includes: Vec<Label>,
}

impl PackageGroup {
    pub fn includes(&self) -> &[Label] {
        &self.includes
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct EnvironmentGroup {
    label: Label,
}

/// Synthetic target standing in for a build extension file (a subinclude or
/// loaded script), so extensions flow through the same target callbacks as
/// everything else.
#[derive(Debug, PartialEq, Eq)]
pub struct FakeExtensionFile {
    label: Label,
    owning_package: PackageId,
}

impl FakeExtensionFile {
    pub fn owning_package(&self) -> &PackageId {
        &self.owning_package
    }
}

#[derive(Debug, Clone, Dupe, PartialEq, Eq)]
pub enum Target {
    Rule(Arc<Rule>),
    SourceFile(Arc<SourceFile>),
    GeneratedFile(Arc<GeneratedFile>),
    PackageGroup(Arc<PackageGroup>),
    EnvironmentGroup(Arc<EnvironmentGroup>),
    FakeExtensionFile(Arc<FakeExtensionFile>),
}

impl Target {
    pub fn rule(rule: Rule) -> Self {
        Target::Rule(Arc::new(rule))
    }

    pub fn source_file(label: Label) -> Self {
        Target::SourceFile(Arc::new(SourceFile { label }))
    }

    pub fn generated_file(label: Label, generating_rule: Label) -> Self {
        Target::GeneratedFile(Arc::new(GeneratedFile {
            label,
            generating_rule,
        }))
    }

    pub fn package_group(label: Label, includes: Vec<Label>) -> Self {
        Target::PackageGroup(Arc::new(PackageGroup { label, includes }))
    }

    pub fn environment_group(label: Label) -> Self {
        Target::EnvironmentGroup(Arc::new(EnvironmentGroup { label }))
    }

    pub fn fake_extension_file(label: Label, owning_package: PackageId) -> Self {
        Target::FakeExtensionFile(Arc::new(FakeExtensionFile {
            label,
            owning_package,
        }))
    }

    pub fn label(&self) -> &Label {
        match self {
            Target::Rule(r) => &r.label,
            Target::SourceFile(f) => &f.label,
            Target::GeneratedFile(f) => &f.label,
            Target::PackageGroup(g) => &g.label,
            Target::EnvironmentGroup(g) => &g.label,
            Target::FakeExtensionFile(f) => &f.label,
        }
    }

    pub fn package_id(&self) -> &PackageId {
        self.label().package_id()
    }

    pub fn as_rule(&self) -> Option<&Rule> {
        match self {
            Target::Rule(r) => Some(r),
            _ => None,
        }
    }

    /// Human-oriented kind string, matched by the `kind` query function.
    pub fn target_kind(&self) -> String {
        match self {
            Target::Rule(r) => format!("{} rule", r.rule_class),
            Target::SourceFile(..) => "source file".to_owned(),
            Target::GeneratedFile(..) => "generated file".to_owned(),
            Target::PackageGroup(..) => "package group".to_owned(),
            Target::EnvironmentGroup(..) => "environment group".to_owned(),
            Target::FakeExtensionFile(..) => "source file".to_owned(),
        }
    }
}
