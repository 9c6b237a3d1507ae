/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Streaming result delivery: the consumer callback trait, the shared
//! label-keyed uniquifier and the batching wrapper the driver installs
//! around the consumer.

use std::collections::HashSet;

use async_trait::async_trait;
use dupe::Dupe;
use parking_lot::Mutex;
use quarry_node::label::Label;
use quarry_node::target::Target;

use crate::error::QueryError;
use crate::set::TargetSet;

/// Receives partial results as they are produced. Implementations must
/// tolerate concurrent calls; no ordering is guaranteed between deliveries.
#[async_trait]
pub trait Callback: Send + Sync {
    async fn process(&self, partial: Vec<Target>) -> anyhow::Result<()>;
}

/// Admits each label at most once across every partial result of a query.
#[derive(Default)]
pub struct Uniquifier {
    seen: Mutex<HashSet<Label>>,
}

impl Uniquifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The subset of `targets` whose labels have not been seen before.
    pub fn unique(&self, targets: Vec<Target>) -> Vec<Target> {
        let mut seen = self.seen.lock();
        targets
            .into_iter()
            .filter(|t| seen.insert(t.label().dupe()))
            .collect()
    }
}

/// Wraps a callback so that every delivery to the original carries at least
/// `batch_threshold` targets, except the final one. Retains fewer than
/// `batch_threshold` targets at a time.
///
/// After the last `process` call, [`BatchStreamedCallback::flush`] must be
/// called to push the remainder through; the callback is unreusable
/// afterwards.
pub struct BatchStreamedCallback<'a> {
    downstream: &'a dyn Callback,
    batch_threshold: usize,
    uniquifier: &'a Uniquifier,
    pending: Mutex<Option<Vec<Target>>>,
}

impl<'a> BatchStreamedCallback<'a> {
    pub fn new(
        downstream: &'a dyn Callback,
        batch_threshold: usize,
        uniquifier: &'a Uniquifier,
    ) -> Self {
        Self {
            downstream,
            batch_threshold,
            uniquifier,
            pending: Mutex::new(Some(Vec::new())),
        }
    }

    pub async fn flush(&self) -> anyhow::Result<()> {
        let remainder = self.pending.lock().take();
        match remainder {
            Some(batch) if !batch.is_empty() => self.downstream.process(batch).await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Callback for BatchStreamedCallback<'_> {
    async fn process(&self, partial: Vec<Target>) -> anyhow::Result<()> {
        let fresh = self.uniquifier.unique(partial);
        // The downstream delivery happens outside the lock; concurrent
        // producers may reorder batches but never exceed the threshold
        // between flushes.
        let ready = {
            let mut guard = self.pending.lock();
            let pending = guard.as_mut().ok_or(QueryError::CallbackReuse)?;
            pending.extend(fresh);
            if pending.len() >= self.batch_threshold {
                Some(std::mem::take(pending))
            } else {
                None
            }
        };
        match ready {
            Some(batch) => self.downstream.process(batch).await,
            None => Ok(()),
        }
    }
}

/// Aggregates every delivered target into a set. Used to materialize
/// sub-expression results where streaming is not possible.
#[derive(Default)]
pub struct CollectingCallback {
    targets: Mutex<TargetSet>,
}

impl CollectingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_set(self) -> TargetSet {
        self.targets.into_inner()
    }
}

#[async_trait]
impl Callback for CollectingCallback {
    async fn process(&self, partial: Vec<Target>) -> anyhow::Result<()> {
        self.targets.lock().extend(partial);
        Ok(())
    }
}
