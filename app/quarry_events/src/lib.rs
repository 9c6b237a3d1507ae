/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is dual-licensed under either the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree or the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree. You may select, at your option, one of the
 * above-listed licenses.
 */

//! Diagnostics reported during query evaluation.
//!
//! The engine never logs user-visible diagnostics through a global logger;
//! everything goes through an injected [`EventHandler`]. Whether the handler
//! has observed any error-severity event drives the driver's keep-going
//! policy, so handlers also track and reset error state.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub severity: Severity,
    pub message: String,
}

impl Event {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        write!(f, "{}: {}", tag, self.message)
    }
}

/// Sink for evaluation diagnostics. Must be safe to enter concurrently from
/// resolver workers; duplicate warnings are acceptable.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: Event);

    /// Whether any error-severity event was handled since the last reset.
    fn has_errors(&self) -> bool;

    fn reset_errors(&self);
}

/// Retains every event in memory. The standard handler for tests and for
/// callers that render diagnostics after the fact.
#[derive(Default)]
pub struct CollectingEventHandler {
    events: Mutex<Vec<Event>>,
    has_errors: AtomicBool,
}

impl CollectingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity == Severity::Warning)
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity == Severity::Error)
            .map(|e| e.message.clone())
            .collect()
    }
}

impl EventHandler for CollectingEventHandler {
    fn handle(&self, event: Event) {
        if event.severity == Severity::Error {
            self.has_errors.store(true, Ordering::Release);
        }
        self.events.lock().push(event);
    }

    fn has_errors(&self) -> bool {
        self.has_errors.load(Ordering::Acquire)
    }

    fn reset_errors(&self) {
        self.has_errors.store(false, Ordering::Release);
    }
}

/// Forwards events to `tracing`, tracking only the error bit.
#[derive(Default)]
pub struct TracingEventHandler {
    has_errors: AtomicBool,
}

impl TracingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventHandler for TracingEventHandler {
    fn handle(&self, event: Event) {
        match event.severity {
            Severity::Info => tracing::info!("{}", event.message),
            Severity::Warning => tracing::warn!("{}", event.message),
            Severity::Error => {
                self.has_errors.store(true, Ordering::Release);
                tracing::error!("{}", event.message);
            }
        }
    }

    fn has_errors(&self) -> bool {
        self.has_errors.load(Ordering::Acquire)
    }

    fn reset_errors(&self) {
        self.has_errors.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_handler_tracks_errors() {
        let handler = CollectingEventHandler::new();
        assert!(!handler.has_errors());

        handler.handle(Event::warn("just a warning"));
        assert!(!handler.has_errors());

        handler.handle(Event::error("a real error"));
        assert!(handler.has_errors());
        assert_eq!(handler.errors(), vec!["a real error".to_owned()]);

        handler.reset_errors();
        assert!(!handler.has_errors());
        // Events are retained across resets; only the error bit clears.
        assert_eq!(handler.events().len(), 2);
    }
}
