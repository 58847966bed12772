// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Diagnostics collection for the policy compiler.
//!
//! Every analysis phase reports problems through one [`Diagnostics`]
//! collector that is passed down by mutable reference. Entries keep their
//! emission order, and since all phases iterate their inputs in a fixed
//! order, a given topology always produces the same report. Errors are
//! stored up to [`Options::max_errors`]; further errors are still counted so
//! the final verdict is exact, but their text is dropped.

#![deny(clippy::all)]

use std::fmt::{self, Display};
use thiserror::Error;
use tracing::{info, warn};

/// How severe a finding is. `Info` entries are advisory and never fail a
/// compilation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Compiler options consumed by the analysis phases.
#[derive(Debug, Clone)]
pub struct Options {
    /// Upper bound for stored error messages.
    pub max_errors: usize,
    /// When set, unexpected subnet relations are reported with this
    /// severity; when unset the check is off.
    pub check_subnets: Option<Severity>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_errors: 10,
            check_subnets: None,
        }
    }
}

/// One reported finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub severity: Severity,
    pub message: String,
}

impl Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Accumulates findings across all phases of one compiler run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Entry>,
    error_count: usize,
    warning_count: usize,
    max_errors: usize,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(&Options::default())
    }

    #[must_use]
    pub fn with_options(options: &Options) -> Self {
        Self {
            entries: Vec::new(),
            error_count: 0,
            warning_count: 0,
            max_errors: options.max_errors,
        }
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        if self.error_count <= self.max_errors {
            let message = message.into();
            warn!("error: {message}");
            self.entries.push(Entry {
                severity: Severity::Error,
                message,
            });
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warning_count += 1;
        let message = message.into();
        warn!("warning: {message}");
        self.entries.push(Entry {
            severity: Severity::Warning,
            message,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.entries.push(Entry {
            severity: Severity::Info,
            message: message.into(),
        });
    }

    /// Report with a configurable severity.
    pub fn report(&mut self, severity: Severity, message: impl Into<String>) {
        match severity {
            Severity::Error => self.error(message),
            Severity::Warning => self.warn(message),
            Severity::Info => self.info(message),
        }
    }

    /// Announce the start of a phase.
    pub fn progress(&mut self, message: &str) {
        info!("{message}");
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// True once the stored-error bound has been reached; phases check this
    /// between independent work items to bail out of a hopeless run.
    #[must_use]
    pub fn reached_limit(&self) -> bool {
        self.error_count >= self.max_errors
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.severity == Severity::Error)
            .map(|e| e.message.as_str())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.severity == Severity::Warning)
            .map(|e| e.message.as_str())
    }

    pub fn advisories(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.severity == Severity::Info)
            .map(|e| e.message.as_str())
    }
}

/// The compilation-level failure raised after the analysis phases finish
/// with recorded errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Aborted with {count} error(s)")]
    AbortedByErrors { count: usize },
}
