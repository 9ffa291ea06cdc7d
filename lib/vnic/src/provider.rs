// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers let the engine run in different contexts by plugging in
//! implementations of core services. Today that is only logging: the
//! device binary hands in a `slog` logger, unit tests use
//! [`PrintlnLog`].

use std::fmt;
use std::fmt::Display;

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    #[allow(clippy::print_stdout)]
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Route engine log messages into a `slog` logger.
#[derive(Clone)]
pub struct SlogLog(pub slog::Logger);

impl LogProvider for SlogLog {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => slog::info!(self.0, "{}", msg),
            LogLevel::Warn => slog::warn!(self.0, "{}", msg),
            LogLevel::Error => slog::error!(self.0, "{}", msg),
        }
    }
}

/// Discards everything.
#[derive(Clone, Copy)]
pub struct NullLog;

impl LogProvider for NullLog {
    fn log(&self, _level: LogLevel, _msg: &str) {}
}
