// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A log provider that keeps what it is told.

use captap::provider::LogLevel;
use captap::provider::LogProvider;
use std::sync::Arc;
use std::sync::Mutex;

/// Collects every message. Clones share the same backlog.
#[derive(Clone, Debug, Default)]
pub struct CaptureLog {
    msgs: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl CaptureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.msgs.lock().unwrap().clone()
    }

    /// Is there a message at `level` containing `needle`?
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.msgs
            .lock()
            .unwrap()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl LogProvider for CaptureLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.msgs.lock().unwrap().push((level, msg.to_string()));
    }
}
