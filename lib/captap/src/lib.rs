// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet-capture tap core.
//!
//! A network interface registers one [`engine::tap::Tap`] per link
//! type it can present. Every packet the interface sends or receives
//! is handed to its taps, which fan it out to the attached capture
//! [`engine::descriptor::Descriptor`]s. Each descriptor filters,
//! timestamps, and buffers its copy independently of the others, and
//! its consumer drains it via blocking reads, readiness polling, or
//! zero-copy buffer hand-off.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

// This is needed so that the kstat-macro (`#[derive(KStatProvider)]`)
// can use fully-qualified type paths.
extern crate self as captap;

pub use captap_api as api;

pub mod ddi;
pub mod engine;
pub mod print;
pub mod provider;

use engine::filter::FilterEngine;
use provider::ClockProvider;
use provider::LogProvider;

/// The services the engine calls out to.
pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
    pub clock: Box<dyn ClockProvider>,
    pub filter: Box<dyn FilterEngine>,
}
