// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The capture engine.
//!
//! Packets enter at a [`tap::Tap`] and are copied into the buffers of
//! each attached [`descriptor::Descriptor`] by the delivery path;
//! consumers drain those buffers through the read/wait subsystem or
//! zero-copy regions, and drive everything else through the control
//! surface, either directly or as serialized commands via [`ioctl`].
pub mod buffer;
pub mod deliver;
pub mod descriptor;
pub mod filter;
pub mod ifnet;
pub mod ioctl;
pub mod packet;
pub mod registry;
pub mod tap;
pub mod wait;
pub mod write;
pub mod zerocopy;

pub use crate::api::Direction;
