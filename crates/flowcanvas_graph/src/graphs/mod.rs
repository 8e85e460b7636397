// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ready-made type and node registries built on the core framework.

pub mod gameplay;
