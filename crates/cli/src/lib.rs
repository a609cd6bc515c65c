// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod config;
pub mod error;
pub mod guard;
pub mod host;
pub mod pty;
pub mod ring;
pub mod session;
pub mod test_support;
pub mod transport;
