// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Whether leaving the terminal view (closing the tab or changing route) is
//! safe, or should ask the user first.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationDecision {
    /// Leave without asking.
    Permit,
    /// Ask the user; stay if they decline.
    Confirm,
}

/// Decide how to handle navigation away from the terminal.
///
/// A persistent session survives the navigation, so it is always permitted.
/// Otherwise the user is only asked when warnings are on and they have typed
/// into a live session.
pub fn decide(
    persistence: bool,
    show_warning: bool,
    has_active_session: bool,
    typed: bool,
) -> NavigationDecision {
    if persistence || !show_warning || !has_active_session || !typed {
        NavigationDecision::Permit
    } else {
        NavigationDecision::Confirm
    }
}

/// Whether navigation proceeds, given the decision and the user's answer to
/// the confirmation prompt (ignored when no prompt is shown).
pub fn resolve(decision: NavigationDecision, user_confirmed: bool) -> bool {
    match decision {
        NavigationDecision::Permit => true,
        NavigationDecision::Confirm => user_confirmed,
    }
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
