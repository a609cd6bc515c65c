// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    persistent_typed       = { true,  true,  true,  true,  NavigationDecision::Permit },
    persistent_idle        = { true,  false, false, false, NavigationDecision::Permit },
    no_warning             = { false, false, true,  true,  NavigationDecision::Permit },
    no_session             = { false, true,  false, true,  NavigationDecision::Permit },
    not_typed              = { false, true,  true,  false, NavigationDecision::Permit },
    typed_in_live_session  = { false, true,  true,  true,  NavigationDecision::Confirm },
)]
fn navigation_decision(
    persistence: bool,
    show_warning: bool,
    active: bool,
    typed: bool,
    expected: NavigationDecision,
) {
    assert_eq!(decide(persistence, show_warning, active, typed), expected);
}

#[test]
fn declining_confirmation_cancels_navigation() {
    assert!(!resolve(NavigationDecision::Confirm, false));
    assert!(resolve(NavigationDecision::Confirm, true));
    assert!(resolve(NavigationDecision::Permit, false));
}

#[test]
fn decision_serializes_lowercase() -> anyhow::Result<()> {
    assert_eq!(serde_json::to_string(&NavigationDecision::Confirm)?, "\"confirm\"");
    Ok(())
}
