//! Kani formal verification harnesses for sifttt-prog.
//!
//! Run with: `cargo kani --tests`
//!
//! These harnesses prove engine-level properties over all byte inputs:
//! - Borrow/repay keep health inside [0, 100]
//! - Auto-repay terminates within its budget and reaches any in-range target
//! - Rejected calls leave the position untouched
//! - Only the recorded owner passes the default authenticator
//!
//! Note: account validation and persistence are NOT modeled.

#![cfg(kani)]

extern crate kani;

use sifttt_prog::engine::{
    EngineError, OwnerOnly, Position, PositionEngine, StepPolicy, HEALTH_FACTOR_MAX,
};
use sifttt_prog::verify::{health_in_range, owner_ok};

// =============================================================================
// Test Fixtures
// =============================================================================

/// Any well-formed position owned by `owner`
fn any_position(owner: [u8; 32]) -> Position {
    let p = Position {
        owner,
        health_factor: kani::any(),
        trigger_health_factor: kani::any(),
        target_health_factor: kani::any(),
        automation_enabled: kani::any(),
        _reserved: [0; 4],
    };
    kani::assume(p.is_well_formed());
    p
}

fn any_policy() -> StepPolicy {
    let borrow: u8 = kani::any();
    let repay: u8 = kani::any();
    kani::assume(borrow >= 1 && borrow <= HEALTH_FACTOR_MAX);
    kani::assume(repay >= 1 && repay <= HEALTH_FACTOR_MAX);
    StepPolicy::new(borrow, repay).unwrap()
}

// =============================================================================
// A. STEP ARITHMETIC
// =============================================================================

/// Prove: borrow never underflows and never raises health
#[kani::proof]
fn proof_borrow_stays_in_range() {
    let owner = [1u8; 32];
    let engine = PositionEngine::new(any_policy(), OwnerOnly);
    let mut p = any_position(owner);
    let before = p.health_factor;

    let after = engine.borrow(&mut p, &owner).unwrap();
    assert!(health_in_range(after));
    assert!(after <= before);
    assert!(p.is_well_formed());
}

/// Prove: repay never exceeds the maximum and never lowers health
#[kani::proof]
fn proof_repay_stays_in_range() {
    let owner = [1u8; 32];
    let engine = PositionEngine::new(any_policy(), OwnerOnly);
    let mut p = any_position(owner);
    let before = p.health_factor;

    let after = engine.repay(&mut p, &owner).unwrap();
    assert!(health_in_range(after));
    assert!(after >= before);
}

// =============================================================================
// B. AUTO-REPAY
// =============================================================================

/// Prove: auto-repay is bounded by its budget and reaches the target once triggered
#[kani::proof]
#[kani::unwind(102)]
fn proof_auto_repay_terminates_at_target() {
    let owner = [1u8; 32];
    let engine = PositionEngine::new(any_policy(), OwnerOnly);
    let mut p = any_position(owner);
    kani::assume(p.automation_enabled());

    let h = p.health_factor;
    let out = engine.auto_repay(&mut p, &owner).unwrap();

    assert!(out.steps <= engine.policy.repair_budget(h));
    assert!(p.health_factor >= h);
    assert!(p.is_well_formed());
    if out.triggered {
        assert!(p.health_factor >= p.target_health_factor);
    } else {
        assert!(p.health_factor == h);
    }
}

/// Prove: auto-repay without automation fails and mutates nothing
#[kani::proof]
fn proof_auto_repay_disabled_no_mutation() {
    let owner = [1u8; 32];
    let engine = PositionEngine::new(StepPolicy::DEFAULT, OwnerOnly);
    let mut p = any_position(owner);
    kani::assume(!p.automation_enabled());
    let before = p;

    assert!(engine.auto_repay(&mut p, &owner) == Err(EngineError::AutomationDisabled));
    assert!(p == before);
}

// =============================================================================
// C. AUTHORIZATION
// =============================================================================

/// Prove: owner_ok is exact key equality
#[kani::proof]
fn proof_owner_ok_exact() {
    let stored: [u8; 32] = kani::any();
    let signer: [u8; 32] = kani::any();
    assert!(owner_ok(stored, signer) == (stored == signer));
}

/// Prove: a non-owner caller is rejected with no state change
#[kani::proof]
fn proof_non_owner_rejected() {
    let owner: [u8; 32] = kani::any();
    let caller: [u8; 32] = kani::any();
    kani::assume(owner != caller);

    let engine = PositionEngine::new(StepPolicy::DEFAULT, OwnerOnly);
    let mut p = any_position(owner);
    let before = p;

    assert!(engine.borrow(&mut p, &caller) == Err(EngineError::Unauthorized));
    assert!(engine.repay(&mut p, &caller) == Err(EngineError::Unauthorized));
    assert!(engine.set_automation(&mut p, &caller, 10, 20) == Err(EngineError::Unauthorized));
    assert!(p == before);
}

/// Prove: set_automation accepts exactly the in-range pairs
#[kani::proof]
fn proof_set_automation_range() {
    let owner = [1u8; 32];
    let engine = PositionEngine::new(StepPolicy::DEFAULT, OwnerOnly);
    let mut p = any_position(owner);
    let trigger: u8 = kani::any();
    let target: u8 = kani::any();

    let res = engine.set_automation(&mut p, &owner, trigger, target);
    if health_in_range(trigger) && health_in_range(target) {
        assert!(res.is_ok());
        assert!(p.automation_enabled());
    } else {
        assert!(res == Err(EngineError::InvalidParameter));
    }
}
