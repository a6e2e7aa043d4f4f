//! Health-factor engine for a single borrow/collateral position.
//!
//! The engine is a pure state machine over one [`Position`]:
//! 1. Health factor stays inside [0, 100] after every transition
//! 2. Borrow and repay move health by fixed policy steps, clamped at the bounds
//! 3. Automated repair is bounded by a budget derived from the repay step
//! 4. Errors are returned before any field is written
//!
//! Signature checks, persistence and account allocation belong to the wrapper.
//! Caller identity reaches the engine as raw 32-byte keys and is judged by an
//! injected [`Authenticator`].

use bytemuck::{Pod, Zeroable};

use crate::verify;

// ============================================================================
// Constants
// ============================================================================

/// Fully healthy position
pub const HEALTH_FACTOR_MAX: u8 = 100;

/// Maximally unhealthy position
pub const HEALTH_FACTOR_MIN: u8 = 0;

/// Health factor removed by one borrow
pub const BORROW_STEP: u8 = 10;

/// Health factor restored by one repay
pub const REPAY_STEP: u8 = 5;

// ============================================================================
// Errors
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// Caller rejected by the authenticator
    Unauthorized,

    /// Health value or policy step outside its allowed range
    InvalidParameter,

    /// Auto-repay requested before automation was configured
    AutomationDisabled,
}

pub type Result<T> = core::result::Result<T, EngineError>;

// ============================================================================
// Core Data Structures
// ============================================================================

/// Persisted position. Every field is a byte (or byte array) so the struct has
/// alignment 1 and can be copied in and out of any account buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct Position {
    /// Owner pubkey (32 bytes, signature checks done by wrapper)
    pub owner: [u8; 32],

    /// Current health, 100 = fully healthy
    pub health_factor: u8,

    /// Automation may fire at or below this health
    pub trigger_health_factor: u8,

    /// Health level automation restores to
    pub target_health_factor: u8,

    /// 0 = disabled, 1 = enabled
    pub automation_enabled: u8,

    pub _reserved: [u8; 4],
}

impl Position {
    /// Fresh position: fully healthy, automation inert.
    pub fn new(owner: [u8; 32]) -> Self {
        Self {
            owner,
            health_factor: HEALTH_FACTOR_MAX,
            trigger_health_factor: 0,
            target_health_factor: 0,
            automation_enabled: 0,
            _reserved: [0; 4],
        }
    }

    pub fn automation_enabled(&self) -> bool {
        self.automation_enabled == 1
    }

    /// All health fields in range and the automation flag is a clean boolean.
    /// Records failing this were not written by the engine.
    pub fn is_well_formed(&self) -> bool {
        verify::health_in_range(self.health_factor)
            && verify::health_in_range(self.trigger_health_factor)
            && verify::health_in_range(self.target_health_factor)
            && self.automation_enabled <= 1
    }

    /// Automation is on and health has fallen to the trigger.
    pub fn needs_repair(&self) -> bool {
        self.automation_enabled() && self.health_factor <= self.trigger_health_factor
    }
}

/// Outcome of an auto-repay call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Whether health was at or below the trigger
    pub triggered: bool,
    /// Repay steps applied
    pub steps: u8,
    pub health_before: u8,
    pub health_after: u8,
}

// ============================================================================
// Step Policy
// ============================================================================

/// Fixed-size health adjustments applied by borrow and repay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepPolicy {
    pub borrow_step: u8,
    pub repay_step: u8,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl StepPolicy {
    pub const DEFAULT: Self = Self {
        borrow_step: BORROW_STEP,
        repay_step: REPAY_STEP,
    };

    /// Build a policy with custom steps. Each step must be in 1..=100; a zero
    /// repay step would give the repair loop no way to make progress.
    pub fn new(borrow_step: u8, repay_step: u8) -> Result<Self> {
        if !valid_step(borrow_step) || !valid_step(repay_step) {
            return Err(EngineError::InvalidParameter);
        }
        Ok(Self {
            borrow_step,
            repay_step,
        })
    }

    /// Health after one borrow, clamped at 0.
    #[inline]
    pub fn after_borrow(&self, health: u8) -> u8 {
        health.saturating_sub(self.borrow_step)
    }

    /// Health after one repay, clamped at 100.
    #[inline]
    pub fn after_repay(&self, health: u8) -> u8 {
        core::cmp::min(HEALTH_FACTOR_MAX, health.saturating_add(self.repay_step))
    }

    /// Maximum repair iterations starting from `health`:
    /// ceil((100 - health) / repay_step). Zero once fully healthy.
    pub fn repair_budget(&self, health: u8) -> u8 {
        if self.repay_step == 0 {
            return 0;
        }
        let gap = HEALTH_FACTOR_MAX.saturating_sub(health) as u16;
        let step = self.repay_step as u16;
        ((gap + step - 1) / step) as u8
    }
}

fn valid_step(step: u8) -> bool {
    step > 0 && step <= HEALTH_FACTOR_MAX
}

// ============================================================================
// Authentication
// ============================================================================

/// Decides whether `caller` may mutate `position`.
///
/// The wrapper has already verified that `caller` signed the transaction; the
/// authenticator only binds that identity to the record.
pub trait Authenticator {
    fn authenticate(&self, position: &Position, caller: &[u8; 32]) -> bool;
}

/// Only the recorded owner may operate on the position.
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnerOnly;

impl Authenticator for OwnerOnly {
    fn authenticate(&self, position: &Position, caller: &[u8; 32]) -> bool {
        verify::owner_ok(position.owner, *caller)
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct PositionEngine<A> {
    pub policy: StepPolicy,
    pub authenticator: A,
}

impl<A> PositionEngine<A> {
    pub const fn new(policy: StepPolicy, authenticator: A) -> Self {
        Self {
            policy,
            authenticator,
        }
    }
}

impl<A: Authenticator> PositionEngine<A> {
    /// Create the position for `owner`. Detecting an already-initialized record
    /// is the wrapper's job since only it can see the stored header.
    pub fn initialize(&self, owner: [u8; 32]) -> Position {
        Position::new(owner)
    }

    pub fn authorize(&self, position: &Position, caller: &[u8; 32]) -> Result<()> {
        if !self.authenticator.authenticate(position, caller) {
            return Err(EngineError::Unauthorized);
        }
        Ok(())
    }

    /// Store trigger and target verbatim and enable automation.
    ///
    /// A target at or below the trigger is accepted; auto-repay treats it as
    /// already satisfied.
    pub fn set_automation(
        &self,
        position: &mut Position,
        caller: &[u8; 32],
        trigger_health_factor: u8,
        target_health_factor: u8,
    ) -> Result<()> {
        self.authorize(position, caller)?;
        if !verify::health_in_range(trigger_health_factor)
            || !verify::health_in_range(target_health_factor)
        {
            return Err(EngineError::InvalidParameter);
        }

        position.trigger_health_factor = trigger_health_factor;
        position.target_health_factor = target_health_factor;
        position.automation_enabled = 1;
        Ok(())
    }

    /// Apply one borrow step. Returns the new health factor.
    pub fn borrow(&self, position: &mut Position, caller: &[u8; 32]) -> Result<u8> {
        self.authorize(position, caller)?;
        position.health_factor = self.policy.after_borrow(position.health_factor);
        Ok(position.health_factor)
    }

    /// Apply one repay step. Returns the new health factor.
    pub fn repay(&self, position: &mut Position, caller: &[u8; 32]) -> Result<u8> {
        self.authorize(position, caller)?;
        position.health_factor = self.policy.after_repay(position.health_factor);
        Ok(position.health_factor)
    }

    /// Repay until health reaches the target, if health is at or below the trigger.
    ///
    /// The loop runs at most `repair_budget(health)` times, which is enough to
    /// reach 100 from the starting health, so any in-range target is reached.
    pub fn auto_repay(&self, position: &mut Position, caller: &[u8; 32]) -> Result<RepairOutcome> {
        self.authorize(position, caller)?;
        if !position.automation_enabled() {
            return Err(EngineError::AutomationDisabled);
        }

        let health_before = position.health_factor;
        if health_before > position.trigger_health_factor {
            return Ok(RepairOutcome {
                triggered: false,
                steps: 0,
                health_before,
                health_after: health_before,
            });
        }

        let budget = self.policy.repair_budget(health_before);
        let mut health = health_before;
        let mut steps = 0u8;
        for _ in 0..budget {
            if health >= position.target_health_factor {
                break;
            }
            health = self.policy.after_repay(health);
            steps += 1;
        }

        position.health_factor = health;
        Ok(RepairOutcome {
            triggered: true,
            steps,
            health_before,
            health_after: health,
        })
    }
}

impl Default for PositionEngine<OwnerOnly> {
    fn default() -> Self {
        Self::new(StepPolicy::DEFAULT, OwnerOnly)
    }
}

// ============================================================================
// Tests
// ============================================================================
