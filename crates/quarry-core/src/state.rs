//! # State Controller
//!
//! Decides whether the dispatcher may start new tasks.
//!
//! ```text
//!            work queued            no pause reasons
//!   Idle  ---------------->  Processing  <---------  Paused{reason}
//!         <----------------              --------->
//!            queue empty                 any reason
//! ```
//!
//! Pause reasons are independent of each other and of the queue: the
//! controller is `Paused` while at least one is active, and otherwise
//! `Processing` or `Idle` depending on whether there is work. Mutators only
//! record inputs; `refresh` computes the state and reports a transition.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Delay between tasks while running on battery.
pub const BATTERY_THROTTLE: Duration = Duration::from_millis(50);

/// Why the dispatcher is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PauseReason {
    NotReady,
    LowBattery,
    LowDiskSpace,
    Inhibited,
}

/// Externally visible engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MinerState {
    Idle,
    Processing,
    Paused { reason: PauseReason },
}

/// An application holding the engine paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inhibitor {
    pub cookie: u32,
    pub application: String,
    pub reason: String,
}

/// Pause/resume state machine.
#[derive(Debug)]
pub struct StateController {
    inhibitors: BTreeMap<u32, Inhibitor>,
    next_cookie: u32,
    on_battery: bool,
    low_battery: bool,
    index_on_battery: bool,
    low_disk: bool,
    ready: bool,
    running: bool,
    has_work: bool,
    current: MinerState,
}

impl StateController {
    /// A running controller. With `wait_for_ready` it stays paused until
    /// `set_ready(true)`.
    #[must_use]
    pub fn new(index_on_battery: bool, wait_for_ready: bool) -> Self {
        let mut controller = Self {
            inhibitors: BTreeMap::new(),
            next_cookie: 1,
            on_battery: false,
            low_battery: false,
            index_on_battery,
            low_disk: false,
            ready: !wait_for_ready,
            running: true,
            has_work: false,
            current: MinerState::Idle,
        };
        controller.current = controller.compute();
        controller
    }

    // =========================================================================
    // INPUTS
    // =========================================================================

    /// Hold the engine paused on behalf of an application. Returns the
    /// cookie that releases the hold.
    pub fn inhibit(&mut self, application: &str, reason: &str) -> u32 {
        let cookie = self.next_cookie;
        self.next_cookie = self.next_cookie.wrapping_add(1).max(1);
        self.inhibitors.insert(
            cookie,
            Inhibitor {
                cookie,
                application: application.to_string(),
                reason: reason.to_string(),
            },
        );
        tracing::info!(cookie, application, reason, "Indexing inhibited");
        cookie
    }

    /// Release a hold. Unknown cookies are ignored.
    pub fn uninhibit(&mut self, cookie: u32) -> bool {
        let released = self.inhibitors.remove(&cookie).is_some();
        if released {
            tracing::info!(cookie, "Inhibition released");
        }
        released
    }

    pub fn set_power(&mut self, on_battery: bool, low_battery: bool) {
        self.on_battery = on_battery;
        self.low_battery = low_battery;
    }

    pub fn set_index_on_battery(&mut self, index_on_battery: bool) {
        self.index_on_battery = index_on_battery;
    }

    /// Record whether the volume holding the index is short of space.
    pub fn set_low_disk(&mut self, low_disk: bool) {
        self.low_disk = low_disk;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn set_has_work(&mut self, has_work: bool) {
        self.has_work = has_work;
    }

    // =========================================================================
    // OUTPUTS
    // =========================================================================

    /// Every active pause reason.
    #[must_use]
    pub fn reasons(&self) -> BTreeSet<PauseReason> {
        let mut reasons = BTreeSet::new();
        if !self.ready {
            reasons.insert(PauseReason::NotReady);
        }
        if self.low_battery || (self.on_battery && !self.index_on_battery) {
            reasons.insert(PauseReason::LowBattery);
        }
        if self.low_disk {
            reasons.insert(PauseReason::LowDiskSpace);
        }
        if !self.inhibitors.is_empty() {
            reasons.insert(PauseReason::Inhibited);
        }
        reasons
    }

    #[must_use]
    pub fn inhibitors(&self) -> Vec<Inhibitor> {
        self.inhibitors.values().cloned().collect()
    }

    fn compute(&self) -> MinerState {
        if let Some(reason) = self.reasons().into_iter().next() {
            return MinerState::Paused { reason };
        }
        if self.running && self.has_work {
            MinerState::Processing
        } else {
            MinerState::Idle
        }
    }

    /// The last state reported by `refresh`.
    #[must_use]
    pub fn state(&self) -> MinerState {
        self.current
    }

    /// Recompute the state. Returns it if it changed.
    pub fn refresh(&mut self) -> Option<MinerState> {
        let next = self.compute();
        if next == self.current {
            return None;
        }
        tracing::info!(from = ?self.current, to = ?next, "State changed");
        self.current = next;
        Some(next)
    }

    /// Whether a new task may start now.
    #[must_use]
    pub fn can_dispatch(&self) -> bool {
        self.running && self.reasons().is_empty()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Pause between tasks, if any.
    #[must_use]
    pub fn throttle(&self) -> Option<Duration> {
        (self.on_battery && self.index_on_battery).then_some(BATTERY_THROTTLE)
    }
}

/// Whether `available` out of `total` bytes is at or below `limit` percent.
///
/// A limit of `None` or 0 disables the check, as does an unknown total.
#[must_use]
pub fn disk_space_low(available: u64, total: u64, limit: Option<u8>) -> bool {
    match limit {
        Some(limit) if limit > 0 && total > 0 => {
            u128::from(available) * 100 <= u128::from(limit) * u128::from(total)
        }
        _ => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================
