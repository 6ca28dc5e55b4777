//! Fleet-wide lifecycle state: the firmware-update machine and the
//! network-map request flow.
//!
//! Owned by the engine instance and mutated only inside its handlers, so
//! check-and-set sequences never span a suspension point.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Firmware update progress across the whole fleet.
///
/// Single-flight: at most one update may be in flight at a time. `Ok` and
/// `Failed` are resting states; the next accepted request is the
/// `{Ok,Failed} -> Idle -> Waiting` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FirmwareUpdateState {
    Idle,
    Waiting,
    Updating,
    Ok,
    Failed,
}

/// Network-map request progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MapRequestState {
    Idle,
    Requested,
    Ready,
}

/// Fixed graph handed to callers while no real snapshot is available.
pub const PLACEHOLDER_GRAPH: &str =
    "digraph G { generating [label=\"Network map is being generated\"]; }";

/// Process-wide lifecycle flags, scoped to one engine instance.
#[derive(Debug)]
pub struct FleetLifecycle {
    firmware_state: FirmwareUpdateState,
    firmware_device: Option<String>,
    firmware_requested_at: Option<DateTime<Utc>>,
    firmware_generation: u64,
    map_state: MapRequestState,
    last_map_request: Option<Instant>,
    map_graph: Option<String>,
}

impl Default for FleetLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetLifecycle {
    pub fn new() -> Self {
        Self {
            firmware_state: FirmwareUpdateState::Idle,
            firmware_device: None,
            firmware_requested_at: None,
            firmware_generation: 0,
            map_state: MapRequestState::Idle,
            last_map_request: None,
            map_graph: None,
        }
    }

    pub fn firmware_state(&self) -> FirmwareUpdateState {
        self.firmware_state
    }

    pub fn firmware_device(&self) -> Option<&str> {
        self.firmware_device.as_deref()
    }

    pub fn firmware_requested_at(&self) -> Option<DateTime<Utc>> {
        self.firmware_requested_at
    }

    pub fn firmware_in_flight(&self) -> bool {
        matches!(
            self.firmware_state,
            FirmwareUpdateState::Waiting | FirmwareUpdateState::Updating
        )
    }

    /// Admit a new firmware update unless one is in flight. Returns the
    /// generation token the stale-lock watchdog must present.
    pub fn begin_firmware_update(&mut self, device_id: &str) -> Option<u64> {
        if self.firmware_in_flight() {
            return None;
        }
        self.firmware_state = FirmwareUpdateState::Waiting;
        self.firmware_device = Some(device_id.to_string());
        self.firmware_requested_at = Some(Utc::now());
        self.firmware_generation += 1;
        Some(self.firmware_generation)
    }

    /// The device started flashing (`update.state == "updating"`).
    pub fn note_updating(&mut self) -> bool {
        if self.firmware_state == FirmwareUpdateState::Waiting {
            self.firmware_state = FirmwareUpdateState::Updating;
            return true;
        }
        false
    }

    /// Terminal signal from the bridge. Releases the single-flight lock and
    /// returns the device that was under update.
    pub fn finish_firmware_update(&mut self, success: bool) -> Option<String> {
        self.firmware_state = if success {
            FirmwareUpdateState::Ok
        } else {
            FirmwareUpdateState::Failed
        };
        self.firmware_device.take()
    }

    /// Stale-lock watchdog: force the machine back to idle when the
    /// generation still matches and no terminal signal arrived. Returns the
    /// abandoned device when the lock was actually released.
    pub fn expire_firmware_watchdog(&mut self, generation: u64) -> Option<String> {
        if generation == self.firmware_generation && self.firmware_in_flight() {
            self.firmware_state = FirmwareUpdateState::Idle;
            self.firmware_requested_at = None;
            return self.firmware_device.take();
        }
        None
    }

    pub fn map_state(&self) -> MapRequestState {
        self.map_state
    }

    /// A new map request is accepted only when none is outstanding and the
    /// cooldown window has elapsed.
    pub fn should_request_map(&self, now: Instant, cooldown: Duration) -> bool {
        if self.map_state == MapRequestState::Requested {
            return false;
        }
        match self.last_map_request {
            Some(last) => now.duration_since(last) >= cooldown,
            None => true,
        }
    }

    pub fn mark_map_requested(&mut self, now: Instant) {
        self.map_state = MapRequestState::Requested;
        self.last_map_request = Some(now);
    }

    pub fn store_map(&mut self, graph: String) {
        self.map_state = MapRequestState::Ready;
        self.map_graph = Some(graph);
    }

    /// The last snapshot when one exists, the placeholder otherwise —
    /// callers always get something renderable, never an error.
    pub fn current_map(&self) -> &str {
        self.map_graph.as_deref().unwrap_or(PLACEHOLDER_GRAPH)
    }
}
