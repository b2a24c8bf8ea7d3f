//! Domain types for panel configuration and present statistics.
//!
//! Newtypes for identifiers prevent silent type confusion; type aliases for
//! quantities (nanosecond timestamps) provide self-documenting code without
//! the boilerplate of arithmetic trait impls.
//!
//! The statistics key types implement *off-equivalence*: every display status
//! whose panel is off (power off or doze-suspend) belongs to a single
//! equivalence class, so samples taken while the panel is dark coalesce into
//! one bucket regardless of configuration or brightness.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Monotonic time in nanoseconds.
pub type TimeNs = i64;

pub const NSEC_PER_SEC: TimeNs = 1_000_000_000;

/// Handle of one VRR display configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ConfigId(pub u32);

impl ConfigId {
    /// Sentinel for "no configuration selected yet".
    pub const INVALID: ConfigId = ConfigId(u32::MAX);
}

/// Panel power mode as reported by the display pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum PowerMode {
    Off,
    Doze,
    Normal,
    DozeSuspend,
}

impl PowerMode {
    /// True for the modes where the panel is not emitting frames.
    pub fn is_off(self) -> bool {
        matches!(self, PowerMode::Off | PowerMode::DozeSuspend)
    }
}

/// Panel brightness tier. `Invalid` is the not-yet-known sentinel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum BrightnessMode {
    Low,
    Normal,
    High,
    Invalid,
}

/// The intrinsic part of the statistics key: what the panel is configured to
/// do right now.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DisplayStatus {
    pub active_config_id: ConfigId,
    pub power_mode: PowerMode,
    pub brightness_mode: BrightnessMode,
}

impl DisplayStatus {
    pub fn is_off(&self) -> bool {
        self.power_mode.is_off()
    }
}

impl Default for DisplayStatus {
    fn default() -> Self {
        DisplayStatus {
            active_config_id: ConfigId::INVALID,
            power_mode: PowerMode::Off,
            brightness_mode: BrightnessMode::Invalid,
        }
    }
}

impl PartialEq for DisplayStatus {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DisplayStatus {}

impl Ord for DisplayStatus {
    /// Total order with the off class collapsed: all off statuses compare
    /// equal to each other and below every powered-on status; powered-on
    /// statuses order lexicographically on (power mode, config, brightness).
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_off(), other.is_off()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => (self.power_mode, self.active_config_id, self.brightness_mode)
                .cmp(&(other.power_mode, other.active_config_id, other.brightness_mode)),
        }
    }
}

impl PartialOrd for DisplayStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The full statistics key: display status plus the observed present interval
/// expressed as a vsync count at the active TE frequency.
///
/// `num_vsync == -1` means "not yet measured". Off-equivalence propagates:
/// two off profiles are equal no matter their vsync counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DisplayPresentProfile {
    pub display_status: DisplayStatus,
    pub num_vsync: i32,
}

impl DisplayPresentProfile {
    pub fn is_off(&self) -> bool {
        self.display_status.is_off()
    }
}

impl Default for DisplayPresentProfile {
    fn default() -> Self {
        DisplayPresentProfile {
            display_status: DisplayStatus::default(),
            num_vsync: -1,
        }
    }
}

impl PartialEq for DisplayPresentProfile {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DisplayPresentProfile {}

impl Ord for DisplayPresentProfile {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.is_off() && other.is_off() {
            return Ordering::Equal;
        }
        self.display_status
            .cmp(&other.display_status)
            .then_with(|| self.num_vsync.cmp(&other.num_vsync))
    }
}

impl PartialOrd for DisplayPresentProfile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The statistics value: how many presents landed under a key and when the
/// latest one happened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPresentRecord {
    pub count: u64,
    pub last_timestamp_ns: TimeNs,
    pub updated: bool,
}

impl std::ops::AddAssign for DisplayPresentRecord {
    /// Merge: counts add, timestamps max, updated flags OR.
    fn add_assign(&mut self, rhs: Self) {
        self.count += rhs.count;
        self.last_timestamp_ns = self.last_timestamp_ns.max(rhs.last_timestamp_ns);
        self.updated |= rhs.updated;
    }
}

/// Snapshot type handed to telemetry consumers.
pub type DisplayPresentStatistics = BTreeMap<DisplayPresentProfile, DisplayPresentRecord>;

/// Grace period between the last present and hibernation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyExpectedPresentConfig {
    pub timeout_ns: TimeNs,
}

/// Per-configuration VRR parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrrConfig {
    pub min_frame_interval_ns: TimeNs,
    pub notify_expected_present_config: NotifyExpectedPresentConfig,
}

/// A present the compositor has announced or delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedPresent {
    pub config: ConfigId,
    pub time_ns: TimeNs,
    pub frame_interval_ns: TimeNs,
}
