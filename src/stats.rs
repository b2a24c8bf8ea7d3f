//! Present statistics aggregator.
//!
//! Tallies observed present intervals under `(display status, vsync count)`
//! keys so power and performance tooling can reason about the realised
//! refresh rate. A periodic update event keeps the cached display status in
//! sync with the display context even when no presents arrive, e.g. across a
//! power transition.

use std::sync::{Arc, Mutex, Weak};

use log::{error, warn};

use crate::clock::now_ns;
use crate::context::{DisplayContextProvider, EventQueueFacility, PowerModeListener};
use crate::events::{EventKind, EventToken};
use crate::types::{
    ConfigId, DisplayPresentProfile, DisplayPresentRecord, DisplayPresentStatistics, PowerMode,
    TimeNs, NSEC_PER_SEC,
};

/// Present intervals longer than this reset the timing instead of producing a
/// sample.
const MAX_PRESENT_INTERVAL_NS: TimeNs = NSEC_PER_SEC;

/// Expected present cadence while the panel dozes.
pub const FRAME_RATE_WHEN_PRESENT_AT_LP_MODE: i32 = 30;

/// Read access to the accumulated statistics.
pub trait StatisticsProvider: Send + Sync {
    /// Snapshot of the whole map.
    fn statistics(&self) -> DisplayPresentStatistics;

    /// Snapshot restricted to entries touched since the previous call; clears
    /// every entry's `updated` flag.
    fn updated_statistics(&self) -> DisplayPresentStatistics;
}

struct StatsShared {
    te_frequency: i32,
    te_interval_ns: TimeNs,
    last_present_time_ns: Option<TimeNs>,
    profile: DisplayPresentProfile,
    statistics: DisplayPresentStatistics,
    token: Option<EventToken>,
}

pub struct VrrStatistics {
    display: Arc<dyn DisplayContextProvider>,
    facility: Arc<dyn EventQueueFacility>,
    max_te_frequency: i32,
    min_frame_interval_ns: TimeNs,
    update_period_ns: TimeNs,
    shared: Mutex<StatsShared>,
}

impl VrrStatistics {
    pub fn new(
        display: Arc<dyn DisplayContextProvider>,
        facility: Arc<dyn EventQueueFacility>,
        max_frame_rate: i32,
        max_te_frequency: i32,
        update_period_ns: TimeNs,
    ) -> Arc<Self> {
        let profile = DisplayPresentProfile {
            display_status: crate::types::DisplayStatus {
                active_config_id: display.active_config_id(),
                power_mode: display.power_mode(),
                brightness_mode: display.brightness_mode(),
            },
            num_vsync: -1,
        };
        let stats = Arc::new(VrrStatistics {
            display,
            facility,
            max_te_frequency,
            min_frame_interval_ns: NSEC_PER_SEC / max_frame_rate.max(1) as TimeNs,
            update_period_ns,
            shared: Mutex::new(StatsShared {
                te_frequency: max_te_frequency,
                te_interval_ns: NSEC_PER_SEC / max_te_frequency.max(1) as TimeNs,
                last_present_time_ns: None,
                profile,
                statistics: DisplayPresentStatistics::new(),
                token: None,
            }),
        });

        let weak: Weak<VrrStatistics> = Arc::downgrade(&stats);
        let token = stats.facility.register_handler(Box::new(move |kind| {
            if let Some(stats) = weak.upgrade() {
                if kind == EventKind::StatisticsUpdate {
                    stats.update();
                }
            }
        }));
        stats.shared.lock().unwrap().token = Some(token);
        stats
            .facility
            .post_event(token, EventKind::StatisticsUpdate, now_ns() + update_period_ns);
        stats
    }

    /// Point bucket computation at a new configuration and TE frequency.
    pub fn set_active_vrr_configuration(&self, config_id: ConfigId, te_frequency: i32) {
        if te_frequency <= 0 || te_frequency > self.max_te_frequency {
            error!("rejecting te frequency {te_frequency} outside (0, {}]", self.max_te_frequency);
            return;
        }
        let mut shared = self.shared.lock().unwrap();
        shared.profile.display_status.active_config_id = config_id;
        shared.te_frequency = te_frequency;
        shared.te_interval_ns = NSEC_PER_SEC / te_frequency as TimeNs;
    }

    /// Account one present. The first present after construction, a reset, or
    /// a >1 s gap only restarts the timing; every other present lands in the
    /// bucket for its vsync-rounded distance from the previous one.
    pub fn on_present(&self, present_time_ns: TimeNs, _flag: i32) {
        let mut shared = self.shared.lock().unwrap();
        let delta = match shared.last_present_time_ns {
            None => {
                shared.last_present_time_ns = Some(present_time_ns);
                return;
            }
            Some(last) => present_time_ns - last,
        };
        if delta > MAX_PRESENT_INTERVAL_NS {
            shared.last_present_time_ns = Some(present_time_ns);
            return;
        }

        let cadence = if shared.profile.display_status.power_mode == PowerMode::Doze {
            // Dozing panels refresh at the low-power cadence; attribute the
            // sample to that bucket directly.
            shared.te_frequency / FRAME_RATE_WHEN_PRESENT_AT_LP_MODE
        } else {
            ((delta + shared.te_interval_ns / 2) / shared.te_interval_ns) as i32
        };
        let num_vsync = cadence.clamp(1, shared.te_frequency);

        let key = DisplayPresentProfile {
            display_status: shared.profile.display_status,
            num_vsync,
        };
        let record = DisplayPresentRecord {
            count: 1,
            last_timestamp_ns: present_time_ns,
            updated: true,
        };
        *shared.statistics.entry(key).or_default() += record;
        shared.last_present_time_ns = Some(present_time_ns);
    }

    /// Minimum frame interval derived from the construction-time maximum
    /// frame rate.
    pub fn min_frame_interval_ns(&self) -> TimeNs {
        self.min_frame_interval_ns
    }

    /// Periodic sweep: refresh the cached display status from the context
    /// provider and re-arm the update event.
    fn update(&self) {
        let token = {
            let mut shared = self.shared.lock().unwrap();
            shared.profile.display_status.power_mode = self.display.power_mode();
            shared.profile.display_status.brightness_mode = self.display.brightness_mode();
            shared.profile.display_status.active_config_id = self.display.active_config_id();
            shared.token
        };
        match token {
            Some(token) => self.facility.post_event(
                token,
                EventKind::StatisticsUpdate,
                now_ns() + self.update_period_ns,
            ),
            None => error!("statistics update fired before registration completed"),
        }
    }
}

impl StatisticsProvider for VrrStatistics {
    fn statistics(&self) -> DisplayPresentStatistics {
        self.shared.lock().unwrap().statistics.clone()
    }

    fn updated_statistics(&self) -> DisplayPresentStatistics {
        let mut shared = self.shared.lock().unwrap();
        let mut out = DisplayPresentStatistics::new();
        for (profile, record) in shared.statistics.iter_mut() {
            if record.updated {
                out.insert(*profile, *record);
                record.updated = false;
            }
        }
        out
    }
}

impl PowerModeListener for VrrStatistics {
    fn on_power_state_change(&self, from: PowerMode, to: PowerMode) {
        let mut shared = self.shared.lock().unwrap();
        if shared.profile.display_status.power_mode != from {
            warn!(
                "power transition from {from:?} but cached mode is {:?}",
                shared.profile.display_status.power_mode
            );
        }
        shared.profile.display_status.power_mode = to;
    }
}
