//! Period-based refresh rate measurement.
//!
//! Accumulates present-to-present vsync distances over a fixed measure
//! period and derives the realised refresh rate from them, either as the
//! rounded average cadence or as the modal one. A confidence gate keeps the
//! calculator quiet while too little of the period was covered by presents.

use std::sync::{Arc, Mutex, Weak};

use log::error;

use crate::clock::now_ns;
use crate::context::EventQueueFacility;
use crate::events::{EventKind, EventToken};
use crate::types::{TimeNs, NSEC_PER_SEC};

/// Reported while no confident measurement exists.
pub const INVALID_REFRESH_RATE: i32 = -1;

/// Receives the measured refresh rate in Hz, or [`INVALID_REFRESH_RATE`].
pub type RefreshRateChangeListener = Arc<dyn Fn(i32) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodCalculatorKind {
    /// Rate of the rounded average present cadence.
    Average,
    /// Rate of the most populated vsync bucket.
    Major,
}

#[derive(Debug, Clone, Copy)]
pub struct PeriodRefreshRateCalculatorParams {
    pub kind: PeriodCalculatorKind,
    pub measure_period_ns: TimeNs,
    /// Minimum percentage of the measure period that must be covered by
    /// presents before a rate is reported.
    pub confidence_percentage: i32,
    /// Invoke the listener on every measurement, not only on changes.
    pub always_callback: bool,
}

impl Default for PeriodRefreshRateCalculatorParams {
    fn default() -> Self {
        PeriodRefreshRateCalculatorParams {
            kind: PeriodCalculatorKind::Average,
            measure_period_ns: 500_000_000,
            confidence_percentage: 50,
            always_callback: false,
        }
    }
}

struct CalcShared {
    te_frequency: i32,
    te_interval_ns: TimeNs,
    /// Vsync distance -> number of presents observed at that distance.
    statistics: std::collections::BTreeMap<i32, u64>,
    last_present_time_ns: Option<TimeNs>,
    last_refresh_rate: i32,
    listener: Option<RefreshRateChangeListener>,
    token: Option<EventToken>,
}

pub struct PeriodRefreshRateCalculator {
    facility: Arc<dyn EventQueueFacility>,
    params: PeriodRefreshRateCalculatorParams,
    shared: Mutex<CalcShared>,
}

impl PeriodRefreshRateCalculator {
    pub fn new(
        facility: Arc<dyn EventQueueFacility>,
        te_frequency: i32,
        params: PeriodRefreshRateCalculatorParams,
    ) -> Arc<Self> {
        let calculator = Arc::new(PeriodRefreshRateCalculator {
            facility,
            params,
            shared: Mutex::new(CalcShared {
                te_frequency: te_frequency.max(1),
                te_interval_ns: NSEC_PER_SEC / te_frequency.max(1) as TimeNs,
                statistics: std::collections::BTreeMap::new(),
                last_present_time_ns: None,
                last_refresh_rate: INVALID_REFRESH_RATE,
                listener: None,
                token: None,
            }),
        });

        let weak: Weak<PeriodRefreshRateCalculator> = Arc::downgrade(&calculator);
        let token = calculator.facility.register_handler(Box::new(move |kind| {
            if let Some(calculator) = weak.upgrade() {
                if kind == EventKind::RefreshRateMeasure {
                    calculator.on_measure();
                }
            }
        }));
        calculator.shared.lock().unwrap().token = Some(token);
        calculator.facility.post_event(
            token,
            EventKind::RefreshRateMeasure,
            now_ns() + params.measure_period_ns,
        );
        calculator
    }

    pub fn register_refresh_rate_change_callback(&self, listener: RefreshRateChangeListener) {
        self.shared.lock().unwrap().listener = Some(listener);
    }

    /// Last measured refresh rate, or [`INVALID_REFRESH_RATE`].
    pub fn refresh_rate(&self) -> i32 {
        self.shared.lock().unwrap().last_refresh_rate
    }

    /// Point the vsync basis at a new TE frequency. Clears accumulation.
    pub fn set_te_frequency(&self, te_frequency: i32) {
        if te_frequency <= 0 {
            error!("rejecting non-positive te frequency {te_frequency}");
            return;
        }
        let mut shared = self.shared.lock().unwrap();
        shared.te_frequency = te_frequency;
        shared.te_interval_ns = NSEC_PER_SEC / te_frequency as TimeNs;
        shared.statistics.clear();
        shared.last_present_time_ns = None;
    }

    /// Account one present into the running measure window.
    pub fn on_present(&self, present_time_ns: TimeNs, _flag: i32) {
        let mut shared = self.shared.lock().unwrap();
        let delta = match shared.last_present_time_ns {
            None => {
                shared.last_present_time_ns = Some(present_time_ns);
                return;
            }
            Some(last) => present_time_ns - last,
        };
        shared.last_present_time_ns = Some(present_time_ns);
        if delta <= 0 || delta > self.params.measure_period_ns {
            return;
        }
        let num_vsync = (((delta + shared.te_interval_ns / 2) / shared.te_interval_ns) as i32)
            .clamp(1, shared.te_frequency);
        *shared.statistics.entry(num_vsync).or_insert(0) += 1;
    }

    /// Drop all accumulation and report invalid until re-measured.
    pub fn reset(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.statistics.clear();
        shared.last_present_time_ns = None;
        shared.last_refresh_rate = INVALID_REFRESH_RATE;
    }

    /// Periodic measurement: derive the rate from the accumulated buckets,
    /// notify the listener, clear the window and re-arm.
    fn on_measure(&self) {
        let (rate, changed, listener, token) = {
            let mut shared = self.shared.lock().unwrap();
            let rate = Self::compute_rate(&shared, &self.params);
            let changed = rate != shared.last_refresh_rate;
            shared.last_refresh_rate = rate;
            shared.statistics.clear();
            let listener = shared.listener.as_ref().map(Arc::clone);
            (rate, changed, listener, shared.token)
        };

        if changed || self.params.always_callback {
            if let Some(listener) = listener {
                listener(rate);
            }
        }

        match token {
            Some(token) => self.facility.post_event(
                token,
                EventKind::RefreshRateMeasure,
                now_ns() + self.params.measure_period_ns,
            ),
            None => error!("refresh rate measurement fired before registration completed"),
        }
    }

    fn compute_rate(shared: &CalcShared, params: &PeriodRefreshRateCalculatorParams) -> i32 {
        let total_presents: u64 = shared.statistics.values().sum();
        let total_vsyncs: u64 = shared
            .statistics
            .iter()
            .map(|(num_vsync, count)| *num_vsync as u64 * count)
            .sum();
        if total_presents == 0 {
            return INVALID_REFRESH_RATE;
        }

        // Confidence: fraction of the period's vsyncs covered by presents.
        let vsyncs_per_period =
            shared.te_frequency as i64 * params.measure_period_ns / NSEC_PER_SEC;
        if vsyncs_per_period <= 0 {
            return INVALID_REFRESH_RATE;
        }
        let confidence = total_vsyncs as i64 * 100 / vsyncs_per_period;
        if confidence < params.confidence_percentage as i64 {
            return INVALID_REFRESH_RATE;
        }

        let cadence = match params.kind {
            PeriodCalculatorKind::Average => {
                ((total_vsyncs + total_presents / 2) / total_presents) as i32
            }
            PeriodCalculatorKind::Major => shared
                .statistics
                .iter()
                .max_by_key(|(_, count)| **count)
                .map(|(num_vsync, _)| *num_vsync)
                .unwrap_or(1),
        };
        shared.te_frequency / cadence.max(1)
    }
}
