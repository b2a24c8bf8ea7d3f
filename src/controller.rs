//! VRR controller: panel self-refresh state machine.
//!
//! The controller consumes present notifications and expected-present hints
//! from the compositor and decides what the panel does between frames: keep
//! rendering at the producer's cadence, insert synthetic keep-alive frames,
//! or hibernate. A dedicated worker drains the timed event queue and
//! dispatches on (state, event kind); every compositor-facing entry point
//! mutates under the controller mutex and signals the worker, so an event
//! posted earlier than the currently-awaited deadline always preempts the
//! wait.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::clock::now_ns;
use crate::context::DisplayContextProvider;
use crate::events::{EventKind, EventQueue};
use crate::node::{FileNodeWriter, PanelCommandWriter, PANEL_REFRESH_CTRL_FI, REFRESH_CTRL_NODE};
use crate::types::{ConfigId, ExpectedPresent, TimeNs, VrrConfig, NSEC_PER_SEC};

/// Keep-alive period while hibernated.
pub const DEFAULT_WAKE_UP_TIME_IN_POWER_SAVING_NS: TimeNs = NSEC_PER_SEC;

/// Frames inserted in one burst on hibernation entry.
const FRAMES_TO_INSERT_ON_HIBERNATE: u32 = 2;

/// Recent presents kept for diagnostics.
const PRESENT_HISTORY_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrrState {
    Disable,
    Rendering,
    Hibernate,
}

impl VrrState {
    pub fn name(self) -> &'static str {
        match self {
            VrrState::Disable => "Disable",
            VrrState::Rendering => "Rendering",
            VrrState::Hibernate => "Hibernate",
        }
    }
}

/// Present bookkeeping: the descriptor pending for the next `on_present`, the
/// hint from the last `notify_expected_present`, and a ring of recent
/// presents.
#[derive(Debug, Default)]
struct PresentRecords {
    pending_present: Option<ExpectedPresent>,
    next_expected_present: Option<ExpectedPresent>,
    present_history: VecDeque<ExpectedPresent>,
}

impl PresentRecords {
    fn clear(&mut self) {
        self.pending_present = None;
        self.next_expected_present = None;
        self.present_history.clear();
    }

    fn push_history(&mut self, present: ExpectedPresent) {
        if self.present_history.len() == PRESENT_HISTORY_CAPACITY {
            self.present_history.pop_front();
        }
        self.present_history.push_back(present);
    }
}

struct ControllerShared {
    state: VrrState,
    enabled: bool,
    exit: bool,
    configs: BTreeMap<ConfigId, VrrConfig>,
    active_config: Option<ConfigId>,
    pending_frames_to_insert: u32,
    records: PresentRecords,
    queue: EventQueue,
}

struct ControllerInner {
    shared: Mutex<ControllerShared>,
    cond: Condvar,
    writer: Option<Arc<dyn PanelCommandWriter>>,
}

pub struct VrrController {
    inner: Arc<ControllerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VrrController {
    /// Build a controller for the given display, resolving the panel control
    /// node path from the display context.
    pub fn new(display: &dyn DisplayContextProvider) -> Self {
        let path = display.panel_file_node_path();
        let writer: Option<Arc<dyn PanelCommandWriter>> = if path.is_empty() {
            warn!("display has no panel file node; frame insertion is unavailable");
            None
        } else {
            Some(Arc::new(FileNodeWriter::new(path)))
        };
        Self::with_writer(writer)
    }

    /// Build a controller around an explicit panel command writer.
    pub fn with_writer(writer: Option<Arc<dyn PanelCommandWriter>>) -> Self {
        let inner = Arc::new(ControllerInner {
            shared: Mutex::new(ControllerShared {
                state: VrrState::Disable,
                enabled: false,
                exit: false,
                configs: BTreeMap::new(),
                active_config: None,
                pending_frames_to_insert: 0,
                records: PresentRecords::default(),
                queue: EventQueue::new(),
            }),
            cond: Condvar::new(),
            writer,
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("vrr-ctrl".into())
            .spawn(move || Self::worker_body(worker_inner))
            .ok();
        if worker.is_none() {
            error!("failed to spawn vrr control worker; timed events will not fire");
        }

        VrrController {
            inner,
            worker: Mutex::new(worker),
        }
    }

    /// Replace the whole per-config parameter table.
    pub fn set_vrr_configurations(&self, configs: BTreeMap<ConfigId, VrrConfig>) {
        let mut shared = self.inner.shared.lock().unwrap();
        shared.configs = configs;
    }

    /// Activate a configuration: enter `Rendering` and arm a fresh rendering
    /// timeout. Unknown ids are ignored with a diagnostic.
    pub fn set_active_vrr_configuration(&self, config: ConfigId) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            let Some(cfg) = shared.configs.get(&config).copied() else {
                error!("attempt to activate undefined vrr configuration {config:?}");
                return;
            };
            shared.state = VrrState::Rendering;
            shared.active_config = Some(config);
            shared.queue.drop_by_kind(EventKind::RenderingTimeout);
            shared.queue.post(
                EventKind::RenderingTimeout,
                now_ns() + cfg.notify_expected_present_config.timeout_ns,
            );
        }
        self.inner.cond.notify_all();
    }

    /// Toggle worker dispatch. Disabling drops every queued event. Always
    /// wakes the worker.
    pub fn set_enable(&self, enabled: bool) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.enabled = enabled;
            if !enabled {
                shared.queue.drop_all();
            }
        }
        self.inner.cond.notify_all();
    }

    /// Record the compositor's hint about the next present and schedule its
    /// handling.
    pub fn notify_expected_present(&self, timestamp_ns: TimeNs, frame_interval_ns: TimeNs) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            let config = shared.active_config.unwrap_or(ConfigId::INVALID);
            shared.records.next_expected_present = Some(ExpectedPresent {
                config,
                time_ns: timestamp_ns,
                frame_interval_ns,
            });
            shared
                .queue
                .post(EventKind::NotifyExpectedPresentConfig, now_ns());
        }
        self.inner.cond.notify_all();
    }

    /// Store the present descriptor to be consumed by the next `on_present`.
    pub fn set_expected_present_time(&self, timestamp_ns: TimeNs, frame_interval_ns: TimeNs) {
        let mut shared = self.inner.shared.lock().unwrap();
        let config = shared.active_config.unwrap_or(ConfigId::INVALID);
        shared.records.pending_present = Some(ExpectedPresent {
            config,
            time_ns: timestamp_ns,
            frame_interval_ns,
        });
    }

    /// The compositor presented a frame. Leaves hibernation if needed and
    /// re-arms the rendering timeout.
    pub fn on_present(&self) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            match shared.records.pending_present.take() {
                None => {
                    warn!("present without a pending expected-present descriptor");
                    return;
                }
                Some(present) => {
                    info!(
                        "present: time = {} ns, frame interval = {} ns",
                        present.time_ns, present.frame_interval_ns
                    );
                    shared.records.push_history(present);
                }
            }
            if shared.state == VrrState::Hibernate {
                warn!("present during hibernation without prior expected-present notification");
                shared.state = VrrState::Rendering;
                shared.queue.drop_by_kind(EventKind::HibernateTimeout);
            }
            // Drop the out-of-date timeout and any in-flight insertion burst.
            shared.queue.drop_by_kind(EventKind::RenderingTimeout);
            shared.queue.drop_by_kind(EventKind::NextFrameInsertion);
            match shared
                .active_config
                .and_then(|id| shared.configs.get(&id).copied())
            {
                Some(cfg) => {
                    shared.queue.post(
                        EventKind::RenderingTimeout,
                        now_ns() + cfg.notify_expected_present_config.timeout_ns,
                    );
                }
                None => error!("present without an active vrr configuration"),
            }
        }
        self.inner.cond.notify_all();
    }

    /// Vsync callback. Nothing to do in this core.
    pub fn on_vsync(&self, _timestamp_ns: TimeNs, _vsync_period_ns: TimeNs) {}

    /// Drop every queued event and all present bookkeeping.
    pub fn reset(&self) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.queue.drop_all();
            shared.records.clear();
        }
        // Wake the worker so a wait armed for a now-dropped deadline gets
        // re-evaluated instead of popping an empty queue.
        self.inner.cond.notify_all();
    }

    /// Request worker exit and join it.
    pub fn stop(&self) {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.exit = true;
            shared.enabled = false;
            shared.state = VrrState::Disable;
        }
        self.inner.cond.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn state(&self) -> VrrState {
        self.inner.shared.lock().unwrap().state
    }

    pub fn pending_frame_insertions(&self) -> u32 {
        self.inner.shared.lock().unwrap().pending_frames_to_insert
    }

    /// Human-readable diagnostic snapshot of the controller.
    pub fn dump(&self) -> String {
        let shared = self.inner.shared.lock().unwrap();
        let mut out = format!(
            "state = {}, enabled = {}, active config = {:?}, pending insertions = {}\n",
            shared.state.name(),
            shared.enabled,
            shared.active_config,
            shared.pending_frames_to_insert,
        );
        out.push_str("present history:\n");
        for present in &shared.records.present_history {
            out.push_str(&format!(
                "  time = {} ns, frame interval = {} ns\n",
                present.time_ns, present.frame_interval_ns
            ));
        }
        out.push_str("event queue:\n");
        out.push_str(&shared.queue.dump());
        out
    }

    fn worker_body(inner: Arc<ControllerInner>) {
        unsafe {
            let param = libc::sched_param { sched_priority: 2 };
            if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
                warn!("unable to set SCHED_FIFO for the vrr worker, running at normal priority");
            }
        }

        let mut shared = inner.shared.lock().unwrap();
        loop {
            if shared.exit {
                break;
            }
            if !shared.enabled || shared.state == VrrState::Disable {
                shared = inner.cond.wait(shared).unwrap();
                continue;
            }
            let Some(next) = shared.queue.peek_earliest() else {
                shared = inner.cond.wait(shared).unwrap();
                continue;
            };
            let now = now_ns();
            if next.when_ns > now {
                let timeout = Duration::from_nanos((next.when_ns - now) as u64);
                let (guard, _) = inner.cond.wait_timeout(shared, timeout).unwrap();
                shared = guard;
                // Re-evaluate: an earlier event, a drop, disable, or exit may
                // have raced with the wait.
                continue;
            }
            let Some(event) = shared.queue.pop_earliest() else {
                error!("event queue should not be empty");
                break;
            };
            debug!(
                "dispatching {} in state {}",
                event.kind.name(),
                shared.state.name()
            );
            match shared.state {
                VrrState::Rendering => match event.kind {
                    EventKind::RenderingTimeout => {
                        Self::handle_hibernate(&inner, &mut shared);
                        shared.state = VrrState::Hibernate;
                    }
                    EventKind::NotifyExpectedPresentConfig => {
                        Self::handle_cadence_change(&mut shared);
                    }
                    EventKind::HibernateTimeout => {
                        error!("hibernate timeout while in the rendering state");
                    }
                    _ => {}
                },
                VrrState::Hibernate => match event.kind {
                    EventKind::HibernateTimeout => {
                        Self::handle_stay_hibernate(&mut shared);
                    }
                    EventKind::NotifyExpectedPresentConfig => {
                        Self::handle_resume(&mut shared);
                        shared.state = VrrState::Rendering;
                    }
                    EventKind::NextFrameInsertion => {
                        Self::do_frame_insertion(&inner, &mut shared);
                    }
                    EventKind::RenderingTimeout => {
                        error!("rendering timeout while in the hibernate state");
                    }
                    _ => {}
                },
                VrrState::Disable => {
                    // Dispatch is parked while disabled; getting here means a
                    // state transition raced the pop.
                    error!("event {} dispatched while disabled", event.kind.name());
                }
            }
        }
    }

    /// Rendering stopped long enough to power down: kick off a keep-alive
    /// frame burst and arm the periodic hibernate wake-up.
    fn handle_hibernate(inner: &ControllerInner, shared: &mut ControllerShared) {
        shared.pending_frames_to_insert = FRAMES_TO_INSERT_ON_HIBERNATE;
        Self::do_frame_insertion(inner, shared);
        shared.queue.post(
            EventKind::HibernateTimeout,
            now_ns() + DEFAULT_WAKE_UP_TIME_IN_POWER_SAVING_NS,
        );
    }

    fn handle_stay_hibernate(shared: &mut ControllerShared) {
        shared.queue.post(
            EventKind::HibernateTimeout,
            now_ns() + DEFAULT_WAKE_UP_TIME_IN_POWER_SAVING_NS,
        );
    }

    /// Consume the expected-present hint announced while rendering.
    fn handle_cadence_change(shared: &mut ControllerShared) {
        if shared.records.next_expected_present.take().is_none() {
            warn!("cadence change without expected present timing information");
        }
    }

    /// Consume the expected-present hint that wakes the panel from
    /// hibernation.
    fn handle_resume(shared: &mut ControllerShared) {
        if shared.records.next_expected_present.take().is_none() {
            warn!("resume without expected present timing information");
        }
    }

    /// Emit one inserted frame and, if the burst continues, schedule the next
    /// one at the active configuration's minimum frame interval. A failed
    /// panel write still consumes the frame; there is no retry.
    fn do_frame_insertion(inner: &ControllerInner, shared: &mut ControllerShared) {
        if shared.pending_frames_to_insert == 0 {
            error!("frame insertion requested with no pending frames");
            return;
        }
        match &inner.writer {
            Some(writer) => {
                if let Err(e) = writer.write_command(REFRESH_CTRL_NODE, PANEL_REFRESH_CTRL_FI) {
                    error!("panel frame insertion write failed: {e:#}");
                }
            }
            None => error!("frame insertion requested without a panel control node"),
        }
        shared.pending_frames_to_insert -= 1;
        if shared.pending_frames_to_insert > 0 {
            match shared
                .active_config
                .and_then(|id| shared.configs.get(&id).copied())
            {
                Some(cfg) => {
                    shared.queue.post(
                        EventKind::NextFrameInsertion,
                        now_ns() + cfg.min_frame_interval_ns,
                    );
                }
                None => {
                    error!("no active vrr configuration mid-burst, abandoning frame insertion");
                    shared.pending_frames_to_insert = 0;
                }
            }
        }
    }
}

impl Drop for VrrController {
    fn drop(&mut self) {
        self.stop();
    }
}
