//! vrr_kit - Control core for variable refresh rate display panels.
//!
//! Decides, moment by moment, what a VRR panel should be doing between
//! compositor presents: keep rendering at the producer's cadence, insert
//! synthetic keep-alive frames, or hibernate; and records the distribution of
//! observed present intervals per display configuration for telemetry.
//!
//! # Architecture
//!
//! - **Controller**: event-driven state machine (`Disable` / `Rendering` /
//!   `Hibernate`) with a timed event queue drained by a dedicated
//!   fixed-priority worker
//! - **Statistics**: concurrent accumulator keyed by (display status, vsync
//!   interval) over presents
//! - **Timeline**: shared timer substrate the periodic jobs schedule on
//! - **Contracts**: small traits towards the display device, the panel
//!   control nodes and power management
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use vrr_kit::*;
//!
//! # fn display() -> Arc<dyn DisplayContextProvider> { unimplemented!() }
//! let display: Arc<dyn DisplayContextProvider> = display();
//!
//! let controller = VrrController::new(display.as_ref());
//! controller.set_vrr_configurations(BTreeMap::from([(
//!     ConfigId(1),
//!     VrrConfig {
//!         min_frame_interval_ns: 8_333_333,
//!         notify_expected_present_config: NotifyExpectedPresentConfig {
//!             timeout_ns: 30_000_000,
//!         },
//!     },
//! )]));
//! controller.set_enable(true);
//! controller.set_active_vrr_configuration(ConfigId(1));
//!
//! let timeline = Arc::new(Timeline::new());
//! let stats = VrrStatistics::new(display, timeline, 120, 120, 1_000_000_000);
//! stats.on_present(0, 0);
//! ```

pub mod calculator;
pub mod clock;
pub mod context;
pub mod controller;
pub mod events;
pub mod node;
pub mod stats;
pub mod timeline;
pub mod types;

// Re-export the main public types for convenience.
pub use calculator::{
    PeriodCalculatorKind, PeriodRefreshRateCalculator, PeriodRefreshRateCalculatorParams,
    RefreshRateChangeListener, INVALID_REFRESH_RATE,
};
pub use clock::now_ns;
pub use context::{
    DisplayContextProvider, EventHandler, EventQueueFacility, PowerModeListener,
};
pub use controller::{VrrController, VrrState, DEFAULT_WAKE_UP_TIME_IN_POWER_SAVING_NS};
pub use events::{Event, EventKind, EventQueue, EventToken};
pub use node::{FileNodeWriter, PanelCommandWriter, PANEL_REFRESH_CTRL_FI, REFRESH_CTRL_NODE};
pub use stats::{StatisticsProvider, VrrStatistics, FRAME_RATE_WHEN_PRESENT_AT_LP_MODE};
pub use timeline::Timeline;
pub use types::{
    BrightnessMode, ConfigId, DisplayPresentProfile, DisplayPresentRecord,
    DisplayPresentStatistics, DisplayStatus, ExpectedPresent, NotifyExpectedPresentConfig,
    PowerMode, TimeNs, VrrConfig, NSEC_PER_SEC,
};
