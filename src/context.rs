//! Contracts between the control core and the rest of the display pipeline.
//!
//! The core never talks to the compositor or the display device directly; it
//! consumes these capabilities and stays testable against fakes.

use crate::events::{EventKind, EventToken};
use crate::types::{BrightnessMode, ConfigId, PowerMode, TimeNs};

/// Read-only view of the display device state.
pub trait DisplayContextProvider: Send + Sync {
    fn power_mode(&self) -> PowerMode;
    fn brightness_mode(&self) -> BrightnessMode;
    fn active_config_id(&self) -> ConfigId;
    /// Base path of the panel's control file nodes. Empty when the display
    /// has no writable panel node.
    fn panel_file_node_path(&self) -> String;
}

/// Receives power transitions from the power-management thread.
pub trait PowerModeListener: Send + Sync {
    fn on_power_state_change(&self, from: PowerMode, to: PowerMode);
}

/// Handler invoked when a timed event posted under its token comes due.
pub type EventHandler = Box<dyn Fn(EventKind) + Send + Sync>;

/// A timer substrate components can schedule periodic work on.
///
/// Registration yields a token; events posted under that token are delivered
/// to the registered handler when they come due. Unregistering drops the
/// handler and any events still queued under the token.
pub trait EventQueueFacility: Send + Sync {
    fn register_handler(&self, handler: EventHandler) -> EventToken;
    fn unregister_handler(&self, token: EventToken);
    fn post_event(&self, token: EventToken, kind: EventKind, when_ns: TimeNs);
}
