use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use vrr_kit::*;

/// Initialize logging from the environment. Idempotent: the first call in
/// the process wins, later calls are silently ignored.
pub fn setup_test() {
    let mut lcfg = ConfigBuilder::new();
    lcfg.set_time_level(LevelFilter::Error)
        .set_location_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off);
    let _ = TermLogger::init(
        LevelFilter::Debug,
        lcfg.build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}

/// The VRR table used by the end-to-end scenarios.
pub fn test_configs() -> BTreeMap<ConfigId, VrrConfig> {
    BTreeMap::from([
        (
            ConfigId(1),
            VrrConfig {
                min_frame_interval_ns: 8_333_333,
                notify_expected_present_config: NotifyExpectedPresentConfig {
                    timeout_ns: 30_000_000,
                },
            },
        ),
        (
            ConfigId(2),
            VrrConfig {
                // Slow insertion cadence, for tests that interrupt a burst.
                min_frame_interval_ns: 200_000_000,
                notify_expected_present_config: NotifyExpectedPresentConfig {
                    timeout_ns: 5_000_000,
                },
            },
        ),
        (
            ConfigId(3),
            VrrConfig {
                // Timeout far beyond any test runtime, for tests that must
                // not race the rendering timeout.
                min_frame_interval_ns: 8_333_333,
                notify_expected_present_config: NotifyExpectedPresentConfig {
                    timeout_ns: 10_000_000_000,
                },
            },
        ),
    ])
}

/// Panel command writer that records writes and optionally fails them.
pub struct RecordingWriter {
    writes: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingWriter {
            writes: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(RecordingWriter {
            writes: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

impl PanelCommandWriter for RecordingWriter {
    fn write_command(&self, node: &str, token: &str) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((node.to_string(), token.to_string()));
        if self.fail {
            bail!("injected panel write failure");
        }
        Ok(())
    }
}

/// Display context fake with settable fields.
pub struct FakeDisplay {
    pub power_mode: Mutex<PowerMode>,
    pub brightness: Mutex<BrightnessMode>,
    pub config: Mutex<ConfigId>,
}

impl FakeDisplay {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeDisplay {
            power_mode: Mutex::new(PowerMode::Normal),
            brightness: Mutex::new(BrightnessMode::Normal),
            config: Mutex::new(ConfigId(1)),
        })
    }
}

impl DisplayContextProvider for FakeDisplay {
    fn power_mode(&self) -> PowerMode {
        *self.power_mode.lock().unwrap()
    }

    fn brightness_mode(&self) -> BrightnessMode {
        *self.brightness.lock().unwrap()
    }

    fn active_config_id(&self) -> ConfigId {
        *self.config.lock().unwrap()
    }

    fn panel_file_node_path(&self) -> String {
        String::new()
    }
}

/// Poll until `cond` holds or `timeout_ms` elapses; true on success.
pub fn wait_for(timeout_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    cond()
}
