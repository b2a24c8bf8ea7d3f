//! Panel control node writes.
//!
//! The panel exposes sysfs-style file nodes under a per-display base path.
//! Commands are short ASCII tokens; a failed write is reported to the caller
//! and treated as non-fatal.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Sub-node accepting refresh control commands.
pub const REFRESH_CTRL_NODE: &str = "refresh_ctrl";

/// Vendor command token triggering one synthetic frame (frame insertion).
/// Opaque to this crate.
pub const PANEL_REFRESH_CTRL_FI: &str = "0x1";

pub trait PanelCommandWriter: Send + Sync {
    fn write_command(&self, node: &str, token: &str) -> Result<()>;
}

/// Writes command tokens to the panel's control nodes.
#[derive(Debug)]
pub struct FileNodeWriter {
    base: PathBuf,
}

impl FileNodeWriter {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        FileNodeWriter {
            base: base.as_ref().to_path_buf(),
        }
    }
}

impl PanelCommandWriter for FileNodeWriter {
    fn write_command(&self, node: &str, token: &str) -> Result<()> {
        let path = self.base.join(node);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open panel node {path:?}"))?;
        file.write_all(token.as_bytes())
            .with_context(|| format!("failed to write {token:?} to panel node {path:?}"))?;
        Ok(())
    }
}
