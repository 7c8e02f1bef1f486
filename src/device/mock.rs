//! A scripted mock camera for tests and dry runs.
//!
//! The mock keeps an in-memory configuration tree shaped like a Sony
//! mirrorless body and can be scripted to exercise the failure paths the
//! session and scheduler must survive: busy connects, per-shot capture
//! failures, and firmware that silently drops writes made in the wrong
//! exposure mode.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;

use super::tree::{ConfigNode, NodeKind};
use super::{CameraDevice, RawFrame, RemoteFileRef};
use crate::error::{CamError, CamResult};

const EXPOSURE_MODES: &[&str] = &[
    "Manual",
    "Aperture Priority",
    "Shutter Priority",
    "Program",
    "Bulb",
];

/// In-memory camera with scriptable churn.
pub struct MockCamera {
    connected: bool,
    values: HashMap<String, String>,
    choices: HashMap<String, Vec<String>>,
    /// Errors returned by `connect` before it finally succeeds.
    connect_script: VecDeque<CamError>,
    /// Zero-based shot indices where the primary technique fails.
    primary_fail_shots: HashSet<u64>,
    /// Zero-based shot indices where the fallback technique also fails.
    fallback_fail_shots: HashSet<u64>,
    fail_free: bool,
    connect_calls: u32,
    primary_calls: u64,
    fallback_calls: u64,
    freed: Vec<RemoteFileRef>,
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCamera {
    /// A camera with the A6700-like ladders, `f/`-prefixed apertures, and
    /// all exposure modes available.
    pub fn new() -> Self {
        let mut values = HashMap::new();
        values.insert("expprogram".to_string(), "Program".to_string());
        values.insert("aperture".to_string(), "f/4.0".to_string());
        values.insert("shutterspeed".to_string(), "1/250".to_string());
        values.insert("iso".to_string(), "400".to_string());
        values.insert("whitebalance".to_string(), "Auto".to_string());
        values.insert("focusmode".to_string(), "Auto".to_string());
        values.insert("saturation".to_string(), "Normal".to_string());
        values.insert("contrast".to_string(), "Normal".to_string());
        values.insert("sharpness".to_string(), "Normal".to_string());

        let mut choices = HashMap::new();
        choices.insert(
            "expprogram".to_string(),
            EXPOSURE_MODES.iter().map(|s| s.to_string()).collect(),
        );
        choices.insert(
            "aperture".to_string(),
            ["f/2.8", "f/4.0", "f/5.6", "f/8.0", "f/11.0"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        choices.insert(
            "shutterspeed".to_string(),
            ["1/1000", "1/500", "1/250", "1/125", "1/60", "1/30"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        choices.insert(
            "iso".to_string(),
            ["100", "200", "400", "800", "1600", "3200"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        choices.insert(
            "whitebalance".to_string(),
            ["Auto", "Daylight", "Cloudy", "Shade", "Tungsten"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        choices.insert(
            "focusmode".to_string(),
            vec!["Manual".to_string(), "Auto".to_string()],
        );
        for name in ["saturation", "contrast", "sharpness"] {
            choices.insert(
                name.to_string(),
                ["Low", "Medium Low", "Normal", "Medium High", "High"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            );
        }

        Self {
            connected: false,
            values,
            choices,
            connect_script: VecDeque::new(),
            primary_fail_shots: HashSet::new(),
            fallback_fail_shots: HashSet::new(),
            fail_free: false,
            connect_calls: 0,
            primary_calls: 0,
            fallback_calls: 0,
            freed: Vec::new(),
        }
    }

    /// Strip the `f/` prefix from the aperture choice list.
    pub fn with_bare_apertures(mut self) -> Self {
        if let Some(apertures) = self.choices.get_mut("aperture") {
            for choice in apertures.iter_mut() {
                if let Some(bare) = choice.strip_prefix("f/") {
                    *choice = bare.to_string();
                }
            }
        }
        if let Some(value) = self.values.get_mut("aperture") {
            if let Some(bare) = value.strip_prefix("f/") {
                *value = bare.to_string();
            }
        }
        self
    }

    /// Restrict the exposure-mode choice list (e.g. to exclude every
    /// aperture-compatible mode).
    pub fn with_exposure_modes(mut self, modes: &[&str]) -> Self {
        self.choices.insert(
            "expprogram".to_string(),
            modes.iter().map(|s| s.to_string()).collect(),
        );
        if let Some(first) = modes.first() {
            self.values
                .insert("expprogram".to_string(), first.to_string());
        }
        self
    }

    /// Queue transient connect errors before the first success.
    pub fn with_connect_errors(mut self, errors: Vec<CamError>) -> Self {
        self.connect_script = errors.into();
        self
    }

    /// Fail the primary technique on the given zero-based shot indices.
    pub fn with_primary_failures(mut self, shots: &[u64]) -> Self {
        self.primary_fail_shots = shots.iter().copied().collect();
        self
    }

    /// Fail the fallback technique too on the given zero-based shot indices.
    pub fn with_fallback_failures(mut self, shots: &[u64]) -> Self {
        self.fallback_fail_shots = shots.iter().copied().collect();
        self
    }

    /// Make `free_remote` report failure (it stays best-effort upstream).
    pub fn with_failing_free(mut self) -> Self {
        self.fail_free = true;
        self
    }

    /// Remove a node entirely, as firmware without the feature would.
    pub fn without_node(mut self, name: &str) -> Self {
        self.values.remove(name);
        self.choices.remove(name);
        self
    }

    /// Number of `connect` calls observed.
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls
    }

    /// Number of fallback captures observed.
    pub fn fallback_calls(&self) -> u64 {
        self.fallback_calls
    }

    /// Device-side files freed so far.
    pub fn freed(&self) -> &[RemoteFileRef] {
        &self.freed
    }

    /// Current value of a node, for assertions.
    pub fn current(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    fn aperture_writable(&self) -> bool {
        matches!(
            self.values.get("expprogram").map(String::as_str),
            Some("Manual") | Some("Aperture Priority")
        )
    }

    fn has_aperture_capable_mode(&self) -> bool {
        self.choices
            .get("expprogram")
            .map(|modes| {
                modes
                    .iter()
                    .any(|m| m == "Manual" || m == "Aperture Priority")
            })
            .unwrap_or(false)
    }

    fn radio(&self, name: &str) -> Option<ConfigNode> {
        let value = self.values.get(name)?;
        Some(ConfigNode::radio(
            name,
            value.clone(),
            self.choices.get(name).cloned().unwrap_or_default(),
        ))
    }

    fn build_tree(&self) -> ConfigNode {
        let mut capture: Vec<ConfigNode> = ["expprogram", "shutterspeed", "iso"]
            .iter()
            .filter_map(|name| self.radio(name))
            .collect();
        // The aperture node only exists in Manual / Aperture Priority,
        // mirroring how real firmware relabels the tree on mode changes.
        // Bodies without any aperture-capable mode still report the node,
        // they just ignore writes to it.
        if self.aperture_writable() || !self.has_aperture_capable_mode() {
            if let Some(node) = self.radio("aperture") {
                capture.insert(1.min(capture.len()), node);
            }
        }
        let imaging: Vec<ConfigNode> = [
            "whitebalance",
            "focusmode",
            "saturation",
            "contrast",
            "sharpness",
        ]
        .iter()
        .filter_map(|name| self.radio(name))
        .collect();
        ConfigNode::section(
            "main",
            vec![
                ConfigNode::section("capturesettings", capture),
                ConfigNode::section("imgsettings", imaging),
                ConfigNode::text("serialnumber", "6700-0001"),
            ],
        )
    }

    fn apply_leaf(&mut self, node: &ConfigNode) {
        let Some(value) = node.value.as_ref() else {
            return;
        };
        let Some(current) = self.values.get(&node.name) else {
            return;
        };
        if current == value {
            return;
        }
        // Firmware-style silent rejection: unknown choices are dropped, and
        // aperture writes outside a compatible exposure mode are ignored.
        if let Some(choices) = self.choices.get(&node.name) {
            if !choices.contains(value) {
                return;
            }
        }
        if node.name == "aperture" && !self.aperture_writable() {
            return;
        }
        self.values.insert(node.name.clone(), value.clone());
    }

    fn apply_tree(&mut self, node: &ConfigNode) {
        if node.kind == NodeKind::Section {
            for child in &node.children {
                self.apply_tree(child);
            }
        } else {
            self.apply_leaf(node);
        }
    }

    fn frame_payload(&self, shot: u64, technique: &str) -> Bytes {
        Bytes::from(format!("{technique}-frame-{shot:06}"))
    }
}

#[async_trait]
impl CameraDevice for MockCamera {
    async fn connect(&mut self) -> CamResult<()> {
        self.connect_calls += 1;
        if let Some(err) = self.connect_script.pop_front() {
            return Err(err);
        }
        self.connected = true;
        Ok(())
    }

    async fn read_config(&mut self) -> CamResult<ConfigNode> {
        if !self.connected {
            return Err(CamError::DeviceUnavailable("not connected".into()));
        }
        Ok(self.build_tree())
    }

    async fn write_config(&mut self, tree: &ConfigNode) -> CamResult<()> {
        if !self.connected {
            return Err(CamError::DeviceUnavailable("not connected".into()));
        }
        self.apply_tree(tree);
        Ok(())
    }

    async fn capture_primary(&mut self) -> CamResult<RawFrame> {
        if !self.connected {
            return Err(CamError::DeviceUnavailable("not connected".into()));
        }
        let shot = self.primary_calls;
        self.primary_calls += 1;
        if self.primary_fail_shots.contains(&shot) {
            return Err(CamError::CaptureFailed(format!(
                "preview grab failed on shot {shot}"
            )));
        }
        Ok(RawFrame {
            data: self.frame_payload(shot, "preview"),
            remote_ref: None,
        })
    }

    async fn capture_fallback(&mut self) -> CamResult<RawFrame> {
        if !self.connected {
            return Err(CamError::DeviceUnavailable("not connected".into()));
        }
        let shot = self.primary_calls.saturating_sub(1);
        self.fallback_calls += 1;
        if self.fallback_fail_shots.contains(&shot) {
            return Err(CamError::CaptureFailed(format!(
                "trigger capture failed on shot {shot}"
            )));
        }
        Ok(RawFrame {
            data: self.frame_payload(shot, "trigger"),
            remote_ref: Some(RemoteFileRef {
                folder: "/store_00010001/DCIM/100MSDCF".to_string(),
                name: format!("DSC{shot:05}.JPG"),
            }),
        })
    }

    async fn free_remote(&mut self, frame_ref: &RemoteFileRef) -> CamResult<()> {
        if self.fail_free {
            return Err(CamError::DeviceUnavailable(
                "card busy, could not delete".into(),
            ));
        }
        self.freed.push(frame_ref.clone());
        Ok(())
    }
}
