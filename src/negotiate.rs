//! Setting negotiation engine.
//!
//! Resolves `(logical_name, desired_value)` to a `(physical_name,
//! resolved_value)` pair the device will accept, and applies it:
//!
//! 1. Probe an ordered list of candidate physical names for the logical
//!    setting; the first one present in the live tree wins. A logical
//!    setting maps to different physical names across firmware revisions
//!    (aperture appears as `aperture`, `f-number`, or `fnumber`).
//! 2. For Radio/Menu nodes, canonicalize the desired value to whatever
//!    unit-prefix convention the *current* choice list uses (`"4.0"` vs
//!    `"f/4.0"` denote the same physical value), then try an exact match.
//! 3. Without an exact match, and when every choice parses as numeric,
//!    substitute the choice with minimum absolute difference; ties resolve
//!    to the lower value. Device firmware enumerates a fixed discrete
//!    ladder that rarely equals an arbitrarily-typed user value exactly.
//! 4. Symbolic domains get no fallback; guessing intent among tokens is
//!    unsafe, so the full choice list is surfaced instead.
//! 5. Write, commit, re-read, verify. A mismatch after a successful write
//!    signals a device-side constraint (usually the wrong exposure mode)
//!    and is surfaced as non-fatal.
//!
//! Aperture additionally requires a compatible exposure mode before the
//! node accepts writes; the negotiator switches the mode proactively when
//! the mode node offers an Aperture-Priority-equivalent token.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::device::{CameraDevice, NodeKind};
use crate::error::{CamError, CamResult};
use crate::session::CaptureSession;

/// Human-facing setting names, independent of device-specific physical
/// naming. The candidate table below owns the mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalSetting {
    /// Lens aperture (f-number).
    Aperture,
    /// Shutter speed.
    ShutterSpeed,
    /// Sensor sensitivity.
    Iso,
    /// White balance preset.
    WhiteBalance,
    /// Focus mode.
    Focus,
    /// Exposure program.
    ExposureMode,
    /// Saturation level.
    Saturation,
    /// Contrast level.
    Contrast,
    /// Sharpness level.
    Sharpness,
}

impl LogicalSetting {
    /// All logical settings, in prompt order.
    pub const ALL: [LogicalSetting; 9] = [
        LogicalSetting::Aperture,
        LogicalSetting::ShutterSpeed,
        LogicalSetting::Iso,
        LogicalSetting::WhiteBalance,
        LogicalSetting::Focus,
        LogicalSetting::ExposureMode,
        LogicalSetting::Saturation,
        LogicalSetting::Contrast,
        LogicalSetting::Sharpness,
    ];

    /// Canonical snake_case name.
    pub fn name(self) -> &'static str {
        match self {
            LogicalSetting::Aperture => "aperture",
            LogicalSetting::ShutterSpeed => "shutter_speed",
            LogicalSetting::Iso => "iso",
            LogicalSetting::WhiteBalance => "white_balance",
            LogicalSetting::Focus => "focus",
            LogicalSetting::ExposureMode => "exposure_mode",
            LogicalSetting::Saturation => "saturation",
            LogicalSetting::Contrast => "contrast",
            LogicalSetting::Sharpness => "sharpness",
        }
    }

    /// Candidate physical node names, probed in priority order.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            LogicalSetting::Aperture => &["aperture", "f-number", "fnumber"],
            LogicalSetting::ShutterSpeed => &["shutterspeed", "shutter-speed"],
            LogicalSetting::Iso => &["iso"],
            LogicalSetting::WhiteBalance => &["whitebalance"],
            LogicalSetting::Focus => &["focusmode"],
            LogicalSetting::ExposureMode => &["expprogram", "autoexposuremode", "expmode"],
            LogicalSetting::Saturation => &["saturation"],
            LogicalSetting::Contrast => &["contrast"],
            LogicalSetting::Sharpness => &["sharpness"],
        }
    }

    /// Parse a canonical snake_case name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

impl std::fmt::Display for LogicalSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The outcome of a successful negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Applied {
    /// The logical setting that was negotiated.
    pub logical: LogicalSetting,
    /// The physical node name the probe matched.
    pub physical: String,
    /// The caller's original value.
    pub requested: String,
    /// The device-legal value that was written and verified.
    pub resolved: String,
}

/// Unit prefix for aperture values. Devices are split on whether the choice
/// list carries it.
const APERTURE_PREFIX: &str = "f/";

/// Exposure-mode tokens (normalized) in which the aperture node accepts
/// writes.
const APERTURE_COMPATIBLE_MODES: &[&str] = &["manual", "m", "aperturepriority", "a", "av"];

/// Exposure-mode tokens (normalized) the negotiator may switch to.
const APERTURE_PRIORITY_EQUIVALENTS: &[&str] = &["aperturepriority", "a", "av"];

fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Parse a scalar that may carry a unit prefix or fraction notation.
///
/// `"f/4.0"` → 4.0, `"1/250"` → 0.004, `"0.8"` → 0.8.
pub fn parse_scalar(raw: &str) -> Option<f64> {
    let s = raw.trim().strip_prefix(APERTURE_PREFIX).unwrap_or(raw.trim());
    if let Some((numer, denom)) = s.split_once('/') {
        let n: f64 = numer.trim().parse().ok()?;
        let d: f64 = denom.trim().parse().ok()?;
        if d == 0.0 {
            return None;
        }
        return Some(n / d);
    }
    s.parse().ok()
}

/// Rewrite `desired` in the unit-prefix convention of the current choice
/// list. The device's convention wins, never the caller's.
pub fn to_choice_convention(desired: &str, choices: &[String]) -> String {
    let desired = desired.trim();
    let prefixed = choices.iter().any(|c| c.starts_with(APERTURE_PREFIX));
    match (prefixed, desired.starts_with(APERTURE_PREFIX)) {
        (true, false) => format!("{APERTURE_PREFIX}{desired}"),
        (false, true) => desired[APERTURE_PREFIX.len()..].to_string(),
        _ => desired.to_string(),
    }
}

/// Resolve a desired value against a Radio/Menu choice list.
///
/// Exact match after canonicalization wins; otherwise, if every choice is
/// numeric, the closest choice is substituted with ties resolving to the
/// lower value; symbolic domains fail with the full choice list.
pub fn resolve_choice(desired: &str, choices: &[String]) -> CamResult<String> {
    let canonical = to_choice_convention(desired, choices);
    if choices.iter().any(|c| c == &canonical) {
        return Ok(canonical);
    }

    let invalid = || CamError::InvalidChoice {
        value: desired.to_string(),
        choices: choices.to_vec(),
    };

    let want = parse_scalar(desired).ok_or_else(invalid)?;
    let mut parsed = Vec::with_capacity(choices.len());
    for choice in choices {
        parsed.push(parse_scalar(choice).ok_or_else(invalid)?);
    }

    let mut best: Option<(usize, f64)> = None;
    for (idx, &value) in parsed.iter().enumerate() {
        let diff = (value - want).abs();
        best = Some(match best {
            None => (idx, value),
            Some((best_idx, best_value)) => {
                let best_diff = (best_value - want).abs();
                if diff < best_diff || (diff == best_diff && value < best_value) {
                    (idx, value)
                } else {
                    (best_idx, best_value)
                }
            }
        });
    }
    match best {
        Some((idx, _)) => Ok(choices[idx].clone()),
        None => Err(invalid()),
    }
}

/// Snap a numeric value into a Range node's `(min, max, step)` ladder.
fn snap_to_range(desired: &str, (min, max, step): (f64, f64, f64)) -> CamResult<String> {
    let want = parse_scalar(desired).ok_or_else(|| CamError::InvalidChoice {
        value: desired.to_string(),
        choices: Vec::new(),
    })?;
    let clamped = want.clamp(min, max);
    let snapped = if step > 0.0 {
        min + ((clamped - min) / step).round() * step
    } else {
        clamped
    };
    Ok(format!("{snapped}"))
}

/// The setting negotiation engine. Stateless; the candidate table and
/// canonicalization rules live here, the device state lives in the session.
pub struct Negotiator;

impl Negotiator {
    /// Negotiate and apply one setting, verifying the committed value.
    ///
    /// Returns [`Applied`] when the device verifiably holds the resolved
    /// value. A write the device silently dropped or clamped surfaces as
    /// `CamError::VerificationMismatch`, which callers treat as non-fatal:
    /// the session continues with whatever value the device actually holds.
    pub async fn apply<D: CameraDevice>(
        session: &mut CaptureSession<D>,
        logical: LogicalSetting,
        desired: &str,
    ) -> CamResult<Applied> {
        if logical == LogicalSetting::Aperture {
            let mode_ok = Self::ensure_aperture_mode(session).await?;
            if !mode_ok {
                warn!("No aperture-capable exposure mode available; writing best-effort");
            }
        }

        // Fresh snapshot immediately before writing: a prior negotiation
        // step may have changed exposure mode and invalidated older trees.
        let mut tree = session.read_config().await?;

        let physical = logical
            .candidates()
            .iter()
            .find(|name| tree.find_by_name(name).is_some())
            .copied()
            .ok_or_else(|| CamError::UnsupportedSetting(logical.name().to_string()))?;
        debug!("Probed '{logical}' to physical node '{physical}'");

        let node = tree
            .find_by_name(physical)
            .ok_or_else(|| CamError::UnsupportedSetting(logical.name().to_string()))?;

        let resolved = match node.kind {
            NodeKind::Radio | NodeKind::Menu => resolve_choice(desired, &node.choices)?,
            NodeKind::Range => {
                let bounds = node.range.unwrap_or((f64::MIN, f64::MAX, 0.0));
                snap_to_range(desired, bounds)?
            }
            NodeKind::Text | NodeKind::Toggle | NodeKind::Date => desired.to_string(),
            NodeKind::Section | NodeKind::Button => {
                return Err(CamError::UnsupportedSetting(logical.name().to_string()))
            }
        };
        if resolved != desired {
            info!("Resolved {logical} '{desired}' to device value '{resolved}'");
        }

        if let Some(staged) = tree.find_by_name_mut(physical) {
            staged.value = Some(resolved.clone());
        }
        session.write_config(&tree).await?;

        // Re-read for the authoritative post-write state; firmware may have
        // clamped or rejected the write silently.
        let observed = session
            .read_config()
            .await?
            .find_by_name(physical)
            .and_then(|n| n.value.clone())
            .unwrap_or_default();

        if observed == resolved {
            Ok(Applied {
                logical,
                physical: physical.to_string(),
                requested: desired.to_string(),
                resolved,
            })
        } else {
            warn!("Wrote {logical}='{resolved}' but device holds '{observed}'");
            Err(CamError::VerificationMismatch {
                requested: resolved,
                observed,
            })
        }
    }

    /// Ensure the device is in an exposure mode that accepts aperture
    /// writes, switching to an Aperture-Priority-equivalent token when one
    /// exists in the mode node's choices.
    ///
    /// Returns false when no compatible mode could be established; the
    /// caller still attempts the write, flagged best-effort.
    async fn ensure_aperture_mode<D: CameraDevice>(
        session: &mut CaptureSession<D>,
    ) -> CamResult<bool> {
        let tree = session.read_config().await?;
        let Some(physical) = LogicalSetting::ExposureMode
            .candidates()
            .iter()
            .find(|name| tree.find_by_name(name).is_some())
            .copied()
        else {
            warn!("Device reports no exposure-mode node");
            return Ok(false);
        };

        let Some(node) = tree.find_by_name(physical) else {
            return Ok(false);
        };
        let current = node.value.clone().unwrap_or_default();
        if APERTURE_COMPATIBLE_MODES.contains(&normalize_token(&current).as_str()) {
            return Ok(true);
        }

        let Some(target) = node
            .choices
            .iter()
            .find(|c| APERTURE_PRIORITY_EQUIVALENTS.contains(&normalize_token(c).as_str()))
            .cloned()
        else {
            return Ok(false);
        };

        info!("Switching exposure mode '{current}' -> '{target}' for aperture control");
        let mut staged = tree;
        if let Some(mode_node) = staged.find_by_name_mut(physical) {
            mode_node.value = Some(target.clone());
        }
        session.write_config(&staged).await?;

        let observed = session
            .read_config()
            .await?
            .find_by_name(physical)
            .and_then(|n| n.value.clone())
            .unwrap_or_default();
        Ok(APERTURE_COMPATIBLE_MODES.contains(&normalize_token(&observed).as_str()))
    }
}
