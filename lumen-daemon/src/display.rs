//! Display discovery through the platform's randr tools.

use std::process::Command;
use serde::Deserialize;
use lumen_common::{
    error::ExternalUnavailable, DisplayProvider, Geometry, LumenError, Monitor, Result,
};
use lumen_config::ProviderKind;

fn query_failed(message: impl Into<String>) -> LumenError {
    LumenError::External(ExternalUnavailable::DisplayQuery {
        message: message.into(),
    })
}

fn run(tool: &str, args: &[&str]) -> Result<String> {
    let binary = which::which(tool).map_err(|_| {
        LumenError::External(ExternalUnavailable::ToolMissing {
            tool: tool.to_string(),
        })
    })?;

    let output = Command::new(binary)
        .args(args)
        .output()
        .map_err(|e| query_failed(format!("{} failed to run: {}", tool, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(query_failed(format!("{} exited with {}: {}", tool, output.status, stderr.trim())));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Splits `+2560+0` or `-1920+0` into its two signed offsets.
fn parse_offsets(s: &str) -> Option<(i32, i32)> {
    let split = s
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i)?;
    let (x, y) = s.split_at(split);
    Some((x.parse().ok()?, y.parse().ok()?))
}

/// Parses `2560/597x1440/336+0+0` (pixels/millimetres, then offsets).
fn parse_xrandr_geometry(s: &str) -> Option<Geometry> {
    let (width_part, rest) = s.split_once('x')?;
    let width = width_part.split('/').next()?.parse().ok()?;

    let offsets_at = rest.find(|c: char| c == '+' || c == '-')?;
    let (height_part, offsets) = rest.split_at(offsets_at);
    let height = height_part.split('/').next()?.parse().ok()?;
    let (x, y) = parse_offsets(offsets)?;

    Some(Geometry::new(x, y, width, height))
}

/// Parses `xrandr --listmonitors` output.
///
/// ```text
/// Monitors: 2
///  0: +*DP-1 2560/597x1440/336+0+0  DP-1
///  1: +HDMI-1 1920/527x1080/296+2560+0  HDMI-1
/// ```
pub fn parse_listmonitors(output: &str) -> Result<Vec<Monitor>> {
    let mut monitors = Vec::new();

    for line in output.lines().skip_while(|l| !l.starts_with("Monitors:")).skip(1) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 {
            continue;
        }

        let flags = tokens[1];
        let geometry = parse_xrandr_geometry(tokens[2])
            .ok_or_else(|| query_failed(format!("unrecognised xrandr geometry: {}", tokens[2])))?;
        let name = tokens[tokens.len() - 1];

        monitors.push(Monitor::new(name, geometry, flags.contains('*')));
    }

    Ok(monitors)
}

#[derive(Debug, Deserialize)]
struct WlrOutput {
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    modes: Vec<WlrMode>,
    position: Option<WlrPosition>,
    transform: Option<String>,
    scale: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WlrMode {
    width: i32,
    height: i32,
    #[serde(default)]
    current: bool,
}

#[derive(Debug, Deserialize)]
struct WlrPosition {
    x: i32,
    y: i32,
}

fn default_enabled() -> bool {
    true
}

/// Parses `wlr-randr --json` output into logical geometry.
///
/// wlroots has no primary output; the one at the origin is treated as primary.
pub fn parse_wlr_randr(output: &str) -> Result<Vec<Monitor>> {
    let outputs: Vec<WlrOutput> = serde_json::from_str(output)
        .map_err(|e| query_failed(format!("unrecognised wlr-randr output: {}", e)))?;

    let mut monitors: Vec<Monitor> = outputs
        .into_iter()
        .filter(|o| o.enabled)
        .filter_map(|o| {
            let mode = o.modes.iter().find(|m| m.current)?;
            let scale = o.scale.filter(|s| *s > 0.0).unwrap_or(1.0);
            let mut width = (f64::from(mode.width) / scale).round() as i32;
            let mut height = (f64::from(mode.height) / scale).round() as i32;
            if matches!(o.transform.as_deref(), Some(t) if t.ends_with("90") || t.ends_with("270")) {
                std::mem::swap(&mut width, &mut height);
            }
            let (x, y) = o.position.as_ref().map_or((0, 0), |p| (p.x, p.y));
            Some(Monitor::new(o.name, Geometry::new(x, y, width, height), false))
        })
        .collect();

    if let Some(primary) = monitors
        .iter_mut()
        .find(|m| m.geometry.x == 0 && m.geometry.y == 0)
    {
        primary.is_primary = true;
    } else if let Some(first) = monitors.first_mut() {
        first.is_primary = true;
    }

    Ok(monitors)
}

pub struct XrandrProvider;

impl DisplayProvider for XrandrProvider {
    fn query(&self) -> Result<Vec<Monitor>> {
        parse_listmonitors(&run("xrandr", &["--listmonitors"])?)
    }
}

pub struct WlrRandrProvider;

impl DisplayProvider for WlrRandrProvider {
    fn query(&self) -> Result<Vec<Monitor>> {
        parse_wlr_randr(&run("wlr-randr", &["--json"])?)
    }
}

/// The provider picked for this session.
pub enum SystemDisplays {
    Xrandr(XrandrProvider),
    WlrRandr(WlrRandrProvider),
}

impl SystemDisplays {
    pub fn detect(kind: ProviderKind) -> Result<Self> {
        let has = |tool: &str| which::which(tool).is_ok();
        let wayland = std::env::var("XDG_SESSION_TYPE").map(|t| t == "wayland").unwrap_or(false)
            || std::env::var_os("WAYLAND_DISPLAY").is_some();

        let provider = match kind {
            ProviderKind::Xrandr => SystemDisplays::Xrandr(XrandrProvider),
            ProviderKind::WlrRandr => SystemDisplays::WlrRandr(WlrRandrProvider),
            ProviderKind::Auto if wayland && has("wlr-randr") => SystemDisplays::WlrRandr(WlrRandrProvider),
            ProviderKind::Auto if has("xrandr") => SystemDisplays::Xrandr(XrandrProvider),
            ProviderKind::Auto if has("wlr-randr") => SystemDisplays::WlrRandr(WlrRandrProvider),
            ProviderKind::Auto => {
                return Err(LumenError::External(ExternalUnavailable::ToolMissing {
                    tool: "xrandr or wlr-randr".to_string(),
                }))
            }
        };

        log::info!("Using {} for display discovery", provider.name());
        Ok(provider)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SystemDisplays::Xrandr(_) => "xrandr",
            SystemDisplays::WlrRandr(_) => "wlr-randr",
        }
    }
}

impl DisplayProvider for SystemDisplays {
    fn query(&self) -> Result<Vec<Monitor>> {
        match self {
            SystemDisplays::Xrandr(provider) => provider.query(),
            SystemDisplays::WlrRandr(provider) => provider.query(),
        }
    }
}
