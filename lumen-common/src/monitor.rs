use std::collections::HashMap;
use std::fmt;
use serde::{Serialize, Deserialize};
use crate::content::ContentRef;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

impl fmt::Display for Geometry {
    // X11 geometry string, also what mpv's --geometry expects
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}{:+}{:+}", self.width, self.height, self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub name: String,
    pub geometry: Geometry,
    pub is_primary: bool,
    #[serde(default)]
    pub current_source: Option<ContentRef>,
}

impl Monitor {
    pub fn new(name: impl Into<String>, geometry: Geometry, is_primary: bool) -> Self {
        Self {
            name: name.into(),
            geometry,
            is_primary,
            current_source: None,
        }
    }

    /// Same identity but different placement or primary flag.
    /// The bound content is not part of the comparison.
    fn layout_differs(&self, other: &Monitor) -> bool {
        self.geometry != other.geometry || self.is_primary != other.is_primary
    }
}

impl fmt::Display for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}{})", self.name, self.geometry, if self.is_primary { ", primary" } else { "" })
    }
}

/// Platform capability that lists the currently attached displays.
pub trait DisplayProvider {
    fn query(&self) -> Result<Vec<Monitor>>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorDiff {
    pub added: Vec<Monitor>,
    pub removed: Vec<Monitor>,
    pub changed: Vec<Monitor>,
}

impl MonitorDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compares two snapshots by monitor name.
///
/// `changed` carries the monitor as it appears in `new`.
pub fn diff(old: &[Monitor], new: &[Monitor]) -> MonitorDiff {
    let old_by_name: HashMap<&str, &Monitor> = old.iter().map(|m| (m.name.as_str(), m)).collect();
    let new_by_name: HashMap<&str, &Monitor> = new.iter().map(|m| (m.name.as_str(), m)).collect();

    let mut result = MonitorDiff::default();

    for monitor in new {
        match old_by_name.get(monitor.name.as_str()) {
            None => result.added.push(monitor.clone()),
            Some(previous) if previous.layout_differs(monitor) => result.changed.push(monitor.clone()),
            Some(_) => {}
        }
    }

    for monitor in old {
        if !new_by_name.contains_key(monitor.name.as_str()) {
            result.removed.push(monitor.clone());
        }
    }

    result
}

/// Keeps the last display snapshot and reports topology changes.
pub struct MonitorRegistry<P> {
    provider: P,
    snapshot: Vec<Monitor>,
}

impl<P: DisplayProvider> MonitorRegistry<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            snapshot: Vec::new(),
        }
    }

    /// Queries the platform for a fresh snapshot without recording it.
    ///
    /// Duplicate names keep their first occurrence and at most one monitor
    /// stays primary. Zero displays is a valid (usually transient) answer.
    pub fn refresh(&self) -> Result<Vec<Monitor>> {
        let reported = self.provider.query()?;
        let mut seen = std::collections::HashSet::new();
        let mut primary_taken = false;
        let mut monitors = Vec::with_capacity(reported.len());

        for mut monitor in reported {
            if !seen.insert(monitor.name.clone()) {
                log::warn!("Display {} reported twice, ignoring duplicate", monitor.name);
                continue;
            }
            if monitor.is_primary {
                if primary_taken {
                    log::warn!("Display {} also claims primary, demoting it", monitor.name);
                    monitor.is_primary = false;
                }
                primary_taken = true;
            }
            monitors.push(monitor);
        }

        if monitors.is_empty() {
            log::warn!("Platform reports zero displays, waiting for the next refresh");
        }

        Ok(monitors)
    }

    /// Refreshes and returns what changed since the previous call.
    ///
    /// On a provider failure the previous snapshot is kept.
    pub fn update(&mut self) -> Result<MonitorDiff> {
        let fresh = self.refresh()?;
        let changes = diff(&self.snapshot, &fresh);
        if !changes.is_empty() {
            log::info!(
                "Display topology changed: {} added, {} removed, {} changed",
                changes.added.len(),
                changes.removed.len(),
                changes.changed.len()
            );
        }
        self.snapshot = fresh;
        Ok(changes)
    }

    pub fn snapshot(&self) -> &[Monitor] {
        &self.snapshot
    }

    pub fn get(&self, name: &str) -> Option<&Monitor> {
        self.snapshot.iter().find(|m| m.name == name)
    }

    pub fn primary(&self) -> Option<&Monitor> {
        self.snapshot.iter().find(|m| m.is_primary)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }
}

/// Provider returning a fixed list, swappable at runtime.
#[derive(Debug, Default, Clone)]
pub struct StaticProvider {
    pub monitors: Vec<Monitor>,
}

impl StaticProvider {
    pub fn new(monitors: Vec<Monitor>) -> Self {
        Self { monitors }
    }
}

impl DisplayProvider for StaticProvider {
    fn query(&self) -> Result<Vec<Monitor>> {
        Ok(self.monitors.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dp1() -> Monitor {
        Monitor::new("DP-1", Geometry::new(0, 0, 2560, 1440), true)
    }

    fn hdmi1() -> Monitor {
        Monitor::new("HDMI-1", Geometry::new(2560, 0, 1920, 1080), false)
    }

    #[test]
    fn test_geometry_display() {
        assert_eq!(Geometry::new(2560, 0, 1920, 1080).to_string(), "1920x1080+2560+0");
        assert_eq!(Geometry::new(-1920, 0, 1920, 1080).to_string(), "1920x1080-1920+0");
    }

    #[test]
    fn test_diff_added_removed_changed() {
        let old = vec![dp1(), hdmi1()];
        let mut moved = hdmi1();
        moved.geometry.x = 0;
        moved.geometry.y = 1440;
        let new = vec![moved.clone(), Monitor::new("DP-2", Geometry::new(0, 0, 800, 600), false)];

        let changes = diff(&old, &new);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].name, "DP-2");
        assert_eq!(changes.removed.len(), 1);
        assert_eq!(changes.removed[0].name, "DP-1");
        assert_eq!(changes.changed, vec![moved]);
    }

    #[test]
    fn test_diff_ignores_bound_content() {
        let old = vec![dp1()];
        let mut new_dp1 = dp1();
        new_dp1.current_source = Some("a.mp4".into());
        assert!(diff(&old, &[new_dp1]).is_empty());
    }

    #[test]
    fn test_primary_flag_change_is_a_change() {
        let mut demoted = dp1();
        demoted.is_primary = false;
        let changes = diff(&[dp1()], &[demoted]);
        assert_eq!(changes.changed.len(), 1);
    }

    #[test]
    fn test_zero_displays_is_not_an_error() {
        let mut registry = MonitorRegistry::new(StaticProvider::new(vec![dp1()]));
        registry.update().unwrap();

        registry.provider_mut().monitors.clear();
        let changes = registry.update().unwrap();
        assert_eq!(changes.removed.len(), 1);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_refresh_keeps_single_primary() {
        let mut second = hdmi1();
        second.is_primary = true;
        let registry = MonitorRegistry::new(StaticProvider::new(vec![dp1(), second, dp1()]));

        let monitors = registry.refresh().unwrap();
        assert_eq!(monitors.len(), 2);
        assert_eq!(monitors.iter().filter(|m| m.is_primary).count(), 1);
        assert!(monitors[0].is_primary);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = MonitorRegistry::new(StaticProvider::new(vec![dp1(), hdmi1()]));
        let changes = registry.update().unwrap();
        assert_eq!(changes.added.len(), 2);
        assert_eq!(registry.primary().map(|m| m.name.as_str()), Some("DP-1"));
        assert!(registry.get("HDMI-1").is_some());
        assert!(registry.get("VGA-1").is_none());

        // Second refresh with an unchanged provider reports nothing
        assert!(registry.update().unwrap().is_empty());
    }
}
