//! Overlay toggle state.
//!
//! Each overlay is either off, or on in one display mode with the result of
//! its most recent aggregation. The state is owned by the caller and passed
//! to every toggle; nothing here is global.

use crate::models::{AggregationResult, DisplayMode, OverlayKind};
use std::collections::HashMap;
use tracing::{debug, info};

/// State of one enabled overlay.
#[derive(Debug, Clone)]
pub struct ActiveOverlay {
    pub mode: DisplayMode,
    pub result: AggregationResult,
}

/// What a toggle call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// The overlay was switched on (or switched mode) with a fresh result.
    Enabled,
    /// The overlay was switched off and its result dropped.
    Disabled,
    /// Nothing changed.
    Unchanged,
}

/// Caller-owned overlay state.
#[derive(Debug, Default)]
pub struct OverlayState {
    active: HashMap<OverlayKind, ActiveOverlay>,
}

impl OverlayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch an overlay on or off.
    ///
    /// Turning on an overlay that is already on in the same mode does not
    /// call `compute`. Otherwise `compute` produces a fresh result that
    /// replaces the previous one. If `compute` fails the overlay ends up
    /// off and the error is returned.
    pub fn toggle<F, E>(
        &mut self,
        kind: OverlayKind,
        on: bool,
        mode: DisplayMode,
        compute: F,
    ) -> Result<ToggleOutcome, E>
    where
        F: FnOnce() -> Result<AggregationResult, E>,
    {
        if !on {
            return Ok(match self.active.remove(&kind) {
                Some(_) => {
                    info!("{} overlay disabled", kind);
                    ToggleOutcome::Disabled
                }
                None => ToggleOutcome::Unchanged,
            });
        }

        if self.active.get(&kind).map(|a| a.mode) == Some(mode) {
            debug!("{} overlay already enabled in {} mode", kind, mode);
            return Ok(ToggleOutcome::Unchanged);
        }

        // Switching modes starts from a clean slate
        self.active.remove(&kind);

        let result = compute()?;
        info!(
            "{} overlay enabled in {} mode: {} countries, {} unmapped",
            kind,
            mode,
            result.summaries.len(),
            result.unmapped.len()
        );
        self.active.insert(kind, ActiveOverlay { mode, result });
        Ok(ToggleOutcome::Enabled)
    }

    /// Whether an overlay is currently on.
    #[allow(dead_code)] // Query for interactive callers
    pub fn is_enabled(&self, kind: OverlayKind) -> bool {
        self.active.contains_key(&kind)
    }

    /// The active state of an overlay, if on.
    #[allow(dead_code)] // Query for interactive callers
    pub fn get(&self, kind: OverlayKind) -> Option<&ActiveOverlay> {
        self.active.get(&kind)
    }

    /// Take the state of an overlay out, switching it off.
    pub fn take(&mut self, kind: OverlayKind) -> Option<ActiveOverlay> {
        self.active.remove(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountryKey, CountrySummary};
    use std::cell::Cell;

    fn result_with(code: &str, count: usize) -> AggregationResult {
        AggregationResult {
            summaries: vec![CountrySummary {
                key: CountryKey::new(code, code),
                count,
                records: Vec::new(),
                normalized_intensity: 1.0,
            }],
            unmapped: Vec::new(),
        }
    }

    #[test]
    fn test_enable_and_disable() {
        let mut state = OverlayState::new();
        let kind = OverlayKind::ThreatActors;

        let outcome = state
            .toggle(kind, true, DisplayMode::Heatmap, || {
                Ok::<_, String>(result_with("RU", 2))
            })
            .unwrap();
        assert_eq!(outcome, ToggleOutcome::Enabled);
        assert!(state.is_enabled(kind));
        assert_eq!(state.get(kind).unwrap().result.summaries[0].count, 2);

        let outcome = state
            .toggle(kind, false, DisplayMode::Heatmap, || {
                Ok::<_, String>(AggregationResult::default())
            })
            .unwrap();
        assert_eq!(outcome, ToggleOutcome::Disabled);
        assert!(!state.is_enabled(kind));
        assert!(state.get(kind).is_none());
    }

    #[test]
    fn test_same_mode_does_not_recompute() {
        let mut state = OverlayState::new();
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, String>(result_with("CN", 1))
        };

        state
            .toggle(OverlayKind::ThreatIntel, true, DisplayMode::Heatmap, compute)
            .unwrap();
        let outcome = state
            .toggle(OverlayKind::ThreatIntel, true, DisplayMode::Heatmap, compute)
            .unwrap();

        assert_eq!(outcome, ToggleOutcome::Unchanged);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_mode_switch_replaces_result() {
        let mut state = OverlayState::new();
        let kind = OverlayKind::ThreatActors;

        state
            .toggle(kind, true, DisplayMode::Heatmap, || {
                Ok::<_, String>(result_with("RU", 5))
            })
            .unwrap();
        state
            .toggle(kind, true, DisplayMode::Country, || {
                Ok::<_, String>(result_with("CN", 1))
            })
            .unwrap();

        let active = state.get(kind).unwrap();
        assert_eq!(active.mode, DisplayMode::Country);
        assert_eq!(active.result.summaries.len(), 1);
        assert_eq!(active.result.summaries[0].key.code, "CN");
    }

    #[test]
    fn test_failed_compute_leaves_overlay_off() {
        let mut state = OverlayState::new();
        let kind = OverlayKind::ThreatActors;

        state
            .toggle(kind, true, DisplayMode::Heatmap, || {
                Ok::<_, String>(result_with("RU", 1))
            })
            .unwrap();
        let err = state
            .toggle(kind, true, DisplayMode::Country, || {
                Err::<AggregationResult, _>("feed unavailable".to_string())
            })
            .unwrap_err();

        assert_eq!(err, "feed unavailable");
        assert!(!state.is_enabled(kind));
    }

    #[test]
    fn test_disable_when_off_is_noop() {
        let mut state = OverlayState::new();
        let outcome = state
            .toggle(OverlayKind::ThreatIntel, false, DisplayMode::Heatmap, || {
                Ok::<_, String>(AggregationResult::default())
            })
            .unwrap();
        assert_eq!(outcome, ToggleOutcome::Unchanged);
    }

    #[test]
    fn test_overlays_are_independent() {
        let mut state = OverlayState::new();
        state
            .toggle(OverlayKind::ThreatActors, true, DisplayMode::Heatmap, || {
                Ok::<_, String>(result_with("RU", 1))
            })
            .unwrap();
        state
            .toggle(OverlayKind::ThreatIntel, true, DisplayMode::Country, || {
                Ok::<_, String>(result_with("US", 3))
            })
            .unwrap();

        let taken = state.take(OverlayKind::ThreatActors).unwrap();
        assert_eq!(taken.result.summaries[0].key.code, "RU");
        assert!(!state.is_enabled(OverlayKind::ThreatActors));
        assert!(state.is_enabled(OverlayKind::ThreatIntel));
    }
}
