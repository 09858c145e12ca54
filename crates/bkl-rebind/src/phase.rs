//! Rebind phases

use std::fmt;

use serde::{Deserialize, Serialize};

/// Progress of one rebind pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebindPhase {
    /// Mementos loaded, nothing reconstructed
    #[default]
    Started,
    /// Bundles registered
    BundlesInstalled,
    /// Locations created and wired
    LocationsReconstructed,
    /// Policies, enrichers and feeds created
    AdjunctsReconstructed,
    /// Entities created and wired
    EntitiesReconstructed,
    /// Catalog items restored
    CatalogReconstructed,
    /// Everything managed
    Complete,
    /// Aborted; nothing from this pass is managed
    Failed,
}

impl RebindPhase {
    /// Phase that normally follows this one
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Started => Some(Self::BundlesInstalled),
            Self::BundlesInstalled => Some(Self::LocationsReconstructed),
            Self::LocationsReconstructed => Some(Self::AdjunctsReconstructed),
            Self::AdjunctsReconstructed => Some(Self::EntitiesReconstructed),
            Self::EntitiesReconstructed => Some(Self::CatalogReconstructed),
            Self::CatalogReconstructed => Some(Self::Complete),
            Self::Complete | Self::Failed => None,
        }
    }

    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether `to` may follow this phase
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        if to == Self::Failed {
            return !self.is_terminal();
        }
        self.next() == Some(to)
    }
}

impl fmt::Display for RebindPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "started",
            Self::BundlesInstalled => "bundles-installed",
            Self::LocationsReconstructed => "locations-reconstructed",
            Self::AdjunctsReconstructed => "adjuncts-reconstructed",
            Self::EntitiesReconstructed => "entities-reconstructed",
            Self::CatalogReconstructed => "catalog-reconstructed",
            Self::Complete => "complete",
            Self::Failed => "failed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order() {
        let mut phase = RebindPhase::Started;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(phase.can_transition_to(next));
            phase = next;
            seen.push(phase);
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(phase, RebindPhase::Complete);
    }

    #[test]
    fn skipping_and_leaving_terminal_are_illegal() {
        assert!(!RebindPhase::Started.can_transition_to(RebindPhase::EntitiesReconstructed));
        assert!(RebindPhase::LocationsReconstructed.can_transition_to(RebindPhase::Failed));
        assert!(!RebindPhase::Complete.can_transition_to(RebindPhase::Failed));
        assert!(!RebindPhase::Failed.can_transition_to(RebindPhase::Started));
    }
}
