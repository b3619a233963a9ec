//! Conflict resolution for near-simultaneous updates.

use crate::types::{ProgressConflict, ProgressUpdate, ResolutionStrategy};

/// Pure mapping from a burst of competing updates to one resolved value.
///
/// The default strategy is [`ResolutionStrategy::Highest`]: a child never
/// loses progress because a slower device reported an older, lower value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    strategy: ResolutionStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Resolve `updates`, which must all target the same (child, activity)
    /// and include the update that triggered resolution.
    ///
    /// Returns `None` for an empty set. Every contributor is kept in the
    /// returned record, newest first.
    pub fn resolve(&self, mut updates: Vec<ProgressUpdate>) -> Option<ProgressConflict> {
        let first = updates.first()?;
        let child_id = first.child_id.clone();
        let activity_id = first.activity_id.clone();

        // Stable: equal timestamps keep their arrival order.
        updates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let resolved_progress = match self.strategy {
            ResolutionStrategy::Highest => updates
                .iter()
                .map(|u| u.progress)
                .fold(f64::NEG_INFINITY, f64::max),
            ResolutionStrategy::Latest => updates[0].progress,
            ResolutionStrategy::Merge => {
                updates.iter().map(|u| u.progress).sum::<f64>() / updates.len() as f64
            }
        };

        Some(ProgressConflict {
            child_id,
            activity_id,
            conflicts: updates,
            resolved_progress,
            resolution_strategy: self.strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(device: &str, progress: f64, timestamp: i64) -> ProgressUpdate {
        ProgressUpdate {
            child_id: "child-1".to_string(),
            activity_id: "math-1".to_string(),
            progress,
            timestamp,
            device_id: device.to_string(),
            session_id: format!("{device}-session"),
            metadata: None,
        }
    }

    fn burst() -> Vec<ProgressUpdate> {
        vec![
            update("tablet", 70.0, 10_000),
            update("phone", 85.0, 10_800),
            update("browser", 75.0, 11_900),
        ]
    }

    #[test]
    fn highest_wins_by_default() {
        let conflict = ConflictResolver::default().resolve(burst()).unwrap();
        assert_eq!(conflict.resolved_progress, 85.0);
        assert_eq!(conflict.resolution_strategy, ResolutionStrategy::Highest);
        assert_eq!(conflict.resolution_strategy.as_str(), "highest");
    }

    #[test]
    fn all_contributors_kept_newest_first() {
        let conflict = ConflictResolver::default().resolve(burst()).unwrap();
        assert_eq!(conflict.devices(), ["browser", "phone", "tablet"]);
        assert_eq!(conflict.latest().device_id, "browser");
        assert_eq!(conflict.child_id, "child-1");
        assert_eq!(conflict.activity_id, "math-1");
    }

    #[test]
    fn latest_takes_newest_contributor() {
        let conflict = ConflictResolver::new(ResolutionStrategy::Latest)
            .resolve(burst())
            .unwrap();
        assert_eq!(conflict.resolved_progress, 75.0);
    }

    #[test]
    fn merge_averages_contributors() {
        let conflict = ConflictResolver::new(ResolutionStrategy::Merge)
            .resolve(vec![update("a", 60.0, 1), update("b", 80.0, 2)])
            .unwrap();
        assert_eq!(conflict.resolved_progress, 70.0);
    }

    #[test]
    fn highest_handles_negative_values() {
        let conflict = ConflictResolver::default()
            .resolve(vec![update("a", -10.0, 1), update("b", -3.0, 2)])
            .unwrap();
        assert_eq!(conflict.resolved_progress, -3.0);
    }

    #[test]
    fn empty_set_resolves_to_nothing() {
        assert!(ConflictResolver::default().resolve(Vec::new()).is_none());
    }
}
