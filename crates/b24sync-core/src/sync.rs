//! Sync run bookkeeping, decoupled from I/O and CLI orchestration.

/// Per-entity record counts for one sync run.
///
/// Every run re-fetches and re-upserts the full remote dataset, so the
/// counts are simply the sizes of the four fetched collections.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub stages: usize,
    pub sources: usize,
    pub users: usize,
    pub deals: usize,
}

impl SyncReport {
    /// Creates a report from the four fetched collection sizes.
    pub fn new(stages: usize, sources: usize, users: usize, deals: usize) -> Self {
        Self {
            stages,
            sources,
            users,
            deals,
        }
    }

    /// Returns the total number of records synced across all entities.
    pub fn total(&self) -> usize {
        self.stages + self.sources + self.users + self.deals
    }

    /// One-line summary for the final log message.
    pub fn summary(&self) -> String {
        format!(
            "{} stages, {} sources, {} users, {} deals",
            self.stages, self.sources, self.users, self.deals
        )
    }
}
