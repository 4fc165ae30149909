use chrono::{DateTime, Utc};

/// Abstracts "now" so state-machine and TTL tests can drive time deterministically
/// instead of racing the wall clock (§9 Design Notes).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Out of scope per the Non-goals: any call to an external language-model
/// service for expansion, polish, or duplicate scoring is opaque to the
/// engine. This capability exists only so a future integration has a seam
/// to implement against; the default never suggests anything.
pub trait SuggestionProvider: Send + Sync {
    fn suggest_next_task(&self, repo_id: uuid::Uuid) -> Option<(String, String)>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSuggestionProvider;

impl SuggestionProvider for NullSuggestionProvider {
    fn suggest_next_task(&self, _repo_id: uuid::Uuid) -> Option<(String, String)> {
        None
    }
}
