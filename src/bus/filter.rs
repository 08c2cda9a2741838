//! Composable subscription/read filters.
//!
//! A filter matches on the type set (`"*"` = all, `"ns.*"` = namespace) AND
//! every bound field. An empty filter matches everything.

use crate::bus::envelope::Envelope;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    types: Vec<String>,
    run_id: Option<Uuid>,
    corr_id: Option<Uuid>,
}

impl EventFilter {
    /// Matches every envelope.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_corr_id(mut self, corr_id: Uuid) -> Self {
        self.corr_id = Some(corr_id);
        self
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        if !self.types.is_empty() && !self.types.iter().any(|p| type_matches(p, &envelope.event_type)) {
            return false;
        }
        if let Some(run_id) = self.run_id {
            if envelope.run_id != Some(run_id) {
                return false;
            }
        }
        if let Some(corr_id) = self.corr_id {
            if envelope.corr_id != corr_id {
                return false;
            }
        }
        true
    }
}

/// `"*"` matches everything; `"ns.*"` matches the namespace; anything else
/// is an exact, case-sensitive match.
pub fn type_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(namespace) = pattern.strip_suffix(".*") {
        return event_type
            .strip_prefix(namespace)
            .map(|rest| rest.starts_with('.'))
            .unwrap_or(false);
    }
    pattern == event_type
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_patterns() {
        assert!(type_matches("*", "orders.Filled"));
        assert!(type_matches("orders.*", "orders.Filled"));
        assert!(!type_matches("orders.*", "ordersx.Filled"));
        assert!(type_matches("orders.Filled", "orders.Filled"));
        assert!(!type_matches("orders.filled", "orders.Filled"));
    }

    #[test]
    fn test_filter_conjunction() {
        let run = Uuid::new_v4();
        let other = Uuid::new_v4();
        let filter = EventFilter::for_types(["data.WindowReady"]).with_run_id(run);

        let hit = Envelope::event("data.WindowReady", json!({})).with_run_id(run);
        let wrong_run = Envelope::event("data.WindowReady", json!({})).with_run_id(other);
        let wrong_type = Envelope::event("data.WindowChunk", json!({})).with_run_id(run);

        assert!(filter.matches(&hit));
        assert!(!filter.matches(&wrong_run));
        assert!(!filter.matches(&wrong_type));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = EventFilter::any();
        assert!(filter.matches(&Envelope::event("anything.AtAll", json!(null))));
    }
}
