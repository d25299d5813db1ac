use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of an item: series plus episode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub series_id: String,
    pub episode_no: String,
}

impl ItemKey {
    pub fn new(series_id: impl Into<String>, episode_no: impl Into<String>) -> Self {
        Self {
            series_id: series_id.into(),
            episode_no: episode_no.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.series_id, self.episode_no)
    }
}

/// Ledger view of one item.
///
/// An item the ledger has never seen has an empty status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    /// Completion flag per variant.
    pub variants: BTreeMap<String, bool>,
    /// Most recently recorded published-artifact reference for the item.
    pub external_ref: Option<String>,
    /// Published-artifact reference per variant, when one was recorded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variant_refs: BTreeMap<String, String>,
}

impl ItemStatus {
    pub fn is_done(&self, variant: &str) -> bool {
        self.variants.get(variant).copied().unwrap_or(false)
    }

    /// Required variants not yet done, in the order given.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a String> {
        required.iter().filter(|v| !self.is_done(v)).collect()
    }

    pub fn is_complete(&self, required: &[String]) -> bool {
        required.iter().all(|v| self.is_done(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<String> {
        vec!["480".to_string(), "720".to_string(), "1080".to_string()]
    }

    #[test]
    fn test_empty_status_is_missing_everything() {
        let status = ItemStatus::default();
        assert!(!status.is_complete(&required()));
        assert_eq!(status.missing(&required()).len(), 3);
    }

    #[test]
    fn test_missing_keeps_required_order() {
        let mut status = ItemStatus::default();
        status.variants.insert("720".to_string(), true);
        let required = required();
        let missing: Vec<&str> = status
            .missing(&required)
            .into_iter()
            .map(String::as_str)
            .collect();
        assert_eq!(missing, vec!["480", "1080"]);
    }

    #[test]
    fn test_false_flag_counts_as_missing() {
        let mut status = ItemStatus::default();
        for v in required() {
            status.variants.insert(v, true);
        }
        status.variants.insert("480".to_string(), false);
        assert!(!status.is_complete(&required()));
        assert!(!status.is_done("480"));
    }

    #[test]
    fn test_complete_ignores_extra_variants() {
        let mut status = ItemStatus::default();
        for v in required() {
            status.variants.insert(v, true);
        }
        status.variants.insert("Hdrip".to_string(), false);
        assert!(status.is_complete(&required()));
    }

    #[test]
    fn test_item_key_display() {
        assert_eq!(ItemKey::new("frieren", "07").to_string(), "frieren#07");
    }
}
