//! Mapping release titles to pipeline items.

use regex_lite::Regex;

use super::{FeedEntry, PollerError};
use crate::ledger::ItemKey;
use crate::pipeline::Item;

/// Turns a feed entry into an [`Item`], or rejects it.
pub trait ItemResolver: Send + Sync {
    fn resolve(&self, entry: &FeedEntry) -> Option<Item>;
}

/// Release-name patterns tried in order, after leading `[Group]` tags are
/// stripped.
const DEFAULT_PATTERNS: &[&str] = &[
    // Show Name - 07 [1080p], Show Name - EP07v2
    r"^(?P<series>.+?)\s+-\s+(?:(?i:ep?)\s?)?(?P<episode>\d{1,4}(?:\.\d)?)(?:v\d)?(?:[\s\[\(.]|$)",
    // Show.Name.S01E07
    r"^(?P<series>.+?)[\s._]+(?i:s)\d{1,2}(?i:e)(?P<episode>\d{1,4})",
    // Show Name 07, Show Name #07
    r"^(?P<series>.+?)\s+(?:#|(?i:ep?)\s?)?(?P<episode>\d{1,4})(?:v\d)?(?:[\s\[\(.]|$)",
];

/// Resolves typical fansub release titles with regexes.
///
/// `series_id` is a lowercase slug of the series name and `episode_no` the
/// episode number without leading zeros, so `[Sub] Show - 07 [1080p]` and
/// `Show S01E7` map to the same item.
pub struct TitleResolver {
    patterns: Vec<Regex>,
    leading_tags: Regex,
}

impl TitleResolver {
    /// The built-in release-name patterns.
    pub fn new() -> Result<Self, PollerError> {
        Self::from_patterns(DEFAULT_PATTERNS)
    }

    /// A single custom pattern with `series` and `episode` groups.
    pub fn with_pattern(pattern: &str) -> Result<Self, PollerError> {
        Self::from_patterns(&[pattern])
    }

    fn from_patterns(patterns: &[&str]) -> Result<Self, PollerError> {
        let compile =
            |p: &str| Regex::new(p).map_err(|e| PollerError::InvalidPattern(e.to_string()));
        Ok(Self {
            patterns: patterns
                .iter()
                .map(|p| compile(p))
                .collect::<Result<_, _>>()?,
            leading_tags: compile(r"^(?:\s*[\[\(][^\]\)]*[\]\)])+\s*")?,
        })
    }

    /// Parse a title into its item key.
    pub fn key_for(&self, title: &str) -> Option<ItemKey> {
        let stripped = self.leading_tags.replace(title.trim(), "");
        self.patterns.iter().find_map(|re| {
            let caps = re.captures(&stripped)?;
            let series = slug(caps.name("series")?.as_str());
            let episode = normalize_episode(caps.name("episode")?.as_str());
            if series.is_empty() || episode.is_empty() {
                return None;
            }
            Some(ItemKey::new(series, episode))
        })
    }
}

impl ItemResolver for TitleResolver {
    fn resolve(&self, entry: &FeedEntry) -> Option<Item> {
        let key = self.key_for(&entry.title)?;
        Some(Item::new(key, entry.title.clone(), entry.link.clone()))
    }
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn normalize_episode(episode: &str) -> String {
    let trimmed = episode.trim_start_matches('0');
    if trimmed.is_empty() || trimmed.starts_with('.') {
        format!("0{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(title: &str) -> Option<ItemKey> {
        TitleResolver::new().unwrap().key_for(title)
    }

    #[test]
    fn test_fansub_titles() {
        assert_eq!(
            key("[SubsPlease] Frieren - 07 (1080p) [A1B2C3D4].mkv"),
            Some(ItemKey::new("frieren", "7"))
        );
        assert_eq!(
            key("[Group][Other] Spy x Family - 12v2 [720p]"),
            Some(ItemKey::new("spy-x-family", "12"))
        );
        assert_eq!(
            key("[Sub] Show - EP05 [1080p]"),
            Some(ItemKey::new("show", "5"))
        );
    }

    #[test]
    fn test_scene_style_titles() {
        assert_eq!(
            key("Some.Show.S01E07.1080p.WEB"),
            Some(ItemKey::new("some-show", "7"))
        );
    }

    #[test]
    fn test_same_item_from_different_titles() {
        assert_eq!(key("[A] Show - 07 [480p]"), key("Show S01E07"));
    }

    #[test]
    fn test_unresolvable_titles() {
        assert_eq!(key("[Sub] Just A Movie [1080p]"), None);
        assert_eq!(key(""), None);
    }

    #[test]
    fn test_special_episode_numbers() {
        assert_eq!(key("[Sub] Show - 00 [1080p]"), Some(ItemKey::new("show", "0")));
        assert_eq!(
            key("[Sub] Show - 07.5 [1080p]"),
            Some(ItemKey::new("show", "7.5"))
        );
    }

    #[test]
    fn test_custom_pattern() {
        let resolver =
            TitleResolver::with_pattern(r"^(?P<series>\w+)_(?P<episode>\d+)$").unwrap();
        assert_eq!(resolver.key_for("Show_03"), Some(ItemKey::new("show", "3")));
        assert!(TitleResolver::with_pattern("(").is_err());
    }

    #[test]
    fn test_resolve_keeps_title_and_locator() {
        let resolver = TitleResolver::new().unwrap();
        let entry = FeedEntry::new("[Sub] Show - 02 [1080p]", "magnet:?xt=urn:btih:x");
        let item = resolver.resolve(&entry).unwrap();
        assert_eq!(item.key, ItemKey::new("show", "2"));
        assert_eq!(item.title, entry.title);
        assert_eq!(item.locator, entry.link);
        assert!(item.variants.is_empty());
    }
}
