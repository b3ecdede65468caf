// Library view: storefront entries mapped to domain items, deduplicated, plus the
// "continue" shortcuts derived from saved progress.

use std::collections::HashSet;

use super::models::{ContentId, ContentKind, LibraryItem, ProgressRecord};
use crate::storefront_client::LibraryEntry;

/// Entries without a usable id or with an unknown product type are skipped.
pub fn map_entry(entry: &LibraryEntry) -> Option<LibraryItem> {
    let raw_id = entry
        .product_id
        .as_deref()
        .or(entry.mongo_id.as_deref())
        .or(entry.id.as_deref())?;
    let content_id = ContentId::parse(raw_id).ok()?;
    let kind = ContentKind::from_label(entry.kind.as_deref()?).ok()?;
    let title = entry
        .title
        .as_deref()
        .or(entry.name.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled")
        .to_string();
    Some(LibraryItem {
        content_id,
        title,
        kind,
        thumbnail_ref: entry.thumbnail.clone(),
        source_ref: entry.file_path.clone(),
        language: entry.language.clone().unwrap_or_default(),
        acquired_date: entry.purchased_at,
    })
}

/// `title_kind_language`, lowercased, anything non-alphanumeric folded to `_`.
pub fn identity_key(item: &LibraryItem) -> String {
    format!("{}_{}_{}", item.title, item.kind.identity_code(), item.language)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Map and deduplicate; the first occurrence of an identity wins.
pub fn build_library(entries: &[LibraryEntry]) -> Vec<LibraryItem> {
    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;
    for entry in entries {
        let Some(item) = map_entry(entry) else {
            skipped += 1;
            continue;
        };
        if seen.insert(identity_key(&item)) {
            items.push(item);
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "library entries without id or known type");
    }
    items
}

/// Library item with whatever progress is saved for it.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryCard {
    pub item: LibraryItem,
    pub progress: Option<ProgressRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContinueShortcuts {
    pub reading: Option<LibraryCard>,
    pub listening: Option<LibraryCard>,
}

/// Per kind, the card whose progress was updated most recently. Cards without a
/// resumable record are not candidates.
pub fn continue_shortcuts(cards: &[LibraryCard]) -> ContinueShortcuts {
    let latest = |kind: ContentKind| {
        cards
            .iter()
            .filter(|c| c.item.kind == kind)
            .filter_map(|c| {
                let progress = c.progress.as_ref().filter(|p| p.is_resumable())?;
                Some((progress.updated_at, c))
            })
            .max_by_key(|(updated_at, _)| *updated_at)
            .map(|(_, c)| c.clone())
    };
    ContinueShortcuts {
        reading: latest(ContentKind::Ebook),
        listening: latest(ContentKind::Audiobook),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn entry(id: &str, title: &str, kind: &str, language: &str) -> LibraryEntry {
        serde_json::from_value(serde_json::json!({
            "productId": id,
            "title": title,
            "type": kind,
            "language": language,
        }))
        .unwrap()
    }

    #[test]
    fn maps_fallback_fields() {
        let e: LibraryEntry = serde_json::from_value(serde_json::json!({
            "_id": "64f0c2",
            "name": "Dune",
            "type": "AUDIOBOOK",
        }))
        .unwrap();
        let item = map_entry(&e).unwrap();
        assert_eq!(item.content_id.as_str(), "64f0c2");
        assert_eq!(item.title, "Dune");
        assert_eq!(item.kind, ContentKind::Audiobook);
        assert_eq!(item.language, "");
    }

    #[test]
    fn unusable_entries_are_dropped() {
        assert!(map_entry(&entry("undefined", "Dune", "EBOOK", "en")).is_none());
        assert!(map_entry(&entry("p1", "Dune", "Magazine", "en")).is_none());
    }

    #[test]
    fn identity_key_normalizes() {
        let item = map_entry(&entry("p1", "Dune: Part One", "E-Book", "EN")).unwrap();
        assert_eq!(identity_key(&item), "dune__part_one_e_en");
    }

    #[test]
    fn duplicates_keep_first() {
        let items = build_library(&[
            entry("p1", "Dune", "EBOOK", "en"),
            entry("p2", "dune", "E-Book", "EN"),
            entry("p3", "Dune", "AUDIOBOOK", "en"),
            entry("p4", "Dune", "EBOOK", "de"),
        ]);
        let ids: Vec<&str> = items.iter().map(|i| i.content_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3", "p4"]);
    }

    #[test]
    fn shortcuts_pick_latest_per_kind() {
        let card = |id: &str, kind: &str, position: f64, hour: u32| {
            let item = map_entry(&entry(id, id, kind, "en")).unwrap();
            let progress = ProgressRecord::new(item.content_id.clone(), item.kind, position, 100.0)
                .at(Utc.with_ymd_and_hms(2025, 9, 1, hour, 0, 0).unwrap());
            LibraryCard {
                item,
                progress: Some(progress),
            }
        };
        let cards = vec![
            card("b1", "EBOOK", 10.0, 8),
            card("b2", "EBOOK", 20.0, 9),
            card("b3", "EBOOK", 99.0, 10),
            card("a1", "AUDIOBOOK", 30.0, 7),
        ];
        let shortcuts = continue_shortcuts(&cards);
        assert_eq!(shortcuts.reading.unwrap().item.content_id.as_str(), "b2");
        assert_eq!(shortcuts.listening.unwrap().item.content_id.as_str(), "a1");
    }
}
