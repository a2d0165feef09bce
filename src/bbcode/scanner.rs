//! Extraction of image references from raw BBCode.

use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// `[img]URL[/img]`, tolerant of whitespace around the URL.
pub(crate) static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[img\]\s*(.+?)\s*\[/img\]").expect("img tag pattern is valid")
});

/// `[url=LINK][img]URL[/img][/url]`, a thumbnail wrapped in a link.
static LINKED_IMG_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[url=([^\]]+?)\]\[img\]\s*(.+?)\s*\[/img\]\[/url\]")
        .expect("linked img tag pattern is valid")
});

/// Return the distinct image URLs referenced by `[img]` tags in `raw`.
///
/// Duplicates collapse to one entry; iteration order is sorted so callers
/// process URLs deterministically.
pub fn extract_image_urls(raw: &str) -> BTreeSet<String> {
    IMG_TAG
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

/// Link targets of every `[url=LINK][img]...[/img][/url]` construct in `raw`.
pub fn find_linked_images(raw: &str) -> Vec<String> {
    LINKED_IMG_TAG
        .captures_iter(raw)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Replace every `[url=LINK][img]THUMB[/img][/url]` with `[img]LINK[/img]`.
///
/// The link target is usually the full-size image, so it becomes the one
/// mirrored and displayed.
pub fn unwrap_linked_images(raw: &str) -> String {
    LINKED_IMG_TAG
        .replace_all(raw, |c: &Captures| format!("[img]{}[/img]", c[1].trim()))
        .into_owned()
}
