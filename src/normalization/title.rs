use regex::Regex;
use std::sync::OnceLock;
use strsim::jaro_winkler;

static EDITION_RE: OnceLock<Regex> = OnceLock::new();
static GLYPH_RE: OnceLock<Regex> = OnceLock::new();
static STORE_APP_RE: OnceLock<Regex> = OnceLock::new();

fn edition_re() -> &'static Regex {
    EDITION_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\s*\b(?:remastered|director['’]s cut|game of the year edition|goty edition|definitive edition|complete edition|hd remaster|(?:the )?final cut|part (?:ii|i|2|1)\b)",
        )
        .expect("edition pattern is valid")
    })
}

fn glyph_re() -> &'static Regex {
    GLYPH_RE.get_or_init(|| Regex::new(r"[™®©]").expect("glyph pattern is valid"))
}

fn store_app_re() -> &'static Regex {
    STORE_APP_RE.get_or_init(|| Regex::new(r"app/(\d+)").expect("store url pattern is valid"))
}

/// Strip edition suffixes and trademark glyphs so a storefront search has a
/// better chance of matching.
///
/// `"Disco Elysium - The Final Cut™"` becomes `"Disco Elysium"`. The result is
/// a search term only and must never be written back to the catalog.
pub fn clean_game_title(title: &str) -> String {
    let without_glyphs = glyph_re().replace_all(title, "");
    let without_editions = edition_re().replace_all(&without_glyphs, "");
    let collapsed = without_editions
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '–' | '—' | ','))
        .trim()
        .to_string()
}

/// Numeric storefront id embedded in a store URL path (`.../app/<id>/...`).
pub fn store_app_id_from_url(url: &str) -> Option<i64> {
    store_app_re()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

/// Case-insensitive Jaro-Winkler similarity between two titles, glyphs ignored.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let norm = |s: &str| glyph_re().replace_all(s, "").trim().to_lowercase();
    jaro_winkler(&norm(a), &norm(b))
}
