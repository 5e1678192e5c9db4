//! Canonical keys for papers and order-preserving duplicate removal.
//!
//! A DOI, when present, is authoritative. Otherwise the title is normalised so the same
//! work listed by two sources (different casing, accents, spacing, or typographic
//! fractions) lands on the same key.

use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::paper::Paper;

const FRACTIONS: &[(char, &str)] = &[
    ('¼', "1/4"),
    ('½', "1/2"),
    ('¾', "3/4"),
    ('⅐', "1/7"),
    ('⅑', "1/9"),
    ('⅒', "1/10"),
    ('⅓', "1/3"),
    ('⅔', "2/3"),
    ('⅕', "1/5"),
    ('⅖', "2/5"),
    ('⅗', "3/5"),
    ('⅘', "4/5"),
    ('⅙', "1/6"),
    ('⅚', "5/6"),
    ('⅛', "1/8"),
    ('⅜', "3/8"),
    ('⅝', "5/8"),
    ('⅞', "7/8"),
    ('\u{2044}', "/"),
];

fn substitute_fractions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match FRACTIONS.iter().find(|(frac, _)| *frac == c) {
            Some((_, ascii)) => out.push_str(ascii),
            None => out.push(c),
        }
    }
    out
}

fn decompose_and_strip(text: &str) -> String {
    text.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Normalises a title for use as a dedup key.
///
/// NFKD decomposition with combining marks removed, typographic fractions spelled in
/// ASCII, lower-cased, whitespace collapsed. `normalize_title` is idempotent.
pub fn normalize_title(title: &str) -> String {
    let stripped = decompose_and_strip(&substitute_fractions(title));
    // Lower-casing can reintroduce marks (e.g. U+0130), so decompose once more.
    let lowered = decompose_and_strip(&substitute_fractions(&stripped.to_lowercase()));
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `doi:<doi>` when the DOI is present, otherwise `title:<normalized title>`.
pub fn canonical_key(paper: &Paper) -> Option<String> {
    if let Some(doi) = paper.doi() {
        return Some(format!("doi:{}", doi));
    }

    let normalized = normalize_title(&paper.title);
    if normalized.is_empty() {
        None
    } else {
        Some(format!("title:{}", normalized))
    }
}

/// Keeps the first occurrence of each canonical key, in input order. Papers without a
/// key are dropped.
pub fn remove_duplicates(papers: Vec<Paper>) -> Vec<Paper> {
    let mut seen = HashSet::new();
    papers
        .into_iter()
        .filter(|paper| match canonical_key(paper) {
            Some(key) => seen.insert(key),
            None => false,
        })
        .collect()
}
