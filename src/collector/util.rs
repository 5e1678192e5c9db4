//! Text helpers shared by the collectors.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HTML_TAG: Regex = Regex::new(r"(?s)<[^>]*>").expect("valid tag regex");
    static ref DOI: Regex =
        Regex::new(r#"10\.\d{4,9}/[^\s<>\[\]()"]+"#).expect("valid doi regex");
    static ref FEED_ITEM: Regex =
        Regex::new(r"(?s)<(?:item|entry)\b[^>]*>(.*?)</(?:item|entry)>").expect("valid item regex");
    static ref DC_IDENTIFIER: Regex =
        Regex::new(r"(?s)<dc:identifier\b[^>]*>(.*?)</dc:identifier>").expect("valid identifier regex");
}

/// Removes markup, decodes the common entities and collapses whitespace.
pub fn strip_html(text: &str) -> String {
    let without_tags = HTML_TAG.replace_all(text, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First DOI found in `text`, without trailing sentence punctuation.
pub fn extract_doi(text: &str) -> Option<String> {
    DOI.find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string())
        .filter(|doi| doi.contains('/'))
}

/// First DOI across `candidates`, checked in order.
pub fn first_doi<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    candidates.into_iter().flatten().find_map(extract_doi)
}

/// Splits a single author field on `;`, then on `" & "`.
pub fn split_authors(raw: &str) -> Vec<String> {
    raw.split(';')
        .flat_map(|part| part.split(" & "))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Only absolute http(s) links are kept on papers.
pub fn is_valid_url(url: &str) -> bool {
    url::Url::parse(url.trim()).is_ok_and(|parsed| matches!(parsed.scheme(), "http" | "https"))
}

/// The `dc:identifier` of every `<item>`/`<entry>` in `body`, in document order.
///
/// The feed parser drops Dublin Core identifiers, so they are read from the raw markup.
pub fn dc_identifiers(body: &str) -> Vec<Option<String>> {
    FEED_ITEM
        .captures_iter(body)
        .map(|item| {
            DC_IDENTIFIER
                .captures(&item[1])
                .map(|id| strip_html(&id[1]))
                .filter(|id| !id.is_empty())
        })
        .collect()
}

/// Clean up malformed XML so the feed parser gets a second chance.
pub fn cleanup_xml(xml: &str) -> String {
    let mut cleaned = xml.trim().trim_start_matches('\u{FEFF}').to_string();

    if let Some(xml_start) = cleaned.find("<?xml") {
        cleaned = cleaned[xml_start..].to_string();
    } else if let Some(rss_start) = cleaned.find("<rss") {
        cleaned = cleaned[rss_start..].to_string();
    } else if let Some(feed_start) = cleaned.find("<feed") {
        cleaned = cleaned[feed_start..].to_string();
    }

    cleaned
        .replace("&nbsp;", "&#160;")
        .replace("&ndash;", "&#8211;")
        .replace("&mdash;", "&#8212;")
        .replace("&rsquo;", "&#8217;")
        .replace("&lsquo;", "&#8216;")
        .replace("&rdquo;", "&#8221;")
        .replace("&ldquo;", "&#8220;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<p>Selection on <i>Anolis</i>&nbsp;limbs &amp; toes</p>\n<br/>"),
            "Selection on Anolis limbs & toes"
        );
    }

    #[test]
    fn test_extract_doi() {
        assert_eq!(extract_doi("doi:10.1101/2024.05.01.591234").as_deref(), Some("10.1101/2024.05.01.591234"));
        assert_eq!(
            extract_doi("see https://doi.org/10.1038/s41559-024-02345-6.").as_deref(),
            Some("10.1038/s41559-024-02345-6")
        );
        assert_eq!(extract_doi("(10.1111/evo.14000)").as_deref(), Some("10.1111/evo.14000"));
        assert_eq!(extract_doi("<a>10.1234/abc</a>").as_deref(), Some("10.1234/abc"));
        assert_eq!(extract_doi("no identifier here"), None);
        assert_eq!(extract_doi("10.12/short"), None);
    }

    #[test]
    fn test_first_doi_checks_in_order() {
        assert_eq!(
            first_doi([None, Some("text 10.1111/b"), Some("10.1111/c")]).as_deref(),
            Some("10.1111/b")
        );
        assert_eq!(first_doi([Some("nothing"), None]), None);
    }

    #[test]
    fn test_split_authors() {
        assert_eq!(
            split_authors("Smith, J.; Doe, A. & Roe, B.;  "),
            vec!["Smith, J.", "Doe, A.", "Roe, B."]
        );
        assert!(split_authors("").is_empty());
    }

    #[test]
    fn test_cleanup_xml() {
        let cleaned = cleanup_xml("\u{FEFF}  junk<?xml version=\"1.0\"?><rss>&nbsp;</rss>");
        assert!(cleaned.starts_with("<?xml"));
        assert!(cleaned.contains("&#160;"));
    }

    #[test]
    fn test_is_valid_url() {
        assert!(is_valid_url("https://example.org/feed"));
        assert!(is_valid_url(" http://example.org/a?rss=1 "));
        assert!(!is_valid_url("ftp://example.org/feed"));
        assert!(!is_valid_url("/relative/path"));
    }

    #[test]
    fn test_dc_identifiers_follow_items() {
        let body = r#"<rdf:RDF>
  <channel><items><rdf:Seq><rdf:li rdf:resource="a"/></rdf:Seq></items></channel>
  <item rdf:about="a"><title>A</title><dc:identifier>doi:10.1101/2024.05.01.591234</dc:identifier></item>
  <item rdf:about="b"><title>B</title></item>
  <item><dc:identifier> </dc:identifier></item>
</rdf:RDF>"#;
        assert_eq!(
            dc_identifiers(body),
            vec![Some("doi:10.1101/2024.05.01.591234".to_string()), None, None]
        );
    }
}
