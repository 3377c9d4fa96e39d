//! GROBID TEI → paragraph text using quick-xml
//!
//! Streaming walk over `<body>`: every `<p>` inside a `<div>` becomes one
//! paragraph, with the text of `<ref>` elements (citation markers, figure
//! callouts) left out.

use std::sync::LazyLock;

use anyhow::Result;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid URL regex"));

/// Per-page footer ChemRxiv stamps into every PDF.
static LICENSE_FOOTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\s*ORCID:\s*.*?Content not peer-reviewed by ChemRxiv\. License:\s*CC BY(?:-[A-Za-z]+)*\s*4\.0",
    )
    .expect("valid footer regex")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Paragraph text of a TEI document, in document order.
///
/// A paragraph belongs to its innermost `<div>`; paragraphs directly under
/// `<body>` are ignored. With `concat_per_div` the paragraphs of each div
/// are joined with newlines into one entry.
pub fn extract_paragraphs(xml: &str, concat_per_div: bool) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut out = Vec::new();
    let mut body_depth = 0usize;
    let mut divs: Vec<Vec<String>> = Vec::new();
    let mut p_depth = 0usize;
    let mut ref_depth = 0usize;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"body" => body_depth += 1,
                b"div" if body_depth > 0 && p_depth == 0 => divs.push(Vec::new()),
                b"p" if !divs.is_empty() => {
                    if p_depth == 0 {
                        text.clear();
                    }
                    p_depth += 1;
                }
                b"ref" if p_depth > 0 => ref_depth += 1,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"body" => body_depth = body_depth.saturating_sub(1),
                b"div" if body_depth > 0 && p_depth == 0 => {
                    if let Some(paragraphs) = divs.pop() {
                        if concat_per_div {
                            let joined = paragraphs.join("\n");
                            if !joined.is_empty() {
                                out.push(joined);
                            }
                        } else {
                            out.extend(paragraphs);
                        }
                    }
                }
                b"p" if p_depth > 0 => {
                    p_depth -= 1;
                    if p_depth == 0 {
                        let paragraph = text.trim();
                        if let Some(div) = divs.last_mut().filter(|_| !paragraph.is_empty()) {
                            div.push(paragraph.to_string());
                        }
                    }
                }
                b"ref" if ref_depth > 0 => ref_depth -= 1,
                _ => {}
            },
            Event::Text(e) if p_depth > 0 && ref_depth == 0 => text.push_str(&e.unescape()?),
            Event::CData(e) if p_depth > 0 && ref_depth == 0 => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// Normalize one extracted paragraph.
///
/// NFC, URLs and the ChemRxiv license footer removed, whitespace runs
/// collapsed to single spaces.
pub fn clean_paragraph(text: &str) -> String {
    let text: String = text.nfc().collect();
    let text = URL.replace_all(&text, "");
    let text = LICENSE_FOOTER.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Preprint id from a TEI file name: everything before the first dot.
///
/// `abc123.grobid.tei.xml` → `abc123`
pub fn preprint_id(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEI: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <teiHeader><profileDesc><abstract><p>Abstract text.</p></abstract></profileDesc></teiHeader>
  <text>
    <body>
      <p>Loose paragraph.</p>
      <div>
        <head>Introduction</head>
        <p>Catalysts <ref type="bibr" target="#b0">[1]</ref> are fast.</p>
        <p>Second <hi rend="italic">paragraph</hi> &amp; more.</p>
      </div>
      <div>
        <p>  </p>
        <p>Only one here.</p>
      </div>
    </body>
    <back><div><p>Acknowledgements.</p></div></back>
  </text>
</TEI>"##;

    #[test]
    fn paragraphs_per_p_without_refs() {
        let paragraphs = extract_paragraphs(TEI, false).unwrap();
        assert_eq!(
            paragraphs,
            [
                "Catalysts  are fast.",
                "Second paragraph & more.",
                "Only one here."
            ]
        );
    }

    #[test]
    fn paragraphs_joined_per_div() {
        let paragraphs = extract_paragraphs(TEI, true).unwrap();
        assert_eq!(
            paragraphs,
            [
                "Catalysts  are fast.\nSecond paragraph & more.",
                "Only one here."
            ]
        );
    }

    #[test]
    fn document_without_body() {
        let xml = r#"<TEI xmlns="http://www.tei-c.org/ns/1.0"><teiHeader/></TEI>"#;
        assert!(extract_paragraphs(xml, false).unwrap().is_empty());
    }

    #[test]
    fn mismatched_tags_are_an_error() {
        assert!(extract_paragraphs("<TEI><text><body><div><p>x</div></body></TEI>", false).is_err());
    }

    #[test]
    fn cleaning_drops_footer_and_urls() {
        let raw = "Yields  were high (see https://example.org/si).\n ORCID: https://orcid.org/0000-0001 \
                   Content not peer-reviewed by ChemRxiv. License: CC BY-NC-ND 4.0 Next page.";
        assert_eq!(clean_paragraph(raw), "Yields were high (see Next page.");
    }

    #[test]
    fn cleaning_composes_unicode() {
        // "e" + combining acute
        assert_eq!(clean_paragraph("caf\u{0065}\u{0301}"), "caf\u{00e9}");
    }

    #[test]
    fn id_from_file_name() {
        assert_eq!(preprint_id("abc123.grobid.tei.xml"), "abc123");
        assert_eq!(preprint_id("abc123.xml"), "abc123");
    }
}
