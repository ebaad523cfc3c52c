use crate::citation_engine::{CitationEngine, CitationError, CitationRecord};
use crate::dom::{Dom, DomError};
use crate::Pass;
use thiserror::Error;
use tracing::{debug, info, warn};

const CITATION_SELECTOR: &str = ".citation";
const BIBLIOGRAPHY_SELECTOR: &str = "#bibliography";

#[derive(Debug, Error)]
pub enum BibliographyError {
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Citation(#[from] CitationError),
}

/// `(Family, Year)` or `(Family, Year, p. N)`.
pub fn inline_citation(record: &CitationRecord, page: Option<&str>) -> Option<String> {
    let family = record.first_family()?;
    let year = record.year()?;
    Some(match page.map(str::trim).filter(|p| !p.is_empty()) {
        Some(page) => format!("({}, {}, p. {})", family, year, page),
        None => format!("({}, {})", family, year),
    })
}

/// Format every `.citation` marker and fill `#bibliography` in its declared
/// CSL style.
pub fn render<D, E>(page: &mut D, engine: &mut E, locale: &str) -> Result<Pass, BibliographyError>
where
    D: Dom + ?Sized,
    E: CitationEngine + ?Sized,
{
    let markers = page.query_all(CITATION_SELECTOR)?;
    if markers.is_empty() {
        debug!("no citations");
        return Ok(Pass::NotRequested);
    }

    let keys: Vec<String> = markers
        .iter()
        .map(|m| m.attr("data-key").unwrap_or_default().trim().to_string())
        .collect();
    let wanted: Vec<String> = keys.iter().filter(|k| !k.is_empty()).cloned().collect();
    let records = if wanted.is_empty() {
        Vec::new()
    } else {
        engine.register(&wanted)?
    };

    let style = page
        .query(BIBLIOGRAPHY_SELECTOR)?
        .and_then(|b| b.attr("data-style").map(str::to_string))
        .filter(|s| !s.trim().is_empty());
    let Some(style) = style else {
        debug!(citations = markers.len(), "citations present but no bibliography requested");
        return Ok(Pass::NotRequested);
    };

    let mut formatted = 0usize;
    for (index, (marker, key)) in markers.iter().zip(&keys).enumerate() {
        if key.is_empty() {
            warn!(index, "citation without data-key");
            continue;
        }
        let Some(record) = records.iter().find(|r| &r.id == key) else {
            warn!(key = %key, "no bibliography entry for citation");
            continue;
        };
        match inline_citation(record, marker.attr("data-page")) {
            Some(text) => {
                page.set_inner_html(CITATION_SELECTOR, index, &text)?;
                formatted += 1;
            }
            None => warn!(key = %key, "entry lacks an author family name or year"),
        }
    }

    let html = engine.render_bibliography(&style, locale)?;
    page.set_inner_html(BIBLIOGRAPHY_SELECTOR, 0, &html)?;

    info!(
        citations = markers.len(),
        formatted,
        entries = records.len(),
        style = %style,
        "bibliography rendered"
    );
    Ok(Pass::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation_engine::testing::{record, FixedEngine};
    use crate::dom::testing::*;

    fn citation(key: &str, page: Option<&str>) -> crate::dom::Element {
        let mut e = with_attr(with_attr(element("span"), "class", "citation"), "data-key", key);
        if let Some(page) = page {
            e = with_attr(e, "data-page", page);
        }
        e.inner_html = format!("[{}]", key);
        e
    }

    fn bibliography(style: &str) -> crate::dom::Element {
        with_attr(with_attr(element("div"), "id", "bibliography"), "data-style", style)
    }

    fn engine() -> FixedEngine {
        FixedEngine {
            records: vec![record("smith2020", "Smith", 2020), record("doe1999", "Doe", 1999)],
            ..FixedEngine::default()
        }
    }

    #[test]
    fn inline_forms() {
        let r = record("k", "Smith", 2020);
        assert_eq!(inline_citation(&r, None).as_deref(), Some("(Smith, 2020)"));
        assert_eq!(inline_citation(&r, Some("")).as_deref(), Some("(Smith, 2020)"));
        assert_eq!(
            inline_citation(&r, Some("42")).as_deref(),
            Some("(Smith, 2020, p. 42)")
        );
        assert_eq!(inline_citation(&CitationRecord::default(), None), None);
    }

    #[test]
    fn no_citations_is_a_no_op() {
        let mut page = FakePage::new();
        page.push(bibliography("apa"));
        let mut engine = engine();

        let pass = render(&mut page, &mut engine, "en-US").unwrap();

        assert_eq!(pass, Pass::NotRequested);
        assert_eq!(page.writes, 0);
        assert!(engine.registered.is_empty());
    }

    #[test]
    fn citations_without_bibliography_stay_unformatted() {
        let mut page = FakePage::new();
        page.push(citation("smith2020", None));
        let mut engine = engine();

        let pass = render(&mut page, &mut engine, "en-US").unwrap();

        assert_eq!(pass, Pass::NotRequested);
        assert_eq!(page.writes, 0);
        assert_eq!(page.find(".citation")[0].inner_html, "[smith2020]");
        assert!(engine.rendered_with.is_none());
    }

    #[test]
    fn blank_style_counts_as_absent() {
        let mut page = FakePage::new();
        page.push(citation("smith2020", None)).push(bibliography(" "));
        let pass = render(&mut page, &mut engine(), "en-US").unwrap();
        assert_eq!(pass, Pass::NotRequested);
        assert_eq!(page.writes, 0);
    }

    #[test]
    fn formats_markers_and_bibliography() {
        let mut page = FakePage::new();
        page.push(citation("smith2020", None))
            .push(citation("smith2020", Some("42")))
            .push(citation("doe1999", Some("")))
            .push(bibliography("apa"));
        let mut engine = engine();

        let pass = render(&mut page, &mut engine, "en-GB").unwrap();

        assert_eq!(pass, Pass::Applied);
        let texts: Vec<&str> = page
            .find(".citation")
            .iter()
            .map(|e| e.inner_html.as_str())
            .collect();
        assert_eq!(
            texts,
            vec!["(Smith, 2020)", "(Smith, 2020, p. 42)", "(Doe, 1999)"]
        );
        assert_eq!(engine.registered, vec!["smith2020", "smith2020", "doe1999"]);
        assert_eq!(
            engine.rendered_with,
            Some(("apa".to_string(), "en-GB".to_string()))
        );
        assert_eq!(
            page.find("#bibliography")[0].inner_html,
            "<div class=\"csl-bib-body\">2 entries</div>"
        );
    }

    #[test]
    fn unresolved_and_keyless_markers_do_not_block_the_rest() {
        let mut page = FakePage::new();
        page.push(citation("smith2020", None))
            .push(citation("not-a-real-key", None))
            .push(with_attr(element("span"), "class", "citation"))
            .push(citation("doe1999", Some("7")))
            .push(bibliography("apa"));
        let mut engine = engine();

        let pass = render(&mut page, &mut engine, "en-US").unwrap();

        assert_eq!(pass, Pass::Applied);
        assert_eq!(
            engine.registered,
            vec!["smith2020", "not-a-real-key", "doe1999"]
        );
        let markers = page.find(".citation");
        assert_eq!(markers[0].inner_html, "(Smith, 2020)");
        assert_eq!(markers[1].inner_html, "[not-a-real-key]");
        assert_eq!(markers[2].inner_html, "");
        assert_eq!(markers[3].inner_html, "(Doe, 1999, p. 7)");
    }

    #[test]
    fn only_keyless_markers_skip_the_engine_lookup() {
        let mut page = FakePage::new();
        page.push(with_attr(with_attr(element("span"), "class", "citation"), "data-key", " "))
            .push(bibliography("apa"));
        let mut engine = engine();

        let pass = render(&mut page, &mut engine, "en-US").unwrap();

        assert_eq!(pass, Pass::Applied);
        assert!(engine.registered.is_empty());
        assert!(engine.rendered_with.is_some());
    }

    #[test]
    fn unknown_key_leaves_marker_alone() {
        let mut page = FakePage::new();
        page.push(citation("missing", Some("3")))
            .push(citation("doe1999", None))
            .push(bibliography("vancouver"));

        let pass = render(&mut page, &mut engine(), "en-US").unwrap();

        assert_eq!(pass, Pass::Applied);
        let markers = page.find(".citation");
        assert_eq!(markers[0].inner_html, "[missing]");
        assert_eq!(markers[1].inner_html, "(Doe, 1999)");
    }
}
