use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Snapshot of one element as seen by the live page at query time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Element {
    pub tag_name: String,
    pub id: String,
    pub class_name: String,
    pub attributes: BTreeMap<String, String>,
    pub inner_html: String,
    pub offset_top: f64,
    pub offset_height: f64,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.class_name.split_whitespace().any(|c| c == class)
    }

    /// Heading level from the tag name (`H3` -> 3), `None` for anything else.
    pub fn heading_level(&self) -> Option<usize> {
        let tag = self.tag_name.to_ascii_lowercase();
        let level = tag.strip_prefix('h')?.parse::<usize>().ok()?;
        (1..=6).contains(&level).then_some(level)
    }
}

#[derive(Debug, Error)]
pub enum DomError {
    #[error("browser error: {0}")]
    Browser(#[from] crate::browser::BrowserError),
    #[error("no element {index} for selector `{selector}`")]
    MissingElement { selector: String, index: usize },
}

/// The handful of page operations the post-processing passes need.
///
/// A selector that matches nothing is not an error: `query_all` returns an
/// empty list and `query` returns `None`. Errors are reserved for the page
/// itself failing.
pub trait Dom {
    fn query_all(&mut self, selector: &str) -> Result<Vec<Element>, DomError>;

    fn query(&mut self, selector: &str) -> Result<Option<Element>, DomError> {
        Ok(self.query_all(selector)?.into_iter().next())
    }

    /// Text of every `<style>` element, in document order.
    fn style_texts(&mut self) -> Result<Vec<String>, DomError> {
        Ok(self
            .query_all("style")?
            .into_iter()
            .map(|e| e.inner_html)
            .collect())
    }

    /// Replace the inner HTML of the `index`-th element matching `selector`.
    fn set_inner_html(&mut self, selector: &str, index: usize, html: &str)
        -> Result<(), DomError>;

    fn set_attribute(
        &mut self,
        selector: &str,
        index: usize,
        name: &str,
        value: &str,
    ) -> Result<(), DomError>;

    /// Set a CSS property on every element matching `selector`.
    fn set_style(&mut self, selector: &str, property: &str, value: &str) -> Result<(), DomError>;
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn heading_level_from_tag() {
        assert_eq!(heading(3, "x", 0.0, 0.0).heading_level(), Some(3));
        assert_eq!(element("div").heading_level(), None);
        assert_eq!(element("h7").heading_level(), None);
        assert_eq!(element("header").heading_level(), None);
    }

    #[test]
    fn class_match_is_per_token() {
        let e = with_attr(element("div"), "class", "intro new-page");
        assert!(e.has_class("new-page"));
        assert!(!e.has_class("new"));
    }

    #[test]
    fn missing_selector_is_none_not_error() {
        let mut page = FakePage::new();
        page.push(element("p"));
        assert!(page.query("#bibliography").unwrap().is_none());
        assert!(page.query_all(".citation").unwrap().is_empty());
    }

    #[test]
    fn element_snapshot_reads_camel_case_json() {
        let json = r#"{"tagName":"H2","id":"a","className":"","attributes":{"id":"a"},
            "innerHtml":"Intro","offsetTop":10.5,"offsetHeight":20}"#;
        let e: Element = serde_json::from_str(json).unwrap();
        assert_eq!(e.heading_level(), Some(2));
        assert_eq!(e.offset_top + e.offset_height, 30.5);
        assert_eq!(e.attr("id"), Some("a"));
    }
}
