use crate::dom::{Dom, DomError, Element};
use crate::units::{self, ContentBox, Length};
use crate::Pass;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const PLACEHOLDER: &str = "{{PAGEHOLDER}}";
const TOC_SELECTOR: &str = "#table-of-contents";
const LINK_SELECTOR: &str = ".ToC-link";
const PAGE_BREAK_CLASS: &str = "new-page";
const ID_PREFIX: &str = "ToC-heading-id-";
const PAGE_NUMBER_SPAN: &str = "<span class=\"ToC-link-page-number\">";

#[derive(Debug, Error)]
pub enum TocError {
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error("page has no printable height ({height}px after margins)")]
    EmptyPageArea { height: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Heading {
    pub text: String,
    pub id: String,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageNumber {
    pub id: String,
    pub page: usize,
}

/// Geometry of one heading or page break, as measured after reflow.
#[derive(Debug, Clone, PartialEq)]
pub enum OutlineNode {
    Heading { id: String, top: f64, height: f64 },
    PageBreak { top: f64, height: f64 },
}

impl From<&Element> for OutlineNode {
    fn from(element: &Element) -> Self {
        if element.has_class(PAGE_BREAK_CLASS) {
            OutlineNode::PageBreak {
                top: element.offset_top,
                height: element.offset_height,
            }
        } else {
            OutlineNode::Heading {
                id: element.id.clone(),
                top: element.offset_top,
                height: element.offset_height,
            }
        }
    }
}

/// `h1, h2, ..., hN, .new-page`
pub fn outline_selector(depth: usize) -> String {
    let mut selector = (1..=depth)
        .map(|level| format!("h{}", level))
        .collect::<Vec<_>>()
        .join(", ");
    selector.push_str(", .");
    selector.push_str(PAGE_BREAK_CLASS);
    selector
}

/// Nested `<ul>` mirroring heading depth, with a page placeholder per entry.
pub fn render_list(items: &[Heading]) -> String {
    let mut out = String::from("<ul class=\"table-of-contents-list\">");
    let mut depth = 1usize;
    let mut open_item = false;

    for item in items {
        let target = item.depth.max(1);
        while depth < target {
            if !open_item {
                out.push_str("<li>");
            }
            out.push_str("<ul>");
            depth += 1;
            open_item = false;
        }
        while depth > target {
            if open_item {
                out.push_str("</li>");
            }
            out.push_str("</ul>");
            depth -= 1;
            open_item = true;
        }
        if open_item {
            out.push_str("</li>");
        }
        out.push_str(&link_item(item));
        open_item = true;
    }

    if open_item {
        out.push_str("</li>");
    }
    while depth > 1 {
        out.push_str("</ul></li>");
        depth -= 1;
    }
    out.push_str("</ul>");
    out
}

fn link_item(item: &Heading) -> String {
    format!(
        "<li class=\"ToC-link\" data-linked=\"{}\" id=\"{}\"><span class=\"ToC-link-heading\">{}</span> {}{}</span>",
        html_escape_attr(&item.id),
        html_escape_attr(&link_id(&item.id)),
        item.text,
        PAGE_NUMBER_SPAN,
        PLACEHOLDER
    )
}

/// Put `page` in place of the placeholder inside the link's own page-number
/// span, leaving heading text that happens to contain the token alone.
pub fn fill_page_number(link_html: &str, page: usize) -> Option<String> {
    let slot = link_html.find(PAGE_NUMBER_SPAN)? + PAGE_NUMBER_SPAN.len();
    let token = slot + link_html[slot..].find(PLACEHOLDER)?;
    let mut out = String::with_capacity(link_html.len());
    out.push_str(&link_html[..token]);
    out.push_str(&page.to_string());
    out.push_str(&link_html[token + PLACEHOLDER.len()..]);
    Some(out)
}

pub fn link_id(heading_id: &str) -> String {
    heading_id.replacen("heading", "link", 1)
}

fn html_escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Assign page numbers to headings given the printable page height.
///
/// A manual break moves to the next page and records how far short of the
/// page boundary it sat, so later offsets are measured from the new page top.
pub fn paginate(nodes: &[OutlineNode], page_height: f64) -> Result<Vec<PageNumber>, TocError> {
    if page_height <= 0.0 || !page_height.is_finite() {
        return Err(TocError::EmptyPageArea {
            height: page_height,
        });
    }
    let mut page = 1usize;
    let mut correction = 0.0f64;
    let mut numbers = Vec::new();

    for node in nodes {
        match node {
            OutlineNode::PageBreak { top, height } => {
                correction = page as f64 * page_height - (top + height);
                page += 1;
            }
            OutlineNode::Heading { id, top, height } => {
                while top + height + correction >= page as f64 * page_height {
                    page += 1;
                }
                numbers.push(PageNumber {
                    id: id.clone(),
                    page,
                });
            }
        }
    }
    Ok(numbers)
}

/// Headings in document order; blank ids are filled in on the page.
fn collect_headings<D: Dom + ?Sized>(
    page: &mut D,
    selector: &str,
) -> Result<Vec<Heading>, TocError> {
    let elements = page.query_all(selector)?;
    let mut headings = Vec::with_capacity(elements.len());
    let mut assigned = 0usize;

    for (index, element) in elements.iter().enumerate() {
        if element.has_class(PAGE_BREAK_CLASS) {
            continue;
        }
        let Some(depth) = element.heading_level() else {
            continue;
        };
        let id = if element.id.is_empty() {
            let id = format!("{}{}", ID_PREFIX, assigned);
            assigned += 1;
            page.set_attribute(selector, index, "id", &id)?;
            id
        } else {
            element.id.clone()
        };
        headings.push(Heading {
            text: element.inner_html.clone(),
            id,
            depth,
        });
    }
    Ok(headings)
}

fn declared_depth(raw: Option<&str>) -> Option<usize> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<usize>() {
        Ok(depth) if depth >= 1 => Some(depth.min(6)),
        _ => {
            warn!(depth = raw, "ignoring table of contents with unusable data-depth");
            None
        }
    }
}

fn resolve(length: Option<&Length>, default: f64, axis: &str) -> f64 {
    match length {
        None => default,
        Some(length) => match length.to_pixels() {
            Some(px) => px,
            None => {
                warn!(axis, value = ?length, "unreadable page size, using letter");
                default
            }
        },
    }
}

/// Fill `#table-of-contents` with a nested heading list and page numbers.
pub fn render<D: Dom + ?Sized>(
    page: &mut D,
    width: Option<&Length>,
    height: Option<&Length>,
) -> Result<Pass, TocError> {
    let width = resolve(width, units::DEFAULT_WIDTH, "width");
    let height = resolve(height, units::DEFAULT_HEIGHT, "height");

    let Some(placeholder) = page.query(TOC_SELECTOR)? else {
        debug!("no table of contents placeholder");
        return Ok(Pass::NotRequested);
    };
    let Some(depth) = declared_depth(placeholder.attr("data-depth")) else {
        debug!("table of contents has no depth");
        return Ok(Pass::NotRequested);
    };
    let selector = outline_selector(depth);

    let margins = units::page_margins(&page.style_texts()?);
    let area = ContentBox::new(width, height, &margins);
    debug!(width = area.width, height = area.height, ?margins, "page content box");
    if area.height <= 0.0 {
        return Err(TocError::EmptyPageArea {
            height: area.height,
        });
    }
    page.set_style("body", "width", &format!("{}px", area.width))?;

    let headings = collect_headings(page, &selector)?;
    page.set_inner_html(TOC_SELECTOR, 0, &render_list(&headings))?;

    // the list itself shifts the layout, so measure again
    let nodes: Vec<OutlineNode> = page
        .query_all(&selector)?
        .iter()
        .map(OutlineNode::from)
        .collect();
    let numbers = paginate(&nodes, area.height)?;

    for (index, link) in page.query_all(LINK_SELECTOR)?.iter().enumerate() {
        let Some(linked) = link.attr("data-linked") else {
            continue;
        };
        if let Some(number) = numbers.iter().find(|n| n.id == linked) {
            let Some(html) = fill_page_number(&link.inner_html, number.page) else {
                warn!(id = linked, "table of contents link has no page number slot");
                continue;
            };
            page.set_inner_html(LINK_SELECTOR, index, &html)?;
        }
    }

    info!(
        headings = headings.len(),
        pages = numbers.last().map(|n| n.page).unwrap_or(1),
        "table of contents rendered"
    );
    Ok(Pass::Applied)
}
