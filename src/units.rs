//! Physical lengths, page geometry and `@page` margin extraction.

use regex::Regex;
use serde::Deserialize;

pub const PX_PER_IN: f64 = 96.0;
pub const PX_PER_CM: f64 = PX_PER_IN / 2.54;
pub const PX_PER_MM: f64 = PX_PER_CM / 10.0;
pub const PX_PER_PT: f64 = PX_PER_IN / 72.0;
pub const PX_PER_PC: f64 = PX_PER_PT * 12.0;

/// US Letter at 96 DPI.
pub const DEFAULT_WIDTH: f64 = 8.5 * PX_PER_IN;
pub const DEFAULT_HEIGHT: f64 = 11.0 * PX_PER_IN;

lazy_static! {
    static ref MAGNITUDE: Regex = Regex::new(r"(\d+(?:\.\d*)?|\.\d+)\s*([A-Za-z]*)").unwrap();
    static ref MARGIN_DECL: Regex =
        Regex::new(r"(?i)(?:^|[\s;{])(margin(?:-top|-right|-bottom|-left)?)\s*:\s*([^;}]*)").unwrap();
}

/// A page dimension: either pixels already, or CSS-ish text such as `"210mm"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Length {
    Pixels(f64),
    Text(String),
}

impl Length {
    pub fn to_pixels(&self) -> Option<f64> {
        match self {
            Length::Pixels(px) => Some(*px),
            Length::Text(text) => to_pixels(text),
        }
    }
}

impl std::str::FromStr for Length {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().parse::<f64>() {
            Ok(px) => Length::Pixels(px),
            Err(_) => Length::Text(s.trim().to_string()),
        })
    }
}

/// Convert the first `<number><unit>` in `text` to pixels.
///
/// Unknown units pass the magnitude through; text without any number is `None`.
pub fn to_pixels(text: &str) -> Option<f64> {
    let caps = MAGNITUDE.captures(text)?;
    let num: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    Some(match unit.to_ascii_lowercase().as_str() {
        "px" => num,
        "in" => num * PX_PER_IN,
        "cm" => num * PX_PER_CM,
        "mm" => num * PX_PER_MM,
        "pt" => num * PX_PER_PT,
        "pc" => num * PX_PER_PC,
        _ => num,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Margins {
    pub top: f64,
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Margins {
    pub fn uniform(size: f64) -> Self {
        Self {
            top: size,
            left: size,
            right: size,
            bottom: size,
        }
    }
}

/// The body of the first `@page { ... }` rule found in any of `styles`.
pub fn page_rule(styles: &[String]) -> Option<&str> {
    styles.iter().find_map(|css| page_rule_in(css))
}

/// Only a bare `@page {` counts; `@page :first { ... }` and friends style a
/// subset of pages.
fn page_rule_in(css: &str) -> Option<&str> {
    let mut from = 0;
    let open = loop {
        let at = from + css[from..].find("@page")?;
        let after = at + "@page".len();
        let brace = after + css[after..].find('{')?;
        if css[after..brace].trim().is_empty() {
            break brace;
        }
        from = after;
    };
    let mut depth = 0usize;
    for (i, ch) in css[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&css[open + 1..open + i]);
                }
            }
            _ => {}
        }
    }
    // unterminated rule: take the rest
    Some(&css[open + 1..])
}

fn strip_important(value: &str) -> &str {
    match value.find('!') {
        Some(bang) => value[..bang].trim_end(),
        None => value,
    }
}

/// Margins declared by the document's `@page` rule, in pixels.
///
/// The `margin` shorthand wins over the longhands when both are present.
pub fn page_margins(styles: &[String]) -> Margins {
    let Some(rule) = page_rule(styles) else {
        return Margins::default();
    };
    let mut shorthand: Option<Vec<f64>> = None;
    let mut longhand = Margins::default();
    for caps in MARGIN_DECL.captures_iter(rule) {
        let property = caps[1].to_ascii_lowercase();
        let value = caps[2].trim();
        match property.as_str() {
            "margin" => {
                let sides: Vec<f64> = strip_important(value)
                    .split_whitespace()
                    .filter_map(|v| match v {
                        "auto" => Some(0.0),
                        _ => to_pixels(v),
                    })
                    .collect();
                if !sides.is_empty() && shorthand.is_none() {
                    shorthand = Some(sides);
                }
            }
            "margin-top" => longhand.top = to_pixels(strip_important(value)).unwrap_or(0.0),
            "margin-right" => longhand.right = to_pixels(strip_important(value)).unwrap_or(0.0),
            "margin-bottom" => longhand.bottom = to_pixels(strip_important(value)).unwrap_or(0.0),
            "margin-left" => longhand.left = to_pixels(strip_important(value)).unwrap_or(0.0),
            _ => {}
        }
    }
    match shorthand.as_deref() {
        Some([all]) => Margins::uniform(*all),
        Some([vertical, horizontal]) => Margins {
            top: *vertical,
            bottom: *vertical,
            left: *horizontal,
            right: *horizontal,
        },
        Some([top, horizontal, bottom]) => Margins {
            top: *top,
            bottom: *bottom,
            left: *horizontal,
            right: *horizontal,
        },
        Some([top, right, bottom, left, ..]) => Margins {
            top: *top,
            right: *right,
            bottom: *bottom,
            left: *left,
        },
        _ => longhand,
    }
}

/// Printable area of a page once margins are removed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentBox {
    pub width: f64,
    pub height: f64,
}

impl ContentBox {
    pub fn new(width: f64, height: f64, margins: &Margins) -> Self {
        Self {
            width: width - margins.left - margins.right,
            height: height - margins.top - margins.bottom,
        }
    }
}
