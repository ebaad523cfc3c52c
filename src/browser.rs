use crate::dom::{Dom, DomError, Element};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to spawn browser bridge `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("browser bridge io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed browser bridge message: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("browser bridge closed its output")]
    Closed,
    #[error("browser rejected `{op}`: {message}")]
    Rejected { op: &'static str, message: String },
}

/// Headless Chromium driven through puppeteer in a long-lived node process.
///
/// One JSON request per line on stdin, one JSON response per line on stdout.
pub struct NodeBrowser {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Open {
        path: &'a str,
    },
    QueryAll {
        selector: &'a str,
    },
    SetInnerHtml {
        selector: &'a str,
        index: usize,
        html: &'a str,
    },
    SetAttribute {
        selector: &'a str,
        index: usize,
        name: &'a str,
        value: &'a str,
    },
    SetStyle {
        selector: &'a str,
        property: &'a str,
        value: &'a str,
    },
    Content,
    Pdf {
        path: &'a str,
        width: f64,
        height: f64,
    },
    Close,
}

impl Request<'_> {
    fn name(&self) -> &'static str {
        match self {
            Request::Open { .. } => "open",
            Request::QueryAll { .. } => "query_all",
            Request::SetInnerHtml { .. } => "set_inner_html",
            Request::SetAttribute { .. } => "set_attribute",
            Request::SetStyle { .. } => "set_style",
            Request::Content => "content",
            Request::Pdf { .. } => "pdf",
            Request::Close => "close",
        }
    }
}

#[derive(Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

const BRIDGE_SCRIPT: &str = r#"const puppeteer = require('puppeteer');
const path = require('path');
const readline = require('readline');
let browser = null;
let page = null;
const snapshot = (el) => ({
  tagName: el.tagName,
  id: el.id || '',
  className: typeof el.className === 'string' ? el.className : '',
  attributes: Object.fromEntries(Array.from(el.attributes).map(a => [a.name, a.value])),
  innerHtml: el.innerHTML,
  offsetTop: el.offsetTop || 0,
  offsetHeight: el.offsetHeight || 0,
});
const handlers = {
  open: async (m) => {
    browser = await puppeteer.launch({ headless: true });
    page = await browser.newPage();
    await page.goto(require('url').pathToFileURL(path.resolve(m.path)).href, { waitUntil: 'networkidle0' });
    return null;
  },
  query_all: async (m) =>
    page.evaluate((sel, snap) => {
      const f = new Function('return ' + snap)();
      return Array.from(document.querySelectorAll(sel)).map(f);
    }, m.selector, snapshot.toString()),
  set_inner_html: async (m) =>
    page.evaluate((sel, i, html) => {
      const el = document.querySelectorAll(sel)[i];
      if (!el) throw new Error(`no element ${i} for ${sel}`);
      el.innerHTML = html;
      return null;
    }, m.selector, m.index, m.html),
  set_attribute: async (m) =>
    page.evaluate((sel, i, name, value) => {
      const el = document.querySelectorAll(sel)[i];
      if (!el) throw new Error(`no element ${i} for ${sel}`);
      el.setAttribute(name, value);
      return null;
    }, m.selector, m.index, m.name, m.value),
  set_style: async (m) =>
    page.evaluate((sel, prop, value) => {
      for (const el of document.querySelectorAll(sel)) el.style.setProperty(prop, value);
      return null;
    }, m.selector, m.property, m.value),
  content: async () => page.content(),
  pdf: async (m) => {
    await page.pdf({ path: m.path, width: `${m.width}px`, height: `${m.height}px`, preferCSSPageSize: true, printBackground: true });
    return null;
  },
  close: async () => {
    if (browser) await browser.close();
    browser = null;
    return null;
  },
};
const rl = readline.createInterface({ input: process.stdin, crlfDelay: Infinity });
let queue = Promise.resolve();
rl.on('line', (line) => {
  queue = queue.then(async () => {
    let out;
    try {
      const m = JSON.parse(line);
      const value = await handlers[m.op](m);
      out = { ok: true, value: value === undefined ? null : value };
    } catch (e) {
      out = { ok: false, error: String(e && e.message ? e.message : e) };
    }
    process.stdout.write(JSON.stringify(out) + '\n');
  });
});
rl.on('close', () => { queue.then(() => browser && browser.close()); });"#;

impl NodeBrowser {
    pub fn spawn(node_command: &[String]) -> Result<Self, BrowserError> {
        let (prog, args) = split_command(node_command);
        let mut child = Command::new(prog)
            .args(args)
            .arg("-e")
            .arg(BRIDGE_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| BrowserError::Spawn {
                command: prog.to_string(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or(BrowserError::Closed)?;
        let stdout = child.stdout.take().ok_or(BrowserError::Closed)?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Spawn the bridge and load `path` into a fresh page.
    pub fn open(node_command: &[String], path: &Path) -> Result<Self, BrowserError> {
        let mut browser = Self::spawn(node_command)?;
        let path = path.to_string_lossy();
        browser.call(Request::Open { path: &path })?;
        Ok(browser)
    }

    /// Serialized HTML of the current document.
    pub fn content(&mut self) -> Result<String, BrowserError> {
        let value = self.call(Request::Content)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn print_pdf(&mut self, path: &Path, width: f64, height: f64) -> Result<(), BrowserError> {
        let path = path.to_string_lossy();
        self.call(Request::Pdf {
            path: &path,
            width,
            height,
        })?;
        Ok(())
    }

    fn call(&mut self, request: Request<'_>) -> Result<Value, BrowserError> {
        let op = request.name();
        let line = serde_json::to_string(&request)? + "\n";
        debug!(op, "browser request");
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.flush()?;
        let mut out = String::new();
        self.stdout.read_line(&mut out)?;
        if out.is_empty() {
            return Err(BrowserError::Closed);
        }
        let resp: Response = serde_json::from_str(out.trim_end())?;
        if resp.ok {
            Ok(resp.value)
        } else {
            Err(BrowserError::Rejected {
                op,
                message: resp.error.unwrap_or_default(),
            })
        }
    }
}

pub(crate) fn split_command(command: &[String]) -> (&str, &[String]) {
    match command.split_first() {
        Some((prog, args)) => (prog.as_str(), args),
        None => ("node", &[]),
    }
}

impl Dom for NodeBrowser {
    fn query_all(&mut self, selector: &str) -> Result<Vec<Element>, DomError> {
        let value = self.call(Request::QueryAll { selector })?;
        let elements = serde_json::from_value(value).map_err(BrowserError::from)?;
        Ok(elements)
    }

    fn set_inner_html(
        &mut self,
        selector: &str,
        index: usize,
        html: &str,
    ) -> Result<(), DomError> {
        self.call(Request::SetInnerHtml {
            selector,
            index,
            html,
        })?;
        Ok(())
    }

    fn set_attribute(
        &mut self,
        selector: &str,
        index: usize,
        name: &str,
        value: &str,
    ) -> Result<(), DomError> {
        self.call(Request::SetAttribute {
            selector,
            index,
            name,
            value,
        })?;
        Ok(())
    }

    fn set_style(&mut self, selector: &str, property: &str, value: &str) -> Result<(), DomError> {
        self.call(Request::SetStyle {
            selector,
            property,
            value,
        })?;
        Ok(())
    }
}

impl Drop for NodeBrowser {
    fn drop(&mut self) {
        if let Err(e) = self.call(Request::Close) {
            warn!(error = %e, "browser did not close cleanly");
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_tagged_by_op() {
        let json = serde_json::to_string(&Request::SetInnerHtml {
            selector: ".citation",
            index: 2,
            html: "(Smith, 2020)",
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"op":"set_inner_html","selector":".citation","index":2,"html":"(Smith, 2020)"}"#
        );
        assert_eq!(
            serde_json::to_string(&Request::Content).unwrap(),
            r#"{"op":"content"}"#
        );
    }

    #[test]
    fn rejected_response_carries_message() {
        let resp: Response =
            serde_json::from_str(r#"{"ok":false,"error":"no element 3 for .ToC-link"}"#).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("no element 3 for .ToC-link"));
        assert!(resp.value.is_null());
    }

    #[test]
    fn open_builds_a_file_url() {
        assert!(BRIDGE_SCRIPT.contains("pathToFileURL(path.resolve(m.path)).href"));
        assert!(!BRIDGE_SCRIPT.contains("'file://' +"));
    }

    #[test]
    fn empty_command_falls_back_to_node() {
        let (prog, args) = split_command(&[]);
        assert_eq!(prog, "node");
        assert!(args.is_empty());
    }
}
