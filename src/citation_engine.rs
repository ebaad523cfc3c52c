use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CitationError {
    #[error("failed to spawn citation engine `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("citation engine io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed citation engine message: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("no response from citation engine")]
    Closed,
    #[error("citation engine failed: {0}")]
    Engine(String),
}

/// CSL-JSON record as returned by the engine. Only the fields the inline
/// citation needs are typed.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CitationRecord {
    pub id: String,
    pub author: Vec<Name>,
    pub issued: Option<Issued>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Name {
    pub family: Option<String>,
    pub given: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Issued {
    #[serde(rename = "date-parts")]
    pub date_parts: Vec<Vec<Value>>,
}

impl CitationRecord {
    pub fn first_family(&self) -> Option<&str> {
        self.author
            .first()
            .and_then(|a| a.family.as_deref())
            .filter(|f| !f.trim().is_empty())
    }

    /// `issued['date-parts'][0][0]`, accepting either a number or a string.
    pub fn year(&self) -> Option<String> {
        let year = self.issued.as_ref()?.date_parts.first()?.first()?;
        match year {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

/// Bibliography backend. Keys are registered once per document; rendering
/// formats every registered entry in one pass.
pub trait CitationEngine {
    fn register(&mut self, keys: &[String]) -> Result<Vec<CitationRecord>, CitationError>;
    fn render_bibliography(&mut self, style: &str, locale: &str) -> Result<String, CitationError>;
}

/// citation-js running inside a persistent node process.
pub struct CiteJsEngine {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum CiteReq<'a> {
    Add { keys: &'a [String] },
    Render { style: &'a str, lang: &'a str },
}

#[derive(Deserialize)]
struct CiteResp {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

// Keeps one Cite instance; keys it cannot resolve are reported on stderr and skipped
const CITE_SCRIPT: &str = r#"const Cite = require('citation-js');
const data = new Cite();
const rl = require('readline').createInterface({ input: process.stdin, crlfDelay: Infinity });
let queue = Promise.resolve();
rl.on('line', (line) => {
  queue = queue.then(async () => {
    let out;
    try {
      const m = JSON.parse(line);
      if (m.op === 'add') {
        for (const key of m.keys) {
          try {
            await data.addAsync(key);
          } catch (e) {
            process.stderr.write(`citation-js: cannot resolve ${key}: ${e && e.message ? e.message : e}\n`);
          }
        }
        out = { ok: true, value: data.data };
      } else if (m.op === 'render') {
        out = { ok: true, value: data.get({ format: 'string', type: 'html', style: m.style, lang: m.lang }) };
      } else {
        out = { ok: false, error: 'unknown op ' + m.op };
      }
    } catch (e) {
      out = { ok: false, error: String(e && e.message ? e.message : e) };
    }
    process.stdout.write(JSON.stringify(out) + '\n');
  });
});"#;

impl CiteJsEngine {
    pub fn spawn(node_command: &[String]) -> Result<Self, CitationError> {
        let (prog, args) = crate::browser::split_command(node_command);
        let mut child = Command::new(prog)
            .args(args)
            .arg("-e")
            .arg(CITE_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| CitationError::Spawn {
                command: prog.to_string(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or(CitationError::Closed)?;
        let stdout = child.stdout.take().ok_or(CitationError::Closed)?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn call(&mut self, req: CiteReq<'_>) -> Result<Value, CitationError> {
        let line = serde_json::to_string(&req)? + "\n";
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.flush()?;
        let mut out = String::new();
        self.stdout.read_line(&mut out)?;
        if out.is_empty() {
            return Err(CitationError::Closed);
        }
        let resp: CiteResp = serde_json::from_str(out.trim_end())?;
        if resp.ok {
            Ok(resp.value)
        } else {
            Err(CitationError::Engine(resp.error.unwrap_or_default()))
        }
    }
}

impl CitationEngine for CiteJsEngine {
    fn register(&mut self, keys: &[String]) -> Result<Vec<CitationRecord>, CitationError> {
        let value = self.call(CiteReq::Add { keys })?;
        Ok(serde_json::from_value(value)?)
    }

    fn render_bibliography(&mut self, style: &str, locale: &str) -> Result<String, CitationError> {
        let value = self.call(CiteReq::Render {
            style,
            lang: locale,
        })?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Drop for CiteJsEngine {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_reads_csl_json() {
        let json = r#"{"id":"Q30000000","type":"article-journal",
            "author":[{"given":"Jane","family":"Smith"},{"family":"Doe"}],
            "issued":{"date-parts":[[2020,3,1]]}}"#;
        let record: CitationRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.first_family(), Some("Smith"));
        assert_eq!(record.year().as_deref(), Some("2020"));
    }

    #[test]
    fn string_year_and_missing_issued() {
        let record: CitationRecord =
            serde_json::from_str(r#"{"id":"a","issued":{"date-parts":[["1999"]]}}"#).unwrap();
        assert_eq!(record.year().as_deref(), Some("1999"));
        assert_eq!(record.first_family(), None);

        let record: CitationRecord = serde_json::from_str(r#"{"id":"b"}"#).unwrap();
        assert_eq!(record.year(), None);
    }

    #[test]
    fn unresolvable_key_does_not_fail_the_batch() {
        let add = CITE_SCRIPT.find("addAsync(key)").unwrap();
        let guard = CITE_SCRIPT[..add].rfind("try {").unwrap();
        assert!(CITE_SCRIPT[guard..].contains("catch (e)"));
        assert!(CITE_SCRIPT.contains("process.stderr.write"));
    }

    #[test]
    fn add_request_shape() {
        let keys = vec!["10.1000/xyz".to_string()];
        let json = serde_json::to_string(&CiteReq::Add { keys: &keys }).unwrap();
        assert_eq!(json, r#"{"op":"add","keys":["10.1000/xyz"]}"#);
    }
}
