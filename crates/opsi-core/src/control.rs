//! OPSI control file parser
//!
//! The control file is ini-like but separates keys and values with a colon:
//!
//! ```text
//! [Package]
//! version: 1
//!
//! [Product]
//! id: firefox
//! version: 115.0
//!
//! [Changelog]
//! free text that is never parsed: not even this line
//! ```
//!
//! All entries end up in one flat [`Metadata`] map with keys prefixed by
//! their section (`package_version`, `product_id`, ...). Section names and
//! keys are lowercased, values are kept as written (trimmed).
//!
//! The optional `[Changelog]` section must be the last one: scanning stops
//! as soon as it is seen, since its body is free text.

use std::fmt;
use std::io::BufRead;
use std::ops::ControlFlow;

use crate::error::{CoreError, Result};
use crate::metadata::Metadata;

const SEPARATOR: char = ':';
const SECTION_PREFIX: char = '[';
const SECTION_SUFFIX: char = ']';
const CHANGELOG: &str = "changelog";

/// Why a non-empty, non-comment line did not produce an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No separator at all
    NotKeyValue,
    /// More than one separator, e.g. a value containing a colon
    ExtraSeparator,
    /// Separator present but nothing before it
    EmptyKey,
    /// Key-value line before the first section header
    OutsideSection,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotKeyValue => "not a section header or key: value pair",
            Self::ExtraSeparator => "more than one ':' separator",
            Self::EmptyKey => "empty key",
            Self::OutsideSection => "key-value pair outside of any section",
        };
        f.write_str(msg)
    }
}

/// A line that was ignored while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number
    pub line: usize,
    /// Trimmed line content
    pub content: String,
    pub reason: SkipReason,
}

/// Result of parsing a control file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedControl {
    pub metadata: Metadata,
    /// Lines ignored in lenient mode
    pub skipped: Vec<SkippedLine>,
    /// Line of the `[Changelog]` header, if scanning stopped there
    pub changelog_line: Option<usize>,
}

/// Control file parser
///
/// Lenient by default: malformed lines are skipped and reported in
/// [`ParsedControl::skipped`]. In strict mode the first such line fails
/// the parse.
#[derive(Debug, Clone, Default)]
pub struct ControlParser {
    strict: bool,
}

impl ControlParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on lines that would otherwise be skipped
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Parse control file text
    pub fn parse_str(&self, text: &str) -> Result<ParsedControl> {
        let mut scan = Scan::new(self.strict);
        for (idx, line) in text.lines().enumerate() {
            if scan.feed(idx + 1, line)?.is_break() {
                break;
            }
        }
        Ok(scan.finish())
    }

    /// Parse control file text from a reader
    ///
    /// Reading stops at the `[Changelog]` header; nothing after it is read.
    pub fn parse_reader<R: BufRead>(&self, mut reader: R) -> Result<ParsedControl> {
        let mut scan = Scan::new(self.strict);
        let mut buf = Vec::new();
        let mut line_no = 0;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            let line = String::from_utf8_lossy(&buf);
            if scan.feed(line_no, &line)?.is_break() {
                break;
            }
        }

        Ok(scan.finish())
    }
}

/// Parse control file text leniently
pub fn parse(text: &str) -> Metadata {
    let mut scan = Scan::new(false);
    for (idx, line) in text.lines().enumerate() {
        // lenient scans never fail
        match scan.feed(idx + 1, line) {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) | Err(_) => break,
        }
    }
    scan.finish().metadata
}

/// Parse a control file leniently from a reader, propagating read errors
pub fn parse_reader<R: BufRead>(reader: R) -> Result<Metadata> {
    Ok(ControlParser::new().parse_reader(reader)?.metadata)
}

/// Scan state threaded through the line loop
struct Scan {
    strict: bool,
    section: Option<String>,
    parsed: ParsedControl,
}

impl Scan {
    fn new(strict: bool) -> Self {
        Self {
            strict,
            section: None,
            parsed: ParsedControl::default(),
        }
    }

    fn feed(&mut self, line_no: usize, raw: &str) -> Result<ControlFlow<()>> {
        let line = raw.trim();
        if is_comment(line) || line.is_empty() {
            return Ok(ControlFlow::Continue(()));
        }

        if let Some(name) = section(line) {
            if name == CHANGELOG {
                tracing::debug!("changelog section at line {line_no}, stop parsing");
                self.parsed.changelog_line = Some(line_no);
                return Ok(ControlFlow::Break(()));
            }
            tracing::debug!("new section {name:?}");
            self.section = Some(name);
            return Ok(ControlFlow::Continue(()));
        }

        let entry = key_value(line).and_then(|(key, value)| match &self.section {
            Some(section) => Ok((format!("{}_{}", section, key.to_lowercase()), value)),
            None => Err(SkipReason::OutsideSection),
        });

        match entry {
            Ok((key, value)) => {
                tracing::debug!("metadata: {key:?}={value:?}");
                self.parsed.metadata.insert(key, value);
            }
            Err(reason) => self.skip(line_no, line, reason)?,
        }

        Ok(ControlFlow::Continue(()))
    }

    fn skip(&mut self, line_no: usize, line: &str, reason: SkipReason) -> Result<()> {
        if self.strict {
            return Err(CoreError::ControlSyntax {
                line: line_no,
                reason,
            });
        }
        tracing::debug!("skipping line {line_no} ({reason}): {line:?}");
        self.parsed.skipped.push(SkippedLine {
            line: line_no,
            content: line.to_string(),
            reason,
        });
        Ok(())
    }

    fn finish(self) -> ParsedControl {
        self.parsed
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with(';')
}

/// Lowercased section name if the whole line is a `[section]` header
fn section(line: &str) -> Option<String> {
    let name = line
        .strip_prefix(SECTION_PREFIX)?
        .strip_suffix(SECTION_SUFFIX)?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_lowercase())
}

/// Split a line into trimmed key and value, requiring exactly one separator
fn key_value(line: &str) -> std::result::Result<(&str, &str), SkipReason> {
    let mut parts = line.split(SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => {
            let key = key.trim();
            if key.is_empty() {
                Err(SkipReason::EmptyKey)
            } else {
                Ok((key, value.trim()))
            }
        }
        (_, None, _) => Err(SkipReason::NotKeyValue),
        _ => Err(SkipReason::ExtraSeparator),
    }
}
