//! Control file resolver based on MiniJinja
//!
//! Only `{{ ... }}` placeholders are template syntax. Block and comment
//! delimiters are moved to Unicode noncharacters, so `{%` and `{#` in a
//! control file are ordinary text.

use std::borrow::Cow;
use std::fmt::Write;

use minijinja::syntax::SyntaxConfig;
use minijinja::{
    AutoEscape, Environment, ErrorKind, Output, State, UndefinedBehavior, Value, escape_formatter,
};
use once_cell::sync::Lazy;
use opsi_core::Metadata;
use regex::Regex;

use crate::error::{Result, TemplateError};
use crate::suggestions::suggest_undefined_variable;

/// Name under which the control file is registered in the environment
const CONTROL_TEMPLATE: &str = "control";

/// Non UTF-8 byte `b` travels through the engine as `U+10FF00 + b`
const ESCAPED_BYTE_BASE: u32 = 0x10_FF00;

/// `{{.key}}` style placeholder, with optional whitespace control markers
static DOT_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{(-?)(\s*)\.([A-Za-z_][A-Za-z0-9_]*)(\s*)(-?)\}\}").expect("valid regex")
});

/// Placeholders keep `{{ }}`; statements and comments get delimiters no text file contains
static PLACEHOLDER_SYNTAX: Lazy<SyntaxConfig> = Lazy::new(|| {
    SyntaxConfig::builder()
        .block_delimiters("\u{FDD0}%", "%\u{FDD0}")
        .comment_delimiters("\u{FDD0}#", "#\u{FDD0}")
        .build()
        .expect("valid syntax config")
});

/// Escaping applied to substituted values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Escaping {
    /// Values are inserted verbatim
    #[default]
    None,
    /// HTML special characters are escaped the way Go's `html/template` does
    Html,
}

/// Resolver builder
#[derive(Debug, Default)]
pub struct ResolverBuilder {
    strict: bool,
    escaping: Escaping,
}

impl ResolverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set strict mode (fail on placeholders without an override)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the escaping policy for substituted values
    pub fn escaping(mut self, escaping: Escaping) -> Self {
        self.escaping = escaping;
        self
    }

    pub fn build(self) -> Resolver {
        Resolver::new(self.strict, self.escaping)
    }
}

/// Fills control file placeholders from override metadata
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    strict: bool,
    escaping: Escaping,
}

impl Resolver {
    pub fn new(strict: bool, escaping: Escaping) -> Self {
        Self { strict, escaping }
    }

    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_syntax(PLACEHOLDER_SYNTAX.clone());

        if self.strict {
            env.set_undefined_behavior(UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(UndefinedBehavior::Lenient);
        }

        // the control file is embedded byte-for-byte after resolution
        env.set_keep_trailing_newline(true);

        env.set_auto_escape_callback(|_| AutoEscape::None);
        if self.escaping == Escaping::Html {
            env.set_formatter(html_formatter);
        }

        env
    }

    /// Resolve all placeholders in `text` against `overrides`
    pub fn resolve(&self, text: &str, overrides: &Metadata) -> Result<String> {
        self.render(text, text, overrides)
    }

    /// Resolve a control file read as raw bytes
    ///
    /// Bytes outside placeholders come back unchanged, whatever the file's
    /// encoding. Substituted values are inserted as UTF-8.
    pub fn resolve_bytes(&self, bytes: &[u8], overrides: &Metadata) -> Result<Vec<u8>> {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return self.resolve(text, overrides).map(String::into_bytes);
        }

        tracing::debug!("control file is not UTF-8, carrying raw bytes through");
        let escaped = escape_bytes(bytes);
        let display = String::from_utf8_lossy(bytes);
        let rendered = self.render(&escaped, &display, overrides)?;
        Ok(unescape_bytes(&rendered))
    }

    /// Render `text`; errors point into `display`, which has the same lines
    fn render(&self, text: &str, display: &str, overrides: &Metadata) -> Result<String> {
        let source = normalize_placeholders(text);

        let mut env = self.create_environment();
        env.add_template_owned(CONTROL_TEMPLATE, source.into_owned())
            .map_err(|e| TemplateError::from_minijinja(e, CONTROL_TEMPLATE, display))?;

        let tmpl = env
            .get_template(CONTROL_TEMPLATE)
            .map_err(|e| TemplateError::from_minijinja(e, CONTROL_TEMPLATE, display))?;

        if self.strict {
            let mut undeclared: Vec<String> = tmpl
                .undeclared_variables(false)
                .into_iter()
                .filter(|name| !overrides.contains_key(name))
                .collect();
            undeclared.sort();

            if let Some(name) = undeclared.first() {
                let available: Vec<&str> = overrides.iter().map(|(k, _)| k).collect();
                return Err(TemplateError::undefined(
                    name,
                    CONTROL_TEMPLATE,
                    display,
                    placeholder_line(display, name),
                    Some(suggest_undefined_variable(name, &available)),
                )
                .into());
            }
        }

        let rendered = tmpl
            .render(Value::from_serialize(overrides))
            .map_err(|e| TemplateError::from_minijinja(e, CONTROL_TEMPLATE, display))?;

        tracing::debug!(
            "resolved control file: {} bytes in, {} bytes out",
            text.len(),
            rendered.len()
        );
        Ok(rendered)
    }
}

/// Resolve with default settings: lenient, no escaping
pub fn resolve(text: &str, overrides: &Metadata) -> Result<String> {
    Resolver::default().resolve(text, overrides)
}

/// Rewrite `{{.key}}` placeholders to plain `{{key}}`
fn normalize_placeholders(text: &str) -> Cow<'_, str> {
    DOT_FIELD.replace_all(text, "{{${1}${2}${3}${4}${5}}}")
}

/// 1-based line of the first placeholder referencing `name`
fn placeholder_line(text: &str, name: &str) -> Option<usize> {
    let pattern = format!(r"\{{\{{-?\s*\.?{}\s*-?\}}\}}", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    text.lines().position(|line| re.is_match(line)).map(|idx| idx + 1)
}

fn html_formatter(
    out: &mut Output<'_>,
    state: &State<'_, '_>,
    value: &Value,
) -> std::result::Result<(), minijinja::Error> {
    match value.as_str() {
        Some(s) if !value.is_safe() => out.write_str(&escape_html(s)).map_err(|e| {
            minijinja::Error::new(ErrorKind::WriteFailure, "cannot write value").with_source(e)
        }),
        _ => escape_formatter(out, state, value),
    }
}

/// HTML escaping with the character set of Go's `html/template`
fn escape_html(s: &str) -> Cow<'_, str> {
    if !s.contains(['\0', '"', '\'', '&', '+', '<', '>']) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '\0' => out.push('\u{FFFD}'),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            '&' => out.push_str("&amp;"),
            '+' => out.push_str("&#43;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Decode `bytes`, mapping every byte of an invalid UTF-8 sequence into the escape range
fn escape_bytes(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let invalid = e.error_len().unwrap_or(rest.len());
                for &b in &rest[..invalid] {
                    out.push(char::from_u32(ESCAPED_BYTE_BASE + u32::from(b)).unwrap_or('\u{FFFD}'));
                }
                bytes = &rest[invalid..];
            }
        }
    }
}

/// Inverse of [`escape_bytes`]; everything else is written as UTF-8
fn unescape_bytes(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut buf = [0u8; 4];
    for c in text.chars() {
        match u32::from(c).checked_sub(ESCAPED_BYTE_BASE) {
            Some(b @ 0x80..=0xFF) => out.push(b as u8),
            _ => out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, TemplateErrorKind};

    fn overrides(pairs: &[(&str, &str)]) -> Metadata {
        pairs.iter().copied().collect()
    }

    fn template_error(err: EngineError) -> TemplateError {
        match err {
            EngineError::Template(e) => e,
        }
    }

    #[test]
    fn test_normalize_placeholders() {
        assert_eq!(normalize_placeholders("v: {{.version}}"), "v: {{version}}");
        assert_eq!(normalize_placeholders("v: {{ .version }}"), "v: {{ version }}");
        assert_eq!(normalize_placeholders("v: {{- .version -}}"), "v: {{- version -}}");
        assert_eq!(normalize_placeholders("v: {{ version }}"), "v: {{ version }}");
    }

    #[test]
    fn test_resolve_dot_field() {
        let text = "[Product]\nversion: {{.product_version}}\n";
        let resolved = resolve(text, &overrides(&[("product_version", "0.0.0")])).unwrap();
        assert_eq!(resolved, "[Product]\nversion: 0.0.0\n");
    }

    #[test]
    fn test_resolve_then_parse() {
        let text = "[Product]\nVersion: {{.product_version}}\n[Package]\nversion: 1\n";
        let resolved = resolve(text, &overrides(&[("product_version", "0.0.0")])).unwrap();
        let metadata = opsi_core::parse(&resolved);
        assert_eq!(metadata.get("product_version"), Some("0.0.0"));
        assert_eq!(metadata.get("package_version"), Some("1"));
    }

    #[test]
    fn test_plain_text_passes_through() {
        let text = "; comment\r\n[Product]\nid: p1\n\n\n";
        assert_eq!(resolve(text, &Metadata::new()).unwrap(), text);
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let resolved = resolve("version: {{.product_version}}", &Metadata::new()).unwrap();
        assert_eq!(resolved, "version: ");
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let resolved = resolve(
            "version: {{.Product_Version}}",
            &overrides(&[("product_version", "1.0")]),
        )
        .unwrap();
        assert_eq!(resolved, "version: ");
    }

    #[test]
    fn test_no_escaping_by_default() {
        let resolved = resolve("name: {{.name}}", &overrides(&[("name", "Tom & <Jerry>")])).unwrap();
        assert_eq!(resolved, "name: Tom & <Jerry>");
    }

    #[test]
    fn test_html_escaping() {
        let resolver = Resolver::builder().escaping(Escaping::Html).build();
        let resolved = resolver
            .resolve("name: {{.name}}", &overrides(&[("name", "Tom & <Jerry>")]))
            .unwrap();
        assert_eq!(resolved, "name: Tom &amp; &lt;Jerry&gt;");
    }

    #[test]
    fn test_html_escaping_character_set() {
        let resolver = Resolver::builder().escaping(Escaping::Html).build();
        let resolved = resolver
            .resolve("v: {{.v}}", &overrides(&[("v", "a+b/c \"x\" 'y'\0")]))
            .unwrap();
        assert_eq!(resolved, "v: a&#43;b/c &#34;x&#34; &#39;y&#39;\u{FFFD}");
    }

    #[test]
    fn test_html_escaping_leaves_template_text() {
        let resolver = Resolver::builder().escaping(Escaping::Html).build();
        let text = "[Product]\ndescription: <b>A+B</b> {{.v}}\n";
        let resolved = resolver.resolve(text, &overrides(&[("v", "x")])).unwrap();
        assert_eq!(resolved, "[Product]\ndescription: <b>A+B</b> x\n");
    }

    #[test]
    fn test_block_markers_are_text() {
        let text = "[Product]\ndescription: uses {% as a literal\nid: p1\nnote: {%- if x %}y{% endif %}\n";
        assert_eq!(resolve(text, &Metadata::new()).unwrap(), text);
    }

    #[test]
    fn test_comment_markers_are_text() {
        let text = "[Product]\nid: p1\nnote: {# kept #}\n[Changelog]\n  * renamed {#1} and {#2} tickets\n";
        assert_eq!(resolve(text, &Metadata::new()).unwrap(), text);
    }

    #[test]
    fn test_markers_next_to_placeholders() {
        let text = "[Changelog]\n  * {# {{.v}} #} {%{{.v}}%}\n";
        let resolved = resolve(text, &overrides(&[("v", "1.0")])).unwrap();
        assert_eq!(resolved, "[Changelog]\n  * {# 1.0 #} {%1.0%}\n");
    }

    #[test]
    fn test_hash_lines_are_text() {
        let text = "# comment\n## another\n[Product]\nid: p1\n";
        assert_eq!(resolve(text, &Metadata::new()).unwrap(), text);
    }

    #[test]
    fn test_resolve_bytes_keeps_latin1() {
        let text = b"[Product]\ndescription: M\xFCller {{.v}}\n[Changelog]\n  * \xE9t\xE9\n";
        let resolved = Resolver::default()
            .resolve_bytes(text, &overrides(&[("v", "1.0")]))
            .unwrap();
        assert_eq!(
            resolved,
            b"[Product]\ndescription: M\xFCller 1.0\n[Changelog]\n  * \xE9t\xE9\n"
        );
    }

    #[test]
    fn test_resolve_bytes_inserts_values_as_utf8() {
        let resolved = Resolver::default()
            .resolve_bytes(b"name: \xC4 {{.v}}", &overrides(&[("v", "\u{e9}")]))
            .unwrap();
        assert_eq!(resolved, b"name: \xC4 \xC3\xA9");
    }

    #[test]
    fn test_resolve_bytes_utf8_input() {
        let text = "name: M\u{fc}ller {{.v}}\n";
        let resolved = Resolver::default()
            .resolve_bytes(text.as_bytes(), &overrides(&[("v", "1")]))
            .unwrap();
        assert_eq!(resolved, "name: M\u{fc}ller 1\n".as_bytes());
    }

    #[test]
    fn test_resolve_bytes_strict_error_points_at_line() {
        let resolver = Resolver::builder().strict(true).build();
        let err = template_error(
            resolver
                .resolve_bytes(b"[Product]\nid: \xFF\nversion: {{.missing}}\n", &Metadata::new())
                .unwrap_err(),
        );
        assert_eq!(err.kind(), TemplateErrorKind::UndefinedVariable);
        assert!(err.span.is_some());
    }

    #[test]
    fn test_escape_bytes_round_trip() {
        let raw = b"a\xFFb\xE2\x82c\xC3\xA9";
        let escaped = escape_bytes(raw);
        assert!(escaped.contains('\u{e9}'));
        assert_eq!(unescape_bytes(&escaped), raw);
    }

    #[test]
    fn test_syntax_error() {
        let text = "[Product]\nversion: {{.product_version\n";
        let err = template_error(resolve(text, &Metadata::new()).unwrap_err());

        assert_eq!(err.kind(), TemplateErrorKind::SyntaxError);
        assert!(err.message.starts_with("syntax error in placeholder"));
        assert!(err.suggestion.is_some());
    }

    #[test]
    fn test_strict_mode_rejects_missing_key() {
        let resolver = Resolver::builder().strict(true).build();
        let text = "[Product]\nid: p1\nversion: {{.product_verison}}\n";
        let err = template_error(
            resolver
                .resolve(text, &overrides(&[("product_version", "1.0")]))
                .unwrap_err(),
        );

        assert_eq!(err.kind(), TemplateErrorKind::UndefinedVariable);
        assert_eq!(err.message, "undefined variable `product_verison`");
        assert!(err.span.is_some());
        assert!(
            err.suggestion
                .as_deref()
                .unwrap()
                .contains("`product_version`")
        );
    }

    #[test]
    fn test_strict_mode_accepts_complete_overrides() {
        let resolver = Resolver::builder().strict(true).build();
        let resolved = resolver
            .resolve("v: {{ .a }}-{{ b }}", &overrides(&[("a", "1"), ("b", "2")]))
            .unwrap();
        assert_eq!(resolved, "v: 1-2");
    }

    #[test]
    fn test_placeholder_line() {
        let text = "[Product]\nid: p1\nversion: {{ .product_version }}\n";
        assert_eq!(placeholder_line(text, "product_version"), Some(3));
        assert_eq!(placeholder_line(text, "other"), None);
    }
}
