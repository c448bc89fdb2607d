//! Reference and tag extraction for scripts, markup and styles
//!
//! Everything here is a pure function over file text. The scanner does not
//! validate syntax; it only finds the spans the dependency walk and the
//! rewriters care about.

use std::ops::Range;

use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        (?:
            \brequire(?:\.async)?\s*\(\s*
          | \bimport\s*\(\s*
          | \bimport\s+(?:[\w*${}\s,]+?\s+from\s+)?
          | \bexport\s+(?:\*|\{[^}]*\})\s*(?:as\s+\w+\s+)?from\s+
        )
        (?P<quote>['"])(?P<spec>[^'"\n]+)['"]
        "#,
    )
    .expect("script reference regex is valid")
});

static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<\s*(?P<name>[A-Za-z][\w\-.:]*)(?P<attrs>(?:[^>'\x22]|'[^']*'|\x22[^\x22]*\x22)*)>")
        .expect("tag regex is valid")
});

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?P<name>[\w:\-.@]+)\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#)
        .expect("attribute regex is valid")
});

static MARKUP_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex is valid"));

static STYLE_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?['"]?(?P<spec>[^'")\s;]+)['"]?\s*\)?\s*;"#)
        .expect("style import regex is valid")
});

/// A reference to another file found in a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReference {
    pub specifier: String,
    /// Byte range of the specifier text inside the scanned source
    pub span: Range<usize>,
}

/// An element found in markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupTag {
    pub name: String,
    pub attributes: IndexMap<String, String>,
}

impl MarkupTag {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// `<include src>` / `<import src>` with a non-empty source
    pub fn is_inclusion_directive(&self) -> bool {
        matches!(self.name.as_str(), "include" | "import")
            && self.attribute("src").is_some_and(|src| !src.trim().is_empty())
    }

    /// Tag names referenced through `generic:<slot>="tag-name"` attributes
    pub fn generic_names(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(key, _)| key.starts_with("generic:"))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Find every module reference in a script, skipping comments and references
/// spelled out inside string literals
pub fn script_references(source: &str) -> Vec<ScriptReference> {
    let mask = ScriptMask::new(source);
    SCRIPT_REFERENCE
        .captures_iter(&mask.text)
        .filter(|caps| caps.get(0).is_some_and(|whole| !mask.in_string(whole.start())))
        .filter_map(|caps| {
            let spec = caps.name("spec")?;
            Some(ScriptReference {
                specifier: spec.as_str().to_owned(),
                span: spec.range(),
            })
        })
        .collect()
}

/// Script text with every comment blanked to spaces, so byte offsets still
/// match the original, plus the byte ranges of its string literals
#[derive(Debug)]
struct ScriptMask {
    text: String,
    strings: Vec<Range<usize>>,
}

impl ScriptMask {
    fn new(source: &str) -> Self {
        let bytes = source.as_bytes();
        let mut text = bytes.to_vec();
        let mut strings = Vec::new();
        let mut previous: Option<u8> = None;
        let mut index = 0;

        while index < bytes.len() {
            match (bytes[index], bytes.get(index + 1).copied()) {
                (b'/', Some(b'/')) => {
                    let end = source[index..]
                        .find('\n')
                        .map_or(bytes.len(), |offset| index + offset);
                    blank(&mut text, index..end);
                    index = end;
                }
                (b'/', Some(b'*')) => {
                    let end = source[index + 2..]
                        .find("*/")
                        .map_or(bytes.len(), |offset| index + 2 + offset + 2);
                    blank(&mut text, index..end);
                    index = end;
                }
                (b'/', _) if starts_regex_literal(previous) => {
                    index = skip_regex_literal(bytes, index);
                    previous = Some(b'/');
                }
                (quote @ (b'\'' | b'"' | b'`'), _) => {
                    let end = skip_string_literal(bytes, index, quote);
                    strings.push(index..end);
                    index = end;
                    previous = Some(quote);
                }
                (byte, _) => {
                    if !byte.is_ascii_whitespace() {
                        previous = Some(byte);
                    }
                    index += 1;
                }
            }
        }

        // Comments start and end on ASCII bytes, so blanking keeps the text valid UTF-8
        let text = String::from_utf8(text).unwrap_or_else(|_| source.to_owned());
        Self { text, strings }
    }

    fn in_string(&self, offset: usize) -> bool {
        self.strings.iter().any(|range| range.contains(&offset))
    }
}

fn blank(text: &mut [u8], range: Range<usize>) {
    for byte in &mut text[range] {
        if *byte != b'\n' {
            *byte = b' ';
        }
    }
}

/// A `/` opens a regular expression literal where an operand is expected
fn starts_regex_literal(previous: Option<u8>) -> bool {
    previous.is_none_or(|byte| b"(,=:[!&|?{};+-*%<>~^".contains(&byte))
}

/// End of the regular expression literal opening at `start`, or just past the
/// slash when the line ends first
fn skip_regex_literal(bytes: &[u8], start: usize) -> usize {
    let mut index = start + 1;
    let mut in_class = false;
    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 1,
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => return index + 1,
            b'\n' => break,
            _ => {}
        }
        index += 1;
    }
    start + 1
}

/// End of the string literal opening at `start`; plain quotes stop at a line end
fn skip_string_literal(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut index = start + 1;
    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 1,
            b'\n' if quote != b'`' => return index,
            byte if byte == quote => return index + 1,
            _ => {}
        }
        index += 1;
    }
    bytes.len()
}

/// Scan markup for elements, ignoring comments
pub fn scan_tags(markup: &str) -> Vec<MarkupTag> {
    let without_comments = MARKUP_COMMENT.replace_all(markup, "");
    TAG.captures_iter(&without_comments)
        .map(|caps| {
            let name = caps["name"].to_lowercase();
            let attributes = caps
                .name("attrs")
                .map(|attrs| parse_attributes(attrs.as_str()))
                .unwrap_or_default();
            MarkupTag { name, attributes }
        })
        .collect()
}

fn parse_attributes(text: &str) -> IndexMap<String, String> {
    ATTRIBUTE
        .captures_iter(text)
        .map(|caps| {
            let value = caps
                .name("dq")
                .or_else(|| caps.name("sq"))
                .map_or("", |m| m.as_str());
            (caps["name"].to_owned(), value.to_owned())
        })
        .collect()
}

/// Lowercase tag names used by a markup file: element names plus names
/// referenced through `generic:*` attributes
pub fn extract_tag_names(markup: &str) -> IndexSet<String> {
    tag_names(&scan_tags(markup))
}

pub fn tag_names(tags: &[MarkupTag]) -> IndexSet<String> {
    let mut names = IndexSet::new();
    for tag in tags {
        names.insert(tag.name.clone());
        for generic in tag.generic_names() {
            names.insert(generic.to_lowercase());
        }
    }
    names
}

/// Whether the markup includes or imports another template
pub fn has_inclusion_directive(tags: &[MarkupTag]) -> bool {
    tags.iter().any(MarkupTag::is_inclusion_directive)
}

/// A template or WXS module pulled in by markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupReference {
    pub specifier: String,
    /// `<wxs src>` rather than `<import>`/`<include>`
    pub is_module: bool,
}

/// File references in markup: `import`/`include`/`wxs` sources
pub fn markup_references(tags: &[MarkupTag]) -> Vec<MarkupReference> {
    tags.iter()
        .filter(|tag| matches!(tag.name.as_str(), "import" | "include" | "wxs"))
        .filter_map(|tag| Some((tag.name == "wxs", tag.attribute("src")?.trim())))
        .filter(|(_, src)| !src.is_empty() && !src.contains("{{"))
        .map(|(is_module, src)| MarkupReference {
            specifier: src.to_owned(),
            is_module,
        })
        .collect()
}

/// Byte ranges of `src` values on `import`/`include`/`wxs` elements, for rewriting
pub fn markup_reference_spans(markup: &str) -> Vec<(String, Range<usize>)> {
    static SRC_ELEMENT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"<\s*(?:import|include|wxs)\b[^>]*?\bsrc\s*=\s*["'](?P<spec>[^"']+)["']"#)
            .expect("markup src regex is valid")
    });
    SRC_ELEMENT
        .captures_iter(markup)
        .filter_map(|caps| caps.name("spec"))
        .map(|m| (m.as_str().to_owned(), m.range()))
        .collect()
}

/// `@import` targets in a style sheet
pub fn style_references(style: &str) -> Vec<(String, Range<usize>)> {
    STYLE_IMPORT
        .captures_iter(style)
        .filter_map(|caps| caps.name("spec"))
        .map(|m| (m.as_str().to_owned(), m.range()))
        .collect()
}

/// Replace byte ranges in `source`; ranges must not overlap
pub fn splice(source: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(range, _)| range.start);
    let mut output = String::with_capacity(source.len());
    let mut cursor = 0;
    for (range, replacement) in edits {
        output.push_str(&source[cursor..range.start]);
        output.push_str(&replacement);
        cursor = range.end;
    }
    output.push_str(&source[cursor..]);
    output
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_script_references() {
        let source = r#"
            const a = require('./a');
            const lodash = require("lodash/get");
            import b from '../b.js';
            import { c, d } from "/utils/c";
            import './side-effect';
            export * from './reexport';
            export { x as y } from './named';
            require.async('../subB/util').then(() => {});
            const lazy = import('./lazy');
        "#;
        let refs = script_references(source);
        let specs: Vec<_> = refs.iter().map(|r| r.specifier.as_str()).collect();
        assert_eq!(
            specs,
            vec![
                "./a",
                "lodash/get",
                "../b.js",
                "/utils/c",
                "./side-effect",
                "./reexport",
                "./named",
                "../subB/util",
                "./lazy",
            ]
        );
        assert_eq!(&source[refs[0].span.clone()], "./a");
    }

    #[test]
    fn test_script_references_skip_comments_and_strings() {
        let source = "// const old = require('./old');\n\
            /* import gone from './gone';\n   require('./also-gone') */\n\
            const hint = \"call require('./quoted') later\";\n\
            const re = /\\/\\*/g;\n\
            const url = 'https://example.com/a'; const kept = require('./kept');\n\
            Page({});";
        let refs = script_references(source);
        let specs: Vec<_> = refs.iter().map(|r| r.specifier.as_str()).collect();
        assert_eq!(specs, vec!["./kept"]);
        assert_eq!(&source[refs[0].span.clone()], "./kept");
    }

    #[test]
    fn test_extract_tag_names() {
        let markup = r#"
            <!-- <ignored-tag/> -->
            <view class="box">
              <Foo-Bar data="{{x}}"/>
              <list generic:item="Custom-Item" />
              <text>hello</text>
            </view>
        "#;
        let names = extract_tag_names(markup);
        assert!(names.contains("view"));
        assert!(names.contains("foo-bar"));
        assert!(names.contains("custom-item"));
        assert!(names.contains("text"));
        assert!(!names.contains("ignored-tag"));
    }

    #[test]
    fn test_inclusion_directive() {
        let with_import = scan_tags(r#"<import src="./shared.wxml"/><foo/>"#);
        assert!(has_inclusion_directive(&with_import));

        let empty_src = scan_tags(r#"<include src=""/><foo/>"#);
        assert!(!has_inclusion_directive(&empty_src));

        let none = scan_tags("<foo/>");
        assert!(!has_inclusion_directive(&none));
    }

    #[test]
    fn test_markup_references() {
        let markup = r#"
            <import src="../tpl/item.wxml"/>
            <include src='/common/header.wxml' />
            <wxs src="./fmt.wxs" module="fmt"></wxs>
            <image src="{{dynamic}}"/>
            <include src="{{dynamic}}"/>
        "#;
        let tags = scan_tags(markup);
        let refs = markup_references(&tags);
        let specs: Vec<_> = refs.iter().map(|r| r.specifier.as_str()).collect();
        assert_eq!(specs, vec!["../tpl/item.wxml", "/common/header.wxml", "./fmt.wxs"]);
        assert!(refs[2].is_module);
        assert!(!refs[0].is_module);
        let spans = markup_reference_spans(markup);
        assert_eq!(spans.len(), 4);
        assert_eq!(&markup[spans[0].1.clone()], "../tpl/item.wxml");
    }

    #[test]
    fn test_style_references_and_splice() {
        let style = "@import \"../common.wxss\";\n@import url('/theme.wxss');\n.a{}";
        let refs = style_references(style);
        let specs: Vec<_> = refs.iter().map(|(spec, _)| spec.as_str()).collect();
        assert_eq!(specs, vec!["../common.wxss", "/theme.wxss"]);

        let rewritten = splice(style, vec![(refs[0].1.clone(), "./common.wxss".to_owned())]);
        assert!(rewritten.starts_with("@import \"./common.wxss\";"));
    }
}
