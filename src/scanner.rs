//! Tag Scanner
//!
//! Splits template text into literal spans and `{{ ... }}` tags in one forward
//! pass. A tag is `{{`, optional whitespace, one or more characters other than
//! `}`, then `}}` and an optional third `}`. The triple-brace form therefore
//! yields a key that starts with the extra `{`.

use crate::validate::SourceLocation;

// ═══════════════════════════════════════════════════════════════════════════════
// TAGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    /// `#`
    BlockOpen,
    /// `/`
    BlockClose,
    /// `^`
    InvertedOpen,
    /// `>`
    Partial,
    /// `!`
    Comment,
    /// `{` carried over from a triple-brace tag.
    Raw,
    /// Plain escaped interpolation.
    None,
}

impl Sigil {
    fn classify(key: &str) -> Sigil {
        match key.as_bytes().first() {
            Some(b'#') => Sigil::BlockOpen,
            Some(b'/') => Sigil::BlockClose,
            Some(b'^') => Sigil::InvertedOpen,
            Some(b'>') => Sigil::Partial,
            Some(b'!') => Sigil::Comment,
            Some(b'{') => Sigil::Raw,
            _ => Sigil::None,
        }
    }

    fn len(self) -> usize {
        match self {
            Sigil::None => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag<'a> {
    /// Everything captured between the opening braces (after leading
    /// whitespace) and the closing `}}`.
    pub key: &'a str,
    /// Byte offset of the opening `{{`.
    pub start: usize,
    /// Byte offset just past the closing braces.
    pub end: usize,
}

impl<'a> Tag<'a> {
    pub fn sigil(&self) -> Sigil {
        Sigil::classify(self.key)
    }

    /// The path expression with the sigil removed and surrounding whitespace
    /// trimmed. A key made only of whitespace is returned untouched.
    pub fn expression(&self) -> &'a str {
        let body = &self.key[self.sigil().len()..];
        let trimmed = body.trim();
        if trimmed.is_empty() {
            body
        } else {
            trimmed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Tag(Tag<'a>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCANNER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Scanner<'a> {
    source: &'a str,
    cursor: usize,
    pending: Option<Tag<'a>>,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            cursor: 0,
            pending: None,
        }
    }

    /// Try to recognize a tag whose `{{` starts at `open`.
    fn match_tag(&self, open: usize) -> Option<Tag<'a>> {
        let src = self.source;
        let after_open = open + 2;

        let mut key_start = after_open;
        let mut last_ws = None;
        for (offset, c) in src[after_open..].char_indices() {
            if !c.is_whitespace() {
                break;
            }
            last_ws = Some(after_open + offset);
            key_start = after_open + offset + c.len_utf8();
        }

        let close = key_start + src[key_start..].find('}')?;
        if close == key_start {
            // Nothing but whitespace before the brace: the key keeps the last
            // whitespace character.
            key_start = last_ws?;
        }
        if !src[close..].starts_with("}}") {
            return None;
        }

        let mut end = close + 2;
        if src[end..].starts_with('}') {
            end += 1;
        }

        Some(Tag {
            key: &src[key_start..close],
            start: open,
            end,
        })
    }

    /// Find the next tag at or after `from`.
    fn find_tag(&self, from: usize) -> Option<Tag<'a>> {
        let mut search = from;
        while let Some(rel) = self.source[search..].find("{{") {
            let open = search + rel;
            if let Some(tag) = self.match_tag(open) {
                return Some(tag);
            }
            search = open + 1;
        }
        None
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        if let Some(tag) = self.pending.take() {
            return Some(Segment::Tag(tag));
        }
        if self.cursor >= self.source.len() {
            return None;
        }

        let start = self.cursor;
        match self.find_tag(start) {
            Some(tag) => {
                self.cursor = tag.end;
                if tag.start > start {
                    self.pending = Some(tag);
                    Some(Segment::Literal(&self.source[start..tag.start]))
                } else {
                    Some(Segment::Tag(tag))
                }
            }
            None => {
                self.cursor = self.source.len();
                Some(Segment::Literal(&self.source[start..]))
            }
        }
    }
}

pub fn scan(source: &str) -> Scanner<'_> {
    Scanner::new(source)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// 1-based line count of everything consumed up to `offset`.
pub fn line_at(source: &str, offset: usize) -> u32 {
    let consumed = &source[..offset.min(source.len())];
    consumed.bytes().filter(|b| *b == b'\n').count() as u32 + 1
}

/// Location of a tag: the line counts newlines through the end of the tag,
/// the column is 1-based within the line where the tag starts.
pub fn tag_location(source: &str, tag: &Tag<'_>) -> SourceLocation {
    let line_start = source[..tag.start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = source[line_start..tag.start].chars().count() as u32 + 1;
    SourceLocation {
        line: line_at(source, tag.end),
        column,
    }
}
