//! # flake-selector
//!
//! Attribute-path selectors into flake outputs.
//!
//! A selector is a dot-separated list of segments:
//!
//! - `packages.hello` selects a single attribute,
//! - `packages.*` selects every child at that level,
//! - `{alt1,alt2}` selects each alternative independently,
//! - `?feature` selects an attribute whose absence is not an error.
//!
//! Selectors are immutable. Their canonical string (see [`Selector::canonical`]) is
//! injective and is used as the cache key, as well as the serde representation.

mod error;
mod expand;
mod parse;

pub use error::MalformedSelectorError;
pub use expand::{AttrChildren, Expansion};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// One entry of a [`Segment::Set`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetEntry {
    pub name: String,
    /// Absence of this alternative is not an error.
    pub optional: bool,
}

impl SetEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// A plain attribute name.
    Attr(String),
    /// An attribute that may be missing.
    Optional(String),
    /// A set of alternatives, each expanded independently.
    Set(Vec<SetEntry>),
    /// Every child at this level.
    Wildcard,
}

impl Segment {
    /// The attribute name, for segments that address exactly one attribute.
    pub fn name(&self) -> Option<&str> {
        match self {
            Segment::Attr(name) | Segment::Optional(name) => Some(name),
            Segment::Set(_) | Segment::Wildcard => None,
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Segment::Attr(name) => parse::render_name(name, out),
            Segment::Optional(name) => {
                out.push('?');
                parse::render_name(name, out);
            }
            Segment::Set(entries) => {
                out.push('{');
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    if entry.optional {
                        out.push('?');
                    }
                    parse::render_name(&entry.name, out);
                }
                out.push('}');
            }
            Segment::Wildcard => out.push('*'),
        }
    }
}

/// Classification of a selector by the strongest segment kind it contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SelectorKind {
    Simple,
    Optional,
    Set,
    Wildcard,
}

/// A parsed attribute-path selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector {
    segments: Vec<Segment>,
}

impl Selector {
    /// Parse selector text.
    pub fn parse(text: &str) -> Result<Self, MalformedSelectorError> {
        let segments = parse::parse_segments(text)?;
        tracing::trace!(selector = text, segments = segments.len(), "Parsed selector");
        Ok(Self { segments })
    }

    /// Build a selector from segments, validating the same constraints as the parser.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self, MalformedSelectorError> {
        if segments.is_empty() {
            return Err(MalformedSelectorError::structural("empty selector"));
        }
        for segment in &segments {
            match segment {
                Segment::Attr(name) | Segment::Optional(name) if name.is_empty() => {
                    return Err(MalformedSelectorError::structural("empty segment"));
                }
                Segment::Set(entries) if entries.is_empty() => {
                    return Err(MalformedSelectorError::structural("empty set"));
                }
                Segment::Set(entries) if entries.iter().any(|e| e.name.is_empty()) => {
                    return Err(MalformedSelectorError::structural("empty set entry"));
                }
                _ => {}
            }
        }
        Ok(Self { segments })
    }

    /// A simple selector from plain attribute names.
    pub fn attrs<I, S>(names: I) -> Result<Self, MalformedSelectorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_segments(
            names
                .into_iter()
                .map(|name| Segment::Attr(name.into()))
                .collect(),
        )
    }

    pub(crate) fn from_resolved(segments: Vec<Segment>) -> Self {
        debug_assert!(!segments.is_empty());
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn kind(&self) -> SelectorKind {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Attr(_) => SelectorKind::Simple,
                Segment::Optional(_) => SelectorKind::Optional,
                Segment::Set(_) => SelectorKind::Set,
                Segment::Wildcard => SelectorKind::Wildcard,
            })
            .max()
            .unwrap_or(SelectorKind::Simple)
    }

    /// A selector is concrete when it addresses at most one attribute,
    /// i.e. it contains no wildcard and no set.
    pub fn is_concrete(&self) -> bool {
        self.segments.iter().all(|segment| segment.name().is_some())
    }

    /// Whether any segment is optional.
    pub fn has_optional(&self) -> bool {
        self.segments.iter().any(|segment| match segment {
            Segment::Optional(_) => true,
            Segment::Set(entries) => entries.iter().any(|e| e.optional),
            Segment::Attr(_) | Segment::Wildcard => false,
        })
    }

    /// Attribute names of a concrete selector, with optional markers dropped.
    pub fn names(&self) -> Option<Vec<&str>> {
        self.segments.iter().map(Segment::name).collect()
    }

    /// The canonical string form.
    ///
    /// Structurally equal selectors produce identical strings and distinct selectors never
    /// collide; `Selector::parse(&s.canonical())` always yields `s` back.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            segment.render(&mut out);
        }
        out
    }

    /// The attribute path as understood by a flake installable (`flake#attr.path`).
    ///
    /// Returns `None` for selectors that are not concrete.
    pub fn attr_path(&self) -> Option<String> {
        self.names().map(|names| render_attr_path(&names))
    }

    /// Expand wildcards and sets against the available children.
    pub fn expand<'a, C>(&'a self, children: &'a C) -> Expansion<'a, C>
    where
        C: AttrChildren + ?Sized,
    {
        Expansion::new(self, children)
    }

    /// Whether expanding `self` can produce the concrete selector `concrete`,
    /// whatever children are available.
    pub fn matches(&self, concrete: &Selector) -> bool {
        self.segments.len() == concrete.segments.len()
            && self
                .segments
                .iter()
                .zip(&concrete.segments)
                .all(|(pattern, segment)| match (pattern, segment) {
                    (Segment::Wildcard, Segment::Attr(_)) => true,
                    (Segment::Set(entries), Segment::Attr(name)) => {
                        entries.iter().any(|e| !e.optional && &e.name == name)
                    }
                    (Segment::Set(entries), Segment::Optional(name)) => {
                        entries.iter().any(|e| e.optional && &e.name == name)
                    }
                    (pattern, segment) => pattern == segment,
                })
    }

    /// The name under which a concrete selector produced by expanding `self`
    /// is reported: the names that filled wildcard and set positions, joined by `.`.
    ///
    /// Falls back to the canonical string when `self` has no such positions or
    /// when `resolved` does not line up with `self`.
    pub fn resolved_name(&self, resolved: &Selector) -> String {
        if self.segments.len() != resolved.segments.len() {
            return resolved.canonical();
        }

        let mut out = String::new();
        for (pattern, segment) in self.segments.iter().zip(&resolved.segments) {
            if matches!(pattern, Segment::Wildcard | Segment::Set(_)) {
                if let Some(name) = segment.name() {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    parse::render_name(name, &mut out);
                }
            }
        }

        if out.is_empty() {
            resolved.canonical()
        } else {
            out
        }
    }
}

/// Render attribute names as a Nix installable attribute path, quoting names that
/// would otherwise be split or misread.
pub fn render_attr_path<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            if name.contains('.') || name.contains('"') || name.contains('#') {
                format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
            } else {
                name.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for Selector {
    type Err = MalformedSelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Selector::parse(&text).map_err(serde::de::Error::custom)
    }
}
