// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Source location tracking.
//!
//! Every AST node carries a [`Span`]: a reference to the [`Locator`] that
//! owns the source, plus a byte offset and length. Line and column are
//! derived on demand, so span construction during parsing stays cheap.

use std::sync::Arc;

use super::Locator;

/// A node's position in its source file.
///
/// Spans share the locator through an [`Arc`], which keeps the AST `Send`
/// so independent parses can run on worker threads.
#[derive(Clone)]
pub struct Span {
    locator: Arc<Locator>,
    offset: usize,
    length: usize,
}

impl Span {
    /// Creates a span over `offset..offset + length`.
    #[must_use]
    pub fn new(locator: Arc<Locator>, offset: usize, length: usize) -> Self {
        Self {
            locator,
            offset,
            length,
        }
    }

    /// The locator that owns the source this span points into.
    #[must_use]
    pub fn locator(&self) -> &Arc<Locator> {
        &self.locator
    }

    /// The file name, possibly empty for anonymous sources.
    #[must_use]
    pub fn file(&self) -> &str {
        self.locator.file()
    }

    /// Start byte offset.
    #[must_use]
    pub fn byte_offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    #[must_use]
    pub fn byte_length(&self) -> usize {
        self.length
    }

    /// End byte offset (exclusive).
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// 1-based line of the span's start.
    #[must_use]
    pub fn line(&self) -> usize {
        self.locator.line_for_offset(self.offset)
    }

    /// 1-based character column of the span's start.
    #[must_use]
    pub fn column(&self) -> usize {
        self.locator.pos_on_line(self.offset)
    }

    /// True when `other` lies fully within this span.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.offset <= other.offset && other.end() <= self.end()
    }

    /// Narrow mutation used when a unary prefix widens a literal's extent.
    pub(crate) fn set_range(&mut self, offset: usize, length: usize) {
        self.offset = offset;
        self.length = length;
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.length == other.length
    }
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Span({}..{})", self.offset, self.end())
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.offset, span.length).into()
    }
}

impl From<&Span> for miette::SourceSpan {
    fn from(span: &Span) -> Self {
        (span.offset, span.length).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> Arc<Locator> {
        Arc::new(Locator::new("x.dv", "one\ntwo\nthree"))
    }

    #[test]
    fn accessors() {
        let span = Span::new(locator(), 4, 3);
        assert_eq!(span.byte_offset(), 4);
        assert_eq!(span.byte_length(), 3);
        assert_eq!(span.end(), 7);
        assert_eq!(span.line(), 2);
        assert_eq!(span.column(), 1);
    }

    #[test]
    fn containment() {
        let outer = Span::new(locator(), 0, 10);
        let inner = Span::new(locator(), 4, 3);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));
    }

    #[test]
    fn equality_ignores_locator_identity() {
        let a = Span::new(locator(), 2, 2);
        let b = Span::new(locator(), 2, 2);
        assert_eq!(a, b);
    }
}
