// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Mapping from byte offsets to human-oriented source positions.
//!
//! The [`Locator`] owns the file identity and the source text, and converts
//! byte offsets into 1-based line and column numbers. Columns count
//! characters, not bytes, so diagnostics line up in editors regardless of
//! multibyte content.

use std::sync::OnceLock;

use ecow::EcoString;

/// Owns a source file's name and text and resolves offsets to positions.
///
/// The line-start table is built on the first position query, never during
/// lexing, so successful parses that report no issues pay nothing for it.
pub struct Locator {
    file: EcoString,
    source: EcoString,
    line_starts: OnceLock<Vec<usize>>,
}

impl Locator {
    /// Creates a locator for the given file name and source text. The file
    /// name may be empty for anonymous sources.
    #[must_use]
    pub fn new(file: impl Into<EcoString>, source: impl Into<EcoString>) -> Self {
        Self {
            file: file.into(),
            source: source.into(),
            line_starts: OnceLock::new(),
        }
    }

    /// The file name this locator reports positions for.
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The complete source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    fn line_starts(&self) -> &[usize] {
        self.line_starts.get_or_init(|| {
            let mut starts = vec![0];
            for (i, b) in self.source.bytes().enumerate() {
                if b == b'\n' {
                    starts.push(i + 1);
                }
            }
            starts
        })
    }

    /// The 1-based line number containing `offset`.
    #[must_use]
    pub fn line_for_offset(&self, offset: usize) -> usize {
        let starts = self.line_starts();
        starts.partition_point(|&s| s <= offset).max(1)
    }

    /// The 1-based column of `offset` on its line, counting characters.
    #[must_use]
    pub fn pos_on_line(&self, offset: usize) -> usize {
        let starts = self.line_starts();
        let line = starts.partition_point(|&s| s <= offset).max(1);
        let line_start = starts[line - 1];
        let end = offset.min(self.source.len());
        self.source[line_start..end].chars().count() + 1
    }
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("file", &self.file)
            .field("source_len", &self.source.len())
            .finish()
    }
}

impl PartialEq for Locator {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file && self.source == other.source
    }
}
