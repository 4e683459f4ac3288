// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Structured parse issues.
//!
//! The parser is fail-fast: the deepest detecting site builds a
//! [`ParseError`] and every frame above passes it through unchanged, so a
//! failed parse yields exactly one issue and no partial tree. Each issue
//! carries a stable SCREAMING_SNAKE code (for programmatic matching), a
//! human message, and the source position current at detection time.

use miette::Diagnostic;
use thiserror::Error;

use ecow::EcoString;

use super::Span;

/// Issue severity. The core only raises errors; the scale exists for
/// downstream reporters that fold in their own findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Fatal; the parse was abandoned.
    Error,
    /// Advisory.
    Warning,
}

/// Everything the lexer or parser can object to.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseIssue {
    // === Lexical issues ===
    /// An unexpected token where a production offers no alternative.
    #[error("unexpected token '{token}'")]
    LexUnexpectedToken {
        /// Display text of the offending token.
        token: EcoString,
    },

    /// A character that cannot begin any token.
    #[error("unexpected character '{ch}'")]
    LexUnexpectedChar {
        /// The offending character.
        ch: char,
    },

    /// `::` not followed by a name segment.
    #[error("'::' not followed by name segment")]
    LexDoubleColonNotFollowedByName,

    /// A decimal digit was required.
    #[error("digit expected")]
    LexDigitExpected,

    /// A hexadecimal digit was required.
    #[error("hexadecimal digit expected")]
    LexHexdigitExpected,

    /// An octal digit was required.
    #[error("octal digit expected")]
    LexOctaldigitExpected,

    /// A numeric literal that does not fit the value domain.
    #[error("invalid number '{text}'")]
    LexInvalidNumber {
        /// The literal as written.
        text: EcoString,
    },

    /// A name with inconsistent segment casing, or an invalid variable name.
    #[error("invalid name '{name}'")]
    LexInvalidName {
        /// The name as written.
        name: EcoString,
    },

    /// A type name with a non-capitalized segment.
    #[error("invalid type name '{name}'")]
    LexInvalidTypeName {
        /// The name as written.
        name: EcoString,
    },

    /// A character sequence that looks like an operator but is not one.
    #[error("invalid operator '{op}'")]
    LexInvalidOperator {
        /// The sequence as written.
        op: EcoString,
    },

    /// A string literal missing its closing quote.
    #[error("unterminated string literal")]
    LexUnterminatedString,

    /// A block comment missing its `*/`.
    #[error("unterminated comment")]
    LexUnterminatedComment,

    /// A regexp literal missing its closing `/` on the same line.
    #[error("unterminated regular expression")]
    LexUnterminatedRegexp,

    /// `\xNN` with fewer than two hex digits.
    #[error("malformed hexadecimal escape sequence")]
    LexMalformedHexEscape,

    /// `\uXXXX` or `\u{...}` that does not denote a character.
    #[error("malformed unicode escape sequence")]
    LexMalformedUnicodeEscape,

    /// `<%#` template comment missing its `%>`.
    #[error("unbalanced epp comment")]
    LexUnbalancedEppComment,

    /// A heredoc declaration missing its closing `)`.
    #[error("unterminated heredoc declaration")]
    LexHeredocDeclUnterminated,

    /// A heredoc body with no line matching the end tag.
    #[error("unterminated heredoc")]
    LexHeredocUnterminated,

    /// A heredoc declaration with an empty tag.
    #[error("empty heredoc tag")]
    LexHeredocEmptyTag,

    /// A heredoc escape flag outside `trnsuL$`.
    #[error("invalid heredoc escape '{ch}'")]
    LexHeredocIllegalEscape {
        /// The offending flag character.
        ch: char,
    },

    /// More than one `:syntax` section in a heredoc declaration.
    #[error("more than one syntax declaration in heredoc")]
    LexHeredocMultipleSyntax,

    /// More than one `/escapes` section in a heredoc declaration.
    #[error("more than one escape declaration in heredoc")]
    LexHeredocMultipleEscape,

    // === Syntax issues ===
    /// The current token is not the one the production requires.
    #[error("expected token '{expected}', got '{actual}'")]
    ParseExpectedToken {
        /// Display text of the required token.
        expected: EcoString,
        /// Display text of the token found.
        actual: EcoString,
    },

    /// The current token is none of the tokens the production accepts.
    #[error("expected one of {expected}, got '{actual}'")]
    ParseExpectedOneOfTokens {
        /// Rendered list of acceptable tokens.
        expected: EcoString,
        /// Display text of the token found.
        actual: EcoString,
    },

    /// A hash key without its `=>`.
    #[error("expected '=>' to follow hash key")]
    ParseExpectedFarrowAfterKey,

    /// A resource body where a title was required.
    #[error("resource title expected")]
    ParseExpectedTitle,

    /// An attribute operation without a name.
    #[error("expected attribute name")]
    ParseExpectedAttributeName,

    /// An attribute operation with neither `=>` nor `+>`.
    #[error("invalid attribute operation")]
    ParseInvalidAttribute,

    /// A resource expression whose body has no title and whose type name is
    /// not a statement-call function.
    #[error("this expression is invalid. Did you try declaring a '{name}' resource without a title?")]
    ParseResourceWithoutTitle {
        /// The would-be resource type name.
        name: EcoString,
    },

    /// A comma between statements in a block.
    #[error("extraneous comma between statements")]
    ParseExtraneousComma,

    /// `elsif` inside an `unless` expression.
    #[error("'elsif' is not supported in an 'unless' expression")]
    ParseElsifInUnless,

    /// A type name was required.
    #[error("expected type name")]
    ParseExpectedTypeName,

    /// The `type` keyword not followed by a type name.
    #[error("expected type name to follow 'type'")]
    ParseExpectedTypeNameAfterType,

    /// `inherits` not followed by a plain type name.
    #[error("expected type name to follow 'inherits'")]
    ParseInheritsMustBeTypeName,

    /// `function` not followed by a name.
    #[error("expected a name to follow 'function'")]
    ParseExpectedNameAfterFunction,

    /// `plan` not followed by a name.
    #[error("expected a name to follow 'plan'")]
    ParseExpectedNameAfterPlan,

    /// A node definition without a valid hostname.
    #[error("hostname expected")]
    ParseExpectedHostname,

    /// A parameter without a variable name.
    #[error("expected variable declaration")]
    ParseExpectedVariable,

    /// A class definition without a valid name.
    #[error("expected name of class")]
    ParseExpectedClassName,

    /// A quoted string where a bare name was required.
    #[error("a quoted string is not valid as a name here")]
    ParseQuotedNotValidName,

    /// The `class` keyword where a name was required.
    #[error("'class' keyword not allowed at this location")]
    ParseClassNotValidHere,

    /// EPP parameters declared after literal template text.
    #[error("invalid parameter list in epp template")]
    ParseIllegalEppParameters,

    /// An actor definition without a valid name.
    #[error("expected action name")]
    ParseExpectedActionName,

    /// A dotted name segment that is neither a name nor a number.
    #[error("expected name or number to follow '.'")]
    ParseExpectedNameOrNumberAfterDot,
}

impl ParseIssue {
    /// The stable SCREAMING_SNAKE code for this issue.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::LexUnexpectedToken { .. } => "LEX_UNEXPECTED_TOKEN",
            Self::LexUnexpectedChar { .. } => "LEX_UNEXPECTED_CHAR",
            Self::LexDoubleColonNotFollowedByName => "LEX_DOUBLE_COLON_NOT_FOLLOWED_BY_NAME",
            Self::LexDigitExpected => "LEX_DIGIT_EXPECTED",
            Self::LexHexdigitExpected => "LEX_HEXDIGIT_EXPECTED",
            Self::LexOctaldigitExpected => "LEX_OCTALDIGIT_EXPECTED",
            Self::LexInvalidNumber { .. } => "LEX_INVALID_NUMBER",
            Self::LexInvalidName { .. } => "LEX_INVALID_NAME",
            Self::LexInvalidTypeName { .. } => "LEX_INVALID_TYPE_NAME",
            Self::LexInvalidOperator { .. } => "LEX_INVALID_OPERATOR",
            Self::LexUnterminatedString => "LEX_UNTERMINATED_STRING",
            Self::LexUnterminatedComment => "LEX_UNTERMINATED_COMMENT",
            Self::LexUnterminatedRegexp => "LEX_UNTERMINATED_REGEXP",
            Self::LexMalformedHexEscape => "LEX_MALFORMED_HEX_ESCAPE",
            Self::LexMalformedUnicodeEscape => "LEX_MALFORMED_UNICODE_ESCAPE",
            Self::LexUnbalancedEppComment => "LEX_UNBALANCED_EPP_COMMENT",
            Self::LexHeredocDeclUnterminated => "LEX_HEREDOC_DECL_UNTERMINATED",
            Self::LexHeredocUnterminated => "LEX_HEREDOC_UNTERMINATED",
            Self::LexHeredocEmptyTag => "LEX_HEREDOC_EMPTY_TAG",
            Self::LexHeredocIllegalEscape { .. } => "LEX_HEREDOC_ILLEGAL_ESCAPE",
            Self::LexHeredocMultipleSyntax => "LEX_HEREDOC_MULTIPLE_SYNTAX",
            Self::LexHeredocMultipleEscape => "LEX_HEREDOC_MULTIPLE_ESCAPE",
            Self::ParseExpectedToken { .. } => "PARSE_EXPECTED_TOKEN",
            Self::ParseExpectedOneOfTokens { .. } => "PARSE_EXPECTED_ONE_OF_TOKENS",
            Self::ParseExpectedFarrowAfterKey => "PARSE_EXPECTED_FARROW_AFTER_KEY",
            Self::ParseExpectedTitle => "PARSE_EXPECTED_TITLE",
            Self::ParseExpectedAttributeName => "PARSE_EXPECTED_ATTRIBUTE_NAME",
            Self::ParseInvalidAttribute => "PARSE_INVALID_ATTRIBUTE",
            Self::ParseResourceWithoutTitle { .. } => "PARSE_RESOURCE_WITHOUT_TITLE",
            Self::ParseExtraneousComma => "PARSE_EXTRANEOUS_COMMA",
            Self::ParseElsifInUnless => "PARSE_ELSIF_IN_UNLESS",
            Self::ParseExpectedTypeName => "PARSE_EXPECTED_TYPE_NAME",
            Self::ParseExpectedTypeNameAfterType => "PARSE_EXPECTED_TYPE_NAME_AFTER_TYPE",
            Self::ParseInheritsMustBeTypeName => "PARSE_INHERITS_MUST_BE_TYPE_NAME",
            Self::ParseExpectedNameAfterFunction => "PARSE_EXPECTED_NAME_AFTER_FUNCTION",
            Self::ParseExpectedNameAfterPlan => "PARSE_EXPECTED_NAME_AFTER_PLAN",
            Self::ParseExpectedHostname => "PARSE_EXPECTED_HOSTNAME",
            Self::ParseExpectedVariable => "PARSE_EXPECTED_VARIABLE",
            Self::ParseExpectedClassName => "PARSE_EXPECTED_CLASS_NAME",
            Self::ParseQuotedNotValidName => "PARSE_QUOTED_NOT_VALID_NAME",
            Self::ParseClassNotValidHere => "PARSE_CLASS_NOT_VALID_HERE",
            Self::ParseIllegalEppParameters => "PARSE_ILLEGAL_EPP_PARAMETERS",
            Self::ParseExpectedActionName => "PARSE_EXPECTED_ACTION_NAME",
            Self::ParseExpectedNameOrNumberAfterDot => "PARSE_EXPECTED_NAME_OR_NUMBER_AFTER_DOT",
        }
    }

    /// Issue severity; everything the core raises is fatal.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        Severity::Error
    }
}

/// A positioned parse failure: the issue plus where it was detected.
#[derive(Debug, Clone, PartialEq, Diagnostic)]
#[diagnostic()]
pub struct ParseError {
    issue: ParseIssue,
    #[label("here")]
    span: Span,
}

impl ParseError {
    /// Creates an error for `issue` detected at `span`.
    #[must_use]
    pub fn new(issue: ParseIssue, span: Span) -> Self {
        Self { issue, span }
    }

    /// The structured issue.
    #[must_use]
    pub fn issue(&self) -> &ParseIssue {
        &self.issue
    }

    /// The stable issue code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.issue.code()
    }

    /// The detection position.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The file name, possibly empty.
    #[must_use]
    pub fn file(&self) -> &str {
        self.span.file()
    }

    /// 1-based line of the detection position.
    #[must_use]
    pub fn line(&self) -> usize {
        self.span.line()
    }

    /// 1-based character column of the detection position.
    #[must_use]
    pub fn column(&self) -> usize {
        self.span.column()
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.file().is_empty() {
            write!(
                f,
                "{} (line: {}, column: {})",
                self.issue,
                self.line(),
                self.column()
            )
        } else {
            write!(
                f,
                "{} (file: {}, line: {}, column: {})",
                self.issue,
                self.file(),
                self.line(),
                self.column()
            )
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.issue)
    }
}
