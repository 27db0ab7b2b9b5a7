//! Error management module

use std::fmt;

/// Stable error codes reported by the parser.
///
/// Once a parse fails, the parser keeps returning the same code from
/// [`Parser::error_code`](crate::Parser::error_code) until it is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlError {
    /// No error. Never carried by an `Err`, only observable through
    /// [`Parser::error_code`](crate::Parser::error_code) before any failure.
    None,
    /// An internal allocation limit was hit.
    NoMemory,
    /// The document violates the XML grammar.
    Syntax,
    /// The input ended before any element was found.
    NoElements,
    /// The bytes at the reported position do not form a legal token.
    InvalidToken,
    /// The input ended inside a token.
    UnclosedToken,
    /// The input ended inside a multi-byte character.
    PartialChar,
    /// An end tag does not match the innermost open start tag.
    TagMismatch,
    /// The same attribute appears twice in one start tag.
    DuplicateAttribute,
    /// Non-whitespace content follows the document element.
    JunkAfterDocElement,
    /// Illegal parameter entity reference.
    ParamEntityRef,
    /// Reference to an entity that was never declared.
    UndefinedEntity,
    /// An entity expansion refers back to an entity already being expanded.
    RecursiveEntityRef,
    /// An entity expansion is not properly nested within the content
    /// that referenced it.
    AsyncEntity,
    /// A character reference names a character outside the legal XML range.
    BadCharRef,
    /// Reference to an unparsed (binary) entity in content.
    BinaryEntityRef,
    /// Reference to an external entity inside an attribute value.
    AttributeExternalEntityRef,
    /// An XML declaration appeared anywhere other than the very start
    /// of the entity.
    MisplacedXmlPi,
    /// The declared encoding is not supported and no unknown-encoding
    /// hook accepted it.
    UnknownEncoding,
    /// The document bytes contradict the encoding it declared.
    IncorrectEncoding,
    /// The input ended inside a CDATA section.
    UnclosedCdataSection,
    /// The external-entity handler reported a failure.
    ExternalEntityHandling,
    /// The document is not standalone and the handler vetoed it.
    NotStandalone,
    /// The parser reached a state that should be unreachable.
    UnexpectedState,
    /// An entity was declared inside a parameter entity.
    EntityDeclaredInPe,
    /// The requested feature needs DTD support.
    FeatureRequiresXmlDtd,
    /// A feature was changed mid-parse.
    CantChangeFeatureOnceParsing,
    /// A name uses a namespace prefix with no in-scope binding.
    UnboundPrefix,
    /// A prefixed namespace declaration with an empty URI.
    UndeclaringPrefix,
    /// A parameter entity did not contain complete declarations.
    IncompletePe,
    /// Malformed XML declaration.
    XmlDecl,
    /// Malformed text declaration.
    TextDecl,
    /// A public identifier contains illegal characters.
    Publicid,
    /// The operation is not allowed while the parser is suspended.
    Suspended,
    /// `resume` was called on a parser that is not suspended.
    NotSuspended,
    /// Parsing was aborted by a handler.
    Aborted,
    /// The parse already finished.
    Finished,
    /// Suspension was requested while expanding a parameter entity.
    SuspendPe,
    /// Attempt to rebind the reserved `xml` prefix.
    ReservedPrefixXml,
    /// Attempt to declare the reserved `xmlns` prefix.
    ReservedPrefixXmlns,
    /// Attempt to bind an ordinary prefix to a reserved namespace URI.
    ReservedNamespaceUri,
    /// An argument to an API call was out of range.
    InvalidArgument,
    /// `parse_buffer` was called without a preceding `get_buffer`.
    NoBuffer,
    /// Entity expansion exceeded the configured amplification limit.
    AmplificationLimitBreach,
    /// `stop` was called before parsing started.
    NotStarted,
}

impl XmlError {
    /// A short description of the error code, in the vein of
    /// `strerror`. The text is stable and suitable for user display.
    pub fn message(self) -> &'static str {
        match self {
            XmlError::None => "no error",
            XmlError::NoMemory => "out of memory",
            XmlError::Syntax => "syntax error",
            XmlError::NoElements => "no element found",
            XmlError::InvalidToken => "not well-formed (invalid token)",
            XmlError::UnclosedToken => "unclosed token",
            XmlError::PartialChar => "partial character",
            XmlError::TagMismatch => "mismatched tag",
            XmlError::DuplicateAttribute => "duplicate attribute",
            XmlError::JunkAfterDocElement => "junk after document element",
            XmlError::ParamEntityRef => "illegal parameter entity reference",
            XmlError::UndefinedEntity => "undefined entity",
            XmlError::RecursiveEntityRef => "recursive entity reference",
            XmlError::AsyncEntity => "asynchronous entity",
            XmlError::BadCharRef => "reference to invalid character number",
            XmlError::BinaryEntityRef => "reference to binary entity",
            XmlError::AttributeExternalEntityRef => {
                "reference to external entity in attribute"
            }
            XmlError::MisplacedXmlPi => {
                "XML or text declaration not at start of entity"
            }
            XmlError::UnknownEncoding => "unknown encoding",
            XmlError::IncorrectEncoding => {
                "encoding specified in XML declaration is incorrect"
            }
            XmlError::UnclosedCdataSection => "unclosed CDATA section",
            XmlError::ExternalEntityHandling => {
                "error in processing external entity reference"
            }
            XmlError::NotStandalone => "document is not standalone",
            XmlError::UnexpectedState => {
                "unexpected parser state - please send a bug report"
            }
            XmlError::EntityDeclaredInPe => {
                "entity declared in parameter entity"
            }
            XmlError::FeatureRequiresXmlDtd => {
                "requested feature requires XML_DTD support in parser"
            }
            XmlError::CantChangeFeatureOnceParsing => {
                "cannot change setting once parsing has begun"
            }
            XmlError::UnboundPrefix => "unbound prefix",
            XmlError::UndeclaringPrefix => "must not undeclare prefix",
            XmlError::IncompletePe => "incomplete markup in parameter entity",
            XmlError::XmlDecl => "XML declaration not well-formed",
            XmlError::TextDecl => "text declaration not well-formed",
            XmlError::Publicid => "illegal character(s) in public id",
            XmlError::Suspended => "parser suspended",
            XmlError::NotSuspended => "parser not suspended",
            XmlError::Aborted => "parsing aborted",
            XmlError::Finished => "parsing finished",
            XmlError::SuspendPe => {
                "cannot suspend in external parameter entity"
            }
            XmlError::ReservedPrefixXml => {
                "reserved prefix (xml) must not be undeclared or bound to another namespace name"
            }
            XmlError::ReservedPrefixXmlns => {
                "reserved prefix (xmlns) must not be declared or undeclared"
            }
            XmlError::ReservedNamespaceUri => {
                "prefix must not be bound to one of the reserved namespace names"
            }
            XmlError::InvalidArgument => "invalid argument",
            XmlError::NoBuffer => {
                "a successful prior call to function get_buffer is required"
            }
            XmlError::AmplificationLimitBreach => {
                "limit on input amplification factor (from DTD and entities) breached"
            }
            XmlError::NotStarted => "parser not started",
        }
    }
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A parse failure: the error code plus the position at which parsing
/// stopped.
///
/// The same information stays queryable on the parser itself through
/// [`Parser::error_code`](crate::Parser::error_code) and the
/// `current_*` position accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    code: XmlError,
    byte_index: u64,
    line: u64,
    column: u64,
}

impl Error {
    pub(crate) fn new(code: XmlError, byte_index: u64, line: u64, column: u64) -> Self {
        Self {
            code,
            byte_index,
            line,
            column,
        }
    }

    /// The error code.
    pub fn code(&self) -> XmlError {
        self.code
    }

    /// Byte offset from the start of the outermost input at which the
    /// error was detected.
    pub fn byte_index(&self) -> u64 {
        self.byte_index
    }

    /// 1-based line of the offending position.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// 0-based column of the offending position.
    pub fn column(&self) -> u64 {
        self.column
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} at line {}, column {}",
            self.code.message(),
            self.line,
            self.column
        )
    }
}

impl std::error::Error for Error {}

/// A specialized `Result` type where the error is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
