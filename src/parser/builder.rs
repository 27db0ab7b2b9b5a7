//! Builder for configuring a new [`Parser`].

use crate::encoding::{EncodingRef, XmlEncoding};
use crate::errors::{Error, Result, XmlError};
use crate::parser::{resolve_protocol_encoding, ParamEntityParsing, Parser};

/// Builder for a [`Parser`].
///
/// ```
/// use sonar_xml::{ParamEntityParsing, ParserBuilder};
///
/// let parser = ParserBuilder::new()
///     .namespace_separator(' ')
///     .return_ns_triplets(true)
///     .param_entity_parsing(ParamEntityParsing::Always)
///     .build();
/// ```
pub struct ParserBuilder {
    encoding: Option<String>,
    ns_sep: Option<char>,
    ns_triplets: bool,
    param_entity_parsing: ParamEntityParsing,
}

impl ParserBuilder {
    pub fn new() -> Self {
        Self {
            encoding: None,
            ns_sep: None,
            ns_triplets: false,
            param_entity_parsing: ParamEntityParsing::Never,
        }
    }

    /// Fix the input encoding, overriding BOM and XML declaration.
    pub fn encoding(mut self, name: &str) -> Self {
        self.encoding = Some(name.to_string());
        self
    }

    /// Enable namespace processing. Reported names become
    /// `uri<sep>local`; a separator of `'\0'` is not special-cased —
    /// disable namespace processing by not calling this.
    pub fn namespace_separator(mut self, sep: char) -> Self {
        self.ns_sep = Some(sep);
        self
    }

    /// Append `<sep>prefix` to qualified names.
    pub fn return_ns_triplets(mut self, yes: bool) -> Self {
        self.ns_triplets = yes;
        self
    }

    pub fn param_entity_parsing(mut self, mode: ParamEntityParsing) -> Self {
        self.param_entity_parsing = mode;
        self
    }

    /// Build the parser. An unknown configured encoding surfaces on the
    /// first feed; use [`build_checked`](Self::build_checked) to reject it
    /// here.
    pub fn build(self) -> Parser {
        let enc = self
            .encoding
            .as_deref()
            .and_then(resolve_protocol_encoding)
            .map(EncodingRef::Explicit)
            .unwrap_or(EncodingRef::Implicit(XmlEncoding::Utf8));
        Parser::from_builder(
            self.ns_sep,
            self.ns_triplets,
            self.param_entity_parsing,
            self.encoding,
            enc,
        )
    }

    /// Build, rejecting an unresolvable configured encoding.
    pub fn build_checked(self) -> Result<Parser> {
        if let Some(name) = self.encoding.as_deref() {
            if resolve_protocol_encoding(name).is_none() {
                return Err(Error::new(XmlError::UnknownEncoding, 0, 1, 0));
            }
        }
        Ok(self.build())
    }
}

impl Default for ParserBuilder {
    fn default() -> Self {
        Self::new()
    }
}
