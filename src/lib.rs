//! A streaming push-based XML 1.0 parser.
//!
//! Bytes go in through [`Parser::parse`] in chunks of any size; events come
//! out through the [`Handler`] trait: element start/end, character data,
//! processing instructions, comments, CDATA boundaries, DTD declarations,
//! namespace scopes. The parser checks well-formedness as it goes, expands
//! internal entities inline, asks the handler for external ones, and can be
//! suspended from any handler and resumed later.
//!
//! ## Example
//!
//! ```
//! use sonar_xml::{Attributes, Flow, Handler, Parser};
//!
//! #[derive(Default)]
//! struct Outline {
//!     depth: usize,
//!     lines: Vec<String>,
//! }
//!
//! impl Handler for Outline {
//!     fn start_element(&mut self, name: &str, _atts: &Attributes) -> Flow {
//!         self.lines.push(format!("{}{}", "  ".repeat(self.depth), name));
//!         self.depth += 1;
//!         Flow::Continue
//!     }
//!     fn end_element(&mut self, _name: &str) -> Flow {
//!         self.depth -= 1;
//!         Flow::Continue
//!     }
//! }
//!
//! let mut outline = Outline::default();
//! let mut parser = Parser::new();
//! parser
//!     .parse(&mut outline, b"<library><shelf><book/></shelf></library>", true)
//!     .unwrap();
//! assert_eq!(outline.lines, ["library", "  shelf", "    book"]);
//! ```
//!
//! ## Namespaces
//!
//! [`Parser::new_ns`] turns on namespace processing: qualified names reach
//! handlers as `uri<sep>local` (see
//! [`set_return_ns_triplet`](Parser::set_return_ns_triplet) for the
//! three-part form), `xmlns` attributes become scope events instead of
//! ordinary attributes.
//!
//! ## Streaming
//!
//! Input may be split anywhere, including inside a multi-byte character.
//! The event sequence is the same for any chunking of the same document;
//! feed with `is_final = false` until the last chunk.

mod accounting;
mod dtd;
mod encoding;
mod errors;
mod handler;
mod namespace;
mod parser;
mod pool;
mod prolog;
mod tokenizer;

pub use crate::dtd::{AttributeType, ContentKind, ContentModel, ContentQuant, EntityDecl};
pub use crate::encoding::UnknownEncoding;
pub use crate::errors::{Error, Result, XmlError};
pub use crate::handler::{
    Attribute, Attributes, ExternalFlow, Flow, Handler, SinkHandler,
};
pub use crate::parser::{
    ParamEntityParsing, Parser, ParserBuilder, ParsingStatus, Status,
};
