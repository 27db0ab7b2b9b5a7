//! The handler trait through which parse events are delivered.
//!
//! Every method has a default implementation that ignores the event, so a
//! handler implements only what it cares about. Methods return [`Flow`] to
//! keep parsing, suspend it or abort it; suspension and abort take effect
//! before the next token is consumed.

use crate::dtd::{AttributeType, ContentModel, EntityDecl};
use crate::encoding::UnknownEncoding;
use crate::parser::Parser;

/// What the parser should do after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going.
    Continue,
    /// Suspend; [`Parser::resume`] picks up where parsing stopped.
    Suspend,
    /// Abort; the parse fails with [`XmlError::Aborted`](crate::XmlError::Aborted).
    Abort,
}

/// Outcome of [`Handler::external_entity_ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalFlow {
    /// The handler parsed the entity through the child parser.
    Handled,
    /// The entity is deliberately not loaded; a skipped-entity event is
    /// reported instead.
    Skip,
    /// Loading failed; the parse fails with
    /// [`XmlError::ExternalEntityHandling`](crate::XmlError::ExternalEntityHandling).
    Error,
}

/// One attribute of a start tag, name already namespace-rewritten and
/// value fully normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    /// The attribute was not in the document; it came from a DTD default.
    pub is_defaulted: bool,
}

/// The attribute set of one start tag, in document order with defaulted
/// attributes appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    items: Vec<Attribute>,
}

impl Attributes {
    pub(crate) fn push(&mut self, att: Attribute) {
        self.items.push(att);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<Attribute> {
        self.items.iter()
    }

    /// Value of the attribute with the given (rewritten) name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Receiver of parse events.
///
/// Element and attribute names arrive in the expanded form configured on
/// the parser: `uri<sep>local` (with `<sep>prefix` appended in triplet
/// mode) for qualified names when namespace processing is on, the raw
/// qualified name otherwise.
#[allow(unused_variables)]
pub trait Handler {
    /// Start tag, after namespace binding and attribute processing.
    fn start_element(&mut self, name: &str, attributes: &Attributes) -> Flow {
        Flow::Continue
    }

    /// End tag (or the synthetic end of an empty-element tag), same name
    /// form as the matching start.
    fn end_element(&mut self, name: &str) -> Flow {
        Flow::Continue
    }

    /// A run of character data. Newlines are normalized to `\n`;
    /// references arrive already expanded. May be called several times
    /// for one stretch of text.
    fn character_data(&mut self, data: &str) -> Flow {
        Flow::Continue
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Flow {
        Flow::Continue
    }

    fn comment(&mut self, text: &str) -> Flow {
        Flow::Continue
    }

    fn start_cdata_section(&mut self) -> Flow {
        Flow::Continue
    }

    fn end_cdata_section(&mut self) -> Flow {
        Flow::Continue
    }

    /// Input that no dedicated handler covers, such as whitespace between
    /// prolog declarations, delivered raw.
    fn unhandled(&mut self, text: &str) -> Flow {
        Flow::Continue
    }

    /// A namespace binding came into scope. Fires before the start tag
    /// that introduced it.
    fn start_namespace_decl(&mut self, prefix: Option<&str>, uri: &str) -> Flow {
        Flow::Continue
    }

    /// A namespace binding went out of scope. Fires after the end tag, in
    /// reverse order of declaration.
    fn end_namespace_decl(&mut self, prefix: Option<&str>) -> Flow {
        Flow::Continue
    }

    fn start_doctype_decl(
        &mut self,
        name: &str,
        system_id: Option<&str>,
        public_id: Option<&str>,
        has_internal_subset: bool,
    ) -> Flow {
        Flow::Continue
    }

    fn end_doctype_decl(&mut self) -> Flow {
        Flow::Continue
    }

    /// `<!ELEMENT ...>` with its parsed content model.
    fn element_decl(&mut self, name: &str, model: ContentModel) -> Flow {
        Flow::Continue
    }

    /// One attribute definition out of an `<!ATTLIST ...>`; called once
    /// per attribute listed.
    fn attlist_decl(
        &mut self,
        element: &str,
        attribute: &str,
        att_type: &AttributeType,
        default: Option<&str>,
        is_required: bool,
    ) -> Flow {
        Flow::Continue
    }

    /// `<!ENTITY ...>`, general or parameter, internal or external.
    fn entity_decl(&mut self, decl: &EntityDecl) -> Flow {
        Flow::Continue
    }

    fn notation_decl(
        &mut self,
        name: &str,
        system_id: Option<&str>,
        public_id: Option<&str>,
    ) -> Flow {
        Flow::Continue
    }

    /// An entity reference was skipped rather than expanded (undeclared
    /// but forgivable, or external with no handler willing to load it).
    fn skipped_entity(&mut self, name: &str, is_parameter: bool) -> Flow {
        Flow::Continue
    }

    /// The document is not standalone and declarations may have been
    /// missed. Return `false` to fail the parse with
    /// [`XmlError::NotStandalone`](crate::XmlError::NotStandalone).
    fn not_standalone(&mut self) -> bool {
        true
    }

    /// The XML declaration (or text declaration of an external entity,
    /// in which case `standalone` is `None` and `version` may be).
    fn xml_decl(
        &mut self,
        version: Option<&str>,
        encoding: Option<&str>,
        standalone: Option<bool>,
    ) -> Flow {
        Flow::Continue
    }

    /// An external entity is referenced. `child` is a parser prepared to
    /// parse that entity: resolve `system_id` against `base`, feed the
    /// child the entity's bytes (the shared DTD picks up anything it
    /// declares) and return [`ExternalFlow::Handled`].
    fn external_entity_ref(
        &mut self,
        child: Parser,
        context: &str,
        base: Option<&str>,
        system_id: Option<&str>,
        public_id: Option<&str>,
    ) -> ExternalFlow
    where
        Self: Sized,
    {
        ExternalFlow::Skip
    }

    /// An encoding the parser does not know. Return a byte map to adopt
    /// it; `None` fails the parse with
    /// [`XmlError::UnknownEncoding`](crate::XmlError::UnknownEncoding).
    fn unknown_encoding(&mut self, name: &str) -> Option<UnknownEncoding> {
        None
    }
}

/// A handler that ignores every event; useful for well-formedness checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct SinkHandler;

impl Handler for SinkHandler {}
