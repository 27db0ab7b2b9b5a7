//! Entity reference expansion, attribute-value and entity-value
//! normalization, XML/text declarations, and the hand-off to external
//! entity parsers.

use std::rc::Rc;

use crate::accounting::PREDEFINED_REF_COST;
use crate::dtd::{Dtd, EntityKind};
use crate::encoding::{EncodingRef, XmlEncoding};
use crate::errors::{Result, XmlError};
use crate::handler::{ExternalFlow, Handler};
use crate::parser::{InputKind, Mode, ParamEntityParsing, Parser};
use crate::prolog::PrologMachine;
use crate::tokenizer::{self, char_ref_value, LexState, Scan, Token};

/// Outcome of normalizing a value that may reference entities declared
/// later in the DTD.
pub(crate) enum Normalize {
    Value(String),
    /// An entity was not declared (yet); carries its name.
    Deferred(String),
}

impl Parser {
    // ---------------------------------------------------------------
    // General entity references in content.

    pub(crate) fn content_entity_ref<H: Handler>(
        &mut self,
        handler: &mut H,
        name: &str,
    ) -> Result<()> {
        let looked_up = self.dtd.borrow().general(name).cloned();
        let entity = match looked_up {
            Some(e) => e,
            None => {
                if self.entity_may_be_missing() {
                    self.flush_chars(handler)?;
                    let flow = handler.skipped_entity(name, false);
                    return self.dispatch_flow(flow);
                }
                return self.fail(XmlError::UndefinedEntity);
            }
        };
        if entity.is_open {
            return self.fail(XmlError::RecursiveEntityRef);
        }
        if Dtd::is_predefined(name) {
            // Predefined references expand into the surrounding run;
            // their cost is charged per reference.
            self.account_indirect(PREDEFINED_REF_COST)?;
            let text = entity.text().expect("predefined entities are internal");
            self.pending_chars.push_str(&text);
            return Ok(());
        }
        // Any other reference delimits the character-data event.
        self.flush_chars(handler)?;
        match &entity.kind {
            EntityKind::Internal { text } => {
                self.push_frame(name, Rc::clone(text), false);
                Ok(())
            }
            EntityKind::External { notation, .. } if notation.is_some() => {
                self.fail(XmlError::BinaryEntityRef)
            }
            EntityKind::External {
                system_id,
                public_id,
                ..
            } => {
                let system_id = system_id.clone();
                let public_id = public_id.clone();
                self.invoke_external(
                    handler,
                    name,
                    false,
                    Some(&system_id),
                    public_id.as_deref(),
                    entity.base.as_deref().map(str::to_string),
                )
            }
        }
    }

    /// Whether an unresolvable entity reference is forgivable rather
    /// than a well-formedness error.
    pub(crate) fn entity_may_be_missing(&self) -> bool {
        let dtd = self.dtd.borrow();
        !dtd.standalone && (dtd.has_external_subset || !dtd.keep_processing)
    }

    // ---------------------------------------------------------------
    // Parameter entity references in the DTD.

    pub(crate) fn param_entity_ref<H: Handler>(
        &mut self,
        handler: &mut H,
        name: &str,
    ) -> Result<()> {
        let (at_subset_level, in_external) = match &self.mode {
            Mode::Prolog(machine) => {
                (machine.at_subset_level(), machine.in_external_subset())
            }
            _ => (false, false),
        };
        // In the internal subset parameter entities may only appear
        // between declarations.
        if !in_external && !at_subset_level {
            return self.fail(XmlError::ParamEntityRef);
        }
        let standalone = self.dtd.borrow().standalone;
        let skip = match self.param_entity_parsing {
            ParamEntityParsing::Never => true,
            ParamEntityParsing::UnlessStandalone => standalone,
            ParamEntityParsing::Always => false,
        };
        if skip {
            self.dtd.borrow_mut().keep_processing = false;
            let flow = handler.skipped_entity(name, true);
            return self.dispatch_flow(flow);
        }
        let looked_up = self.dtd.borrow().param(name).cloned();
        let entity = match looked_up {
            Some(e) => e,
            None => {
                if self.entity_may_be_missing() {
                    self.dtd.borrow_mut().keep_processing = false;
                    let flow = handler.skipped_entity(name, true);
                    return self.dispatch_flow(flow);
                }
                return self.fail(XmlError::UndefinedEntity);
            }
        };
        if entity.is_open {
            return self.fail(XmlError::RecursiveEntityRef);
        }
        match &entity.kind {
            EntityKind::Internal { text } => {
                // Parameter entity replacement gets one space of padding
                // on each side when expanded in the DTD.
                let padded: Rc<str> = format!(" {} ", text).into();
                self.push_frame(name, padded, true);
                Ok(())
            }
            EntityKind::External {
                system_id,
                public_id,
                ..
            } => {
                let system_id = system_id.clone();
                let public_id = public_id.clone();
                self.invoke_external(
                    handler,
                    name,
                    true,
                    Some(&system_id),
                    public_id.as_deref(),
                    entity.base.as_deref().map(str::to_string),
                )
            }
        }
    }

    // ---------------------------------------------------------------
    // External entities.

    /// Hand an external entity to the handler through a prepared child
    /// parser.
    fn invoke_external<H: Handler>(
        &mut self,
        handler: &mut H,
        name: &str,
        is_param: bool,
        system_id: Option<&str>,
        public_id: Option<&str>,
        base: Option<String>,
    ) -> Result<()> {
        let kind = if is_param {
            InputKind::ExternalSubset
        } else {
            InputKind::ExternalEntity
        };
        let context = if is_param {
            format!("pe:{}", name)
        } else {
            format!("ent:{}", name)
        };
        let child = self.make_child(kind);
        self.dtd.borrow_mut().set_open(name, is_param, true);
        let outcome = handler.external_entity_ref(
            child,
            &context,
            base.as_deref().or(self.base.as_deref()),
            system_id,
            public_id,
        );
        self.dtd.borrow_mut().set_open(name, is_param, false);
        match outcome {
            ExternalFlow::Handled => Ok(()),
            ExternalFlow::Skip => {
                if is_param {
                    self.dtd.borrow_mut().keep_processing = false;
                }
                let flow = handler.skipped_entity(name, is_param);
                self.dispatch_flow(flow)
            }
            ExternalFlow::Error => self.fail(XmlError::ExternalEntityHandling),
        }
    }

    /// Ask the handler to load the external DTD subset (from the DOCTYPE
    /// system id, or a foreign DTD).
    pub(crate) fn load_external_subset<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        let standalone = self.dtd.borrow().standalone;
        let skip = match self.param_entity_parsing {
            ParamEntityParsing::Never => true,
            ParamEntityParsing::UnlessStandalone => standalone,
            ParamEntityParsing::Always => false,
        };
        if skip {
            return Ok(());
        }
        let child = self.make_child(InputKind::ExternalSubset);
        let system_id = self.doctype.system_id.clone();
        let public_id = self.doctype.public_id.clone();
        let base = self.base.clone();
        let outcome = handler.external_entity_ref(
            child,
            "dtd",
            base.as_deref(),
            system_id.as_deref(),
            public_id.as_deref(),
        );
        match outcome {
            ExternalFlow::Handled => {
                self.ext_subset_read = true;
                Ok(())
            }
            ExternalFlow::Skip => Ok(()),
            ExternalFlow::Error => self.fail(XmlError::ExternalEntityHandling),
        }
    }

    /// Build a child parser sharing this parser's DTD, accounting and
    /// configuration.
    fn make_child(&self, kind: InputKind) -> Parser {
        let mut child = Parser::from_builder(
            self.ns_sep,
            self.ns_triplets,
            self.param_entity_parsing,
            None,
            EncodingRef::Implicit(XmlEncoding::Utf8),
        );
        child.dtd = Rc::clone(&self.dtd);
        child.accounting = Rc::clone(&self.accounting);
        child.base = self.base.clone();
        child.mode = match &kind {
            InputKind::ExternalSubset => {
                Mode::Prolog(PrologMachine::new_external_subset())
            }
            _ => Mode::Content,
        };
        child.input_kind = kind;
        child
    }

    /// Create a parser for an external entity named by a context string
    /// previously passed to
    /// [`Handler::external_entity_ref`].
    pub fn external_entity_parser(
        &self,
        context: &str,
        encoding: Option<&str>,
    ) -> Result<Parser> {
        let kind = if context == "dtd" || context.starts_with("pe:") {
            InputKind::ExternalSubset
        } else if context.starts_with("ent:") {
            InputKind::ExternalEntity
        } else {
            return Err(self.api_error(XmlError::InvalidArgument));
        };
        let mut child = self.make_child(kind);
        if let Some(name) = encoding {
            child.set_encoding(name)?;
        }
        Ok(child)
    }

    // ---------------------------------------------------------------
    // Attribute value normalization (XML 1.0 §3.3.3).

    /// Normalize a raw attribute value: whitespace becomes spaces,
    /// character references are decoded, internal general entities are
    /// expanded in place. With `defer_unknown`, an unresolved entity
    /// reference is reported back instead of failing, so default values
    /// can wait for declarations later in the DTD.
    pub(crate) fn normalize_att_value(
        &mut self,
        raw: &str,
        is_cdata: bool,
        defer_unknown: bool,
    ) -> Result<Normalize> {
        let mut out = String::with_capacity(raw.len());
        match self.append_att_value(raw, &mut out, defer_unknown)? {
            Some(name) => return Ok(Normalize::Deferred(name)),
            None => {}
        }
        if !is_cdata {
            out = collapse_spaces(&out);
        }
        Ok(Normalize::Value(out))
    }

    /// Recursive worker: appends the normalized expansion of `raw` to
    /// `out`. Returns the name of an undeclared entity when deferring.
    fn append_att_value(
        &mut self,
        raw: &str,
        out: &mut String,
        defer_unknown: bool,
    ) -> Result<Option<String>> {
        let mut pos = 0;
        let enc = XmlEncoding::Utf8;
        while pos < raw.len() {
            let scan = tokenizer::scan(&enc, LexState::AttValue, &raw.as_bytes()[pos..], true);
            match scan {
                Scan::None => break,
                Scan::Token(tok, len) => {
                    let text = &raw[pos..pos + len];
                    pos += len;
                    match tok {
                        Token::DataChars => out.push_str(text),
                        Token::AttValueS | Token::DataNewline => out.push(' '),
                        Token::CharRef => {
                            let inner = &text[1..text.len() - 1];
                            match char_ref_value(inner) {
                                Some(c) => out.push(c),
                                None => return self.fail(XmlError::BadCharRef),
                            }
                        }
                        Token::EntityRef => {
                            let name = text[1..text.len() - 1].to_string();
                            if let Some(deferred) =
                                self.append_entity_ref(&name, out, defer_unknown)?
                            {
                                return Ok(Some(deferred));
                            }
                        }
                        _ => return self.fail(XmlError::UnexpectedState),
                    }
                }
                Scan::Invalid(_) => return self.fail(XmlError::InvalidToken),
                Scan::Partial | Scan::PartialChar => {
                    return self.fail(XmlError::InvalidToken)
                }
            }
        }
        Ok(None)
    }

    fn append_entity_ref(
        &mut self,
        name: &str,
        out: &mut String,
        defer_unknown: bool,
    ) -> Result<Option<String>> {
        let looked_up = self.dtd.borrow().general(name).cloned();
        let entity = match looked_up {
            Some(e) => e,
            None => {
                if defer_unknown {
                    return Ok(Some(name.to_string()));
                }
                if self.entity_may_be_missing() {
                    // The reference is dropped; an external subset we did
                    // not read may define it.
                    return Ok(None);
                }
                return self.fail(XmlError::UndefinedEntity);
            }
        };
        if entity.is_open {
            return self.fail(XmlError::RecursiveEntityRef);
        }
        if Dtd::is_predefined(name) {
            self.account_indirect(PREDEFINED_REF_COST)?;
            out.push_str(&entity.text().expect("predefined entities are internal"));
            return Ok(None);
        }
        match &entity.kind {
            EntityKind::Internal { text } => {
                let text = Rc::clone(text);
                self.account_indirect(text.len() as u64)?;
                self.dtd.borrow_mut().set_open(name, false, true);
                let result = self.append_att_value(&text, out, defer_unknown);
                self.dtd.borrow_mut().set_open(name, false, false);
                result
            }
            EntityKind::External { notation, .. } if notation.is_some() => {
                self.fail(XmlError::BinaryEntityRef)
            }
            EntityKind::External { .. } => {
                self.fail(XmlError::AttributeExternalEntityRef)
            }
        }
    }

    // ---------------------------------------------------------------
    // Entity value literals (replacement text construction).

    /// Build the replacement text of an internal entity from its literal.
    /// Character references are decoded, parameter entities are expanded
    /// (external subset only), general entity references stay as written.
    pub(crate) fn process_entity_value<H: Handler>(
        &mut self,
        handler: &mut H,
        raw: &str,
    ) -> Result<String> {
        let mut out = String::with_capacity(raw.len());
        self.append_entity_value(handler, raw, &mut out)?;
        Ok(out)
    }

    fn append_entity_value<H: Handler>(
        &mut self,
        handler: &mut H,
        raw: &str,
        out: &mut String,
    ) -> Result<()> {
        let enc = XmlEncoding::Utf8;
        let mut pos = 0;
        while pos < raw.len() {
            let scan =
                tokenizer::scan(&enc, LexState::EntityValue, &raw.as_bytes()[pos..], true);
            match scan {
                Scan::None => break,
                Scan::Token(tok, len) => {
                    let text = &raw[pos..pos + len];
                    pos += len;
                    match tok {
                        Token::DataChars => out.push_str(text),
                        Token::DataNewline => out.push('\n'),
                        Token::CharRef => {
                            let inner = &text[1..text.len() - 1];
                            match char_ref_value(inner) {
                                Some(c) => out.push(c),
                                None => return self.fail(XmlError::BadCharRef),
                            }
                        }
                        // A general entity reference is replacement data,
                        // expanded only when the entity itself is used.
                        Token::EntityRef => out.push_str(text),
                        Token::ParamEntityRef => {
                            let name = &text[1..text.len() - 1];
                            self.append_pe_in_entity_value(handler, name, out)?;
                        }
                        _ => return self.fail(XmlError::UnexpectedState),
                    }
                }
                Scan::Invalid(_) => return self.fail(XmlError::InvalidToken),
                Scan::Partial | Scan::PartialChar => {
                    return self.fail(XmlError::InvalidToken)
                }
            }
        }
        Ok(())
    }

    fn append_pe_in_entity_value<H: Handler>(
        &mut self,
        handler: &mut H,
        name: &str,
        out: &mut String,
    ) -> Result<()> {
        let in_external = match &self.mode {
            Mode::Prolog(machine) => machine.in_external_subset(),
            _ => false,
        };
        if !in_external {
            // WFC: no parameter entity references in entity values of the
            // internal subset.
            return self.fail(XmlError::ParamEntityRef);
        }
        let looked_up = self.dtd.borrow().param(name).cloned();
        let entity = match looked_up {
            Some(e) => e,
            None => {
                if self.entity_may_be_missing() {
                    self.dtd.borrow_mut().keep_processing = false;
                    let flow = handler.skipped_entity(name, true);
                    return self.dispatch_flow(flow);
                }
                return self.fail(XmlError::UndefinedEntity);
            }
        };
        if entity.is_open {
            return self.fail(XmlError::RecursiveEntityRef);
        }
        match &entity.kind {
            EntityKind::Internal { text } => {
                let text = Rc::clone(text);
                self.account_indirect(text.len() as u64)?;
                self.dtd.borrow_mut().set_open(name, true, true);
                let result = self.append_entity_value(handler, &text, out);
                self.dtd.borrow_mut().set_open(name, true, false);
                result
            }
            EntityKind::External { .. } => {
                self.dtd.borrow_mut().keep_processing = false;
                let flow = handler.skipped_entity(name, true);
                self.dispatch_flow(flow)
            }
        }
    }

    // ---------------------------------------------------------------
    // XML and text declarations.

    /// `<?xml ...?>` at the start of the entity. For the document entity
    /// this is the XML declaration; external entities carry a text
    /// declaration instead.
    pub(crate) fn process_xml_decl<H: Handler>(
        &mut self,
        handler: &mut H,
        text: &str,
    ) -> Result<()> {
        let is_text_decl = self.is_child();
        let bad = if is_text_decl {
            XmlError::TextDecl
        } else {
            XmlError::XmlDecl
        };
        let body = &text[5..text.len() - 2];
        let mut version: Option<String> = None;
        let mut encoding: Option<String> = None;
        let mut standalone: Option<bool> = None;
        let mut rest = body;
        let mut seen = 0u8;
        loop {
            rest = rest.trim_start_matches(|c: char| tokenizer::is_whitespace(c));
            if rest.is_empty() {
                break;
            }
            let (name, value, tail) = match pseudo_attribute(rest) {
                Some(parts) => parts,
                None => return self.fail(bad),
            };
            rest = tail;
            match name {
                "version" if seen < 1 => {
                    seen = 1;
                    if !value.starts_with("1.") {
                        return self.fail(bad);
                    }
                    version = Some(value.to_string());
                }
                "encoding" if seen < 2 => {
                    seen = 2;
                    if !valid_encoding_name(value) {
                        return self.fail(bad);
                    }
                    encoding = Some(value.to_string());
                }
                "standalone" if seen < 3 && !is_text_decl => {
                    seen = 3;
                    standalone = match value {
                        "yes" => Some(true),
                        "no" => Some(false),
                        _ => return self.fail(bad),
                    };
                }
                _ => return self.fail(bad),
            }
        }
        if !is_text_decl && version.is_none() {
            return self.fail(bad);
        }
        if is_text_decl && encoding.is_none() {
            return self.fail(bad);
        }
        if standalone == Some(true) {
            self.dtd.borrow_mut().standalone = true;
        }
        let flow = handler.xml_decl(version.as_deref(), encoding.as_deref(), standalone);
        self.dispatch_flow(flow)?;
        // The encoding switch happens even when the handler suspended, so
        // resuming scans the rest of the input correctly.
        if let Some(name) = encoding {
            self.refine_encoding(handler, &name)?;
        }
        Ok(())
    }

    /// Apply the encoding named in the declaration, honoring the
    /// precedence rules: explicit beats BOM beats declaration.
    fn refine_encoding<H: Handler>(&mut self, handler: &mut H, name: &str) -> Result<()> {
        if !self.enc.can_be_refined() {
            return Ok(());
        }
        let is_utf16_label = name.eq_ignore_ascii_case("UTF-16")
            || name.eq_ignore_ascii_case("UTF-16LE")
            || name.eq_ignore_ascii_case("UTF-16BE");
        let current = self.enc.encoding().clone();
        let is_utf16_stream = matches!(
            current,
            XmlEncoding::Utf16Le | XmlEncoding::Utf16Be
        );
        if is_utf16_stream {
            // BOM already fixed the family; the declared name must agree
            // with it.
            let compatible = name.eq_ignore_ascii_case("UTF-16")
                || match current {
                    XmlEncoding::Utf16Le => name.eq_ignore_ascii_case("UTF-16LE"),
                    XmlEncoding::Utf16Be => name.eq_ignore_ascii_case("UTF-16BE"),
                    _ => false,
                };
            if !compatible {
                return self.fail(XmlError::IncorrectEncoding);
            }
            let keep = self.enc.encoding().clone();
            self.enc = EncodingRef::XmlDetected(keep);
            return Ok(());
        }
        if is_utf16_label {
            // UTF-16 without a BOM cannot have scanned this far.
            return self.fail(XmlError::IncorrectEncoding);
        }
        let resolved = crate::parser::resolve_protocol_encoding(name).or_else(|| {
            handler
                .unknown_encoding(name)
                .map(|table| XmlEncoding::Table(Rc::new(table)))
        });
        match resolved {
            Some(enc) => {
                self.enc = EncodingRef::XmlDetected(enc);
                Ok(())
            }
            None => self.fail(XmlError::UnknownEncoding),
        }
    }
}

/// Collapse for tokenized attribute types: leading/trailing spaces
/// dropped, internal runs reduced to one.
fn collapse_spaces(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for c in value.chars() {
        if c == ' ' {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }
    out
}

/// One `name = 'value'` out of an XML declaration body. Returns the name,
/// the value, and the remaining text.
fn pseudo_attribute(text: &str) -> Option<(&str, &str, &str)> {
    let name_end = text.find(|c: char| c == '=' || tokenizer::is_whitespace(c))?;
    let name = &text[..name_end];
    let rest = text[name_end..].trim_start_matches(|c: char| tokenizer::is_whitespace(c));
    let rest = rest.strip_prefix('=')?;
    let rest = rest.trim_start_matches(|c: char| tokenizer::is_whitespace(c));
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &rest[1..];
    let value_end = rest.find(quote)?;
    Some((name, &rest[..value_end], &rest[value_end + 1..]))
}

/// EncName ::= [A-Za-z] ([A-Za-z0-9._] | '-')*
fn valid_encoding_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_attributes_parse() {
        let (name, value, rest) = pseudo_attribute("version='1.0' encoding='a'").unwrap();
        assert_eq!(name, "version");
        assert_eq!(value, "1.0");
        let (name, value, rest) = pseudo_attribute(rest.trim_start()).unwrap();
        assert_eq!(name, "encoding");
        assert_eq!(value, "a");
        assert!(rest.is_empty());
    }

    #[test]
    fn space_collapsing() {
        assert_eq!(collapse_spaces("  a  b  "), "a b");
        assert_eq!(collapse_spaces("one"), "one");
        assert_eq!(collapse_spaces("   "), "");
    }

    #[test]
    fn encoding_names() {
        assert!(valid_encoding_name("UTF-8"));
        assert!(valid_encoding_name("iso-8859-1"));
        assert!(!valid_encoding_name("8859"));
        assert!(!valid_encoding_name("a b"));
    }
}
