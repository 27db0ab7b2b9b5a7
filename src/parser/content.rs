//! Element content: tags, attribute processing, namespace application,
//! character data and CDATA sections.

use std::collections::HashSet;

use crate::errors::{Result, XmlError};
use crate::handler::{Attribute, Attributes, Handler};
use crate::namespace::{split_qname, XMLNS_PREFIX};
use crate::parser::declarations::split_pi;
use crate::parser::entities::Normalize;
use crate::parser::{InputKind, Mode, OpenTag, Parser};
use crate::tokenizer::{char_ref_value, Token};

/// One attribute as pulled out of the tag text, before namespace
/// processing.
struct RawAtt {
    name: String,
    value: String,
    is_defaulted: bool,
}

impl Parser {
    /// Deliver accumulated character data as one event. Called at every
    /// markup or expansion boundary, so the split points do not depend on
    /// how the input was chunked.
    pub(crate) fn flush_chars<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        if self.pending_chars.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.pending_chars);
        let flow = handler.character_data(&text);
        self.dispatch_flow(flow)
    }

    pub(crate) fn content_token<H: Handler>(
        &mut self,
        handler: &mut H,
        tok: Token,
        text: &str,
        in_entity: bool,
    ) -> Result<()> {
        if let Mode::Cdata = self.mode {
            return match tok {
                Token::DataChars => {
                    self.pending_chars.push_str(text);
                    Ok(())
                }
                Token::DataNewline => {
                    self.pending_chars.push('\n');
                    Ok(())
                }
                Token::CdataSectClose => {
                    self.flush_chars(handler)?;
                    self.mode = Mode::Content;
                    let flow = handler.end_cdata_section();
                    self.dispatch_flow(flow)
                }
                _ => self.fail(XmlError::UnexpectedState),
            };
        }
        match tok {
            Token::DataChars => {
                self.pending_chars.push_str(text);
                Ok(())
            }
            Token::DataNewline => {
                self.pending_chars.push('\n');
                Ok(())
            }
            Token::CharRef => {
                let inner = &text[1..text.len() - 1];
                match char_ref_value(inner) {
                    Some(c) => {
                        self.pending_chars.push(c);
                        Ok(())
                    }
                    None => self.fail(XmlError::BadCharRef),
                }
            }
            Token::EntityRef => {
                let name = text[1..text.len() - 1].to_string();
                self.content_entity_ref(handler, &name)
            }
            Token::StartTagNoAtts | Token::StartTagWithAtts => {
                self.flush_chars(handler)?;
                self.start_tag(handler, text, false)
            }
            Token::EmptyElementNoAtts | Token::EmptyElementWithAtts => {
                self.flush_chars(handler)?;
                self.start_tag(handler, text, true)
            }
            Token::EndTag => {
                self.flush_chars(handler)?;
                self.end_tag(handler, text)
            }
            Token::CdataSectOpen => {
                self.flush_chars(handler)?;
                self.mode = Mode::Cdata;
                let flow = handler.start_cdata_section();
                self.dispatch_flow(flow)
            }
            Token::Comment => {
                self.flush_chars(handler)?;
                let flow = handler.comment(&text[4..text.len() - 3]);
                self.dispatch_flow(flow)
            }
            Token::Pi => {
                self.flush_chars(handler)?;
                let (target, data) = split_pi(text);
                let flow = handler.processing_instruction(target, data);
                self.dispatch_flow(flow)
            }
            Token::XmlDecl => {
                // A text declaration may open an external entity; anywhere
                // else `<?xml` is reserved.
                if self.is_child()
                    && !in_entity
                    && self.current_byte_index() == self.start_offset
                {
                    self.process_xml_decl(handler, text)
                } else {
                    self.fail(XmlError::MisplacedXmlPi)
                }
            }
            _ => self.fail(XmlError::UnexpectedState),
        }
    }

    // ---------------------------------------------------------------
    // Start tags.

    fn start_tag<H: Handler>(
        &mut self,
        handler: &mut H,
        text: &str,
        is_empty: bool,
    ) -> Result<()> {
        let (raw_name, specified) = parse_tag(text, is_empty);
        let raw_name = raw_name.to_string();

        // A raw name may appear only once per tag.
        for (i, (name, _)) in specified.iter().enumerate() {
            if specified[..i].iter().any(|(n, _)| n == name) {
                return self.fail(XmlError::DuplicateAttribute);
            }
        }

        let mut atts: Vec<RawAtt> = Vec::with_capacity(specified.len());
        for (name, raw_value) in &specified {
            let is_cdata = self.att_is_cdata(&raw_name, name);
            let value = match self.normalize_att_value(raw_value, is_cdata, false)? {
                Normalize::Value(v) => v,
                Normalize::Deferred(_) => unreachable!("deferral disabled"),
            };
            atts.push(RawAtt {
                name: name.clone(),
                value,
                is_defaulted: false,
            });
        }

        // DTD defaults for attributes the tag leaves out.
        let defaults: Vec<(String, String)> = {
            let dtd = self.dtd.borrow();
            match dtd.element(&raw_name) {
                Some(elem) => elem
                    .atts
                    .iter()
                    .filter_map(|def| {
                        let name = dtd.pool.resolve(def.name);
                        match &def.default {
                            Some(value)
                                if !atts.iter().any(|a| a.name == name) =>
                            {
                                Some((name.to_string(), value.clone()))
                            }
                            _ => None,
                        }
                    })
                    .collect(),
                None => Vec::new(),
            }
        };
        for (name, value) in defaults {
            self.account_indirect(value.len() as u64)?;
            atts.push(RawAtt {
                name,
                value,
                is_defaulted: true,
            });
        }

        let reported_name;
        let mut out = Attributes::default();
        if let Some(sep) = self.ns_sep {
            self.binder.push_scope();

            // Namespace declarations bind before anything resolves.
            let mut decls: Vec<(Option<String>, String)> = Vec::new();
            for att in &atts {
                if att.name == XMLNS_PREFIX {
                    decls.push((None, att.value.clone()));
                } else if let Some(p) = att.name.strip_prefix("xmlns:") {
                    decls.push((Some(p.to_string()), att.value.clone()));
                }
            }
            for (prefix, uri) in &decls {
                if let Err(code) = self.binder.bind(prefix.as_deref(), uri) {
                    return self.fail(code);
                }
                let flow = handler.start_namespace_decl(prefix.as_deref(), uri);
                self.dispatch_flow(flow)?;
            }

            reported_name = self.resolve_element_name(&raw_name, sep)?;

            let mut seen = HashSet::new();
            for att in &atts {
                if att.name == XMLNS_PREFIX || att.name.starts_with("xmlns:") {
                    continue;
                }
                let (prefix, local) = split_qname(&att.name);
                let uri = match prefix {
                    Some(p) => match self.binder.resolve(p) {
                        Some(uri) => Some(uri.to_string()),
                        None => return self.fail(XmlError::UnboundPrefix),
                    },
                    // Unprefixed attributes are in no namespace.
                    None => None,
                };
                let name = self.intern_expanded(uri.as_deref(), local, prefix, sep);
                // Two prefixes for the same URI make the same attribute.
                if !seen.insert((uri.clone(), local.to_string())) {
                    return self.fail(XmlError::DuplicateAttribute);
                }
                out.push(Attribute {
                    name,
                    value: att.value.clone(),
                    is_defaulted: att.is_defaulted,
                });
            }
        } else {
            reported_name = raw_name.clone();
            for att in atts {
                out.push(Attribute {
                    name: att.name,
                    value: att.value,
                    is_defaulted: att.is_defaulted,
                });
            }
        }

        let flow = handler.start_element(&reported_name, &out);
        self.dispatch_flow(flow)?;

        if is_empty {
            let flow = handler.end_element(&reported_name);
            self.dispatch_flow(flow)?;
            self.leave_scope(handler)?;
            self.maybe_enter_epilog();
        } else {
            self.open_tags.push(OpenTag {
                raw_name,
                reported_name,
            });
        }
        Ok(())
    }

    /// Expanded name of the element itself; unprefixed elements take the
    /// default namespace.
    fn resolve_element_name(&mut self, raw_name: &str, sep: char) -> Result<String> {
        let (prefix, local) = split_qname(raw_name);
        let uri = match prefix {
            Some(p) => match self.binder.resolve(p) {
                Some(uri) => Some(uri.to_string()),
                None => return self.fail(XmlError::UnboundPrefix),
            },
            None => self.binder.resolve_default().map(str::to_string),
        };
        Ok(self.intern_expanded(uri.as_deref(), local, prefix, sep))
    }

    /// Assemble `uri<sep>local[<sep>prefix]` in the DTD pool, so repeated
    /// names share interned storage; a name without a URI stays bare.
    fn intern_expanded(
        &mut self,
        uri: Option<&str>,
        local: &str,
        prefix: Option<&str>,
        sep: char,
    ) -> String {
        let mut dtd = self.dtd.borrow_mut();
        let pool = &mut dtd.pool;
        pool.start();
        match uri {
            Some(uri) => {
                pool.append_str(uri);
                pool.append(sep);
                pool.append_str(local);
                if self.ns_triplets {
                    if let Some(p) = prefix {
                        pool.append(sep);
                        pool.append_str(p);
                    }
                }
            }
            None => {
                pool.discard();
                let id = pool.intern(local);
                return pool.resolve(id).to_string();
            }
        }
        let id = pool.finish();
        pool.resolve(id).to_string()
    }

    /// Declared CDATA-ness of an attribute; undeclared attributes
    /// normalize as CDATA.
    fn att_is_cdata(&self, element: &str, attribute: &str) -> bool {
        let dtd = self.dtd.borrow();
        match dtd.element(element) {
            Some(elem) => match dtd.pool.get_id(attribute) {
                Some(att_id) => elem.att(att_id).map_or(true, |def| def.is_cdata),
                None => true,
            },
            None => true,
        }
    }

    // ---------------------------------------------------------------
    // End tags.

    fn end_tag<H: Handler>(&mut self, handler: &mut H, text: &str) -> Result<()> {
        let raw = text[2..text.len() - 1]
            .trim_end_matches(|c: char| crate::tokenizer::is_whitespace(c));
        let matches = self
            .open_tags
            .last()
            .map_or(false, |open| open.raw_name == raw);
        if !matches {
            return self.fail(XmlError::TagMismatch);
        }
        let open = self.open_tags.pop().expect("matched tag present");
        let flow = handler.end_element(&open.reported_name);
        self.dispatch_flow(flow)?;
        self.leave_scope(handler)?;
        self.maybe_enter_epilog();
        Ok(())
    }

    /// Pop the element's namespace scope, reporting each dying binding
    /// in LIFO order.
    fn leave_scope<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        if self.ns_sep.is_none() {
            return Ok(());
        }
        for binding in self.binder.pop_scope() {
            let flow = handler.end_namespace_decl(binding.prefix.as_deref());
            self.dispatch_flow(flow)?;
        }
        Ok(())
    }

    fn maybe_enter_epilog(&mut self) {
        if self.open_tags.is_empty() && self.input_kind == InputKind::Document {
            self.mode = Mode::Epilog;
        }
    }
}

/// Take a start tag's converted text apart into the element name and its
/// `(name, raw value)` attribute pairs. The scanner already validated the
/// shape, so this walk never sees malformed input.
fn parse_tag(text: &str, is_empty: bool) -> (&str, Vec<(String, String)>) {
    let end = text.len() - if is_empty { 2 } else { 1 };
    let body = &text[1..end];
    let name_end = body
        .find(|c: char| crate::tokenizer::is_whitespace(c))
        .unwrap_or(body.len());
    let name = &body[..name_end];
    let mut atts = Vec::new();
    let mut rest = &body[name_end..];
    loop {
        rest = rest.trim_start_matches(|c: char| crate::tokenizer::is_whitespace(c));
        if rest.is_empty() {
            break;
        }
        let eq = match rest.find('=') {
            Some(i) => i,
            None => break,
        };
        let att_name = rest[..eq]
            .trim_end_matches(|c: char| crate::tokenizer::is_whitespace(c));
        rest = rest[eq + 1..]
            .trim_start_matches(|c: char| crate::tokenizer::is_whitespace(c));
        let quote = rest.as_bytes()[0] as char;
        rest = &rest[1..];
        let close = rest.find(quote).expect("scanner closed the literal");
        atts.push((att_name.to_string(), rest[..close].to_string()));
        rest = &rest[close + 1..];
    }
    (name, atts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_parsing() {
        let (name, atts) = parse_tag("<doc>", false);
        assert_eq!(name, "doc");
        assert!(atts.is_empty());

        let (name, atts) = parse_tag("<e a='1' b = \"two\"/>", true);
        assert_eq!(name, "e");
        assert_eq!(
            atts,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two".to_string())
            ]
        );
    }

    #[test]
    fn tag_with_trailing_space() {
        let (name, atts) = parse_tag("<e  />", true);
        assert_eq!(name, "e");
        assert!(atts.is_empty());
    }
}
