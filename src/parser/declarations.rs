//! Driving the prolog: DOCTYPE, the internal/external subset, and every
//! declaration kind, built up role by role from the prolog machine.

use std::rc::Rc;

use crate::dtd::{
    AttDef, AttributeType, ContentKind, ContentModel, ContentQuant, Entity, EntityDecl,
    EntityKind,
};
use crate::errors::{Result, XmlError};
use crate::handler::Handler;
use crate::parser::entities::Normalize;
use crate::parser::{Mode, Parser, ParsingStatus, PendingDefault};
use crate::prolog::Role;
use crate::tokenizer::Token;

/// A declaration under construction, filled in by roles and finalized
/// when its closing `>` arrives.
#[derive(Debug, Default)]
pub(crate) struct DeclState {
    pub(crate) entity: Option<EntityBuilder>,
    pub(crate) notation: Option<NotationBuilder>,
    pub(crate) attlist: Option<AttlistBuilder>,
    pub(crate) element: Option<ElementBuilder>,
}

impl DeclState {
    fn clear(&mut self) {
        self.entity = None;
        self.notation = None;
        self.attlist = None;
        self.element = None;
    }
}

#[derive(Debug)]
pub(crate) struct EntityBuilder {
    name: String,
    is_param: bool,
    value: Option<String>,
    system_id: Option<String>,
    public_id: Option<String>,
    notation: Option<String>,
}

#[derive(Debug)]
pub(crate) struct NotationBuilder {
    name: String,
    system_id: Option<String>,
    public_id: Option<String>,
}

#[derive(Debug)]
pub(crate) struct AttlistBuilder {
    element: String,
    attribute: Option<String>,
    att_type: Option<AttributeType>,
    enum_values: Vec<String>,
    is_notation: bool,
}

#[derive(Debug)]
pub(crate) struct ElementBuilder {
    name: String,
    model: Option<ContentModel>,
    groups: Vec<GroupFrame>,
}

#[derive(Debug, Default)]
struct GroupFrame {
    kind: Option<ContentKind>,
    is_mixed: bool,
    children: Vec<ContentModel>,
}

impl Parser {
    pub(crate) fn prolog_token<H: Handler>(
        &mut self,
        handler: &mut H,
        tok: Token,
        text: &str,
        in_entity: bool,
    ) -> Result<()> {
        if self.in_ignore_sect {
            return match tok {
                Token::IgnoreSect => {
                    self.in_ignore_sect = false;
                    Ok(())
                }
                _ => self.fail(XmlError::Syntax),
            };
        }
        match tok {
            Token::Bom => Ok(()),
            Token::PrologS => {
                let flow = handler.unhandled(text);
                self.dispatch_flow(flow)
            }
            Token::XmlDecl => {
                if !in_entity && self.current_byte_index() == self.start_offset {
                    self.process_xml_decl(handler, text)
                } else {
                    self.fail(XmlError::MisplacedXmlPi)
                }
            }
            Token::InstanceStart => self.instance_start(handler),
            Token::Pi | Token::Comment => {
                // The machine validates where PIs and comments may sit.
                let role = match &mut self.mode {
                    Mode::Prolog(machine) => machine.next(tok, text),
                    _ => return self.fail(XmlError::UnexpectedState),
                };
                if role == Role::Error {
                    return self.fail(XmlError::Syntax);
                }
                if tok == Token::Pi {
                    let (target, data) = split_pi(text);
                    let flow = handler.processing_instruction(target, data);
                    self.dispatch_flow(flow)
                } else {
                    let flow = handler.comment(&text[4..text.len() - 3]);
                    self.dispatch_flow(flow)
                }
            }
            Token::ParamEntityRef => {
                let name = text[1..text.len() - 1].to_string();
                self.param_entity_ref(handler, &name)
            }
            Token::CondSectClose => {
                if self.include_depth > 0 {
                    self.include_depth -= 1;
                    Ok(())
                } else {
                    self.fail(XmlError::Syntax)
                }
            }
            _ => {
                let role = match &mut self.mode {
                    Mode::Prolog(machine) => machine.next(tok, text),
                    _ => return self.fail(XmlError::UnexpectedState),
                };
                self.prolog_role(handler, role, text)?;
                // Declarations finalize when their `>` goes by.
                if self.status == ParsingStatus::Parsing && tok == Token::DeclClose {
                    self.finalize_declaration(handler)?;
                }
                Ok(())
            }
        }
    }

    /// The document element is about to begin.
    fn instance_start<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        let legal = match &self.mode {
            Mode::Prolog(machine) => machine.expects_instance_start(),
            _ => false,
        };
        if !legal {
            return self.fail(XmlError::Syntax);
        }
        // A foreign DTD stands in for a missing DOCTYPE.
        if self.use_foreign_dtd && !self.doctype.seen {
            self.doctype.seen = true;
            self.dtd.borrow_mut().has_external_subset = true;
            self.load_external_subset(handler)?;
            if self.status != ParsingStatus::Parsing {
                return Ok(());
            }
        }
        self.check_not_standalone(handler)?;
        if self.status == ParsingStatus::Parsing {
            self.mode = Mode::Content;
        }
        Ok(())
    }

    /// The declarations this document depends on may not all have been
    /// read; give the handler a veto.
    pub(crate) fn check_not_standalone<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        if self.standalone_checked {
            return Ok(());
        }
        self.standalone_checked = true;
        let concerned = {
            let dtd = self.dtd.borrow();
            !dtd.standalone && dtd.has_external_subset
        };
        if concerned && !self.ext_subset_read && !handler.not_standalone() {
            return self.fail(XmlError::NotStandalone);
        }
        Ok(())
    }

    fn prolog_role<H: Handler>(
        &mut self,
        handler: &mut H,
        role: Role,
        text: &str,
    ) -> Result<()> {
        match role {
            Role::None => Ok(()),
            Role::Error => self.fail(XmlError::Syntax),

            // DOCTYPE.
            Role::DoctypeName => {
                self.doctype.seen = true;
                self.doctype.name = Some(text.to_string());
                Ok(())
            }
            Role::DoctypePublicId => {
                let id = self.literal_value(text)?;
                let id = self.check_publicid(id)?;
                self.doctype.public_id = Some(id);
                Ok(())
            }
            Role::DoctypeSystemId => {
                let id = self.literal_value(text)?;
                self.doctype.system_id = Some(id);
                self.dtd.borrow_mut().has_external_subset = true;
                Ok(())
            }
            Role::DoctypeInternalSubset => self.fire_start_doctype(handler, true),
            Role::DoctypeClose => self.close_doctype(handler),

            // Entities.
            Role::GeneralEntityName | Role::ParamEntityName => {
                if self.dtd.borrow().standalone && self.in_param_frame() {
                    return self.fail(XmlError::EntityDeclaredInPe);
                }
                self.decl.entity = Some(EntityBuilder {
                    name: text.to_string(),
                    is_param: role == Role::ParamEntityName,
                    value: None,
                    system_id: None,
                    public_id: None,
                    notation: None,
                });
                Ok(())
            }
            Role::EntityValue => {
                let raw = self.literal_value(text)?;
                let value = self.process_entity_value(handler, &raw)?;
                if let Some(entity) = self.decl.entity.as_mut() {
                    entity.value = Some(value);
                }
                Ok(())
            }
            Role::EntityPublicId => {
                let id = self.literal_value(text)?;
                let id = self.check_publicid(id)?;
                if let Some(entity) = self.decl.entity.as_mut() {
                    entity.public_id = Some(id);
                }
                Ok(())
            }
            Role::EntitySystemId => {
                let id = self.literal_value(text)?;
                if let Some(entity) = self.decl.entity.as_mut() {
                    entity.system_id = Some(id);
                }
                Ok(())
            }
            Role::EntityNotationName => {
                if let Some(entity) = self.decl.entity.as_mut() {
                    entity.notation = Some(text.to_string());
                }
                Ok(())
            }

            // Notations.
            Role::NotationName => {
                self.decl.notation = Some(NotationBuilder {
                    name: text.to_string(),
                    system_id: None,
                    public_id: None,
                });
                Ok(())
            }
            Role::NotationPublicId => {
                let id = self.literal_value(text)?;
                let id = self.check_publicid(id)?;
                if let Some(notation) = self.decl.notation.as_mut() {
                    notation.public_id = Some(id);
                }
                Ok(())
            }
            Role::NotationSystemId => {
                let id = self.literal_value(text)?;
                if let Some(notation) = self.decl.notation.as_mut() {
                    notation.system_id = Some(id);
                }
                Ok(())
            }

            // Attribute lists.
            Role::AttlistElementName => {
                self.decl.attlist = Some(AttlistBuilder {
                    element: text.to_string(),
                    attribute: None,
                    att_type: None,
                    enum_values: Vec::new(),
                    is_notation: false,
                });
                Ok(())
            }
            Role::AttributeName => {
                if let Some(attlist) = self.decl.attlist.as_mut() {
                    attlist.attribute = Some(text.to_string());
                    attlist.att_type = None;
                    attlist.enum_values.clear();
                    attlist.is_notation = false;
                }
                Ok(())
            }
            Role::AttributeTypeCdata
            | Role::AttributeTypeId
            | Role::AttributeTypeIdref
            | Role::AttributeTypeIdrefs
            | Role::AttributeTypeEntity
            | Role::AttributeTypeEntities
            | Role::AttributeTypeNmtoken
            | Role::AttributeTypeNmtokens => {
                if let Some(attlist) = self.decl.attlist.as_mut() {
                    attlist.att_type = Some(match role {
                        Role::AttributeTypeCdata => AttributeType::Cdata,
                        Role::AttributeTypeId => AttributeType::Id,
                        Role::AttributeTypeIdref => AttributeType::Idref,
                        Role::AttributeTypeIdrefs => AttributeType::Idrefs,
                        Role::AttributeTypeEntity => AttributeType::Entity,
                        Role::AttributeTypeEntities => AttributeType::Entities,
                        Role::AttributeTypeNmtoken => AttributeType::Nmtoken,
                        _ => AttributeType::Nmtokens,
                    });
                }
                Ok(())
            }
            Role::AttributeEnumValue => {
                if let Some(attlist) = self.decl.attlist.as_mut() {
                    attlist.enum_values.push(text.to_string());
                }
                Ok(())
            }
            Role::AttributeNotationValue => {
                if let Some(attlist) = self.decl.attlist.as_mut() {
                    attlist.is_notation = true;
                    attlist.enum_values.push(text.to_string());
                }
                Ok(())
            }
            Role::ImpliedAttributeValue => self.finish_attdef(handler, None, false),
            Role::RequiredAttributeValue => self.finish_attdef(handler, None, true),
            Role::DefaultAttributeValue => {
                let raw = self.literal_value(text)?;
                self.finish_attdef(handler, Some(raw), false)
            }
            Role::FixedAttributeValue => {
                let raw = self.literal_value(text)?;
                self.finish_attdef(handler, Some(raw), true)
            }

            // Element declarations.
            Role::ElementName => {
                self.decl.element = Some(ElementBuilder {
                    name: text.to_string(),
                    model: None,
                    groups: Vec::new(),
                });
                Ok(())
            }
            Role::ContentEmpty => self.simple_model(ContentKind::Empty),
            Role::ContentAny => self.simple_model(ContentKind::Any),
            Role::ContentGroupOpen => {
                if let Some(element) = self.decl.element.as_mut() {
                    element.groups.push(GroupFrame::default());
                }
                Ok(())
            }
            Role::ContentPcdata => {
                if let Some(frame) = self.current_group() {
                    frame.is_mixed = true;
                }
                Ok(())
            }
            Role::ContentElement => self.model_leaf(text, ContentQuant::None),
            Role::ContentElementOpt => self.model_leaf(text, ContentQuant::Opt),
            Role::ContentElementRep => self.model_leaf(text, ContentQuant::Rep),
            Role::ContentElementPlus => self.model_leaf(text, ContentQuant::Plus),
            Role::GroupSequence => {
                if let Some(frame) = self.current_group() {
                    frame.kind = Some(ContentKind::Seq);
                }
                Ok(())
            }
            Role::GroupChoice => {
                if let Some(frame) = self.current_group() {
                    frame.kind = Some(ContentKind::Choice);
                }
                Ok(())
            }
            Role::EndGroup => self.close_group(ContentQuant::None),
            Role::EndGroupOpt => self.close_group(ContentQuant::Opt),
            Role::EndGroupRep => self.close_group(ContentQuant::Rep),
            Role::EndGroupPlus => self.close_group(ContentQuant::Plus),

            // Conditional sections.
            Role::IncludeSectOpen => {
                self.include_depth += 1;
                Ok(())
            }
            Role::IgnoreSectOpen => {
                self.in_ignore_sect = true;
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------
    // DOCTYPE plumbing.

    fn fire_start_doctype<H: Handler>(
        &mut self,
        handler: &mut H,
        has_internal_subset: bool,
    ) -> Result<()> {
        if self.doctype.start_fired {
            return Ok(());
        }
        self.doctype.start_fired = true;
        let name = self.doctype.name.clone().unwrap_or_default();
        let flow = handler.start_doctype_decl(
            &name,
            self.doctype.system_id.as_deref(),
            self.doctype.public_id.as_deref(),
            has_internal_subset,
        );
        self.dispatch_flow(flow)
    }

    fn close_doctype<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        self.fire_start_doctype(handler, false)?;
        if self.status != ParsingStatus::Parsing {
            return Ok(());
        }
        if self.doctype.system_id.is_some() || self.use_foreign_dtd {
            self.dtd.borrow_mut().has_external_subset = true;
            self.load_external_subset(handler)?;
            if self.status != ParsingStatus::Parsing {
                return Ok(());
            }
        }
        self.recheck_pending_defaults(handler)?;
        let flow = handler.end_doctype_decl();
        self.dispatch_flow(flow)
    }

    /// Default attribute values that referenced entities undeclared at
    /// the time are normalized again now that the DTD is complete.
    fn recheck_pending_defaults<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_defaults);
        for item in pending {
            let is_cdata = item.att_type.is_cdata();
            match self.normalize_att_value(&item.raw_value, is_cdata, false)? {
                Normalize::Value(value) => {
                    self.register_attdef(
                        handler,
                        &item.element,
                        &item.attribute,
                        &item.att_type,
                        Some(value),
                        item.is_required,
                    )?;
                }
                Normalize::Deferred(_) => unreachable!("deferral disabled"),
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Declaration finalizers.

    fn finalize_declaration<H: Handler>(&mut self, handler: &mut H) -> Result<()> {
        if let Some(entity) = self.decl.entity.take() {
            self.finalize_entity(handler, entity)?;
        } else if let Some(notation) = self.decl.notation.take() {
            self.finalize_notation(handler, notation)?;
        } else if let Some(element) = self.decl.element.take() {
            self.finalize_element(handler, element)?;
        }
        self.decl.clear();
        Ok(())
    }

    fn finalize_entity<H: Handler>(
        &mut self,
        handler: &mut H,
        builder: EntityBuilder,
    ) -> Result<()> {
        if !self.dtd.borrow().keep_processing {
            return Ok(());
        }
        if builder.value.is_none() && builder.system_id.is_none() {
            return self.fail(XmlError::Syntax);
        }
        // The predefined five cannot be redefined; a matching declaration
        // is dropped without complaint, malformed or not.
        let declared = {
            let mut dtd = self.dtd.borrow_mut();
            let id = dtd.pool.intern(&builder.name);
            let kind = match (&builder.value, &builder.system_id) {
                (Some(value), _) => {
                    // Replacement text lives in the DTD pool, shared by
                    // every expansion frame.
                    let text_id = dtd.pool.intern(value);
                    let text: Rc<str> = dtd.pool.resolve(text_id).into();
                    EntityKind::Internal { text }
                }
                (None, Some(system_id)) => EntityKind::External {
                    system_id: system_id.clone(),
                    public_id: builder.public_id.clone(),
                    notation: builder.notation.clone(),
                },
                (None, None) => unreachable!("checked above"),
            };
            dtd.declare(Entity {
                name: id,
                is_param: builder.is_param,
                kind,
                is_open: false,
                base: self.base.clone(),
            })
        };
        if !declared {
            return Ok(());
        }
        let decl = EntityDecl {
            name: builder.name,
            is_parameter: builder.is_param,
            value: builder.value,
            system_id: builder.system_id,
            public_id: builder.public_id,
            notation: builder.notation,
            base: self.base.clone(),
        };
        let flow = handler.entity_decl(&decl);
        self.dispatch_flow(flow)
    }

    fn finalize_notation<H: Handler>(
        &mut self,
        handler: &mut H,
        builder: NotationBuilder,
    ) -> Result<()> {
        if !self.dtd.borrow().keep_processing {
            return Ok(());
        }
        self.dtd.borrow_mut().declare_notation(&builder.name);
        let flow = handler.notation_decl(
            &builder.name,
            builder.system_id.as_deref(),
            builder.public_id.as_deref(),
        );
        self.dispatch_flow(flow)
    }

    fn finalize_element<H: Handler>(
        &mut self,
        handler: &mut H,
        builder: ElementBuilder,
    ) -> Result<()> {
        if !self.dtd.borrow().keep_processing {
            return Ok(());
        }
        let model = match builder.model {
            Some(model) => model,
            None => return self.fail(XmlError::Syntax),
        };
        let flow = handler.element_decl(&builder.name, model);
        self.dispatch_flow(flow)
    }

    /// One attribute definition is complete (its default settled).
    fn finish_attdef<H: Handler>(
        &mut self,
        handler: &mut H,
        raw_default: Option<String>,
        is_required: bool,
    ) -> Result<()> {
        let (element, attribute, att_type) = {
            let attlist = match self.decl.attlist.as_mut() {
                Some(a) => a,
                None => return self.fail(XmlError::UnexpectedState),
            };
            let attribute = match attlist.attribute.take() {
                Some(a) => a,
                None => return self.fail(XmlError::UnexpectedState),
            };
            let att_type = match attlist.att_type.take() {
                Some(t) => t,
                None if attlist.is_notation => {
                    AttributeType::Notation(std::mem::take(&mut attlist.enum_values))
                }
                None => AttributeType::Enumeration(std::mem::take(&mut attlist.enum_values)),
            };
            (attlist.element.clone(), attribute, att_type)
        };
        let is_cdata = att_type.is_cdata();
        let default = match raw_default {
            None => None,
            Some(raw) => {
                match self.normalize_att_value(&raw, is_cdata, true)? {
                    Normalize::Value(v) => Some(v),
                    Normalize::Deferred(_) => {
                        // An entity declared later in the DTD may satisfy
                        // this; retry at doctype close.
                        self.pending_defaults.push(PendingDefault {
                            element,
                            attribute,
                            att_type,
                            is_required,
                            raw_value: raw,
                        });
                        return Ok(());
                    }
                }
            }
        };
        self.register_attdef(handler, &element, &attribute, &att_type, default, is_required)
    }

    /// Record the definition in the DTD (first declaration of an
    /// attribute wins) and fire the handler.
    fn register_attdef<H: Handler>(
        &mut self,
        handler: &mut H,
        element: &str,
        attribute: &str,
        att_type: &AttributeType,
        default: Option<String>,
        is_required: bool,
    ) -> Result<()> {
        if !self.dtd.borrow().keep_processing {
            return Ok(());
        }
        {
            let mut dtd = self.dtd.borrow_mut();
            let element_id = dtd.pool.intern(element);
            let att_id = dtd.pool.intern(attribute);
            let elem = dtd.element_mut(element_id);
            if elem.att(att_id).is_none() {
                elem.atts.push(AttDef {
                    name: att_id,
                    is_cdata: att_type.is_cdata(),
                    is_id: matches!(att_type, AttributeType::Id),
                    default: default.clone(),
                });
            }
        }
        let flow = handler.attlist_decl(
            element,
            attribute,
            att_type,
            default.as_deref(),
            is_required,
        );
        self.dispatch_flow(flow)
    }

    // ---------------------------------------------------------------
    // Content model assembly.

    fn simple_model(&mut self, kind: ContentKind) -> Result<()> {
        if let Some(element) = self.decl.element.as_mut() {
            element.model = Some(ContentModel::leaf(kind, ContentQuant::None, None));
        }
        Ok(())
    }

    fn current_group(&mut self) -> Option<&mut GroupFrame> {
        self.decl.element.as_mut().and_then(|e| e.groups.last_mut())
    }

    fn model_leaf(&mut self, text: &str, quant: ContentQuant) -> Result<()> {
        let name = text.trim_end_matches(|c| matches!(c, '?' | '*' | '+'));
        let node = ContentModel::leaf(ContentKind::Name, quant, Some(name.to_string()));
        if let Some(frame) = self.current_group() {
            frame.children.push(node);
        }
        Ok(())
    }

    fn close_group(&mut self, quant: ContentQuant) -> Result<()> {
        let element = match self.decl.element.as_mut() {
            Some(e) => e,
            None => return Ok(()),
        };
        let frame = match element.groups.pop() {
            Some(f) => f,
            None => return self.fail(XmlError::UnexpectedState),
        };
        let kind = if frame.is_mixed {
            ContentKind::Mixed
        } else {
            frame.kind.unwrap_or(ContentKind::Seq)
        };
        let node = ContentModel {
            kind,
            quant,
            name: None,
            children: frame.children,
        };
        match element.groups.last_mut() {
            Some(parent) => parent.children.push(node),
            None => element.model = Some(node),
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Small shared helpers.

    /// Literal token text without its quotes.
    fn literal_value(&mut self, text: &str) -> Result<String> {
        if text.len() < 2 {
            return self.fail(XmlError::UnexpectedState);
        }
        Ok(text[1..text.len() - 1].to_string())
    }

    /// PubidChar ::= #x20 | #xD | #xA | [a-zA-Z0-9] | [-'()+,./:=?;!*#@$_%]
    fn check_publicid(&mut self, id: String) -> Result<String> {
        let ok = id.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(
                    c,
                    ' ' | '\r' | '\n'
                        | '-' | '\'' | '(' | ')' | '+' | ',' | '.' | '/' | ':'
                        | '=' | '?' | ';' | '!' | '*' | '#' | '@' | '$' | '_' | '%'
                )
        });
        if ok {
            Ok(id)
        } else {
            self.fail(XmlError::Publicid)
        }
    }

    fn in_param_frame(&self) -> bool {
        self.frames.iter().any(|f| f.is_param)
    }

    // ---------------------------------------------------------------
    // Epilog.

    pub(crate) fn epilog_token<H: Handler>(
        &mut self,
        handler: &mut H,
        tok: Token,
        text: &str,
    ) -> Result<()> {
        match tok {
            Token::PrologS => {
                let flow = handler.unhandled(text);
                self.dispatch_flow(flow)
            }
            Token::Pi => {
                let (target, data) = split_pi(text);
                let flow = handler.processing_instruction(target, data);
                self.dispatch_flow(flow)
            }
            Token::Comment => {
                let flow = handler.comment(&text[4..text.len() - 3]);
                self.dispatch_flow(flow)
            }
            Token::XmlDecl => self.fail(XmlError::MisplacedXmlPi),
            _ => self.fail(XmlError::JunkAfterDocElement),
        }
    }
}

/// Split `<?target data?>` into target and data (leading whitespace of
/// the data stripped).
pub(crate) fn split_pi(text: &str) -> (&str, &str) {
    let body = &text[2..text.len() - 2];
    match body.find(|c: char| crate::tokenizer::is_whitespace(c)) {
        Some(idx) => {
            let target = &body[..idx];
            let data =
                body[idx..].trim_start_matches(|c: char| crate::tokenizer::is_whitespace(c));
            (target, data)
        }
        None => (body, ""),
    }
}
