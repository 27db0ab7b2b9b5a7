//! The prolog/DTD state machine.
//!
//! Tokens scanned in the prolog are fed through [`PrologMachine::next`],
//! which assigns each one a semantic [`Role`] and moves to the next state.
//! The machine is a straight pushdown: a state per position inside a
//! declaration, plus a level counter for nested content-model groups.
//! Whitespace tokens never reach the machine; parameter entity references
//! are intercepted and expanded by the driver.

use crate::tokenizer::Token;

/// Semantic role assigned to a prolog token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// Structurally required token with no semantic payload.
    None,
    DoctypeName,
    DoctypePublicId,
    DoctypeSystemId,
    /// `[` opening the internal subset.
    DoctypeInternalSubset,
    DoctypeClose,
    GeneralEntityName,
    ParamEntityName,
    EntityValue,
    EntityPublicId,
    EntitySystemId,
    EntityNotationName,
    NotationName,
    NotationPublicId,
    NotationSystemId,
    AttlistElementName,
    AttributeName,
    AttributeTypeCdata,
    AttributeTypeId,
    AttributeTypeIdref,
    AttributeTypeIdrefs,
    AttributeTypeEntity,
    AttributeTypeEntities,
    AttributeTypeNmtoken,
    AttributeTypeNmtokens,
    AttributeEnumValue,
    AttributeNotationValue,
    ImpliedAttributeValue,
    RequiredAttributeValue,
    DefaultAttributeValue,
    FixedAttributeValue,
    ElementName,
    ContentEmpty,
    ContentAny,
    ContentPcdata,
    ContentGroupOpen,
    ContentElement,
    ContentElementOpt,
    ContentElementRep,
    ContentElementPlus,
    GroupSequence,
    GroupChoice,
    EndGroup,
    EndGroupOpt,
    EndGroupRep,
    EndGroupPlus,
    /// `INCLUDE [` opened in an external subset.
    IncludeSectOpen,
    /// `IGNORE [` opened; the driver switches the scanner to the
    /// ignore-section state.
    IgnoreSectOpen,
    /// The token does not fit the grammar here.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Prolog0,
    Prolog1,
    Doctype0,
    Doctype1,
    Doctype2,
    Doctype3,
    Doctype4,
    Doctype5,
    Subset,
    Entity0,
    Entity1,
    Entity2,
    Entity3,
    Entity4,
    Entity5,
    Entity6,
    Notation0,
    Notation1,
    Notation2,
    Notation3,
    Attlist0,
    Attlist1,
    Attlist2,
    Attlist3,
    Attlist4,
    Attlist5,
    Attlist6,
    Attlist7,
    Attlist8,
    Attlist9,
    Element0,
    Element1,
    Element2,
    Element3,
    Element4,
    Element5,
    Element6,
    Element7,
    CondSect0,
    CondSect1,
    CondSect2,
    DeclClose,
    Error,
}

#[derive(Debug)]
pub(crate) struct PrologMachine {
    state: State,
    /// Nesting depth of content-model groups within one ELEMENT decl.
    level: u32,
    /// External subsets start directly at subset level and additionally
    /// allow conditional sections.
    in_external_subset: bool,
}

impl PrologMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Prolog0,
            level: 0,
            in_external_subset: false,
        }
    }

    pub(crate) fn new_external_subset() -> Self {
        Self {
            state: State::Subset,
            level: 0,
            in_external_subset: true,
        }
    }

    /// Whether the machine sits between declarations, where a parameter
    /// entity reference (and in the internal subset, `]`) is legal.
    pub(crate) fn at_subset_level(&self) -> bool {
        self.state == State::Subset
    }

    pub(crate) fn in_external_subset(&self) -> bool {
        self.in_external_subset
    }

    /// Whether the document prolog has moved past the DOCTYPE declaration.
    pub(crate) fn past_doctype(&self) -> bool {
        self.state == State::Prolog1
    }

    /// Whether the document element may begin here.
    pub(crate) fn expects_instance_start(&self) -> bool {
        matches!(self.state, State::Prolog0 | State::Prolog1)
    }

    fn error(&mut self) -> Role {
        self.state = State::Error;
        Role::Error
    }

    fn to(&mut self, next: State, role: Role) -> Role {
        self.state = next;
        role
    }

    fn subset(&self) -> State {
        State::Subset
    }

    /// Feed one token with its text already converted to the internal
    /// encoding. Returns the role; `Role::Error` means the token cannot
    /// appear in the current state.
    pub(crate) fn next(&mut self, tok: Token, text: &str) -> Role {
        use State::*;
        match self.state {
            Prolog0 => match tok {
                Token::Pi | Token::Comment => Role::None,
                Token::DeclOpen if decl_is(text, "DOCTYPE") => self.to(Doctype0, Role::None),
                _ => self.error(),
            },
            Prolog1 => match tok {
                Token::Pi | Token::Comment => Role::None,
                _ => self.error(),
            },
            Doctype0 => match tok {
                Token::Name => self.to(Doctype1, Role::DoctypeName),
                _ => self.error(),
            },
            Doctype1 => match tok {
                Token::OpenBracket => self.to(Subset, Role::DoctypeInternalSubset),
                Token::DeclClose => self.to(Prolog1, Role::DoctypeClose),
                Token::Name if text == "SYSTEM" => self.to(Doctype3, Role::None),
                Token::Name if text == "PUBLIC" => self.to(Doctype2, Role::None),
                _ => self.error(),
            },
            Doctype2 => match tok {
                Token::Literal => self.to(Doctype3, Role::DoctypePublicId),
                _ => self.error(),
            },
            Doctype3 => match tok {
                Token::Literal => self.to(Doctype4, Role::DoctypeSystemId),
                _ => self.error(),
            },
            Doctype4 => match tok {
                Token::OpenBracket => self.to(Subset, Role::DoctypeInternalSubset),
                Token::DeclClose => self.to(Prolog1, Role::DoctypeClose),
                _ => self.error(),
            },
            Doctype5 => match tok {
                Token::DeclClose => self.to(Prolog1, Role::DoctypeClose),
                _ => self.error(),
            },
            Subset => match tok {
                Token::DeclOpen if decl_is(text, "ENTITY") => self.to(Entity0, Role::None),
                Token::DeclOpen if decl_is(text, "ELEMENT") => self.to(Element0, Role::None),
                Token::DeclOpen if decl_is(text, "ATTLIST") => self.to(Attlist0, Role::None),
                Token::DeclOpen if decl_is(text, "NOTATION") => self.to(Notation0, Role::None),
                Token::Pi | Token::Comment => Role::None,
                Token::CloseBracket if !self.in_external_subset => {
                    self.to(Doctype5, Role::None)
                }
                Token::CondSectOpen if self.in_external_subset => {
                    self.to(CondSect0, Role::None)
                }
                Token::CondSectClose if self.in_external_subset => Role::None,
                _ => self.error(),
            },
            Entity0 => match tok {
                Token::Percent => self.to(Entity1, Role::None),
                Token::Name => self.to(Entity2, Role::GeneralEntityName),
                _ => self.error(),
            },
            Entity1 => match tok {
                Token::Name => self.to(Entity2, Role::ParamEntityName),
                _ => self.error(),
            },
            Entity2 => match tok {
                Token::Name if text == "SYSTEM" => self.to(Entity4, Role::None),
                Token::Name if text == "PUBLIC" => self.to(Entity3, Role::None),
                Token::Literal => self.to(Entity5, Role::EntityValue),
                _ => self.error(),
            },
            Entity3 => match tok {
                Token::Literal => self.to(Entity4, Role::EntityPublicId),
                _ => self.error(),
            },
            Entity4 => match tok {
                Token::Literal => self.to(Entity5, Role::EntitySystemId),
                _ => self.error(),
            },
            Entity5 => match tok {
                Token::DeclClose => self.to(self.subset(), Role::None),
                Token::Name if text == "NDATA" => self.to(Entity6, Role::None),
                _ => self.error(),
            },
            Entity6 => match tok {
                Token::Name => self.to(DeclClose, Role::EntityNotationName),
                _ => self.error(),
            },
            Notation0 => match tok {
                Token::Name => self.to(Notation1, Role::NotationName),
                _ => self.error(),
            },
            Notation1 => match tok {
                Token::Name if text == "SYSTEM" => self.to(Notation3, Role::None),
                Token::Name if text == "PUBLIC" => self.to(Notation2, Role::None),
                _ => self.error(),
            },
            Notation2 => match tok {
                Token::Literal => self.to(Notation3, Role::NotationPublicId),
                _ => self.error(),
            },
            Notation3 => match tok {
                Token::Literal => self.to(DeclClose, Role::NotationSystemId),
                Token::DeclClose => self.to(self.subset(), Role::None),
                _ => self.error(),
            },
            Attlist0 => match tok {
                Token::Name => self.to(Attlist1, Role::AttlistElementName),
                _ => self.error(),
            },
            Attlist1 => match tok {
                Token::DeclClose => self.to(self.subset(), Role::None),
                Token::Name => self.to(Attlist2, Role::AttributeName),
                _ => self.error(),
            },
            Attlist2 => match tok {
                Token::Name => {
                    let role = match text {
                        "CDATA" => Role::AttributeTypeCdata,
                        "ID" => Role::AttributeTypeId,
                        "IDREF" => Role::AttributeTypeIdref,
                        "IDREFS" => Role::AttributeTypeIdrefs,
                        "ENTITY" => Role::AttributeTypeEntity,
                        "ENTITIES" => Role::AttributeTypeEntities,
                        "NMTOKEN" => Role::AttributeTypeNmtoken,
                        "NMTOKENS" => Role::AttributeTypeNmtokens,
                        "NOTATION" => return self.to(Attlist5, Role::None),
                        _ => return self.error(),
                    };
                    self.to(Attlist8, role)
                }
                Token::OpenParen => self.to(Attlist3, Role::None),
                _ => self.error(),
            },
            Attlist3 => match tok {
                Token::Nmtoken | Token::Name => self.to(Attlist4, Role::AttributeEnumValue),
                _ => self.error(),
            },
            Attlist4 => match tok {
                Token::CloseParen => self.to(Attlist8, Role::None),
                Token::Or => self.to(Attlist3, Role::None),
                _ => self.error(),
            },
            Attlist5 => match tok {
                Token::OpenParen => self.to(Attlist6, Role::None),
                _ => self.error(),
            },
            Attlist6 => match tok {
                Token::Name => self.to(Attlist7, Role::AttributeNotationValue),
                _ => self.error(),
            },
            Attlist7 => match tok {
                Token::CloseParen => self.to(Attlist8, Role::None),
                Token::Or => self.to(Attlist6, Role::None),
                _ => self.error(),
            },
            // Default value position.
            Attlist8 => match tok {
                Token::PoundName if pound_is(text, "IMPLIED") => {
                    self.to(Attlist1, Role::ImpliedAttributeValue)
                }
                Token::PoundName if pound_is(text, "REQUIRED") => {
                    self.to(Attlist1, Role::RequiredAttributeValue)
                }
                Token::PoundName if pound_is(text, "FIXED") => self.to(Attlist9, Role::None),
                Token::Literal => self.to(Attlist1, Role::DefaultAttributeValue),
                _ => self.error(),
            },
            Attlist9 => match tok {
                Token::Literal => self.to(Attlist1, Role::FixedAttributeValue),
                _ => self.error(),
            },
            Element0 => match tok {
                Token::Name => self.to(Element1, Role::ElementName),
                _ => self.error(),
            },
            Element1 => match tok {
                Token::Name if text == "EMPTY" => self.to(DeclClose, Role::ContentEmpty),
                Token::Name if text == "ANY" => self.to(DeclClose, Role::ContentAny),
                Token::OpenParen => self.to(Element2, Role::ContentGroupOpen),
                _ => self.error(),
            },
            Element2 => match tok {
                Token::PoundName if pound_is(text, "PCDATA") => {
                    self.to(Element3, Role::ContentPcdata)
                }
                Token::OpenParen => {
                    self.level = 2;
                    self.to(Element6, Role::ContentGroupOpen)
                }
                Token::Name => {
                    self.level = 1;
                    self.to(Element7, Role::ContentElement)
                }
                Token::NameQuestion => {
                    self.level = 1;
                    self.to(Element7, Role::ContentElementOpt)
                }
                Token::NameAsterisk => {
                    self.level = 1;
                    self.to(Element7, Role::ContentElementRep)
                }
                Token::NamePlus => {
                    self.level = 1;
                    self.to(Element7, Role::ContentElementPlus)
                }
                _ => self.error(),
            },
            Element3 => match tok {
                Token::CloseParen | Token::CloseParenAsterisk => {
                    self.to(DeclClose, Role::EndGroupRep)
                }
                Token::Or => self.to(Element4, Role::None),
                _ => self.error(),
            },
            Element4 => match tok {
                Token::Name => self.to(Element5, Role::ContentElement),
                _ => self.error(),
            },
            Element5 => match tok {
                Token::CloseParenAsterisk => self.to(DeclClose, Role::EndGroupRep),
                Token::Or => self.to(Element4, Role::None),
                _ => self.error(),
            },
            Element6 => match tok {
                Token::OpenParen => {
                    self.level += 1;
                    Role::ContentGroupOpen
                }
                Token::Name => self.to(Element7, Role::ContentElement),
                Token::NameQuestion => self.to(Element7, Role::ContentElementOpt),
                Token::NameAsterisk => self.to(Element7, Role::ContentElementRep),
                Token::NamePlus => self.to(Element7, Role::ContentElementPlus),
                _ => self.error(),
            },
            Element7 => match tok {
                Token::CloseParen => self.end_group(Role::EndGroup),
                Token::CloseParenAsterisk => self.end_group(Role::EndGroupRep),
                Token::CloseParenQuestion => self.end_group(Role::EndGroupOpt),
                Token::CloseParenPlus => self.end_group(Role::EndGroupPlus),
                Token::Comma => self.to(Element6, Role::GroupSequence),
                Token::Or => self.to(Element6, Role::GroupChoice),
                _ => self.error(),
            },
            CondSect0 => match tok {
                Token::Name if text == "INCLUDE" => self.to(CondSect1, Role::None),
                Token::Name if text == "IGNORE" => self.to(CondSect2, Role::None),
                _ => self.error(),
            },
            CondSect1 => match tok {
                Token::OpenBracket => self.to(Subset, Role::IncludeSectOpen),
                _ => self.error(),
            },
            CondSect2 => match tok {
                Token::OpenBracket => self.to(Subset, Role::IgnoreSectOpen),
                _ => self.error(),
            },
            DeclClose => match tok {
                Token::DeclClose => self.to(self.subset(), Role::None),
                _ => self.error(),
            },
            Error => Role::None,
        }
    }

    fn end_group(&mut self, role: Role) -> Role {
        self.level -= 1;
        if self.level == 0 {
            self.state = State::DeclClose;
        }
        role
    }
}

/// `<!NAME` token text against a declaration keyword.
fn decl_is(text: &str, keyword: &str) -> bool {
    text.get(2..) == Some(keyword)
}

/// `#NAME` token text against a keyword.
fn pound_is(text: &str, keyword: &str) -> bool {
    text.get(1..) == Some(keyword)
}
