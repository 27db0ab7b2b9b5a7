//! The DTD store: entities, element types with their attribute lists,
//! notations, and the doctype bookkeeping shared between a root parser and
//! its external-entity children.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::pool::{StringId, StringPool};

/// Quantifier on a content-model particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentQuant {
    /// Exactly once.
    None,
    /// `?`
    Opt,
    /// `*`
    Rep,
    /// `+`
    Plus,
}

/// Kind of a content-model node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Empty,
    Any,
    /// `(#PCDATA | a | b)*`
    Mixed,
    /// A single element name.
    Name,
    /// `( ... | ... )`
    Choice,
    /// `( ... , ... )`
    Seq,
}

/// One node of the content model tree delivered to the element-declaration
/// handler. The tree is fully owned by the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentModel {
    pub kind: ContentKind,
    pub quant: ContentQuant,
    /// Set for `Name` nodes and for the names listed in `Mixed` content.
    pub name: Option<String>,
    pub children: Vec<ContentModel>,
}

impl ContentModel {
    pub(crate) fn leaf(kind: ContentKind, quant: ContentQuant, name: Option<String>) -> Self {
        Self {
            kind,
            quant,
            name,
            children: Vec::new(),
        }
    }
}

/// Declared type of an attribute, as delivered to the attlist handler.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    Cdata,
    Id,
    Idref,
    Idrefs,
    Entity,
    Entities,
    Nmtoken,
    Nmtokens,
    /// `(a|b|c)`
    Enumeration(Vec<String>),
    /// `NOTATION (a|b)`
    Notation(Vec<String>),
}

impl AttributeType {
    /// Whether values of this type keep CDATA normalization (no run
    /// collapsing).
    pub fn is_cdata(&self) -> bool {
        matches!(self, AttributeType::Cdata)
    }
}

/// Payload of the entity-declaration handler.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDecl {
    pub name: String,
    pub is_parameter: bool,
    /// Replacement text of an internal entity.
    pub value: Option<String>,
    pub system_id: Option<String>,
    pub public_id: Option<String>,
    /// NDATA notation name of an unparsed entity.
    pub notation: Option<String>,
    pub base: Option<String>,
}

/// How an entity gets its replacement text.
#[derive(Debug, Clone)]
pub(crate) enum EntityKind {
    Internal {
        text: Rc<str>,
    },
    External {
        system_id: String,
        public_id: Option<String>,
        /// NDATA name; present means the entity is unparsed.
        notation: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Entity {
    pub(crate) name: StringId,
    pub(crate) is_param: bool,
    pub(crate) kind: EntityKind,
    /// Set while the entity is being expanded; a reference to an open
    /// entity is a recursion.
    pub(crate) is_open: bool,
    pub(crate) base: Option<String>,
}

impl Entity {
    pub(crate) fn is_internal(&self) -> bool {
        matches!(self.kind, EntityKind::Internal { .. })
    }

    pub(crate) fn notation(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::External { notation, .. } => notation.as_deref(),
            EntityKind::Internal { .. } => None,
        }
    }

    pub(crate) fn text(&self) -> Option<Rc<str>> {
        match &self.kind {
            EntityKind::Internal { text } => Some(Rc::clone(text)),
            EntityKind::External { .. } => None,
        }
    }
}

/// Declared attribute of an element type.
#[derive(Debug, Clone)]
pub(crate) struct AttDef {
    pub(crate) name: StringId,
    pub(crate) is_cdata: bool,
    pub(crate) is_id: bool,
    /// Default or fixed value, already normalized.
    pub(crate) default: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct ElementType {
    pub(crate) atts: Vec<AttDef>,
}

impl ElementType {
    pub(crate) fn att(&self, name: StringId) -> Option<&AttDef> {
        self.atts.iter().find(|a| a.name == name)
    }
}

/// The DTD model owned by a root parser and read (and appended to) by its
/// external-entity child parsers.
#[derive(Debug)]
pub(crate) struct Dtd {
    pub(crate) pool: StringPool,
    general: HashMap<StringId, Entity>,
    params: HashMap<StringId, Entity>,
    elements: HashMap<StringId, ElementType>,
    notations: HashSet<StringId>,
    /// `standalone='yes'` was declared.
    pub(crate) standalone: bool,
    /// The DOCTYPE names an external subset (or a foreign DTD was
    /// supplied).
    pub(crate) has_external_subset: bool,
    /// An unresolved parameter entity was skipped: later declarations are
    /// parsed for form but not recorded, and unknown general entities stop
    /// being hard errors.
    pub(crate) keep_processing: bool,
    /// Default attribute values that referenced entities not yet declared;
    /// checked when the DTD closes.
    pub(crate) pending_entity_checks: Vec<String>,
}

impl Dtd {
    pub(crate) fn new() -> Self {
        let mut dtd = Self {
            pool: StringPool::new(),
            general: HashMap::new(),
            params: HashMap::new(),
            elements: HashMap::new(),
            notations: HashSet::new(),
            standalone: false,
            has_external_subset: false,
            keep_processing: true,
            pending_entity_checks: Vec::new(),
        };
        for &(name, text) in &[
            ("amp", "&"),
            ("lt", "<"),
            ("gt", ">"),
            ("apos", "'"),
            ("quot", "\""),
        ] {
            let id = dtd.pool.intern(name);
            dtd.general.insert(
                id,
                Entity {
                    name: id,
                    is_param: false,
                    kind: EntityKind::Internal { text: text.into() },
                    is_open: false,
                    base: None,
                },
            );
        }
        dtd
    }

    pub(crate) fn is_predefined(name: &str) -> bool {
        matches!(name, "amp" | "lt" | "gt" | "apos" | "quot")
    }

    /// Record a declaration. The first declaration of a name wins; a
    /// repeat (including of the predefined five) is silently dropped and
    /// reported back as `false`.
    pub(crate) fn declare(&mut self, entity: Entity) -> bool {
        let table = if entity.is_param {
            &mut self.params
        } else {
            &mut self.general
        };
        if table.contains_key(&entity.name) {
            return false;
        }
        table.insert(entity.name, entity);
        true
    }

    pub(crate) fn general(&self, name: &str) -> Option<&Entity> {
        self.pool.get_id(name).and_then(|id| self.general.get(&id))
    }

    pub(crate) fn param(&self, name: &str) -> Option<&Entity> {
        self.pool.get_id(name).and_then(|id| self.params.get(&id))
    }

    pub(crate) fn set_open(&mut self, name: &str, is_param: bool, open: bool) {
        let id = match self.pool.get_id(name) {
            Some(id) => id,
            None => return,
        };
        let table = if is_param {
            &mut self.params
        } else {
            &mut self.general
        };
        if let Some(e) = table.get_mut(&id) {
            e.is_open = open;
        }
    }

    pub(crate) fn element_mut(&mut self, name: StringId) -> &mut ElementType {
        self.elements.entry(name).or_insert_with(ElementType::default)
    }

    pub(crate) fn element(&self, name: &str) -> Option<&ElementType> {
        self.pool.get_id(name).and_then(|id| self.elements.get(&id))
    }

    pub(crate) fn declare_notation(&mut self, name: &str) {
        let id = self.pool.intern(name);
        self.notations.insert(id);
    }

    pub(crate) fn has_notation(&self, name: &str) -> bool {
        self.pool
            .get_id(name)
            .map_or(false, |id| self.notations.contains(&id))
    }
}
