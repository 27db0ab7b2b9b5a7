//! Shared test support: a handler that records every event as a readable
//! line, plus helpers for running documents through a parser.

use sonar_xml::{
    Attributes, EntityDecl, ExternalFlow, Flow, Handler, Parser, Result, Status,
};

/// Records events as strings like `start(doc a="1")`, `chars(text)`.
///
/// `stop_on` suspends (or aborts, with `abort` set) the parse the first
/// time an event line starts with the given prefix. `external` maps a
/// system id to bytes fed into the child parser on demand.
#[derive(Default)]
pub struct Recorder {
    pub events: Vec<String>,
    pub stop_on: Option<String>,
    pub abort: bool,
    pub external: Vec<(String, Vec<u8>)>,
    stopped_once: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stopping_on(prefix: &str) -> Self {
        Self {
            stop_on: Some(prefix.to_string()),
            ..Self::default()
        }
    }

    pub fn with_external(system_id: &str, bytes: &[u8]) -> Self {
        Self {
            external: vec![(system_id.to_string(), bytes.to_vec())],
            ..Self::default()
        }
    }

    fn log(&mut self, line: String) -> Flow {
        let hit = match &self.stop_on {
            Some(prefix) => !self.stopped_once && line.starts_with(prefix.as_str()),
            None => false,
        };
        self.events.push(line);
        if hit {
            self.stopped_once = true;
            if self.abort {
                return Flow::Abort;
            }
            return Flow::Suspend;
        }
        Flow::Continue
    }
}

impl Handler for Recorder {
    fn start_element(&mut self, name: &str, attributes: &Attributes) -> Flow {
        let mut line = format!("start({}", name);
        for att in attributes {
            line.push_str(&format!(" {}=\"{}\"", att.name, att.value));
            if att.is_defaulted {
                line.push_str("[dflt]");
            }
        }
        line.push(')');
        self.log(line)
    }

    fn end_element(&mut self, name: &str) -> Flow {
        self.log(format!("end({})", name))
    }

    fn character_data(&mut self, data: &str) -> Flow {
        self.log(format!("chars({})", data))
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Flow {
        self.log(format!("pi({} {})", target, data))
    }

    fn comment(&mut self, text: &str) -> Flow {
        self.log(format!("comment({})", text))
    }

    fn start_cdata_section(&mut self) -> Flow {
        self.log("cdata-start".to_string())
    }

    fn end_cdata_section(&mut self) -> Flow {
        self.log("cdata-end".to_string())
    }

    fn start_namespace_decl(&mut self, prefix: Option<&str>, uri: &str) -> Flow {
        self.log(format!("ns-start({} {})", prefix.unwrap_or(""), uri))
    }

    fn end_namespace_decl(&mut self, prefix: Option<&str>) -> Flow {
        self.log(format!("ns-end({})", prefix.unwrap_or("")))
    }

    fn start_doctype_decl(
        &mut self,
        name: &str,
        system_id: Option<&str>,
        public_id: Option<&str>,
        has_internal_subset: bool,
    ) -> Flow {
        self.log(format!(
            "doctype-start({} sys={:?} pub={:?} internal={})",
            name, system_id, public_id, has_internal_subset
        ))
    }

    fn end_doctype_decl(&mut self) -> Flow {
        self.log("doctype-end".to_string())
    }

    fn element_decl(&mut self, name: &str, model: sonar_xml::ContentModel) -> Flow {
        self.log(format!("element-decl({} {:?})", name, model.kind))
    }

    fn attlist_decl(
        &mut self,
        element: &str,
        attribute: &str,
        att_type: &sonar_xml::AttributeType,
        default: Option<&str>,
        is_required: bool,
    ) -> Flow {
        self.log(format!(
            "attlist-decl({} {} {:?} default={:?} required={})",
            element, attribute, att_type, default, is_required
        ))
    }

    fn entity_decl(&mut self, decl: &EntityDecl) -> Flow {
        self.log(format!(
            "entity-decl({}{} value={:?} sys={:?} ndata={:?})",
            if decl.is_parameter { "%" } else { "" },
            decl.name,
            decl.value,
            decl.system_id,
            decl.notation
        ))
    }

    fn notation_decl(
        &mut self,
        name: &str,
        system_id: Option<&str>,
        public_id: Option<&str>,
    ) -> Flow {
        self.log(format!(
            "notation-decl({} sys={:?} pub={:?})",
            name, system_id, public_id
        ))
    }

    fn skipped_entity(&mut self, name: &str, is_parameter: bool) -> Flow {
        self.log(format!(
            "skipped({}{})",
            if is_parameter { "%" } else { "" },
            name
        ))
    }

    fn xml_decl(
        &mut self,
        version: Option<&str>,
        encoding: Option<&str>,
        standalone: Option<bool>,
    ) -> Flow {
        self.log(format!(
            "xml-decl({:?} {:?} {:?})",
            version, encoding, standalone
        ))
    }

    fn external_entity_ref(
        &mut self,
        mut child: Parser,
        _context: &str,
        _base: Option<&str>,
        system_id: Option<&str>,
        _public_id: Option<&str>,
    ) -> ExternalFlow {
        let bytes = self
            .external
            .iter()
            .find(|(id, _)| Some(id.as_str()) == system_id)
            .map(|(_, b)| b.clone());
        match bytes {
            Some(bytes) => match child.parse(self, &bytes, true) {
                Ok(_) => ExternalFlow::Handled,
                Err(_) => ExternalFlow::Error,
            },
            None => ExternalFlow::Skip,
        }
    }
}

/// Parse the whole document in one final chunk.
pub fn parse_doc(parser: &mut Parser, doc: &[u8]) -> (Recorder, Result<Status>) {
    let mut recorder = Recorder::new();
    let result = parser.parse(&mut recorder, doc, true);
    (recorder, result)
}

/// Events of a successful one-chunk parse with a default parser.
pub fn events_of(doc: &[u8]) -> Vec<String> {
    let mut parser = Parser::new();
    let (recorder, result) = parse_doc(&mut parser, doc);
    result.expect("document should parse");
    recorder.events
}
