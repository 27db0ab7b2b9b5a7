//! The parser: public driver, input management and the token dispatch loop.

mod builder;
pub(crate) mod content;
pub(crate) mod declarations;
pub(crate) mod entities;

use std::cell::RefCell;
use std::rc::Rc;

use crate::accounting::Accounting;
use crate::dtd::Dtd;
use crate::encoding::{
    builtin_for_name, detect_encoding, table_from_encoding_rs, EncodingRef, NextChar,
    XmlEncoding,
};
use crate::errors::{Error, Result, XmlError};
use crate::handler::{Flow, Handler};
use crate::namespace::NamespaceBinder;
use crate::prolog::PrologMachine;
use crate::tokenizer::{self, LexState, Scan, Token};

pub use self::builder::ParserBuilder;

/// Successful outcome of a feed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// All fed input was consumed (or buffered); feed more, or finish.
    Ok,
    /// A handler suspended the parse; call [`Parser::resume`].
    Suspended,
}

/// Lifecycle state of a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsingStatus {
    Initialized,
    Parsing,
    Finished,
    Suspended,
    Error,
}

/// Handling of parameter entities (and with them, the external subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamEntityParsing {
    Never,
    UnlessStandalone,
    Always,
}

/// What the parser is currently reading at the top level.
#[derive(Debug)]
pub(crate) enum Mode {
    /// Document prolog and DTD, driven through the role machine.
    Prolog(PrologMachine),
    /// Element content.
    Content,
    /// Inside a CDATA section.
    Cdata,
    /// After the document element.
    Epilog,
}

/// What kind of input this parser instance reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputKind {
    /// The document entity.
    Document,
    /// An external general entity (child parser).
    ExternalEntity,
    /// The external DTD subset (child parser).
    ExternalSubset,
}

/// One stacked internal-entity expansion.
#[derive(Debug)]
pub(crate) struct EntityFrame {
    pub(crate) text: Rc<str>,
    pub(crate) pos: usize,
    pub(crate) entity_name: String,
    pub(crate) is_param: bool,
    /// Open-tag depth at push; expansions must be tag-balanced.
    pub(crate) start_tag_depth: usize,
    /// Whether a CDATA section was open at push.
    pub(crate) started_in_cdata: bool,
    /// Parameter entity entered between declarations (whole-declaration
    /// balance is enforced at pop only then).
    pub(crate) started_at_subset_level: bool,
}

#[derive(Debug)]
pub(crate) struct OpenTag {
    /// Name as written in the document; end tags must echo it.
    pub(crate) raw_name: String,
    /// Name as reported to handlers (namespace-rewritten).
    pub(crate) reported_name: String,
}

/// DOCTYPE declaration in progress.
#[derive(Debug, Default)]
pub(crate) struct DoctypeState {
    pub(crate) name: Option<String>,
    pub(crate) system_id: Option<String>,
    pub(crate) public_id: Option<String>,
    pub(crate) start_fired: bool,
    pub(crate) seen: bool,
}

/// A default attribute value whose entity references were not resolvable
/// yet; retried when the DTD closes.
#[derive(Debug)]
pub(crate) struct PendingDefault {
    pub(crate) element: String,
    pub(crate) attribute: String,
    pub(crate) att_type: crate::dtd::AttributeType,
    pub(crate) is_required: bool,
    pub(crate) raw_value: String,
}

/// A streaming push parser.
///
/// Feed bytes with [`parse`](Parser::parse) (or the
/// [`get_buffer`](Parser::get_buffer)/[`parse_buffer`](Parser::parse_buffer)
/// pair) and receive events on a [`Handler`]. A parser is built for one
/// document; [`reset`](Parser::reset) returns a root parser to its initial
/// state.
///
/// # Examples
///
/// ```
/// use sonar_xml::{Flow, Handler, Parser};
///
/// struct Names(Vec<String>);
/// impl Handler for Names {
///     fn start_element(&mut self, name: &str, _: &sonar_xml::Attributes) -> Flow {
///         self.0.push(name.to_string());
///         Flow::Continue
///     }
/// }
///
/// let mut names = Names(Vec::new());
/// let mut parser = Parser::new();
/// parser.parse(&mut names, b"<doc><item/></doc>", true).unwrap();
/// assert_eq!(names.0, ["doc", "item"]);
/// ```
#[derive(Debug)]
pub struct Parser {
    // Configuration.
    pub(crate) ns_sep: Option<char>,
    pub(crate) ns_triplets: bool,
    pub(crate) param_entity_parsing: ParamEntityParsing,
    pub(crate) use_foreign_dtd: bool,
    pub(crate) base: Option<String>,
    protocol_encoding: Option<String>,

    // Lifecycle.
    pub(crate) status: ParsingStatus,
    pub(crate) final_buffer: bool,
    pub(crate) error: Option<Error>,

    // Document input.
    buffer: Vec<u8>,
    pub(crate) parse_pos: usize,
    buffer_base: u64,
    /// Size of the region handed out by the last `get_buffer`.
    ceded: Option<usize>,
    pub(crate) enc: EncodingRef,
    /// Encoding detection ran (BOM sniffing happens once).
    sniffed: bool,
    /// Byte index right after the BOM, where an XML declaration may sit.
    pub(crate) start_offset: u64,

    // Machines.
    pub(crate) mode: Mode,
    pub(crate) frames: Vec<EntityFrame>,
    pub(crate) open_tags: Vec<OpenTag>,
    pub(crate) binder: NamespaceBinder,
    pub(crate) dtd: Rc<RefCell<Dtd>>,
    pub(crate) input_kind: InputKind,
    pub(crate) accounting: Rc<RefCell<Accounting>>,
    pub(crate) doctype: DoctypeState,
    pub(crate) decl: declarations::DeclState,
    pub(crate) pending_defaults: Vec<PendingDefault>,
    /// Depth of INCLUDE conditional sections in an external subset.
    pub(crate) include_depth: u32,
    /// The external subset was actually parsed.
    pub(crate) ext_subset_read: bool,
    /// The not-standalone check already ran.
    pub(crate) standalone_checked: bool,
    /// The scanner is inside an IGNORE conditional section.
    pub(crate) in_ignore_sect: bool,
    /// Character data accumulated since the last markup, delivered as one
    /// event. This keeps the event sequence independent of input
    /// chunking.
    pub(crate) pending_chars: String,

    // Position reporting.
    pub(crate) line: u64,
    pub(crate) column: u64,
    /// Raw length of the event currently being dispatched.
    pub(crate) event_len: usize,
}

impl Parser {
    /// A parser with default settings: UTF-8 until the input says
    /// otherwise, no namespace processing.
    pub fn new() -> Self {
        ParserBuilder::new().build()
    }

    /// A parser with namespace processing on, using `separator` between
    /// URI and local name in reported names.
    pub fn new_ns(separator: char) -> Self {
        ParserBuilder::new().namespace_separator(separator).build()
    }

    /// A parser whose input is known to be in the named encoding,
    /// overriding BOM and declaration.
    pub fn with_encoding(encoding: &str) -> Result<Self> {
        ParserBuilder::new().encoding(encoding).build_checked()
    }

    pub(crate) fn from_builder(
        ns_sep: Option<char>,
        ns_triplets: bool,
        param_entity_parsing: ParamEntityParsing,
        protocol_encoding: Option<String>,
        enc: EncodingRef,
    ) -> Self {
        Self {
            ns_sep,
            ns_triplets,
            param_entity_parsing,
            use_foreign_dtd: false,
            base: None,
            protocol_encoding,
            status: ParsingStatus::Initialized,
            final_buffer: false,
            error: None,
            buffer: Vec::new(),
            parse_pos: 0,
            buffer_base: 0,
            ceded: None,
            enc,
            sniffed: false,
            start_offset: 0,
            mode: Mode::Prolog(PrologMachine::new()),
            frames: Vec::new(),
            open_tags: Vec::new(),
            binder: NamespaceBinder::new(),
            dtd: Rc::new(RefCell::new(Dtd::new())),
            input_kind: InputKind::Document,
            accounting: Rc::new(RefCell::new(Accounting::new())),
            doctype: DoctypeState::default(),
            decl: declarations::DeclState::default(),
            pending_defaults: Vec::new(),
            include_depth: 0,
            ext_subset_read: false,
            standalone_checked: false,
            in_ignore_sect: false,
            pending_chars: String::new(),
            line: 1,
            column: 0,
            event_len: 0,
        }
    }

    pub(crate) fn is_child(&self) -> bool {
        self.input_kind != InputKind::Document
    }

    // ---------------------------------------------------------------
    // Feeding input.

    /// Feed a chunk. With `is_final` the chunk (possibly empty) is the
    /// last one; the document must be complete when it is consumed.
    pub fn parse<H: Handler>(
        &mut self,
        handler: &mut H,
        data: &[u8],
        is_final: bool,
    ) -> Result<Status> {
        self.check_feedable()?;
        // Drop an uncommitted get_buffer region.
        if let Some(ceded) = self.ceded.take() {
            let len = self.buffer.len() - ceded;
            self.buffer.truncate(len);
        }
        self.buffer.extend_from_slice(data);
        self.final_buffer = is_final;
        self.status = ParsingStatus::Parsing;
        self.run(handler)
    }

    /// Cede a writable region of at least `min_len` bytes inside the
    /// parser's buffer. Fill it and commit with
    /// [`parse_buffer`](Parser::parse_buffer).
    pub fn get_buffer(&mut self, min_len: usize) -> Result<&mut [u8]> {
        if let ParsingStatus::Suspended = self.status {
            return Err(self.api_error(XmlError::Suspended));
        }
        let start = self.buffer.len();
        let new_len = match start.checked_add(min_len) {
            Some(n) if n < isize::MAX as usize => n,
            _ => return Err(self.api_error(XmlError::NoMemory)),
        };
        self.buffer.resize(new_len, 0);
        self.ceded = Some(min_len);
        Ok(&mut self.buffer[start..])
    }

    /// Commit `len` bytes previously written into the region returned by
    /// [`get_buffer`](Parser::get_buffer) and parse them.
    pub fn parse_buffer<H: Handler>(
        &mut self,
        handler: &mut H,
        len: usize,
        is_final: bool,
    ) -> Result<Status> {
        self.check_feedable()?;
        let ceded = match self.ceded.take() {
            Some(c) => c,
            None => return Err(self.api_error(XmlError::NoBuffer)),
        };
        if len > ceded {
            return Err(self.api_error(XmlError::InvalidArgument));
        }
        // Drop the unused tail of the ceded region.
        let fed = self.buffer.len() - ceded + len;
        self.buffer.truncate(fed);
        self.final_buffer = is_final;
        self.status = ParsingStatus::Parsing;
        self.run(handler)
    }

    /// Continue a suspended parse.
    pub fn resume<H: Handler>(&mut self, handler: &mut H) -> Result<Status> {
        if self.status != ParsingStatus::Suspended {
            return Err(self.api_error(XmlError::NotSuspended));
        }
        self.status = ParsingStatus::Parsing;
        self.run(handler)
    }

    /// Stop the parse from outside a handler. With `resumable` the parser
    /// suspends, otherwise it aborts for good.
    pub fn stop(&mut self, resumable: bool) -> Result<()> {
        match self.status {
            ParsingStatus::Initialized => Err(self.api_error(XmlError::NotStarted)),
            ParsingStatus::Finished => Err(self.api_error(XmlError::Finished)),
            ParsingStatus::Error => Err(self.error.clone().unwrap_or_else(|| {
                self.api_error(XmlError::UnexpectedState)
            })),
            ParsingStatus::Suspended if resumable => {
                Err(self.api_error(XmlError::Suspended))
            }
            _ => {
                if resumable {
                    self.status = ParsingStatus::Suspended;
                } else {
                    let _ = self.fail::<()>(XmlError::Aborted);
                }
                Ok(())
            }
        }
    }

    /// Return a root parser to its initial state, optionally with a new
    /// protocol encoding. Child parsers cannot be reset.
    pub fn reset(&mut self, encoding: Option<&str>) -> Result<()> {
        if self.is_child() {
            return Err(self.api_error(XmlError::InvalidArgument));
        }
        let enc = match encoding {
            Some(name) => {
                let enc = resolve_protocol_encoding(name)
                    .ok_or_else(|| self.api_error(XmlError::UnknownEncoding))?;
                self.protocol_encoding = Some(name.to_string());
                EncodingRef::Explicit(enc)
            }
            None => match &self.protocol_encoding {
                Some(name) => EncodingRef::Explicit(
                    resolve_protocol_encoding(name)
                        .ok_or_else(|| self.api_error(XmlError::UnknownEncoding))?,
                ),
                None => EncodingRef::Implicit(XmlEncoding::Utf8),
            },
        };
        self.status = ParsingStatus::Initialized;
        self.final_buffer = false;
        self.error = None;
        self.buffer.clear();
        self.parse_pos = 0;
        self.buffer_base = 0;
        self.ceded = None;
        self.enc = enc;
        self.sniffed = false;
        self.start_offset = 0;
        self.mode = Mode::Prolog(PrologMachine::new());
        self.frames.clear();
        self.open_tags.clear();
        self.binder = NamespaceBinder::new();
        self.dtd = Rc::new(RefCell::new(Dtd::new()));
        self.accounting.borrow_mut().reset_counters();
        self.doctype = DoctypeState::default();
        self.decl = declarations::DeclState::default();
        self.pending_defaults.clear();
        self.include_depth = 0;
        self.ext_subset_read = false;
        self.standalone_checked = false;
        self.in_ignore_sect = false;
        self.pending_chars.clear();
        self.line = 1;
        self.column = 0;
        self.event_len = 0;
        Ok(())
    }

    fn check_feedable(&mut self) -> Result<()> {
        match self.status {
            ParsingStatus::Suspended => Err(self.api_error(XmlError::Suspended)),
            ParsingStatus::Finished => Err(self.api_error(XmlError::Finished)),
            ParsingStatus::Error => {
                Err(self.error.clone().unwrap_or_else(|| {
                    self.api_error(XmlError::UnexpectedState)
                }))
            }
            _ => {
                // A configured encoding that did not resolve is reported
                // on the first feed.
                if self.protocol_encoding.is_some()
                    && !matches!(self.enc, EncodingRef::Explicit(_))
                {
                    return Err(self.api_error(XmlError::UnknownEncoding));
                }
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------
    // Queries.

    /// Code of the last error, [`XmlError::None`] before any failure.
    pub fn error_code(&self) -> XmlError {
        self.error.as_ref().map_or(XmlError::None, Error::code)
    }

    pub fn current_line_number(&self) -> u64 {
        self.line
    }

    pub fn current_column_number(&self) -> u64 {
        self.column
    }

    /// Byte offset of the current event (or error) from the start of the
    /// outermost input.
    pub fn current_byte_index(&self) -> u64 {
        self.buffer_base + self.parse_pos as u64
    }

    /// Raw byte length of the event currently being dispatched, 0 outside
    /// event dispatch.
    pub fn current_byte_count(&self) -> usize {
        self.event_len
    }

    /// The unconsumed part of the input buffer around the current
    /// position: `(buffer, offset_of_current_position)`.
    pub fn input_context(&self) -> (&[u8], usize) {
        (&self.buffer, self.parse_pos)
    }

    pub fn parsing_status(&self) -> ParsingStatus {
        self.status
    }

    /// Bytes of outermost input consumed so far.
    pub fn direct_bytes(&self) -> u64 {
        self.accounting.borrow().direct_bytes()
    }

    /// Bytes produced by entity expansion and attribute defaulting.
    pub fn indirect_bytes(&self) -> u64 {
        self.accounting.borrow().indirect_bytes()
    }

    // ---------------------------------------------------------------
    // Configuration.

    /// Override the input encoding. Only allowed before parsing starts.
    pub fn set_encoding(&mut self, encoding: &str) -> Result<()> {
        if self.status != ParsingStatus::Initialized {
            return Err(self.api_error(XmlError::CantChangeFeatureOnceParsing));
        }
        let enc = resolve_protocol_encoding(encoding)
            .ok_or_else(|| self.api_error(XmlError::UnknownEncoding))?;
        self.protocol_encoding = Some(encoding.to_string());
        self.enc = EncodingRef::Explicit(enc);
        Ok(())
    }

    /// Base URI reported with external entity references.
    pub fn set_base(&mut self, base: Option<&str>) {
        self.base = base.map(str::to_string);
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Pretend the document has an external DTD subset even without a
    /// DOCTYPE; the external-entity handler will be asked for it.
    pub fn use_foreign_dtd(&mut self, yes: bool) -> Result<()> {
        if self.status != ParsingStatus::Initialized {
            return Err(self.api_error(XmlError::CantChangeFeatureOnceParsing));
        }
        self.use_foreign_dtd = yes;
        Ok(())
    }

    pub fn set_param_entity_parsing(&mut self, mode: ParamEntityParsing) {
        self.param_entity_parsing = mode;
    }

    /// Report `uri<sep>local<sep>prefix` instead of `uri<sep>local`.
    pub fn set_return_ns_triplet(&mut self, yes: bool) {
        self.ns_triplets = yes;
    }

    /// Cap on entity amplification. Rejected on child parsers and for
    /// values below 1.0 (or NaN).
    pub fn set_maximum_amplification(&mut self, limit: f32) -> Result<()> {
        if self.is_child() {
            return Err(self.api_error(XmlError::InvalidArgument));
        }
        self.accounting
            .borrow_mut()
            .set_max_amplification(limit)
            .map_err(|code| self.api_error(code))
    }

    /// Number of direct bytes below which the amplification limit is not
    /// enforced. Rejected on child parsers.
    pub fn set_activation_threshold(&mut self, threshold: u64) -> Result<()> {
        if self.is_child() {
            return Err(self.api_error(XmlError::InvalidArgument));
        }
        self.accounting
            .borrow_mut()
            .set_activation_threshold(threshold);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Error plumbing.

    /// An API misuse error; does not poison the parse.
    pub(crate) fn api_error(&self, code: XmlError) -> Error {
        Error::new(code, self.current_byte_index(), self.line, self.column)
    }

    /// A parse failure: records the error, poisons the parser.
    pub(crate) fn fail<T>(&mut self, code: XmlError) -> Result<T> {
        let err = Error::new(code, self.current_byte_index(), self.line, self.column);
        self.error = Some(err.clone());
        self.status = ParsingStatus::Error;
        Err(err)
    }

    /// A parse failure at an offset into the current token.
    pub(crate) fn fail_at<T>(&mut self, code: XmlError, offset: usize) -> Result<T> {
        if self.frames.is_empty() {
            self.advance_position_bytes(offset);
            self.parse_pos += offset;
        }
        self.fail(code)
    }

    pub(crate) fn dispatch_flow(&mut self, flow: Flow) -> Result<()> {
        match flow {
            Flow::Continue => Ok(()),
            Flow::Suspend => {
                if self.frames.iter().any(|f| f.is_param) {
                    return self.fail(XmlError::SuspendPe);
                }
                self.status = ParsingStatus::Suspended;
                Ok(())
            }
            Flow::Abort => self.fail(XmlError::Aborted),
        }
    }

    // ---------------------------------------------------------------
    // The dispatch loop.

    fn run<H: Handler>(&mut self, handler: &mut H) -> Result<Status> {
        loop {
            match self.status {
                ParsingStatus::Suspended => return Ok(Status::Suspended),
                ParsingStatus::Finished => return Ok(Status::Ok),
                ParsingStatus::Error => {
                    return Err(self.error.clone().unwrap_or_else(|| {
                        self.api_error(XmlError::UnexpectedState)
                    }))
                }
                _ => {}
            }

            if let Some(frame) = self.frames.last() {
                // Scanning inside an internal entity's replacement text.
                let text = Rc::clone(&frame.text);
                let pos = frame.pos;
                let bytes = &text.as_bytes()[pos..];
                let state = self.lex_state();
                let scan = tokenizer::scan(&XmlEncoding::Utf8, state, bytes, true);
                match scan {
                    Scan::None => {
                        // An expansion boundary delimits a character-data
                        // event.
                        self.flush_chars(handler)?;
                        self.pop_frame()?;
                        continue;
                    }
                    Scan::Token(tok, len) => {
                        let token_text = text[pos..pos + len].to_string();
                        self.frames.last_mut().expect("frame present").pos += len;
                        self.account_indirect(len as u64)?;
                        self.event_len = 0;
                        self.dispatch_token(handler, tok, &token_text, true)?;
                    }
                    // Entity text is complete by construction, so a
                    // partial token can only mean a truncated construct.
                    Scan::Partial => return self.fail(XmlError::UnclosedToken),
                    Scan::PartialChar => return self.fail(XmlError::PartialChar),
                    Scan::Invalid(off) => return self.fail_at(XmlError::InvalidToken, off),
                }
                continue;
            }

            // Scanning the document entity.
            if !self.sniff_encoding()? {
                // Not enough bytes yet to tell the BOM apart.
                return Ok(Status::Ok);
            }
            let enc = self.enc.encoding().clone();
            let state = self.lex_state();
            let at_eof = self.final_buffer;
            let scan = tokenizer::scan(
                &enc,
                state,
                &self.buffer[self.parse_pos..],
                at_eof,
            );
            match scan {
                Scan::None => {
                    if !self.final_buffer {
                        self.compact_buffer();
                        return Ok(Status::Ok);
                    }
                    self.flush_chars(handler)?;
                    self.finish_document()?;
                    if self.status == ParsingStatus::Suspended {
                        return Ok(Status::Suspended);
                    }
                    self.status = ParsingStatus::Finished;
                    return Ok(Status::Ok);
                }
                Scan::Partial => {
                    if self.final_buffer {
                        return self.fail(XmlError::UnclosedToken);
                    }
                    self.compact_buffer();
                    return Ok(Status::Ok);
                }
                Scan::PartialChar => {
                    if self.final_buffer {
                        return self.fail(XmlError::PartialChar);
                    }
                    self.compact_buffer();
                    return Ok(Status::Ok);
                }
                Scan::Invalid(off) => {
                    return self.fail_at(XmlError::InvalidToken, off);
                }
                Scan::Token(tok, len) => {
                    let raw = &self.buffer[self.parse_pos..self.parse_pos + len];
                    let token_text = enc.convert(raw);
                    self.event_len = len;
                    self.account_direct(len as u64)?;
                    self.dispatch_token_at(handler, tok, &token_text, len)?;
                }
            }
        }
    }

    /// Dispatch a document-entity token: position bookkeeping wraps the
    /// shared dispatch.
    fn dispatch_token_at<H: Handler>(
        &mut self,
        handler: &mut H,
        tok: Token,
        text: &str,
        len: usize,
    ) -> Result<()> {
        let result = self.dispatch_token(handler, tok, text, false);
        // The token is consumed even when its handler failed, so error
        // positions refer to its start; advance only on success.
        if result.is_ok() {
            self.advance_position_bytes(len);
            self.parse_pos += len;
            self.event_len = 0;
        }
        result
    }

    fn dispatch_token<H: Handler>(
        &mut self,
        handler: &mut H,
        tok: Token,
        text: &str,
        in_entity: bool,
    ) -> Result<()> {
        match self.mode {
            Mode::Prolog(_) => self.prolog_token(handler, tok, text, in_entity),
            Mode::Content | Mode::Cdata => self.content_token(handler, tok, text, in_entity),
            Mode::Epilog => self.epilog_token(handler, tok, text),
        }
    }

    /// Lexical state for the current mode.
    fn lex_state(&self) -> LexState {
        match &self.mode {
            Mode::Prolog(_) if self.in_ignore_sect => LexState::IgnoreSect,
            Mode::Prolog(_) => LexState::Prolog,
            Mode::Content => LexState::Content,
            Mode::Cdata => LexState::Cdata,
            Mode::Epilog => LexState::Prolog,
        }
    }

    /// BOM and zero-byte sniffing, once, before the first token. Returns
    /// `false` when more bytes are needed to decide.
    fn sniff_encoding(&mut self) -> Result<bool> {
        if self.sniffed {
            return Ok(true);
        }
        // Wait for enough bytes to tell a 3-byte BOM apart.
        if self.buffer.len() < 4 && !self.final_buffer {
            return Ok(false);
        }
        self.sniffed = true;
        if self.enc.can_be_refined() {
            if let Some((enc, _bom_len)) = detect_encoding(&self.buffer) {
                self.enc = EncodingRef::BomDetected(enc);
            }
        }
        // Swallow the BOM of the settled encoding here so every scan
        // state starts on real content.
        let bom_len = match self.enc.encoding() {
            XmlEncoding::Utf8 if self.buffer.starts_with(&[0xEF, 0xBB, 0xBF]) => 3,
            XmlEncoding::Utf16Le if self.buffer.starts_with(&[0xFF, 0xFE]) => 2,
            XmlEncoding::Utf16Be if self.buffer.starts_with(&[0xFE, 0xFF]) => 2,
            _ => 0,
        };
        if bom_len > 0 {
            self.account_direct(bom_len as u64)?;
            self.parse_pos += bom_len;
            self.start_offset = self.current_byte_index();
        }
        Ok(true)
    }

    /// End of the document input was reached cleanly (no more tokens, and
    /// the caller said final).
    fn finish_document(&mut self) -> Result<()> {
        match &self.mode {
            Mode::Prolog(machine) => {
                if self.is_child() && machine.in_external_subset() {
                    if !machine.at_subset_level() || self.include_depth > 0 {
                        return self.fail(XmlError::IncompletePe);
                    }
                    return Ok(());
                }
                if machine.expects_instance_start() {
                    return self.fail(XmlError::NoElements);
                }
                // The input ended inside the DOCTYPE declaration.
                self.fail(XmlError::Syntax)
            }
            Mode::Content => {
                if !self.open_tags.is_empty() {
                    return self.fail(XmlError::NoElements);
                }
                if let InputKind::ExternalEntity = self.input_kind {
                    return Ok(());
                }
                // A document whose root never appeared.
                self.fail(XmlError::NoElements)
            }
            Mode::Cdata => self.fail(XmlError::UnclosedCdataSection),
            Mode::Epilog => Ok(()),
        }
    }

    // ---------------------------------------------------------------
    // Entity frames.

    pub(crate) fn push_frame(&mut self, name: &str, text: Rc<str>, is_param: bool) {
        self.dtd.borrow_mut().set_open(name, is_param, true);
        let at_subset_level = match &self.mode {
            Mode::Prolog(machine) => machine.at_subset_level(),
            _ => false,
        };
        self.frames.push(EntityFrame {
            text,
            pos: 0,
            entity_name: name.to_string(),
            is_param,
            start_tag_depth: self.open_tags.len(),
            started_in_cdata: matches!(self.mode, Mode::Cdata),
            started_at_subset_level: at_subset_level,
        });
    }

    fn pop_frame(&mut self) -> Result<()> {
        let frame = self.frames.pop().expect("pop with no frame");
        self.dtd
            .borrow_mut()
            .set_open(&frame.entity_name, frame.is_param, false);
        if frame.is_param {
            // A parameter entity entered between declarations must hold
            // complete declarations.
            if frame.started_at_subset_level {
                if let Mode::Prolog(machine) = &self.mode {
                    if !machine.at_subset_level() {
                        return self.fail(XmlError::IncompletePe);
                    }
                }
            }
            return Ok(());
        }
        // General entity content must be tag-balanced and may not
        // straddle a CDATA boundary.
        let in_cdata = matches!(self.mode, Mode::Cdata);
        if self.open_tags.len() != frame.start_tag_depth
            || in_cdata != frame.started_in_cdata
        {
            return self.fail(XmlError::AsyncEntity);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Accounting.

    fn account_direct(&mut self, n: u64) -> Result<()> {
        self.accounting.borrow_mut().count_direct(n);
        let check = self.accounting.borrow().check();
        check.or_else(|code| self.fail(code))
    }

    pub(crate) fn account_indirect(&mut self, n: u64) -> Result<()> {
        self.accounting.borrow_mut().count_indirect(n);
        let check = self.accounting.borrow().check();
        check.or_else(|code| self.fail(code))
    }

    // ---------------------------------------------------------------
    // Buffer and position bookkeeping.

    fn compact_buffer(&mut self) {
        if self.parse_pos > 0 {
            self.buffer.drain(..self.parse_pos);
            self.buffer_base += self.parse_pos as u64;
            self.parse_pos = 0;
        }
    }

    /// Advance line/column over `len` raw bytes at the current position.
    fn advance_position_bytes(&mut self, len: usize) {
        let enc = self.enc.encoding().clone();
        let bytes = &self.buffer[self.parse_pos..self.parse_pos + len];
        let mut pos = 0;
        let mut last_was_cr = false;
        while pos < bytes.len() {
            match enc.next_char(&bytes[pos..]) {
                NextChar::Char { c, len: clen } => {
                    match c {
                        '\r' => {
                            self.line += 1;
                            self.column = 0;
                            last_was_cr = true;
                        }
                        '\n' => {
                            if !last_was_cr {
                                self.line += 1;
                                self.column = 0;
                            }
                            last_was_cr = false;
                        }
                        _ => {
                            self.column += 1;
                            last_was_cr = false;
                        }
                    }
                    pos += clen;
                }
                _ => break,
            }
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve an encoding name given through the API (constructor,
/// `set_encoding`, reset).
pub(crate) fn resolve_protocol_encoding(name: &str) -> Option<XmlEncoding> {
    builtin_for_name(name).or_else(|| table_from_encoding_rs(name))
}
