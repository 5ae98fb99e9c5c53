//! Lexical walker: turns an XML-RPC document into a flat, lazy sequence of
//! [`WireNode`]s.
//!
//! The walker is a pull iterator over a `quick-xml` reader. It keeps an
//! explicit stack of grammar frames instead of recursing, so every
//! `next()` reads only as many XML events as the next node needs. It checks
//! the XML-RPC grammar (required and duplicated children, element names
//! under `<value>`) but not types; implicit strings, struct member identity
//! and fault shape are the decoder's business.
//!
//! ```rust
//! use xmlrpc_serde::walker::{ScalarKind, WireNode, Walker};
//!
//! let xml = "<value><array><data><value><i4>7</i4></value></data></array></value>";
//! let nodes: Vec<WireNode> = Walker::value(xml.as_bytes())
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(
//!     nodes,
//!     [
//!         WireNode::ArrayBegin,
//!         WireNode::Scalar(ScalarKind::Int32, "7".into()),
//!         WireNode::ArrayEnd,
//!     ]
//! );
//! ```

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::VecDeque;
use std::fmt;
use std::io::BufRead;

// ── Wire nodes ─────────────────────────────────────────────────────────────

/// Scalar element kinds. `i4` and `int` both map to [`ScalarKind::Int32`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Int32,
    Int64,
    Double,
    Boolean,
    DateTime,
    Base64,
    Nil,
}

impl ScalarKind {
    /// Kind for a scalar element name, matched case-sensitively.
    pub fn from_element(name: &str) -> Option<Self> {
        Some(match name {
            "string" => ScalarKind::String,
            "i4" | "int" => ScalarKind::Int32,
            "i8" => ScalarKind::Int64,
            "double" => ScalarKind::Double,
            "boolean" => ScalarKind::Boolean,
            "dateTime.iso8601" => ScalarKind::DateTime,
            "base64" => ScalarKind::Base64,
            "nil" => ScalarKind::Nil,
            _ => return None,
        })
    }

    pub fn element_name(self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Int32 => "i4",
            ScalarKind::Int64 => "i8",
            ScalarKind::Double => "double",
            ScalarKind::Boolean => "boolean",
            ScalarKind::DateTime => "dateTime.iso8601",
            ScalarKind::Base64 => "base64",
            ScalarKind::Nil => "nil",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

/// One token of the XML-RPC grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum WireNode {
    MethodName(String),
    /// Start of `<params>`; each following top-level value is one param.
    ParamsMarker,
    /// Start of `<fault>`; the fault struct follows.
    FaultMarker,
    ArrayBegin,
    ArrayEnd,
    StructBegin,
    StructEnd,
    /// A struct member name; the member's value follows immediately.
    StructMember(String),
    Scalar(ScalarKind, String),
    /// Text of a `<value>` with no child element.
    ImplicitString(String),
}

// ── Walker ─────────────────────────────────────────────────────────────────

/// Root element the walker expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Request,
    Response,
    Value,
}

impl Entry {
    fn root_element(self) -> &'static str {
        match self {
            Entry::Request => "methodCall",
            Entry::Response => "methodResponse",
            Entry::Value => "value",
        }
    }
}

#[derive(Debug)]
enum Token {
    Start(String),
    End(String),
    Text(String),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallStage {
    ExpectName,
    ExpectParams,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberStage {
    ExpectName,
    ExpectValue,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Document { seen_root: bool },
    Call(CallStage),
    RequestParams,
    Param { seen: bool },
    Response { seen_body: bool },
    ResponseParams { count: usize },
    Fault { seen: bool },
    /// Inside `<value>` after its content; expects `</value>`.
    ValueEnd,
    Array { seen_data: bool },
    Data,
    Struct,
    Member(MemberStage),
}

/// Lazy, forward-only iterator of [`WireNode`]s over one document.
///
/// After the first error the iterator is exhausted.
pub struct Walker<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    entry: Entry,
    stack: Vec<Frame>,
    pending: VecDeque<WireNode>,
    lookahead: Option<Token>,
    finished: bool,
}

impl<R: BufRead> Walker<R> {
    pub fn new(source: R, entry: Entry) -> Self {
        Self::from_reader(Reader::from_reader(source), entry)
    }

    /// Walk a document from an existing `quick-xml` reader.
    pub fn from_reader(reader: Reader<R>, entry: Entry) -> Self {
        Walker {
            reader,
            buf: Vec::new(),
            entry,
            stack: vec![Frame::Document { seen_root: false }],
            pending: VecDeque::new(),
            lookahead: None,
            finished: false,
        }
    }

    /// Walk a `<methodCall>` document.
    pub fn request(source: R) -> Self {
        Self::new(source, Entry::Request)
    }

    /// Walk a `<methodResponse>` document.
    pub fn response(source: R) -> Self {
        Self::new(source, Entry::Response)
    }

    /// Walk a document whose root is a bare `<value>`.
    pub fn value(source: R) -> Self {
        Self::new(source, Entry::Value)
    }

    // ── Tokens ─────────────────────────────────────────────────────────────

    fn next_token(&mut self) -> Result<Token> {
        if let Some(token) = self.lookahead.take() {
            return Ok(token);
        }
        loop {
            self.buf.clear();
            let token = match self.reader.read_event_into(&mut self.buf)? {
                Event::Start(e) => Token::Start(element_name(e.name().as_ref())?),
                Event::End(e) => Token::End(element_name(e.name().as_ref())?),
                Event::Empty(e) => {
                    let name = element_name(e.name().as_ref())?;
                    self.lookahead = Some(Token::End(name.clone()));
                    Token::Start(name)
                }
                Event::Text(e) => Token::Text(e.unescape()?.into_owned()),
                Event::CData(e) => Token::Text(
                    String::from_utf8(e.into_inner().into_owned())
                        .map_err(|_| Error::IllFormedXml("CDATA is not valid UTF-8".into()))?,
                ),
                Event::DocType(_) => {
                    return Err(Error::IllFormedXml(
                        "DTD is prohibited in XML-RPC documents".into(),
                    ));
                }
                Event::Eof => Token::Eof,
                Event::Decl(_) | Event::PI(_) | Event::Comment(_) => continue,
            };
            return Ok(token);
        }
    }

    /// Collect the text content of `element` up to its end tag.
    fn read_text(&mut self, element: &str) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.next_token()? {
                Token::Text(t) => text.push_str(&t),
                Token::End(_) => return Ok(text),
                Token::Start(child) => {
                    return Err(invalid(format!(
                        "element <{}> must not contain <{}>",
                        element, child
                    )));
                }
                Token::Eof => return Err(unexpected_eof()),
            }
        }
    }

    /// Skip an element the grammar does not know, including its subtree.
    /// Grammar keywords may not hide inside it.
    fn skip_element(&mut self, name: &str) -> Result<()> {
        check_not_keyword(name)?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.next_token()? {
                Token::Start(child) => {
                    check_not_keyword(&child)?;
                    depth += 1;
                }
                Token::End(_) => depth -= 1,
                Token::Text(_) => {}
                Token::Eof => return Err(unexpected_eof()),
            }
        }
        Ok(())
    }

    // ── Grammar ────────────────────────────────────────────────────────────

    fn emit(&mut self, node: WireNode) {
        self.pending.push_back(node);
    }

    fn set_top(&mut self, frame: Frame) {
        if let Some(top) = self.stack.last_mut() {
            *top = frame;
        }
    }

    /// Handle the content of a `<value>` whose start tag was just read.
    fn begin_value(&mut self) -> Result<()> {
        let mut text = String::new();
        loop {
            match self.next_token()? {
                Token::Text(t) => text.push_str(&t),
                Token::End(_) => {
                    self.emit(WireNode::ImplicitString(text));
                    return Ok(());
                }
                Token::Start(child) => {
                    if !text.trim().is_empty() {
                        return Err(invalid(format!(
                            "value mixes text with a <{}> element",
                            child
                        )));
                    }
                    return self.begin_typed_value(&child);
                }
                Token::Eof => return Err(unexpected_eof()),
            }
        }
    }

    fn begin_typed_value(&mut self, element: &str) -> Result<()> {
        match element {
            "array" => {
                self.emit(WireNode::ArrayBegin);
                self.stack.push(Frame::ValueEnd);
                self.stack.push(Frame::Array { seen_data: false });
            }
            "struct" => {
                self.emit(WireNode::StructBegin);
                self.stack.push(Frame::ValueEnd);
                self.stack.push(Frame::Struct);
            }
            _ => {
                let kind = ScalarKind::from_element(element)
                    .ok_or_else(|| invalid(format!("unexpected element <{}> in value", element)))?;
                let text = self.read_text(element)?;
                if kind == ScalarKind::Nil && !text.trim().is_empty() {
                    return Err(invalid("nil element must be empty"));
                }
                self.emit(WireNode::Scalar(kind, text));
                self.stack.push(Frame::ValueEnd);
            }
        }
        Ok(())
    }

    /// Advance the grammar by one token.
    fn step(&mut self) -> Result<()> {
        let frame = match self.stack.last() {
            Some(frame) => *frame,
            None => {
                self.finished = true;
                return Ok(());
            }
        };
        let token = self.next_token()?;
        let token = match token {
            Token::Text(t) if t.trim().is_empty() => return Ok(()),
            Token::Text(_) if frame == (Frame::Document { seen_root: true }) => {
                return Err(Error::IllFormedXml("text after the root element".into()));
            }
            Token::Text(_) => return Err(invalid("unexpected text content")),
            Token::Eof if frame == (Frame::Document { seen_root: true }) => {
                self.stack.clear();
                self.finished = true;
                return Ok(());
            }
            Token::Eof => return Err(unexpected_eof()),
            token => token,
        };

        match (frame, token) {
            // Document
            (Frame::Document { seen_root: false }, Token::Start(name)) => {
                if name != self.entry.root_element() {
                    return Err(invalid(format!(
                        "expected <{}> root element, found <{}>",
                        self.entry.root_element(),
                        name
                    )));
                }
                self.set_top(Frame::Document { seen_root: true });
                match self.entry {
                    Entry::Request => self.stack.push(Frame::Call(CallStage::ExpectName)),
                    Entry::Response => self.stack.push(Frame::Response { seen_body: false }),
                    Entry::Value => self.begin_value()?,
                }
            }
            (Frame::Document { .. }, Token::Start(name)) => {
                return Err(Error::IllFormedXml(format!(
                    "unexpected <{}> after the root element",
                    name
                )));
            }

            // methodCall
            (Frame::Call(CallStage::ExpectName), Token::Start(name)) => {
                if name != "methodName" {
                    return Err(invalid("request has no methodName element"));
                }
                let method = self.read_text("methodName")?;
                let method = method.trim();
                if method.is_empty() {
                    return Err(invalid("request contains empty methodName element"));
                }
                self.emit(WireNode::MethodName(method.to_string()));
                self.set_top(Frame::Call(CallStage::ExpectParams));
            }
            (Frame::Call(CallStage::ExpectName), Token::End(_)) => {
                return Err(invalid("request has no methodName element"));
            }
            (Frame::Call(stage), Token::Start(name)) if name == "params" => {
                if stage == CallStage::Done {
                    return Err(invalid("request contains more than one params element"));
                }
                self.emit(WireNode::ParamsMarker);
                self.set_top(Frame::Call(CallStage::Done));
                self.stack.push(Frame::RequestParams);
            }
            (Frame::Call(_), Token::Start(name)) if name == "methodName" => {
                return Err(invalid("request contains more than one methodName element"));
            }
            (Frame::Call(_), Token::Start(name)) => self.skip_element(&name)?,
            (Frame::Call(_), Token::End(_)) => {
                self.stack.pop();
            }

            (Frame::RequestParams, Token::Start(name)) if name == "param" => {
                self.stack.push(Frame::Param { seen: false });
            }
            (Frame::RequestParams, Token::Start(name)) => self.skip_element(&name)?,
            (Frame::RequestParams, Token::End(_)) => {
                self.stack.pop();
            }

            (Frame::Param { seen }, Token::Start(name)) if name == "value" => {
                if seen {
                    return Err(invalid("param element contains more than one value"));
                }
                self.set_top(Frame::Param { seen: true });
                self.begin_value()?;
            }
            (Frame::Param { .. }, Token::Start(name)) => self.skip_element(&name)?,
            (Frame::Param { seen }, Token::End(_)) => {
                if !seen {
                    return Err(invalid("param element does not contain a value"));
                }
                self.stack.pop();
            }

            // methodResponse
            (Frame::Response { seen_body }, Token::Start(name))
                if name == "params" || name == "fault" =>
            {
                if seen_body {
                    return Err(invalid(
                        "response contains more than one params or fault element",
                    ));
                }
                self.set_top(Frame::Response { seen_body: true });
                if name == "params" {
                    self.emit(WireNode::ParamsMarker);
                    self.stack.push(Frame::ResponseParams { count: 0 });
                } else {
                    self.emit(WireNode::FaultMarker);
                    self.stack.push(Frame::Fault { seen: false });
                }
            }
            (Frame::Response { .. }, Token::Start(name)) => self.skip_element(&name)?,
            (Frame::Response { seen_body }, Token::End(_)) => {
                if !seen_body {
                    return Err(invalid("response contains neither params nor fault"));
                }
                self.stack.pop();
            }

            (Frame::ResponseParams { count }, Token::Start(name)) if name == "param" => {
                if count > 0 {
                    return Err(invalid("response contains more than one param"));
                }
                self.set_top(Frame::ResponseParams { count: count + 1 });
                self.stack.push(Frame::Param { seen: false });
            }
            (Frame::ResponseParams { .. }, Token::Start(name)) => self.skip_element(&name)?,
            (Frame::ResponseParams { .. }, Token::End(_)) => {
                self.stack.pop();
            }

            (Frame::Fault { seen }, Token::Start(name)) if name == "value" => {
                if seen {
                    return Err(invalid("fault element contains more than one value"));
                }
                self.set_top(Frame::Fault { seen: true });
                self.begin_value()?;
            }
            (Frame::Fault { .. }, Token::Start(name)) => self.skip_element(&name)?,
            (Frame::Fault { seen }, Token::End(_)) => {
                if !seen {
                    return Err(invalid("fault element does not contain a value"));
                }
                self.stack.pop();
            }

            // values
            (Frame::ValueEnd, Token::Start(name)) => {
                return Err(invalid(format!(
                    "value contains more than one element (found <{}>)",
                    name
                )));
            }
            (Frame::ValueEnd, Token::End(_)) => {
                self.stack.pop();
            }

            (Frame::Array { seen_data }, Token::Start(name)) if name == "data" => {
                if seen_data {
                    return Err(invalid("array contains more than one data element"));
                }
                self.set_top(Frame::Array { seen_data: true });
                self.stack.push(Frame::Data);
            }
            (Frame::Array { .. }, Token::Start(name)) => self.skip_element(&name)?,
            (Frame::Array { seen_data }, Token::End(_)) => {
                if !seen_data {
                    return Err(invalid("array does not contain a data element"));
                }
                self.emit(WireNode::ArrayEnd);
                self.stack.pop();
            }

            (Frame::Data, Token::Start(name)) if name == "value" => self.begin_value()?,
            (Frame::Data, Token::Start(name)) => self.skip_element(&name)?,
            (Frame::Data, Token::End(_)) => {
                self.stack.pop();
            }

            (Frame::Struct, Token::Start(name)) if name == "member" => {
                self.stack.push(Frame::Member(MemberStage::ExpectName));
            }
            (Frame::Struct, Token::Start(name)) => self.skip_element(&name)?,
            (Frame::Struct, Token::End(_)) => {
                self.emit(WireNode::StructEnd);
                self.stack.pop();
            }

            (Frame::Member(stage), Token::Start(name)) if name == "name" => {
                if stage != MemberStage::ExpectName {
                    return Err(invalid("member contains more than one name element"));
                }
                let member = self.read_text("name")?;
                if member.is_empty() {
                    return Err(invalid("member has empty name"));
                }
                self.emit(WireNode::StructMember(member));
                self.set_top(Frame::Member(MemberStage::ExpectValue));
            }
            (Frame::Member(stage), Token::Start(name)) if name == "value" => match stage {
                MemberStage::ExpectName => return Err(invalid("member has no name element")),
                MemberStage::ExpectValue => {
                    self.set_top(Frame::Member(MemberStage::Done));
                    self.begin_value()?;
                }
                MemberStage::Done => {
                    return Err(invalid("member contains more than one value element"));
                }
            },
            (Frame::Member(_), Token::Start(name)) => self.skip_element(&name)?,
            (Frame::Member(stage), Token::End(_)) => match stage {
                MemberStage::ExpectName => return Err(invalid("member has no name element")),
                MemberStage::ExpectValue => return Err(invalid("member has no value element")),
                MemberStage::Done => {
                    self.stack.pop();
                }
            },

            (_, Token::End(name)) => {
                return Err(Error::IllFormedXml(format!("unexpected end tag </{}>", name)));
            }
            (_, Token::Text(_)) | (_, Token::Eof) => {}
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for Walker<R> {
    type Item = Result<WireNode>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.pending.pop_front() {
                return Some(Ok(node));
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.step() {
                self.finished = true;
                self.pending.clear();
                return Some(Err(err));
            }
        }
    }
}

impl<R: BufRead> std::iter::FusedIterator for Walker<R> {}

// ── Helpers ────────────────────────────────────────────────────────────────

fn element_name(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::IllFormedXml("element name is not valid UTF-8".into()))
}

fn check_not_keyword(name: &str) -> Result<()> {
    if name == "name" || name == "value" {
        return Err(invalid(format!("unexpected <{}> element", name)));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidDocument(message.into())
}

fn unexpected_eof() -> Error {
    Error::IllFormedXml("unexpected end of document".into())
}
