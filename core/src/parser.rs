//! Body codecs and their resolution per operation.
//!
//! # Design
//! A `Parser` declares the `PayloadKind` it produces, so the response chain
//! can check it against the operation's declared `ReturnType` before any
//! byte of the body is read. Built-in parsers cover STRING, JSON and OBJECT;
//! CUSTOM parsers are registered by name on the client and referenced from
//! the endpoint or operation.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;

use crate::descriptor::{Endpoint, Operation, ParserKind, ReturnType};
use crate::error::ParserError;

/// The shape of a parsed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Text,
    Json,
    Bytes,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::Text => f.write_str("text"),
            PayloadKind::Json => f.write_str("json"),
            PayloadKind::Bytes => f.write_str("bytes"),
        }
    }
}

impl PayloadKind {
    /// Whether a payload of this kind may be returned as `declared`.
    pub fn assignable_to(&self, declared: &ReturnType) -> bool {
        match declared {
            ReturnType::Void => true,
            ReturnType::Text => *self == PayloadKind::Text,
            ReturnType::Json | ReturnType::Object(_) => *self == PayloadKind::Json,
            ReturnType::Bytes => *self == PayloadKind::Bytes,
        }
    }
}

/// A parsed body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Text(String),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Deserialize into a concrete type. Text payloads are tried as JSON.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, ParserError> {
        let result = match self {
            Payload::Json(value) => serde_json::from_value(value),
            Payload::Text(text) => serde_json::from_str(&text),
            Payload::Bytes(bytes) => serde_json::from_slice(&bytes),
            Payload::None => serde_json::from_value(serde_json::Value::Null),
        };
        result.map_err(|e| ParserError::Parse {
            parser: std::any::type_name::<T>().to_string(),
            message: e.to_string(),
        })
    }
}

pub type ParseResult = Result<Payload, Box<dyn std::error::Error + Send + Sync>>;

/// A body codec.
pub trait Parser: Send + Sync {
    fn name(&self) -> &str;

    fn output(&self) -> PayloadKind;

    fn parse(&self, body: &[u8], content_type: Option<&str>) -> ParseResult;
}

/// STRING: the body as UTF-8 text.
pub struct StringParser;

impl Parser for StringParser {
    fn name(&self) -> &str {
        "STRING"
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::Text
    }

    fn parse(&self, body: &[u8], _content_type: Option<&str>) -> ParseResult {
        Ok(Payload::Text(String::from_utf8(body.to_vec())?))
    }
}

/// JSON: the body must be a JSON document.
pub struct JsonParser;

impl Parser for JsonParser {
    fn name(&self) -> &str {
        "JSON"
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::Json
    }

    fn parse(&self, body: &[u8], _content_type: Option<&str>) -> ParseResult {
        Ok(Payload::Json(serde_json::from_slice(body)?))
    }
}

/// OBJECT: JSON meant for typed deserialization; an empty body is `null`.
pub struct ObjectParser;

impl Parser for ObjectParser {
    fn name(&self) -> &str {
        "OBJECT"
    }

    fn output(&self) -> PayloadKind {
        PayloadKind::Json
    }

    fn parse(&self, body: &[u8], _content_type: Option<&str>) -> ParseResult {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Payload::Json(serde_json::Value::Null));
        }
        Ok(Payload::Json(serde_json::from_slice(body)?))
    }
}

/// Built-in parsers plus custom ones registered by name.
pub struct ParserRegistry {
    string: Arc<dyn Parser>,
    json: Arc<dyn Parser>,
    object: Arc<dyn Parser>,
    custom: DashMap<String, Arc<dyn Parser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            string: Arc::new(StringParser),
            json: Arc::new(JsonParser),
            object: Arc::new(ObjectParser),
            custom: DashMap::new(),
        }
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, parser: Arc<dyn Parser>) {
        self.custom.insert(name.to_string(), parser);
    }

    pub fn custom(&self, name: &str) -> Option<Arc<dyn Parser>> {
        self.custom.get(name).map(|p| Arc::clone(&p))
    }

    /// Pick the parser of `op`. `Ok(None)` for void operations.
    ///
    /// The operation's kind beats the endpoint's. UNDEFINED falls back to a
    /// custom-parser reference (operation first), else STRING.
    pub fn resolve(
        &self,
        endpoint: &Endpoint,
        op: &Operation,
    ) -> Result<Option<Arc<dyn Parser>>, ParserError> {
        if op.returns == ReturnType::Void {
            return Ok(None);
        }

        let kind = match op.parser {
            ParserKind::Undefined => endpoint.parser,
            kind => kind,
        };
        let custom_ref = op
            .custom_parser
            .as_deref()
            .or(endpoint.custom_parser.as_deref());

        let parser = match kind {
            ParserKind::String => Some(Arc::clone(&self.string)),
            ParserKind::Json => Some(Arc::clone(&self.json)),
            ParserKind::Object => Some(Arc::clone(&self.object)),
            ParserKind::Custom => custom_ref.and_then(|name| self.custom(name)),
            ParserKind::Undefined => match custom_ref {
                Some(name) => self.custom(name),
                None => Some(Arc::clone(&self.string)),
            },
        };

        parser
            .map(Some)
            .ok_or_else(|| ParserError::ParserUndefined(op.returns.to_string()))
    }
}

/// Fail unless `parser` can produce `declared`.
pub fn check_assignable(parser: &dyn Parser, declared: &ReturnType) -> Result<(), ParserError> {
    if parser.output().assignable_to(declared) {
        Ok(())
    } else {
        Err(ParserError::ParserNotAssignable {
            parser: parser.name().to_string(),
            output: parser.output().to_string(),
            declared: declared.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EndpointDef, EndpointTag, OperationDef};
    use crate::validator::resolve as resolve_endpoint;

    fn endpoint(tag: EndpointTag, op: OperationDef) -> (Endpoint, Operation) {
        let ep = resolve_endpoint(EndpointDef::new("Api").tag(tag).operation(op)).unwrap();
        let op = ep.operation_names().next().and_then(|n| ep.operation(n)).unwrap().as_ref().clone();
        (ep, op)
    }

    struct Csv;

    impl Parser for Csv {
        fn name(&self) -> &str {
            "csv"
        }

        fn output(&self) -> PayloadKind {
            PayloadKind::Json
        }

        fn parse(&self, body: &[u8], _: Option<&str>) -> ParseResult {
            let text = std::str::from_utf8(body)?;
            Ok(Payload::Json(serde_json::json!(text.split(',').collect::<Vec<_>>())))
        }
    }

    #[test]
    fn operation_kind_beats_endpoint_kind() {
        let (ep, op) = endpoint(
            EndpointTag::host("h").with_parser(ParserKind::Json),
            OperationDef::get("a", "/").parser(ParserKind::String).returns(ReturnType::Text),
        );
        let parser = ParserRegistry::new().resolve(&ep, &op).unwrap().unwrap();
        assert_eq!(parser.name(), "STRING");
    }

    #[test]
    fn undefined_inherits_endpoint_kind() {
        let (ep, op) = endpoint(
            EndpointTag::host("h").with_parser(ParserKind::Object),
            OperationDef::get("a", "/").returns(ReturnType::object("User")),
        );
        let parser = ParserRegistry::new().resolve(&ep, &op).unwrap().unwrap();
        assert_eq!(parser.name(), "OBJECT");
    }

    #[test]
    fn undefined_everywhere_prefers_custom_reference_then_string() {
        let registry = ParserRegistry::new();
        registry.register("csv", Arc::new(Csv));

        let (ep, op) = endpoint(
            EndpointTag::host("h").with_custom_parser("csv"),
            OperationDef::get("a", "/").returns(ReturnType::Json),
        );
        assert_eq!(registry.resolve(&ep, &op).unwrap().unwrap().name(), "csv");

        let (ep, op) = endpoint(EndpointTag::host("h"), OperationDef::get("a", "/").returns(ReturnType::Text));
        assert_eq!(registry.resolve(&ep, &op).unwrap().unwrap().name(), "STRING");
    }

    #[test]
    fn unregistered_custom_parser_is_undefined() {
        let (ep, op) = endpoint(
            EndpointTag::host("h"),
            OperationDef::get("a", "/")
                .parser(ParserKind::Custom)
                .custom_parser("missing")
                .returns(ReturnType::Json),
        );
        let err = ParserRegistry::new().resolve(&ep, &op).err().unwrap();
        assert_eq!(err, ParserError::ParserUndefined("json".to_string()));
    }

    #[test]
    fn void_needs_no_parser() {
        let (ep, op) = endpoint(
            EndpointTag::host("h").with_parser(ParserKind::Custom),
            OperationDef::delete("a", "/"),
        );
        assert!(ParserRegistry::new().resolve(&ep, &op).unwrap().is_none());
    }

    #[test]
    fn text_is_not_assignable_to_object() {
        let err = check_assignable(&StringParser, &ReturnType::object("User")).unwrap_err();
        assert_eq!(
            err,
            ParserError::ParserNotAssignable {
                parser: "STRING".to_string(),
                output: "text".to_string(),
                declared: "User".to_string(),
            }
        );
        assert!(check_assignable(&JsonParser, &ReturnType::object("User")).is_ok());
        assert!(check_assignable(&StringParser, &ReturnType::Void).is_ok());
    }

    #[test]
    fn builtin_parsers() {
        assert_eq!(StringParser.parse(b"hi", None).unwrap(), Payload::Text("hi".into()));
        assert!(JsonParser.parse(b"", None).is_err());
        assert_eq!(ObjectParser.parse(b" ", None).unwrap(), Payload::Json(serde_json::Value::Null));
        assert!(StringParser.parse(&[0xff, 0xfe], None).is_err());
    }

    #[test]
    fn payload_deserializes_into_types() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct User {
            id: u32,
        }
        let user: User = Payload::Json(serde_json::json!({"id": 7})).deserialize().unwrap();
        assert_eq!(user, User { id: 7 });
        assert!(Payload::Text("nope".into()).deserialize::<User>().is_err());
    }
}
