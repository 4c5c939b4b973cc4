//! Response processor chain.
//!
//! # Design
//! Runs in a fixed order over one `WireResponse`: status classification,
//! parser resolution and the return-type check, header capture, then body
//! parsing. The parser check happens before a single body byte is read. The
//! body is drained on every path, explicitly on the failure paths and by
//! `ResponseBody`'s `Drop` otherwise.

use serde::de::DeserializeOwned;

use crate::context::InvocationContext;
use crate::error::{ExecutionError, InvocationError, InvocationFailed, ParserError};
use crate::http::{Headers, WireResponse};
use crate::parser::{check_assignable, ParserRegistry, Payload};

/// The result of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: u16,
    pub headers: Headers,
    pub payload: Payload,
    /// Values of the response headers bound to header roles; only names the
    /// response carried with a non-empty value appear.
    pub captured: Headers,
}

impl Outcome {
    pub fn captured(&self, name: &str) -> Option<&str> {
        self.captured.get(name)
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.as_text()
    }

    pub fn json(&self) -> Option<&serde_json::Value> {
        self.payload.as_json()
    }

    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, ParserError> {
        self.payload.deserialize()
    }
}

pub struct ResponseChain<'a> {
    parsers: &'a ParserRegistry,
}

impl<'a> ResponseChain<'a> {
    pub fn new(parsers: &'a ParserRegistry) -> Self {
        Self { parsers }
    }

    pub fn process(
        &self,
        ctx: &InvocationContext,
        write_back: &[String],
        mut response: WireResponse,
    ) -> Result<Outcome, InvocationError> {
        let site = || ctx.site();

        if !response.is_success() {
            let body = response.body.read_all().map_err(|e| InvocationError::Execution {
                site: site(),
                source: ExecutionError::Io(e),
            })?;
            tracing::debug!(call = %ctx.id, status = response.status, "non-success status");
            return Err(InvocationError::Failed {
                site: site(),
                source: InvocationFailed {
                    status: response.status,
                    headers: response.headers,
                    body,
                },
            });
        }

        let parser = self
            .parsers
            .resolve(&ctx.endpoint, &ctx.operation)
            .and_then(|parser| match parser {
                Some(p) => check_assignable(p.as_ref(), &ctx.operation.returns).map(|()| Some(p)),
                None => Ok(None),
            })
            .map_err(|source| InvocationError::Parser { site: site(), source })?;

        let captured = capture(&response.headers, write_back);

        let payload = match parser {
            None => {
                response.body.drain().map_err(|e| InvocationError::Execution {
                    site: site(),
                    source: ExecutionError::Io(e),
                })?;
                Payload::None
            }
            Some(parser) => {
                let bytes = response.body.read_all().map_err(|e| InvocationError::Execution {
                    site: site(),
                    source: ExecutionError::Io(e),
                })?;
                let content_type = response.headers.get("content-type");
                parser
                    .parse(&bytes, content_type)
                    .map_err(|e| InvocationError::Parser {
                        site: site(),
                        source: ParserError::Parse {
                            parser: parser.name().to_string(),
                            message: e.to_string(),
                        },
                    })?
            }
        };

        Ok(Outcome {
            status: response.status,
            headers: std::mem::take(&mut response.headers),
            payload,
            captured,
        })
    }
}

/// First non-empty value per registered name.
fn capture(headers: &Headers, write_back: &[String]) -> Headers {
    let mut captured = Headers::new();
    for name in write_back {
        if captured.contains(name) {
            continue;
        }
        if let Some(value) = headers.get_all(name).find(|v| !v.trim().is_empty()) {
            captured.push(name.as_str(), value);
        }
    }
    captured
}
