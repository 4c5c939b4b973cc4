//! Request processor chain.
//!
//! # Design
//! The chain turns an `InvocationContext` into a `WireRequest` through an
//! ordered list of steps. Each step takes the builder by value and returns
//! it, or fails; a step with nothing to do returns the builder untouched.
//! A failure anywhere drops the builder, so nothing of a half-built request
//! survives, and no I/O has happened yet.
//!
//! Default order: URI assembly, placeholder substitution, query assembly,
//! header assembly, body assembly. Extra steps can be appended.

use url::form_urlencoded;
use url::Url;

use crate::args::Arg;
use crate::context::InvocationContext;
use crate::descriptor::RoleKind;
use crate::entity::{self, Entity};
use crate::error::RequestBuildError;
use crate::http::{Headers, WireRequest};

/// Where the body will come from once the chain has succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BodyPlan {
    #[default]
    None,
    /// Resolve the argument at this position.
    Arg(usize),
    /// Already form-urlencoded.
    Form(String),
}

/// Mutable state threaded through the steps.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    /// `scheme://host[:port]/root`, no trailing slash.
    pub base: String,
    /// Operation sub-path, starting with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: BodyPlan,
    /// Response headers to capture for the caller.
    pub write_back: Vec<String>,
}

/// A finished request plus the header names registered for write-back.
#[derive(Debug)]
pub struct PreparedRequest {
    pub request: WireRequest,
    pub write_back: Vec<String>,
}

pub trait RequestStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        ctx: &InvocationContext,
        builder: RequestBuilder,
    ) -> Result<RequestBuilder, RequestBuildError>;
}

pub struct RequestChain {
    steps: Vec<Box<dyn RequestStep>>,
}

impl Default for RequestChain {
    fn default() -> Self {
        Self {
            steps: vec![
                Box::new(UriStep),
                Box::new(PlaceholderStep),
                Box::new(QueryStep),
                Box::new(HeaderStep),
                Box::new(BodyStep),
            ],
        }
    }
}

impl RequestChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: impl RequestStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step, then materialize the request. Takes the body argument
    /// out of `ctx`.
    pub fn build(&self, ctx: &mut InvocationContext) -> Result<PreparedRequest, RequestBuildError> {
        let mut builder = RequestBuilder::default();
        for step in &self.steps {
            builder = step.apply(ctx, builder).map_err(|e| {
                tracing::debug!(step = step.name(), call = %ctx.id, "request step failed: {e}");
                e
            })?;
        }
        finish(ctx, builder)
    }
}

fn finish(ctx: &mut InvocationContext, builder: RequestBuilder) -> Result<PreparedRequest, RequestBuildError> {
    let RequestBuilder {
        base,
        path,
        query,
        mut headers,
        body,
        write_back,
    } = builder;

    let raw = format!("{base}{path}");
    let mut url = Url::parse(&raw).map_err(|_| RequestBuildError::InvalidUri(raw.clone()))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in &query {
            pairs.append_pair(name, value);
        }
    }

    let body = match body {
        BodyPlan::None => None,
        BodyPlan::Arg(index) => Some(entity::resolve(ctx.take_arg(index))?),
        BodyPlan::Form(encoded) => Some(Entity::form(encoded)),
    };
    if let Some(entity) = &body {
        if !headers.contains("content-type") {
            headers.push("Content-Type", entity.content_type());
        }
    }

    Ok(PreparedRequest {
        request: WireRequest {
            verb: ctx.operation.verb,
            uri: url.to_string(),
            headers,
            body,
        },
        write_back,
    })
}

/// Textual value of a role argument; `None` for `Null`.
fn text_arg(index: usize, arg: &Arg) -> Result<Option<String>, RequestBuildError> {
    if arg.is_null() {
        return Ok(None);
    }
    arg.stringify()
        .map(Some)
        .ok_or_else(|| RequestBuildError::ParamTypeError {
            index,
            expected: "a value with a textual form".to_string(),
            found: arg.type_name().to_string(),
        })
}

/// Endpoint root joined with the operation sub-path.
pub struct UriStep;

impl RequestStep for UriStep {
    fn name(&self) -> &'static str {
        "uri"
    }

    fn apply(&self, ctx: &InvocationContext, mut builder: RequestBuilder) -> Result<RequestBuilder, RequestBuildError> {
        builder.base = ctx.endpoint.base_url();
        let sub = ctx.operation.path.trim();
        builder.path = if sub.is_empty() {
            "/".to_string()
        } else if sub.starts_with('/') {
            sub.to_string()
        } else {
            format!("/{sub}")
        };
        Ok(builder)
    }
}

/// Fills `:name` tokens from path roles.
pub struct PlaceholderStep;

impl RequestStep for PlaceholderStep {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn apply(&self, ctx: &InvocationContext, mut builder: RequestBuilder) -> Result<RequestBuilder, RequestBuildError> {
        let mut values = Vec::new();
        for role in &ctx.operation.roles {
            if let RoleKind::PathParam(name) = &role.kind {
                if let Some(value) = text_arg(role.index, ctx.arg(role.index))? {
                    values.push((name.as_str(), value));
                }
            }
        }
        builder.path = substitute(&builder.path, |name| {
            values
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| encode_segment(v))
        })?;
        Ok(builder)
    }
}

/// Replace every `:name` token in the path part of `template`. The query
/// part, if the template carries one, is left alone.
fn substitute(
    template: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, RequestBuildError> {
    let (path, rest) = match template.find('?') {
        Some(i) => template.split_at(i),
        None => (template, ""),
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = path.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != ':' {
            out.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while let Some(&(j, n)) = chars.peek() {
            if n.is_ascii_alphanumeric() || n == '_' {
                end = j + n.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        if end == start {
            out.push(':');
            continue;
        }
        let name = &path[start..end];
        let value = lookup(name).ok_or_else(|| RequestBuildError::UnresolvedPlaceholder(name.to_string()))?;
        out.push_str(&value);
    }
    out.push_str(rest);
    Ok(out)
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Static query parameters, then query roles in declaration order.
pub struct QueryStep;

impl RequestStep for QueryStep {
    fn name(&self) -> &'static str {
        "query"
    }

    fn apply(&self, ctx: &InvocationContext, mut builder: RequestBuilder) -> Result<RequestBuilder, RequestBuildError> {
        builder.query.extend(ctx.operation.query.iter().cloned());
        for role in &ctx.operation.roles {
            if let RoleKind::QueryParam(name) = &role.kind {
                if let Some(value) = text_arg(role.index, ctx.arg(role.index))? {
                    builder.query.push((name.clone(), value));
                }
            }
        }
        Ok(builder)
    }
}

/// Static headers, then header roles; header roles register for write-back.
pub struct HeaderStep;

impl RequestStep for HeaderStep {
    fn name(&self) -> &'static str {
        "header"
    }

    fn apply(&self, ctx: &InvocationContext, mut builder: RequestBuilder) -> Result<RequestBuilder, RequestBuildError> {
        for (name, value) in &ctx.operation.headers {
            builder.headers.push(name.as_str(), value.as_str());
        }
        for role in &ctx.operation.roles {
            if let RoleKind::HeaderOut(name) = &role.kind {
                if let Some(value) = text_arg(role.index, ctx.arg(role.index))? {
                    builder.headers.push(name.as_str(), value);
                }
                builder.write_back.push(name.clone());
            }
        }
        Ok(builder)
    }
}

/// Form or single-entity body, for verbs that carry one.
pub struct BodyStep;

impl RequestStep for BodyStep {
    fn name(&self) -> &'static str {
        "body"
    }

    fn apply(&self, ctx: &InvocationContext, mut builder: RequestBuilder) -> Result<RequestBuilder, RequestBuildError> {
        let op = &ctx.operation;
        if !op.verb.has_body() {
            return Ok(builder);
        }

        let forms: Vec<_> = op
            .roles
            .iter()
            .filter_map(|r| match &r.kind {
                RoleKind::FormParam(name) => Some((r.index, name)),
                _ => None,
            })
            .collect();
        let bodies: Vec<usize> = op
            .roles
            .iter()
            .filter(|r| r.kind == RoleKind::Body)
            .map(|r| r.index)
            .collect();

        builder.body = match (forms.is_empty(), bodies.as_slice()) {
            (false, []) => {
                let mut form = form_urlencoded::Serializer::new(String::new());
                for (index, name) in forms {
                    if let Some(value) = text_arg(index, ctx.arg(index))? {
                        form.append_pair(name, &value);
                    }
                }
                BodyPlan::Form(form.finish())
            }
            (true, []) => return Err(RequestBuildError::MissingEntity),
            (true, [index]) => {
                entity::classify(ctx.arg(*index))?;
                BodyPlan::Arg(*index)
            }
            _ => return Err(RequestBuildError::MultipleEntity),
        };
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EndpointDef, EndpointTag, OperationDef, Role};
    use crate::http::Verb;
    use crate::validator::resolve;
    use std::any::TypeId;
    use std::sync::Arc;

    fn ctx(op: OperationDef, args: Vec<Arg>) -> InvocationContext {
        let name = op.name.clone();
        let ep = Arc::new(
            resolve(
                EndpointDef::new("Api")
                    .tag(EndpointTag::host("localhost").with_port(3000))
                    .operation(op),
            )
            .unwrap(),
        );
        let op = Arc::clone(ep.operation(&name).unwrap());
        InvocationContext::new(TypeId::of::<u8>(), ep, op, args).unwrap()
    }

    fn build(op: OperationDef, args: Vec<Arg>) -> Result<PreparedRequest, RequestBuildError> {
        RequestChain::new().build(&mut ctx(op, args))
    }

    #[test]
    fn placeholders_are_filled() {
        let op = OperationDef::get("pair", "/users/:id/:id2")
            .role(Role::path(0, "id"))
            .role(Role::path(1, "id2"));
        let req = build(op, vec!["7".into(), "9".into()]).unwrap().request;
        assert_eq!(req.uri, "http://localhost:3000/users/7/9");
        assert_eq!(req.verb, Verb::Get);
        assert!(req.body.is_none());
    }

    #[test]
    fn prefix_placeholders_do_not_collide() {
        let op = OperationDef::get("pair", "/a/:id2/:id")
            .role(Role::path(0, "id"))
            .role(Role::path(1, "id2"));
        let req = build(op, vec!["1".into(), "2".into()]).unwrap().request;
        assert_eq!(req.uri, "http://localhost:3000/a/2/1");
    }

    #[test]
    fn missing_placeholder_fails() {
        let op = OperationDef::get("pair", "/users/:id/:id2").role(Role::path(0, "id"));
        let err = build(op, vec!["7".into()]).unwrap_err();
        assert_eq!(err, RequestBuildError::UnresolvedPlaceholder("id2".to_string()));
    }

    #[test]
    fn null_placeholder_is_unresolved() {
        let op = OperationDef::get("one", "/users/:id").role(Role::path(0, "id"));
        let err = build(op, vec![Arg::Null]).unwrap_err();
        assert_eq!(err, RequestBuildError::UnresolvedPlaceholder("id".to_string()));
    }

    #[test]
    fn placeholder_values_are_encoded() {
        let op = OperationDef::get("one", "/files/:name").role(Role::path(0, "name"));
        let req = build(op, vec!["a b/c".into()]).unwrap().request;
        assert_eq!(req.uri, "http://localhost:3000/files/a%20b%2Fc");
    }

    #[test]
    fn static_then_dynamic_query_in_order() {
        let op = OperationDef::get("find", "/q")
            .query("a", "1")
            .role(Role::query(0, "firstName"))
            .role(Role::query(1, "lastName"));
        let req = build(op, vec!["Doctor".into(), "Who".into()]).unwrap().request;
        assert_eq!(req.uri, "http://localhost:3000/q?a=1&firstName=Doctor&lastName=Who");
    }

    #[test]
    fn null_query_args_are_omitted() {
        let op = OperationDef::get("find", "/q").role(Role::query(0, "x"));
        let req = build(op, vec![Arg::Null]).unwrap().request;
        assert_eq!(req.uri, "http://localhost:3000/q");
    }

    #[test]
    fn structured_query_args_fail() {
        let op = OperationDef::get("find", "/q").role(Role::query(0, "filter"));
        let err = build(op, vec![Arg::Json(serde_json::json!({"a": 1}))]).unwrap_err();
        assert!(matches!(err, RequestBuildError::ParamTypeError { index: 0, .. }));
    }

    #[test]
    fn headers_register_write_back() {
        let op = OperationDef::get("h", "/h")
            .header("Accept", "application/json")
            .role(Role::header(0, "X-Token"))
            .role(Role::header(1, "Set-Cookie"));
        let prepared = build(op, vec!["abc".into(), Arg::Null]).unwrap();
        let headers = prepared.request.headers;
        assert_eq!(headers.get("accept"), Some("application/json"));
        assert_eq!(headers.get("x-token"), Some("abc"));
        assert!(!headers.contains("set-cookie"));
        assert_eq!(prepared.write_back, vec!["X-Token".to_string(), "Set-Cookie".to_string()]);
    }

    #[test]
    fn two_bodies_fail() {
        let op = OperationDef::post("create", "/users")
            .role(Role::body(0))
            .role(Role::body(1));
        let err = build(op, vec!["a".into(), "b".into()]).unwrap_err();
        assert_eq!(err, RequestBuildError::MultipleEntity);
    }

    #[test]
    fn no_body_fails() {
        let err = build(OperationDef::post("create", "/users"), vec![]).unwrap_err();
        assert_eq!(err, RequestBuildError::MissingEntity);
    }

    #[test]
    fn form_and_body_together_fail() {
        let op = OperationDef::post("create", "/users")
            .role(Role::form(0, "a"))
            .role(Role::body(1));
        let err = build(op, vec!["x".into(), "y".into()]).unwrap_err();
        assert_eq!(err, RequestBuildError::MultipleEntity);
    }

    #[test]
    fn form_params_become_urlencoded_body() {
        let op = OperationDef::post("login", "/form")
            .role(Role::form(0, "user"))
            .role(Role::form(1, "note"));
        let req = build(op, vec!["amy pond".into(), "a&b".into()]).unwrap().request;
        let body = req.body.unwrap();
        assert_eq!(body.content_type(), entity::FORM_URLENCODED);
        assert_eq!(body.as_bytes().unwrap(), b"user=amy+pond&note=a%26b");
        assert_eq!(req.headers.get("content-type"), Some(entity::FORM_URLENCODED));
    }

    #[test]
    fn json_body_is_resolved() {
        let op = OperationDef::put("update", "/users/:id")
            .role(Role::path(0, "id"))
            .role(Role::body(1));
        let mut context = ctx(op, vec!["7".into(), Arg::Json(serde_json::json!({"name": "Rory"}))]);
        let req = RequestChain::new().build(&mut context).unwrap().request;
        assert_eq!(req.headers.get("content-type"), Some(entity::APPLICATION_JSON));
        assert!(context.arg(1).is_null(), "body argument is taken");
    }

    #[test]
    fn unresolvable_body_fails_before_taking_it() {
        let op = OperationDef::post("create", "/users").role(Role::body(0).typed(crate::args::ArgType::Any));
        let err = build(op, vec![Arg::opaque::<std::time::Instant>()]).unwrap_err();
        assert!(matches!(err, RequestBuildError::EntityResolutionFailed { .. }));
    }

    #[test]
    fn bodyless_verbs_ignore_body_roles() {
        let op = OperationDef::delete("remove", "/users").role(Role::body(0));
        let req = build(op, vec!["ignored".into()]).unwrap().request;
        assert!(req.body.is_none());
    }

    #[test]
    fn static_content_type_is_kept() {
        let op = OperationDef::post("raw", "/raw")
            .header("Content-Type", "application/vnd.custom")
            .role(Role::body(0));
        let req = build(op, vec![Arg::Bytes(vec![1, 2, 3])]).unwrap().request;
        assert_eq!(req.headers.get_all("content-type").count(), 1);
        assert_eq!(req.headers.get("content-type"), Some("application/vnd.custom"));
    }

    struct Stamp;

    impl RequestStep for Stamp {
        fn name(&self) -> &'static str {
            "stamp"
        }

        fn apply(&self, _: &InvocationContext, mut builder: RequestBuilder) -> Result<RequestBuilder, RequestBuildError> {
            builder.headers.push("X-Stamp", "1");
            Ok(builder)
        }
    }

    #[test]
    fn custom_steps_run_after_defaults() {
        let chain = RequestChain::new().with_step(Stamp);
        assert_eq!(chain.step_names(), vec!["uri", "placeholder", "query", "header", "body", "stamp"]);
        let mut context = ctx(OperationDef::get("a", "/a"), vec![]);
        let req = chain.build(&mut context).unwrap().request;
        assert_eq!(req.headers.get("x-stamp"), Some("1"));
    }
}
