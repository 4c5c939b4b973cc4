//! Descriptor resolution and validation.
//!
//! # Design
//! `resolve` turns a raw `EndpointDef` into an immutable `Endpoint`,
//! collecting every structural problem instead of stopping at the first, so
//! one error names every offending operation. `DescriptorCache` memoizes the
//! outcome per interface type: a definition is read and validated once, and
//! a failure is remembered and returned on every later attempt.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use url::Url;

use crate::cache::KeyedCache;
use crate::descriptor::{Endpoint, EndpointDef, EndpointInterface, EndpointTag, Operation, ResolvedTag};
use crate::error::{DescriptorError, DescriptorProblem};

pub fn resolve(def: EndpointDef) -> Result<Endpoint, DescriptorError> {
    let mut problems = Vec::new();

    let tag = match def.tag {
        Some(tag) => resolve_tag(tag, &mut problems),
        None => {
            problems.push(DescriptorProblem::MissingEndpointTag);
            None
        }
    };

    let mut seen = HashSet::new();
    let mut operations = Vec::with_capacity(def.operations.len());
    for op in def.operations {
        if !seen.insert(op.name.clone()) {
            problems.push(DescriptorProblem::DuplicateOperation(op.name.clone()));
            continue;
        }

        let mut roles = op.roles;
        roles.sort_by_key(|r| r.index);
        if roles.iter().enumerate().any(|(i, r)| r.index != i) {
            problems.push(DescriptorProblem::InvalidRoleIndex(op.name.clone()));
        }

        let Some(verb) = op.verb else {
            problems.push(DescriptorProblem::OperationMissingVerbTag(op.name.clone()));
            continue;
        };

        operations.push(Operation {
            endpoint: def.name.clone(),
            name: op.name,
            verb,
            path: op.path,
            parser: op.parser,
            custom_parser: op.custom_parser,
            asynchronous: op.asynchronous,
            stateful: op.stateful,
            headers: op.headers,
            query: op.query,
            roles,
            returns: op.returns,
        });
    }

    match tag {
        Some(tag) if problems.is_empty() => Ok(Endpoint::new(def.name, tag, operations)),
        _ => Err(DescriptorError {
            endpoint: def.name,
            problems,
        }),
    }
}

/// Resolve the host. A non-empty URL shorthand wins over the separate
/// scheme/host/port/root fields.
fn resolve_tag(tag: EndpointTag, problems: &mut Vec<DescriptorProblem>) -> Option<ResolvedTag> {
    let (scheme, host, port, root_path) = if tag.url.trim().is_empty() {
        (tag.scheme, tag.host.trim().to_string(), tag.port, tag.root_path)
    } else {
        match Url::parse(tag.url.trim()) {
            Ok(url) => (
                url.scheme().to_string(),
                url.host_str().unwrap_or_default().to_string(),
                url.port(),
                url.path().to_string(),
            ),
            Err(_) => {
                problems.push(DescriptorProblem::InvalidUrl(tag.url));
                return None;
            }
        }
    };

    if host.is_empty() {
        problems.push(DescriptorProblem::MissingHost);
        return None;
    }

    Some(ResolvedTag {
        scheme: if scheme.is_empty() { "http".to_string() } else { scheme },
        host,
        port,
        root_path,
        parser: tag.parser,
        custom_parser: tag.custom_parser,
        asynchronous: tag.asynchronous,
        stateful: tag.stateful,
        transport: tag.transport,
    })
}

/// Memoized resolution per interface type.
#[derive(Default)]
pub struct DescriptorCache {
    resolved: KeyedCache<TypeId, Result<Arc<Endpoint>, DescriptorError>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve<E: EndpointInterface>(&self) -> Result<Arc<Endpoint>, DescriptorError> {
        self.resolved.get_or_init(TypeId::of::<E>(), || {
            let def = E::definition();
            let name = def.name.clone();
            match resolve(def) {
                Ok(endpoint) => {
                    tracing::debug!(endpoint = %name, "resolved endpoint descriptor");
                    Ok(Arc::new(endpoint))
                }
                Err(e) => {
                    tracing::debug!(endpoint = %name, "endpoint descriptor rejected: {e}");
                    Err(e)
                }
            }
        })
    }
}
