//! Module proxy path parsing
//!
//! Request paths have the shape `/{owner}/{module}/@v/{item}` or
//! `/{owner}/{module}/@latest`, where `{module}` may span several segments.
//! Upper-case letters travel in case-encoded form (`!x` for `X`) so that
//! paths stay unambiguous on case-insensitive file systems.

use modreg_core::{ModuleName, OwnerScope, VersionToken};

use crate::error::ApiError;

const VERSIONS_MARKER: &str = "/@v/";
const LATEST_SUFFIX: &str = "/@latest";
const LIST_ITEM: &str = "list";

/// A read operation of the module proxy protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRequest {
    /// `@v/list`
    List,
    /// `@v/{version}`, `@v/{version}.info` or `@latest`
    Info(VersionToken),
    /// `@v/{version}.descriptor` or `@v/{version}.mod`
    Descriptor(VersionToken),
    /// `@v/{version}.archive` or `@v/{version}.zip`
    Content(VersionToken),
}

/// Owner and module named by a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePath {
    pub owner: OwnerScope,
    pub module: ModuleName,
}

/// Decode the `!x` case encoding
///
/// Returns `None` for a dangling `!`, an escaped character that is not a
/// lower-case letter, or a literal upper-case letter.
pub fn decode_case(encoded: &str) -> Option<String> {
    let mut decoded = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();

    while let Some(c) = chars.next() {
        match c {
            '!' => match chars.next() {
                Some(next) if next.is_ascii_lowercase() => {
                    decoded.push(next.to_ascii_uppercase())
                }
                _ => return None,
            },
            c if c.is_ascii_uppercase() => return None,
            c => decoded.push(c),
        }
    }

    Some(decoded)
}

fn split_item(item: &str) -> Option<ProxyRequest> {
    if item == LIST_ITEM {
        return Some(ProxyRequest::List);
    }

    let (token, build): (&str, fn(VersionToken) -> ProxyRequest) =
        if let Some(token) = item.strip_suffix(".info") {
            (token, ProxyRequest::Info)
        } else if let Some(token) = item
            .strip_suffix(".descriptor")
            .or_else(|| item.strip_suffix(".mod"))
        {
            (token, ProxyRequest::Descriptor)
        } else if let Some(token) = item
            .strip_suffix(".archive")
            .or_else(|| item.strip_suffix(".zip"))
        {
            (token, ProxyRequest::Content)
        } else {
            (item, ProxyRequest::Info)
        };

    if token.is_empty() || token.contains('/') {
        return None;
    }

    let token = decode_case(token)?;
    Some(build(VersionToken::parse(&token)))
}

fn module_path(owner: &str, module: &str) -> Option<ModulePath> {
    let owner = OwnerScope::parse(decode_case(owner)?).ok()?;
    let module = ModuleName::parse(decode_case(module)?).ok()?;
    Some(ModulePath { owner, module })
}

/// Parse a read request path
///
/// Every malformed path is reported as not found.
pub fn parse_read_path(owner: &str, rest: &str) -> Result<(ModulePath, ProxyRequest), ApiError> {
    let not_found = || ApiError::not_found(format!("not found: /{}/{}", owner, rest));

    let (module, request) = if let Some(module) = rest.strip_suffix(LATEST_SUFFIX) {
        (module, ProxyRequest::Info(VersionToken::Latest))
    } else {
        let (module, item) = rest.split_once(VERSIONS_MARKER).ok_or_else(not_found)?;
        (module, split_item(item).ok_or_else(not_found)?)
    };

    let path = module_path(owner, module).ok_or_else(not_found)?;
    Ok((path, request))
}

/// Parse a publish request path
pub fn parse_publish_path(owner: &str, rest: &str) -> Result<ModulePath, ApiError> {
    let module = rest.trim_end_matches('/');
    module_path(owner, module)
        .ok_or_else(|| ApiError::bad_request(format!("invalid module path: /{}/{}", owner, rest)))
}
