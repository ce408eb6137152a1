use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, NameError};
use crate::util::contains_shell_metacharacter;

pub const MAX_PACKAGE_NAME_LEN: usize = 200;

/// Package ecosystems the gateway can spawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Node,
    Python,
}

impl Ecosystem {
    pub fn as_str(self) -> &'static str {
        match self {
            Ecosystem::Node => "node",
            Ecosystem::Python => "python",
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `@scope/name@version` decomposed. `version` defaults to `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPackage {
    pub full_name: String,
    pub scope: Option<String>,
    pub name: String,
    pub version: String,
}

impl ParsedPackage {
    pub fn is_pinned(&self) -> bool {
        self.version != "latest"
    }
}

/// True when an identifier is a remote endpoint in disguise. Such inputs get
/// a dedicated error before any format validation runs.
pub fn is_remote_url(raw: &str) -> bool {
    let lowered = raw.trim().to_ascii_lowercase();
    lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || lowered.starts_with("ws://")
        || lowered.starts_with("wss://")
        || lowered.ends_with("/sse")
        || lowered.ends_with("/stdio")
        || lowered.contains("mcp-remote")
        || lowered.contains("supergateway")
}

/// Validate a package identifier and return it in canonical form (which is
/// the input itself — acceptance never rewrites).
pub fn validate_package_identifier(raw: &str) -> Result<&str, GatewayError> {
    let reject = |reason| Err(GatewayError::InvalidPackageName { reason });

    if raw.is_empty() {
        return reject(NameError::Empty);
    }
    if raw.chars().count() > MAX_PACKAGE_NAME_LEN {
        return reject(NameError::TooLong);
    }
    if raw.contains("..") || raw.contains("/./") || raw.contains('\\') {
        return reject(NameError::PathTraversal);
    }
    if contains_shell_metacharacter(raw) {
        return reject(NameError::ShellMetacharacters);
    }

    let (base, version) = split_version(raw);
    if let Some(v) = version
        && v.is_empty()
    {
        return reject(NameError::InvalidFormat);
    }

    // `@scope/name` or bare `name`.
    let name_part = if let Some(rest) = base.strip_prefix('@') {
        let Some((scope, name)) = rest.split_once('/') else {
            return reject(NameError::InvalidFormat);
        };
        if !is_valid_segment(scope) {
            return reject(NameError::InvalidFormat);
        }
        name
    } else {
        base
    };

    if name_part.contains('/') || !is_valid_segment(name_part) {
        return reject(NameError::InvalidFormat);
    }

    Ok(raw)
}

/// Decompose a canonical identifier. Call after `validate_package_identifier`.
pub fn parse_package(canonical: &str) -> ParsedPackage {
    let (base, version) = split_version(canonical);
    let scope = base
        .strip_prefix('@')
        .and_then(|rest| rest.split_once('/'))
        .map(|(scope, _)| scope.to_string());
    let name = match base.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None => base.to_string(),
    };

    ParsedPackage {
        full_name: base.to_string(),
        scope,
        name,
        version: version.unwrap_or("latest").to_string(),
    }
}

/// The version is the substring after the last `@` that is not at position 0.
fn split_version(raw: &str) -> (&str, Option<&str>) {
    match raw.rfind('@') {
        Some(idx) if idx > 0 => (&raw[..idx], Some(&raw[idx + 1..])),
        _ => (raw, None),
    }
}

fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_lowercase() || first.is_ascii_digit() || first == '~') {
        return false;
    }
    chars.all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '~' | '-')
    })
}
