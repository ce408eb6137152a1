use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use tracing::warn;

use crate::error::GatewayError;
use crate::util::{contains_shell_metacharacter, sha256_hex, truncate_chars};

pub const MAX_PARAM_KEY_LEN: usize = 100;
pub const MAX_PARAM_VALUE_LEN: usize = 1000;
pub const MAX_EXTRA_ARGS: usize = 20;
pub const MAX_EXTRA_ARG_LEN: usize = 100;

/// Reserved query key carrying extra CLI arguments instead of an env var.
pub const ARGS_KEY: &str = "args";

/// Well-known query keys with a fixed environment spelling. Anything else is
/// transliterated.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("apiKey", "API_KEY"),
    ("accessToken", "ACCESS_TOKEN"),
    ("anthropicApiKey", "ANTHROPIC_API_KEY"),
    ("baseUrl", "BASE_URL"),
    ("databaseUrl", "DATABASE_URL"),
    ("githubToken", "GITHUB_TOKEN"),
    ("openaiApiKey", "OPENAI_API_KEY"),
    ("token", "TOKEN"),
];

/// Enforce key length caps. Oversize values are tolerated here and truncated
/// at projection time.
pub fn validate_params(params: &BTreeMap<String, String>) -> Result<(), GatewayError> {
    for key in params.keys() {
        if key.chars().count() > MAX_PARAM_KEY_LEN {
            return Err(GatewayError::InvalidParams(format!(
                "query parameter key too long (max {MAX_PARAM_KEY_LEN} chars)"
            )));
        }
    }
    Ok(())
}

/// Project non-reserved query parameters onto child environment variables.
/// Keys that cannot be sanitized are dropped, not failed.
pub fn project_environment(params: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut env = Vec::new();
    for (key, value) in params {
        if key == ARGS_KEY {
            continue;
        }
        let Some(env_key) = env_key_for(key) else {
            warn!(key = %key, "dropping query parameter with unsanitizable key");
            continue;
        };
        let value = truncate_chars(value, MAX_PARAM_VALUE_LEN);
        let scrubbed: String = value
            .chars()
            .filter(|c| !crate::util::SHELL_METACHARACTERS.contains(c))
            .collect();
        env.push((env_key, scrubbed));
    }
    env
}

fn env_key_for(key: &str) -> Option<String> {
    if let Some((_, alias)) = ENV_ALIASES.iter().find(|(k, _)| *k == key) {
        return Some((*alias).to_string());
    }

    let transliterated: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect::<String>()
        .to_ascii_uppercase();

    match transliterated.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => Some(transliterated),
        _ => None,
    }
}

/// Split the reserved `args` value into extra CLI argv tokens.
pub fn build_extra_args(raw: &str) -> Result<Vec<String>, GatewayError> {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();

    if contains_shell_metacharacter(&decoded) {
        return Err(GatewayError::InvalidParams(
            "dangerous characters in args".to_string(),
        ));
    }

    Ok(decoded
        .split(' ')
        .filter(|t| !t.is_empty())
        .take(MAX_EXTRA_ARGS)
        .map(|t| truncate_chars(t, MAX_EXTRA_ARG_LEN).to_string())
        .collect())
}

/// Stable 8-character digest of the params map, sorted by key.
pub fn params_fingerprint(params: &BTreeMap<String, String>) -> String {
    let canonical = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut digest = sha256_hex(canonical.as_bytes());
    digest.truncate(8);
    digest
}

/// Registry key for a child: identical `(pkg, params)` pairs share a child.
pub fn server_id(pkg: &str, params: &BTreeMap<String, String>) -> String {
    format!("{pkg}_{}", params_fingerprint(params))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn oversize_key_is_rejected() {
        let params = map(&[(&"k".repeat(101), "v")]);
        assert!(validate_params(&params).is_err());

        let params = map(&[(&"k".repeat(100), "v")]);
        assert!(validate_params(&params).is_ok());
    }

    #[test]
    fn oversize_value_is_truncated_not_rejected() {
        let long = "v".repeat(1001);
        let params = map(&[("key", long.as_str())]);
        assert!(validate_params(&params).is_ok());

        let env = project_environment(&params);
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].1.chars().count(), 1000);
    }

    #[test]
    fn alias_table_wins_over_transliteration() {
        let env = project_environment(&map(&[("openaiApiKey", "sk-x")]));
        assert_eq!(env, vec![("OPENAI_API_KEY".to_string(), "sk-x".to_string())]);

        let env = project_environment(&map(&[("apiKey", "k")]));
        assert_eq!(env[0].0, "API_KEY");
    }

    #[test]
    fn unknown_keys_are_transliterated() {
        let env = project_environment(&map(&[("my-custom.key", "v")]));
        assert_eq!(env[0].0, "MY_CUSTOM_KEY");
    }

    #[test]
    fn keys_not_starting_with_letter_or_underscore_are_dropped() {
        let env = project_environment(&map(&[("9lives", "v"), ("ok", "v")]));
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].0, "OK");
    }

    #[test]
    fn args_key_is_reserved() {
        let env = project_environment(&map(&[("args", "--verbose"), ("key", "v")]));
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].0, "KEY");
    }

    #[test]
    fn values_are_scrubbed_of_metacharacters() {
        let env = project_environment(&map(&[("key", "a;b`c$d")]));
        assert_eq!(env[0].1, "abcd");
    }

    #[test]
    fn extra_args_decode_split_and_cap() {
        let args = build_extra_args("--flag%20one two").unwrap();
        assert_eq!(args, vec!["--flag", "one", "two"]);

        // Empty tokens from repeated spaces disappear.
        let args = build_extra_args("a  b").unwrap();
        assert_eq!(args, vec!["a", "b"]);

        // More than 20 tokens are truncated to 20.
        let many = (0..25).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        assert_eq!(build_extra_args(&many).unwrap().len(), MAX_EXTRA_ARGS);

        // Tokens longer than 100 chars are truncated to 100.
        let long = "x".repeat(150);
        let args = build_extra_args(&long).unwrap();
        assert_eq!(args[0].chars().count(), MAX_EXTRA_ARG_LEN);
    }

    #[test]
    fn extra_args_reject_metacharacters() {
        for bad in ["a;b", "a|b", "$(cmd)", "a>b", "a'b"] {
            assert!(build_extra_args(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn server_id_is_stable_and_param_sensitive() {
        let a = map(&[("k", "v"), ("z", "1")]);
        let b = map(&[("z", "1"), ("k", "v")]);
        assert_eq!(server_id("pkg", &a), server_id("pkg", &b));
        assert_eq!(server_id("pkg", &a).len(), "pkg".len() + 1 + 8);

        let c = map(&[("k", "other")]);
        assert_ne!(server_id("pkg", &a), server_id("pkg", &c));
    }
}
