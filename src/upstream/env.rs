//! Tier-based environment builder for spawned upstream children.
//!
//! A pure function of an upstream's `env` overrides, its and the proxy's
//! `inherit` policies, and a snapshot of the parent process's environment.
//! No panics, no runtime errors — policy validation (valid `mode` strings)
//! happens at config-load time in [`crate::config`].

use std::collections::{HashMap, HashSet};

use crate::config::{InheritMode, InheritPolicy, UpstreamSpec};

/// Blocked by default regardless of inherit mode (httpoxy mitigation).
const IMPLICIT_DENYLIST: [&str; 6] = [
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "http_proxy",
    "https_proxy",
    "NO_PROXY",
    "no_proxy",
];

/// Baseline variables seeded under every inherit mode.
const TIER1: [&str; 10] = [
    "PATH", "HOME", "USER", "SHELL", "LANG", "LC_ALL", "TZ", "TMPDIR", "TEMP", "TMP",
];

/// TLS/CA bundle variables seeded under `tier1+tier2` / `all`.
const TIER2: [&str; 5] = [
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "REQUESTS_CA_BUNDLE",
    "CURL_CA_BUNDLE",
    "NODE_EXTRA_CA_CERTS",
];

/// Normalizes a variable name for set-membership comparisons under the
/// host-OS case policy. POSIX is case-sensitive; Windows compares
/// case-insensitively by upper-casing for comparison while the output
/// below always preserves the caller's original casing.
fn normalize(name: &str) -> String {
    if cfg!(windows) {
        name.to_ascii_uppercase()
    } else {
        name.to_string()
    }
}

fn insert_if_absent(
    result: &mut Vec<(String, String)>,
    seen: &mut HashSet<String>,
    name: &str,
    value: String,
) {
    let key = normalize(name);
    if seen.insert(key) {
        result.push((name.to_string(), value));
    }
}

/// Computes the child environment for one upstream spec.
///
/// Deterministic in its inputs: the same `spec`, `proxy_inherit`, and
/// `parent` snapshot always produce the same set of `(name, value)` pairs,
/// modulo the order of entries contributed by `prefix` matching (the
/// parent snapshot's own iteration order is not guaranteed).
#[must_use]
pub fn build_env(
    spec: &UpstreamSpec,
    proxy_inherit: &InheritPolicy,
    parent: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let spec_inherit = spec.inherit.as_ref();

    // Step 1: build the deny set.
    let mut deny: HashSet<String> = IMPLICIT_DENYLIST.iter().map(|n| normalize(n)).collect();
    if let Some(policy) = spec_inherit {
        deny.extend(policy.deny.iter().map(|n| normalize(n)));
    }
    deny.extend(proxy_inherit.deny.iter().map(|n| normalize(n)));

    let include_tier2 = spec_inherit.is_some_and(|p| p.mode == InheritMode::Tier1AndTier2)
        || proxy_inherit.mode == InheritMode::Tier1AndTier2;

    let mut result: Vec<(String, String)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    // Step 2: seed Tier 1.
    for name in TIER1 {
        if deny.contains(&normalize(name)) {
            continue;
        }
        if let Some(value) = parent.get(name) {
            insert_if_absent(&mut result, &mut seen, name, value.clone());
        }
    }

    // Step 3: seed Tier 2 if selected.
    if include_tier2 {
        for name in TIER2 {
            if deny.contains(&normalize(name)) {
                continue;
            }
            if let Some(value) = parent.get(name) {
                insert_if_absent(&mut result, &mut seen, name, value.clone());
            }
        }
    }

    // Step 4: extra names, server level then proxy level.
    if let Some(policy) = spec_inherit {
        add_extra(&mut result, &mut seen, &policy.extra, policy.allow_denied_if_explicit, &deny, parent);
    }
    add_extra(
        &mut result,
        &mut seen,
        &proxy_inherit.extra,
        proxy_inherit.allow_denied_if_explicit,
        &deny,
        parent,
    );

    // Step 5: prefix matches, server level then proxy level.
    let mut prefixes: Vec<&str> = Vec::new();
    if let Some(policy) = spec_inherit {
        prefixes.extend(policy.prefix.iter().map(String::as_str));
    }
    prefixes.extend(proxy_inherit.prefix.iter().map(String::as_str));

    if !prefixes.is_empty() {
        for (key, value) in parent {
            if prefixes.iter().any(|pfx| key.starts_with(pfx)) && !deny.contains(&normalize(key)) {
                insert_if_absent(&mut result, &mut seen, key, value.clone());
            }
        }
    }

    // Step 6: overlay spec env unconditionally, bypassing all deny rules.
    for (key, value) in &spec.env {
        let key_norm = normalize(key);
        result.retain(|(existing, _)| normalize(existing) != key_norm);
        result.push((key.clone(), value.clone()));
        seen.insert(key_norm);
    }

    result
}

fn add_extra(
    result: &mut Vec<(String, String)>,
    seen: &mut HashSet<String>,
    names: &[String],
    allow_denied_if_explicit: bool,
    deny: &HashSet<String>,
    parent: &HashMap<String, String>,
) {
    for name in names {
        let Some(value) = parent.get(name.as_str()) else {
            continue;
        };
        let denied = deny.contains(&normalize(name));
        if denied && !allow_denied_if_explicit {
            continue;
        }
        insert_if_absent(result, seen, name, value.clone());
    }
}
