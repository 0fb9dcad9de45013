// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Dependency atom parsing and classification.
//!
//! An atom is either a plain package name (`foo`), a constrained name
//! (`foo>=1.2`), or a non-runtime capability (`virtual:...`, `so:...`) that
//! names its concrete provider after a `!`.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use strum_macros::{AsRefStr, Display};
use version::Version;

use crate::error::BuildError;

/// Prefixes marking an atom as something other than a plain package.
pub const NON_RUNTIME_PREFIXES: &[&str] =
    &["so:", "pc:", "cmd:", "alt:", "virtual:", "soname:"];

/// Regular expression matching a valid package name.
static PACKAGE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_+.-]+$").unwrap());

/// A version comparison operator in a dependency constraint.
#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum VersionOp {
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "<=")]
    LessOrEqual,
    #[strum(serialize = ">=")]
    GreaterOrEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = "~")]
    Fuzzy,
}

impl VersionOp {
    /// Greedily matches an operator at the start of `input`.
    fn strip(input: &str) -> Option<(VersionOp, &str)> {
        for op in [
            VersionOp::LessOrEqual,
            VersionOp::GreaterOrEqual,
            VersionOp::Equal,
            VersionOp::Less,
            VersionOp::Greater,
            VersionOp::Fuzzy,
        ] {
            if let Some(rest) = input.strip_prefix(op.as_ref()) {
                return Some((op, rest));
            }
        }
        None
    }
}

/// A parsed `name[op]version` dependency atom.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageAtom {
    pub name: String,
    pub constraint: Option<(VersionOp, String)>,
}

/// Splits a dependency specification into name, operator and version.
///
/// A specification without an operator yields a bare name. Either both the
/// operator and the version are present or both are absent.
pub fn split_atom(spec: &str) -> Result<PackageAtom> {
    let (name, constraint) = match spec.find(|c| matches!(c, '<' | '>' | '=' | '~')) {
        Some(at) => {
            let (op, rest) = VersionOp::strip(&spec[at..])
                .ok_or_else(|| BuildError::config(format!("invalid dependency atom: {spec}")))?;
            if rest.is_empty() {
                return Err(
                    BuildError::config(format!("dependency atom {spec:?} has no version")).into(),
                );
            }
            (&spec[..at], Some((op, rest.to_string())))
        }
        None => (spec, None),
    };

    if !PACKAGE_NAME_RE.is_match(name) {
        return Err(BuildError::config(format!("invalid package name in atom: {spec}")).into());
    }

    Ok(PackageAtom {
        name: name.to_string(),
        constraint,
    })
}

/// Splits a `name-version` token at the last `-` that precedes a version.
///
/// A version token starts with a digit, so the split point is the last `-`
/// followed by one.
pub fn split_namever(token: &str) -> Option<(&str, &str)> {
    let bytes = token.as_bytes();
    (1..bytes.len().saturating_sub(1))
        .rev()
        .find(|&i| bytes[i] == b'-' && bytes[i + 1].is_ascii_digit())
        .map(|i| (&token[..i], &token[i + 1..]))
}

/// Checks whether a `name-version` token satisfies a constraint pattern.
///
/// The token name must match exactly and the version must satisfy the
/// pattern's operator under the distribution's version ordering. Tokens or
/// patterns that do not parse never match.
pub fn pkg_match(token: &str, pattern: &str) -> bool {
    let Ok(atom) = split_atom(pattern) else {
        return false;
    };
    let Some((name, ver)) = split_namever(token) else {
        return false;
    };
    if name != atom.name {
        return false;
    }
    let Some((op, reqver)) = &atom.constraint else {
        return true;
    };
    let (Ok(ver), Ok(reqver)) = (Version::try_new(ver), Version::try_new(reqver)) else {
        return false;
    };
    match op {
        VersionOp::Equal => ver == reqver,
        VersionOp::Less => ver < reqver,
        VersionOp::LessOrEqual => ver <= reqver,
        VersionOp::Greater => ver > reqver,
        VersionOp::GreaterOrEqual => ver >= reqver,
        VersionOp::Fuzzy => ver.fuzzy_matches(&reqver),
    }
}

/// Whether the atom names a plain package rather than a capability.
pub fn is_runtime(spec: &str) -> bool {
    !NON_RUNTIME_PREFIXES
        .iter()
        .any(|prefix| spec.starts_with(prefix))
}

/// Rewrites a non-runtime atom to the provider it names after `!`.
///
/// `alt:` atoms resolve to the distribution's default alternative package;
/// everything else resolves to the literal provider. An atom without a
/// provider is a configuration error.
pub fn resolve_virtual(spec: &str) -> Result<String> {
    let Some(at) = spec.find('!') else {
        return Err(BuildError::config_with_hint(
            format!("virtual dependency '{spec}' has no specified provider"),
            "specify a provider by appending '!provider'",
        )
        .into());
    };
    if let Some(rest) = spec.strip_prefix("alt:") {
        // alt:NAME!CHOICE installs the package wiring CHOICE up as the
        // default alternative for NAME.
        let (name, choice) = (&rest[..at - 4], &spec[at + 1..]);
        Ok(format!("{name}-{choice}-default"))
    } else {
        Ok(spec[at + 1..].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn atom(name: &str, constraint: Option<(VersionOp, &str)>) -> PackageAtom {
        PackageAtom {
            name: name.to_string(),
            constraint: constraint.map(|(op, v)| (op, v.to_string())),
        }
    }

    #[test]
    fn split_atom_round_trips() -> Result<()> {
        assert_eq!(split_atom("foo")?, atom("foo", None));
        assert_eq!(
            split_atom("foo=1.0-r0")?,
            atom("foo", Some((VersionOp::Equal, "1.0-r0")))
        );
        assert_eq!(
            split_atom("foo>=1.2")?,
            atom("foo", Some((VersionOp::GreaterOrEqual, "1.2")))
        );
        assert_eq!(
            split_atom("foo<=2")?,
            atom("foo", Some((VersionOp::LessOrEqual, "2")))
        );
        assert_eq!(
            split_atom("foo~24")?,
            atom("foo", Some((VersionOp::Fuzzy, "24")))
        );
        assert_eq!(
            split_atom("libX11-devel>1")?,
            atom("libX11-devel", Some((VersionOp::Greater, "1")))
        );
        Ok(())
    }

    #[test]
    fn split_atom_rejects_garbage() {
        assert!(split_atom("foo>=").is_err());
        assert!(split_atom("=1.0").is_err());
        assert!(split_atom("virtual:x!y=1").is_err());
    }

    #[test]
    fn split_namever_cases() {
        assert_eq!(split_namever("foo-1.0-r0"), Some(("foo", "1.0-r0")));
        assert_eq!(split_namever("foo-2fa-1.0"), Some(("foo-2fa", "1.0")));
        assert_eq!(
            split_namever("xserver-xlibre-25.0.0.4-r1"),
            Some(("xserver-xlibre", "25.0.0.4-r1"))
        );
        assert_eq!(split_namever("noversion"), None);
        assert_eq!(split_namever("trailing-"), None);
    }

    #[test]
    fn pkg_match_operators() {
        assert!(pkg_match("foo-1.0-r0", "foo=1.0-r0"));
        assert!(!pkg_match("foo-1.0-r0", "foo=1.0-r1"));
        assert!(pkg_match("foo-1.2", "foo>=1.0"));
        assert!(pkg_match("foo-0.9", "foo<1.0"));
        assert!(pkg_match("foo-24.1.2", "foo~24"));
        assert!(!pkg_match("foo-25.0", "foo~24"));
        assert!(!pkg_match("bar-1.0", "foo=1.0"));
        assert!(!pkg_match("foo", "foo=1.0"));
        assert!(pkg_match("foo-1.0_rc1", "foo<1.0"));
    }

    #[test]
    fn classifier_matches_reserved_prefixes() {
        assert!(is_runtime("foo"));
        assert!(is_runtime("foo-devel>=1.0"));
        for spec in [
            "so:libX11.so.6",
            "pc:x11",
            "cmd:sh",
            "alt:awk!gawk",
            "virtual:xserver-abi-input~24!xserver-xlibre-core",
            "soname:libfoo",
        ] {
            assert!(!is_runtime(spec), "{spec} misclassified as runtime");
        }
    }

    #[test]
    fn virtual_provider_resolution() -> Result<()> {
        assert_eq!(
            resolve_virtual("virtual:xserver-abi-input~24!xserver-xlibre-core")?,
            "xserver-xlibre-core"
        );
        assert_eq!(resolve_virtual("alt:awk!gawk")?, "awk-gawk-default");
        assert_eq!(resolve_virtual("cmd:sh!bash")?, "bash");
        Ok(())
    }

    #[test]
    fn virtual_without_provider_is_config_error() {
        let err = resolve_virtual("virtual:xserver-abi-input~24").unwrap_err();
        let err = err.downcast_ref::<BuildError>().unwrap();
        match err {
            BuildError::Config { message, hint } => {
                assert_eq!(
                    message,
                    "virtual dependency 'virtual:xserver-abi-input~24' has no specified provider"
                );
                assert_eq!(
                    hint.as_deref(),
                    Some("specify a provider by appending '!provider'")
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
