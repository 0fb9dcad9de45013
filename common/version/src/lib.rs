// Copyright 2026 The Tbuild Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Package version ordering for the distribution.
//!
//! A version is a dotted sequence of numeric components, optionally followed
//! by a single lowercase letter, any number of `_alpha`/`_beta`/`_pre`/`_rc`/
//! `_p` suffixes (each with an optional number), and a trailing `-rN`
//! revision. Pre-release suffixes order below the bare version, `_p` orders
//! above it.

use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use anyhow::{bail, Context, Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Raw regular expression string matching a valid package version.
pub const VERSION_RE_RAW: &str =
    r"[0-9]+(?:\.[0-9]+)*[a-z]?(?:_(?:alpha|beta|pre|rc|p)[0-9]*)*(?:-r[0-9]+)?";

/// Regular expression matching a whole string that is a valid version.
static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{}$", VERSION_RE_RAW)).unwrap());

/// A suffix word attached to the base version with an underscore.
///
/// The variant order is the comparison order of the words themselves;
/// see [`Suffix::rank`] for where the bare version sorts among them.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SuffixKind {
    Alpha,
    Beta,
    Pre,
    Rc,
    P,
}

impl SuffixKind {
    fn as_str(&self) -> &'static str {
        match self {
            SuffixKind::Alpha => "alpha",
            SuffixKind::Beta => "beta",
            SuffixKind::Pre => "pre",
            SuffixKind::Rc => "rc",
            SuffixKind::P => "p",
        }
    }

    fn parse(word: &str) -> Result<Self> {
        Ok(match word {
            "alpha" => SuffixKind::Alpha,
            "beta" => SuffixKind::Beta,
            "pre" => SuffixKind::Pre,
            "rc" => SuffixKind::Rc,
            "p" => SuffixKind::P,
            _ => bail!("unknown version suffix _{}", word),
        })
    }
}

/// One `_word[N]` suffix.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Suffix {
    kind: SuffixKind,
    number: u64,
}

impl Suffix {
    /// Where this suffix sorts relative to the bare version, which ranks 0.
    fn rank(&self) -> i32 {
        match self.kind {
            SuffixKind::Alpha => -4,
            SuffixKind::Beta => -3,
            SuffixKind::Pre => -2,
            SuffixKind::Rc => -1,
            SuffixKind::P => 1,
        }
    }
}

/// A parsed package version with a total order.
///
/// Equality follows the ordering, so `1.0` and `1.0-r0` are the same
/// version even though they render differently.
#[derive(Clone, Debug)]
pub struct Version {
    numbers: Vec<u64>,
    letter: Option<char>,
    suffixes: Vec<Suffix>,
    revision: Option<u64>,
}

impl Version {
    /// Parses a version string.
    pub fn try_new(input: &str) -> Result<Self> {
        if !VERSION_RE.is_match(input) {
            bail!("invalid version string {:?}", input);
        }

        let (rest, revision) = match input.rsplit_once("-r") {
            Some((rest, rev)) => (
                rest,
                Some(
                    rev.parse::<u64>()
                        .with_context(|| format!("revision of {:?}", input))?,
                ),
            ),
            None => (input, None),
        };

        let mut parts = rest.split('_');
        let base = parts.next().unwrap();
        let suffixes = parts
            .map(|part| {
                let digits_at = part
                    .find(|c: char| c.is_ascii_digit())
                    .unwrap_or(part.len());
                let (word, num) = part.split_at(digits_at);
                Ok(Suffix {
                    kind: SuffixKind::parse(word)?,
                    number: if num.is_empty() {
                        0
                    } else {
                        num.parse::<u64>()
                            .with_context(|| format!("suffix of {:?}", input))?
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (base, letter) = match base.chars().last() {
            Some(c) if c.is_ascii_lowercase() => (&base[..base.len() - 1], Some(c)),
            _ => (base, None),
        };

        let numbers = base
            .split('.')
            .map(|n| {
                n.parse::<u64>()
                    .with_context(|| format!("component {:?} of {:?}", n, input))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            numbers,
            letter,
            suffixes,
            revision,
        })
    }

    /// Returns the revision, defaulting to 0 when none was written.
    pub fn revision(&self) -> u64 {
        self.revision.unwrap_or(0)
    }

    /// Prefix match used by the `~` constraint operator.
    ///
    /// Every component the pattern spells out must equal the corresponding
    /// component of `self`; components the pattern omits are unconstrained.
    /// The revision takes part only when the pattern names one.
    pub fn fuzzy_matches(&self, pattern: &Version) -> bool {
        if pattern.numbers.len() > self.numbers.len()
            || self.numbers[..pattern.numbers.len()] != pattern.numbers[..]
        {
            return false;
        }
        if pattern.letter.is_some() && pattern.letter != self.letter {
            return false;
        }
        if pattern.suffixes.len() > self.suffixes.len()
            || self.suffixes[..pattern.suffixes.len()] != pattern.suffixes[..]
        {
            return false;
        }
        match pattern.revision {
            Some(rev) => self.revision() == rev,
            None => true,
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let components = self.numbers.len().max(other.numbers.len());
        for i in 0..components {
            // A missing component sorts below a present one: 1.2 < 1.2.0.
            match (self.numbers.get(i), other.numbers.get(i)) {
                (Some(a), Some(b)) => match a.cmp(b) {
                    Ordering::Equal => continue,
                    unequal => return unequal,
                },
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (None, None) => unreachable!(),
            }
        }

        match self.letter.cmp(&other.letter) {
            Ordering::Equal => {}
            unequal => return unequal,
        }

        let suffixes = self.suffixes.len().max(other.suffixes.len());
        for i in 0..suffixes {
            // A missing suffix compares as the bare version (rank 0).
            let a = self.suffixes.get(i).map_or((0, 0), |s| (s.rank(), s.number));
            let b = other
                .suffixes
                .get(i)
                .map_or((0, 0), |s| (s.rank(), s.number));
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }

        self.revision().cmp(&other.revision())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numbers.hash(state);
        self.letter.hash(state);
        for suffix in &self.suffixes {
            (suffix.rank(), suffix.number).hash(state);
        }
        self.revision().hash(state);
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::try_new(s)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for n in &self.numbers {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", n)?;
            first = false;
        }
        if let Some(letter) = self.letter {
            write!(f, "{}", letter)?;
        }
        for suffix in &self.suffixes {
            write!(f, "_{}", suffix.kind.as_str())?;
            if suffix.number != 0 {
                write!(f, "{}", suffix.number)?;
            }
        }
        if let Some(revision) = self.revision {
            write!(f, "-r{}", revision)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::try_new(s).unwrap()
    }

    #[test]
    fn parses_and_rejects() {
        assert!(Version::try_new("1.0").is_ok());
        assert!(Version::try_new("1.2.3a_rc1-r5").is_ok());
        assert!(Version::try_new("25.0.0.4").is_ok());
        assert!(Version::try_new("").is_err());
        assert!(Version::try_new("a.b").is_err());
        assert!(Version::try_new("1.0-").is_err());
        assert!(Version::try_new("1.0_snapshot").is_err());
        assert!(Version::try_new("1.0-r").is_err());
    }

    #[test]
    fn ordering_table() {
        let increasing = [
            "1.0_alpha",
            "1.0_alpha1",
            "1.0_beta",
            "1.0_pre2",
            "1.0_rc1",
            "1.0",
            "1.0-r1",
            "1.0_p1",
            "1.0a",
            "1.0.1",
            "1.1",
            "1.2",
            "1.2.0",
            "1.10",
            "2.0",
        ];
        for pair in increasing.windows(2) {
            assert!(
                v(pair[0]) < v(pair[1]),
                "expected {} < {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn revision_defaults_to_zero() {
        assert_eq!(v("1.0"), v("1.0-r0"));
        assert!(v("1.0") < v("1.0-r1"));
    }

    #[test]
    fn fuzzy_prefix_match() {
        assert!(v("24.1.2").fuzzy_matches(&v("24")));
        assert!(v("24.1.2_rc1-r3").fuzzy_matches(&v("24.1")));
        assert!(!v("25.0").fuzzy_matches(&v("24")));
        assert!(!v("24.10").fuzzy_matches(&v("24.1")));
        assert!(v("1.0-r2").fuzzy_matches(&v("1.0-r2")));
        assert!(!v("1.0-r2").fuzzy_matches(&v("1.0-r1")));
    }

    fn version_strategy() -> impl Strategy<Value = String> {
        let numbers = prop::collection::vec(0u64..1000, 1..4)
            .prop_map(|ns| ns.iter().map(u64::to_string).collect::<Vec<_>>().join("."));
        let letter = prop::option::of(prop::char::range('a', 'z'));
        let suffix = prop::option::of(("(alpha|beta|pre|rc|p)", 0u64..50));
        let revision = prop::option::of(0u64..100);
        (numbers, letter, suffix, revision).prop_map(|(base, letter, suffix, revision)| {
            let mut out = base;
            if let Some(c) = letter {
                out.push(c);
            }
            if let Some((word, n)) = suffix {
                out.push('_');
                out.push_str(&word);
                if n != 0 {
                    out.push_str(&n.to_string());
                }
            }
            if let Some(r) = revision {
                out.push_str(&format!("-r{}", r));
            }
            out
        })
    }

    proptest! {
        #[test]
        fn display_round_trips(s in version_strategy()) {
            let parsed = v(&s);
            prop_assert_eq!(parsed.to_string(), s);
        }

        #[test]
        fn ordering_is_antisymmetric(a in version_strategy(), b in version_strategy()) {
            let (a, b) = (v(&a), v(&b));
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }
    }
}
