// src/io/serial/resolver.rs
//
// Turns operator hints and glob patterns into a concrete device path.
//
// An explicit path always wins, wherever it sits in the list. Globs are
// expanded in order; the first pattern with any match supplies the
// lexicographically smallest match. Nothing matching is a normal
// "board not plugged in yet" state, not an error.

use std::fmt;

use tracing::{debug, warn};

/// Default discovery patterns (macOS cu/tty first, then Linux CDC-ACM/USB).
pub const DEFAULT_PORT_PATTERNS: &[&str] = &[
    "/dev/cu.usbmodem*",
    "/dev/tty.usbmodem*",
    "/dev/ttyACM*",
    "/dev/ttyUSB*",
];

// ============================================================================
// Port Pattern
// ============================================================================

/// One candidate specifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PortPattern {
    /// Literal device path such as `/dev/ttyACM0` or `COM5`.
    Explicit(String),
    /// Filesystem glob such as `/dev/cu.usbmodem*`.
    Glob(String),
}

impl PortPattern {
    /// Classify a specifier: anything with glob metacharacters is a glob.
    pub fn parse(spec: &str) -> PortPattern {
        if spec.contains(['*', '?', '[']) {
            PortPattern::Glob(spec.to_string())
        } else {
            PortPattern::Explicit(spec.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PortPattern::Explicit(s) | PortPattern::Glob(s) => s,
        }
    }
}

impl fmt::Display for PortPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Port Resolver
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct PortResolver {
    patterns: Vec<PortPattern>,
}

impl PortResolver {
    pub fn new(patterns: Vec<PortPattern>) -> Self {
        Self { patterns }
    }

    /// Build from an optional operator hint followed by discovery patterns.
    /// Empty specifiers are ignored.
    pub fn from_specs<I, S>(hint: Option<&str>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let specs = hint
            .map(str::to_string)
            .into_iter()
            .chain(patterns.into_iter().map(|s| s.as_ref().to_string()));
        Self::new(
            specs
                .filter(|s| !s.trim().is_empty())
                .map(|s| PortPattern::parse(s.trim()))
                .collect(),
        )
    }

    pub fn patterns(&self) -> &[PortPattern] {
        &self.patterns
    }

    /// Resolve to a device path, or None when nothing is plugged in.
    pub fn resolve(&self) -> Option<String> {
        let explicit = self.patterns.iter().find_map(|p| match p {
            PortPattern::Explicit(path) => Some(path.clone()),
            PortPattern::Glob(_) => None,
        });
        if explicit.is_some() {
            return explicit;
        }

        self.patterns.iter().find_map(|p| match p {
            PortPattern::Glob(pattern) => first_match(pattern),
            PortPattern::Explicit(_) => None,
        })
    }
}

/// Lexicographically first filesystem match for a glob.
fn first_match(pattern: &str) -> Option<String> {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!("Ignoring invalid port pattern '{}': {}", pattern, e);
            return None;
        }
    };

    let mut matches: Vec<String> = paths
        .filter_map(Result::ok)
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    matches.sort();

    if matches.len() > 1 {
        debug!(
            "Pattern '{}' matched {} devices, using {}",
            pattern,
            matches.len(),
            matches[0]
        );
    }
    matches.into_iter().next()
}
