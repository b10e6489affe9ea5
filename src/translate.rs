//! Regex dialect translation.
//!
//! Rewrites a pattern from the dialect it was written in to the dialect the
//! automaton tool understands (.NET/C#). Translation is best effort and never
//! fails: constructs without an equivalent are passed through and left for the
//! automaton tool to reject as invalid.

use std::fmt;

/// Regex dialects found in the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    JavaScript,
    Python,
    Java,
    Ruby,
    Perl,
    Php,
    Go,
    Rust,
    CSharp,
    /// Source language could not be determined; only portable rewrites apply.
    Unknown,
}

impl Dialect {
    /// Dialect used by the ecosystem behind a package registry.
    pub fn from_registry(registry: &str) -> Option<Self> {
        match registry.to_ascii_lowercase().as_str() {
            // TypeScript is evaluated on a JS engine
            "npm" => Some(Dialect::JavaScript),
            "crates.io" => Some(Dialect::Rust),
            "packagist" => Some(Dialect::Php),
            "pypi" => Some(Dialect::Python),
            "rubygems" => Some(Dialect::Ruby),
            "cpan" => Some(Dialect::Perl),
            "maven" => Some(Dialect::Java),
            "godoc" => Some(Dialect::Go),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::JavaScript => "JavaScript",
            Dialect::Python => "Python",
            Dialect::Java => "Java",
            Dialect::Ruby => "Ruby",
            Dialect::Perl => "Perl",
            Dialect::Php => "PHP",
            Dialect::Go => "Go",
            Dialect::Rust => "Rust",
            Dialect::CSharp => "C#",
            Dialect::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A pattern in the canonical dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPattern {
    pub pattern: String,
    /// Length in characters.
    pub len: usize,
}

impl CanonicalPattern {
    pub fn new(pattern: String) -> Self {
        let len = pattern.chars().count();
        Self { pattern, len }
    }
}

/// Translates patterns into a fixed target dialect.
#[derive(Debug, Clone)]
pub struct Translator {
    target: Dialect,
    alt_unicode_flag: Option<char>,
}

impl Translator {
    pub fn new(target: Dialect) -> Self {
        Self {
            target,
            alt_unicode_flag: None,
        }
    }

    /// Replace the unicode flag (which C# lacks) with `flag` instead of
    /// dropping it.
    pub fn with_alt_unicode_flag(mut self, flag: Option<char>) -> Self {
        self.alt_unicode_flag = flag;
        self
    }

    pub fn target(&self) -> Dialect {
        self.target
    }

    /// Translate `pattern` written in `from` with `flags` into the target
    /// dialect.
    pub fn translate(&self, pattern: &str, flags: &str, from: Dialect) -> CanonicalPattern {
        let body = if from == self.target || self.target != Dialect::CSharp {
            pattern.to_string()
        } else {
            rewrite_for_csharp(pattern, from)
        };

        let modifiers = self.inline_modifiers(flags);
        if modifiers.is_empty() || body.starts_with(&modifiers) {
            return CanonicalPattern::new(body);
        }
        CanonicalPattern::new(format!("{modifiers}{body}"))
    }

    /// Inline modifier group for `flags`, e.g. `(?im)`, or empty.
    fn inline_modifiers(&self, flags: &str) -> String {
        let mut wanted = [false; 4];
        for flag in flags.chars() {
            let mapped = match flag {
                'u' => self.alt_unicode_flag,
                other => Some(other),
            };
            match mapped {
                Some('i') => wanted[0] = true,
                Some('m') => wanted[1] = true,
                Some('s') => wanted[2] = true,
                Some('x') => wanted[3] = true,
                // g, y, d and friends do not change what a pattern matches
                _ => {}
            }
        }

        let letters: String = ['i', 'm', 's', 'x']
            .iter()
            .zip(wanted)
            .filter(|(_, on)| *on)
            .map(|(c, _)| *c)
            .collect();
        if letters.is_empty() {
            String::new()
        } else {
            format!("(?{letters})")
        }
    }
}

/// Apply the dialect-specific rewrites needed for .NET.
fn rewrite_for_csharp(pattern: &str, from: Dialect) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut in_class = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\\' {
            let Some(&next) = chars.get(i + 1) else {
                out.push(c);
                break;
            };
            match next {
                'Z' if from == Dialect::Python && !in_class => {
                    out.push_str("\\z");
                    i += 2;
                }
                'h' if from == Dialect::Ruby => {
                    out.push_str(if in_class { "0-9a-fA-F" } else { "[0-9a-fA-F]" });
                    i += 2;
                }
                'x' | 'u' if chars.get(i + 2) == Some(&'{') => match braced_hex(&chars, i + 3) {
                    Some((hex, end)) if hex.len() <= 4 => {
                        out.push_str(&format!("\\u{hex:0>4}"));
                        i = end + 1;
                    }
                    _ => {
                        out.push(c);
                        out.push(next);
                        i += 2;
                    }
                },
                _ => {
                    out.push(c);
                    out.push(next);
                    i += 2;
                }
            }
            continue;
        }

        if in_class {
            if c == ']' {
                in_class = false;
            }
            out.push(c);
            i += 1;
            continue;
        }

        if c == '[' {
            if from == Dialect::JavaScript {
                if chars.get(i + 1) == Some(&']') {
                    out.push_str("(?!)");
                    i += 2;
                    continue;
                }
                if chars.get(i + 1) == Some(&'^') && chars.get(i + 2) == Some(&']') {
                    out.push_str("[\\s\\S]");
                    i += 3;
                    continue;
                }
            }
            in_class = true;
            out.push(c);
            i += 1;
            // A leading ']' (after an optional '^') is a literal outside JS.
            if chars.get(i) == Some(&'^') {
                out.push('^');
                i += 1;
            }
            if from != Dialect::JavaScript && chars.get(i) == Some(&']') {
                out.push(']');
                i += 1;
            }
            continue;
        }

        if c == '(' && chars.get(i + 1) == Some(&'?') && chars.get(i + 2) == Some(&'P') {
            match chars.get(i + 3) {
                Some('<') => {
                    out.push_str("(?<");
                    i += 4;
                    continue;
                }
                Some('=') => {
                    if let Some(close) = chars[i + 4..].iter().position(|&c| c == ')') {
                        let name: String = chars[i + 4..i + 4 + close].iter().collect();
                        out.push_str(&format!("\\k<{name}>"));
                        i += 4 + close + 1;
                        continue;
                    }
                }
                _ => {}
            }
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Hex digits between `start` and the next `}`; returns the digits and the
/// index of the closing brace.
fn braced_hex(chars: &[char], start: usize) -> Option<(String, usize)> {
    let close = start + chars.get(start..)?.iter().position(|&c| c == '}')?;
    let digits: String = chars[start..close].iter().collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some((digits, close))
}
