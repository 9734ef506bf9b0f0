//! gitignore-style pattern matcher, compiled to a regular
//! expression with a bounded LRU cache, exported for both the watch core
//! and any sparse-checkout collaborator.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use regex::Regex;

use crate::error::{Error, Result};

/// a parsed (but not yet compiled) pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPattern {
    pub pattern: String,
    pub is_negated: bool,
    pub segments: Vec<String>,
    pub is_directory: bool,
    pub is_rooted: bool,
}

/// parse gitignore-style syntax into its structural pieces, without
/// compiling a matcher yet.
pub fn parse(raw: &str) -> ParsedPattern {
    let mut pattern = raw;

    let is_negated = pattern.starts_with('!');
    if is_negated {
        pattern = &pattern[1..];
    }

    let is_rooted = pattern.starts_with('/');
    if is_rooted {
        pattern = &pattern[1..];
    }

    let is_directory = pattern.ends_with('/') && pattern.len() > 1;
    let body = if is_directory {
        &pattern[..pattern.len() - 1]
    } else {
        pattern
    };

    let segments: Vec<String> = body.split('/').map(|s| s.to_string()).collect();

    ParsedPattern {
        pattern: raw.to_string(),
        is_negated,
        segments,
        is_directory,
        is_rooted,
    }
}

/// does `line` look like a pattern-file comment.
pub fn is_comment_or_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || (trimmed.starts_with('#') && !trimmed.starts_with("\\#"))
}

/// compile a single gitignore-style segment (no `/`) into a regex fragment.
fn compile_segment(segment: &str) -> String {
    if segment == "**" {
        return ".*".to_string();
    }

    let mut out = String::new();
    let chars: Vec<char> = segment.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let mut j = i + 1;
                let negate = j < chars.len() && (chars[j] == '!' || chars[j] == '^');
                if negate {
                    j += 1;
                }
                let class_start = j;
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j < chars.len() {
                    let class: String = chars[class_start..j].iter().collect();
                    out.push('[');
                    if negate {
                        out.push('^');
                    }
                    out.push_str(&regex_escape_class(&class));
                    out.push(']');
                    i = j;
                } else {
                    out.push_str("\\[");
                }
            }
            '{' => {
                let mut j = i + 1;
                let mut depth = 1;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        j += 1;
                    }
                }
                if j < chars.len() {
                    let body: String = chars[i + 1..j].iter().collect();
                    let alternatives: Vec<String> = body
                        .split(',')
                        .map(|alt| compile_segment(alt))
                        .collect();
                    out.push_str("(?:");
                    out.push_str(&alternatives.join("|"));
                    out.push(')');
                    i = j;
                } else {
                    out.push_str("\\{");
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out
}

fn regex_escape_class(class: &str) -> String {
    // character classes are passed through mostly verbatim; escape the
    // handful of metacharacters that would otherwise break the enclosing `[]`.
    class.replace('\\', "\\\\").replace(']', "\\]")
}

/// sentinel standing in for a `**` segment while segments are joined; `**`
/// needs to absorb the slash on whichever side still has a neighbor so that
/// it can also match zero intervening directories, which a plain `.*`
/// sandwiched between two literal slashes cannot.
const DOUBLESTAR_SENTINEL: &str = "\u{0}DOUBLESTAR\u{0}";

/// compile a parsed pattern's segments into an anchored regex matching a
/// normalized POSIX path.
pub fn compile(parsed: &ParsedPattern) -> Result<Regex> {
    let regex_parts: Vec<String> = parsed
        .segments
        .iter()
        .map(|segment| {
            if segment == "**" {
                DOUBLESTAR_SENTINEL.to_string()
            } else {
                compile_segment(segment)
            }
        })
        .collect();

    let joined = regex_parts.join("/");
    let joined = joined.replace(&format!("{DOUBLESTAR_SENTINEL}/"), "(?:.*/)?");
    let joined = joined.replace(&format!("/{DOUBLESTAR_SENTINEL}"), "(?:/.*)?");
    let joined = joined.replace(DOUBLESTAR_SENTINEL, ".*");

    let anchored = if parsed.is_rooted {
        format!("^/?{joined}(?:/.*)?$")
    } else {
        format!("(^|.*/){joined}(?:/.*)?$")
    };

    Regex::new(&anchored).map_err(|e| Error::Invalid(format!("bad pattern {}: {e}", parsed.pattern)))
}

#[derive(Debug, Clone, Default)]
pub struct PatternCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

impl PatternCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// bounded LRU compilation cache, keyed by raw pattern text.
pub struct PatternCache {
    entries: Mutex<LruCache<String, Regex>>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        PatternCache {
            entries: Mutex::new(LruCache::new(cap)),
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// compile (or recall) the regex for `pattern`.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Regex> {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(regex) = entries.get(pattern) {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Ok(regex.clone());
            }
        }

        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let parsed = parse(pattern);
        let regex = compile(&parsed)?;
        self.entries.lock().unwrap().put(pattern.to_string(), regex.clone());
        Ok(regex)
    }

    pub fn stats(&self) -> PatternCacheStats {
        let entries = self.entries.lock().unwrap();
        PatternCacheStats {
            hits: self.hits.load(std::sync::atomic::Ordering::Relaxed),
            misses: self.misses.load(std::sync::atomic::Ordering::Relaxed),
            size: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

/// a matcher that defers compilation until first use, for callers that
/// register many patterns but evaluate only a subset.
pub struct LazyMatcher {
    pattern: String,
    compiled: Mutex<Option<Regex>>,
}

impl LazyMatcher {
    pub fn new(pattern: impl Into<String>) -> Self {
        LazyMatcher {
            pattern: pattern.into(),
            compiled: Mutex::new(None),
        }
    }

    pub fn is_match(&self, path: &str) -> Result<bool> {
        let mut slot = self.compiled.lock().unwrap();
        if slot.is_none() {
            let parsed = parse(&self.pattern);
            *slot = Some(compile(&parsed)?);
        }
        Ok(slot.as_ref().unwrap().is_match(path))
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}
