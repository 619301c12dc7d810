//! Path pattern compilation and convertors (C1).
//!
//! A route pattern like `"/users/{id:int}/posts/{slug}"` is compiled once,
//! at registration time, into a [`CompiledPattern`]: an ordered list of
//! literal segments and typed [`Convertor`]s. Matching a request path never
//! re-parses the pattern string.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A single path-compilation error, carrying the byte offset of the bad token.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("unclosed '{{' in pattern at byte {offset}")]
    UnclosedBrace { offset: usize },
    #[error("empty parameter name in pattern at byte {offset}")]
    EmptyName { offset: usize },
    #[error("unknown convertor '{name}' at byte {offset}")]
    UnknownConvertor { name: String, offset: usize },
    #[error("'path' convertor must be the final segment (byte {offset})")]
    PathConvertorNotLast { offset: usize },
    #[error("duplicate parameter name '{name}' in pattern")]
    DuplicateName { name: String },
}

/// A typed value captured from a path segment.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedValue {
    Str(String),
    Int(i64),
    Float(f64),
    Uuid(Uuid),
}

impl fmt::Display for CapturedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapturedValue::Str(s) => write!(f, "{s}"),
            CapturedValue::Int(i) => write!(f, "{i}"),
            CapturedValue::Float(v) => write!(f, "{v}"),
            CapturedValue::Uuid(u) => write!(f, "{u}"),
        }
    }
}

impl CapturedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CapturedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            CapturedValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// A rule that parses one path segment into a typed value.
///
/// Spans `/` only for the `path` convertor, which must be the final segment
/// of a pattern.
pub trait Convertor: Send + Sync + fmt::Debug {
    /// Attempt to consume a prefix of `remaining`, returning the captured
    /// value and the number of bytes consumed.
    fn parse<'a>(&self, remaining: &'a str) -> Option<(CapturedValue, &'a str)>;

    /// Format a captured value back into its path representation, for
    /// `url_for` reverse generation.
    fn format(&self, value: &CapturedValue) -> Option<String>;

    /// Whether this convertor may span `/` characters.
    fn spans_slash(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

#[derive(Debug)]
struct StrConvertor;
impl Convertor for StrConvertor {
    fn parse<'a>(&self, remaining: &'a str) -> Option<(CapturedValue, &'a str)> {
        let end = remaining.find('/').unwrap_or(remaining.len());
        if end == 0 {
            return None;
        }
        Some((CapturedValue::Str(remaining[..end].to_string()), &remaining[end..]))
    }
    fn format(&self, value: &CapturedValue) -> Option<String> {
        value.as_str().map(|s| s.to_string())
    }
    fn name(&self) -> &'static str {
        "str"
    }
}

#[derive(Debug)]
struct IntConvertor;
impl Convertor for IntConvertor {
    fn parse<'a>(&self, remaining: &'a str) -> Option<(CapturedValue, &'a str)> {
        let end = remaining.find('/').unwrap_or(remaining.len());
        let candidate = &remaining[..end];
        let value: i64 = candidate.parse().ok()?;
        Some((CapturedValue::Int(value), &remaining[end..]))
    }
    fn format(&self, value: &CapturedValue) -> Option<String> {
        value.as_int().map(|i| i.to_string())
    }
    fn name(&self) -> &'static str {
        "int"
    }
}

#[derive(Debug)]
struct FloatConvertor;
impl Convertor for FloatConvertor {
    fn parse<'a>(&self, remaining: &'a str) -> Option<(CapturedValue, &'a str)> {
        let end = remaining.find('/').unwrap_or(remaining.len());
        let candidate = &remaining[..end];
        let value: f64 = candidate.parse().ok()?;
        Some((CapturedValue::Float(value), &remaining[end..]))
    }
    fn format(&self, value: &CapturedValue) -> Option<String> {
        match value {
            CapturedValue::Float(v) => Some(v.to_string()),
            _ => None,
        }
    }
    fn name(&self) -> &'static str {
        "float"
    }
}

#[derive(Debug)]
struct UuidConvertor;
impl Convertor for UuidConvertor {
    fn parse<'a>(&self, remaining: &'a str) -> Option<(CapturedValue, &'a str)> {
        let end = remaining.find('/').unwrap_or(remaining.len());
        let candidate = &remaining[..end];
        let value = Uuid::parse_str(candidate).ok()?;
        Some((CapturedValue::Uuid(value), &remaining[end..]))
    }
    fn format(&self, value: &CapturedValue) -> Option<String> {
        match value {
            CapturedValue::Uuid(u) => Some(u.to_string()),
            _ => None,
        }
    }
    fn name(&self) -> &'static str {
        "uuid"
    }
}

#[derive(Debug)]
struct PathConvertor;
impl Convertor for PathConvertor {
    fn parse<'a>(&self, remaining: &'a str) -> Option<(CapturedValue, &'a str)> {
        if remaining.is_empty() {
            return None;
        }
        Some((CapturedValue::Str(remaining.to_string()), ""))
    }
    fn format(&self, value: &CapturedValue) -> Option<String> {
        value.as_str().map(|s| s.to_string())
    }
    fn spans_slash(&self) -> bool {
        true
    }
    fn name(&self) -> &'static str {
        "path"
    }
}

fn convertor_for(name: &str) -> Option<Arc<dyn Convertor>> {
    match name {
        "str" => Some(Arc::new(StrConvertor)),
        "int" => Some(Arc::new(IntConvertor)),
        "float" => Some(Arc::new(FloatConvertor)),
        "uuid" => Some(Arc::new(UuidConvertor)),
        "path" => Some(Arc::new(PathConvertor)),
        _ => None,
    }
}

/// One piece of a compiled pattern: either fixed literal text or a typed capture.
#[derive(Debug, Clone)]
pub enum PatternPart {
    Literal(String),
    Capture {
        name: String,
        convertor: Arc<dyn Convertor>,
    },
}

/// A compiled path pattern, ready to match against request paths.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    raw: String,
    parts: Vec<PatternPart>,
}

impl CompiledPattern {
    /// Compile a pattern string such as `"/users/{id:int}"`.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let mut parts = Vec::new();
        let mut seen_names = std::collections::HashSet::new();
        let bytes = pattern.as_bytes();
        let mut i = 0usize;
        let mut literal = String::new();

        while i < bytes.len() {
            if bytes[i] == b'{' {
                if !literal.is_empty() {
                    parts.push(PatternPart::Literal(std::mem::take(&mut literal)));
                }
                let close = pattern[i..]
                    .find('}')
                    .map(|rel| i + rel)
                    .ok_or(PatternError::UnclosedBrace { offset: i })?;
                let inner = &pattern[i + 1..close];
                let (name, convertor_name) = match inner.split_once(':') {
                    Some((n, c)) => (n, c),
                    None => (inner, "str"),
                };
                if name.is_empty() {
                    return Err(PatternError::EmptyName { offset: i + 1 });
                }
                if !seen_names.insert(name.to_string()) {
                    return Err(PatternError::DuplicateName {
                        name: name.to_string(),
                    });
                }
                let convertor = convertor_for(convertor_name).ok_or_else(|| {
                    PatternError::UnknownConvertor {
                        name: convertor_name.to_string(),
                        offset: i + 1 + name.len() + 1,
                    }
                })?;
                if convertor.spans_slash() && close + 1 != bytes.len() {
                    return Err(PatternError::PathConvertorNotLast { offset: i });
                }
                parts.push(PatternPart::Capture {
                    name: name.to_string(),
                    convertor,
                });
                i = close + 1;
            } else {
                literal.push(bytes[i] as char);
                i += 1;
            }
        }
        if !literal.is_empty() {
            parts.push(PatternPart::Literal(literal));
        }

        Ok(CompiledPattern {
            raw: pattern.to_string(),
            parts,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn parts(&self) -> &[PatternPart] {
        &self.parts
    }

    /// The first literal segment of the pattern, if the pattern begins with
    /// one. Used by the route table to index static-prefix routes.
    pub fn first_literal_segment(&self) -> Option<&str> {
        match self.parts.first() {
            Some(PatternPart::Literal(lit)) => {
                lit.trim_start_matches('/').split('/').next()
            }
            _ => None,
        }
    }

    /// Match a path against this pattern, returning typed captures on success.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, CapturedValue)>> {
        let mut remaining = path;
        let mut captures = Vec::new();

        for part in &self.parts {
            match part {
                PatternPart::Literal(lit) => {
                    remaining = remaining.strip_prefix(lit.as_str())?;
                }
                PatternPart::Capture { name, convertor } => {
                    let (value, rest) = convertor.parse(remaining)?;
                    captures.push((name.clone(), value));
                    remaining = rest;
                }
            }
        }

        if remaining.is_empty() {
            Some(captures)
        } else {
            None
        }
    }

    /// Reverse-format captures back into a concrete path, for `url_for`.
    pub fn format(
        &self,
        params: &std::collections::HashMap<String, CapturedValue>,
    ) -> Result<String, String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                PatternPart::Literal(lit) => out.push_str(lit),
                PatternPart::Capture { name, convertor } => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| format!("missing parameter '{name}'"))?;
                    let formatted = convertor
                        .format(value)
                        .ok_or_else(|| format!("parameter '{name}' has wrong type"))?;
                    out.push_str(&formatted);
                }
            }
        }
        let extra: Vec<&String> = params
            .keys()
            .filter(|k| !self.parts.iter().any(|p| matches!(p, PatternPart::Capture { name, .. } if name == *k)))
            .collect();
        if !extra.is_empty() {
            return Err(format!("extra parameters: {extra:?}"));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_literal_only_pattern() {
        let p = CompiledPattern::compile("/health").unwrap();
        assert_eq!(p.matches("/health"), Some(vec![]));
        assert_eq!(p.matches("/healthy"), None);
    }

    #[test]
    fn compiles_int_capture() {
        let p = CompiledPattern::compile("/users/{id:int}").unwrap();
        let caps = p.matches("/users/42").unwrap();
        assert_eq!(caps, vec![("id".to_string(), CapturedValue::Int(42))]);
        assert!(p.matches("/users/abc").is_none());
    }

    #[test]
    fn str_capture_does_not_span_slash() {
        let p = CompiledPattern::compile("/files/{name}").unwrap();
        assert!(p.matches("/files/a/b").is_none());
    }

    #[test]
    fn path_capture_spans_slash_and_must_be_last() {
        let p = CompiledPattern::compile("/static/{rest:path}").unwrap();
        let caps = p.matches("/static/a/b/c.css").unwrap();
        assert_eq!(
            caps,
            vec![("rest".to_string(), CapturedValue::Str("a/b/c.css".to_string()))]
        );

        let err = CompiledPattern::compile("/static/{rest:path}/more");
        assert!(matches!(err, Err(PatternError::PathConvertorNotLast { .. })));
    }

    #[test]
    fn uuid_capture_round_trips() {
        let p = CompiledPattern::compile("/items/{id:uuid}").unwrap();
        let id = Uuid::new_v4();
        let path = format!("/items/{id}");
        let caps = p.matches(&path).unwrap();
        assert_eq!(caps, vec![("id".to_string(), CapturedValue::Uuid(id))]);
    }

    #[test]
    fn rejects_unknown_convertor() {
        let err = CompiledPattern::compile("/users/{id:bogus}");
        assert!(matches!(err, Err(PatternError::UnknownConvertor { .. })));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = CompiledPattern::compile("/{id}/{id}");
        assert!(matches!(err, Err(PatternError::DuplicateName { .. })));
    }

    #[test]
    fn url_for_reverse_format_round_trips() {
        let p = CompiledPattern::compile("/users/{id:int}/posts/{slug}").unwrap();
        let mut params = std::collections::HashMap::new();
        params.insert("id".to_string(), CapturedValue::Int(7));
        params.insert("slug".to_string(), CapturedValue::Str("hello".to_string()));
        let path = p.format(&params).unwrap();
        assert_eq!(path, "/users/7/posts/hello");
        assert_eq!(p.matches(&path).unwrap().len(), 2);
    }

    #[test]
    fn url_for_missing_param_errors() {
        let p = CompiledPattern::compile("/users/{id:int}").unwrap();
        let params = std::collections::HashMap::new();
        assert!(p.format(&params).is_err());
    }
}
