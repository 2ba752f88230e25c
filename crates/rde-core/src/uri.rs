//! URI grammar: `<scheme>://<path>`, with extension auto-completion so
//! `output.jsonl` and `jsonl://output` resolve identically.

use crate::error::RdeError;

/// A recognized stream scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Jsonl,
    Csv,
    Memory,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Jsonl => "jsonl",
            Scheme::Csv => "csv",
            Scheme::Memory => "memory",
        }
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            Scheme::Jsonl => "jsonl",
            Scheme::Csv => "csv",
            Scheme::Memory => "",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "jsonl" => Some(Scheme::Jsonl),
            "csv" => Some(Scheme::Csv),
            "memory" => Some(Scheme::Memory),
            _ => None,
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jsonl" | "ndjson" => Some(Scheme::Jsonl),
            "csv" => Some(Scheme::Csv),
            _ => None,
        }
    }
}

/// A parsed, scheme-complete stream URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUri {
    pub scheme: Scheme,
    /// The path portion, with the scheme's default extension applied if
    /// the caller gave a bare path without one.
    pub path: String,
}

impl StreamUri {
    /// Parse a URI string, auto-completing a missing scheme from a known
    /// extension, or a missing extension from the scheme's default.
    pub fn parse(raw: &str) -> Result<Self, RdeError> {
        if let Some((scheme_str, rest)) = raw.split_once("://") {
            let scheme = Scheme::from_str(scheme_str)
                .ok_or_else(|| RdeError::ProtocolUnknown(scheme_str.to_string()))?;
            let path = complete_extension(rest, scheme);
            Ok(Self { scheme, path })
        } else {
            // bare path: infer scheme from extension
            let ext = raw.rsplit('.').next().unwrap_or("");
            let scheme = Scheme::from_extension(ext)
                .ok_or_else(|| RdeError::ProtocolUnknown(format!("(no scheme, unrecognized extension '{ext}')")))?;
            Ok(Self {
                scheme,
                path: raw.to_string(),
            })
        }
    }

    /// Re-render as a canonical `scheme://path` string.
    pub fn to_uri_string(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.path)
    }
}

fn complete_extension(path: &str, scheme: Scheme) -> String {
    let ext = scheme.default_extension();
    if ext.is_empty() || path.ends_with(&format!(".{ext}")) || path.contains('.') {
        path.to_string()
    } else {
        format!("{path}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_and_bare_path_resolve_identically() {
        let from_scheme = StreamUri::parse("jsonl://output").unwrap();
        let from_path = StreamUri::parse("output.jsonl").unwrap();
        assert_eq!(from_scheme.scheme, from_path.scheme);
    }

    #[test]
    fn unknown_scheme_errors() {
        assert!(matches!(
            StreamUri::parse("ftp://nope"),
            Err(RdeError::ProtocolUnknown(_))
        ));
    }

    #[test]
    fn memory_scheme_has_no_extension() {
        let uri = StreamUri::parse("memory://bridge-1").unwrap();
        assert_eq!(uri.path, "bridge-1");
    }
}
