//! Logical file timestamps.
//!
//! Object stores only track when an object was last written. Creation and
//! modification dates that should survive a rewrite are embedded in the
//! object's `Content-Disposition` value using the RFC 2183 parameters:
//!
//! ```text
//! attachment; creation-date="Tue, 1 Jan 2019 10:00:00 +0000"; modification-date="Wed, 2 Jan 2019 08:30:00 +0000"
//! ```
//!
//! Parsing is lenient. Anything unreadable is ignored and the caller falls
//! back to the backend's native timestamp, or to [`missing_timestamp`].

use chrono::{DateTime, Utc};

use crate::backend::ObjectMetadata;

const CREATION_DATE: &str = "creation-date";
const MODIFICATION_DATE: &str = "modification-date";
const DEFAULT_DISPOSITION: &str = "attachment";

/// Seconds between 1601-01-01T00:00:00Z and the Unix epoch.
const MISSING_EPOCH_OFFSET: i64 = -11_644_473_600;

/// 1601-01-01T00:00:00Z, returned whenever a timestamp is unknown.
pub fn missing_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(MISSING_EPOCH_OFFSET, 0).expect("1601-01-01 is representable")
}

/// Parsed `Content-Disposition` value. Parameters other than the two dates
/// are kept verbatim so a rewrite does not drop them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    pub disposition: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub other: Vec<(String, String)>,
}

impl Default for ContentDisposition {
    fn default() -> Self {
        Self {
            disposition: DEFAULT_DISPOSITION.to_string(),
            created: None,
            modified: None,
            other: Vec::new(),
        }
    }
}

impl ContentDisposition {
    pub fn parse(value: &str) -> Self {
        let parts = split_parameters(value);
        let disposition = match parts.first() {
            Some(d) if !d.is_empty() && !d.contains('=') => d.to_string(),
            _ => DEFAULT_DISPOSITION.to_string(),
        };

        let mut parsed = Self {
            disposition,
            ..Self::default()
        };
        for part in parts {
            let Some((name, raw)) = part.split_once('=') else {
                continue;
            };
            let name = name.trim().to_ascii_lowercase();
            let raw = unquote(raw.trim());
            match name.as_str() {
                CREATION_DATE => parsed.created = parse_date(&raw),
                MODIFICATION_DATE => parsed.modified = parse_date(&raw),
                _ => parsed.other.push((name, raw)),
            }
        }
        parsed
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }
}

impl std::fmt::Display for ContentDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.disposition)?;
        for (name, value) in &self.other {
            write!(f, "; {name}={}", quote(value))?;
        }
        if let Some(created) = self.created {
            write!(f, "; {CREATION_DATE}=\"{}\"", created.to_rfc2822())?;
        }
        if let Some(modified) = self.modified {
            write!(f, "; {MODIFICATION_DATE}=\"{}\"", modified.to_rfc2822())?;
        }
        Ok(())
    }
}

/// Splits on `;` outside quoted strings. Parts are trimmed.
fn split_parameters(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (idx, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());
    parts
}

/// Value of a parameter, with surrounding quotes and escapes removed.
fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            _ => out.push(ch),
        }
    }
    out
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn disposition(meta: &ObjectMetadata) -> Option<ContentDisposition> {
    meta.content_disposition
        .as_deref()
        .map(ContentDisposition::parse)
}

/// Embedded modification date, then native last-modified, then the sentinel.
pub fn resolve_last_modified(meta: Option<&ObjectMetadata>) -> DateTime<Utc> {
    let Some(meta) = meta else {
        return missing_timestamp();
    };
    disposition(meta)
        .and_then(|d| d.modified)
        .or(meta.last_modified)
        .unwrap_or_else(missing_timestamp)
}

/// Embedded creation date, else the sentinel. Never derived from the
/// last-modified time.
pub fn resolve_created(meta: Option<&ObjectMetadata>) -> DateTime<Utc> {
    meta.and_then(disposition)
        .and_then(|d| d.created)
        .unwrap_or_else(missing_timestamp)
}

/// A directory is only as recent as its least recently touched member.
pub fn aggregate_last_modified<'a, I>(members: I) -> DateTime<Utc>
where
    I: IntoIterator<Item = &'a ObjectMetadata>,
{
    members
        .into_iter()
        .map(|m| resolve_last_modified(Some(m)))
        .min()
        .unwrap_or_else(missing_timestamp)
}
