//! Conversions between caller paths, backend keys and public URLs.
//!
//! Logical paths use the platform separator and are relative to the
//! configured root. Full keys are `relative_address/logical/path` with `/`.

use crate::backend::SEPARATOR;

#[derive(Debug, Clone)]
pub struct PathTranslator {
    root: String,
    base_url: String,
    separator: char,
}

impl PathTranslator {
    pub fn new(relative_address: &str, base_url: &str) -> Self {
        Self {
            root: relative_address.trim_matches(SEPARATOR).to_string(),
            base_url: base_url.trim_end_matches(SEPARATOR).to_string(),
            separator: std::path::MAIN_SEPARATOR,
        }
    }

    /// Use `separator` for logical paths instead of the platform one.
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn normalize(&self, path: &str) -> String {
        path.replace(self.separator, "/")
    }

    /// Root-relative remainder of `key`, or `None` if `key` is outside the root.
    fn strip_root<'a>(&self, key: &'a str) -> Option<&'a str> {
        if self.root.is_empty() {
            return Some(key);
        }
        let rest = key.strip_prefix(self.root.as_str())?;
        if rest.is_empty() || rest.starts_with(SEPARATOR) {
            Some(rest)
        } else {
            None
        }
    }

    /// Join the root and `logical`. Keys that already carry the root come
    /// back unchanged, so repeated calls never double the prefix.
    pub fn to_full_key(&self, logical: &str) -> String {
        let normalized = self.normalize(logical);
        let path = normalized.trim_start_matches(SEPARATOR);
        if self.root.is_empty() || self.strip_root(path).is_some() {
            return path.to_string();
        }
        if path.is_empty() {
            return self.root.clone();
        }
        format!("{}{SEPARATOR}{path}", self.root)
    }

    /// Inverse of [`to_full_key`](Self::to_full_key); also accepts URLs
    /// produced by [`to_url`](Self::to_url).
    pub fn to_logical_path(&self, full_key_or_url: &str) -> String {
        let mut rest = full_key_or_url;
        if !self.base_url.is_empty() {
            if let Some(after) = rest.strip_prefix(self.base_url.as_str()) {
                if after.is_empty() || after.starts_with(SEPARATOR) {
                    rest = after;
                }
            }
        }
        let rest = rest.trim_start_matches(SEPARATOR);
        let rest = self.strip_root(rest).unwrap_or(rest);
        rest.trim_start_matches(SEPARATOR)
            .replace(SEPARATOR, &self.separator.to_string())
    }

    pub fn to_url(&self, logical: &str) -> String {
        let key = self.to_full_key(logical);
        format!(
            "{}{SEPARATOR}{}",
            self.base_url,
            key.trim_matches(SEPARATOR)
        )
    }

    /// Listing prefix for the directory at `logical`. The bucket root maps
    /// to the empty prefix rather than a bare `/`.
    pub fn directory_prefix(&self, logical: &str) -> String {
        let key = self.to_full_key(logical);
        let key = key.trim_end_matches(SEPARATOR);
        if key.is_empty() {
            String::new()
        } else {
            ensure_trailing_separator(key)
        }
    }
}

pub fn ensure_trailing_separator(path: &str) -> String {
    if path.ends_with(SEPARATOR) {
        path.to_string()
    } else {
        format!("{path}{SEPARATOR}")
    }
}
