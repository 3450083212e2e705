//! Shell-style wildcard filters for file listings.
//!
//! A pattern is scanned into literal runs, `*` and `?`. Matching is anchored
//! at both ends and wildcards never match the key separator, so `*.*` on a
//! directory prefix only accepts direct children that have an extension.

use crate::backend::SEPARATOR;

/// Filter applied when the caller does not supply one.
pub const DEFAULT_FILTER: &str = "*.*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(Vec<char>),
    /// Any run of characters, possibly empty.
    Star,
    /// Exactly one character.
    Question,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    pattern: String,
    tokens: Vec<Token>,
}

impl Glob {
    pub fn compile(pattern: &str) -> Self {
        Self::scoped("", pattern)
    }

    /// Compile `pattern` to match keys directly below `prefix`. The prefix
    /// is matched literally, wildcard characters included.
    pub fn scoped(prefix: &str, pattern: &str) -> Self {
        let mut tokens = Vec::new();
        if !prefix.is_empty() {
            tokens.push(Token::Literal(prefix.chars().collect()));
        }

        let mut literal = Vec::new();
        for c in pattern.chars() {
            let wildcard = match c {
                '*' => Token::Star,
                '?' => Token::Question,
                _ => {
                    literal.push(c);
                    continue;
                }
            };
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            // Consecutive stars are equivalent to one.
            if wildcard == Token::Star && tokens.last() == Some(&Token::Star) {
                continue;
            }
            tokens.push(wildcard);
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Self {
            pattern: format!("{prefix}{pattern}"),
            tokens,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whole-string match against `candidate`.
    pub fn matches(&self, candidate: &str) -> bool {
        let text: Vec<char> = candidate.chars().collect();
        // reachable[i]: the tokens consumed so far can match text[..i].
        let mut reachable = vec![false; text.len() + 1];
        reachable[0] = true;

        for token in &self.tokens {
            let mut next = vec![false; text.len() + 1];
            match token {
                Token::Literal(lit) => {
                    for i in 0..text.len() + 1 {
                        if reachable[i] && text[i..].starts_with(lit) {
                            next[i + lit.len()] = true;
                        }
                    }
                }
                Token::Question => {
                    for i in 0..text.len() {
                        if reachable[i] && text[i] != SEPARATOR {
                            next[i + 1] = true;
                        }
                    }
                }
                Token::Star => {
                    for i in 0..text.len() + 1 {
                        next[i] = reachable[i] || (i > 0 && next[i - 1] && text[i - 1] != SEPARATOR);
                    }
                }
            }
            if !next.contains(&true) {
                return false;
            }
            reachable = next;
        }

        reachable[text.len()]
    }
}

impl Default for Glob {
    fn default() -> Self {
        Self::compile(DEFAULT_FILTER)
    }
}

impl std::fmt::Display for Glob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}
