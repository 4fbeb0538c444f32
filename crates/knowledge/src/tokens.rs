//! Identifier-aware tokenization shared by the local embedder and the
//! lexical relevance model.

use std::collections::HashSet;
use std::sync::OnceLock;

const STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "an", "as", "are", "was", "were", "for", "to", "of", "in",
    "and", "or", "but", "with", "by", "from", "this", "that", "be", "have", "has", "had", "it",
    "its", "their", "they", "them", "how", "what", "where", "when", "why", "who", "does", "do",
    "can", "me", "we", "you", "there",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// Split text into lowercase terms.
///
/// Words are separated at non-alphanumeric characters, then at camelCase
/// boundaries, so `parseHTTPRequest_v2` yields `parse`, `http`, `request` and
/// `v2`. Stop words and single characters are dropped.
pub fn identifier_tokens(text: &str) -> Vec<String> {
    words(text)
        .flat_map(split_identifier)
        .filter(|t| keep(t))
        .collect()
}

/// Compound identifiers (`passwordHash`, `user_id`) lowercased and joined,
/// for models that also want the whole word as a feature.
pub fn compound_words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| split_identifier(w).len() > 1)
        .map(|w| w.replace('_', "").to_lowercase())
        .filter(|w| keep(w))
        .collect()
}

fn keep(token: &str) -> bool {
    token.chars().count() >= 2 && !stop_words().contains(token)
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn split_identifier(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            continue;
        }
        if i > 0 && !current.is_empty() {
            let prev = chars[i - 1];
            let next = chars.get(i + 1).copied();
            let boundary = (prev.is_lowercase() && c.is_uppercase())
                || (prev.is_uppercase()
                    && c.is_uppercase()
                    && next.is_some_and(|n| n.is_lowercase()));
            if boundary {
                parts.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_identifiers() {
        assert_eq!(
            identifier_tokens("parseHTTPRequest(user_id)"),
            vec!["parse", "http", "request", "user", "id"]
        );
    }

    #[test]
    fn test_drops_stop_words_and_single_chars() {
        assert_eq!(
            identifier_tokens("How is authentication implemented?"),
            vec!["authentication", "implemented"]
        );
        assert!(identifier_tokens("a = b + c").is_empty());
    }

    #[test]
    fn test_compound_words() {
        assert_eq!(
            compound_words("if user.passwordHash == hash_value"),
            vec!["passwordhash", "hashvalue"]
        );
    }

    #[test]
    fn test_unicode_is_safe() {
        let tokens = identifier_tokens("Gamedex é um aplicativo 🎮 brasileiro");
        assert!(tokens.contains(&"aplicativo".to_string()));
    }
}
