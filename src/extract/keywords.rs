//! Keyword matching with sentence context.
//!
//! Keywords match case-insensitively on whole-word boundaries. Each hit
//! carries the sentence containing the keyword plus its immediate
//! neighbors, concatenated. Patterns are compiled once when the matcher is
//! built, never in the per-page hot path.

use anyhow::{Context, Result};
use regex::Regex;

/// A keyword occurrence in filtered page text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub keyword: String,
    /// The matched sentence itself, the dedup key component.
    pub sentence: String,
    /// Previous sentence + matched sentence + following sentence.
    pub context: String,
}

/// Compiled keyword set.
pub struct KeywordMatcher {
    patterns: Vec<(String, Regex)>,
}

impl KeywordMatcher {
    /// Compile whole-word, case-insensitive patterns for each keyword.
    pub fn new(keywords: &[String]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let keyword = keyword.trim();
            if keyword.is_empty() {
                continue;
            }
            // \b only asserts against word characters; keywords ending in
            // punctuation ("c++") would never match with a trailing \b.
            let mut pattern = String::from("(?i)");
            if keyword.chars().next().is_some_and(word_char) {
                pattern.push_str(r"\b");
            }
            pattern.push_str(&regex::escape(keyword));
            if keyword.chars().last().is_some_and(word_char) {
                pattern.push_str(r"\b");
            }
            let regex = Regex::new(&pattern)
                .with_context(|| format!("invalid keyword pattern: {keyword}"))?;
            patterns.push((keyword.to_string(), regex));
        }
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Find all keyword hits in `text`, one per unique
    /// `(keyword, sentence)` pair. Multiple occurrences inside the same
    /// sentence collapse into one hit.
    #[must_use]
    pub fn find_matches(&self, text: &str) -> Vec<KeywordMatch> {
        let sentences = split_sentences(text);
        let mut matches = Vec::new();

        for (idx, sentence) in sentences.iter().enumerate() {
            for (keyword, regex) in &self.patterns {
                if regex.is_match(sentence) {
                    matches.push(KeywordMatch {
                        keyword: keyword.clone(),
                        sentence: sentence.clone(),
                        context: context_for(&sentences, idx),
                    });
                }
            }
        }
        matches
    }
}

fn word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Previous + containing + following sentence, space-joined.
fn context_for(sentences: &[String], idx: usize) -> String {
    let start = idx.saturating_sub(1);
    let end = (idx + 2).min(sentences.len());
    sentences[start..end].join(" ")
}

/// Split text into sentences on `.`, `!`, `?` boundaries and paragraph
/// breaks. Deliberately simple: abbreviations may over-split, which only
/// narrows context and never loses a hit.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            // Paragraph break ends the sentence; single newlines inside one
            // flow are treated as spaces.
            if chars.peek() == Some(&'\n') {
                push_sentence(&mut sentences, &mut current);
                while chars.peek() == Some(&'\n') {
                    chars.next();
                }
            } else {
                current.push(' ');
            }
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            match chars.peek() {
                Some(next) if next.is_whitespace() => {
                    push_sentence(&mut sentences, &mut current);
                }
                None => push_sentence(&mut sentences, &mut current),
                // mid-token punctuation (version numbers, URLs)
                Some(_) => {}
            }
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !trimmed.is_empty() {
        sentences.push(trimmed);
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(keywords: &[&str]) -> KeywordMatcher {
        let keywords: Vec<String> = keywords.iter().map(|s| s.to_string()).collect();
        KeywordMatcher::new(&keywords).expect("keywords should compile")
    }

    #[test]
    fn splits_sentences_on_terminators_and_paragraphs() {
        let text = "First sentence. Second one! Third?\n\nFourth after break";
        let sentences = split_sentences(text);
        assert_eq!(
            sentences,
            vec![
                "First sentence.",
                "Second one!",
                "Third?",
                "Fourth after break"
            ]
        );
    }

    #[test]
    fn version_numbers_do_not_split() {
        let sentences = split_sentences("Use version 1.2.3 today. Done.");
        assert_eq!(sentences, vec!["Use version 1.2.3 today.", "Done."]);
    }

    #[test]
    fn whole_word_case_insensitive_match() {
        let m = matcher(&["alpha"]);
        let hits = m.find_matches("The Alpha release. The alphabet is unrelated.");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].keyword, "alpha");
        assert_eq!(hits[0].sentence, "The Alpha release.");
    }

    #[test]
    fn context_includes_neighboring_sentences() {
        let m = matcher(&["beta"]);
        let hits = m.find_matches("Before. The beta ships. After. Unrelated.");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].context, "Before. The beta ships. After.");
    }

    #[test]
    fn context_at_text_boundaries() {
        let m = matcher(&["start", "end"]);
        let hits = m.find_matches("Start here. Middle. The end");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].context, "Start here. Middle.");
        assert_eq!(hits[1].context, "Middle. The end");
    }

    #[test]
    fn one_hit_per_keyword_sentence_pair() {
        let m = matcher(&["dup"]);
        let hits = m.find_matches("dup and dup again in one sentence. dup elsewhere.");
        assert_eq!(hits.len(), 2, "same sentence counts once, distinct sentences separately");
    }

    #[test]
    fn regex_metacharacters_in_keywords_are_literal() {
        let m = matcher(&["c++"]);
        let hits = m.find_matches("We write c++ here.");
        assert_eq!(hits.len(), 1);
    }
}
