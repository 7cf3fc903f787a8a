//! Sentence-boundary chunking of streamed model output for synthesis.
//!
//! Tokens are appended as they arrive; whenever the buffer contains a
//! complete sentence (or clause, depending on [`FlushPolicy`]) it is cut off
//! and returned as speakable text. If the model produces a long run without
//! punctuation, the buffer is flushed after `max_tokens` tokens anyway so
//! time-to-first-audio stays bounded.

use parley_core::FlushPolicy;

/// Incremental splitter from model tokens to synthesis chunks.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    policy: FlushPolicy,
    max_tokens: usize,
    buffer: String,
    tokens_since_flush: usize,
}

impl SentenceChunker {
    pub fn new(policy: FlushPolicy, max_tokens: usize) -> Self {
        Self {
            policy,
            max_tokens: max_tokens.max(1),
            buffer: String::new(),
            tokens_since_flush: 0,
        }
    }

    /// Append one token and return every chunk it completed, in order.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        self.tokens_since_flush += 1;

        let mut chunks = Vec::new();

        if self.policy != FlushPolicy::TokenCount {
            while let Some(end) = boundary(&self.buffer, self.policy) {
                let rest = self.buffer.split_off(end);
                let chunk = std::mem::replace(&mut self.buffer, rest);
                self.tokens_since_flush = 0;
                if let Some(text) = speakable(&chunk) {
                    chunks.push(text);
                }
            }
        }

        if self.tokens_since_flush >= self.max_tokens {
            if let Some(text) = self.flush_at_word() {
                chunks.push(text);
            }
        }

        chunks
    }

    /// Flush whatever is left once generation has completed.
    pub fn finish(&mut self) -> Option<String> {
        self.tokens_since_flush = 0;
        let rest = std::mem::take(&mut self.buffer);
        speakable(&rest)
    }

    /// Text received but not yet flushed.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Drop any pending text.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.tokens_since_flush = 0;
    }

    /// Cut at the last whitespace so a word still being streamed is not
    /// split.
    fn flush_at_word(&mut self) -> Option<String> {
        self.tokens_since_flush = 0;
        let cut = if self.buffer.ends_with(char::is_whitespace) {
            self.buffer.len()
        } else {
            self.buffer
                .rfind(char::is_whitespace)
                .map_or(self.buffer.len(), |i| i + 1)
        };
        let rest = self.buffer.split_off(cut);
        let chunk = std::mem::replace(&mut self.buffer, rest);
        speakable(&chunk)
    }
}

/// Byte offset just past the first boundary punctuation that is followed by
/// whitespace.
fn boundary(text: &str, policy: FlushPolicy) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let is_boundary = match c {
            '.' | '!' | '?' => true,
            ',' | ';' | ':' => policy == FlushPolicy::Clause,
            _ => false,
        };
        if is_boundary {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    return Some(i + c.len_utf8());
                }
            }
        }
    }
    None
}

/// Reduce generated text to what should be spoken aloud.
///
/// Strips inline markdown (headings, list markers, emphasis, inline code,
/// links) and HTML tags, and collapses whitespace. Returns `None` when
/// nothing speakable remains.
pub fn speakable(text: &str) -> Option<String> {
    let mut result = String::with_capacity(text.len());

    for line in text.lines() {
        let line = strip_line_markdown(line);
        let line = line.trim();
        if line.is_empty() || is_horizontal_rule(line) {
            continue;
        }
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(line);
    }

    let collapsed = collapse_whitespace(&result);
    if collapsed.chars().any(char::is_alphanumeric) {
        Some(collapsed)
    } else {
        None
    }
}

fn strip_line_markdown(line: &str) -> String {
    let mut s = line.trim_start();

    while let Some(rest) = s.strip_prefix('>') {
        s = rest.trim_start();
    }
    if s.starts_with('#') {
        s = s.trim_start_matches('#').trim_start();
    }
    if let Some(rest) = s
        .strip_prefix("- ")
        .or_else(|| s.strip_prefix("* "))
        .or_else(|| s.strip_prefix("+ "))
    {
        s = rest;
    }

    let s = strip_links(s);
    let s = strip_html_tags(&s);
    s.replace("**", "")
        .replace("__", "")
        .replace("~~", "")
        .replace(['*', '`'], "")
}

fn strip_links(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '[' {
            let link_text: String = chars.by_ref().take_while(|&c| c != ']').collect();
            if chars.peek() == Some(&'(') {
                chars.next();
                let _url: String = chars.by_ref().take_while(|&c| c != ')').collect();
                result.push_str(&link_text);
                continue;
            }
            result.push('[');
            result.push_str(&link_text);
            result.push(']');
        } else {
            result.push(c);
        }
    }

    result
}

fn strip_html_tags(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;

    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    result
}

fn is_horizontal_rule(line: &str) -> bool {
    let chars: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    chars.len() >= 3
        && chars.iter().all(|&c| c == '-' || c == '*' || c == '_')
        && chars.windows(2).all(|w| w[0] == w[1])
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(chunker: &mut SentenceChunker, tokens: &[&str]) -> Vec<String> {
        tokens.iter().flat_map(|t| chunker.push(t)).collect()
    }

    #[test]
    fn flushes_at_sentence_punctuation() {
        let mut chunker = SentenceChunker::new(FlushPolicy::Sentence, 24);
        let chunks = feed(
            &mut chunker,
            &["Plants", " use", " light.", " They", " make", " sugar", "!", " Then"],
        );
        assert_eq!(chunks, vec!["Plants use light.", "They make sugar!"]);
        assert_eq!(chunker.pending(), " Then");
        assert_eq!(chunker.finish().as_deref(), Some("Then"));
        assert_eq!(chunker.pending(), "");
    }

    #[test]
    fn punctuation_without_following_space_waits() {
        let mut chunker = SentenceChunker::new(FlushPolicy::Sentence, 24);
        assert!(chunker.push("Version 3.5").is_empty());
        assert!(chunker.push(" is out.").is_empty());
        assert_eq!(chunker.push(" Yes"), vec!["Version 3.5 is out."]);
    }

    #[test]
    fn clause_policy_splits_on_commas() {
        let mut chunker = SentenceChunker::new(FlushPolicy::Clause, 24);
        let chunks = feed(&mut chunker, &["First,", " second;", " third"]);
        assert_eq!(chunks, vec!["First,", "second;"]);
    }

    #[test]
    fn long_unpunctuated_run_flushes_at_token_limit() {
        let mut chunker = SentenceChunker::new(FlushPolicy::Sentence, 4);
        let chunks = feed(&mut chunker, &["one", " two", " three", " fo"]);
        assert_eq!(chunks, vec!["one two three"]);
        assert_eq!(chunker.pending(), "fo");
    }

    #[test]
    fn token_count_policy_ignores_punctuation() {
        let mut chunker = SentenceChunker::new(FlushPolicy::TokenCount, 3);
        assert!(chunker.push("Hi.").is_empty());
        assert!(chunker.push(" Yes.").is_empty());
        assert_eq!(chunker.push(" No. "), vec!["Hi. Yes. No."]);
    }

    #[test]
    fn markdown_is_not_spoken() {
        assert_eq!(
            speakable("## **Photosynthesis** uses [light](https://x.y) and `CO2`").as_deref(),
            Some("Photosynthesis uses light and CO2")
        );
        assert_eq!(speakable("- item one").as_deref(), Some("item one"));
        assert_eq!(speakable("---"), None);
        assert_eq!(speakable("  ...  "), None);
    }
}
