use unicode_segmentation::UnicodeSegmentation;
use crate::analysis::token::Token;

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;

    fn name(&self) -> &str;
}

/// Unicode word-boundary tokenizer.
#[derive(Debug, Clone)]
pub struct StandardTokenizer {
    pub max_token_length: usize,
}

impl Default for StandardTokenizer {
    fn default() -> Self {
        StandardTokenizer {
            max_token_length: 255,
        }
    }
}

impl Tokenizer for StandardTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;

        for (offset, word) in text.unicode_word_indices() {
            if word.len() <= self.max_token_length {
                tokens.push(Token::new(word.to_string(), position, offset));
                position += 1;
            }
        }

        tokens
    }

    fn name(&self) -> &str {
        "standard"
    }
}

/// Splits on whitespace runs only; punctuation is preserved inside tokens.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;

        for (offset, word) in text.split_whitespace().map(|w| {
            // split_whitespace drops offsets; recover them from pointers
            let offset = w.as_ptr() as usize - text.as_ptr() as usize;
            (offset, w)
        }) {
            tokens.push(Token::new(word.to_string(), position, offset));
            position += 1;
        }

        tokens
    }

    fn name(&self) -> &str {
        "whitespace"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_splits_on_word_boundaries() {
        let tokens = StandardTokenizer::default().tokenize("Hello, World! 42");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello", "World", "42"]);
        assert_eq!(tokens[1].position, 1);
    }

    #[test]
    fn whitespace_preserves_punctuation() {
        let tokens = WhitespaceTokenizer.tokenize("foo-bar,  baz!");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["foo-bar,", "baz!"]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(StandardTokenizer::default().tokenize("").is_empty());
        assert!(WhitespaceTokenizer.tokenize("   ").is_empty());
    }
}
