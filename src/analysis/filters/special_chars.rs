use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

/// Strips every non-alphanumeric character from each token; tokens that
/// end up empty are dropped.
pub struct SpecialCharsFilter;

impl TokenFilter for SpecialCharsFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens.into_iter()
            .filter_map(|mut token| {
                token.text.retain(|c| c.is_alphanumeric());
                if token.text.is_empty() {
                    None
                } else {
                    token.length = token.text.len();
                    Some(token)
                }
            })
            .collect()
    }

    fn name(&self) -> &str {
        "special_chars"
    }
}
