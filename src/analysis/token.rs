use serde::{Serialize, Deserialize};

/// One normalized text unit produced by an analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub position: u32,   // Token offset in the field, used by phrase checks
    pub offset: usize,   // Byte offset in the original text
    pub length: usize,
}

impl Token {
    pub fn new(text: String, position: u32, offset: usize) -> Self {
        let length = text.len();
        Token {
            text,
            position,
            offset,
            length,
        }
    }
}
