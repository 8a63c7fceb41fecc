pub mod lowercase;
pub mod special_chars;
pub mod stemmer;
pub mod stopword;
