use serde::Serialize;

/// A maximal run of either whitespace or non-whitespace characters.
/// Indices count characters (Unicode scalar values), end exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub text: String,
    pub start_index: usize,
    pub end_index: usize,
}

impl Token {
    pub fn is_whitespace(&self) -> bool {
        self.text.chars().all(char::is_whitespace)
    }
}

pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_ws = false;
    let mut start = 0;

    for (index, ch) in text.chars().enumerate() {
        let ws = ch.is_whitespace();
        if !current.is_empty() && ws != current_ws {
            tokens.push(Token {
                text: std::mem::take(&mut current),
                start_index: start,
                end_index: index,
            });
            start = index;
        }
        current_ws = ws;
        current.push(ch);
    }

    if !current.is_empty() {
        let end_index = start + current.chars().count();
        tokens.push(Token {
            text: current,
            start_index: start,
            end_index,
        });
    }

    tokens
}

/// Rebuilds the text a token sequence was produced from.
pub fn join_tokens(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}
