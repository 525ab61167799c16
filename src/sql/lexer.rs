//! Tokenizer for the reference SQL front end (`SPEC_FULL.md` §4.7).

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Integer(i64),
    Float(f64),
    String(String),
    LParen,
    RParen,
    Comma,
    Star,
    Dot,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Semicolon,
    Eof,
}

pub fn tokenize(input: &str) -> crate::error::Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '\'' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != '\'' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(crate::error::Error::Syntax(
                        "unterminated string literal".into(),
                    ));
                }
                let s: String = chars[start..j].iter().collect();
                tokens.push(Token::String(s));
                i = j + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut j = i;
                let mut is_float = false;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    if chars[j] == '.' {
                        is_float = true;
                    }
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                if is_float {
                    let value = text
                        .parse::<f64>()
                        .map_err(|_| crate::error::Error::Syntax(format!("bad number '{}'", text)))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = text
                        .parse::<i64>()
                        .map_err(|_| crate::error::Error::Syntax(format!("bad number '{}'", text)))?;
                    tokens.push(Token::Integer(value));
                }
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                let mut j = i;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let text: String = chars[start..j].iter().collect();
                tokens.push(Token::Ident(text));
                i = j;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            other => {
                return Err(crate::error::Error::Syntax(format!(
                    "unexpected character '{}'",
                    other
                )))
            }
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_select_with_predicate() {
        let tokens = tokenize("SELECT id, name FROM users WHERE id = 1").unwrap();
        assert!(tokens.contains(&Token::Ident("SELECT".into())));
        assert!(tokens.contains(&Token::Comma));
        assert!(tokens.contains(&Token::Eq));
        assert!(tokens.contains(&Token::Integer(1)));
        assert_eq!(tokens.last(), Some(&Token::Eof));
    }

    #[test]
    fn tokenizes_string_literal() {
        let tokens = tokenize("'hello world'").unwrap();
        assert_eq!(tokens[0], Token::String("hello world".into()));
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        assert!(tokenize("'oops").is_err());
    }
}
