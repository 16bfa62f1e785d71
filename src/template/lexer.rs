//! Template scanner
//!
//! Splits template source into literal text and `{{ ... }}` actions, applying
//! `{{-`/`-}}` whitespace trimming and dropping `{{/* ... */}}` comments, then
//! tokenizes each action.

/// A token inside an action
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `.`
    Dot,
    /// `.Name`
    Field(String),
    /// `$`
    Root,
    /// `$.Name`
    RootField(String),
    /// Bare identifier: keyword, function name, `true`/`false`/`nil`
    Ident(String),
    /// String literal with escapes resolved
    Str(String),
    /// Numeric literal, unparsed
    Number(String),
    Pipe,
    LParen,
    RParen,
}

/// A scanned piece of template source
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Text(String),
    Action { tokens: Vec<Token>, line: usize },
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

/// Scan template source into text and action items
pub fn scan(source: &str) -> Result<Vec<Item>, String> {
    let mut items: Vec<Item> = Vec::new();
    let mut pos = 0;
    let mut trim_next_text = false;

    while pos < source.len() {
        let rest = &source[pos..];
        let open = match rest.find(OPEN) {
            Some(i) => i,
            None => {
                push_text(&mut items, rest, trim_next_text, false);
                break;
            }
        };

        let action_start = pos + open + OPEN.len();
        let after_open = &source[action_start..];
        let trim_before = after_open.starts_with('-')
            && after_open[1..].starts_with(|c: char| c.is_ascii_whitespace());
        push_text(&mut items, &rest[..open], trim_next_text, trim_before);

        let body_start = if trim_before { action_start + 1 } else { action_start };
        let line = line_of(source, pos + open);
        let close_rel = find_close(&source[body_start..])
            .ok_or_else(|| format!("line {}: unclosed action", line))?;
        let close_abs = body_start + close_rel;

        let mut body = &source[body_start..close_abs];
        let trim_after = body.ends_with('-')
            && body[..body.len() - 1].ends_with(|c: char| c.is_ascii_whitespace());
        if trim_after {
            body = &body[..body.len() - 1];
        }
        trim_next_text = trim_after;
        pos = close_abs + CLOSE.len();

        let trimmed = body.trim();
        if trimmed.starts_with("/*") {
            if !trimmed.ends_with("*/") {
                return Err(format!("line {}: unclosed comment", line));
            }
            continue;
        }

        let tokens = tokenize(body).map_err(|e| format!("line {}: {}", line, e))?;
        if tokens.is_empty() {
            return Err(format!("line {}: missing value for command", line));
        }
        items.push(Item::Action { tokens, line });
    }

    Ok(items)
}

fn push_text(items: &mut Vec<Item>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }
}

/// Find the closing delimiter, skipping over quoted strings
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
            }
            b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn take_ident(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

/// Tokenize the body of a single action
pub fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                if chars.get(i + 1).is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') {
                    let (name, end) = take_ident(&chars, i + 1);
                    if chars.get(end) == Some(&'.') {
                        return Err(format!("chained field access .{}. is not supported", name));
                    }
                    tokens.push(Token::Field(name));
                    i = end;
                } else if chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                    let end = scan_number(&chars, i);
                    tokens.push(Token::Number(chars[i..end].iter().collect()));
                    i = end;
                } else {
                    tokens.push(Token::Dot);
                    i += 1;
                }
            }
            '$' => {
                if chars.get(i + 1) == Some(&'.')
                    && chars.get(i + 2).is_some_and(|c| c.is_ascii_alphabetic() || *c == '_')
                {
                    let (name, end) = take_ident(&chars, i + 2);
                    tokens.push(Token::RootField(name));
                    i = end;
                } else if chars.get(i + 1).is_some_and(|c| is_ident_char(*c)) {
                    return Err("template variables are not supported".to_string());
                } else {
                    tokens.push(Token::Root);
                    i += 1;
                }
            }
            '"' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated quoted string".to_string()),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = match chars.get(i + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('r') => '\r',
                                Some('"') => '"',
                                Some('\\') => '\\',
                                Some(other) => {
                                    return Err(format!("unknown escape sequence \\{}", other))
                                }
                                None => return Err("unterminated quoted string".to_string()),
                            };
                            value.push(escaped);
                            i += 2;
                        }
                        Some(other) => {
                            value.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '`' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '`' {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err("unterminated raw string".to_string());
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || ((c == '-' || c == '+') && next_is_digit(&chars, i)) => {
                let end = scan_number(&chars, i);
                tokens.push(Token::Number(chars[i..end].iter().collect()));
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let (name, end) = take_ident(&chars, i);
                tokens.push(Token::Ident(name));
                i = end;
            }
            other => return Err(format!("unexpected character {:?}", other)),
        }
    }

    Ok(tokens)
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(|c| c.is_ascii_digit() || *c == '.')
}

fn scan_number(chars: &[char], start: usize) -> usize {
    let mut end = start;
    if chars[end] == '-' || chars[end] == '+' {
        end += 1;
    }
    while end < chars.len() {
        let c = chars[end];
        let exponent_sign =
            (c == '-' || c == '+') && matches!(chars.get(end - 1), Some('e') | Some('E'));
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
            end += 1;
        } else {
            break;
        }
    }
    end
}
