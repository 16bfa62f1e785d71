//! Template parser
//!
//! Builds a node tree from scanned items. Supports `if`/`else if`/`else`,
//! `range`/`else`, pipelines and parenthesized sub-pipelines.

use super::lexer::{Item, Token};
use super::MAX_TEMPLATE_DEPTH;

/// An operand or function name inside a command
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Dot,
    Root,
    /// `.Name` (root = false) or `$.Name` (root = true)
    Field { root: bool, name: String },
    Func(String),
    Str(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Nil,
    Sub(Box<Pipeline>),
}

/// One stage of a pipeline: an operand followed by its arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Arg>,
}

/// Commands joined by `|`; each command's result is passed as the final
/// argument of the next
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Action(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// How a block list ended
enum Terminator {
    Eof,
    End,
    Else(Vec<Token>, usize),
}

struct Parser {
    items: std::vec::IntoIter<Item>,
}

/// Parse scanned items into a node list
pub fn parse(items: Vec<Item>) -> Result<Vec<Node>, String> {
    let mut parser = Parser {
        items: items.into_iter(),
    };
    let (nodes, terminator) = parser.parse_list(0)?;
    match terminator {
        Terminator::Eof => Ok(nodes),
        Terminator::End => Err("unexpected {{end}}".to_string()),
        Terminator::Else(_, line) => Err(format!("line {}: unexpected {{{{else}}}}", line)),
    }
}

fn keyword(tokens: &[Token]) -> Option<&str> {
    match tokens.first() {
        Some(Token::Ident(name)) if matches!(name.as_str(), "if" | "else" | "end" | "range") => {
            Some(name.as_str())
        }
        _ => None,
    }
}

impl Parser {
    fn parse_list(&mut self, depth: usize) -> Result<(Vec<Node>, Terminator), String> {
        if depth > MAX_TEMPLATE_DEPTH {
            return Err(format!(
                "template nesting exceeds maximum depth of {}",
                MAX_TEMPLATE_DEPTH
            ));
        }

        let mut nodes = Vec::new();
        while let Some(item) = self.items.next() {
            let (tokens, line) = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action { tokens, line } => (tokens, line),
            };

            match keyword(&tokens) {
                Some("end") => {
                    if tokens.len() > 1 {
                        return Err(format!("line {}: unexpected tokens after end", line));
                    }
                    return Ok((nodes, Terminator::End));
                }
                Some("else") => return Ok((nodes, Terminator::Else(tokens, line))),
                Some("if") => nodes.push(self.parse_if(&tokens[1..], line, depth)?),
                Some("range") => {
                    let pipe = parse_pipeline(&tokens[1..], line, depth)?;
                    let (body, terminator) = self.parse_list(depth + 1)?;
                    let otherwise = match terminator {
                        Terminator::End => Vec::new(),
                        Terminator::Else(else_tokens, else_line) => {
                            if else_tokens.len() > 1 {
                                return Err(format!(
                                    "line {}: unexpected tokens after else in range",
                                    else_line
                                ));
                            }
                            self.expect_end(depth, line)?
                        }
                        Terminator::Eof => {
                            return Err(format!("line {}: unterminated range", line))
                        }
                    };
                    nodes.push(Node::Range {
                        pipe,
                        body,
                        otherwise,
                    });
                }
                _ => nodes.push(Node::Action(parse_pipeline(&tokens, line, depth)?)),
            }
        }
        Ok((nodes, Terminator::Eof))
    }

    fn parse_if(&mut self, cond: &[Token], line: usize, depth: usize) -> Result<Node, String> {
        let cond = parse_pipeline(cond, line, depth)?;
        let (then, terminator) = self.parse_list(depth + 1)?;
        let otherwise = match terminator {
            Terminator::End => Vec::new(),
            Terminator::Else(else_tokens, else_line) => {
                if matches!(else_tokens.get(1), Some(Token::Ident(k)) if k == "if") {
                    // `else if` shares the enclosing `end`
                    vec![self.parse_if(&else_tokens[2..], else_line, depth + 1)?]
                } else if else_tokens.len() > 1 {
                    return Err(format!("line {}: unexpected tokens after else", else_line));
                } else {
                    self.expect_end(depth, line)?
                }
            }
            Terminator::Eof => return Err(format!("line {}: unterminated if", line)),
        };
        Ok(Node::If {
            cond,
            then,
            otherwise,
        })
    }

    fn expect_end(&mut self, depth: usize, line: usize) -> Result<Vec<Node>, String> {
        let (nodes, terminator) = self.parse_list(depth + 1)?;
        match terminator {
            Terminator::End => Ok(nodes),
            Terminator::Else(_, else_line) => {
                Err(format!("line {}: duplicate else", else_line))
            }
            Terminator::Eof => Err(format!("line {}: missing end", line)),
        }
    }
}

/// Parse a token slice into a pipeline
pub fn parse_pipeline(tokens: &[Token], line: usize, depth: usize) -> Result<Pipeline, String> {
    if depth > MAX_TEMPLATE_DEPTH {
        return Err(format!(
            "line {}: expression nesting exceeds maximum depth of {}",
            line, MAX_TEMPLATE_DEPTH
        ));
    }
    if tokens.is_empty() {
        return Err(format!("line {}: missing value for command", line));
    }

    let mut commands = Vec::new();
    let mut args = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            Token::Pipe => {
                if args.is_empty() {
                    return Err(format!("line {}: missing command before |", line));
                }
                commands.push(Command {
                    args: std::mem::take(&mut args),
                });
                i += 1;
            }
            Token::LParen => {
                let close = matching_paren(tokens, i)
                    .ok_or_else(|| format!("line {}: unclosed left paren", line))?;
                let inner = parse_pipeline(&tokens[i + 1..close], line, depth + 1)?;
                args.push(Arg::Sub(Box::new(inner)));
                i = close + 1;
            }
            Token::RParen => return Err(format!("line {}: unexpected right paren", line)),
            token => {
                args.push(parse_arg(token, line)?);
                i += 1;
            }
        }
    }
    if args.is_empty() {
        return Err(format!("line {}: missing command after |", line));
    }
    commands.push(Command { args });

    Ok(Pipeline { commands, line })
}

fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_arg(token: &Token, line: usize) -> Result<Arg, String> {
    Ok(match token {
        Token::Dot => Arg::Dot,
        Token::Root => Arg::Root,
        Token::Field(name) => Arg::Field {
            root: false,
            name: name.clone(),
        },
        Token::RootField(name) => Arg::Field {
            root: true,
            name: name.clone(),
        },
        Token::Str(s) => Arg::Str(s.clone()),
        Token::Number(raw) => parse_number(raw)
            .ok_or_else(|| format!("line {}: bad number syntax: {}", line, raw))?,
        Token::Ident(name) => match name.as_str() {
            "true" => Arg::Bool(true),
            "false" => Arg::Bool(false),
            "nil" => Arg::Nil,
            "if" | "else" | "end" | "range" => {
                return Err(format!("line {}: unexpected keyword {}", line, name))
            }
            _ => Arg::Func(name.clone()),
        },
        Token::Pipe | Token::LParen | Token::RParen => {
            return Err(format!("line {}: unexpected token", line))
        }
    })
}

fn parse_number(raw: &str) -> Option<Arg> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Arg::Int(i));
    }
    if let Ok(u) = raw.parse::<u64>() {
        return Some(Arg::Uint(u));
    }
    if let Some(hex) = raw.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok().map(Arg::Int);
    }
    raw.parse::<f64>().ok().map(Arg::Float)
}
