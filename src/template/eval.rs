//! Template evaluation

use super::parser::{Arg, Command, Node, Pipeline};
use super::value::TemplateValue;
use super::MAX_TEMPLATE_DEPTH;
use std::cmp::Ordering;

/// Data a template is rendered against
///
/// `.Name` resolves to `lookup("Name", &[])`; `.Name a b` resolves to
/// `lookup("Name", &[a, b])`.
pub trait TemplateData {
    fn lookup(&self, name: &str, args: &[TemplateValue]) -> Result<TemplateValue, String>;
}

/// Empty data source
pub struct NoData;

impl TemplateData for NoData {
    fn lookup(&self, name: &str, _args: &[TemplateValue]) -> Result<TemplateValue, String> {
        Err(format!("can't evaluate field {}", name))
    }
}

/// Current value of `.` inside the template
#[derive(Clone)]
enum Dot {
    Root,
    Value(TemplateValue),
}

struct Evaluator<'a> {
    data: &'a dyn TemplateData,
    out: String,
}

/// Render a parsed node list
pub fn render_nodes(nodes: &[Node], data: &dyn TemplateData) -> Result<String, String> {
    let mut evaluator = Evaluator {
        data,
        out: String::new(),
    };
    evaluator.walk(nodes, &Dot::Root, 0)?;
    Ok(evaluator.out)
}

impl<'a> Evaluator<'a> {
    fn walk(&mut self, nodes: &[Node], dot: &Dot, depth: usize) -> Result<(), String> {
        if depth > MAX_TEMPLATE_DEPTH {
            return Err(format!(
                "evaluation exceeds maximum depth of {}",
                MAX_TEMPLATE_DEPTH
            ));
        }
        for node in nodes {
            match node {
                Node::Text(text) => self.out.push_str(text),
                Node::Action(pipe) => {
                    let value = self.pipeline(pipe, dot, depth)?;
                    self.out.push_str(&value.to_string());
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.pipeline(cond, dot, depth)?.is_truthy() {
                        self.walk(then, dot, depth + 1)?;
                    } else {
                        self.walk(otherwise, dot, depth + 1)?;
                    }
                }
                Node::Range {
                    pipe,
                    body,
                    otherwise,
                } => match self.pipeline(pipe, dot, depth)? {
                    TemplateValue::List(items) if !items.is_empty() => {
                        for item in items {
                            self.walk(body, &Dot::Value(item), depth + 1)?;
                        }
                    }
                    TemplateValue::List(_) | TemplateValue::Null => {
                        self.walk(otherwise, dot, depth + 1)?
                    }
                    other => {
                        return Err(format!(
                            "line {}: range can't iterate over {}",
                            pipe.line,
                            other.kind()
                        ))
                    }
                },
            }
        }
        Ok(())
    }

    fn pipeline(
        &self,
        pipe: &Pipeline,
        dot: &Dot,
        depth: usize,
    ) -> Result<TemplateValue, String> {
        if depth > MAX_TEMPLATE_DEPTH {
            return Err(format!(
                "line {}: evaluation exceeds maximum depth of {}",
                pipe.line, MAX_TEMPLATE_DEPTH
            ));
        }
        let mut piped: Option<TemplateValue> = None;
        for command in &pipe.commands {
            piped = Some(
                self.command(command, dot, piped.take(), depth)
                    .map_err(|e| format!("line {}: {}", pipe.line, e))?,
            );
        }
        Ok(piped.unwrap_or(TemplateValue::Null))
    }

    fn command(
        &self,
        command: &Command,
        dot: &Dot,
        piped: Option<TemplateValue>,
        depth: usize,
    ) -> Result<TemplateValue, String> {
        let (head, rest) = command
            .args
            .split_first()
            .ok_or_else(|| "empty command".to_string())?;

        let mut args = rest
            .iter()
            .map(|arg| self.operand(arg, dot, depth))
            .collect::<Result<Vec<_>, _>>()?;
        args.extend(piped);

        match head {
            Arg::Func(name) => call_builtin(name, &args),
            Arg::Field { root, name } => {
                if !*root {
                    if let Dot::Value(value) = dot {
                        return Err(format!(
                            "can't evaluate field {} on {} value",
                            name,
                            value.kind()
                        ));
                    }
                }
                self.data.lookup(name, &args)
            }
            other => {
                if !args.is_empty() {
                    return Err("can't give argument to non-function".to_string());
                }
                self.operand(other, dot, depth)
            }
        }
    }

    fn operand(&self, arg: &Arg, dot: &Dot, depth: usize) -> Result<TemplateValue, String> {
        Ok(match arg {
            Arg::Dot => match dot {
                Dot::Root => TemplateValue::Null,
                Dot::Value(value) => value.clone(),
            },
            Arg::Root => TemplateValue::Null,
            Arg::Field { root, name } => {
                if !*root {
                    if let Dot::Value(value) = dot {
                        return Err(format!(
                            "can't evaluate field {} on {} value",
                            name,
                            value.kind()
                        ));
                    }
                }
                self.data.lookup(name, &[])?
            }
            Arg::Func(name) => call_builtin(name, &[])?,
            Arg::Str(s) => TemplateValue::String(s.clone()),
            Arg::Int(i) => TemplateValue::Int(*i),
            Arg::Uint(u) => TemplateValue::Uint(*u),
            Arg::Float(x) => TemplateValue::Float(*x),
            Arg::Bool(b) => TemplateValue::Bool(*b),
            Arg::Nil => TemplateValue::Null,
            Arg::Sub(pipe) => self.pipeline(pipe, dot, depth + 1)?,
        })
    }
}

fn arity(name: &str, args: &[TemplateValue], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        return Err(format!(
            "wrong number of args for {}: got {}",
            name,
            args.len()
        ));
    }
    Ok(())
}

fn ordering(name: &str, args: &[TemplateValue]) -> Result<Ordering, String> {
    arity(name, args, 2, 2)?;
    args[0].compare(&args[1]).ok_or_else(|| {
        format!(
            "incompatible types for comparison: {} and {}",
            args[0].kind(),
            args[1].kind()
        )
    })
}

fn call_builtin(name: &str, args: &[TemplateValue]) -> Result<TemplateValue, String> {
    let value = match name {
        "eq" => {
            if args.len() < 2 {
                return Err("missing argument for comparison".to_string());
            }
            TemplateValue::Bool(args[1..].iter().any(|other| args[0].loose_eq(other)))
        }
        "ne" => {
            arity(name, args, 2, 2)?;
            TemplateValue::Bool(!args[0].loose_eq(&args[1]))
        }
        "lt" => TemplateValue::Bool(ordering(name, args)? == Ordering::Less),
        "le" => TemplateValue::Bool(ordering(name, args)? != Ordering::Greater),
        "gt" => TemplateValue::Bool(ordering(name, args)? == Ordering::Greater),
        "ge" => TemplateValue::Bool(ordering(name, args)? != Ordering::Less),
        "not" => {
            arity(name, args, 1, 1)?;
            TemplateValue::Bool(!args[0].is_truthy())
        }
        "and" => {
            arity(name, args, 1, usize::MAX)?;
            args.iter()
                .find(|v| !v.is_truthy())
                .unwrap_or(&args[args.len() - 1])
                .clone()
        }
        "or" => {
            arity(name, args, 1, usize::MAX)?;
            args.iter()
                .find(|v| v.is_truthy())
                .unwrap_or(&args[args.len() - 1])
                .clone()
        }
        "len" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                TemplateValue::String(s) => TemplateValue::Int(s.len() as i64),
                TemplateValue::List(items) => TemplateValue::Int(items.len() as i64),
                other => return Err(format!("len of {}", other.kind())),
            }
        }
        "join" => {
            arity(name, args, 2, 2)?;
            match (&args[0], &args[1]) {
                (TemplateValue::List(items), TemplateValue::String(sep)) => TemplateValue::String(
                    items
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(sep),
                ),
                (a, b) => return Err(format!("join of {} with {}", a.kind(), b.kind())),
            }
        }
        "print" => TemplateValue::String(args.iter().map(|v| v.to_string()).collect()),
        _ => return Err(format!("function {:?} not defined", name)),
    };
    Ok(value)
}
