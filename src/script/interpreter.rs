use super::ast::{BinaryOperator, Expression, Node, Template, UnaryOperator};
use crate::error::{Error, Result};
use crate::host::Scope;
use serde_json::{json, Number, Value};
use std::fs;

/// Loop control flow state
#[derive(Debug, Clone, Copy, PartialEq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

struct LoopFrame {
    item_name: String,
    item: Value,
    index: usize,
}

/// Runs a parsed script against an engine scope
///
/// Output is written through the scope as it is produced, so an error halfway
/// through leaves the partial output in the capture the engine discards.
pub struct Interpreter<'s, 'a> {
    scope: &'s Scope<'a>,
    loops: Vec<LoopFrame>,
}

impl<'s, 'a> Interpreter<'s, 'a> {
    pub fn new(scope: &'s Scope<'a>) -> Self {
        Self {
            scope,
            loops: Vec::new(),
        }
    }

    pub fn run(&mut self, template: &Template) -> Result<()> {
        self.exec_nodes(&template.nodes).map(|_| ())
    }

    fn failure(&self, message: impl Into<String>) -> Error {
        Error::script(self.scope.script(), message)
    }

    fn exec_nodes(&mut self, nodes: &[Node]) -> Result<Flow> {
        for node in nodes {
            match self.exec_node(node)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_node(&mut self, node: &Node) -> Result<Flow> {
        match node {
            Node::Text(text) => self.scope.write(text)?,

            Node::Output { expr, raw } => {
                let value = value_to_string(&self.evaluate(expr)?);
                if *raw {
                    self.scope.write(&value)?;
                } else {
                    self.scope.print_escaped(&value)?;
                }
            }

            Node::Conditional {
                condition,
                then_branch,
                else_if_branches,
                else_branch,
            } => {
                if is_truthy(&self.evaluate(condition)?) {
                    return self.exec_nodes(then_branch);
                }
                for (condition, body) in else_if_branches {
                    if is_truthy(&self.evaluate(condition)?) {
                        return self.exec_nodes(body);
                    }
                }
                if let Some(body) = else_branch {
                    return self.exec_nodes(body);
                }
            }

            Node::Loop {
                item_name,
                collection,
                body,
            } => self.exec_loop(item_name, collection, body)?,

            Node::Break => return Ok(Flow::Break),
            Node::Continue => return Ok(Flow::Continue),

            Node::Index => {
                if let Some(frame) = self.loops.last() {
                    self.scope.write(&frame.index.to_string())?;
                }
            }

            Node::Escape { value, stages } => {
                let value = value_to_string(&self.evaluate(value)?);
                self.scope.print_escaped_with(&value, &stages)?;
            }

            Node::Include(name) => {
                let name = self.evaluate_name(name, "include")?;
                match self.scope.fetch(&name)? {
                    Ok(output) => self.scope.write(&output)?,
                    Err(err) => {
                        return Err(self.failure(format!("include '{}' failed: {}", name, err)))
                    }
                }
            }

            Node::Resource(name) => {
                let name = self.evaluate_name(name, "resource")?;
                let path = self
                    .scope
                    .find_resource(&name)
                    .ok_or_else(|| self.failure(format!("resource '{}' not found", name)))?;
                let content = fs::read_to_string(&path)?;
                self.scope.write(&content)?;
            }

            Node::Raise(message) => {
                let message = value_to_string(&self.evaluate(message)?);
                return Err(self.failure(message));
            }
        }

        Ok(Flow::Normal)
    }

    fn exec_loop(&mut self, item_name: &str, collection: &Expression, body: &[Node]) -> Result<()> {
        let items: Vec<Value> = match self.evaluate(collection)? {
            Value::Array(items) => items,
            // Objects iterate as key/value pairs
            Value::Object(map) => map
                .into_iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(self.failure(format!(
                    "cannot iterate over {} in foreach {}",
                    type_name(&other),
                    item_name
                )))
            }
        };

        for (index, item) in items.into_iter().enumerate() {
            self.loops.push(LoopFrame {
                item_name: item_name.to_string(),
                item,
                index,
            });
            let flow = self.exec_nodes(body);
            self.loops.pop();

            if flow? == Flow::Break {
                break;
            }
        }

        Ok(())
    }

    fn evaluate_name(&self, expr: &Expression, directive: &str) -> Result<String> {
        match self.evaluate(expr)? {
            Value::String(name) if !name.is_empty() => Ok(name),
            other => Err(self.failure(format!(
                "{} expects a name, got {}",
                directive,
                type_name(&other)
            ))),
        }
    }

    fn resolve_variable(&self, name: &str) -> Value {
        if let Some(frame) = self.loops.iter().rev().find(|f| f.item_name == name) {
            return frame.item.clone();
        }

        match name {
            "this" => self.scope.this().to_value(),
            "index" => self
                .loops
                .last()
                .map(|frame| json!(frame.index))
                .unwrap_or(Value::Null),
            _ => self.scope.local(name).cloned().unwrap_or(Value::Null),
        }
    }

    fn is_loop_item(&self, name: &str) -> bool {
        self.loops.iter().any(|f| f.item_name == name)
    }

    fn evaluate(&self, expr: &Expression) -> Result<Value> {
        match expr {
            Expression::String(s) => Ok(Value::String(s.clone())),
            Expression::Number(n) => Ok(number(*n)),
            Expression::Boolean(b) => Ok(Value::Bool(*b)),
            Expression::Null => Ok(Value::Null),

            Expression::Variable(name) => Ok(self.resolve_variable(name)),

            Expression::PropertyAccess { object, property } => {
                // this.name reads the binding without copying every other one
                if let Expression::Variable(root) = object.as_ref() {
                    if root == "this" && !self.is_loop_item(root) {
                        return Ok(self.scope.this().get(property).cloned().unwrap_or(Value::Null));
                    }
                }
                Ok(property_of(&self.evaluate(object)?, property))
            }

            Expression::Array(items) => items
                .iter()
                .map(|item| self.evaluate(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),

            Expression::FunctionCall { name, args } => self.evaluate_function_call(name, args),

            Expression::BinaryOp { left, op, right } => {
                let left = self.evaluate(left)?;
                match op {
                    BinaryOperator::And if !is_truthy(&left) => Ok(Value::Bool(false)),
                    BinaryOperator::Or if is_truthy(&left) => Ok(Value::Bool(true)),
                    _ => Ok(binary_op(&left, *op, &self.evaluate(right)?)),
                }
            }

            Expression::UnaryOp { op, operand } => {
                let operand = self.evaluate(operand)?;
                Ok(match op {
                    UnaryOperator::Not => Value::Bool(!is_truthy(&operand)),
                    UnaryOperator::Minus => match operand.as_f64() {
                        Some(n) => number(-n),
                        None => Value::Null,
                    },
                })
            }
        }
    }

    fn evaluate_function_call(&self, name: &str, args: &[Expression]) -> Result<Value> {
        let args = args
            .iter()
            .map(|arg| self.evaluate(arg))
            .collect::<Result<Vec<_>>>()?;

        let [arg] = args.as_slice() else {
            return Err(self.failure(format!(
                "{}() takes one argument, got {}",
                name,
                args.len()
            )));
        };

        match name {
            "len" | "length" => {
                let len = match arg {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    _ => 0,
                };
                Ok(json!(len))
            }
            "upper" => Ok(map_string(arg, str::to_uppercase)),
            "lower" => Ok(map_string(arg, str::to_lowercase)),
            "trim" => Ok(map_string(arg, |s| s.trim().to_string())),
            "json" => Ok(Value::String(serde_json::to_string(arg)?)),
            _ => Err(self.failure(format!("unknown function '{}'", name))),
        }
    }
}

fn map_string(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}

fn property_of(value: &Value, property: &str) -> Value {
    match value {
        Value::Object(map) => map.get(property).cloned().unwrap_or(Value::Null),
        Value::Array(items) => match property {
            "length" | "size" => json!(items.len()),
            _ => property
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index).cloned())
                .unwrap_or(Value::Null),
        },
        Value::String(s) => match property {
            "length" | "size" => json!(s.chars().count()),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// Numbers print without a fractional part when they have none
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        json!(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn binary_op(left: &Value, op: BinaryOperator, right: &Value) -> Value {
    use BinaryOperator::*;

    let numbers = left.as_f64().zip(right.as_f64());

    match op {
        Equal => Value::Bool(loosely_equal(left, right)),
        NotEqual => Value::Bool(!loosely_equal(left, right)),

        LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
            let ordering = match (left, right) {
                (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
                _ => numbers.and_then(|(l, r)| l.partial_cmp(&r)),
            };
            Value::Bool(ordering.is_some_and(|ordering| match op {
                LessThan => ordering.is_lt(),
                LessThanOrEqual => ordering.is_le(),
                GreaterThan => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }

        And => Value::Bool(is_truthy(left) && is_truthy(right)),
        Or => Value::Bool(is_truthy(left) || is_truthy(right)),

        Add => match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => Value::String(format!(
                "{}{}",
                value_to_string(left),
                value_to_string(right)
            )),
            _ => numbers.map(|(l, r)| number(l + r)).unwrap_or(Value::Null),
        },
        Subtract => numbers.map(|(l, r)| number(l - r)).unwrap_or(Value::Null),
        Multiply => numbers.map(|(l, r)| number(l * r)).unwrap_or(Value::Null),
        Divide => numbers
            .filter(|(_, r)| *r != 0.0)
            .map(|(l, r)| number(l / r))
            .unwrap_or(Value::Null),
        Modulo => numbers
            .filter(|(_, r)| *r != 0.0)
            .map(|(l, r)| number(l % r))
            .unwrap_or(Value::Null),
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match left.as_f64().zip(right.as_f64()) {
        Some((l, r)) => l == r,
        None => left == right,
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
