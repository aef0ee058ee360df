//! Build description syntax tree
//!
//! The synthesized project is a flat list of [`BuildNode`]s. Values are
//! rendered in the host build language's syntax (`name(args, key : value)`,
//! single quoted strings, `[...]` arrays).

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AstValue {
    String(String),
    Bool(bool),
    Number(i64),
    Id(String),
    Array(Vec<AstValue>),
    Index { value: Box<AstValue>, index: usize },
    Call(FunctionCall),
    Method {
        object: Box<AstValue>,
        name: String,
        args: Vec<AstValue>,
    },
}

impl AstValue {
    pub fn id(name: impl Into<String>) -> Self {
        AstValue::Id(name.into())
    }

    pub fn index(value: AstValue, index: usize) -> Self {
        AstValue::Index {
            value: Box::new(value),
            index,
        }
    }

    pub fn method(object: AstValue, name: &str, args: Vec<AstValue>) -> Self {
        AstValue::Method {
            object: Box::new(object),
            name: name.to_string(),
            args,
        }
    }

    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AstValue::Array(items.into_iter().map(|s| AstValue::String(s.into())).collect())
    }
}

impl From<&str> for AstValue {
    fn from(value: &str) -> Self {
        AstValue::String(value.to_string())
    }
}

impl From<String> for AstValue {
    fn from(value: String) -> Self {
        AstValue::String(value)
    }
}

impl From<&String> for AstValue {
    fn from(value: &String) -> Self {
        AstValue::String(value.clone())
    }
}

impl From<bool> for AstValue {
    fn from(value: bool) -> Self {
        AstValue::Bool(value)
    }
}

impl From<i64> for AstValue {
    fn from(value: i64) -> Self {
        AstValue::Number(value)
    }
}

impl From<Vec<AstValue>> for AstValue {
    fn from(value: Vec<AstValue>) -> Self {
        AstValue::Array(value)
    }
}

impl From<FunctionCall> for AstValue {
    fn from(value: FunctionCall) -> Self {
        AstValue::Call(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<AstValue>,
    pub kwargs: IndexMap<String, AstValue>,
}

impl FunctionCall {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            kwargs: IndexMap::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<AstValue>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AstValue>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn kwarg(mut self, key: &str, value: impl Into<AstValue>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum BuildNode {
    Assignment { var_name: String, value: AstValue },
    Expression { value: AstValue },
}

impl BuildNode {
    pub fn assign(var_name: &str, value: impl Into<AstValue>) -> Self {
        BuildNode::Assignment {
            var_name: var_name.to_string(),
            value: value.into(),
        }
    }

    pub fn expr(value: impl Into<AstValue>) -> Self {
        BuildNode::Expression {
            value: value.into(),
        }
    }
}

/// Top level statement list of the synthesized project
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodeBlock {
    pub lines: Vec<BuildNode>,
}

impl CodeBlock {
    pub fn push(&mut self, node: BuildNode) {
        self.lines.push(node);
    }

    pub fn extend(&mut self, nodes: impl IntoIterator<Item = BuildNode>) {
        self.lines.extend(nodes);
    }
}

// ============================================================================
// Rendering
// ============================================================================

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("'")?;
    for c in value.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\'' => f.write_str("\\'")?,
            '\n' => f.write_str("\\n")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("'")
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[AstValue]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

impl fmt::Display for AstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstValue::String(s) => write_quoted(f, s),
            AstValue::Bool(b) => write!(f, "{b}"),
            AstValue::Number(n) => write!(f, "{n}"),
            AstValue::Id(id) => f.write_str(id),
            AstValue::Array(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            AstValue::Index { value, index } => write!(f, "{value}[{index}]"),
            AstValue::Call(call) => write!(f, "{call}"),
            AstValue::Method { object, name, args } => {
                write!(f, "{object}.{name}(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        write_list(f, &self.args)?;
        for (i, (key, value)) in self.kwargs.iter().enumerate() {
            if i > 0 || !self.args.is_empty() {
                f.write_str(", ")?;
            }
            write!(f, "{key} : {value}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for BuildNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildNode::Assignment { var_name, value } => write!(f, "{var_name} = {value}"),
            BuildNode::Expression { value } => write!(f, "{value}"),
        }
    }
}

impl fmt::Display for CodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
