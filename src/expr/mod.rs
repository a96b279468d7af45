//! Typed expression trees used by scripts, and the passes that compile, print and bake them.

mod callable;
mod compile;
mod flatten;
mod hoist;
mod linearize;
mod parse;
mod print;
mod typeck;

use std::fmt;

use glam::DVec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::{EntityHandle, TimerHandle};

pub use callable::Callable;
pub(crate) use callable::{clamp, lerp, value_from_dynamic, value_to_dynamic};
pub use compile::{compile, compile_manual, compile_source, compile_text, CompileError, CompileRequest, ProxyArg};
pub use flatten::flatten;
pub use hoist::{hoist, Hoisted, HoistedObject};
pub use linearize::{linearize, Linear};
pub use parse::{parse, ParseError, MAX_NESTING};
pub use print::{print_unit, PrintError};
pub use typeck::{check, infer, TypeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Float,
    Int,
    Bool,
    Vec2,
    Timer,
    Entity,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Float => "Float",
            ValueType::Int => "Int",
            ValueType::Bool => "Bool",
            ValueType::Vec2 => "Vec2",
            ValueType::Timer => "Timer",
            ValueType::Entity => "Entity",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    Vec2(DVec2),
    Timer(TimerHandle),
    Entity(EntityHandle),
}

impl Value {
    pub fn ty(&self) -> ValueType {
        match self {
            Value::Float(_) => ValueType::Float,
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
            Value::Vec2(_) => ValueType::Vec2,
            Value::Timer(_) => ValueType::Timer,
            Value::Entity(_) => ValueType::Entity,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Vec2(v) => write!(f, "<{}, {}>", v.x, v.y),
            Value::Timer(t) => write!(f, "timer({:?})", t.name()),
            Value::Entity(e) => write!(f, "entity({:?})", e.id()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: ValueType,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Argument and return types of a compiled unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub returns: ValueType,
}

impl Signature {
    pub fn new(params: Vec<ValueType>, returns: ValueType) -> Self {
        Self { params, returns }
    }

    pub fn of(params: &[Param], returns: ValueType) -> Self {
        Self { params: params.iter().map(|p| p.ty).collect(), returns }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fn(")?;
        for (idx, ty) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        write!(f, ") -> {}", self.returns)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member {
    X,
    Y,
    Length,
    Elapsed,
    Hp,
    Position,
}

impl Member {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "x" => Member::X,
            "y" => Member::Y,
            "length" => Member::Length,
            "elapsed" => Member::Elapsed,
            "hp" => Member::Hp,
            "position" => Member::Position,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Member::X => "x",
            Member::Y => "y",
            Member::Length => "length",
            Member::Elapsed => "elapsed",
            Member::Hp => "hp",
            Member::Position => "position",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Sub,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Sub => "-",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Add,
    Mul,
    Min,
    Max,
    And,
    Or,
    Sin,
    Cos,
    Sqrt,
    Abs,
    Floor,
    Lerp,
    Clamp,
    Vec2,
    ToFloat,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "min" => Func::Min,
            "max" => Func::Max,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "floor" => Func::Floor,
            "lerp" => Func::Lerp,
            "clamp" => Func::Clamp,
            "vec2" => Func::Vec2,
            "float" => Func::ToFloat,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Add => "add",
            Func::Mul => "mul",
            Func::Min => "min",
            Func::Max => "max",
            Func::And => "and",
            Func::Or => "or",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Sqrt => "sqrt",
            Func::Abs => "abs",
            Func::Floor => "floor",
            Func::Lerp => "lerp",
            Func::Clamp => "clamp",
            Func::Vec2 => "vec2",
            Func::ToFloat => "to_float",
        }
    }

    /// Associative functions accept any arity of at least two and may be flattened.
    pub fn is_associative(self) -> bool {
        matches!(self, Func::Add | Func::Mul | Func::Min | Func::Max | Func::And | Func::Or)
    }

    /// Fixed arity, or `None` for associative functions.
    pub fn arity(self) -> Option<usize> {
        match self {
            Func::Add | Func::Mul | Func::Min | Func::Max | Func::And | Func::Or => None,
            Func::Sin | Func::Cos | Func::Sqrt | Func::Abs | Func::Floor | Func::ToFloat => Some(1),
            Func::Vec2 => Some(2),
            Func::Lerp | Func::Clamp => Some(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    Var(String),
    Member(Box<Expr>, Member),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
    Branch { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Let { name: String, value: Box<Expr>, body: Box<Expr> },
}

impl Expr {
    pub fn float(v: f64) -> Self {
        Expr::Const(Value::Float(v))
    }

    pub fn int(v: i64) -> Self {
        Expr::Const(Value::Int(v))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn call(func: Func, args: Vec<Expr>) -> Self {
        Expr::Call(func, args)
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn branch(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Branch { cond: Box::new(cond), then: Box::new(then), otherwise: Box::new(otherwise) }
    }

    pub fn let_in(name: impl Into<String>, value: Expr, body: Expr) -> Self {
        Expr::Let { name: name.into(), value: Box::new(value), body: Box::new(body) }
    }

    /// Depth of the tree, counting each node once.
    pub fn depth(&self) -> usize {
        1 + match self {
            Expr::Const(_) | Expr::Var(_) => 0,
            Expr::Member(inner, _) | Expr::Unary(_, inner) => inner.depth(),
            Expr::Binary(_, lhs, rhs) => lhs.depth().max(rhs.depth()),
            Expr::Call(_, args) => args.iter().map(Expr::depth).max().unwrap_or(0),
            Expr::Branch { cond, then, otherwise } => cond.depth().max(then.depth()).max(otherwise.depth()),
            Expr::Let { value, body, .. } => value.depth().max(body.depth()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("integer division by zero")]
    DivideByZero,
    #[error("integer overflow in {0}")]
    Overflow(&'static str),
    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },
    #[error("argument {index} should be {expected}, got {actual}")]
    ArgumentType { index: usize, expected: ValueType, actual: ValueType },
    #[error("unit returned {actual}, expected {expected}")]
    ReturnType { expected: ValueType, actual: String },
    #[error("baked unit '{name}' failed: {message}")]
    Baked { name: String, message: String },
}
