use std::fmt;
use std::rc::Rc;

use glam::DVec2;
use rhai::Dynamic;
use smallvec::SmallVec;

use super::{BinOp, EvalError, Expr, Func, Member, Param, Signature, TypeError, UnOp, Value, ValueType};
use crate::bake::BakedUnit;
use crate::host::{EntityHandle, TimerHandle};

type Frame = SmallVec<[Value; 8]>;
type Node = Box<dyn Fn(&mut Frame) -> Result<Value, EvalError>>;

/// An invocable unit, either compiled in-process from a tree or served from baked artifacts.
#[derive(Clone)]
pub struct Callable {
    signature: Signature,
    bound: Rc<[Value]>,
    kind: Kind,
}

#[derive(Clone)]
enum Kind {
    Closure(Rc<Node>),
    Baked(BakedUnit),
}

impl Callable {
    /// Compiles a type-checked tree into nested closures. Variables resolve to frame slots here,
    /// so the returned callable never looks names up.
    pub(crate) fn from_expr(expr: &Expr, params: &[Param], returns: ValueType) -> Result<Self, TypeError> {
        let mut scope: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
        let node = build(expr, &mut scope)?;
        Ok(Self { signature: Signature::of(params, returns), bound: Rc::from(Vec::new()), kind: Kind::Closure(Rc::new(node)) })
    }

    pub(crate) fn from_baked(unit: BakedUnit) -> Self {
        Self { signature: unit.signature().clone(), bound: Rc::from(Vec::new()), kind: Kind::Baked(unit) }
    }

    /// Fixes the leading parameters to `values`.
    pub(crate) fn bind_leading(self, values: Vec<Value>) -> Result<Self, EvalError> {
        check_args(&self.signature.params, &values)?;
        let params = self.signature.params[values.len()..].to_vec();
        let mut bound = self.bound.to_vec();
        bound.extend(values);
        Ok(Self { signature: Signature::new(params, self.signature.returns), bound: Rc::from(bound), kind: self.kind })
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn is_baked(&self) -> bool {
        matches!(self.kind, Kind::Baked(_))
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, EvalError> {
        if args.len() != self.signature.params.len() {
            return Err(EvalError::Arity { expected: self.signature.params.len(), actual: args.len() });
        }
        check_args(&self.signature.params, args)?;
        let result = match &self.kind {
            Kind::Closure(node) => {
                let mut frame: Frame = self.bound.iter().chain(args).cloned().collect();
                node(&mut frame)?
            }
            Kind::Baked(unit) => unit.call(self.bound.iter().chain(args))?,
        };
        if result.ty() != self.signature.returns {
            return Err(EvalError::ReturnType {
                expected: self.signature.returns,
                actual: result.ty().name().to_string(),
            });
        }
        Ok(result)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Closure(_) => "closure".to_string(),
            Kind::Baked(unit) => format!("baked {}", unit.name()),
        };
        write!(f, "Callable({kind}, {})", self.signature)
    }
}

fn check_args(params: &[ValueType], args: &[Value]) -> Result<(), EvalError> {
    if args.len() > params.len() {
        return Err(EvalError::Arity { expected: params.len(), actual: args.len() });
    }
    for (index, (expected, arg)) in params.iter().zip(args).enumerate() {
        if arg.ty() != *expected {
            return Err(EvalError::ArgumentType { index, expected: *expected, actual: arg.ty() });
        }
    }
    Ok(())
}

fn build(expr: &Expr, scope: &mut Vec<String>) -> Result<Node, TypeError> {
    Ok(match expr {
        Expr::Const(value) => {
            let value = value.clone();
            Box::new(move |_| Ok(value.clone()))
        }
        Expr::Var(name) => {
            let slot = scope
                .iter()
                .rposition(|bound| bound == name)
                .ok_or_else(|| TypeError::UnknownVariable(name.clone()))?;
            Box::new(move |frame| Ok(frame[slot].clone()))
        }
        Expr::Member(inner, member) => {
            let inner = build(inner, scope)?;
            let member = *member;
            Box::new(move |frame| member_of(inner(frame)?, member))
        }
        Expr::Unary(op, inner) => {
            let inner = build(inner, scope)?;
            let op = *op;
            Box::new(move |frame| unary(op, inner(frame)?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = build(lhs, scope)?;
            let rhs = build(rhs, scope)?;
            let op = *op;
            Box::new(move |frame| {
                let l = lhs(frame)?;
                binary(op, l, rhs(frame)?)
            })
        }
        Expr::Call(func, args) => {
            let nodes = args.iter().map(|arg| build(arg, scope)).collect::<Result<Vec<_>, _>>()?;
            let func = *func;
            match func {
                Func::And | Func::Or => {
                    let short = func == Func::Or;
                    Box::new(move |frame| {
                        for node in &nodes {
                            if expect_bool(node(frame)?)? == short {
                                return Ok(Value::Bool(short));
                            }
                        }
                        Ok(Value::Bool(!short))
                    })
                }
                _ => Box::new(move |frame| {
                    let mut values: SmallVec<[Value; 4]> = SmallVec::with_capacity(nodes.len());
                    for node in &nodes {
                        values.push(node(frame)?);
                    }
                    apply(func, values)
                }),
            }
        }
        Expr::Branch { cond, then, otherwise } => {
            let cond = build(cond, scope)?;
            let then = build(then, scope)?;
            let otherwise = build(otherwise, scope)?;
            Box::new(move |frame| if expect_bool(cond(frame)?)? { then(frame) } else { otherwise(frame) })
        }
        Expr::Let { name, value, body } => {
            let slot = scope.len();
            let value = build(value, scope)?;
            scope.push(name.clone());
            let body = build(body, scope);
            scope.pop();
            let body = body?;
            Box::new(move |frame| {
                let v = value(frame)?;
                frame.truncate(slot);
                frame.push(v);
                body(frame)
            })
        }
    })
}

fn mismatch(value: &Value, expected: ValueType) -> EvalError {
    EvalError::ArgumentType { index: 0, expected, actual: value.ty() }
}

fn expect_bool(value: Value) -> Result<bool, EvalError> {
    value.as_bool().ok_or_else(|| mismatch(&value, ValueType::Bool))
}

fn member_of(value: Value, member: Member) -> Result<Value, EvalError> {
    Ok(match (&value, member) {
        (Value::Vec2(v), Member::X) => Value::Float(v.x),
        (Value::Vec2(v), Member::Y) => Value::Float(v.y),
        (Value::Vec2(v), Member::Length) => Value::Float(v.length()),
        (Value::Timer(t), Member::Elapsed) => Value::Float(t.elapsed()),
        (Value::Entity(e), Member::Hp) => Value::Float(e.hp()),
        (Value::Entity(e), Member::Position) => Value::Vec2(e.position()),
        _ => return Err(mismatch(&value, ValueType::Vec2)),
    })
}

fn unary(op: UnOp, value: Value) -> Result<Value, EvalError> {
    Ok(match (op, value) {
        (UnOp::Neg, Value::Float(v)) => Value::Float(-v),
        (UnOp::Neg, Value::Int(v)) => Value::Int(v.checked_neg().ok_or(EvalError::Overflow("negation"))?),
        (UnOp::Neg, Value::Vec2(v)) => Value::Vec2(-v),
        (UnOp::Not, Value::Bool(v)) => Value::Bool(!v),
        (_, other) => return Err(mismatch(&other, ValueType::Float)),
    })
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    use Value::*;
    Ok(match (op, &lhs, &rhs) {
        (BinOp::Sub, Float(a), Float(b)) => Float(a - b),
        (BinOp::Sub, Int(a), Int(b)) => Int(a.checked_sub(*b).ok_or(EvalError::Overflow("subtraction"))?),
        (BinOp::Sub, Vec2(a), Vec2(b)) => Vec2(*a - *b),
        (BinOp::Div, Float(a), Float(b)) => Float(a / b),
        (BinOp::Div, Int(_), Int(0)) | (BinOp::Rem, Int(_), Int(0)) => return Err(EvalError::DivideByZero),
        (BinOp::Div, Int(a), Int(b)) => Int(a.checked_div(*b).ok_or(EvalError::Overflow("division"))?),
        (BinOp::Div, Vec2(a), Float(b)) => Vec2(*a / *b),
        (BinOp::Rem, Float(a), Float(b)) => Float(a % b),
        (BinOp::Rem, Int(a), Int(b)) => Int(a.checked_rem(*b).ok_or(EvalError::Overflow("remainder"))?),
        (BinOp::Lt, Float(a), Float(b)) => Bool(a < b),
        (BinOp::Le, Float(a), Float(b)) => Bool(a <= b),
        (BinOp::Gt, Float(a), Float(b)) => Bool(a > b),
        (BinOp::Ge, Float(a), Float(b)) => Bool(a >= b),
        (BinOp::Lt, Int(a), Int(b)) => Bool(a < b),
        (BinOp::Le, Int(a), Int(b)) => Bool(a <= b),
        (BinOp::Gt, Int(a), Int(b)) => Bool(a > b),
        (BinOp::Ge, Int(a), Int(b)) => Bool(a >= b),
        (BinOp::Eq, a, b) => Bool(a == b),
        (BinOp::Ne, a, b) => Bool(a != b),
        _ => return Err(mismatch(&rhs, lhs.ty())),
    })
}

fn apply(func: Func, args: SmallVec<[Value; 4]>) -> Result<Value, EvalError> {
    let mut iter = args.into_iter();
    let first = iter.next().ok_or(EvalError::Arity { expected: 1, actual: 0 })?;
    match func {
        Func::Add => iter.try_fold(first, |acc, next| match (acc, next) {
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).ok_or(EvalError::Overflow("addition")),
            (Value::Vec2(a), Value::Vec2(b)) => Ok(Value::Vec2(a + b)),
            (a, b) => Err(mismatch(&b, a.ty())),
        }),
        Func::Mul => iter.try_fold(first, |acc, next| match (acc, next) {
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
            (Value::Int(a), Value::Int(b)) => {
                a.checked_mul(b).map(Value::Int).ok_or(EvalError::Overflow("multiplication"))
            }
            (Value::Vec2(a), Value::Float(b)) => Ok(Value::Vec2(a * b)),
            (Value::Float(a), Value::Vec2(b)) => Ok(Value::Vec2(a * b)),
            (a, b) => Err(mismatch(&b, a.ty())),
        }),
        Func::Min | Func::Max => {
            let pick_min = func == Func::Min;
            iter.try_fold(first, |acc, next| match (acc, next) {
                (Value::Float(a), Value::Float(b)) => Ok(Value::Float(if pick_min { a.min(b) } else { a.max(b) })),
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(if pick_min { a.min(b) } else { a.max(b) })),
                (a, b) => Err(mismatch(&b, a.ty())),
            })
        }
        Func::And | Func::Or => {
            let short = func == Func::Or;
            let mut acc = expect_bool(first)?;
            for next in iter {
                if acc == short {
                    break;
                }
                acc = expect_bool(next)?;
            }
            Ok(Value::Bool(acc))
        }
        Func::Abs => match first {
            Value::Float(v) => Ok(Value::Float(v.abs())),
            Value::Int(v) => v.checked_abs().map(Value::Int).ok_or(EvalError::Overflow("abs")),
            other => Err(mismatch(&other, ValueType::Float)),
        },
        Func::ToFloat => match first {
            Value::Int(v) => Ok(Value::Float(v as f64)),
            other => Err(mismatch(&other, ValueType::Int)),
        },
        Func::Sin | Func::Cos | Func::Sqrt | Func::Floor => {
            let v = first.as_float().ok_or_else(|| mismatch(&first, ValueType::Float))?;
            Ok(Value::Float(match func {
                Func::Sin => v.sin(),
                Func::Cos => v.cos(),
                Func::Sqrt => v.sqrt(),
                _ => v.floor(),
            }))
        }
        Func::Vec2 | Func::Lerp | Func::Clamp => {
            let mut floats: SmallVec<[f64; 3]> = SmallVec::new();
            for value in std::iter::once(first).chain(iter) {
                floats.push(value.as_float().ok_or_else(|| mismatch(&value, ValueType::Float))?);
            }
            let arg = |idx: usize| floats.get(idx).copied().ok_or(EvalError::Arity { expected: idx + 1, actual: floats.len() });
            Ok(match func {
                Func::Vec2 => Value::Vec2(DVec2::new(arg(0)?, arg(1)?)),
                Func::Lerp => Value::Float(lerp(arg(0)?, arg(1)?, arg(2)?)),
                _ => Value::Float(clamp(arg(0)?, arg(1)?, arg(2)?)),
            })
        }
    }
}

pub(crate) fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

// f64::clamp panics when lo > hi; scripts get the max-then-min reading instead.
pub(crate) fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    x.max(lo).min(hi)
}

pub(crate) fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Float(v) => Dynamic::from_float(*v),
        Value::Int(v) => Dynamic::from_int(*v),
        Value::Bool(v) => Dynamic::from_bool(*v),
        Value::Vec2(v) => Dynamic::from(*v),
        Value::Timer(t) => Dynamic::from(t.clone()),
        Value::Entity(e) => Dynamic::from(e.clone()),
    }
}

/// Converts a rhai result back into a value; the error carries the rhai type name.
pub(crate) fn value_from_dynamic(value: Dynamic) -> Result<Value, String> {
    if value.is::<f64>() {
        return Ok(Value::Float(value.cast::<f64>()));
    }
    if value.is::<i64>() {
        return Ok(Value::Int(value.cast::<i64>()));
    }
    if value.is::<bool>() {
        return Ok(Value::Bool(value.cast::<bool>()));
    }
    if value.is::<DVec2>() {
        return Ok(Value::Vec2(value.cast::<DVec2>()));
    }
    if value.is::<TimerHandle>() {
        return Ok(Value::Timer(value.cast::<TimerHandle>()));
    }
    if value.is::<EntityHandle>() {
        return Ok(Value::Entity(value.cast::<EntityHandle>()));
    }
    Err(value.type_name().to_string())
}
