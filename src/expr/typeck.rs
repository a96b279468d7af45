use thiserror::Error;

use super::{BinOp, Expr, Func, Member, Param, UnOp, ValueType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("{func} expects {expected} arguments, got {actual}")]
    Arity { func: &'static str, expected: String, actual: usize },
    #[error("{op} is not defined for ({operands})")]
    Operands { op: &'static str, operands: String },
    #[error("{ty} has no member '{member}'")]
    NoMember { ty: ValueType, member: &'static str },
    #[error("branches disagree: {then} vs {otherwise}")]
    BranchMismatch { then: ValueType, otherwise: ValueType },
    #[error("branch condition must be Bool, got {0}")]
    Condition(ValueType),
    #[error("expression has type {actual}, expected {expected}")]
    Result { expected: ValueType, actual: ValueType },
}

/// Checks `expr` against the parameter list and requested result type.
pub fn check(expr: &Expr, params: &[Param], returns: ValueType) -> Result<(), TypeError> {
    let actual = infer(expr, params)?;
    if actual != returns {
        return Err(TypeError::Result { expected: returns, actual });
    }
    Ok(())
}

pub fn infer(expr: &Expr, params: &[Param]) -> Result<ValueType, TypeError> {
    let mut scope: Vec<(String, ValueType)> = params.iter().map(|p| (p.name.clone(), p.ty)).collect();
    infer_in(expr, &mut scope)
}

fn infer_in(expr: &Expr, scope: &mut Vec<(String, ValueType)>) -> Result<ValueType, TypeError> {
    use ValueType::*;
    match expr {
        Expr::Const(value) => Ok(value.ty()),
        Expr::Var(name) => scope
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| TypeError::UnknownVariable(name.clone())),
        Expr::Member(inner, member) => {
            let ty = infer_in(inner, scope)?;
            match (ty, member) {
                (Vec2, Member::X | Member::Y | Member::Length) => Ok(Float),
                (Timer, Member::Elapsed) => Ok(Float),
                (Entity, Member::Hp) => Ok(Float),
                (Entity, Member::Position) => Ok(Vec2),
                _ => Err(TypeError::NoMember { ty, member: member.name() }),
            }
        }
        Expr::Unary(op, inner) => {
            let ty = infer_in(inner, scope)?;
            match (op, ty) {
                (UnOp::Neg, Float | Int | Vec2) => Ok(ty),
                (UnOp::Not, Bool) => Ok(Bool),
                (UnOp::Neg, _) => Err(operands("-", &[ty])),
                (UnOp::Not, _) => Err(operands("!", &[ty])),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = infer_in(lhs, scope)?;
            let r = infer_in(rhs, scope)?;
            let out = match (op, l, r) {
                (BinOp::Sub, Float, Float) | (BinOp::Div, Float, Float) | (BinOp::Rem, Float, Float) => Some(Float),
                (BinOp::Sub, Int, Int) | (BinOp::Div, Int, Int) | (BinOp::Rem, Int, Int) => Some(Int),
                (BinOp::Sub, Vec2, Vec2) | (BinOp::Div, Vec2, Float) => Some(Vec2),
                (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, Float, Float)
                | (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, Int, Int) => Some(Bool),
                (BinOp::Eq | BinOp::Ne, a, b) if a == b && matches!(a, Float | Int | Bool | Vec2) => Some(Bool),
                _ => None,
            };
            out.ok_or_else(|| operands(op.symbol(), &[l, r]))
        }
        Expr::Call(func, args) => {
            let tys = args.iter().map(|arg| infer_in(arg, scope)).collect::<Result<Vec<_>, _>>()?;
            call_type(*func, &tys)
        }
        Expr::Branch { cond, then, otherwise } => {
            let c = infer_in(cond, scope)?;
            if c != Bool {
                return Err(TypeError::Condition(c));
            }
            let t = infer_in(then, scope)?;
            let o = infer_in(otherwise, scope)?;
            if t != o {
                return Err(TypeError::BranchMismatch { then: t, otherwise: o });
            }
            Ok(t)
        }
        Expr::Let { name, value, body } => {
            let ty = infer_in(value, scope)?;
            scope.push((name.clone(), ty));
            let out = infer_in(body, scope);
            scope.pop();
            out
        }
    }
}

fn call_type(func: Func, tys: &[ValueType]) -> Result<ValueType, TypeError> {
    use ValueType::*;
    match func.arity() {
        Some(n) if n != tys.len() => {
            return Err(TypeError::Arity { func: func.name(), expected: n.to_string(), actual: tys.len() })
        }
        None if tys.len() < 2 => {
            return Err(TypeError::Arity { func: func.name(), expected: "at least 2".into(), actual: tys.len() })
        }
        _ => {}
    }
    let all = |ty: ValueType| tys.iter().all(|t| *t == ty);
    let out = match func {
        Func::Add if all(Float) || all(Int) || all(Vec2) => Some(tys[0]),
        Func::Mul if all(Float) || all(Int) => Some(tys[0]),
        Func::Mul
            if tys.iter().filter(|t| **t == Vec2).count() == 1 && tys.iter().all(|t| matches!(t, Float | Vec2)) =>
        {
            Some(Vec2)
        }
        Func::Min | Func::Max if all(Float) || all(Int) => Some(tys[0]),
        Func::And | Func::Or if all(Bool) => Some(Bool),
        Func::Sin | Func::Cos | Func::Sqrt | Func::Floor if all(Float) => Some(Float),
        Func::Abs if all(Float) || all(Int) => Some(tys[0]),
        Func::Lerp | Func::Clamp if all(Float) => Some(Float),
        Func::Vec2 if all(Float) => Some(Vec2),
        Func::ToFloat if all(Int) => Some(Float),
        _ => None,
    };
    out.ok_or_else(|| operands(func.name(), tys))
}

fn operands(op: &'static str, tys: &[ValueType]) -> TypeError {
    TypeError::Operands { op, operands: tys.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ") }
}
