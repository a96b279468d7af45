use std::fmt::Write;

use thiserror::Error;

use super::{Expr, Func, HoistedObject, Linear, Member, UnOp, Value};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PrintError {
    #[error("runtime object {0} must be hoisted before printing")]
    Unhoisted(String),
}

/// Prints a linearized unit as a rhai function body.
pub fn print_unit(linear: &Linear) -> Result<String, PrintError> {
    let mut out = String::new();
    for hoisted in &linear.hoisted {
        let (lookup, key) = match &hoisted.object {
            HoistedObject::Timer(key) => ("get_timer", key),
            HoistedObject::Entity(key) => ("get_entity", key),
        };
        let _ = writeln!(out, "let {} = {lookup}({});", hoisted.name, quote(key));
    }
    for binding in &linear.bindings {
        let value = print_expr(&binding.value)?;
        match &binding.when {
            Some(cond) => {
                let _ = writeln!(out, "let {} = if {} {{ {value} }} else {{ () }};", binding.name, print_expr(cond)?);
            }
            None => {
                let _ = writeln!(out, "let {} = {value};", binding.name);
            }
        }
    }
    let _ = write!(out, "return {};", print_expr(&linear.ret)?);
    Ok(out)
}

pub(crate) fn print_expr(expr: &Expr) -> Result<String, PrintError> {
    Ok(match expr {
        Expr::Const(value) => print_value(value)?,
        Expr::Var(name) => name.clone(),
        Expr::Member(inner, member) => {
            let getter = match member {
                Member::X => "vec_x",
                Member::Y => "vec_y",
                Member::Length => "vec_length",
                Member::Elapsed => "timer_elapsed",
                Member::Hp => "entity_hp",
                Member::Position => "entity_position",
            };
            format!("{getter}({})", print_expr(inner)?)
        }
        Expr::Unary(UnOp::Neg, inner) => format!("neg({})", print_expr(inner)?),
        Expr::Unary(UnOp::Not, inner) => format!("not({})", print_expr(inner)?),
        Expr::Binary(op, lhs, rhs) => format!("({} {} {})", print_expr(lhs)?, op.symbol(), print_expr(rhs)?),
        Expr::Call(func, args) => {
            let args = args.iter().map(print_expr).collect::<Result<Vec<_>, _>>()?;
            match func {
                Func::Add => format!("({})", args.join(" + ")),
                Func::Mul => format!("({})", args.join(" * ")),
                Func::And => format!("({})", args.join(" && ")),
                Func::Or => format!("({})", args.join(" || ")),
                Func::Min | Func::Max => {
                    let mut iter = args.into_iter();
                    let first = iter.next().unwrap_or_default();
                    iter.fold(first, |acc, arg| format!("{}({acc}, {arg})", func.name()))
                }
                _ => format!("{}({})", func.name(), args.join(", ")),
            }
        }
        Expr::Branch { cond, then, otherwise } => {
            format!("(if {} {{ {} }} else {{ {} }})", print_expr(cond)?, print_expr(then)?, print_expr(otherwise)?)
        }
        Expr::Let { name, value, body } => {
            // Only reachable for trees that skipped linearizing.
            format!("{{ let {name} = {}; {} }}", print_expr(value)?, print_expr(body)?)
        }
    })
}

fn print_value(value: &Value) -> Result<String, PrintError> {
    Ok(match value {
        Value::Float(v) => float_literal(*v),
        Value::Int(v) => int_literal(*v),
        Value::Bool(v) => v.to_string(),
        Value::Vec2(v) => format!("vec2({}, {})", float_literal(v.x), float_literal(v.y)),
        Value::Timer(_) | Value::Entity(_) => return Err(PrintError::Unhoisted(value.to_string())),
    })
}

fn float_literal(v: f64) -> String {
    if v.is_nan() {
        return "float_nan()".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "float_inf()".into() } else { "neg(float_inf())".into() };
    }
    let mut text = format!("{v:?}");
    if !text.contains('.') {
        match text.find('e') {
            Some(idx) => text.insert_str(idx, ".0"),
            None => text.push_str(".0"),
        }
    }
    if v.is_sign_negative() {
        format!("({text})")
    } else {
        text
    }
}

fn int_literal(v: i64) -> String {
    if v == i64::MIN {
        "(-9223372036854775807 - 1)".into()
    } else if v < 0 {
        format!("({v})")
    } else {
        v.to_string()
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
