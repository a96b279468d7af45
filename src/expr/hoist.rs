use super::{Expr, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoistedObject {
    Timer(String),
    Entity(String),
}

/// A local declaration that rebuilds a runtime object from its lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hoisted {
    pub name: String,
    pub object: HoistedObject,
}

/// Replaces runtime-object constants with variables bound to lookups by key.
/// Each distinct object gets one declaration no matter how often it appears.
pub fn hoist(expr: &Expr) -> (Expr, Vec<Hoisted>) {
    let mut hoisted = Vec::new();
    let out = replace(expr, &mut hoisted);
    (out, hoisted)
}

fn replace(expr: &Expr, hoisted: &mut Vec<Hoisted>) -> Expr {
    match expr {
        Expr::Const(Value::Timer(timer)) => bind(HoistedObject::Timer(timer.name().to_string()), "timer", hoisted),
        Expr::Const(Value::Entity(entity)) => bind(HoistedObject::Entity(entity.id().to_string()), "entity", hoisted),
        Expr::Const(_) | Expr::Var(_) => expr.clone(),
        Expr::Member(inner, member) => Expr::Member(Box::new(replace(inner, hoisted)), *member),
        Expr::Unary(op, inner) => Expr::Unary(*op, Box::new(replace(inner, hoisted))),
        Expr::Binary(op, lhs, rhs) => {
            let lhs = replace(lhs, hoisted);
            Expr::Binary(*op, Box::new(lhs), Box::new(replace(rhs, hoisted)))
        }
        Expr::Call(func, args) => Expr::Call(*func, args.iter().map(|arg| replace(arg, hoisted)).collect()),
        Expr::Branch { cond, then, otherwise } => {
            let cond = replace(cond, hoisted);
            let then = replace(then, hoisted);
            Expr::branch(cond, then, replace(otherwise, hoisted))
        }
        Expr::Let { name, value, body } => {
            let value = replace(value, hoisted);
            Expr::let_in(name.clone(), value, replace(body, hoisted))
        }
    }
}

fn bind(object: HoistedObject, prefix: &str, hoisted: &mut Vec<Hoisted>) -> Expr {
    if let Some(existing) = hoisted.iter().find(|h| h.object == object) {
        return Expr::Var(existing.name.clone());
    }
    let name = format!("{prefix}__{}", hoisted.len());
    hoisted.push(Hoisted { name: name.clone(), object });
    Expr::Var(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use crate::host::{EntityHandle, HostObjects};
    use glam::DVec2;

    #[test]
    fn objects_become_keyed_lookups_once() {
        let hosts = HostObjects::new();
        hosts.register_entity(EntityHandle::new("boss", DVec2::ZERO));
        let expr = parse(
            "timer(\"a\").elapsed + timer(\"a\").elapsed * entity(\"boss\").hp + timer(\"b\").elapsed",
            &hosts,
        )
        .expect("parse");
        let (out, hoisted) = hoist(&expr);
        assert_eq!(
            hoisted,
            vec![
                Hoisted { name: "timer__0".into(), object: HoistedObject::Timer("a".into()) },
                Hoisted { name: "entity__1".into(), object: HoistedObject::Entity("boss".into()) },
                Hoisted { name: "timer__2".into(), object: HoistedObject::Timer("b".into()) },
            ]
        );
        let (again, none) = hoist(&out);
        assert_eq!(again, out);
        assert!(none.is_empty());
    }
}
