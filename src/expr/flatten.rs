use super::Expr;

/// Inlines nested calls of the same associative function into their parent, bottom-up.
/// `add(add(a, b), c)` becomes `add(a, b, c)`. Flattening a flat tree returns it unchanged.
pub fn flatten(expr: &Expr) -> Expr {
    match expr {
        Expr::Const(_) | Expr::Var(_) => expr.clone(),
        Expr::Member(inner, member) => Expr::Member(Box::new(flatten(inner)), *member),
        Expr::Unary(op, inner) => Expr::Unary(*op, Box::new(flatten(inner))),
        Expr::Binary(op, lhs, rhs) => Expr::Binary(*op, Box::new(flatten(lhs)), Box::new(flatten(rhs))),
        Expr::Call(func, args) => {
            let mut flat = Vec::with_capacity(args.len());
            for arg in args {
                match flatten(arg) {
                    Expr::Call(inner, inner_args) if inner == *func && func.is_associative() => {
                        flat.extend(inner_args)
                    }
                    other => flat.push(other),
                }
            }
            Expr::Call(*func, flat)
        }
        Expr::Branch { cond, then, otherwise } => Expr::branch(flatten(cond), flatten(then), flatten(otherwise)),
        Expr::Let { name, value, body } => Expr::let_in(name.clone(), flatten(value), flatten(body)),
    }
}
