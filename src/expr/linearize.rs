use super::{Expr, Func, Hoisted, UnOp};

/// A unit body with no nested statement blocks: hoisted lookups, then plain bindings,
/// then one returned expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub hoisted: Vec<Hoisted>,
    pub bindings: Vec<Binding>,
    pub ret: Expr,
}

/// One prelude `let`. A binding with a `when` condition is only evaluated when the condition
/// holds and is left unit otherwise; nothing reads it on that path.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub when: Option<Expr>,
    pub value: Expr,
}

impl Binding {
    fn new(name: impl Into<String>, guard: &[Expr], value: Expr) -> Self {
        let when = match guard {
            [] => None,
            [single] => Some(single.clone()),
            _ => Some(Expr::call(Func::And, guard.to_vec())),
        };
        Self { name: name.into(), when, value }
    }
}

/// Gives every `let` a unique name and lifts it into the binding list. Lets under a branch or
/// a short-circuited operand keep the conditions that lead to them, so each value is evaluated
/// exactly when the tree would evaluate it.
pub fn linearize(expr: &Expr, hoisted: Vec<Hoisted>) -> Linear {
    let mut counter = 0;
    let unique = uniquify(expr, &mut Vec::new(), &mut counter);
    let mut bindings = Vec::new();
    let ret = Lifter::default().lift(&unique, &[], &mut bindings);
    Linear { hoisted, bindings, ret }
}

fn uniquify(expr: &Expr, renames: &mut Vec<(String, String)>, counter: &mut usize) -> Expr {
    match expr {
        Expr::Var(name) => match renames.iter().rev().find(|(from, _)| from == name) {
            Some((_, to)) => Expr::Var(to.clone()),
            None => expr.clone(),
        },
        Expr::Let { name, value, body } => {
            let value = uniquify(value, renames, counter);
            let fresh = format!("{name}__l{counter}");
            *counter += 1;
            renames.push((name.clone(), fresh.clone()));
            let body = uniquify(body, renames, counter);
            renames.pop();
            Expr::let_in(fresh, value, body)
        }
        _ => map_children(expr, |child| uniquify(child, renames, counter)),
    }
}

#[derive(Default)]
struct Lifter {
    guards: usize,
}

impl Lifter {
    fn lift(&mut self, expr: &Expr, guard: &[Expr], out: &mut Vec<Binding>) -> Expr {
        match expr {
            Expr::Let { name, value, body } => {
                let value = self.lift(value, guard, out);
                out.push(Binding::new(name.clone(), guard, value));
                self.lift(body, guard, out)
            }
            Expr::Branch { cond, then, otherwise } => {
                let cond = self.lift(cond, guard, out);
                let (atom, fresh) = self.atom(&cond);
                let mut then_out = Vec::new();
                let mut else_out = Vec::new();
                let then = self.lift(then, &with(guard, atom.clone()), &mut then_out);
                let otherwise = self.lift(otherwise, &with(guard, negate(&atom)), &mut else_out);
                if then_out.is_empty() && else_out.is_empty() {
                    return Expr::branch(cond, then, otherwise);
                }
                if let Some(name) = fresh {
                    out.push(Binding::new(name, guard, cond));
                }
                out.extend(then_out);
                out.extend(else_out);
                Expr::branch(atom, then, otherwise)
            }
            Expr::Call(func @ (Func::And | Func::Or), args) => self.lift_short_circuit(*func, args, guard, out),
            _ => map_children(expr, |child| self.lift(child, guard, out)),
        }
    }

    // Operand n runs only when operands 0..n did not short-circuit. If a later operand needs a
    // guarded binding, the operands before it are bound to names so the guard can refer to them.
    fn lift_short_circuit(&mut self, func: Func, args: &[Expr], guard: &[Expr], out: &mut Vec<Binding>) -> Expr {
        let mut inner = guard.to_vec();
        let mut operands = Vec::with_capacity(args.len());
        for (idx, arg) in args.iter().enumerate() {
            let mut local = Vec::new();
            let target = if idx == 0 { &mut *out } else { &mut local };
            let lifted = self.lift(arg, &inner, target);
            let (atom, fresh) = self.atom(&lifted);
            inner.push(if func == Func::And { atom.clone() } else { negate(&atom) });
            operands.push((lifted, atom, fresh, local));
        }
        let Some(last) = operands.iter().rposition(|(.., local)| !local.is_empty()) else {
            return Expr::call(func, operands.into_iter().map(|(lifted, ..)| lifted).collect());
        };
        let mut args = Vec::with_capacity(operands.len());
        for (idx, (lifted, atom, fresh, local)) in operands.into_iter().enumerate() {
            out.extend(local);
            if idx < last {
                if let Some(name) = fresh {
                    out.push(Binding::new(name, &inner[..guard.len() + idx], lifted));
                }
                args.push(atom);
            } else {
                args.push(lifted);
            }
        }
        Expr::call(func, args)
    }

    // Variables and constants can be repeated in a guard as they are; anything else gets a name.
    fn atom(&mut self, expr: &Expr) -> (Expr, Option<String>) {
        match expr {
            Expr::Var(_) | Expr::Const(_) => (expr.clone(), None),
            _ => {
                let name = format!("guard__g{}", self.guards);
                self.guards += 1;
                (Expr::var(name.clone()), Some(name))
            }
        }
    }
}

fn with(guard: &[Expr], cond: Expr) -> Vec<Expr> {
    let mut out = guard.to_vec();
    out.push(cond);
    out
}

fn negate(atom: &Expr) -> Expr {
    Expr::Unary(UnOp::Not, Box::new(atom.clone()))
}

// Children are visited left to right so callers that accumulate state see evaluation order.
fn map_children(expr: &Expr, mut f: impl FnMut(&Expr) -> Expr) -> Expr {
    match expr {
        Expr::Const(_) | Expr::Var(_) => expr.clone(),
        Expr::Member(inner, member) => Expr::Member(Box::new(f(inner)), *member),
        Expr::Unary(op, inner) => Expr::Unary(*op, Box::new(f(inner))),
        Expr::Binary(op, lhs, rhs) => {
            let lhs = f(lhs);
            Expr::Binary(*op, Box::new(lhs), Box::new(f(rhs)))
        }
        Expr::Call(func, args) => Expr::Call(*func, args.iter().map(&mut f).collect()),
        Expr::Branch { cond, then, otherwise } => {
            let cond = f(cond);
            let then = f(then);
            Expr::branch(cond, then, f(otherwise))
        }
        Expr::Let { name, value, body } => {
            let value = f(value);
            Expr::let_in(name.clone(), value, f(body))
        }
    }
}
