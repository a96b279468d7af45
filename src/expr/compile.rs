use thiserror::Error;

use super::{
    check, flatten, hoist, linearize, parse, print_unit, Callable, EvalError, Expr, Param, ParseError, PrintError,
    Signature, TypeError, Value, ValueType,
};
use crate::bake::{BakeError, BuildMode, CompileSiteKind, CookingContext, KeySource};
use crate::host::HostObjects;

/// A value fixed at compile time and passed to the unit as a leading parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyArg {
    pub param: Param,
    pub value: Value,
}

impl ProxyArg {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self { param: Param::new(name, value.ty()), value }
    }
}

#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub expr: &'a Expr,
    pub params: &'a [Param],
    pub returns: ValueType,
    pub proxies: &'a [ProxyArg],
}

impl<'a> CompileRequest<'a> {
    pub fn new(expr: &'a Expr, params: &'a [Param], returns: ValueType) -> Self {
        Self { expr, params, returns, proxies: &[] }
    }

    pub fn with_proxies(mut self, proxies: &'a [ProxyArg]) -> Self {
        self.proxies = proxies;
        self
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Print(#[from] PrintError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Bake(#[from] BakeError),
}

impl CompileError {
    pub fn is_desync(&self) -> bool {
        matches!(self, CompileError::Bake(err) if err.is_desync())
    }
}

/// Compiles `request` the way the cooking context's build mode asks for.
pub fn compile(cook: &mut CookingContext, request: &CompileRequest<'_>) -> Result<Callable, CompileError> {
    let params = full_params(request.proxies, request.params);
    match cook.mode() {
        BuildMode::Serve => serve(cook, &params, request.returns, request.proxies),
        BuildMode::Direct => direct(request.expr, &params, request.returns, request.proxies),
        BuildMode::Record => {
            let callable = direct(request.expr, &params, request.returns, request.proxies)?;
            let (hoisted_expr, hoisted) = hoist(request.expr);
            let body = print_unit(&linearize(&flatten(&hoisted_expr), hoisted))?;
            let recorder = cook.current_recording()?.ok_or(BakeError::NoActiveContext("recording"))?;
            let unit = recorder.add(body, &params, request.returns);
            tracing::trace!(unit = %unit.name, signature = %unit.signature, "recorded expression");
            Ok(callable)
        }
    }
}

/// Parses and compiles `text` inside a text-conversion context keyed by the text itself.
pub fn compile_text(
    cook: &mut CookingContext,
    hosts: &HostObjects,
    text: &str,
    params: &[Param],
    returns: ValueType,
) -> Result<Callable, CompileError> {
    keyed(cook, hosts, CompileSiteKind::TextConversion, text, text, params, returns)
}

/// Compiles `text` inside a manual-reflection context keyed by a caller-chosen key.
pub fn compile_manual(
    cook: &mut CookingContext,
    hosts: &HostObjects,
    key: &str,
    text: &str,
    params: &[Param],
    returns: ValueType,
) -> Result<Callable, CompileError> {
    keyed(cook, hosts, CompileSiteKind::ManualReflection, key, text, params, returns)
}

fn keyed<K: KeySource + ?Sized>(
    cook: &mut CookingContext,
    hosts: &HostObjects,
    kind: CompileSiteKind,
    key: &K,
    text: &str,
    params: &[Param],
    returns: ValueType,
) -> Result<Callable, CompileError> {
    let mut guard = cook.open_context(kind, key)?;
    let callable = compile_source(&mut guard, hosts, text, params, returns)?;
    guard.close()?;
    Ok(callable)
}

/// Compiles `text` in whatever context is currently open. Serving never parses the text.
pub fn compile_source(
    cook: &mut CookingContext,
    hosts: &HostObjects,
    text: &str,
    params: &[Param],
    returns: ValueType,
) -> Result<Callable, CompileError> {
    if cook.mode() == BuildMode::Serve {
        return serve(cook, params, returns, &[]);
    }
    let expr = parse(text, hosts)?;
    compile(cook, &CompileRequest::new(&expr, params, returns))
}

fn full_params(proxies: &[ProxyArg], params: &[Param]) -> Vec<Param> {
    proxies.iter().map(|proxy| proxy.param.clone()).chain(params.iter().cloned()).collect()
}

fn proxy_values(proxies: &[ProxyArg]) -> Vec<Value> {
    proxies.iter().map(|proxy| proxy.value.clone()).collect()
}

fn direct(expr: &Expr, params: &[Param], returns: ValueType, proxies: &[ProxyArg]) -> Result<Callable, CompileError> {
    check(expr, params, returns)?;
    let callable = Callable::from_expr(&flatten(expr), params, returns)?;
    Ok(callable.bind_leading(proxy_values(proxies))?)
}

fn serve(
    cook: &mut CookingContext,
    params: &[Param],
    returns: ValueType,
    proxies: &[ProxyArg],
) -> Result<Callable, CompileError> {
    let expected = Signature::of(params, returns);
    let serving = cook.current_serving()?.ok_or(BakeError::NoActiveContext("serving"))?;
    Ok(serving.next(&expected, proxy_values(proxies))?)
}
