//! Sandboxed execution of generated conversion functions.
//!
//! Only a narrow Python subset is accepted: a single-parameter `def` whose
//! body is assignments and a `return`. Expressions are evaluated by
//! `evalexpr`, which has no access to I/O, the filesystem or the network.
//! Source size and statement count are capped and evaluation runs under a
//! wall-clock budget.

use evalexpr::error::EvalexprResultValue;
use evalexpr::{
    eval_with_context, ContextWithMutableFunctions, ContextWithMutableVariables,
    DefaultNumericTypes, EvalexprError, Function, HashMapContext, Value,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use crate::errors::{ServiceError, ServiceResult};

pub const MAX_SOURCE_BYTES: usize = 8 * 1024;
pub const MAX_STATEMENTS: usize = 64;
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(2);

static DEF_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^def\s+([A-Za-z_]\w*)\s*\((.*)\)\s*(?:->\s*[^:]+)?:(.*)$").expect("valid regex")
});
static ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*([-+*/]?)=\s*([^=].*)$").expect("valid regex")
});
static STRING_STMT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(?:"[^"]*"|'[^']*')$"#).expect("valid regex"));
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\s+|(?P<num>(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)|(?P<name>[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)?)|(?P<op>\*\*|//|[-+*/%(),])",
    )
    .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Assign { target: String, expr: String },
    Return(String),
}

/// A generated function translated into evaluable statements.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    param: String,
    body: Vec<Stmt>,
}

struct RawDef<'a> {
    name: &'a str,
    params: &'a str,
    lines: Vec<&'a str>,
}

fn unsupported(what: impl Into<String>) -> ServiceError {
    ServiceError::Unsupported(what.into())
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

/// Splits the module into top-level definitions. `import math` is tolerated
/// since the math namespace is always available; any other top-level
/// statement is rejected.
fn split_defs(source: &str) -> ServiceResult<Vec<RawDef<'_>>> {
    let mut defs: Vec<RawDef> = Vec::new();
    for line in source.lines() {
        let code = strip_comment(line).trim_end();
        if code.trim().is_empty() {
            continue;
        }
        if code.starts_with(char::is_whitespace) {
            match defs.last_mut() {
                Some(def) => def.lines.push(code),
                None => return Err(unsupported(format!("unexpected indented line `{}`", code.trim()))),
            }
            continue;
        }
        if let Some(c) = DEF_LINE.captures(code) {
            let mut lines = Vec::new();
            let inline = c.get(3).map_or("", |m| m.as_str()).trim();
            if !inline.is_empty() {
                lines.push(inline);
            }
            defs.push(RawDef {
                name: c.get(1).map_or("", |m| m.as_str()),
                params: c.get(2).map_or("", |m| m.as_str()),
                lines,
            });
            continue;
        }
        if code == "import math" {
            continue;
        }
        return Err(unsupported(format!("top-level statement `{code}`")));
    }
    Ok(defs)
}

fn single_param(params: &str) -> ServiceResult<String> {
    let parts: Vec<&str> = params.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    let [param] = parts.as_slice() else {
        return Err(unsupported(format!(
            "expected exactly one parameter, found {}",
            parts.len()
        )));
    };
    let name = param.split([':', '=']).next().unwrap_or("").trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(unsupported(format!("parameter `{param}`")));
    }
    Ok(name.to_string())
}

fn math_name(attr: &str) -> Option<String> {
    let mapped = match attr {
        "pi" => format!("{}", std::f64::consts::PI),
        "e" => format!("{}", std::f64::consts::E),
        "tau" => format!("{}", std::f64::consts::TAU),
        "log" => "math::ln".into(),
        "fabs" => "math::abs".into(),
        "floor" | "ceil" => attr.into(),
        "sqrt" | "cbrt" | "exp" | "exp2" | "log2" | "log10" | "pow" | "hypot" | "sin" | "cos"
        | "tan" | "asin" | "acos" | "atan" | "atan2" | "sinh" | "cosh" | "tanh" => {
            format!("math::{attr}")
        }
        _ => return None,
    };
    Some(mapped)
}

/// Identifier `round` is rewritten to; registered by [`Program::run`].
const ROUND_FN: &str = "py::round";

fn round_arg(value: &Value<DefaultNumericTypes>) -> Result<f64, EvalexprError<DefaultNumericTypes>> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        other => Err(EvalexprError::CustomMessage(format!("round() expects a number, got {other}"))),
    }
}

/// Python's `round(x[, ndigits])`: halves go to the even neighbour.
fn py_round(argument: &Value<DefaultNumericTypes>) -> EvalexprResultValue<DefaultNumericTypes> {
    let (x, digits) = match argument {
        Value::Tuple(args) => match args.as_slice() {
            [x, n] => (round_arg(x)?, round_arg(n)?),
            _ => {
                return Err(EvalexprError::CustomMessage(format!(
                    "round() takes 1 or 2 arguments, got {}",
                    args.len()
                )))
            }
        },
        x => (round_arg(x)?, 0.0),
    };
    if digits.fract() != 0.0 {
        return Err(EvalexprError::CustomMessage("round() ndigits must be an integer".into()));
    }
    if digits == 0.0 {
        return Ok(Value::Float(x.round_ties_even()));
    }
    let scale = 10f64.powi(digits as i32);
    Ok(Value::Float((x * scale).round_ties_even() / scale))
}

/// Rewrites a Python arithmetic expression into evalexpr syntax. Integer
/// literals become floats so `/` stays true division.
///
/// evalexpr groups `^` left to right, so a chain like `a ** b ** c` is
/// rejected rather than evaluated with the wrong grouping. `%` is rejected
/// too: evalexpr's remainder takes the dividend's sign, Python's the divisor's.
fn translate(expr: &str, known: &HashSet<String>) -> ServiceResult<String> {
    let mut out = Vec::new();
    // Per paren depth: a `**` is waiting for its right operand to end.
    let mut pow_open = vec![false];
    let mut after_operand = false;
    let mut pos = 0;
    while pos < expr.len() {
        let caps = TOKEN
            .captures_at(expr, pos)
            .filter(|c| c.get(0).is_some_and(|m| m.start() == pos && !m.is_empty()))
            .ok_or_else(|| unsupported(format!("unexpected input in `{}`", &expr[pos..])))?;
        let whole = caps.get(0).map_or(pos, |m| m.end());

        if let Some(num) = caps.name("num") {
            let value = num
                .as_str()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| unsupported(format!("number `{}`", num.as_str())))?;
            let mut lit = format!("{value}");
            if !lit.contains('.') {
                lit.push_str(".0");
            }
            out.push(lit);
            after_operand = true;
        } else if let Some(name) = caps.name("name") {
            let name = name.as_str();
            let mapped = match name.split_once('.') {
                Some(("math", attr)) => math_name(attr),
                Some(_) => None,
                None if known.contains(name) => Some(name.to_string()),
                None => match name {
                    "abs" => Some("math::abs".into()),
                    "round" => Some(ROUND_FN.into()),
                    "min" | "max" => Some(name.into()),
                    "float" => Some(String::new()),
                    _ => None,
                },
            };
            out.push(mapped.ok_or_else(|| unsupported(format!("name `{name}`")))?);
            after_operand = true;
        } else if let Some(op) = caps.name("op") {
            let op = op.as_str();
            match op {
                "//" => return Err(unsupported("floor division")),
                "%" => return Err(unsupported("modulo")),
                "(" => pow_open.push(false),
                ")" => {
                    pow_open.pop();
                    if pow_open.is_empty() {
                        return Err(unsupported(format!("unbalanced `)` in `{expr}`")));
                    }
                }
                "**" => {
                    if let Some(open) = pow_open.last_mut() {
                        if *open {
                            return Err(unsupported("chained `**`; add parentheses"));
                        }
                        *open = true;
                    }
                }
                // A sign directly after an operator is unary and binds
                // tighter than `**`'s left side, so it does not end the chain.
                "+" | "-" if !after_operand => {}
                _ => {
                    if let Some(open) = pow_open.last_mut() {
                        *open = false;
                    }
                }
            }
            after_operand = op == ")";
            out.push(if op == "**" { "^".to_string() } else { op.to_string() });
        }
        pos = whole;
    }
    let word = |c: char| c.is_alphanumeric() || c == '_' || c == '.';
    let mut joined = String::new();
    for tok in out.iter().filter(|t| !t.is_empty()) {
        if joined.ends_with(word) && tok.starts_with(word) {
            joined.push(' ');
        }
        joined.push_str(tok);
    }
    if joined.is_empty() {
        return Err(unsupported("empty expression"));
    }
    Ok(joined)
}

fn compile_body(param: &str, lines: &[&str]) -> ServiceResult<Vec<Stmt>> {
    let mut known: HashSet<String> = HashSet::from([param.to_string()]);
    let mut body = Vec::new();
    let mut in_docstring: Option<&str> = None;

    for raw in lines {
        let line = raw.trim();
        if let Some(quote) = in_docstring {
            if line.contains(quote) {
                in_docstring = None;
            }
            continue;
        }
        if let Some(quote) = ["\"\"\"", "'''"].into_iter().find(|q| line.starts_with(q)) {
            if !line[3..].contains(quote) {
                in_docstring = Some(quote);
            }
            continue;
        }
        if line.is_empty() || line == "pass" || STRING_STMT.is_match(line) {
            continue;
        }
        if body.len() >= MAX_STATEMENTS {
            return Err(unsupported(format!("more than {MAX_STATEMENTS} statements")));
        }
        if let Some(expr) = line
            .strip_prefix("return")
            .filter(|rest| rest.starts_with(|c: char| c.is_whitespace() || c == '('))
        {
            body.push(Stmt::Return(translate(expr.trim(), &known)?));
            continue;
        }
        if let Some(c) = ASSIGN.captures(line) {
            let target = c[1].to_string();
            let rhs = match &c[2] {
                "" => c[3].to_string(),
                op => format!("{target} {op} ({})", &c[3]),
            };
            let expr = translate(&rhs, &known)?;
            known.insert(target.clone());
            body.push(Stmt::Assign { target, expr });
            continue;
        }
        return Err(unsupported(format!("statement `{line}`")));
    }

    if !body.iter().any(|s| matches!(s, Stmt::Return(_))) {
        return Err(unsupported("function never returns a value"));
    }
    Ok(body)
}

pub fn compile(source: &str, function_name: &str) -> ServiceResult<Program> {
    if source.len() > MAX_SOURCE_BYTES {
        return Err(unsupported(format!("source exceeds {MAX_SOURCE_BYTES} bytes")));
    }
    let defs = split_defs(source)?;
    let def = defs.iter().find(|d| d.name == function_name).ok_or_else(|| {
        ServiceError::NotFound(format!(
            "The generated code does not define a function named `{function_name}`."
        ))
    })?;
    let param = single_param(def.params)?;
    let body = compile_body(&param, &def.lines)?;
    Ok(Program { name: function_name.to_string(), param, body })
}

fn as_f64(value: Value<DefaultNumericTypes>) -> ServiceResult<f64> {
    match value {
        Value::Float(f) => Ok(f),
        Value::Int(i) => Ok(i as f64),
        other => Err(ServiceError::Runtime(format!("expected a number, got {other}"))),
    }
}

impl Program {
    pub fn run(&self, input: f64) -> ServiceResult<f64> {
        let mut ctx = HashMapContext::<DefaultNumericTypes>::new();
        ctx.set_function(ROUND_FN.to_string(), Function::new(py_round))
            .map_err(|e| ServiceError::Runtime(e.to_string()))?;
        ctx.set_value(self.param.clone(), Value::Float(input))
            .map_err(|e| ServiceError::Runtime(e.to_string()))?;

        for stmt in &self.body {
            match stmt {
                Stmt::Assign { target, expr } => {
                    let v = eval_with_context(expr, &ctx)
                        .map_err(|e| ServiceError::Runtime(e.to_string()))?;
                    let v = as_f64(v)?;
                    ctx.set_value(target.clone(), Value::Float(v))
                        .map_err(|e| ServiceError::Runtime(e.to_string()))?;
                }
                Stmt::Return(expr) => {
                    let v = eval_with_context(expr, &ctx)
                        .map_err(|e| ServiceError::Runtime(e.to_string()))?;
                    let v = as_f64(v)?;
                    if !v.is_finite() {
                        return Err(ServiceError::Runtime(format!("{} returned {v}", self.name)));
                    }
                    return Ok(v);
                }
            }
        }
        Err(ServiceError::Runtime(format!("{} finished without returning", self.name)))
    }
}

/// Compiles and runs `source`'s `function_name` on `input` off the async
/// runtime, bounded by `budget`.
pub async fn invoke(source: String, function_name: String, input: f64, budget: Duration) -> ServiceResult<f64> {
    let program = compile(&source, &function_name)?;
    let task = tokio::task::spawn_blocking(move || program.run(input));
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ServiceError::Runtime(format!("evaluation aborted: {join}"))),
        Err(_) => Err(ServiceError::Runtime(format!("evaluation exceeded {budget:?}"))),
    }
}
