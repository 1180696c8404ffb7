//! Non-local exits (`signal`/`throw`) and top-level evaluation errors.

use super::intern::{intern, resolve_sym, SymId};
use super::print::print_value;
use super::value::Value;

/// Payload of a signaled condition.
#[derive(Clone, Debug)]
pub struct SignalData {
    pub symbol: SymId,
    pub data: Vec<Value>,
    /// Original non-list DATA argument of `signal`, when it was not a list.
    pub raw_data: Option<Value>,
}

impl SignalData {
    pub fn symbol_name(&self) -> &'static str {
        resolve_sym(self.symbol)
    }

    /// The DATA part of the condition as a Lisp value.
    pub fn data_value(&self) -> Value {
        self.raw_data
            .unwrap_or_else(|| Value::list(self.data.clone()))
    }
}

/// Non-local exit propagated through `Err` in `EvalResult`.
#[derive(Clone, Debug)]
pub enum Flow {
    Signal(SignalData),
    Throw { tag: Value, value: Value },
}

pub type EvalResult = Result<Value, Flow>;

/// Build a signal with `symbol` and list `data`.
pub fn signal(symbol: &str, data: Vec<Value>) -> Flow {
    Flow::Signal(SignalData {
        symbol: intern(symbol),
        data,
        raw_data: None,
    })
}

/// Build a signal from a symbol value and an arbitrary DATA value, keeping
/// the raw DATA when it is not a proper list.
pub fn signal_with_data(symbol: SymId, data: Value) -> Flow {
    match super::value::list_to_vec(&data) {
        Some(items) => Flow::Signal(SignalData {
            symbol,
            data: items,
            raw_data: None,
        }),
        None => Flow::Signal(SignalData {
            symbol,
            data: Vec::new(),
            raw_data: Some(data),
        }),
    }
}

/// `(error MESSAGE)` shorthand.
pub fn error_message(message: impl Into<String>) -> Flow {
    signal("error", vec![Value::string(message)])
}

/// Immediate parent of a condition symbol in the error hierarchy.
fn parent_condition(name: &str) -> Option<&'static str> {
    match name {
        "error" | "quit" => None,
        "overflow-error" | "underflow-error" | "range-error" | "domain-error" => {
            Some("arith-error")
        }
        "module-open-failed" | "module-not-gpl-compatible" | "module-init-failed" => {
            Some("module-load-failed")
        }
        _ => Some("error"),
    }
}

/// Whether a handler for `condition` catches a signal of `symbol`.
/// `t` catches everything.
pub fn condition_matches(symbol: &str, condition: &str) -> bool {
    if condition == "t" {
        return true;
    }
    let mut current = Some(symbol);
    while let Some(name) = current {
        if name == condition {
            return true;
        }
        current = parent_condition(name);
    }
    false
}

/// Error surfaced to Rust callers outside of any Lisp `catch` or handler.
#[derive(Clone, Debug, thiserror::Error)]
pub enum EvalError {
    #[error("{}", describe_signal(.symbol, .data))]
    Signal { symbol: SymId, data: Vec<Value> },
    #[error("No catch for tag: {}, {}", print_value(.tag), print_value(.value))]
    UncaughtThrow { tag: Value, value: Value },
}

fn describe_signal(symbol: &SymId, data: &[Value]) -> String {
    let mut out = resolve_sym(*symbol).to_owned();
    for item in data {
        out.push(' ');
        out.push_str(&print_value(item));
    }
    out
}

impl From<Flow> for EvalError {
    fn from(flow: Flow) -> Self {
        match flow {
            Flow::Signal(sig) => {
                let data = match sig.raw_data {
                    Some(raw) => vec![raw],
                    None => sig.data,
                };
                EvalError::Signal {
                    symbol: sig.symbol,
                    data,
                }
            }
            Flow::Throw { tag, value } => EvalError::UncaughtThrow { tag, value },
        }
    }
}

impl From<EvalError> for Flow {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::Signal { symbol, data } => Flow::Signal(SignalData {
                symbol,
                data,
                raw_data: None,
            }),
            EvalError::UncaughtThrow { tag, value } => Flow::Throw { tag, value },
        }
    }
}

/// Convert a `Flow` into a top-level result.
pub fn map_flow(result: EvalResult) -> Result<Value, EvalError> {
    result.map_err(EvalError::from)
}
