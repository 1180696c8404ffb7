//! Elisp runtime: values, the evaluator and the dynamic module bridge.

mod builtins;
pub mod error;
pub mod eval;
pub mod intern;
pub mod module;
pub mod print;
pub mod symbol;
pub mod value;

pub use error::{EvalError, EvalResult, Flow, SignalData};
pub use eval::Evaluator;
pub use module::ModuleConfig;
pub use print::print_value;
pub use value::Value;
