//! `module-load`: open a shared library and run its init function.

use std::ffi::{c_void, CStr};
use std::path::{Path, PathBuf};

use super::abi::{InitFunction, GPL_COMPATIBLE_SYMBOL, INIT_SYMBOL};
use super::{api, with_native_frame};
use crate::elisp::error::{signal, EvalResult, Flow};
use crate::elisp::eval::Evaluator;
use crate::elisp::value::Value;

const GPL_COMPATIBLE_CSTR: &CStr = c"plugin_is_GPL_compatible";
const INIT_CSTR: &CStr = c"emacs_module_init";

/// Symbol lookup in an opened library.
pub trait DynamicLibrary {
    /// Address of the exported symbol `name`, if present.
    fn symbol(&self, name: &CStr) -> Option<*mut c_void>;
}

/// A shared object opened through the platform loader.
pub struct SharedObject {
    library: libloading::Library,
}

impl SharedObject {
    pub fn open(path: &Path) -> Result<Self, ModuleError> {
        let library = unsafe { libloading::Library::new(path) }.map_err(|err| {
            ModuleError::OpenFailed {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self { library })
    }
}

impl DynamicLibrary for SharedObject {
    fn symbol(&self, name: &CStr) -> Option<*mut c_void> {
        let symbol = unsafe { self.library.get::<*mut c_void>(name.to_bytes_with_nul()) }.ok()?;
        let address = *symbol;
        (!address.is_null()).then_some(address)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Cannot load file {}: {reason}", .path.display())]
    OpenFailed { path: PathBuf, reason: String },
    #[error("Module {} is not GPL compatible", .path.display())]
    NotGplCompatible { path: PathBuf },
    #[error("Module {} does not have an init function", .path.display())]
    MissingInit { path: PathBuf },
    #[error("Module {} initialization failed with code {code}", .path.display())]
    InitFailed { path: PathBuf, code: i32 },
}

impl From<ModuleError> for Flow {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::OpenFailed { path, reason } => signal(
                "module-open-failed",
                vec![path_value(&path), Value::string(reason)],
            ),
            ModuleError::NotGplCompatible { path } => {
                signal("module-not-gpl-compatible", vec![path_value(&path)])
            }
            ModuleError::MissingInit { path } => signal(
                "module-load-failed",
                vec![
                    path_value(&path),
                    Value::string(format!("does not export {INIT_SYMBOL}")),
                ],
            ),
            ModuleError::InitFailed { path, code } => signal(
                "module-init-failed",
                vec![path_value(&path), Value::Int(i64::from(code))],
            ),
        }
    }
}

fn path_value(path: &Path) -> Value {
    Value::string(path.to_string_lossy().into_owned())
}

/// Open the shared object at `path` and initialize it.
#[tracing::instrument(level = "info", skip(eval), err(Debug))]
pub fn module_load(eval: &mut Evaluator, path: &Path) -> EvalResult {
    let library = SharedObject::open(path)?;
    load_library(eval, path, Box::new(library))
}

/// Validate `library` and run its init function in a fresh environment.
///
/// The library is retained for the life of the evaluator once init has
/// run, even if init fails, since functions it created may point into it.
pub fn load_library(
    eval: &mut Evaluator,
    path: &Path,
    library: Box<dyn DynamicLibrary>,
) -> EvalResult {
    if library.symbol(GPL_COMPATIBLE_CSTR).is_none() {
        tracing::warn!(path = %path.display(), "module lacks {GPL_COMPATIBLE_SYMBOL}");
        return Err(ModuleError::NotGplCompatible {
            path: path.to_path_buf(),
        }
        .into());
    }
    let Some(init) = library.symbol(INIT_CSTR) else {
        return Err(ModuleError::MissingInit {
            path: path.to_path_buf(),
        }
        .into());
    };
    let init: InitFunction = unsafe { std::mem::transmute::<*mut c_void, InitFunction>(init) };

    let mut init_env = 0;
    let outcome = with_native_frame(
        eval,
        &[],
        |env, _| {
            let mut runtime = api::runtime_for(env);
            unsafe { init(&mut runtime) }
        },
        |modules, code| {
            init_env = modules.top_id().unwrap_or_default();
            code
        },
    );
    let (code, pending) = outcome?;
    eval.modules.record_loaded(path, init_env, library);

    if code != 0 {
        tracing::warn!(path = %path.display(), code, "module init failed");
        return Err(ModuleError::InitFailed {
            path: path.to_path_buf(),
            code,
        }
        .into());
    }
    if let Some(flow) = pending.into_flow() {
        return Err(flow);
    }
    tracing::info!(path = %path.display(), "module loaded");
    Ok(Value::True)
}

/// `(module-load FILE)`.
pub(crate) fn builtin_module_load(eval: &mut Evaluator, args: Vec<Value>) -> EvalResult {
    if args.len() != 1 {
        return Err(signal(
            "wrong-number-of-arguments",
            vec![Value::symbol("module-load"), Value::Int(args.len() as i64)],
        ));
    }
    let Some(file) = args[0].as_str_owned() else {
        return Err(signal(
            "wrong-type-argument",
            vec![Value::symbol("stringp"), args[0]],
        ));
    };
    module_load(eval, Path::new(&file))
}
