//! Symbol cells: global values and function definitions.

use std::collections::HashMap;

use super::intern::{intern, SymId};
use super::value::Value;
use crate::gc::GcTrace;

#[derive(Clone, Copy, Debug, Default)]
struct SymbolCells {
    value: Option<Value>,
    function: Option<Value>,
}

/// The obarray: every symbol that has a value or function binding.
#[derive(Default)]
pub struct Obarray {
    symbols: HashMap<SymId, SymbolCells>,
}

impl Obarray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_symbol_value(&mut self, name: &str, value: Value) {
        self.symbols.entry(intern(name)).or_default().value = Some(value);
    }

    pub fn symbol_value(&self, name: &str) -> Option<&Value> {
        self.cells(name).and_then(|cells| cells.value.as_ref())
    }

    pub fn boundp(&self, name: &str) -> bool {
        self.symbol_value(name).is_some()
    }

    pub fn set_symbol_function(&mut self, name: &str, def: Value) {
        self.symbols.entry(intern(name)).or_default().function = Some(def);
    }

    pub fn symbol_function(&self, name: &str) -> Option<&Value> {
        self.cells(name).and_then(|cells| cells.function.as_ref())
    }

    pub fn fboundp(&self, name: &str) -> bool {
        self.symbol_function(name).is_some()
    }

    pub fn fmakunbound(&mut self, name: &str) {
        if let Some(cells) = self.symbols.get_mut(&intern(name)) {
            cells.function = None;
        }
    }

    fn cells(&self, name: &str) -> Option<&SymbolCells> {
        self.symbols.get(&intern(name))
    }
}

impl GcTrace for Obarray {
    fn trace_roots(&self, roots: &mut Vec<Value>) {
        for cells in self.symbols.values() {
            roots.extend(cells.value);
            roots.extend(cells.function);
        }
    }
}
