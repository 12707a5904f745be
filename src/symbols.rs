//! Lexical scope analysis: nested symbol tables with free-variable capture.
//!
//! Resolution walks outward. Global and builtin symbols are returned
//! unchanged from any depth; anything else found in an enclosing function
//! is captured on the way back in: every intervening table records the
//! original as a free symbol and redefines the name locally as `Free` at
//! the position it got in that table's free list. By emission time each
//! scope therefore knows how to route the variable.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The name the enclosing function is bound to, resolved via
    /// `OpCurrentClosure` instead of reloading the binding.
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    pub num_definitions: usize,
    pub free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn enclosed(outer: SymbolTable) -> Self {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..SymbolTable::default()
        }
    }

    /// Unwrap one nesting level, discarding this table.
    pub fn pop(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.outer.is_none() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name: name.to_owned(),
            scope,
            index: self.num_definitions,
        };
        self.store.insert(name.to_owned(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    /// Register a builtin at a fixed index. Done once on the outermost table
    /// before compilation begins.
    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_owned(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_owned(), symbol.clone());
        symbol
    }

    /// Register the name the enclosing function is bound to.
    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_owned(),
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name.to_owned(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
        };
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let symbol = self.outer.as_mut()?.resolve(name)?;
        if matches!(symbol.scope, SymbolScope::Global | SymbolScope::Builtin) {
            return Some(symbol);
        }
        // Captured: record the original here and hand out a Free symbol
        Some(self.define_free(symbol))
    }
}
