// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Symbol-table and source-frame model shared by the kernel crash report
//! pipeline.
//!
//! The crash parser itself never opens the kernel binary. Whoever owns the
//! build artifacts loads a symbol table (typically from `nm` output) and
//! provides a [`Resolver`] that maps a program counter to source frames
//! (typically backed by `addr2line` over DWARF). Both are injected into the
//! report crate, which only consumes them through the types defined here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One text symbol of the kernel binary.
///
/// A name can be carried by several symbols (static functions duplicated
/// across compilation units keep their name), so the table maps a name to an
/// ordered list of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub addr: u64,
    pub size: u64,
}

impl Symbol {
    pub fn new(addr: u64, size: u64) -> Self {
        Self { addr, size }
    }

    /// Whether `offset` from the symbol start still lands inside the symbol.
    pub fn contains_offset(&self, offset: u64) -> bool {
        offset < self.size
    }
}

/// Mapping from function name to its symbols, in binary order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: HashMap<String, Vec<Symbol>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol) {
        self.symbols.entry(name.into()).or_default().push(symbol);
    }

    pub fn lookup(&self, name: &str) -> &[Symbol] {
        self.symbols.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }
}

impl<N: Into<String>> FromIterator<(N, Symbol)> for SymbolTable {
    fn from_iter<T: IntoIterator<Item = (N, Symbol)>>(iter: T) -> Self {
        let mut table = Self::new();
        for (name, symbol) in iter {
            table.insert(name, symbol);
        }
        table
    }
}

/// One source frame for a program counter.
///
/// A single pc expands to several frames when calls were inlined; the
/// inlined callers come first and the frame that owns the machine code last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub function: String,
    pub file: String,
    pub line: u32,
    pub inline: bool,
}

/// Injected pc-to-source capability.
///
/// `resolve` may block and may fail; callers treat any failure as "no source
/// information" and keep going. An `Ok(vec![])` result means the pc is valid
/// but has no line info, which callers also treat as a miss.
pub trait Resolver {
    fn resolve(&self, binary: &str, pc: u64) -> anyhow::Result<Vec<Frame>>;
}

impl<F> Resolver for F
where
    F: Fn(&str, u64) -> anyhow::Result<Vec<Frame>>,
{
    fn resolve(&self, binary: &str, pc: u64) -> anyhow::Result<Vec<Frame>> {
        self(binary, pc)
    }
}
