// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Crash recognition for raw kernel console output.
//!
//! Fuzzing workers hand over whatever the guest kernel wrote to its console:
//! fuzzer traces, unrelated kernel chatter, and possibly one or more
//! oops/BUG/WARNING/KASAN/lockdep reports, all interleaved and decorated by
//! printk. This crate decides whether that byte soup contains a crash,
//! extracts the report with a little context, and renders a short stable
//! title that collapses trivially different instances of the same bug so
//! they deduplicate.
//!
//! ```
//! let log = b"[  100.000000] BUG: spinlock lockup suspected on CPU#2, syz-executor/12636\n";
//! let report = libdd_kernel_report::parse(log, &[]).unwrap();
//! assert_eq!(report.title, "BUG: spinlock lockup suspected");
//! ```
//!
//! Parsing is total: malformed input can only ever produce "no crash" or a
//! less specific title, never an error. The optional [`symbolize`] pass
//! enriches an extracted report with `file:line` annotations through an
//! injected [`SymbolTable`] and [`Resolver`]; this crate never inspects the
//! kernel binary itself.

mod extract;
mod line;
mod oops;
mod scanner;
mod splice;
mod symbolize;
mod title;

use serde::{Deserialize, Serialize};

pub use libdd_kernel_symbolizer::{Frame, Resolver, Symbol, SymbolTable};
pub use splice::replace;
pub use symbolize::symbolize;

use crate::line::StrippedLog;

/// An extracted crash.
///
/// `start..end` is the byte range of the report in the original log; `text`
/// is that range with printk decorations and interleaved noise removed.
/// `corrupted` marks reports whose structure looks truncated (for example a
/// register dump with no call trace); the title is still valid for dedup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    pub title: String,
    pub text: Vec<u8>,
    pub start: usize,
    pub end: usize,
    pub corrupted: bool,
}

/// Whether the log contains at least one crash whose title is not matched by
/// any of the `ignores` patterns.
pub fn contains_crash(log: &[u8], ignores: &[regex::Regex]) -> bool {
    let stripped = StrippedLog::new(log);
    scanner::find_crash(&stripped, ignores).is_some()
}

/// Extracts the first non-ignored crash from a console log.
///
/// Ignore patterns are matched against the rendered title with substring
/// semantics; an ignored candidate can expose a later crash in the same log.
pub fn parse(log: &[u8], ignores: &[regex::Regex]) -> Option<CrashReport> {
    let stripped = StrippedLog::new(log);
    let candidate = scanner::find_crash(&stripped, ignores)?;
    let (start_line, end_line) = extract::bounds(&stripped, candidate.line);
    let text = extract::render_text(
        &stripped,
        start_line,
        end_line,
        stripped.lines[candidate.line].decorated,
    );
    let corrupted = candidate.oops.is_corrupted(&text);
    let start = stripped.lines[start_line].raw_start;
    let end = if end_line < stripped.lines.len() {
        stripped.lines[end_line].raw_start
    } else {
        log.len()
    };
    Some(CrashReport {
        title: candidate.title,
        text,
        start,
        end,
        corrupted,
    })
}
