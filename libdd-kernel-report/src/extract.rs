// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounds and cleans the text of a located crash.
//!
//! The emitted report keeps a few lines of preceding console context, stops
//! at the point where the log moves on to something else (a second crash, the
//! `panic_on_warn` panic, the reboot banner), and drops the lines that are
//! noise inside a crash dump: userspace output interleaved mid-dump and
//! speculative `? frame` entries in call traces.

use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::line::StrippedLog;
use crate::oops::compile;
use crate::scanner;

/// How many preceding decorated lines to keep as context.
const CONTEXT_LINES: usize = 5;

/// A terminator closer than this to the crash header is part of the report
/// itself: a `WARNING` directly followed by a `panic_on_warn` panic is one
/// crash, not two.
const MIN_REPORT_LINES: usize = 25;

// Speculative call-trace entries; the unwinder prints them for addresses it
// is not sure about and they differ between otherwise identical crashes.
static QUESTION_FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^\s*(?:\[<[0-9a-f]+>\]\s*)?\? [a-zA-Z0-9_.]+\+0x"));

static TAINT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"Disabling lock debugging due to kernel taint"));

/// Computes the line range `[start, end)` of the report around a candidate.
pub(crate) fn bounds(log: &StrippedLog, candidate_line: usize) -> (usize, usize) {
    let mut start = candidate_line;
    if log.lines[candidate_line].decorated {
        while start > 0
            && candidate_line - (start - 1) <= CONTEXT_LINES
            && log.lines[start - 1].decorated
        {
            start -= 1;
        }
    }

    let mut end = log.lines.len();
    for idx in candidate_line + 1..log.lines.len() {
        if is_terminator(log.content(idx)) {
            if idx - candidate_line >= MIN_REPORT_LINES {
                end = idx;
            }
            break;
        }
    }
    (start, end)
}

/// Whether a line ends the current report: the kernel relocation banner
/// printed on the way to reboot, or the header of an independent crash.
fn is_terminator(content: &[u8]) -> bool {
    content
        .windows(b"Kernel Offset".len())
        .any(|window| window == b"Kernel Offset")
        || scanner::match_line(content).is_some()
}

/// Renders the report text for a line range.
///
/// When the crash header line carries printk decorations, undecorated lines
/// inside the range are userspace output that raced with the dump and are
/// dropped. Output is always LF-terminated.
pub(crate) fn render_text(
    log: &StrippedLog,
    start: usize,
    end: usize,
    crash_decorated: bool,
) -> Vec<u8> {
    let mut text = Vec::new();
    for idx in start..end {
        if crash_decorated && !log.lines[idx].decorated {
            continue;
        }
        let content = log.content(idx);
        if QUESTION_FRAME_RE.is_match(content) || TAINT_RE.is_match(content) {
            continue;
        }
        text.extend_from_slice(content);
        text.push(b'\n');
    }
    text
}
