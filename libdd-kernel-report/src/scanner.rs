// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Locates the crash that a log should be attributed to.
//!
//! The log is scanned line by line against every descriptor header. The
//! earliest match in the log wins; when several descriptors match the same
//! line, the smaller in-line offset wins first and descriptor table order
//! second, so that e.g. a `BUG: KASAN:` line is claimed by the KASAN class
//! rather than the catch-all `BUG:` class. A candidate whose rendered title
//! hits the caller's ignore list is skipped and scanning resumes past its
//! line, which may surface a later, different crash.

use log::debug;

use crate::line::StrippedLog;
use crate::oops::{Oops, OOPSES};

/// A located crash candidate.
pub(crate) struct Candidate {
    pub oops: &'static Oops,
    /// Line index of the header match.
    pub line: usize,
    /// Rendered, normalized title.
    pub title: String,
}

/// Earliest non-suppressed descriptor match within one line.
///
/// Returns the in-line byte offset of the match and the descriptor.
pub(crate) fn match_line(content: &[u8]) -> Option<(usize, &'static Oops)> {
    let mut best: Option<(usize, usize)> = None;
    for (priority, oops) in OOPSES.iter().enumerate() {
        let Some(found) = oops.header.find(content) else {
            continue;
        };
        if oops.suppresses(content) {
            continue;
        }
        let key = (found.start(), priority);
        if best.is_none_or(|current| key < current) {
            best = Some(key);
        }
    }
    best.map(|(offset, priority)| (offset, &OOPSES[priority]))
}

/// Finds the first crash whose title survives the ignore list.
pub(crate) fn find_crash(
    log: &StrippedLog,
    ignores: &[regex::Regex],
) -> Option<Candidate> {
    for line_idx in 0..log.lines.len() {
        let content = log.content(line_idx);
        let Some((offset, oops)) = match_line(content) else {
            continue;
        };
        let tail_start = log.lines[line_idx].stripped_start + offset;
        let title = oops.render_title(&log.data[tail_start..]);
        if ignores.iter().any(|re| re.is_match(&title)) {
            debug!("crash candidate '{title}' suppressed by ignore list");
            continue;
        }
        debug!("crash candidate '{title}' at line {line_idx}");
        return Some(Candidate {
            oops,
            line: line_idx,
            title,
        });
    }
    None
}
