// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Canonical crash-title rendering.
//!
//! A title has to survive deduplication across reboots, so everything that
//! varies between two instances of the same bug is collapsed after the
//! descriptor template has been expanded: kernel addresses and other long
//! hex runs become `ADDR`, long decimal runs become `NUM`, and numbered
//! fuzzer worker names lose their index. Short numbers stay, which keeps
//! `file.c:123` references and sizes intact. The normalization runs on the
//! rendered title, never on the log, so function names in offset positions
//! are still captured verbatim.

use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::oops::compile;

/// Hard cap on a rendered title, applied after normalization.
pub(crate) const MAX_TITLE_LEN: usize = 180;

static EXECUTOR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"syz-executor[0-9]+(?:/[0-9]+)?"));
static ADDR_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"0x[0-9a-f]+|\b[0-9a-f]{8,}\b"));
static NUM_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"[0-9]{5,}"));

/// Normalizes a rendered title and caps its length.
///
/// Trailing whitespace is preserved: a handful of kernel reports end their
/// first line with a space and the dedup corpus keys on the exact string.
pub(crate) fn sanitize(raw: &[u8]) -> String {
    let title = EXECUTOR_RE.replace_all(raw, &b"syz-executor"[..]);
    let title = ADDR_RE.replace_all(&title, &b"ADDR"[..]);
    let mut title = NUM_RE.replace_all(&title, &b"NUM"[..]).into_owned();
    title.truncate(MAX_TITLE_LEN);
    String::from_utf8_lossy(&title).into_owned()
}
