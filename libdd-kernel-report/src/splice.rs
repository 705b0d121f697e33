// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Returns a new buffer equal to `buf[..start] ++ what ++ buf[end..]`.
///
/// `start == end` inserts, an empty `what` deletes. Requires
/// `start <= end <= buf.len()`. The symbolizer uses this to rewrite single
/// stack lines while it walks an extracted report, tracking the cumulative
/// length shift itself.
pub fn replace(buf: &[u8], start: usize, end: usize, what: &[u8]) -> Vec<u8> {
    assert!(start <= end && end <= buf.len());
    let mut out = Vec::with_capacity(buf.len() - (end - start) + what.len());
    out.extend_from_slice(&buf[..start]);
    out.extend_from_slice(what);
    out.extend_from_slice(&buf[end..]);
    out
}
