// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Adds `file:line` information to stack lines of an extracted report.
//!
//! Lines of the form `<func>+0xOFF/0xSIZE` are resolved through the injected
//! symbol table and pc resolver and rewritten in place; everything the
//! resolver cannot answer passes through byte-identical. Running the adapter
//! twice is a no-op: a line that already carries a `file:line` after its
//! offset is recognized and skipped.

use std::sync::LazyLock;

use log::debug;
use regex::bytes::Regex;
use thiserror::Error;

use libdd_kernel_symbolizer::{Frame, Resolver, SymbolTable};

use crate::oops::compile;
use crate::splice::replace;

// `WS <func>+0xOFF/0xSIZE`, optionally with a `[<HEX>]` address in front, as
// printed in call traces and `RIP:`/`IP:` lines.
static STACK_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?:\[<[0-9a-f]+>\]\s*|\s)([a-zA-Z_][a-zA-Z0-9_.]*)\+0x([0-9a-f]+)/0x([0-9a-f]+)")
});

// A `file:line` annotation directly after the size token means the line has
// been through the adapter already.
static ANNOTATED_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"^ [^\s:]+:[0-9]+"));

#[derive(Debug, Error)]
enum SymbolizeError {
    #[error("offset does not fit in a pc")]
    OffsetOverflow,
    #[error("no symbol covers {func}+0x{offset:x}")]
    SymbolMissing { func: String, offset: u64 },
    #[error("resolver failed: {0:#}")]
    ResolverFailure(anyhow::Error),
}

/// Rewrites every resolvable stack line of `text`, leaving all other bytes
/// untouched. Failures are per-line and silent apart from a debug log; the
/// worst outcome is an unannotated line.
pub fn symbolize(
    text: &[u8],
    resolver: &impl Resolver,
    symbols: &SymbolTable,
    binary: &str,
    src_prefix: &str,
) -> Vec<u8> {
    let mut out = text.to_vec();
    let mut shift = 0isize;
    let mut pos = 0;
    while pos < text.len() {
        let end = match text[pos..].iter().position(|&b| b == b'\n') {
            Some(off) => pos + off + 1,
            None => text.len(),
        };
        let line = &text[pos..end];
        match symbolize_line(line, resolver, symbols, binary, src_prefix) {
            Ok(Some(new_line)) => {
                let at = (pos as isize + shift) as usize;
                out = replace(&out, at, at + line.len(), &new_line);
                shift += new_line.len() as isize - line.len() as isize;
            }
            Ok(None) => {}
            Err(err) => {
                debug!("leaving stack line unsymbolized: {err}");
            }
        }
        pos = end;
    }
    out
}

/// Symbolizes a single line; `Ok(None)` means the line needs no change.
fn symbolize_line(
    line: &[u8],
    resolver: &impl Resolver,
    symbols: &SymbolTable,
    binary: &str,
    src_prefix: &str,
) -> Result<Option<Vec<u8>>, SymbolizeError> {
    let Some(caps) = STACK_LINE_RE.captures(line) else {
        return Ok(None);
    };
    #[allow(clippy::unwrap_used)] // groups 1..3 are unconditional in the pattern
    let (whole, func, off, size) = (
        caps.get(0).unwrap(),
        caps.get(1).unwrap(),
        caps.get(2).unwrap(),
        caps.get(3).unwrap(),
    );
    if ANNOTATED_RE.is_match(&line[whole.end()..]) {
        return Ok(None);
    }
    let func_name = String::from_utf8_lossy(func.as_bytes());
    let offset = parse_hex(off.as_bytes())?;
    let _ = parse_hex(size.as_bytes())?;

    let frames = resolve_frames(resolver, symbols, binary, &func_name, offset)?;
    let Some((last, inlined)) = frames.split_last() else {
        return Ok(None);
    };

    let mut new_line = Vec::with_capacity(line.len() + 32);
    let prefix = &line[..func.start()];
    for frame in inlined {
        new_line.extend_from_slice(prefix);
        new_line.extend_from_slice(frame.function.as_bytes());
        new_line.push(b' ');
        push_location(&mut new_line, frame, src_prefix);
        new_line.extend_from_slice(b" [inline]\n");
    }
    new_line.extend_from_slice(&line[..whole.end()]);
    new_line.push(b' ');
    push_location(&mut new_line, last, src_prefix);
    new_line.extend_from_slice(&line[whole.end()..]);
    Ok(Some(new_line))
}

/// Tries the symbols a function name maps to, in table order, and returns the
/// first successful, non-empty resolution of the frame's call site.
fn resolve_frames(
    resolver: &impl Resolver,
    symbols: &SymbolTable,
    binary: &str,
    func: &str,
    offset: u64,
) -> Result<Vec<Frame>, SymbolizeError> {
    let mut last_failure = None;
    for symbol in symbols.lookup(func) {
        if !symbol.contains_offset(offset) {
            continue;
        }
        // Stack entries hold return addresses; the byte before the return
        // address is still inside the call instruction of the frame we want.
        let pc = symbol
            .addr
            .checked_add(offset)
            .and_then(|ret| ret.checked_sub(1))
            .ok_or(SymbolizeError::OffsetOverflow)?;
        match resolver.resolve(binary, pc) {
            Ok(frames) if !frames.is_empty() => return Ok(frames),
            Ok(_) => return Ok(Vec::new()),
            Err(err) => last_failure = Some(SymbolizeError::ResolverFailure(err)),
        }
    }
    Err(last_failure.unwrap_or_else(|| SymbolizeError::SymbolMissing {
        func: func.to_string(),
        offset,
    }))
}

fn push_location(out: &mut Vec<u8>, frame: &Frame, src_prefix: &str) {
    let file = frame.file.strip_prefix(src_prefix).unwrap_or(&frame.file);
    let file = file.strip_prefix("./").unwrap_or(file);
    out.extend_from_slice(file.as_bytes());
    out.push(b':');
    out.extend_from_slice(frame.line.to_string().as_bytes());
}

fn parse_hex(digits: &[u8]) -> Result<u64, SymbolizeError> {
    let text = std::str::from_utf8(digits).map_err(|_| SymbolizeError::OffsetOverflow)?;
    u64::from_str_radix(text, 16).map_err(|_| SymbolizeError::OffsetOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libdd_kernel_symbolizer::Symbol;

    fn test_symbols() -> SymbolTable {
        [
            ("foo", Symbol::new(0x1000000, 0x190)),
            ("do_ipv6_setsockopt.isra.7.part.3", Symbol::new(0x2000000, 0x2830)),
            ("baz", Symbol::new(0x3000000, 0x100)),
            ("baz", Symbol::new(0x4000000, 0x200)),
            ("baz", Symbol::new(0x5000000, 0x300)),
        ]
        .into_iter()
        .collect()
    }

    fn test_resolver(binary: &str, pc: u64) -> anyhow::Result<Vec<Frame>> {
        anyhow::ensure!(binary == "vmlinux", "unknown binary");
        let frame = |function: &str, file: &str, line, inline| Frame {
            function: function.into(),
            file: file.into(),
            line,
            inline,
        };
        match pc {
            0x1000100 => Ok(vec![frame("", "/linux/foo.c", 555, false)]),
            0x1000110 => Ok(vec![frame("", "/linux/./foo.h", 111, false)]),
            0x1000120 => Ok(vec![]),
            0x2000100 => Ok(vec![frame("", "/linux/net.c", 111, false)]),
            0x1000140 => Ok(vec![
                frame("inlined1", "/linux/net.c", 111, true),
                frame("inlined2", "/linux/mm.c", 222, true),
                frame("noninlined3", "/linux/kasan.c", 333, false),
            ]),
            0x4000100 => Ok(vec![frame("", "/linux/baz.c", 100, false)]),
            _ => anyhow::bail!("unknown pc 0x{pc:x}"),
        }
    }

    fn run(line: &str) -> String {
        let out = symbolize(
            line.as_bytes(),
            &test_resolver,
            &test_symbols(),
            "vmlinux",
            "/linux/",
        );
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_symbolize_line() {
        let tests: &[(&str, &str)] = &[
            // Normal symbolization.
            (
                "[ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x101/0x185\n",
                "[ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x101/0x185 foo.c:555\n",
            ),
            (
                "RIP: 0010:[<ffffffff8188c0e6>]  [<ffffffff8188c0e6>]  foo+0x101/0x185\n",
                "RIP: 0010:[<ffffffff8188c0e6>]  [<ffffffff8188c0e6>]  foo+0x101/0x185 foo.c:555\n",
            ),
            // Strip the "./" file prefix.
            (
                "[ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x111/0x185\n",
                "[ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x111/0x185 foo.h:111\n",
            ),
            // Needs symbolization, but the resolver returns nothing.
            (
                "[ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x121/0x185\n",
                "[ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x121/0x185\n",
            ),
            // Needs symbolization, but the resolver fails.
            (
                "[ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x131/0x185\n",
                "[ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x131/0x185\n",
            ),
            // Unknown symbol.
            (
                "[ 2713.153531]  [<ffffffff82d1b1d9>] bar+0x131/0x185\n",
                "[ 2713.153531]  [<ffffffff82d1b1d9>] bar+0x131/0x185\n",
            ),
            // Offset does not fit in a pc.
            (
                "[ 2713.153531]  [<ffffffff82d1b1d9>] bar+0xffffffffffffffffffff/0x185\n",
                "[ 2713.153531]  [<ffffffff82d1b1d9>] bar+0xffffffffffffffffffff/0x185\n",
            ),
            // A file:line before the function does not block symbolization.
            (
                "WARNING: CPU: 2 PID: 2636 at ipc/shm.c:162 foo+0x101/0x185\n",
                "WARNING: CPU: 2 PID: 2636 at ipc/shm.c:162 foo+0x101/0x185 foo.c:555\n",
            ),
            // Optimization suffixes are part of the symbol name.
            (
                "    [<ffffffff84e5bea0>] do_ipv6_setsockopt.isra.7.part.3+0x101/0x2830 \n",
                "    [<ffffffff84e5bea0>] do_ipv6_setsockopt.isra.7.part.3+0x101/0x2830 net.c:111 \n",
            ),
            // Inlined frames become synthetic preceding lines.
            (
                "    [<ffffffff84e5bea0>] foo+0x141/0x185\n",
                "    [<ffffffff84e5bea0>] inlined1 net.c:111 [inline]\n\
                 \x20   [<ffffffff84e5bea0>] inlined2 mm.c:222 [inline]\n\
                 \x20   [<ffffffff84e5bea0>] foo+0x141/0x185 kasan.c:333\n",
            ),
            // Several symbols carry the same name; the one whose range covers
            // the offset and resolves wins.
            (
                "[<ffffffff82d1b1d9>] baz+0x101/0x200\n",
                "[<ffffffff82d1b1d9>] baz+0x101/0x200 baz.c:100\n",
            ),
        ];
        for (line, want) in tests {
            assert_eq!(&run(line), want, "input {line:?}");
        }
    }

    #[test]
    fn test_symbolize_is_idempotent() {
        let text = "[ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x101/0x185\n\
                    [ 2713.153531]  [<ffffffff82d1b1d9>] foo+0x121/0x185\n";
        let once = run(text);
        let twice = String::from_utf8(symbolize(
            once.as_bytes(),
            &test_resolver,
            &test_symbols(),
            "vmlinux",
            "/linux/",
        ))
        .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unrelated_lines_untouched() {
        let text: &[u8] = b"Call Trace:\nsome arbitrary line\n\xff\xfe binary garbage\n";
        let out = symbolize(text, &test_resolver, &test_symbols(), "vmlinux", "/linux/");
        assert_eq!(out, text);
    }
}
