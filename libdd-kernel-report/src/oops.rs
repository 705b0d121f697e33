// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Declarative catalog of kernel crash classes.
//!
//! Each [`Oops`] describes one class of report: a header pattern that
//! locates a candidate line, ordered title formats whose (possibly
//! multi-line) patterns refine the candidate into a canonical title, and
//! suppression patterns for lines that look like a header but are noise
//! (userspace chatter, informational lockdep shutdown messages). Adding a
//! crash class is a data change here, not a control-flow change anywhere
//! else.
//!
//! Table order is the tie-breaker when several classes match a line at the
//! same offset, so the specific classes come first and the catch-all `BUG:`,
//! `WARNING:` and `INFO:` classes last.

use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::title;

/// Compiles a static table pattern in byte mode, so that matching never
/// chokes on the binary garbage that real console logs contain.
#[allow(clippy::expect_used)]
pub(crate) fn compile(pattern: &str) -> Regex {
    Regex::new(&format!("(?-u){pattern}")).expect("static crash pattern must compile")
}

/// One title format: a pattern anchored at the candidate position and a
/// template expanded from its capture groups (`${N}`).
pub(crate) struct OopsFormat {
    re: Regex,
    title: &'static str,
}

/// One crash class.
pub(crate) struct Oops {
    pub header: Regex,
    formats: Vec<OopsFormat>,
    suppressions: Vec<Regex>,
    corrupted: Vec<Regex>,
    needs_call_trace: bool,
}

impl Oops {
    fn new(header: &str) -> Self {
        Self {
            header: compile(header),
            formats: Vec::new(),
            suppressions: Vec::new(),
            corrupted: Vec::new(),
            needs_call_trace: false,
        }
    }

    fn format(mut self, pattern: &str, title: &'static str) -> Self {
        self.formats.push(OopsFormat {
            re: compile(&format!("^(?:{pattern})")),
            title,
        });
        self
    }

    fn suppress(mut self, pattern: &str) -> Self {
        self.suppressions.push(compile(pattern));
        self
    }

    fn corrupted_when(mut self, pattern: &str) -> Self {
        self.corrupted.push(compile(pattern));
        self
    }

    fn expect_call_trace(mut self) -> Self {
        self.needs_call_trace = true;
        self
    }

    /// Whether a candidate line must be dropped as noise.
    pub fn suppresses(&self, line: &[u8]) -> bool {
        self.suppressions.iter().any(|re| re.is_match(line))
    }

    /// Renders the canonical title for a candidate.
    ///
    /// `tail` starts at the header match and runs to the end of the log, so
    /// formats may require companion lines anywhere below the header. The
    /// first matching format wins; with no match the title falls back to the
    /// matched line itself.
    pub fn render_title(&self, tail: &[u8]) -> String {
        for format in &self.formats {
            if let Some(caps) = format.re.captures(tail) {
                let mut rendered = Vec::new();
                caps.expand(format.title.as_bytes(), &mut rendered);
                return title::sanitize(&rendered);
            }
        }
        let line_end = tail.iter().position(|&b| b == b'\n').unwrap_or(tail.len());
        title::sanitize(&tail[..line_end])
    }

    /// Whether an extracted report of this class looks truncated.
    pub fn is_corrupted(&self, text: &[u8]) -> bool {
        if self.corrupted.iter().any(|re| re.is_match(text)) {
            return true;
        }
        self.needs_call_trace && !STACK_MARKER_RE.is_match(text)
    }
}

static STACK_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"Call Trace:|backtrace:|Backtrace:"));

// A function token in a stack line. Kernel symbols grow `.isra.N`,
// `.constprop.N`, `.part.N` suffixes under optimization; the capture stops
// before them so two builds of the same function dedup together.
const FUNC: &str = r"([a-zA-Z_][a-zA-Z0-9_]*)(?:\.[a-zA-Z0-9._]*)?";
// KASAN headers are the one place the suffix is kept, matching how these
// titles have historically been tracked.
const FUNC_DOT: &str = r"([a-zA-Z_][a-zA-Z0-9_.]*)";
// Lazily skip anything, including newlines.
const SKIP: &str = r"(?s:.*?)";

/// The ordered crash-class table, compiled once per process.
pub(crate) static OOPSES: LazyLock<Vec<Oops>> = LazyLock::new(build_table);

fn build_table() -> Vec<Oops> {
    let lock_at = format!(r"{SKIP}at:\s*(?:\[<[0-9a-f]+>\]\s*)+{FUNC}\+0x");
    vec![
        Oops::new("BUG: KASAN")
            .format(
                &format!(
                    r"BUG: KASAN: ([a-z-]+) in {FUNC_DOT}\+0x[0-9a-f]+/0x[0-9a-f]+ at addr [0-9a-f]+{SKIP}\n\s*(Read|Write) of size [0-9]+"
                ),
                "KASAN: ${1} ${3} in ${2}",
            )
            .format(
                &format!(
                    r"BUG: KASAN: null-ptr-deref on address{SKIP}\n\s*(Read|Write) of size ([0-9]+)"
                ),
                "KASAN: null-ptr-deref ${1} of size ${2}",
            )
            .format(
                &format!(
                    r"BUG: KASAN: ([a-z-]+) in {FUNC_DOT}\+0x[0-9a-f]+/0x[0-9a-f]+ at addr ([0-9a-f]+)"
                ),
                "KASAN: ${1} in ${2} at addr ${3}",
            )
            .expect_call_trace(),
        Oops::new("BUG: unable to handle kernel NULL pointer dereference")
            .format(
                &format!(
                    r"BUG: unable to handle kernel NULL pointer dereference{SKIP}\nIP: (?:\[<[0-9a-f]+>\] )?{FUNC}\+0x"
                ),
                "BUG: unable to handle kernel NULL pointer dereference in ${1}",
            )
            .format(
                "BUG: unable to handle kernel NULL pointer dereference",
                "BUG: unable to handle kernel NULL pointer dereference",
            )
            .expect_call_trace(),
        Oops::new("BUG: unable to handle kernel paging request")
            .format(
                &format!(
                    r"BUG: unable to handle kernel paging request{SKIP}\nIP: (?:\[<[0-9a-f]+>\] )?{FUNC}\+0x"
                ),
                "BUG: unable to handle kernel paging request in ${1}",
            )
            .format(
                "BUG: unable to handle kernel paging request",
                "BUG: unable to handle kernel paging request",
            )
            .expect_call_trace(),
        Oops::new("Unable to handle kernel paging request")
            .format(
                &format!(r"Unable to handle kernel paging request{SKIP}\nPC is at {FUNC}\+0x"),
                "unable to handle kernel paging request in ${1}",
            )
            .format(
                "Unable to handle kernel paging request",
                "unable to handle kernel paging request",
            )
            .expect_call_trace(),
        Oops::new("general protection fault:")
            .format(
                &format!(
                    r"general protection fault:{SKIP}\nRIP: [0-9]+:(?:\[<[0-9a-f]+>\]\s*)*{FUNC}\+0x"
                ),
                "general protection fault in ${1}",
            )
            .expect_call_trace(),
        Oops::new("divide error:")
            .format(
                &format!(r"divide error:{SKIP}\nRIP: [0-9]+:(?:\[<[0-9a-f]+>\]\s*)*{FUNC}\+0x"),
                "divide error in ${1}",
            )
            .expect_call_trace(),
        Oops::new("INFO: possible circular locking dependency detected").format(
            &format!(r"INFO: possible circular locking dependency detected{lock_at}"),
            "possible deadlock in ${1}",
        ),
        Oops::new("WARNING: possible circular locking dependency detected").format(
            &format!(r"WARNING: possible circular locking dependency detected{lock_at}"),
            "possible deadlock in ${1}",
        ),
        Oops::new("INFO: possible irq lock inversion dependency detected").format(
            &format!(r"INFO: possible irq lock inversion dependency detected{lock_at}"),
            "possible deadlock in ${1}",
        ),
        Oops::new("INFO: SOFTIRQ-safe -> SOFTIRQ-unsafe lock order detected").format(
            &format!(r"INFO: SOFTIRQ-safe -> SOFTIRQ-unsafe lock order detected{lock_at}"),
            "possible deadlock in ${1}",
        ),
        Oops::new("INFO: possible recursive locking detected").format(
            &format!(r"INFO: possible recursive locking detected{lock_at}"),
            "possible deadlock in ${1}",
        ),
        Oops::new("INFO: inconsistent lock state").format(
            &format!(r"INFO: inconsistent lock state{lock_at}"),
            "inconsistent lock state in ${1}",
        ),
        Oops::new("INFO: suspicious RCU usage").format(
            &format!(r"INFO: suspicious RCU usage{SKIP}\n([a-zA-Z0-9_./-]+:[0-9]+) suspicious rcu"),
            "suspicious RCU usage at ${1}",
        ),
        Oops::new(r"BUG: [^\n]* still has locks held!").format(
            &format!(r"BUG: [^\n]* still has locks held!{lock_at}"),
            "BUG: still has locks held in ${1}",
        ),
        Oops::new("BUG: bad unlock balance detected!").format(
            &format!(r"BUG: bad unlock balance detected!{lock_at}"),
            "BUG: bad unlock balance in ${1}",
        ),
        Oops::new("BUG: held lock freed!").format(
            &format!(r"BUG: held lock freed!{lock_at}"),
            "BUG: held lock freed in ${1}",
        ),
        Oops::new("UBSAN: Undefined behaviour").expect_call_trace(),
        Oops::new("kernel BUG at"),
        Oops::new(r"BUG [^\n]*: Object already free")
            .format(r"BUG [^\n]*: Object already free", "BUG: Object already free"),
        Oops::new("unreferenced object")
            .format(
                &format!(
                    r"unreferenced object 0x[0-9a-f]+ \(size ([0-9]+)\):{SKIP}backtrace:[^\n]*\n(?:[^\n]*\n){{2}}\s*\[<[0-9a-f]+>\] {FUNC}\+0x"
                ),
                "memory leak in ${2} (size ${1})",
            )
            .expect_call_trace(),
        Oops::new("WARNING:")
            .format(
                &format!(r"WARNING: CPU: [0-9]+ PID: [0-9]+ at [^ ]+ {FUNC}\+0x"),
                "WARNING in ${1}",
            )
            .format(
                r"WARNING: kernel stack regs at [0-9a-f]+ in [^ ]+ has bad 'bp' value",
                "WARNING: kernel stack regs has bad 'bp' value",
            )
            .format(
                r"WARNING: kernel stack frame pointer at [0-9a-f]+ in [^ ]+ has bad value",
                "WARNING: kernel stack frame pointer has bad value",
            )
            // Printed by sshd, not the kernel.
            .suppress("WARNING: /etc/ssh/moduli does not exist")
            .expect_call_trace(),
        Oops::new("INFO:")
            .format(
                r"INFO: task [^\n]+ blocked for more than [0-9]+ seconds",
                "INFO: task hung",
            )
            .format(
                &format!(
                    r"INFO: rcu_(?:preempt|sched|bh) (?:self-)?detected(?: expedited)? stalls?{SKIP}\n\s*apic_timer_interrupt\+0x[0-9a-f]+/0x[0-9a-f]+\n(?:[^\n]*(?:R[A-Z0-9]{{2}}:|</?IRQ>)[^\n]*\n)*\s*(?:\? )?{FUNC}\+0x"
                ),
                "INFO: rcu detected stall in ${1}",
            )
            .format(
                r"INFO: rcu_(?:preempt|sched|bh) (?:self-)?detected(?: expedited)? stalls?",
                "INFO: rcu detected stall",
            )
            .suppress(r"INFO: lockdep is turned off")
            .suppress(r"INFO: Stall ended before state dump start")
            .suppress(r"INFO: NMI handler [^\n]*took too long to run")
            .corrupted_when("Stall ended before state dump")
            .expect_call_trace(),
        Oops::new("BUG:")
            .format(r"BUG: spinlock lockup suspected", "BUG: spinlock lockup suspected")
            .format(r"BUG: soft lockup", "BUG: soft lockup")
            .format(r"BUG: spinlock recursion", "BUG: spinlock recursion")
            .format(r"BUG: spinlock bad magic", "BUG: spinlock bad magic")
            .format(r"BUG: Bad page state", "BUG: Bad page state")
            .format(r"BUG: Bad rss-counter state", "BUG: Bad rss-counter state")
            .format(
                r"BUG: Dentry [0-9a-f]+\{[^}\n]*\}\s+still in use \([0-9]+\) \[unmount of ([^\]\n]+)\]",
                "BUG: Dentry still in use [unmount of ${1}]",
            ),
        Oops::new("Kernel panic - not syncing")
            .format(
                r"Kernel panic - not syncing: Attempted to kill init!",
                "kernel panic: Attempted to kill init!",
            )
            .format(
                r"Kernel panic - not syncing: (Fatal exception(?: in interrupt)?)",
                "kernel panic: ${1}",
            )
            .format(
                r"Kernel panic - not syncing: (Couldn't open N_TTY ldisc)",
                "kernel panic: ${1}",
            )
            .format(r"Kernel panic - not syncing: ([^\n]+)", "kernel panic: ${1}"),
    ]
}
