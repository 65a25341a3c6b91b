//! Classification and colouring of child process output.
//!
//! Each child line is matched against a table of rules for its process.
//! The first matching rule decides whether the line is dropped, rewritten or
//! passed through. Lines no rule claims are always emitted with a prefix, so
//! output from an unfamiliar tool is never swallowed.
//!
//! Supporting a new framework means adding rows to a table, not new control flow.

use regex::Regex;
use std::sync::OnceLock;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const BLUE: &str = "\x1b[34m";
pub const MAGENTA: &str = "\x1b[35m";
pub const CYAN: &str = "\x1b[36m";
pub const WHITE: &str = "\x1b[37m";

pub const FRONTEND_NAME: &str = "Frontend";
pub const BACKEND_NAME: &str = "Backend";

const FRONTEND_PREFIX: &str = "🎨 Frontend:";
const BACKEND_PREFIX: &str = "🔧 Backend:";

/// Substrings that mark watcher/build chatter from any child.
const NOISE: &[&str] = &["watching", "!exclude", "building...", "running..."];

/// Request paths the frontend dev server generates on its own.
const ASSET_PATH_MARKERS: &[&str] = &["/@vite/", "/node_modules/"];
const REACT_REFRESH_PATH: &str = "/@react-refresh";

const BACKEND_BANNER_MARKERS: &[&str] = &[
    "Server starting",
    "Fiber",
    "├",
    "│",
    "└",
    "┌",
    "┐",
    "─",
    "http://",
    "Handlers",
    "Processes",
    "PID",
];

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// What to do with one line of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Drop,
    Emit(String),
}

/// A line being classified.
pub struct Line<'a> {
    /// Line as the child wrote it, ANSI codes included.
    pub raw: &'a str,
    /// Line with ANSI codes removed, used for matching.
    pub plain: &'a str,
    /// Display colour of the child.
    pub color: &'a str,
}

struct Rule {
    name: &'static str,
    matches: fn(&Line<'_>) -> bool,
    render: fn(&Line<'_>) -> Verdict,
}

const FRONTEND_RULES: &[Rule] = &[
    Rule {
        name: "vite-banner",
        matches: |l| l.plain.contains("VITE v"),
        render: |l| {
            let version = vite_version(l.plain)
                .map(|v| format!(" v{}", v))
                .unwrap_or_default();
            Verdict::Emit(prefixed(
                FRONTEND_PREFIX,
                l.color,
                &format!("Vite{} dev server started", version),
            ))
        },
    },
    Rule {
        name: "vite-local",
        matches: |l| l.plain.contains("Local:"),
        render: |l| {
            Verdict::Emit(prefixed(
                FRONTEND_PREFIX,
                l.color,
                "ready (reach it through the proxy URL)",
            ))
        },
    },
    Rule {
        name: "vite-network",
        matches: |l| l.plain.contains("Network:"),
        render: |l| Verdict::Emit(prefixed(FRONTEND_PREFIX, l.color, "network address listed")),
    },
];

const BACKEND_RULES: &[Rule] = &[
    Rule {
        name: "huma-access-log",
        matches: |l| is_huma_access_log(l.plain),
        render: |l| Verdict::Emit(l.raw.to_string()),
    },
    Rule {
        name: "piped-access-log",
        matches: |l| l.plain.matches('|').count() >= 4,
        render: render_piped_access_log,
    },
    Rule {
        name: "startup-banner",
        matches: |l| BACKEND_BANNER_MARKERS.iter().any(|m| l.plain.contains(m)),
        render: |l| Verdict::Emit(prefixed(BACKEND_PREFIX, l.color, l.raw.trim_end())),
    },
    Rule {
        name: "bound-on-host",
        matches: |l| l.plain.contains("bound on host"),
        render: |_| Verdict::Drop,
    },
];

/// Classify one line from process `name`.
pub fn format_line(name: &str, line: &str, color: &str) -> Verdict {
    if line.trim().is_empty() {
        return Verdict::Drop;
    }

    let plain = strip_ansi(line);
    if NOISE.iter().any(|n| plain.contains(n)) {
        return Verdict::Drop;
    }

    let l = Line {
        raw: line,
        plain: &plain,
        color,
    };

    let (rules, prefix): (&[Rule], String) = match name {
        FRONTEND_NAME => (FRONTEND_RULES, FRONTEND_PREFIX.to_string()),
        BACKEND_NAME => (BACKEND_RULES, BACKEND_PREFIX.to_string()),
        other => (&[], format!("{}:", other)),
    };

    if let Some(rule) = rules.iter().find(|r| (r.matches)(&l)) {
        tracing::trace!("{} line matched rule '{}'", name, rule.name);
        return (rule.render)(&l);
    }

    Verdict::Emit(prefixed(&prefix, color, line.trim_end()))
}

/// Classify a line and print it to stdout unless it is dropped.
pub fn emit_line(name: &str, line: &str, color: &str) {
    if let Verdict::Emit(text) = format_line(name, line, color) {
        println!("{}", text);
    }
}

fn prefixed(prefix: &str, color: &str, body: &str) -> String {
    format!("{}{}{} {}", color, prefix, RESET, body)
}

/// Remove ANSI escape sequences and carriage returns.
pub fn strip_ansi(line: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07|\r")
            .expect("ANSI pattern is valid")
    });
    re.replace_all(line, "").into_owned()
}

fn vite_version(plain: &str) -> Option<&str> {
    let rest = &plain[plain.find("VITE v")? + "VITE v".len()..];
    let version = rest.split_whitespace().next()?;
    (!version.is_empty()).then_some(version)
}

fn is_huma_access_log(plain: &str) -> bool {
    let quoted_method = HTTP_METHODS
        .iter()
        .any(|m| plain.contains(&format!("\"{} ", m)));
    quoted_method && plain.contains(" from ") && (plain.contains(" - ") || plain.contains(" in "))
}

/// `time | status | duration | ip | method | path`
fn render_piped_access_log(l: &Line<'_>) -> Verdict {
    let fields: Vec<&str> = l.plain.split('|').map(str::trim).collect();
    let field = |i: usize| fields.get(i).copied().unwrap_or("");

    let (time, status, duration, ip, method, path) =
        (field(0), field(1), field(2), field(3), field(4), field(5));

    if is_dev_asset_path(path) {
        return Verdict::Drop;
    }

    Verdict::Emit(format!(
        "{}{}{} {}{}{} | {}{}{} | {} | {} | {}{:<7}{} {}",
        l.color,
        BACKEND_PREFIX,
        RESET,
        DIM,
        time,
        RESET,
        status_color(status),
        status,
        RESET,
        duration,
        ip,
        method_color(method),
        method,
        RESET,
        path
    ))
}

fn is_dev_asset_path(path: &str) -> bool {
    path == REACT_REFRESH_PATH || ASSET_PATH_MARKERS.iter().any(|m| path.contains(m))
}

/// Colour for an HTTP status by class.
pub fn status_color(status: &str) -> &'static str {
    match status.chars().next() {
        Some('2') => GREEN,
        Some('3') => YELLOW,
        Some('4') => RED,
        Some('5') => MAGENTA,
        _ => WHITE,
    }
}

/// Colour for an HTTP method.
pub fn method_color(method: &str) -> &'static str {
    match method {
        "GET" => BLUE,
        "POST" => GREEN,
        "PUT" => YELLOW,
        "PATCH" => CYAN,
        "DELETE" => RED,
        _ => WHITE,
    }
}
