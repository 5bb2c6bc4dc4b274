//! Terminal output utilities: notes and table rendering.

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";

pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";

pub fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
        && (std::env::var("COLORTERM").is_ok()
            || std::env::var("TERM").map(|t| t != "dumb").unwrap_or(false))
}

pub fn strip_ansi(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

pub fn note_info(msg: &str) {
    if supports_color() {
        println!("{CYAN}{BOLD}ℹ{RESET} {msg}");
    } else {
        println!("INFO: {msg}");
    }
}

pub fn note_warn(msg: &str) {
    if supports_color() {
        println!("{YELLOW}{BOLD}⚠{RESET} {msg}");
    } else {
        println!("WARN: {msg}");
    }
}

pub fn note_error(msg: &str) {
    if supports_color() {
        eprintln!("{RED}{BOLD}✗{RESET} {msg}");
    } else {
        eprintln!("ERROR: {msg}");
    }
}

pub fn note_success(msg: &str) {
    if supports_color() {
        println!("{GREEN}{BOLD}✓{RESET} {msg}");
    } else {
        println!("OK: {msg}");
    }
}

pub struct Column {
    pub header: String,
}

impl Column {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

/// Left-aligned table; widths follow the widest visible cell per column.
pub fn render_table(columns: &[Column], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns
        .iter()
        .map(|c| strip_ansi(&c.header).chars().count())
        .collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(strip_ansi(cell).chars().count());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let pad = width.saturating_sub(strip_ansi(cell).chars().count());
                format!("{cell}{}", " ".repeat(pad))
            })
            .collect();
        format!("  {}\n", padded.join("  ").trim_end())
    };

    let mut out = String::new();
    let bold = if supports_color() { BOLD } else { "" };
    let reset = if supports_color() { RESET } else { "" };
    out.push_str(bold);
    out.push_str(&line(columns.iter().map(|c| c.header.as_str()).collect()));
    out.push_str(reset);
    let separators: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&line(separators.iter().map(String::as_str).collect()));
    for row in rows {
        let cells: Vec<&str> = (0..columns.len())
            .map(|i| row.get(i).map(String::as_str).unwrap_or(""))
            .collect();
        out.push_str(&line(cells));
    }
    out
}
