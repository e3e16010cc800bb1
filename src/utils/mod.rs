//! Utilities: leveled logging (dynamic level, stderr), ANSI color (respects NO_COLOR),
//! and cleanup of formatted/ANSI-laden text returned by the remote service.
//!
//! Key items:
//!   init_logging / derive_level
//!   output::color
//!   text::clean_formatted_text

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Logging helpers.
///
/// Level resolution: `-q` forces Error, `-v`/`-vv` raise to Debug/Trace,
/// and `DEBUG=1` in the environment raises the floor to Debug. All log
/// lines go to stderr so command stdout stays machine-consumable.
pub mod logging {
    use super::*;

    #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
    pub enum LogLevel {
        Error = 0,
        Warn = 1,
        Info = 2,
        Debug = 3,
        Trace = 4,
    }

    impl LogLevel {
        pub fn as_str(&self) -> &'static str {
            match self {
                LogLevel::Error => "ERROR",
                LogLevel::Warn => "WARN",
                LogLevel::Info => "INFO",
                LogLevel::Debug => "DEBUG",
                LogLevel::Trace => "TRACE",
            }
        }
    }

    static GLOBAL_LEVEL: OnceLock<AtomicU8> = OnceLock::new();

    fn inner_cell() -> &'static AtomicU8 {
        GLOBAL_LEVEL.get_or_init(|| AtomicU8::new(LogLevel::Info as u8))
    }

    pub fn init_logging(level: LogLevel) {
        set_log_level(level);
    }

    pub fn set_log_level(level: LogLevel) {
        inner_cell().store(level as u8, Ordering::Relaxed);
    }

    pub fn current_log_level() -> LogLevel {
        match inner_cell().load(Ordering::Relaxed) {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Derive the effective level from CLI flags and the `DEBUG` env var.
    pub fn derive_level(verbose: u8, quiet: bool, debug_env: bool) -> LogLevel {
        if quiet {
            return LogLevel::Error;
        }
        let from_flags = match verbose {
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        };
        if debug_env && from_flags < LogLevel::Debug {
            LogLevel::Debug
        } else {
            from_flags
        }
    }

    fn timestamp() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    fn should_emit(level: LogLevel) -> bool {
        level <= current_log_level()
    }

    pub fn log(level: LogLevel, msg: impl AsRef<str>) {
        if should_emit(level) {
            eprintln!("[{}][{}] {}", level.as_str(), timestamp(), msg.as_ref());
        }
    }

    pub fn error(msg: impl AsRef<str>) {
        log(LogLevel::Error, msg);
    }
    pub fn warn(msg: impl AsRef<str>) {
        log(LogLevel::Warn, msg);
    }
    pub fn info(msg: impl AsRef<str>) {
        log(LogLevel::Info, msg);
    }
    pub fn debug(msg: impl AsRef<str>) {
        log(LogLevel::Debug, msg);
    }
    pub fn trace(msg: impl AsRef<str>) {
        log(LogLevel::Trace, msg);
    }

    #[macro_export]
    macro_rules! log_error {
        ($($t:tt)*) => { $crate::utils::logging::error(format!($($t)*)) };
    }
    #[macro_export]
    macro_rules! log_warn {
        ($($t:tt)*) => { $crate::utils::logging::warn(format!($($t)*)) };
    }
    #[macro_export]
    macro_rules! log_info {
        ($($t:tt)*) => { $crate::utils::logging::info(format!($($t)*)) };
    }
    #[macro_export]
    macro_rules! log_debug {
        ($($t:tt)*) => { $crate::utils::logging::debug(format!($($t)*)) };
    }
    #[macro_export]
    macro_rules! log_trace {
        ($($t:tt)*) => { $crate::utils::logging::trace(format!($($t)*)) };
    }
}

pub use logging::{derive_level, init_logging};

/// Output related helpers (ANSI coloring without extra deps).
pub mod output {
    /// Simple ansi color wrapper (disable via NO_COLOR).
    pub fn color(c: Color, text: impl AsRef<str>) -> String {
        if std::env::var_os("NO_COLOR").is_some() {
            return text.as_ref().to_string();
        }
        format!("{}{}{}", c.as_code(), text.as_ref(), "\x1b[0m")
    }

    #[derive(Copy, Clone)]
    pub enum Color {
        Red,
        Green,
        Yellow,
        Bold,
    }
    impl Color {
        fn as_code(&self) -> &'static str {
            match self {
                Color::Red => "\x1b[31m",
                Color::Green => "\x1b[32m",
                Color::Yellow => "\x1b[33m",
                Color::Bold => "\x1b[1m",
            }
        }
    }
}

/// Cleanup for ANSI/box-drawing formatted text coming back from remote tooling.
pub mod text {
    /// Strip ANSI escape sequences, replace box-drawing glyphs with ASCII,
    /// and normalize whitespace while preserving line structure.
    pub fn clean_formatted_text(input: &str) -> String {
        let stripped = strip_ansi(input);

        let mapped: String = stripped
            .chars()
            .map(|c| match c {
                '─' | '━' => '-',
                '│' | '┃' => '|',
                '╭' | '╮' | '╯' | '╰' | '┏' | '┓' | '┛' | '┗' | '┣' | '┫' | '┳'
                | '┻' | '╋' => '+',
                '╱' => '/',
                '╲' => '\\',
                '╳' => 'x',
                other => other,
            })
            .collect();

        mapped
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Remove ANSI escape sequences (CSI sequences and two-character escapes).
    pub fn strip_ansi(input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '\u{1b}' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    // CSI: parameter/intermediate bytes, then one final byte in '@'..='~'
                    for f in chars.by_ref() {
                        if ('@'..='~').contains(&f) {
                            break;
                        }
                    }
                }
                Some(_) => {
                    chars.next();
                }
                None => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::logging::{LogLevel, derive_level};
    use super::text::{clean_formatted_text, strip_ansi};

    #[test]
    fn derive_level_flags() {
        assert_eq!(derive_level(0, false, false), LogLevel::Info);
        assert_eq!(derive_level(1, false, false), LogLevel::Debug);
        assert_eq!(derive_level(2, false, false), LogLevel::Trace);
        assert_eq!(derive_level(0, true, true), LogLevel::Error, "quiet wins");
    }

    #[test]
    fn derive_level_debug_env_raises_floor() {
        assert_eq!(derive_level(0, false, true), LogLevel::Debug);
        assert_eq!(derive_level(2, false, true), LogLevel::Trace);
    }

    #[test]
    fn strips_csi_sequences() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn cleans_box_drawing_and_whitespace() {
        let cleaned = clean_formatted_text("╭──╮\n│  hi   there │\n╰──╯\n\n");
        assert_eq!(cleaned, "+--+\n| hi there |\n+--+");
    }
}
