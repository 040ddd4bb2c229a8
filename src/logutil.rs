//! Logging utilities for keeping device output single-line and readable in logs.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long strings (over `MAX_PREVIEW` chars) with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                // Represent other control chars as hex \xNN
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lowercase hex of at most `max` leading bytes, for trace logs of raw frames.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max.min(data.len()))
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}

/// Open `path` for appending log lines, creating it if needed.
pub fn open_log_file(path: &str) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::{escape_log, hex_snippet, open_log_file};

    #[test]
    fn escapes_newlines_and_tabs() {
        let s = "INFO  | ??:??:?? 2 [Router] Backup\nsaved\r\tok";
        let esc = escape_log(s);
        assert_eq!(esc, "INFO  | ??:??:?? 2 [Router] Backup\\nsaved\\r\\tok");
    }

    #[test]
    fn escapes_other_control_chars_as_hex() {
        assert_eq!(escape_log("\x1b[0mDEBUG"), "\\x1B[0mDEBUG");
    }

    #[test]
    fn long_console_lines_are_capped() {
        let s = "x".repeat(400);
        let esc = escape_log(&s);
        assert_eq!(esc.chars().count(), 301);
        assert!(esc.ends_with('…'));
    }

    #[test]
    fn hex_snippet_limits_output() {
        assert_eq!(hex_snippet(&[0x94, 0xc3, 0x00, 0x03], 2), "94c3");
        assert_eq!(hex_snippet(&[0x01], 8), "01");
        assert_eq!(hex_snippet(&[], 8), "");
    }

    #[test]
    fn log_file_appends_across_opens() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshbackup.log");
        let path = path.to_str().unwrap();

        writeln!(open_log_file(path).unwrap(), "first").unwrap();
        writeln!(open_log_file(path).unwrap(), "second").unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn unwritable_log_path_reports_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("meshbackup.log");

        assert!(open_log_file(path.to_str().unwrap()).is_err());
    }
}
