//! Shell quoting and remote file writes.

use std::borrow::Cow;

/// Quoted heredoc delimiter; the body is written verbatim.
pub const HEREDOC_DELIMITER: &str = "HOSTWARDEN_EOF";

/// Quote `s` as one POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Heredoc bodies always end in a newline; this is the exact byte content
/// that lands on disk for `content`.
pub fn with_trailing_newline(content: &str) -> Cow<'_, str> {
    if content.is_empty() || content.ends_with('\n') {
        Cow::Borrowed(content)
    } else {
        Cow::Owned(format!("{}\n", content))
    }
}

/// Command that writes `content` to `path` with `mode`, atomically.
///
/// The body goes to a temp file next to `path` and is moved into place with
/// `mv -f`, so rerunning overwrites cleanly and readers never see a partial
/// file. Fails if the body contains the delimiter line.
pub fn heredoc_write(path: &str, content: &str, mode: u32) -> Result<String, String> {
    if content.lines().any(|line| line == HEREDOC_DELIMITER) {
        return Err(format!(
            "content contains the reserved line {}",
            HEREDOC_DELIMITER
        ));
    }
    let body = with_trailing_newline(content);
    let target = shell_quote(path);
    let tmp = shell_quote(&format!("{}.tmp.XXXXXX", path));

    Ok(format!(
        "set -e\n\
         tmp=$(mktemp {tmp})\n\
         cat > \"$tmp\" <<'{delim}'\n\
         {body}{delim}\n\
         chmod {mode:o} \"$tmp\"\n\
         mv -f \"$tmp\" {target}",
        tmp = tmp,
        delim = HEREDOC_DELIMITER,
        body = body,
        mode = mode,
        target = target,
    ))
}

/// `sha256sum` of `path`, or empty output if the tool is missing.
pub fn sha256_command(path: &str) -> String {
    format!(
        "if command -v sha256sum >/dev/null 2>&1; then sha256sum {} | cut -d' ' -f1; fi",
        shell_quote(path)
    )
}
