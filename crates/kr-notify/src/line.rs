//! Line framing for the notifier fifo (spec.md §4.9): `[prefix] body\n` or
//! a bare `body\n` when no prefix applies.

/// Tell the shim to tear down its proxy connection and exit.
pub const STOP: &str = "STOP";
/// The phone declined a signature request bound to this session.
pub const REJECTED: &str = "REJECTED";
/// The phone's view of the host key disagreed with the shim's.
pub const HOST_KEY_MISMATCH: &str = "HOST_KEY_MISMATCH";

pub(crate) fn format_line(prefix: Option<&str>, body: &str) -> String {
    match prefix {
        Some(p) => format!("[{p}] {body}"),
        None => body.to_string(),
    }
}

/// Split a raw fifo line into its optional `[prefix]` and the remaining body.
pub(crate) fn parse_line(line: &str) -> (Option<&str>, &str) {
    if let Some(rest) = line.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let prefix = &rest[..end];
            let body = rest[end + 1..].trim_start();
            return (Some(prefix), body);
        }
    }
    (None, line)
}
