//! Rendering of exchanges as curl commands.
//!
//! Output is one line of the form
//!
//! ```text
//! curl -X POST 'https://api.example.com/items' -H 'content-type: application/json' --data-raw '{"a":1}'
//! ```
//!
//! Every URL, header and body is emitted through [`quote`], so the line can be pasted into
//! a POSIX shell (bash, zsh) and reproduces the captured values exactly. The one value a
//! shell argument cannot carry is a NUL byte; a body containing one is rendered as the
//! placeholder.

use crate::{truncate::TruncationPolicy, types::Exchange};

/// Render the request side of `exchange` as a curl command.
///
/// The request body is passed through `policy` first; a body that is absent, empty, or
/// omitted by the policy produces no `--data-raw` flag. A body that was only partly read,
/// or whose text holds a NUL, is replaced by the policy's placeholder. Output depends only on the inputs,
/// and headers appear in capture order.
pub fn render(exchange: &Exchange, policy: &TruncationPolicy) -> String {
    let mut command = String::from("curl -X ");
    command.push_str(&quote_method(&exchange.method));
    command.push(' ');
    command.push_str(&quote(&exchange.url));

    for (name, value) in exchange.headers.iter() {
        command.push_str(" -H ");
        command.push_str(&quote(&format!("{name}: {value}")));
    }

    let body = if exchange.request_body_incomplete {
        policy.request_placeholder()
    } else {
        match exchange
            .request_body
            .as_deref()
            .and_then(|bytes| policy.request_body(bytes))
        {
            Some(text) if text.contains('\0') => policy.request_placeholder(),
            body => body,
        }
    };
    if let Some(body) = body {
        command.push_str(" --data-raw ");
        command.push_str(&quote(&body));
    }

    command
}

/// Quote `value` as a single shell word.
///
/// Values free of ASCII control characters become POSIX single-quoted strings, with each
/// embedded `'` written as `'\''`. Values containing control characters (newlines, tabs,
/// ...) use ANSI-C `$'...'` quoting so the command stays on one line. A NUL is written as
/// `\x00`, but shells end the word there, so such values do not survive the round trip.
pub fn quote(value: &str) -> String {
    if value.chars().any(|c| c.is_ascii_control()) {
        ansi_c_quote(value)
    } else {
        single_quote(value)
    }
}

fn single_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push_str(r"'\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

fn ansi_c_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 3);
    out.push_str("$'");
    for c in value.chars() {
        match c {
            '\n' => out.push_str(r"\n"),
            '\r' => out.push_str(r"\r"),
            '\t' => out.push_str(r"\t"),
            '\\' => out.push_str(r"\\"),
            '\'' => out.push_str(r"\'"),
            c if c.is_ascii_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Methods are almost always plain tokens; only quote the odd one that isn't.
fn quote_method(method: &str) -> String {
    let is_token = !method.is_empty()
        && method
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if is_token {
        method.to_owned()
    } else {
        quote(method)
    }
}
