//! Relaxed DKIM canonicalization (RFC 6376 §3.4.2 and §3.4.4).

use std::collections::HashMap;

const fn is_wsp(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Rewrite bare LF line endings as CRLF.
#[must_use]
pub fn to_crlf(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + bytes.len() / 32);
    let mut prev = 0u8;
    for &b in bytes {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

/// Collapse runs of whitespace to a single space and drop the line breaks
/// of folded lines.
fn collapse(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let mut in_wsp = false;

    for &b in value {
        match b {
            b'\r' | b'\n' => {}
            b if is_wsp(b) => {
                if !in_wsp {
                    out.push(b' ');
                    in_wsp = true;
                }
            }
            b => {
                out.push(b);
                in_wsp = false;
            }
        }
    }
    out
}

fn trim_wsp(mut value: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = value
        && is_wsp(*first)
    {
        value = rest;
    }
    while let [rest @ .., last] = value
        && is_wsp(*last)
    {
        value = rest;
    }
    value
}

/// Canonicalize one raw header field (`Name: value`, possibly folded, with
/// or without its line ending). The result ends with CRLF.
#[must_use]
pub fn relaxed_header(field: &[u8]) -> Vec<u8> {
    let (name, value) = field
        .iter()
        .position(|&b| b == b':')
        .map_or((field, &[][..]), |colon| (&field[..colon], &field[colon + 1..]));

    let mut out = trim_wsp(name).to_ascii_lowercase();
    out.push(b':');
    out.extend_from_slice(trim_wsp(&collapse(value)));
    out.extend_from_slice(b"\r\n");
    out
}

/// Canonicalize a message body. Expects CRLF line endings.
#[must_use]
pub fn relaxed_body(body: &[u8]) -> Vec<u8> {
    let mut lines: Vec<Vec<u8>> = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        let (line, next) = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .map_or((rest, &[][..]), |i| (&rest[..i], &rest[i + 2..]));

        let mut collapsed = collapse(line);
        while collapsed.last() == Some(&b' ') {
            collapsed.pop();
        }
        lines.push(collapsed);
        rest = next;
    }

    while lines.last().is_some_and(Vec::is_empty) {
        lines.pop();
    }

    let mut out = Vec::with_capacity(body.len());
    for line in &lines {
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Pick the header instances named by `signed` from `fields`, bottom-up for
/// names that repeat, and canonicalize them in `signed` order.
#[must_use]
pub fn select_headers(signed: &[String], fields: &[(String, &[u8])]) -> Vec<u8> {
    let mut consumed: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::new();

    for name in signed {
        let count = consumed.entry(name.to_ascii_lowercase()).or_insert(0);
        let instance = fields
            .iter()
            .rev()
            .filter(|(field, _)| field.eq_ignore_ascii_case(name))
            .nth(*count);

        if let Some((_, raw)) = instance {
            out.extend_from_slice(&relaxed_header(raw));
            *count += 1;
        }
    }

    out
}
