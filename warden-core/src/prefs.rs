//! Lookups in the project preference blob handed over by the host.
//!
//! The blob is loose XML-ish text (`<max_vm_cpu_pct>50</max_vm_cpu_pct>`,
//! `<vm_headless_mode/>`); only single tags are ever needed so no XML
//! parser is involved.

/// Reads `<tag>number</tag>` as a float.
#[must_use]
pub fn parse_double(prefs: &str, tag: &str) -> Option<f64> {
    tag_text(prefs, tag)?.trim().parse().ok()
}

/// Reads a boolean tag. `<tag/>` counts as true; `<tag>` content accepts
/// `1`/`0` and `true`/`false`.
#[must_use]
pub fn parse_bool(prefs: &str, tag: &str) -> Option<bool> {
    if prefs.contains(&format!("<{tag}/>")) {
        return Some(true);
    }
    match tag_text(prefs, tag)?.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn tag_text<'a>(prefs: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let start = prefs.find(&open)? + open.len();
    let rest = &prefs[start..];
    let end = rest.find('<').unwrap_or(rest.len());
    Some(&rest[..end])
}
