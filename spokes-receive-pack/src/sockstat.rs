//! Typed access to the sockstat request metadata.
//!
//! The proxy in front of us passes request metadata through environment
//! variables named `GIT_SOCKSTAT_VAR_<name>`. Values follow a tagged scalar
//! convention: `uint:<decimal>` for unsigned 32-bit integers, `bool:true` /
//! `bool:false` for booleans, anything else is a plain string.

/// The prefix all sockstat environment variable names carry.
pub const PREFIX: &str = "GIT_SOCKSTAT_VAR_";

/// Look up the sockstat var `name` as a string. Absent vars decode to the
/// empty string.
pub fn get_string(name: &str) -> String {
    string_value(&raw(name)).to_owned()
}

/// Look up the sockstat var `name` as a `u32`. Absent, untagged, or
/// out-of-range values decode to 0.
pub fn get_uint32(name: &str) -> u32 {
    uint32_value(&raw(name))
}

/// Look up the sockstat var `name` as a boolean. Anything but `bool:true`
/// decodes to false.
pub fn get_bool(name: &str) -> bool {
    bool_value(&raw(name))
}

fn raw(name: &str) -> String {
    std::env::var(format!("{PREFIX}{name}")).unwrap_or_default()
}

/// The string form of a sockstat value: a `uint:` or `bool:` tag is
/// stripped so the result looks like the parsed value stringified again;
/// anything else passes through verbatim.
pub fn string_value(s: &str) -> &str {
    match s.split_once(':') {
        Some(("uint" | "bool", rest)) => rest,
        _ => s,
    }
}

/// Parse a `uint:<decimal>` value. A missing tag or anything that does not
/// fit an unsigned 32-bit integer yields 0.
pub fn uint32_value(s: &str) -> u32 {
    s.strip_prefix("uint:")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Parse a `bool:` value; only `bool:true` is true.
pub fn bool_value(s: &str) -> bool {
    s == "bool:true"
}
