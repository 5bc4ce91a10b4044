//! Source identifiers and destination keys
//!
//! Source identifiers are `/`-separated FTP paths. Destination keys are S3 keys built from an
//! output prefix and an entry's base name; prefixes never carry leading or trailing slashes.

/// Joins a listed entry name onto the directory it was listed from.
pub fn join_entry(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Last component of a source identifier.
pub fn base_name(entry: &str) -> &str {
    let trimmed = entry.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Reduces a name returned by a listing to the bare entry name.
///
/// Some servers answer `NLST` with full paths, some with bare names. Returns `None` for the
/// `.` and `..` pseudo entries.
pub fn listed_name(listed: &str) -> Option<&str> {
    let name = base_name(listed.trim_end_matches(['\r', '\n']));
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}

/// Destination key of `entry` under `prefix`: `prefix/base_name` or just `base_name`.
pub fn object_key(prefix: &str, entry: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let name = base_name(entry);
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Output prefix for `subpath`, a directory discovered under `parent_dir`.
///
/// The part of `subpath` below `parent_dir` is appended to the parent's output prefix.
pub fn child_prefix(parent_dir: &str, parent_prefix: &str, subpath: &str) -> String {
    let relative = subpath
        .strip_prefix(parent_dir.trim_end_matches('/'))
        .unwrap_or(subpath)
        .trim_matches('/');
    let parent_prefix = parent_prefix.trim_matches('/');
    match (parent_prefix.is_empty(), relative.is_empty()) {
        (true, _) => relative.to_string(),
        (false, true) => parent_prefix.to_string(),
        (false, false) => format!("{parent_prefix}/{relative}"),
    }
}

/// Best-effort MIME type of an entry, judged by its name.
pub fn content_type(entry: &str) -> Option<String> {
    mime_guess::from_path(base_name(entry))
        .first()
        .map(|mime| mime.essence_str().to_string())
}
