//! path normalization, traversal guards, and small identifier helpers.

use crate::error::{Error, Result};

/// blob id prefix: `blob-` followed by 64 lowercase hex characters.
pub const BLOB_ID_PREFIX: &str = "blob-";

/// build a blob id from a 32-byte content hash.
pub fn blob_id_from_digest(digest: &[u8]) -> String {
    format!("{BLOB_ID_PREFIX}{}", hex::encode(digest))
}

/// is this string shaped like a valid blob id.
pub fn is_valid_blob_id(id: &str) -> bool {
    match id.strip_prefix(BLOB_ID_PREFIX) {
        Some(hex_part) => hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// normalize a POSIX path: single source of truth for the whole crate.
///
/// - ensures a leading `/`
/// - collapses duplicate slashes
/// - drops `.` segments
/// - pops the previous segment on `..` (popping past root stays at root)
/// - strips a trailing slash unless the path is root
///
/// fails on empty input or a null byte, per spec.
pub fn normalize_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(Error::Invalid("empty path".to_string()));
    }
    if path.contains('\0') {
        return Err(Error::Invalid(format!("path contains null byte: {path}")));
    }

    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }

    if stack.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", stack.join("/")))
    }
}

/// split a normalized path into (parent, name). root's parent is root itself.
pub fn split_path(path: &str) -> (String, String) {
    if path == "/" {
        return ("/".to_string(), String::new());
    }
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

/// decode the handful of escapes a hostile path might use to hide traversal:
/// backslashes as separators and percent-encoded `.`/`/`.
fn decode_hostile(path: &str) -> String {
    let percent_decoded = percent_decode(path);
    percent_decoded.replace('\\', "/")
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(decoded) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(decoded);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// does `path`, once decoded and normalized relative to `root`, escape `root`.
///
/// this is a pure helper for a jailing collaborator — it does not itself
/// enforce a jail, only answers the question.
pub fn is_path_traversal(path: &str, root: &str) -> bool {
    let decoded = decode_hostile(path);
    // a null byte anywhere (even mid-string, e.g. "../../etc/passwd\0.jpg") is itself
    // evidence of an attempt to smuggle a trusted-looking suffix past a naive check.
    if decoded.contains('\0') {
        return true;
    }

    let root_norm = match normalize_path(root) {
        Ok(r) => r,
        Err(_) => return true,
    };

    let combined = if decoded.starts_with('/') {
        decoded
    } else {
        format!("{}/{}", root_norm.trim_end_matches('/'), decoded)
    };

    let resolved = match normalize_path(&combined) {
        Ok(r) => r,
        Err(_) => return true,
    };

    !(resolved == root_norm || resolved.starts_with(&format!("{}/", root_norm.trim_end_matches('/'))))
        && !(root_norm == "/" )
}

/// does a symlink whose target is `target`, created at `symlink_path`, let a logical
/// resolution escape `root`.
pub fn is_symlink_escape(target: &str, symlink_path: &str, root: &str) -> bool {
    let resolved_target = if target.starts_with('/') {
        target.to_string()
    } else {
        let (parent, _) = split_path(symlink_path);
        format!("{}/{}", parent.trim_end_matches('/'), target)
    };
    is_path_traversal(&resolved_target, root)
}

/// replaces separators with `_`, strips non-alphanumerics, prefixes `sp_` if the
/// result would start with a digit, and caps length at 128.
pub fn sanitize_sql_identifier(name: &str) -> Result<String> {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '/' || c == '.' || c == '-' || c.is_whitespace() {
            out.push('_');
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        }
        // anything else is stripped
    }

    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        out = format!("sp_{out}");
    }

    out.truncate(128);

    if out.is_empty() {
        return Err(Error::EmptyIdentifier);
    }
    Ok(out)
}

/// generate a deterministic savepoint name from a monotonic counter.
pub fn generate_savepoint_name(counter: u64) -> String {
    format!("sp_{counter}")
}
