//! git-compatible object framing: `<type> <size>\0<content>`.

pub mod cas;

use std::fmt;

use crate::error::{Error, Result};

/// the four object kinds this store frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    fn as_str(self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
            ObjectType::Tag => "tag",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            other => Err(Error::InvalidType(other.to_string())),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// build the framed representation `<type> <size>\0<content>` ready for
/// compression and storage.
pub fn frame(object_type: ObjectType, content: &[u8]) -> Vec<u8> {
    let header = format!("{} {}\0", object_type, content.len());
    let mut framed = Vec::with_capacity(header.len() + content.len());
    framed.extend_from_slice(header.as_bytes());
    framed.extend_from_slice(content);
    framed
}

/// a parsed object: the type plus a zero-copy view of the content inside the
/// framed buffer it was parsed from.
pub struct Parsed<'a> {
    pub object_type: ObjectType,
    pub content: &'a [u8],
}

/// parse a framed buffer, validating header shape, type, and declared size.
pub fn parse(framed: &[u8]) -> Result<Parsed<'_>> {
    if framed.is_empty() {
        return Err(Error::EmptyData);
    }

    let space_idx = framed
        .iter()
        .position(|&b| b == b' ')
        .ok_or(Error::MissingSpace)?;

    let null_idx = framed[space_idx..]
        .iter()
        .position(|&b| b == 0)
        .map(|i| i + space_idx)
        .ok_or(Error::MissingNullByte)?;

    let type_str = std::str::from_utf8(&framed[..space_idx])
        .map_err(|_| Error::InvalidType(String::from_utf8_lossy(&framed[..space_idx]).to_string()))?;
    let object_type = ObjectType::parse(type_str)?;

    let size_str = std::str::from_utf8(&framed[space_idx + 1..null_idx])
        .map_err(|_| Error::InvalidSize("non-utf8 size field".to_string()))?;
    let declared_size: i64 = size_str
        .parse()
        .map_err(|_| Error::InvalidSize(size_str.to_string()))?;
    if declared_size < 0 {
        return Err(Error::InvalidSize(size_str.to_string()));
    }

    let content = &framed[null_idx + 1..];
    if content.len() as i64 != declared_size {
        return Err(Error::SizeMismatch {
            declared: declared_size as usize,
            actual: content.len(),
        });
    }

    Ok(Parsed {
        object_type,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_and_parse_roundtrip() {
        let framed = frame(ObjectType::Blob, b"hello");
        assert_eq!(framed, b"blob 5\0hello");
        let parsed = parse(&framed).unwrap();
        assert_eq!(parsed.object_type, ObjectType::Blob);
        assert_eq!(parsed.content, b"hello");
    }

    #[test]
    fn test_frame_empty_content() {
        let framed = frame(ObjectType::Blob, b"");
        assert_eq!(framed, b"blob 0\0");
        let parsed = parse(&framed).unwrap();
        assert_eq!(parsed.content, b"");
    }

    #[test]
    fn test_parse_rejects_empty_input() {
        assert!(matches!(parse(b""), Err(Error::EmptyData)));
    }

    #[test]
    fn test_parse_rejects_missing_space() {
        assert!(matches!(parse(b"blob5\0hello"), Err(Error::MissingSpace)));
    }

    #[test]
    fn test_parse_rejects_missing_null() {
        assert!(matches!(parse(b"blob 5 hello"), Err(Error::MissingNullByte)));
    }

    #[test]
    fn test_parse_rejects_invalid_type() {
        let framed = b"widget 5\0hello";
        assert!(matches!(parse(framed), Err(Error::InvalidType(_))));
    }

    #[test]
    fn test_parse_rejects_negative_size() {
        let framed = b"blob -1\0hello";
        assert!(matches!(parse(framed), Err(Error::InvalidSize(_))));
    }

    #[test]
    fn test_parse_rejects_non_integer_size() {
        let framed = b"blob five\0hello";
        assert!(matches!(parse(framed), Err(Error::InvalidSize(_))));
    }

    #[test]
    fn test_parse_rejects_size_mismatch() {
        let framed = b"blob 10\0hello";
        assert!(matches!(
            parse(framed),
            Err(Error::SizeMismatch {
                declared: 10,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_all_types_roundtrip() {
        for (ty, name) in [
            (ObjectType::Blob, "blob"),
            (ObjectType::Tree, "tree"),
            (ObjectType::Commit, "commit"),
            (ObjectType::Tag, "tag"),
        ] {
            let framed = frame(ty, b"x");
            assert!(framed.starts_with(name.as_bytes()));
            assert_eq!(parse(&framed).unwrap().object_type, ty);
        }
    }
}
