/// Longest escaped name used verbatim as a file stem
const MAX_STEM_LEN: usize = 160;

fn is_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-')
}

/// Filesystem-safe file stem for a unit name.
///
/// Unsafe bytes become `%XX`. A leading dot is escaped too so no entry can
/// be hidden or collide with `.`/`..`. Overlong stems are truncated and
/// suffixed with a digest of the full name.
pub fn escape_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        if is_safe(byte) && !(i == 0 && byte == b'.') {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{:02X}", byte));
        }
    }

    if escaped.len() <= MAX_STEM_LEN {
        return escaped;
    }
    let digest = blake3::hash(name.as_bytes()).to_hex();
    format!("{}~{}", &escaped[..MAX_STEM_LEN - 33], &digest.as_str()[..32])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names_unchanged() {
        assert_eq!(escape_name("app.models.User"), "app.models.User");
    }

    #[test]
    fn test_nested_separator_escaped() {
        assert_eq!(escape_name("app.User$Address"), "app.User%24Address");
    }

    #[test]
    fn test_path_characters_escaped() {
        assert_eq!(escape_name("../x"), "%2E.%2Fx");
        assert!(!escape_name("a/b\\c").contains('/'));
    }

    #[test]
    fn test_long_names_are_bounded_and_distinct() {
        let a = "a".repeat(400);
        let b = format!("{}b", "a".repeat(399));
        assert!(escape_name(&a).len() <= MAX_STEM_LEN);
        assert_ne!(escape_name(&a), escape_name(&b));
    }
}
