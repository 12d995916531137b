//! Cache key normalization.
//!
//! Builds deterministic, case-folded composite keys from ordered segments:
//! `cache_key(&["email", "job", "42"])` → `"email:job:42"`.

/// Separator between key segments.
pub const SEPARATOR: char = ':';

/// Join ordered segments with [`SEPARATOR`] and lowercase the result.
/// Zero segments produce the empty string.
///
/// Segments are not escaped: a segment containing the separator can collide
/// with a differently-segmented key (`["a:b", "c"]` vs `["a", "b:c"]`).
/// Callers own their segment alphabet and must keep the separator out of it.
pub fn cache_key(segments: &[&str]) -> String {
    if segments.is_empty() {
        return String::new();
    }
    segments.join(&SEPARATOR.to_string()).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_segments_produce_empty_key() {
        assert_eq!(cache_key(&[]), "");
    }

    #[test]
    fn key_is_case_folded() {
        let key = cache_key(&["Email", "User", "ID-42"]);
        assert_eq!(key, "email:user:id-42");
        assert_eq!(key, key.to_lowercase());
    }

    #[test]
    fn key_is_order_sensitive() {
        assert_ne!(cache_key(&["a", "b"]), cache_key(&["b", "a"]));
    }

    #[test]
    fn key_is_deterministic() {
        assert_eq!(cache_key(&["a", "b", "c"]), cache_key(&["a", "b", "c"]));
    }

    #[test]
    fn separator_inside_segments_is_not_escaped() {
        // Documented limitation: these two segmentations collide.
        assert_eq!(cache_key(&["a:b", "c"]), cache_key(&["a", "b:c"]));
    }
}
