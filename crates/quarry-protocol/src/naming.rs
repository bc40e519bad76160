/// Whether a field holds a byte quantity, which drives aggregate column
/// naming so renderers can apply byte formatting.
///
/// The rule is case-insensitive: the suffix `size`, the word `bytes`
/// (alone or leading a camelCase name, so `bytesRead` counts while
/// `byteCount` does not), or the substrings `shallow`, `retained`,
/// `memory` anywhere in the name.
pub fn is_memory_field(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();

    lower.ends_with("size")
        || lower.contains("bytes")
        || lower.contains("shallow")
        || lower.contains("retained")
        || lower.contains("memory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_suffix_and_known_substrings_qualify() {
        assert!(is_memory_field("shallowSize"));
        assert!(is_memory_field("retained"));
        assert!(is_memory_field("InstanceSize"));
        assert!(is_memory_field("memoryUsed"));
    }

    #[test]
    fn bytes_needs_the_full_word() {
        assert!(is_memory_field("bytes"));
        assert!(is_memory_field("bytesRead"));
        assert!(!is_memory_field("byteCount"));
    }

    #[test]
    fn unrelated_names_do_not_qualify() {
        assert!(!is_memory_field("instanceCount"));
        assert!(!is_memory_field("className"));
        assert!(!is_memory_field("sizeable_things")); // suffix only
    }
}
