//! Small helpers shared by the lifecycle flows.

/// Longest object name the array accepts.
const MAX_OBJECT_NAME: usize = 31;

/// Mangle a caller-supplied name into an array-legal object name. The
/// mangling is deterministic so lookup and delete paths re-derive the same
/// array name from the same caller name: lowercase, `-` becomes `_`, any
/// other array-illegal character is dropped, and the result is truncated.
pub fn object_name(name: &str) -> String {
    name.chars()
        .map(|c| c.to_ascii_lowercase())
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '.' => Some(c),
            '-' => Some('_'),
            _ => None,
        })
        .take(MAX_OBJECT_NAME)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::object_name;

    #[test]
    fn mangles_deterministically() {
        assert_eq!(object_name("pvc-123-abc"), "pvc_123_abc");
        assert_eq!(object_name("pvc-123-abc"), object_name("pvc-123-abc"));
    }

    #[test]
    fn folds_mixed_case_to_lowercase() {
        assert_eq!(object_name("PVC-Abc"), "pvc_abc");
        assert_eq!(object_name("PVC-Abc"), object_name("pvc-abc"));
    }

    #[test]
    fn drops_illegal_characters() {
        assert_eq!(object_name("vol/with:odd chars"), "volwithoddchars");
    }

    #[test]
    fn truncates_to_the_array_limit() {
        let long = "v".repeat(64);
        assert_eq!(object_name(&long).len(), 31);
    }

    #[test]
    fn short_names_pass_through() {
        assert_eq!(object_name("v1"), "v1");
    }
}
