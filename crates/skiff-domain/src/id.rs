use uuid::Uuid;

/// Marker prefixed to content-derived identifiers (commits).
pub const CONTENT_ID_MARKER: char = '~';

/// Reduce an arbitrary identifier to a single safe path component.
///
/// Only the final `/`- or `\`-separated segment survives, leading dots are
/// dropped so `.` and `..` can never be produced, and the result is
/// lower-cased. Applying it twice yields the same value.
pub fn sanitize_id(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    last.trim_start_matches('.').to_lowercase()
}

/// Directory fan-out prefix: the first `len` characters of the id once any
/// leading content marker is removed.
pub fn shard(id: &str, len: usize) -> String {
    id.trim_start_matches(CONTENT_ID_MARKER)
        .chars()
        .take(len)
        .collect()
}

/// Allocate a fresh, roughly time-sortable execution id.
pub fn new_execution_id() -> String {
    Uuid::now_v7().hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories_and_lowercases() {
        assert_eq!(sanitize_id("../../etc/Passwd"), "passwd");
        assert_eq!(sanitize_id("a\\b\\C"), "c");
        assert_eq!(sanitize_id("~ABCDEF"), "~abcdef");
        assert_eq!(sanitize_id(".."), "");
        assert_eq!(sanitize_id("...hidden"), "hidden");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in [
            "../x/../Y",
            "..",
            ".",
            "~Deadbeef",
            "foo/",
            "a..b",
            "C:\\dir\\..\\File",
            "",
        ] {
            let once = sanitize_id(raw);
            assert_eq!(sanitize_id(&once), once, "not idempotent for {raw:?}");
            assert!(!once.contains('/') && !once.contains('\\'));
            assert!(once != "." && once != "..");
        }
    }

    #[test]
    fn shard_skips_marker_and_bounds_length() {
        assert_eq!(shard("~0123456789", 4), "0123");
        assert_eq!(shard("0192f7a0-aaaa", 8), "0192f7a0");
        assert_eq!(shard("ab", 4), "ab");
    }

    #[test]
    fn execution_ids_sort_by_creation() {
        let first = new_execution_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = new_execution_id();
        assert!(first < second);
        assert_eq!(sanitize_id(&first), first);
    }
}
