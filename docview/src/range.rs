/// Decide whether a change to document `id` could fall inside the key
/// bounds of a listing.
///
/// The change feed only supplies the document id, so the id is compared
/// against the bounds. For primary-index listings the id is the ordering
/// key and the test is exact. With `descending` both comparisons flip:
/// `start_key` is the upper bound and `end_key` the lower one.
pub fn could_affect(
    id: &str,
    start_key: Option<&str>,
    end_key: Option<&str>,
    inclusive_end: bool,
    descending: bool,
) -> bool {
    if let Some(start) = start_key {
        let before_start = if descending { id > start } else { id < start };
        if before_start {
            return false;
        }
    }

    let Some(end) = end_key else {
        return true;
    };

    match (inclusive_end, descending) {
        (true, false) => id <= end,
        (true, true) => id >= end,
        (false, false) => id < end,
        (false, true) => id > end,
    }
}
