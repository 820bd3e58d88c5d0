//! Size-based retention planning.

/// A file considered by retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionCandidate {
    pub key: i64,
    pub size_bytes: u64,
    /// Last read access (ms), if the file has been read since it was loaded.
    pub last_read: Option<i64>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    /// Keys to delete, oldest first.
    pub delete: Vec<i64>,
    /// Keys that would have been deleted but were read within the protection window.
    pub deferred: Vec<i64>,
}

/// Decide which files to delete so the total drops below `total_limit`.
///
/// `files` is ordered oldest first and its last entry, the writable file, is never
/// deleted. A file read within `protect_window_ms` of `now_ms` is skipped and the
/// walk continues with the next newer file.
pub fn plan_retention(
    files: &[RetentionCandidate],
    total_limit: u64,
    now_ms: i64,
    protect_window_ms: Option<i64>,
) -> RetentionPlan {
    let mut plan = RetentionPlan::default();
    let mut total: u64 = files.iter().map(|f| f.size_bytes).sum();

    let Some((_tail, older)) = files.split_last() else {
        return plan;
    };

    for file in older {
        if total < total_limit {
            break;
        }
        let recently_read = match (protect_window_ms, file.last_read) {
            (Some(window), Some(read_at)) => now_ms.saturating_sub(read_at) <= window,
            _ => false,
        };
        if recently_read {
            plan.deferred.push(file.key);
            continue;
        }
        total = total.saturating_sub(file.size_bytes);
        plan.delete.push(file.key);
    }

    plan
}
