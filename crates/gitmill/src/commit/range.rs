use crate::clone::CloneBatchInfo;

/// Upper bound on records per parse chunk.
pub const MAX_CHUNK_SIZE: usize = 250;
/// Lower bound on records per parse chunk.
pub const MIN_CHUNK_SIZE: usize = 20;

/// Revision arguments selecting the commits that belong to `batch`.
///
/// A full clone walks everything from `HEAD`. A deepened batch walks from the
/// previous boundary down to (excluding) the new one; the final batch stops at
/// the commit processed by the last run when it is present, or at the root.
pub fn commit_range(batch: &CloneBatchInfo) -> Vec<String> {
    if !batch.clone_with_batches {
        return vec!["HEAD".to_string()];
    }

    let start = batch
        .prev_batch_edge_commit
        .clone()
        .unwrap_or_else(|| "HEAD".to_string());
    let mut range = vec![start];

    if batch.is_final_batch {
        if batch.target_reachable {
            if let Some(target) = &batch.target_commit {
                range.push(format!("^{target}"));
            }
        }
    } else if let Some(edge) = &batch.edge_commit {
        range.push(format!("^{edge}"));
    }
    range
}

/// Commit whose records belong to the next batch and must be skipped here.
///
/// Only non-final batches have one. A final batch cut short by a stalled
/// deepen or the iteration cap walks down to its edge and emits it.
pub fn boundary_commit(batch: &CloneBatchInfo) -> Option<String> {
    if batch.is_final_batch || !batch.clone_with_batches {
        return None;
    }
    batch.edge_commit.clone()
}

/// Records per chunk for `total` commits spread over `workers` parsers.
pub fn chunk_size(total: usize, workers: usize) -> usize {
    (total / workers.max(1)).clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn batch() -> CloneBatchInfo {
        CloneBatchInfo {
            repo_path: PathBuf::from("/tmp/repo.git"),
            remote: "file:///tmp/origin".to_string(),
            branch: Some("main".to_string()),
            batch_number: 1,
            is_first_batch: true,
            is_final_batch: false,
            clone_with_batches: true,
            edge_commit: Some("e".repeat(40)),
            prev_batch_edge_commit: None,
            latest_commit_in_repo: Some("h".repeat(40)),
            target_commit: Some("t".repeat(40)),
            target_reachable: false,
        }
    }

    #[test]
    fn full_clone_walks_from_head() {
        let mut b = batch();
        b.clone_with_batches = false;
        b.is_final_batch = true;
        assert_eq!(commit_range(&b), ["HEAD"]);
    }

    #[test]
    fn first_batch_stops_at_edge() {
        assert_eq!(commit_range(&batch()), ["HEAD".to_string(), format!("^{}", "e".repeat(40))]);
    }

    #[test]
    fn later_batch_starts_at_previous_edge() {
        let mut b = batch();
        b.batch_number = 2;
        b.is_first_batch = false;
        b.prev_batch_edge_commit = Some("p".repeat(40));
        assert_eq!(
            commit_range(&b),
            ["p".repeat(40), format!("^{}", "e".repeat(40))]
        );
    }

    #[test]
    fn final_batch_excludes_reachable_target() {
        let mut b = batch();
        b.is_final_batch = true;
        b.target_reachable = true;
        b.prev_batch_edge_commit = Some("p".repeat(40));
        assert_eq!(
            commit_range(&b),
            ["p".repeat(40), format!("^{}", "t".repeat(40))]
        );
    }

    #[test]
    fn final_batch_without_target_walks_to_root() {
        let mut b = batch();
        b.is_final_batch = true;
        b.edge_commit = None;
        assert_eq!(commit_range(&b), ["HEAD"]);
    }

    #[test]
    fn capped_final_batch_walks_down_to_its_edge() {
        let mut b = batch();
        b.is_final_batch = true;
        b.prev_batch_edge_commit = Some("p".repeat(40));
        // deepening stopped before the target became reachable
        assert_eq!(commit_range(&b), ["p".repeat(40)]);
        assert_eq!(boundary_commit(&b), None);
    }

    #[test]
    fn only_intermediate_batches_have_a_boundary() {
        assert_eq!(boundary_commit(&batch()), Some("e".repeat(40)));

        let mut full = batch();
        full.clone_with_batches = false;
        assert_eq!(boundary_commit(&full), None);
    }

    #[test]
    fn chunk_size_is_clamped() {
        assert_eq!(chunk_size(10, 4), MIN_CHUNK_SIZE);
        assert_eq!(chunk_size(400, 4), 100);
        assert_eq!(chunk_size(1_000_000, 4), MAX_CHUNK_SIZE);
        assert_eq!(chunk_size(100, 0), 100);
    }
}
