//! Integration tests for cloning and mining real git repositories.
//!
//! These tests require the `sqlite` and `migrate` features, and a `git`
//! binary on the PATH. Repositories are cloned over `file://`.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use gitmill::clone::{
    BatchHandler, CloneBatchInfo, CloneOptions, CloneService, CloneStrategy, CloneSummary,
};
use gitmill::commit::{
    AUTHORED_COMMIT, BatchSummary, COMMITTED_COMMIT, CommitOptions, CommitService, DeliveryMode,
};
use gitmill::queue::memory::MemoryBroker;
use gitmill::queue::{INLINE_MESSAGE_TYPE, QueueOptions, QueueService, RESULT_MESSAGE_TYPE};
use gitmill::{IntegrationResult, RepositoryModel, RepositoryState};
use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use uuid::Uuid;

use common::{
    ADA, GRACE, GitFixture, TestDb, clone_options, forked_repository, insert, pending_repository,
    setup_test_db,
};

struct Harness {
    test: TestDb,
    work: TempDir,
    broker: MemoryBroker,
    clone: CloneService,
    commits: CommitService,
}

/// Collects every batch of a clone together with what mining it produced.
struct Mine<'a> {
    commits: &'a CommitService,
    repo: &'a RepositoryModel,
    batches: Vec<(CloneBatchInfo, BatchSummary)>,
}

impl BatchHandler for Mine<'_> {
    type Error = gitmill::Error;

    fn handle_batch(&mut self, batch: CloneBatchInfo) -> BoxFuture<'_, Result<(), Self::Error>> {
        Box::pin(async move {
            let mined = self.commits.process_batch(self.repo, &batch).await?;
            self.batches.push((batch, mined));
            Ok(())
        })
    }
}

/// Accepts every batch without looking at it.
struct Ignore;

impl BatchHandler for Ignore {
    type Error = gitmill::Error;

    fn handle_batch(&mut self, _batch: CloneBatchInfo) -> BoxFuture<'_, Result<(), Self::Error>> {
        Box::pin(async { Ok(()) })
    }
}

async fn harness(delivery: DeliveryMode) -> Harness {
    harness_with(delivery, |_| {}).await
}

async fn harness_with(delivery: DeliveryMode, configure: impl FnOnce(&mut CloneOptions)) -> Harness {
    let test = setup_test_db().await;
    let work = tempfile::tempdir().expect("work dir");
    let broker = MemoryBroker::new();
    let queue = Arc::new(QueueService::new(
        Arc::new(broker.clone()),
        QueueOptions::default(),
    ));
    let mut options = clone_options(work.path());
    configure(&mut options);
    let clone = CloneService::new(Arc::clone(&test.db), options);
    let commits = CommitService::new(
        Arc::clone(&test.db),
        queue,
        CommitOptions {
            tenant_id: Uuid::new_v4(),
            delivery,
            parse_workers: 2,
            ..CommitOptions::default()
        },
    );
    Harness {
        test,
        work,
        broker,
        clone,
        commits,
    }
}

impl Harness {
    fn db(&self) -> &DatabaseConnection {
        &self.test.db
    }

    /// Clone `repo` and mine every batch, the way a worker does.
    async fn mine(
        &self,
        repo: &RepositoryModel,
    ) -> (CloneSummary, Vec<(CloneBatchInfo, BatchSummary)>) {
        let mut mine = Mine {
            commits: &self.commits,
            repo,
            batches: Vec::new(),
        };
        let summary = self
            .clone
            .for_each_batch(repo, &mut mine)
            .await
            .expect("mining succeeds");
        (summary, mine.batches)
    }

    fn payloads(&self) -> Vec<Value> {
        self.broker
            .published()
            .iter()
            .map(|message| serde_json::from_str(&message.payload).expect("payload is JSON"))
            .collect()
    }

    /// `(type, sourceId)` of every inline activity published so far.
    fn inline_activities(&self) -> BTreeSet<(String, String)> {
        self.payloads()
            .iter()
            .map(|payload| {
                assert_eq!(payload["type"], INLINE_MESSAGE_TYPE);
                let activity = &payload["activityData"];
                (
                    activity["type"].as_str().expect("type").to_string(),
                    activity["sourceId"].as_str().expect("sourceId").to_string(),
                )
            })
            .collect()
    }

    /// `(type, sourceId, commit)` of every inline activity published so far.
    fn inline_activity_commits(&self) -> BTreeSet<(String, String, String)> {
        self.payloads()
            .iter()
            .map(|payload| {
                let activity = &payload["activityData"];
                let source_id = activity["sourceId"].as_str().expect("sourceId").to_string();
                let commit = match activity["sourceParentId"].as_str() {
                    Some(parent) if !parent.is_empty() => parent.to_string(),
                    _ => source_id.clone(),
                };
                let kind = activity["type"].as_str().expect("type").to_string();
                (kind, source_id, commit)
            })
            .collect()
    }

    fn work_dir_is_empty(&self) -> bool {
        std::fs::read_dir(self.work.path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }
}

/// More history than one deepen step covers; every third commit was
/// applied by Grace on Ada's behalf.
fn long_history(commits: usize) -> (GitFixture, Vec<String>) {
    let mut repo = GitFixture::new();
    let hashes = (0..commits)
        .map(|i| {
            let committer = if i % 3 == 0 { GRACE } else { ADA };
            repo.commit(&format!("Change {i}"), ADA, committer, 1)
        })
        .collect();
    (repo, hashes)
}

fn fixture_history() -> (GitFixture, Vec<String>) {
    let mut repo = GitFixture::new();
    let hashes = vec![
        repo.commit("Initial import", ADA, ADA, 10),
        repo.commit(
            "Add parser\n\nSigned-off-by: Ada Lovelace <ada@example.com>\nReviewed-by: Grace Hopper <grace@example.com>",
            ADA,
            ADA,
            5,
        ),
        repo.commit("Apply patch from Ada", ADA, GRACE, 3),
        repo.commit(
            "Fix tests\n\nCo-authored-by: Grace Hopper <grace@example.com>",
            GRACE,
            GRACE,
            2,
        ),
    ];
    (repo, hashes)
}

#[tokio::test]
async fn test_full_clone_mines_every_commit() {
    let (fixture, hashes) = fixture_history();
    let h = harness(DeliveryMode::Inline).await;
    let repo = insert(h.db(), pending_repository(&fixture.url())).await;

    let (summary, batches) = h.mine(&repo).await;

    assert_eq!(summary.strategy, CloneStrategy::Full);
    assert_eq!(batches.len(), 1);
    let (batch, mined) = &batches[0];
    assert!(batch.is_first_batch && batch.is_final_batch);
    assert!(!batch.clone_with_batches);
    assert_eq!(batch.branch.as_deref(), Some("main"));
    assert_eq!(batch.latest_commit_in_repo.as_deref(), Some(hashes[3].as_str()));

    assert_eq!(mined.total_commits, 4);
    assert_eq!(mined.processed_commits, 4);
    assert_eq!(mined.bad_records, 0);
    // 4 authored, 1 committed, signed-off, reviewed, co-authored
    assert_eq!(mined.activities, 8);
    assert_eq!(mined.messages_sent, 8);

    let activities = h.inline_activities();
    for hash in &hashes {
        assert!(activities.contains(&(AUTHORED_COMMIT.to_string(), hash.clone())));
    }
    let types: BTreeSet<&str> = activities.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(
        types,
        BTreeSet::from([
            AUTHORED_COMMIT,
            COMMITTED_COMMIT,
            "co-authored-commit",
            "reviewed-commit",
            "signed-off-commit",
        ])
    );
    assert!(h.work_dir_is_empty(), "working copy must be removed");
}

#[tokio::test]
async fn test_inline_activity_carries_member_and_stats() {
    let mut fixture = GitFixture::new();
    let hash = fixture.commit("Patch\n\nTested-by: \"Grace Hopper\" <grace@example.com>", ADA, GRACE, 7);
    let h = harness(DeliveryMode::Inline).await;
    let repo = insert(h.db(), pending_repository(&fixture.url())).await;

    h.mine(&repo).await;

    let payloads = h.payloads();
    let authored = payloads
        .iter()
        .map(|p| &p["activityData"])
        .find(|a| a["type"] == AUTHORED_COMMIT)
        .expect("authored activity");
    assert_eq!(authored["sourceId"], hash.as_str());
    assert_eq!(authored["sourceParentId"], "");
    assert_eq!(authored["platform"], "git");
    assert_eq!(authored["channel"], fixture.url().as_str());
    assert_eq!(authored["member"]["displayName"], "Ada Lovelace");
    assert_eq!(authored["attributes"]["insertions"], 7);
    assert_eq!(authored["attributes"]["deletions"], 0);
    assert_eq!(authored["attributes"]["lines"], 7);
    assert_eq!(authored["attributes"]["isMerge"], false);
    assert_eq!(authored["attributes"]["timezone"], "UTC+02:00");

    let committed = payloads
        .iter()
        .map(|p| &p["activityData"])
        .find(|a| a["type"] == COMMITTED_COMMIT)
        .expect("committed activity");
    assert_eq!(committed["sourceParentId"], hash.as_str());
    assert_eq!(committed["member"]["displayName"], "Grace Hopper");

    let tested = payloads
        .iter()
        .map(|p| &p["activityData"])
        .find(|a| a["type"] == "tested-commit")
        .expect("tested activity");
    assert_eq!(tested["member"]["identities"][1]["value"], "grace@example.com");
}

#[tokio::test]
async fn test_incremental_run_only_mines_new_commits() {
    let (fixture, hashes) = fixture_history();

    let full = harness(DeliveryMode::Inline).await;
    let repo = insert(full.db(), pending_repository(&fixture.url())).await;
    full.mine(&repo).await;
    let all = full.inline_activities();

    let incremental = harness(DeliveryMode::Inline).await;
    let mut model = pending_repository(&fixture.url());
    model.state = Set(RepositoryState::Completed);
    model.branch = Set(Some("main".to_string()));
    model.last_processed_commit = Set(Some(hashes[1].clone()));
    let repo = insert(incremental.db(), model).await;

    let (summary, batches) = incremental.mine(&repo).await;

    assert!(summary.strategy.is_incremental());
    let (batch, mined) = batches.last().expect("at least one batch");
    assert!(batch.is_final_batch);
    assert!(batch.clone_with_batches);
    assert!(batch.target_reachable);
    assert_eq!(batch.target_commit.as_deref(), Some(hashes[1].as_str()));
    assert_eq!(mined.processed_commits, 2);

    let new = incremental.inline_activities();
    assert!(new.is_subset(&all), "incremental ids must match a full run");
    let authored: BTreeSet<&str> = new
        .iter()
        .filter(|(t, _)| t == AUTHORED_COMMIT)
        .map(|(_, id)| id.as_str())
        .collect();
    assert_eq!(authored, BTreeSet::from([hashes[2].as_str(), hashes[3].as_str()]));
}

#[tokio::test]
async fn test_branch_change_forces_full_clone() {
    let (fixture, hashes) = fixture_history();
    let h = harness(DeliveryMode::Inline).await;
    let mut model = pending_repository(&fixture.url());
    model.branch = Set(Some("master".to_string()));
    model.last_processed_commit = Set(Some(hashes[1].clone()));
    let repo = insert(h.db(), model).await;

    let (summary, batches) = h.mine(&repo).await;

    assert_eq!(summary.strategy, CloneStrategy::Full);
    assert_eq!(batches[0].1.processed_commits, 4);
}

#[tokio::test]
async fn test_result_refs_are_persisted_once() {
    let (fixture, _) = fixture_history();
    let h = harness(DeliveryMode::ResultRef).await;
    let repo = insert(h.db(), pending_repository(&fixture.url())).await;

    let (_, batches) = h.mine(&repo).await;
    let mined = batches[0].1;
    assert_eq!(mined.results_inserted, 8);
    assert_eq!(IntegrationResult::find().count(h.db()).await.unwrap(), 8);

    let payloads = h.payloads();
    assert_eq!(payloads.len(), 8);
    let stored: BTreeSet<String> = IntegrationResult::find()
        .all(h.db())
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.id.to_string())
        .collect();
    for payload in &payloads {
        assert_eq!(payload["type"], RESULT_MESSAGE_TYPE);
        assert_eq!(payload["segmentId"], repo.segment_id.to_string());
        assert!(stored.contains(payload["resultId"].as_str().expect("resultId")));
    }

    // mining the same history again publishes again but stores nothing new
    let (_, again) = h.mine(&repo).await;
    assert_eq!(again[0].1.results_inserted, 0);
    assert_eq!(IntegrationResult::find().count(h.db()).await.unwrap(), 8);
    assert_eq!(h.broker.published().len(), 16);

    let keys: BTreeSet<String> = h.broker.published().into_iter().map(|m| m.key).collect();
    assert_eq!(keys.len(), 8, "redeliveries reuse their keys");
}

#[tokio::test]
async fn test_unreachable_remote_fails_and_cleans_up() {
    let h = harness(DeliveryMode::Inline).await;
    let missing = tempfile::tempdir().expect("temp dir");
    let url = format!("file://{}/nope", missing.path().display());
    let repo = insert(h.db(), pending_repository(&url)).await;

    let result = h.clone.for_each_batch(&repo, &mut Ignore).await;

    assert!(result.is_err());
    assert!(h.work_dir_is_empty());
    assert!(h.broker.published().is_empty());
}

#[tokio::test]
async fn test_incremental_run_over_several_batches_matches_full_run() {
    let (fixture, hashes) = long_history(230);

    let full = harness(DeliveryMode::Inline).await;
    let repo = insert(full.db(), pending_repository(&fixture.url())).await;
    full.mine(&repo).await;
    let new_commits: BTreeSet<&str> = hashes[6..].iter().map(String::as_str).collect();
    let expected: BTreeSet<_> = full
        .inline_activity_commits()
        .into_iter()
        .filter(|(_, _, commit)| new_commits.contains(commit.as_str()))
        .collect();

    let incremental = harness(DeliveryMode::Inline).await;
    let mut model = pending_repository(&fixture.url());
    model.state = Set(RepositoryState::Completed);
    model.branch = Set(Some("main".to_string()));
    model.last_processed_commit = Set(Some(hashes[5].clone()));
    let repo = insert(incremental.db(), model).await;

    let (summary, batches) = incremental.mine(&repo).await;

    // one ref, so every deepen step adds 100 commits
    assert_eq!(summary.strategy, CloneStrategy::Minimal { depth: 100 });
    assert_eq!(batches.len(), 3, "230 commits need three deepen steps");
    let (first, _) = &batches[0];
    assert!(first.is_first_batch && !first.is_final_batch);
    assert!(first.edge_commit.is_some());
    assert!(first.prev_batch_edge_commit.is_none());
    for pair in batches.windows(2) {
        let (earlier, _) = &pair[0];
        let (later, _) = &pair[1];
        assert_eq!(later.prev_batch_edge_commit, earlier.edge_commit, "edges chain");
        assert_ne!(later.edge_commit, earlier.edge_commit, "boundary moves");
    }
    let (last, _) = batches.last().expect("final batch");
    assert!(last.is_final_batch);
    assert!(last.target_reachable);
    assert!(last.edge_commit.is_none(), "history is complete after the last deepen");

    for (batch, mined) in &batches {
        assert!(mined.processed_commits > 0, "batch {} mined nothing", batch.batch_number);
        assert_eq!(mined.bad_records, 0);
    }
    let processed: usize = batches.iter().map(|(_, mined)| mined.processed_commits).sum();
    assert_eq!(processed, hashes.len() - 6);

    let mined = incremental.inline_activity_commits();
    assert_eq!(mined, expected, "batched run must equal the tail of a full run");
}

#[tokio::test]
async fn test_deepen_limit_still_mines_the_edge_commit() {
    let (fixture, hashes) = long_history(230);
    let h = harness_with(DeliveryMode::Inline, |options| options.max_deepen_iterations = 2).await;
    let mut model = pending_repository(&fixture.url());
    model.state = Set(RepositoryState::Completed);
    model.branch = Set(Some("main".to_string()));
    model.last_processed_commit = Set(Some(hashes[5].clone()));
    let repo = insert(h.db(), model).await;

    let (_, batches) = h.mine(&repo).await;

    assert_eq!(batches.len(), 2);
    let (last, mined) = &batches[1];
    assert!(last.is_final_batch);
    assert!(!last.target_reachable);
    let edge = last.edge_commit.clone().expect("history is still shallow");
    let edge_index = hashes.iter().position(|h| *h == edge).expect("edge is a fixture commit");
    assert_eq!(mined.boundary_skips, 0);

    let authored: BTreeSet<String> = h
        .inline_activities()
        .into_iter()
        .filter(|(kind, _)| kind == AUTHORED_COMMIT)
        .map(|(_, id)| id)
        .collect();
    let expected: BTreeSet<String> = hashes[edge_index..].iter().cloned().collect();
    assert!(authored.contains(&edge), "edge commit must be mined");
    assert_eq!(authored, expected);
}

#[tokio::test]
async fn test_fork_skips_activities_already_mined_from_its_parent() {
    let (parent, _) = fixture_history();
    let h = harness(DeliveryMode::ResultRef).await;
    let parent_repo = insert(h.db(), pending_repository(&parent.url())).await;
    let (_, batches) = h.mine(&parent_repo).await;
    assert_eq!(batches[0].1.results_inserted, 8);

    // a fork: the parent's history plus one commit of its own
    let mut fork = GitFixture::clone_of(&parent);
    let own = fork.commit("Fork-only change", GRACE, GRACE, 1);
    let fork_repo = insert(h.db(), forked_repository(&fork.url(), &parent.url())).await;

    let (_, batches) = h.mine(&fork_repo).await;
    let mined = batches[0].1;
    assert_eq!(mined.processed_commits, 5);
    assert_eq!(mined.parent_duplicates, 8);
    assert_eq!(mined.activities, 1);
    assert_eq!(mined.results_inserted, 1);

    let fork_rows: Vec<_> = IntegrationResult::find()
        .all(h.db())
        .await
        .unwrap()
        .into_iter()
        .filter(|row| row.channel.as_deref() == Some(fork.url().as_str()))
        .collect();
    assert_eq!(fork_rows.len(), 1);
    assert_eq!(fork_rows[0].data["sourceId"], own.as_str());
    assert_eq!(IntegrationResult::find().count(h.db()).await.unwrap(), 9);
}
