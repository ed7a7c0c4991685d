/// Store module for the LinkCheck service
///
/// The store owns the single in-memory `State` and its on-disk snapshot.
/// Every operation goes through one shared/exclusive lock; reads always hand
/// out independent copies so callers never touch the live state.
use crate::model::{LinkStatus, LinksNum, LinksSet, PendingTask, State, TaskPhase};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, RwLock},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable application state.
///
/// # Fields
/// * `path` - Location of the JSON snapshot
/// * `state` - The live state, guarded by a reader/writer lock
/// * `save_lock` - Serializes snapshot writes so they land in call order
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    state: RwLock<State>,
    save_lock: Mutex<()>,
}

impl Store {
    /// Creates a store backed by `path` and loads any existing snapshot.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            state: RwLock::new(State::default()),
            save_lock: Mutex::new(()),
        };
        store.load().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory state with the persisted snapshot.
    ///
    /// A missing or empty file leaves the state untouched. A file that cannot
    /// be parsed is reported as `StoreError::Corrupt`.
    pub async fn load(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No state file at {}, starting empty", self.path.display());
                return Ok(());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            tracing::info!("State file {} is empty, starting empty", self.path.display());
            return Ok(());
        }

        *state = serde_json::from_slice(&data).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        // The counter must stay ahead of every stored batch, even when the
        // snapshot lacks it or carries a stale value.
        if let Some(last) = state.links_sets.keys().next_back().copied() {
            if state.next_links_num <= last {
                tracing::warn!(
                    "Stored next links_num {} is behind links set {}, moving it forward",
                    state.next_links_num,
                    last
                );
                state.next_links_num = last + 1;
            }
        }

        tracing::info!(
            "Loaded state: {} links sets, {} pending tasks, next links_num {}",
            state.links_sets.len(),
            state.pending_tasks.len(),
            state.next_links_num
        );
        Ok(())
    }

    /// Writes the whole state to disk.
    ///
    /// The snapshot is written to a sibling temporary file and renamed over the
    /// previous one, so readers of the file never observe a partial write.
    pub async fn save(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().await;

        let data = {
            let state = self.state.read().await;
            serde_json::to_vec_pretty(&*state)?
        };

        let tmp_path = self.tmp_path();
        self.write_file(&tmp_path, &data).await?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        tracing::trace!("State saved to {} ({} bytes)", self.path.display(), data.len());
        Ok(())
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut file = fs::File::create(path).await.map_err(io_err)?;
        file.write_all(data).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Stores a new batch and returns its number. Does not persist.
    pub async fn add_links_set(&self, links: BTreeMap<String, LinkStatus>) -> LinksNum {
        let mut state = self.state.write().await;

        let links_num = state.next_links_num;
        let mut set = LinksSet {
            links_num,
            links: BTreeMap::new(),
        };
        for (url, status) in links {
            Self::set_status(&mut set, url, status);
        }
        state.links_sets.insert(links_num, set);
        state.next_links_num += 1;

        links_num
    }

    /// Returns copies of the requested batches that exist. Unknown numbers are skipped.
    pub async fn get_links_sets(&self, links_nums: &[LinksNum]) -> BTreeMap<LinksNum, LinksSet> {
        let state = self.state.read().await;

        links_nums
            .iter()
            .filter_map(|num| state.links_sets.get(num).map(|set| (*num, set.clone())))
            .collect()
    }

    pub async fn has_links_set(&self, links_num: LinksNum) -> bool {
        self.state.read().await.links_sets.contains_key(&links_num)
    }

    /// Sets the status of `url` in an existing batch. Missing batches are ignored.
    pub async fn update_links_set_status(&self, links_num: LinksNum, url: &str, status: LinkStatus) {
        let mut state = self.state.write().await;
        Self::update_status(&mut state, links_num, url, status);
    }

    pub async fn add_pending_task(&self, task: PendingTask) {
        self.state.write().await.pending_tasks.push(task);
    }

    /// Removes the first marker for (`links_num`, `url`), if any.
    pub async fn remove_pending_task(&self, links_num: LinksNum, url: &str) {
        let mut state = self.state.write().await;
        Self::remove_marker(&mut state, links_num, url);
    }

    /// Moves the first marker for (`links_num`, `url`) to the processing phase.
    ///
    /// Returns `false` when no such marker exists.
    pub async fn mark_processing(&self, links_num: LinksNum, url: &str) -> bool {
        let mut state = self.state.write().await;

        if let Some(task) = state
            .pending_tasks
            .iter_mut()
            .find(|t| t.matches(links_num, url) && t.phase == TaskPhase::Pending)
        {
            task.phase = TaskPhase::Processing;
            return true;
        }

        // Already processing, e.g. a duplicate dispatch of the same pair.
        state
            .pending_tasks
            .iter()
            .any(|t| t.matches(links_num, url))
    }

    /// Resets every processing marker back to pending and returns how many changed.
    pub async fn reset_processing(&self) -> usize {
        let mut state = self.state.write().await;

        let mut count = 0;
        for task in state
            .pending_tasks
            .iter_mut()
            .filter(|t| t.phase == TaskPhase::Processing)
        {
            task.phase = TaskPhase::Pending;
            count += 1;
        }
        count
    }

    /// Records the outcome of a queued check.
    ///
    /// Writes the status and drops the marker under a single exclusive lock,
    /// so no reader can observe the marker gone with the status unwritten.
    /// Unlike `add_links_set`, this never creates a batch.
    pub async fn complete_task(&self, links_num: LinksNum, url: &str, status: LinkStatus) {
        let mut state = self.state.write().await;
        Self::update_status(&mut state, links_num, url, status);
        Self::remove_marker(&mut state, links_num, url);
    }

    pub async fn get_pending_tasks(&self) -> Vec<PendingTask> {
        self.state.read().await.pending_tasks.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.read().await.pending_tasks.len()
    }

    /// Returns a copy of the whole state.
    pub async fn snapshot(&self) -> State {
        self.state.read().await.clone()
    }

    fn update_status(state: &mut State, links_num: LinksNum, url: &str, status: LinkStatus) {
        if let Some(set) = state.links_sets.get_mut(&links_num) {
            Self::set_status(set, url.to_string(), status);
        }
    }

    // Every status write ends up here, whichever path it came from.
    fn set_status(set: &mut LinksSet, url: String, status: LinkStatus) {
        set.links.insert(url, status);
    }

    fn remove_marker(state: &mut State, links_num: LinksNum, url: &str) {
        if let Some(pos) = state
            .pending_tasks
            .iter()
            .position(|t| t.matches(links_num, url))
        {
            state.pending_tasks.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn open_in(dir: &TempDir) -> Store {
        Store::open(dir.path().join("state.json"))
            .await
            .expect("Failed to open store")
    }

    fn links(entries: &[(&str, LinkStatus)]) -> BTreeMap<String, LinkStatus> {
        entries
            .iter()
            .map(|(url, status)| (url.to_string(), *status))
            .collect()
    }

    #[tokio::test]
    async fn test_open_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;

        assert_eq!(store.snapshot().await, State::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_open_empty_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("state.json"), "").unwrap();

        let store = open_in(&dir).await;
        assert_eq!(store.snapshot().await, State::default());
    }

    #[tokio::test]
    async fn test_open_corrupt_file_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("state.json"), "{ not json").unwrap();

        let result = Store::open(dir.path().join("state.json")).await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_add_links_set_assigns_sequential_numbers() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;

        let first = store
            .add_links_set(links(&[("a.com", LinkStatus::Available)]))
            .await;
        let second = store.add_links_set(BTreeMap::new()).await;

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(store.snapshot().await.next_links_num, 3);
    }

    #[tokio::test]
    async fn test_links_num_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_in(&dir).await;
            store.add_links_set(BTreeMap::new()).await;
            store.add_links_set(BTreeMap::new()).await;
            store.save().await.unwrap();
        }

        let store = open_in(&dir).await;
        assert_eq!(store.add_links_set(BTreeMap::new()).await, 3);
    }

    #[tokio::test]
    async fn test_load_without_counter_never_reuses_numbers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("state.json"),
            r#"{"links_sets": {"1": {"links_num": 1, "links": {"keep.com": "available"}},
                               "4": {"links_num": 4, "links": {}}},
                "pending_tasks": []}"#,
        )
        .unwrap();

        let store = open_in(&dir).await;
        let num = store
            .add_links_set(links(&[("new.com", LinkStatus::NotAvailable)]))
            .await;

        assert_eq!(num, 5);
        let sets = store.get_links_sets(&[1, 5]).await;
        assert_eq!(sets[&1].links["keep.com"], LinkStatus::Available);
        assert_eq!(sets[&5].links["new.com"], LinkStatus::NotAvailable);
    }

    #[tokio::test]
    async fn test_load_with_stale_counter_moves_it_forward() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("state.json"),
            r#"{"links_sets": {"2": {"links_num": 2, "links": {}}}, "next_links_num": 2}"#,
        )
        .unwrap();

        let store = open_in(&dir).await;
        assert_eq!(store.snapshot().await.next_links_num, 3);
        assert_eq!(store.add_links_set(BTreeMap::new()).await, 3);
    }

    #[tokio::test]
    async fn test_get_links_sets_returns_existing_subset() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;
        for _ in 0..3 {
            store
                .add_links_set(links(&[("a.com", LinkStatus::Available)]))
                .await;
        }

        assert!(store.get_links_sets(&[5]).await.is_empty());
        assert!(store.get_links_sets(&[]).await.is_empty());

        let found = store.get_links_sets(&[2, 5, 3]).await;
        assert_eq!(found.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_reads_are_independent_copies() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;
        let num = store
            .add_links_set(links(&[("a.com", LinkStatus::Available)]))
            .await;

        let mut copy = store.get_links_sets(&[num]).await;
        copy.get_mut(&num)
            .unwrap()
            .links
            .insert("a.com".into(), LinkStatus::NotAvailable);

        let mut tasks = store.get_pending_tasks().await;
        tasks.push(PendingTask::new(num, "b.com"));

        assert_eq!(
            store.get_links_sets(&[num]).await[&num].links["a.com"],
            LinkStatus::Available
        );
        assert_eq!(store.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_status_ignores_missing_batch() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;
        let num = store
            .add_links_set(links(&[("a.com", LinkStatus::Available)]))
            .await;

        store
            .update_links_set_status(num, "a.com", LinkStatus::NotAvailable)
            .await;
        store
            .update_links_set_status(42, "a.com", LinkStatus::NotAvailable)
            .await;

        let state = store.snapshot().await;
        assert_eq!(state.links_sets[&num].links["a.com"], LinkStatus::NotAvailable);
        assert_eq!(state.links_sets.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_pending_task_removes_first_match_only() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;
        store.add_pending_task(PendingTask::new(1, "a.com")).await;
        store.add_pending_task(PendingTask::new(1, "b.com")).await;
        store.add_pending_task(PendingTask::new(1, "a.com")).await;

        store.remove_pending_task(1, "a.com").await;
        store.remove_pending_task(9, "missing.com").await;

        let urls: Vec<_> = store
            .get_pending_tasks()
            .await
            .into_iter()
            .map(|t| t.url)
            .collect();
        assert_eq!(urls, vec!["b.com", "a.com"]);
    }

    #[tokio::test]
    async fn test_mark_processing_and_reset() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;
        store.add_pending_task(PendingTask::new(1, "a.com")).await;

        assert!(store.mark_processing(1, "a.com").await);
        assert!(!store.mark_processing(1, "b.com").await);
        assert_eq!(
            store.get_pending_tasks().await[0].phase,
            TaskPhase::Processing
        );

        assert_eq!(store.reset_processing().await, 1);
        assert_eq!(store.get_pending_tasks().await[0].phase, TaskPhase::Pending);
    }

    #[tokio::test]
    async fn test_complete_task_writes_status_and_removes_marker() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;
        let num = store
            .add_links_set(links(&[("a.com", LinkStatus::Available)]))
            .await;
        store.add_pending_task(PendingTask::new(num, "a.com")).await;

        store
            .complete_task(num, "a.com", LinkStatus::NotAvailable)
            .await;

        let state = store.snapshot().await;
        assert_eq!(state.links_sets[&num].links["a.com"], LinkStatus::NotAvailable);
        assert!(state.pending_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_complete_task_never_creates_batch() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;
        store.add_pending_task(PendingTask::new(7, "a.com")).await;

        store.complete_task(7, "a.com", LinkStatus::Available).await;

        let state = store.snapshot().await;
        assert!(state.links_sets.is_empty());
        assert!(state.pending_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;
        store
            .add_links_set(links(&[
                ("z.com", LinkStatus::Available),
                ("a.com", LinkStatus::NotAvailable),
                ("m.com", LinkStatus::Available),
            ]))
            .await;
        store.add_links_set(BTreeMap::new()).await;
        store.add_pending_task(PendingTask::new(1, "z.com")).await;

        store.save().await.unwrap();
        let first = std::fs::read(store.path()).unwrap();
        store.save().await.unwrap();
        let second = std::fs::read(store.path()).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_in(&dir).await;
        store
            .add_links_set(links(&[
                ("a.com", LinkStatus::Available),
                ("b.com", LinkStatus::NotAvailable),
            ]))
            .await;
        store.add_pending_task(PendingTask::new(1, "b.com")).await;
        store.add_pending_task(PendingTask::new(1, "a.com")).await;
        store.mark_processing(1, "a.com").await;
        store.save().await.unwrap();

        let reloaded = open_in(&dir).await;
        assert_eq!(reloaded.snapshot().await, store.snapshot().await);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("nested/dir/state.json"))
            .await
            .unwrap();

        store.save().await.unwrap();
        assert!(dir.path().join("nested/dir/state.json").exists());
    }

    #[tokio::test]
    async fn test_concurrent_mutations_and_saves_stay_consistent() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_in(&dir).await);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .add_pending_task(PendingTask::new(i, format!("u{}.com", i)))
                        .await;
                    store.save().await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let reloaded = open_in(&dir).await;
        assert_eq!(reloaded.pending_count().await, 20);
    }
}
