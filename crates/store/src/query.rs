//! Query layer: owner listing, text/tag search, tag aggregation and folders
//!
//! Thin functions over [`VaultStore`]. Results keep the store's insertion
//! order unless a function says otherwise.
use crate::error::Result;
use crate::schema::folder_attribute;
use crate::store::{VaultStore, from_documents};

use std::collections::BTreeSet;
use tracing::instrument;
use vault_core::{Collection, Entity, File, Folder, Note, RecordId};

/// Collections that carry user content, as opposed to folder structure
pub const CONTENT_COLLECTIONS: [Collection; 2] = [Collection::Notes, Collection::Files];

/// Filters for [`VaultStore::search`]
///
/// Both filters are optional; when both are set a record must pass both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Case-insensitive substring of the title (notes) or name (files, folders)
    pub text: Option<String>,
    /// Matches records carrying at least one of these tags; empty means no tag filter
    pub tags: Option<Vec<String>>,
}

impl SearchFilters {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), tags: None }
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { text: None, tags: Some(tags.into_iter().map(Into::into).collect()) }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Whether a record passes both filters
    pub fn matches<E: Entity>(&self, record: &E) -> bool {
        self.matches_text(record.search_text()) && self.matches_tags(record.tags())
    }

    fn matches_text(&self, haystack: &str) -> bool {
        match &self.text {
            None => true,
            Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
        }
    }

    fn matches_tags(&self, record_tags: &[String]) -> bool {
        match &self.tags {
            Some(wanted) if !wanted.is_empty() => record_tags.iter().any(|tag| wanted.contains(tag)),
            _ => true,
        }
    }
}

impl VaultStore {
    /// Records of one owner in insertion order; `None` lists every record
    ///
    /// The owner filter is an exact match, so unowned records only show up
    /// when no owner is given.
    pub async fn list_by_owner<E: Entity>(&self, owner: Option<&str>) -> Result<Vec<E>> {
        self.scan::<E>(owner).await
    }

    /// Owner listing narrowed by text and tag filters
    #[instrument(skip(self, filters), fields(collection = %E::COLLECTION))]
    pub async fn search<E: Entity>(&self, owner: Option<&str>, filters: &SearchFilters) -> Result<Vec<E>> {
        let candidates = match &filters.tags {
            Some(tags) if !tags.is_empty() => match self.scan_tagged(E::COLLECTION, owner, tags).await? {
                Some(docs) => from_documents::<E>(docs)?,
                None => self.scan::<E>(owner).await?,
            },
            _ => self.scan::<E>(owner).await?,
        };

        let hits: Vec<E> = candidates.into_iter().filter(|record| filters.matches(record)).collect();
        tracing::debug!(hits = hits.len(), "Search complete");
        Ok(hits)
    }

    /// Every distinct tag used by notes and files of an owner, ascending
    pub async fn all_tags(&self, owner: Option<&str>) -> Result<Vec<String>> {
        if let Some(tags) = self.distinct_keys(&CONTENT_COLLECTIONS, "tags", owner).await? {
            return Ok(tags);
        }

        let mut tags = BTreeSet::new();
        for note in self.scan::<Note>(owner).await? {
            tags.extend(note.tags);
        }
        for file in self.scan::<File>(owner).await? {
            tags.extend(file.tags);
        }
        Ok(tags.into_iter().collect())
    }

    /// Remove every note and file; folders are kept
    pub async fn clear_all(&self) -> Result<()> {
        self.clear(&CONTENT_COLLECTIONS).await
    }

    /// Records whose folder reference is `folder_id`, in insertion order
    ///
    /// For folders this lists the direct children.
    pub async fn in_folder<E: Entity>(&self, folder_id: RecordId) -> Result<Vec<E>> {
        let docs = self
            .scan_by_attribute(E::COLLECTION, folder_attribute(E::COLLECTION), &folder_id.to_string())
            .await?;
        from_documents(docs)
    }

    pub async fn notes_in_folder(&self, folder_id: RecordId) -> Result<Vec<Note>> {
        self.in_folder::<Note>(folder_id).await
    }

    pub async fn files_in_folder(&self, folder_id: RecordId) -> Result<Vec<File>> {
        self.in_folder::<File>(folder_id).await
    }

    /// Direct children of a folder, or the root folders for `None`
    ///
    /// A folder whose parent no longer exists counts as a root.
    pub async fn child_folders(&self, parent: Option<RecordId>) -> Result<Vec<Folder>> {
        match parent {
            Some(parent) => self.in_folder::<Folder>(parent).await,
            None => {
                let folders = self.scan::<Folder>(None).await?;
                let ids: BTreeSet<RecordId> = folders.iter().map(|f| f.id).collect();
                Ok(folders
                    .into_iter()
                    .filter(|f| f.parent_id.is_none_or(|parent| !ids.contains(&parent)))
                    .collect())
            }
        }
    }

    /// Follow a record's weak folder reference
    ///
    /// Returns `None` when the record has no folder or the folder is gone.
    pub async fn resolve_folder<E: Entity>(&self, record: &E) -> Result<Option<Folder>> {
        match record.folder_ref() {
            Some(folder_id) => self.get::<Folder>(folder_id).await,
            None => Ok(None),
        }
    }

    /// Favorite records of an owner, in insertion order
    pub async fn favorites<E: Entity>(&self, owner: Option<&str>) -> Result<Vec<E>> {
        Ok(self.scan::<E>(owner).await?.into_iter().filter(|record| record.is_favorite()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vault_core::{NewFile, NewFolder, NewNote, NotePatch};

    async fn open_temp() -> (TempDir, VaultStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = VaultStore::open(&temp_dir.path().join("vault.db")).await.unwrap();
        (temp_dir, store)
    }

    fn ids<E: Entity>(records: &[E]) -> Vec<RecordId> {
        records.iter().map(|record| record.id()).collect()
    }

    #[test]
    fn test_filters_text_is_case_insensitive() {
        let filters = SearchFilters::text("SHOP");
        assert!(filters.matches_text("Shopping list"));
        assert!(!filters.matches_text("Groceries"));
        assert!(SearchFilters::default().matches_text("anything"));
    }

    #[test]
    fn test_filters_tags_use_or() {
        let filters = SearchFilters::tags(["a", "z"]);
        assert!(filters.matches_tags(&["a".to_string(), "b".to_string()]));
        assert!(filters.matches_tags(&["z".to_string()]));
        assert!(!filters.matches_tags(&["b".to_string()]));
        assert!(!filters.matches_tags(&[]));
        assert!(SearchFilters::tags(Vec::<String>::new()).matches_tags(&["a".to_string()]));
    }

    #[tokio::test]
    async fn test_search_by_tag_and_owner() {
        let (_temp_dir, store) = open_temp().await;
        let n1 = store.add::<Note>(NewNote::new("Plan", "").with_tags(["work"]).with_owner("u1")).await.unwrap();
        let n2 = store.add::<Note>(NewNote::new("Shop", "").with_tags(["home"]).with_owner("u1")).await.unwrap();
        let _n3 = store.add::<Note>(NewNote::new("Other", "").with_tags(["work"]).with_owner("u2")).await.unwrap();

        let hits: Vec<Note> = store.search(Some("u1"), &SearchFilters::tags(["work"])).await.unwrap();
        assert_eq!(ids(&hits), vec![n1]);

        let hits: Vec<Note> = store.search(Some("u1"), &SearchFilters::text("sh")).await.unwrap();
        assert_eq!(ids(&hits), vec![n2]);

        let hits: Vec<Note> = store.search(Some("u1"), &SearchFilters::default()).await.unwrap();
        assert_eq!(ids(&hits), vec![n1, n2]);
    }

    #[tokio::test]
    async fn test_search_work_tag_matches_single_and_multi_tag_notes() {
        let (_temp_dir, store) = open_temp().await;
        let first = store.add::<Note>(NewNote::new("one", "").with_tags(["work"]).with_owner("u1")).await.unwrap();
        let _second = store.add::<Note>(NewNote::new("two", "").with_tags(["home"]).with_owner("u1")).await.unwrap();
        let third = store
            .add::<Note>(NewNote::new("three", "").with_tags(["work", "home"]).with_owner("u1"))
            .await
            .unwrap();

        let hits: Vec<Note> = store.search(Some("u1"), &SearchFilters::tags(["work"])).await.unwrap();
        assert_eq!(ids(&hits), vec![first, third]);
    }

    #[tokio::test]
    async fn test_all_tags_merges_tags_shared_by_notes_and_files() {
        let (_temp_dir, store) = open_temp().await;
        store.add::<Note>(NewNote::new("n", "").with_tags(["b", "a"]).with_owner("u1")).await.unwrap();
        store
            .add::<File>(NewFile::new("f", "text/plain", vec![]).with_tags(["a", "c"]).with_owner("u1"))
            .await
            .unwrap();

        assert_eq!(store.all_tags(Some("u1")).await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_search_tags_or_keeps_insertion_order() {
        let (_temp_dir, store) = open_temp().await;
        let a = store.add::<Note>(NewNote::new("a", "").with_tags(["y"])).await.unwrap();
        let _b = store.add::<Note>(NewNote::new("b", "").with_tags(["q"])).await.unwrap();
        let c = store.add::<Note>(NewNote::new("c", "").with_tags(["x", "y"])).await.unwrap();
        let d = store.add::<Note>(NewNote::new("d", "").with_tags(["x"])).await.unwrap();

        let hits: Vec<Note> = store.search(None, &SearchFilters::tags(["x", "y"])).await.unwrap();
        assert_eq!(ids(&hits), vec![a, c, d]);
    }

    #[tokio::test]
    async fn test_search_text_and_tags_combined() {
        let (_temp_dir, store) = open_temp().await;
        store.add::<Note>(NewNote::new("Meeting notes", "").with_tags(["work"])).await.unwrap();
        let hit = store.add::<Note>(NewNote::new("Meeting prep", "").with_tags(["home"])).await.unwrap();
        store.add::<Note>(NewNote::new("Recipes", "").with_tags(["home"])).await.unwrap();

        let filters = SearchFilters::text("meeting").with_tags(["home"]);
        let hits: Vec<Note> = store.search(None, &filters).await.unwrap();
        assert_eq!(ids(&hits), vec![hit]);
    }

    #[tokio::test]
    async fn test_search_sees_tag_updates() {
        let (_temp_dir, store) = open_temp().await;
        let id = store.add::<Note>(NewNote::new("a", "").with_tags(["old"])).await.unwrap();
        store
            .update::<Note>(id, NotePatch { tags: Some(vec!["new".into()]), ..Default::default() })
            .await
            .unwrap();

        let old: Vec<Note> = store.search(None, &SearchFilters::tags(["old"])).await.unwrap();
        assert!(old.is_empty());
        let new: Vec<Note> = store.search(None, &SearchFilters::tags(["new"])).await.unwrap();
        assert_eq!(ids(&new), vec![id]);
    }

    #[tokio::test]
    async fn test_search_files_by_name() {
        let (_temp_dir, store) = open_temp().await;
        let id = store.add::<File>(NewFile::new("Report.PDF", "application/pdf", vec![1, 2])).await.unwrap();
        store.add::<File>(NewFile::new("photo.png", "image/png", vec![3])).await.unwrap();

        let hits: Vec<File> = store.search(None, &SearchFilters::text("report")).await.unwrap();
        assert_eq!(ids(&hits), vec![id]);
    }

    #[tokio::test]
    async fn test_list_by_owner_exact_match() {
        let (_temp_dir, store) = open_temp().await;
        let owned = store.add::<Note>(NewNote::new("mine", "").with_owner("u1")).await.unwrap();
        let unowned = store.add::<Note>(NewNote::new("nobody", "")).await.unwrap();

        assert_eq!(ids(&store.list_by_owner::<Note>(Some("u1")).await.unwrap()), vec![owned]);
        assert!(store.list_by_owner::<Note>(Some("u2")).await.unwrap().is_empty());
        assert_eq!(ids(&store.list_by_owner::<Note>(None).await.unwrap()), vec![owned, unowned]);
    }

    #[tokio::test]
    async fn test_all_tags_across_notes_and_files() {
        let (_temp_dir, store) = open_temp().await;
        store.add::<Note>(NewNote::new("n1", "").with_tags(["b", "a"]).with_owner("u1")).await.unwrap();
        store.add::<Note>(NewNote::new("n2", "").with_tags(["a"]).with_owner("u1")).await.unwrap();
        store
            .add::<File>(NewFile::new("f", "text/plain", vec![]).with_tags(["c"]).with_owner("u1"))
            .await
            .unwrap();
        store.add::<Note>(NewNote::new("n3", "").with_tags(["zz"]).with_owner("u2")).await.unwrap();

        assert_eq!(store.all_tags(Some("u1")).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.all_tags(None).await.unwrap(), vec!["a", "b", "c", "zz"]);
        assert!(store.all_tags(Some("u3")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_keeps_folders() {
        let (_temp_dir, store) = open_temp().await;
        let folder = store.add::<Folder>(NewFolder::new("keep")).await.unwrap();
        store.add::<Note>(NewNote::new("n", "").with_tags(["t"])).await.unwrap();
        store.add::<File>(NewFile::new("f", "text/plain", vec![0])).await.unwrap();

        store.clear_all().await.unwrap();

        assert!(store.list_by_owner::<Note>(None).await.unwrap().is_empty());
        assert!(store.list_by_owner::<File>(None).await.unwrap().is_empty());
        assert!(store.all_tags(None).await.unwrap().is_empty());
        assert!(store.get::<Folder>(folder).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_folder_contents_and_children() {
        let (_temp_dir, store) = open_temp().await;
        let root = store.add::<Folder>(NewFolder::new("root")).await.unwrap();
        let sub = store.add::<Folder>(NewFolder::new("sub").with_parent(root)).await.unwrap();
        let other = store.add::<Folder>(NewFolder::new("other")).await.unwrap();

        let note = store.add::<Note>(NewNote::new("n", "").in_folder(sub)).await.unwrap();
        let file = store.add::<File>(NewFile::new("f", "text/plain", vec![]).in_folder(sub)).await.unwrap();
        store.add::<Note>(NewNote::new("loose", "")).await.unwrap();

        assert_eq!(ids(&store.notes_in_folder(sub).await.unwrap()), vec![note]);
        assert_eq!(ids(&store.files_in_folder(sub).await.unwrap()), vec![file]);
        assert!(store.notes_in_folder(root).await.unwrap().is_empty());

        assert_eq!(ids(&store.child_folders(Some(root)).await.unwrap()), vec![sub]);
        assert_eq!(ids(&store.child_folders(None).await.unwrap()), vec![root, other]);
    }

    #[tokio::test]
    async fn test_dangling_folder_reference() {
        let (_temp_dir, store) = open_temp().await;
        let folder = store.add::<Folder>(NewFolder::new("gone")).await.unwrap();
        let child = store.add::<Folder>(NewFolder::new("child").with_parent(folder)).await.unwrap();
        let note_id = store.add::<Note>(NewNote::new("n", "").in_folder(folder)).await.unwrap();

        let note = store.get::<Note>(note_id).await.unwrap().unwrap();
        assert_eq!(store.resolve_folder(&note).await.unwrap().map(|f| f.id), Some(folder));

        store.delete::<Folder>(folder).await.unwrap();

        let note = store.get::<Note>(note_id).await.unwrap().unwrap();
        assert_eq!(note.folder_id, Some(folder));
        assert!(store.resolve_folder(&note).await.unwrap().is_none());
        assert_eq!(ids(&store.child_folders(None).await.unwrap()), vec![child]);
    }

    #[tokio::test]
    async fn test_favorites() {
        let (_temp_dir, store) = open_temp().await;
        let plain = store.add::<Note>(NewNote::new("plain", "")).await.unwrap();
        let starred = store.add::<Note>(NewNote::new("starred", "")).await.unwrap();
        store
            .update::<Note>(starred, NotePatch { favorite: Some(true), ..Default::default() })
            .await
            .unwrap();

        let favorites = store.favorites::<Note>(None).await.unwrap();
        assert_eq!(ids(&favorites), vec![starred]);
        assert!(!ids(&favorites).contains(&plain));
    }
}
