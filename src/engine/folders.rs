use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{validate_name, Storage, StorageError};
use crate::storage::models::{
    FileRecord, FileUpdate, FolderRecord, FolderUpdate, Patch, Release,
};
use crate::storage::DatabaseError;

pub const ROOT_FOLDER_NAME: &str = "Root";

/// Which children to load with a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildKind {
    Files,
    Folders,
    All,
}

impl ChildKind {
    fn files(self) -> bool {
        matches!(self, ChildKind::Files | ChildKind::All)
    }

    fn folders(self) -> bool {
        matches!(self, ChildKind::Folders | ChildKind::All)
    }
}

/// Eager-loading options for [`Storage::resolve_folder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FolderLoad {
    pub children: Option<ChildKind>,
    pub ancestors: bool,
}

/// A folder with its derived path and whatever was asked to be loaded.
#[derive(Debug, Clone, Serialize)]
pub struct FolderView {
    pub folder: FolderRecord,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folders: Option<Vec<FolderRecord>>,
    /// Root first, ending with the folder itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<Vec<FolderRecord>>,
}

/// Anything that sits in the folder tree.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    File(&'a FileRecord),
    Folder(&'a FolderRecord),
}

impl Node<'_> {
    fn parent_id(&self) -> Option<&str> {
        match self {
            Node::File(file) => file.parent_id.as_deref(),
            Node::Folder(folder) => folder.parent_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewFolder {
    pub name: String,
    /// Defaults to the root folder.
    pub parent_id: Option<String>,
    pub description: Option<String>,
}

/// Everything removed by a cascading folder delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FolderDeletion {
    pub folders: u64,
    pub files: u64,
    /// Files still referenced elsewhere, moved to the root instead.
    pub moved_to_root: u64,
}

impl Storage {
    /// The root folder, created on first use.
    ///
    /// Concurrent first calls race on the `folder_root` row; the loser reads
    /// back the winner's folder, so only one root ever exists.
    pub fn root_folder(&self) -> Result<FolderRecord, StorageError> {
        if let Some(root) = self.db.get_root_folder()? {
            return Ok(root);
        }

        let now = Utc::now();
        let root = FolderRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: ROOT_FOLDER_NAME.to_string(),
            description: None,
            is_root: true,
            parent_id: None,
            created_at: now,
            updated_at: now,
        };

        match self.db.create_root_folder(&root) {
            Ok(()) => {
                tracing::info!(folder_id = %root.id, "Created root folder");
                Ok(root)
            }
            Err(DatabaseError::RootExists(existing)) => {
                tracing::debug!(folder_id = %existing, "Root folder created concurrently");
                self.db
                    .get_root_folder()?
                    .ok_or_else(|| StorageError::FolderNotFound(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a folder by id, or the root when `id` is `None`.
    pub fn resolve_folder(
        &self,
        id: Option<&str>,
        load: FolderLoad,
    ) -> Result<FolderView, StorageError> {
        let folder = match id {
            Some(id) => self.get_folder(id)?,
            None => self.root_folder()?,
        };

        let chain = self.db.folder_chain(&folder.id)?;
        let path = path_of(&chain);

        let (files, folders) = match load.children {
            Some(kind) => {
                let files = if kind.files() {
                    Some(self.child_files(&folder)?)
                } else {
                    None
                };
                let folders = if kind.folders() {
                    let mut folders = self.db.child_folders(&folder.id)?;
                    folders.sort_by(|a, b| a.name.cmp(&b.name));
                    Some(folders)
                } else {
                    None
                };
                (files, folders)
            }
            None => (None, None),
        };

        Ok(FolderView {
            folder,
            path,
            files,
            folders,
            hierarchy: load.ancestors.then_some(chain),
        })
    }

    /// The folder directly containing `node`. The root has no parent;
    /// unparented files live under the root.
    pub fn resolve_parent(&self, node: Node<'_>) -> Result<Option<FolderRecord>, StorageError> {
        match (node, node.parent_id()) {
            (_, Some(parent_id)) => Ok(Some(self.get_folder(parent_id)?)),
            (Node::File(_), None) => Ok(Some(self.root_folder()?)),
            (Node::Folder(_), None) => Ok(None),
        }
    }

    /// Every ancestor of `node`, root first.
    ///
    /// Folders in `known` are used instead of a lookup when their id matches.
    pub fn resolve_parents(
        &self,
        node: Node<'_>,
        known: &[FolderRecord],
    ) -> Result<Vec<FolderRecord>, StorageError> {
        let known: HashMap<&str, &FolderRecord> =
            known.iter().map(|f| (f.id.as_str(), f)).collect();

        let mut parents = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = match (node, node.parent_id()) {
            (_, Some(id)) => Some(id.to_string()),
            (Node::File(_), None) => Some(self.root_folder()?.id),
            (Node::Folder(_), None) => None,
        };

        while let Some(id) = cursor {
            if !seen.insert(id.clone()) {
                break;
            }
            let folder = match known.get(id.as_str()) {
                Some(folder) => (*folder).clone(),
                None => self.get_folder(&id)?,
            };
            cursor = folder.parent_id.clone();
            parents.push(folder);
        }

        parents.reverse();
        Ok(parents)
    }

    /// `/`-joined names from below the root down to the folder. The root is `/`.
    pub fn folder_path(&self, folder_id: &str) -> Result<String, StorageError> {
        Ok(path_of(&self.db.folder_chain(folder_id)?))
    }

    pub fn file_path(&self, file: &FileRecord) -> Result<String, StorageError> {
        let parents = self.resolve_parents(Node::File(file), &[])?;
        let folder = path_of(&parents);
        Ok(if folder == "/" {
            format!("/{}", file.name)
        } else {
            format!("{folder}/{}", file.name)
        })
    }

    /// Total bytes of every file below the folder, at any depth.
    pub fn folder_size(&self, folder_id: &str) -> Result<u64, StorageError> {
        let folder = self.get_folder(folder_id)?;
        let subtree = self.subtree(&folder)?;

        let size = self
            .db
            .get_all_files()?
            .iter()
            .filter(|f| match f.parent_id.as_deref() {
                Some(parent) => subtree.contains(parent),
                None => folder.is_root,
            })
            .map(|f| f.byte_size)
            .sum();
        Ok(size)
    }

    pub fn create_folder(&self, new: NewFolder) -> Result<FolderRecord, StorageError> {
        let name = validate_name(&new.name)?;
        let parent_id = match new.parent_id {
            Some(id) => self.get_folder(&id)?.id,
            None => self.root_folder()?.id,
        };

        let now = Utc::now();
        let folder = FolderRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            description: new.description,
            is_root: false,
            parent_id: Some(parent_id),
            created_at: now,
            updated_at: now,
        };
        self.db.create_folder(&folder)?;

        tracing::debug!(folder_id = %folder.id, name = %folder.name, "Created folder");
        Ok(folder)
    }

    /// Rename, move or describe a folder.
    pub fn update_folder(
        &self,
        id: &str,
        mut update: FolderUpdate,
    ) -> Result<FolderRecord, StorageError> {
        if update.is_empty() {
            return Err(StorageError::InvalidInput(
                "at least one of name, description, parent_id must be provided".to_string(),
            ));
        }
        if let Some(ref name) = update.name {
            update.name = Some(validate_name(name)?);
        }
        if let Some(ref parent_id) = update.parent_id {
            self.get_folder(parent_id)?;
        }

        self.db
            .update_folder(id, &update)?
            .ok_or_else(|| StorageError::FolderNotFound(id.to_string()))
    }

    /// Delete a folder with everything below it.
    ///
    /// Each contained file loses one reference. Files with no references
    /// left are erased, backend bytes included; files still referenced by
    /// other uploads are moved to the root. The root cannot be deleted.
    pub async fn delete_folder(&self, id: &str) -> Result<FolderDeletion, StorageError> {
        let folder = self.get_folder(id)?;
        if folder.is_root {
            return Err(StorageError::InvalidInput(
                "the root folder cannot be deleted".to_string(),
            ));
        }

        let root = self.root_folder()?;
        let subtree = self.subtree(&folder)?;
        let mut deletion = FolderDeletion::default();

        let files: Vec<FileRecord> = self
            .db
            .get_all_files()?
            .into_iter()
            .filter(|f| f.parent_id.as_deref().is_some_and(|p| subtree.contains(p)))
            .collect();
        for file in &files {
            match self.db.release_reference(&file.id)? {
                Some(Release::Remaining(references)) => {
                    if self.db.rehome_file(&file.id, &root.id)?.is_some() {
                        tracing::debug!(file_id = %file.id, references, "Moved shared file to root");
                        deletion.moved_to_root += 1;
                    }
                }
                Some(Release::Last) => {
                    self.remove_retired(&file.id).await?;
                    deletion.files += 1;
                }
                // Erased concurrently
                None => {}
            }
        }

        // Children before parents.
        let mut order: Vec<FolderRecord> = self
            .db
            .get_all_folders()?
            .into_iter()
            .filter(|f| subtree.contains(&f.id))
            .collect();
        let depth = |f: &FolderRecord| self.db.folder_chain(&f.id).map(|c| c.len()).unwrap_or(0);
        order.sort_by_cached_key(|f| std::cmp::Reverse(depth(f)));
        for folder in &order {
            if self.db.delete_folder_record(&folder.id)? {
                deletion.folders += 1;
            }
        }

        tracing::info!(
            folder_id = %id,
            folders = deletion.folders,
            files = deletion.files,
            moved_to_root = deletion.moved_to_root,
            "Deleted folder"
        );
        Ok(deletion)
    }

    /// Move, rename or describe a file. A target folder must exist; clearing
    /// the parent moves the file to the root.
    pub fn update_file(&self, id: &str, mut update: FileUpdate) -> Result<FileRecord, StorageError> {
        if update.name.is_none() && update.description.is_absent() && update.parent_id.is_absent()
        {
            return Err(StorageError::InvalidInput(
                "at least one of name, description, parent_id must be provided".to_string(),
            ));
        }
        if let Some(ref name) = update.name {
            update.name = Some(validate_name(name)?);
        }
        if let Patch::Value(ref parent_id) = update.parent_id {
            self.get_folder(parent_id)?;
        } else if update.parent_id == Patch::Null {
            update.parent_id = Patch::Value(self.root_folder()?.id);
        }

        self.db
            .update_file(id, &update)?
            .ok_or_else(|| StorageError::FileNotFound(id.to_string()))
    }

    fn get_folder(&self, id: &str) -> Result<FolderRecord, StorageError> {
        self.db
            .get_folder(id)?
            .ok_or_else(|| StorageError::FolderNotFound(id.to_string()))
    }

    /// Files directly inside `folder`, by name. Unparented files count as
    /// children of the root.
    fn child_files(&self, folder: &FolderRecord) -> Result<Vec<FileRecord>, StorageError> {
        let mut files = self.db.files_in(Some(&folder.id))?;
        if folder.is_root {
            files.extend(self.db.files_in(None)?);
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Ids of `folder` and all folders below it.
    fn subtree(&self, folder: &FolderRecord) -> Result<HashSet<String>, StorageError> {
        let folders = self.db.get_all_folders()?;
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for f in &folders {
            if let Some(ref parent) = f.parent_id {
                children.entry(parent.as_str()).or_default().push(f.id.as_str());
            }
        }

        let mut subtree = HashSet::new();
        let mut queue = VecDeque::from([folder.id.as_str()]);
        while let Some(id) = queue.pop_front() {
            if subtree.insert(id.to_string()) {
                if let Some(kids) = children.get(id) {
                    queue.extend(kids.iter().copied());
                }
            }
        }
        Ok(subtree)
    }
}

/// Join the names of a root-first chain, skipping the root itself.
fn path_of(chain: &[FolderRecord]) -> String {
    let names: Vec<&str> = chain
        .iter()
        .filter(|f| !f.is_root)
        .map(|f| f.name.as_str())
        .collect();
    format!("/{}", names.join("/"))
}
