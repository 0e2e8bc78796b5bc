use std::collections::HashSet;

use chrono::Utc;
use redb::ReadableTable;

use super::db::{decode, encode, Database, DatabaseError};
use super::models::{FolderRecord, FolderUpdate, Patch};
use super::owners::remove_owner_rows;
use super::tables::*;

impl Database {
    // ========================================================================
    // Folder operations
    // ========================================================================

    pub fn get_folder(&self, id: &str) -> Result<Option<FolderRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FOLDERS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// The registered root folder, if it has been bootstrapped.
    pub fn get_root_folder(&self) -> Result<Option<FolderRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let root = read_txn.open_table(FOLDER_ROOT)?;

        let id = match root.get(ROOT_KEY)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let folders = read_txn.open_table(FOLDERS)?;
        match folders.get(id.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Register the root folder. The `folder_root` row is the uniqueness
    /// guard: a second registration fails with [`DatabaseError::RootExists`].
    pub fn create_root_folder(&self, folder: &FolderRecord) -> Result<(), DatabaseError> {
        debug_assert!(folder.is_root, "root folder must carry is_root");
        debug_assert!(folder.parent_id.is_none(), "root folder has no parent");

        let write_txn = self.begin_write()?;
        {
            let mut root = write_txn.open_table(FOLDER_ROOT)?;
            let existing = root.get(ROOT_KEY)?.map(|v| v.value().to_string());
            if let Some(existing) = existing {
                return Err(DatabaseError::RootExists(existing));
            }
            root.insert(ROOT_KEY, folder.id.as_str())?;

            let mut names = write_txn.open_table(FOLDER_NAMES)?;
            names.insert(sibling_key(None, &folder.name).as_str(), folder.id.as_str())?;

            let mut table = write_txn.open_table(FOLDERS)?;
            table.insert(folder.id.as_str(), encode(folder)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Store a non-root folder under an existing parent.
    pub fn create_folder(&self, folder: &FolderRecord) -> Result<(), DatabaseError> {
        debug_assert!(!folder.is_root, "use create_root_folder for the root");

        let parent_id = folder
            .parent_id
            .as_deref()
            .ok_or_else(|| DatabaseError::InvalidMove("folder requires a parent".to_string()))?;

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(FOLDERS)?;
            if table.get(parent_id)?.is_none() {
                return Err(DatabaseError::FolderNotFound(parent_id.to_string()));
            }

            let mut names = write_txn.open_table(FOLDER_NAMES)?;
            let key = sibling_key(Some(parent_id), &folder.name);
            if names.get(key.as_str())?.is_some() {
                return Err(DatabaseError::NameTaken(folder.name.clone()));
            }
            names.insert(key.as_str(), folder.id.as_str())?;
            table.insert(folder.id.as_str(), encode(folder)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Rename, reparent or describe a folder.
    pub fn update_folder(
        &self,
        id: &str,
        update: &FolderUpdate,
    ) -> Result<Option<FolderRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(FOLDERS)?;
            let existing: Option<FolderRecord> = match table.get(id)? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };

            match existing {
                Some(mut folder) => {
                    if folder.is_root && update.parent_id.is_some() {
                        return Err(DatabaseError::InvalidMove(
                            "the root folder cannot be moved".to_string(),
                        ));
                    }

                    let new_parent = update.parent_id.clone().or(folder.parent_id.clone());
                    let new_name = update.name.clone().unwrap_or_else(|| folder.name.clone());

                    if new_parent != folder.parent_id {
                        // Walk up from the new parent; meeting ourselves means a cycle.
                        let mut cursor = new_parent.clone();
                        while let Some(current) = cursor {
                            if current == id {
                                return Err(DatabaseError::InvalidMove(
                                    "a folder cannot be moved inside itself".to_string(),
                                ));
                            }
                            let parent: Option<FolderRecord> = match table.get(current.as_str())? {
                                Some(data) => Some(decode(data.value())?),
                                None => None,
                            };
                            cursor = match parent {
                                Some(parent) => parent.parent_id,
                                None => return Err(DatabaseError::FolderNotFound(current)),
                            };
                        }
                    }

                    if new_parent != folder.parent_id || new_name != folder.name {
                        let mut names = write_txn.open_table(FOLDER_NAMES)?;
                        let new_key = sibling_key(new_parent.as_deref(), &new_name);
                        let taken = names
                            .get(new_key.as_str())?
                            .map(|v| v.value() != id)
                            .unwrap_or(false);
                        if taken {
                            return Err(DatabaseError::NameTaken(new_name));
                        }
                        names.remove(
                            sibling_key(folder.parent_id.as_deref(), &folder.name).as_str(),
                        )?;
                        names.insert(new_key.as_str(), id)?;

                        folder.parent_id = new_parent;
                        folder.name = new_name;
                    }

                    if let Some(d) = update.description.as_option() {
                        folder.description = d.cloned();
                    }
                    folder.updated_at = Utc::now();

                    table.insert(id, encode(&folder)?.as_slice())?;
                    Some(folder)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    pub fn get_all_folders(&self) -> Result<Vec<FolderRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FOLDERS)?;

        let mut folders = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            folders.push(decode(value.value())?);
        }
        Ok(folders)
    }

    /// Folders directly inside `parent_id`.
    pub fn child_folders(&self, parent_id: &str) -> Result<Vec<FolderRecord>, DatabaseError> {
        Ok(self
            .get_all_folders()?
            .into_iter()
            .filter(|f| f.parent_id.as_deref() == Some(parent_id))
            .collect())
    }

    /// The chain from the top-most ancestor down to `id`, inclusive.
    pub fn folder_chain(&self, id: &str) -> Result<Vec<FolderRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FOLDERS)?;

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(id.to_string());
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                break;
            }
            let folder: FolderRecord = match table.get(current.as_str())? {
                Some(data) => decode(data.value())?,
                None => return Err(DatabaseError::FolderNotFound(current)),
            };
            cursor = folder.parent_id.clone();
            chain.push(folder);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Delete a single folder row with its name index and owner rows.
    /// Children are not touched; cascading is the caller's job.
    pub fn delete_folder_record(&self, id: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let folder: Option<FolderRecord> = {
            let table = write_txn.open_table(FOLDERS)?;
            let result = match table.get(id)? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };
            result
        };

        let deleted = match folder {
            Some(folder) => {
                {
                    let mut table = write_txn.open_table(FOLDERS)?;
                    table.remove(id)?;
                }
                {
                    let mut names = write_txn.open_table(FOLDER_NAMES)?;
                    names.remove(sibling_key(folder.parent_id.as_deref(), &folder.name).as_str())?;
                }
                if folder.is_root {
                    let mut root = write_txn.open_table(FOLDER_ROOT)?;
                    root.remove(ROOT_KEY)?;
                }
                remove_owner_rows(&write_txn, FOLDER_OWNERS, id)?;
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }
}

impl FolderUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.parent_id.is_none() && matches!(self.description, Patch::Absent)
    }
}
