use std::collections::HashSet;

use chrono::Utc;
use redb::{ReadableTable, Table, WriteTransaction};

use super::db::{decode, encode, Database, DatabaseError};
use super::models::{FileRecord, FileUpdate, Patch, Release};
use super::owners::remove_owner_rows;
use super::tables::*;

impl Database {
    // ========================================================================
    // File operations
    // ========================================================================

    /// Store a new file record and index its hash and sibling name.
    ///
    /// Fails with [`DatabaseError::HashConflict`] when another record already
    /// holds the same content hash. A taken sibling name is suffixed with
    /// ` (n)` instead of failing; the stored record is returned.
    pub fn insert_file(&self, file: &FileRecord) -> Result<FileRecord, DatabaseError> {
        debug_assert!(!file.id.is_empty(), "file id must not be empty");
        debug_assert!(file.references >= 1, "stored files hold a reference");

        let write_txn = self.begin_write()?;
        let stored = {
            let mut hashes = write_txn.open_table(FILE_HASHES)?;
            let existing = hashes
                .get(file.hash.as_str())?
                .map(|v| v.value().to_string());
            if let Some(existing) = existing {
                return Err(DatabaseError::HashConflict { existing });
            }

            if let Some(ref parent_id) = file.parent_id {
                let folders = write_txn.open_table(FOLDERS)?;
                if folders.get(parent_id.as_str())?.is_none() {
                    return Err(DatabaseError::FolderNotFound(parent_id.clone()));
                }
            }

            let mut names = write_txn.open_table(FILE_NAMES)?;
            let mut stored = file.clone();
            stored.name = unique_name(&names, file.parent_id.as_deref(), &file.name)?;
            names.insert(
                sibling_key(stored.parent_id.as_deref(), &stored.name).as_str(),
                stored.id.as_str(),
            )?;
            hashes.insert(stored.hash.as_str(), stored.id.as_str())?;

            let mut table = write_txn.open_table(FILES)?;
            table.insert(stored.id.as_str(), encode(&stored)?.as_slice())?;
            stored
        };
        write_txn.commit()?;
        Ok(stored)
    }

    /// Get a file by its UUID
    pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        match table.get(id)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Dedup lookup: the file currently holding this content hash.
    pub fn find_file_by_hash(&self, hash: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let hashes = read_txn.open_table(FILE_HASHES)?;

        let id = match hashes.get(hash)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let files = read_txn.open_table(FILES)?;
        match files.get(id.as_str())? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    /// Get all file records
    pub fn get_all_files(&self) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        let mut files = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            files.push(decode(value.value())?);
        }

        Ok(files)
    }

    /// Ids of every file record, i.e. every backend key that is in use.
    pub fn get_all_file_ids(&self) -> Result<HashSet<String>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;

        let ids = table
            .iter()?
            .map(|r| r.map(|(k, _)| k.value().to_string()))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Files directly inside a folder. `None` lists unparented files.
    pub fn files_in(&self, parent_id: Option<&str>) -> Result<Vec<FileRecord>, DatabaseError> {
        Ok(self
            .get_all_files()?
            .into_iter()
            .filter(|f| f.parent_id.as_deref() == parent_id)
            .collect())
    }

    /// Dedup lookup and reference in one transaction: the file currently
    /// indexed under `hash` gains a reference and is returned.
    ///
    /// A file whose last reference was released is no longer indexed, so it
    /// can't be picked up here while its bytes are being deleted.
    pub fn reference_by_hash(&self, hash: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let referenced = {
            let hashes = write_txn.open_table(FILE_HASHES)?;
            let id = match hashes.get(hash)? {
                Some(data) => data.value().to_string(),
                None => return Ok(None),
            };

            let mut table = write_txn.open_table(FILES)?;
            let existing: Option<FileRecord> = match table.get(id.as_str())? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };
            match existing {
                Some(mut file) => {
                    file.references += 1;
                    file.updated_at = Utc::now();
                    table.insert(id.as_str(), encode(&file)?.as_slice())?;
                    Some(file)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(referenced)
    }

    /// Atomically bump the download counter. Returns the new count.
    pub fn increment_downloads(&self, id: &str) -> Result<Option<u64>, DatabaseError> {
        let file = self.modify_file(id, |f| f.downloads += 1)?;
        Ok(file.map(|f| f.downloads))
    }

    /// Atomically drop one reference unless it is the last one.
    ///
    /// On [`Release::Last`] the record stays but leaves the hash index in the
    /// same transaction, so no upload can dedup against it any more.
    pub fn release_reference(&self, id: &str) -> Result<Option<Release>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(FILES)?;
            let existing: Option<FileRecord> = match table.get(id)? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };

            match existing {
                Some(mut file) if file.references > 1 => {
                    file.references -= 1;
                    file.updated_at = Utc::now();
                    table.insert(id, encode(&file)?.as_slice())?;
                    Some(Release::Remaining(file.references))
                }
                Some(file) => {
                    unindex_hash(&write_txn, &file)?;
                    Some(Release::Last)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Take a file out of the hash index regardless of its references.
    /// Returns the record, or `None` if it does not exist.
    pub fn retire_file(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let retired: Option<FileRecord> = {
            let table = write_txn.open_table(FILES)?;
            let data = table.get(id)?;
            match data {
                Some(data) => Some(decode(data.value())?),
                None => None,
            }
        };
        if let Some(ref file) = retired {
            unindex_hash(&write_txn, file)?;
        }
        write_txn.commit()?;
        Ok(retired)
    }

    /// Move, rename or describe a file.
    pub fn update_file(
        &self,
        id: &str,
        update: &FileUpdate,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(FILES)?;
            let existing: Option<FileRecord> = match table.get(id)? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };

            match existing {
                Some(mut file) => {
                    let new_parent = match &update.parent_id {
                        Patch::Absent => file.parent_id.clone(),
                        Patch::Null => None,
                        Patch::Value(p) => Some(p.clone()),
                    };
                    let new_name = update.name.clone().unwrap_or_else(|| file.name.clone());

                    if new_parent != file.parent_id || new_name != file.name {
                        if let Some(ref parent_id) = new_parent {
                            let folders = write_txn.open_table(FOLDERS)?;
                            if folders.get(parent_id.as_str())?.is_none() {
                                return Err(DatabaseError::FolderNotFound(parent_id.clone()));
                            }
                        }

                        let mut names = write_txn.open_table(FILE_NAMES)?;
                        let new_key = sibling_key(new_parent.as_deref(), &new_name);
                        let taken = names
                            .get(new_key.as_str())?
                            .map(|v| v.value() != id)
                            .unwrap_or(false);
                        if taken {
                            return Err(DatabaseError::NameTaken(new_name));
                        }
                        names.remove(sibling_key(file.parent_id.as_deref(), &file.name).as_str())?;
                        names.insert(new_key.as_str(), id)?;

                        file.parent_id = new_parent;
                        file.name = new_name;
                    }

                    if let Some(d) = update.description.as_option() {
                        file.description = d.cloned();
                    }
                    file.updated_at = Utc::now();

                    table.insert(id, encode(&file)?.as_slice())?;
                    Some(file)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// Move a file under `parent_id`, suffixing its name if a sibling
    /// already holds it.
    pub fn rehome_file(
        &self,
        id: &str,
        parent_id: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let moved = {
            let folders = write_txn.open_table(FOLDERS)?;
            if folders.get(parent_id)?.is_none() {
                return Err(DatabaseError::FolderNotFound(parent_id.to_string()));
            }

            let mut table = write_txn.open_table(FILES)?;
            let existing: Option<FileRecord> = match table.get(id)? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };

            match existing {
                Some(file) if file.parent_id.as_deref() == Some(parent_id) => Some(file),
                Some(mut file) => {
                    let mut names = write_txn.open_table(FILE_NAMES)?;
                    names.remove(sibling_key(file.parent_id.as_deref(), &file.name).as_str())?;
                    file.name = unique_name(&names, Some(parent_id), &file.name)?;
                    names.insert(sibling_key(Some(parent_id), &file.name).as_str(), id)?;

                    file.parent_id = Some(parent_id.to_string());
                    file.updated_at = Utc::now();
                    table.insert(id, encode(&file)?.as_slice())?;
                    Some(file)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(moved)
    }

    /// Delete a file record and clean up its hash, name and owner rows
    pub fn delete_file(&self, id: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let file: Option<FileRecord> = {
            let table = write_txn.open_table(FILES)?;
            let result = match table.get(id)? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };
            result
        };

        let deleted = match file {
            Some(file) => {
                {
                    let mut table = write_txn.open_table(FILES)?;
                    table.remove(id)?;
                }
                unindex_hash(&write_txn, &file)?;
                {
                    let mut names = write_txn.open_table(FILE_NAMES)?;
                    names.remove(sibling_key(file.parent_id.as_deref(), &file.name).as_str())?;
                }
                remove_owner_rows(&write_txn, FILE_OWNERS, id)?;
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }

    fn modify_file<F>(&self, id: &str, apply: F) -> Result<Option<FileRecord>, DatabaseError>
    where
        F: FnOnce(&mut FileRecord),
    {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(FILES)?;
            let existing: Option<FileRecord> = match table.get(id)? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };

            match existing {
                Some(mut file) => {
                    apply(&mut file);
                    file.updated_at = Utc::now();
                    table.insert(id, encode(&file)?.as_slice())?;
                    Some(file)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }
}

/// Drop the hash index row if it still points at `file`.
fn unindex_hash(write_txn: &WriteTransaction, file: &FileRecord) -> Result<(), DatabaseError> {
    let mut hashes = write_txn.open_table(FILE_HASHES)?;
    let indexed = hashes
        .get(file.hash.as_str())?
        .map(|v| v.value() == file.id)
        .unwrap_or(false);
    if indexed {
        hashes.remove(file.hash.as_str())?;
    }
    Ok(())
}

/// Pick a free sibling name, suffixing `name (n).ext` until one is unused.
pub(crate) fn unique_name(
    names: &Table<'_, &'static str, &'static str>,
    parent_id: Option<&str>,
    name: &str,
) -> Result<String, DatabaseError> {
    if names.get(sibling_key(parent_id, name).as_str())?.is_none() {
        return Ok(name.to_string());
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    let mut n = 1u32;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        if names.get(sibling_key(parent_id, &candidate).as_str())?.is_none() {
            return Ok(candidate);
        }
        n += 1;
    }
}
