use chrono::Utc;
use redb::{ReadableTable, TableDefinition, WriteTransaction};

use super::db::{decode, encode, Database, DatabaseError};
use super::models::{OwnerRecord, Permission};
use super::tables::*;

type OwnerTable = TableDefinition<'static, &'static str, &'static [u8]>;

impl Database {
    // ========================================================================
    // Ownership mappings
    // ========================================================================

    /// Share a file with a user, or change the permission of an existing share.
    pub fn grant_file_owner(
        &self,
        file_id: &str,
        user_id: &str,
        permission: Permission,
    ) -> Result<OwnerRecord, DatabaseError> {
        self.grant(FILES, FILE_OWNERS, file_id, user_id, permission)
            .and_then(|r| r.ok_or_else(|| DatabaseError::FileNotFound(file_id.to_string())))
    }

    pub fn revoke_file_owner(&self, file_id: &str, user_id: &str) -> Result<bool, DatabaseError> {
        self.revoke(FILE_OWNERS, file_id, user_id)
    }

    pub fn file_owners(&self, file_id: &str) -> Result<Vec<OwnerRecord>, DatabaseError> {
        self.owners(FILE_OWNERS, file_id)
    }

    /// Share a folder with a user, or change the permission of an existing share.
    pub fn grant_folder_owner(
        &self,
        folder_id: &str,
        user_id: &str,
        permission: Permission,
    ) -> Result<OwnerRecord, DatabaseError> {
        self.grant(FOLDERS, FOLDER_OWNERS, folder_id, user_id, permission)
            .and_then(|r| r.ok_or_else(|| DatabaseError::FolderNotFound(folder_id.to_string())))
    }

    pub fn revoke_folder_owner(
        &self,
        folder_id: &str,
        user_id: &str,
    ) -> Result<bool, DatabaseError> {
        self.revoke(FOLDER_OWNERS, folder_id, user_id)
    }

    pub fn folder_owners(&self, folder_id: &str) -> Result<Vec<OwnerRecord>, DatabaseError> {
        self.owners(FOLDER_OWNERS, folder_id)
    }

    fn grant(
        &self,
        nodes: OwnerTable,
        owners: OwnerTable,
        node_id: &str,
        user_id: &str,
        permission: Permission,
    ) -> Result<Option<OwnerRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let record = {
            let node_table = write_txn.open_table(nodes)?;
            if node_table.get(node_id)?.is_none() {
                return Ok(None);
            }

            let mut table = write_txn.open_table(owners)?;
            let key = owner_key(node_id, user_id);
            let existing: Option<OwnerRecord> = match table.get(key.as_str())? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };

            let record = match existing {
                Some(mut record) => {
                    record.permission = permission;
                    record
                }
                None => OwnerRecord {
                    node_id: node_id.to_string(),
                    user_id: user_id.to_string(),
                    permission,
                    created_at: Utc::now(),
                },
            };
            table.insert(key.as_str(), encode(&record)?.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(Some(record))
    }

    fn revoke(
        &self,
        owners: OwnerTable,
        node_id: &str,
        user_id: &str,
    ) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(owners)?;
            let removed = table.remove(owner_key(node_id, user_id).as_str())?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    fn owners(&self, owners: OwnerTable, node_id: &str) -> Result<Vec<OwnerRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(owners)?;
        let prefix = format!("{node_id}/");

        let mut records = Vec::new();
        for result in table.range(prefix.as_str()..)? {
            let (key, value) = result?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            records.push(decode(value.value())?);
        }
        Ok(records)
    }
}

/// Remove every ownership row of a node inside an open write transaction.
pub(crate) fn remove_owner_rows(
    write_txn: &WriteTransaction,
    owners: OwnerTable,
    node_id: &str,
) -> Result<(), DatabaseError> {
    let prefix = format!("{node_id}/");
    let mut table = write_txn.open_table(owners)?;

    let keys: Vec<String> = {
        let mut keys = Vec::new();
        for result in table.range(prefix.as_str()..)? {
            let (key, _) = result?;
            let key = key.value().to_string();
            if !key.starts_with(&prefix) {
                break;
            }
            keys.push(key);
        }
        keys
    };

    for key in keys {
        table.remove(key.as_str())?;
    }
    Ok(())
}
