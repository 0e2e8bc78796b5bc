use redb::TableDefinition;

/// File records: uuid -> FileRecord (msgpack)
pub const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Content-addressing index: sha256 hex -> file uuid
pub const FILE_HASHES: TableDefinition<&str, &str> = TableDefinition::new("file_hashes");

/// Sibling name index: "{parent_id}/{name}" -> file uuid
pub const FILE_NAMES: TableDefinition<&str, &str> = TableDefinition::new("file_names");

/// Folder records: uuid -> FolderRecord (msgpack)
pub const FOLDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("folders");

/// Sibling name index: "{parent_id}/{name}" -> folder uuid
pub const FOLDER_NAMES: TableDefinition<&str, &str> = TableDefinition::new("folder_names");

/// Singleton row holding the root folder id under [`ROOT_KEY`]
pub const FOLDER_ROOT: TableDefinition<&str, &str> = TableDefinition::new("folder_root");

/// File ownership: "{file_id}/{user_id}" -> OwnerRecord (msgpack)
pub const FILE_OWNERS: TableDefinition<&str, &[u8]> = TableDefinition::new("file_owners");

/// Folder ownership: "{folder_id}/{user_id}" -> OwnerRecord (msgpack)
pub const FOLDER_OWNERS: TableDefinition<&str, &[u8]> = TableDefinition::new("folder_owners");

pub const ROOT_KEY: &str = "root";

/// Key for the sibling name indexes. Unparented nodes share the "" parent.
pub fn sibling_key(parent_id: Option<&str>, name: &str) -> String {
    format!("{}/{}", parent_id.unwrap_or(""), name)
}

/// Key for the ownership tables.
pub fn owner_key(node_id: &str, user_id: &str) -> String {
    format!("{node_id}/{user_id}")
}
