mod admin;
mod content;
mod files;
mod folders;
mod owners;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

pub use admin::{admin_purge, health};
pub use content::serve_content;
pub use files::{create_file, delete_file, get_file, import_file, list_files, update_file};
pub use folders::{create_folder, delete_folder, get_folder, get_root_folder, update_folder};
pub use owners::{
    grant_file_owner, grant_folder_owner, list_file_owners, list_folder_owners,
    revoke_file_owner, revoke_folder_owner,
};

/// Distinguishes between a missing field (`None`) and an explicit `null` (`Some(None)`).
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: DeserializeOwned,
    D: Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}
