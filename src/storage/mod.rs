pub mod db;
mod files;
mod folders;
pub mod models;
mod owners;
mod tables;

pub use db::{Database, DatabaseError};
pub use tables::*;
