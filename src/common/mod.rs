//! Filesystem staging shared across shardimg modules.

pub mod files;
pub mod paths;

pub use files::{append_file, copy_directory, copy_file, create_file, delete_file, read_file, write_file};
pub use paths::{create_directory, in_root_path, is_suid, resolve_in_root, resolve_symlink};
