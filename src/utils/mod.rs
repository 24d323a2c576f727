mod fs;
mod hash;

pub use fs::{
    append_extension, collect_files, ensure_parent, files_equal, relative_key,
    remove_empty_dirs,
};
pub use hash::{HashResult, compute_file_hash};
