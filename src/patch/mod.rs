mod apply;
mod bundle;
mod finalize;
mod generate;
mod layout;
mod manifest;
mod package;
mod show;
mod verify;

pub use apply::{
    ApplyJob, ApplyOptions, ApplyReport, apply_patches, apply_single, discover_artifacts,
};
pub use bundle::{pack_additional, unpack_additional};
pub use finalize::{DeletionReport, apply_deletions};
pub use generate::{DiffJob, GenerateOptions, GenerateReport, generate_patches};
pub use layout::PatchLayout;
pub use manifest::{Checksums, Metadata, ModifiedChecksum, PATCH_FORMAT};
pub use package::{
    BuildOptions, BuildReport, InstallOptions, InstallReport, build_package, install_package,
};
pub use show::show_package;
pub use verify::{VerifyJob, VerifyOptions, VerifyReport, verify_patches};
