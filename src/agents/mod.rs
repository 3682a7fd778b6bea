pub mod entry_loader;
pub mod version_patcher;

pub use entry_loader::{DEFAULT_ITEM_TYPE, EntryLoaderAgent};
pub use version_patcher::{
    EntryOutcome, FileVersionEntry, PatchResult, SkipReason, VersionPatcher,
};
