//! Services module
//!
//! Business logic services that coordinate between the remote store,
//! the repository and local receipt storage.

pub mod assembler;
pub mod backup;
pub mod import;
pub mod settings;
pub mod subscription;

pub use assembler::BackupAssembler;
pub use backup::{BackupLifecycleController, DeletePolicy};
pub use import::{ImportFailure, ImportReconciler, ImportReport, ImportStage};
pub use settings::{BackupSettings, ProviderSignIn, SettingsService, SyncProvider};
pub use subscription::{SubscriptionService, SubscriptionValidation};
