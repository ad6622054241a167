pub mod config;
pub mod error;
pub mod progress;
pub mod remote;
pub mod schema;
pub mod table_sync;
pub mod version;

pub use config::Config;
pub use error::{Result, SheetSyncError};
pub use progress::{NoProgress, ProgressSink};
pub use remote::{
    CommitBatch, CommitEntry, Credentials, RemoteBackend, RemoteLayout, UserIdentity,
};
pub use schema::{ColumnSpec, DeclaredType, EnumAccumulator, SheetSchema};
pub use version::{ArtifactVersion, VersionRegistry};
