pub mod ai;
mod error;
mod identity;
pub mod model;
pub mod patch;
pub mod store;
mod sync;
mod traits;
pub mod tree;
pub mod wire;

pub use error::{AuthError, GenerationError, StoreError};
pub use identity::StaticTokenVerifier;
pub use model::{ChatMessage, Identity, Project, ProjectId, ProjectMeta, Sender, UserId};
pub use patch::{interpret, CommandSpec, PatchEnvelope};
pub use sync::{SyncOutcome, TreeSync};
pub use traits::{AiCollaborator, IdentityVerifier, ProjectStore};
pub use tree::merge::{merge, MergeStats};
pub use tree::{FlatNode, FlatTree, NestedNode, NestedTree};
