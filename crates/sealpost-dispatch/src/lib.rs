pub mod builder;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lane;
pub mod memory;
pub mod metadata;
pub mod mime;
pub mod model;
pub mod plaintext;
pub mod wire;

pub use builder::PackageBuilder;
pub use collaborators::{AttachmentFetcher, LocalStateReconciler, RecipientPolicyProvider, Transport};
pub use config::{ConfigError, DispatchConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher, Phase};
pub use error::{
    BuilderError, DispatchError, FetchError, MetadataError, PolicyError, ReconcileError,
    TransportError,
};
pub use lane::{Lane, LanePlan};
pub use metadata::{DispatchMetadata, MetadataPreparer, PreparedAttachment};
pub use model::{
    Address, AttachmentRef, AuthContext, MimeType, PendingSend, Scheme, SendPreference,
    SendReceipt, SendTiming, SenderContext, StoredMessage,
};
pub use wire::{MessagePackage, WireRequest};
