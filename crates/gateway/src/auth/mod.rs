//! Authorization components: token service and access resolver.

pub mod resolver;
pub mod tokens;

pub use resolver::{
    AccessRecord, AccessRecordStore, AccessResolver, KvAccessRecords, ProtectionKind,
    ResolverSettings,
};
pub use tokens::{TokenError, TokenService};
