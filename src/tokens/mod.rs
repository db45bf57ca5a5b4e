//! OAuth tokens issued by domain users: collection, reporting and revocation.

pub mod gather;
pub mod revoker;
pub mod scopes;
pub mod stats;

pub use gather::{gather_token_stats, GatherOptions};
pub use revoker::{revoke_client_for_domain, DomainRevocationOptions, TokenRevoker};
pub use scopes::lookup_scope;
pub use stats::{read_token_stats, summarize_token_stats, TokenStats};
