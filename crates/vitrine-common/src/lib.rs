//! Common domain types shared across the vitrine pipeline crates.
//!
//! Everything here is chain- and storage-agnostic: chain identifiers,
//! normalized transfer events, token/contract/media model types, token URI
//! classification, schema-tolerant metadata access, and media-type sniffing.

pub mod chain;
pub mod codec;
pub mod media_type;
pub mod metadata;
pub mod token_uri;
pub mod types;

pub use chain::Chain;
pub use media_type::{sniff_media_type, MediaType};
pub use metadata::TokenMetadata;
pub use token_uri::{sanitize_json_string, TokenUri, UriType};
pub use types::{
    union_ownership_histories, AddressAtBlock, Contract, ContractOwnership, MediaRecord,
    OwnerMethod, Token, TokenType, TransferEvent,
};
