// Error types shared by every layer
pub mod error;

// TOML/env configuration
pub mod config;

// OAuth2 provider descriptors and registry
pub mod provider;

// Credential entity and token endpoint client
pub mod credential;

// Authenticated encryption for stored entries
pub mod cipher;

// Backing key-value stores
pub mod store;

// Encrypted, self-refreshing credential cache
pub mod vault;

pub use cipher::CipherCodec;
pub use credential::Credential;
pub use error::VaultError;
pub use provider::ProviderDescriptor;
pub use store::{KeyValueStore, MemoryStore};
pub use vault::Vault;
