//! Token lifecycle and OAuth callback handling
//!
//! This module owns everything credential-shaped: encryption of tokens at
//! rest, the best-effort in-process token cache, the token manager that
//! keeps access tokens fresh, and the OAuth callback handler that turns
//! authorization codes into stored integrations.

pub mod cache;
pub mod crypto;
pub mod manager;
pub mod oauth;

pub use cache::{CachedToken, InMemoryTokenCache, TokenCache};
pub use crypto::TokenCipher;
pub use manager::TokenManager;
pub use oauth::{CallbackOutcome, OauthHandler};
