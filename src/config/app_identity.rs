//! Constants identifying this application to external services and the OS
//! keychain.

/// Keychain/credential-store service name.
pub const KEYCHAIN_SERVICE: &str = "com.mesoclaw.core";

/// `HTTP-Referer` header OpenRouter asks API consumers to send.
pub const OPENROUTER_HTTP_REFERER: &str = "https://mesoclaw.ai";

/// `X-Title` header OpenRouter displays for attributed requests.
pub const OPENROUTER_TITLE: &str = "MesoClaw";
