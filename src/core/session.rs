//! Wallet Session
//!
//! Explicit connection state machine for the wallet identity used by human
//! auditors:
//!
//! ```text
//! Disconnected ──begin──▶ Connecting ──complete──▶ Connected
//!       ▲                     │                        │
//!       └──── cancel/fail ────┘◀────── disconnect ─────┘
//! ```
//!
//! The wallet flow itself lives behind `IdentityProvider`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{AppError, AppResult, ErrorCode, StacksNetwork};
use crate::providers::clarity::c32_address_decode;
use crate::utils::constants::{
    C32_VERSION_MAINNET_MULTISIG, C32_VERSION_MAINNET_SINGLESIG, C32_VERSION_TESTNET_MULTISIG,
    C32_VERSION_TESTNET_SINGLESIG,
};

/// External wallet / identity library
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Run the provider's connect flow; returns the wallet's STX address
    async fn request_identity(&self) -> AppResult<String>;

    /// Tell the provider the session ended
    async fn revoke(&self, address: &str) -> AppResult<()>;
}

/// Connected wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletIdentity {
    pub address: String,
    pub network: StacksNetwork,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting { provider: String },
    Connected(WalletIdentity),
}

impl SessionState {
    fn label(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting { .. } => "connecting",
            SessionState::Connected(_) => "connected",
        }
    }
}

pub struct WalletSession {
    state: SessionState,
}

impl Default for WalletSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn identity(&self) -> Option<&WalletIdentity> {
        match &self.state {
            SessionState::Connected(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected(_))
    }

    fn invalid(&self, action: &str) -> AppError {
        AppError::new(
            ErrorCode::SessionInvalidTransition,
            format!("Cannot {} while {}", action, self.state.label()),
        )
    }

    /// Disconnected → Connecting
    pub fn begin(&mut self, provider: &str) -> AppResult<()> {
        if self.state != SessionState::Disconnected {
            return Err(self.invalid("connect"));
        }
        self.state = SessionState::Connecting {
            provider: provider.to_string(),
        };
        Ok(())
    }

    /// Connecting → Connected. A bad address drops back to Disconnected.
    pub fn complete(&mut self, address: &str) -> AppResult<&WalletIdentity> {
        if !matches!(self.state, SessionState::Connecting { .. }) {
            return Err(self.invalid("complete a connection"));
        }

        let network = match c32_address_decode(address).and_then(|(version, _)| network_for_version(version)) {
            Ok(network) => network,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };

        self.state = SessionState::Connected(WalletIdentity {
            address: address.to_string(),
            network,
            connected_at: Utc::now(),
        });
        info!("🔗 Wallet connected: {} ({})", address, network.name());

        match &self.state {
            SessionState::Connected(identity) => Ok(identity),
            _ => Err(self.invalid("complete a connection")),
        }
    }

    /// Connecting → Disconnected (user cancel or provider error)
    pub fn cancel(&mut self) -> AppResult<()> {
        if !matches!(self.state, SessionState::Connecting { .. }) {
            return Err(self.invalid("cancel"));
        }
        self.state = SessionState::Disconnected;
        Ok(())
    }

    /// Drive the whole connect flow through `provider`
    pub async fn connect(&mut self, provider: &dyn IdentityProvider) -> AppResult<WalletIdentity> {
        self.begin(provider.name())?;
        match provider.request_identity().await {
            Ok(address) => self.complete(&address).cloned(),
            Err(e) => {
                warn!("⚠️ Wallet connect via {} failed: {}", provider.name(), e);
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Connected → Disconnected. The session ends even if revoke fails.
    pub async fn disconnect(&mut self, provider: &dyn IdentityProvider) -> AppResult<()> {
        let address = match &self.state {
            SessionState::Connected(identity) => identity.address.clone(),
            _ => return Err(self.invalid("disconnect")),
        };
        self.state = SessionState::Disconnected;
        info!("🔌 Wallet disconnected: {}", address);
        provider.revoke(&address).await
    }
}

fn network_for_version(version: u8) -> AppResult<StacksNetwork> {
    match version {
        C32_VERSION_MAINNET_SINGLESIG | C32_VERSION_MAINNET_MULTISIG => Ok(StacksNetwork::Mainnet),
        C32_VERSION_TESTNET_SINGLESIG | C32_VERSION_TESTNET_MULTISIG => Ok(StacksNetwork::Testnet),
        other => Err(AppError::invalid_identity(format!(
            "Unknown Stacks address version {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    const MAINNET: &str = "SP000000000000000000002Q6VF78";
    const TESTNET: &str = "ST000000000000000000002AMW42H";

    struct MockProvider {
        reply: AppResult<String>,
        revoked: AtomicU64,
    }

    impl MockProvider {
        fn ok(address: &str) -> Self {
            Self {
                reply: Ok(address.to_string()),
                revoked: AtomicU64::new(0),
            }
        }

        fn rejecting() -> Self {
            Self {
                reply: Err(AppError::new(ErrorCode::Unknown, "user rejected")),
                revoked: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn request_identity(&self) -> AppResult<String> {
            match &self.reply {
                Ok(a) => Ok(a.clone()),
                Err(e) => Err(AppError::new(e.code, e.message.clone())),
            }
        }

        async fn revoke(&self, _address: &str) -> AppResult<()> {
            self.revoked.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let provider = MockProvider::ok(MAINNET);
        let mut session = WalletSession::new();

        let identity = session.connect(&provider).await.unwrap();
        assert_eq!(identity.network, StacksNetwork::Mainnet);
        assert!(session.is_connected());

        session.disconnect(&provider).await.unwrap();
        assert_eq!(session.state(), &SessionState::Disconnected);
        assert_eq!(provider.revoked.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_provider_error_returns_to_disconnected() {
        let mut session = WalletSession::new();
        assert!(session.connect(&MockProvider::rejecting()).await.is_err());
        assert_eq!(session.state(), &SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_bad_address_returns_to_disconnected() {
        let mut session = WalletSession::new();
        assert!(session.connect(&MockProvider::ok("not-an-address")).await.is_err());
        assert_eq!(session.state(), &SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unknown_address_version_rejected() {
        // Checksum-valid, but version 0 belongs to no network
        let address = crate::providers::clarity::c32_address(0, &[7u8; 20]).unwrap();
        let mut session = WalletSession::new();
        let err = session.connect(&MockProvider::ok(&address)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::IdentityInvalid);
        assert_eq!(session.state(), &SessionState::Disconnected);
    }

    #[test]
    fn test_manual_transitions() {
        let mut session = WalletSession::new();
        session.begin("leather").unwrap();
        assert!(session.begin("leather").is_err());
        session.cancel().unwrap();
        assert!(session.cancel().is_err());

        session.begin("leather").unwrap();
        let identity = session.complete(TESTNET).unwrap();
        assert_eq!(identity.network, StacksNetwork::Testnet);
        let err = session.begin("leather").unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionInvalidTransition);
    }

    #[tokio::test]
    async fn test_disconnect_requires_connection() {
        let mut session = WalletSession::new();
        let err = session.disconnect(&MockProvider::ok(MAINNET)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionInvalidTransition);
    }
}
