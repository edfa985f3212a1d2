//! Process-wide optional "connected wallet" descriptor (spec §6).
//!
//! A convenience layered on top of the core model, not required by it: a
//! `Wrapper` configured with `KeySource::ConnectOnDemand` or
//! `KeySource::InjectedProvider` reads this cell rather than holding its
//! own key material. Grounded in the teacher's own use of
//! `once_cell::sync::Lazy` for shared process-wide state (`signing.rs`'s
//! `CONTEXT`).

use ethereum_types::Address;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Where a connected wallet's signing capability actually lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletSource {
    /// An externally injected provider (e.g. a browser extension) is the
    /// signer of record.
    InjectedProvider,
    /// A wallet was connected on demand, in response to the first call
    /// that needed one.
    ConnectedOnDemand,
}

/// A connected wallet: its address and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedWallet {
    pub address: Address,
    pub source: WalletSource,
}

static CONNECTED: Lazy<RwLock<Option<ConnectedWallet>>> = Lazy::new(|| RwLock::new(None));

/// Record the process-wide connected wallet.
pub fn connect(address: Address, source: WalletSource) {
    *CONNECTED.write() = Some(ConnectedWallet { address, source });
}

/// Clear the process-wide connected wallet, if any.
pub fn disconnect() {
    *CONNECTED.write() = None;
}

/// The currently connected wallet, if one has been connected.
pub fn current() -> Option<ConnectedWallet> {
    *CONNECTED.read()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_then_disconnect_round_trips() {
        disconnect();
        assert_eq!(current(), None);
        let address = Address::repeat_byte(7);
        connect(address, WalletSource::InjectedProvider);
        assert_eq!(current(), Some(ConnectedWallet { address, source: WalletSource::InjectedProvider }));
        disconnect();
        assert_eq!(current(), None);
    }
}
