use chia_bls::{
    master_to_wallet_hardened_intermediate, master_to_wallet_unhardened_intermediate,
    DerivableKey, PublicKey, SecretKey,
};
use chia_puzzle_types::DeriveSynthetic;

use crate::{Result, WalletError};

/// Derivation indices at or above this value are reserved for hardened BIP-32 steps.
pub const MAX_DERIVATION_INDEX: u32 = 1 << 31;

/// Derives the synthetic keys behind every puzzle hash of the wallet.
///
/// There are two sequences. The unhardened one can be derived from the master
/// public key alone, which is what allows watch-only wallets to scan for coins.
/// The hardened one requires the master secret key.
#[derive(Debug, Clone)]
pub struct KeyDerivation {
    master_public_key: PublicKey,
    unhardened_public_key: PublicKey,
    unhardened_secret_key: Option<SecretKey>,
    hardened_secret_key: Option<SecretKey>,
}

impl KeyDerivation {
    pub fn from_secret_key(master_secret_key: &SecretKey) -> Self {
        let unhardened_secret_key = master_to_wallet_unhardened_intermediate(master_secret_key);

        Self {
            master_public_key: master_secret_key.public_key(),
            unhardened_public_key: unhardened_secret_key.public_key(),
            unhardened_secret_key: Some(unhardened_secret_key),
            hardened_secret_key: Some(master_to_wallet_hardened_intermediate(master_secret_key)),
        }
    }

    pub fn watch_only(master_public_key: PublicKey) -> Self {
        Self {
            master_public_key,
            unhardened_public_key: master_to_wallet_unhardened_intermediate(&master_public_key),
            unhardened_secret_key: None,
            hardened_secret_key: None,
        }
    }

    pub fn is_watch_only(&self) -> bool {
        self.hardened_secret_key.is_none()
    }

    pub fn master_public_key(&self) -> PublicKey {
        self.master_public_key
    }

    /// The synthetic public key at an index.
    pub fn public_key(&self, index: u32, hardened: bool) -> Result<PublicKey> {
        check_index(index)?;

        if hardened {
            Ok(self.secret_key(index, true)?.public_key())
        } else {
            Ok(self
                .unhardened_public_key
                .derive_unhardened(index)
                .derive_synthetic())
        }
    }

    /// The synthetic secret key at an index.
    pub fn secret_key(&self, index: u32, hardened: bool) -> Result<SecretKey> {
        check_index(index)?;

        let intermediate = if hardened {
            &self.hardened_secret_key
        } else {
            &self.unhardened_secret_key
        };

        let Some(intermediate) = intermediate else {
            return Err(WalletError::WatchOnly);
        };

        let secret_key = if hardened {
            intermediate.derive_hardened(index)
        } else {
            intermediate.derive_unhardened(index)
        };

        Ok(secret_key.derive_synthetic())
    }
}

fn check_index(index: u32) -> Result<()> {
    if index >= MAX_DERIVATION_INDEX {
        return Err(WalletError::InvalidDerivationIndex(index));
    }
    Ok(())
}
