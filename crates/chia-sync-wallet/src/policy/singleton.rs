use chia_protocol::{Bytes, Bytes32, CoinState};
use chia_sync_driver::singleton_successor;
use chia_traits::Streamable;

use crate::Result;

/// A wallet that follows one singleton from its launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingletonPolicy {
    wallet_id: u32,
    launcher_id: Bytes32,
    launch_height: u32,
}

impl SingletonPolicy {
    pub fn new(wallet_id: u32, launcher_id: Bytes32, launch_height: u32) -> Self {
        Self {
            wallet_id,
            launcher_id,
            launch_height,
        }
    }

    pub fn from_state(wallet_id: u32, data: &Bytes) -> Result<Self> {
        let (launcher_id, launch_height) = <(Bytes32, u32)>::from_bytes(data.as_ref())?;
        Ok(Self::new(wallet_id, launcher_id, launch_height))
    }

    pub fn state(&self) -> Result<Bytes> {
        Ok((self.launcher_id, self.launch_height).to_bytes()?.into())
    }

    pub fn wallet_id(&self) -> u32 {
        self.wallet_id
    }

    pub fn launcher_id(&self) -> Bytes32 {
        self.launcher_id
    }

    pub fn launch_height(&self) -> u32 {
        self.launch_height
    }

    pub fn successor(&self, children: &[CoinState]) -> Option<CoinState> {
        let coins: Vec<_> = children.iter().map(|state| state.coin).collect();
        let next = singleton_successor(&coins)?;
        children.iter().find(|state| state.coin == next).cloned()
    }
}
