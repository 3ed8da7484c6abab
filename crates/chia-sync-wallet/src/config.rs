use chia_protocol::Bytes32;
use hex_literal::hex;

/// The genesis challenge of mainnet, which is also its `AGG_SIG_ME` additional data.
pub const MAINNET_GENESIS_CHALLENGE: Bytes32 = Bytes32::new(hex!(
    "ccd5bb71183532bff220ba46c268991a3ff07eb358e8255a65c30a2dce0e5fbb"
));

/// The genesis challenge of testnet11, which is also its `AGG_SIG_ME` additional data.
pub const TESTNET11_GENESIS_CHALLENGE: Bytes32 = Bytes32::new(hex!(
    "37a90eb5185a9c4439a91ddc98bbadce7b4feba060d50116a067de66bf236615"
));

/// Settings used while syncing and spending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// The minimum number of unused derivations kept for every wallet and sequence.
    pub lookahead_count: u32,

    /// Whether CAT wallets are created for asset ids we haven't seen before.
    pub automatically_add_unknown_cats: bool,

    /// Asset ids which always get a CAT wallet, even if unknown CATs are ignored.
    pub default_cats: Vec<Bytes32>,

    /// Used to recognize pool and farmer reward coins.
    pub genesis_challenge: Bytes32,

    /// Appended to the messages of `AGG_SIG_ME` and related conditions.
    pub agg_sig_me_additional_data: Bytes32,

    /// The maximum number of parent spends fetched while repairing CAT lineage in one pass.
    pub max_lineage_depth: u32,

    /// The maximum number of singleton successors followed from a single coin state.
    pub max_singleton_depth: u32,

    /// How far back to look for a transaction block when resolving a timestamp.
    pub timestamp_lookback: u32,

    /// How many heights are checked when deciding if a coin is a reward.
    pub reward_lookback: u32,
}

impl SyncConfig {
    pub fn mainnet() -> Self {
        Self::for_network(MAINNET_GENESIS_CHALLENGE)
    }

    pub fn testnet11() -> Self {
        Self::for_network(TESTNET11_GENESIS_CHALLENGE)
    }

    fn for_network(genesis_challenge: Bytes32) -> Self {
        Self {
            lookahead_count: 100,
            automatically_add_unknown_cats: false,
            default_cats: Vec::new(),
            genesis_challenge,
            agg_sig_me_additional_data: genesis_challenge,
            max_lineage_depth: 16,
            max_singleton_depth: 128,
            timestamp_lookback: 64,
            reward_lookback: 30,
        }
    }

    /// The parent coin id of the pool reward created at a height.
    pub fn pool_parent_id(&self, height: u32) -> Bytes32 {
        reward_parent_id(&self.genesis_challenge.to_bytes()[..16], height)
    }

    /// The parent coin id of the farmer reward created at a height.
    pub fn farmer_parent_id(&self, height: u32) -> Bytes32 {
        reward_parent_id(&self.genesis_challenge.to_bytes()[16..], height)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

fn reward_parent_id(prefix: &[u8], height: u32) -> Bytes32 {
    let mut bytes = [0; 32];
    bytes[..16].copy_from_slice(prefix);
    bytes[16..].copy_from_slice(&u128::from(height).to_be_bytes());
    Bytes32::new(bytes)
}
