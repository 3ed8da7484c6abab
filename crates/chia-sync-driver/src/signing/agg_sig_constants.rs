use chia_protocol::Bytes32;
use chia_sha2::Sha256;

/// The additional data appended to each kind of `AGG_SIG_*` message on a given network.
///
/// Only `AGG_SIG_ME` uses the network's additional data directly. Every other kind
/// uses the hash of that data followed by its opcode, so that a signature for one
/// kind can't be replayed as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggSigConstants {
    me: Bytes32,
    parent: Bytes32,
    puzzle: Bytes32,
    amount: Bytes32,
    puzzle_amount: Bytes32,
    parent_amount: Bytes32,
    parent_puzzle: Bytes32,
}

impl AggSigConstants {
    pub fn new(agg_sig_me: Bytes32) -> Self {
        Self {
            me: agg_sig_me,
            parent: domain(agg_sig_me, 43),
            puzzle: domain(agg_sig_me, 44),
            amount: domain(agg_sig_me, 45),
            puzzle_amount: domain(agg_sig_me, 46),
            parent_amount: domain(agg_sig_me, 47),
            parent_puzzle: domain(agg_sig_me, 48),
        }
    }

    pub fn me(&self) -> Bytes32 {
        self.me
    }

    pub fn parent(&self) -> Bytes32 {
        self.parent
    }

    pub fn puzzle(&self) -> Bytes32 {
        self.puzzle
    }

    pub fn amount(&self) -> Bytes32 {
        self.amount
    }

    pub fn puzzle_amount(&self) -> Bytes32 {
        self.puzzle_amount
    }

    pub fn parent_amount(&self) -> Bytes32 {
        self.parent_amount
    }

    pub fn parent_puzzle(&self) -> Bytes32 {
        self.parent_puzzle
    }
}

fn domain(agg_sig_me: Bytes32, opcode: u8) -> Bytes32 {
    let mut hasher = Sha256::new();
    hasher.update(agg_sig_me);
    hasher.update([opcode]);
    Bytes32::new(hasher.finalize())
}
