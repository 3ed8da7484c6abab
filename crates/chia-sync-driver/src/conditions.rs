use chia_bls::PublicKey;
use chia_protocol::{Bytes, Bytes32};
use clvm_traits::{
    clvm_list, destructure_list, destructure_tuple, match_list, match_tuple, FromClvm,
    FromClvmError, ToClvm, ToClvmError,
};
use clvmr::{Allocator, NodePtr};

/// The CAT puzzle treats a CREATE_COIN with this amount as a request to run the TAIL.
pub const RUN_TAIL_AMOUNT: i64 = -113;

/// The conditions a wallet needs to construct or understand.
///
/// Opcodes which aren't interesting to the wallet are kept as [`Condition::Other`],
/// so that parsing the output of an arbitrary puzzle never fails because of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Remark,
    AggSigParent {
        public_key: PublicKey,
        message: Bytes,
    },
    AggSigPuzzle {
        public_key: PublicKey,
        message: Bytes,
    },
    AggSigAmount {
        public_key: PublicKey,
        message: Bytes,
    },
    AggSigPuzzleAmount {
        public_key: PublicKey,
        message: Bytes,
    },
    AggSigParentAmount {
        public_key: PublicKey,
        message: Bytes,
    },
    AggSigParentPuzzle {
        public_key: PublicKey,
        message: Bytes,
    },
    AggSigUnsafe {
        public_key: PublicKey,
        message: Bytes,
    },
    AggSigMe {
        public_key: PublicKey,
        message: Bytes,
    },
    CreateCoin {
        puzzle_hash: Bytes32,
        amount: u64,
        memos: Vec<Bytes>,
    },
    /// Only meaningful inside of a CAT, where it reveals and runs the TAIL.
    RunTail {
        program: NodePtr,
        solution: NodePtr,
    },
    ReserveFee {
        amount: u64,
    },
    CreateCoinAnnouncement {
        message: Bytes,
    },
    AssertCoinAnnouncement {
        announcement_id: Bytes32,
    },
    CreatePuzzleAnnouncement {
        message: Bytes,
    },
    AssertPuzzleAnnouncement {
        announcement_id: Bytes32,
    },
    AssertMyCoinId {
        coin_id: Bytes32,
    },
    AssertMyParentId {
        parent_id: Bytes32,
    },
    AssertMyPuzzleHash {
        puzzle_hash: Bytes32,
    },
    AssertMyAmount {
        amount: u64,
    },
    AssertHeightAbsolute {
        block_height: u32,
    },
    Other {
        opcode: u16,
        rest: NodePtr,
    },
}

impl Condition {
    pub fn create_coin(puzzle_hash: Bytes32, amount: u64, memos: Vec<Bytes>) -> Self {
        Self::CreateCoin {
            puzzle_hash,
            amount,
            memos,
        }
    }

    /// The public key and message of an `AGG_SIG_*` condition.
    pub fn agg_sig(&self) -> Option<(PublicKey, &Bytes)> {
        match self {
            Self::AggSigParent {
                public_key,
                message,
            }
            | Self::AggSigPuzzle {
                public_key,
                message,
            }
            | Self::AggSigAmount {
                public_key,
                message,
            }
            | Self::AggSigPuzzleAmount {
                public_key,
                message,
            }
            | Self::AggSigParentAmount {
                public_key,
                message,
            }
            | Self::AggSigParentPuzzle {
                public_key,
                message,
            }
            | Self::AggSigUnsafe {
                public_key,
                message,
            }
            | Self::AggSigMe {
                public_key,
                message,
            } => Some((*public_key, message)),
            _ => None,
        }
    }
}

impl ToClvm<Allocator> for Condition {
    fn to_clvm(&self, a: &mut Allocator) -> Result<NodePtr, ToClvmError> {
        match self {
            Self::Remark => clvm_list!(1).to_clvm(a),
            Self::AggSigParent {
                public_key,
                message,
            } => clvm_list!(43, public_key, message).to_clvm(a),
            Self::AggSigPuzzle {
                public_key,
                message,
            } => clvm_list!(44, public_key, message).to_clvm(a),
            Self::AggSigAmount {
                public_key,
                message,
            } => clvm_list!(45, public_key, message).to_clvm(a),
            Self::AggSigPuzzleAmount {
                public_key,
                message,
            } => clvm_list!(46, public_key, message).to_clvm(a),
            Self::AggSigParentAmount {
                public_key,
                message,
            } => clvm_list!(47, public_key, message).to_clvm(a),
            Self::AggSigParentPuzzle {
                public_key,
                message,
            } => clvm_list!(48, public_key, message).to_clvm(a),
            Self::AggSigUnsafe {
                public_key,
                message,
            } => clvm_list!(49, public_key, message).to_clvm(a),
            Self::AggSigMe {
                public_key,
                message,
            } => clvm_list!(50, public_key, message).to_clvm(a),
            Self::CreateCoin {
                puzzle_hash,
                amount,
                memos,
            } => {
                if memos.is_empty() {
                    clvm_list!(51, puzzle_hash, amount).to_clvm(a)
                } else {
                    clvm_list!(51, puzzle_hash, amount, memos).to_clvm(a)
                }
            }
            Self::RunTail { program, solution } => {
                clvm_list!(51, (), RUN_TAIL_AMOUNT, program, solution).to_clvm(a)
            }
            Self::ReserveFee { amount } => clvm_list!(52, amount).to_clvm(a),
            Self::CreateCoinAnnouncement { message } => clvm_list!(60, message).to_clvm(a),
            Self::AssertCoinAnnouncement { announcement_id } => {
                clvm_list!(61, announcement_id).to_clvm(a)
            }
            Self::CreatePuzzleAnnouncement { message } => clvm_list!(62, message).to_clvm(a),
            Self::AssertPuzzleAnnouncement { announcement_id } => {
                clvm_list!(63, announcement_id).to_clvm(a)
            }
            Self::AssertMyCoinId { coin_id } => clvm_list!(70, coin_id).to_clvm(a),
            Self::AssertMyParentId { parent_id } => clvm_list!(71, parent_id).to_clvm(a),
            Self::AssertMyPuzzleHash { puzzle_hash } => clvm_list!(72, puzzle_hash).to_clvm(a),
            Self::AssertMyAmount { amount } => clvm_list!(73, amount).to_clvm(a),
            Self::AssertHeightAbsolute { block_height } => {
                clvm_list!(83, block_height).to_clvm(a)
            }
            Self::Other { opcode, rest } => (opcode, rest).to_clvm(a),
        }
    }
}

impl FromClvm<Allocator> for Condition {
    fn from_clvm(a: &Allocator, ptr: NodePtr) -> Result<Self, FromClvmError> {
        let destructure_tuple!(opcode, value) = <match_tuple!(u16, NodePtr)>::from_clvm(a, ptr)?;

        macro_rules! condition_list {
            ( $variant:ident $( , $name:ident: $ty:ty )* ) => {
                {
                    let destructure_list!( $( $name ),* ) = <match_list!( $( $ty ),* )>::from_clvm(a, value)?;
                    Self::$variant { $( $name ),* }
                }
            };
        }

        let condition = match opcode {
            1 => Self::Remark,
            43 => condition_list!(AggSigParent, public_key: PublicKey, message: Bytes),
            44 => condition_list!(AggSigPuzzle, public_key: PublicKey, message: Bytes),
            45 => condition_list!(AggSigAmount, public_key: PublicKey, message: Bytes),
            46 => condition_list!(AggSigPuzzleAmount, public_key: PublicKey, message: Bytes),
            47 => condition_list!(AggSigParentAmount, public_key: PublicKey, message: Bytes),
            48 => condition_list!(AggSigParentPuzzle, public_key: PublicKey, message: Bytes),
            49 => condition_list!(AggSigUnsafe, public_key: PublicKey, message: Bytes),
            50 => condition_list!(AggSigMe, public_key: PublicKey, message: Bytes),
            51 => parse_create_coin(a, value)?,
            52 => condition_list!(ReserveFee, amount: u64),
            60 => condition_list!(CreateCoinAnnouncement, message: Bytes),
            61 => condition_list!(AssertCoinAnnouncement, announcement_id: Bytes32),
            62 => condition_list!(CreatePuzzleAnnouncement, message: Bytes),
            63 => condition_list!(AssertPuzzleAnnouncement, announcement_id: Bytes32),
            70 => condition_list!(AssertMyCoinId, coin_id: Bytes32),
            71 => condition_list!(AssertMyParentId, parent_id: Bytes32),
            72 => condition_list!(AssertMyPuzzleHash, puzzle_hash: Bytes32),
            73 => condition_list!(AssertMyAmount, amount: u64),
            83 => condition_list!(AssertHeightAbsolute, block_height: u32),
            _ => Self::Other {
                opcode,
                rest: value,
            },
        };

        Ok(condition)
    }
}

fn parse_create_coin(a: &Allocator, value: NodePtr) -> Result<Condition, FromClvmError> {
    if let Ok(destructure_list!((), amount, program, solution)) =
        <match_list!((), i64, NodePtr, NodePtr)>::from_clvm(a, value)
    {
        if amount == RUN_TAIL_AMOUNT {
            return Ok(Condition::RunTail { program, solution });
        }
    }

    let destructure_tuple!(puzzle_hash, amount, rest) =
        <match_tuple!(Bytes32, u64, NodePtr)>::from_clvm(a, value)?;

    // Memos are optional, and anything which isn't a list of atoms carries no hint.
    let memos = <Option<(Vec<Bytes>, NodePtr)>>::from_clvm(a, rest)
        .ok()
        .flatten()
        .map(|(memos, _)| memos)
        .unwrap_or_default();

    Ok(Condition::CreateCoin {
        puzzle_hash,
        amount,
        memos,
    })
}

#[cfg(test)]
mod tests {
    use clvmr::serde::node_to_bytes;
    use hex_literal::hex;

    use super::*;

    #[test]
    fn test_create_coin_memos() -> anyhow::Result<()> {
        let mut a = Allocator::new();

        let condition = Condition::create_coin(
            Bytes32::new([1; 32]),
            1000,
            vec![Bytes::new(vec![1; 32])],
        );
        let ptr = condition.to_clvm(&mut a)?;
        assert_eq!(Condition::from_clvm(&a, ptr)?, condition);

        let bare = Condition::create_coin(Bytes32::new([1; 32]), 1000, Vec::new());
        let ptr = bare.to_clvm(&mut a)?;
        assert_eq!(
            hex::encode(node_to_bytes(&a, ptr)?),
            "ff33ffa00101010101010101010101010101010101010101010101010101010101010101ff8203e880"
        );

        Ok(())
    }

    #[test]
    fn test_run_tail_is_not_a_create_coin() -> anyhow::Result<()> {
        let mut a = Allocator::new();

        let program = a.new_atom(&hex!("ff"))?;
        let solution = a.nil();
        let ptr = Condition::RunTail { program, solution }.to_clvm(&mut a)?;

        assert!(matches!(
            Condition::from_clvm(&a, ptr)?,
            Condition::RunTail { .. }
        ));

        Ok(())
    }

    #[test]
    fn test_unknown_opcode() -> anyhow::Result<()> {
        let mut a = Allocator::new();
        let ptr = clvm_list!(66, 5).to_clvm(&mut a)?;

        assert!(matches!(
            Condition::from_clvm(&a, ptr)?,
            Condition::Other { opcode: 66, .. }
        ));

        Ok(())
    }
}
