use chia_bls::PublicKey;
use chia_protocol::{Bytes, Bytes32, Coin, CoinSpend, Program, SpendBundle};
use chia_puzzle_types::LineageProof;
use chia_sync_driver::{
    cat_announcement_id, cat_puzzle_hash, coin_set_message, standard_inner_spend,
    standard_puzzle_hash, CatParent, CatSpend, Condition, DriverError, SpendContext,
};
use chia_sync_store::{
    fetch_coin_record, fetch_derivation_by_puzzle_hash, fetch_unspent_coin_records,
    TransactionRecord, TransactionType,
};
use chia_traits::Streamable;
use clvm_traits::ToClvm;
use clvm_utils::tree_hash;
use clvmr::{Allocator, NodePtr};
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::{
    tracker::{unix_time, Session},
    AssetPolicy, LineageProofCache, Payment, Result, StandardPolicy, WalletError, WalletPeer,
};

use super::sum_amounts;

/// A wallet for a single CAT asset.
#[derive(Debug, Clone)]
pub struct CatPolicy {
    wallet_id: u32,
    asset_id: Bytes32,
    tail_program: Option<Bytes>,
    lineage: LineageProofCache,
}

/// The outcome of checking the parent of a CAT coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentCheck {
    Valid,
    Invalid,
    Unknown,
}

impl CatPolicy {
    pub fn new(wallet_id: u32, asset_id: Bytes32) -> Self {
        Self {
            wallet_id,
            asset_id,
            tail_program: None,
            lineage: LineageProofCache::new(wallet_id),
        }
    }

    pub fn from_state(wallet_id: u32, data: &Bytes, lineage: LineageProofCache) -> Result<Self> {
        let (asset_id, tail_program) = <(Bytes32, Option<Bytes>)>::from_bytes(data.as_ref())?;

        Ok(Self {
            wallet_id,
            asset_id,
            tail_program,
            lineage,
        })
    }

    pub fn state(&self) -> Result<Bytes> {
        Ok((self.asset_id, self.tail_program.clone()).to_bytes()?.into())
    }

    pub fn default_name(asset_id: Bytes32) -> String {
        format!("CAT {}", &hex::encode(asset_id)[..16])
    }

    pub fn wallet_id(&self) -> u32 {
        self.wallet_id
    }

    pub fn asset_id(&self) -> Bytes32 {
        self.asset_id
    }

    pub fn tail_program(&self) -> Option<&Bytes> {
        self.tail_program.as_ref()
    }

    pub fn lineage(&self) -> &LineageProofCache {
        &self.lineage
    }

    pub fn lineage_mut(&mut self) -> &mut LineageProofCache {
        &mut self.lineage
    }

    /// Stores the TAIL reveal, which must hash to the asset id.
    pub fn set_tail_program(&mut self, tail_program: Bytes) -> Result<()> {
        let mut allocator = Allocator::new();
        let ptr = Program::new(tail_program.clone())
            .to_clvm(&mut allocator)
            .map_err(DriverError::from)?;
        let actual: Bytes32 = tree_hash(&allocator, ptr).into();

        if actual != self.asset_id {
            return Err(WalletError::TailMismatch {
                expected: self.asset_id,
                actual,
            });
        }

        self.tail_program = Some(tail_program);
        Ok(())
    }

    pub fn puzzle_hash_for_key(&self, synthetic_key: PublicKey) -> Bytes32 {
        cat_puzzle_hash(self.asset_id, standard_puzzle_hash(synthetic_key))
    }

    /// Records the lineage proof that children of this coin will need.
    pub async fn coin_added(&mut self, conn: &mut SqliteConnection, coin: &Coin) -> Result<()> {
        let coin_id = coin.coin_id();

        if self.lineage.contains(coin_id) {
            return Ok(());
        }

        let Some(derivation) = fetch_derivation_by_puzzle_hash(conn, coin.puzzle_hash).await?
        else {
            return Err(WalletError::Internal(format!(
                "CAT coin {coin_id} doesn't belong to a derivation"
            )));
        };

        let proof = LineageProof {
            parent_parent_coin_info: coin.parent_coin_info,
            parent_inner_puzzle_hash: standard_puzzle_hash(derivation.public_key),
            parent_amount: coin.amount,
        };

        self.lineage.put(conn, coin_id, Some(proof)).await?;
        Ok(())
    }

    pub(crate) async fn repair_lineage<P: WalletPeer>(
        &mut self,
        conn: &mut SqliteConnection,
        peer: &P,
        budget: &mut u32,
    ) -> Result<Vec<Coin>> {
        let mut invalid = Vec::new();

        for record in fetch_unspent_coin_records(conn, self.wallet_id).await? {
            if self.lineage.contains(record.coin.parent_coin_info) {
                continue;
            }

            if *budget == 0 {
                debug!(wallet_id = self.wallet_id, "lineage lookups exhausted for this pass");
                break;
            }
            *budget -= 1;

            match self.check_parent(conn, peer, &record.coin).await? {
                ParentCheck::Valid | ParentCheck::Unknown => {}
                ParentCheck::Invalid => invalid.push(record.coin),
            }
        }

        Ok(invalid)
    }

    async fn check_parent<P: WalletPeer>(
        &mut self,
        conn: &mut SqliteConnection,
        peer: &P,
        coin: &Coin,
    ) -> Result<ParentCheck> {
        let parent_id = coin.parent_coin_info;

        let parent = match fetch_coin_record(conn, parent_id).await? {
            Some(record) if record.is_spent() => Some((record.coin, record.spent_height)),
            _ => match peer.get_coin_states(vec![parent_id], None).await {
                Ok(states) => states
                    .into_iter()
                    .find(|state| state.coin.coin_id() == parent_id)
                    .and_then(|state| Some((state.coin, state.spent_height?))),
                Err(error) => {
                    warn!(%error, %parent_id, "failed to fetch parent of CAT coin");
                    return Ok(ParentCheck::Unknown);
                }
            },
        };

        let Some((parent_coin, spent_height)) = parent else {
            warn!(%parent_id, "parent of CAT coin is not spent according to the peer");
            return Ok(ParentCheck::Unknown);
        };

        let parent_spend = match peer.fetch_puzzle_solution(spent_height, parent_coin).await {
            Ok(coin_spend) => coin_spend,
            Err(error) => {
                warn!(%error, %parent_id, "failed to fetch spend of CAT parent");
                return Ok(ParentCheck::Unknown);
            }
        };

        let mut allocator = Allocator::new();

        match CatParent::parse(&mut allocator, &parent_spend) {
            Ok(Some(cat)) if cat.asset_id == self.asset_id => {
                self.lineage
                    .put(conn, parent_id, Some(cat.child_lineage_proof()))
                    .await?;
                Ok(ParentCheck::Valid)
            }
            Ok(_) => Ok(ParentCheck::Invalid),
            Err(error) => {
                warn!(%error, %parent_id, "unparseable spend of CAT parent");
                Ok(ParentCheck::Invalid)
            }
        }
    }

    /// Builds a ring spend of this asset. A positive `delta` issues new supply
    /// and a negative one melts it, both of which require the TAIL reveal.
    ///
    /// Returns the CAT transaction, and when XCH had to move to pay the fee or
    /// balance the delta, a second transaction for the standard wallet.
    pub(crate) async fn generate_spend(
        &self,
        session: &mut Session<'_>,
        payments: Vec<Payment>,
        fee: u64,
        delta: i64,
    ) -> Result<Vec<TransactionRecord>> {
        if delta != 0 && self.tail_program.is_none() {
            return Err(DriverError::MissingTail.into());
        }

        let payment_total = payments
            .iter()
            .try_fold(0u64, |total, payment| total.checked_add(payment.amount))
            .ok_or(DriverError::AmountOverflow)?;

        let policy = AssetPolicy::Cat(self.clone());

        if delta > 0 && policy.eligible_coins(session.conn).await?.is_empty() {
            return self
                .generate_eve_spend(session, payments, fee, delta.unsigned_abs())
                .await;
        }

        // Issued supply adds to the selected coins, melted supply comes out of them.
        let starting = (i128::from(payment_total) - i128::from(delta)).max(0);
        let starting = u64::try_from(starting).map_err(|_| DriverError::AmountOverflow)?;

        let coins = policy.select_coins(session.conn, starting).await?;
        let selected =
            i128::try_from(sum_amounts(&coins)).map_err(|_| DriverError::AmountOverflow)?;
        let change = u64::try_from(selected + i128::from(delta) - i128::from(payment_total))
            .map_err(|_| DriverError::AmountOverflow)?;

        let owed = u128::from(fee) + u128::from(delta.max(0).unsigned_abs());
        let absorbed = u128::from(delta.min(0).unsigned_abs());
        let needs_standard_spend = owed != absorbed;

        let mut outputs = hinted_outputs(payments);

        if change > 0 {
            let derivation = session.next_derivation(self.wallet_id).await?;
            outputs.push((
                standard_puzzle_hash(derivation.public_key),
                change,
                Vec::new(),
            ));
        }

        let mut ctx = SpendContext::new();

        let first_coin_id = coins[0].coin_id();
        let message = coin_set_message(coins.iter().map(Coin::coin_id));
        let ring_announcement = cat_announcement_id(first_coin_id, message);

        let mut conditions: Vec<Condition> = outputs
            .iter()
            .map(|(puzzle_hash, amount, memos)| {
                Condition::create_coin(*puzzle_hash, *amount, memos.clone())
            })
            .collect();

        conditions.push(Condition::CreateCoinAnnouncement {
            message: message.to_vec().into(),
        });

        if let Some(tail_program) = self.tail_program.as_ref().filter(|_| delta != 0) {
            let program = ctx.alloc(&Program::new(tail_program.clone()))?;
            conditions.push(Condition::RunTail {
                program,
                solution: NodePtr::NIL,
            });
        }

        if !needs_standard_spend && fee > 0 {
            conditions.push(Condition::ReserveFee { amount: fee });
        }

        let mut first_conditions = Some(conditions);
        let mut cat_spend = CatSpend::new(self.asset_id);

        for coin in &coins {
            let Some(derivation) =
                fetch_derivation_by_puzzle_hash(session.conn, coin.puzzle_hash).await?
            else {
                return Err(WalletError::Internal(format!(
                    "no derivation for CAT coin {}",
                    coin.coin_id()
                )));
            };

            let Some(lineage_proof) = self.lineage.proof_for_coin(coin) else {
                return Err(WalletError::Internal(format!(
                    "selected CAT coin {} has no lineage proof",
                    coin.coin_id()
                )));
            };

            let (conditions, extra_delta) = match first_conditions.take() {
                Some(conditions) => (conditions, delta),
                None => (
                    vec![Condition::AssertCoinAnnouncement {
                        announcement_id: ring_announcement,
                    }],
                    0,
                ),
            };

            let inner_spend = standard_inner_spend(&mut ctx, derivation.public_key, conditions)?;
            cat_spend = cat_spend.spend(*coin, inner_spend, Some(lineage_proof), extra_delta);
        }

        let mut coin_spends = cat_spend.finish(&mut ctx)?;

        let (mut additions, memos) = self.output_coins(first_coin_id, &outputs);
        let mut removals = coins.clone();

        let mut standard_transaction = None;

        if needs_standard_spend {
            let standard = session.standard_policy()?;
            let (standard_spends, standard_additions) = Self::standard_spend(
                session,
                standard,
                &mut ctx,
                owed,
                absorbed,
                fee,
                ring_announcement,
            )
            .await?;

            let standard_removals: Vec<Coin> =
                standard_spends.iter().map(|coin_spend| coin_spend.coin).collect();

            standard_transaction = Some(TransactionRecord {
                id: SpendBundle::new(standard_spends.clone(), chia_bls::Signature::default())
                    .name(),
                confirmed_height: 0,
                created_time: unix_time(),
                to_puzzle_hash: standard_additions
                    .first()
                    .map_or(Bytes32::default(), |coin| coin.puzzle_hash),
                amount: 0,
                fee_amount: fee,
                confirmed: false,
                sent: 0,
                spend_bundle: None,
                additions: standard_additions.clone(),
                removals: standard_removals.clone(),
                wallet_id: standard.wallet_id(),
                trade_id: None,
                kind: TransactionType::OutgoingTx,
                memos: Vec::new(),
            });

            coin_spends.extend(standard_spends);
            additions.extend(standard_additions);
            removals.extend(standard_removals);
        }

        let spend_bundle = session.sign(coin_spends).await?;

        let to_puzzle_hash = outputs
            .first()
            .map_or(Bytes32::default(), |(puzzle_hash, _, _)| *puzzle_hash);

        let mut transactions = vec![TransactionRecord {
            id: spend_bundle.name(),
            confirmed_height: 0,
            created_time: unix_time(),
            to_puzzle_hash,
            amount: payment_total,
            fee_amount: fee,
            confirmed: false,
            sent: 0,
            spend_bundle: Some(spend_bundle),
            additions,
            removals,
            wallet_id: self.wallet_id,
            trade_id: None,
            kind: TransactionType::OutgoingTx,
            memos,
        }];

        transactions.extend(standard_transaction);

        Ok(transactions)
    }

    /// Issues the first supply of an asset the wallet holds no coins of.
    /// A standard coin creates the eve coin, whose spend reveals the TAIL.
    async fn generate_eve_spend(
        &self,
        session: &mut Session<'_>,
        payments: Vec<Payment>,
        fee: u64,
        amount: u64,
    ) -> Result<Vec<TransactionRecord>> {
        let Some(tail_program) = self.tail_program.clone() else {
            return Err(DriverError::MissingTail.into());
        };

        let payment_total = payments
            .iter()
            .try_fold(0u64, |total, payment| total.checked_add(payment.amount))
            .ok_or(DriverError::AmountOverflow)?;

        if payment_total > amount {
            return Err(WalletError::InsufficientFunds {
                available: u128::from(amount),
                required: u128::from(payment_total),
            });
        }

        let standard = session.standard_policy()?;
        let required = amount.checked_add(fee).ok_or(DriverError::AmountOverflow)?;
        let standard_coins = AssetPolicy::Standard(standard)
            .select_coins(session.conn, required)
            .await?;
        let standard_change = u64::try_from(sum_amounts(&standard_coins) - u128::from(required))
            .map_err(|_| DriverError::AmountOverflow)?;
        let origin_id = standard_coins[0].coin_id();

        let derivation = session.next_derivation(self.wallet_id).await?;
        let inner_puzzle_hash = standard_puzzle_hash(derivation.public_key);
        let eve_coin = Coin::new(
            origin_id,
            cat_puzzle_hash(self.asset_id, inner_puzzle_hash),
            amount,
        );
        let eve_coin_id = eve_coin.coin_id();

        let mut outputs = hinted_outputs(payments);
        if amount > payment_total {
            outputs.push((inner_puzzle_hash, amount - payment_total, Vec::new()));
        }

        let mut ctx = SpendContext::new();
        let message = coin_set_message([eve_coin_id]);

        let mut conditions: Vec<Condition> = outputs
            .iter()
            .map(|(puzzle_hash, amount, memos)| {
                Condition::create_coin(*puzzle_hash, *amount, memos.clone())
            })
            .collect();
        conditions.push(Condition::CreateCoinAnnouncement {
            message: message.to_vec().into(),
        });
        let program = ctx.alloc(&Program::new(tail_program))?;
        conditions.push(Condition::RunTail {
            program,
            solution: NodePtr::NIL,
        });

        let inner_spend = standard_inner_spend(&mut ctx, derivation.public_key, conditions)?;
        let eve_spends = CatSpend::new(self.asset_id)
            .spend(eve_coin, inner_spend, None, 0)
            .finish(&mut ctx)?;

        let mut standard_conditions = vec![Condition::create_coin(
            eve_coin.puzzle_hash,
            amount,
            vec![Bytes::new(inner_puzzle_hash.to_vec())],
        )];
        let mut standard_additions = vec![eve_coin];

        if standard_change > 0 {
            let derivation = session.next_derivation(standard.wallet_id()).await?;
            standard_conditions.push(Condition::create_coin(
                derivation.puzzle_hash,
                standard_change,
                Vec::new(),
            ));
            standard_additions.push(Coin::new(origin_id, derivation.puzzle_hash, standard_change));
        }

        if fee > 0 {
            standard_conditions.push(Condition::ReserveFee { amount: fee });
        }

        standard_conditions.push(Condition::AssertCoinAnnouncement {
            announcement_id: cat_announcement_id(eve_coin_id, message),
        });

        let standard_spends = StandardPolicy::spend_coins(
            session.conn,
            &mut ctx,
            &standard_coins,
            standard_conditions,
        )
        .await?;
        let standard_id =
            SpendBundle::new(standard_spends.clone(), chia_bls::Signature::default()).name();

        let mut coin_spends = standard_spends;
        coin_spends.extend(eve_spends);
        let spend_bundle = session.sign(coin_spends).await?;

        // The eve coin is spent in the same block it is created, so its lineage
        // is never observed from the peer. The origin coin marks the genesis.
        session.record_lineage(self.wallet_id, origin_id, None).await?;
        session
            .record_lineage(
                self.wallet_id,
                eve_coin_id,
                Some(LineageProof {
                    parent_parent_coin_info: origin_id,
                    parent_inner_puzzle_hash: inner_puzzle_hash,
                    parent_amount: amount,
                }),
            )
            .await?;

        debug!(
            wallet_id = self.wallet_id,
            asset_id = %self.asset_id,
            amount,
            "issuing eve coin"
        );

        let (mut additions, memos) = self.output_coins(eve_coin_id, &outputs);
        additions.extend(standard_additions.iter().copied());

        let mut removals = standard_coins.clone();
        removals.push(eve_coin);

        let to_puzzle_hash = outputs
            .first()
            .map_or(Bytes32::default(), |(puzzle_hash, _, _)| *puzzle_hash);

        Ok(vec![
            TransactionRecord {
                id: spend_bundle.name(),
                confirmed_height: 0,
                created_time: unix_time(),
                to_puzzle_hash,
                amount: payment_total,
                fee_amount: fee,
                confirmed: false,
                sent: 0,
                spend_bundle: Some(spend_bundle),
                additions,
                removals,
                wallet_id: self.wallet_id,
                trade_id: None,
                kind: TransactionType::OutgoingTx,
                memos,
            },
            TransactionRecord {
                id: standard_id,
                confirmed_height: 0,
                created_time: unix_time(),
                to_puzzle_hash: eve_coin.puzzle_hash,
                amount,
                fee_amount: fee,
                confirmed: false,
                sent: 0,
                spend_bundle: None,
                additions: standard_additions,
                removals: standard_coins,
                wallet_id: standard.wallet_id(),
                trade_id: None,
                kind: TransactionType::OutgoingTx,
                memos: Vec::new(),
            },
        ])
    }

    /// The CAT coins created by a spend of `parent_id`, with the memos of those that have any.
    fn output_coins(
        &self,
        parent_id: Bytes32,
        outputs: &[(Bytes32, u64, Vec<Bytes>)],
    ) -> (Vec<Coin>, Vec<(Bytes32, Vec<Bytes>)>) {
        let coins: Vec<Coin> = outputs
            .iter()
            .map(|(inner_puzzle_hash, amount, _)| {
                Coin::new(
                    parent_id,
                    cat_puzzle_hash(self.asset_id, *inner_puzzle_hash),
                    *amount,
                )
            })
            .collect();

        let memos = coins
            .iter()
            .zip(outputs)
            .filter(|(_, (_, _, memos))| !memos.is_empty())
            .map(|(coin, (_, _, memos))| (coin.coin_id(), memos.clone()))
            .collect();

        (coins, memos)
    }

    /// Spends XCH alongside the ring to pay what the CAT side owes, which is
    /// the fee plus any issued amount, less any melted amount it absorbs.
    async fn standard_spend(
        session: &mut Session<'_>,
        standard: StandardPolicy,
        ctx: &mut SpendContext,
        owed: u128,
        absorbed: u128,
        fee: u64,
        ring_announcement: Bytes32,
    ) -> Result<(Vec<CoinSpend>, Vec<Coin>)> {
        let target = u64::try_from(owed.saturating_sub(absorbed))
            .map_err(|_| DriverError::AmountOverflow)?;

        let coins = AssetPolicy::Standard(standard)
            .select_coins(session.conn, target)
            .await?;

        let change = u64::try_from(sum_amounts(&coins) + absorbed - owed)
            .map_err(|_| DriverError::AmountOverflow)?;

        let mut conditions = Vec::new();
        let mut additions = Vec::new();

        if change > 0 {
            let derivation = session.next_derivation(standard.wallet_id()).await?;
            conditions.push(Condition::create_coin(
                derivation.puzzle_hash,
                change,
                Vec::new(),
            ));
            additions.push(Coin::new(coins[0].coin_id(), derivation.puzzle_hash, change));
        }

        if fee > 0 {
            conditions.push(Condition::ReserveFee { amount: fee });
        }

        conditions.push(Condition::AssertCoinAnnouncement {
            announcement_id: ring_announcement,
        });

        let coin_spends = StandardPolicy::spend_coins(session.conn, ctx, &coins, conditions).await?;

        Ok((coin_spends, additions))
    }
}

/// Payment outputs, each hinted with its own puzzle hash so the recipient can find it.
fn hinted_outputs(payments: Vec<Payment>) -> Vec<(Bytes32, u64, Vec<Bytes>)> {
    payments
        .into_iter()
        .map(|payment| {
            let mut memos = vec![Bytes::new(payment.puzzle_hash.to_vec())];
            memos.extend(payment.memos);
            (payment.puzzle_hash, payment.amount, memos)
        })
        .collect()
}
