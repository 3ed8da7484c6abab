use chia_bls::{aggregate, sign, SecretKey};
use chia_protocol::{Bytes, Bytes32, CoinSpend, SpendBundle};
use chia_sync_driver::{AggSigConstants, RequiredSignature};
use chia_sync_store::{
    delete_trade_transactions, fetch_coin_record, fetch_derivation_by_puzzle_hash,
    update_wallet_data, upsert_transaction, TransactionRecord,
};
use clvmr::Allocator;
use tracing::{info, instrument};

use crate::{Payment, Result, StateChange, WalletError};

use super::Session;

impl Session<'_> {
    /// Signs every signature the coin spends require, with the keys of the
    /// derivations that own the spent coins.
    pub(crate) async fn sign(&mut self, coin_spends: Vec<CoinSpend>) -> Result<SpendBundle> {
        let required = RequiredSignature::from_coin_spends(
            &mut Allocator::new(),
            &coin_spends,
            &AggSigConstants::new(self.config.agg_sig_me_additional_data),
        )?;

        let mut secret_keys: Vec<SecretKey> = Vec::new();

        for coin_spend in &coin_spends {
            let Some(derivation) =
                fetch_derivation_by_puzzle_hash(self.conn, coin_spend.coin.puzzle_hash).await?
            else {
                return Err(WalletError::Internal(format!(
                    "no derivation for spent coin {}",
                    coin_spend.coin.coin_id()
                )));
            };

            secret_keys.push(
                self.allocator
                    .keys()
                    .secret_key(derivation.index, derivation.hardened)?,
            );
        }

        let mut signatures = Vec::with_capacity(required.len());

        for required in &required {
            let Some(secret_key) = secret_keys
                .iter()
                .find(|secret_key| secret_key.public_key() == required.public_key)
            else {
                return Err(WalletError::Internal(format!(
                    "no secret key for public key {}",
                    hex::encode(required.public_key.to_bytes())
                )));
            };

            signatures.push(sign(secret_key, required.message()));
        }

        Ok(SpendBundle::new(coin_spends, aggregate(&signatures)))
    }

    #[instrument(skip(self, payments))]
    pub(crate) async fn generate_signed_transaction(
        &mut self,
        wallet_id: u32,
        payments: Vec<Payment>,
        fee: u64,
        delta: i64,
    ) -> Result<Vec<TransactionRecord>> {
        let policy = self.policy(wallet_id)?.clone();
        let transactions = policy.generate_spend(self, payments, fee, delta).await?;

        info!(count = transactions.len(), "generated transactions");

        Ok(transactions)
    }

    pub(crate) async fn add_pending_transaction(
        &mut self,
        transaction: TransactionRecord,
    ) -> Result<()> {
        upsert_transaction(self.conn, &transaction).await?;

        // Removals are watched to learn when the transaction confirms. Additions
        // are only watched when they come back to one of the wallets.
        for coin in &transaction.removals {
            let wallet_id = fetch_coin_record(self.conn, coin.coin_id())
                .await?
                .map_or(transaction.wallet_id, |record| record.wallet_id);

            self.state
                .interests
                .add_coin_id(self.conn, coin.coin_id(), wallet_id)
                .await?;
        }

        for coin in &transaction.additions {
            if let Some(derivation) =
                fetch_derivation_by_puzzle_hash(self.conn, coin.puzzle_hash).await?
            {
                self.state
                    .interests
                    .add_coin_id(self.conn, coin.coin_id(), derivation.wallet_id)
                    .await?;
            }
        }

        info!(
            transaction_id = %transaction.id,
            wallet_id = transaction.wallet_id,
            "added pending transaction"
        );

        self.events.push(StateChange::PendingTransaction {
            wallet_id: transaction.wallet_id,
            transaction_id: transaction.id,
        });

        Ok(())
    }

    pub(crate) async fn delete_trade_transactions(&mut self, trade_id: Bytes32) -> Result<usize> {
        let deleted = delete_trade_transactions(self.conn, trade_id).await?;

        info!(%trade_id, count = deleted.len(), "deleted trade transactions");

        for &(transaction_id, wallet_id) in &deleted {
            self.events.push(StateChange::TransactionDeleted {
                wallet_id,
                transaction_id,
            });
        }

        Ok(deleted.len())
    }

    pub(crate) async fn set_tail_program(
        &mut self,
        wallet_id: u32,
        tail_program: Bytes,
    ) -> Result<()> {
        let Some(policy) = self.state.policies.get_mut(&wallet_id) else {
            return Err(WalletError::UnknownWallet(wallet_id));
        };

        let Some(cat) = policy.as_cat_mut() else {
            return Err(WalletError::UnsupportedOperation("tail programs"));
        };

        cat.set_tail_program(tail_program)?;
        update_wallet_data(self.conn, wallet_id, &cat.state()?).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chia_bls::aggregate_verify;
    use chia_protocol::Coin;
    use chia_puzzle_types::cat::CatSolution;
    use chia_sync_driver::{
        announcements_are_satisfied, cat_announcement_id, cat_puzzle_hash, coin_set_message,
        coin_spend_conditions, run_conditions, CatPuzzle, Condition, DriverError,
    };
    use chia_sync_store::{fetch_derivations, fetch_unused_derivation_index, TransactionType};
    use clvm_traits::{clvm_quote, FromClvm, ToClvm};
    use clvm_utils::tree_hash;
    use clvmr::{serde::node_to_bytes, NodePtr};

    use crate::{
        test_utils::{cat_parent_spend, coin_state, derivation, test_config, test_tracker, TestPeer},
        CatPolicy, NewWallet, WalletCoinTracker,
    };

    use super::*;

    const EXTERNAL: Bytes32 = Bytes32::new([7; 32]);

    /// Receives standard coins with the amounts at a derivation index.
    async fn fund(
        tracker: &WalletCoinTracker,
        peer: &TestPeer,
        index: u32,
        amounts: &[u64],
    ) -> anyhow::Result<Vec<Coin>> {
        let puzzle_hash = derivation(tracker, 1, index).await?.puzzle_hash;

        let coins: Vec<Coin> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| Coin::new(Bytes32::new([i as u8 + 100; 32]), puzzle_hash, *amount))
            .collect();

        let states: Vec<_> = coins.iter().map(|coin| coin_state(*coin, 11, None)).collect();
        tracker.ingest(states, peer, None).await?;

        Ok(coins)
    }

    fn signature_is_valid(
        tracker: &WalletCoinTracker,
        spend_bundle: &SpendBundle,
    ) -> anyhow::Result<bool> {
        let required = RequiredSignature::from_coin_spends(
            &mut Allocator::new(),
            &spend_bundle.coin_spends,
            &AggSigConstants::new(tracker.config().agg_sig_me_additional_data),
        )?;

        Ok(!required.is_empty()
            && aggregate_verify(
                &spend_bundle.aggregated_signature,
                required
                    .iter()
                    .map(|required| (required.public_key, required.message()))
                    .collect::<Vec<_>>(),
            ))
    }

    fn output_conditions(spend_bundle: &SpendBundle) -> anyhow::Result<Vec<Condition>> {
        let mut allocator = Allocator::new();
        let mut conditions = Vec::new();

        for coin_spend in &spend_bundle.coin_spends {
            conditions.extend(coin_spend_conditions(&mut allocator, coin_spend)?);
        }

        Ok(conditions)
    }

    /// A TAIL which allows any issuance or melt, along with the asset id it defines.
    fn open_tail() -> anyhow::Result<(Bytes, Bytes32)> {
        let mut allocator = Allocator::new();
        let ptr = clvm_quote!(()).to_clvm(&mut allocator)?;
        Ok((
            Bytes::new(node_to_bytes(&allocator, ptr)?),
            tree_hash(&allocator, ptr).into(),
        ))
    }

    /// Creates a CAT wallet which can issue and melt the asset.
    async fn issuing_wallet(tracker: &WalletCoinTracker) -> anyhow::Result<(u32, Bytes32)> {
        let (tail_program, asset_id) = open_tail()?;
        let wallet_id = tracker
            .create_wallet(NewWallet::Cat {
                asset_id,
                name: None,
            })
            .await?;
        tracker.set_tail_program(wallet_id, tail_program).await?;
        Ok((wallet_id, asset_id))
    }

    /// Receives a CAT coin with a verifiable parent at derivation index 0.
    async fn receive_cat(
        tracker: &WalletCoinTracker,
        peer: &TestPeer,
        asset_id: Bytes32,
        amount: u64,
    ) -> anyhow::Result<Coin> {
        let inner_puzzle_hash = derivation(tracker, 1, 0).await?.puzzle_hash;
        let (parent, parent_spend) = cat_parent_spend(
            asset_id,
            amount,
            vec![Condition::create_coin(inner_puzzle_hash, amount, Vec::new())],
        )?;
        let cat_coin = Coin::new(
            parent.coin_id(),
            cat_puzzle_hash(asset_id, inner_puzzle_hash),
            amount,
        );
        peer.add_coin_state(coin_state(parent, 8, Some(10)));
        peer.add_coin_spend(parent_spend);
        peer.add_coin_state(coin_state(cat_coin, 10, None));
        tracker
            .ingest(vec![coin_state(cat_coin, 10, None)], peer, None)
            .await?;
        Ok(cat_coin)
    }

    /// The solution of a CAT spend, and the conditions output by its inner puzzle.
    fn cat_spend_details(
        coin_spend: &CoinSpend,
    ) -> anyhow::Result<(CatSolution<NodePtr>, Vec<Condition>)> {
        let mut allocator = Allocator::new();
        let puzzle = coin_spend.puzzle_reveal.to_clvm(&mut allocator)?;
        let solution = coin_spend.solution.to_clvm(&mut allocator)?;

        let cat = CatPuzzle::parse(&allocator, puzzle)?
            .ok_or_else(|| anyhow::anyhow!("not a CAT spend"))?;
        let solution = CatSolution::<NodePtr>::from_clvm(&allocator, solution)?;
        let conditions = run_conditions(
            &mut allocator,
            cat.inner_puzzle,
            solution.inner_puzzle_solution,
        )?;

        Ok((solution, conditions))
    }

    /// The lowest unused derivation index, and how many derivations the wallet has.
    async fn derivation_state(
        tracker: &WalletCoinTracker,
        wallet_id: u32,
    ) -> anyhow::Result<(Option<u32>, usize)> {
        let mut conn = tracker.database().acquire().await?;
        let unused = fetch_unused_derivation_index(&mut conn).await?;
        let count = fetch_derivations(&mut conn, wallet_id, false).await?.len();
        Ok((unused, count))
    }

    fn created_amount(conditions: &[Condition]) -> u64 {
        conditions
            .iter()
            .filter_map(|condition| match condition {
                Condition::CreateCoin { amount, .. } => Some(*amount),
                _ => None,
            })
            .sum()
    }

    fn spent_amount(spend_bundle: &SpendBundle) -> u64 {
        spend_bundle
            .coin_spends
            .iter()
            .map(|coin_spend| coin_spend.coin.amount)
            .sum()
    }

    #[tokio::test]
    async fn test_standard_send() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();
        let coins = fund(&tracker, &peer, 0, &[1000]).await?;

        let transactions = tracker
            .generate_signed_transaction(1, vec![Payment::new(EXTERNAL, 300)], 10, 0)
            .await?;
        assert_eq!(transactions.len(), 1);

        let transaction = &transactions[0];
        let spend_bundle = transaction.spend_bundle.as_ref().expect("spend bundle");
        assert_eq!(transaction.id, spend_bundle.name());
        assert_eq!(transaction.amount, 300);
        assert_eq!(transaction.fee_amount, 10);
        assert_eq!(transaction.kind, TransactionType::OutgoingTx);
        assert_eq!(transaction.removals, coins);
        assert!(!transaction.confirmed);

        let change_puzzle_hash = derivation(&tracker, 1, 1).await?.puzzle_hash;
        assert_eq!(
            transaction.additions,
            vec![
                Coin::new(coins[0].coin_id(), EXTERNAL, 300),
                Coin::new(coins[0].coin_id(), change_puzzle_hash, 690),
            ]
        );

        assert!(signature_is_valid(&tracker, spend_bundle)?);

        let conditions = output_conditions(spend_bundle)?;
        assert!(conditions.contains(&Condition::create_coin(EXTERNAL, 300, Vec::new())));
        assert!(conditions.contains(&Condition::ReserveFee { amount: 10 }));

        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_coins_are_linked() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();
        fund(&tracker, &peer, 0, &[400, 400, 400]).await?;

        let transactions = tracker
            .generate_signed_transaction(1, vec![Payment::new(EXTERNAL, 700)], 0, 0)
            .await?;

        let spend_bundle = transactions[0].spend_bundle.as_ref().expect("spend bundle");
        assert_eq!(spend_bundle.coin_spends.len(), 2);
        assert!(announcements_are_satisfied(&spend_bundle.coin_spends)?);
        assert!(signature_is_valid(&tracker, spend_bundle)?);

        // Without the first spend, the second one can't be valid.
        assert!(!announcements_are_satisfied(&spend_bundle.coin_spends[1..])?);

        Ok(())
    }

    #[tokio::test]
    async fn test_cat_send_pays_fee_with_xch() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();

        let asset_id = Bytes32::new([5; 32]);
        let cat_wallet = tracker
            .create_wallet(NewWallet::Cat {
                asset_id,
                name: None,
            })
            .await?;

        let cat_coin = receive_cat(&tracker, &peer, asset_id, 600).await?;
        let xch_coins = fund(&tracker, &peer, 1, &[1000]).await?;

        let transactions = tracker
            .generate_signed_transaction(cat_wallet, vec![Payment::new(EXTERNAL, 500)], 50, 0)
            .await?;
        assert_eq!(transactions.len(), 2);

        let cat_transaction = &transactions[0];
        assert_eq!(cat_transaction.wallet_id, cat_wallet);
        assert_eq!(cat_transaction.amount, 500);
        assert_eq!(cat_transaction.fee_amount, 50);

        let spend_bundle = cat_transaction.spend_bundle.as_ref().expect("spend bundle");
        assert_eq!(spend_bundle.coin_spends.len(), 2);
        assert!(announcements_are_satisfied(&spend_bundle.coin_spends)?);
        assert!(signature_is_valid(&tracker, spend_bundle)?);

        // Everything that goes in comes out, apart from the fee.
        let conditions = output_conditions(spend_bundle)?;
        assert_eq!(spent_amount(spend_bundle), 1600);
        assert_eq!(created_amount(&conditions) + 50, 1600);
        assert!(conditions.contains(&Condition::ReserveFee { amount: 50 }));

        let cat_change = cat_transaction
            .additions
            .iter()
            .find(|coin| coin.amount == 100)
            .expect("CAT change");
        assert_eq!(cat_change.parent_coin_info, cat_coin.coin_id());

        let standard_transaction = &transactions[1];
        assert_eq!(standard_transaction.wallet_id, 1);
        assert_eq!(standard_transaction.amount, 0);
        assert_eq!(standard_transaction.fee_amount, 50);
        assert_eq!(standard_transaction.spend_bundle, None);
        assert_eq!(standard_transaction.removals, xch_coins);
        assert_eq!(standard_transaction.additions.len(), 1);
        assert_eq!(standard_transaction.additions[0].amount, 950);

        Ok(())
    }

    #[tokio::test]
    async fn test_cat_issuance_balances() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();
        let (cat_wallet, asset_id) = issuing_wallet(&tracker).await?;
        let cat_coin = receive_cat(&tracker, &peer, asset_id, 600).await?;
        let xch_coins = fund(&tracker, &peer, 0, &[10_000]).await?;

        // Issuing more than is paid out, so the whole issued amount ends up as change.
        let transactions = tracker
            .generate_signed_transaction(cat_wallet, vec![Payment::new(EXTERNAL, 100)], 0, 500)
            .await?;
        assert_eq!(transactions.len(), 2);

        let spend_bundle = transactions[0].spend_bundle.as_ref().expect("spend bundle");
        assert!(announcements_are_satisfied(&spend_bundle.coin_spends)?);
        assert!(signature_is_valid(&tracker, spend_bundle)?);

        let conditions = output_conditions(spend_bundle)?;
        assert_eq!(spent_amount(spend_bundle), 10_600);
        assert_eq!(created_amount(&conditions), 10_600);

        let cat_outputs: u64 = transactions[0]
            .additions
            .iter()
            .filter(|coin| coin.parent_coin_info == cat_coin.coin_id())
            .map(|coin| coin.amount)
            .sum();
        assert_eq!(cat_outputs, 1100);

        let cat_change = transactions[0]
            .additions
            .iter()
            .find(|coin| coin.parent_coin_info == cat_coin.coin_id() && coin.amount == 1000);
        assert!(cat_change.is_some());

        let (solution, inner_conditions) = cat_spend_details(&spend_bundle.coin_spends[0])?;
        assert_eq!(spend_bundle.coin_spends[0].coin, cat_coin);
        assert_eq!(solution.extra_delta, 500);
        assert!(inner_conditions
            .iter()
            .any(|condition| matches!(condition, Condition::RunTail { .. })));

        let standard_transaction = &transactions[1];
        assert_eq!(standard_transaction.removals, xch_coins);
        assert_eq!(standard_transaction.additions.len(), 1);
        assert_eq!(standard_transaction.additions[0].amount, 9500);

        Ok(())
    }

    #[tokio::test]
    async fn test_cat_melt_returns_surplus() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();
        let (cat_wallet, asset_id) = issuing_wallet(&tracker).await?;
        let cat_coin = receive_cat(&tracker, &peer, asset_id, 600).await?;
        let xch_coins = fund(&tracker, &peer, 0, &[1000]).await?;

        let transactions = tracker
            .generate_signed_transaction(cat_wallet, vec![Payment::new(EXTERNAL, 300)], 50, -200)
            .await?;
        assert_eq!(transactions.len(), 2);

        let spend_bundle = transactions[0].spend_bundle.as_ref().expect("spend bundle");
        assert_eq!(spend_bundle.coin_spends.len(), 2);
        assert!(announcements_are_satisfied(&spend_bundle.coin_spends)?);
        assert!(signature_is_valid(&tracker, spend_bundle)?);

        let conditions = output_conditions(spend_bundle)?;
        assert_eq!(spent_amount(spend_bundle), 1600);
        assert_eq!(created_amount(&conditions) + 50, 1600);
        assert!(conditions.contains(&Condition::ReserveFee { amount: 50 }));

        let cat_change = transactions[0]
            .additions
            .iter()
            .find(|coin| coin.parent_coin_info == cat_coin.coin_id() && coin.amount == 100);
        assert!(cat_change.is_some());

        let (solution, inner_conditions) = cat_spend_details(&spend_bundle.coin_spends[0])?;
        assert_eq!(solution.extra_delta, -200);
        assert!(inner_conditions
            .iter()
            .any(|condition| matches!(condition, Condition::RunTail { .. })));

        // The melted amount comes out on the standard side, less the fee.
        let standard_spend = &spend_bundle.coin_spends[1];
        assert_eq!(standard_spend.coin, xch_coins[0]);
        let standard_conditions = coin_spend_conditions(&mut Allocator::new(), standard_spend)?;
        let ring_announcement =
            cat_announcement_id(cat_coin.coin_id(), coin_set_message([cat_coin.coin_id()]));
        assert!(standard_conditions.contains(&Condition::AssertCoinAnnouncement {
            announcement_id: ring_announcement
        }));

        let standard_transaction = &transactions[1];
        assert_eq!(standard_transaction.removals, xch_coins);
        assert_eq!(standard_transaction.additions.len(), 1);
        assert_eq!(standard_transaction.additions[0].amount, 1150);

        Ok(())
    }

    #[tokio::test]
    async fn test_cat_eve_issuance() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();
        let (cat_wallet, asset_id) = issuing_wallet(&tracker).await?;
        let xch_coins = fund(&tracker, &peer, 0, &[10_000]).await?;

        assert!(matches!(
            tracker
                .generate_signed_transaction(cat_wallet, vec![Payment::new(EXTERNAL, 600)], 0, 500)
                .await,
            Err(WalletError::InsufficientFunds {
                available: 500,
                required: 600
            })
        ));

        let transactions = tracker
            .generate_signed_transaction(cat_wallet, vec![Payment::new(EXTERNAL, 300)], 20, 500)
            .await?;
        assert_eq!(transactions.len(), 2);

        let inner_puzzle_hash = derivation(&tracker, 1, 1).await?.puzzle_hash;
        let eve_coin = Coin::new(
            xch_coins[0].coin_id(),
            cat_puzzle_hash(asset_id, inner_puzzle_hash),
            500,
        );

        let cat_transaction = &transactions[0];
        assert_eq!(cat_transaction.wallet_id, cat_wallet);
        assert_eq!(cat_transaction.amount, 300);
        assert!(cat_transaction.removals.contains(&eve_coin));

        let spend_bundle = cat_transaction.spend_bundle.as_ref().expect("spend bundle");
        assert_eq!(spend_bundle.coin_spends.len(), 2);
        assert_eq!(spend_bundle.coin_spends[1].coin, eve_coin);
        assert!(announcements_are_satisfied(&spend_bundle.coin_spends)?);
        assert!(signature_is_valid(&tracker, spend_bundle)?);

        let conditions = output_conditions(spend_bundle)?;
        assert_eq!(spent_amount(spend_bundle), 10_500);
        assert_eq!(created_amount(&conditions) + 20, 10_500);
        assert!(conditions.contains(&Condition::ReserveFee { amount: 20 }));

        let (solution, inner_conditions) = cat_spend_details(&spend_bundle.coin_spends[1])?;
        assert_eq!(solution.lineage_proof, None);
        assert_eq!(solution.extra_delta, 0);
        assert!(inner_conditions
            .iter()
            .any(|condition| matches!(condition, Condition::RunTail { .. })));

        let standard_transaction = &transactions[1];
        assert_eq!(standard_transaction.wallet_id, 1);
        assert_eq!(standard_transaction.amount, 500);
        assert_eq!(standard_transaction.to_puzzle_hash, eve_coin.puzzle_hash);
        assert_eq!(standard_transaction.removals, xch_coins);
        assert_eq!(standard_transaction.additions[0], eve_coin);
        assert_eq!(standard_transaction.additions[1].amount, 9480);

        // The minted change is spendable once confirmed, without asking the peer about its parent.
        let cat_change = Coin::new(eve_coin.coin_id(), eve_coin.puzzle_hash, 200);
        assert!(cat_transaction.additions.contains(&cat_change));
        peer.add_coin_state(coin_state(cat_change, 12, None));
        tracker
            .ingest(vec![coin_state(cat_change, 12, None)], &peer, None)
            .await?;
        assert_eq!(tracker.select_coins(cat_wallet, 200).await?, vec![cat_change]);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_spend_leaves_state_untouched() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();

        let asset_id = Bytes32::new([5; 32]);
        let cat_wallet = tracker
            .create_wallet(NewWallet::Cat {
                asset_id,
                name: None,
            })
            .await?;
        let cat_coin = receive_cat(&tracker, &peer, asset_id, 600).await?;
        tracker.take_new_subscriptions().await;

        let before = derivation_state(&tracker, cat_wallet).await?;

        let mut receiver = tracker.subscribe();

        // The CAT change is derived before the fee turns out to be unaffordable.
        assert!(matches!(
            tracker
                .generate_signed_transaction(cat_wallet, vec![Payment::new(EXTERNAL, 500)], 50, 0)
                .await,
            Err(WalletError::InsufficientFunds { .. })
        ));

        assert_eq!(derivation_state(&tracker, cat_wallet).await?, before);
        assert!(tracker.take_new_subscriptions().await.is_empty());
        assert!(receiver.try_recv().is_err());
        assert_eq!(tracker.balance(cat_wallet).await?.confirmed, 600);
        assert_eq!(tracker.select_coins(cat_wallet, 600).await?, vec![cat_coin]);

        fund(&tracker, &peer, 0, &[1000]).await?;
        let transactions = tracker
            .generate_signed_transaction(cat_wallet, vec![Payment::new(EXTERNAL, 500)], 50, 0)
            .await?;

        let change_puzzle_hash =
            cat_puzzle_hash(asset_id, derivation(&tracker, 1, 1).await?.puzzle_hash);
        assert!(transactions[0]
            .additions
            .contains(&Coin::new(cat_coin.coin_id(), change_puzzle_hash, 100)));

        Ok(())
    }

    #[tokio::test]
    async fn test_pending_transaction() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();
        let coins = fund(&tracker, &peer, 0, &[1000]).await?;
        tracker.take_new_subscriptions().await;

        let mut transaction = tracker
            .generate_signed_transaction(1, vec![Payment::new(EXTERNAL, 300)], 10, 0)
            .await?
            .remove(0);
        let trade_id = Bytes32::new([8; 32]);
        transaction.trade_id = Some(trade_id);

        let mut receiver = tracker.subscribe();
        tracker.add_pending_transaction(transaction.clone()).await?;
        assert_eq!(
            receiver.try_recv()?,
            StateChange::PendingTransaction {
                wallet_id: 1,
                transaction_id: transaction.id
            }
        );

        let balance = tracker.balance(1).await?;
        assert_eq!(balance.confirmed, 1000);
        assert_eq!(balance.unconfirmed, 690);
        assert_eq!(balance.spendable, 0);
        assert_eq!(balance.pending_change, 690);

        assert!(matches!(
            tracker.select_coins(1, 100).await,
            Err(WalletError::PendingChange {
                pending: 1000,
                required: 100
            })
        ));

        let coin_ids = tracker.take_new_subscriptions().await.coin_ids;
        assert!(coin_ids.contains(&coins[0].coin_id()));
        assert!(coin_ids.contains(&transaction.additions[1].coin_id()));
        assert!(!coin_ids.contains(&transaction.additions[0].coin_id()));

        assert_eq!(tracker.delete_trade_transactions(trade_id).await?, 1);
        assert_eq!(
            receiver.try_recv()?,
            StateChange::TransactionDeleted {
                wallet_id: 1,
                transaction_id: transaction.id
            }
        );
        assert_eq!(tracker.balance(1).await?.unconfirmed, 1000);
        assert_eq!(tracker.select_coins(1, 100).await?, coins);

        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_spends() -> anyhow::Result<()> {
        let tracker = test_tracker(test_config()).await?;
        let peer = TestPeer::new();
        fund(&tracker, &peer, 0, &[1000]).await?;

        assert!(matches!(
            tracker
                .generate_signed_transaction(1, vec![Payment::new(EXTERNAL, 1)], 0, 5)
                .await,
            Err(WalletError::UnsupportedOperation(_))
        ));

        let cat_wallet = tracker
            .create_wallet(NewWallet::Cat {
                asset_id: Bytes32::new([5; 32]),
                name: None,
            })
            .await?;
        assert!(matches!(
            tracker
                .generate_signed_transaction(cat_wallet, vec![Payment::new(EXTERNAL, 1)], 0, 1)
                .await,
            Err(WalletError::Driver(DriverError::MissingTail))
        ));

        assert!(matches!(
            tracker
                .generate_signed_transaction(1, vec![Payment::new(EXTERNAL, 5000)], 0, 0)
                .await,
            Err(WalletError::InsufficientFunds {
                available: 1000,
                required: 5000
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_tail_program() -> anyhow::Result<()> {
        let mut allocator = Allocator::new();
        let ptr = clvm_quote!(()).to_clvm(&mut allocator)?;
        let tail_program = Bytes::new(node_to_bytes(&allocator, ptr)?);
        let asset_id: Bytes32 = tree_hash(&allocator, ptr).into();

        let tracker = test_tracker(test_config()).await?;

        let other_wallet = tracker
            .create_wallet(NewWallet::Cat {
                asset_id: Bytes32::new([5; 32]),
                name: None,
            })
            .await?;
        assert!(matches!(
            tracker
                .set_tail_program(other_wallet, tail_program.clone())
                .await,
            Err(WalletError::TailMismatch { .. })
        ));
        assert!(matches!(
            tracker.set_tail_program(1, tail_program.clone()).await,
            Err(WalletError::UnsupportedOperation(_))
        ));

        let cat_wallet = tracker
            .create_wallet(NewWallet::Cat {
                asset_id,
                name: Some("Test".to_string()),
            })
            .await?;
        tracker.set_tail_program(cat_wallet, tail_program).await?;

        let wallets = tracker.wallets().await?;
        let record = wallets
            .iter()
            .find(|wallet| wallet.id == cat_wallet)
            .expect("CAT wallet");
        assert_eq!(record.name, "Test");
        assert_ne!(record.data, CatPolicy::new(cat_wallet, asset_id).state()?);

        Ok(())
    }
}
