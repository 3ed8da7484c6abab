use chia_sync_store::{
    delete_lineage_proofs_for_coin, delete_transaction, fetch_transactions_above,
    rollback_coin_records, set_transaction_pending,
};
use tracing::{info, instrument};

use crate::{Result, StateChange};

use super::Session;

impl Session<'_> {
    /// Forgets coins created above the height and unspends those spent above it.
    /// Transactions that may confirm again become pending, and the rest are deleted.
    #[instrument(skip(self))]
    pub(crate) async fn rollback_to(&mut self, height: u32) -> Result<()> {
        let removed = rollback_coin_records(self.conn, height).await?;

        for coin_id in &removed {
            delete_lineage_proofs_for_coin(self.conn, *coin_id).await?;

            for policy in self.state.policies.values_mut() {
                policy.forget_coin(*coin_id);
            }
        }

        let mut pending = 0;
        let mut deleted = 0;

        for transaction in fetch_transactions_above(self.conn, height).await? {
            if transaction.kind.survives_reorg() {
                set_transaction_pending(self.conn, transaction.id).await?;
                pending += 1;
            } else {
                delete_transaction(self.conn, transaction.id).await?;
                deleted += 1;
            }
        }

        let doomed: Vec<u32> = self
            .state
            .policies
            .values()
            .filter(|policy| policy.removed_by_rollback(height))
            .map(|policy| policy.wallet_id())
            .collect();

        for wallet_id in doomed {
            self.delete_wallet(wallet_id).await?;
        }

        info!(
            coins = removed.len(),
            pending, deleted, "rolled back to height"
        );

        self.events.push(StateChange::Reorg { height });

        Ok(())
    }
}
