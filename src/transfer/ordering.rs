//! Lock-acquisition order for the two balance updates of a transfer.
//!
//! Every transfer updates the lower account id first. With one global order
//! on row locks, two transfers on the same pair of accounts can wait on each
//! other but never in a cycle.
//!
//! This relies on account ids being totally ordered and shared by every
//! writer of the `accounts` table. Ids that do not compare that way (random
//! tokens, per-shard sequences) break the guarantee.

use crate::domain::{AddAccountBalanceParams, TransferTxParams};

/// Which side of the transfer an account is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

/// A signed balance change for one side of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub role: Role,
    pub account_id: i64,
    pub amount: i64,
}

impl From<BalanceDelta> for AddAccountBalanceParams {
    fn from(delta: BalanceDelta) -> Self {
        Self {
            id: delta.account_id,
            amount: delta.amount,
        }
    }
}

/// The two balance updates of a transfer, in the order their rows must be locked.
///
/// Signs follow the role: the source is debited, the destination credited.
pub fn lock_order(arg: &TransferTxParams) -> [BalanceDelta; 2] {
    let debit = BalanceDelta {
        role: Role::Source,
        account_id: arg.from_account_id,
        amount: -arg.amount,
    };
    let credit = BalanceDelta {
        role: Role::Destination,
        account_id: arg.to_account_id,
        amount: arg.amount,
    };

    if arg.from_account_id < arg.to_account_id {
        [debit, credit]
    } else {
        [credit, debit]
    }
}
