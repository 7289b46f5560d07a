//! Shared test domain: a toy ledger aggregate.

#![allow(dead_code)] // each test binary uses a subset of this module

use echolog::{Behavior, Reaction};

/// The only fact the ledger records.
#[derive(Debug, Clone, PartialEq)]
pub struct Credited {
    pub account: String,
    pub amount: u64,
}

#[derive(Debug)]
pub enum LedgerRequest {
    Deposit { account: String, amount: u64 },
    DepositMany { account: String, amounts: Vec<u64> },
    Balance { account: String },
}

impl LedgerRequest {
    pub fn account(&self) -> &str {
        match self {
            Self::Deposit { account, .. }
            | Self::DepositMany { account, .. }
            | Self::Balance { account } => account,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Receipt {
    pub account: String,
    pub balance: u64,
}

pub type LedgerResponse = Result<Receipt, String>;

/// One ledger per aggregate: the state is the running balance of every
/// credit delivered from the log, regardless of which engine wrote it.
pub struct Ledger;

impl Behavior for Ledger {
    type State = u64;
    type Event = Credited;
    type Request = LedgerRequest;
    type Response = LedgerResponse;

    fn initial_state(&self) -> u64 {
        0
    }

    fn apply(&self, state: &mut u64, event: &Credited) {
        *state += event.amount;
    }

    fn decide(&self, _state: &u64, request: LedgerRequest) -> Reaction<u64, Credited, LedgerResponse> {
        match request {
            LedgerRequest::Deposit { account, amount } => {
                if amount == 0 {
                    return Reaction::reply(move |_state: &u64| {
                        Err(format!("zero deposit rejected for '{account}'"))
                    });
                }
                let receipt_account = account.clone();
                Reaction::new(vec![Credited { account, amount }], move |state: &u64| {
                    Ok(Receipt {
                        account: receipt_account,
                        balance: *state,
                    })
                })
            }
            LedgerRequest::DepositMany { account, amounts } => {
                let receipt_account = account.clone();
                let credits = amounts
                    .into_iter()
                    .map(|amount| Credited {
                        account: account.clone(),
                        amount,
                    })
                    .collect();
                Reaction::new(credits, move |state: &u64| {
                    Ok(Receipt {
                        account: receipt_account,
                        balance: *state,
                    })
                })
            }
            LedgerRequest::Balance { account } => Reaction::reply(move |state: &u64| {
                Ok(Receipt {
                    account,
                    balance: *state,
                })
            }),
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
