//! The declarative query request shape: a block range, per-table filter
//! items, and a field projection.

use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Chains the archive can be configured against. EVM-family chains share one
/// item-request shape today; the others are carried as
/// forward-compatibility placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Ethereum and EVM-compatible chains (blocks/transactions/logs/traces).
    Eth,
    /// Substrate-based chains.
    Substrate,
    /// Solana.
    Solana,
    /// Starknet.
    Starknet,
    /// Tron.
    Tron,
    /// Fuel.
    Fuel,
}

/// A `{ address, topics }` log filter item, as carried in
/// `ArchiveQuery::logs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Contract addresses to match, OR'd together. Empty means "any".
    #[serde(default)]
    pub address: Vec<String>,
    /// Per-position topic filters; each inner list is OR'd, positions are
    /// AND'd. Empty means "any".
    #[serde(default)]
    pub topics: Vec<Vec<String>>,
}

/// A transaction filter item, as carried in `ArchiveQuery::transactions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxFilter {
    /// Sender addresses to match. Empty means "any".
    #[serde(default)]
    pub from: Vec<String>,
    /// Recipient addresses to match. Empty means "any".
    #[serde(default)]
    pub to: Vec<String>,
    /// Function selectors (first 4 bytes of calldata) to match.
    #[serde(default)]
    pub sighash: Vec<String>,
}

/// A trace filter item, as carried in `ArchiveQuery::traces`. Inclusion of a
/// trace's parent transaction or its own sub-traces is not a predicate on
/// this item but a projection flag (`fields.trace` containing `"transaction"`
/// or `"subtraces"`), matching how `fields.log.transaction` pulls in a log's
/// parent transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceFilter {
    /// Trace variant (`"call"`, `"create"`, `"suicide"`, `"reward"`) to
    /// match. Empty means "any".
    #[serde(default, rename = "type")]
    pub kind: Vec<String>,
    /// `create` traces whose `from` address matches.
    #[serde(default, rename = "createFrom")]
    pub create_from: Vec<String>,
    /// `call` traces whose `from` address matches.
    #[serde(default, rename = "callFrom")]
    pub call_from: Vec<String>,
    /// `call` traces whose `to` address matches.
    #[serde(default, rename = "callTo")]
    pub call_to: Vec<String>,
    /// `call` traces whose function selector matches.
    #[serde(default, rename = "callSighash")]
    pub call_sighash: Vec<String>,
    /// `suicide` traces whose refund address matches.
    #[serde(default, rename = "suicideRefundAddress")]
    pub suicide_refund_address: Vec<String>,
    /// `reward` traces whose author address matches.
    #[serde(default, rename = "rewardAuthor")]
    pub reward_author: Vec<String>,
}

/// A state-diff filter item, as carried in `ArchiveQuery::state_diffs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDiffFilter {
    /// Addresses whose diffs to match. Empty means "any".
    #[serde(default)]
    pub address: Vec<String>,
    /// Storage/slot keys to match. Empty means "any".
    #[serde(default)]
    pub key: Vec<String>,
    /// Diff kinds (`"storage"`, `"balance"`, `"nonce"`, `"code"`) to match.
    #[serde(default)]
    pub kind: Vec<String>,
}

/// Per-table field projection: which optional columns the caller wants back.
/// A table's own list also carries boolean-like relation flags (e.g.
/// `log` containing the literal `"transaction"` pulls in the transaction of
/// every selected log), rather than a parallel boolean-flag struct shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSelection {
    /// Block table column names to include.
    #[serde(default)]
    pub block: Vec<String>,
    /// Transaction table column names to include.
    #[serde(default)]
    pub transaction: Vec<String>,
    /// Log table column names to include.
    #[serde(default)]
    pub log: Vec<String>,
    /// Trace table column names to include.
    #[serde(default)]
    pub trace: Vec<String>,
    /// State-diff table column names to include.
    #[serde(default, rename = "stateDiff")]
    pub state_diff: Vec<String>,
}

/// A fully-parsed archive query: a block-range scan joined with
/// item-level predicates and a field projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveQuery {
    /// Which chain's table set this query is interpreted against.
    #[serde(rename = "type", default = "default_chain")]
    pub chain: Chain,
    /// First block to scan, inclusive.
    #[serde(rename = "fromBlock")]
    pub from_block: u64,
    /// Last block to scan, inclusive. `None` means "up to the chain head".
    #[serde(rename = "toBlock", default)]
    pub to_block: Option<u64>,
    /// When true, every block in the range is returned even if nothing in it
    /// matches an item filter.
    #[serde(rename = "includeAllBlocks", default)]
    pub include_all_blocks: bool,
    /// Log filter items; an empty list matches no logs.
    #[serde(default)]
    pub logs: Vec<LogFilter>,
    /// Transaction filter items; an empty list matches no transactions.
    #[serde(default)]
    pub transactions: Vec<TxFilter>,
    /// Trace filter items; an empty list matches no traces.
    #[serde(default)]
    pub traces: Vec<TraceFilter>,
    /// State-diff filter items; an empty list matches no state diffs.
    #[serde(default, rename = "stateDiffs")]
    pub state_diffs: Vec<StateDiffFilter>,
    /// Column projection.
    #[serde(default)]
    pub fields: FieldSelection,
}

fn default_chain() -> Chain {
    Chain::Eth
}

/// The per-query item-entry budget: a query whose combined
/// filter-item count exceeds this is rejected outright rather than run.
pub const MAX_QUERY_ITEMS: usize = 100;

/// Errors that make an [`ArchiveQuery`] unrunnable before any chunk is read.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum QueryValidationError {
    /// `toBlock` was set below `fromBlock`.
    #[snafu(display("toBlock ({to_block}) is less than fromBlock ({from_block})"))]
    InvertedRange { from_block: u64, to_block: u64 },

    /// The combined `logs` + `transactions` item count exceeded the budget.
    #[snafu(display("query has {item_count} filter items, over the limit of {limit}"))]
    TooManyItems { item_count: usize, limit: usize },
}

impl ArchiveQuery {
    /// Total number of filter items in this query, across every item table.
    pub fn item_count(&self) -> usize {
        self.logs.len() + self.transactions.len() + self.traces.len() + self.state_diffs.len()
    }

    /// Validate the range and budget invariants. Does not
    /// validate that referenced tables/columns exist for `self.chain` —
    /// that is the query plan compiler's job.
    pub fn validate(&self) -> Result<(), QueryValidationError> {
        if let Some(to_block) = self.to_block {
            if to_block < self.from_block {
                return Err(QueryValidationError::InvertedRange {
                    from_block: self.from_block,
                    to_block,
                });
            }
        }
        let item_count = self.item_count();
        if item_count > MAX_QUERY_ITEMS {
            return Err(QueryValidationError::TooManyItems {
                item_count,
                limit: MAX_QUERY_ITEMS,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_query() -> ArchiveQuery {
        ArchiveQuery {
            chain: Chain::Eth,
            from_block: 100,
            to_block: Some(200),
            include_all_blocks: false,
            logs: vec![],
            transactions: vec![],
            traces: vec![],
            state_diffs: vec![],
            fields: FieldSelection::default(),
        }
    }

    #[test]
    fn accepts_well_formed_query() {
        assert!(base_query().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_range() {
        let mut q = base_query();
        q.to_block = Some(50);
        assert_eq!(
            q.validate(),
            Err(QueryValidationError::InvertedRange {
                from_block: 100,
                to_block: 50
            })
        );
    }

    #[test]
    fn rejects_too_many_items() {
        let mut q = base_query();
        q.logs = (0..MAX_QUERY_ITEMS + 1).map(|_| LogFilter::default()).collect();
        assert_eq!(
            q.validate(),
            Err(QueryValidationError::TooManyItems {
                item_count: MAX_QUERY_ITEMS + 1,
                limit: MAX_QUERY_ITEMS,
            })
        );
    }

    #[test]
    fn deserializes_wire_shape() {
        let json = r#"{
            "type": "eth",
            "fromBlock": 10,
            "toBlock": 20,
            "logs": [{"address": ["0xabc"], "topics": [["0x1"]]}]
        }"#;
        let q: ArchiveQuery = serde_json::from_str(json).unwrap();
        assert_eq!(q.from_block, 10);
        assert_eq!(q.logs[0].address, vec!["0xabc"]);
    }
}
