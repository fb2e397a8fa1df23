//! Per-chain query model: which scans and output items exist, and how an
//! item's rows are reached from a scan (directly, by reference, by join, or
//! by address-prefix subtree expansion). For the Ethereum model, logs and
//! transactions both feed the block scan via block-number union, and a log
//! can additionally reference its parent transaction.

use schema::TableKind;

/// How an item's selection reaches rows beyond its own direct scan.
#[derive(Debug, Clone)]
pub enum Source {
    /// The item's own scan contributes its matched rows directly.
    Scan {
        /// Name of the [`Scan`] this source pulls from.
        scan: &'static str,
    },
    /// Pull in rows referenced by a selected row of another item, gated on a
    /// request-level flag (e.g. `fields.log.transaction=true` pulls in the
    /// transaction of every selected log).
    RefRel {
        /// The scan whose selected rows carry the reference.
        parent_scan: &'static str,
        /// The `fields.<item>.<flag>` flag that enables this relation.
        flag_field: &'static str,
    },
    /// Pull in every row of this item's table that shares a join key with a
    /// selected row of another scan (e.g. every log of every selected
    /// transaction).
    JoinRel {
        /// The scan whose selected rows provide the join keys.
        parent_scan: &'static str,
    },
    /// Pull in every descendant row by address-prefix containment over a
    /// list column (traces' `traceAddress`, instructions' `instructionAddress`).
    SubRel {
        /// Column holding the address-prefix path.
        address_column: &'static str,
        /// The request-level flag that enables subtree expansion.
        flag_field: &'static str,
    },
}

/// One request family: maps part of an [`crate::ArchiveQuery`] to a pushdown
/// predicate over a table.
#[derive(Debug, Clone)]
pub struct Scan {
    /// Scan name, referenced by [`Source::Scan`]/`RefRel`/`JoinRel`.
    pub name: &'static str,
    /// Table the scan reads.
    pub table: TableKind,
}

/// One output collection in the response.
#[derive(Debug, Clone)]
pub struct Item {
    /// Item name (`"blocks"`, `"transactions"`, `"logs"`).
    pub name: &'static str,
    /// Table the item reads row data from.
    pub table: TableKind,
    /// How this item's rows are reached.
    pub sources: Vec<Source>,
}

/// The full per-chain query model: every scan and item the compiler knows
/// how to wire together.
#[derive(Debug, Clone)]
pub struct Model {
    /// Request-family scans.
    pub scans: Vec<Scan>,
    /// Output items, in response order.
    pub items: Vec<Item>,
}

impl Model {
    /// Look up a scan by name.
    pub fn scan(&self, name: &str) -> Option<&Scan> {
        self.scans.iter().find(|s| s.name == name)
    }
}

/// The EVM reference model: `logs`, `transactions`, `traces` and
/// `state_diffs` scans, with `blocks` as the special item whose selection is
/// the union of the others.
pub fn eth_model() -> Model {
    Model {
        scans: vec![
            Scan {
                name: "logs",
                table: TableKind::Log,
            },
            Scan {
                name: "transactions",
                table: TableKind::Transaction,
            },
            Scan {
                name: "traces",
                table: TableKind::Trace,
            },
            Scan {
                name: "state_diffs",
                table: TableKind::StateDiff,
            },
        ],
        items: vec![
            Item {
                name: "logs",
                table: TableKind::Log,
                sources: vec![Source::Scan { scan: "logs" }],
            },
            Item {
                name: "transactions",
                table: TableKind::Transaction,
                sources: vec![
                    Source::Scan { scan: "transactions" },
                    Source::RefRel {
                        parent_scan: "logs",
                        flag_field: "transaction",
                    },
                    Source::RefRel {
                        parent_scan: "traces",
                        flag_field: "transaction",
                    },
                ],
            },
            Item {
                name: "traces",
                table: TableKind::Trace,
                sources: vec![
                    Source::Scan { scan: "traces" },
                    Source::SubRel {
                        address_column: "trace_address",
                        flag_field: "subtraces",
                    },
                ],
            },
            Item {
                name: "state_diffs",
                table: TableKind::StateDiff,
                sources: vec![Source::Scan { scan: "state_diffs" }],
            },
            Item {
                name: "blocks",
                table: TableKind::Block,
                sources: vec![
                    Source::JoinRel { parent_scan: "logs" },
                    Source::JoinRel { parent_scan: "transactions" },
                    Source::JoinRel { parent_scan: "traces" },
                    Source::JoinRel { parent_scan: "state_diffs" },
                ],
            },
        ],
    }
}
