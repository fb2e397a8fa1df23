//! The 4-step compilation algorithm: turn a validated
//! [`ArchiveQuery`] plus a [`Model`] into per-scan predicates and per-item
//! selection/weight/data descriptors the executor runs against each chunk.

use crate::model::{Model, Source};
use chain_types::query::{ArchiveQuery, LogFilter, StateDiffFilter, TraceFilter, TxFilter};
use predicate::Predicate;
use schema::TableKind;
use std::collections::BTreeSet;

/// One compiled scan: the table it reads and the pushdown predicate over it
/// (block range ANDed with the OR of every filter variant). `None` means the
/// request carried no filter for this scan, so it contributes nothing.
#[derive(Debug, Clone)]
pub struct CompiledScan {
    /// Scan name, matches [`crate::model::Scan::name`].
    pub name: &'static str,
    /// Table the scan reads.
    pub table: TableKind,
    /// Pushdown predicate; `None` if the scan is unused by this query.
    pub predicate: Option<Predicate>,
}

/// One compiled item: which columns it must read (key columns plus the
/// requested field projection), which sources feed its selection, and an
/// estimated per-row byte weight for response-size budgeting.
#[derive(Debug, Clone)]
pub struct CompiledItem {
    /// Item name, matches [`crate::model::Item::name`].
    pub name: &'static str,
    /// Table the item reads row data from.
    pub table: TableKind,
    /// Columns beyond the primary key the caller asked to see.
    pub selected_fields: Vec<String>,
    /// Scans this item's selection is the union of.
    pub source_scans: Vec<&'static str>,
    /// True if this item also needs rows referenced by another scan's
    /// selection (the log → transaction `RefRel`).
    pub needs_ref_rel: bool,
    /// Estimated byte weight charged per selected row, from the table's
    /// schema-level average row weight plus per-row overhead.
    pub row_weight: u64,
}

/// A fixed per-row response-framing cost (JSON punctuation, block-number and
/// index fields emitted on every row regardless of field selection).
const ROW_OVERHEAD_BYTES: u64 = 24;

/// The compiled plan, shared across every chunk the executor visits.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Compiled scans, in model order.
    pub scans: Vec<CompiledScan>,
    /// Compiled items, in model order. The `"blocks"` item is always last.
    pub items: Vec<CompiledItem>,
    /// Inclusive block range every scan is implicitly restricted to.
    pub block_range: (u64, Option<u64>),
    /// Whether every block in range must appear even without a matching item.
    pub include_all_blocks: bool,
}

/// Compile `query` against `model`. `query` must already have passed
/// [`ArchiveQuery::validate`].
pub fn compile(model: &Model, query: &ArchiveQuery) -> QueryPlan {
    let scans = model
        .scans
        .iter()
        .map(|scan| CompiledScan {
            name: scan.name,
            table: scan.table,
            predicate: compile_scan_predicate(scan.name, query),
        })
        .collect::<Vec<_>>();

    let items = model
        .items
        .iter()
        .map(|item| compile_item(item, &scans, query))
        .collect();

    QueryPlan {
        scans,
        items,
        block_range: (query.from_block, query.to_block),
        include_all_blocks: query.include_all_blocks,
    }
}

/// Step 1: build the `AND`-of-`OR`-of-variants pushdown predicate for one
/// named scan, mirroring `_QueryRunner.logs_query`/`tx_query` in the
/// original engine. Returns `None` when the request has no filter items for
/// this scan (an unused scan contributes no rows).
fn compile_scan_predicate(scan_name: &str, query: &ArchiveQuery) -> Option<Predicate> {
    match scan_name {
        "logs" => compile_log_scan(&query.logs, query.from_block, query.to_block),
        "transactions" => compile_tx_scan(&query.transactions, query.from_block, query.to_block),
        "traces" => compile_trace_scan(&query.traces, query.from_block, query.to_block),
        "state_diffs" => compile_state_diff_scan(&query.state_diffs, query.from_block, query.to_block),
        _ => None,
    }
}

fn compile_log_scan(filters: &[LogFilter], from_block: u64, to_block: Option<u64>) -> Option<Predicate> {
    if filters.is_empty() {
        return None;
    }
    let variants = filters
        .iter()
        .filter_map(|f| {
            let mut ops = Vec::new();
            if !f.address.is_empty() {
                ops.push(Predicate::in_set("address", f.address.clone()));
            }
            for (position, topics) in f.topics.iter().enumerate() {
                if !topics.is_empty() && position < 4 {
                    ops.push(Predicate::in_set(format!("topic{position}"), topics.clone()));
                }
            }
            if ops.is_empty() {
                None
            } else {
                Some(ops.into_iter().fold(Predicate::True, Predicate::and))
            }
        })
        .collect::<Vec<_>>();
    if variants.is_empty() {
        return None;
    }
    let or_variants = variants.into_iter().fold(Predicate::Or(vec![]), Predicate::or);
    Some(Predicate::block_range("block_number", from_block, to_block).and(or_variants))
}

fn compile_tx_scan(filters: &[TxFilter], from_block: u64, to_block: Option<u64>) -> Option<Predicate> {
    if filters.is_empty() {
        return None;
    }
    let variants = filters
        .iter()
        .filter_map(|f| {
            let mut ops = Vec::new();
            if !f.from.is_empty() {
                ops.push(Predicate::in_set("from", f.from.clone()));
            }
            if !f.to.is_empty() {
                ops.push(Predicate::in_set("to", f.to.clone()));
            }
            if !f.sighash.is_empty() {
                ops.push(Predicate::in_set("sighash", f.sighash.clone()));
            }
            if ops.is_empty() {
                None
            } else {
                Some(ops.into_iter().fold(Predicate::True, Predicate::and))
            }
        })
        .collect::<Vec<_>>();
    if variants.is_empty() {
        return None;
    }
    let or_variants = variants.into_iter().fold(Predicate::Or(vec![]), Predicate::or);
    Some(Predicate::block_range("block_number", from_block, to_block).and(or_variants))
}

fn compile_trace_scan(filters: &[TraceFilter], from_block: u64, to_block: Option<u64>) -> Option<Predicate> {
    if filters.is_empty() {
        return None;
    }
    let variants = filters
        .iter()
        .filter_map(|f| {
            let mut ops = Vec::new();
            if !f.kind.is_empty() {
                ops.push(Predicate::in_set("type", f.kind.clone()));
            }
            if !f.create_from.is_empty() {
                ops.push(Predicate::in_set("create_from", f.create_from.clone()));
            }
            if !f.call_from.is_empty() {
                ops.push(Predicate::in_set("call_from", f.call_from.clone()));
            }
            if !f.call_to.is_empty() {
                ops.push(Predicate::in_set("call_to", f.call_to.clone()));
            }
            if !f.call_sighash.is_empty() {
                ops.push(Predicate::in_set("call_sighash", f.call_sighash.clone()));
            }
            if !f.suicide_refund_address.is_empty() {
                ops.push(Predicate::in_set("suicide_refund_address", f.suicide_refund_address.clone()));
            }
            if !f.reward_author.is_empty() {
                ops.push(Predicate::in_set("reward_author", f.reward_author.clone()));
            }
            if ops.is_empty() {
                None
            } else {
                Some(ops.into_iter().fold(Predicate::True, Predicate::and))
            }
        })
        .collect::<Vec<_>>();
    if variants.is_empty() {
        return None;
    }
    let or_variants = variants.into_iter().fold(Predicate::Or(vec![]), Predicate::or);
    Some(Predicate::block_range("block_number", from_block, to_block).and(or_variants))
}

fn compile_state_diff_scan(filters: &[StateDiffFilter], from_block: u64, to_block: Option<u64>) -> Option<Predicate> {
    if filters.is_empty() {
        return None;
    }
    let variants = filters
        .iter()
        .filter_map(|f| {
            let mut ops = Vec::new();
            if !f.address.is_empty() {
                ops.push(Predicate::in_set("address", f.address.clone()));
            }
            if !f.key.is_empty() {
                ops.push(Predicate::in_set("key", f.key.clone()));
            }
            if !f.kind.is_empty() {
                ops.push(Predicate::in_set("kind", f.kind.clone()));
            }
            if ops.is_empty() {
                None
            } else {
                Some(ops.into_iter().fold(Predicate::True, Predicate::and))
            }
        })
        .collect::<Vec<_>>();
    if variants.is_empty() {
        return None;
    }
    let or_variants = variants.into_iter().fold(Predicate::Or(vec![]), Predicate::or);
    Some(Predicate::block_range("block_number", from_block, to_block).and(or_variants))
}

fn compile_item(
    item: &crate::model::Item,
    scans: &[CompiledScan],
    query: &ArchiveQuery,
) -> CompiledItem {
    let mut source_scans = BTreeSet::new();
    let mut needs_ref_rel = false;

    for source in &item.sources {
        match source {
            Source::Scan { scan } => {
                if scans.iter().any(|s| s.name == *scan && s.predicate.is_some()) {
                    source_scans.insert(*scan);
                }
            }
            Source::RefRel { parent_scan, flag_field } => {
                let parent_active = scans.iter().any(|s| s.name == *parent_scan && s.predicate.is_some());
                if parent_active && field_selection_flag(query, parent_scan, flag_field) {
                    needs_ref_rel = true;
                }
            }
            Source::JoinRel { parent_scan } => {
                if scans.iter().any(|s| s.name == *parent_scan && s.predicate.is_some()) {
                    source_scans.insert(*parent_scan);
                }
            }
            Source::SubRel { flag_field, .. } => {
                if field_selection_flag(query, item.name, flag_field) {
                    source_scans.insert(item.name);
                }
            }
        }
    }

    let selected_fields = match item.name {
        "block" | "blocks" => query.fields.block.clone(),
        "transaction" | "transactions" => query.fields.transaction.clone(),
        "log" | "logs" => query.fields.log.clone(),
        "trace" | "traces" => query.fields.trace.clone(),
        "state_diff" | "state_diffs" => query.fields.state_diff.clone(),
        _ => Vec::new(),
    };

    CompiledItem {
        name: item.name,
        table: item.table,
        selected_fields,
        source_scans: source_scans.into_iter().collect(),
        needs_ref_rel,
        // A coarse a-priori estimate only, since the request's actual field
        // selection (and hence which `*_size` aux columns apply) isn't
        // known until a row is read; the executor computes the real
        // per-row weight from the table's column weight map.
        row_weight: schema::row_weight(item.table) + ROW_OVERHEAD_BYTES,
    }
}

/// `fields.<scope>` is modeled as carrying boolean-like relation flags
/// alongside plain column names: `fields.log` containing `"transaction"`
/// means "include the transaction of a selected log", `fields.trace`
/// containing `"transaction"` means "include the transaction of a selected
/// trace", and `fields.trace` containing `"subtraces"` means "include this
/// trace's sub-traces by address-prefix containment".
fn field_selection_flag(query: &ArchiveQuery, scope: &str, flag_field: &str) -> bool {
    let selection: &[String] = match scope {
        "logs" => &query.fields.log,
        "transactions" => &query.fields.transaction,
        "traces" => &query.fields.trace,
        "state_diffs" => &query.fields.state_diff,
        _ => return false,
    };
    selection.iter().any(|f| f == flag_field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::eth_model;
    use chain_types::query::{Chain, FieldSelection};

    fn query(logs: Vec<LogFilter>, transactions: Vec<TxFilter>) -> ArchiveQuery {
        ArchiveQuery {
            chain: Chain::Eth,
            from_block: 100,
            to_block: Some(200),
            include_all_blocks: false,
            logs,
            transactions,
            traces: vec![],
            state_diffs: vec![],
            fields: FieldSelection::default(),
        }
    }

    #[test]
    fn empty_query_compiles_no_active_scans() {
        let plan = compile(&eth_model(), &query(vec![], vec![]));
        assert!(plan.scans.iter().all(|s| s.predicate.is_none()));
        let blocks = plan.items.iter().find(|i| i.name == "blocks").unwrap();
        assert!(blocks.source_scans.is_empty());
    }

    #[test]
    fn log_filter_activates_logs_scan_and_feeds_blocks() {
        let filter = LogFilter {
            address: vec!["0xabc".into()],
            topics: vec![],
        };
        let plan = compile(&eth_model(), &query(vec![filter], vec![]));
        let logs_scan = plan.scans.iter().find(|s| s.name == "logs").unwrap();
        assert!(logs_scan.predicate.is_some());

        let blocks = plan.items.iter().find(|i| i.name == "blocks").unwrap();
        assert_eq!(blocks.source_scans, vec!["logs"]);
    }

    #[test]
    fn log_transaction_flag_enables_ref_rel() {
        let mut q = query(
            vec![LogFilter {
                address: vec!["0xabc".into()],
                topics: vec![],
            }],
            vec![],
        );
        q.fields.log = vec!["transaction".into()];
        let plan = compile(&eth_model(), &q);
        let transactions = plan.items.iter().find(|i| i.name == "transactions").unwrap();
        assert!(transactions.needs_ref_rel);
    }

    #[test]
    fn no_filter_items_means_scan_is_inert() {
        let plan = compile(&eth_model(), &query(vec![], vec![]));
        let logs_scan = plan.scans.iter().find(|s| s.name == "logs").unwrap();
        assert!(logs_scan.predicate.is_none());
    }
}
