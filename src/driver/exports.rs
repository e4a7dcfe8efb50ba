//! Export collection in reverse topological order.

use super::record::{ModuleRecord, RecordState};
use super::resolve::{resolve_record, ResolveParams};
use crate::frontend::Frontend;
use crate::graph::{DepGraph, Topo};
use crate::symbols::{ExportsMap, ModuleExports};
use crate::timing::Tracer;
use ahash::AHashMap;
use std::sync::Arc;

pub(super) struct CollectParams<'a> {
    pub frontend: &'a Frontend,
    pub no_alien_hints: bool,
    pub record_instantiations: bool,
    pub tracer: &'a Tracer,
}

/// Walk the topo order deepest-dependency-first, resolving each module
/// and snapshotting its exports so shallower modules see a complete
/// table. Builtin-export modules (the stdlib closure) go first: they are
/// an implicit dependency of everything without carrying graph edges.
/// Alias spellings receive a copy of the canonical entry as soon as the
/// canonical table lands, so importers resolve through either key.
pub(super) fn collect_exports(
    records: &mut [ModuleRecord],
    graph: &DepGraph,
    topo: &Topo,
    aliases: &AHashMap<String, String>,
    params: &CollectParams<'_>,
) -> ExportsMap {
    let mut aliases_of: AHashMap<&str, Vec<&str>> = AHashMap::new();
    for (alias, canonical) in aliases {
        aliases_of
            .entry(canonical.as_str())
            .or_default()
            .push(alias.as_str());
    }

    let slots: Vec<usize> = topo
        .order
        .iter()
        .rev()
        .filter_map(|node| graph.slot_of_node[*node])
        .collect();
    let (builtin, regular): (Vec<usize>, Vec<usize>) = slots
        .into_iter()
        .partition(|slot| records[*slot].builtin_exports);

    let mut exports = ExportsMap::default();
    for slot in builtin.into_iter().chain(regular) {
        let record = &mut records[slot];

        // Cached exports are reused unless incomplete; incomplete tables
        // (unresolved type ids, missing contract bodies) force a
        // re-resolution.
        if record.state < RecordState::Resolved || !record.exports_complete() {
            resolve_record(
                record,
                &ResolveParams {
                    frontend: params.frontend,
                    exports: &exports,
                    no_alien_hints: params.no_alien_hints,
                    record_instantiations: params.record_instantiations,
                    tracer: params.tracer,
                },
            );
            if record.builtin_exports {
                record.table.mark_all_builtin();
            }
            record.exports = Some(Arc::new(ModuleExports::from_table(
                record.meta.path.clone(),
                &record.table,
            )));
        }
        record.advance(RecordState::Exported);

        if let Some(snapshot) = &record.exports {
            exports.insert(record.meta.path.clone(), Arc::clone(snapshot));
            if let Some(alias_list) = aliases_of.get(record.meta.path.as_str()) {
                for alias in alias_list {
                    exports.insert((*alias).to_string(), Arc::clone(snapshot));
                }
            }
        }
    }
    exports
}
