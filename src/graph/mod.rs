//! Module dependency DAG: stable ids, Kahn topological ordering with
//! layered batches, cycle containment and content-hash propagation.

use crate::diagnostics::{Code, Diagnostic};
use crate::digest::Digest;
use crate::meta::ModuleMeta;
use ahash::AHashMap;
use std::sync::Arc;

/// Minimum batch width before hash computation fans out to workers.
const PARALLEL_HASH_THRESHOLD: usize = 4;

/// Stable integer ids for every referenced module path.
///
/// Ids are assigned in sorted-path order, which makes every downstream
/// tie-break deterministic.
#[derive(Debug, Default)]
pub struct ModuleIndex {
    names: Vec<String>,
    by_name: AHashMap<String, usize>,
}

impl ModuleIndex {
    /// Gather all referenced module paths (each module itself plus its
    /// imports) into a sorted, deduplicated id space.
    pub fn build<'a>(metas: impl Iterator<Item = &'a ModuleMeta>) -> ModuleIndex {
        let mut names: Vec<String> = Vec::new();
        for meta in metas {
            names.push(meta.path.clone());
            for import in &meta.imports {
                names.push(import.path.clone());
            }
        }
        names.sort();
        names.dedup();
        let by_name = names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id))
            .collect();
        ModuleIndex { names, by_name }
    }

    pub fn id_of(&self, path: &str) -> Option<usize> {
        self.by_name.get(path).copied()
    }

    pub fn name(&self, id: usize) -> &str {
        &self.names[id]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Edge set over a [`ModuleIndex`] id space.
#[derive(Debug)]
pub struct DepGraph {
    /// `edges[from]`: sorted, deduplicated dependency ids. Only present
    /// targets appear.
    pub edges: Vec<Vec<usize>>,
    /// Whether a node id has a concrete module behind it.
    pub present: Vec<bool>,
    /// Number of importers per node.
    pub in_degree: Vec<usize>,
    /// Meta slot backing each node, when present.
    pub slot_of_node: Vec<Option<usize>>,
    /// Node id of each meta slot (the winner for duplicated paths).
    pub node_of_slot: Vec<usize>,
}

/// Build the edge set from module metas.
///
/// `report(slot, diagnostic)` receives `DuplicateModule` for a path
/// registered twice (the first registration wins), `SelfImport` for
/// self-loops, and `MissingModule` for imports whose target has no
/// module behind it.
pub fn build_graph(
    index: &ModuleIndex,
    metas: &[Arc<ModuleMeta>],
    mut report: impl FnMut(usize, Diagnostic),
) -> DepGraph {
    let n = index.len();
    let mut present = vec![false; n];
    let mut slot_of_node: Vec<Option<usize>> = vec![None; n];
    let mut node_of_slot = vec![0usize; metas.len()];

    for (slot, meta) in metas.iter().enumerate() {
        let node = index
            .id_of(&meta.path)
            .expect("module path missing from index");
        node_of_slot[slot] = node;
        if let Some(first_slot) = slot_of_node[node] {
            report(
                slot,
                Diagnostic::error(
                    Code::DUPLICATE_MODULE,
                    meta.primary_span(),
                    format!("module '{}' is registered more than once", meta.path),
                )
                .with_note(
                    metas[first_slot].primary_span(),
                    "first registered here",
                ),
            );
            continue;
        }
        slot_of_node[node] = Some(slot);
        present[node] = true;
    }

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (node, slot) in slot_of_node.iter().enumerate() {
        let Some(slot) = slot else { continue };
        let meta = &metas[*slot];
        let mut deps: Vec<usize> = Vec::new();
        for import in &meta.imports {
            let target = index
                .id_of(&import.path)
                .expect("import path missing from index");
            if target == node {
                report(
                    *slot,
                    Diagnostic::error(
                        Code::SELF_IMPORT,
                        import.span,
                        format!("module '{}' imports itself", meta.path),
                    ),
                );
                continue;
            }
            if !present[target] {
                report(
                    *slot,
                    Diagnostic::error(
                        Code::MISSING_MODULE,
                        import.span,
                        format!("imported module '{}' was not found", import.path),
                    ),
                );
                continue;
            }
            deps.push(target);
        }
        deps.sort_unstable();
        deps.dedup();
        for dep in &deps {
            in_degree[*dep] += 1;
        }
        edges[node] = deps;
    }

    DepGraph {
        edges,
        present,
        in_degree,
        slot_of_node,
        node_of_slot,
    }
}

/// Result of the Kahn sort.
#[derive(Debug, Clone, Default)]
pub struct Topo {
    /// Dependency-safe linearization: importers come first, so traversing
    /// in reverse visits dependencies before their importers.
    pub order: Vec<usize>,
    /// Layered waves of mutually independent modules. Processing the
    /// batches in reverse order gives maximum parallelism for bottom-up
    /// passes.
    pub batches: Vec<Vec<usize>>,
    pub cyclic: bool,
    /// Nodes left with residual in-degree: members of a cycle and
    /// everything trapped beneath one.
    pub cycles: Vec<usize>,
}

/// Kahn topological sort with layered batches. Ties inside a batch are
/// broken by ascending node id; the output is fully deterministic.
pub fn toposort_kahn(graph: &DepGraph) -> Topo {
    let n = graph.edges.len();
    let mut residual = graph.in_degree.clone();
    let mut order = Vec::new();
    let mut batches = Vec::new();

    let mut wave: Vec<usize> = (0..n)
        .filter(|id| graph.present[*id] && residual[*id] == 0)
        .collect();
    while !wave.is_empty() {
        wave.sort_unstable();
        let mut next = Vec::new();
        for node in &wave {
            order.push(*node);
            for dep in &graph.edges[*node] {
                residual[*dep] -= 1;
                if residual[*dep] == 0 {
                    next.push(*dep);
                }
            }
        }
        batches.push(wave);
        wave = next;
    }

    let cycles: Vec<usize> = (0..n)
        .filter(|id| graph.present[*id] && residual[*id] > 0)
        .collect();
    Topo {
        order,
        batches,
        cyclic: !cycles.is_empty(),
        cycles,
    }
}

/// Emit one `ImportCycle` diagnostic per node stuck in the residual set.
pub fn report_cycles(
    topo: &Topo,
    index: &ModuleIndex,
    graph: &DepGraph,
    metas: &[Arc<ModuleMeta>],
    mut report: impl FnMut(usize, Diagnostic),
) {
    if !topo.cyclic {
        return;
    }
    let summary: Vec<&str> = topo.cycles.iter().map(|id| index.name(*id)).collect();
    let summary = summary.join(" -> ");
    for node in &topo.cycles {
        let Some(slot) = graph.slot_of_node[*node] else {
            continue;
        };
        let meta = &metas[slot];
        report(
            slot,
            Diagnostic::error(
                Code::IMPORT_CYCLE,
                meta.primary_span(),
                format!(
                    "module '{}' participates in an import cycle: {}",
                    meta.path, summary
                ),
            ),
        );
    }
}

/// Emit `DependencyFailed` on every import edge whose target is broken,
/// attaching the dependency's first error as a note.
pub fn report_broken_deps(
    index: &ModuleIndex,
    graph: &DepGraph,
    metas: &[Arc<ModuleMeta>],
    broken: &[bool],
    first_errs: &[Option<Diagnostic>],
    mut report: impl FnMut(usize, Diagnostic),
) {
    for (node, slot) in graph.slot_of_node.iter().enumerate() {
        let Some(slot) = slot else { continue };
        let meta = &metas[*slot];
        for import in &meta.imports {
            let Some(target) = index.id_of(&import.path) else {
                continue;
            };
            if target == node || !graph.present[target] {
                continue;
            }
            let Some(target_slot) = graph.slot_of_node[target] else {
                continue;
            };
            if !broken[target_slot] {
                continue;
            }
            let mut diag = Diagnostic::error(
                Code::DEPENDENCY_FAILED,
                import.span,
                format!("imported module '{}' failed to compile", import.path),
            );
            if let Some(first) = &first_errs[target_slot] {
                diag = diag.with_note(first.span, first.message.clone());
            }
            report(*slot, diag);
        }
    }
}

/// Propagate content hashes through the DAG.
///
/// Iterates the batches in reverse so dependency hashes are ready before
/// their importers; inside a wide batch the combines run on workers.
/// Cyclic graphs skip the computation entirely and every hash stays
/// zero.
pub fn compute_module_hashes(
    graph: &DepGraph,
    topo: &Topo,
    contents: &[Digest],
    jobs: usize,
) -> Vec<Digest> {
    let mut hashes = vec![Digest::ZERO; graph.edges.len()];
    if topo.cyclic {
        return hashes;
    }

    for batch in topo.batches.iter().rev() {
        if batch.len() >= PARALLEL_HASH_THRESHOLD && jobs > 1 {
            let chunk = batch.len().div_ceil(jobs);
            let (tx, rx) = crossbeam::channel::unbounded();
            let hashes_ref = &hashes;
            crossbeam::scope(|scope| {
                for part in batch.chunks(chunk) {
                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        for node in part {
                            tx.send((*node, combine_one(graph, hashes_ref, contents, *node)))
                                .expect("hash result channel closed");
                        }
                    });
                }
                drop(tx);
            })
            .expect("module hash worker panicked");
            let computed: Vec<(usize, Digest)> = rx.iter().collect();
            for (node, hash) in computed {
                hashes[node] = hash;
            }
        } else {
            let computed: Vec<(usize, Digest)> = batch
                .iter()
                .map(|node| (*node, combine_one(graph, &hashes, contents, *node)))
                .collect();
            for (node, hash) in computed {
                hashes[node] = hash;
            }
        }
    }
    hashes
}

fn combine_one(graph: &DepGraph, hashes: &[Digest], contents: &[Digest], node: usize) -> Digest {
    let deps: Vec<Digest> = graph.edges[node].iter().map(|dep| hashes[*dep]).collect();
    Digest::combine(contents[node], &deps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{FileMeta, ImportMeta, ModuleKind};
    use crate::source::{FileId, Span};

    fn meta(path: &str, imports: &[&str]) -> Arc<ModuleMeta> {
        let hash = Digest::of_str(path);
        Arc::new(ModuleMeta {
            name: path.rsplit('/').next().unwrap().to_string(),
            path: path.to_string(),
            dir: String::new(),
            kind: ModuleKind::Module,
            has_module_pragma: false,
            no_std: false,
            imports: imports
                .iter()
                .map(|p| ImportMeta {
                    path: p.to_string(),
                    span: Span::new(FileId(0), 0, 1),
                })
                .collect(),
            files: vec![FileMeta {
                path: path.to_string(),
                span: Span::file_start(FileId(0)),
                content_hash: hash,
            }],
            content_hash: hash,
            module_hash: Digest::ZERO,
        })
    }

    fn build(metas: &[Arc<ModuleMeta>]) -> (ModuleIndex, DepGraph, Vec<Diagnostic>) {
        let index = ModuleIndex::build(metas.iter().map(|m| m.as_ref()));
        let mut diags = Vec::new();
        let graph = build_graph(&index, metas, |_slot, d| diags.push(d));
        (index, graph, diags)
    }

    #[test]
    fn test_index_ids_are_sorted() {
        let metas = vec![meta("z", &["a"]), meta("a", &[])];
        let index = ModuleIndex::build(metas.iter().map(|m| m.as_ref()));
        assert_eq!(index.id_of("a"), Some(0));
        assert_eq!(index.id_of("z"), Some(1));
    }

    #[test]
    fn test_toposort_linear_chain() {
        let metas = vec![meta("app", &["lib"]), meta("lib", &["util"]), meta("util", &[])];
        let (index, graph, diags) = build(&metas);
        assert!(diags.is_empty());
        let topo = toposort_kahn(&graph);
        assert!(!topo.cyclic);

        let names: Vec<&str> = topo.order.iter().map(|id| index.name(*id)).collect();
        assert_eq!(names, vec!["app", "lib", "util"]);
        assert_eq!(topo.batches.len(), 3);
    }

    #[test]
    fn test_toposort_respects_edges_in_reverse() {
        let metas = vec![
            meta("app", &["a", "b"]),
            meta("a", &["shared"]),
            meta("b", &["shared"]),
            meta("shared", &[]),
        ];
        let (index, graph, _) = build(&metas);
        let topo = toposort_kahn(&graph);

        let pos = |name: &str| {
            let id = index.id_of(name).unwrap();
            topo.order.iter().position(|n| *n == id).unwrap()
        };
        // Dependencies appear after their importers in `order`, so a
        // reverse traversal is bottom-up.
        assert!(pos("app") < pos("a"));
        assert!(pos("a") < pos("shared"));
        assert!(pos("b") < pos("shared"));
        // `a` and `b` are mutually independent and share a batch.
        assert_eq!(topo.batches[1].len(), 2);
    }

    #[test]
    fn test_cycle_marks_all_stuck_nodes() {
        let metas = vec![meta("a", &["b"]), meta("b", &["a"])];
        let (index, graph, _) = build(&metas);
        let topo = toposort_kahn(&graph);

        assert!(topo.cyclic);
        assert!(topo.batches.is_empty());
        assert_eq!(topo.cycles.len(), 2);

        let mut reported = Vec::new();
        report_cycles(&topo, &index, &graph, &metas, |slot, d| {
            reported.push((slot, d));
        });
        assert_eq!(reported.len(), 2);
        assert!(reported
            .iter()
            .all(|(_, d)| d.code == Code::IMPORT_CYCLE && d.message.contains(" -> ")));
    }

    #[test]
    fn test_cycle_traps_downstream_dependencies() {
        // `leaf` is only reachable through the cycle, so it is stuck too.
        let metas = vec![meta("a", &["b"]), meta("b", &["a", "leaf"]), meta("leaf", &[])];
        let (index, graph, _) = build(&metas);
        let topo = toposort_kahn(&graph);
        assert!(topo.cyclic);
        let stuck: Vec<&str> = topo.cycles.iter().map(|id| index.name(*id)).collect();
        assert_eq!(stuck, vec!["a", "b", "leaf"]);
    }

    #[test]
    fn test_duplicate_module_first_wins() {
        let metas = vec![meta("m", &[]), meta("m", &[])];
        let (_, graph, diags) = build(&metas);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Code::DUPLICATE_MODULE);
        assert_eq!(diags[0].notes.len(), 1);
        assert_eq!(graph.slot_of_node[graph.node_of_slot[0]], Some(0));
    }

    #[test]
    fn test_self_import_and_missing_module() {
        let metas = vec![meta("m", &["m", "ghost"])];
        let (_, graph, diags) = build(&metas);
        let codes: Vec<&str> = diags.iter().map(|d| d.code.as_str()).collect();
        assert!(codes.contains(&"ProjSelfImport"));
        assert!(codes.contains(&"ProjMissingModule"));
        let node = graph.node_of_slot[0];
        assert!(graph.edges[node].is_empty());
    }

    #[test]
    fn test_module_hash_composition() {
        let metas = vec![meta("app", &["lib"]), meta("lib", &[])];
        let (index, graph, _) = build(&metas);
        let topo = toposort_kahn(&graph);

        let mut contents = vec![Digest::ZERO; index.len()];
        for (slot, m) in metas.iter().enumerate() {
            contents[graph.node_of_slot[slot]] = m.content_hash;
        }
        let hashes = compute_module_hashes(&graph, &topo, &contents, 1);

        let lib = index.id_of("lib").unwrap();
        let app = index.id_of("app").unwrap();
        assert_eq!(hashes[lib], Digest::combine(metas[1].content_hash, &[]));
        assert_eq!(
            hashes[app],
            Digest::combine(metas[0].content_hash, &[hashes[lib]])
        );
    }

    #[test]
    fn test_cyclic_graph_keeps_zero_hashes() {
        let metas = vec![meta("a", &["b"]), meta("b", &["a"])];
        let (index, graph, _) = build(&metas);
        let topo = toposort_kahn(&graph);
        let contents = vec![Digest::of_str("x"); index.len()];
        let hashes = compute_module_hashes(&graph, &topo, &contents, 4);
        assert!(hashes.iter().all(|h| !h.is_nonzero()));
    }

    #[test]
    fn test_parallel_hashing_matches_serial() {
        let mut metas = vec![meta("app", &["m0", "m1", "m2", "m3", "m4", "m5"])];
        for i in 0..6 {
            metas.push(meta(&format!("m{}", i), &[]));
        }
        let (index, graph, _) = build(&metas);
        let topo = toposort_kahn(&graph);
        let mut contents = vec![Digest::ZERO; index.len()];
        for (slot, m) in metas.iter().enumerate() {
            contents[graph.node_of_slot[slot]] = m.content_hash;
        }
        let serial = compute_module_hashes(&graph, &topo, &contents, 1);
        let parallel = compute_module_hashes(&graph, &topo, &contents, 4);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_broken_dep_propagation() {
        let metas = vec![meta("app", &["lib"]), meta("lib", &[])];
        let (index, graph, _) = build(&metas);
        let broken = vec![false, true];
        let first_errs = vec![
            None,
            Some(Diagnostic::error(
                Code::external("ParseUnexpectedToken"),
                Span::new(FileId(1), 3, 7),
                "unexpected token",
            )),
        ];
        let mut reported = Vec::new();
        report_broken_deps(&index, &graph, &metas, &broken, &first_errs, |slot, d| {
            reported.push((slot, d));
        });
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].0, 0);
        assert_eq!(reported[0].1.code, Code::DEPENDENCY_FAILED);
        assert_eq!(reported[0].1.notes[0].message, "unexpected token");
    }
}
