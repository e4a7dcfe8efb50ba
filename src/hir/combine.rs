//! Merges independently lowered module IRs into one executable unit.
//!
//! Every symbol id embedded in a dependency's IR is rewritten through a
//! per-dependency remap into the root's symbol table. Imported symbols
//! already present in the root are matched structurally; the rest are
//! synthesized at the root's module scope with the `imported` flag set.

use super::{ExprId, HirExpr, HirModule, HirStmt};
use crate::symbols::{NameId, ScopeKind, Symbol, SymbolId, SymbolKind, SymbolTable};
use ahash::{AHashMap, AHashSet};

/// Structural identity of a cross-module symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportKey {
    pub module: String,
    pub kind: SymbolKind,
    pub name: String,
    pub receiver: Option<String>,
    pub signature: Option<String>,
    pub type_params: u16,
}

impl ImportKey {
    fn for_symbol(sym: &Symbol, default_module: &str) -> ImportKey {
        ImportKey {
            module: sym
                .source_module
                .clone()
                .unwrap_or_else(|| default_module.to_string()),
            kind: sym.kind,
            name: sym.name.clone(),
            receiver: sym.receiver.clone(),
            signature: sym.signature.clone(),
            type_params: sym.type_params,
        }
    }
}

/// Index the root's module-scope symbols by structural identity.
///
/// Imported symbols key under the module they come from; the root's own
/// top-level symbols key under the root path itself.
pub fn root_import_table(table: &SymbolTable, root_path: &str) -> AHashMap<ImportKey, SymbolId> {
    let mut keys = AHashMap::new();
    for id in table.symbols_in(table.module_scope()) {
        let sym = table.symbol(id);
        keys.insert(ImportKey::for_symbol(sym, root_path), id);
    }
    keys
}

struct Merger<'a> {
    root: HirModule,
    root_table: &'a mut SymbolTable,
    import_table: AHashMap<ImportKey, SymbolId>,
}

/// Merge dependency IRs into the root's IR.
///
/// `deps` must come in sorted module-path order together with each
/// module's symbol table; the caller already folded the root's auxiliary
/// files into `root` during lowering.
pub fn combine_modules(
    root: HirModule,
    root_table: &mut SymbolTable,
    deps: Vec<(HirModule, &SymbolTable)>,
) -> HirModule {
    let import_table = root_import_table(root_table, &root.module_path);
    let mut merger = Merger {
        root,
        root_table,
        import_table,
    };
    for (dep, dep_table) in deps {
        merger.merge(dep, dep_table);
    }
    merger.root
}

impl Merger<'_> {
    /// Build the symbol remap `dep sym -> root sym` for one dependency.
    fn build_remap(
        &mut self,
        dep: &HirModule,
        dep_table: &SymbolTable,
    ) -> AHashMap<SymbolId, SymbolId> {
        let mut remap: AHashMap<SymbolId, SymbolId> = AHashMap::new();

        // Top-level symbols first, in id order for determinism.
        let top_level: Vec<SymbolId> = dep_table.symbols_in(dep_table.module_scope()).collect();
        for id in &top_level {
            let sym = dep_table.symbol(*id);
            let key = ImportKey::for_symbol(sym, &dep.module_path);
            let mapped = match self.import_table.get(&key) {
                Some(existing) => *existing,
                None => {
                    let mut synthesized = sym.clone();
                    synthesized.flags.imported = true;
                    synthesized.source_module = Some(key.module.clone());
                    synthesized.owner = None;
                    let new_id = self
                        .root_table
                        .declare(synthesized, self.root_table.module_scope());
                    self.import_table.insert(key, new_id);
                    new_id
                }
            };
            remap.insert(*id, mapped);
        }

        // Locals and params keep their identity but get synthesized
        // owners inside a fresh scope of the root table.
        let mut local_scope = None;
        let count = u32::try_from(dep_table.len()).expect("symbol count exceeds u32");
        for raw in 0..count {
            let id = SymbolId(raw);
            if remap.contains_key(&id) {
                continue;
            }
            let sym = dep_table.symbol(id);
            let scope = *local_scope.get_or_insert_with(|| {
                let module_scope = self.root_table.module_scope();
                self.root_table.alloc_scope(module_scope, ScopeKind::Block)
            });
            let mut synthesized = sym.clone();
            synthesized.owner = sym.owner.and_then(|owner| remap.get(&owner).copied());
            let new_id = self.root_table.declare(synthesized, scope);
            remap.insert(id, new_id);
        }
        remap
    }

    fn merge(&mut self, dep: HirModule, dep_table: &SymbolTable) {
        let remap = self.build_remap(&dep, dep_table);
        let name_remap = self.root.interner.absorb(&dep.interner);
        let expr_offset = u32::try_from(self.root.exprs.len()).expect("expression count exceeds u32");

        // Copy the dependency's expression arena verbatim; the traversal
        // below rewrites each reachable node exactly once.
        self.root.exprs.extend(dep.exprs.iter().cloned());

        let mut next_id = self.root.next_func_id();
        let mut rewriter = Rewriter {
            exprs: &mut self.root.exprs,
            remap: &remap,
            name_remap: &name_remap,
            expr_offset,
            seen: AHashSet::new(),
        };

        for func in dep.funcs {
            let body = func
                .body
                .into_iter()
                .map(|stmt| rewriter.rewrite_stmt(stmt))
                .collect();
            self.root.funcs.push(super::HirFunction {
                id: next_id,
                symbol: remap_sym(&remap, func.symbol),
                name: name_remap[func.name.0 as usize],
                params: func
                    .params
                    .into_iter()
                    .map(|p| super::HirParam {
                        symbol: remap_sym(&remap, p.symbol),
                        name: name_remap[p.name.0 as usize],
                        ty: p.ty,
                    })
                    .collect(),
                ret: func.ret,
                body,
                entrypoint: func.entrypoint,
            });
            next_id = super::FuncId(next_id.0 + 1);
        }

        for decl in dep.types {
            self.root.types.push(super::HirTypeDecl {
                symbol: remap_sym(&remap, decl.symbol),
                name: name_remap[decl.name.0 as usize],
                ty: decl.ty,
            });
        }
        for konst in dep.consts {
            self.root.consts.push(super::HirConst {
                symbol: remap_sym(&remap, konst.symbol),
                name: name_remap[konst.name.0 as usize],
                ty: konst.ty,
                value: rewriter.rewrite_expr(konst.value),
            });
        }
        for global in dep.globals {
            self.root.globals.push(super::HirGlobal {
                symbol: remap_sym(&remap, global.symbol),
                name: name_remap[global.name.0 as usize],
                ty: global.ty,
            });
        }

        for (binding, ty) in dep.binding_types {
            self.root
                .binding_types
                .insert(remap_sym(&remap, binding), ty);
        }
        for inst in dep.instantiations {
            self.root.instantiations.push(crate::frontend::Instantiation {
                callee: remap_sym(&remap, inst.callee),
                caller: remap_sym(&remap, inst.caller),
                type_args: inst.type_args,
            });
        }
        self.root.copy_types.extend(dep.copy_types);
    }
}

fn remap_sym(remap: &AHashMap<SymbolId, SymbolId>, id: SymbolId) -> SymbolId {
    remap.get(&id).copied().unwrap_or(id)
}

struct Rewriter<'a> {
    exprs: &'a mut Vec<HirExpr>,
    remap: &'a AHashMap<SymbolId, SymbolId>,
    name_remap: &'a [NameId],
    expr_offset: u32,
    /// Shared sub-expressions must be rewritten at most once; rewriting a
    /// node twice would re-offset its children.
    seen: AHashSet<ExprId>,
}

impl Rewriter<'_> {
    fn rewrite_stmt(&mut self, stmt: HirStmt) -> HirStmt {
        match stmt {
            HirStmt::Let { var, ty, init } => HirStmt::Let {
                var: remap_sym(self.remap, var),
                ty,
                init: self.rewrite_expr(init),
            },
            HirStmt::Assign { target, value } => HirStmt::Assign {
                target: remap_sym(self.remap, target),
                value: self.rewrite_expr(value),
            },
            HirStmt::Expr(expr) => HirStmt::Expr(self.rewrite_expr(expr)),
            HirStmt::Return(expr) => HirStmt::Return(expr.map(|e| self.rewrite_expr(e))),
            HirStmt::For { var, iter, body } => HirStmt::For {
                var: remap_sym(self.remap, var),
                iter: self.rewrite_expr(iter),
                body: body.into_iter().map(|s| self.rewrite_stmt(s)).collect(),
            },
        }
    }

    /// Translate a dependency expr id into the merged arena, rewriting
    /// the node in place on first visit.
    fn rewrite_expr(&mut self, old: ExprId) -> ExprId {
        let new = ExprId(old.0 + self.expr_offset);
        if !self.seen.insert(new) {
            return new;
        }
        let node = self.exprs[new.0 as usize].clone();
        let rewritten = match node {
            HirExpr::VarRef(sym) => HirExpr::VarRef(remap_sym(self.remap, sym)),
            HirExpr::Call { callee, args } => HirExpr::Call {
                callee: remap_sym(self.remap, callee),
                args: args.into_iter().map(|a| self.rewrite_expr(a)).collect(),
            },
            HirExpr::Field { base, name } => HirExpr::Field {
                base: self.rewrite_expr(base),
                name: self.name_remap[name.0 as usize],
            },
            HirExpr::Literal(lit) => HirExpr::Literal(lit),
        };
        self.exprs[new.0 as usize] = rewritten;
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{FuncId, HirFunction, HirLiteral, HirParam};
    use crate::source::Span;
    use crate::symbols::TypeId;

    fn table_with(
        entries: &[(&str, SymbolKind, bool, Option<&str>)],
    ) -> (SymbolTable, Vec<SymbolId>) {
        let mut table = SymbolTable::new();
        let root = table.module_scope();
        let mut ids = Vec::new();
        for (name, kind, public, source) in entries {
            let mut sym = Symbol::top_level(*name, *kind, Span::EMPTY);
            sym.flags.public = *public;
            sym.signature = matches!(kind, SymbolKind::Function).then(|| "()".to_string());
            if let Some(source) = source {
                sym.flags.imported = true;
                sym.source_module = Some(source.to_string());
            }
            ids.push(table.declare(sym, root));
        }
        (table, ids)
    }

    fn func(module: &mut HirModule, symbol: SymbolId, name: &str, body: Vec<HirStmt>) {
        let name = module.interner.intern(name);
        let id = module.next_func_id();
        module.funcs.push(HirFunction {
            id,
            symbol,
            name,
            params: Vec::new(),
            ret: None,
            body,
            entrypoint: false,
        });
    }

    #[test]
    fn test_imported_symbol_matches_root_proxy() {
        // Root imports `lib::helper`; the proxy lives in the root table.
        let (mut root_table, root_ids) = table_with(&[
            ("main", SymbolKind::Function, true, None),
            ("helper", SymbolKind::Function, false, Some("lib")),
        ]);
        let root_proxy = root_ids[1];
        let mut root = HirModule::new("app");
        func(&mut root, root_ids[0], "main", Vec::new());

        // The dependency defines `helper` as its own public function.
        let (dep_table, dep_ids) = table_with(&[("helper", SymbolKind::Function, true, None)]);
        let mut dep = HirModule::new("lib");
        let call_target = dep.alloc_expr(HirExpr::VarRef(dep_ids[0]));
        func(&mut dep, dep_ids[0], "helper", vec![HirStmt::Expr(call_target)]);

        let merged = combine_modules(root, &mut root_table, vec![(dep, &dep_table)]);

        // The dep's `helper` collapsed onto the root proxy everywhere.
        let helper = merged.funcs.iter().find(|f| {
            merged.interner.resolve(f.name) == "helper"
        });
        let helper = helper.unwrap();
        assert_eq!(helper.symbol, root_proxy);
        match merged.expr(match helper.body[0] {
            HirStmt::Expr(e) => e,
            _ => unreachable!(),
        }) {
            HirExpr::VarRef(sym) => assert_eq!(*sym, root_proxy),
            other => panic!("unexpected expr {:?}", other),
        }
    }

    #[test]
    fn test_unknown_symbols_are_synthesized_as_imported() {
        let (mut root_table, root_ids) =
            table_with(&[("main", SymbolKind::Function, true, None)]);
        let mut root = HirModule::new("app");
        func(&mut root, root_ids[0], "main", Vec::new());
        let before = root_table.len();

        let (dep_table, dep_ids) = table_with(&[("mystery", SymbolKind::Function, true, None)]);
        let mut dep = HirModule::new("lib");
        func(&mut dep, dep_ids[0], "mystery", Vec::new());

        let merged = combine_modules(root, &mut root_table, vec![(dep, &dep_table)]);
        assert_eq!(root_table.len(), before + 1);

        let synthesized = merged
            .funcs
            .iter()
            .find(|f| merged.interner.resolve(f.name) == "mystery")
            .unwrap()
            .symbol;
        let sym = root_table.symbol(synthesized);
        assert!(sym.flags.imported);
        assert_eq!(sym.source_module.as_deref(), Some("lib"));
    }

    #[test]
    fn test_function_ids_stay_monotonic() {
        let (mut root_table, root_ids) =
            table_with(&[("main", SymbolKind::Function, true, None)]);
        let mut root = HirModule::new("app");
        func(&mut root, root_ids[0], "main", Vec::new());

        let (dep_table, dep_ids) = table_with(&[
            ("f", SymbolKind::Function, true, None),
            ("g", SymbolKind::Function, true, None),
        ]);
        let mut dep = HirModule::new("lib");
        func(&mut dep, dep_ids[0], "f", Vec::new());
        func(&mut dep, dep_ids[1], "g", Vec::new());

        let merged = combine_modules(root, &mut root_table, vec![(dep, &dep_table)]);
        let ids: Vec<u32> = merged.funcs.iter().map(|f| f.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_shared_subexpression_rewritten_once() {
        let (mut root_table, _) = table_with(&[]);
        let root = HirModule::new("app");

        let (dep_table, dep_ids) = table_with(&[
            ("f", SymbolKind::Function, true, None),
            ("x", SymbolKind::Global, true, None),
        ]);
        let mut dep = HirModule::new("lib");
        // Two statements alias the same sub-expression after lowering.
        let shared = dep.alloc_expr(HirExpr::VarRef(dep_ids[1]));
        func(
            &mut dep,
            dep_ids[0],
            "f",
            vec![HirStmt::Expr(shared), HirStmt::Return(Some(shared))],
        );

        let merged = combine_modules(root, &mut root_table, vec![(dep, &dep_table)]);
        let f = &merged.funcs[0];
        let (first, second) = match (&f.body[0], &f.body[1]) {
            (HirStmt::Expr(a), HirStmt::Return(Some(b))) => (*a, *b),
            other => panic!("unexpected body {:?}", other),
        };
        assert_eq!(first, second);
        // Had the node been rewritten twice, the var would have been
        // remapped through the table twice or the children re-offset.
        match merged.expr(first) {
            HirExpr::VarRef(sym) => {
                assert!(root_table.symbol(*sym).flags.imported);
            }
            other => panic!("unexpected expr {:?}", other),
        }
    }

    #[test]
    fn test_locals_get_synthesized_owners() {
        let (mut root_table, _) = table_with(&[]);
        let root = HirModule::new("app");

        let mut dep_table = SymbolTable::new();
        let scope_root = dep_table.module_scope();
        let f = dep_table.declare(
            Symbol::top_level("f", SymbolKind::Function, Span::EMPTY).public(),
            scope_root,
        );
        let block = dep_table.alloc_scope(scope_root, ScopeKind::Block);
        let mut local = Symbol::top_level("tmp", SymbolKind::Local, Span::EMPTY);
        local.owner = Some(f);
        let local = dep_table.declare(local, block);

        let mut dep = HirModule::new("lib");
        let init = dep.alloc_expr(HirExpr::Literal(HirLiteral::Int(1)));
        func(
            &mut dep,
            f,
            "f",
            vec![HirStmt::Let {
                var: local,
                ty: None,
                init,
            }],
        );

        let merged = combine_modules(root, &mut root_table, vec![(dep, &dep_table)]);
        let let_var = match &merged.funcs[0].body[0] {
            HirStmt::Let { var, .. } => *var,
            other => panic!("unexpected stmt {:?}", other),
        };
        let local_sym = root_table.symbol(let_var);
        assert_eq!(local_sym.name, "tmp");
        let owner = local_sym.owner.expect("local lost its owner");
        assert_eq!(root_table.symbol(owner).name, "f");
    }

    #[test]
    fn test_copy_types_and_bindings_merge() {
        let (mut root_table, _) = table_with(&[]);
        let mut root = HirModule::new("app");
        root.copy_types.insert(TypeId(1));

        let (dep_table, dep_ids) = table_with(&[("g", SymbolKind::Global, true, None)]);
        let mut dep = HirModule::new("lib");
        dep.copy_types.insert(TypeId(2));
        dep.binding_types.insert(dep_ids[0], TypeId(2));
        dep.globals.push(super::super::HirGlobal {
            symbol: dep_ids[0],
            name: dep.interner.intern("g"),
            ty: Some(TypeId(2)),
        });

        let merged = combine_modules(root, &mut root_table, vec![(dep, &dep_table)]);
        assert!(merged.copy_types.contains(&TypeId(1)));
        assert!(merged.copy_types.contains(&TypeId(2)));
        let global_sym = merged.globals[0].symbol;
        assert_eq!(merged.binding_types.get(&global_sym), Some(&TypeId(2)));
    }
}
