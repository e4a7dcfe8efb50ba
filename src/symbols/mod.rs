use crate::source::Span;
use ahash::AHashMap;
use std::fmt;
use std::sync::Arc;

/// Arena id of a symbol within one module's [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

/// Arena id of a scope within one module's [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// Program-wide type id, assigned by the external type resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Interned string id, shared between the symbol layer and the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameId(pub u32);

/// Append-only string interner.
#[derive(Debug, Default, Clone)]
pub struct Interner {
    strings: Vec<String>,
    map: AHashMap<String, u32>,
}

impl Interner {
    pub fn new() -> Self {
        Interner::default()
    }

    pub fn intern(&mut self, s: &str) -> NameId {
        if let Some(idx) = self.map.get(s) {
            return NameId(*idx);
        }
        let idx = u32::try_from(self.strings.len()).expect("interned string count exceeds u32");
        self.strings.push(s.to_string());
        self.map.insert(s.to_string(), idx);
        NameId(idx)
    }

    pub fn resolve(&self, id: NameId) -> &str {
        &self.strings[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Intern every string of `other`, returning the remap table from
    /// `other`'s ids to this interner's ids, indexed by `other` id.
    pub fn absorb(&mut self, other: &Interner) -> Vec<NameId> {
        other.strings.iter().map(|s| self.intern(s)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Type,
    Contract,
    Const,
    Global,
    Local,
    Param,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::Function => "function",
            SymbolKind::Type => "type",
            SymbolKind::Contract => "contract",
            SymbolKind::Const => "const",
            SymbolKind::Global => "global",
            SymbolKind::Local => "local",
            SymbolKind::Param => "param",
        };
        write!(f, "{}", name)
    }
}

/// Visibility and provenance flags on a symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SymbolFlags {
    pub public: bool,
    pub builtin: bool,
    pub imported: bool,
}

/// One entry in a module's symbol arena.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub scope: ScopeId,
    pub span: Span,
    pub flags: SymbolFlags,
    pub type_id: Option<TypeId>,
    /// Contracts only: whether the body was resolved.
    pub has_contract_body: bool,
    /// Method receiver key, when the symbol is a method.
    pub receiver: Option<String>,
    /// Normalized signature, used for cross-module matching.
    pub signature: Option<String>,
    pub type_params: u16,
    /// Owning symbol for locals and params.
    pub owner: Option<SymbolId>,
    /// For imported symbols, the canonical path of the defining module.
    pub source_module: Option<String>,
}

impl Symbol {
    pub fn top_level(name: impl Into<String>, kind: SymbolKind, span: Span) -> Symbol {
        Symbol {
            name: name.into(),
            kind,
            scope: ScopeId(0),
            span,
            flags: SymbolFlags::default(),
            type_id: None,
            has_contract_body: false,
            receiver: None,
            signature: None,
            type_params: 0,
            owner: None,
            source_module: None,
        }
    }

    pub fn public(mut self) -> Symbol {
        self.flags.public = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Block,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    symbols: Vec<SymbolId>,
}

/// Per-module symbol table.
///
/// All files of a module share one table; mutation happens only from the
/// resolver passes on the coordinating thread.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: Vec::new(),
            scopes: vec![Scope {
                parent: None,
                kind: ScopeKind::Module,
                symbols: Vec::new(),
            }],
        }
    }

    /// The module root scope shared by all files of the module.
    pub fn module_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn alloc_scope(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        let id = u32::try_from(self.scopes.len()).expect("scope count exceeds u32");
        self.scopes.push(Scope {
            parent: Some(parent),
            kind,
            symbols: Vec::new(),
        });
        ScopeId(id)
    }

    pub fn declare(&mut self, mut symbol: Symbol, scope: ScopeId) -> SymbolId {
        let id = u32::try_from(self.symbols.len()).expect("symbol count exceeds u32");
        symbol.scope = scope;
        self.symbols.push(symbol);
        self.scopes[scope.0 as usize].symbols.push(SymbolId(id));
        SymbolId(id)
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols_in(&self, scope: ScopeId) -> impl Iterator<Item = SymbolId> + '_ {
        self.scopes[scope.0 as usize].symbols.iter().copied()
    }

    /// Look a name up in `scope` and its ancestors.
    pub fn lookup(&self, name: &str, scope: ScopeId) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(scope_id) = current {
            let scope = &self.scopes[scope_id.0 as usize];
            if let Some(id) = scope
                .symbols
                .iter()
                .rev()
                .find(|id| self.symbol(**id).name == name)
            {
                return Some(*id);
            }
            current = scope.parent;
        }
        None
    }

    /// Ids of exported symbols: public or builtin entries of the module
    /// root scope. Block-local symbols never export.
    pub fn exported(&self) -> Vec<SymbolId> {
        self.symbols_in(self.module_scope())
            .filter(|id| {
                let sym = self.symbol(*id);
                sym.flags.public || sym.flags.builtin
            })
            .collect()
    }

    /// Mark every module-scope symbol as builtin (stdlib exports).
    pub fn mark_all_builtin(&mut self) {
        let ids: Vec<SymbolId> = self.symbols_in(self.module_scope()).collect();
        for id in ids {
            self.symbol_mut(id).flags.builtin = true;
        }
    }
}

/// Snapshot of one exported symbol, stable across the rest of the run.
#[derive(Debug, Clone)]
pub struct ExportedSymbol {
    pub name: String,
    pub symbol: SymbolId,
    pub kind: SymbolKind,
    pub type_id: Option<TypeId>,
    pub has_contract_body: bool,
    pub builtin: bool,
    pub span: Span,
    pub receiver: Option<String>,
    pub signature: Option<String>,
    pub type_params: u16,
}

/// Exported-symbol table of one module, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ModuleExports {
    pub module_path: String,
    symbols: AHashMap<String, ExportedSymbol>,
}

impl ModuleExports {
    /// Snapshot the exported symbols of a fully resolved table.
    pub fn from_table(module_path: impl Into<String>, table: &SymbolTable) -> Self {
        let mut symbols = AHashMap::new();
        for id in table.exported() {
            let sym = table.symbol(id);
            symbols.insert(
                sym.name.clone(),
                ExportedSymbol {
                    name: sym.name.clone(),
                    symbol: id,
                    kind: sym.kind,
                    type_id: sym.type_id,
                    has_contract_body: sym.has_contract_body,
                    builtin: sym.flags.builtin,
                    span: sym.span,
                    receiver: sym.receiver.clone(),
                    signature: sym.signature.clone(),
                    type_params: sym.type_params,
                },
            );
        }
        ModuleExports {
            module_path: module_path.into(),
            symbols,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ExportedSymbol> {
        self.symbols.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExportedSymbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// An exports table is incomplete when a type symbol has no resolved
    /// type id or a contract symbol has no contract body. Incomplete
    /// tables force a re-resolution of the owning module.
    pub fn is_incomplete(&self) -> bool {
        self.symbols.values().any(|sym| match sym.kind {
            SymbolKind::Type => sym.type_id.is_none(),
            SymbolKind::Contract => !sym.has_contract_body,
            _ => false,
        })
    }

    pub fn mark_builtin(&mut self) {
        for sym in self.symbols.values_mut() {
            sym.builtin = true;
        }
    }
}

/// Canonical-path (and alias) keyed map of export tables shared with the
/// external resolver during pass 2.
pub type ExportsMap = AHashMap<String, Arc<ModuleExports>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interner_round_trip() {
        let mut interner = Interner::new();
        let a = interner.intern("alpha");
        let b = interner.intern("beta");
        assert_ne!(a, b);
        assert_eq!(interner.intern("alpha"), a);
        assert_eq!(interner.resolve(b), "beta");
    }

    #[test]
    fn test_interner_absorb_remaps() {
        let mut left = Interner::new();
        left.intern("shared");
        let mut right = Interner::new();
        let r_only = right.intern("right-only");
        let r_shared = right.intern("shared");

        let remap = left.absorb(&right);
        assert_eq!(left.resolve(remap[r_only.0 as usize]), "right-only");
        assert_eq!(left.resolve(remap[r_shared.0 as usize]), "shared");
    }

    #[test]
    fn test_declare_and_lookup() {
        let mut table = SymbolTable::new();
        let root = table.module_scope();
        let id = table.declare(
            Symbol::top_level("main", SymbolKind::Function, Span::EMPTY).public(),
            root,
        );
        assert_eq!(table.lookup("main", root), Some(id));
        assert_eq!(table.lookup("missing", root), None);
    }

    #[test]
    fn test_lookup_walks_parent_scopes() {
        let mut table = SymbolTable::new();
        let root = table.module_scope();
        let outer = table.declare(Symbol::top_level("x", SymbolKind::Global, Span::EMPTY), root);
        let block = table.alloc_scope(root, ScopeKind::Block);
        assert_eq!(table.lookup("x", block), Some(outer));
    }

    #[test]
    fn test_exports_skip_private_and_block_local() {
        let mut table = SymbolTable::new();
        let root = table.module_scope();
        table.declare(
            Symbol::top_level("public_fn", SymbolKind::Function, Span::EMPTY).public(),
            root,
        );
        table.declare(
            Symbol::top_level("private_fn", SymbolKind::Function, Span::EMPTY),
            root,
        );
        let block = table.alloc_scope(root, ScopeKind::Block);
        table.declare(
            Symbol::top_level("local", SymbolKind::Local, Span::EMPTY).public(),
            block,
        );

        let exports = ModuleExports::from_table("m", &table);
        assert!(exports.get("public_fn").is_some());
        assert!(exports.get("private_fn").is_none());
        assert!(exports.get("local").is_none());
    }

    #[test]
    fn test_incomplete_exports() {
        let mut table = SymbolTable::new();
        let root = table.module_scope();
        table.declare(
            Symbol::top_level("T", SymbolKind::Type, Span::EMPTY).public(),
            root,
        );
        let exports = ModuleExports::from_table("m", &table);
        assert!(exports.is_incomplete());

        let mut table = SymbolTable::new();
        let root = table.module_scope();
        let id = table.declare(
            Symbol::top_level("T", SymbolKind::Type, Span::EMPTY).public(),
            root,
        );
        table.symbol_mut(id).type_id = Some(TypeId(7));
        let exports = ModuleExports::from_table("m", &table);
        assert!(!exports.is_incomplete());
    }

    #[test]
    fn test_mark_all_builtin() {
        let mut table = SymbolTable::new();
        let root = table.module_scope();
        table.declare(
            Symbol::top_level("print", SymbolKind::Function, Span::EMPTY),
            root,
        );
        table.mark_all_builtin();
        let exports = ModuleExports::from_table("core", &table);
        assert!(exports.get("print").map(|s| s.builtin).unwrap_or(false));
    }
}
