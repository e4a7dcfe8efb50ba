//! The slice of the IR the driver owns: enough structure to merge
//! per-module units and rewrite the symbol ids embedded in them. Node
//! shapes beyond what the combiner traverses belong to the external
//! lowerer.

pub mod combine;

use crate::frontend::Instantiation;
use crate::symbols::{Interner, NameId, SymbolId, TypeId};
use ahash::{AHashMap, AHashSet};

pub use combine::{combine_modules, root_import_table, ImportKey};

/// Id of a function within one executable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

/// Arena id of an expression within one [`HirModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum HirLiteral {
    Unit,
    Int(i64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone)]
pub enum HirExpr {
    VarRef(SymbolId),
    Call { callee: SymbolId, args: Vec<ExprId> },
    Field { base: ExprId, name: NameId },
    Literal(HirLiteral),
}

#[derive(Debug, Clone)]
pub enum HirStmt {
    Let {
        var: SymbolId,
        ty: Option<TypeId>,
        init: ExprId,
    },
    Assign {
        target: SymbolId,
        value: ExprId,
    },
    Expr(ExprId),
    Return(Option<ExprId>),
    For {
        var: SymbolId,
        iter: ExprId,
        body: Vec<HirStmt>,
    },
}

#[derive(Debug, Clone)]
pub struct HirParam {
    pub symbol: SymbolId,
    pub name: NameId,
    pub ty: Option<TypeId>,
}

#[derive(Debug, Clone)]
pub struct HirFunction {
    pub id: FuncId,
    pub symbol: SymbolId,
    pub name: NameId,
    pub params: Vec<HirParam>,
    pub ret: Option<TypeId>,
    pub body: Vec<HirStmt>,
    pub entrypoint: bool,
}

#[derive(Debug, Clone)]
pub struct HirTypeDecl {
    pub symbol: SymbolId,
    pub name: NameId,
    pub ty: TypeId,
}

#[derive(Debug, Clone)]
pub struct HirConst {
    pub symbol: SymbolId,
    pub name: NameId,
    pub ty: Option<TypeId>,
    pub value: ExprId,
}

#[derive(Debug, Clone)]
pub struct HirGlobal {
    pub symbol: SymbolId,
    pub name: NameId,
    pub ty: Option<TypeId>,
}

/// One module's lowered IR, or the whole program after combining.
#[derive(Debug, Clone, Default)]
pub struct HirModule {
    pub module_path: String,
    pub funcs: Vec<HirFunction>,
    pub types: Vec<HirTypeDecl>,
    pub consts: Vec<HirConst>,
    pub globals: Vec<HirGlobal>,
    /// Resolved type of each binding the checker typed.
    pub binding_types: AHashMap<SymbolId, TypeId>,
    pub exprs: Vec<HirExpr>,
    pub interner: Interner,
    pub instantiations: Vec<Instantiation>,
    pub copy_types: AHashSet<TypeId>,
}

impl HirModule {
    pub fn new(module_path: impl Into<String>) -> Self {
        HirModule {
            module_path: module_path.into(),
            ..HirModule::default()
        }
    }

    pub fn alloc_expr(&mut self, expr: HirExpr) -> ExprId {
        let id = u32::try_from(self.exprs.len()).expect("expression count exceeds u32");
        self.exprs.push(expr);
        ExprId(id)
    }

    pub fn expr(&self, id: ExprId) -> &HirExpr {
        &self.exprs[id.0 as usize]
    }

    /// The next free function id: `max(existing) + 1`.
    pub fn next_func_id(&self) -> FuncId {
        FuncId(
            self.funcs
                .iter()
                .map(|f| f.id.0 + 1)
                .max()
                .unwrap_or(0),
        )
    }

    pub fn entrypoints(&self) -> impl Iterator<Item = &HirFunction> {
        self.funcs.iter().filter(|f| f.entrypoint)
    }
}
