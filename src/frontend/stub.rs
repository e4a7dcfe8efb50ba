//! Line-oriented stub frontend for driver tests.
//!
//! Understands just enough of the surface syntax to exercise the driver:
//! pragmas, imports, `@entrypoint`, and one-line top-level items. Bodies
//! are whitespace-separated references; `name()` is a call, `name` a
//! variable use.

use super::{
    Ast, CheckOptions, Frontend, ImportDecl, ImportMember, Instantiation, Lexer, Parser,
    PragmaDecl, PragmaKind, ResolveOptions, SemaChecker, SemaResult, SymbolResolver,
    SymbolsResult, TokenStream,
};
use crate::diagnostics::{Code, Diagnostic, DiagnosticBag};
use crate::hir::{HirExpr, HirFunction, HirModule, HirParam, HirStmt};
use crate::source::{SourceFile, Span};
use crate::symbols::{
    ScopeKind, Symbol, SymbolFlags, SymbolId, SymbolKind, SymbolTable, TypeId,
};
use std::sync::Arc;

pub fn frontend() -> Frontend {
    Frontend {
        lexer: Arc::new(StubLexer),
        parser: Arc::new(StubParser),
        resolver: Arc::new(StubResolver),
        checker: Arc::new(StubChecker),
        lowerer: Arc::new(StubLowerer),
    }
}

#[derive(Debug, Clone)]
struct StubLine {
    start: u32,
    text: String,
}

struct StubTokens {
    lines: Vec<StubLine>,
}

#[derive(Debug, Clone)]
pub struct StubItem {
    pub kind: SymbolKind,
    pub name: String,
    pub public: bool,
    pub entrypoint: bool,
    pub copy: bool,
    pub has_body: bool,
    pub span: Span,
    pub params: Vec<String>,
    /// `(name, is_call)` references in the body.
    pub refs: Vec<(String, bool)>,
}

pub struct StubItems(pub Vec<StubItem>);

pub struct StubLexer;

impl Lexer for StubLexer {
    fn tokenize(&self, file: &SourceFile, bag: &mut DiagnosticBag) -> TokenStream {
        let mut lines = Vec::new();
        let mut offset = 0u32;
        for raw in file.text.split_inclusive('\n') {
            let trimmed = raw.trim();
            if trimmed.contains("lex_error") {
                bag.append(Diagnostic::error(
                    Code::external("LexInvalidChar"),
                    Span::new(file.id, offset, offset + raw.len() as u32),
                    "invalid character",
                ));
            } else if !trimmed.is_empty() {
                lines.push(StubLine {
                    start: offset,
                    text: trimmed.to_string(),
                });
            }
            offset += raw.len() as u32;
        }
        TokenStream::new(file.id, StubTokens { lines })
    }
}

pub struct StubParser;

impl Parser for StubParser {
    fn parse(&self, tokens: TokenStream, file: &SourceFile, bag: &mut DiagnosticBag) -> Ast {
        let lines = tokens
            .payload::<StubTokens>()
            .map(|t| t.lines.clone())
            .unwrap_or_default();

        let mut pragma = None;
        let mut no_std = None;
        let mut imports = Vec::new();
        let mut items = Vec::new();
        let mut pending_entrypoint = false;

        for line in &lines {
            let span = Span::new(file.id, line.start, line.start + line.text.len() as u32);
            let text = line.text.trim_end_matches(';').trim();

            if text == "@entrypoint" {
                pending_entrypoint = true;
                continue;
            }
            if text.contains("syntax_error") {
                bag.append(Diagnostic::error(
                    Code::external("ParseUnexpectedToken"),
                    span,
                    "unexpected token",
                ));
                continue;
            }
            if let Some(name) = text.strip_prefix("pragma module::") {
                pragma = Some(PragmaDecl {
                    kind: PragmaKind::Module,
                    name: name.trim().to_string(),
                    span,
                });
                continue;
            }
            if let Some(name) = text.strip_prefix("pragma binary::") {
                pragma = Some(PragmaDecl {
                    kind: PragmaKind::Binary,
                    name: name.trim().to_string(),
                    span,
                });
                continue;
            }
            if text == "pragma no_std" {
                no_std = Some(span);
                continue;
            }
            if let Some(rest) = text.strip_prefix("import ") {
                imports.push(parse_import(rest.trim(), line, file, span));
                continue;
            }
            if let Some(item) = parse_item(text, span, pending_entrypoint) {
                items.push(item);
                pending_entrypoint = false;
            }
        }

        Ast::new(file.id, pragma, no_std, imports, StubItems(items))
    }
}

fn parse_import(rest: &str, line: &StubLine, file: &SourceFile, span: Span) -> ImportDecl {
    if let Some(brace) = rest.find("::{") {
        let path = rest[..brace].to_string();
        let members_text = rest[brace + 3..].trim_end_matches('}');
        let members = members_text
            .split(',')
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(|name| {
                let rel = line.text.find(name).unwrap_or(0) as u32;
                ImportMember {
                    name: name.to_string(),
                    span: Span::new(file.id, line.start + rel, line.start + rel + name.len() as u32),
                }
            })
            .collect();
        ImportDecl {
            path,
            members,
            span,
        }
    } else {
        ImportDecl {
            path: rest.to_string(),
            members: Vec::new(),
            span,
        }
    }
}

fn parse_item(text: &str, span: Span, entrypoint: bool) -> Option<StubItem> {
    // Top-level items export by default; a leading underscore keeps them
    // module-private. `pub` is accepted and redundant.
    let rest = text.strip_prefix("pub ").unwrap_or(text);

    if let Some(rest) = rest.strip_prefix("fn ") {
        let open = rest.find('(')?;
        let name = rest[..open].trim().to_string();
        let public = !name.starts_with('_');
        let close = rest.find(')')?;
        let params: Vec<String> = rest[open + 1..close]
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let refs = parse_body(&rest[close + 1..]);
        return Some(StubItem {
            kind: SymbolKind::Function,
            name,
            public,
            entrypoint,
            copy: false,
            has_body: true,
            span,
            params,
            refs,
        });
    }

    let (kind, rest) = if let Some(rest) = rest.strip_prefix("type ") {
        (SymbolKind::Type, rest)
    } else if let Some(rest) = rest.strip_prefix("contract ") {
        (SymbolKind::Contract, rest)
    } else if let Some(rest) = rest.strip_prefix("const ") {
        (SymbolKind::Const, rest)
    } else if let Some(rest) = rest.strip_prefix("global ") {
        (SymbolKind::Global, rest)
    } else {
        return None;
    };

    let name = rest
        .split(|c: char| c == ' ' || c == '{' || c == '=')
        .next()?
        .trim()
        .to_string();
    if name.is_empty() {
        return None;
    }
    let public = !name.starts_with('_');
    Some(StubItem {
        kind,
        name,
        public,
        entrypoint: false,
        copy: rest.contains("copy"),
        has_body: rest.contains('{'),
        span,
        params: Vec::new(),
        refs: Vec::new(),
    })
}

fn parse_body(rest: &str) -> Vec<(String, bool)> {
    let Some(open) = rest.find('{') else {
        return Vec::new();
    };
    let close = rest.rfind('}').unwrap_or(rest.len());
    rest[open + 1..close]
        .split_whitespace()
        .map(|token| {
            if let Some(name) = token.strip_suffix("()") {
                (name.to_string(), true)
            } else {
                (token.to_string(), false)
            }
        })
        .collect()
}

/// Deterministic type ids derived from type names.
fn type_id_for(name: &str) -> TypeId {
    TypeId(
        name.bytes()
            .fold(17u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32)),
    )
}

pub struct StubResolver;

impl StubResolver {
    fn declare_items(items: &[StubItem], table: &mut SymbolTable, result: &mut SymbolsResult) {
        let root = table.module_scope();
        for item in items {
            if table.lookup(&item.name, root).is_some() {
                continue;
            }
            let mut sym = Symbol::top_level(&item.name, item.kind, item.span);
            sym.flags = SymbolFlags {
                public: item.public,
                ..SymbolFlags::default()
            };
            match item.kind {
                SymbolKind::Type => sym.type_id = Some(type_id_for(&item.name)),
                SymbolKind::Contract => sym.has_contract_body = item.has_body,
                SymbolKind::Function => {
                    sym.signature = Some(format!("({})", item.params.len()));
                }
                _ => {}
            }
            result.declared.push(table.declare(sym, root));
        }
    }

    fn resolve_bodies(
        items: &[StubItem],
        ast: &Ast,
        table: &mut SymbolTable,
        opts: &ResolveOptions<'_>,
        bag: &mut DiagnosticBag,
    ) {
        let root = table.module_scope();
        for item in items {
            let owner = table.lookup(&item.name, root);
            let scope = if item.params.is_empty() {
                root
            } else {
                let block = table.alloc_scope(root, ScopeKind::Block);
                for param in &item.params {
                    let mut sym = Symbol::top_level(param, SymbolKind::Param, item.span);
                    sym.owner = owner;
                    table.declare(sym, block);
                }
                block
            };

            for (reference, _is_call) in &item.refs {
                if table.lookup(reference, scope).is_some() {
                    continue;
                }
                if import_proxy(reference, ast, table, opts).is_some() {
                    continue;
                }
                if builtin_export(reference, opts).is_some() {
                    continue;
                }
                // Best-effort single-pass mode: a reference that an import
                // could supply is not an error before exports exist.
                let single_pass = !opts.reuse_decls && !opts.declare_only;
                if single_pass && possibly_imported(ast, opts) {
                    continue;
                }
                bag.append(Diagnostic::error(
                    Code::external("SemaUnresolvedSymbol"),
                    item.span,
                    format!("unresolved symbol '{}'", reference),
                ));
            }
        }
    }
}

/// Resolve a reference through the imports of this file, declaring an
/// imported proxy symbol in the module's own table on first use.
fn import_proxy(
    reference: &str,
    ast: &Ast,
    table: &mut SymbolTable,
    opts: &ResolveOptions<'_>,
) -> Option<SymbolId> {
    for import in &ast.imports {
        let base = import.path.replace("::", "/");
        // The base module, plus each group member that is a module of
        // its own (candidate imports).
        let mut keys = vec![base.clone()];
        for member in &import.members {
            keys.push(format!("{}/{}", base, member.name));
        }
        let Some((exports, exported)) = keys.iter().find_map(|key| {
            let exports = opts.module_exports.get(key)?;
            let exported = exports.get(reference)?;
            Some((exports, exported))
        }) else {
            continue;
        };
        let root = table.module_scope();
        if let Some(existing) = table.lookup(reference, root) {
            return Some(existing);
        }
        let mut sym = Symbol::top_level(reference, exported.kind, exported.span);
        sym.flags.imported = true;
        sym.type_id = exported.type_id;
        sym.has_contract_body = exported.has_contract_body;
        sym.receiver = exported.receiver.clone();
        sym.signature = exported.signature.clone();
        sym.type_params = exported.type_params;
        sym.source_module = Some(exports.module_path.clone());
        return Some(table.declare(sym, root));
    }
    None
}

fn builtin_export<'a>(
    reference: &str,
    opts: &'a ResolveOptions<'_>,
) -> Option<&'a crate::symbols::ExportedSymbol> {
    opts.module_exports
        .values()
        .filter_map(|exports| exports.get(reference))
        .find(|sym| sym.builtin)
}

fn possibly_imported(ast: &Ast, opts: &ResolveOptions<'_>) -> bool {
    // Before exports exist, any import whose table is unknown could
    // still supply the name.
    ast.imports.iter().any(|import| {
        let key = import.path.replace("::", "/");
        !opts.module_exports.contains_key(&key)
    })
}

impl SymbolResolver for StubResolver {
    fn resolve(
        &self,
        ast: &Ast,
        table: &mut SymbolTable,
        opts: ResolveOptions<'_>,
        bag: &mut DiagnosticBag,
    ) -> SymbolsResult {
        let items = ast
            .payload::<StubItems>()
            .map(|items| items.0.clone())
            .unwrap_or_default();
        let mut result = SymbolsResult {
            file: Some(ast.file),
            declared: Vec::new(),
            resolved: false,
        };

        if opts.declare_only || !opts.reuse_decls {
            Self::declare_items(&items, table, &mut result);
        }
        if !opts.declare_only {
            Self::resolve_bodies(&items, ast, table, &opts, bag);
            result.resolved = true;
        }
        result
    }
}

pub struct StubChecker;

impl SemaChecker for StubChecker {
    fn check(
        &self,
        ast: &Ast,
        table: &SymbolTable,
        opts: CheckOptions<'_>,
        bag: &mut DiagnosticBag,
    ) -> SemaResult {
        let items = ast
            .payload::<StubItems>()
            .map(|items| items.0.clone())
            .unwrap_or_default();
        let root = table.module_scope();

        let mut result = SemaResult {
            file: Some(ast.file),
            entrypoints: Vec::new(),
            instantiations: Vec::new(),
            copy_types: Vec::new(),
        };
        for item in &items {
            if item.entrypoint {
                result.entrypoints.push(item.span);
            }
            for (reference, _) in &item.refs {
                if reference.starts_with("old_") {
                    bag.append(Diagnostic::warning(
                        Code::external("SemaDeprecated"),
                        item.span,
                        format!("'{}' is deprecated", reference),
                    ));
                }
            }
            if item.copy {
                result.copy_types.push(type_id_for(&item.name));
            }
            if opts.record_instantiations && item.kind == SymbolKind::Function {
                let caller = table.lookup(&item.name, root);
                for (reference, is_call) in &item.refs {
                    if !is_call {
                        continue;
                    }
                    if let (Some(caller), Some(callee)) = (caller, table.lookup(reference, root)) {
                        result.instantiations.push(Instantiation {
                            callee,
                            caller,
                            type_args: Vec::new(),
                        });
                    }
                }
            }
        }
        result
    }
}

pub struct StubLowerer;

impl super::HirLowerer for StubLowerer {
    fn lower(
        &self,
        module_path: &str,
        asts: &[Arc<Ast>],
        table: &SymbolTable,
        sema: &[SemaResult],
    ) -> HirModule {
        let mut module = HirModule::new(module_path);
        let root = table.module_scope();

        for ast in asts {
            let Some(items) = ast.payload::<StubItems>() else {
                continue;
            };
            for item in &items.0 {
                let Some(symbol) = table.lookup(&item.name, root) else {
                    continue;
                };
                let name = module.interner.intern(&item.name);
                match item.kind {
                    SymbolKind::Function => {
                        let params = item
                            .params
                            .iter()
                            .filter_map(|param| {
                                find_param(table, symbol, param).map(|sym| HirParam {
                                    symbol: sym,
                                    name: module.interner.intern(param),
                                    ty: None,
                                })
                            })
                            .collect();
                        let body = item
                            .refs
                            .iter()
                            .filter_map(|(reference, is_call)| {
                                let target = table.lookup(reference, root)?;
                                let expr = if *is_call {
                                    HirExpr::Call {
                                        callee: target,
                                        args: Vec::new(),
                                    }
                                } else {
                                    HirExpr::VarRef(target)
                                };
                                Some(HirStmt::Expr(module.alloc_expr(expr)))
                            })
                            .collect();
                        let id = module.next_func_id();
                        module.funcs.push(HirFunction {
                            id,
                            symbol,
                            name,
                            params,
                            ret: None,
                            body,
                            entrypoint: item.entrypoint,
                        });
                    }
                    SymbolKind::Type => module.types.push(crate::hir::HirTypeDecl {
                        symbol,
                        name,
                        ty: type_id_for(&item.name),
                    }),
                    SymbolKind::Const => {
                        let value = module.alloc_expr(HirExpr::Literal(
                            crate::hir::HirLiteral::Int(0),
                        ));
                        module.consts.push(crate::hir::HirConst {
                            symbol,
                            name,
                            ty: None,
                            value,
                        });
                    }
                    SymbolKind::Global => module.globals.push(crate::hir::HirGlobal {
                        symbol,
                        name,
                        ty: None,
                    }),
                    _ => {}
                }
            }
        }

        for result in sema {
            module.instantiations.extend(result.instantiations.clone());
            module.copy_types.extend(result.copy_types.iter().copied());
        }
        module
    }
}

fn find_param(table: &SymbolTable, owner: SymbolId, name: &str) -> Option<SymbolId> {
    let count = u32::try_from(table.len()).ok()?;
    (0..count).map(SymbolId).find(|id| {
        let sym = table.symbol(*id);
        sym.kind == SymbolKind::Param && sym.owner == Some(owner) && sym.name == name
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FileId, FileSet};
    use crate::symbols::ExportsMap;
    use ahash::AHashSet;
    use tempfile::TempDir;

    fn parse_text(text: &str) -> (Ast, DiagnosticBag) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.sg");
        std::fs::write(&path, text).unwrap();
        let mut fs = FileSet::new();
        let id = fs.load(&path);
        let file = fs.get(id);
        let mut bag = DiagnosticBag::new();
        let tokens = StubLexer.tokenize(file, &mut bag);
        let ast = StubParser.parse(tokens, file, &mut bag);
        (ast, bag)
    }

    #[test]
    fn test_parse_pragma_and_imports() {
        let (ast, bag) = parse_text(
            "pragma binary::tool;\nimport a::b;\nimport c::{x, y};\n@entrypoint\nfn main() { run() }\n",
        );
        assert!(bag.is_empty());
        let pragma = ast.pragma.as_ref().unwrap();
        assert_eq!(pragma.kind, PragmaKind::Binary);
        assert_eq!(pragma.name, "tool");
        assert_eq!(ast.imports.len(), 2);
        assert_eq!(ast.imports[1].members.len(), 2);

        let items = ast.payload::<StubItems>().unwrap();
        assert_eq!(items.0.len(), 1);
        assert!(items.0[0].entrypoint);
        assert_eq!(items.0[0].refs, vec![("run".to_string(), true)]);
    }

    #[test]
    fn test_parse_error_reported() {
        let (_, bag) = parse_text("fn ok() {}\nsyntax_error\n");
        assert!(bag.has_errors());
    }

    #[test]
    fn test_two_pass_resolution() {
        let (ast, _) = parse_text("pub fn helper() {}\nfn user() { helper() }\n");
        let mut table = SymbolTable::new();
        let exports = ExportsMap::default();
        let files = [FileId(0)].into_iter().collect::<AHashSet<_>>();
        let mut bag = DiagnosticBag::new();

        let declared = StubResolver.resolve(
            &ast,
            &mut table,
            ResolveOptions {
                declare_only: true,
                reuse_decls: false,
                module_exports: &exports,
                module_files: &files,
                no_alien_hints: false,
            },
            &mut bag,
        );
        assert_eq!(declared.declared.len(), 2);
        assert!(!declared.resolved);

        let resolved = StubResolver.resolve(
            &ast,
            &mut table,
            ResolveOptions {
                declare_only: false,
                reuse_decls: true,
                module_exports: &exports,
                module_files: &files,
                no_alien_hints: false,
            },
            &mut bag,
        );
        assert!(resolved.resolved);
        assert!(bag.is_empty());
    }

    #[test]
    fn test_unresolved_reference_with_exports_present() {
        let (ast, _) = parse_text("import lib;\nfn user() { nope() }\n");
        let mut table = SymbolTable::new();
        let mut exports = ExportsMap::default();
        exports.insert(
            "lib".to_string(),
            Arc::new(crate::symbols::ModuleExports::from_table(
                "lib",
                &SymbolTable::new(),
            )),
        );
        let files = [FileId(0)].into_iter().collect::<AHashSet<_>>();
        let mut bag = DiagnosticBag::new();
        StubResolver.resolve(
            &ast,
            &mut table,
            ResolveOptions {
                declare_only: false,
                reuse_decls: true,
                module_exports: &exports,
                module_files: &files,
                no_alien_hints: false,
            },
            &mut bag,
        );
        assert!(bag.has_errors());
    }

    #[test]
    fn test_import_proxy_created_for_export() {
        let (ast, _) = parse_text("import lib;\nfn user() { helper() }\n");
        let mut lib_table = SymbolTable::new();
        let lib_root = lib_table.module_scope();
        lib_table.declare(
            Symbol::top_level("helper", SymbolKind::Function, Span::EMPTY).public(),
            lib_root,
        );
        let mut exports = ExportsMap::default();
        exports.insert(
            "lib".to_string(),
            Arc::new(crate::symbols::ModuleExports::from_table("lib", &lib_table)),
        );

        let mut table = SymbolTable::new();
        let files = [FileId(0)].into_iter().collect::<AHashSet<_>>();
        let mut bag = DiagnosticBag::new();
        StubResolver.resolve(
            &ast,
            &mut table,
            ResolveOptions {
                declare_only: false,
                reuse_decls: true,
                module_exports: &exports,
                module_files: &files,
                no_alien_hints: false,
            },
            &mut bag,
        );
        assert!(bag.is_empty());
        let proxy = table.lookup("helper", table.module_scope()).unwrap();
        let sym = table.symbol(proxy);
        assert!(sym.flags.imported);
        assert_eq!(sym.source_module.as_deref(), Some("lib"));
    }
}
