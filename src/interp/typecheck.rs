//! The typechecker: lowers the AST into the typed CST.
//!
//! Declarations go into the DefnTree as they are seen; nominal types are
//! declared in a first pass so signatures can reference them forward.
//! Every produced expression carries its resolved type; implicit
//! conversions become explicit nodes here, so the evaluator never guesses.

use crate::error::{ErrorMessage, Location};
use crate::interp::ast::{self, CastTarget, QualifiedId};
use crate::interp::cst::{self, DeclId, DeclKind, Declaration};
use crate::interp::overload::{
    self, ExpectedParam, Binding, ResolvedOverload, SuppliedArg,
};
use crate::interp::tree::{DefnForest, TreeId};
use crate::interp::ty::{TypeId, TypeInterner, TypeKind};
use crate::interp::value::Value;

type Result<T> = std::result::Result<T, ErrorMessage>;

pub struct Typechecker {
    pub types: TypeInterner,
    pub forest: DefnForest,
    pub decls: Vec<Declaration>,
    scopes: Vec<TreeId>,
    /// Return types of the functions currently being checked.
    function_stack: Vec<TypeId>,
    /// `self` context for `.field` resolution inside methods.
    self_context: Vec<(DeclId, TypeId)>,
    anonymous_scopes: u32,
}

impl Typechecker {
    pub fn new() -> Self {
        let types = TypeInterner::new();
        let forest = DefnForest::new();
        let root = forest.root();
        Typechecker {
            types,
            forest,
            decls: Vec::new(),
            scopes: vec![root],
            function_stack: Vec::new(),
            self_context: Vec::new(),
            anonymous_scopes: 0,
        }
    }

    pub fn scope(&self) -> TreeId {
        *self.scopes.last().unwrap()
    }

    fn push_anonymous_scope(&mut self) {
        self.anonymous_scopes += 1;
        let name = format!("#{}", self.anonymous_scopes);
        let child = self.forest.child_named(self.scope(), &name);
        self.scopes.push(child);
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn declaration(&self, id: DeclId) -> &Declaration {
        &self.decls[id.0 as usize]
    }

    fn add_declaration(&mut self, name: &str, declaration: Declaration) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        self.decls.push(declaration);
        self.forest.declare(self.scope(), name, id);
        id
    }

    /// Registers a native function.
    pub fn declare_builtin(
        &mut self,
        name: &str,
        params: Vec<cst::Param>,
        ret: TypeId,
        builtin: cst::BuiltinFn,
    ) -> DeclId {
        let param_types: Vec<TypeId> = params.iter().map(|p| p.ty).collect();
        let fn_ty = self.types.function(param_types, ret);
        let qualified_name = self.forest.scoped_name(self.scope(), name);
        self.add_declaration(
            name,
            Declaration {
                name: name.to_string(),
                qualified_name,
                loc: Location::builtin(),
                ty: fn_ty,
                kind: DeclKind::Func {
                    params,
                    ret,
                    param_decls: Vec::new(),
                    body: None,
                    builtin: Some(builtin),
                },
            },
        )
    }

    // ----- types -----

    pub fn resolve_type(&mut self, expr: &ast::TypeExpr, loc: &Location) -> Result<TypeId> {
        match expr {
            ast::TypeExpr::Optional(inner) => {
                let inner = self.resolve_type(inner, loc)?;
                Ok(self.types.optional(inner))
            }
            ast::TypeExpr::Pointer(inner, mutable) => {
                let inner = self.resolve_type(inner, loc)?;
                Ok(self.types.pointer(inner, *mutable))
            }
            ast::TypeExpr::Array(inner, variadic) => {
                let inner = self.resolve_type(inner, loc)?;
                Ok(self.types.array(inner, *variadic))
            }
            ast::TypeExpr::Function(params, ret) => {
                let params = params
                    .iter()
                    .map(|p| self.resolve_type(p, loc))
                    .collect::<Result<Vec<_>>>()?;
                let ret = self.resolve_type(ret, loc)?;
                Ok(self.types.function(params, ret))
            }
            ast::TypeExpr::Named(id) => {
                if id.parents.is_empty() && !id.absolute {
                    let primitive = match id.name.as_str() {
                        "void" => Some(self.types.void()),
                        "any" => Some(self.types.any()),
                        "bool" => Some(self.types.bool_()),
                        "char" => Some(self.types.char_()),
                        "int" => Some(self.types.int()),
                        "float" => Some(self.types.float()),
                        "length" => Some(self.types.length()),
                        "string" => Some(self.types.string()),
                        "inline_obj" => Some(self.types.tree_inline_obj()),
                        "block_obj" => Some(self.types.tree_block_obj()),
                        "layout_obj" => Some(self.types.layout_obj()),
                        _ => None,
                    };
                    if let Some(ty) = primitive {
                        return Ok(ty);
                    }
                }

                let decls = self.forest.lookup(self.scope(), id);
                for decl_id in decls {
                    match &self.declaration(decl_id).kind {
                        DeclKind::Struct { ty, .. }
                        | DeclKind::Union { ty, .. }
                        | DeclKind::Enum { ty, .. } => return Ok(*ty),
                        _ => {}
                    }
                }

                Err(ErrorMessage::new(
                    loc.clone(),
                    format!("unknown type '{}'", id),
                ))
            }
        }
    }

    // ----- statement checking -----

    /// Checks a statement list as one scope: nominal types first, then
    /// signatures, then bodies in order.
    pub fn check_block(&mut self, stmts: &[ast::Stmt]) -> Result<cst::Block> {
        self.predeclare_types(stmts)?;
        self.define_types_and_functions(stmts)?;

        let mut out = Vec::new();
        for stmt in stmts {
            if let Some(checked) = self.check_stmt(stmt)? {
                out.push(checked);
            }
        }
        Ok(cst::Block { stmts: out })
    }

    fn predeclare_types(&mut self, stmts: &[ast::Stmt]) -> Result<()> {
        for stmt in stmts {
            match &stmt.kind {
                ast::StmtKind::StructDecl { name, .. } => {
                    let qualified = self.forest.scoped_name(self.scope(), name);
                    self.types.declare_struct(&qualified);
                }
                ast::StmtKind::UnionDecl { name, .. } => {
                    let qualified = self.forest.scoped_name(self.scope(), name);
                    self.types.declare_union(&qualified);
                }
                ast::StmtKind::EnumDecl { name, elem_ty, .. } => {
                    let elem = match elem_ty {
                        Some(ty) => self.resolve_type(ty, &stmt.loc)?,
                        None => self.types.int(),
                    };
                    let qualified = self.forest.scoped_name(self.scope(), name);
                    self.types.declare_enum(&qualified, elem);
                }
                ast::StmtKind::Namespace { name, body } => {
                    let child = self.forest.child_named(self.scope(), name);
                    self.scopes.push(child);
                    let result = self.predeclare_types(body);
                    self.pop_scope();
                    result?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn define_types_and_functions(&mut self, stmts: &[ast::Stmt]) -> Result<()> {
        // Members first, so function signatures can use complete types.
        for stmt in stmts {
            match &stmt.kind {
                ast::StmtKind::StructDecl { name, fields } => {
                    self.define_struct(&stmt.loc, name, fields)?;
                }
                ast::StmtKind::UnionDecl { name, cases } => {
                    self.define_union(&stmt.loc, name, cases)?;
                }
                ast::StmtKind::EnumDecl {
                    name, enumerators, ..
                } => {
                    self.define_enum(&stmt.loc, name, enumerators)?;
                }
                ast::StmtKind::Namespace { name, body } => {
                    let child = self.forest.child_named(self.scope(), name);
                    self.scopes.push(child);
                    let result = self.define_types_and_functions(body);
                    self.pop_scope();
                    result?;
                }
                _ => {}
            }
        }

        for stmt in stmts {
            match &stmt.kind {
                ast::StmtKind::FuncDecl {
                    name,
                    params,
                    return_ty,
                    ..
                } => {
                    self.declare_function_signature(&stmt.loc, name, params, return_ty)?;
                }
                ast::StmtKind::Namespace { name, body } => {
                    let child = self.forest.child_named(self.scope(), name);
                    self.scopes.push(child);
                    // Types inside were handled above; only signatures
                    // remain.
                    let result = (|| {
                        for inner in body {
                            if let ast::StmtKind::FuncDecl {
                                name,
                                params,
                                return_ty,
                                ..
                            } = &inner.kind
                            {
                                self.declare_function_signature(
                                    &inner.loc, name, params, return_ty,
                                )?;
                            }
                        }
                        Ok(())
                    })();
                    self.pop_scope();
                    result?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn check_params(&mut self, params: &[ast::Param]) -> Result<Vec<cst::Param>> {
        let mut out = Vec::with_capacity(params.len());
        for param in params {
            let ty = self.resolve_type(&param.ty, &param.loc)?;
            let default = match &param.default {
                Some(expr) => {
                    let checked = self.check_expr(expr, Some(ty))?;
                    Some(self.convert_expr(checked, ty)?)
                }
                None => None,
            };
            out.push(cst::Param {
                name: param.name.clone(),
                ty,
                default,
            });
        }
        Ok(out)
    }

    fn define_struct(&mut self, loc: &Location, name: &str, fields: &[ast::Param]) -> Result<()> {
        let qualified = self.forest.scoped_name(self.scope(), name);
        let ty = self.types.declare_struct(&qualified);

        let params = self.check_params(fields)?;
        let field_types: Vec<(String, TypeId)> = params
            .iter()
            .map(|p| (p.name.clone(), p.ty))
            .collect();
        self.types.set_struct_fields(ty, field_types);

        self.add_declaration(
            name,
            Declaration {
                name: name.to_string(),
                qualified_name: qualified,
                loc: loc.clone(),
                ty,
                kind: DeclKind::Struct { ty, fields: params },
            },
        );
        Ok(())
    }

    fn define_union(
        &mut self,
        loc: &Location,
        name: &str,
        cases: &[(String, Vec<ast::Param>)],
    ) -> Result<()> {
        let qualified = self.forest.scoped_name(self.scope(), name);
        let ty = self.types.declare_union(&qualified);

        let mut checked_cases = Vec::with_capacity(cases.len());
        let mut case_types = Vec::with_capacity(cases.len());
        for (case_name, params) in cases {
            let params = self.check_params(params)?;
            let case_qualified = format!("{}::{}", qualified, case_name);
            let case_ty = self.types.declare_struct(&case_qualified);
            let fields: Vec<(String, TypeId)> =
                params.iter().map(|p| (p.name.clone(), p.ty)).collect();
            self.types.set_struct_fields(case_ty, fields);

            case_types.push((case_name.clone(), case_ty));
            checked_cases.push((case_name.clone(), params));
        }
        self.types.set_union_cases(ty, case_types);

        self.add_declaration(
            name,
            Declaration {
                name: name.to_string(),
                qualified_name: qualified,
                loc: loc.clone(),
                ty,
                kind: DeclKind::Union {
                    ty,
                    cases: checked_cases,
                },
            },
        );
        Ok(())
    }

    fn define_enum(
        &mut self,
        loc: &Location,
        name: &str,
        enumerators: &[(String, Option<ast::Expr>)],
    ) -> Result<()> {
        let qualified = self.forest.scoped_name(self.scope(), name);
        // Element type was established during predeclaration.
        let ty = self.types.declare_enum(&qualified, self.types.int());
        let elem = self.types.enum_element(ty).unwrap_or(self.types.int());

        let mut values = Vec::with_capacity(enumerators.len());
        let mut next_auto = 0i64;
        for (enum_name, init) in enumerators {
            let value = match init {
                Some(expr) => {
                    let checked = self.check_expr(expr, Some(elem))?;
                    let value = const_eval_int(&checked).ok_or_else(|| {
                        ErrorMessage::new(
                            expr.loc.clone(),
                            "enumerator values must be integer constants",
                        )
                    })?;
                    next_auto = value + 1;
                    Value::Int(value)
                }
                None => {
                    let value = Value::Int(next_auto);
                    next_auto += 1;
                    value
                }
            };
            values.push((enum_name.clone(), value));
        }

        self.add_declaration(
            name,
            Declaration {
                name: name.to_string(),
                qualified_name: qualified,
                loc: loc.clone(),
                ty,
                kind: DeclKind::Enum {
                    ty,
                    enumerators: values,
                },
            },
        );
        Ok(())
    }

    fn declare_function_signature(
        &mut self,
        loc: &Location,
        name: &str,
        params: &[ast::Param],
        return_ty: &Option<ast::TypeExpr>,
    ) -> Result<DeclId> {
        let params = self.check_params(params)?;
        let ret = match return_ty {
            Some(ty) => self.resolve_type(ty, loc)?,
            None => self.types.void(),
        };

        // Overloads may coexist only when their parameter types differ.
        let param_types: Vec<TypeId> = params.iter().map(|p| p.ty).collect();
        for existing in self.forest.declarations_in(self.scope(), name) {
            if let DeclKind::Func {
                params: other_params,
                ..
            } = &self.declaration(existing).kind
            {
                let other_types: Vec<TypeId> = other_params.iter().map(|p| p.ty).collect();
                if other_types == param_types {
                    return Err(ErrorMessage::new(
                        loc.clone(),
                        format!("duplicate definition of '{}'", name),
                    )
                    .with_info(
                        self.declaration(existing).loc.clone(),
                        "previous definition is here",
                    ));
                }
            }
        }

        let fn_ty = self.types.function(param_types, ret);
        let qualified = self.forest.scoped_name(self.scope(), name);
        Ok(self.add_declaration(
            name,
            Declaration {
                name: name.to_string(),
                qualified_name: qualified,
                loc: loc.clone(),
                ty: fn_ty,
                kind: DeclKind::Func {
                    params,
                    ret,
                    param_decls: Vec::new(),
                    body: None,
                    builtin: None,
                },
            },
        ))
    }

    fn check_stmt(&mut self, stmt: &ast::Stmt) -> Result<Option<cst::Stmt>> {
        let loc = stmt.loc.clone();
        let checked = match &stmt.kind {
            ast::StmtKind::Expr(expr) => {
                let expr = self.check_expr(expr, None)?;
                Some(cst::StmtKind::Expr(expr))
            }
            ast::StmtKind::Block(stmts) => {
                self.push_anonymous_scope();
                let block = self.check_block(stmts);
                self.pop_scope();
                Some(cst::StmtKind::Block(block?))
            }
            ast::StmtKind::VarDecl {
                name,
                mutable,
                ty,
                init,
            } => {
                let declared_ty = match ty {
                    Some(ty) => Some(self.resolve_type(ty, &loc)?),
                    None => None,
                };

                let init = match init {
                    Some(expr) => {
                        let checked = self.check_expr(expr, declared_ty)?;
                        Some(match declared_ty {
                            Some(ty) => self.convert_expr(checked, ty)?,
                            None => checked,
                        })
                    }
                    None => None,
                };

                let var_ty = declared_ty
                    .or_else(|| init.as_ref().map(|e| e.ty))
                    .ok_or_else(|| {
                        ErrorMessage::new(
                            loc.clone(),
                            "variable needs a type annotation or an initializer",
                        )
                    })?;

                if !self.types.is_cloneable(var_ty) {
                    if let Some(init) = &init {
                        if is_lvalue(init) && !matches!(init.kind, cst::ExprKind::Move(_)) {
                            return Err(ErrorMessage::new(
                                loc.clone(),
                                "this value cannot be copied; move it explicitly with '*'",
                            ));
                        }
                    }
                }

                let global = self.function_stack.is_empty();
                let qualified = self.forest.scoped_name(self.scope(), name);
                let decl = self.add_declaration(
                    name,
                    Declaration {
                        name: name.clone(),
                        qualified_name: qualified,
                        loc: loc.clone(),
                        ty: var_ty,
                        kind: DeclKind::Var {
                            mutable: *mutable,
                            global,
                        },
                    },
                );
                Some(cst::StmtKind::Let { decl, init })
            }
            ast::StmtKind::FuncDecl {
                name, params, body, ..
            } => {
                self.check_function_body(&loc, name, params, body)?;
                None
            }
            ast::StmtKind::StructDecl { .. }
            | ast::StmtKind::UnionDecl { .. }
            | ast::StmtKind::EnumDecl { .. } => None,
            ast::StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.check_condition(cond)?;
                self.push_anonymous_scope();
                let then_body = self.check_block(then_body);
                self.pop_scope();
                self.push_anonymous_scope();
                let else_body = self.check_block(else_body);
                self.pop_scope();
                Some(cst::StmtKind::If {
                    cond,
                    then_body: then_body?,
                    else_body: else_body?,
                })
            }
            ast::StmtKind::While { cond, body } => {
                let cond = self.check_condition(cond)?;
                self.push_anonymous_scope();
                let body = self.check_block(body);
                self.pop_scope();
                Some(cst::StmtKind::While { cond, body: body? })
            }
            ast::StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                self.push_anonymous_scope();
                let result = (|| {
                    let init = match init {
                        Some(stmt) => self.check_stmt(stmt)?.map(Box::new),
                        None => None,
                    };
                    let cond = cond.as_ref().map(|c| self.check_condition(c)).transpose()?;
                    let update = update
                        .as_ref()
                        .map(|u| self.check_expr(u, None))
                        .transpose()?;
                    let body = self.check_block(body)?;
                    Ok(cst::StmtKind::For {
                        init,
                        cond,
                        update,
                        body,
                    })
                })();
                self.pop_scope();
                Some(result?)
            }
            ast::StmtKind::Return(value) => {
                let expected = self.function_stack.last().copied().ok_or_else(|| {
                    ErrorMessage::new(loc.clone(), "'return' outside of a function")
                })?;

                let value = match value {
                    Some(expr) => {
                        let checked = self.check_expr(expr, Some(expected))?;
                        Some(self.convert_expr(checked, expected)?)
                    }
                    None => {
                        if expected != self.types.void() {
                            return Err(ErrorMessage::new(
                                loc.clone(),
                                "non-void function must return a value",
                            ));
                        }
                        None
                    }
                };
                Some(cst::StmtKind::Return(value))
            }
            ast::StmtKind::Break => Some(cst::StmtKind::Break),
            ast::StmtKind::Continue => Some(cst::StmtKind::Continue),
            // Imports were spliced before checking.
            ast::StmtKind::Import(_) => None,
            ast::StmtKind::Using { target, alias } => {
                self.check_using(&loc, target, alias.as_deref())?;
                None
            }
            ast::StmtKind::Namespace { name, body } => {
                let child = self.forest.child_named(self.scope(), name);
                self.scopes.push(child);
                let mut out = Vec::new();
                let result = (|| {
                    for stmt in body {
                        if let Some(checked) = self.check_stmt(stmt)? {
                            out.push(checked);
                        }
                    }
                    Ok(())
                })();
                self.pop_scope();
                result?;
                Some(cst::StmtKind::Block(cst::Block { stmts: out }))
            }
            ast::StmtKind::Hook { phase, body } => {
                let body = self
                    .check_stmt(body)?
                    .ok_or_else(|| ErrorMessage::new(loc.clone(), "hook body has no effect"))?;
                Some(cst::StmtKind::Hook {
                    phase: *phase,
                    body: Box::new(body),
                })
            }
        };

        Ok(checked.map(|kind| cst::Stmt { loc, kind }))
    }

    fn check_condition(&mut self, cond: &ast::Expr) -> Result<cst::Expr> {
        let checked = self.check_expr(cond, Some(self.types.bool_()))?;
        if checked.ty != self.types.bool_() {
            return Err(ErrorMessage::new(
                checked.loc.clone(),
                format!(
                    "condition must be 'bool', found '{}'",
                    self.types.display(checked.ty)
                ),
            ));
        }
        Ok(checked)
    }

    fn check_function_body(
        &mut self,
        loc: &Location,
        name: &str,
        params: &[ast::Param],
        body: &[ast::Stmt],
    ) -> Result<()> {
        // Find the signature declared earlier by matching parameter types.
        let param_types: Vec<TypeId> = params
            .iter()
            .map(|p| self.resolve_type(&p.ty, &p.loc))
            .collect::<Result<Vec<_>>>()?;
        let decl_id = self
            .forest
            .declarations_in(self.scope(), name)
            .into_iter()
            .find(|&id| match &self.declaration(id).kind {
                DeclKind::Func { params, body, .. } => {
                    body.is_none()
                        && params.iter().map(|p| p.ty).collect::<Vec<_>>() == param_types
                }
                _ => false,
            })
            .ok_or_else(|| ErrorMessage::new(loc.clone(), "function signature not found"))?;

        let (checked_params, ret) = match &self.declaration(decl_id).kind {
            DeclKind::Func { params, ret, .. } => (params.clone(), *ret),
            _ => unreachable!(),
        };

        self.push_anonymous_scope();
        self.function_stack.push(ret);

        // Parameters become local declarations.
        let mut self_decl = None;
        let mut param_decl_ids = Vec::with_capacity(checked_params.len());
        for param in &checked_params {
            let qualified = self.forest.scoped_name(self.scope(), &param.name);
            let decl = self.add_declaration(
                &param.name,
                Declaration {
                    name: param.name.clone(),
                    qualified_name: qualified,
                    loc: loc.clone(),
                    ty: param.ty,
                    kind: DeclKind::Var {
                        mutable: false,
                        global: false,
                    },
                },
            );
            param_decl_ids.push(decl);
            if self_decl.is_none() && param.name == "self" {
                if let Some(elem) = self.types.pointer_element(param.ty) {
                    if self.types.struct_fields(elem).is_some() {
                        self_decl = Some((decl, elem));
                    }
                }
            }
        }

        if let Some(ctx) = self_decl {
            self.self_context.push(ctx);
        }
        let body_result = self.check_block(body);
        if self_decl.is_some() {
            self.self_context.pop();
        }

        self.function_stack.pop();
        self.pop_scope();

        let block = body_result?;
        if let DeclKind::Func {
            body, param_decls, ..
        } = &mut self.decls[decl_id.0 as usize].kind
        {
            *body = Some(block);
            *param_decls = param_decl_ids;
        }
        Ok(())
    }

    fn check_using(
        &mut self,
        loc: &Location,
        target: &QualifiedId,
        alias: Option<&str>,
    ) -> Result<()> {
        // A namespace target aliases the tree; a declaration target
        // aliases its overload set.
        let mut namespace = Some(if target.absolute {
            self.forest.root()
        } else {
            self.scope()
        });

        if !target.absolute {
            // Walk up until the first path component resolves.
            let first = target.parents.first().unwrap_or(&target.name);
            let mut probe = Some(self.scope());
            while let Some(tree) = probe {
                if self.forest.existing_child(tree, first).is_some() {
                    namespace = Some(tree);
                    break;
                }
                probe = self.forest.parent(tree);
            }
        }

        let mut tree = namespace.unwrap_or(self.forest.root());
        let mut is_namespace = true;
        for part in &target.parents {
            match self.forest.existing_child(tree, part) {
                Some(child) => tree = child,
                None => {
                    is_namespace = false;
                    break;
                }
            }
        }
        let target_tree = is_namespace
            .then(|| self.forest.existing_child(tree, &target.name))
            .flatten();

        if let Some(target_tree) = target_tree {
            let name = alias.unwrap_or(&target.name);
            let scope = self.scope();
            self.forest.import_tree(scope, name, target_tree);
            return Ok(());
        }

        let decls = self.forest.lookup(self.scope(), target);
        if decls.is_empty() {
            return Err(ErrorMessage::new(
                loc.clone(),
                format!("'{}' names neither a namespace nor a declaration", target),
            ));
        }

        let name = alias.unwrap_or(&target.name).to_string();
        let scope = self.scope();
        self.forest.import_declarations(scope, &name, &decls);
        Ok(())
    }

    // ----- expression checking -----

    pub fn check_expr(&mut self, expr: &ast::Expr, expected: Option<TypeId>) -> Result<cst::Expr> {
        let loc = expr.loc.clone();
        match &expr.kind {
            ast::ExprKind::IntLit(n) => Ok(cst::Expr {
                ty: self.types.int(),
                loc,
                kind: cst::ExprKind::IntLit(*n),
            }),
            ast::ExprKind::FloatLit(n) => Ok(cst::Expr {
                ty: self.types.float(),
                loc,
                kind: cst::ExprKind::FloatLit(*n),
            }),
            ast::ExprKind::BoolLit(b) => Ok(cst::Expr {
                ty: self.types.bool_(),
                loc,
                kind: cst::ExprKind::BoolLit(*b),
            }),
            ast::ExprKind::CharLit(c) => Ok(cst::Expr {
                ty: self.types.char_(),
                loc,
                kind: cst::ExprKind::CharLit(*c),
            }),
            ast::ExprKind::StringLit(s) => Ok(cst::Expr {
                ty: self.types.string(),
                loc,
                kind: cst::ExprKind::StringLit(s.clone()),
            }),
            ast::ExprKind::NullLit => {
                let ty = match expected {
                    Some(ty)
                        if matches!(
                            self.types.kind(ty),
                            TypeKind::Optional { .. } | TypeKind::Pointer { .. }
                        ) =>
                    {
                        ty
                    }
                    _ => self.types.nullptr(),
                };
                Ok(cst::Expr {
                    ty,
                    loc,
                    kind: cst::ExprKind::NullLit,
                })
            }
            ast::ExprKind::LengthLit(value, unit) => {
                let points = unit.to_points().map(|f| value * f).ok_or_else(|| {
                    ErrorMessage::new(
                        loc.clone(),
                        "font-relative units cannot be used in this context",
                    )
                })?;
                Ok(cst::Expr {
                    ty: self.types.length(),
                    loc,
                    kind: cst::ExprKind::LengthLit(points),
                })
            }
            ast::ExprKind::ArrayLit(items) => {
                let expected_elem = expected.and_then(|ty| self.types.array_element(ty));
                let mut checked = Vec::with_capacity(items.len());
                for item in items {
                    checked.push(self.check_expr(item, expected_elem)?);
                }

                let elem = expected_elem
                    .or_else(|| checked.first().map(|e| e.ty))
                    .unwrap_or(self.types.void());
                let mut converted = Vec::with_capacity(checked.len());
                for item in checked {
                    converted.push(self.convert_expr(item, elem)?);
                }

                Ok(cst::Expr {
                    ty: self.types.array(elem, false),
                    loc,
                    kind: cst::ExprKind::ArrayLit(converted),
                })
            }
            ast::ExprKind::FString(parts) => {
                let string_ty = self.types.string();
                let mut checked = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        ast::FStringPart::Text(text) => checked.push(cst::Expr {
                            ty: string_ty,
                            loc: loc.clone(),
                            kind: cst::ExprKind::StringLit(text.clone()),
                        }),
                        ast::FStringPart::Interpolation(inner) => {
                            // Any value; stringified at run time.
                            checked.push(self.check_expr(inner, None)?);
                        }
                    }
                }
                Ok(cst::Expr {
                    ty: string_ty,
                    loc,
                    kind: cst::ExprKind::FString(checked),
                })
            }
            ast::ExprKind::Ident(id) => self.check_ident(&loc, id),
            ast::ExprKind::ContextIdent(name) => self.check_context_ident(&loc, name, expected),
            ast::ExprKind::UnionLit { case, args } => {
                let union_ty = expected
                    .map(|ty| match self.types.kind(ty) {
                        TypeKind::Optional { elem } => *elem,
                        _ => ty,
                    })
                    .filter(|&ty| self.types.union_cases(ty).is_some())
                    .ok_or_else(|| {
                        ErrorMessage::new(
                            loc.clone(),
                            "cannot infer the union type of this literal",
                        )
                    })?;
                let result = self.check_union_literal(&loc, union_ty, case, args)?;
                match expected {
                    Some(ty) if ty != union_ty => self.convert_expr(result, ty),
                    _ => Ok(result),
                }
            }
            ast::ExprKind::StructLit { name, fields } => {
                let ty = match name {
                    Some(id) => {
                        let named = ast::TypeExpr::Named(id.clone());
                        self.resolve_type(&named, &loc)?
                    }
                    None => expected
                        .map(|ty| match self.types.kind(ty) {
                            TypeKind::Optional { elem } => *elem,
                            _ => ty,
                        })
                        .ok_or_else(|| {
                            ErrorMessage::new(
                                loc.clone(),
                                "cannot infer the struct type of this literal",
                            )
                        })?,
                };
                self.check_struct_literal(&loc, ty, fields)
            }
            ast::ExprKind::StructUpdate { base, updates } => {
                let base = self.check_expr(base, expected)?;
                let fields = self
                    .types
                    .struct_fields(base.ty)
                    .ok_or_else(|| {
                        ErrorMessage::new(
                            loc.clone(),
                            "'//' requires a struct value on the left",
                        )
                    })?
                    .to_vec();

                let mut checked_updates = Vec::with_capacity(updates.len());
                for update in updates {
                    let name = update.name.as_deref().ok_or_else(|| {
                        ErrorMessage::new(
                            update.value.loc.clone(),
                            "struct updates require named fields",
                        )
                    })?;
                    let index = fields
                        .iter()
                        .position(|(field, _)| field == name)
                        .ok_or_else(|| {
                            ErrorMessage::new(
                                update.value.loc.clone(),
                                format!("struct has no field named '{}'", name),
                            )
                        })?;
                    let value = self.check_expr(&update.value, Some(fields[index].1))?;
                    let value = self.convert_expr(value, fields[index].1)?;
                    checked_updates.push((index, value));
                }

                Ok(cst::Expr {
                    ty: base.ty,
                    loc,
                    kind: cst::ExprKind::StructUpdate {
                        base: Box::new(base),
                        updates: checked_updates,
                    },
                })
            }
            ast::ExprKind::Call {
                callee,
                args,
                rewritten_ufcs,
            } => self.check_call(&loc, callee, args, *rewritten_ufcs, expected),
            ast::ExprKind::DotOp {
                base,
                field,
                optional,
            } => self.check_dot_op(&loc, base, field, *optional),
            ast::ExprKind::Subscript { base, index } => {
                let base = self.check_expr(base, None)?;
                let elem = self.types.array_element(base.ty).ok_or_else(|| {
                    ErrorMessage::new(
                        loc.clone(),
                        format!("cannot index '{}'", self.types.display(base.ty)),
                    )
                })?;
                let index = self.check_expr(index, Some(self.types.int()))?;
                let index = self.convert_expr(index, self.types.int())?;
                Ok(cst::Expr {
                    ty: elem,
                    loc,
                    kind: cst::ExprKind::Subscript {
                        base: Box::new(base),
                        index: Box::new(index),
                    },
                })
            }
            ast::ExprKind::Unary { op, operand } => {
                let operand = self.check_expr(operand, expected)?;
                let ty = match op {
                    ast::UnaryOp::Negate => {
                        if ![self.types.int(), self.types.float(), self.types.length()]
                            .contains(&operand.ty)
                        {
                            return Err(ErrorMessage::new(
                                loc.clone(),
                                format!("cannot negate '{}'", self.types.display(operand.ty)),
                            ));
                        }
                        operand.ty
                    }
                    ast::UnaryOp::Not => {
                        if operand.ty != self.types.bool_() {
                            return Err(ErrorMessage::new(
                                loc.clone(),
                                "'not' needs a boolean operand",
                            ));
                        }
                        operand.ty
                    }
                };
                Ok(cst::Expr {
                    ty,
                    loc,
                    kind: cst::ExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                })
            }
            ast::ExprKind::Binary { op, lhs, rhs } => self.check_binary(&loc, *op, lhs, rhs),
            ast::ExprKind::Logical { op, lhs, rhs } => {
                let lhs = self.check_condition(lhs)?;
                let rhs = self.check_condition(rhs)?;
                Ok(cst::Expr {
                    ty: self.types.bool_(),
                    loc,
                    kind: cst::ExprKind::Logical {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                })
            }
            ast::ExprKind::Comparison { first, rest } => {
                let first = self.check_expr(first, None)?;
                let mut prev_ty = first.ty;
                let mut checked = Vec::with_capacity(rest.len());
                for (op, operand) in rest {
                    let operand = self.check_expr(operand, Some(prev_ty))?;
                    let comparable = overload::conversion_cost(&self.types, operand.ty, prev_ty)
                        .or_else(|| {
                            overload::conversion_cost(&self.types, prev_ty, operand.ty)
                        })
                        .is_some();
                    if !comparable {
                        return Err(ErrorMessage::new(
                            operand.loc.clone(),
                            format!(
                                "cannot compare '{}' with '{}'",
                                self.types.display(prev_ty),
                                self.types.display(operand.ty)
                            ),
                        ));
                    }
                    prev_ty = operand.ty;
                    checked.push((*op, operand));
                }
                Ok(cst::Expr {
                    ty: self.types.bool_(),
                    loc,
                    kind: cst::ExprKind::Comparison {
                        first: Box::new(first),
                        rest: checked,
                    },
                })
            }
            ast::ExprKind::NullCoalesce { lhs, rhs } => {
                let lhs = self.check_expr(lhs, None)?;
                let elem = self.types.optional_element(lhs.ty).ok_or_else(|| {
                    ErrorMessage::new(
                        lhs.loc.clone(),
                        "'??' requires an optional on the left",
                    )
                })?;
                let rhs = self.check_expr(rhs, Some(elem))?;
                let rhs = self.convert_expr(rhs, elem)?;
                Ok(cst::Expr {
                    ty: elem,
                    loc,
                    kind: cst::ExprKind::NullCoalesce {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                })
            }
            ast::ExprKind::OptionalCheck(inner) => {
                let inner = self.check_expr(inner, None)?;
                if self.types.optional_element(inner.ty).is_none() {
                    return Err(ErrorMessage::new(
                        loc.clone(),
                        "'?' requires an optional value",
                    ));
                }
                Ok(cst::Expr {
                    ty: self.types.bool_(),
                    loc,
                    kind: cst::ExprKind::OptionalCheck(Box::new(inner)),
                })
            }
            ast::ExprKind::ForceUnwrap(inner) => {
                let inner = self.check_expr(inner, None)?;
                let elem = self.types.optional_element(inner.ty).ok_or_else(|| {
                    ErrorMessage::new(loc.clone(), "'!' requires an optional value")
                })?;
                Ok(cst::Expr {
                    ty: elem,
                    loc,
                    kind: cst::ExprKind::ForceUnwrap(Box::new(inner)),
                })
            }
            ast::ExprKind::Deref(inner) => {
                let inner = self.check_expr(inner, None)?;
                let elem = self.types.pointer_element(inner.ty).ok_or_else(|| {
                    ErrorMessage::new(
                        loc.clone(),
                        format!("cannot dereference '{}'", self.types.display(inner.ty)),
                    )
                })?;
                Ok(cst::Expr {
                    ty: elem,
                    loc,
                    kind: cst::ExprKind::Deref(Box::new(inner)),
                })
            }
            ast::ExprKind::AddressOf { operand, mutable } => {
                let operand = self.check_expr(operand, None)?;
                if !is_lvalue(&operand) {
                    return Err(ErrorMessage::new(
                        loc.clone(),
                        "cannot take the address of a temporary",
                    ));
                }
                let ty = self.types.pointer(operand.ty, *mutable);
                Ok(cst::Expr {
                    ty,
                    loc,
                    kind: cst::ExprKind::AddressOf {
                        operand: Box::new(operand),
                        mutable: *mutable,
                    },
                })
            }
            ast::ExprKind::Move(inner) => {
                let inner = self.check_expr(inner, None)?;
                if !is_lvalue(&inner) {
                    return Err(ErrorMessage::new(
                        loc.clone(),
                        "only lvalues can be moved from",
                    ));
                }
                Ok(cst::Expr {
                    ty: inner.ty,
                    loc,
                    kind: cst::ExprKind::Move(Box::new(inner)),
                })
            }
            ast::ExprKind::ArraySpread(inner) => {
                let inner = self.check_expr(inner, None)?;
                if self.types.array_element(inner.ty).is_none() {
                    return Err(ErrorMessage::new(
                        loc.clone(),
                        "'...' requires an array value",
                    ));
                }
                // Passes through; the call arrangement consumes the flag.
                Ok(inner)
            }
            ast::ExprKind::Assign { op, target, value } => {
                let target = self.check_expr(target, None)?;
                if !is_lvalue(&target) {
                    return Err(ErrorMessage::new(
                        loc.clone(),
                        "left side of assignment is not assignable",
                    ));
                }
                self.check_mutable_root(&target)?;

                let value = match op {
                    Some(binary) => {
                        let rhs = self.check_expr(value, Some(target.ty))?;
                        let combined = self.combine_binary(&loc, *binary, target.clone(), rhs)?;
                        self.convert_expr(combined, target.ty)?
                    }
                    None => {
                        let rhs = self.check_expr(value, Some(target.ty))?;
                        self.convert_expr(rhs, target.ty)?
                    }
                };

                Ok(cst::Expr {
                    ty: self.types.void(),
                    loc,
                    kind: cst::ExprKind::Assign {
                        op: *op,
                        target: Box::new(target),
                        value: Box::new(value),
                    },
                })
            }
            ast::ExprKind::Cast { operand, target } => self.check_cast(&loc, operand, target, expected),
            ast::ExprKind::TypeExpr(ty) => {
                let id = self.resolve_type(ty, &loc)?;
                Ok(cst::Expr {
                    ty: self.types.any(),
                    loc,
                    kind: cst::ExprKind::TypeValue(id),
                })
            }
            ast::ExprKind::TreeInline(children) => {
                let children = self.check_inline_pieces(children)?;
                Ok(cst::Expr {
                    ty: self.types.tree_inline_obj(),
                    loc,
                    kind: cst::ExprKind::TreeInline(children),
                })
            }
            ast::ExprKind::TreeBlock { kind, children } => {
                let children = self.check_inline_pieces(children)?;
                Ok(cst::Expr {
                    ty: self.types.tree_block_obj(),
                    loc,
                    kind: cst::ExprKind::TreeBlock {
                        kind: *kind,
                        children,
                    },
                })
            }
            ast::ExprKind::ScriptBlock { phase, body } => {
                self.push_anonymous_scope();
                let block = self.check_block(body);
                self.pop_scope();
                Ok(cst::Expr {
                    ty: self.types.void(),
                    loc,
                    kind: cst::ExprKind::ScriptBlock {
                        phase: *phase,
                        body: block?,
                    },
                })
            }
        }
    }

    fn check_inline_pieces(
        &mut self,
        children: &[ast::InlineObjectNode],
    ) -> Result<Vec<cst::InlinePiece>> {
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            match child {
                ast::InlineObjectNode::Text(text) => {
                    out.push(cst::InlinePiece::Text(text.clone()));
                }
                ast::InlineObjectNode::Script { body, .. } => {
                    let inline = self.types.tree_inline_obj();
                    let checked = self.check_expr(body, Some(inline))?;
                    out.push(cst::InlinePiece::Script(Box::new(checked)));
                }
            }
        }
        Ok(out)
    }

    fn check_ident(&mut self, loc: &Location, id: &QualifiedId) -> Result<cst::Expr> {
        let decls = self.forest.lookup(self.scope(), id);
        if decls.is_empty() {
            return Err(ErrorMessage::new(
                loc.clone(),
                format!("undeclared identifier '{}'", id),
            ));
        }

        // A unique variable reference, or a function reference.
        let vars: Vec<DeclId> = decls
            .iter()
            .copied()
            .filter(|&d| matches!(self.declaration(d).kind, DeclKind::Var { .. }))
            .collect();
        if let [var] = vars.as_slice() {
            return Ok(cst::Expr {
                ty: self.declaration(*var).ty,
                loc: loc.clone(),
                kind: cst::ExprKind::VarRef(*var),
            });
        }

        let funcs: Vec<DeclId> = decls
            .iter()
            .copied()
            .filter(|&d| self.declaration(d).is_function())
            .collect();
        match funcs.as_slice() {
            [func] => Ok(cst::Expr {
                ty: self.declaration(*func).ty,
                loc: loc.clone(),
                kind: cst::ExprKind::FuncRef(*func),
            }),
            [] => Err(ErrorMessage::new(
                loc.clone(),
                format!("'{}' cannot be used as a value", id),
            )),
            _ => Err(ErrorMessage::new(
                loc.clone(),
                format!("reference to '{}' is ambiguous", id),
            )),
        }
    }

    // `.name` resolves, in priority order: a field of `self`, an
    // enumerator of the expected enum, a case of the expected union.
    fn check_context_ident(
        &mut self,
        loc: &Location,
        name: &str,
        expected: Option<TypeId>,
    ) -> Result<cst::Expr> {
        let field_hit = self.self_context.last().and_then(|&(decl, struct_ty)| {
            let fields = self.types.struct_fields(struct_ty)?;
            let index = fields.iter().position(|(n, _)| n == name)?;
            Some((decl, struct_ty, index, fields[index].1))
        });

        let bare_expected = expected.map(|ty| match self.types.kind(ty) {
            TypeKind::Optional { elem } => *elem,
            _ => ty,
        });

        if let Some((decl, _struct_ty, index, field_ty)) = field_hit {
            // A same-named enumerator in the expected enum would also
            // match; that is a diagnosable ambiguity, not a silent pick.
            if let Some(ty) = bare_expected {
                if let Some(enumerators) = self.enumerators_of(ty) {
                    if enumerators.iter().any(|(n, _)| n == name) {
                        return Err(ErrorMessage::new(
                            loc.clone(),
                            format!(
                                "'.{}' is both a field of 'self' and an enumerator of '{}'",
                                name,
                                self.types.display(ty)
                            ),
                        ));
                    }
                }
            }

            let self_ty = self.declaration(decl).ty;
            let base = cst::Expr {
                ty: self_ty,
                loc: loc.clone(),
                kind: cst::ExprKind::VarRef(decl),
            };
            let derefed = cst::Expr {
                ty: self.types.pointer_element(self_ty).unwrap_or(self_ty),
                loc: loc.clone(),
                kind: cst::ExprKind::Deref(Box::new(base)),
            };
            return Ok(cst::Expr {
                ty: field_ty,
                loc: loc.clone(),
                kind: cst::ExprKind::Field {
                    base: Box::new(derefed),
                    index,
                    through_optional: false,
                },
            });
        }

        let Some(ty) = bare_expected else {
            return Err(ErrorMessage::new(
                loc.clone(),
                format!("cannot resolve '.{}' without a contextual type", name),
            ));
        };

        if let Some(enumerators) = self.enumerators_of(ty) {
            if let Some(index) = enumerators.iter().position(|(n, _)| n == name) {
                let result = cst::Expr {
                    ty,
                    loc: loc.clone(),
                    kind: cst::ExprKind::EnumeratorLit(index),
                };
                return match expected {
                    Some(outer) if outer != ty => self.convert_expr(result, outer),
                    _ => Ok(result),
                };
            }
            return Err(ErrorMessage::new(
                loc.clone(),
                format!(
                    "'{}' has no enumerator named '{}'",
                    self.types.display(ty),
                    name
                ),
            ));
        }

        if self.types.union_cases(ty).is_some() {
            let result = self.check_union_literal(loc, ty, name, &[])?;
            return match expected {
                Some(outer) if outer != ty => self.convert_expr(result, outer),
                _ => Ok(result),
            };
        }

        Err(ErrorMessage::new(
            loc.clone(),
            format!("cannot resolve '.{}' in this context", name),
        ))
    }

    fn enumerators_of(&self, ty: TypeId) -> Option<&[(String, Value)]> {
        if !matches!(self.types.kind(ty), TypeKind::Enum { .. }) {
            return None;
        }
        self.decls.iter().find_map(|d| match &d.kind {
            DeclKind::Enum {
                ty: enum_ty,
                enumerators,
            } if *enum_ty == ty => Some(enumerators.as_slice()),
            _ => None,
        })
    }

    fn check_dot_op(
        &mut self,
        loc: &Location,
        base: &ast::Expr,
        field: &str,
        optional: bool,
    ) -> Result<cst::Expr> {
        let mut base = self.check_expr(base, None)?;

        // One level of pointer auto-deref.
        if let Some(elem) = self.types.pointer_element(base.ty) {
            base = cst::Expr {
                ty: elem,
                loc: base.loc.clone(),
                kind: cst::ExprKind::Deref(Box::new(base)),
            };
        }

        let (struct_ty, through_optional) = if optional {
            let elem = self.types.optional_element(base.ty).ok_or_else(|| {
                ErrorMessage::new(loc.clone(), "'?.' requires an optional value")
            })?;
            (elem, true)
        } else {
            (base.ty, false)
        };

        let fields = self.types.struct_fields(struct_ty).ok_or_else(|| {
            ErrorMessage::new(
                loc.clone(),
                format!("'{}' has no fields", self.types.display(struct_ty)),
            )
        })?;
        let index = fields.iter().position(|(n, _)| n == field).ok_or_else(|| {
            ErrorMessage::new(
                loc.clone(),
                format!(
                    "'{}' has no field named '{}'",
                    self.types.display(struct_ty),
                    field
                ),
            )
        })?;

        let field_ty = fields[index].1;
        let ty = if through_optional {
            self.types.optional(field_ty)
        } else {
            field_ty
        };

        Ok(cst::Expr {
            ty,
            loc: loc.clone(),
            kind: cst::ExprKind::Field {
                base: Box::new(base),
                index,
                through_optional,
            },
        })
    }

    fn check_binary(
        &mut self,
        loc: &Location,
        op: ast::BinaryOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
    ) -> Result<cst::Expr> {
        let lhs = self.check_expr(lhs, None)?;
        let rhs = self.check_expr(rhs, Some(lhs.ty))?;
        self.combine_binary(loc, op, lhs, rhs)
    }

    fn combine_binary(
        &mut self,
        loc: &Location,
        op: ast::BinaryOp,
        lhs: cst::Expr,
        rhs: cst::Expr,
    ) -> Result<cst::Expr> {
        use ast::BinaryOp::*;

        let int = self.types.int();
        let float = self.types.float();
        let length = self.types.length();

        let (lhs, rhs, ty) = if lhs.ty == int && rhs.ty == int {
            (lhs, rhs, int)
        } else if (lhs.ty == float || rhs.ty == float)
            && [int, float].contains(&lhs.ty)
            && [int, float].contains(&rhs.ty)
        {
            let lhs = self.convert_expr(lhs, float)?;
            let rhs = self.convert_expr(rhs, float)?;
            (lhs, rhs, float)
        } else if lhs.ty == length && rhs.ty == length && matches!(op, Add | Subtract) {
            (lhs, rhs, length)
        } else if lhs.ty == length
            && [int, float].contains(&rhs.ty)
            && matches!(op, Multiply | Divide)
        {
            let rhs = self.convert_expr(rhs, float)?;
            (lhs, rhs, length)
        } else if rhs.ty == length && [int, float].contains(&lhs.ty) && op == Multiply {
            let lhs = self.convert_expr(lhs, float)?;
            (lhs, rhs, length)
        } else if op == Add
            && self.types.array_element(lhs.ty).is_some()
            && rhs.ty == lhs.ty
        {
            // Array (and string) concatenation.
            let ty = lhs.ty;
            (lhs, rhs, ty)
        } else {
            return Err(ErrorMessage::new(
                loc.clone(),
                format!(
                    "invalid operands '{}' and '{}'",
                    self.types.display(lhs.ty),
                    self.types.display(rhs.ty)
                ),
            ));
        };

        Ok(cst::Expr {
            ty,
            loc: loc.clone(),
            kind: cst::ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        })
    }

    fn check_mutable_root(&self, expr: &cst::Expr) -> Result<()> {
        match &expr.kind {
            cst::ExprKind::VarRef(decl) => match &self.declaration(*decl).kind {
                DeclKind::Var { mutable: true, .. } => Ok(()),
                _ => Err(ErrorMessage::new(
                    expr.loc.clone(),
                    format!("'{}' is not mutable", self.declaration(*decl).name),
                )
                .with_info(
                    self.declaration(*decl).loc.clone(),
                    "declared immutable here",
                )),
            },
            cst::ExprKind::Field { base, .. } | cst::ExprKind::Subscript { base, .. } => {
                self.check_mutable_root(base)
            }
            cst::ExprKind::Deref(inner) => {
                match self.types.kind(inner.ty) {
                    TypeKind::Pointer { mutable: true, .. } => Ok(()),
                    _ => Err(ErrorMessage::new(
                        expr.loc.clone(),
                        "cannot assign through an immutable pointer",
                    )),
                }
            }
            _ => Ok(()),
        }
    }

    fn check_cast(
        &mut self,
        loc: &Location,
        operand: &ast::Expr,
        target: &CastTarget,
        expected: Option<TypeId>,
    ) -> Result<cst::Expr> {
        match target {
            CastTarget::Type(ty) => {
                let to = self.resolve_type(ty, loc)?;
                let operand = self.check_expr(operand, Some(to))?;

                let implicit = overload::conversion_cost(&self.types, operand.ty, to).is_some();
                let explicit = {
                    let from_kind = self.types.kind(operand.ty).clone();
                    let to_kind = self.types.kind(to).clone();
                    matches!(
                        (&from_kind, &to_kind),
                        (TypeKind::Float, TypeKind::Int)
                            | (TypeKind::Int, TypeKind::Float)
                            | (TypeKind::Enum { .. }, TypeKind::Int)
                            | (TypeKind::Int, TypeKind::Enum { .. })
                    ) || matches!(
                        (&from_kind, &to_kind),
                        (
                            TypeKind::Pointer { elem: a, mutable: true },
                            TypeKind::Pointer { elem: b, mutable: false },
                        ) if a == b
                    )
                };

                if !implicit && !explicit {
                    return Err(ErrorMessage::new(
                        loc.clone(),
                        format!(
                            "cannot cast '{}' to '{}'",
                            self.types.display(operand.ty),
                            self.types.display(to)
                        ),
                    ));
                }

                Ok(cst::Expr {
                    ty: to,
                    loc: loc.clone(),
                    kind: cst::ExprKind::Cast {
                        operand: Box::new(operand),
                        to,
                    },
                })
            }
            CastTarget::Variant(case) => {
                let union_ty = expected
                    .map(|ty| match self.types.kind(ty) {
                        TypeKind::Optional { elem } => *elem,
                        _ => ty,
                    })
                    .filter(|&ty| self.types.union_cases(ty).is_some())
                    .ok_or_else(|| {
                        ErrorMessage::new(
                            loc.clone(),
                            "cannot infer the union type for this variant cast",
                        )
                    })?;

                let args = [ast::CallArg {
                    name: None,
                    value: operand.clone(),
                }];
                self.check_union_literal(loc, union_ty, case, &args)
            }
        }
    }

    fn check_union_literal(
        &mut self,
        loc: &Location,
        union_ty: TypeId,
        case: &str,
        args: &[ast::CallArg],
    ) -> Result<cst::Expr> {
        let cases = self.types.union_cases(union_ty).unwrap().to_vec();
        let case_index = cases.iter().position(|(n, _)| n == case).ok_or_else(|| {
            ErrorMessage::new(
                loc.clone(),
                format!(
                    "'{}' has no case named '{}'",
                    self.types.display(union_ty),
                    case
                ),
            )
        })?;

        // Find the case's parameter list on the union declaration.
        let params = self
            .decls
            .iter()
            .find_map(|d| match &d.kind {
                DeclKind::Union { ty, cases } if *ty == union_ty => {
                    cases.iter().find(|(n, _)| n == case).map(|(_, p)| p.clone())
                }
                _ => None,
            })
            .unwrap_or_default();

        let arranged = self.arrange_call_args(loc, &params, false, args, false)?;
        Ok(cst::Expr {
            ty: union_ty,
            loc: loc.clone(),
            kind: cst::ExprKind::UnionLit {
                case: case_index,
                args: arranged,
            },
        })
    }

    fn check_struct_literal(
        &mut self,
        loc: &Location,
        ty: TypeId,
        fields: &[ast::StructLitField],
    ) -> Result<cst::Expr> {
        if self.types.struct_fields(ty).is_none() {
            return Err(ErrorMessage::new(
                loc.clone(),
                format!("'{}' is not a struct type", self.types.display(ty)),
            ));
        }

        let params = self
            .decls
            .iter()
            .find_map(|d| match &d.kind {
                DeclKind::Struct { ty: struct_ty, fields } if *struct_ty == ty => {
                    Some(fields.clone())
                }
                _ => None,
            })
            .unwrap_or_default();

        let args: Vec<ast::CallArg> = fields
            .iter()
            .map(|f| ast::CallArg {
                name: f.name.clone(),
                value: f.value.clone(),
            })
            .collect();

        let arranged = self.arrange_call_args(loc, &params, false, &args, false)?;
        Ok(cst::Expr {
            ty,
            loc: loc.clone(),
            kind: cst::ExprKind::StructLit(arranged),
        })
    }

    // Checks arguments, arranges them against `params` and returns the
    // converted per-parameter expressions (defaults filled in).
    fn arrange_call_args(
        &mut self,
        loc: &Location,
        params: &[cst::Param],
        variadic_last: bool,
        args: &[ast::CallArg],
        ufcs: bool,
    ) -> Result<Vec<cst::Expr>> {
        let mut checked_args = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let hint = params.get(i).map(|p| p.ty);
            let mut checked = self.check_expr(&arg.value, hint)?;
            if ufcs && i == 0 {
                checked = self.ufcs_receiver(checked, params.first())?;
            }
            let spread = matches!(arg.value.kind, ast::ExprKind::ArraySpread(_));
            checked_args.push((arg.name.clone(), checked, spread));
        }

        let expected: Vec<ExpectedParam> = params
            .iter()
            .map(|p| ExpectedParam {
                name: p.name.clone(),
                ty: p.ty,
                has_default: p.default.is_some(),
            })
            .collect();
        let supplied: Vec<SuppliedArg> = checked_args
            .iter()
            .map(|(name, expr, spread)| SuppliedArg {
                name: name.clone(),
                ty: expr.ty,
                spread: *spread,
            })
            .collect();

        let arrangement =
            overload::arrange_and_cost(&self.types, &expected, variadic_last, &supplied)
                .map_err(|reason| ErrorMessage::new(loc.clone(), reason))?;

        let mut exprs: Vec<Option<cst::Expr>> = checked_args
            .into_iter()
            .map(|(_, e, _)| Some(e))
            .collect();

        let mut out = Vec::with_capacity(params.len());
        for (param, binding) in params.iter().zip(arrangement.bindings) {
            match binding {
                Binding::Argument(index) => {
                    let expr = exprs[index].take().unwrap();
                    out.push(self.convert_expr(expr, param.ty)?);
                }
                Binding::Default => {
                    out.push(param.default.clone().unwrap());
                }
                Binding::Variadic(indices) => {
                    let elem = self.types.array_element(param.ty).unwrap_or(param.ty);
                    let mut items = Vec::with_capacity(indices.len());
                    let mut passthrough = None;
                    for index in indices {
                        let expr = exprs[index].take().unwrap();
                        if self.types.array_element(expr.ty).is_some()
                            && matches!(expr.kind, cst::ExprKind::ArrayLit(_))
                        {
                            items.push(self.convert_expr(expr, elem)?);
                        } else if expr.ty == param.ty {
                            passthrough = Some(expr);
                        } else {
                            items.push(self.convert_expr(expr, elem)?);
                        }
                    }

                    match passthrough {
                        Some(expr) if items.is_empty() => out.push(expr),
                        _ => out.push(cst::Expr {
                            ty: param.ty,
                            loc: loc.clone(),
                            kind: cst::ExprKind::ArrayLit(items),
                        }),
                    }
                }
            }
        }

        Ok(out)
    }

    // The UFCS receiver becomes an implicit pointer when the first
    // parameter wants one.
    fn ufcs_receiver(
        &mut self,
        receiver: cst::Expr,
        first_param: Option<&cst::Param>,
    ) -> Result<cst::Expr> {
        let Some(param) = first_param else {
            return Ok(receiver);
        };
        let Some(elem) = self.types.pointer_element(param.ty) else {
            return Ok(receiver);
        };
        if receiver.ty != elem || !is_lvalue(&receiver) {
            return Ok(receiver);
        }

        let mutable = matches!(
            self.types.kind(param.ty),
            TypeKind::Pointer { mutable: true, .. }
        );
        Ok(cst::Expr {
            ty: self.types.pointer(receiver.ty, mutable),
            loc: receiver.loc.clone(),
            kind: cst::ExprKind::AddressOf {
                operand: Box::new(receiver),
                mutable,
            },
        })
    }

    fn check_call(
        &mut self,
        loc: &Location,
        callee: &ast::Expr,
        args: &[ast::CallArg],
        ufcs: bool,
        _expected: Option<TypeId>,
    ) -> Result<cst::Expr> {
        // Direct calls by name resolve through overloads; anything else
        // is an indirect call through a function value.
        let ast::ExprKind::Ident(id) = &callee.kind else {
            return self.check_indirect_call(loc, callee, args);
        };

        let candidates: Vec<DeclId> = self
            .forest
            .lookup(self.scope(), id)
            .into_iter()
            .filter(|&d| self.declaration(d).is_function())
            .collect();
        if candidates.is_empty() {
            // A variable holding a function is still callable.
            return self.check_indirect_call(loc, callee, args);
        }

        // Check the arguments once, with the first candidate's params as
        // hints.
        let hint_params: Vec<cst::Param> = match &self.declaration(candidates[0]).kind {
            DeclKind::Func { params, .. } => params.clone(),
            _ => Vec::new(),
        };
        let mut checked_args = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let hint = hint_params.get(i).map(|p| p.ty);
            let mut checked = self.check_expr(&arg.value, hint)?;
            if ufcs && i == 0 {
                checked = self.ufcs_receiver(checked, hint_params.first())?;
            }
            let spread = matches!(arg.value.kind, ast::ExprKind::ArraySpread(_));
            checked_args.push((arg.name.clone(), checked, spread));
        }

        let supplied: Vec<SuppliedArg> = checked_args
            .iter()
            .map(|(name, expr, spread)| SuppliedArg {
                name: name.clone(),
                ty: expr.ty,
                spread: *spread,
            })
            .collect();

        let candidate_params: Vec<(Vec<ExpectedParam>, bool)> = candidates
            .iter()
            .map(|&d| match &self.declaration(d).kind {
                DeclKind::Func { params, .. } => {
                    let variadic = params
                        .last()
                        .is_some_and(|p| matches!(
                            self.types.kind(p.ty),
                            TypeKind::Array { variadic: true, .. }
                        ));
                    let expected = params
                        .iter()
                        .map(|p| ExpectedParam {
                            name: p.name.clone(),
                            ty: p.ty,
                            has_default: p.default.is_some(),
                        })
                        .collect();
                    (expected, variadic)
                }
                _ => (Vec::new(), false),
            })
            .collect();

        let chosen = match overload::pick_candidate(&self.types, &candidate_params, &supplied) {
            ResolvedOverload::Unique(index, _) => candidates[index],
            ResolvedOverload::Ambiguous(winners) => {
                let mut error = ErrorMessage::new(
                    loc.clone(),
                    format!("ambiguous call to '{}'", id),
                );
                for index in winners {
                    error = error.with_info(
                        self.declaration(candidates[index]).loc.clone(),
                        "candidate matches with equal cost",
                    );
                }
                return Err(error);
            }
            ResolvedOverload::NoMatch(reasons) => {
                let mut error = ErrorMessage::new(
                    loc.clone(),
                    format!("no matching overload for call to '{}'", id),
                );
                for (index, reason) in reasons.iter().enumerate() {
                    error = error.with_info(
                        self.declaration(candidates[index]).loc.clone(),
                        format!("candidate rejected: {}", reason),
                    );
                }
                return Err(error);
            }
        };

        // Re-arrange against the winner to produce converted expressions.
        let (params, variadic, ret) = match &self.declaration(chosen).kind {
            DeclKind::Func { params, ret, .. } => {
                let variadic = params
                    .last()
                    .is_some_and(|p| matches!(
                        self.types.kind(p.ty),
                        TypeKind::Array { variadic: true, .. }
                    ));
                (params.clone(), variadic, *ret)
            }
            _ => unreachable!(),
        };

        // Recheck the receiver against the winning signature.
        let mut final_args = Vec::with_capacity(args.len());
        for (i, (name, checked, spread)) in checked_args.into_iter().enumerate() {
            let mut expr = checked;
            if ufcs && i == 0 {
                // Undo and redo against the chosen overload when the hint
                // candidate differed.
                if let cst::ExprKind::AddressOf { operand, .. } = expr.kind.clone() {
                    if self
                        .types
                        .pointer_element(params.first().map(|p| p.ty).unwrap_or(expr.ty))
                        != Some(operand.ty)
                    {
                        expr = *operand;
                    }
                }
                expr = self.ufcs_receiver(expr, params.first())?;
            }
            final_args.push((name, expr, spread));
        }

        let supplied: Vec<SuppliedArg> = final_args
            .iter()
            .map(|(name, expr, spread)| SuppliedArg {
                name: name.clone(),
                ty: expr.ty,
                spread: *spread,
            })
            .collect();
        let expected: Vec<ExpectedParam> = params
            .iter()
            .map(|p| ExpectedParam {
                name: p.name.clone(),
                ty: p.ty,
                has_default: p.default.is_some(),
            })
            .collect();
        let arrangement =
            overload::arrange_and_cost(&self.types, &expected, variadic, &supplied)
                .map_err(|reason| ErrorMessage::new(loc.clone(), reason))?;

        let mut exprs: Vec<Option<cst::Expr>> =
            final_args.into_iter().map(|(_, e, _)| Some(e)).collect();
        let mut converted = Vec::with_capacity(params.len());
        for (param, binding) in params.iter().zip(arrangement.bindings) {
            match binding {
                Binding::Argument(index) => {
                    let expr = exprs[index].take().unwrap();
                    converted.push(self.convert_expr(expr, param.ty)?);
                }
                Binding::Default => converted.push(param.default.clone().unwrap()),
                Binding::Variadic(indices) => {
                    let elem = self.types.array_element(param.ty).unwrap_or(param.ty);
                    let mut items = Vec::with_capacity(indices.len());
                    let mut passthrough = None;
                    for index in indices {
                        let expr = exprs[index].take().unwrap();
                        if expr.ty == param.ty {
                            passthrough = Some(expr);
                        } else {
                            items.push(self.convert_expr(expr, elem)?);
                        }
                    }
                    match passthrough {
                        Some(expr) if items.is_empty() => converted.push(expr),
                        _ => converted.push(cst::Expr {
                            ty: param.ty,
                            loc: loc.clone(),
                            kind: cst::ExprKind::ArrayLit(items),
                        }),
                    }
                }
            }
        }

        Ok(cst::Expr {
            ty: ret,
            loc: loc.clone(),
            kind: cst::ExprKind::Call {
                callee: chosen,
                args: converted,
            },
        })
    }

    fn check_indirect_call(
        &mut self,
        loc: &Location,
        callee: &ast::Expr,
        args: &[ast::CallArg],
    ) -> Result<cst::Expr> {
        let callee = self.check_expr(callee, None)?;
        let (params, ret) = match self.types.kind(callee.ty) {
            TypeKind::Function { params, ret } => (params.clone(), *ret),
            _ => {
                return Err(ErrorMessage::new(
                    loc.clone(),
                    format!("'{}' is not callable", self.types.display(callee.ty)),
                ))
            }
        };

        if args.len() != params.len() {
            return Err(ErrorMessage::new(
                loc.clone(),
                format!("expected {} arguments, found {}", params.len(), args.len()),
            ));
        }

        let mut converted = Vec::with_capacity(args.len());
        for (arg, &param_ty) in args.iter().zip(&params) {
            if arg.name.is_some() {
                return Err(ErrorMessage::new(
                    arg.value.loc.clone(),
                    "indirect calls take positional arguments only",
                ));
            }
            let checked = self.check_expr(&arg.value, Some(param_ty))?;
            converted.push(self.convert_expr(checked, param_ty)?);
        }

        Ok(cst::Expr {
            ty: ret,
            loc: loc.clone(),
            kind: cst::ExprKind::CallIndirect {
                callee: Box::new(callee),
                args: converted,
            },
        })
    }

    /// Applies an implicit conversion, inserting the node that performs
    /// it. Fails when the conversion table has no entry.
    pub fn convert_expr(&mut self, expr: cst::Expr, to: TypeId) -> Result<cst::Expr> {
        if expr.ty == to {
            return Ok(expr);
        }

        if overload::conversion_cost(&self.types, expr.ty, to).is_none() {
            return Err(ErrorMessage::new(
                expr.loc.clone(),
                format!(
                    "cannot convert '{}' to '{}'",
                    self.types.display(expr.ty),
                    self.types.display(to)
                ),
            ));
        }

        let loc = expr.loc.clone();
        let kind_of_to = self.types.kind(to).clone();
        let converted = match kind_of_to {
            TypeKind::Optional { elem } => {
                if matches!(self.types.kind(expr.ty), TypeKind::NullPtr) {
                    cst::Expr {
                        ty: to,
                        loc,
                        kind: cst::ExprKind::NullLit,
                    }
                } else {
                    let inner = self.convert_expr(expr, elem)?;
                    cst::Expr {
                        ty: to,
                        loc,
                        kind: cst::ExprKind::MakeOptional(Box::new(inner)),
                    }
                }
            }
            _ => cst::Expr {
                ty: to,
                loc,
                kind: cst::ExprKind::Cast {
                    operand: Box::new(expr),
                    to,
                },
            },
        };

        Ok(converted)
    }
}

impl Default for Typechecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an expression names addressable storage.
pub fn is_lvalue(expr: &cst::Expr) -> bool {
    match &expr.kind {
        cst::ExprKind::VarRef(_) | cst::ExprKind::Deref(_) => true,
        cst::ExprKind::Field { base, .. } | cst::ExprKind::Subscript { base, .. } => {
            is_lvalue(base)
        }
        _ => false,
    }
}

fn const_eval_int(expr: &cst::Expr) -> Option<i64> {
    match &expr.kind {
        cst::ExprKind::IntLit(n) => Some(*n),
        cst::ExprKind::Cast { operand, .. } => const_eval_int(operand),
        cst::ExprKind::Unary {
            op: ast::UnaryOp::Negate,
            operand,
        } => const_eval_int(operand).map(|n| -n),
        _ => None,
    }
}
