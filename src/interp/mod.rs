//! The interpreter: frontend, type resolution and evaluation.
//!
//! Pipeline: source → [`lexer`] → [`parser`] (AST) → [`typecheck`] (typed
//! CST) → [`eval`] (values). The `Interpreter` owns the declaration
//! arena, the import set and the builtin registrations.

pub mod ast;
pub mod cst;
pub mod eval;
pub mod lexer;
pub mod overload;
pub mod parser;
pub mod tree;
pub mod ty;
pub mod typecheck;
pub mod value;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{ErrorMessage, Location};
use eval::Evaluator;
use typecheck::Typechecker;
use value::{InlineObject, Value};

/// A flattened piece of document content, ready for shaping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentPiece {
    Word(String),
    ParagraphBreak,
}

/// The result of one interpreter run.
#[derive(Debug, Default)]
pub struct RunOutput {
    pub content: Vec<ContentPiece>,
}

pub struct Interpreter {
    pub tc: Typechecker,
    search_paths: Vec<PathBuf>,
    imported: HashSet<PathBuf>,
}

impl Interpreter {
    pub fn new() -> Self {
        let mut tc = Typechecker::new();
        register_builtins(&mut tc);
        Interpreter {
            tc,
            search_paths: Vec::new(),
            imported: HashSet::new(),
        }
    }

    /// Adds a directory to the import search list (the driver adds the
    /// standard library path here).
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    /// Runs a whole source document and flattens its content.
    pub fn run_document(&mut self, filename: &str, source: &str) -> Result<RunOutput, ErrorMessage> {
        let document = parser::Parser::new(filename, source).parse_document()?;

        let base_dir = Path::new(filename)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let preamble = self.expand_imports(document.preamble, &base_dir)?;

        let block = self.tc.check_block(&preamble)?;

        let mut content = Vec::new();
        let mut checked_body = Vec::new();
        for piece in &document.body {
            match piece {
                ast::DocumentPiece::Text(_)
                | ast::DocumentPiece::ParagraphBreak
                | ast::DocumentPiece::Raw(_) => checked_body.push(None),
                ast::DocumentPiece::Script(expr) => {
                    checked_body.push(Some(self.tc.check_expr(expr, None)?));
                }
            }
        }

        // The evaluator borrows the typechecker, so all checking happens
        // before this second walk.
        let mut evaluator = Evaluator::new(&self.tc);
        evaluator.eval_block(&block)?;
        for (piece, checked) in document.body.iter().zip(checked_body) {
            match (piece, checked) {
                (ast::DocumentPiece::Text(text), _) => {
                    content.push(ContentPiece::Word(text.clone()));
                }
                (ast::DocumentPiece::ParagraphBreak, _) => {
                    content.push(ContentPiece::ParagraphBreak);
                }
                (ast::DocumentPiece::Raw(text), _) => {
                    for word in text.split_whitespace() {
                        content.push(ContentPiece::Word(word.to_string()));
                    }
                }
                (ast::DocumentPiece::Script(_), Some(expr)) => {
                    let value = evaluator.eval_to_value(&expr)?;
                    flatten_value(&evaluator, &value, &mut content);
                }
                (ast::DocumentPiece::Script(_), None) => unreachable!(),
            }
        }

        Ok(RunOutput { content })
    }

    /// Typechecks and evaluates bare script statements (used by tests and
    /// by `\script` re-entry).
    pub fn run_script(&mut self, filename: &str, source: &str) -> Result<(), ErrorMessage> {
        let stmts = parser::parse_script(filename, source)?;
        let stmts = self.expand_imports(stmts, Path::new("."))?;
        let block = self.tc.check_block(&stmts)?;
        let mut evaluator = Evaluator::new(&self.tc);
        evaluator.eval_block(&block)?;
        Ok(())
    }

    // Splices imported files in place of their `import` statements.
    // Circularity is broken by the resolved-absolute-path set.
    fn expand_imports(
        &mut self,
        stmts: Vec<ast::Stmt>,
        base_dir: &Path,
    ) -> Result<Vec<ast::Stmt>, ErrorMessage> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            let ast::StmtKind::Import(ref path) = stmt.kind else {
                out.push(stmt);
                continue;
            };

            let resolved = self.resolve_import(path, base_dir).ok_or_else(|| {
                ErrorMessage::new(stmt.loc.clone(), format!("cannot find import '{}'", path))
            })?;

            let canonical = resolved.canonicalize().unwrap_or(resolved.clone());
            if !self.imported.insert(canonical) {
                continue;
            }

            let source = std::fs::read_to_string(&resolved).map_err(|e| {
                ErrorMessage::new(
                    stmt.loc.clone(),
                    format!("cannot read '{}': {}", resolved.display(), e),
                )
            })?;

            let imported = parser::parse_script(&resolved.display().to_string(), &source)?;
            let imported_dir = resolved.parent().map(Path::to_path_buf).unwrap_or_default();
            let mut expanded = self.expand_imports(imported, &imported_dir)?;
            out.append(&mut expanded);
        }
        Ok(out)
    }

    fn resolve_import(&self, path: &str, base_dir: &Path) -> Option<PathBuf> {
        let direct = base_dir.join(path);
        if direct.is_file() {
            return Some(direct);
        }

        self.search_paths
            .iter()
            .map(|dir| dir.join(path))
            .find(|p| p.is_file())
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn flatten_value(evaluator: &Evaluator, value: &Value, out: &mut Vec<ContentPiece>) {
    match value {
        Value::Void => {}
        Value::TreeInline(handle) => flatten_inline(&handle.borrow(), out),
        Value::TreeBlock(handle) => {
            out.push(ContentPiece::ParagraphBreak);
            flatten_block(&handle.borrow(), out);
            out.push(ContentPiece::ParagraphBreak);
        }
        other => {
            for word in evaluator.stringify(other).split_whitespace() {
                out.push(ContentPiece::Word(word.to_string()));
            }
        }
    }
}

fn flatten_inline(object: &InlineObject, out: &mut Vec<ContentPiece>) {
    match object {
        InlineObject::Text(text) => {
            for word in text.split_whitespace() {
                out.push(ContentPiece::Word(word.to_string()));
            }
        }
        InlineObject::Span(children) => {
            for child in children {
                flatten_inline(child, out);
            }
        }
    }
}

fn flatten_block(object: &value::BlockObject, out: &mut Vec<ContentPiece>) {
    match object {
        value::BlockObject::Line(children) | value::BlockObject::Paragraph(children) => {
            for child in children {
                flatten_inline(child, out);
            }
        }
        value::BlockObject::Box { children, .. } => {
            for child in children {
                flatten_block(child, out);
            }
        }
    }
}

// ----- builtins -----

fn register_builtins(tc: &mut Typechecker) {
    let any = tc.types.any();
    let void = tc.types.void();
    let int = tc.types.int();
    let string = tc.types.string();
    let inline = tc.types.tree_inline_obj();
    let variadic_any = tc.types.array(any, true);

    tc.declare_builtin("start_document", Vec::new(), void, builtin_start_document);
    tc.declare_builtin(
        "print",
        vec![cst::Param {
            name: "values".to_string(),
            ty: variadic_any,
            default: None,
        }],
        void,
        builtin_print,
    );
    tc.declare_builtin(
        "to_string",
        vec![cst::Param {
            name: "value".to_string(),
            ty: any,
            default: None,
        }],
        string,
        builtin_to_string,
    );
    tc.declare_builtin(
        "len",
        vec![cst::Param {
            name: "value".to_string(),
            ty: any,
            default: None,
        }],
        int,
        builtin_len,
    );

    for name in ["bold", "italic", "emph"] {
        tc.declare_builtin(
            name,
            vec![cst::Param {
                name: "content".to_string(),
                ty: variadic_any,
                default: None,
            }],
            inline,
            builtin_span,
        );
    }
}

fn builtin_start_document(_: &mut Evaluator, _: Vec<Value>) -> Result<Value, ErrorMessage> {
    Ok(Value::Void)
}

fn builtin_print(evaluator: &mut Evaluator, args: Vec<Value>) -> Result<Value, ErrorMessage> {
    let mut pieces = Vec::new();
    for arg in &args {
        match arg {
            Value::Array { values, .. } if arg.as_string().is_none() => {
                for value in values {
                    pieces.push(evaluator.stringify(value));
                }
            }
            other => pieces.push(evaluator.stringify(other)),
        }
    }
    println!("{}", pieces.join(" "));
    Ok(Value::Void)
}

fn builtin_to_string(evaluator: &mut Evaluator, args: Vec<Value>) -> Result<Value, ErrorMessage> {
    let text = args
        .first()
        .map(|v| evaluator.stringify(v))
        .unwrap_or_default();
    Ok(Value::string(evaluator.tc.types.char_(), &text))
}

fn builtin_len(_: &mut Evaluator, args: Vec<Value>) -> Result<Value, ErrorMessage> {
    let length = match args.first() {
        Some(Value::Array { values, .. }) => values.len() as i64,
        _ => {
            return Err(ErrorMessage::new(
                Location::builtin(),
                "len() expects an array or string",
            ))
        }
    };
    Ok(Value::Int(length))
}

fn builtin_span(evaluator: &mut Evaluator, args: Vec<Value>) -> Result<Value, ErrorMessage> {
    let mut children = Vec::new();
    let mut absorb = |value: &Value, children: &mut Vec<InlineObject>| match value {
        Value::TreeInline(handle) => {
            children.push(handle.replace(InlineObject::Span(Vec::new())));
        }
        other => children.push(InlineObject::Text(evaluator.stringify(other))),
    };

    for arg in &args {
        match arg {
            Value::Array { values, .. } if arg.as_string().is_none() => {
                for value in values {
                    absorb(value, &mut children);
                }
            }
            other => absorb(other, &mut children),
        }
    }

    Ok(Value::TreeInline(std::rc::Rc::new(std::cell::RefCell::new(
        InlineObject::Span(children),
    ))))
}
