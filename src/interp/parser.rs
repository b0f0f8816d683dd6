//! The recursive-descent parser.
//!
//! Expression precedence, low to high: `??`, `or`, `and`, chained
//! comparisons, additive, multiplicative; postfix call/subscript/member
//! binds tighter than any of them. `a.f(x)` is rewritten into `f(&a, x)`
//! here, with a flag so resolution forms the implicit pointer.

use crate::error::{ErrorMessage, Location};
use crate::interp::ast::*;
use crate::interp::lexer::{unescape, Lexer, Mode, Token, TokenKind};

type Result<T> = std::result::Result<T, ErrorMessage>;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(filename: &str, source: &'a str) -> Self {
        Parser {
            lexer: Lexer::new(filename, source),
        }
    }

    /// Parses a whole source file: the preamble, then (after
    /// `\start_document`) document content.
    pub fn parse_document(mut self) -> Result<Document> {
        let mut document = Document {
            preamble: Vec::new(),
            has_document: false,
            body: Vec::new(),
        };

        // The preamble is script, even though the file opens in text
        // mode; the mode flips back once the document starts.
        self.lexer.push_mode(Mode::Script);
        loop {
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::EndOfFile => {
                    self.lexer.pop_mode(Mode::Script);
                    return Ok(document);
                }
                TokenKind::Backslash => {
                    let save = self.lexer.save();
                    self.lexer.next()?;
                    let name = self.expect_identifier()?;
                    if name.text == "start_document" {
                        // Sugar for a builtin call; arguments optional.
                        if self.lexer.peek()?.kind == TokenKind::LParen {
                            let args = self.parse_call_args()?;
                            document.preamble.push(Stmt {
                                loc: token.loc.clone(),
                                kind: StmtKind::Expr(Expr {
                                    loc: token.loc.clone(),
                                    kind: ExprKind::Call {
                                        callee: Box::new(Expr {
                                            loc: token.loc.clone(),
                                            kind: ExprKind::Ident(QualifiedId::plain(
                                                "start_document",
                                            )),
                                        }),
                                        args,
                                        rewritten_ufcs: false,
                                    },
                                }),
                            });
                        }
                        self.lexer.expect(TokenKind::Semicolon)?;
                        document.has_document = true;
                        break;
                    }

                    self.lexer.rewind(save);
                    let stmt = self.parse_statement()?;
                    document.preamble.push(stmt);
                }
                _ => {
                    let stmt = self.parse_statement()?;
                    document.preamble.push(stmt);
                }
            }
        }
        self.lexer.pop_mode(Mode::Script);

        document.body = self.parse_document_body()?;
        Ok(document)
    }

    fn parse_document_body(&mut self) -> Result<Vec<DocumentPiece>> {
        let mut pieces = Vec::new();
        loop {
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::EndOfFile => return Ok(pieces),
                TokenKind::Word => {
                    self.lexer.next()?;
                    pieces.push(DocumentPiece::Text(unescape_word(token.text)));
                }
                TokenKind::ParagraphBreak => {
                    self.lexer.next()?;
                    pieces.push(DocumentPiece::ParagraphBreak);
                }
                TokenKind::RawBlock => {
                    self.lexer.next()?;
                    let inner = token
                        .text
                        .strip_prefix("```")
                        .and_then(|t| t.strip_suffix("```"))
                        .unwrap_or(token.text);
                    pieces.push(DocumentPiece::Raw(inner.to_string()));
                }
                TokenKind::LBrace | TokenKind::RBrace => {
                    // Bare braces group content without further meaning.
                    self.lexer.next()?;
                }
                TokenKind::Backslash => {
                    self.lexer.next()?;
                    let expr = self.parse_backslash_form(token.loc)?;
                    pieces.push(DocumentPiece::Script(expr));
                }
                _ => {
                    return Err(ErrorMessage::new(
                        token.loc,
                        "unexpected token in document content",
                    ))
                }
            }
        }
    }

    // After a `\` in text or script context: `\script{…}`, a tree block
    // like `\line{…}`, `\{…}`, or a generic call `\name(args)`.
    fn parse_backslash_form(&mut self, loc: Location) -> Result<Expr> {
        if self.lexer.mode() == Mode::Text {
            self.lexer.push_mode(Mode::Script);
            let result = self.parse_backslash_form_inner(loc);
            self.lexer.pop_mode(Mode::Script);
            return result;
        }
        self.parse_backslash_form_inner(loc)
    }

    fn parse_backslash_form_inner(&mut self, loc: Location) -> Result<Expr> {
        let token = self.lexer.peek()?;

        // `\{…}` wraps inline objects directly.
        if token.kind == TokenKind::LBrace {
            let children = self.parse_inline_content()?;
            return Ok(Expr {
                loc,
                kind: ExprKind::TreeInline(children),
            });
        }

        let name = self.expect_identifier()?;
        if name.text == "script" {
            let phase = self.parse_optional_phase()?;
            self.expect(TokenKind::LBrace)?;
            let body = self.parse_statement_list(TokenKind::RBrace)?;
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr {
                loc,
                kind: ExprKind::ScriptBlock { phase, body },
            });
        }

        if let Some(kind) = TreeBlockKind::parse(name.text) {
            let children = self.parse_inline_content()?;
            return Ok(Expr {
                loc,
                kind: ExprKind::TreeBlock { kind, children },
            });
        }

        // A generic inline call: `\bold(...)`, `\emph{…}`, bare `\pagebreak`.
        let callee = Expr {
            loc: name.loc.clone(),
            kind: ExprKind::Ident(QualifiedId::plain(name.text)),
        };
        let mut args = if self.lexer.peek()?.kind == TokenKind::LParen {
            self.parse_call_args()?
        } else {
            Vec::new()
        };

        // Trailing braces pass tree content as the final argument.
        if self.lexer.peek()?.kind == TokenKind::LBrace {
            let children = self.parse_inline_content()?;
            args.push(CallArg {
                name: None,
                value: Expr {
                    loc: loc.clone(),
                    kind: ExprKind::TreeInline(children),
                },
            });
        }

        Ok(Expr {
            loc,
            kind: ExprKind::Call {
                callee: Box::new(callee),
                args,
                rewritten_ufcs: false,
            },
        })
    }

    fn parse_optional_phase(&mut self) -> Result<ProcessingPhase> {
        if self.lexer.expect(TokenKind::At)?.is_some() {
            let name = self.expect_identifier()?;
            return phase_from_name(name.text, &name.loc);
        }
        Ok(ProcessingPhase::default())
    }

    // `{ words and \nested{…} }` in text mode.
    fn parse_inline_content(&mut self) -> Result<Vec<InlineObjectNode>> {
        self.expect(TokenKind::LBrace)?;
        self.lexer.push_mode(Mode::Text);

        let mut children = Vec::new();
        loop {
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::RBrace => break,
                TokenKind::EndOfFile => {
                    self.lexer.pop_mode(Mode::Text);
                    return Err(ErrorMessage::new(token.loc, "unterminated tree expression"));
                }
                TokenKind::Word => {
                    self.lexer.next()?;
                    children.push(InlineObjectNode::Text(unescape_word(token.text)));
                }
                TokenKind::ParagraphBreak => {
                    self.lexer.next()?;
                }
                TokenKind::Backslash => {
                    self.lexer.next()?;
                    let expr = self.parse_backslash_form(token.loc)?;
                    children.push(InlineObjectNode::Script {
                        phase: ProcessingPhase::default(),
                        body: Box::new(expr),
                    });
                }
                _ => {
                    self.lexer.pop_mode(Mode::Text);
                    return Err(ErrorMessage::new(token.loc, "unexpected token in tree content"));
                }
            }
        }

        self.lexer.pop_mode(Mode::Text);
        self.expect(TokenKind::RBrace)?;
        Ok(children)
    }

    // ----- statements -----

    pub fn parse_statement_list(&mut self, terminator: TokenKind) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let token = self.lexer.peek()?;
            if token.kind == terminator || token.kind == TokenKind::EndOfFile {
                return Ok(stmts);
            }
            stmts.push(self.parse_statement()?);
        }
    }

    pub fn parse_statement(&mut self) -> Result<Stmt> {
        let token = self.lexer.peek()?;
        let loc = token.loc.clone();

        if token.kind == TokenKind::Identifier {
            match token.text {
                "let" | "var" => return self.parse_var_decl(),
                "fn" => return self.parse_func_decl(),
                "struct" => return self.parse_struct_decl(),
                "union" => return self.parse_union_decl(),
                "enum" => return self.parse_enum_decl(),
                "if" => return self.parse_if(),
                "while" => return self.parse_while(),
                "for" => return self.parse_for(),
                "return" => {
                    self.lexer.next()?;
                    let value = if self.lexer.peek()?.kind == TokenKind::Semicolon {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    self.expect(TokenKind::Semicolon)?;
                    return Ok(Stmt {
                        loc,
                        kind: StmtKind::Return(value),
                    });
                }
                "break" => {
                    self.lexer.next()?;
                    self.expect(TokenKind::Semicolon)?;
                    return Ok(Stmt {
                        loc,
                        kind: StmtKind::Break,
                    });
                }
                "continue" => {
                    self.lexer.next()?;
                    self.expect(TokenKind::Semicolon)?;
                    return Ok(Stmt {
                        loc,
                        kind: StmtKind::Continue,
                    });
                }
                "import" => {
                    self.lexer.next()?;
                    let path = self.expect(TokenKind::StringLiteral)?;
                    let text = unescape(strip_quotes(path.text), &path.loc)?;
                    self.expect(TokenKind::Semicolon)?;
                    return Ok(Stmt {
                        loc,
                        kind: StmtKind::Import(text),
                    });
                }
                "using" => return self.parse_using(),
                "namespace" => return self.parse_namespace(),
                _ => {}
            }
        }

        match token.kind {
            TokenKind::LBrace => {
                self.lexer.next()?;
                let body = self.parse_statement_list(TokenKind::RBrace)?;
                self.expect(TokenKind::RBrace)?;
                Ok(Stmt {
                    loc,
                    kind: StmtKind::Block(body),
                })
            }
            TokenKind::At => {
                // `@phase { … }`: a scheduled hook.
                self.lexer.next()?;
                let name = self.expect_identifier()?;
                let phase = phase_from_name(name.text, &name.loc)?;
                let body = self.parse_statement()?;
                Ok(Stmt {
                    loc,
                    kind: StmtKind::Hook {
                        phase,
                        body: Box::new(body),
                    },
                })
            }
            TokenKind::Semicolon => {
                self.lexer.next()?;
                Ok(Stmt {
                    loc,
                    kind: StmtKind::Block(Vec::new()),
                })
            }
            _ => {
                let expr = self.parse_assignment()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt {
                    loc,
                    kind: StmtKind::Expr(expr),
                })
            }
        }
    }

    fn parse_var_decl(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;
        let mutable = keyword.text == "var";
        let name = self.expect_identifier()?.text.to_string();

        let ty = if self.lexer.expect(TokenKind::Colon)?.is_some() {
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        let init = if self.lexer.expect(TokenKind::Equal)?.is_some() {
            Some(self.parse_expr()?)
        } else {
            None
        };

        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::VarDecl {
                name,
                mutable,
                ty,
                init,
            },
        })
    }

    fn parse_param_list(&mut self, terminator: TokenKind) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        loop {
            if self.lexer.peek()?.kind == terminator {
                break;
            }

            let name = self.expect_identifier()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            let default = if self.lexer.expect(TokenKind::Equal)?.is_some() {
                Some(self.parse_expr()?)
            } else {
                None
            };

            params.push(Param {
                loc: name.loc.clone(),
                name: name.text.to_string(),
                ty,
                default,
            });

            if self.lexer.expect(TokenKind::Comma)?.is_none() {
                break;
            }
        }

        Ok(params)
    }

    fn parse_func_decl(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;
        let name = self.expect_identifier()?.text.to_string();
        self.expect(TokenKind::LParen)?;
        let params = self.parse_param_list(TokenKind::RParen)?;
        self.expect(TokenKind::RParen)?;

        let return_ty = if self.lexer.expect(TokenKind::RArrow)?.is_some() {
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        self.expect(TokenKind::LBrace)?;
        let body = self.parse_statement_list(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace)?;

        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::FuncDecl {
                name,
                params,
                return_ty,
                body,
            },
        })
    }

    fn parse_struct_decl(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;
        let name = self.expect_identifier()?.text.to_string();
        self.expect(TokenKind::LBrace)?;
        // Struct fields and function parameters share their shape.
        let fields = self.parse_param_list(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace)?;

        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::StructDecl { name, fields },
        })
    }

    fn parse_union_decl(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;
        let name = self.expect_identifier()?.text.to_string();
        self.expect(TokenKind::LBrace)?;

        let mut cases = Vec::new();
        loop {
            if self.lexer.peek()?.kind == TokenKind::RBrace {
                break;
            }

            let case_name = self.expect_identifier()?.text.to_string();
            let params = if self.lexer.expect(TokenKind::LParen)?.is_some() {
                let params = self.parse_param_list(TokenKind::RParen)?;
                self.expect(TokenKind::RParen)?;
                params
            } else {
                Vec::new()
            };
            cases.push((case_name, params));

            if self.lexer.expect(TokenKind::Comma)?.is_none() {
                break;
            }
        }

        self.expect(TokenKind::RBrace)?;
        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::UnionDecl { name, cases },
        })
    }

    fn parse_enum_decl(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;
        let name = self.expect_identifier()?.text.to_string();

        let elem_ty = if self.lexer.expect(TokenKind::Colon)?.is_some() {
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        self.expect(TokenKind::LBrace)?;
        let mut enumerators = Vec::new();
        loop {
            if self.lexer.peek()?.kind == TokenKind::RBrace {
                break;
            }

            let enum_name = self.expect_identifier()?.text.to_string();
            let value = if self.lexer.expect(TokenKind::Equal)?.is_some() {
                Some(self.parse_expr()?)
            } else {
                None
            };
            enumerators.push((enum_name, value));

            if self.lexer.expect(TokenKind::Comma)?.is_none() {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;

        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::EnumDecl {
                name,
                elem_ty,
                enumerators,
            },
        })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;
        let cond = self.parse_expr_no_struct()?;
        self.expect(TokenKind::LBrace)?;
        let then_body = self.parse_statement_list(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace)?;

        let mut else_body = Vec::new();
        let save = self.lexer.save();
        if let Ok(token) = self.lexer.peek() {
            if token.is_keyword("else") {
                self.lexer.next()?;
                let next = self.lexer.peek()?;
                if next.is_keyword("if") {
                    else_body.push(self.parse_if()?);
                } else {
                    self.expect(TokenKind::LBrace)?;
                    else_body = self.parse_statement_list(TokenKind::RBrace)?;
                    self.expect(TokenKind::RBrace)?;
                }
            } else {
                self.lexer.rewind(save);
            }
        }

        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::If {
                cond,
                then_body,
                else_body,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;
        let cond = self.parse_expr_no_struct()?;
        self.expect(TokenKind::LBrace)?;
        let body = self.parse_statement_list(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace)?;

        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::While { cond, body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;

        let init = if self.lexer.peek()?.kind == TokenKind::Semicolon {
            self.lexer.next()?;
            None
        } else {
            // The init statement consumes its own semicolon.
            Some(Box::new(self.parse_statement()?))
        };

        let cond = if self.lexer.peek()?.kind == TokenKind::Semicolon {
            None
        } else {
            Some(self.parse_expr_no_struct()?)
        };
        self.expect(TokenKind::Semicolon)?;

        let update = if self.lexer.peek()?.kind == TokenKind::LBrace {
            None
        } else {
            Some(self.parse_assignment_no_struct()?)
        };

        self.expect(TokenKind::LBrace)?;
        let body = self.parse_statement_list(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace)?;

        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::For {
                init,
                cond,
                update,
                body,
            },
        })
    }

    fn parse_using(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;
        let target = self.parse_qualified_id()?;
        let alias = if self.lexer.peek()?.is_keyword("as") {
            self.lexer.next()?;
            Some(self.expect_identifier()?.text.to_string())
        } else {
            None
        };
        self.expect(TokenKind::Semicolon)?;

        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::Using { target, alias },
        })
    }

    fn parse_namespace(&mut self) -> Result<Stmt> {
        let keyword = self.lexer.next()?;
        let name = self.expect_identifier()?.text.to_string();
        self.expect(TokenKind::LBrace)?;
        let body = self.parse_statement_list(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace)?;

        Ok(Stmt {
            loc: keyword.loc,
            kind: StmtKind::Namespace { name, body },
        })
    }

    // ----- types -----

    pub fn parse_type_expr(&mut self) -> Result<TypeExpr> {
        let token = self.lexer.peek()?;
        match token.kind {
            TokenKind::Question => {
                self.lexer.next()?;
                Ok(TypeExpr::Optional(Box::new(self.parse_type_expr()?)))
            }
            TokenKind::Ampersand => {
                self.lexer.next()?;
                let mutable = if self.lexer.peek()?.is_keyword("mut") {
                    self.lexer.next()?;
                    true
                } else {
                    false
                };
                Ok(TypeExpr::Pointer(Box::new(self.parse_type_expr()?), mutable))
            }
            TokenKind::LSquare => {
                self.lexer.next()?;
                let elem = self.parse_type_expr()?;
                let variadic = self.lexer.expect(TokenKind::Ellipsis)?.is_some();
                self.expect(TokenKind::RSquare)?;
                Ok(TypeExpr::Array(Box::new(elem), variadic))
            }
            TokenKind::Identifier if token.text == "fn" => {
                self.lexer.next()?;
                self.expect(TokenKind::LParen)?;
                let mut params = Vec::new();
                while self.lexer.peek()?.kind != TokenKind::RParen {
                    params.push(self.parse_type_expr()?);
                    if self.lexer.expect(TokenKind::Comma)?.is_none() {
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::RArrow)?;
                let ret = self.parse_type_expr()?;
                Ok(TypeExpr::Function(params, Box::new(ret)))
            }
            TokenKind::Identifier | TokenKind::ColonColon => {
                Ok(TypeExpr::Named(self.parse_qualified_id()?))
            }
            _ => Err(ErrorMessage::new(token.loc, "expected a type")),
        }
    }

    fn parse_qualified_id(&mut self) -> Result<QualifiedId> {
        let absolute = self.lexer.expect(TokenKind::ColonColon)?.is_some();
        let mut parts = vec![self.expect_identifier()?.text.to_string()];
        loop {
            let save = self.lexer.save();
            if self.lexer.expect(TokenKind::ColonColon)?.is_some() {
                if self.lexer.peek()?.kind == TokenKind::Identifier {
                    parts.push(self.lexer.next()?.text.to_string());
                    continue;
                }
                self.lexer.rewind(save);
            }
            break;
        }

        let name = parts.pop().unwrap();
        Ok(QualifiedId {
            absolute,
            parents: parts,
            name,
        })
    }

    // ----- expressions -----

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_null_coalesce(true)
    }

    fn parse_expr_no_struct(&mut self) -> Result<Expr> {
        self.parse_null_coalesce(false)
    }

    /// Assignment is only valid in statement position.
    fn parse_assignment(&mut self) -> Result<Expr> {
        self.parse_assignment_impl(true)
    }

    fn parse_assignment_no_struct(&mut self) -> Result<Expr> {
        self.parse_assignment_impl(false)
    }

    fn parse_assignment_impl(&mut self, structs: bool) -> Result<Expr> {
        let target = self.parse_null_coalesce(structs)?;
        let token = self.lexer.peek()?;
        let op = match token.kind {
            TokenKind::Equal => None,
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Subtract),
            TokenKind::AsteriskEqual => Some(BinaryOp::Multiply),
            TokenKind::SlashEqual => Some(BinaryOp::Divide),
            TokenKind::PercentEqual => Some(BinaryOp::Modulo),
            _ => return Ok(target),
        };

        let loc = target.loc.clone();
        self.lexer.next()?;
        let value = self.parse_null_coalesce(structs)?;
        Ok(Expr {
            loc,
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
        })
    }

    fn parse_null_coalesce(&mut self, structs: bool) -> Result<Expr> {
        let mut lhs = self.parse_logical_or(structs)?;
        while self.lexer.expect(TokenKind::QuestionQuestion)?.is_some() {
            let rhs = self.parse_logical_or(structs)?;
            let loc = lhs.loc.clone();
            lhs = Expr {
                loc,
                kind: ExprKind::NullCoalesce {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self, structs: bool) -> Result<Expr> {
        let mut lhs = self.parse_logical_and(structs)?;
        while self.lexer.peek()?.is_keyword("or") {
            self.lexer.next()?;
            let rhs = self.parse_logical_and(structs)?;
            let loc = lhs.loc.clone();
            lhs = Expr {
                loc,
                kind: ExprKind::Logical {
                    op: LogicalOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self, structs: bool) -> Result<Expr> {
        let mut lhs = self.parse_comparison(structs)?;
        while self.lexer.peek()?.is_keyword("and") {
            self.lexer.next()?;
            let rhs = self.parse_comparison(structs)?;
            let loc = lhs.loc.clone();
            lhs = Expr {
                loc,
                kind: ExprKind::Logical {
                    op: LogicalOp::And,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self, structs: bool) -> Result<Expr> {
        let first = self.parse_additive(structs)?;
        let mut rest = Vec::new();
        loop {
            let token = self.lexer.peek()?;
            let op = match token.kind {
                TokenKind::EqualEqual => ComparisonOp::Equal,
                TokenKind::NotEqual => ComparisonOp::NotEqual,
                TokenKind::Less => ComparisonOp::Less,
                TokenKind::LessEqual => ComparisonOp::LessEqual,
                TokenKind::Greater => ComparisonOp::Greater,
                TokenKind::GreaterEqual => ComparisonOp::GreaterEqual,
                _ => break,
            };
            self.lexer.next()?;
            rest.push((op, self.parse_additive(structs)?));
        }

        if rest.is_empty() {
            return Ok(first);
        }

        let loc = first.loc.clone();
        Ok(Expr {
            loc,
            kind: ExprKind::Comparison {
                first: Box::new(first),
                rest,
            },
        })
    }

    fn parse_additive(&mut self, structs: bool) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative(structs)?;
        loop {
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::Plus | TokenKind::Minus => {
                    let op = if token.kind == TokenKind::Plus {
                        BinaryOp::Add
                    } else {
                        BinaryOp::Subtract
                    };
                    self.lexer.next()?;
                    let rhs = self.parse_multiplicative(structs)?;
                    let loc = lhs.loc.clone();
                    lhs = Expr {
                        loc,
                        kind: ExprKind::Binary {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                    };
                }
                // `base // { … }`: struct update.
                TokenKind::SlashSlash => {
                    self.lexer.next()?;
                    self.expect(TokenKind::LBrace)?;
                    let updates = self.parse_struct_lit_fields()?;
                    self.expect(TokenKind::RBrace)?;
                    let loc = lhs.loc.clone();
                    lhs = Expr {
                        loc,
                        kind: ExprKind::StructUpdate {
                            base: Box::new(lhs),
                            updates,
                        },
                    };
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_multiplicative(&mut self, structs: bool) -> Result<Expr> {
        let mut lhs = self.parse_unary(structs)?;
        loop {
            let token = self.lexer.peek()?;
            let op = match token.kind {
                TokenKind::Asterisk => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => return Ok(lhs),
            };
            self.lexer.next()?;
            let rhs = self.parse_unary(structs)?;
            let loc = lhs.loc.clone();
            lhs = Expr {
                loc,
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
    }

    fn parse_unary(&mut self, structs: bool) -> Result<Expr> {
        let token = self.lexer.peek()?;
        let loc = token.loc.clone();
        match token.kind {
            TokenKind::Minus => {
                self.lexer.next()?;
                let operand = self.parse_unary(structs)?;
                Ok(Expr {
                    loc,
                    kind: ExprKind::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                    },
                })
            }
            TokenKind::Identifier if token.text == "not" => {
                self.lexer.next()?;
                let operand = self.parse_unary(structs)?;
                Ok(Expr {
                    loc,
                    kind: ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                })
            }
            // Prefix `*` moves out of an lvalue.
            TokenKind::Asterisk => {
                self.lexer.next()?;
                let operand = self.parse_unary(structs)?;
                Ok(Expr {
                    loc,
                    kind: ExprKind::Move(Box::new(operand)),
                })
            }
            TokenKind::Ampersand => {
                self.lexer.next()?;
                let mutable = if self.lexer.peek()?.is_keyword("mut") {
                    self.lexer.next()?;
                    true
                } else {
                    false
                };
                let operand = self.parse_unary(structs)?;
                Ok(Expr {
                    loc,
                    kind: ExprKind::AddressOf {
                        operand: Box::new(operand),
                        mutable,
                    },
                })
            }
            TokenKind::Ellipsis => {
                self.lexer.next()?;
                let operand = self.parse_unary(structs)?;
                Ok(Expr {
                    loc,
                    kind: ExprKind::ArraySpread(Box::new(operand)),
                })
            }
            _ => self.parse_postfix(structs),
        }
    }

    fn parse_postfix(&mut self, structs: bool) -> Result<Expr> {
        let mut expr = self.parse_primary(structs)?;
        loop {
            let token = self.lexer.peek()?;
            match token.kind {
                TokenKind::LParen => {
                    let args = self.parse_call_args()?;
                    expr = make_call(expr, args);
                }
                TokenKind::LSquare => {
                    self.lexer.next()?;
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RSquare)?;
                    let loc = expr.loc.clone();
                    expr = Expr {
                        loc,
                        kind: ExprKind::Subscript {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                    };
                }
                TokenKind::Period | TokenKind::QuestionPeriod => {
                    let optional = token.kind == TokenKind::QuestionPeriod;
                    self.lexer.next()?;
                    let field = self.expect_identifier()?.text.to_string();
                    let loc = expr.loc.clone();
                    expr = Expr {
                        loc,
                        kind: ExprKind::DotOp {
                            base: Box::new(expr),
                            field,
                            optional,
                        },
                    };
                }
                TokenKind::Question => {
                    self.lexer.next()?;
                    let loc = expr.loc.clone();
                    expr = Expr {
                        loc,
                        kind: ExprKind::OptionalCheck(Box::new(expr)),
                    };
                }
                TokenKind::Exclamation => {
                    self.lexer.next()?;
                    let loc = expr.loc.clone();
                    expr = Expr {
                        loc,
                        kind: ExprKind::ForceUnwrap(Box::new(expr)),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<CallArg>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        loop {
            if self.lexer.peek()?.kind == TokenKind::RParen {
                break;
            }

            // `name: value` is a named argument.
            let save = self.lexer.save();
            let mut name = None;
            let first = self.lexer.peek()?;
            if first.kind == TokenKind::Identifier {
                self.lexer.next()?;
                if self.lexer.expect(TokenKind::Colon)?.is_some() {
                    name = Some(first.text.to_string());
                } else {
                    self.lexer.rewind(save);
                }
            }

            let value = self.parse_expr()?;
            args.push(CallArg { name, value });

            if self.lexer.expect(TokenKind::Comma)?.is_none() {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_struct_lit_fields(&mut self) -> Result<Vec<StructLitField>> {
        let mut fields = Vec::new();
        loop {
            if self.lexer.peek()?.kind == TokenKind::RBrace {
                break;
            }

            let save = self.lexer.save();
            let mut name = None;
            let first = self.lexer.peek()?;
            if first.kind == TokenKind::Identifier {
                self.lexer.next()?;
                if self.lexer.expect(TokenKind::Colon)?.is_some() {
                    name = Some(first.text.to_string());
                } else {
                    self.lexer.rewind(save);
                }
            }

            let value = self.parse_expr()?;
            fields.push(StructLitField { name, value });

            if self.lexer.expect(TokenKind::Comma)?.is_none() {
                break;
            }
        }
        Ok(fields)
    }

    fn parse_primary(&mut self, structs: bool) -> Result<Expr> {
        let token = self.lexer.peek()?;
        let loc = token.loc.clone();

        match token.kind {
            TokenKind::Number => {
                self.lexer.next()?;
                self.parse_number(token)
            }
            TokenKind::StringLiteral => {
                self.lexer.next()?;
                let text = unescape(strip_quotes(token.text), &token.loc)?;
                Ok(Expr {
                    loc,
                    kind: ExprKind::StringLit(text),
                })
            }
            TokenKind::CharLiteral => {
                self.lexer.next()?;
                let inner = &token.text[1..token.text.len() - 1];
                let text = unescape(inner, &token.loc)?;
                let mut chars = text.chars();
                let (Some(c), None) = (chars.next(), chars.next()) else {
                    return Err(ErrorMessage::new(loc, "char literal must hold one character"));
                };
                Ok(Expr {
                    loc,
                    kind: ExprKind::CharLit(c),
                })
            }
            TokenKind::FStringStart | TokenKind::FStringEnd => self.parse_fstring(),
            TokenKind::LParen => {
                self.lexer.next()?;
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LSquare => {
                self.lexer.next()?;
                let mut items = Vec::new();
                loop {
                    if self.lexer.peek()?.kind == TokenKind::RSquare {
                        break;
                    }
                    items.push(self.parse_expr()?);
                    if self.lexer.expect(TokenKind::Comma)?.is_none() {
                        break;
                    }
                }
                self.expect(TokenKind::RSquare)?;
                Ok(Expr {
                    loc,
                    kind: ExprKind::ArrayLit(items),
                })
            }
            TokenKind::Dollar => {
                self.lexer.next()?;
                let ty = self.parse_type_expr()?;
                Ok(Expr {
                    loc,
                    kind: ExprKind::TypeExpr(ty),
                })
            }
            TokenKind::LBrace if structs => {
                // Anonymous struct literal; its type comes from context.
                self.lexer.next()?;
                let fields = self.parse_struct_lit_fields()?;
                self.expect(TokenKind::RBrace)?;
                Ok(Expr {
                    loc,
                    kind: ExprKind::StructLit { name: None, fields },
                })
            }
            TokenKind::Period => {
                // `.name`: a context identifier, or `.Case(args)`.
                self.lexer.next()?;
                let name = self.expect_identifier()?.text.to_string();
                if self.lexer.peek()?.kind == TokenKind::LParen {
                    let args = self.parse_call_args()?;
                    Ok(Expr {
                        loc,
                        kind: ExprKind::UnionLit { case: name, args },
                    })
                } else {
                    Ok(Expr {
                        loc,
                        kind: ExprKind::ContextIdent(name),
                    })
                }
            }
            TokenKind::Backslash => {
                self.lexer.next()?;
                self.parse_backslash_form(loc)
            }
            TokenKind::Identifier => match token.text {
                "true" | "false" => {
                    self.lexer.next()?;
                    Ok(Expr {
                        loc,
                        kind: ExprKind::BoolLit(token.text == "true"),
                    })
                }
                "null" => {
                    self.lexer.next()?;
                    Ok(Expr {
                        loc,
                        kind: ExprKind::NullLit,
                    })
                }
                "cast" => self.parse_cast(),
                _ => {
                    let id = self.parse_qualified_id()?;
                    if structs && self.lexer.peek()?.kind == TokenKind::LBrace {
                        self.lexer.next()?;
                        let fields = self.parse_struct_lit_fields()?;
                        self.expect(TokenKind::RBrace)?;
                        return Ok(Expr {
                            loc,
                            kind: ExprKind::StructLit {
                                name: Some(id),
                                fields,
                            },
                        });
                    }
                    Ok(Expr {
                        loc,
                        kind: ExprKind::Ident(id),
                    })
                }
            },
            _ => Err(ErrorMessage::new(loc, "expected an expression")),
        }
    }

    fn parse_number(&mut self, token: Token<'a>) -> Result<Expr> {
        let loc = token.loc.clone();

        // A unit suffix with no space turns a number into a length.
        let next = self.lexer.peek()?;
        if next.kind == TokenKind::Identifier && !next.whitespace_before {
            if let Some(unit) = LengthUnit::parse(next.text) {
                self.lexer.next()?;
                let value: f64 = token
                    .text
                    .parse()
                    .map_err(|_| ErrorMessage::new(loc.clone(), "malformed number"))?;
                return Ok(Expr {
                    loc,
                    kind: ExprKind::LengthLit(value, unit),
                });
            }
        }

        if token.text.contains('.') {
            let value: f64 = token
                .text
                .parse()
                .map_err(|_| ErrorMessage::new(loc.clone(), "malformed number"))?;
            Ok(Expr {
                loc,
                kind: ExprKind::FloatLit(value),
            })
        } else {
            let value: i64 = token
                .text
                .parse()
                .map_err(|_| ErrorMessage::new(loc.clone(), "integer literal too large"))?;
            Ok(Expr {
                loc,
                kind: ExprKind::IntLit(value),
            })
        }
    }

    fn parse_cast(&mut self) -> Result<Expr> {
        let keyword = self.lexer.next()?;
        self.expect(TokenKind::LParen)?;
        let operand = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;

        let target = if self.lexer.expect(TokenKind::Period)?.is_some() {
            CastTarget::Variant(self.expect_identifier()?.text.to_string())
        } else {
            CastTarget::Type(self.parse_type_expr()?)
        };

        self.expect(TokenKind::RParen)?;
        Ok(Expr {
            loc: keyword.loc,
            kind: ExprKind::Cast {
                operand: Box::new(operand),
                target,
            },
        })
    }

    fn parse_fstring(&mut self) -> Result<Expr> {
        let token = self.lexer.next()?;
        let loc = token.loc.clone();
        let mut parts = Vec::new();

        let push_text = |parts: &mut Vec<FStringPart>, text: &str, loc: &Location| -> Result<()> {
            if !text.is_empty() {
                parts.push(FStringPart::Text(unescape(text, loc)?));
            }
            Ok(())
        };

        // The opener carries `f"` and either `{` or the closing quote.
        let body = token.text.strip_prefix("f\"").unwrap_or(token.text);
        match token.kind {
            TokenKind::FStringEnd => {
                let body = body.strip_suffix('"').unwrap_or(body);
                push_text(&mut parts, body, &loc)?;
                return Ok(Expr {
                    loc,
                    kind: ExprKind::FString(parts),
                });
            }
            TokenKind::FStringStart => {
                let body = body.strip_suffix('{').unwrap_or(body);
                push_text(&mut parts, body, &loc)?;
            }
            _ => unreachable!(),
        }

        loop {
            let expr = self.parse_expr()?;
            parts.push(FStringPart::Interpolation(Box::new(expr)));
            self.expect(TokenKind::RBrace)?;

            let fragment = self.lexer.continue_fstring()?;
            match fragment.kind {
                TokenKind::FStringMiddle => {
                    let body = fragment.text.strip_suffix('{').unwrap_or(fragment.text);
                    push_text(&mut parts, body, &fragment.loc)?;
                }
                TokenKind::FStringEnd => {
                    let body = fragment.text.strip_suffix('"').unwrap_or(fragment.text);
                    push_text(&mut parts, body, &fragment.loc)?;
                    return Ok(Expr {
                        loc,
                        kind: ExprKind::FString(parts),
                    });
                }
                _ => unreachable!(),
            }
        }
    }

    // ----- helpers -----

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'a>> {
        let token = self.lexer.peek()?;
        if token.kind != kind {
            return Err(ErrorMessage::new(
                token.loc,
                format!("expected {:?}, found {:?}", kind, token.kind),
            ));
        }
        self.lexer.next()
    }

    fn expect_identifier(&mut self) -> Result<Token<'a>> {
        self.expect(TokenKind::Identifier)
    }
}

fn make_call(callee: Expr, mut args: Vec<CallArg>) -> Expr {
    let loc = callee.loc.clone();

    // UFCS: `a.f(x)` becomes `f(&a, x)`; the flag tells resolution to
    // form the implicit pointer to `a`.
    if let ExprKind::DotOp {
        base,
        field,
        optional: false,
    } = callee.kind
    {
        let method = Expr {
            loc: loc.clone(),
            kind: ExprKind::Ident(QualifiedId::plain(field)),
        };
        args.insert(
            0,
            CallArg {
                name: None,
                value: *base,
            },
        );
        return Expr {
            loc,
            kind: ExprKind::Call {
                callee: Box::new(method),
                args,
                rewritten_ufcs: true,
            },
        };
    }

    Expr {
        loc,
        kind: ExprKind::Call {
            callee: Box::new(callee),
            args,
            rewritten_ufcs: false,
        },
    }
}

fn strip_quotes(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}

// Text-mode words keep their escape sequences; resolve them here.
fn unescape_word(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Convenience for scripts and tests: parses statements only.
pub fn parse_script(filename: &str, source: &str) -> Result<Vec<Stmt>> {
    let mut parser = Parser::new(filename, source);
    parser.lexer.push_mode(Mode::Script);
    let stmts = parser.parse_statement_list(TokenKind::EndOfFile)?;
    parser.lexer.pop_mode(Mode::Script);
    Ok(stmts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(source: &str) -> Expr {
        let mut parser = Parser::new("test.sap", source);
        parser.lexer.push_mode(Mode::Script);
        parser.parse_expr().unwrap()
    }

    #[test]
    fn precedence() {
        // 2 + 3 * 4 parses as 2 + (3 * 4).
        let expr = parse_expr("2 + 3 * 4");
        let ExprKind::Binary {
            op: BinaryOp::Add,
            rhs,
            ..
        } = expr.kind
        else {
            panic!("expected addition at the top");
        };
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn chained_comparison_is_nary() {
        let expr = parse_expr("a < b <= c");
        let ExprKind::Comparison { rest, .. } = expr.kind else {
            panic!("expected a comparison");
        };
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].0, ComparisonOp::Less);
        assert_eq!(rest[1].0, ComparisonOp::LessEqual);
    }

    #[test]
    fn null_coalesce_binds_loosest() {
        let expr = parse_expr("a ?? b or c");
        assert!(matches!(expr.kind, ExprKind::NullCoalesce { .. }));
    }

    #[test]
    fn ufcs_rewrite() {
        let expr = parse_expr("a.f(x, y)");
        let ExprKind::Call {
            callee,
            args,
            rewritten_ufcs,
        } = expr.kind
        else {
            panic!("expected a call");
        };
        assert!(rewritten_ufcs);
        assert!(matches!(&callee.kind, ExprKind::Ident(id) if id.name == "f"));
        assert_eq!(args.len(), 3);
        assert!(matches!(&args[0].value.kind, ExprKind::Ident(id) if id.name == "a"));
    }

    #[test]
    fn plain_field_access_is_not_rewritten() {
        let expr = parse_expr("a.f");
        assert!(matches!(expr.kind, ExprKind::DotOp { .. }));
    }

    #[test]
    fn struct_literal_and_update() {
        let expr = parse_expr("S{a: 1} // {b: 9}");
        let ExprKind::StructUpdate { base, updates } = expr.kind else {
            panic!("expected struct update");
        };
        assert!(matches!(&base.kind, ExprKind::StructLit { name: Some(id), .. } if id.name == "S"));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].name.as_deref(), Some("b"));
    }

    #[test]
    fn cast_forms() {
        let ty_cast = parse_expr("cast(x, int)");
        assert!(matches!(
            ty_cast.kind,
            ExprKind::Cast {
                target: CastTarget::Type(_),
                ..
            }
        ));

        let variant_cast = parse_expr("cast(x, .Some)");
        assert!(matches!(
            variant_cast.kind,
            ExprKind::Cast {
                target: CastTarget::Variant(_),
                ..
            }
        ));
    }

    #[test]
    fn union_literal() {
        let expr = parse_expr(".Pair(1, 2)");
        let ExprKind::UnionLit { case, args } = expr.kind else {
            panic!("expected a union literal");
        };
        assert_eq!(case, "Pair");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn context_ident() {
        let expr = parse_expr(".red");
        assert!(matches!(expr.kind, ExprKind::ContextIdent(name) if name == "red"));
    }

    #[test]
    fn type_expr_dollar() {
        let expr = parse_expr("$?int");
        assert!(matches!(
            expr.kind,
            ExprKind::TypeExpr(TypeExpr::Optional(_))
        ));
    }

    #[test]
    fn length_literal() {
        let expr = parse_expr("12mm");
        assert!(matches!(
            expr.kind,
            ExprKind::LengthLit(v, LengthUnit::Millimetres) if v == 12.0
        ));

        // With a space it stays a number followed by an identifier.
        let expr = parse_expr("12");
        assert!(matches!(expr.kind, ExprKind::IntLit(12)));
    }

    #[test]
    fn fstring_parts() {
        let expr = parse_expr(r#"f"x is {x}!""#);
        let ExprKind::FString(parts) = expr.kind else {
            panic!("expected an f-string");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], FStringPart::Text(t) if t == "x is "));
        assert!(matches!(&parts[1], FStringPart::Interpolation(_)));
        assert!(matches!(&parts[2], FStringPart::Text(t) if t == "!"));
    }

    #[test]
    fn statements_and_overloads() {
        let stmts = parse_script(
            "test.sap",
            "fn f(x: int) -> int { return x * 2; }\n\
             fn f(x: float) -> float { return x + 1.0; }\n\
             let y: int = f(3);",
        )
        .unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[0].kind, StmtKind::FuncDecl { .. }));
        assert!(matches!(stmts[2].kind, StmtKind::VarDecl { .. }));
    }

    #[test]
    fn document_with_preamble() {
        let parser = Parser::new(
            "test.sap",
            "let x = 1;\n\\start_document;\nhello world",
        );
        let document = parser.parse_document().unwrap();
        assert!(document.has_document);
        assert_eq!(document.preamble.len(), 1);
        assert!(matches!(
            document.body.as_slice(),
            [DocumentPiece::Text(a), DocumentPiece::Text(b)] if a == "hello" && b == "world"
        ));
    }

    #[test]
    fn tree_expressions() {
        let expr = parse_expr("\\line{hello \\bold(1) world}");
        let ExprKind::TreeBlock { kind, children } = expr.kind else {
            panic!("expected a tree block");
        };
        assert_eq!(kind, TreeBlockKind::Line);
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn move_and_address_of() {
        let expr = parse_expr("*x");
        assert!(matches!(expr.kind, ExprKind::Move(_)));

        let expr = parse_expr("&mut x");
        assert!(matches!(expr.kind, ExprKind::AddressOf { mutable: true, .. }));
    }

    #[test]
    fn if_condition_allows_brace_body() {
        let stmts = parse_script("test.sap", "if x < 2 { return; }").unwrap();
        assert!(matches!(stmts[0].kind, StmtKind::If { .. }));
    }
}
