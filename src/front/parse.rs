//! The parser and typed-AST builder.
//!
//! Because the core pipeline (Quad IR generation onward) needs a fully
//! typed AST, this single pass does double duty as parser and type
//! resolver: every `Var` and `Call` node is annotated with its `DataType`
//! as it is built, by consulting a per-function scope table (locals and
//! parameters) and a whole-program function-signature table (built by a
//! lightweight pre-scan so forward-referenced calls resolve too).

use crate::common::{CompileError, Id, Map, Result};

use super::ast::*;
use super::lex::*;

/// Scan the token stream for `TYPE NAME (` shapes to collect every
/// function's return type ahead of the real parse, so a call to a
/// function defined later in the file still resolves.
fn prescan_signatures(tokens: &[Token]) -> Map<Id, DataType> {
    let mut sigs = Map::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind != TokenKind::Int {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        let mut stars = 0u32;
        while j < tokens.len() && tokens[j].kind == TokenKind::Star {
            stars += 1;
            j += 1;
        }
        if j < tokens.len() && tokens[j].kind == TokenKind::Id {
            let name = tokens[j].text;
            j += 1;
            if j < tokens.len() && tokens[j].kind == TokenKind::LParen {
                let mut ty = DataType::int();
                for _ in 0..stars {
                    ty = DataType::pointer_to(ty);
                }
                sigs.insert(Id::new(name.to_string()), ty);
            }
        }
        i += 1;
    }
    sigs
}

struct Parser<'t, 'src> {
    tokens: &'t [Token<'src>],
    pos: usize,
    fn_sigs: Map<Id, DataType>,
    scope: Map<Id, DataType>,
}

impl<'t, 'src> Parser<'t, 'src> {
    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn advance(&mut self) -> Token<'src> {
        let tok = self.tokens[self.pos];
        self.pos += 1;
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>> {
        match self.peek_kind() {
            Some(k) if k == kind => Ok(self.advance()),
            Some(k) => Err(CompileError::syntax(format!("expected {kind}, found {k}"))),
            None => Err(CompileError::syntax(format!("expected {kind}, found end of input"))),
        }
    }

    fn parse_program(&mut self) -> Result<Program> {
        let mut functions = Vec::new();
        while self.pos < self.tokens.len() {
            functions.push(self.parse_function()?);
        }
        Ok(Program { functions })
    }

    fn parse_type(&mut self) -> Result<DataType> {
        self.expect(TokenKind::Int)?;
        let mut ty = DataType::int();
        while self.at(TokenKind::Star) {
            self.advance();
            ty = DataType::pointer_to(ty);
        }
        Ok(ty)
    }

    fn parse_function(&mut self) -> Result<Function> {
        let return_type = self.parse_type()?;
        let name = Id::new(self.expect(TokenKind::Id)?.text.to_string());
        self.expect(TokenKind::LParen)?;

        self.scope = Map::new();
        let mut params = Vec::new();
        if !self.at(TokenKind::RParen) {
            loop {
                let ty = self.parse_type()?;
                let pname = Id::new(self.expect(TokenKind::Id)?.text.to_string());
                self.scope.insert(pname, ty.clone());
                params.push(Param { name: pname, ty });
                if self.at(TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Function { name, params, return_type, body })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(TokenKind::RBrace) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek_kind() {
            Some(TokenKind::Int) => self.parse_decl_stmt(),
            Some(TokenKind::Return) => self.parse_return_stmt(),
            Some(TokenKind::If) => self.parse_if_stmt(),
            Some(TokenKind::For) => self.parse_for_stmt(),
            _ => self.parse_expr_or_assign_stmt(),
        }
    }

    /// A declaration without its trailing `;`, shared between plain
    /// declaration statements and a `for` loop's init clause.
    fn parse_decl_clause(&mut self) -> Result<Stmt> {
        let ty = self.parse_type()?;
        let name = Id::new(self.expect(TokenKind::Id)?.text.to_string());
        self.scope.insert(name, ty.clone());
        let init = if self.at(TokenKind::Assign) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Stmt::Decl { name, ty, init })
    }

    fn parse_decl_stmt(&mut self) -> Result<Stmt> {
        let stmt = self.parse_decl_clause()?;
        self.expect(TokenKind::Semi)?;
        Ok(stmt)
    }

    /// An assignment without its trailing `;`, shared between plain
    /// assignment statements and a `for` loop's update clause.
    fn parse_assign_clause(&mut self) -> Result<Stmt> {
        let lhs = self.parse_expr()?;
        self.expect(TokenKind::Assign)?;
        let rhs = self.parse_expr()?;
        Ok(Stmt::Assign { lhs, rhs })
    }

    fn parse_expr_or_assign_stmt(&mut self) -> Result<Stmt> {
        let e = self.parse_expr()?;
        if self.at(TokenKind::Assign) {
            self.advance();
            let rhs = self.parse_expr()?;
            self.expect(TokenKind::Semi)?;
            return Ok(Stmt::Assign { lhs: e, rhs });
        }
        self.expect(TokenKind::Semi)?;
        match e {
            Expr::Call { .. } => Ok(Stmt::ExprStmt(e)),
            _ => Err(CompileError::unsupported(
                "expression statement must be a function call",
            )),
        }
    }

    fn parse_return_stmt(&mut self) -> Result<Stmt> {
        self.expect(TokenKind::Return)?;
        let e = self.parse_expr()?;
        self.expect(TokenKind::Semi)?;
        Ok(Stmt::Return(e))
    }

    fn parse_if_stmt(&mut self) -> Result<Stmt> {
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.at(TokenKind::Else) {
            self.advance();
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::If { cond, then_branch, else_branch })
    }

    fn parse_for_stmt(&mut self) -> Result<Stmt> {
        self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;
        let init = if self.at(TokenKind::Semi) {
            None
        } else if self.at(TokenKind::Int) {
            Some(Box::new(self.parse_decl_clause()?))
        } else {
            Some(Box::new(self.parse_assign_clause()?))
        };
        self.expect(TokenKind::Semi)?;
        let cond = if self.at(TokenKind::Semi) { None } else { Some(self.parse_expr()?) };
        self.expect(TokenKind::Semi)?;
        let update = if self.at(TokenKind::RParen) {
            None
        } else {
            Some(Box::new(self.parse_assign_clause()?))
        };
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::For { init, cond, update, body })
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_additive()?;
        let op = match self.peek_kind() {
            Some(TokenKind::EqEq) => Some(BinOp::Eq),
            Some(TokenKind::NotEq) => Some(BinOp::Ne),
            Some(TokenKind::Lt) => Some(BinOp::Lt),
            Some(TokenKind::Gt) => Some(BinOp::Gt),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let rhs = self.parse_additive()?;
                Ok(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
            }
            None => Ok(lhs),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => Some(BinOp::Add),
                Some(TokenKind::Minus) => Some(BinOp::Sub),
                _ => None,
            };
            let Some(op) = op else { break };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                // Desugar unary minus to `0 - e` so Quad IR never needs a
                // dedicated Neg operation.
                Ok(Expr::Binary { op: BinOp::Sub, lhs: Box::new(Expr::Const(0)), rhs: Box::new(e) })
            }
            Some(TokenKind::Amp) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::Addr(Box::new(e)))
            }
            Some(TokenKind::Star) => {
                let mut depth = 0u32;
                while self.at(TokenKind::Star) {
                    self.advance();
                    depth += 1;
                }
                let e = self.parse_unary()?;
                Ok(Expr::Deref { expr: Box::new(e), depth })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek_kind() {
            Some(TokenKind::Num) => {
                let tok = self.advance();
                let value: i32 = tok
                    .text
                    .parse()
                    .map_err(|_| CompileError::syntax(format!("invalid integer literal {}", tok.text)))?;
                Ok(Expr::Const(value))
            }
            Some(TokenKind::Id) => {
                let tok = self.advance();
                let name = Id::new(tok.text.to_string());
                if self.at(TokenKind::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.at(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.at(TokenKind::Comma) {
                                self.advance();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    let return_type = self
                        .fn_sigs
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| CompileError::missing_symbol(name.to_string()))?;
                    Ok(Expr::Call { name, args, return_type })
                } else {
                    let ty = self
                        .scope
                        .get(&name)
                        .cloned()
                        .ok_or_else(|| CompileError::missing_symbol(name.to_string()))?;
                    Ok(Expr::Var { name, ty })
                }
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            Some(k) => Err(CompileError::syntax(format!("unexpected token {k}"))),
            None => Err(CompileError::syntax("unexpected end of input")),
        }
    }
}

pub fn parse(input: &str) -> Result<Program> {
    let tokens = Lexer::new(input).tokenize()?;
    let fn_sigs = prescan_signatures(&tokens);
    let mut parser = Parser { tokens: &tokens, pos: 0, fn_sigs, scope: Map::new() };
    parser.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_return_literal() {
        let prog = parse("int main() { return 42; }").unwrap();
        assert_eq!(prog.functions.len(), 1);
        assert_eq!(prog.functions[0].name.as_str(), "main");
        assert!(matches!(prog.functions[0].body[0], Stmt::Return(Expr::Const(42))));
    }

    #[test]
    fn parses_pointer_declarations_and_deref() {
        let prog = parse("int main() { int v = 5; int* p = &v; int** q = &p; return **q; }").unwrap();
        let main = &prog.functions[0];
        assert_eq!(main.body.len(), 4);
        assert!(matches!(
            &main.body[3],
            Stmt::Return(Expr::Deref { depth: 2, .. })
        ));
    }

    #[test]
    fn resolves_forward_declared_calls() {
        let prog = parse(
            "int helper(int x) { return x; } int main() { return helper(1); }",
        )
        .unwrap();
        assert_eq!(prog.functions.len(), 2);
    }

    #[test]
    fn for_loop_condition_is_optional() {
        let prog = parse("int main() { for (;;) { return 0; } return 1; }").unwrap();
        assert!(matches!(&prog.functions[0].body[0], Stmt::For { cond: None, .. }));
    }

    #[test]
    fn rejects_bare_expression_statements() {
        assert!(parse("int main() { 1 + 1; return 0; }").is_err());
    }
}
