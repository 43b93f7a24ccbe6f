//! Recursive-descent parser for attribute expressions
//!
//! Precedence, loosest first: OR, AND, NOT, predicates (comparison, IN,
//! BETWEEN, LIKE, IS NULL), additive, multiplicative, unary minus.

use super::ast::{BinaryOp, ColumnRef, Expr, Literal, QualifiedName, SubqueryRef, UnaryOp};
use super::errors::{ExprError, ExprResult};
use super::lexer::{tokenize, Token, TokenKind};

/// Parse a complete expression
pub fn parse_expression(input: &str) -> ExprResult<Expr> {
    let tokens = tokenize(input)?;
    parse_tokens(&tokens, input.len())
}

/// Parse pre-tokenized input; `source_len` positions end-of-input errors
pub fn parse_tokens(tokens: &[Token], source_len: usize) -> ExprResult<Expr> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        source_len,
    };
    if tokens.is_empty() {
        return Err(ExprError::parse("Empty expression", 0));
    }
    let expr = parser.parse_or()?;
    if let Some(token) = parser.peek() {
        return Err(ExprError::parse(
            format!("Unexpected trailing '{}'", token.text),
            token.start,
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source_len: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn position(&self) -> usize {
        self.peek().map(|t| t.start).unwrap_or(self.source_len)
    }

    fn error<T>(&self, message: impl Into<String>) -> ExprResult<T> {
        Err(ExprError::parse(message, self.position()))
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek().map_or(false, |t| t.is_keyword(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ExprResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            self.error(format!("Expected {}", keyword))
        }
    }

    fn eat_kind(&mut self, kind: TokenKind) -> bool {
        if self.peek().map_or(false, |t| t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kind(&mut self, kind: TokenKind, what: &str) -> ExprResult<()> {
        if self.eat_kind(kind) {
            Ok(())
        } else {
            self.error(format!("Expected {}", what))
        }
    }

    fn parse_or(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = Expr::binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            let right = self.parse_not()?;
            left = Expr::binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ExprResult<Expr> {
        if self.eat_keyword("NOT") {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(inner),
            });
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> ExprResult<Expr> {
        let left = self.parse_additive()?;

        if let Some(op) = self.peek().and_then(comparison_op) {
            self.pos += 1;
            let right = self.parse_additive()?;
            return Ok(Expr::binary(left, op, right));
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = if self.peek_keyword("NOT")
            && self.peek_at(1).map_or(false, |t| {
                t.is_keyword("IN") || t.is_keyword("BETWEEN") || t.is_keyword("LIKE") || t.is_keyword("ILIKE")
            }) {
            self.pos += 1;
            true
        } else {
            false
        };

        if self.eat_keyword("IN") {
            return self.parse_in(left, negated);
        }
        if self.eat_keyword("BETWEEN") {
            let low = self.parse_additive()?;
            self.expect_keyword("AND")?;
            let high = self.parse_additive()?;
            return Ok(Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }
        let case_insensitive = self.peek_keyword("ILIKE");
        if self.eat_keyword("LIKE") || self.eat_keyword("ILIKE") {
            let pattern = self.parse_additive()?;
            return Ok(Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                case_insensitive,
                negated,
            });
        }

        Ok(left)
    }

    fn parse_in(&mut self, left: Expr, negated: bool) -> ExprResult<Expr> {
        self.expect_kind(TokenKind::LParen, "'(' after IN")?;
        if self.peek_keyword("SELECT") {
            let subquery = self.parse_subquery()?;
            self.expect_kind(TokenKind::RParen, "')' closing subquery")?;
            return Ok(Expr::InSubquery {
                expr: Box::new(left),
                subquery,
                negated,
            });
        }

        let mut items = Vec::new();
        if self.peek().map_or(false, |t| t.kind == TokenKind::RParen) {
            return self.error("Empty IN list");
        }
        loop {
            items.push(self.parse_or()?);
            if !self.eat_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect_kind(TokenKind::RParen, "')' closing IN list")?;
        Ok(Expr::InList {
            expr: Box::new(left),
            items,
            negated,
        })
    }

    /// `SELECT column FROM [schema.]table [[AS] alias]`
    fn parse_subquery(&mut self) -> ExprResult<SubqueryRef> {
        self.expect_keyword("SELECT")?;
        let column = self.parse_column_ref()?;
        self.expect_keyword("FROM")?;
        let first = self.parse_identifier("table name")?;
        let table = if self.eat_kind(TokenKind::Dot) {
            let name = self.parse_identifier("table name")?;
            QualifiedName::new(Some(&first), name)
        } else {
            QualifiedName::new(None, first)
        };
        let alias = if self.eat_keyword("AS") {
            Some(self.parse_identifier("alias")?)
        } else if self.peek().map_or(false, Token::is_identifier) {
            Some(self.parse_identifier("alias")?)
        } else {
            None
        };
        Ok(SubqueryRef {
            column,
            table,
            alias,
        })
    }

    fn parse_additive(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(t) if t.is_op("+") => BinaryOp::Add,
                Some(t) if t.is_op("-") => BinaryOp::Sub,
                Some(t) if t.is_op("||") => BinaryOp::Concat,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ExprResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(t) if t.kind == TokenKind::Star => BinaryOp::Mul,
                Some(t) if t.is_op("/") => BinaryOp::Div,
                Some(t) if t.is_op("%") => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ExprResult<Expr> {
        match self.peek() {
            Some(t) if t.is_op("-") => {
                self.pos += 1;
                let inner = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(inner),
                })
            }
            Some(t) if t.is_op("+") => {
                self.pos += 1;
                self.parse_unary()
            }
            _ => {
                let expr = self.parse_primary()?;
                // Casts are accepted and ignored: `"fid"::bigint`
                if self.peek().map_or(false, |t| t.is_op("::")) {
                    self.pos += 1;
                    self.parse_identifier("cast type")?;
                }
                Ok(expr)
            }
        }
    }

    fn parse_primary(&mut self) -> ExprResult<Expr> {
        let token = match self.peek() {
            Some(t) => t,
            None => return self.error("Unexpected end of expression"),
        };

        match token.kind {
            TokenKind::Number => {
                self.pos += 1;
                parse_number(token)
            }
            TokenKind::Str => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Str(token.text.clone())))
            }
            TokenKind::LParen => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect_kind(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Word if token.is_keyword("NULL") => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Null))
            }
            TokenKind::Word if token.is_keyword("TRUE") => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::Word if token.is_keyword("FALSE") => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::Word if token.is_keyword("EXISTS") => {
                Err(ExprError::Unsupported("EXISTS subquery".to_string()))
            }
            TokenKind::Word
                if token.is_identifier()
                    && self.peek_at(1).map_or(false, |t| t.kind == TokenKind::LParen) =>
            {
                self.pos += 2;
                self.parse_call_args(token.text.clone())
            }
            TokenKind::Word | TokenKind::QuotedIdent if token.is_identifier() => {
                Ok(Expr::Column(self.parse_column_ref()?))
            }
            _ => self.error(format!("Unexpected '{}'", token.text)),
        }
    }

    fn parse_call_args(&mut self, name: String) -> ExprResult<Expr> {
        let mut args = Vec::new();
        if self.eat_kind(TokenKind::RParen) {
            return Ok(Expr::Call { name, args });
        }
        if self.eat_kind(TokenKind::Star) {
            self.expect_kind(TokenKind::RParen, "')'")?;
            return Ok(Expr::Call { name, args });
        }
        loop {
            args.push(self.parse_or()?);
            if !self.eat_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect_kind(TokenKind::RParen, "')' closing arguments")?;
        Ok(Expr::Call { name, args })
    }

    fn parse_column_ref(&mut self) -> ExprResult<ColumnRef> {
        let mut quoted = self.peek().map_or(false, |t| t.kind == TokenKind::QuotedIdent);
        let mut parts = vec![self.parse_identifier("column")?];
        while self.eat_kind(TokenKind::Dot) {
            quoted = self.peek().map_or(false, |t| t.kind == TokenKind::QuotedIdent);
            parts.push(self.parse_identifier("column")?);
        }
        Ok(ColumnRef { parts, quoted })
    }

    fn parse_identifier(&mut self, what: &str) -> ExprResult<String> {
        match self.peek() {
            Some(t) if t.is_identifier() => {
                self.pos += 1;
                Ok(t.text.clone())
            }
            _ => self.error(format!("Expected {}", what)),
        }
    }
}

fn comparison_op(token: &Token) -> Option<BinaryOp> {
    if token.kind != TokenKind::Op {
        return None;
    }
    match token.text.as_str() {
        "=" | "==" => Some(BinaryOp::Eq),
        "<>" | "!=" => Some(BinaryOp::NotEq),
        "<" => Some(BinaryOp::Lt),
        "<=" => Some(BinaryOp::Lte),
        ">" => Some(BinaryOp::Gt),
        ">=" => Some(BinaryOp::Gte),
        _ => None,
    }
}

fn parse_number(token: &Token) -> ExprResult<Expr> {
    let text = token.text.as_str();
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Expr::Literal(Literal::Int(v)));
        }
    }
    text.parse::<f64>()
        .map(|v| Expr::Literal(Literal::Float(v)))
        .map_err(|_| ExprError::parse(format!("Invalid number '{}'", text), token.start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precedence() {
        let expr = parse_expression("a = 1 OR b = 2 AND c = 3").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Or, right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::And, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_in_list() {
        let expr = parse_expression(r#""fid" IN (1, 2, -3)"#).unwrap();
        match expr {
            Expr::InList { items, negated, .. } => {
                assert!(!negated);
                let ids: Vec<i64> = items.iter().filter_map(Expr::as_int_literal).collect();
                assert_eq!(ids, vec![1, 2, -3]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_not_in_and_between() {
        assert!(matches!(
            parse_expression("x NOT IN (1)").unwrap(),
            Expr::InList { negated: true, .. }
        ));
        assert!(matches!(
            parse_expression("x NOT BETWEEN 1 AND 5").unwrap(),
            Expr::Between { negated: true, .. }
        ));
    }

    #[test]
    fn test_parse_subquery() {
        let expr =
            parse_expression(r#""fid" IN (SELECT "key" FROM "filteropt_temp"."mv_1" AS m)"#).unwrap();
        match expr {
            Expr::InSubquery { subquery, .. } => {
                assert_eq!(subquery.column.name(), "key");
                assert_eq!(subquery.table.schema.as_deref(), Some("filteropt_temp"));
                assert_eq!(subquery.table.name, "mv_1");
                assert_eq!(subquery.alias.as_deref(), Some("m"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_call_and_like() {
        let expr = parse_expression("lower(name) LIKE 'main%'").unwrap();
        match expr {
            Expr::Like { expr, case_insensitive, .. } => {
                assert!(!case_insensitive);
                assert!(matches!(*expr, Expr::Call { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_is_not_null() {
        assert!(matches!(
            parse_expression("name IS NOT NULL").unwrap(),
            Expr::IsNull { negated: true, .. }
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expression("").unwrap_err().is_syntax());
        assert!(parse_expression("a = ").unwrap_err().is_syntax());
        assert!(parse_expression("a = 1 b").unwrap_err().is_syntax());
        assert!(parse_expression("x IN ()").unwrap_err().is_syntax());
        assert!(matches!(
            parse_expression("EXISTS (SELECT 1 FROM t)"),
            Err(ExprError::Unsupported(_))
        ));
    }

    #[test]
    fn test_cast_is_ignored() {
        let expr = parse_expression(r#""fid"::bigint = 4"#).unwrap();
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Eq, .. }));
    }
}
