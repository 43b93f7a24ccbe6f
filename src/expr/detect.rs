//! Detection of reusable structure in existing filter expressions
//!
//! Detection distinguishes three outcomes: the text does not have the
//! shape at all, the text has the shape and was extracted, or the text
//! starts like the shape but cannot be read. Only the last is a missed
//! optimization worth reporting.

use super::ast::{BinaryOp, Expr, QualifiedName, SubqueryRef};
use super::ids::{IdRange, IdSetRef};
use super::lexer::{matching_paren, quote_ident, strip_outer_parens, tokenize, Token, TokenKind};
use super::parser::parse_tokens;

/// Outcome of a pattern detector
#[derive(Debug, Clone, PartialEq)]
pub enum Detection<T> {
    NoMatch,
    Matched(T),
    /// The pattern start was recognized but the rest could not be read
    Malformed(String),
}

impl<T> Detection<T> {
    pub fn matched(self) -> Option<T> {
        match self {
            Detection::Matched(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Detection::Malformed(_))
    }
}

/// Id predicate found in an expression
#[derive(Debug, Clone, PartialEq)]
pub enum IdPredicate {
    /// Literal ids: equality, IN list, BETWEEN, bounds, unions and exclusions
    Ids { column: String, ids: IdSetRef },
    /// `col IN (SELECT key FROM result)` over a previously materialized result
    Subquery { column: String, source: SubqueryRef },
}

impl IdPredicate {
    pub fn column(&self) -> &str {
        match self {
            IdPredicate::Ids { column, .. } | IdPredicate::Subquery { column, .. } => column,
        }
    }
}

/// Detect an expression that is purely an id predicate over `id_column`
pub fn detect_id_predicate(expr: &str, id_column: &str) -> Detection<IdPredicate> {
    let text = strip_outer_parens(expr);
    if text.is_empty() {
        return Detection::NoMatch;
    }

    let tokens = match tokenize(text) {
        Ok(tokens) => tokens,
        Err(e) => {
            return if starts_with_column(text, id_column) {
                Detection::Malformed(e.to_string())
            } else {
                Detection::NoMatch
            }
        }
    };

    if !id_pattern_start(&tokens, id_column) {
        return Detection::NoMatch;
    }

    let ast = match parse_tokens(&tokens, text.len()) {
        Ok(ast) => ast,
        Err(e) => return Detection::Malformed(e.to_string()),
    };

    match id_form(&ast, id_column) {
        Ok(Some(IdForm::Set { ranges, exclusions })) => Detection::Matched(IdPredicate::Ids {
            column: id_column.to_string(),
            ids: IdSetRef::from_ranges(ranges, exclusions),
        }),
        Ok(Some(IdForm::Subquery(source))) => Detection::Matched(IdPredicate::Subquery {
            column: id_column.to_string(),
            source,
        }),
        Ok(_) => Detection::NoMatch,
        Err(message) => Detection::Malformed(message),
    }
}

/// Raw prefix check used when the text does not tokenize
fn starts_with_column(text: &str, column: &str) -> bool {
    let body = text.trim_start_matches(|c: char| c == '(' || c.is_whitespace());
    let quoted = quote_ident(column);
    if body.starts_with(&quoted) {
        return true;
    }
    let (head, rest) = match (body.get(..column.len()), body.get(column.len()..)) {
        (Some(head), Some(rest)) => (head, rest),
        _ => return false,
    };
    head.eq_ignore_ascii_case(column)
        && rest
            .chars()
            .next()
            .map_or(false, |c| !c.is_alphanumeric() && c != '_')
}

/// Leading `[(]* col [.col]* (IN | BETWEEN | = | >= | >)`
fn id_pattern_start(tokens: &[Token], id_column: &str) -> bool {
    let mut i = 0;
    while tokens.get(i).map_or(false, |t| t.kind == TokenKind::LParen) {
        i += 1;
    }
    let mut last = None;
    while let Some(t) = tokens.get(i) {
        if !t.is_identifier() {
            break;
        }
        last = Some(t);
        i += 1;
        if tokens.get(i).map_or(false, |t| t.kind == TokenKind::Dot) {
            i += 1;
        } else {
            break;
        }
    }
    let column_matches = last.map_or(false, |t| match t.kind {
        TokenKind::QuotedIdent => t.text == id_column,
        _ => t.text.eq_ignore_ascii_case(id_column),
    });
    if !column_matches {
        return false;
    }
    match tokens.get(i) {
        Some(t) if t.is_keyword("IN") || t.is_keyword("BETWEEN") => true,
        Some(t) => t.kind == TokenKind::Op && matches!(t.text.as_str(), "=" | "==" | ">=" | ">"),
        None => false,
    }
}

enum IdForm {
    Set {
        ranges: Vec<IdRange>,
        exclusions: Vec<i64>,
    },
    Lower(i64),
    Upper(i64),
    Exclude(Vec<i64>),
    Subquery(SubqueryRef),
}

fn is_id(expr: &Expr, id_column: &str) -> bool {
    expr.as_column().map_or(false, |c| c.names(id_column))
}

fn int_items(items: &[Expr]) -> Result<Option<Vec<i64>>, String> {
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        match item.as_int_literal() {
            Some(v) => ids.push(v),
            None if matches!(item, Expr::Literal(_)) => {
                return Err(format!("non-integer id {}", item))
            }
            None => return Ok(None),
        }
    }
    Ok(Some(ids))
}

/// Reduce an AST to an id form; Ok(None) when it is not purely about ids
fn id_form(expr: &Expr, id_column: &str) -> Result<Option<IdForm>, String> {
    match expr {
        Expr::Binary { left, op, right } if op.is_comparison() => {
            let (value, op) = if is_id(left, id_column) {
                (right.as_ref(), *op)
            } else if is_id(right, id_column) {
                (left.as_ref(), mirror(*op))
            } else {
                return Ok(None);
            };
            let v = match value.as_int_literal() {
                Some(v) => v,
                None if matches!(value, Expr::Literal(_)) => {
                    return Err(format!("non-integer id {}", value))
                }
                None => return Ok(None),
            };
            Ok(match op {
                BinaryOp::Eq => Some(IdForm::Set {
                    ranges: vec![IdRange::single(v)],
                    exclusions: Vec::new(),
                }),
                BinaryOp::Gte => Some(IdForm::Lower(v)),
                BinaryOp::Gt => v.checked_add(1).map(IdForm::Lower),
                BinaryOp::Lte => Some(IdForm::Upper(v)),
                BinaryOp::Lt => v.checked_sub(1).map(IdForm::Upper),
                BinaryOp::NotEq => Some(IdForm::Exclude(vec![v])),
                _ => None,
            })
        }
        Expr::InList {
            expr,
            items,
            negated,
        } if is_id(expr, id_column) => Ok(int_items(items)?.map(|ids| {
            if *negated {
                IdForm::Exclude(ids)
            } else {
                IdForm::Set {
                    ranges: ids.into_iter().map(IdRange::single).collect(),
                    exclusions: Vec::new(),
                }
            }
        })),
        Expr::InSubquery {
            expr,
            subquery,
            negated: false,
        } if is_id(expr, id_column) => Ok(Some(IdForm::Subquery(subquery.clone()))),
        Expr::Between {
            expr,
            low,
            high,
            negated: false,
        } if is_id(expr, id_column) => match (low.as_int_literal(), high.as_int_literal()) {
            (Some(lo), Some(hi)) if lo <= hi => Ok(Some(IdForm::Set {
                ranges: vec![IdRange::new(lo, hi)],
                exclusions: Vec::new(),
            })),
            (Some(lo), Some(hi)) => Err(format!("inverted id range {}..{}", lo, hi)),
            _ => Err("non-integer id range bound".to_string()),
        },
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            let (l, r) = match (id_form(left, id_column)?, id_form(right, id_column)?) {
                (Some(l), Some(r)) => (l, r),
                _ => return Ok(None),
            };
            combine_and(l, r)
        }
        Expr::Binary {
            left,
            op: BinaryOp::Or,
            right,
        } => {
            let (l, r) = match (id_form(left, id_column)?, id_form(right, id_column)?) {
                (Some(l), Some(r)) => (l, r),
                _ => return Ok(None),
            };
            Ok(combine_or(l, r))
        }
        _ => Ok(None),
    }
}

fn mirror(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Lte => BinaryOp::Gte,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Gte => BinaryOp::Lte,
        other => other,
    }
}

fn combine_and(l: IdForm, r: IdForm) -> Result<Option<IdForm>, String> {
    match (l, r) {
        (IdForm::Lower(lo), IdForm::Upper(hi)) | (IdForm::Upper(hi), IdForm::Lower(lo)) => {
            if lo > hi {
                return Err(format!("inverted id range {}..{}", lo, hi));
            }
            Ok(Some(IdForm::Set {
                ranges: vec![IdRange::new(lo, hi)],
                exclusions: Vec::new(),
            }))
        }
        (IdForm::Set { ranges, mut exclusions }, IdForm::Exclude(more))
        | (IdForm::Exclude(more), IdForm::Set { ranges, mut exclusions }) => {
            exclusions.extend(more);
            Ok(Some(IdForm::Set { ranges, exclusions }))
        }
        (IdForm::Exclude(mut a), IdForm::Exclude(b)) => {
            a.extend(b);
            Ok(Some(IdForm::Exclude(a)))
        }
        _ => Ok(None),
    }
}

fn combine_or(l: IdForm, r: IdForm) -> Option<IdForm> {
    match (l, r) {
        (
            IdForm::Set {
                ranges: lr,
                exclusions: le,
            },
            IdForm::Set {
                ranges: rr,
                exclusions: re,
            },
        ) => {
            let left = IdSetRef::from_ranges(lr.clone(), le.clone());
            let right = IdSetRef::from_ranges(rr.clone(), re.clone());
            // An id excluded on one side stays in the union if the other side has it
            let mut exclusions: Vec<i64> = le.into_iter().filter(|id| !right.contains(*id)).collect();
            exclusions.extend(re.into_iter().filter(|id| !left.contains(*id)));
            let mut ranges = lr;
            ranges.extend(rr);
            Some(IdForm::Set { ranges, exclusions })
        }
        _ => None,
    }
}

/// Top-level shape of a spatial clause
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialClauseKind {
    /// `[NOT] EXISTS (SELECT ... FROM source [alias] WHERE <body>)`
    Exists {
        source: QualifiedName,
        alias: Option<String>,
    },
    /// A bare spatial function call such as `ST_Intersects(a, b)`
    Call,
}

/// Spatial predicate found in an expression
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialClause {
    pub kind: SpatialClauseKind,
    pub negated: bool,
    /// Lower-cased name of the first spatial function in the predicate body
    pub function: String,
    text: String,
    tokens: Vec<Token>,
    /// Token index range of the predicate body
    body: (usize, usize),
}

impl SpatialClause {
    /// The clause text as detected, outer parentheses removed
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The predicate body: the EXISTS WHERE clause or the whole call
    pub fn body_text(&self) -> &str {
        let (first, last) = self.body;
        &self.text[self.tokens[first].start..self.tokens[last].end]
    }

    /// Rewrite the body so columns qualified by `table` use `alias` instead.
    ///
    /// Returns None when the body never references `table`.
    pub fn rebind_body(&self, table: &str, alias: &str) -> Option<String> {
        let (first, last) = self.body;
        let base = self.tokens[first].start;
        let body = self.body_text();
        let mut out = String::with_capacity(body.len() + 16);
        let mut copied = base;
        let mut replaced = false;
        let mut i = first;

        while i <= last {
            let chain = column_chain(&self.tokens[..=last], i);
            if chain.len() >= 2 {
                let qualifier = &self.tokens[chain[chain.len() - 2]];
                if qualifier.text.eq_ignore_ascii_case(table) {
                    let start = self.tokens[chain[0]].start;
                    let end_token = &self.tokens[chain[chain.len() - 1]];
                    out.push_str(&self.text[copied..start]);
                    out.push_str(alias);
                    out.push('.');
                    out.push_str(&quote_ident(&end_token.text));
                    copied = end_token.end;
                    replaced = true;
                }
                i = chain[chain.len() - 1] + 1;
            } else {
                i += 1;
            }
        }

        if !replaced {
            return None;
        }
        out.push_str(&self.text[copied..self.tokens[last].end]);
        Some(out)
    }
}

/// Token indexes of an `ident(.ident)*` chain starting at `start`
fn column_chain(tokens: &[Token], start: usize) -> Vec<usize> {
    let mut chain = Vec::new();
    let mut i = start;
    if start > 0 && tokens[start - 1].kind == TokenKind::Dot {
        return chain;
    }
    while let Some(t) = tokens.get(i) {
        if !t.is_identifier() {
            break;
        }
        chain.push(i);
        if tokens.get(i + 1).map_or(false, |t| t.kind == TokenKind::Dot) {
            i += 2;
        } else {
            break;
        }
    }
    chain
}

const SPATIAL_FUNCTIONS: &[&str] = &[
    "st_intersects",
    "st_contains",
    "st_within",
    "st_touches",
    "st_overlaps",
    "st_crosses",
    "st_disjoint",
    "st_equals",
    "st_dwithin",
    "st_covers",
    "st_coveredby",
    "intersects",
    "contains",
    "within",
    "touches",
    "overlaps",
    "crosses",
    "disjoint",
    "equals",
    "bbox",
    "intersects_bbox",
    "mbrintersects",
    "mbrcontains",
    "mbrwithin",
    "mbroverlaps",
];

/// True if `name` is a known spatial predicate function in any dialect
pub fn is_spatial_function(name: &str) -> bool {
    SPATIAL_FUNCTIONS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

/// First spatial function call within the token range
fn first_spatial_call(tokens: &[Token], first: usize, last: usize) -> Option<String> {
    (first..last).find_map(|i| {
        let t = &tokens[i];
        let is_call = t.kind == TokenKind::Word
            && tokens.get(i + 1).map_or(false, |n| n.kind == TokenKind::LParen)
            && is_spatial_function(&t.text);
        is_call.then(|| t.text.to_ascii_lowercase())
    })
}

/// True if the expression contains a spatial function call anywhere
pub fn contains_spatial_call(expr: &str) -> bool {
    match tokenize(expr) {
        Ok(tokens) if !tokens.is_empty() => first_spatial_call(&tokens, 0, tokens.len()).is_some(),
        _ => false,
    }
}

/// Detect a spatial existence check or spatial function call
pub fn detect_spatial_predicate(expr: &str) -> Detection<SpatialClause> {
    let text = strip_outer_parens(expr);
    let tokens = match tokenize(text) {
        Ok(tokens) if !tokens.is_empty() => tokens,
        Ok(_) => return Detection::NoMatch,
        Err(e) => {
            let lowered = text.to_ascii_lowercase();
            return if lowered.contains("exists") || SPATIAL_FUNCTIONS.iter().any(|f| lowered.contains(f)) {
                Detection::Malformed(e.to_string())
            } else {
                Detection::NoMatch
            };
        }
    };

    let mut i = 0;
    let negated = tokens[0].is_keyword("NOT");
    if negated {
        i = 1;
    }
    let last = tokens.len() - 1;

    if tokens.get(i).map_or(false, |t| t.is_keyword("EXISTS")) {
        return detect_exists(text, tokens, i, negated);
    }

    let function = tokens
        .get(i)
        .filter(|t| {
            t.kind == TokenKind::Word
                && is_spatial_function(&t.text)
                && tokens.get(i + 1).map_or(false, |n| n.kind == TokenKind::LParen)
        })
        .map(|t| t.text.to_ascii_lowercase());
    match function {
        Some(function) if matching_paren(&tokens, i + 1) == Some(last) => {
            Detection::Matched(SpatialClause {
                kind: SpatialClauseKind::Call,
                negated,
                function,
                text: text.to_string(),
                tokens,
                body: (i, last),
            })
        }
        _ => Detection::NoMatch,
    }
}

fn detect_exists(text: &str, tokens: Vec<Token>, exists_at: usize, negated: bool) -> Detection<SpatialClause> {
    let last = tokens.len() - 1;
    let open = exists_at + 1;
    if tokens.get(open).map_or(true, |t| t.kind != TokenKind::LParen) {
        return Detection::Malformed("EXISTS without subquery".to_string());
    }
    match matching_paren(&tokens, open) {
        Some(close) if close == last => {}
        Some(_) => return Detection::NoMatch,
        None => return Detection::Malformed("unbalanced EXISTS subquery".to_string()),
    }
    if !tokens[open + 1].is_keyword("SELECT") {
        return Detection::Malformed("EXISTS subquery without SELECT".to_string());
    }

    let mut depth = 0usize;
    let mut from_at = None;
    for (idx, t) in tokens.iter().enumerate().take(last).skip(open + 2) {
        match t.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 && t.is_keyword("FROM") => {
                from_at = Some(idx);
                break;
            }
            _ => {}
        }
    }
    let from_at = match from_at {
        Some(idx) => idx,
        None => return Detection::Malformed("EXISTS subquery without FROM".to_string()),
    };

    let mut i = from_at + 1;
    let first_name = match tokens.get(i) {
        Some(t) if t.is_identifier() => t.text.clone(),
        _ => return Detection::Malformed("missing source table".to_string()),
    };
    i += 1;
    let source = if tokens.get(i).map_or(false, |t| t.kind == TokenKind::Dot) {
        match tokens.get(i + 1) {
            Some(t) if t.is_identifier() => {
                i += 2;
                QualifiedName::new(Some(&first_name), t.text.clone())
            }
            _ => return Detection::Malformed("incomplete source table name".to_string()),
        }
    } else {
        QualifiedName::new(None, first_name)
    };

    if tokens.get(i).map_or(false, |t| t.is_keyword("AS")) {
        i += 1;
    }
    let alias = match tokens.get(i) {
        Some(t) if t.is_identifier() => {
            i += 1;
            Some(t.text.clone())
        }
        _ => None,
    };

    if !tokens.get(i).map_or(false, |t| t.is_keyword("WHERE")) || i + 1 >= last {
        return Detection::Malformed("EXISTS subquery without WHERE predicate".to_string());
    }
    let body = (i + 1, last - 1);

    let function = match first_spatial_call(&tokens, body.0, body.1 + 1) {
        Some(f) => f,
        None => return Detection::NoMatch,
    };

    Detection::Matched(SpatialClause {
        kind: SpatialClauseKind::Exists { source, alias },
        negated,
        function,
        text: text.to_string(),
        tokens,
        body,
    })
}
