//! Filter expression handling
//!
//! A restricted-grammar reader for the SQL-like expressions the backends
//! accept. It covers what the optimizer needs to recognize and nothing more:
//!
//! - tokenizing with byte spans so rewrites splice original text
//! - attribute expressions, parsed and evaluated over sample rows
//! - id predicates (lists, ranges, exclusions, materialized subqueries)
//! - spatial existence checks and spatial function calls
//!
//! Detectors return [`Detection`], keeping "not this shape" apart from
//! "this shape, but unreadable".

mod ast;
mod detect;
mod dialect;
mod errors;
mod eval;
mod ids;
mod lexer;
mod parser;

pub use ast::{BinaryOp, ColumnRef, Expr, Literal, QualifiedName, SubqueryRef, UnaryOp};
pub use detect::{
    contains_spatial_call, detect_id_predicate, detect_spatial_predicate, is_spatial_function,
    Detection, IdPredicate, SpatialClause, SpatialClauseKind,
};
pub use dialect::{classify_expression, ExpressionDialect};
pub use errors::{ExprError, ExprResult};
pub use eval::{eval_constant, Evaluator, FunctionResolver, NoFunctions};
pub use ids::{IdRange, IdSetRef, RangeSyntax};
pub use lexer::{
    quote_ident, quote_literal, split_conjuncts, strip_outer_parens, tokenize, LexError, Token,
    TokenKind,
};
pub use parser::parse_expression;
