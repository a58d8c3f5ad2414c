//! SQL front end: lexing, parsing, evaluation, and execution (spec §4).

pub mod ast;
pub mod evaluator;
pub mod executor;
pub mod functions;
pub mod join;
pub mod lexer;
pub mod parser;
pub mod token;

use crate::error::Result;
use ast::Statement;
use lexer::Lexer;
use parser::Parser;

/// Parses a (possibly multi-statement, semicolon-separated) SQL string into
/// a sequence of statements.
pub fn parse_sql(input: &str) -> Result<Vec<Statement>> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser::new(tokens);
    let mut statements = Vec::new();
    while !parser.is_at_eof() {
        statements.push(parser.parse()?);
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multiple_statements() {
        let stmts = parse_sql("SELECT 1; SELECT 2;").unwrap();
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn test_parse_single_statement_no_trailing_semicolon() {
        let stmts = parse_sql("SELECT * FROM t").unwrap();
        assert_eq!(stmts.len(), 1);
    }
}
