//! Recursive-descent parser: tokens to AST (spec §4.2).

use super::ast::*;
use super::token::{Token, TokenType};
use crate::error::{Error, Result};
use crate::types::Value;

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, position: 0 }
    }

    pub fn is_at_eof(&self) -> bool {
        matches!(self.current().token_type, TokenType::Eof)
    }

    pub fn parse(&mut self) -> Result<Statement> {
        let stmt = match &self.current().token_type {
            TokenType::With => Statement::Select(self.parse_select_with_ctes()?),
            TokenType::Select => Statement::Select(self.parse_select_chain()?),
            TokenType::Insert => Statement::Insert(self.parse_insert()?),
            TokenType::Update => Statement::Update(self.parse_update()?),
            TokenType::Delete => Statement::Delete(self.parse_delete()?),
            TokenType::Create => self.parse_create()?,
            TokenType::Drop => self.parse_drop()?,
            TokenType::Show => self.parse_show()?,
            TokenType::Describe => self.parse_describe()?,
            TokenType::Begin => self.parse_begin()?,
            TokenType::Commit => {
                self.advance();
                Statement::Commit
            }
            TokenType::Rollback => self.parse_rollback()?,
            TokenType::Savepoint => {
                self.advance();
                Statement::Savepoint(self.parse_identifier()?)
            }
            TokenType::Release => {
                self.advance();
                self.match_token(TokenType::Savepoint);
                Statement::ReleaseSavepoint(self.parse_identifier()?)
            }
            _ => return Err(self.error("expected a SQL statement")),
        };

        if matches!(self.current().token_type, TokenType::Semicolon) {
            self.advance();
        }
        Ok(stmt)
    }

    fn parse_begin(&mut self) -> Result<Statement> {
        self.advance();
        self.match_token(TokenType::Transaction);
        let hint = if self.current_is_identifier_ci("isolation") {
            self.advance();
            if self.current_is_identifier_ci("level") {
                self.advance();
            }
            let first = self.parse_raw_word()?.to_ascii_uppercase();
            let hint = match first.as_str() {
                "READ" => {
                    let second = self.parse_raw_word()?.to_ascii_uppercase();
                    match second.as_str() {
                        "COMMITTED" => IsolationLevelHint::ReadCommitted,
                        other => return Err(self.error(&format!("unknown isolation level 'READ {other}'"))),
                    }
                }
                "REPEATABLE" => {
                    let second = self.parse_raw_word()?.to_ascii_uppercase();
                    match second.as_str() {
                        "READ" => IsolationLevelHint::RepeatableRead,
                        other => return Err(self.error(&format!("unknown isolation level 'REPEATABLE {other}'"))),
                    }
                }
                "SNAPSHOT" => IsolationLevelHint::SnapshotIsolation,
                "SERIALIZABLE" => IsolationLevelHint::Serializable,
                other => return Err(self.error(&format!("unknown isolation level '{other}'"))),
            };
            Some(hint)
        } else {
            None
        };
        Ok(Statement::Begin(hint))
    }

    /// Reads a bare word that the lexer did not recognize as a keyword
    /// (e.g. `READ`, `COMMITTED`) as an identifier.
    fn parse_raw_word(&mut self) -> Result<String> {
        match self.current().token_type.clone() {
            TokenType::Identifier(s) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.error(&format!("expected a word, found {other:?}"))),
        }
    }

    fn parse_rollback(&mut self) -> Result<Statement> {
        self.advance();
        if self.match_token(TokenType::To) {
            self.match_token(TokenType::Savepoint);
            Ok(Statement::RollbackToSavepoint(self.parse_identifier()?))
        } else {
            Ok(Statement::Rollback)
        }
    }

    fn current_is_identifier_ci(&self, word: &str) -> bool {
        matches!(&self.current().token_type, TokenType::Identifier(s) if s.eq_ignore_ascii_case(word))
    }

    // ---- SELECT / CTEs / set operations ----

    fn parse_select_with_ctes(&mut self) -> Result<SelectStmt> {
        self.expect(TokenType::With)?;
        let recursive = self.match_token(TokenType::Recursive);
        let mut ctes = Vec::new();
        loop {
            let name = self.parse_identifier()?;
            let columns = if matches!(self.current().token_type, TokenType::LParen) {
                self.advance();
                let cols = self.parse_column_list()?;
                self.expect(TokenType::RParen)?;
                Some(cols)
            } else {
                None
            };
            self.expect(TokenType::As)?;
            self.expect(TokenType::LParen)?;
            let query = self.parse_select_chain()?;
            self.expect(TokenType::RParen)?;
            ctes.push(CteDef {
                name,
                columns,
                query: Box::new(query),
                recursive,
            });
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        let mut stmt = self.parse_select_chain()?;
        stmt.ctes = ctes;
        Ok(stmt)
    }

    /// Parses a SELECT followed by any number of `UNION`/`INTERSECT`/`EXCEPT`
    /// arms. Each arm is stored as `(op, rhs)` on the preceding arm, so the
    /// chain associates left-to-right when evaluated.
    fn parse_select_chain(&mut self) -> Result<SelectStmt> {
        let mut arms = vec![self.parse_select_core()?];
        let mut ops = Vec::new();
        loop {
            let set_op = match &self.current().token_type {
                TokenType::Union => {
                    self.advance();
                    if self.match_token(TokenType::All) {
                        SetOp::UnionAll
                    } else {
                        self.match_token(TokenType::Distinct);
                        SetOp::Union
                    }
                }
                TokenType::Intersect => {
                    self.advance();
                    self.match_token(TokenType::Distinct);
                    SetOp::Intersect
                }
                TokenType::Except => {
                    self.advance();
                    self.match_token(TokenType::Distinct);
                    SetOp::Except
                }
                _ => break,
            };
            ops.push(set_op);
            arms.push(self.parse_select_core()?);
        }
        // Fold right-to-left so the outermost `SelectStmt` is the first arm
        // and `set_op` chains forward through the rest.
        let mut stmt = arms.pop().expect("at least one arm");
        while let Some(mut prev) = arms.pop() {
            let op = ops.pop().expect("one op per fold");
            prev.set_op = Some((op, Box::new(stmt)));
            stmt = prev;
        }
        Ok(stmt)
    }

    fn parse_select_core(&mut self) -> Result<SelectStmt> {
        self.expect(TokenType::Select)?;

        let distinct = if self.match_token(TokenType::Distinct) {
            if self.match_token(TokenType::On) {
                self.expect(TokenType::LParen)?;
                let mut exprs = Vec::new();
                loop {
                    exprs.push(self.parse_expr(0)?);
                    if !self.match_token(TokenType::Comma) {
                        break;
                    }
                }
                self.expect(TokenType::RParen)?;
                Distinct::On(exprs)
            } else {
                Distinct::All
            }
        } else {
            Distinct::None
        };

        let columns = self.parse_select_columns()?;

        let from = if self.match_token(TokenType::From) {
            Some(self.parse_table_ref()?)
        } else {
            None
        };

        let where_clause = if self.match_token(TokenType::Where) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        let group_by = if self.match_token(TokenType::Group) {
            self.expect(TokenType::By)?;
            let mut exprs = Vec::new();
            loop {
                exprs.push(self.parse_expr(0)?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            Some(exprs)
        } else {
            None
        };

        let having = if self.match_token(TokenType::Having) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };

        let mut window_defs = Vec::new();
        if self.match_token(TokenType::Window) {
            loop {
                let name = self.parse_identifier()?;
                self.expect(TokenType::As)?;
                self.expect(TokenType::LParen)?;
                let (partition_by, order_by, frame) = self.parse_window_spec_body()?;
                self.expect(TokenType::RParen)?;
                window_defs.push(NamedWindow { name, partition_by, order_by, frame });
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }

        let order_by = if self.match_token(TokenType::Order) {
            self.expect(TokenType::By)?;
            Some(self.parse_order_by()?)
        } else {
            None
        };

        let limit = if self.match_token(TokenType::Limit) {
            Some(self.parse_usize()?)
        } else {
            None
        };

        let offset = if self.match_token(TokenType::Offset) {
            Some(self.parse_usize()?)
        } else {
            None
        };

        Ok(SelectStmt {
            ctes: Vec::new(),
            distinct,
            columns,
            from,
            where_clause,
            group_by,
            having,
            window_defs,
            order_by,
            limit,
            offset,
            set_op: None,
        })
    }

    fn parse_column_list(&mut self) -> Result<Vec<String>> {
        let mut columns = Vec::new();
        loop {
            columns.push(self.parse_identifier()?);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(columns)
    }

    fn parse_select_columns(&mut self) -> Result<Vec<SelectColumn>> {
        let mut columns = Vec::new();
        loop {
            if matches!(self.current().token_type, TokenType::Star) {
                self.advance();
                columns.push(SelectColumn::Star);
            } else if let (TokenType::Identifier(name), TokenType::Dot) =
                (self.current().token_type.clone(), self.peek_type(1))
            {
                if matches!(self.peek_type(2), TokenType::Star) {
                    self.advance();
                    self.advance();
                    self.advance();
                    columns.push(SelectColumn::QualifiedStar(name));
                } else {
                    let expr = self.parse_expr(0)?;
                    let alias = self.parse_optional_alias()?;
                    columns.push(SelectColumn::Expr(expr, alias));
                }
            } else {
                let expr = self.parse_expr(0)?;
                let alias = self.parse_optional_alias()?;
                if let (Expr::Column(name), None) = (&expr, &alias) {
                    columns.push(SelectColumn::Column(name.clone()));
                } else {
                    columns.push(SelectColumn::Expr(expr, alias));
                }
            }
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        if columns.is_empty() {
            return Err(self.error("expected at least one column in SELECT"));
        }
        Ok(columns)
    }

    fn parse_optional_alias(&mut self) -> Result<Option<String>> {
        if self.match_token(TokenType::As) {
            Ok(Some(self.parse_identifier()?))
        } else if let TokenType::Identifier(name) = &self.current().token_type {
            let name = name.clone();
            self.advance();
            Ok(Some(name))
        } else {
            Ok(None)
        }
    }

    fn parse_order_by(&mut self) -> Result<Vec<OrderByExpr>> {
        let mut order_by = Vec::new();
        loop {
            let expr = self.parse_expr(0)?;
            let asc = if self.match_token(TokenType::Desc) {
                false
            } else {
                self.match_token(TokenType::Asc);
                true
            };
            let nulls_first = if self.match_token(TokenType::Nulls) {
                if self.match_token(TokenType::First) {
                    Some(true)
                } else {
                    self.expect(TokenType::Last)?;
                    Some(false)
                }
            } else {
                None
            };
            order_by.push(OrderByExpr { expr, asc, nulls_first });
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(order_by)
    }

    fn parse_table_ref(&mut self) -> Result<TableRef> {
        let mut left = self.parse_single_table()?;
        loop {
            let join_type = match &self.current().token_type {
                TokenType::Join => {
                    self.advance();
                    JoinType::Inner
                }
                TokenType::Inner if matches!(self.peek_type(1), TokenType::Join) => {
                    self.advance();
                    self.advance();
                    JoinType::Inner
                }
                TokenType::Left => {
                    self.advance();
                    self.match_token(TokenType::Outer);
                    self.expect(TokenType::Join)?;
                    JoinType::Left
                }
                TokenType::Right => {
                    self.advance();
                    self.match_token(TokenType::Outer);
                    self.expect(TokenType::Join)?;
                    JoinType::Right
                }
                TokenType::Full => {
                    self.advance();
                    self.match_token(TokenType::Outer);
                    self.expect(TokenType::Join)?;
                    JoinType::Full
                }
                TokenType::Cross => {
                    self.advance();
                    self.expect(TokenType::Join)?;
                    JoinType::Cross
                }
                _ => break,
            };
            let right = self.parse_single_table()?;
            let on_condition = if join_type != JoinType::Cross {
                self.expect(TokenType::On)?;
                Some(self.parse_expr(0)?)
            } else {
                None
            };
            left = TableRef::Join {
                left: Box::new(left),
                right: Box::new(right),
                join_type,
                on_condition,
            };
        }
        Ok(left)
    }

    fn parse_single_table(&mut self) -> Result<TableRef> {
        if matches!(self.current().token_type, TokenType::LParen) {
            self.advance();
            let query = self.parse_select_chain()?;
            self.expect(TokenType::RParen)?;
            self.match_token(TokenType::As);
            let alias = self.parse_identifier()?;
            return Ok(TableRef::Subquery { query: Box::new(query), alias });
        }
        let name = self.parse_identifier()?;
        let alias = if self.match_token(TokenType::As) {
            Some(self.parse_identifier()?)
        } else if let TokenType::Identifier(a) = &self.current().token_type {
            if TokenType::from_keyword(a).is_none() {
                let a = a.clone();
                self.advance();
                Some(a)
            } else {
                None
            }
        } else {
            None
        };
        Ok(TableRef::Table { name, alias })
    }

    // ---- INSERT / UPDATE / DELETE ----

    fn parse_insert(&mut self) -> Result<InsertStmt> {
        self.expect(TokenType::Insert)?;
        self.expect(TokenType::Into)?;
        let table = self.parse_identifier()?;
        let columns = if matches!(self.current().token_type, TokenType::LParen) {
            self.advance();
            let cols = self.parse_column_list()?;
            self.expect(TokenType::RParen)?;
            Some(cols)
        } else {
            None
        };
        self.expect(TokenType::Values)?;
        let mut values = Vec::new();
        loop {
            self.expect(TokenType::LParen)?;
            let mut row = Vec::new();
            loop {
                row.push(self.parse_expr(0)?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
            self.expect(TokenType::RParen)?;
            values.push(row);
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        Ok(InsertStmt { table, columns, values })
    }

    fn parse_update(&mut self) -> Result<UpdateStmt> {
        self.expect(TokenType::Update)?;
        let table = self.parse_identifier()?;
        self.expect(TokenType::Set)?;
        let mut assignments = Vec::new();
        loop {
            let col = self.parse_identifier()?;
            self.expect(TokenType::Eq)?;
            let expr = self.parse_expr(0)?;
            assignments.push((col, expr));
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        let where_clause = if self.match_token(TokenType::Where) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };
        Ok(UpdateStmt { table, assignments, where_clause })
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt> {
        self.expect(TokenType::Delete)?;
        self.expect(TokenType::From)?;
        let table = self.parse_identifier()?;
        let where_clause = if self.match_token(TokenType::Where) {
            Some(self.parse_expr(0)?)
        } else {
            None
        };
        Ok(DeleteStmt { table, where_clause })
    }

    // ---- DDL ----

    fn parse_create(&mut self) -> Result<Statement> {
        self.expect(TokenType::Create)?;
        if self.match_token(TokenType::Table) {
            return Ok(Statement::CreateTable(self.parse_create_table()?));
        }
        let unique = self.match_token(TokenType::Unique);
        self.expect(TokenType::Index)?;
        Ok(Statement::CreateIndex(self.parse_create_index(unique)?))
    }

    fn parse_create_table(&mut self) -> Result<CreateTableStmt> {
        let if_not_exists = if self.match_token(TokenType::Not) {
            self.expect(TokenType::Exists)?;
            true
        } else {
            false
        };
        let table = self.parse_identifier()?;
        self.expect(TokenType::LParen)?;
        let mut columns = Vec::new();
        let mut primary_key = None;
        loop {
            if self.match_token(TokenType::Primary) {
                self.expect(TokenType::Key)?;
                self.expect(TokenType::LParen)?;
                primary_key = Some(self.parse_column_list()?);
                self.expect(TokenType::RParen)?;
            } else {
                let name = self.parse_identifier()?;
                let data_type = self.parse_data_type()?;
                let mut nullable = true;
                let mut default = None;
                let mut col_pk = false;
                loop {
                    if self.match_token(TokenType::Not) {
                        self.expect(TokenType::Null)?;
                        nullable = false;
                    } else if self.match_token(TokenType::Null) {
                        nullable = true;
                    } else if self.match_token(TokenType::Default) {
                        default = Some(self.parse_expr(6)?);
                    } else if self.match_token(TokenType::Primary) {
                        self.expect(TokenType::Key)?;
                        col_pk = true;
                        nullable = false;
                    } else if self.match_token(TokenType::Unique) || self.match_token(TokenType::Check) {
                        if matches!(self.current().token_type, TokenType::LParen) {
                            self.advance();
                            let _ = self.parse_expr(0)?;
                            self.expect(TokenType::RParen)?;
                        }
                    } else {
                        break;
                    }
                }
                if col_pk {
                    primary_key = Some(vec![name.clone()]);
                }
                columns.push(ColumnDef { name, data_type, nullable, default });
            }
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RParen)?;
        Ok(CreateTableStmt { table, if_not_exists, columns, primary_key })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        let dt = match &self.current().token_type {
            TokenType::TinyInt => DataType::TinyInt,
            TokenType::SmallInt => DataType::SmallInt,
            TokenType::Integer => DataType::Integer,
            TokenType::BigInt => DataType::BigInt,
            TokenType::Float => DataType::Float,
            TokenType::Double => DataType::Double,
            TokenType::Decimal => {
                self.advance();
                if matches!(self.current().token_type, TokenType::LParen) {
                    self.advance();
                    let p = self.parse_usize()? as u8;
                    self.expect(TokenType::Comma)?;
                    let s = self.parse_usize()? as u8;
                    self.expect(TokenType::RParen)?;
                    return Ok(DataType::Decimal(p, s));
                }
                return Ok(DataType::Decimal(18, 4));
            }
            TokenType::Boolean => DataType::Boolean,
            TokenType::Text => {
                self.advance();
                if matches!(self.current().token_type, TokenType::LParen) {
                    self.advance();
                    let _ = self.parse_usize()?;
                    self.expect(TokenType::RParen)?;
                }
                return Ok(DataType::Text);
            }
            TokenType::Blob => DataType::Blob,
            TokenType::Date => DataType::Date,
            TokenType::Time => DataType::Time,
            TokenType::Timestamp => DataType::Timestamp,
            TokenType::Json => DataType::Json,
            TokenType::Uuid => DataType::Uuid,
            TokenType::Interval => DataType::Interval,
            TokenType::Geometry => DataType::Geometry,
            _ => return Err(self.error("expected a data type")),
        };
        self.advance();
        Ok(dt)
    }

    fn parse_create_index(&mut self, unique: bool) -> Result<CreateIndexStmt> {
        let index_name = self.parse_identifier()?;
        self.expect(TokenType::On)?;
        let table = self.parse_identifier()?;
        self.expect(TokenType::LParen)?;
        let columns = self.parse_column_list()?;
        self.expect(TokenType::RParen)?;
        Ok(CreateIndexStmt { index_name, table, columns, unique })
    }

    fn parse_drop(&mut self) -> Result<Statement> {
        self.expect(TokenType::Drop)?;
        if self.match_token(TokenType::Table) {
            let if_exists = if self.match_token(TokenType::If) {
                self.expect(TokenType::Exists)?;
                true
            } else {
                false
            };
            let table = self.parse_identifier()?;
            return Ok(Statement::DropTable(DropTableStmt { table, if_exists }));
        }
        self.expect(TokenType::Index)?;
        let index_name = self.parse_identifier()?;
        Ok(Statement::DropIndex(DropIndexStmt { index_name }))
    }

    fn parse_show(&mut self) -> Result<Statement> {
        self.expect(TokenType::Show)?;
        self.expect(TokenType::Tables)?;
        Ok(Statement::ShowTables)
    }

    fn parse_describe(&mut self) -> Result<Statement> {
        self.expect(TokenType::Describe)?;
        Ok(Statement::DescribeTable(self.parse_identifier()?))
    }

    // ---- Expressions (Pratt-style precedence climbing) ----

    pub fn parse_expr(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_binary_op() {
                Some(op) => op,
                None => break,
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.parse_expr(prec + 1)?;
            left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
        }
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<BinaryOperator> {
        Some(match &self.current().token_type {
            TokenType::Eq => BinaryOperator::Eq,
            TokenType::Ne => BinaryOperator::Ne,
            TokenType::Lt => BinaryOperator::Lt,
            TokenType::Gt => BinaryOperator::Gt,
            TokenType::Le => BinaryOperator::Le,
            TokenType::Ge => BinaryOperator::Ge,
            TokenType::And => BinaryOperator::And,
            TokenType::Or => BinaryOperator::Or,
            TokenType::Xor => BinaryOperator::Xor,
            TokenType::Plus => BinaryOperator::Add,
            TokenType::Minus => BinaryOperator::Sub,
            TokenType::Star => BinaryOperator::Mul,
            TokenType::Slash => BinaryOperator::Div,
            TokenType::Percent => BinaryOperator::Mod,
            TokenType::Concat => BinaryOperator::Concat,
            _ => return None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match &self.current().token_type {
            TokenType::Not => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::UnaryOp { op: UnaryOperator::Not, expr: Box::new(expr) })
            }
            TokenType::Minus => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::UnaryOp { op: UnaryOperator::Minus, expr: Box::new(expr) })
            }
            TokenType::Plus => {
                self.advance();
                let expr = self.parse_unary()?;
                Ok(Expr::UnaryOp { op: UnaryOperator::Plus, expr: Box::new(expr) })
            }
            _ => self.parse_postfix(),
        }
    }

    /// Parses a primary expression, then any trailing `IN`/`BETWEEN`/`LIKE`/
    /// `IS NULL`/`REGEXP` postfix predicates (all share LHS-first grammar).
    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            expr = match &self.current().token_type {
                TokenType::Is => {
                    self.advance();
                    let negated = self.match_token(TokenType::Not);
                    self.expect(TokenType::Null)?;
                    Expr::IsNull { expr: Box::new(expr), negated }
                }
                TokenType::Not
                    if matches!(
                        self.peek_type(1),
                        TokenType::In | TokenType::Between | TokenType::Like | TokenType::Regexp
                    ) =>
                {
                    self.advance();
                    self.parse_in_between_like(expr, true)?
                }
                TokenType::In | TokenType::Between | TokenType::Like | TokenType::Regexp => {
                    self.parse_in_between_like(expr, false)?
                }
                _ => break,
            };
        }
        Ok(expr)
    }

    fn parse_in_between_like(&mut self, expr: Expr, negated: bool) -> Result<Expr> {
        match &self.current().token_type {
            TokenType::In => {
                self.advance();
                self.expect(TokenType::LParen)?;
                if matches!(self.current().token_type, TokenType::Select) {
                    let subquery = self.parse_select_chain()?;
                    self.expect(TokenType::RParen)?;
                    return Ok(Expr::InSubquery { expr: Box::new(expr), subquery: Box::new(subquery), negated });
                }
                let mut list = Vec::new();
                loop {
                    list.push(self.parse_expr(0)?);
                    if !self.match_token(TokenType::Comma) {
                        break;
                    }
                }
                self.expect(TokenType::RParen)?;
                Ok(Expr::In { expr: Box::new(expr), list, negated })
            }
            TokenType::Between => {
                self.advance();
                let low = self.parse_expr(7)?;
                self.expect(TokenType::And)?;
                let high = self.parse_expr(7)?;
                Ok(Expr::Between { expr: Box::new(expr), low: Box::new(low), high: Box::new(high), negated })
            }
            TokenType::Like => {
                self.advance();
                let pattern = self.parse_expr(7)?;
                Ok(Expr::Like { expr: Box::new(expr), pattern: Box::new(pattern), negated })
            }
            TokenType::Regexp => {
                self.advance();
                let pattern = self.parse_expr(7)?;
                Ok(Expr::Regexp { expr: Box::new(expr), pattern: Box::new(pattern), negated })
            }
            _ => Err(self.error("expected IN, BETWEEN, LIKE, or REGEXP")),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.current().token_type.clone() {
            TokenType::LParen => {
                self.advance();
                if matches!(self.current().token_type, TokenType::Select) {
                    let query = self.parse_select_chain()?;
                    self.expect(TokenType::RParen)?;
                    return Ok(Expr::Subquery(Box::new(query)));
                }
                let expr = self.parse_expr(0)?;
                self.expect(TokenType::RParen)?;
                Ok(expr)
            }
            TokenType::IntegerLiteral(i) => {
                self.advance();
                Ok(Expr::Literal(Value::Integer(i)))
            }
            TokenType::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Float(n)))
            }
            TokenType::String(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Text(s)))
            }
            TokenType::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenType::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenType::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenType::Param(idx) => {
                self.advance();
                Ok(Expr::Param(idx))
            }
            TokenType::Exists => {
                self.advance();
                self.expect(TokenType::LParen)?;
                let query = self.parse_select_chain()?;
                self.expect(TokenType::RParen)?;
                Ok(Expr::Exists { subquery: Box::new(query), negated: false })
            }
            TokenType::Case => self.parse_case(),
            TokenType::Cast => {
                self.advance();
                self.expect(TokenType::LParen)?;
                let expr = self.parse_expr(0)?;
                self.expect(TokenType::As)?;
                let target_type = self.parse_data_type()?;
                self.expect(TokenType::RParen)?;
                Ok(Expr::Cast { expr: Box::new(expr), target_type })
            }
            TokenType::Array => {
                self.advance();
                self.expect(TokenType::LBracket)?;
                let mut items = Vec::new();
                if !matches!(self.current().token_type, TokenType::RBracket) {
                    loop {
                        items.push(self.parse_expr(0)?);
                        if !self.match_token(TokenType::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenType::RBracket)?;
                Ok(Expr::ArrayLiteral(items))
            }
            TokenType::QuotedIdentifier(name) => {
                self.advance();
                self.parse_ident_tail(name)
            }
            TokenType::Identifier(name) => {
                self.advance();
                self.parse_ident_tail(name)
            }
            // Keyword-as-identifier for data-type names used as function names (e.g. date/time builtins are lexed as keywords? not here)
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_ident_tail(&mut self, name: String) -> Result<Expr> {
        if matches!(self.current().token_type, TokenType::Dot) {
            self.advance();
            let col = self.parse_identifier()?;
            return Ok(Expr::QualifiedColumn(name, col));
        }
        if matches!(self.current().token_type, TokenType::LParen) {
            self.advance();
            let distinct = self.match_token(TokenType::Distinct);
            let mut args = Vec::new();
            if !matches!(self.current().token_type, TokenType::RParen) {
                if matches!(self.current().token_type, TokenType::Star) {
                    self.advance();
                    args.push(Expr::Column("*".to_string()));
                } else {
                    loop {
                        args.push(self.parse_expr(0)?);
                        if !self.match_token(TokenType::Comma) {
                            break;
                        }
                    }
                }
            }
            self.expect(TokenType::RParen)?;
            let call = Expr::FunctionCall { name, args, distinct };
            if self.match_token(TokenType::Over) {
                return self.parse_window_call(call);
            }
            return Ok(call);
        }
        Ok(Expr::Column(name))
    }

    fn parse_window_call(&mut self, func: Expr) -> Result<Expr> {
        if let TokenType::Identifier(name) = &self.current().token_type {
            let name = name.clone();
            self.advance();
            return Ok(Expr::WindowFunction {
                func: Box::new(func),
                partition_by: Vec::new(),
                order_by: Vec::new(),
                frame: None,
                named_window: Some(name),
            });
        }
        self.expect(TokenType::LParen)?;
        let (partition_by, order_by, frame) = self.parse_window_spec_body()?;
        self.expect(TokenType::RParen)?;
        Ok(Expr::WindowFunction { func: Box::new(func), partition_by, order_by, frame, named_window: None })
    }

    #[allow(clippy::type_complexity)]
    fn parse_window_spec_body(&mut self) -> Result<(Vec<Expr>, Vec<OrderByExpr>, Option<WindowFrame>)> {
        let mut partition_by = Vec::new();
        if self.match_token(TokenType::Partition) {
            self.expect(TokenType::By)?;
            loop {
                partition_by.push(self.parse_expr(0)?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        let mut order_by = Vec::new();
        if self.match_token(TokenType::Order) {
            self.expect(TokenType::By)?;
            order_by = self.parse_order_by()?;
        }
        let frame = if matches!(self.current().token_type, TokenType::Rows | TokenType::Range) {
            let unit = if matches!(self.current().token_type, TokenType::Rows) {
                WindowFrameUnit::Rows
            } else {
                WindowFrameUnit::Range
            };
            self.advance();
            if self.match_token(TokenType::Between) {
                let start = self.parse_frame_bound()?;
                self.expect(TokenType::And)?;
                let end = self.parse_frame_bound()?;
                Some(WindowFrame { unit, start, end })
            } else {
                let start = self.parse_frame_bound()?;
                Some(WindowFrame { unit, start, end: FrameBound::CurrentRow })
            }
        } else {
            None
        };
        Ok((partition_by, order_by, frame))
    }

    fn parse_frame_bound(&mut self) -> Result<FrameBound> {
        if self.match_token(TokenType::Unbounded) {
            return if self.match_token(TokenType::Preceding) {
                Ok(FrameBound::UnboundedPreceding)
            } else {
                self.expect(TokenType::Following)?;
                Ok(FrameBound::UnboundedFollowing)
            };
        }
        if self.match_token(TokenType::Current) {
            self.expect(TokenType::Row)?;
            return Ok(FrameBound::CurrentRow);
        }
        let n = self.parse_usize()? as i64;
        if self.match_token(TokenType::Preceding) {
            Ok(FrameBound::Preceding(n))
        } else {
            self.expect(TokenType::Following)?;
            Ok(FrameBound::Following(n))
        }
    }

    fn parse_case(&mut self) -> Result<Expr> {
        self.expect(TokenType::Case)?;
        let operand = if !matches!(self.current().token_type, TokenType::When) {
            Some(Box::new(self.parse_expr(0)?))
        } else {
            None
        };
        let mut when_then = Vec::new();
        while self.match_token(TokenType::When) {
            let cond = self.parse_expr(0)?;
            self.expect(TokenType::Then)?;
            let result = self.parse_expr(0)?;
            when_then.push((cond, result));
        }
        let else_expr = if self.match_token(TokenType::Else) {
            Some(Box::new(self.parse_expr(0)?))
        } else {
            None
        };
        self.expect(TokenType::End)?;
        Ok(Expr::Case { operand, when_then, else_expr })
    }

    // ---- Token-stream helpers ----

    fn current(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek_type(&self, offset: usize) -> TokenType {
        self.tokens
            .get(self.position + offset)
            .map(|t| t.token_type.clone())
            .unwrap_or(TokenType::Eof)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
    }

    fn match_token(&mut self, tt: TokenType) -> bool {
        if std::mem::discriminant(&self.current().token_type) == std::mem::discriminant(&tt) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tt: TokenType) -> Result<()> {
        if std::mem::discriminant(&self.current().token_type) == std::mem::discriminant(&tt) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected {tt:?}, found {:?}", self.current().token_type)))
        }
    }

    fn parse_identifier(&mut self) -> Result<String> {
        match self.current().token_type.clone() {
            TokenType::Identifier(s) | TokenType::QuotedIdentifier(s) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.error(&format!("expected identifier, found {other:?}"))),
        }
    }

    fn parse_usize(&mut self) -> Result<usize> {
        match self.current().token_type.clone() {
            TokenType::IntegerLiteral(i) if i >= 0 => {
                self.advance();
                Ok(i as usize)
            }
            TokenType::Number(n) if n >= 0.0 => {
                self.advance();
                Ok(n as usize)
            }
            other => Err(self.error(&format!("expected a non-negative integer, found {other:?}"))),
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::parse(message, self.current().column)
    }
}
