//! Expression evaluation against a row, with three-valued logic (spec §4.9).

use std::collections::HashMap;

use regex::Regex;

use super::ast::*;
use super::functions;
use crate::error::{Error, Result};
use crate::types::{tribool_cmp, tribool_eq, Tribool, Value};

/// Maps a (optional table/alias, column) pair to a position in the row the
/// evaluator is currently looking at. Built once per pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct RowSchema {
    /// column name (lowercased) -> position, for unqualified lookups.
    by_name: HashMap<String, usize>,
    /// (table alias lowercased, column name lowercased) -> position.
    by_qualified: HashMap<(String, String), usize>,
    pub names: Vec<String>,
}

impl RowSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table_alias: Option<&str>, column: &str) {
        let pos = self.names.len();
        self.names.push(column.to_string());
        // last-wins for ambiguous unqualified names, consistent with most
        // engines' "rightmost column shadows" convention when no error path
        // for ambiguity is specified.
        self.by_name.insert(column.to_ascii_lowercase(), pos);
        if let Some(alias) = table_alias {
            self.by_qualified.insert((alias.to_ascii_lowercase(), column.to_ascii_lowercase()), pos);
        }
    }

    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn resolve_qualified(&self, qualifier: &str, name: &str) -> Option<usize> {
        self.by_qualified
            .get(&(qualifier.to_ascii_lowercase(), name.to_ascii_lowercase()))
            .copied()
    }
}

/// Compiled LIKE pattern, avoiding repeated glob-to-regex translation on the
/// hot path of a full-table scan.
pub enum CompiledPattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Regex(Regex),
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> Self {
        if !pattern.contains('%') && !pattern.contains('_') {
            return CompiledPattern::Exact(pattern.to_string());
        }
        if pattern.chars().filter(|&c| c == '%').count() == 1 && !pattern.contains('_') {
            if let Some(rest) = pattern.strip_suffix('%') {
                if !rest.is_empty() {
                    return CompiledPattern::Prefix(rest.to_string());
                }
            }
            if let Some(rest) = pattern.strip_prefix('%') {
                if !rest.is_empty() {
                    return CompiledPattern::Suffix(rest.to_string());
                }
            }
        }
        if pattern.starts_with('%') && pattern.ends_with('%') && pattern.len() > 2 {
            let inner = &pattern[1..pattern.len() - 1];
            if !inner.contains('%') && !inner.contains('_') {
                return CompiledPattern::Contains(inner.to_string());
            }
        }
        let mut re = String::from("^");
        let mut literal_run = String::new();
        let flush = |run: &mut String, out: &mut String| {
            if !run.is_empty() {
                out.push_str(&regex::escape(run));
                run.clear();
            }
        };
        for c in pattern.chars() {
            match c {
                '%' => {
                    flush(&mut literal_run, &mut re);
                    re.push_str(".*");
                }
                '_' => {
                    flush(&mut literal_run, &mut re);
                    re.push('.');
                }
                c => literal_run.push(c),
            }
        }
        flush(&mut literal_run, &mut re);
        re.push('$');
        CompiledPattern::Regex(Regex::new(&re).unwrap_or_else(|_| Regex::new("$^").unwrap()))
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            CompiledPattern::Exact(s) => s == text,
            CompiledPattern::Prefix(p) => text.starts_with(p.as_str()),
            CompiledPattern::Suffix(s) => text.ends_with(s.as_str()),
            CompiledPattern::Contains(s) => text.contains(s.as_str()),
            CompiledPattern::Regex(re) => re.is_match(text),
        }
    }
}

/// Resolves a nested SELECT into its result rows. Implemented by
/// `QueryExecutor` so the evaluator stays decoupled from the executor's
/// pipeline machinery and storage access.
pub trait SubqueryRunner {
    fn run_subquery(&self, stmt: &SelectStmt) -> Result<Vec<Vec<Value>>>;
}

/// A `SubqueryRunner` that rejects every subquery, for contexts where none
/// can legally appear (e.g. a column default's constant expression).
pub struct NoSubqueries;

impl SubqueryRunner for NoSubqueries {
    fn run_subquery(&self, _: &SelectStmt) -> Result<Vec<Vec<Value>>> {
        Err(Error::internal("subqueries are not valid in this expression context"))
    }
}

/// Evaluates expressions against one row at a time. Holds no reference to
/// storage: scalar/IN/EXISTS subqueries are resolved through a caller-
/// supplied `SubqueryRunner` so the evaluator stays decoupled from the
/// executor.
pub struct Evaluator<'a> {
    pub schema: &'a RowSchema,
    pub params: &'a [Value],
    pub run_subquery: &'a dyn SubqueryRunner,
}

impl<'a> Evaluator<'a> {
    pub fn new(schema: &'a RowSchema, params: &'a [Value], run_subquery: &'a dyn SubqueryRunner) -> Self {
        Self { schema, params, run_subquery }
    }

    pub fn eval(&self, expr: &Expr, row: &[Value]) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(name) => {
                if name == "*" {
                    return Ok(Value::Null);
                }
                let pos = self
                    .schema
                    .resolve(name)
                    .ok_or_else(|| Error::catalog(format!("unknown column '{name}'")))?;
                Ok(row[pos].clone())
            }
            Expr::QualifiedColumn(qualifier, name) => {
                let pos = self
                    .schema
                    .resolve_qualified(qualifier, name)
                    .or_else(|| self.schema.resolve(name))
                    .ok_or_else(|| Error::catalog(format!("unknown column '{qualifier}.{name}'")))?;
                Ok(row[pos].clone())
            }
            Expr::Param(idx) => self
                .params
                .get(idx.checked_sub(1).unwrap_or(usize::MAX))
                .cloned()
                .ok_or_else(|| Error::ty(format!("missing parameter ${idx}"))),
            Expr::BinaryOp { left, op, right } => self.eval_binary(left, op, right, row),
            Expr::UnaryOp { op, expr } => self.eval_unary(op, expr, row),
            Expr::FunctionCall { name, args, distinct: _ } => {
                let values: Result<Vec<Value>> = args.iter().map(|a| self.eval(a, row)).collect();
                functions::call_scalar(name, &values?)
            }
            Expr::WindowFunction { .. } => {
                Err(Error::internal("window functions must be resolved by the pipeline's window stage"))
            }
            Expr::In { expr, list, negated } => {
                let v = self.eval(expr, row)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let iv = self.eval(item, row)?;
                    match tribool_eq(&v, &iv) {
                        Tribool::True => return Ok(Value::Bool(!negated)),
                        Tribool::Unknown => saw_null = true,
                        Tribool::False => {}
                    }
                }
                if saw_null {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Bool(*negated))
                }
            }
            Expr::InSubquery { expr, subquery, negated } => {
                let v = self.eval(expr, row)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let rows = self.run_subquery.run_subquery(subquery)?;
                let mut saw_null = false;
                for r in &rows {
                    let candidate = r.first().cloned().unwrap_or(Value::Null);
                    if candidate.is_null() {
                        saw_null = true;
                        continue;
                    }
                    if tribool_eq(&v, &candidate) == Tribool::True {
                        return Ok(Value::Bool(!negated));
                    }
                }
                if saw_null {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Bool(*negated))
                }
            }
            Expr::Between { expr, low, high, negated } => {
                let v = self.eval(expr, row)?;
                let lo = self.eval(low, row)?;
                let hi = self.eval(high, row)?;
                let ge = tribool_cmp(&v, &lo, |o| o != std::cmp::Ordering::Less);
                let le = tribool_cmp(&v, &hi, |o| o != std::cmp::Ordering::Greater);
                let result = ge.and(le);
                Ok(if *negated { result.not() } else { result }.to_value())
            }
            Expr::Like { expr, pattern, negated } => {
                let v = self.eval(expr, row)?;
                let p = self.eval(pattern, row)?;
                if v.is_null() || p.is_null() {
                    return Ok(Value::Null);
                }
                let text = v.display_text();
                let pat = p.display_text();
                let matched = CompiledPattern::compile(&pat).matches(&text);
                Ok(Value::Bool(matched != *negated))
            }
            Expr::Regexp { expr, pattern, negated } => {
                let v = self.eval(expr, row)?;
                let p = self.eval(pattern, row)?;
                if v.is_null() || p.is_null() {
                    return Ok(Value::Null);
                }
                let re = Regex::new(&p.display_text()).map_err(|e| Error::ty(format!("invalid regex: {e}")))?;
                Ok(Value::Bool(re.is_match(&v.display_text()) != *negated))
            }
            Expr::IsNull { expr, negated } => {
                let v = self.eval(expr, row)?;
                Ok(Value::Bool(v.is_null() != *negated))
            }
            Expr::Exists { subquery, negated } => {
                let rows = self.run_subquery.run_subquery(subquery)?;
                Ok(Value::Bool(!rows.is_empty() != *negated))
            }
            Expr::Case { operand, when_then, else_expr } => {
                if let Some(operand) = operand {
                    let ov = self.eval(operand, row)?;
                    for (cond, result) in when_then {
                        let cv = self.eval(cond, row)?;
                        if tribool_eq(&ov, &cv) == Tribool::True {
                            return self.eval(result, row);
                        }
                    }
                } else {
                    for (cond, result) in when_then {
                        if self.eval(cond, row)?.as_tribool().is_true() {
                            return self.eval(result, row);
                        }
                    }
                }
                match else_expr {
                    Some(e) => self.eval(e, row),
                    None => Ok(Value::Null),
                }
            }
            Expr::Cast { expr, target_type } => {
                let v = self.eval(expr, row)?;
                v.cast(type_name(target_type))
            }
            Expr::Subquery(subquery) => {
                let rows = self.run_subquery.run_subquery(subquery)?;
                match rows.len() {
                    0 => Ok(Value::Null),
                    1 => Ok(rows[0].first().cloned().unwrap_or(Value::Null)),
                    _ => Err(Error::ty("scalar subquery returned more than one row")),
                }
            }
            Expr::ArrayLiteral(items) => {
                let values: Result<Vec<Value>> = items.iter().map(|i| self.eval(i, row)).collect();
                Ok(Value::Array(values?))
            }
        }
    }

    fn eval_binary(&self, left: &Expr, op: &BinaryOperator, right: &Expr, row: &[Value]) -> Result<Value> {
        use BinaryOperator::*;
        match op {
            And => {
                let l = self.eval(left, row)?.as_tribool();
                if l == Tribool::False {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(right, row)?.as_tribool();
                Ok(l.and(r).to_value())
            }
            Or => {
                let l = self.eval(left, row)?.as_tribool();
                if l == Tribool::True {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(right, row)?.as_tribool();
                Ok(l.or(r).to_value())
            }
            Xor => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                if l.is_null() || r.is_null() {
                    return Ok(Value::Null);
                }
                Ok(Value::Bool(l.as_tribool().is_true() != r.as_tribool().is_true()))
            }
            Eq => Ok(tribool_eq(&self.eval(left, row)?, &self.eval(right, row)?).to_value()),
            Ne => Ok(tribool_eq(&self.eval(left, row)?, &self.eval(right, row)?).not().to_value()),
            Lt => Ok(tribool_cmp(&self.eval(left, row)?, &self.eval(right, row)?, |o| o == std::cmp::Ordering::Less).to_value()),
            Gt => Ok(tribool_cmp(&self.eval(left, row)?, &self.eval(right, row)?, |o| o == std::cmp::Ordering::Greater).to_value()),
            Le => Ok(tribool_cmp(&self.eval(left, row)?, &self.eval(right, row)?, |o| o != std::cmp::Ordering::Greater).to_value()),
            Ge => Ok(tribool_cmp(&self.eval(left, row)?, &self.eval(right, row)?, |o| o != std::cmp::Ordering::Less).to_value()),
            Concat => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                if l.is_null() || r.is_null() {
                    return Ok(Value::Null);
                }
                Ok(Value::Text(format!("{}{}", l.display_text(), r.display_text())))
            }
            Add => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                // `+` between a text operand and anything else concatenates
                // rather than erroring, stringifying the non-text side, same
                // as the `||` arm above.
                if matches!(l, Value::Text(_)) || matches!(r, Value::Text(_)) {
                    if l.is_null() || r.is_null() {
                        return Ok(Value::Null);
                    }
                    return Ok(Value::Text(format!("{}{}", l.display_text(), r.display_text())));
                }
                self.eval_arith_values(l, r, op)
            }
            Sub | Mul | Div | Mod => self.eval_arith(left, op, right, row),
        }
    }

    fn eval_arith(&self, left: &Expr, op: &BinaryOperator, right: &Expr, row: &[Value]) -> Result<Value> {
        let l = self.eval(left, row)?;
        let r = self.eval(right, row)?;
        self.eval_arith_values(l, r, op)
    }

    fn eval_arith_values(&self, l: Value, r: Value, op: &BinaryOperator) -> Result<Value> {
        if l.is_null() || r.is_null() {
            return Ok(Value::Null);
        }
        if let (Value::Integer(a), Value::Integer(b)) = (&l, &r) {
            return Ok(match op {
                BinaryOperator::Add => Value::Integer(a + b),
                BinaryOperator::Sub => Value::Integer(a - b),
                BinaryOperator::Mul => Value::Integer(a * b),
                BinaryOperator::Div => {
                    if *b == 0 {
                        return Err(Error::ty("division by zero"));
                    }
                    Value::Integer(a / b)
                }
                BinaryOperator::Mod => {
                    if *b == 0 {
                        return Err(Error::ty("division by zero"));
                    }
                    Value::Integer(a % b)
                }
                _ => unreachable!(),
            });
        }
        let a = l.as_f64().ok_or_else(|| Error::ty(format!("cannot apply arithmetic to {}", l.type_name())))?;
        let b = r.as_f64().ok_or_else(|| Error::ty(format!("cannot apply arithmetic to {}", r.type_name())))?;
        Ok(match op {
            BinaryOperator::Add => Value::Float(a + b),
            BinaryOperator::Sub => Value::Float(a - b),
            BinaryOperator::Mul => Value::Float(a * b),
            BinaryOperator::Div => {
                if b == 0.0 {
                    return Err(Error::ty("division by zero"));
                }
                Value::Float(a / b)
            }
            BinaryOperator::Mod => {
                if b == 0.0 {
                    return Err(Error::ty("division by zero"));
                }
                Value::Float(a % b)
            }
            _ => unreachable!(),
        })
    }

    fn eval_unary(&self, op: &UnaryOperator, expr: &Expr, row: &[Value]) -> Result<Value> {
        let v = self.eval(expr, row)?;
        match op {
            UnaryOperator::Not => Ok(v.as_tribool().not().to_value()),
            UnaryOperator::Plus => Ok(v),
            UnaryOperator::Minus => match v {
                Value::Integer(i) => Ok(Value::Integer(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Null => Ok(Value::Null),
                other => Err(Error::ty(format!("cannot negate {}", other.type_name()))),
            },
        }
    }
}

fn type_name(dt: &DataType) -> &'static str {
    match dt {
        DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt => "INTEGER",
        DataType::Float | DataType::Double => "FLOAT",
        DataType::Decimal(..) => "FLOAT",
        DataType::Boolean => "BOOLEAN",
        DataType::Text => "TEXT",
        DataType::Blob => "BLOB",
        DataType::Date => "DATE",
        DataType::Time => "TIME",
        DataType::Timestamp => "TIMESTAMP",
        DataType::Json => "JSON",
        DataType::Uuid => "UUID",
        DataType::Interval => "INTERVAL",
        DataType::Geometry => "GEOMETRY",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_valued_and() {
        let schema = RowSchema::new();
        let eval = Evaluator::new(&schema, &[], &NoSubqueries);
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Literal(Value::Null)),
            op: BinaryOperator::And,
            right: Box::new(Expr::Literal(Value::Bool(false))),
        };
        assert_eq!(eval.eval(&expr, &[]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_like_matching() {
        assert!(CompiledPattern::compile("a%c").matches("abc"));
        assert!(!CompiledPattern::compile("a%c").matches("abd"));
        assert!(CompiledPattern::compile("%bc").matches("abc"));
        assert!(CompiledPattern::compile("ab_").matches("abc"));
    }

    #[test]
    fn test_division_by_zero() {
        let schema = RowSchema::new();
        let eval = Evaluator::new(&schema, &[], &NoSubqueries);
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Literal(Value::Integer(1))),
            op: BinaryOperator::Div,
            right: Box::new(Expr::Literal(Value::Integer(0))),
        };
        assert!(eval.eval(&expr, &[]).is_err());
    }

    #[test]
    fn test_column_resolution() {
        let mut schema = RowSchema::new();
        schema.push(Some("u"), "id");
        schema.push(Some("u"), "name");
        let eval = Evaluator::new(&schema, &[], &NoSubqueries);
        let row = vec![Value::Integer(1), Value::Text("alice".into())];
        assert_eq!(eval.eval(&Expr::Column("name".into()), &row).unwrap(), Value::Text("alice".into()));
        assert_eq!(eval.eval(&Expr::QualifiedColumn("u".into(), "id".into()), &row).unwrap(), Value::Integer(1));
    }
}
