//! The row pipeline: scan -> join -> filter -> group/aggregate -> window ->
//! distinct -> order -> offset -> limit -> project (spec §4.5-§4.8).

use std::cell::RefCell;
use std::collections::HashMap;

use super::ast::*;
use super::evaluator::{Evaluator, RowSchema, SubqueryRunner};
use super::functions::{self, Accumulator};
use super::join::{execute_join, JoinSide};
use crate::error::{CancellationToken, Error, Result};
use crate::types::{ColumnDef, ColumnType, IndexDef, Row, RowId, TableSchema, Value};

/// Storage-facing contract the executor drives. Implemented by the
/// transaction-scoped view handed out by `database::Database`, so the
/// executor never has to know about MVCC visibility or the WAL directly.
pub trait TableAccess {
    fn schema(&self, table: &str) -> Result<TableSchema>;
    fn scan(&self, table: &str) -> Result<Vec<(RowId, Row)>>;
    fn insert(&self, table: &str, row: Row) -> Result<RowId>;
    fn update(&self, table: &str, row_id: RowId, row: Row) -> Result<()>;
    fn delete(&self, table: &str, row_id: RowId) -> Result<()>;
    fn create_table(&self, schema: TableSchema) -> Result<()>;
    fn drop_table(&self, table: &str, if_exists: bool) -> Result<()>;
    fn create_index(&self, index: IndexDef) -> Result<()>;
    fn drop_index(&self, index_name: &str) -> Result<()>;
    fn list_tables(&self) -> Result<Vec<String>>;
}

#[derive(Debug)]
pub enum QueryResult {
    Select { columns: Vec<String>, rows: Vec<Row> },
    Modification { affected_rows: usize },
    Definition { message: String },
}

impl QueryResult {
    pub fn affected_rows(&self) -> usize {
        match self {
            QueryResult::Modification { affected_rows } => *affected_rows,
            _ => 0,
        }
    }

    pub fn select_rows(&self) -> Option<(&[String], &[Row])> {
        match self {
            QueryResult::Select { columns, rows } => Some((columns.as_slice(), rows.as_slice())),
            _ => None,
        }
    }
}

/// Materialized relation carried between pipeline stages: column names plus
/// the rows produced so far.
struct Relation {
    schema: RowSchema,
    rows: Vec<Row>,
}

pub struct QueryExecutor<'a> {
    storage: &'a dyn TableAccess,
    params: &'a [Value],
    /// Bindings for CTEs already materialized in the current statement,
    /// looked up case-insensitively like every other identifier in this
    /// engine. A `RefCell` so the row pipeline's read-only stages (filter,
    /// project, ...) can still run a nested SELECT through `run_select`
    /// without needing `&mut self`, which is what lets scalar/IN/EXISTS
    /// subqueries be evaluated mid-expression (see `SubqueryRunner` below).
    ctes: RefCell<HashMap<String, Relation>>,
    /// Checked between rows/rounds of joins, aggregations, window
    /// partitions, and recursive CTE rounds (spec §5 "suspension points").
    cancel: &'a CancellationToken,
    recursive_cte_limit: usize,
}

impl<'a> SubqueryRunner for QueryExecutor<'a> {
    fn run_subquery(&self, stmt: &SelectStmt) -> Result<Vec<Vec<Value>>> {
        Ok(self.run_select(stmt)?.rows)
    }
}

impl<'a> QueryExecutor<'a> {
    pub fn new(
        storage: &'a dyn TableAccess,
        params: &'a [Value],
        cancel: &'a CancellationToken,
        recursive_cte_limit: usize,
    ) -> Self {
        Self { storage, params, ctes: RefCell::new(HashMap::new()), cancel, recursive_cte_limit }
    }

    pub fn execute(&mut self, stmt: &Statement) -> Result<QueryResult> {
        match stmt {
            Statement::Select(s) => self.execute_select(s),
            Statement::Insert(i) => self.execute_insert(i),
            Statement::Update(u) => self.execute_update(u),
            Statement::Delete(d) => self.execute_delete(d),
            Statement::CreateTable(c) => self.execute_create_table(c),
            Statement::CreateIndex(c) => self.execute_create_index(c),
            Statement::DropTable(d) => self.execute_drop_table(d),
            Statement::DropIndex(d) => self.execute_drop_index(d),
            Statement::ShowTables => self.execute_show_tables(),
            Statement::DescribeTable(name) => self.execute_describe_table(name),
            Statement::Begin(_) | Statement::Commit | Statement::Rollback | Statement::Savepoint(_)
            | Statement::RollbackToSavepoint(_) | Statement::ReleaseSavepoint(_) => Err(Error::internal(
                "transaction control statements are handled by the database layer, not the executor",
            )),
        }
    }

    fn execute_select(&mut self, stmt: &SelectStmt) -> Result<QueryResult> {
        for cte in &stmt.ctes {
            let relation = self.materialize_cte(cte)?;
            self.ctes.borrow_mut().insert(cte.name.to_ascii_lowercase(), relation);
        }
        let relation = self.run_select(stmt)?;
        let columns = relation.schema.names.clone();
        Ok(QueryResult::Select { columns, rows: relation.rows })
    }

    /// `WITH RECURSIVE name AS (base UNION [ALL] recursive-step)`: seed with
    /// the non-recursive arm, then repeatedly evaluate the recursive arm
    /// against the rows produced by the previous round until it adds
    /// nothing new (spec §4.7).
    fn materialize_cte(&self, cte: &CteDef) -> Result<Relation> {
        if !cte.recursive {
            let relation = self.run_select(&cte.query)?;
            return Ok(self.rename_cte_columns(relation, cte));
        }
        let (seed_stmt, step_stmt, set_op) = match &cte.query.set_op {
            Some((op, next)) if matches!(op, SetOp::Union | SetOp::UnionAll) => {
                (strip_set_op(&cte.query), (**next).clone(), *op)
            }
            _ => {
                let relation = self.run_select(&cte.query)?;
                return Ok(self.rename_cte_columns(relation, cte));
            }
        };

        let seed = self.run_select(&seed_stmt)?;
        let schema = seed.schema.clone();
        let mut all_rows = seed.rows.clone();
        let mut frontier = seed.rows;
        let name = cte.name.to_ascii_lowercase();

        let mut round = 0usize;
        loop {
            self.cancel.check()?;
            round += 1;
            if round > self.recursive_cte_limit {
                return Err(Error::resource(format!(
                    "recursive CTE {} exceeded {} rounds without converging",
                    cte.name, self.recursive_cte_limit
                )));
            }
            self.ctes.borrow_mut().insert(
                name.clone(),
                Relation { schema: schema.clone(), rows: std::mem::take(&mut frontier) },
            );
            let next = self.run_select(&step_stmt)?;
            if next.rows.is_empty() {
                break;
            }
            if matches!(set_op, SetOp::Union) {
                frontier = next
                    .rows
                    .into_iter()
                    .filter(|r| !all_rows.iter().any(|existing| rows_equal(existing, r)))
                    .collect();
            } else {
                frontier = next.rows;
            }
            if frontier.is_empty() {
                break;
            }
            all_rows.extend(frontier.clone());
        }

        self.ctes.borrow_mut().remove(&name);
        Ok(self.rename_cte_columns(Relation { schema, rows: all_rows }, cte))
    }

    fn rename_cte_columns(&self, mut relation: Relation, cte: &CteDef) -> Relation {
        if let Some(cols) = &cte.columns {
            let mut schema = RowSchema::new();
            for name in cols {
                schema.push(Some(&cte.name), name);
            }
            relation.schema = schema;
        }
        relation
    }

    /// Runs one SELECT (including any trailing set-operation chain) end to
    /// end, without touching the enclosing statement's CTE bindings.
    fn run_select(&self, stmt: &SelectStmt) -> Result<Relation> {
        let mut base = self.run_select_core(stmt)?;
        if let Some((op, next)) = &stmt.set_op {
            let other = self.run_select(next)?;
            base = apply_set_op(*op, base, other)?;
        }
        Ok(base)
    }

    fn run_select_core(&self, stmt: &SelectStmt) -> Result<Relation> {
        let mut relation = match &stmt.from {
            Some(table_ref) => self.execute_table_ref(table_ref)?,
            None => Relation { schema: RowSchema::new(), rows: vec![Vec::new()] },
        };

        if let Some(where_clause) = &stmt.where_clause {
            relation = self.filter(relation, where_clause)?;
        }

        let projected_exprs = collect_select_exprs(&stmt.columns);
        let is_aggregated = stmt.group_by.is_some()
            || projected_exprs.iter().any(|e| contains_aggregate(e));

        let mut relation = if is_aggregated {
            self.group_and_aggregate(relation, stmt)?
        } else {
            relation
        };

        if contains_window_function(&projected_exprs) {
            relation = self.apply_windows(relation, stmt)?;
        }

        // DISTINCT ON keeps the first row per key under the surrounding
        // ORDER BY, not first-inserted order, so the rows have to be sorted
        // before the dedup pass rather than after.
        if matches!(stmt.distinct, Distinct::On(_)) {
            if let Some(order_by) = &stmt.order_by {
                let identity: Vec<usize> = (0..relation.rows.len()).collect();
                relation.rows = self.sort_rows(relation.rows.clone(), &identity, order_by, &relation)?;
            }
        }

        let (out_names, mut out_rows) = self.project(&relation, &stmt.columns)?;
        // Tracks, for each surviving output row, which pre-projection row in
        // `relation` it came from, so ORDER BY can still reach columns that
        // were dropped by a DISTINCT pass or never appeared in the SELECT
        // list.
        let mut src_indices: Vec<usize> = (0..out_rows.len()).collect();

        match &stmt.distinct {
            Distinct::None => {}
            Distinct::All => {
                let mut seen: Vec<Vec<String>> = Vec::new();
                let mut keep = Vec::new();
                for (idx, row) in out_rows.iter().enumerate() {
                    let repr: Vec<String> = row.iter().map(Value::group_key_repr).collect();
                    if !seen.contains(&repr) {
                        seen.push(repr);
                        keep.push(idx);
                    }
                }
                out_rows = keep.iter().map(|&i| out_rows[i].clone()).collect();
                src_indices = keep.iter().map(|&i| src_indices[i]).collect();
            }
            Distinct::On(exprs) => {
                let evaluated: Vec<Vec<Value>> = {
                    let eval = self.evaluator(&relation.schema);
                    relation
                        .rows
                        .iter()
                        .map(|src_row| exprs.iter().map(|e| eval.eval(e, src_row)).collect::<Result<Vec<_>>>())
                        .collect::<Result<Vec<_>>>()?
                };
                let mut seen: Vec<Vec<String>> = Vec::new();
                let mut keep = Vec::new();
                for (idx, keys) in evaluated.into_iter().enumerate() {
                    let repr: Vec<String> = keys.iter().map(Value::group_key_repr).collect();
                    if !seen.contains(&repr) {
                        seen.push(repr);
                        keep.push(idx);
                    }
                }
                out_rows = keep.iter().map(|&i| out_rows[i].clone()).collect();
                src_indices = keep.iter().map(|&i| src_indices[i]).collect();
            }
        }

        // DISTINCT ON already produced its output in ORDER BY order above;
        // re-sorting here would be a no-op at best and at worst would not
        // account for the dedup pass having dropped rows sort_rows expects
        // by position, so it's skipped for that case.
        if let Some(order_by) = &stmt.order_by {
            if !matches!(stmt.distinct, Distinct::On(_)) {
                out_rows = self.sort_rows(out_rows, &src_indices, order_by, &relation)?;
            }
        }

        let offset = stmt.offset.unwrap_or(0);
        out_rows = out_rows.into_iter().skip(offset).collect();
        if let Some(limit) = stmt.limit {
            out_rows.truncate(limit);
        }

        let mut schema = RowSchema::new();
        for name in &out_names {
            schema.push(None, name);
        }
        Ok(Relation { schema, rows: out_rows })
    }

    fn execute_table_ref(&self, table_ref: &TableRef) -> Result<Relation> {
        match table_ref {
            TableRef::Table { name, alias } => {
                if let Some(cte) = self.ctes.borrow().get(&name.to_ascii_lowercase()) {
                    return Ok(Relation { schema: cte.schema.clone(), rows: cte.rows.clone() });
                }
                let schema = self.storage.schema(name)?;
                let rows = self.storage.scan(name)?;
                let label = alias.clone().unwrap_or_else(|| name.clone());
                let mut row_schema = RowSchema::new();
                for col in &schema.columns {
                    row_schema.push(Some(&label), &col.name);
                }
                Ok(Relation { schema: row_schema, rows: rows.into_iter().map(|(_, r)| r).collect() })
            }
            TableRef::CteRef { name, alias } => {
                let ctes = self.ctes.borrow();
                let cte = ctes
                    .get(&name.to_ascii_lowercase())
                    .ok_or_else(|| Error::catalog(format!("unknown CTE '{name}'")))?;
                let mut schema = cte.schema.clone();
                if let Some(alias) = alias {
                    let mut relabeled = RowSchema::new();
                    for col_name in &schema.names.clone() {
                        relabeled.push(Some(alias), col_name);
                    }
                    schema = relabeled;
                }
                Ok(Relation { schema, rows: cte.rows.clone() })
            }
            TableRef::Subquery { query, alias } => {
                let inner = self.run_select(query)?;
                let mut schema = RowSchema::new();
                for name in &inner.schema.names {
                    schema.push(Some(alias), name);
                }
                Ok(Relation { schema, rows: inner.rows })
            }
            TableRef::Join { left, right, join_type, on_condition } => {
                let l = self.execute_table_ref(left)?;
                let r = self.execute_table_ref(right)?;
                let (schema, rows) = execute_join(
                    JoinSide { schema: l.schema, rows: l.rows },
                    JoinSide { schema: r.schema, rows: r.rows },
                    *join_type,
                    on_condition.as_ref(),
                    self.params,
                    self.cancel,
                )?;
                Ok(Relation { schema, rows })
            }
        }
    }

    fn evaluator<'s>(&'s self, schema: &'s RowSchema) -> Evaluator<'s> {
        Evaluator::new(schema, self.params, self)
    }

    fn filter(&self, relation: Relation, expr: &Expr) -> Result<Relation> {
        let eval = self.evaluator(&relation.schema);
        let mut rows = Vec::with_capacity(relation.rows.len());
        for row in relation.rows {
            if eval.eval(expr, &row)?.as_tribool().is_true() {
                rows.push(row);
            }
        }
        Ok(Relation { schema: relation.schema, rows })
    }

    fn group_and_aggregate(&self, relation: Relation, stmt: &SelectStmt) -> Result<Relation> {
        let group_exprs = stmt.group_by.clone().unwrap_or_default();
        let eval = self.evaluator(&relation.schema);

        let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
        for row in &relation.rows {
            self.cancel.check()?;
            let key: Vec<Value> = group_exprs.iter().map(|e| eval.eval(e, row)).collect::<Result<_>>()?;
            if let Some((_, rows)) = groups.iter_mut().find(|(k, _)| keys_equal(k, &key)) {
                rows.push(row.clone());
            } else {
                groups.push((key, vec![row.clone()]));
            }
        }
        if groups.is_empty() && group_exprs.is_empty() {
            groups.push((Vec::new(), relation.rows.clone()));
        }

        let agg_exprs = collect_aggregate_exprs(&collect_select_exprs(&stmt.columns));
        let having_aggs = stmt.having.as_ref().map(|h| collect_aggregate_exprs(&[h.clone()])).unwrap_or_default();

        let mut out_rows = Vec::new();
        let mut out_schema = RowSchema::new();
        // The output schema for a grouped relation is: group-by columns,
        // then one synthetic column per distinct aggregate expression,
        // named by its rendered form so later projection stages can look
        // it up the same way it appears in the SELECT list.
        for (i, _) in group_exprs.iter().enumerate() {
            out_schema.push(None, &format!("__group_{i}"));
        }
        let mut agg_names = Vec::new();
        for (name, _) in &agg_exprs {
            out_schema.push(None, name);
            agg_names.push(name.clone());
        }
        for (name, _) in &having_aggs {
            if !agg_names.contains(name) {
                out_schema.push(None, name);
                agg_names.push(name.clone());
            }
        }

        for (key, rows) in &groups {
            self.cancel.check()?;
            let mut out_row: Row = key.clone();
            let row_eval = self.evaluator(&relation.schema);
            for name in agg_names.iter() {
                let expr = agg_exprs
                    .iter()
                    .chain(having_aggs.iter())
                    .find(|(n, _)| n == name)
                    .map(|(_, e)| e.clone())
                    .unwrap();
                out_row.push(eval_aggregate(&expr, rows, &row_eval)?);
            }
            out_rows.push(out_row);
        }

        if let Some(having) = &stmt.having {
            let having_eval = self.evaluator(&out_schema);
            let mut kept = Vec::new();
            for row in out_rows {
                if having_eval.eval(having, &row)?.as_tribool().is_true() {
                    kept.push(row);
                }
            }
            out_rows = kept;
        }

        Ok(Relation { schema: out_schema, rows: out_rows })
    }

    fn apply_windows(&self, relation: Relation, stmt: &SelectStmt) -> Result<Relation> {
        let exprs = collect_select_exprs(&stmt.columns);
        let window_exprs = collect_window_exprs(&exprs);
        if window_exprs.is_empty() {
            return Ok(relation);
        }
        let eval = self.evaluator(&relation.schema);
        let mut schema = relation.schema.clone();
        let mut rows = relation.rows.clone();

        for (name, w) in &window_exprs {
            let named = w
                .named_window
                .as_ref()
                .and_then(|n| stmt.window_defs.iter().find(|d| d.name.eq_ignore_ascii_case(n)));
            let partition_by: Vec<Expr> = named.map(|d| d.partition_by.clone()).unwrap_or_else(|| w.partition_by.clone());
            let order_by: Vec<OrderByExpr> = named.map(|d| d.order_by.clone()).unwrap_or_else(|| w.order_by.clone());

            let mut indexed: Vec<usize> = (0..rows.len()).collect();
            let keys: Vec<Vec<Value>> = rows
                .iter()
                .map(|r| partition_by.iter().map(|e| eval.eval(e, r)).collect::<Result<_>>())
                .collect::<Result<_>>()?;
            indexed.sort_by(|&a, &b| keys[a].iter().map(Value::group_key_repr).collect::<Vec<_>>()
                .cmp(&keys[b].iter().map(Value::group_key_repr).collect::<Vec<_>>()));

            // stable partition grouping, then order within partition
            let mut partitions: Vec<Vec<usize>> = Vec::new();
            for &idx in &indexed {
                match partitions.last_mut() {
                    Some(last) if !last.is_empty() && keys_equal(&keys[last[0]], &keys[idx]) => last.push(idx),
                    _ => partitions.push(vec![idx]),
                }
            }

            let mut results = vec![Value::Null; rows.len()];
            for partition in &mut partitions {
                self.cancel.check()?;
                if !order_by.is_empty() {
                    let ord_keys: Result<Vec<Vec<Value>>> = partition
                        .iter()
                        .map(|&i| order_by.iter().map(|o| eval.eval(&o.expr, &rows[i])).collect())
                        .collect();
                    let ord_keys = ord_keys?;
                    let mut order_idx: Vec<usize> = (0..partition.len()).collect();
                    order_idx.sort_by(|&a, &b| {
                        for (k, o) in order_by.iter().enumerate() {
                            let cmp = ord_keys[a][k].partial_cmp(&ord_keys[b][k]).unwrap_or(std::cmp::Ordering::Equal);
                            let cmp = if o.asc { cmp } else { cmp.reverse() };
                            if cmp != std::cmp::Ordering::Equal {
                                return cmp;
                            }
                        }
                        std::cmp::Ordering::Equal
                    });
                    *partition = order_idx.into_iter().map(|i| partition[i]).collect();
                }
                self.compute_window_values(w, partition, &rows, &eval, &order_by, &mut results)?;
            }

            schema.push(None, name);
            for (i, row) in rows.iter_mut().enumerate() {
                row.push(results[i].clone());
            }
        }

        Ok(Relation { schema, rows })
    }

    fn compute_window_values(
        &self,
        w: &Expr,
        partition: &[usize],
        rows: &[Row],
        eval: &Evaluator,
        order_by: &[OrderByExpr],
        out: &mut [Value],
    ) -> Result<()> {
        let (name, args) = match w {
            Expr::WindowFunction { func, .. } => match func.as_ref() {
                Expr::FunctionCall { name, args, .. } => (name.to_ascii_uppercase(), args.clone()),
                _ => return Err(Error::internal("window function wraps a non-call expression")),
            },
            _ => unreachable!(),
        };

        match name.as_str() {
            "ROW_NUMBER" => {
                for (rank, &idx) in partition.iter().enumerate() {
                    out[idx] = Value::Integer(rank as i64 + 1);
                }
            }
            "RANK" | "DENSE_RANK" => {
                let mut rank = 0i64;
                let mut dense = 0i64;
                let mut prev: Option<Value> = None;
                for (pos, &idx) in partition.iter().enumerate() {
                    let cur = rows[idx].get(0).cloned().unwrap_or(Value::Null);
                    let changed = prev.as_ref().map(|p| !p.group_key_eq(&cur)).unwrap_or(true);
                    if changed {
                        dense += 1;
                        rank = pos as i64 + 1;
                    }
                    out[idx] = Value::Integer(if name == "RANK" { rank } else { dense });
                    prev = Some(cur);
                }
            }
            "LAG" | "LEAD" => {
                let offset = args.get(1).map(|e| eval.eval(e, &rows[partition[0]])).transpose()?
                    .and_then(|v| v.as_i64())
                    .unwrap_or(1);
                let default = match args.get(2) {
                    Some(e) => eval.eval(e, &rows[partition[0]])?,
                    None => Value::Null,
                };
                for (pos, &idx) in partition.iter().enumerate() {
                    let target = if name == "LAG" { pos as i64 - offset } else { pos as i64 + offset };
                    out[idx] = if target >= 0 && (target as usize) < partition.len() {
                        eval.eval(&args[0], &rows[partition[target as usize]])?
                    } else {
                        default.clone()
                    };
                }
            }
            "FIRST_VALUE" => {
                let v = eval.eval(&args[0], &rows[partition[0]])?;
                for &idx in partition {
                    out[idx] = v.clone();
                }
            }
            "LAST_VALUE" => {
                // Default frame is RANGE BETWEEN UNBOUNDED PRECEDING AND
                // CURRENT ROW when ORDER BY is present, so the frame's last
                // row is the current row itself; only an unordered partition
                // falls back to the partition's true final row.
                for (pos, &idx) in partition.iter().enumerate() {
                    let frame_end = if order_by.is_empty() { partition.len() - 1 } else { pos };
                    out[idx] = eval.eval(&args[0], &rows[partition[frame_end]])?;
                }
            }
            "NTILE" => {
                let n = args.get(0).map(|e| eval.eval(e, &rows[partition[0]])).transpose()?
                    .and_then(|v| v.as_i64())
                    .unwrap_or(1)
                    .max(1);
                let len = partition.len() as i64;
                for (pos, &idx) in partition.iter().enumerate() {
                    let bucket = (pos as i64 * n / len.max(1)) + 1;
                    out[idx] = Value::Integer(bucket.min(n));
                }
            }
            "MOVING_SUM" | "MOVING_AVG" => {
                // MOVING_SUM(n, expr): trailing sliding window of n rows
                // ending at the current row, not an expanding one.
                let n = eval.eval(&args[0], &rows[partition[0]])?.as_i64().unwrap_or(1).max(1) as usize;
                let values: Vec<f64> = partition.iter().map(|&i| eval.eval(&args[1], &rows[i]).map(|v| v.as_f64().unwrap_or(0.0))).collect::<Result<_>>()?;
                for (pos, &idx) in partition.iter().enumerate() {
                    let start = pos.saturating_sub(n - 1);
                    let window = &values[start..=pos];
                    let sum: f64 = window.iter().sum();
                    out[idx] = Value::Float(if name == "MOVING_AVG" { sum / window.len() as f64 } else { sum });
                }
            }
            "MIN_BY" | "MAX_BY" => {
                let value_expr = args.get(0).cloned().unwrap_or(Expr::Literal(Value::Null));
                let key_expr = args.get(1).cloned().unwrap_or(Expr::Literal(Value::Null));
                let values: Vec<Value> = partition.iter().map(|&i| eval.eval(&value_expr, &rows[i])).collect::<Result<_>>()?;
                let keys: Vec<Value> = partition.iter().map(|&i| eval.eval(&key_expr, &rows[i])).collect::<Result<_>>()?;
                // Same default-frame rule as LAST_VALUE.
                for (pos, &idx) in partition.iter().enumerate() {
                    let frame_end = if order_by.is_empty() { values.len() } else { pos + 1 };
                    let mut acc = Accumulator::new(&name, false, None);
                    for (v, k) in values[..frame_end].iter().zip(&keys[..frame_end]) {
                        acc.feed_pair(v, k);
                    }
                    out[idx] = acc.finish();
                }
            }
            agg if functions::is_aggregate(agg) => {
                let arg = args.get(0).cloned().unwrap_or(Expr::Literal(Value::Null));
                let values: Vec<Value> = partition.iter().map(|&i| eval.eval(&arg, &rows[i])).collect::<Result<_>>()?;
                // Same default-frame rule as LAST_VALUE: an ordered partition
                // bounds the aggregate to rows up to and including the
                // current one; an unordered partition aggregates the whole
                // partition for every row.
                for (pos, &idx) in partition.iter().enumerate() {
                    let frame_end = if order_by.is_empty() { values.len() } else { pos + 1 };
                    let mut acc = Accumulator::new(agg, false, None);
                    for v in &values[..frame_end] {
                        acc.feed(v);
                    }
                    out[idx] = acc.finish();
                }
            }
            other => return Err(Error::ty(format!("unknown window function '{other}'"))),
        }
        Ok(())
    }

    fn project(&self, relation: &Relation, columns: &[SelectColumn]) -> Result<(Vec<String>, Vec<Row>)> {
        let eval = self.evaluator(&relation.schema);
        let mut out_names = Vec::new();
        for col in columns {
            match col {
                SelectColumn::Star | SelectColumn::QualifiedStar(_) => {
                    out_names.extend(relation.schema.names.iter().cloned());
                }
                SelectColumn::Column(name) => out_names.push(name.clone()),
                SelectColumn::Expr(expr, alias) => out_names.push(alias.clone().unwrap_or_else(|| render_expr(expr))),
            }
        }

        let mut out_rows = Vec::with_capacity(relation.rows.len());
        for row in &relation.rows {
            let mut out_row = Vec::new();
            for col in columns {
                match col {
                    SelectColumn::Star | SelectColumn::QualifiedStar(_) => out_row.extend(row.clone()),
                    SelectColumn::Column(name) => {
                        let pos = relation.schema.resolve(name).ok_or_else(|| Error::catalog(format!("unknown column '{name}'")))?;
                        out_row.push(row[pos].clone());
                    }
                    SelectColumn::Expr(expr, _) => out_row.push(eval.eval(expr, row)?),
                }
            }
            out_rows.push(out_row);
        }

        Ok((out_names, out_rows))
    }

    /// Sorts `rows` (the already-projected output) using order-by keys
    /// evaluated against `relation` (the pre-projection rows, index-aligned
    /// with `rows`), so ORDER BY can reference columns not in the SELECT
    /// list.
    fn sort_rows(&self, rows: Vec<Row>, src_indices: &[usize], order_by: &[OrderByExpr], relation: &Relation) -> Result<Vec<Row>> {
        let eval = self.evaluator(&relation.schema);
        let keys: Result<Vec<Vec<Value>>> = src_indices
            .iter()
            .map(|&src| order_by.iter().map(|o| eval.eval(&o.expr, &relation.rows[src])).collect())
            .collect();
        let keys = keys?;
        let mut indices: Vec<usize> = (0..rows.len()).collect();
        indices.sort_by(|&a, &b| {
            for (k, o) in order_by.iter().enumerate() {
                let (ka, kb) = (&keys[a][k], &keys[b][k]);
                let cmp = match (ka.is_null(), kb.is_null()) {
                    (true, true) => std::cmp::Ordering::Equal,
                    (true, false) => {
                        if o.nulls_first.unwrap_or(!o.asc) {
                            std::cmp::Ordering::Less
                        } else {
                            std::cmp::Ordering::Greater
                        }
                    }
                    (false, true) => {
                        if o.nulls_first.unwrap_or(!o.asc) {
                            std::cmp::Ordering::Greater
                        } else {
                            std::cmp::Ordering::Less
                        }
                    }
                    (false, false) => {
                        let c = ka.partial_cmp(kb).unwrap_or(std::cmp::Ordering::Equal);
                        if o.asc {
                            c
                        } else {
                            c.reverse()
                        }
                    }
                };
                if cmp != std::cmp::Ordering::Equal {
                    return cmp;
                }
            }
            std::cmp::Ordering::Equal
        });
        Ok(indices.into_iter().map(|i| rows[i].clone()).collect())
    }

    fn execute_insert(&mut self, stmt: &InsertStmt) -> Result<QueryResult> {
        let schema = self.storage.schema(&stmt.table)?;
        let empty_schema = RowSchema::new();
        let eval = Evaluator::new(&empty_schema, self.params, self);
        let mut affected = 0;
        for values in &stmt.values {
            let mut row: Row = vec![Value::Null; schema.columns.len()];
            match &stmt.columns {
                Some(names) => {
                    for (name, expr) in names.iter().zip(values.iter()) {
                        let pos = schema
                            .get_column_position(name)
                            .ok_or_else(|| Error::catalog(format!("unknown column '{name}'")))?;
                        row[pos] = eval.eval(expr, &[])?;
                    }
                }
                None => {
                    for (pos, expr) in values.iter().enumerate() {
                        row[pos] = eval.eval(expr, &[])?;
                    }
                }
            }
            for (pos, col) in schema.columns.iter().enumerate() {
                if row[pos].is_null() {
                    if let Some(default) = &col.default {
                        row[pos] = default.clone();
                    }
                }
            }
            schema.validate_row(&row)?;
            self.storage.insert(&stmt.table, row)?;
            affected += 1;
        }
        Ok(QueryResult::Modification { affected_rows: affected })
    }

    fn execute_update(&mut self, stmt: &UpdateStmt) -> Result<QueryResult> {
        let schema = self.storage.schema(&stmt.table)?;
        let mut row_schema = RowSchema::new();
        for col in &schema.columns {
            row_schema.push(Some(&stmt.table), &col.name);
        }
        let eval = self.evaluator(&row_schema);
        let rows = self.storage.scan(&stmt.table)?;
        let mut affected = 0;
        for (row_id, mut row) in rows {
            let keep = match &stmt.where_clause {
                Some(expr) => eval.eval(expr, &row)?.as_tribool().is_true(),
                None => true,
            };
            if !keep {
                continue;
            }
            for (col_name, expr) in &stmt.assignments {
                let pos = schema
                    .get_column_position(col_name)
                    .ok_or_else(|| Error::catalog(format!("unknown column '{col_name}'")))?;
                row[pos] = eval.eval(expr, &row)?;
            }
            schema.validate_row(&row)?;
            self.storage.update(&stmt.table, row_id, row)?;
            affected += 1;
        }
        Ok(QueryResult::Modification { affected_rows: affected })
    }

    fn execute_delete(&mut self, stmt: &DeleteStmt) -> Result<QueryResult> {
        let schema = self.storage.schema(&stmt.table)?;
        let mut row_schema = RowSchema::new();
        for col in &schema.columns {
            row_schema.push(Some(&stmt.table), &col.name);
        }
        let eval = self.evaluator(&row_schema);
        let rows = self.storage.scan(&stmt.table)?;
        let mut affected = 0;
        for (row_id, row) in rows {
            let delete = match &stmt.where_clause {
                Some(expr) => eval.eval(expr, &row)?.as_tribool().is_true(),
                None => true,
            };
            if delete {
                self.storage.delete(&stmt.table, row_id)?;
                affected += 1;
            }
        }
        Ok(QueryResult::Modification { affected_rows: affected })
    }

    fn execute_create_table(&mut self, stmt: &CreateTableStmt) -> Result<QueryResult> {
        if stmt.if_not_exists && self.storage.schema(&stmt.table).is_ok() {
            return Ok(QueryResult::Definition { message: format!("table '{}' already exists", stmt.table) });
        }
        let columns: Vec<ColumnDef> = stmt
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let col_type = to_column_type(&c.data_type);
                let default = c.default.as_ref().map(|e| const_eval(e)).transpose()?;
                let mut def = ColumnDef::new(&c.name, col_type, i);
                if !c.nullable {
                    def = def.not_null();
                }
                if let Some(default) = default {
                    def = def.with_default(default);
                }
                Ok(def)
            })
            .collect::<Result<_>>()?;
        let mut schema = TableSchema::new(&stmt.table, columns);
        if let Some(pk) = &stmt.primary_key {
            schema = schema.with_primary_key(pk.clone());
        }
        self.storage.create_table(schema)?;
        Ok(QueryResult::Definition { message: format!("table '{}' created", stmt.table) })
    }

    fn execute_create_index(&mut self, stmt: &CreateIndexStmt) -> Result<QueryResult> {
        let index_type = if stmt.unique { crate::types::IndexType::Unique } else { crate::types::IndexType::BTree };
        let index = IndexDef { name: stmt.index_name.clone(), table_name: stmt.table.clone(), columns: stmt.columns.clone(), index_type };
        self.storage.create_index(index)?;
        Ok(QueryResult::Definition { message: format!("index '{}' created", stmt.index_name) })
    }

    fn execute_drop_table(&mut self, stmt: &DropTableStmt) -> Result<QueryResult> {
        self.storage.drop_table(&stmt.table, stmt.if_exists)?;
        Ok(QueryResult::Definition { message: format!("table '{}' dropped", stmt.table) })
    }

    fn execute_drop_index(&mut self, stmt: &DropIndexStmt) -> Result<QueryResult> {
        self.storage.drop_index(&stmt.index_name)?;
        Ok(QueryResult::Definition { message: format!("index '{}' dropped", stmt.index_name) })
    }

    fn execute_show_tables(&mut self) -> Result<QueryResult> {
        let tables = self.storage.list_tables()?;
        Ok(QueryResult::Select {
            columns: vec!["table_name".to_string()],
            rows: tables.into_iter().map(|t| vec![Value::Text(t)]).collect(),
        })
    }

    fn execute_describe_table(&mut self, table: &str) -> Result<QueryResult> {
        let schema = self.storage.schema(table)?;
        let rows = schema
            .columns
            .iter()
            .map(|c| {
                vec![
                    Value::Text(c.name.clone()),
                    Value::Text(format!("{:?}", c.col_type)),
                    Value::Bool(c.nullable),
                ]
            })
            .collect();
        Ok(QueryResult::Select { columns: vec!["column".into(), "type".into(), "nullable".into()], rows })
    }
}

fn strip_set_op(stmt: &SelectStmt) -> SelectStmt {
    let mut s = stmt.clone();
    s.set_op = None;
    s
}

fn rows_equal(a: &Row, b: &Row) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.group_key_eq(y))
}

fn keys_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.group_key_eq(y))
}

fn dedup_rows(rows: &mut Vec<Row>) {
    let mut seen: Vec<Vec<String>> = Vec::new();
    let mut out = Vec::new();
    for row in rows.drain(..) {
        let repr: Vec<String> = row.iter().map(Value::group_key_repr).collect();
        if !seen.contains(&repr) {
            seen.push(repr);
            out.push(row);
        }
    }
    *rows = out;
}

/// Applies a set operator with multiset (bag) semantics for ALL variants and
/// deduplicated semantics otherwise (spec §4.8).
fn apply_set_op(op: SetOp, left: Relation, right: Relation) -> Result<Relation> {
    if left.schema.names.len() != right.schema.names.len() {
        return Err(Error::ty("set operation arms must have the same number of columns"));
    }
    let mut rows = match op {
        SetOp::Union | SetOp::UnionAll => {
            let mut rows = left.rows;
            rows.extend(right.rows);
            rows
        }
        SetOp::Intersect => {
            let mut right_multiset = right.rows.clone();
            let mut out = Vec::new();
            for row in left.rows {
                if let Some(pos) = right_multiset.iter().position(|r| rows_equal(r, &row)) {
                    right_multiset.remove(pos);
                    out.push(row);
                }
            }
            out
        }
        SetOp::Except => {
            let mut right_multiset = right.rows.clone();
            let mut out = Vec::new();
            for row in left.rows {
                if let Some(pos) = right_multiset.iter().position(|r| rows_equal(r, &row)) {
                    right_multiset.remove(pos);
                } else {
                    out.push(row);
                }
            }
            out
        }
    };
    if !matches!(op, SetOp::UnionAll) {
        dedup_rows(&mut rows);
    }
    Ok(Relation { schema: left.schema, rows })
}

fn collect_select_exprs(columns: &[SelectColumn]) -> Vec<Expr> {
    columns
        .iter()
        .filter_map(|c| match c {
            SelectColumn::Expr(e, _) => Some(e.clone()),
            _ => None,
        })
        .collect()
}

fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { name, .. } => functions::is_aggregate(name),
        Expr::BinaryOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::UnaryOp { expr, .. } => contains_aggregate(expr),
        Expr::Case { when_then, else_expr, .. } => {
            when_then.iter().any(|(c, r)| contains_aggregate(c) || contains_aggregate(r))
                || else_expr.as_ref().map(|e| contains_aggregate(e)).unwrap_or(false)
        }
        Expr::Cast { expr, .. } => contains_aggregate(expr),
        _ => false,
    }
}

fn contains_window_function(exprs: &[Expr]) -> bool {
    exprs.iter().any(|e| matches!(e, Expr::WindowFunction { .. }))
}

fn collect_window_exprs(exprs: &[Expr]) -> Vec<(String, Expr)> {
    exprs
        .iter()
        .filter(|e| matches!(e, Expr::WindowFunction { .. }))
        .map(|e| (render_expr(e), e.clone()))
        .collect()
}

fn collect_aggregate_exprs(exprs: &[Expr]) -> Vec<(String, Expr)> {
    let mut out = Vec::new();
    for e in exprs {
        collect_aggregate_exprs_inner(e, &mut out);
    }
    out
}

fn collect_aggregate_exprs_inner(expr: &Expr, out: &mut Vec<(String, Expr)>) {
    match expr {
        Expr::FunctionCall { name, .. } if functions::is_aggregate(name) => {
            let rendered = render_expr(expr);
            if !out.iter().any(|(n, _)| n == &rendered) {
                out.push((rendered, expr.clone()));
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_aggregate_exprs_inner(left, out);
            collect_aggregate_exprs_inner(right, out);
        }
        Expr::UnaryOp { expr, .. } | Expr::Cast { expr, .. } => collect_aggregate_exprs_inner(expr, out),
        Expr::Case { when_then, else_expr, .. } => {
            for (c, r) in when_then {
                collect_aggregate_exprs_inner(c, out);
                collect_aggregate_exprs_inner(r, out);
            }
            if let Some(e) = else_expr {
                collect_aggregate_exprs_inner(e, out);
            }
        }
        _ => {}
    }
}

fn eval_aggregate(expr: &Expr, rows: &[Row], row_eval: &Evaluator) -> Result<Value> {
    match expr {
        Expr::FunctionCall { name, args, distinct } => {
            if name.eq_ignore_ascii_case("MIN_BY") || name.eq_ignore_ascii_case("MAX_BY") {
                let mut acc = Accumulator::new(name, false, None);
                let value_expr = args.get(0).cloned().unwrap_or(Expr::Literal(Value::Null));
                let key_expr = args.get(1).cloned().unwrap_or(Expr::Literal(Value::Null));
                for row in rows {
                    let v = row_eval.eval(&value_expr, row)?;
                    let k = row_eval.eval(&key_expr, row)?;
                    acc.feed_pair(&v, &k);
                }
                return Ok(acc.finish());
            }
            let mut acc = Accumulator::new(name, *distinct, string_agg_separator(args, row_eval, rows.first())?);
            if name.eq_ignore_ascii_case("COUNT") && matches!(args.first(), None) {
                for _ in rows {
                    acc.feed(&Value::Integer(1));
                }
            } else {
                let arg = args.first().cloned().unwrap_or(Expr::Literal(Value::Integer(1)));
                for row in rows {
                    acc.feed(&row_eval.eval(&arg, row)?);
                }
            }
            Ok(acc.finish())
        }
        _ => Err(Error::internal("expected an aggregate function call")),
    }
}

fn string_agg_separator(args: &[Expr], eval: &Evaluator, sample_row: Option<&Row>) -> Result<Option<String>> {
    if args.len() < 2 {
        return Ok(None);
    }
    let row = sample_row.cloned().unwrap_or_default();
    Ok(Some(eval.eval(&args[1], &row)?.display_text()))
}

/// Renders an expression into its default column label, matching what a
/// SELECT without an explicit alias should show.
fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => name.clone(),
        Expr::QualifiedColumn(q, name) => format!("{q}.{name}"),
        Expr::FunctionCall { name, args, .. } => {
            let rendered: Vec<String> = args.iter().map(render_expr).collect();
            format!("{}({})", name.to_ascii_uppercase(), rendered.join(", "))
        }
        Expr::WindowFunction { func, .. } => render_expr(func),
        Expr::Literal(v) => v.display_text(),
        Expr::BinaryOp { left, right, .. } => format!("{}_{}", render_expr(left), render_expr(right)),
        _ => "expr".to_string(),
    }
}

fn to_column_type(dt: &DataType) -> ColumnType {
    match dt {
        DataType::TinyInt => ColumnType::TinyInt,
        DataType::SmallInt => ColumnType::SmallInt,
        DataType::Integer => ColumnType::Integer,
        DataType::BigInt => ColumnType::BigInt,
        DataType::Float => ColumnType::Float,
        DataType::Double => ColumnType::Double,
        DataType::Decimal(p, s) => ColumnType::Decimal { precision: *p, scale: *s },
        DataType::Boolean => ColumnType::Boolean,
        DataType::Text => ColumnType::Text,
        DataType::Blob => ColumnType::Blob,
        DataType::Date => ColumnType::Date,
        DataType::Time => ColumnType::Time,
        DataType::Timestamp => ColumnType::Timestamp,
        DataType::Json => ColumnType::Json,
        DataType::Uuid => ColumnType::Uuid,
        DataType::Interval => ColumnType::Interval,
        DataType::Geometry => ColumnType::Geometry,
    }
}

fn const_eval(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::UnaryOp { op: UnaryOperator::Minus, expr } => match const_eval(expr)? {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(Error::ty(format!("cannot negate {}", other.type_name()))),
        },
        _ => Err(Error::ty("DEFAULT expressions must be constant")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MemTable {
        tables: Mutex<HashMap<String, TableSchema>>,
        rows: Mutex<HashMap<String, Vec<(RowId, Row)>>>,
        next_id: Mutex<u64>,
    }

    impl MemTable {
        fn new() -> Self {
            Self { tables: Mutex::new(HashMap::new()), rows: Mutex::new(HashMap::new()), next_id: Mutex::new(1) }
        }
    }

    impl TableAccess for MemTable {
        fn schema(&self, table: &str) -> Result<TableSchema> {
            self.tables.lock().unwrap().get(&table.to_ascii_lowercase()).cloned().ok_or_else(|| Error::catalog("no such table"))
        }
        fn scan(&self, table: &str) -> Result<Vec<(RowId, Row)>> {
            Ok(self.rows.lock().unwrap().get(&table.to_ascii_lowercase()).cloned().unwrap_or_default())
        }
        fn insert(&self, table: &str, row: Row) -> Result<RowId> {
            let mut id_guard = self.next_id.lock().unwrap();
            let id = *id_guard;
            *id_guard += 1;
            self.rows.lock().unwrap().entry(table.to_ascii_lowercase()).or_default().push((id, row));
            Ok(id)
        }
        fn update(&self, table: &str, row_id: RowId, row: Row) -> Result<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(entries) = rows.get_mut(&table.to_ascii_lowercase()) {
                if let Some(e) = entries.iter_mut().find(|(id, _)| *id == row_id) {
                    e.1 = row;
                }
            }
            Ok(())
        }
        fn delete(&self, table: &str, row_id: RowId) -> Result<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(entries) = rows.get_mut(&table.to_ascii_lowercase()) {
                entries.retain(|(id, _)| *id != row_id);
            }
            Ok(())
        }
        fn create_table(&self, schema: TableSchema) -> Result<()> {
            self.tables.lock().unwrap().insert(schema.name.to_ascii_lowercase(), schema);
            Ok(())
        }
        fn drop_table(&self, table: &str, _if_exists: bool) -> Result<()> {
            self.tables.lock().unwrap().remove(&table.to_ascii_lowercase());
            Ok(())
        }
        fn create_index(&self, _index: IndexDef) -> Result<()> {
            Ok(())
        }
        fn drop_index(&self, _index_name: &str) -> Result<()> {
            Ok(())
        }
        fn list_tables(&self) -> Result<Vec<String>> {
            Ok(self.tables.lock().unwrap().keys().cloned().collect())
        }
    }

    fn setup() -> MemTable {
        let mem = MemTable::new();
        let schema = TableSchema::new(
            "users",
            vec![
                ColumnDef::new("id", ColumnType::Integer, 0).not_null(),
                ColumnDef::new("name", ColumnType::Text, 1),
                ColumnDef::new("age", ColumnType::Integer, 2),
            ],
        )
        .with_primary_key(vec!["id".to_string()]);
        mem.create_table(schema).unwrap();
        mem.insert("users", vec![Value::Integer(1), Value::Text("alice".into()), Value::Integer(30)]).unwrap();
        mem.insert("users", vec![Value::Integer(2), Value::Text("bob".into()), Value::Integer(25)]).unwrap();
        mem
    }

    #[test]
    fn test_simple_select() {
        let mem = setup();
        let cancel = CancellationToken::none();
        let mut exec = QueryExecutor::new(&mem, &[], &cancel, 10_000);
        let stmt = crate::sql::parse_sql("SELECT name FROM users WHERE age > 26").unwrap();
        let result = exec.execute(&stmt[0]).unwrap();
        let (cols, rows) = result.select_rows().unwrap();
        assert_eq!(cols, &["name".to_string()]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::Text("alice".into()));
    }

    #[test]
    fn test_insert_and_count() {
        let mem = setup();
        let cancel = CancellationToken::none();
        let mut exec = QueryExecutor::new(&mem, &[], &cancel, 10_000);
        let stmts = crate::sql::parse_sql("SELECT COUNT(*) FROM users").unwrap();
        let result = exec.execute(&stmts[0]).unwrap();
        let (_, rows) = result.select_rows().unwrap();
        assert_eq!(rows[0][0], Value::Integer(2));
    }

    #[test]
    fn test_group_by_having() {
        let mem = setup();
        let cancel = CancellationToken::none();
        let mut exec = QueryExecutor::new(&mem, &[], &cancel, 10_000);
        let stmts = crate::sql::parse_sql(
            "SELECT age, COUNT(*) FROM users GROUP BY age HAVING COUNT(*) >= 1",
        )
        .unwrap();
        let result = exec.execute(&stmts[0]).unwrap();
        let (_, rows) = result.select_rows().unwrap();
        assert_eq!(rows.len(), 2);
    }

    fn setup_ab() -> MemTable {
        let mem = MemTable::new();
        let schema = TableSchema::new(
            "t",
            vec![ColumnDef::new("a", ColumnType::Integer, 0), ColumnDef::new("b", ColumnType::Integer, 1)],
        );
        mem.create_table(schema).unwrap();
        for (a, b) in [(1, 10), (1, 20), (2, 5), (2, 15), (3, 7)] {
            mem.insert("t", vec![Value::Integer(a), Value::Integer(b)]).unwrap();
        }
        mem
    }

    #[test]
    fn test_distinct_on_keeps_first_row_under_order_by() {
        let mem = setup_ab();
        let cancel = CancellationToken::none();
        let mut exec = QueryExecutor::new(&mem, &[], &cancel, 10_000);
        let stmts = crate::sql::parse_sql("SELECT DISTINCT ON (a) a, b FROM t ORDER BY a, b DESC").unwrap();
        let result = exec.execute(&stmts[0]).unwrap();
        let (_, rows) = result.select_rows().unwrap();
        assert_eq!(
            rows,
            &[
                vec![Value::Integer(1), Value::Integer(20)],
                vec![Value::Integer(2), Value::Integer(15)],
                vec![Value::Integer(3), Value::Integer(7)],
            ]
        );
    }

    #[test]
    fn test_moving_sum_and_moving_avg() {
        let mem = setup_ab();
        let cancel = CancellationToken::none();
        let mut exec = QueryExecutor::new(&mem, &[], &cancel, 10_000);
        let stmts = crate::sql::parse_sql(
            "SELECT b, MOVING_SUM(2, b) OVER (ORDER BY b) FROM t ORDER BY b",
        )
        .unwrap();
        let result = exec.execute(&stmts[0]).unwrap();
        let (_, rows) = result.select_rows().unwrap();
        // b in ORDER BY b order: 5,7,10,15,20; trailing window of 2.
        let sums: Vec<f64> = rows.iter().map(|r| r[1].as_f64().unwrap()).collect();
        assert_eq!(sums, vec![5.0, 12.0, 17.0, 25.0, 35.0]);
    }

    #[test]
    fn test_last_value_bounded_by_current_row() {
        let mem = setup_ab();
        let cancel = CancellationToken::none();
        let mut exec = QueryExecutor::new(&mem, &[], &cancel, 10_000);
        let stmts = crate::sql::parse_sql(
            "SELECT b, LAST_VALUE(b) OVER (ORDER BY b) FROM t ORDER BY b",
        )
        .unwrap();
        let result = exec.execute(&stmts[0]).unwrap();
        let (_, rows) = result.select_rows().unwrap();
        // With the default RANGE BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
        // frame, LAST_VALUE tracks the current row, not the partition's end.
        for row in rows {
            assert_eq!(row[0], row[1]);
        }
    }

    #[test]
    fn test_recursive_cte_guarded_by_where_terminates() {
        let mem = MemTable::new();
        let cancel = CancellationToken::none();
        let mut exec = QueryExecutor::new(&mem, &[], &cancel, 10_000);
        let stmts = crate::sql::parse_sql(
            "WITH RECURSIVE nums AS (SELECT 1 n UNION ALL SELECT n+1 FROM nums WHERE n < 5) SELECT n FROM nums ORDER BY n",
        )
        .unwrap();
        let result = exec.execute(&stmts[0]).unwrap();
        let (_, rows) = result.select_rows().unwrap();
        let n: Vec<i64> = rows.iter().map(|r| r[0].as_i64().unwrap()).collect();
        assert_eq!(n, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_recursive_cte_without_bound_hits_the_safety_cap() {
        let mem = MemTable::new();
        let cancel = CancellationToken::none();
        let mut exec = QueryExecutor::new(&mem, &[], &cancel, 3);
        let stmts = crate::sql::parse_sql(
            "WITH RECURSIVE nums AS (SELECT 1 n UNION ALL SELECT n+1 FROM nums) SELECT n FROM nums",
        )
        .unwrap();
        let err = exec.execute(&stmts[0]).unwrap_err();
        assert_eq!(err.code(), "57014");
    }
}
