//! Abstract syntax tree for the supported SQL surface (spec §4.2).

use crate::types::Value;

#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    CreateTable(CreateTableStmt),
    CreateIndex(CreateIndexStmt),
    DropTable(DropTableStmt),
    DropIndex(DropIndexStmt),
    ShowTables,
    DescribeTable(String),
    Begin(Option<IsolationLevelHint>),
    Commit,
    Rollback,
    Savepoint(String),
    RollbackToSavepoint(String),
    ReleaseSavepoint(String),
}

/// Optional isolation-level hint on `BEGIN` (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevelHint {
    ReadCommitted,
    RepeatableRead,
    SnapshotIsolation,
    Serializable,
}

/// A `WITH [RECURSIVE] name [(cols)] AS (query)` binding.
#[derive(Debug, Clone)]
pub struct CteDef {
    pub name: String,
    pub columns: Option<Vec<String>>,
    pub query: Box<SelectStmt>,
    pub recursive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    UnionAll,
    Intersect,
    Except,
}

/// A SELECT, or a chain of SELECTs joined by set operators.
#[derive(Debug, Clone)]
pub struct SelectStmt {
    pub ctes: Vec<CteDef>,
    pub distinct: Distinct,
    pub columns: Vec<SelectColumn>,
    pub from: Option<TableRef>,
    pub where_clause: Option<Expr>,
    pub group_by: Option<Vec<Expr>>,
    pub having: Option<Expr>,
    pub window_defs: Vec<NamedWindow>,
    pub order_by: Option<Vec<OrderByExpr>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Set operation applied to this SELECT's result and `next`, e.g.
    /// `SELECT ... UNION SELECT ...` chains left-to-right.
    pub set_op: Option<(SetOp, Box<SelectStmt>)>,
}

impl SelectStmt {
    pub fn simple(columns: Vec<SelectColumn>, from: Option<TableRef>) -> Self {
        Self {
            ctes: Vec::new(),
            distinct: Distinct::None,
            columns,
            from,
            where_clause: None,
            group_by: None,
            having: None,
            window_defs: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
            set_op: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Distinct {
    None,
    All,
    On(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub struct NamedWindow {
    pub name: String,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub frame: Option<WindowFrame>,
}

#[derive(Debug, Clone)]
pub enum TableRef {
    Table {
        name: String,
        alias: Option<String>,
    },
    Join {
        left: Box<TableRef>,
        right: Box<TableRef>,
        join_type: JoinType,
        on_condition: Option<Expr>,
    },
    Subquery {
        query: Box<SelectStmt>,
        alias: String,
    },
    /// A reference to a CTE bound earlier in the same statement's `WITH` list.
    CteRef {
        name: String,
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone)]
pub enum SelectColumn {
    Star,
    /// `alias.*`
    QualifiedStar(String),
    Column(String),
    Expr(Expr, Option<String>),
}

#[derive(Debug, Clone)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub asc: bool,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub values: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub table: String,
    pub where_clause: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct CreateTableStmt {
    pub table: String,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal(u8, u8),
    Boolean,
    Text,
    Blob,
    Date,
    Time,
    Timestamp,
    Json,
    Uuid,
    Interval,
    Geometry,
}

#[derive(Debug, Clone)]
pub struct CreateIndexStmt {
    pub index_name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone)]
pub struct DropTableStmt {
    pub table: String,
    pub if_exists: bool,
}

#[derive(Debug, Clone)]
pub struct DropIndexStmt {
    pub index_name: String,
}

/// Scalar/boolean expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    Column(String),
    /// `table.column` or `alias.column`
    QualifiedColumn(String, String),
    Literal(Value),
    Param(usize),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    WindowFunction {
        func: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderByExpr>,
        frame: Option<WindowFrame>,
        /// Reference to a `WINDOW name AS (...)` definition instead of an
        /// inline spec; resolved against `SelectStmt::window_defs`.
        named_window: Option<String>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<SelectStmt>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    Regexp {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Exists {
        subquery: Box<SelectStmt>,
        negated: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        when_then: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        target_type: DataType,
    },
    Subquery(Box<SelectStmt>),
    ArrayLiteral(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowFrameUnit {
    Rows,
    Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(i64),
    CurrentRow,
    Following(i64),
    UnboundedFollowing,
}

#[derive(Debug, Clone)]
pub struct WindowFrame {
    pub unit: WindowFrameUnit,
    pub start: FrameBound,
    pub end: FrameBound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
}

impl BinaryOperator {
    /// Higher binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Or => 1,
            BinaryOperator::Xor => 2,
            BinaryOperator::And => 3,
            BinaryOperator::Eq
            | BinaryOperator::Ne
            | BinaryOperator::Lt
            | BinaryOperator::Gt
            | BinaryOperator::Le
            | BinaryOperator::Ge => 4,
            BinaryOperator::Concat => 5,
            BinaryOperator::Add | BinaryOperator::Sub => 6,
            BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod => 7,
        }
    }
}
