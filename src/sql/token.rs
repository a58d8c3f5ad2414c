//! Token types for the SQL lexer (spec §4.1/§4.2).

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // DML / DDL keywords
    Select,
    From,
    Where,
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    Create,
    Table,
    Index,
    Drop,
    Unique,
    // Boolean / predicate keywords
    And,
    Or,
    Not,
    Xor,
    Like,
    Regexp,
    In,
    Between,
    Is,
    Null,
    Exists,
    Any,
    Some,
    All,
    // Clause keywords
    As,
    Order,
    By,
    Asc,
    Desc,
    Nulls,
    First,
    Last,
    Limit,
    Offset,
    Distinct,
    On,
    Group,
    Having,
    // Joins
    Join,
    Left,
    Right,
    Inner,
    Full,
    Outer,
    Cross,
    // Constraints
    Primary,
    Foreign,
    References,
    Key,
    Default,
    Check,
    // Set operations
    Union,
    Intersect,
    Except,
    // CTEs
    With,
    Recursive,
    // CASE
    Case,
    When,
    Then,
    Else,
    End,
    // CAST
    Cast,
    // Window functions
    Over,
    Partition,
    Window,
    Rows,
    Range,
    Preceding,
    Following,
    Unbounded,
    Current,
    Row,
    // Misc
    Begin,
    Transaction,
    Commit,
    Rollback,
    Savepoint,
    Release,
    To,
    If,
    Show,
    Describe,
    Tables,
    Array,

    // Data types
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Decimal,
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

    // Operators
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Concat, // ||
    Assign, // :=

    // Delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Dot,

    // Literals
    Number(f64),
    IntegerLiteral(i64),
    String(String),
    Identifier(String),
    QuotedIdentifier(String),
    Param(usize),
    True,
    False,

    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(token_type: TokenType, line: usize, column: usize) -> Self {
        Self { token_type, line, column }
    }
}

impl TokenType {
    pub fn from_keyword(s: &str) -> Option<Self> {
        use TokenType::*;
        match s.to_lowercase().as_str() {
            "select" => Some(Select),
            "from" => Some(From),
            "where" => Some(Where),
            "insert" => Some(Insert),
            "into" => Some(Into),
            "values" => Some(Values),
            "update" => Some(Update),
            "set" => Some(Set),
            "delete" => Some(Delete),
            "create" => Some(Create),
            "table" => Some(Table),
            "index" => Some(Index),
            "drop" => Some(Drop),
            "unique" => Some(Unique),
            "and" => Some(And),
            "or" => Some(Or),
            "not" => Some(Not),
            "xor" => Some(Xor),
            "like" => Some(Like),
            "regexp" | "rlike" => Some(Regexp),
            "in" => Some(In),
            "between" => Some(Between),
            "is" => Some(Is),
            "null" => Some(Null),
            "exists" => Some(Exists),
            "any" => Some(Any),
            "some" => Some(Some),
            "all" => Some(All),
            "as" => Some(As),
            "order" => Some(Order),
            "by" => Some(By),
            "asc" => Some(Asc),
            "desc" => Some(Desc),
            "nulls" => Some(Nulls),
            "first" => Some(First),
            "last" => Some(Last),
            "limit" => Some(Limit),
            "offset" => Some(Offset),
            "distinct" => Some(Distinct),
            "on" => Some(On),
            "group" => Some(Group),
            "having" => Some(Having),
            "join" => Some(Join),
            "left" => Some(Left),
            "right" => Some(Right),
            "inner" => Some(Inner),
            "full" => Some(Full),
            "outer" => Some(Outer),
            "cross" => Some(Cross),
            "primary" => Some(Primary),
            "foreign" => Some(Foreign),
            "references" => Some(References),
            "key" => Some(Key),
            "default" => Some(Default),
            "check" => Some(Check),
            "union" => Some(Union),
            "intersect" => Some(Intersect),
            "except" => Some(Except),
            "with" => Some(With),
            "recursive" => Some(Recursive),
            "case" => Some(Case),
            "when" => Some(When),
            "then" => Some(Then),
            "else" => Some(Else),
            "end" => Some(End),
            "cast" => Some(Cast),
            "over" => Some(Over),
            "partition" => Some(Partition),
            "window" => Some(Window),
            "rows" => Some(Rows),
            "range" => Some(Range),
            "preceding" => Some(Preceding),
            "following" => Some(Following),
            "unbounded" => Some(Unbounded),
            "current" => Some(Current),
            "row" => Some(Row),
            "begin" | "start" => Some(Begin),
            "transaction" | "work" => Some(Transaction),
            "commit" => Some(Commit),
            "rollback" => Some(Rollback),
            "savepoint" => Some(Savepoint),
            "release" => Some(Release),
            "to" => Some(To),
            "if" => Some(If),
            "show" => Some(Show),
            "describe" | "desc_stmt" => Some(Describe),
            "tables" => Some(Tables),
            "array" => Some(Array),
            "tinyint" => Some(TinyInt),
            "smallint" => Some(SmallInt),
            "int" | "integer" => Some(Integer),
            "bigint" => Some(BigInt),
            "float" | "real" => Some(Float),
            "double" => Some(Double),
            "decimal" | "numeric" => Some(Decimal),
            "boolean" | "bool" => Some(Boolean),
            "text" | "varchar" | "char" | "string" => Some(Text),
            "blob" | "bytea" | "binary" => Some(Blob),
            "date" => Some(Date),
            "time" => Some(Time),
            "timestamp" | "datetime" => Some(Timestamp),
            "json" | "jsonb" => Some(Json),
            "uuid" => Some(Uuid),
            "interval" => Some(Interval),
            "geometry" | "geom" => Some(Geometry),
            "true" => Some(True),
            "false" => Some(False),
            _ => None,
        }
    }
}
