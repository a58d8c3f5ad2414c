//! End-to-end scenario tests seeded directly from the spec's testable
//! properties: DDL + round trip, aggregate + HAVING, DISTINCT ON, window
//! functions, recursive CTEs, and three-valued WHERE.

use tinysql::{CancellationToken, DBConfig, Database, IsolationLevel, Value};

fn open() -> Database {
    Database::open(DBConfig::for_testing()).unwrap()
}

fn run(db: &Database, tenant: &str, sql: &str) -> (Vec<String>, Vec<Vec<Value>>) {
    let results = db
        .execute_autocommit(tenant, IsolationLevel::ReadCommitted, sql, &[], &CancellationToken::none())
        .unwrap();
    let (cols, rows) = results[0].select_rows().unwrap();
    (cols.to_vec(), rows.to_vec())
}

fn exec(db: &Database, tenant: &str, sql: &str) {
    db.execute_autocommit(tenant, IsolationLevel::ReadCommitted, sql, &[], &CancellationToken::none()).unwrap();
}

#[test]
fn ddl_insert_select_round_trip() {
    let db = open();
    exec(&db, "acme", "CREATE TABLE users (id INT, name TEXT, active BOOL)");
    exec(&db, "acme", "INSERT INTO users VALUES (1,'Alice',true),(2,'Bob',false)");
    let (cols, rows) = run(&db, "acme", "SELECT name FROM users WHERE active = true ORDER BY id");
    assert_eq!(cols, vec!["name".to_string()]);
    assert_eq!(rows, vec![vec![Value::Text("Alice".into())]]);
}

#[test]
fn aggregate_with_having() {
    let db = open();
    exec(&db, "acme", "CREATE TABLE t (g INT, v INT)");
    exec(&db, "acme", "INSERT INTO t VALUES (1,10),(1,20),(2,5),(2,15),(3,100),(3,200)");
    let (_, rows) = run(&db, "acme", "SELECT g, SUM(v) s FROM t GROUP BY g HAVING SUM(v) > 30 ORDER BY g");
    assert_eq!(rows, vec![vec![Value::Integer(3), Value::Integer(300)]]);
}

#[test]
fn distinct_on_keeps_first_row_under_order_by() {
    let db = open();
    exec(&db, "acme", "CREATE TABLE t (a INT, b INT)");
    exec(&db, "acme", "INSERT INTO t VALUES (1,10),(1,20),(2,5),(2,15),(3,7)");
    let (_, rows) = run(&db, "acme", "SELECT DISTINCT ON (a) a, b FROM t ORDER BY a, b DESC");
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(1), Value::Integer(20)],
            vec![Value::Integer(2), Value::Integer(15)],
            vec![Value::Integer(3), Value::Integer(7)],
        ]
    );
}

#[test]
fn window_row_number_and_lag() {
    let db = open();
    exec(&db, "acme", "CREATE TABLE t (a INT, b INT)");
    exec(&db, "acme", "INSERT INTO t VALUES (1,10),(1,20),(2,5),(2,15),(3,7)");
    let (_, rows) = run(
        &db,
        "acme",
        "SELECT a, b, ROW_NUMBER() OVER (ORDER BY a,b) rn, LAG(b,1) OVER (ORDER BY a,b) prev FROM t ORDER BY a,b",
    );
    let rn: Vec<i64> = rows.iter().map(|r| r[2].as_i64().unwrap()).collect();
    assert_eq!(rn, vec![1, 2, 3, 4, 5]);
    let prev: Vec<Value> = rows.iter().map(|r| r[3].clone()).collect();
    assert_eq!(
        prev,
        vec![
            Value::Null,
            Value::Integer(10),
            Value::Integer(20),
            Value::Integer(5),
            Value::Integer(15),
        ]
    );
}

#[test]
fn recursive_cte_counts_up() {
    let db = open();
    let (_, rows) = run(
        &db,
        "acme",
        "WITH RECURSIVE nums AS (SELECT 1 n UNION ALL SELECT n+1 FROM nums WHERE n < 5) SELECT n FROM nums ORDER BY n",
    );
    let n: Vec<i64> = rows.iter().map(|r| r[0].as_i64().unwrap()).collect();
    assert_eq!(n, vec![1, 2, 3, 4, 5]);
}

#[test]
fn three_valued_where_drops_null() {
    let db = open();
    exec(&db, "acme", "CREATE TABLE x (flag BOOL)");
    exec(&db, "acme", "INSERT INTO x VALUES (true),(false),(NULL)");
    let (_, rows) = run(&db, "acme", "SELECT COUNT(*) FROM x WHERE flag = TRUE");
    assert_eq!(rows, vec![vec![Value::Integer(1)]]);
}

#[test]
fn runaway_recursive_cte_hits_the_safety_cap() {
    let mut config = DBConfig::for_testing();
    config.recursive_cte_limit = 5;
    let db = Database::open(config).unwrap();
    let err = db
        .execute_autocommit(
            "acme",
            IsolationLevel::ReadCommitted,
            "WITH RECURSIVE nums AS (SELECT 1 n UNION ALL SELECT n+1 FROM nums) SELECT n FROM nums",
            &[],
            &CancellationToken::none(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "57014");
}

#[test]
fn canceled_token_aborts_a_query_in_progress() {
    let db = open();
    exec(&db, "acme", "CREATE TABLE t (id INT)");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = db
        .execute_autocommit("acme", IsolationLevel::ReadCommitted, "SELECT * FROM t", &[], &cancel)
        .unwrap_err();
    assert_eq!(err.code(), "57014");
}

#[test]
fn property_count_star_equals_sum_of_ones() {
    use rand::Rng;
    let db = open();
    exec(&db, "acme", "CREATE TABLE p (v INT)");
    let mut rng = rand::thread_rng();
    let mut values = Vec::new();
    for _ in 0..20 {
        values.push(rng.gen_range(-100..100).to_string());
    }
    exec(&db, "acme", &format!("INSERT INTO p VALUES ({})", values.join("),(")));
    let (_, count_rows) = run(&db, "acme", "SELECT COUNT(*) FROM p");
    let (_, sum_rows) = run(&db, "acme", "SELECT SUM(1) FROM p");
    assert_eq!(count_rows[0][0], sum_rows[0][0]);
}

#[test]
fn property_min_by_matches_order_by_limit_one() {
    let db = open();
    exec(&db, "acme", "CREATE TABLE kv (c TEXT, k INT)");
    exec(&db, "acme", "INSERT INTO kv VALUES ('a',3),('b',1),('c',2)");
    let (_, min_by_rows) = run(&db, "acme", "SELECT MIN_BY(c, k) FROM kv");
    let (_, ordered_rows) = run(&db, "acme", "SELECT c FROM kv ORDER BY k LIMIT 1");
    assert_eq!(min_by_rows[0][0], ordered_rows[0][0]);
}

#[test]
fn save_and_reopen_round_trip_with_tempdir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_path_buf();
    {
        let db = Database::open(DBConfig::for_disk(&path)).unwrap();
        exec(&db, "acme", "CREATE TABLE t (id INT)");
        exec(&db, "acme", "INSERT INTO t VALUES (7)");
    }
    let db = Database::open(DBConfig::for_disk(&path)).unwrap();
    let (_, rows) = run(&db, "acme", "SELECT id FROM t");
    assert_eq!(rows, vec![vec![Value::Integer(7)]]);
}
