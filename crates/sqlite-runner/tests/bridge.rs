use assert_cmd::Command;
use serde_json::{json, Value};
use sqlite_runner::Response;

const BIN: &str = "sqlite-runner";

fn serve(root: &std::path::Path, requests: &[Value]) -> Vec<Response> {
    let mut stdin = String::new();
    for request in requests {
        stdin.push_str(&request.to_string());
        stdin.push('\n');
    }
    stdin.push_str("\nnot json\n");

    let output = Command::cargo_bin(BIN)
        .unwrap()
        .arg("serve")
        .arg("--root")
        .arg(root)
        .env("SQLITE_RUNNER_LOG", "debug")
        .write_stdin(stdin)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let mut responses: Vec<Response> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    responses.sort_by_key(|r| r.callback);
    responses
}

#[test]
fn serving_requests_over_stdio() {
    let dir = tempfile::tempdir().unwrap();

    let responses = serve(
        dir.path(),
        &[
            json!({"action": "echoStringValue", "callback": 1, "value": "hi"}),
            json!({"action": "open", "callback": 2, "options": {"name": "a.db"}}),
            json!({"action": "executeSqlBatch", "callback": 3, "dbargs": {"dbname": "a.db"}, "executes": [
                {"sql": "CREATE TABLE t (k, v)"},
            ]}),
            json!({"action": "executeSqlBatch", "callback": 4, "dbargs": {"dbname": "a.db"}, "executes": [
                {"sql": "INSERT INTO t VALUES (?, ?)", "params": ["one", 1]},
                {"sql": "SELECT k, v FROM t"},
            ]}),
            json!({"action": "executeSqlBatch", "callback": 5, "dbargs": {"dbname": "b.db"}, "executes": [
                {"sql": "SELECT 1"},
            ]}),
            json!({"action": "close", "callback": 6, "path": "a.db"}),
        ],
    );

    insta::assert_json_snapshot!(responses, {
        "[0].message" => "[parse error]",
    }, @r###"
    [
      {
        "callback": -1,
        "success": false,
        "code": 1,
        "message": "[parse error]"
      },
      {
        "callback": 1,
        "success": true,
        "code": 0,
        "message": "hi"
      },
      {
        "callback": 2,
        "success": true,
        "code": 0
      },
      {
        "callback": 3,
        "success": true,
        "code": 0,
        "results": [
          {
            "rows": [],
            "rowsAffected": 0
          }
        ]
      },
      {
        "callback": 4,
        "success": true,
        "code": 0,
        "results": [
          {
            "rows": [],
            "rowsAffected": 1,
            "insertId": 1
          },
          {
            "rows": [
              {
                "k": "one",
                "v": 1
              }
            ],
            "rowsAffected": 0
          }
        ]
      },
      {
        "callback": 5,
        "success": false,
        "code": 1,
        "message": "database not open"
      },
      {
        "callback": 6,
        "success": true,
        "code": 0
      }
    ]
    "###);

    assert!(dir.path().join("a.db").exists());
}

#[test]
fn open_databases_are_closed_at_exit() {
    let dir = tempfile::tempdir().unwrap();

    let responses = serve(
        dir.path(),
        &[
            json!({"action": "open", "callback": 1, "options": {"name": "x/legacy.db", "androidOldDatabaseImplementation": true}}),
            json!({"action": "executeSqlBatch", "callback": 2, "dbargs": {"dbname": "x/legacy.db"}, "executes": [
                {"sql": "CREATE TABLE t (x)"},
            ]}),
        ],
    );
    assert_eq!(responses.len(), 3);
    assert!(responses[1..].iter().all(|r| r.success));

    // A rollback journal is removed once the connection is closed.
    assert!(dir.path().join("x/legacy.db").exists());
    assert!(!dir.path().join("x/legacy.db-journal").exists());

    // The database is no longer in use, and may be deleted.
    Command::cargo_bin(BIN)
        .unwrap()
        .args(["delete", "--root"])
        .arg(dir.path())
        .arg("x/legacy.db")
        .assert()
        .success();
    assert!(!dir.path().join("x/legacy.db").exists());
}

#[test]
fn delete_rejects_escaping_names() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin(BIN)
        .unwrap()
        .args(["delete", "--root"])
        .arg(dir.path())
        .arg("../outside.db")
        .assert()
        .failure();
}
