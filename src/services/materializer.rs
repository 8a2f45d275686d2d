// Result materialization
//
// Runs one statement (or a `;` separated script) against a connection and turns
// the cursor into generic rows of string records.

use crate::api::middleware::AppError;
use crate::models::{QueryResult, Record, Row, COLUMNS_LABEL};
use crate::services::context::QueryContext;
use crate::services::database::adapter::{BoxedCursor, SqlConnection};

/// Execute `sql` and decode every row.
///
/// Uses the connection's row path and falls back to generic execution when the
/// driver returns no cursor. The column list is attached as the `_columns` label.
/// Any decode failure aborts the whole call.
pub async fn execute(
    conn: &dyn SqlConnection,
    sql: &str,
    ctx: &QueryContext,
) -> Result<QueryResult, AppError> {
    tracing::debug!(dialect = %conn.dialect(), "executing: {}", sql);

    let cursor = match ctx.run(conn.fetch(sql)).await? {
        Some(cursor) => cursor,
        None => {
            tracing::debug!("no cursor for statement, falling back to generic execution");
            ctx.run(conn.execute(sql)).await?
        }
    };

    materialize(cursor, ctx)
}

fn materialize(mut cursor: BoxedCursor, ctx: &QueryContext) -> Result<QueryResult, AppError> {
    let columns = cursor.columns().to_vec();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    let mut result = QueryResult::default();
    if let Ok(encoded) = serde_json::to_string(&names) {
        result.meta.labels.push(Record::new(COLUMNS_LABEL, encoded));
    }

    while let Some(values) = cursor.next_row()? {
        ctx.check()?;

        if values.len() != columns.len() {
            return Err(AppError::Decode(format!(
                "row has {} values but the result declares {} columns",
                values.len(),
                columns.len()
            )));
        }

        let data = columns
            .iter()
            .zip(values)
            .map(|(column, value)| {
                let rendered = value.render().unwrap_or_else(|| {
                    tracing::warn!(
                        column = %column.name,
                        column_type = %column.type_name,
                        "unsupported column type, value omitted"
                    );
                    String::new()
                });
                Record::new(column.name.clone(), rendered)
            })
            .collect();
        result.push_row(Row { data });
    }

    Ok(result)
}

/// Execute every statement of a `;` separated script in order.
///
/// Returns `Ok(None)` when the text holds no statement at all. Rows of all
/// statements are concatenated; labels are those of the last statement.
pub async fn execute_script(
    conn: &dyn SqlConnection,
    sql: &str,
    ctx: &QueryContext,
) -> Result<Option<QueryResult>, AppError> {
    let statements = split_statements(sql);
    let mut merged: Option<QueryResult> = None;

    for statement in statements {
        let result = execute(conn, statement, ctx).await?;
        merged = Some(match merged {
            None => result,
            Some(mut acc) => {
                for row in result.items {
                    acc.push_row(row);
                }
                acc.meta.labels = result.meta.labels;
                acc
            }
        });
    }

    Ok(merged)
}

/// Split SQL text on `;` outside of quotes and comments, dropping statements
/// made only of whitespace and comments.
pub fn split_statements(sql: &str) -> Vec<&str> {
    #[derive(PartialEq)]
    enum State {
        Code,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let mut statements = Vec::new();
    let mut state = State::Code;
    let mut start = 0;
    let mut has_code = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match state {
            State::Code => match ch {
                '\'' | '"' | '`' => {
                    has_code = true;
                    state = State::Quoted(ch);
                }
                '-' if chars.peek().map(|(_, c)| *c) == Some('-') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek().map(|(_, c)| *c) == Some('*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                ';' => {
                    if has_code {
                        statements.push(&sql[start..idx]);
                    }
                    has_code = false;
                    start = idx + ch.len_utf8();
                }
                c if !c.is_whitespace() => has_code = true,
                _ => {}
            },
            State::Quoted(quote) => {
                if ch == quote {
                    // a doubled quote is an escaped quote, stay inside the literal
                    if chars.peek().map(|(_, c)| *c) == Some(quote) {
                        chars.next();
                    } else {
                        state = State::Code;
                    }
                }
            }
            State::LineComment => {
                if ch == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if ch == '*' && chars.peek().map(|(_, c)| *c) == Some('/') {
                    chars.next();
                    state = State::Code;
                }
            }
        }
    }
    if has_code {
        statements.push(&sql[start..]);
    }

    statements.into_iter().map(str::trim).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::adapter::ColumnValue;
    use crate::services::database::mock::{MockConnection, MockResult};
    use crate::services::dialect::Dialect;
    use std::time::Duration;

    fn mixed_row_result() -> MockResult {
        MockResult::rows(
            &[("id", "int"), ("name", "varchar"), ("deleted", "datetime"), ("active", "bool")],
            vec![vec![
                ColumnValue::Int(42),
                ColumnValue::Text("x".into()),
                ColumnValue::Null,
                ColumnValue::Bool(true),
            ]],
        )
    }

    #[tokio::test]
    async fn test_decodes_mixed_row() {
        let conn = MockConnection::new(Dialect::MySql).on("select * from t", mixed_row_result());

        let result = execute(&conn, "select * from t", &QueryContext::new()).await.unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(
            result.items[0].data,
            vec![
                Record::new("id", "42"),
                Record::new("name", "x"),
                Record::new("deleted", "null"),
                Record::new("active", "true"),
            ]
        );
        assert_eq!(result.data, result.items[0].data);
        assert_eq!(result.label(COLUMNS_LABEL), Some(r#"["id","name","deleted","active"]"#));
    }

    #[tokio::test]
    async fn test_unsupported_value_is_omitted() {
        let conn = MockConnection::new(Dialect::Postgres).on(
            "select location from places",
            MockResult::rows(
                &[("location", "point"), ("id", "int8")],
                vec![vec![ColumnValue::Unsupported("point".into()), ColumnValue::Int(1)]],
            ),
        );

        let result = execute(&conn, "select location from places", &QueryContext::new())
            .await
            .unwrap();
        assert_eq!(
            result.items[0].data,
            vec![Record::new("location", ""), Record::new("id", "1")]
        );
    }

    #[tokio::test]
    async fn test_falls_back_when_no_cursor() {
        let conn = MockConnection::new(Dialect::MySql).on("delete from t", MockResult::NoCursor);

        let result = execute(&conn, "delete from t", &QueryContext::new()).await.unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.label(COLUMNS_LABEL), Some("[]"));
        assert_eq!(conn.executed(), vec!["delete from t".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_failure_aborts() {
        let conn = MockConnection::new(Dialect::MySql).on(
            "select n from t",
            MockResult::Rows {
                columns: vec![("n".into(), "int".into())],
                rows: vec![Ok(vec![ColumnValue::Int(1)]), Err("bad varint".into())],
            },
        );

        let err = execute(&conn, "select n from t", &QueryContext::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Decode(msg) if msg.contains("bad varint")));
    }

    #[tokio::test]
    async fn test_row_width_mismatch_is_decode_error() {
        let conn = MockConnection::new(Dialect::MySql).on(
            "select a, b from t",
            MockResult::rows(&[("a", "int"), ("b", "int")], vec![vec![ColumnValue::Int(1)]]),
        );

        let err = execute(&conn, "select a, b from t", &QueryContext::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[tokio::test]
    async fn test_execution_error_surfaces() {
        let conn = MockConnection::new(Dialect::MySql).on("select boom", MockResult::error("syntax error"));

        let err = execute(&conn, "select boom", &QueryContext::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Database(msg) if msg.contains("syntax error")));
    }

    #[tokio::test]
    async fn test_cancellation_fails_execution() {
        let conn = MockConnection::new(Dialect::MySql)
            .on("select sleep(10)", mixed_row_result())
            .with_delay("select sleep(10)", Duration::from_secs(10));
        let ctx = QueryContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = execute(&conn, "select sleep(10)", &ctx).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[tokio::test]
    async fn test_script_runs_statements_in_order() {
        let conn = MockConnection::new(Dialect::Sqlite)
            .on(
                "select 1 as a",
                MockResult::rows(&[("a", "integer")], vec![vec![ColumnValue::Int(1)]]),
            )
            .on(
                "select 'x;y' as b",
                MockResult::rows(&[("b", "text")], vec![vec![ColumnValue::Text("x;y".into())]]),
            );

        let result = execute_script(&conn, "select 1 as a; select 'x;y' as b;", &QueryContext::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[0].get("a"), Some("1"));
        assert_eq!(result.items[1].get("b"), Some("x;y"));
        assert_eq!(result.label(COLUMNS_LABEL), Some(r#"["b"]"#));
    }

    #[tokio::test]
    async fn test_blank_script_returns_none() {
        let conn = MockConnection::new(Dialect::MySql);
        for sql in ["", "  ; ", ";;\n"] {
            let result = execute_script(&conn, sql, &QueryContext::new()).await.unwrap();
            assert!(result.is_none(), "{:?} produced a result", sql);
        }
        assert!(conn.executed().is_empty());
    }

    #[test]
    fn test_split_statements_respects_quotes_and_comments() {
        let sql = "insert into t values ('a;b', \"c;d\"); -- trailing; comment\n/* x; */ select `e;f`";
        assert_eq!(
            split_statements(sql),
            vec![
                "insert into t values ('a;b', \"c;d\")",
                "-- trailing; comment\n/* x; */ select `e;f`",
            ]
        );
        assert_eq!(split_statements("select 'it''s;fine'"), vec!["select 'it''s;fine'"]);
        assert!(split_statements(";").is_empty());
        assert!(split_statements(" ; -- note\n ;/* only; a comment */").is_empty());
        assert_eq!(split_statements("-- head\nselect 1;;"), vec!["-- head\nselect 1"]);
    }
}
