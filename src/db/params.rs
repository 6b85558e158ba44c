//! Parameter preparation and binding.
//!
//! Statements may be written with Oracle-style placeholders (`:name`, `:1`)
//! or with the backend's own (`$1` for PostgreSQL, `?` / `?1` for SQLite).
//! [`prepare`] rewrites the former into the latter and lines the values up
//! in bind order; the `bind_*` functions then attach them to a sqlx query.

use crate::config::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::{Params, QueryParam};
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Postgres, Sqlite};

/// Engine code attached to placeholder/parameter mismatches.
pub const BIND_CODE: &str = "bind";

/// Statement text in the backend's placeholder style plus values in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    pub sql: String,
    pub values: Vec<QueryParam>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    None,
    /// `$1`, `?1` or bare `?`
    Native,
    /// `:1`
    Numbered,
    /// `:name`
    Named,
}

fn bind_error(message: impl Into<String>) -> DbError {
    DbError::execution(
        message,
        Some(BIND_CODE.to_string()),
        "Make the statement placeholders and the supplied parameters agree",
    )
}

/// Rewrite `sql` for `dialect` and order `params` to match its placeholders.
pub fn prepare(sql: &str, params: &Params, dialect: Dialect) -> DbResult<PreparedStatement> {
    if !params.positional.is_empty() && !params.named.is_empty() {
        return Err(bind_error(
            "Statement received both positional and named parameters",
        ));
    }

    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut style = Style::None;
    let mut names: Vec<String> = Vec::new();
    let mut max_index = 0usize;
    let mut anonymous = 0usize;
    let mut copied_to = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => i = skip_quoted(bytes, i),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = find_from(bytes, i, b"\n").map_or(bytes.len(), |p| p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2);
            }
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b':' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                let end = scan_while(bytes, i + 1, |b| b.is_ascii_digit());
                let index = parse_index(&sql[i + 1..end])?;
                set_style(&mut style, Style::Numbered)?;
                max_index = max_index.max(index);
                out.push_str(&sql[copied_to..i]);
                push_placeholder(&mut out, dialect, index);
                copied_to = end;
                i = end;
            }
            b':' if bytes.get(i + 1).is_some_and(|b| is_ident_start(*b)) => {
                let end = scan_while(bytes, i + 1, is_ident_char);
                let name = &sql[i + 1..end];
                set_style(&mut style, Style::Named)?;
                let index = match names.iter().position(|n| n.eq_ignore_ascii_case(name)) {
                    Some(pos) => pos + 1,
                    None => {
                        names.push(name.to_string());
                        names.len()
                    }
                };
                out.push_str(&sql[copied_to..i]);
                push_placeholder(&mut out, dialect, index);
                copied_to = end;
                i = end;
            }
            b'$' if dialect == Dialect::Postgres => {
                if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                    let end = scan_while(bytes, i + 1, |b| b.is_ascii_digit());
                    let index = parse_index(&sql[i + 1..end])?;
                    set_style(&mut style, Style::Native)?;
                    max_index = max_index.max(index);
                    i = end;
                } else {
                    i = skip_dollar_quoted(bytes, i);
                }
            }
            b'?' if dialect == Dialect::Sqlite => {
                set_style(&mut style, Style::Native)?;
                if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                    let end = scan_while(bytes, i + 1, |b| b.is_ascii_digit());
                    max_index = max_index.max(parse_index(&sql[i + 1..end])?);
                    i = end;
                } else {
                    anonymous += 1;
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied_to..]);

    let values = match style {
        Style::None => {
            if !params.is_empty() {
                return Err(bind_error(format!(
                    "Statement has no placeholders but {} parameter(s) were supplied",
                    params.len()
                )));
            }
            Vec::new()
        }
        Style::Named => {
            if !params.positional.is_empty() {
                return Err(bind_error(
                    "Statement uses named placeholders but received positional parameters",
                ));
            }
            let mut values = Vec::with_capacity(names.len());
            for name in &names {
                let value = params
                    .get(name)
                    .ok_or_else(|| bind_error(format!("Missing value for :{}", name)))?;
                values.push(value.clone());
            }
            if let Some((unused, _)) = params
                .named
                .iter()
                .find(|(n, _)| !names.iter().any(|m| m.eq_ignore_ascii_case(n)))
            {
                return Err(bind_error(format!(
                    "Parameter '{}' does not appear in the statement",
                    unused
                )));
            }
            values
        }
        Style::Numbered | Style::Native => {
            if !params.named.is_empty() {
                return Err(bind_error(
                    "Statement uses positional placeholders but received named parameters",
                ));
            }
            let expected = max_index.max(anonymous);
            if max_index > 0 && anonymous > 0 {
                return Err(bind_error("Statement mixes numbered and anonymous placeholders"));
            }
            if expected != params.positional.len() {
                return Err(bind_error(format!(
                    "Statement expects {} positional parameter(s), got {}",
                    expected,
                    params.positional.len()
                )));
            }
            params.positional.clone()
        }
    };

    Ok(PreparedStatement { sql: out, values })
}

fn set_style(style: &mut Style, found: Style) -> DbResult<()> {
    if *style != Style::None && *style != found {
        return Err(bind_error("Statement mixes placeholder styles"));
    }
    *style = found;
    Ok(())
}

fn push_placeholder(out: &mut String, dialect: Dialect, index: usize) {
    let prefix = match dialect {
        Dialect::Postgres => '$',
        Dialect::Sqlite => '?',
    };
    out.push(prefix);
    out.push_str(&index.to_string());
}

fn parse_index(digits: &str) -> DbResult<usize> {
    match digits.parse::<usize>() {
        Ok(0) | Err(_) => Err(bind_error(format!(
            "Invalid placeholder index '{}'",
            digits
        ))),
        Ok(n) => Ok(n),
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn scan_while(bytes: &[u8], from: usize, pred: impl Fn(u8) -> bool) -> usize {
    let mut end = from;
    while end < bytes.len() && pred(bytes[end]) {
        end += 1;
    }
    end
}

fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Skip a quoted literal or identifier; a doubled quote is an escape.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Skip `$tag$ ... $tag$`; a lone `$` is left alone.
fn skip_dollar_quoted(bytes: &[u8], start: usize) -> usize {
    let tag_end = scan_while(bytes, start + 1, is_ident_char);
    if bytes.get(tag_end) != Some(&b'$')
        || (tag_end > start + 1 && !is_ident_start(bytes[start + 1]))
    {
        return start + 1;
    }
    let tag = &bytes[start..=tag_end];
    match find_from(bytes, tag_end + 1, tag) {
        Some(close) => close + tag.len(),
        None => bytes.len(),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        // SQLite has no JSON column type, store as text
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(sql: &str, params: &Params) -> DbResult<PreparedStatement> {
        prepare(sql, params, Dialect::Postgres)
    }

    fn lite(sql: &str, params: &Params) -> DbResult<PreparedStatement> {
        prepare(sql, params, Dialect::Sqlite)
    }

    fn bind_code(result: DbResult<PreparedStatement>) -> Option<String> {
        result.err().and_then(|e| e.code().map(String::from))
    }

    #[test]
    fn test_named_placeholders_rewritten_in_order_of_appearance() {
        let params = Params::new().with("status", "OPEN").with("ship_id", 4);
        let stmt = pg(
            "SELECT * FROM port_call WHERE ship_id = :ship_id AND status = :status",
            &params,
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM port_call WHERE ship_id = $1 AND status = $2"
        );
        assert_eq!(
            stmt.values,
            vec![QueryParam::Int(4), QueryParam::String("OPEN".into())]
        );
    }

    #[test]
    fn test_repeated_name_reuses_index() {
        let params = Params::new().with("id", 7);
        let stmt = lite("SELECT :id AS a, :ID AS b", &params).unwrap();
        assert_eq!(stmt.sql, "SELECT ?1 AS a, ?1 AS b");
        assert_eq!(stmt.values, vec![QueryParam::Int(7)]);
    }

    #[test]
    fn test_numbered_placeholders() {
        let params = Params::positional([1, 2]);
        let stmt = pg("CALL assign_crew_member(:1, :2)", &params).unwrap();
        assert_eq!(stmt.sql, "CALL assign_crew_member($1, $2)");
        let stmt = lite("SELECT :2, :1", &params).unwrap();
        assert_eq!(stmt.sql, "SELECT ?2, ?1");
    }

    #[test]
    fn test_native_placeholders_pass_through() {
        let params = Params::positional(["a", "b"]);
        let stmt = pg("SELECT $1, $2", &params).unwrap();
        assert_eq!(stmt.sql, "SELECT $1, $2");
        let stmt = lite("SELECT ?, ?", &params).unwrap();
        assert_eq!(stmt.sql, "SELECT ?, ?");
    }

    #[test]
    fn test_casts_strings_and_comments_untouched() {
        let params = Params::new().with("id", 1);
        let sql = "SELECT ':skip', \"a:b\", x::text -- :nope\n/* :also */ FROM t WHERE id = :id";
        let stmt = pg(sql, &params).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT ':skip', \"a:b\", x::text -- :nope\n/* :also */ FROM t WHERE id = $1"
        );
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        let params = Params::new().with("n", "x");
        let stmt = pg("SELECT 'it''s :n', :n", &params).unwrap();
        assert_eq!(stmt.sql, "SELECT 'it''s :n', $1");
    }

    #[test]
    fn test_dollar_quoted_body_untouched() {
        let params = Params::new();
        let sql = "DO $body$ BEGIN PERFORM :x; END $body$";
        assert_eq!(pg(sql, &params).unwrap().sql, sql);
    }

    #[test]
    fn test_question_mark_is_literal_on_postgres() {
        let params = Params::new().with("k", "a");
        let stmt = pg("SELECT doc ? :k FROM t", &params).unwrap();
        assert_eq!(stmt.sql, "SELECT doc ? $1 FROM t");
    }

    #[test]
    fn test_missing_named_value() {
        let params = Params::new().with("a", 1);
        assert_eq!(
            bind_code(pg("SELECT :a, :b", &params)).as_deref(),
            Some(BIND_CODE)
        );
    }

    #[test]
    fn test_unused_named_value() {
        let params = Params::new().with("a", 1).with("extra", 2);
        assert_eq!(bind_code(pg("SELECT :a", &params)).as_deref(), Some(BIND_CODE));
    }

    #[test]
    fn test_positional_count_mismatch() {
        let params = Params::positional([1]);
        assert!(pg("SELECT $1, $2", &params).is_err());
        assert!(lite("SELECT ?, ?", &params).is_err());
        assert!(pg("SELECT :1, :2", &params).is_err());
    }

    #[test]
    fn test_zero_index_rejected() {
        assert!(pg("SELECT :0", &Params::positional([1])).is_err());
    }

    #[test]
    fn test_mixed_styles_rejected() {
        let params = Params::positional([1, 2]);
        assert!(pg("SELECT $1, :2", &params).is_err());

        let both = Params::new().push(1).with("a", 2);
        assert!(pg("SELECT :a", &both).is_err());
    }

    #[test]
    fn test_params_without_placeholders_rejected() {
        assert!(pg("SELECT 1", &Params::positional([1])).is_err());
        assert!(pg("SELECT 1", &Params::new()).is_ok());
    }
}
