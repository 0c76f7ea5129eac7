//! Composable SQL predicates
//!
//! Filters are built as a small expression tree and rendered to SQL with
//! positional `?` placeholders. Values never end up in the SQL text.

use rusqlite::types::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(&'static str, Value),
    Ge(&'static str, Value),
    Lt(&'static str, Value),
    In(&'static str, Vec<Value>),
    NotIn(&'static str, Vec<Value>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Predicate::Eq(column, value.into())
    }

    pub fn ge(column: &'static str, value: impl Into<Value>) -> Self {
        Predicate::Ge(column, value.into())
    }

    pub fn lt(column: &'static str, value: impl Into<Value>) -> Self {
        Predicate::Lt(column, value.into())
    }

    /// Membership test; a single value collapses to an equality
    pub fn in_list<V: Into<Value>>(column: &'static str, values: impl IntoIterator<Item = V>) -> Self {
        let mut values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.len() == 1 {
            Predicate::Eq(column, values.remove(0))
        } else {
            Predicate::In(column, values)
        }
    }

    pub fn not_in<V: Into<Value>>(column: &'static str, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::NotIn(column, values.into_iter().map(Into::into).collect())
    }

    /// Append this predicate to `sql`, pushing bound values to `params`
    pub fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Predicate::Eq(col, v) => push_binary(sql, params, col, "=", v),
            Predicate::Ge(col, v) => push_binary(sql, params, col, ">=", v),
            Predicate::Lt(col, v) => push_binary(sql, params, col, "<", v),
            Predicate::In(col, values) => push_list(sql, params, col, "IN", values, "0"),
            Predicate::NotIn(col, values) => push_list(sql, params, col, "NOT IN", values, "1"),
            Predicate::And(children) => push_joined(sql, params, children, " AND ", "1"),
            Predicate::Or(children) => push_joined(sql, params, children, " OR ", "0"),
        }
    }
}

fn push_binary(sql: &mut String, params: &mut Vec<Value>, col: &str, op: &str, v: &Value) {
    sql.push_str(col);
    sql.push(' ');
    sql.push_str(op);
    sql.push_str(" ?");
    params.push(v.clone());
}

fn push_list(
    sql: &mut String,
    params: &mut Vec<Value>,
    col: &str,
    op: &str,
    values: &[Value],
    when_empty: &str,
) {
    // `x IN ()` is not valid SQL; an empty list is a constant
    if values.is_empty() {
        sql.push_str(when_empty);
        return;
    }
    sql.push_str(col);
    sql.push(' ');
    sql.push_str(op);
    sql.push_str(" (");
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('?');
        params.push(v.clone());
    }
    sql.push(')');
}

fn push_joined(
    sql: &mut String,
    params: &mut Vec<Value>,
    children: &[Predicate],
    sep: &str,
    when_empty: &str,
) {
    if children.is_empty() {
        sql.push_str(when_empty);
        return;
    }
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            sql.push_str(sep);
        }
        sql.push('(');
        child.render(sql, params);
        sql.push(')');
    }
}

/// Render ` WHERE a AND b ...`, or nothing for an empty list
pub fn render_where(predicates: &[Predicate], sql: &mut String, params: &mut Vec<Value>) {
    if predicates.is_empty() {
        return;
    }
    sql.push_str(" WHERE ");
    push_joined(sql, params, predicates, " AND ", "1");
}
