use crate::error::SQLError;

/// A dynamically-typed SQL parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// `Text` for `Some`, `Null` for `None`.
    pub fn opt_text(v: Option<&str>) -> Self {
        match v {
            Some(s) => Value::Text(s.to_string()),
            None => Value::Null,
        }
    }
}

/// A result row as column name and value pairs.
#[derive(Debug, Clone)]
pub struct Row {
    pub columns: Vec<(String, Value)>,
}

impl Row {
    /// Get a column value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Get a text column value by name.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get an integer column value by name.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Value::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Get a real column value by name. Integer-valued reals come back
    /// from SQLite as integers, so those are widened.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(Value::Real(f)) => Some(*f),
            Some(Value::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }
}

/// One statement of an atomic batch.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    /// When set, the batch is rolled back with [`SQLError::NoRowsAffected`]
    /// (carrying this label) if the statement changes no rows.
    pub guard: Option<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            guard: None,
        }
    }

    /// A statement that must change at least one row.
    pub fn guarded(sql: impl Into<String>, params: Vec<Value>, label: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params,
            guard: Some(label.into()),
        }
    }
}

/// SQLStore provides a SQL execution interface backed by an embedded database.
pub trait SQLStore: Send + Sync {
    /// Execute a query and return rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError>;

    /// Execute a statement (INSERT/UPDATE/DELETE) and return affected row count.
    fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, SQLError>;

    /// Execute statements in order inside one transaction. Any failure,
    /// including a guarded statement affecting no rows, rolls back the
    /// whole batch. Returns the total affected row count.
    fn exec_atomic(&self, statements: &[Statement]) -> Result<u64, SQLError>;
}
