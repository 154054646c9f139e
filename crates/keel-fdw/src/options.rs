// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use keel_remote::RemoteDsn;
use serde::{Deserialize, Serialize};

use crate::cache::ConnectionKey;
use crate::error::{FdwError, Result};

/// Per-table connection and scan options.
///
/// The host hands these over as a string map (merged from whatever scoping
/// levels it maintains — server, user mapping, table); parsing and
/// validation happen here so every entry point sees a checked struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOptions {
    /// Remote server identifier.
    pub server: String,

    /// Remote database name.
    pub database: String,

    /// User the session authenticates as.
    pub username: String,

    /// Password, if the server requires one.
    pub password: Option<String>,

    /// Remote table name (alternative to `query`).
    pub table: Option<String>,

    /// Pre-formed remote query text (alternative to `table`).
    pub query: Option<String>,

    /// Enable predicate pushdown for this table.
    pub predicate_pushdown: bool,

    /// Quote remote identifiers (DELIMIDENT-style).
    pub delimident: bool,

    /// Use cursor-position row identity for UPDATE/DELETE instead of the
    /// row-identity token.
    pub disable_rowid: bool,

    /// Client-side locale override.
    pub client_locale: Option<String>,

    /// Remote database locale.
    pub db_locale: Option<String>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            server: String::new(),
            database: String::new(),
            username: String::new(),
            password: None,
            table: None,
            query: None,
            predicate_pushdown: true,
            delimident: false,
            disable_rowid: false,
            client_locale: None,
            db_locale: None,
        }
    }
}

impl TableOptions {
    /// Parse options from a string map. Duplicate-free input is the
    /// host's responsibility; conflicting combinations are rejected here.
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self> {
        let mut opts = Self::default();

        opts.server = options
            .get("server")
            .cloned()
            .ok_or_else(|| FdwError::InvalidOptions("missing required option 'server'".into()))?;

        opts.database = options
            .get("database")
            .cloned()
            .ok_or_else(|| FdwError::InvalidOptions("missing required option 'database'".into()))?;

        opts.username = options
            .get("username")
            .cloned()
            .ok_or_else(|| FdwError::InvalidOptions("missing required option 'username'".into()))?;

        opts.password = options.get("password").cloned();
        opts.table = options.get("table").cloned();
        opts.query = options.get("query").cloned();

        if let Some(v) = options.get("predicate_pushdown") {
            opts.predicate_pushdown = parse_bool("predicate_pushdown", v)?;
        }
        if let Some(v) = options.get("delimident") {
            opts.delimident = parse_bool("delimident", v)?;
        }
        if let Some(v) = options.get("disable_rowid") {
            opts.disable_rowid = parse_bool("disable_rowid", v)?;
        }

        opts.client_locale = options.get("client_locale").cloned();
        opts.db_locale = options.get("db_locale").cloned();

        opts.validate()?;
        Ok(opts)
    }

    /// Check option consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            return Err(FdwError::InvalidOptions("empty 'server'".into()));
        }
        if self.database.is_empty() {
            return Err(FdwError::InvalidOptions("empty 'database'".into()));
        }

        match (&self.table, &self.query) {
            (None, None) => Err(FdwError::InvalidOptions(
                "either 'table' or 'query' must be specified".into(),
            )),
            (Some(_), Some(_)) => Err(FdwError::InvalidOptions(
                "conflicting options: 'query' cannot be used with 'table'".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Connection parameters for the client layer.
    pub fn dsn(&self) -> RemoteDsn {
        RemoteDsn {
            server: self.server.clone(),
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            client_locale: self.client_locale.clone(),
            db_locale: self.db_locale.clone(),
        }
    }

    /// Cache identity for sessions opened with these options.
    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey::new(&self.server, &self.database, &self.username)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        other => Err(FdwError::InvalidOptions(format!(
            "invalid boolean for '{}': {}",
            name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_map() -> HashMap<String, String> {
        HashMap::from([
            ("server".to_string(), "olympia".to_string()),
            ("database".to_string(), "stores".to_string()),
            ("username".to_string(), "scott".to_string()),
            ("table".to_string(), "orders".to_string()),
        ])
    }

    #[test]
    fn test_parse_minimal() {
        let opts = TableOptions::from_map(&base_map()).unwrap();
        assert_eq!(opts.server, "olympia");
        assert_eq!(opts.table.as_deref(), Some("orders"));
        assert!(opts.predicate_pushdown);
        assert!(!opts.delimident);
    }

    #[test]
    fn test_missing_server() {
        let mut map = base_map();
        map.remove("server");
        assert!(matches!(
            TableOptions::from_map(&map),
            Err(FdwError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_table_query_conflict() {
        let mut map = base_map();
        map.insert("query".to_string(), "SELECT * FROM orders".to_string());
        assert!(matches!(
            TableOptions::from_map(&map),
            Err(FdwError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_neither_table_nor_query() {
        let mut map = base_map();
        map.remove("table");
        assert!(matches!(
            TableOptions::from_map(&map),
            Err(FdwError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_bool_options() {
        let mut map = base_map();
        map.insert("predicate_pushdown".to_string(), "off".to_string());
        map.insert("delimident".to_string(), "1".to_string());
        let opts = TableOptions::from_map(&map).unwrap();
        assert!(!opts.predicate_pushdown);
        assert!(opts.delimident);

        map.insert("disable_rowid".to_string(), "maybe".to_string());
        assert!(TableOptions::from_map(&map).is_err());
    }

    #[test]
    fn test_dsn() {
        let opts = TableOptions::from_map(&base_map()).unwrap();
        assert_eq!(opts.dsn().database_string(), "stores@olympia");
    }
}
