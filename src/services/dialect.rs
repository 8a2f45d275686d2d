// SQL dialects
//
// Each supported backend is one variant of `Dialect`. A variant owns how abstract
// tokens become native SQL, how identifiers are quoted, how bind variables are
// rendered and how logical column types map onto physical ones.

use std::fmt;
use std::str::FromStr;

use crate::api::middleware::AppError;
use crate::services::database::adapter::ColumnValue;

/// Select every row of a table: `@selectTable_<table>`
pub const SELECT_TABLE_PREFIX: &str = "@selectTable_";
/// Select the first rows of a table: `@selectTableLimit100_<table>`
pub const SELECT_TABLE_LIMIT_PREFIX: &str = "@selectTableLimit100_";
pub const SHOW_DATABASES: &str = "@showDatabases";
pub const SHOW_TABLES: &str = "@showTables";
pub const CURRENT_DATABASE: &str = "@currentDB";

/// Placeholder filled with the current database name in `SHOW_TABLES` output
pub const DATABASE_PLACEHOLDER: &str = "%s";

const PREVIEW_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
    TDengine,
}

/// Driver-independent column type, with an optional size hint in bits or characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Bool,
    Int { bits: u16 },
    Uint { bits: u16 },
    Float { bits: u16 },
    String { size: u32 },
    Time,
    Bytes { size: u32 },
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [Dialect::MySql, Dialect::Postgres, Dialect::Sqlite, Dialect::TDengine];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::TDengine => "tdengine",
        }
    }

    /// Rewrite an abstract token into native SQL; any other text is returned unchanged.
    pub fn translate(&self, query: &str) -> String {
        if let Some(table) = query.strip_prefix(SELECT_TABLE_LIMIT_PREFIX) {
            return format!("SELECT * FROM {} LIMIT {}", self.quote_identifier(table), PREVIEW_LIMIT);
        }
        if let Some(table) = query.strip_prefix(SELECT_TABLE_PREFIX) {
            return format!("SELECT * FROM {}", self.quote_identifier(table));
        }

        match query {
            SHOW_DATABASES => self.show_databases_sql().to_string(),
            SHOW_TABLES => self.show_tables_sql().to_string(),
            CURRENT_DATABASE => self.current_database_sql().to_string(),
            _ => query.to_string(),
        }
    }

    fn show_databases_sql(&self) -> &'static str {
        match self {
            Dialect::MySql | Dialect::TDengine => "SHOW DATABASES",
            Dialect::Postgres => "SELECT table_catalog as name FROM information_schema.tables",
            Dialect::Sqlite => "PRAGMA database_list",
        }
    }

    fn show_tables_sql(&self) -> &'static str {
        match self {
            Dialect::MySql => "SHOW TABLES",
            Dialect::Postgres => {
                "SELECT table_name FROM information_schema.tables WHERE table_catalog = '%s' \
                 and table_schema != 'pg_catalog' and table_schema != 'information_schema'"
            }
            Dialect::Sqlite => {
                "SELECT name AS table_name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%'"
            }
            Dialect::TDengine => "SHOW %s.TABLES",
        }
    }

    fn current_database_sql(&self) -> &'static str {
        match self {
            Dialect::MySql | Dialect::TDengine => "SELECT DATABASE() as name",
            Dialect::Postgres => "SELECT current_database() as name",
            Dialect::Sqlite => "SELECT name FROM pragma_database_list WHERE seq = 0",
        }
    }

    /// Statement listing tables of `database`, placeholder already substituted
    pub fn show_tables_for(&self, database: &str) -> String {
        let sql = self.translate(SHOW_TABLES);
        if sql.contains(DATABASE_PLACEHOLDER) {
            sql.replacen(DATABASE_PLACEHOLDER, database, 1)
        } else {
            sql
        }
    }

    /// MySQL and TDengine identifiers stay bare so `schema.table` keeps working.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Dialect::MySql | Dialect::TDengine => name.to_string(),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Placeholder for the bind variable at 1-based `position`
    pub fn render_bind_variable(&self, position: usize, value: &ColumnValue) -> String {
        match self {
            Dialect::MySql | Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", position),
            Dialect::TDengine if value.is_text() => "'?'".to_string(),
            Dialect::TDengine => "?".to_string(),
        }
    }

    pub fn map_logical_type(&self, logical: LogicalType) -> String {
        match (self, logical) {
            (Dialect::TDengine, LogicalType::Bool) => "bool".to_string(),
            (Dialect::TDengine, LogicalType::Int { bits } | LogicalType::Uint { bits }) => {
                integer_type(bits, "tinyint", "smallint", "int", "bigint")
            }
            (Dialect::TDengine, LogicalType::Float { bits }) => float_type(bits, "float", "double"),
            (Dialect::TDengine, LogicalType::String { size }) => format!("NCHAR({})", or_default(size, 64)),
            (Dialect::TDengine, LogicalType::Time) => "TIMESTAMP".to_string(),
            (Dialect::TDengine, LogicalType::Bytes { size }) => format!("BINARY({})", or_default(size, 64)),

            (Dialect::MySql, LogicalType::Bool) => "boolean".to_string(),
            (Dialect::MySql, LogicalType::Int { bits }) => {
                integer_type(bits, "tinyint", "smallint", "int", "bigint")
            }
            (Dialect::MySql, LogicalType::Uint { bits }) => format!(
                "{} unsigned",
                integer_type(bits, "tinyint", "smallint", "int", "bigint")
            ),
            (Dialect::MySql, LogicalType::Float { bits }) => float_type(bits, "float", "double"),
            (Dialect::MySql, LogicalType::String { size }) => format!("varchar({})", or_default(size, 191)),
            (Dialect::MySql, LogicalType::Time) => "datetime(3)".to_string(),
            (Dialect::MySql, LogicalType::Bytes { .. }) => "longblob".to_string(),

            (Dialect::Postgres, LogicalType::Bool) => "boolean".to_string(),
            (Dialect::Postgres, LogicalType::Int { bits } | LogicalType::Uint { bits }) => {
                integer_type(bits, "smallint", "smallint", "integer", "bigint")
            }
            (Dialect::Postgres, LogicalType::Float { bits }) => float_type(bits, "real", "double precision"),
            (Dialect::Postgres, LogicalType::String { size: 0 }) => "text".to_string(),
            (Dialect::Postgres, LogicalType::String { size }) => format!("varchar({})", size),
            (Dialect::Postgres, LogicalType::Time) => "timestamptz".to_string(),
            (Dialect::Postgres, LogicalType::Bytes { .. }) => "bytea".to_string(),

            (Dialect::Sqlite, LogicalType::Bool) => "numeric".to_string(),
            (Dialect::Sqlite, LogicalType::Int { .. } | LogicalType::Uint { .. }) => "integer".to_string(),
            (Dialect::Sqlite, LogicalType::Float { .. }) => "real".to_string(),
            (Dialect::Sqlite, LogicalType::String { .. }) => "text".to_string(),
            (Dialect::Sqlite, LogicalType::Time) => "datetime".to_string(),
            (Dialect::Sqlite, LogicalType::Bytes { .. }) => "blob".to_string(),
        }
    }

    pub fn explain_sql(&self, sql: &str) -> String {
        format!("EXPLAIN {}", sql)
    }

    /// Statement returning the server version in a column named `version`
    pub fn version_sql(&self) -> &'static str {
        match self {
            Dialect::MySql => "SELECT VERSION() as version",
            Dialect::Postgres => "SELECT version() as version",
            Dialect::Sqlite => "SELECT sqlite_version() as version",
            Dialect::TDengine => "SELECT SERVER_VERSION() as version",
        }
    }

    /// Default network port, `None` for file based stores
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Dialect::MySql => Some(3306),
            Dialect::Postgres => Some(5432),
            Dialect::Sqlite => None,
            Dialect::TDengine => Some(6041),
        }
    }
}

fn integer_type(bits: u16, tiny: &str, small: &str, medium: &str, big: &str) -> String {
    let name = match bits {
        1..=8 => tiny,
        9..=16 => small,
        17..=32 => medium,
        _ => big,
    };
    name.to_string()
}

fn float_type(bits: u16, single: &str, double: &str) -> String {
    let name = if bits != 0 && bits <= 32 { single } else { double };
    name.to_string()
}

fn or_default(size: u32, default: u32) -> u32 {
    if size == 0 {
        default
    } else {
        size
    }
}

impl FromStr for Dialect {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "tdengine" | "taos" => Ok(Dialect::TDengine),
            _ => Err(AppError::Connection(format!("invalid database driver {:?}", s))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
