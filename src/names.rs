//! Storage column names ⟷ public field names, and the dynamic value
//! wrapper used by the generic get/set-fields operations.
//!
//! Storage names are `snake_case`, optionally prefixed with a leading
//! underscore for engine-private scratch fields (`_eng_last_update_time`).
//! Public names strip the leading underscore and convert to
//! `lowerCamelCase`. This is a pure function shared by DDL emission and the
//! record layer, as the Design Notes (§9) call for: no runtime schema
//! introspection, just one function applied to a fixed column list at
//! startup.

/// Converts a single storage column name to its public-API spelling.
///
/// `job_id` -> `jobId`, `_eng_last_update_time` -> `engLastUpdateTime`.
pub fn db_to_public(db_name: &str) -> String {
    let trimmed = db_name.strip_prefix('_').unwrap_or(db_name);

    let mut public = String::with_capacity(trimmed.len());
    let mut capitalize_next = false;
    for ch in trimmed.chars() {
        if ch == '_' {
            capitalize_next = true;
            continue;
        }
        if capitalize_next {
            public.extend(ch.to_uppercase());
            capitalize_next = false;
        } else {
            public.push(ch);
        }
    }
    public
}

/// Builds the bidirectional mapping for a fixed list of storage column
/// names, computed once at `Store` construction time.
pub struct FieldNames {
    db_names: Vec<&'static str>,
    public_to_db: Vec<(String, &'static str)>,
}

impl FieldNames {
    pub fn new(db_names: &[&'static str]) -> FieldNames {
        let public_to_db = db_names
            .iter()
            .map(|&db| (db_to_public(db), db))
            .collect();
        FieldNames {
            db_names: db_names.to_vec(),
            public_to_db,
        }
    }

    /// Looks up the storage column name for a public field name.
    pub fn to_db(&self, public_name: &str) -> Option<&'static str> {
        self.public_to_db
            .iter()
            .find(|(public, _)| public == public_name)
            .map(|(_, db)| *db)
    }

    pub fn public_names(&self) -> Vec<String> {
        self.db_names.iter().map(|db| db_to_public(db)).collect()
    }
}

/// A value bound into a dynamic `getFields`/`setFields` statement. The
/// variant chosen by the caller determines both the Postgres cast applied
/// in the generated SQL (`$n::<cast>`) and the diesel SQL type used to bind
/// it, since there is no runtime column-type introspection (see Design
/// Notes on dynamic record shapes).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Float(f64),
    Timestamp(::chrono::DateTime<::chrono::Utc>),
    Binary(Vec<u8>),
    Null,
}

impl FieldValue {
    /// The Postgres type-cast suffix applied after the bind placeholder,
    /// e.g. `$1::boolean`. `Null` casts to `text`, so it only type-checks
    /// against `text`-typed columns; clearing a non-text field to NULL is
    /// not currently expressible through this enum.
    pub fn pg_cast(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Int(_) => "bigint",
            FieldValue::Bool(_) => "boolean",
            FieldValue::Float(_) => "double precision",
            FieldValue::Timestamp(_) => "timestamptz",
            FieldValue::Binary(_) => "bytea",
            FieldValue::Null => "text",
        }
    }
}

#[cfg(test)]
mod tests {
    use names::*;

    #[test]
    fn test_db_to_public_simple() {
        assert_eq!("jobId", db_to_public("job_id"));
    }

    #[test]
    fn test_db_to_public_strips_leading_underscore() {
        assert_eq!("engLastUpdateTime", db_to_public("_eng_last_update_time"));
    }

    #[test]
    fn test_db_to_public_single_word() {
        assert_eq!("status", db_to_public("status"));
    }

    #[test]
    fn test_field_names_round_trip() {
        let names = FieldNames::new(&["job_id", "_eng_cjm_conn_id", "client_key"]);
        assert_eq!(Some("job_id"), names.to_db("jobId"));
        assert_eq!(Some("_eng_cjm_conn_id"), names.to_db("engCjmConnId"));
        assert_eq!(Some("client_key"), names.to_db("clientKey"));
        assert_eq!(None, names.to_db("missingField"));
    }

    #[test]
    fn test_field_value_pg_cast() {
        assert_eq!("boolean", FieldValue::Bool(true).pg_cast());
        assert_eq!("bigint", FieldValue::Int(1).pg_cast());
        assert_eq!("text", FieldValue::Text("x".to_owned()).pg_cast());
    }
}
