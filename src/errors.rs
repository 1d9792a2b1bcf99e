// Define an errors module and use a glob import as recommended by:
//
//     http://brson.github.io/2016/11/30/starting-with-error-chain
//

// Create the Error, ErrorKind, ResultExt, and Result types
error_chain!{
    // Automatic conversions between this error chain and other error types not defined by the
    // `error_chain!`. The description and cause will forward to the description and cause of the
    // original error.
    foreign_links {
        Database(::diesel::result::Error);
        DatabaseConnectionPool(::r2d2::Error);
    }

    errors {
        // An ownership-gated write affected zero rows because the caller's session
        // identifier did not match the row's recorded owner.
        InvalidOwnership(detail: String) {
            description("operation targeted a row owned by a different session")
            display("invalid ownership: {}", detail)
        }

        // A read or precondition-qualified write targeted a key that does not exist.
        NotFound(detail: String) {
            description("row not found")
            display("not found: {}", detail)
        }

        // A hash argument was longer than HASH_MAX_LEN bytes.
        InvalidHashLength(len: usize) {
            description("hash exceeds maximum length")
            display("hash is too long: len={}, max={}", len, ::model::HASH_MAX_LEN)
        }

        // A `client` argument was longer than CLIENT_MAX_LEN characters.
        InvalidClient(client: String) {
            description("client tag exceeds maximum length")
            display("client too long: {:?}", client)
        }

        // `cmdLine` was empty.
        EmptyCmdLine {
            description("cmdLine must not be empty")
        }
    }
}

// Collect error strings together so that we can build a good error message to
// send up. It's worth nothing that the original error is actually at the end of
// the iterator, but since it's the most relevant, we reverse the list.
//
// The chain isn't a double-ended iterator (meaning we can't use `rev`), so we
// have to collect it to a Vec first before reversing it.
pub fn error_strings(error: &Error) -> Vec<String> {
    error
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .iter()
        .cloned()
        .rev()
        .collect()
}

/// True if the duplicate-key violation matched the storage driver's typed error. Falls back to
/// a substring match against the message for error encodings that don't preserve the typed
/// variant across a retry/reconnect boundary (see modelInsertAndStart's tolerance in the
/// original ClientJobsDAO).
pub fn is_duplicate_key_violation(error: &::diesel::result::Error) -> bool {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => true,
        DieselError::DatabaseError(_, info) => {
            info.message().contains("Duplicate entry")
                || info.message().contains("duplicate key value")
        }
        _ => false,
    }
}
