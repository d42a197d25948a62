//! Object identifier generation
//!
//! An identifier is the owning prefix (normally the execution id) followed by
//! a hyphenated UUID v4. It is used verbatim as the payload's file name.

use uuid::Uuid;

/// Suffix appended to an identifier to name its metadata sidecar
pub const METADATA_SUFFIX: &str = ".metadata";

/// Length of the random token appended to every identifier
const TOKEN_LEN: usize = 36;

/// Concatenate `prefix` with a fresh random token
pub fn generate_identifier(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4())
}

/// File name of the metadata sidecar for `identifier`
pub fn metadata_file_name(identifier: &str) -> String {
    format!("{}{}", identifier, METADATA_SUFFIX)
}

/// Whether a file in the storage root is a payload or sidecar of `execution_id`.
///
/// The name must be exactly `<execution_id><uuid>` or
/// `<execution_id><uuid>.metadata`, so execution `1` never claims the
/// files of execution `12`.
pub fn belongs_to_execution(file_name: &str, execution_id: &str) -> bool {
    let Some(rest) = file_name.strip_prefix(execution_id) else {
        return false;
    };
    let token = rest.strip_suffix(METADATA_SUFFIX).unwrap_or(rest);
    token.len() == TOKEN_LEN && Uuid::try_parse(token).is_ok()
}
