//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The length of the short form of a layer id used for display.
pub const SHORT_ID_LEN: usize = 12;

/// The number of random bytes in a generated layer id.
const ID_BYTES: usize = 32;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the display form of a layer id, at most [`SHORT_ID_LEN`] characters long.
pub fn truncate_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Checks whether the short form of an id reads as a plain decimal integer.
///
/// Such ids are ambiguous with the numeric ids used by old exports.
pub fn is_numeric_id(id: &str) -> bool {
    truncate_id(id).parse::<i64>().is_ok()
}

/// Generates a random 64 character hex layer id.
///
/// Ids whose short form is numeric are rejected after generation and drawn again.
pub fn new_layer_id() -> String {
    loop {
        let bytes: [u8; ID_BYTES] = rand::random();
        let id = hex::encode(bytes);
        if is_numeric_id(&id) {
            tracing::debug!("discarding numeric-looking layer id {}", truncate_id(&id));
            continue;
        }

        return id;
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
