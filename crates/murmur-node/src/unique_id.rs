//! Uncoordinated unique id generation.

use rand::Rng;

/// Characters an id is drawn from.
pub const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of a generated id.
///
/// 36^16 possible ids keeps the chance of a collision negligible at
/// hundreds of thousands of ids per hour for centuries.
pub const ID_LEN: usize = 16;

/// Generates a random id of [`ID_LEN`] characters from [`ID_ALPHABET`].
#[must_use]
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())]))
        .collect()
}
