//! Short random identifiers for uniquely named sync files.

use rand::Rng;

use iosync_core::traits::IdProvider;

/// Alphabet identifiers are drawn from.
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated identifiers.
pub const ID_LENGTH: usize = 8;

/// Generates 8-character identifiers over `A-Z0-9`.
///
/// Identifiers are only practically unique within one provider; they are not
/// suitable as secrets.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringIdProvider;

impl IdProvider for StringIdProvider {
    fn new_id(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..ID_LENGTH)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect()
    }
}
