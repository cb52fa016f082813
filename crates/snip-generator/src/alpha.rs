use crate::Generator;
use rand::Rng;
use snip_core::ShortCode;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Default length of a generated short code.
pub const DEFAULT_LENGTH: usize = 7;

/// Random short codes drawn uniformly from `[A-Za-z]`.
#[derive(Debug, Clone, Copy)]
pub struct AlphaGenerator {
    length: usize,
}

impl AlphaGenerator {
    pub fn new() -> Self {
        Self {
            length: DEFAULT_LENGTH,
        }
    }

    /// Creates a generator producing codes of `length` characters.
    ///
    /// # Panics
    ///
    /// Panics if `length` is zero.
    pub fn with_length(length: usize) -> Self {
        assert!(length > 0, "short code length must be positive");
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for AlphaGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for AlphaGenerator {
    fn generate(&self) -> ShortCode {
        let mut rng = rand::thread_rng();
        let code: String = (0..self.length)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        ShortCode::new_unchecked(code)
    }
}
