//! Random identifiers for pastes and files.
//!
//! Pastes and files share one namespace: the first file of a paste reuses the
//! paste's slug, so a candidate is only handed out if neither table uses it.

use std::collections::HashSet;
use std::sync::Arc;

use rand::{thread_rng, Rng};
use tracing::debug;

use crate::config;
use crate::db::Session;
use crate::error::AppError;

/// Digits and upper case letters without the easily confused `0`, `O`, `1`
/// and `I`.
pub const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Slugs stay long enough that a fresh one collides with roughly one in this
/// many existing pastes.
const COLLISION_HEADROOM: u128 = 1024;

/// Generate a random slug of `length` characters.
pub fn generate(length: usize) -> String {
    let mut rng = thread_rng();
    (0..length)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Where candidate slugs come from.
pub trait SlugSource: Send + Sync {
    fn generate(&self, length: usize) -> String;
}

/// Uniformly random slugs from [`ALPHABET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSlugs;

impl SlugSource for RandomSlugs {
    fn generate(&self, length: usize) -> String {
        generate(length)
    }
}

/// Smallest length, at least `base`, that leaves enough room for `existing`
/// pastes.
pub fn scaled_length(base: usize, existing: u64) -> usize {
    let needed = (u128::from(existing) + 1).saturating_mul(COLLISION_HEADROOM);
    let symbols = ALPHABET.len() as u128;

    let mut length = 0;
    let mut space: u128 = 1;
    while space < needed {
        space = space.saturating_mul(symbols);
        length += 1;
    }
    length.max(base)
}

/// Hands out unique slugs for a single paste creation.
pub struct SlugContext {
    source: Arc<dyn SlugSource>,
    length: usize,
    max_length: usize,
    escalate_after: u32,
    max_attempts: u32,
    reserved: HashSet<String>,
}

impl SlugContext {
    /// `existing` is the number of stored pastes and only matters for
    /// auto-scaled slugs; `long` pins the length to `long_length`.
    pub fn new(
        source: Arc<dyn SlugSource>,
        config: &config::Slugs,
        long: bool,
        existing: u64,
    ) -> Self {
        let length = if long {
            config.long_length
        } else {
            scaled_length(config.length, existing).min(config.long_length)
        };

        SlugContext {
            source,
            length,
            max_length: config.long_length.max(length),
            escalate_after: config.escalate_after.max(1),
            max_attempts: config.max_attempts.max(1),
            reserved: HashSet::new(),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Produce a slug that no paste, file, or earlier call on this context
    /// uses.
    pub async fn next(&mut self, session: &mut Session) -> crate::AppResult<String> {
        let mut collisions = 0;

        for _ in 0..self.max_attempts {
            let slug = self.source.generate(self.length);

            if !self.reserved.contains(&slug) && !session.slug_taken(&slug).await? {
                self.reserved.insert(slug.clone());
                return Ok(slug);
            }

            collisions += 1;
            debug!("slug collision on '{slug}' ({collisions} in a row)");
            if collisions % self.escalate_after == 0 && self.length < self.max_length {
                self.length += 1;
            }
        }

        Err(AppError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_no_confusable_characters() {
        for confusable in [b'0', b'O', b'1', b'I'] {
            assert!(!ALPHABET.contains(&confusable));
        }
        let unique: HashSet<_> = ALPHABET.iter().collect();
        assert_eq!(unique.len(), ALPHABET.len());
    }

    #[test]
    fn generated_slugs_use_the_alphabet() {
        let slug = generate(64);
        assert_eq!(slug.len(), 64);
        assert!(slug.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn empty_store_uses_the_base_length() {
        assert_eq!(scaled_length(4, 0), 4);
        assert_eq!(scaled_length(1, 0), 2);
    }

    #[test]
    fn length_grows_with_the_store() {
        // 32^4 = 1048576 covers 1023 pastes with headroom, 1024 does not
        assert_eq!(scaled_length(1, 1022), 4);
        assert_eq!(scaled_length(1, 1024), 5);
        assert_eq!(scaled_length(4, 10_000_000), 7);
    }

    #[test]
    fn long_slugs_ignore_store_size() {
        let config = config::Slugs::default();
        let context = SlugContext::new(Arc::new(RandomSlugs), &config, true, 0);
        assert_eq!(context.length(), config.long_length);
    }

    #[test]
    fn auto_scaled_slugs_never_exceed_long_length() {
        let config = config::Slugs {
            length: 2,
            long_length: 3,
            ..config::Slugs::default()
        };
        let context = SlugContext::new(Arc::new(RandomSlugs), &config, false, u64::MAX);
        assert_eq!(context.length(), 3);
    }
}
