//! Captcha verification capability.

use std::fmt;
use std::time::Duration;

use moka::sync::Cache;
use rand::Rng;

use crate::config::{ConfigError, Params};

/// Opaque identifier of an issued challenge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeId(String);

impl ChallengeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation contract of the captcha capability.
pub trait CaptchaBackend: Send + Sync {
    /// Implementation identifier.
    fn name(&self) -> &'static str;

    /// `false` when every challenge passes.
    fn is_enabled(&self) -> bool;

    fn issue_challenge(&self) -> ChallengeId;

    fn verify(&self, challenge: &ChallengeId, solution: &str) -> bool;
}

/// Captcha checks switched off; everything verifies.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCaptcha;

impl CaptchaBackend for DisabledCaptcha {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn issue_challenge(&self) -> ChallengeId {
        ChallengeId::new(uuid::Uuid::new_v4().to_string())
    }

    fn verify(&self, _challenge: &ChallengeId, _solution: &str) -> bool {
        true
    }
}

const SOLUTION_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Challenges solved against solutions kept in memory.
///
/// Rendering the solution as an image is left to the caller, who reads it
/// with [`solution`](Self::solution).
pub struct LocalCaptcha {
    pending: Cache<String, String>,
    length: usize,
}

impl LocalCaptcha {
    pub const DEFAULT_LENGTH: usize = 6;
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(length: usize, ttl: Duration) -> Self {
        Self {
            pending: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(ttl)
                .build(),
            length: length.max(1),
        }
    }

    /// Reads `length` and `ttl` (seconds) from the `captcha` section.
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        Ok(Self::new(
            params.get_typed_or("length", Self::DEFAULT_LENGTH)?,
            params.get_typed_or("ttl", Self::DEFAULT_TTL)?,
        ))
    }

    /// Solution of a pending challenge.
    pub fn solution(&self, challenge: &ChallengeId) -> Option<String> {
        self.pending.get(challenge.as_str())
    }
}

impl Default for LocalCaptcha {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LENGTH, Self::DEFAULT_TTL)
    }
}

impl CaptchaBackend for LocalCaptcha {
    fn name(&self) -> &'static str {
        "local"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn issue_challenge(&self) -> ChallengeId {
        let mut rng = rand::thread_rng();
        let solution: String = (0..self.length)
            .map(|_| SOLUTION_ALPHABET[rng.gen_range(0..SOLUTION_ALPHABET.len())] as char)
            .collect();
        let id = ChallengeId::new(uuid::Uuid::new_v4().to_string());
        self.pending.insert(id.as_str().to_string(), solution);
        id
    }

    fn verify(&self, challenge: &ChallengeId, solution: &str) -> bool {
        // single use, whatever the outcome
        match self.pending.remove(challenge.as_str()) {
            Some(expected) => expected.eq_ignore_ascii_case(solution.trim()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_accepts_anything() {
        let captcha = DisabledCaptcha;
        let id = captcha.issue_challenge();
        assert!(!captcha.is_enabled());
        assert!(captcha.verify(&id, ""));
        assert!(captcha.verify(&ChallengeId::new("unknown"), "whatever"));
    }

    #[test]
    fn local_challenge_roundtrip() {
        let captcha = LocalCaptcha::default();
        let id = captcha.issue_challenge();
        let solution = captcha.solution(&id).unwrap();
        assert_eq!(solution.len(), LocalCaptcha::DEFAULT_LENGTH);

        assert!(captcha.verify(&id, &solution.to_lowercase()));
        assert!(!captcha.verify(&id, &solution), "challenges are single use");
    }

    #[test]
    fn wrong_solution_burns_the_challenge() {
        let captcha = LocalCaptcha::default();
        let id = captcha.issue_challenge();
        let solution = captcha.solution(&id).unwrap();

        assert!(!captcha.verify(&id, "nope"));
        assert!(!captcha.verify(&id, &solution));
        assert!(!captcha.verify(&ChallengeId::new("never-issued"), "x"));
    }

    #[test]
    fn challenges_expire() {
        let captcha = LocalCaptcha::new(4, Duration::from_millis(20));
        let id = captcha.issue_challenge();
        let solution = captcha.solution(&id).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert!(!captcha.verify(&id, &solution));
    }
}
