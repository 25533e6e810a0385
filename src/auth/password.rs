//! Password Hashing
//! Mission: bcrypt hashing with a tunable work factor

use anyhow::{Context, Result};
use bcrypt::{hash, verify};

pub const MIN_PASSWORD_LEN: usize = 8;

/// bcrypt wrapper carrying the configured cost
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn hash(&self, password: &str) -> Result<String> {
        hash(password, self.cost).context("Failed to hash password")
    }

    /// Constant-time comparison against a stored hash.
    /// A malformed stored hash counts as a mismatch.
    pub fn verify(&self, password: &str, password_hash: &str) -> bool {
        verify(password, password_hash).unwrap_or(false)
    }
}

pub fn is_strong_enough(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
}
