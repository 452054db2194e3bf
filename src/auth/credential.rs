//! Credential types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::client::SecretAuth;

/// What an [`AuthMethod`](super::AuthMethod) returns from one attempt.
#[derive(Clone)]
pub struct AuthResponse {
    pub token: SecretString,
    pub renewable: bool,
    /// Lease length; zero means no lease.
    pub lease_duration: Duration,
}

impl AuthResponse {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            renewable: false,
            lease_duration: Duration::ZERO,
        }
    }

    pub fn with_lease(mut self, lease_duration: Duration, renewable: bool) -> Self {
        self.lease_duration = lease_duration;
        self.renewable = renewable;
        self
    }
}

impl From<SecretAuth> for AuthResponse {
    fn from(auth: SecretAuth) -> Self {
        Self::new(auth.client_token)
            .with_lease(Duration::from_secs(auth.lease_duration), auth.renewable)
    }
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("token", &"[redacted]")
            .field("renewable", &self.renewable)
            .field("lease_duration", &self.lease_duration)
            .finish()
    }
}

/// An issued credential.
///
/// Immutable once issued. The next cycle supersedes it with a higher
/// `generation`; renewal also issues a new generation carrying the same value.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
    renewable: bool,
    lease_duration: Duration,
    issued_at: DateTime<Utc>,
    generation: u64,
}

impl Credential {
    pub fn new(response: AuthResponse, generation: u64) -> Self {
        Self {
            token: response.token,
            renewable: response.renewable,
            lease_duration: response.lease_duration,
            issued_at: Utc::now(),
            generation,
        }
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Raw credential value.
    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }

    /// Whether two credentials carry the same value, regardless of generation.
    pub fn same_value(&self, other: &Credential) -> bool {
        self.expose() == other.expose()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn renewable(&self) -> bool {
        self.renewable
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.lease_duration.is_zero() {
            return None;
        }
        chrono::Duration::from_std(self.lease_duration)
            .ok()
            .map(|lease| self.issued_at + lease)
    }

    /// Delay after issuance at which to renew in place: two thirds of the lease.
    pub fn renew_after(&self) -> Option<Duration> {
        (self.renewable && !self.lease_duration.is_zero())
            .then(|| self.lease_duration.mul_f64(2.0 / 3.0))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[redacted]")
            .field("generation", &self.generation)
            .field("renewable", &self.renewable)
            .field("lease_duration", &self.lease_duration)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}
