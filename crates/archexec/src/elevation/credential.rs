use std::fmt;
use zeroize::Zeroizing;

/// Marker substituted for every occurrence of the credential in output.
pub const REDACTION_MARKER: &str = "********";

/// A secret supplied for the elevation helper.
///
/// `Debug` never prints the secret. Every copy, including the stdin payload
/// built from it, wipes its buffer on drop through [`Zeroizing`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    /// Take ownership of `secret`; the caller's `String` is moved, not copied.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// The secret itself; only for feeding the helper's stdin.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Helper stdin payload: the secret followed by a newline.
    pub(crate) fn stdin_line(&self) -> Zeroizing<String> {
        // Sized up front so no reallocation leaves an unwiped copy behind.
        let mut line = Zeroizing::new(String::with_capacity(self.0.len() + 1));
        line.push_str(&self.0);
        line.push('\n');
        line
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(")?;
        f.write_str(REDACTION_MARKER)?;
        f.write_str(")")
    }
}

/// Replaces the cached credential in output lines.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secret: Option<Credential>,
}

impl Redactor {
    /// Build a redactor; empty credentials are ignored.
    pub fn new(secret: Option<Credential>) -> Self {
        Self {
            secret: secret.filter(|c| !c.is_empty()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.secret.is_some()
    }

    pub fn redact(&self, line: String) -> String {
        match &self.secret {
            Some(secret) if line.contains(secret.expose()) => {
                line.replace(secret.expose(), REDACTION_MARKER)
            }
            _ => line,
        }
    }
}

/// Runner-lifetime credential state: the validated secret and the count of
/// consecutive failed validations.
#[derive(Debug)]
pub struct CredentialCache {
    secret: Option<Credential>,
    failed_attempts: u32,
    max_attempts: u32,
}

impl CredentialCache {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            secret: None,
            failed_attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn cached(&self) -> Option<&Credential> {
        self.secret.as_ref()
    }

    /// Store a validated credential and reset the failure count.
    pub fn store(&mut self, credential: Credential) {
        self.secret = Some(credential);
        self.failed_attempts = 0;
    }

    /// Record a failed validation. Returns `true` once the attempt cap is
    /// reached, at which point the cache is cleared and the count reset.
    pub fn record_failure(&mut self) -> bool {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if self.failed_attempts >= self.max_attempts {
            self.clear();
            return true;
        }
        false
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn clear(&mut self) {
        self.secret = None;
        self.failed_attempts = 0;
    }
}
