//! Redaction of secret values from logs and error messages.
//!
//! The GitHub token travels inside clone URLs and the model key inside
//! request headers, so anything that echoes command output or remote error
//! bodies passes through a [`Redactor`] first.

/// Replaces known secret values with `[REDACTED:<name>]`.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    /// (name, value) pairs, longest value first so overlapping secrets
    /// are replaced by the most specific match.
    secrets: Vec<(String, String)>,
}

impl Redactor {
    /// Creates an empty redactor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a secret value under a display name.
    ///
    /// Empty values are ignored; redacting "" would mangle every string.
    /// The percent-encoded form git prints for URL credentials is
    /// registered alongside the raw value.
    pub fn register(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(encoded) = userinfo_encoded(&value) {
            self.insert(name.clone(), encoded);
        }
        self.insert(name, value);
    }

    fn insert(&mut self, name: String, value: String) {
        if value.is_empty() || self.secrets.iter().any(|(_, v)| *v == value) {
            return;
        }
        self.secrets.push((name, value));
        self.secrets.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    }

    /// Builder form of [`Redactor::register`] that accepts an optional value.
    pub fn with_secret(mut self, name: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.register(name, value);
        }
        self
    }

    /// Redacts all registered secret values from `text`.
    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (name, value) in &self.secrets {
            result = result.replace(value.as_str(), &format!("[REDACTED:{}]", name));
        }
        result
    }

    /// Returns true if any secrets are registered.
    pub fn has_secrets(&self) -> bool {
        !self.secrets.is_empty()
    }
}

/// The value as it appears in the password slot of a URL, when that
/// differs from the raw value.
fn userinfo_encoded(value: &str) -> Option<String> {
    let mut url = reqwest::Url::parse("https://user@localhost/").ok()?;
    url.set_password(Some(value)).ok()?;
    url.password()
        .filter(|encoded| *encoded != value)
        .map(str::to_string)
}
