//! Realm configuration.

use crate::error::{CoreError, CoreResult};
use crate::types::UpdatePolicy;

/// Configuration for opening a realm.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity of the realm. Concurrent opens of the same name are serialized.
    pub name: String,

    /// Capacity of each notification delivery channel.
    pub notification_buffer: usize,

    /// Policy used by [`crate::WriteTransaction::copy_to_realm`] when none is given.
    pub default_update_policy: UpdatePolicy,

    /// Upper bound on the depth of [`crate::copy_from_realm`].
    pub max_copy_depth: u32,

    /// Version of the schema the caller registers.
    pub schema_version: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "default.realm".to_string(),
            notification_buffer: 16,
            default_update_policy: UpdatePolicy::Error,
            max_copy_depth: u32::MAX,
            schema_version: 0,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the realm name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the notification channel capacity.
    #[must_use]
    pub const fn notification_buffer(mut self, capacity: usize) -> Self {
        self.notification_buffer = capacity;
        self
    }

    /// Sets the default update policy.
    #[must_use]
    pub const fn default_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.default_update_policy = policy;
        self
    }

    /// Caps the depth of detached copies.
    #[must_use]
    pub const fn max_copy_depth(mut self, depth: u32) -> Self {
        self.max_copy_depth = depth;
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub const fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Checks the configuration before a realm is opened.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Configuration`] for an empty name or a zero
    /// notification buffer.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::configuration("realm name must not be empty"));
        }
        if self.notification_buffer == 0 {
            return Err(CoreError::configuration(
                "notification buffer must hold at least one event",
            ));
        }
        Ok(())
    }
}
