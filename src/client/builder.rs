//! # Client Builder
//!
//! `ClientBuilder` configures the mutation buffer and validation policy of a
//! [`Client`] before it is connected to an engine.
//!
//! ## Configuration Options
//!
//! | Option               | Default                 | Description                                  |
//! |----------------------|-------------------------|----------------------------------------------|
//! | modify_size          | `DEFAULT_MODIFY_SIZE`   | Initial capacity of the mutation buffer      |
//! | max_modify_size      | `MAX_MODIFY_SIZE`       | Capacity at which a full buffer is flushed   |
//! | mode                 | `ModifyMode::Safe`      | Reject whole records or skip invalid fields  |
//! | compress_threshold   | `STRING_COMPRESS_THRESHOLD` | Strings longer than this may be deflated |
//! | default_locale       | first schema locale     | Locale of text fields given a bare string   |
//! | clock                | system time             | Fixed time for `on` timestamp fields         |
//!
//! ## Usage
//!
//! ```ignore
//! let client = Client::builder()
//!     .hooks(MemoryEngine::new())
//!     .max_modify_size(1 << 20)
//!     .mode(ModifyMode::Unsafe)
//!     .build()?;
//! ```

use std::sync::Arc;

use eyre::{ensure, Result};

use super::hooks::EngineHooks;
use super::Client;
use crate::config::{DEFAULT_MODIFY_SIZE, MAX_MODIFY_SIZE, STRING_COMPRESS_THRESHOLD};
use crate::modify::ModifyMode;

/// Builder for a [`Client`].
///
/// Use `Client::builder()` to create one, chain settings, then call `build()`.
pub struct ClientBuilder {
    hooks: Option<Arc<dyn EngineHooks>>,
    modify_size: Option<usize>,
    max_modify_size: Option<usize>,
    mode: ModifyMode,
    compress_threshold: Option<usize>,
    default_locale: Option<String>,
    clock: Option<i64>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            hooks: None,
            modify_size: None,
            max_modify_size: None,
            mode: ModifyMode::Safe,
            compress_threshold: None,
            default_locale: None,
            clock: None,
        }
    }

    /// Sets the engine every batch and query is sent to. Required.
    pub fn hooks<H: EngineHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Shares an engine that is also used elsewhere, e.g. by a second client.
    pub fn shared_hooks(mut self, hooks: Arc<dyn EngineHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Initial capacity of the mutation buffer in bytes.
    pub fn modify_size(mut self, bytes: usize) -> Self {
        self.modify_size = Some(bytes);
        self
    }

    /// Largest capacity the mutation buffer grows to before it is flushed.
    ///
    /// A single record larger than this fails with `CodecError::OutOfSpace`.
    pub fn max_modify_size(mut self, bytes: usize) -> Self {
        self.max_modify_size = Some(bytes);
        self
    }

    pub fn mode(mut self, mode: ModifyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn compress_threshold(mut self, bytes: usize) -> Self {
        self.compress_threshold = Some(bytes);
        self
    }

    /// Locale a bare string written to a text field is stored under.
    pub fn default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = Some(locale.into());
        self
    }

    /// Pins the time stamped into `on` timestamp fields, in milliseconds.
    pub fn clock(mut self, millis: i64) -> Self {
        self.clock = Some(millis);
        self
    }

    pub fn build(self) -> Result<Client> {
        let hooks = self
            .hooks
            .ok_or_else(|| eyre::eyre!("a client needs engine hooks"))?;
        let max = self.max_modify_size.unwrap_or(MAX_MODIFY_SIZE);
        let initial = self.modify_size.unwrap_or(DEFAULT_MODIFY_SIZE).min(max);
        ensure!(initial > 0, "mutation buffer size must be positive");
        Ok(Client::from_parts(super::ClientParts {
            hooks,
            modify_size: initial,
            max_modify_size: max,
            mode: self.mode,
            compress_threshold: self.compress_threshold.unwrap_or(STRING_COMPRESS_THRESHOLD),
            default_locale: self.default_locale,
            clock: self.clock,
        }))
    }
}
