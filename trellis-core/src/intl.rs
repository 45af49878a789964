//! Package-scoped message access
//!
//! Message loading is out of scope for the service layer; packages hand
//! their message tables in at build time and services read them through
//! this accessor.

use rustc_hash::FxHashMap;
use std::sync::Arc;

struct IntlInner {
    locale: String,
    messages: FxHashMap<String, String>,
}

/// Locale and message table of a package.
///
/// Cloning is cheap; the table is shared.
#[derive(Clone)]
pub struct PackageIntl {
    inner: Arc<IntlInner>,
}

impl PackageIntl {
    /// Create an accessor for the given locale and message table
    pub fn new(locale: impl Into<String>, messages: FxHashMap<String, String>) -> Self {
        Self {
            inner: Arc::new(IntlInner {
                locale: locale.into(),
                messages,
            }),
        }
    }

    /// An accessor with no messages
    pub fn empty(locale: impl Into<String>) -> Self {
        Self::new(locale, FxHashMap::default())
    }

    /// Locale tag of this package
    pub fn locale(&self) -> &str {
        &self.inner.locale
    }

    /// Look up a raw message by id
    pub fn message(&self, id: &str) -> Option<&str> {
        self.inner.messages.get(id).map(String::as_str)
    }

    /// Look up a message and substitute `{name}` placeholders.
    ///
    /// Placeholders with no matching argument are left in place.
    pub fn format_message(&self, id: &str, args: &[(&str, &str)]) -> Option<String> {
        let mut text = self.message(id)?.to_string();
        for (name, value) in args {
            text = text.replace(&format!("{{{}}}", name), value);
        }
        Some(text)
    }

    /// Number of messages in the table
    pub fn len(&self) -> usize {
        self.inner.messages.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.inner.messages.is_empty()
    }
}

impl std::fmt::Debug for PackageIntl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageIntl")
            .field("locale", &self.inner.locale)
            .field("messages", &self.inner.messages.len())
            .finish()
    }
}
