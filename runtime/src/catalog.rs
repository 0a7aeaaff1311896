//! Allow-listed application catalog.
//!
//! The launcher only ever shows a fixed set of applications. The host's
//! directory of installed apps is consumed as an opaque [`AppDirectory`] and
//! filtered through an [`AllowList`], preserving the directory's ordering.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Identifiers shown by a stock device image.
pub const DEFAULT_ALLOWED: [&str; 7] = [
    "com.termux",
    "com.termux.x11",
    "com.topjohnwu.magisk",
    "com.android.settings",
    "net.christianbeier.droidvnc_ng",
    "com.tailscale.ipn",
    "com.example.quinecamera",
];

/// Identifier whose absence hides the catalog on a stock device image.
pub const DEFAULT_GATE: &str = "com.topjohnwu.magisk";

/// Opaque icon reference, resolved by whatever renders the grid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IconHandle(pub String);

/// A launchable application as reported by the host's app directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    /// Human readable label.
    pub display_name: String,
    /// Stable package / process identifier.
    pub identifier: String,
    #[serde(default)]
    pub icon: IconHandle,
}

/// Directory of installed applications known to the host OS.
pub trait AppDirectory {
    /// All launchable targets, in the host's order.
    fn launchable_apps(&self) -> Vec<AppRecord>;

    /// Whether `identifier` is installed at all (launchable or not).
    fn is_installed(&self, identifier: &str) -> bool {
        self.launchable_apps()
            .iter()
            .any(|app| app.identifier == identifier)
    }
}

/// A directory backed by a fixed list, e.g. the `[[apps]]` table of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory(pub Vec<AppRecord>);

impl AppDirectory for StaticDirectory {
    fn launchable_apps(&self) -> Vec<AppRecord> {
        self.0.clone()
    }
}

/// Fixed set of identifiers permitted to appear in the catalog.
///
/// Matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    identifiers: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_allowed(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    /// Keeps the allowed records, in input order.
    pub fn filter<I>(&self, records: I) -> Vec<AppRecord>
    where
        I: IntoIterator<Item = AppRecord>,
    {
        records
            .into_iter()
            .filter(|record| self.is_allowed(&record.identifier))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED)
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum CatalogError {
    #[error("{0} not found")]
    RequiredAppMissing(String),
}

/// Builds the launcher's displayed app list.
///
/// When `gate` is set and that identifier is not installed, the catalog is
/// withheld entirely.
///
/// # Errors
///
/// Returns [`CatalogError::RequiredAppMissing`] if the gate app is not installed.
pub fn load_catalog(
    directory: &dyn AppDirectory,
    allow_list: &AllowList,
    gate: Option<&str>,
) -> Result<Vec<AppRecord>, CatalogError> {
    if let Some(required) = gate
        && !directory.is_installed(required)
    {
        return Err(CatalogError::RequiredAppMissing(required.to_string()));
    }
    Ok(allow_list.filter(directory.launchable_apps()))
}
