//! Reserved naming convention for quarantine contexts
//!
//! The host keeps context names across restarts, so the lock status is
//! encoded in the name: `<prefix>:<status>`, e.g. `quarantine:closed`.
//! Startup recovery parses the names back.

use crate::types::{LockStatus, Marker};

/// Separator between prefix and status tag
pub const SEPARATOR: char = ':';

/// Default reserved prefix
pub const DEFAULT_PREFIX: &str = "quarantine";

const ICON: &str = "fence";

/// Builds and parses reserved context names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextNaming {
    prefix: String,
}

impl Default for ContextNaming {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl ContextNaming {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name prefix shared by every reserved context, used for host queries
    pub fn query_prefix(&self) -> String {
        format!("{}{}", self.prefix, SEPARATOR)
    }

    /// Context name encoding `status`
    pub fn name_for(&self, status: LockStatus) -> String {
        format!("{}{}{}", self.prefix, SEPARATOR, status.as_str())
    }

    /// Status encoded in a reserved name; `None` for foreign names
    pub fn parse(&self, name: &str) -> Option<LockStatus> {
        let tag = name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(SEPARATOR)?;
        LockStatus::parse(tag).filter(|status| status.is_managed())
    }

    /// Visual marker shown by the host for `status`
    pub fn marker_for(&self, status: LockStatus) -> Marker {
        let color = match status {
            LockStatus::Open => "green",
            LockStatus::Closing => "orange",
            LockStatus::Closed => "red",
            LockStatus::None => "toolbar",
        };
        Marker::new(color, ICON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        let naming = ContextNaming::default();
        for status in [LockStatus::Open, LockStatus::Closing, LockStatus::Closed] {
            let name = naming.name_for(status);
            assert!(name.starts_with(&naming.query_prefix()));
            assert_eq!(naming.parse(&name), Some(status));
        }
        assert_eq!(naming.name_for(LockStatus::Closed), "quarantine:closed");
    }

    #[test]
    fn test_foreign_names_ignored() {
        let naming = ContextNaming::default();
        assert_eq!(naming.parse("Personal"), None);
        assert_eq!(naming.parse("quarantine"), None);
        assert_eq!(naming.parse("quarantineclosed"), None);
        assert_eq!(naming.parse("quarantine:locked"), None);
        assert_eq!(naming.parse("quarantine:none"), None);
        assert_eq!(naming.parse("other:open"), None);
    }

    #[test]
    fn test_custom_prefix() {
        let naming = ContextNaming::new("lab");
        assert_eq!(naming.name_for(LockStatus::Open), "lab:open");
        assert_eq!(naming.parse("lab:open"), Some(LockStatus::Open));
        assert_eq!(naming.parse("quarantine:open"), None);
    }

    #[test]
    fn test_markers_distinguish_status() {
        let naming = ContextNaming::default();
        let open = naming.marker_for(LockStatus::Open);
        let closed = naming.marker_for(LockStatus::Closed);
        assert_ne!(open.color, closed.color);
        assert_eq!(open.icon, closed.icon);
    }
}
