//! Bulk copy options and defaults.

use bitflags::bitflags;

/// Rows sent per network flush when the caller does not specify one.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

bitflags! {
    /// Options controlling bulk copy behavior at the destination.
    ///
    /// Mirrors the SqlBulkCopy option set; providers honor the flags their
    /// channel supports and ignore the rest.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BulkCopyOptions: u32 {
        /// Preserve source identity values. When not specified, identity
        /// values are assigned by the destination.
        const KEEP_IDENTITY     = 0b00000001;
        /// Check constraints while data is being inserted.
        const CHECK_CONSTRAINTS = 0b00000010;
        /// Obtain a bulk update lock for the duration of the operation.
        const TABLE_LOCK        = 0b00000100;
        /// Preserve null values regardless of destination defaults.
        const KEEP_NULLS        = 0b00001000;
        /// Fire insert triggers for the rows being inserted.
        const FIRE_TRIGGERS     = 0b00010000;
    }
}

impl Default for BulkCopyOptions {
    fn default() -> Self {
        BulkCopyOptions::empty()
    }
}

impl BulkCopyOptions {
    /// Whether identity values are written as supplied.
    #[must_use]
    pub fn keep_identity(&self) -> bool {
        self.contains(BulkCopyOptions::KEEP_IDENTITY)
    }
}
