//! Shared port traits for deltacov's hexagonal architecture.

/// Port for obtaining raw diff text from a revision-control system.
///
/// Implementations must surface every failure to run the underlying tool or
/// read its output as `Err`; an empty `Ok` always means "nothing changed".
pub trait DiffProvider {
    /// Name-status listing between two revisions, one `status\tpath` entry
    /// per line.
    fn name_status(&self, base: &str, head: &str) -> Result<String, String>;

    /// Unified diff of a single file with the whole file as context and a
    /// single change-indicator column.
    fn full_context_diff(&self, base: &str, head: &str, path: &str) -> Result<String, String>;

    /// Like [`full_context_diff`](Self::full_context_diff) for a file moved
    /// or copied from `from` to `to`, with both sides paired so only edits
    /// made along the way show as changes.
    ///
    /// Providers without rename pairing diff `to` on its own.
    fn renamed_full_context_diff(
        &self,
        base: &str,
        head: &str,
        _from: &str,
        to: &str,
    ) -> Result<String, String> {
        self.full_context_diff(base, head, to)
    }

    /// Identifier of the currently checked-out revision.
    fn head_revision(&self) -> Result<String, String>;
}

impl<T: DiffProvider + ?Sized> DiffProvider for &T {
    fn name_status(&self, base: &str, head: &str) -> Result<String, String> {
        (**self).name_status(base, head)
    }

    fn full_context_diff(&self, base: &str, head: &str, path: &str) -> Result<String, String> {
        (**self).full_context_diff(base, head, path)
    }

    fn renamed_full_context_diff(
        &self,
        base: &str,
        head: &str,
        from: &str,
        to: &str,
    ) -> Result<String, String> {
        (**self).renamed_full_context_diff(base, head, from, to)
    }

    fn head_revision(&self) -> Result<String, String> {
        (**self).head_revision()
    }
}

/// Port for obtaining the current UTC time.
pub trait Clock {
    /// Returns the current time in UTC.
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}
