//! Error types returned by the directory manager.

/// An error returned by a fallible directory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SegtabError {
    /// No free page was available for directory growth and the caller asked
    /// to fail rather than block.
    #[error("no free page available for directory growth")]
    NoFreePage,
}
