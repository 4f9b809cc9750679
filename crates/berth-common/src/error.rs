//! Common error types for the Berth network subsystem.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BerthError`].
pub type BerthResult<T> = Result<T, BerthError>;

/// Common errors across the Berth network subsystem.
#[derive(Error, Diagnostic, Debug)]
pub enum BerthError {
    /// A required argument was missing or malformed.
    #[error("Invalid argument: {message}")]
    #[diagnostic(code(berth::invalid_argument))]
    InvalidArgument {
        /// What was wrong with the input.
        message: String,
    },

    /// A resource with the same identity already exists.
    #[error("Duplicate resource: {id}")]
    #[diagnostic(code(berth::duplicate))]
    DuplicateResource {
        /// The identifier that collided.
        id: String,
    },

    /// Lookup by identifier failed.
    #[error("Resource not found: {id}")]
    #[diagnostic(code(berth::not_found))]
    ResourceNotFound {
        /// The identifier that was not found.
        id: String,
    },

    /// The operation's ordering precondition does not hold.
    #[error("Precondition failed: {message}")]
    #[diagnostic(code(berth::precondition))]
    PreconditionFailed {
        /// Which precondition was violated.
        message: String,
    },

    /// No address space could satisfy a reservation request.
    #[error("Address pool exhausted: {pool}")]
    #[diagnostic(
        code(berth::ipam::exhausted),
        help("Release unused endpoints or widen the scope's address pools")
    )]
    AllocationExhausted {
        /// The pool or address that could not be satisfied.
        pool: String,
    },

    /// Release was requested for an address no space holds.
    #[error("Release of unreserved address: {ip}")]
    #[diagnostic(
        code(berth::ipam::inconsistent),
        help("This usually indicates a double release or a release against the wrong scope")
    )]
    AllocationInconsistent {
        /// The address that was not reserved.
        ip: String,
    },

    /// Identifier validation failed.
    #[error("Invalid identifier: {id}")]
    #[diagnostic(
        code(berth::id::invalid),
        help("Identifiers must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidId {
        /// The invalid identifier.
        id: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(berth::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// The guest configuration channel is only reachable inside a
    /// virtual machine.
    #[error("Guest configuration channel unavailable outside a virtual machine")]
    #[diagnostic(code(berth::guestinfo::unavailable))]
    NotVirtualized,
}
