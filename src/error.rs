//! Typed host-side errors.
//!
//! Wire-level and protocol-level problems are not modeled as `Result` failures —
//! per the bus contract they are reported through the mailbox's error byte or
//! answered with a status reply (see [`crate::mailbox::ErrorCode`] and
//! [`crate::consts::status_code`]). These types cover the host-side collaborators:
//! loading/saving disk images and standing up the shared mailbox.

use std::io;

/// Errors from loading or saving a disk image.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("i/o error accessing disk image: {0}")]
    Io(#[from] io::Error),

    #[error("disk image ended after {blocks_read} blocks, expected {expected}")]
    UnexpectedEof { blocks_read: usize, expected: usize },
}

/// Errors constructing or tearing down the shared mailbox.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox already taken by another engine/supervisor pair")]
    AlreadyTaken,
}
