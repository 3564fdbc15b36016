//! Attachment handling: download chat attachments into an agent workspace and
//! describe the result for the prompt.

pub mod error;
pub mod fetch;
pub mod summary;

pub use {
    error::{Error, Result},
    fetch::{
        AttachmentFetcher, DownloadOutcome, HttpAttachmentFetcher, sanitize_filename,
        unique_filenames,
    },
    summary::summarize,
};
