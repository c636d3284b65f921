//! # mimetree
//!
//! Lazy MIME message parsing into a navigable part tree.
//!
//! ## Features
//!
//! - **Single-pass scanning**: one linear read locates every part by byte offset
//! - **Lazy bodies**: content stays in the source and is decoded on demand
//! - **Streaming decode**: Base64 and Quoted-Printable in bounded windows
//! - **Headers**: case-insensitive lookup, RFC 2047 encoded words, RFC 2231 parameters
//! - **Attachments**: streamed, or staged in scoped temporary files
//!
//! ## Quick Start
//!
//! ### Reading a message
//!
//! ```
//! use mimetree::{BodyKind, Message};
//!
//! let raw = "From: sender@example.com\r\n\
//!            Subject: Test\r\n\
//!            Content-Type: text/plain\r\n\
//!            \r\n\
//!            Hello, World!";
//!
//! let message = Message::parse(raw)?;
//! assert_eq!(message.header("subject")?, Some("Test"));
//! assert_eq!(message.message_body(BodyKind::Text)?.as_deref(), Some("Hello, World!"));
//! # Ok::<(), mimetree::Error>(())
//! ```
//!
//! ### Walking the part tree
//!
//! ```
//! use mimetree::Message;
//!
//! let raw = "Content-Type: multipart/mixed; boundary=X\r\n\r\n\
//!            --X\r\nContent-Type: text/plain\r\n\r\nHello\r\n\
//!            --X\r\nContent-Type: text/html\r\n\r\n<p>Hello</p>\r\n\
//!            --X--\r\n";
//!
//! let message = Message::parse(raw)?;
//! let ids: Vec<&str> = message.parts()?.map(|part| part.id()).collect();
//! assert_eq!(ids, ["1", "1.1", "1.2"]);
//! # Ok::<(), mimetree::Error>(())
//! ```
//!
//! ### Attachments
//!
//! ```no_run
//! use mimetree::{Message, ParserConfig};
//!
//! let config = ParserConfig::builder().stage_in("/var/tmp").build();
//! let mut message = Message::with_config(config);
//! message.attach_path("mail.eml")?;
//!
//! for attachment in message.attachments()? {
//!     let data = attachment.read_to_vec()?;
//!     println!("{:?}: {} bytes", attachment.filename(), data.len());
//! }
//! # Ok::<(), mimetree::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod attachment;
mod config;
mod content_type;
mod error;
mod header;
mod message;
mod params;
mod scanner;
mod source;
mod tree;

pub mod encoding;

pub use attachment::{Attachment, AttachmentContent};
pub use config::{DEFAULT_CHUNK_SIZE, ParserConfig, ParserConfigBuilder, Staging};
pub use content_type::{ContentDisposition, ContentType, DispositionKind};
pub use encoding::{Decoder, TransferEncoding};
pub use error::{Error, Result};
pub use header::{HeaderField, Headers};
pub use message::{BodyKind, Message, PartReader};
pub use source::{ByteSource, SourceReader};
pub use tree::{Part, PartTree, ROOT_ID};
