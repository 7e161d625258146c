//! Conversation model, export rendering and platform clients.
//!
//! This crate owns everything between the source platform's wire format
//! and the destination platforms: fetching listings and details, turning
//! a raw message mapping into a flat export structure, rendering it as
//! Markdown, and pushing it into Anytype or Notion.

pub mod anytype;
pub mod assemble;
pub mod convo;
pub mod markdown;
pub mod notion;
pub mod source;

mod error;

pub use anytype::{AnytypeClient, sync_to_anytype};
pub use assemble::{ExportConversation, ExportMessage, ReferenceLink, build_export_conversation};
pub use convo::{ConversationDetail, ConversationPage, ConversationSummary};
pub use error::{ExportError, Result};
pub use markdown::{format_timestamp, render_conversation_markdown, resolve_timezone};
pub use notion::{NotionClient, sync_to_notion};
pub use source::SourceClient;
