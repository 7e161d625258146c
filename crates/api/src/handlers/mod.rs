mod config;
mod conversations;

pub use config::{config_get, config_password, config_state, config_unlock, config_update};
pub use conversations::{conversation_detail, delete_conversations, import_conversations, list_conversations};
