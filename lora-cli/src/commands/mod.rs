//! CLI command implementations.

pub mod encode;
pub mod history;
pub mod inspect;
pub mod run;
pub mod send_chat;
