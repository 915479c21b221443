//! # kbchat
//!
//! A terminal chat client for Claude-style chat completion APIs, grounded in
//! a local knowledge base.
//!
//! Documents live as plain files in one directory. Every outgoing message is
//! matched against them with case-insensitive substring search, and the best
//! snippets are prepended to the user turn as context. Replies, token usage
//! and prompt-cache savings are tracked per session, and conversations can
//! be exported to Markdown, HTML, or a reloadable JSON snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Knowledge   │──▶│   Prompt    │──▶│  Chat API    │
//! │ base (dir)  │   │  assembly   │   │ (reqwest)    │
//! └─────────────┘   └──────┬──────┘   └──────┬───────┘
//!                          │                 │
//!                          ▼                 ▼
//!                   ┌────────────────────────────┐
//!                   │ Session: history + usage   │
//!                   └─────────────┬──────────────┘
//!                                 ▼
//!                     ┌─────────────────────┐
//!                     │ CLI / REPL (kbchat) │
//!                     └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbchat settings set api_key sk-or-...
//! kbchat kb import ./handbook.pdf
//! kbchat kb search "deployment"
//! kbchat ask "How do we deploy?"
//! kbchat chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error enums |
//! | [`store`] | Document store on disk |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`search`] | Keyword search with snippets |
//! | [`prompt`] | User turn assembly |
//! | [`api`] | Chat completion client |
//! | [`usage`] | Token accounting and cost |
//! | [`session`] | Conversation state |
//! | [`settings`] | Persisted user settings |
//! | [`export`] | Conversation export and reload |
//! | [`render`] | Terminal Markdown rendering |
//! | [`repl`] | Interactive chat loop |

pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod models;
pub mod prompt;
pub mod render;
pub mod repl;
pub mod search;
pub mod session;
pub mod settings;
pub mod store;
pub mod usage;
