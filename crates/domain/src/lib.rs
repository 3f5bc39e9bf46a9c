//! CMS Domain Types
//!
//! This crate provides the domain model for the content and event management
//! backend: articles, news, media, surveys, WeChat integration, users, events
//! and page hits. It holds entities, repository filter types, create/update
//! inputs, and the pure helpers that do not need a database (category tree
//! traversal, statistics shaping, survey answer validation).
//!
//! ## Architecture
//!
//! - **identifiers**: Strongly-typed UUID-based identifiers for all entities
//! - **audit**: Soft-delete and audit timestamps shared by every table
//! - **category**: Hierarchical categories and parent-pointer traversal
//! - **article** / **news**: Editorial content
//! - **media**: Image library and videos
//! - **survey**: Surveys, questions, options, responses and statistics
//! - **wechat**: WeChat followers and QR codes
//! - **user**: Back-office and member accounts
//! - **event**: Events and registrations
//! - **hit**: Page hit log and traffic statistics
//! - **errors**: Domain rule violations
//!
//! ## Usage
//!
//! ```rust
//! use cms_domain::{
//!     category::{self, Category},
//!     identifiers::CategoryId,
//! };
//!
//! let root = Category::new_root("News", "news");
//! let all = vec![root.clone()];
//! assert_eq!(category::descendant_ids(&all, root.id), vec![root.id]);
//! ```

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

#[macro_use]
mod macros;

pub mod article;
pub mod audit;
pub mod category;
pub mod errors;
pub mod event;
pub mod hit;
pub mod identifiers;
pub mod media;
pub mod news;
pub mod stats;
pub mod survey;
pub mod user;
pub mod wechat;

pub use audit::Audit;
pub use errors::{DomainError, DomainResult};
pub use identifiers::*;
pub use stats::{DailyCount, StatusCount};
