//! Testing utilities for the CMS backend
//!
//! This crate provides:
//! - Fixtures producing valid create inputs for every entity
//! - Builder patterns for inputs that tests need to customise
//! - A test database handle that applies migrations and truncates tables
//!
//! # Examples
//!
//! ```
//! use cms_testing::{builders::*, fixtures::*};
//!
//! let category = new_test_category(None);
//! assert!(!category.slug.is_empty());
//!
//! let article = ArticleBuilder::new()
//!     .with_title("Campus open day")
//!     .published()
//!     .with_tags(["events", "campus"])
//!     .build();
//! assert_eq!(article.tags.len(), 2);
//! ```

pub mod builders;
pub mod database;
pub mod fixtures;

// Re-export commonly used types
pub use builders::*;
pub use database::TestDatabase;
pub use fixtures::*;

// Re-export testing dependencies for convenience
pub use fake;
pub use proptest;
