//! Utility functions shared across the crate.
//!
//! - **URL normalization**: canonical podcast keys from arbitrary feed URLs
//! - **Text processing**: sanitizing user-supplied labels such as tags
//!
//! # Examples
//!
//! ```
//! use podsync::util::{clean_label, normalize_url};
//!
//! assert_eq!(normalize_url("Example.com/rss/"), "http://example.com/rss");
//! assert_eq!(clean_label("  tech\n"), Some("tech".to_string()));
//! ```

mod text;
mod url_normalizer;

pub use text::{clean_label, clean_text, fold_case, strip_control_chars};
pub use url_normalizer::normalize_url;
