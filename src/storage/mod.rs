//! # Storage
//!
//! Hierarchical typed storage: a tree of fields, containers and lists saved as
//! a single formatted frame.
//!
//! ```rust
//! use wirekit::storage::StorageTree;
//! use wirekit::core::value::Value;
//!
//! let mut tree = StorageTree::new();
//! tree.set_value(&["test", "BEEF"], 0xBEEFi32)?;
//! tree.set_value(&["test", "key"], "value")?;
//!
//! let blob = tree.to_bytes()?;
//! let loaded = StorageTree::from_bytes(&blob)?;
//! assert_eq!(loaded.get_value(&["test", "BEEF"]), Some(&Value::I32(0xBEEF)));
//! # Ok::<(), wirekit::error::ProtocolError>(())
//! ```

pub mod codec;
pub mod member;
pub mod tree;

pub use member::{Container, Field, List, Member, MemberTag};
pub use tree::StorageTree;
