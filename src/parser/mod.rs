//! Feature path compilation and record parsing.
//!
//! [`ParserTree::build`] turns `(path, type)` pairs into a tree of parser
//! nodes. Parsing a record walks the tree over the decoded datum and appends
//! scalars into one value store per feature key.
//!
//! Filters (`persons[name='Carl'].age`) compare against features parsed
//! earlier in the same walk, so the compiler adds string-typed auxiliary
//! keys for filter operands and orders them first.

mod node;
mod path;
mod prefix_tree;
mod tree;

pub use path::FilterKind;
pub use tree::{DefaultValues, ParserTree};
