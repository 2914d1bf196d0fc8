pub mod anonymous;
pub mod service;

pub use service::{CommentError, CommentNode, CommentService};
