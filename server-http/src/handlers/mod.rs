pub mod cache_ops;

pub use cache_ops::{delete_value, empty_path, get_value, post_value, put_value};
