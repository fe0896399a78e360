//! Boxed future alias for dyn-compatible async traits.

use std::future::Future;
use std::pin::Pin;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
