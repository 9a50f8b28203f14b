// src/types.rs

use std::future::Future;
use std::pin::Pin;

/// Boxed, `Send` future returned by the object-safe async seams (task
/// executor bridge, execute strategies, notify callbacks).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
