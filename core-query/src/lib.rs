//! # Core Query
//!
//! Realtime query descriptions and the multiplexer that shares one host
//! query between every equivalent observer.
//!
//! - [`value`]: filter operands and their canonical text
//! - [`modifier`]: order, limit and filter modifiers with fragment ids
//! - [`query`]: persistent [`Query`] values, validation and identity
//! - [`multiplexer`]: attach/detach observers, snapshot routing
//!
//! ```ignore
//! let query = Query::new("users").order_by("age")?.limit_to_first(10)?;
//! let handle = multiplexer.attach(&query, |update| println!("{update:?}")).await?;
//! ```

pub mod error;
pub mod modifier;
pub mod multiplexer;
pub mod query;
pub mod value;

pub use error::{QueryError, Result};
pub use modifier::{FilterOp, LimitDirection, ModifierKind, ModifierSpec, QueryModifier};
pub use multiplexer::{QueryUpdate, SubscriptionMultiplexer};
pub use query::{CanonicalQueryIdentity, Query, QueryTarget};
pub use value::{FilterValue, ValueType};
