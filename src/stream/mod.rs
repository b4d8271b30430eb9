//! Backpressure Cursor - demand-driven streaming over blocking cursors
//!
//! Reads never execute eagerly. A read returns a [`Publisher`] that owns an
//! unopened [`RowCursor`]. Subscribing yields a [`Subscription`] whose
//! `request(n)` drains up to `n` rows on the calling thread:
//!
//! ```text
//! request(n) ──► demand += n ──► was demand 0? ──no──► return
//!                                     │yes
//!                                     ▼
//!                 open cursor (first call only)
//!                                     │
//!            ┌──────────────► cancelled? ──yes──► close, stop
//!            │                        │no
//!            │                 advance cursor ──none──► close, on_complete
//!            │                        │row     └─err───► close, on_error
//!            │                 cancelled? ──yes──► close, stop
//!            │                        │no
//!            │                 on_next(row)
//!            └──── demand -= 1 ──► demand 0? ──yes──► return
//! ```
//!
//! `RowCursor::open` and `RowCursor::advance` are the only suspension points:
//! either may block on I/O. There is no background thread, so a subscription
//! that is never drained keeps its cursor and transaction open.

pub mod cursor;
pub mod subscription;

pub use cursor::{IterCursor, QueryCursor, RowCursor, RowMapper, SeekKey, SEEK_MARKER};
pub use subscription::{Demand, Publisher, Pull, Subscriber, Subscription};
