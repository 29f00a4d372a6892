//! FlowScore Network - incremental constraint-evaluation network.
//!
//! A dataflow graph that keeps the full multiset of constraint matches
//! (and the resulting score) continuously correct while an outside
//! optimizer mutates a working solution one fact at a time, without ever
//! recomputing from scratch:
//! - `NetworkFactory` declares the chain of filter/map/join/group
//!   operations and freezes it into a `Network`
//! - `Session` binds a network to one working solution and consumes
//!   insert/update/retract calls
//! - terminal nodes expose the live constraint matches and the running
//!   score
//!
//! The network is single-writer and synchronous per session; independent
//! sessions over one shared `Arc<Network>` run concurrently without
//! locking.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use std::sync::Arc;
//!
//! use flowscore_core::SimpleScore;
//! use flowscore_network::joiner::equal;
//! use flowscore_network::{NetworkFactory, Session, Tuple};
//!
//! #[derive(Debug)]
//! struct Shift {
//!     id: i64,
//!     employee: i64,
//! }
//!
//! impl flowscore_network::Fact for Shift {
//!     fn fact_id(&self) -> i64 {
//!         self.id
//!     }
//!
//!     fn as_any(&self) -> &dyn std::any::Any {
//!         self
//!     }
//! }
//!
//! let mut factory = NetworkFactory::<SimpleScore>::new();
//! let shifts = factory.for_each::<Shift>();
//! let others = factory.for_each::<Shift>();
//! let pairs = factory
//!     .join(
//!         shifts,
//!         others,
//!         vec![equal(
//!             |t: &Tuple| t.fact::<Shift>(0).employee,
//!             |t: &Tuple| t.fact::<Shift>(0).employee,
//!         )],
//!     )
//!     .unwrap();
//! let conflicts = factory.filter(pairs, |t: &Tuple| {
//!     t.fact::<Shift>(0).id < t.fact::<Shift>(1).id
//! });
//! factory.penalize(conflicts, "Employee conflict", |_| SimpleScore::ONE);
//!
//! let network = Arc::new(factory.build());
//! let mut session = Session::new(Arc::clone(&network)).unwrap();
//! session.insert(Rc::new(Shift { id: 1, employee: 7 })).unwrap();
//! session.insert(Rc::new(Shift { id: 2, employee: 7 })).unwrap();
//! assert_eq!(session.score(), SimpleScore::of(-1));
//! ```

pub mod collector;
pub mod error;
pub mod fact;
pub mod index;
pub mod joiner;
pub mod key;
pub mod network;
pub mod node;
pub mod session;
pub mod tuple;
pub mod util;

pub use error::{NetworkError, Result};
pub use fact::{Fact, FactHandle, FactId};
pub use key::{IndexKeys, KeyValue};
pub use network::{Network, NetworkFactory, StreamRef};
pub use session::{ConstraintMatch, Session, SessionStats};
pub use tuple::{Tuple, TupleState};
