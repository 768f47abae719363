//! Commonly used test helpers.
//!
//! ```rust,ignore
//! use synapse_test::prelude::*;
//!
//! #[tokio::test]
//! async fn test_components_start() {
//!     let (_bus, coordinator) = test_coordinator();
//!     let journal = Journal::new();
//!     let handle = coordinator.handle(Box::new(
//!         RecordingComponent::new("cam", ComponentKind::Input).with_journal(journal.clone()),
//!     ));
//!     coordinator.register(handle).unwrap();
//!     coordinator.activate_all().await;
//!     assert_eq!(journal.calls("start"), ["cam"]);
//! }
//! ```

pub use crate::fixtures::*;
pub use crate::harness::*;
pub use crate::mocks::*;
