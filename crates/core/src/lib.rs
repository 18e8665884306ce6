//! Browser-domain engine.
//!
//! Everything that touches a live storefront page goes through the narrow
//! capability traits in [`page`]; the algorithms on top of them - cart
//! collection, variant enumeration, bulk add - are pure control flow over
//! those traits and are tested against fakes. [`session`] owns the one
//! live session per account; [`pause`] lets a short operation borrow a
//! session from a long one at a safe point.

pub mod bulk;
pub mod cart;
pub mod error;
pub mod page;
pub mod pause;
pub mod session;
pub mod sku;

pub use error::{CoreError, Result};
pub use page::{ListingView, CartView, PageSession, ScrollPosition, SessionBackend};
pub use pause::PauseCoordinator;
pub use session::{Credential, SessionManager};
