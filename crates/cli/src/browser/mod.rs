//! WebDriver implementations of the core capability traits.
//!
//! Everything here is the deliberately thin, selector-driven layer the
//! engine sits on. Selector rot is an accepted operational concern: the
//! CSS lives in config, and every extraction degrades to `None` instead
//! of failing the whole scrape.

mod cart_page;
mod listing_page;
mod session;
mod stealth;

pub use session::{WebDriverBackend, WebDriverBackendConfig};
