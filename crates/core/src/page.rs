//! Narrow capability traits over a live storefront page.
//!
//! The collection algorithms never see a browser handle; they see these
//! traits. The WebDriver-backed implementations live in the binary crate,
//! and the tests drive the same algorithms against in-memory fakes. Keep
//! these surfaces minimal: every method is one observable page fact or one
//! user-shaped interaction.

use std::sync::Arc;

use async_trait::async_trait;
use cw_protocol::CartLineItem;

use crate::error::Result;
use crate::session::Credential;

/// Scroll state of the virtualized cart list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollPosition {
	/// Current scroll offset in pixels.
	pub offset: i64,
	/// Maximum reachable offset.
	pub max: i64,
}

impl ScrollPosition {
	pub fn at_bottom(&self) -> bool {
		self.offset >= self.max
	}
}

/// Read/drive surface of the cart page.
#[async_trait]
pub trait CartView: Send + Sync {
	/// Extracts every line item currently rendered in the viewport.
	/// Fields the renderer has not populated yet come back as `None`.
	async fn visible_items(&self) -> Result<Vec<CartLineItem>>;

	/// Item count the cart UI claims, when it exposes one.
	async fn total_hint(&self) -> Result<Option<u32>>;

	async fn scroll_position(&self) -> Result<ScrollPosition>;

	/// Scrolls the list by `delta` pixels (negative scrolls up).
	async fn scroll_by(&self, delta: i64) -> Result<()>;

	/// Copy rendered after the last list row, used for the "why we
	/// stopped" diagnosis ("no more items", "recommended for you", ...).
	async fn trailing_text(&self) -> Result<Option<String>>;
}

/// Read/drive surface of a listing page's option-selection UI.
#[async_trait]
pub trait ListingView: Send + Sync {
	/// Option group names in display order (e.g. `["color", "size"]`).
	async fn option_groups(&self) -> Result<Vec<String>>;

	/// Identifiers of the currently *enabled* options in a group.
	/// Disabled (unsellable under the current partial selection) options
	/// are excluded.
	async fn enabled_options(&self, group: &str) -> Result<Vec<String>>;

	/// Clicks an option. Selection lands asynchronously; callers poll
	/// [`is_selected`](Self::is_selected) to confirm.
	async fn select(&self, group: &str, option: &str) -> Result<()>;

	async fn is_selected(&self, group: &str, option: &str) -> Result<bool>;

	/// Currently displayed price token, unparsed (e.g. `"$1,299.00"`).
	async fn price_text(&self) -> Result<Option<String>>;

	/// Struck-through original price token, when shown.
	async fn original_price_text(&self) -> Result<Option<String>>;

	/// Sku id the page resolved for the current selection, when exposed.
	async fn sku_id(&self) -> Result<Option<String>>;

	async fn thumbnail_url(&self) -> Result<Option<String>>;
}

/// One live, authenticated automation context bound to a single account.
#[async_trait]
pub trait PageSession: Send + Sync {
	/// Trivial round-trip through the live page. `false` means the
	/// session must be rebuilt.
	async fn is_healthy(&self) -> bool;

	/// Navigates to the cart and returns its view.
	async fn open_cart(&self) -> Result<Arc<dyn CartView>>;

	/// Navigates to a listing and returns its option-selection view.
	async fn open_listing(&self, url: &str) -> Result<Arc<dyn ListingView>>;

	/// Adds one listing to the cart (one atomic step of a bulk run).
	async fn add_to_cart(&self, listing_url: &str) -> Result<()>;

	/// Tears the underlying browser context down.
	async fn close(&self);
}

/// Builds sessions for the session manager.
#[async_trait]
pub trait SessionBackend: Send + Sync {
	/// Builds a fresh session: anti-fingerprint init, credential cookies
	/// injected, one page opened.
	async fn build(&self, account_id: &str, credential: &Credential) -> Result<Arc<dyn PageSession>>;
}
