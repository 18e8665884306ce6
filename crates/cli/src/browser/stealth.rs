//! Anti-fingerprint session initialization and cookie injection.

use cw_core::{CoreError, Credential};
use serde::Deserialize;
use thirtyfour::{Cookie, WebDriver};
use thirtyfour::extensions::cdp::ChromeDevTools;
use tracing::debug;

/// Injected before any page script runs. Masks the obvious automation
/// tells; a real human-like profile is layered on top by the browser
/// profile itself.
const STEALTH_JS: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = window.chrome || { runtime: {} };
"#;

/// Registers the stealth script to run on every new document.
pub async fn apply_stealth(driver: &WebDriver) -> Result<(), CoreError> {
	let dev_tools = ChromeDevTools::new(driver.handle.clone());
	dev_tools
		.execute_cdp_with_params(
			"Page.addScriptToEvaluateOnNewDocument",
			serde_json::json!({ "source": STEALTH_JS }),
		)
		.await
		.map_err(|e| CoreError::SessionInvalid(format!("stealth init: {e}")))?;
	Ok(())
}

/// Stored cookie shape, as exported by the account store.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
	pub name: String,
	pub value: String,
	pub domain: String,
	#[serde(default = "default_path")]
	pub path: String,
	#[serde(default)]
	pub secure: bool,
	#[serde(default)]
	pub expires: Option<i64>,
}

fn default_path() -> String {
	"/".into()
}

/// Parses the credential's cookie jar.
pub fn parse_cookies(credential: &Credential) -> Result<Vec<StoredCookie>, CoreError> {
	let cookies: Vec<StoredCookie> = serde_json::from_str(&credential.cookies_json)
		.map_err(|e| CoreError::SessionInvalid(format!("credential cookies: {e}")))?;
	Ok(cookies)
}

/// Injects the account's cookies into the live browser. The driver must
/// already be on the storefront origin - WebDriver rejects cookies for
/// foreign domains.
pub async fn inject_cookies(driver: &WebDriver, cookies: &[StoredCookie]) -> Result<(), CoreError> {
	for stored in cookies {
		let mut cookie = Cookie::new(stored.name.clone(), stored.value.clone());
		cookie.set_domain(stored.domain.clone());
		cookie.set_path(stored.path.clone());
		cookie.set_secure(stored.secure);
		if let Some(expires) = stored.expires {
			cookie.set_expiry(expires);
		}
		driver
			.add_cookie(cookie)
			.await
			.map_err(|e| CoreError::SessionInvalid(format!("cookie {}: {e}", stored.name)))?;
	}
	debug!(target = "cw.session", count = cookies.len(), "cookies injected");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_exported_cookie_jar() {
		let credential = Credential {
			cookies_json: r#"[
				{"name": "sid", "value": "abc", "domain": ".shop.example", "secure": true},
				{"name": "t", "value": "x", "domain": "shop.example", "path": "/cart", "expires": 1900000000}
			]"#
			.into(),
		};
		let cookies = parse_cookies(&credential).unwrap();
		assert_eq!(cookies.len(), 2);
		assert_eq!(cookies[0].path, "/");
		assert!(cookies[0].secure);
		assert_eq!(cookies[1].expires, Some(1_900_000_000));
	}

	#[test]
	fn garbage_jar_is_a_session_error() {
		let credential = Credential {
			cookies_json: "not json".into(),
		};
		assert!(matches!(
			parse_cookies(&credential),
			Err(CoreError::SessionInvalid(_))
		));
	}
}
