use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CwError>;

#[derive(Debug, Error)]
pub enum CwError {
	#[error("config error: {0}")]
	Config(String),

	#[error("config file not found: {}", .0.display())]
	ConfigNotFound(PathBuf),

	#[error("account not configured: {0}")]
	UnknownAccount(String),

	#[error("pairing failed: {0}")]
	Pairing(String),

	#[error("webdriver error: {0}")]
	WebDriver(String),

	#[error(transparent)]
	Core(#[from] cw_core::CoreError),

	#[error(transparent)]
	Hub(#[from] cw_hub::HubError),

	#[error(transparent)]
	Sched(#[from] cw_sched::SchedError),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Http(#[from] reqwest::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl From<thirtyfour::error::WebDriverError> for CwError {
	fn from(err: thirtyfour::error::WebDriverError) -> Self {
		CwError::WebDriver(err.to_string())
	}
}
