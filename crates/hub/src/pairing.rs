//! Pairing codes and connection-time authentication.
//!
//! Two ways into the hub: the shared static credential (fleet-wide,
//! configured out-of-band), or a per-agent token minted by redeeming a
//! short-lived single-use pairing code. The code path binds the agent to
//! an owning user; the shared path leaves it unowned.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cw_protocol::{PAIRING_CODE_TTL_SECS, PairingCode};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;

use crate::error::{HubError, Result};
use crate::registry::now_ts;

/// Unambiguous alphabet for operator-typed pairing codes (no 0/O, 1/I).
const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
const CODE_LEN: usize = 8;
const TOKEN_LEN: usize = 40;

struct IssuedCode {
	owner_user: String,
	deadline: Instant,
}

struct AgentToken {
	token: String,
	owner_user: String,
}

/// Issues pairing codes and validates connection credentials.
pub struct PairingStore {
	/// Fleet-wide credential; `None` disables the shared path entirely.
	shared_credential: Option<String>,
	codes: Mutex<HashMap<String, IssuedCode>>,
	tokens: DashMap<String, AgentToken>,
}

impl PairingStore {
	pub fn new(shared_credential: Option<String>) -> Self {
		Self {
			shared_credential,
			codes: Mutex::new(HashMap::new()),
			tokens: DashMap::new(),
		}
	}

	/// Mints a single-use code for `owner_user` with the default TTL.
	pub fn issue(&self, owner_user: &str) -> PairingCode {
		self.issue_with_ttl(owner_user, Duration::from_secs(PAIRING_CODE_TTL_SECS))
	}

	/// Mints a single-use code with an explicit TTL.
	pub fn issue_with_ttl(&self, owner_user: &str, ttl: Duration) -> PairingCode {
		let code = random_string(CODE_ALPHABET, CODE_LEN);
		self.codes.lock().insert(
			code.clone(),
			IssuedCode {
				owner_user: owner_user.to_string(),
				deadline: Instant::now() + ttl,
			},
		);
		PairingCode {
			code,
			owner_user: owner_user.to_string(),
			expires_at: now_ts() + ttl.as_secs(),
		}
	}

	/// Redeems a code for a persistent agent token. The code burns on the
	/// first attempt, successful or not past expiry.
	pub fn redeem(&self, code: &str, agent_id: &str) -> Result<(String, String)> {
		let issued = self
			.codes
			.lock()
			.remove(code)
			.ok_or_else(|| HubError::Auth("unknown or already-used pairing code".into()))?;
		if Instant::now() > issued.deadline {
			return Err(HubError::Auth("pairing code expired".into()));
		}
		let token = random_string(CODE_ALPHABET, TOKEN_LEN);
		self.tokens.insert(
			agent_id.to_string(),
			AgentToken {
				token: token.clone(),
				owner_user: issued.owner_user.clone(),
			},
		);
		Ok((token, issued.owner_user))
	}

	/// Validates a connection credential for `agent_id`.
	///
	/// Returns the owning user for token-authenticated agents, `None` for
	/// the shared-credential path.
	pub fn verify(&self, agent_id: &str, presented: &str) -> Result<Option<String>> {
		if let Some(entry) = self.tokens.get(agent_id) {
			if constant_time_eq(entry.token.as_bytes(), presented.as_bytes()) {
				return Ok(Some(entry.owner_user.clone()));
			}
		}
		if let Some(shared) = &self.shared_credential {
			if constant_time_eq(shared.as_bytes(), presented.as_bytes()) {
				return Ok(None);
			}
		}
		Err(HubError::Auth(format!("bad credential for agent {agent_id}")))
	}

	/// Drops the token for an agent, forcing it back through pairing.
	pub fn revoke(&self, agent_id: &str) -> bool {
		self.tokens.remove(agent_id).is_some()
	}
}

fn random_string(alphabet: &[u8], len: usize) -> String {
	let mut rng = rand::thread_rng();
	(0..len)
		.map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
		.collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}
	a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
