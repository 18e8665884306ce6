//! Types for the agent pairing exchange.
//!
//! Pairing binds a new agent machine to an owning user without sharing the
//! coordinator's static credential. The flow:
//!
//! 1. Operator runs `cw pair new` on the coordinator, which mints a
//!    short-lived single-use [`PairingCode`]
//! 2. The agent machine posts a [`PairRedeemRequest`] with the code
//! 3. The coordinator answers with a [`PairRedeemResponse`] carrying the
//!    persistent per-agent token, or a rejection
//! 4. The agent stores the token and presents it on every later
//!    WebSocket connection
//!
//! Codes expire quickly and burn on first redemption; tokens live until
//! the operator revokes the agent.

use serde::{Deserialize, Serialize};

/// How long a freshly minted pairing code stays redeemable.
pub const PAIRING_CODE_TTL_SECS: u64 = 300;

/// A single-use pairing code as displayed to the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingCode {
	/// The code itself (short, uppercase, unambiguous alphabet).
	pub code: String,
	/// User the redeeming agent will belong to.
	pub owner_user: String,
	/// Unix seconds after which the code is dead.
	pub expires_at: u64,
}

/// Operator request to mint a new pairing code (admin endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairNewRequest {
	/// User the redeeming agent will belong to.
	pub owner_user: String,
}

/// Redemption request posted by a pairing agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRedeemRequest {
	pub code: String,
	/// Identity the agent will connect under.
	pub agent_id: String,
}

/// Coordinator's answer to a redemption attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PairRedeemResponse {
	/// Code accepted; the token authenticates future connections.
	Paired {
		token: String,
		owner_user: String,
	},
	/// Code unknown, expired, or already redeemed.
	Rejected {
		reason: String,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn redeem_response_paired_serializes_with_type_tag() {
		let msg = PairRedeemResponse::Paired {
			token: "tok_abc".into(),
			owner_user: "ops".into(),
		};
		let json = serde_json::to_string(&msg).unwrap();
		assert!(json.contains(r#""type":"paired""#));
		assert!(json.contains(r#""token":"tok_abc""#));
	}

	#[test]
	fn redeem_response_rejected_round_trips() {
		let json = r#"{"type":"rejected","reason":"expired"}"#;
		let msg: PairRedeemResponse = serde_json::from_str(json).unwrap();
		match msg {
			PairRedeemResponse::Rejected { reason } => assert_eq!(reason, "expired"),
			other => panic!("expected rejection, got {other:?}"),
		}
	}
}
