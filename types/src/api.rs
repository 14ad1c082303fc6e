//! JSON payloads shared by the HTTP service and its clients.

use crate::{Account, Deposit, GameRound, Money, Rtp, UserId, Withdrawal};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    pub user_id: UserId,
    pub bet_amount: Money,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayResponse {
    pub success: bool,
    pub prize: Money,
    pub final_balance: Money,
    pub multiplier: f64,
    pub bet_amount: Money,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedBetsResponse {
    pub allowed_bets: Vec<Money>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub account: Account,
    pub can_withdraw: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundsResponse {
    pub rounds: Vec<GameRound>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDepositRequest {
    pub user_id: UserId,
    pub amount: Money,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositConfirmationResponse {
    pub deposit: Deposit,
    pub credited: bool,
    pub rollover_applied: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    pub amount: Money,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResponse {
    pub withdrawal: Withdrawal,
    pub final_balance: Money,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct RtpSetting {
    pub rtp: Rtp,
}

/// Error body returned for rejected requests.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub allowed_bets: Option<Vec<Money>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_request_reads_camel_case() {
        let request: PlayRequest =
            serde_json::from_str(r#"{"userId":4,"betAmount":2.5}"#).unwrap();
        assert_eq!(request.user_id, UserId(4));
        assert_eq!(request.bet_amount, Money::from_cents(250));
    }

    #[test]
    fn play_response_field_names() {
        let response = PlayResponse {
            success: true,
            prize: Money::from_cents(1_000),
            final_balance: Money::from_cents(50_000),
            multiplier: 1.0,
            bet_amount: Money::from_cents(1_000),
        };
        let value = serde_json::to_value(&response).unwrap();
        for field in ["success", "prize", "finalBalance", "multiplier", "betAmount"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn error_response_omits_empty_allowed_bets() {
        let body = ErrorResponse {
            success: false,
            error: "user not found".to_string(),
            allowed_bets: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("allowedBets").is_none());
    }
}
