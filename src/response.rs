use serde::Serialize;

/// Response envelope shared by every endpoint:
/// `{ status, data?, token?, message? }`. Error responses use the same
/// shape and are produced by `ApiError`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            token: None,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_token(data: T, token: String) -> Self {
        Self {
            token: Some(token),
            ..Self::success(data)
        }
    }
}

impl Envelope<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            token: None,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_omits_empty_fields() {
        let env = Envelope::success(json!({ "count": 1 }));
        let out = serde_json::to_value(&env).unwrap();
        assert_eq!(out["status"], "success");
        assert_eq!(out["data"]["count"], 1);
        assert!(out.get("token").is_none());
        assert!(out.get("message").is_none());
    }

    #[test]
    fn token_envelope_carries_token() {
        let env = Envelope::with_token(json!({}), "abc".into());
        let out = serde_json::to_value(&env).unwrap();
        assert_eq!(out["token"], "abc");
    }
}
