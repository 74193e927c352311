use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AuthError;
use crate::models::User;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";

/// One signed claim set. Access and refresh tokens share the shape and
/// differ in `token_type` and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub role: String,
    pub token_type: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct JwtCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtCodec {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_token_ttl_days),
        }
    }

    pub fn issue_access(&self, user: &User) -> Result<SignedToken, AuthError> {
        self.issue(user, TOKEN_TYPE_ACCESS, self.access_ttl)
    }

    pub fn issue_refresh(&self, user: &User) -> Result<SignedToken, AuthError> {
        self.issue(user, TOKEN_TYPE_REFRESH, self.refresh_ttl)
    }

    fn issue(&self, user: &User, token_type: &str, ttl: Duration) -> Result<SignedToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let jti = Uuid::new_v4().to_string();
        let claims = Claims {
            sub: user.user_id.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            token_type: token_type.to_string(),
            jti: jti.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding)?;
        Ok(SignedToken {
            token,
            jti,
            expires_at,
        })
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    /// Decode and require a specific `token_type`; an access token is never
    /// redeemable as a refresh token or vice versa.
    pub fn decode_expected(&self, token: &str, token_type: &str) -> Result<Claims, AuthError> {
        let claims = self.decode(token)?;
        if claims.token_type != token_type {
            return Err(AuthError::InvalidToken("invalid token type".to_string()));
        }
        Ok(claims)
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::ROLE_USER;

    fn test_user() -> User {
        User {
            user_id: Uuid::new_v4().to_string(),
            email: Some("pat@example.com".to_string()),
            password_hash: None,
            full_name: None,
            role: ROLE_USER.to_string(),
            is_active: true,
            created_at: Utc::now().naive_utc(),
            last_seen_at: Utc::now().naive_utc(),
        }
    }

    fn codec() -> JwtCodec {
        JwtCodec::from_config(&AppConfig::for_data_dir("/tmp/unused"))
    }

    #[test]
    fn access_token_roundtrips() {
        let codec = codec();
        let user = test_user();
        let signed = codec.issue_access(&user).unwrap();
        let claims = codec.decode_expected(&signed.token, TOKEN_TYPE_ACCESS).unwrap();
        assert_eq!(claims.sub, user.user_id);
        assert_eq!(claims.jti, signed.jti);
        assert_eq!(claims.token_type, TOKEN_TYPE_ACCESS);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let codec = codec();
        let signed = codec.issue_refresh(&test_user()).unwrap();
        let err = codec
            .decode_expected(&signed.token, TOKEN_TYPE_ACCESS)
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn foreign_audience_is_rejected() {
        let codec = codec();
        let mut other_config = AppConfig::for_data_dir("/tmp/unused");
        other_config.jwt_audience = "some-other-client".to_string();
        let other = JwtCodec::from_config(&other_config);

        let signed = codec.issue_access(&test_user()).unwrap();
        assert!(matches!(
            other.decode(&signed.token),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
