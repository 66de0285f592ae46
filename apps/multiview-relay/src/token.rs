//! Short-lived HS256 tokens granting one client access to one session channel.

use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use multiview_proto::code_from_channel;
use multiview_proto::relay::{
    ChannelClaims, TokenResponse, CAPABILITY_PUBLISH, CAPABILITY_SUBSCRIBE,
};
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("channel {0:?} is not a session channel")]
    InvalidChannel(String),
    #[error("client id must not be empty")]
    MissingClientId,
    #[error("token is for channel {token}, not {requested}")]
    ChannelMismatch { token: String, requested: String },
    #[error("token does not grant {0}")]
    MissingCapability(&'static str),
    #[error("token validation failed: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Process-local secret for relays started without one.
    pub fn ephemeral(ttl: Duration) -> Self {
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .map(char::from)
            .take(48)
            .collect();
        Self::new(secret.as_bytes(), ttl)
    }

    pub fn issue(&self, client_id: &str, channel: &str) -> Result<TokenResponse, TokenError> {
        if client_id.trim().is_empty() {
            return Err(TokenError::MissingClientId);
        }
        if code_from_channel(channel).is_none() {
            return Err(TokenError::InvalidChannel(channel.to_string()));
        }
        let iat = chrono::Utc::now().timestamp();
        let exp = iat + self.ttl.as_secs() as i64;
        let claims = ChannelClaims {
            sub: client_id.to_string(),
            channel: channel.to_string(),
            capabilities: vec![CAPABILITY_PUBLISH.into(), CAPABILITY_SUBSCRIBE.into()],
            iat,
            exp,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(TokenResponse {
            token,
            expires_at: exp,
        })
    }

    /// Checks signature, expiry and that the token was issued for `channel`.
    pub fn verify(&self, token: &str, channel: &str) -> Result<ChannelClaims, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        let claims = decode::<ChannelClaims>(token, &self.decoding, &validation)?.claims;
        if claims.channel != channel {
            return Err(TokenError::ChannelMismatch {
                token: claims.channel,
                requested: channel.to_string(),
            });
        }
        if !claims.allows(CAPABILITY_SUBSCRIBE) {
            return Err(TokenError::MissingCapability(CAPABILITY_SUBSCRIBE));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL: &str = "multiview:remote:4821";

    #[test]
    fn issued_token_verifies_for_its_channel() {
        let issuer = TokenIssuer::new(b"secret", Duration::from_secs(60));
        let response = issuer.issue("remote-1", CHANNEL).unwrap();
        let claims = issuer.verify(&response.token, CHANNEL).unwrap();
        assert_eq!(claims.sub, "remote-1");
        assert_eq!(claims.exp, response.expires_at);
        assert!(claims.allows(CAPABILITY_PUBLISH));
    }

    #[test]
    fn rejects_other_channels_and_secrets() {
        let issuer = TokenIssuer::new(b"secret", Duration::from_secs(60));
        let token = issuer.issue("remote-1", CHANNEL).unwrap().token;

        assert!(matches!(
            issuer.verify(&token, "multiview:remote:1111"),
            Err(TokenError::ChannelMismatch { .. })
        ));
        let other = TokenIssuer::new(b"different", Duration::from_secs(60));
        assert!(matches!(other.verify(&token, CHANNEL), Err(TokenError::Invalid(_))));
        assert!(matches!(
            issuer.issue("remote-1", "lobby"),
            Err(TokenError::InvalidChannel(_))
        ));
        assert!(matches!(
            issuer.issue(" ", CHANNEL),
            Err(TokenError::MissingClientId)
        ));
    }

    #[test]
    fn expired_tokens_fail() {
        let issuer = TokenIssuer::new(b"secret", Duration::from_secs(60));
        let now = chrono::Utc::now().timestamp();
        let stale = ChannelClaims {
            sub: "remote-1".into(),
            channel: CHANNEL.into(),
            capabilities: vec![CAPABILITY_SUBSCRIBE.into()],
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(&Header::new(Algorithm::HS256), &stale, &issuer.encoding).unwrap();
        assert!(matches!(issuer.verify(&token, CHANNEL), Err(TokenError::Invalid(_))));
    }
}
