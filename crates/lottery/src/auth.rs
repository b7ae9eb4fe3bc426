//! JWT authentication with Ed25519 signatures
//!
//! Participants and the administrative machine client both present bearer
//! tokens minted by the identity provider. Tokens are EdDSA JWTs signed with
//! the provider's key; the scope claim tells a participant session apart
//! from the machine credential allowed to drive round transitions.

use anyhow::{anyhow, Result};
use axum::http::{header, HeaderMap};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::error::LotteryError;

/// Scope carried by participant session tokens
pub const PARTICIPANT_SCOPE: &str = "participant";
/// Scope carried by the administrative machine credential
pub const ADMIN_SCOPE: &str = "lottery:admin";

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub exp: u64, // Expiration timestamp
    pub iat: u64, // Issued at timestamp
    pub scope: String, // Space-separated permissions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Verification result containing authenticated information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub subject: String,
    pub scopes: Vec<String>,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl AuthInfo {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// An authenticated participant, as seen by ticket submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The administrative machine client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineClient {
    pub client_id: String,
}

/// Verifies bearer tokens against the issuer key and audience
#[derive(Clone)]
pub struct Authenticator {
    issuer: VerifyingKey,
    audience: String,
}

impl Authenticator {
    /// Create from the issuer's hex-encoded Ed25519 public key
    pub fn new(issuer_public_key_hex: &str, audience: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode(issuer_public_key_hex)?
            .try_into()
            .map_err(|_| anyhow!("Issuer public key must be 32 bytes"))?;
        Ok(Self {
            issuer: VerifyingKey::from_bytes(&bytes)?,
            audience: audience.to_string(),
        })
    }

    /// Verify a JWT token signed with the issuer key
    pub fn verify_jwt(&self, token: &str) -> Result<AuthInfo> {
        // Decode the header to ensure it's using EdDSA
        let header = decode_header(token)?;
        if header.alg != Algorithm::EdDSA {
            return Err(anyhow!(
                "Invalid algorithm: expected EdDSA, got {:?}",
                header.alg
            ));
        }

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(anyhow!("Invalid JWT format"));
        }

        // Claims are read here; the signature is checked with ed25519-dalek below
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.insecure_disable_signature_validation();
        validation.set_audience(&[&self.audience]);

        let token_data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
        let claims = token_data.claims;

        let signature_bytes: [u8; 64] = base64_url_decode(parts[2])?
            .try_into()
            .map_err(|_| anyhow!("Invalid signature length"))?;
        let signature = Signature::from_bytes(&signature_bytes);

        // Verify the signature over header.payload
        let message = format!("{}.{}", parts[0], parts[1]);
        self.issuer
            .verify(message.as_bytes(), &signature)
            .map_err(|_| anyhow!("Invalid signature"))?;

        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        if claims.exp <= now {
            return Err(anyhow!("Token expired"));
        }

        Ok(AuthInfo {
            subject: claims.sub,
            scopes: claims.scope.split_whitespace().map(str::to_string).collect(),
            name: claims.name,
            email: claims.email,
        })
    }

    /// The participant behind the request, if it carries a valid participant token
    pub fn participant(&self, headers: &HeaderMap) -> Option<Participant> {
        let token = bearer_token(headers)?;
        match self.verify_jwt(token) {
            Ok(info) if info.has_scope(PARTICIPANT_SCOPE) => Some(Participant {
                id: info.subject,
                name: info.name,
                email: info.email,
            }),
            Ok(info) => {
                debug!("Token for {} has no participant scope", info.subject);
                None
            }
            Err(e) => {
                debug!("Rejected participant token: {}", e);
                None
            }
        }
    }

    /// Require a participant session
    pub fn require_participant(&self, headers: &HeaderMap) -> Result<Participant, LotteryError> {
        self.participant(headers)
            .ok_or_else(|| LotteryError::Unauthenticated("participant login required".to_string()))
    }

    /// Require the administrative machine credential
    pub fn require_machine(&self, headers: &HeaderMap) -> Result<MachineClient, LotteryError> {
        let token = bearer_token(headers).ok_or_else(|| {
            LotteryError::Unauthenticated("missing or invalid authorization header".to_string())
        })?;

        let info = self
            .verify_jwt(token)
            .map_err(|e| LotteryError::Unauthenticated(format!("invalid token: {}", e)))?;

        if !info.has_scope(ADMIN_SCOPE) {
            return Err(LotteryError::Forbidden(format!(
                "scope {} is required",
                ADMIN_SCOPE
            )));
        }

        Ok(MachineClient {
            client_id: info.subject,
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Claims for a new token valid for `duration_secs` from now
pub fn new_claims(subject: &str, audience: &str, scope: &str, duration_secs: u64) -> Result<Claims> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(Claims {
        sub: subject.to_string(),
        aud: audience.to_string(),
        exp: now + duration_secs,
        iat: now,
        scope: scope.to_string(),
        name: None,
        email: None,
    })
}

/// Create an EdDSA JWT signed with the given 32-byte secret key
pub fn create_jwt(secret_key_bytes: &[u8; 32], claims: &Claims) -> Result<String> {
    let signing_key = SigningKey::from_bytes(secret_key_bytes);

    let header = r#"{"alg":"EdDSA","typ":"JWT"}"#;
    let header_b64 = base64_url_encode(header.as_bytes());
    let payload_b64 = base64_url_encode(&serde_json::to_vec(claims)?);

    let message = format!("{}.{}", header_b64, payload_b64);
    let signature = signing_key.sign(message.as_bytes());

    Ok(format!("{}.{}", message, base64_url_encode(&signature.to_bytes())))
}

/// Base64URL encode (without padding)
fn base64_url_encode(data: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, data)
}

/// Base64URL decode (without padding)
fn base64_url_decode(data: &str) -> Result<Vec<u8>> {
    Ok(base64::Engine::decode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        data,
    )?)
}
