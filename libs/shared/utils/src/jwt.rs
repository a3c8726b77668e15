use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{JwtClaims, Role, User};

pub fn validate_token(token: &str, jwt_secret: &str) -> Result<User, String> {
    if jwt_secret.is_empty() {
        return Err("JWT secret is not set".to_string());
    }

    let mut validation = Validation::new(Algorithm::HS256);
    // Supabase tokens carry "authenticated" as audience; we do not pin it.
    validation.validate_aud = false;

    let data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        debug!("Token rejected: {}", e);
        match e.kind() {
            ErrorKind::ExpiredSignature => "Token expired".to_string(),
            ErrorKind::InvalidSignature => "Invalid token signature".to_string(),
            _ => "Invalid token".to_string(),
        }
    })?;

    let claims = data.claims;
    let id = Uuid::parse_str(&claims.sub).map_err(|_| {
        debug!("Token subject is not a UUID: {}", claims.sub);
        "Invalid token subject".to_string()
    })?;

    Ok(User {
        id,
        email: claims.email,
        role: Role::from_claim(claims.role.as_deref()),
    })
}
