use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub rol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sede_id: Option<Uuid>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        rol: String,
        sede_id: Option<Uuid>,
        expiration_hours: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            user_id,
            rol,
            sede_id,
            exp: (now + Duration::hours(expiration_hours)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

pub fn generate(claims: &Claims, secret: &str) -> Result<String, AppError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(AppError::internal)
}

pub fn parse(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::TokenInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn ida_y_vuelta_conserva_claims() {
        let claims = Claims::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "ADMIN".into(),
            Some(Uuid::new_v4()),
            24,
        );
        let token = generate(&claims, SECRET).expect("token");
        let parsed = parse(&token, SECRET).expect("claims");
        assert_eq!(parsed, claims);
    }

    #[test]
    fn sin_sede_tambien_funciona() {
        let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), "SOPORTE".into(), None, 1);
        let token = generate(&claims, SECRET).expect("token");
        assert_eq!(parse(&token, SECRET).expect("claims"), claims);
    }

    #[test]
    fn secreto_equivocado_es_token_invalid() {
        let claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), "ADMIN".into(), None, 24);
        let token = generate(&claims, SECRET).expect("token");
        let err = parse(&token, "ffffffffffffffffffffffffffffffff").unwrap_err();
        assert_eq!(err.code(), "TOKEN_INVALID");
    }

    #[test]
    fn token_expirado_es_rechazado() {
        let mut claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), "ADMIN".into(), None, 24);
        claims.exp = (Utc::now() - Duration::hours(2)).timestamp();
        let token = generate(&claims, SECRET).expect("token");
        assert!(parse(&token, SECRET).is_err());
    }
}
