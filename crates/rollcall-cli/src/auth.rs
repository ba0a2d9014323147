use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

/// Check a bearer token against the HS256 `secret`.
///
/// No claims are required; `exp` is enforced when the token carries one.
/// A missing token or secret never authorizes.
pub fn authorize(token: Option<&str>, secret: Option<&str>) -> bool {
    let (Some(token), Some(secret)) = (token, secret) else {
        tracing::warn!(
            token = token.is_some(),
            secret = secret.is_some(),
            "rejecting request: token or signing secret missing"
        );
        return false;
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims::<&str>(&[]);

    match decode::<serde_json::Value>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting request: invalid token");
            false
        }
    }
}
