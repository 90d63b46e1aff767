//! JWT 令牌签发与校验
//!
//! 签名密钥、算法、签发者与各类有效期都在每次调用时从当前配置读取，
//! 热更新后新签发的令牌立即使用新值。过期与生效时间按注入的时钟判断。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use application::{Clock, IssuedToken, RealtimeSubject, TokenClaims, TokenError, TokenMaker};
use config::ConfigHandle;
use domain::{Account, Email, TokenKind};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use uuid::Uuid;

fn algorithm(name: &str) -> Result<Algorithm, TokenError> {
    match name {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(TokenError::Creation(format!("unsupported algorithm {other}"))),
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        JwtErrorKind::InvalidSignature
        | JwtErrorKind::InvalidAlgorithm
        | JwtErrorKind::InvalidIssuer => TokenError::InvalidSignature,
        JwtErrorKind::ExpiredSignature => TokenError::Expired,
        JwtErrorKind::ImmatureSignature => TokenError::NotYetValid,
        _ => TokenError::Malformed,
    }
}

struct Subject<'a> {
    sub: String,
    email: &'a str,
    user_id: Option<i64>,
    role: Option<String>,
    branch_id: Option<i64>,
}

impl<'a> Subject<'a> {
    fn account(account: &'a Account) -> Self {
        Self {
            sub: account.id.to_string(),
            email: account.email.as_str(),
            user_id: Some(account.id.0),
            role: Some(account.role.clone()),
            branch_id: account.branch_id,
        }
    }

    fn email(email: &'a Email) -> Self {
        Self {
            sub: email.to_string(),
            email: email.as_str(),
            user_id: None,
            role: None,
            branch_id: None,
        }
    }
}

pub struct JwtTokenMaker {
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
}

impl JwtTokenMaker {
    pub fn new(config: ConfigHandle, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    fn issue(
        &self,
        kind: TokenKind,
        subject: Subject<'_>,
        ttl: StdDuration,
    ) -> Result<IssuedToken, TokenError> {
        let config = self.config.current();
        let algorithm = algorithm(&config.jwt.algorithm)?;
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl).map_err(|err| TokenError::Creation(err.to_string()))?;

        let claims = TokenClaims {
            sub: subject.sub,
            user_id: subject.user_id,
            email: subject.email.to_string(),
            role: subject.role,
            branch_id: subject.branch_id,
            kind,
            iss: config.jwt.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(
            &Header::new(algorithm),
            &claims,
            &EncodingKey::from_secret(config.jwt.secret_key.as_bytes()),
        )
        .map_err(|err| TokenError::Creation(err.to_string()))?;

        Ok(IssuedToken { token, claims })
    }
}

impl TokenMaker for JwtTokenMaker {
    fn create_access(&self, account: &Account) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.current().jwt.access_ttl();
        self.issue(TokenKind::Access, Subject::account(account), ttl)
    }

    fn create_refresh(&self, account: &Account) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.current().jwt.refresh_ttl();
        self.issue(TokenKind::Refresh, Subject::account(account), ttl)
    }

    fn create_reset(&self, email: &Email) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.current().jwt.reset_ttl();
        self.issue(TokenKind::Reset, Subject::email(email), ttl)
    }

    fn create_verification(&self, email: &Email) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.current().jwt.verification_ttl();
        self.issue(TokenKind::Verification, Subject::email(email), ttl)
    }

    fn create_realtime(
        &self,
        subject: &RealtimeSubject,
        ttl: StdDuration,
    ) -> Result<IssuedToken, TokenError> {
        let subject = Subject {
            sub: subject.user_id.clone(),
            email: subject.email.as_str(),
            user_id: None,
            role: Some(subject.role.as_str().to_string()),
            branch_id: None,
        };
        self.issue(TokenKind::Access, subject, ttl)
    }

    fn verify(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, TokenError> {
        let config = self.config.current();
        let algorithm = algorithm(&config.jwt.algorithm).map_err(|_| TokenError::InvalidSignature)?;

        // 时间相关的检查交给注入的时钟
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        validation.set_issuer(&[config.jwt.issuer.as_str()]);

        let claims = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(config.jwt.secret_key.as_bytes()),
            &validation,
        )
        .map_err(classify)?
        .claims;

        if claims.kind != expected {
            return Err(TokenError::WrongKind {
                expected,
                actual: claims.kind,
            });
        }

        let now = self.clock.now().timestamp();
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}
