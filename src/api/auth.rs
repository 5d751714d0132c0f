/*!
 * 认证
 *
 * 单账户口令换JWT（HS256，sub+exp）。除 /auth/token 与 /ping 外
 * 的所有接口都要求 Bearer 令牌，由 AuthUser 提取器统一校验。
 * 口令比较使用常数时间实现，避免时序侧信道。
 */

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::{Form, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::ApiError;
use super::state::SharedState;

/// JWT负载
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// 常数时间口令校验
///
/// 轮数取两者长度的较大者，越界位置用一对互不相等的填充字节顶替，
/// 长度差异和字节差异一样只体现在累积量里，比较耗时与差异位置无关。
fn verify_secret(provided: &str, expected: &str) -> bool {
    let given = provided.as_bytes();
    let want = expected.as_bytes();

    let mut mismatch = given.len() ^ want.len();
    for i in 0..given.len().max(want.len()) {
        let g = given.get(i).copied().unwrap_or(0x36) as usize;
        let w = want.get(i).copied().unwrap_or(0x5c) as usize;
        mismatch |= g ^ w;
    }

    // 空口令永远不通过
    mismatch == 0 && !want.is_empty()
}

/// 从 Authorization 头取出 Bearer 令牌
fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    let token = parts.next()?.trim();

    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// POST /api/v1/auth/token
pub async fn issue_token(
    State(state): State<SharedState>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let auth = &state.config.auth;

    let user_ok = verify_secret(&request.username, &auth.default_user);
    let password_ok = verify_secret(&request.password, &auth.default_password);

    if !user_ok || !password_ok {
        warn!("登录失败: 用户名或密码不正确");
        return Err(ApiError::Unauthorized);
    }

    let expire = Utc::now() + Duration::minutes(auth.token_expire_minutes);
    let claims = Claims {
        sub: request.username.clone(),
        exp: expire.timestamp(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("签发令牌失败: {}", e)))?;

    info!("已签发访问令牌: {}", request.username);

    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
    }))
}

/// 已通过认证的用户，作为提取器用于受保护的处理器
pub struct AuthUser(pub String);

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = bearer_token(header).ok_or(ApiError::Unauthorized)?;

        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.auth.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ApiError::Unauthorized)?;

        if decoded.claims.sub != state.config.auth.default_user {
            return Err(ApiError::Unauthorized);
        }

        Ok(AuthUser(decoded.claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_secret() {
        assert!(verify_secret("123456", "123456"));
        assert!(verify_secret("家庭口令2024", "家庭口令2024"));

        // 长度不同、内容不同、空口令都不通过
        assert!(!verify_secret("123456", "1234567"));
        assert!(!verify_secret("1234567", "123456"));
        assert!(!verify_secret("abcdef", "abcdeg"));
        assert!(!verify_secret("", ""));
        assert!(!verify_secret("anything", ""));
        assert!(!verify_secret("", "123456"));
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer tok.en-1"), Some("tok.en-1"));
        // 方案名大小写不敏感，空白容忍
        assert_eq!(bearer_token("BEARER tok"), Some("tok"));
        assert_eq!(bearer_token(" bearer   tok "), Some("tok"));

        assert_eq!(bearer_token("Basic dXNlcg=="), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer    "), None);
        assert_eq!(bearer_token("Bearertok"), None);
        assert_eq!(bearer_token(""), None);
    }

    #[test]
    fn test_token_roundtrip() {
        let secret = "test-secret";
        let claims = Claims {
            sub: "family".to_string(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, "family");

        // 错误密钥不能通过校验
        assert!(decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"wrong-secret"),
            &Validation::default(),
        )
        .is_err());
    }
}
