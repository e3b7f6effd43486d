// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::User;
use crate::error::{Error, Result};
use crate::query;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, HttpRequest};

const SCHEME: &str = "Token";

fn token_from_request(req: &HttpRequest) -> Result<Option<String>> {
    let Some(header) = req.headers().get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = header.to_str().map_err(|_| Error::Unauthorized)?;

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(token)) if scheme == SCHEME => Ok(Some(token.to_owned())),
        _ => Err(Error::Unauthorized),
    }
}

/// Resolves the `Authorization: Token <key>` header, if present. A missing
/// header is an anonymous request; a malformed header or unknown token is an
/// authentication failure.
pub async fn optional_user(pool: &database::Pool, req: &HttpRequest) -> Result<Option<User>> {
    let Some(token) = token_from_request(req)? else {
        return Ok(None);
    };

    let pool = pool.clone();
    let user = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        query::user_for_token(&mut conn, &token)
    })
    .await??;

    match user {
        Some(user) => Ok(Some(user)),
        None => Err(Error::Unauthorized),
    }
}

pub async fn require_user(pool: &database::Pool, req: &HttpRequest) -> Result<User> {
    optional_user(pool, req).await?.ok_or(Error::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn missing_header_is_anonymous() {
        let req = TestRequest::default().to_http_request();
        assert!(token_from_request(&req).unwrap().is_none());
    }

    #[test]
    fn token_header_parses() {
        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, "Token abc123"))
            .to_http_request();
        assert_eq!(token_from_request(&req).unwrap().unwrap(), "abc123");
    }

    #[test]
    fn wrong_scheme_is_rejected() {
        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, "Bearer abc123"))
            .to_http_request();
        assert!(matches!(
            token_from_request(&req),
            Err(Error::Unauthorized)
        ));
    }

    #[test]
    fn bare_token_is_rejected() {
        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, "abc123"))
            .to_http_request();
        assert!(matches!(
            token_from_request(&req),
            Err(Error::Unauthorized)
        ));
    }
}
