// Copyright 2023 Remi Bernotavicius

use super::recipes::RecipeMinified;
use super::ListResponse;
use crate::auth;
use crate::database;
use crate::database::models::{User, UserId};
use crate::error::{Error, Result};
use crate::query;
use crate::query::Page;
use actix_web::dev::HttpServiceFactory;
use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub email: String,
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
}

impl UserResponse {
    pub fn new(user: &User, is_subscribed: bool) -> Self {
        Self {
            email: user.email.clone(),
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_subscribed,
        }
    }
}

#[derive(Serialize)]
struct SubscriptionResponse {
    #[serde(flatten)]
    profile: UserResponse,
    recipes: Vec<RecipeMinified>,
    recipes_count: usize,
}

impl SubscriptionResponse {
    fn new(user: &User, recipes: &[database::models::Recipe], recipes_limit: Option<usize>) -> Self {
        let shown = match recipes_limit {
            Some(limit) => &recipes[..limit.min(recipes.len())],
            None => recipes,
        };
        Self {
            profile: UserResponse::new(user, true),
            recipes: shown.iter().map(RecipeMinified::new).collect(),
            recipes_count: recipes.len(),
        }
    }
}

#[derive(Deserialize)]
struct SubscriptionsParams {
    page: Option<i64>,
    limit: Option<i64>,
    recipes_limit: Option<usize>,
}

#[get("/subscriptions/")]
async fn subscriptions(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    params: web::Query<SubscriptionsParams>,
) -> Result<HttpResponse> {
    let requester = auth::require_user(&pool, &req).await?;
    let page = Page::new(params.page, params.limit);
    let recipes_limit = params.recipes_limit;

    let pool = pool.into_inner();
    let response = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let followed = query::subscribed_users(&mut conn, requester.id)?;
        let count = followed.len() as i64;

        let page_users: Vec<User> = followed
            .into_iter()
            .skip(page.offset())
            .take(page.limit as usize)
            .collect();
        let author_ids: Vec<UserId> = page_users.iter().map(|u| u.id).collect();
        let recipes = query::recipes_by_authors(&mut conn, &author_ids)?;

        let results = page_users
            .iter()
            .map(|user| {
                let authored = recipes.get(&user.id).map(Vec::as_slice).unwrap_or(&[]);
                SubscriptionResponse::new(user, authored, recipes_limit)
            })
            .collect();
        Ok(ListResponse { count, results })
    })
    .await??;

    Ok(HttpResponse::Ok().json(response))
}

#[post("/{id}/subscribe/")]
async fn subscribe(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let requester = auth::require_user(&pool, &req).await?;
    let target = UserId::from(path.into_inner());

    let pool = pool.into_inner();
    let response = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let target_user = query::get_user(&mut conn, target)?
            .ok_or(Error::NotFound("user not found"))?;
        query::subscribe(&mut conn, requester.id, target)?;

        let recipes = query::recipes_by_authors(&mut conn, &[target])?;
        let authored = recipes.get(&target).map(Vec::as_slice).unwrap_or(&[]);
        Ok(SubscriptionResponse::new(&target_user, authored, None))
    })
    .await??;

    Ok(HttpResponse::Created().json(response))
}

#[delete("/{id}/subscribe/")]
async fn unsubscribe(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let requester = auth::require_user(&pool, &req).await?;
    let target = UserId::from(path.into_inner());

    let pool = pool.into_inner();
    web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        if query::get_user(&mut conn, target)?.is_none() {
            return Err(Error::NotFound("user not found"));
        }
        query::unsubscribe(&mut conn, requester.id, target)
    })
    .await??;

    Ok(HttpResponse::NoContent().finish())
}

#[get("/{id}/")]
async fn profile(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let requester = auth::optional_user(&pool, &req).await?;
    let target = UserId::from(path.into_inner());

    let pool = pool.into_inner();
    let response = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let user = query::get_user(&mut conn, target)?
            .ok_or(Error::NotFound("user not found"))?;
        let followed = query::followed_set(&mut conn, requester.map(|u| u.id))?;
        Ok(UserResponse::new(&user, followed.contains(&user.id)))
    })
    .await??;

    Ok(HttpResponse::Ok().json(response))
}

pub fn routes() -> impl HttpServiceFactory {
    // `subscriptions` must come before the `{id}` routes so the static
    // segment wins.
    web::scope("/api/users")
        .service(subscriptions)
        .service(subscribe)
        .service(unsubscribe)
        .service(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use crate::database::models::NewUser;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    fn seed_user(pool: &database::Pool, username: &str) -> User {
        let mut conn = pool.get().unwrap();
        let user = query::create_user(
            &mut conn,
            NewUser {
                username: username.into(),
                email: format!("{username}@example.com"),
                first_name: username.into(),
                last_name: "tester".into(),
                is_admin: false,
            },
        )
        .unwrap();
        query::issue_token(&mut conn, user.id, format!("token-{username}")).unwrap();
        user
    }

    #[actix_web::test]
    async fn subscribe_flow() {
        let pool = database::test_pool();
        let alice = seed_user(&pool, "alice");
        let bob = seed_user(&pool, "bob");

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(pool.clone()))
                .configure(api::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri(&format!("/api/users/{}/subscribe/", bob.id))
            .insert_header(("Authorization", "Token token-alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        // Subscribing again conflicts.
        let req = test::TestRequest::post()
            .uri(&format!("/api/users/{}/subscribe/", bob.id))
            .insert_header(("Authorization", "Token token-alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // Self-follow is rejected.
        let req = test::TestRequest::post()
            .uri(&format!("/api/users/{}/subscribe/", alice.id))
            .insert_header(("Authorization", "Token token-alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/api/users/subscriptions/")
            .insert_header(("Authorization", "Token token-alice"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["username"], "bob");
        assert_eq!(body["results"][0]["is_subscribed"], true);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/users/{}/subscribe/", bob.id))
            .insert_header(("Authorization", "Token token-alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        // Removing an absent subscription is NotFound.
        let req = test::TestRequest::delete()
            .uri(&format!("/api/users/{}/subscribe/", bob.id))
            .insert_header(("Authorization", "Token token-alice"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn subscriptions_require_auth() {
        let pool = database::test_pool();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(pool.clone()))
                .configure(api::configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/users/subscriptions/")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
