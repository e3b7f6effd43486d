// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::IngredientId;
use crate::error::{Error, Result};
use crate::query;
use actix_web::dev::HttpServiceFactory;
use actix_web::{get, web, HttpResponse};
use serde::Deserialize;

#[derive(Deserialize)]
struct SearchParams {
    name: Option<String>,
}

// Reference data. No pagination, matching the REST contract.
#[get("/")]
async fn list(
    pool: web::Data<database::Pool>,
    params: web::Query<SearchParams>,
) -> Result<HttpResponse> {
    let prefix = params.into_inner().name;

    let pool = pool.into_inner();
    let found = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        query::search_ingredients(&mut conn, prefix.as_deref())
    })
    .await??;

    Ok(HttpResponse::Ok().json(found))
}

#[get("/{id}/")]
async fn detail(
    pool: web::Data<database::Pool>,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let ingredient_id = IngredientId::from(path.into_inner());

    let pool = pool.into_inner();
    let found = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        query::get_ingredient(&mut conn, ingredient_id)?
            .ok_or(Error::NotFound("ingredient not found"))
    })
    .await??;

    Ok(HttpResponse::Ok().json(found))
}

pub fn routes() -> impl HttpServiceFactory {
    web::scope("/api/ingredients").service(list).service(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use crate::database::models::NewIngredient;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    fn seed(pool: &database::Pool, name: &str, unit: &str) {
        let mut conn = pool.get().unwrap();
        query::add_ingredient(
            &mut conn,
            NewIngredient {
                name: name.into(),
                measurement_unit: unit.into(),
            },
        )
        .unwrap();
    }

    #[actix_web::test]
    async fn prefix_search_over_http() {
        let pool = database::test_pool();
        seed(&pool, "salt", "g");
        seed(&pool, "saffron", "g");
        seed(&pool, "pepper", "g");

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(pool.clone()))
                .configure(api::configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/ingredients/?name=sa")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let names: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["saffron", "salt"]);

        let req = test::TestRequest::get().uri("/api/ingredients/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.as_array().unwrap().len(), 3);

        let req = test::TestRequest::get()
            .uri("/api/ingredients/999/")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
