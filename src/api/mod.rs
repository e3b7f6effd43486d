// Copyright 2023 Remi Bernotavicius

use actix_web::web;
use serde::Serialize;

pub mod ingredients;
pub mod recipes;
pub mod users;

/// Envelope for paginated list endpoints: total match count plus the
/// requested page.
#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: i64,
    pub results: Vec<T>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(recipes::routes())
        .service(ingredients::routes())
        .service(users::routes());
}
