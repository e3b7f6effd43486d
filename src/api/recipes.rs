// Copyright 2023 Remi Bernotavicius

use super::users::UserResponse;
use super::ListResponse;
use crate::auth;
use crate::database;
use crate::database::models::{IngredientId, Recipe, RecipeId, UserId};
use crate::error::{Error, Result};
use crate::query;
use crate::query::{Page, RecipeFilter};
use actix_web::dev::HttpServiceFactory;
use actix_web::{delete, get, post, route, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

const MIN_COOKING_TIME: i32 = 1;
const MAX_COOKING_TIME: i32 = 32_000;
const MIN_INGREDIENT_AMOUNT: i32 = 1;
const MAX_INGREDIENT_AMOUNT: i32 = 32_000;
const MAX_RECIPE_NAME_LENGTH: usize = 200;

#[derive(Serialize)]
pub struct RecipeMinified {
    pub id: RecipeId,
    pub name: String,
    pub image: String,
    pub cooking_time: i32,
}

impl RecipeMinified {
    pub fn new(recipe: &Recipe) -> Self {
        Self {
            id: recipe.id,
            name: recipe.name.clone(),
            image: recipe.image.clone(),
            cooking_time: recipe.cooking_time,
        }
    }
}

#[derive(Serialize)]
struct RecipeIngredientResponse {
    id: IngredientId,
    name: String,
    measurement_unit: String,
    amount: i32,
}

#[derive(Serialize)]
struct RecipeResponse {
    id: RecipeId,
    author: UserResponse,
    name: String,
    image: String,
    text: String,
    ingredients: Vec<RecipeIngredientResponse>,
    cooking_time: i32,
    is_favorited: bool,
    is_in_shopping_cart: bool,
}

/// Serializes a batch of recipes with the requester-scoped annotations.
fn recipe_responses(
    conn: &mut database::Connection,
    requester: Option<UserId>,
    recipes: Vec<Recipe>,
) -> Result<Vec<RecipeResponse>> {
    let marks = query::UserMarks::load(conn, requester)?;
    let followed = query::followed_set(conn, requester)?;

    let author_ids: Vec<UserId> = recipes.iter().map(|r| r.author_id).collect();
    let authors = query::users_by_ids(conn, &author_ids)?;
    let recipe_ids: Vec<RecipeId> = recipes.iter().map(|r| r.id).collect();
    let mut lines = query::ingredients_for_recipes(conn, &recipe_ids)?;

    recipes
        .into_iter()
        .map(|recipe| {
            let author = authors
                .get(&recipe.author_id)
                .ok_or(Error::Database(diesel::result::Error::NotFound))?;
            let flags = marks.flags(recipe.id);
            let ingredients = lines
                .remove(&recipe.id)
                .unwrap_or_default()
                .into_iter()
                .map(|(usage, ingredient)| RecipeIngredientResponse {
                    id: ingredient.id,
                    name: ingredient.name,
                    measurement_unit: ingredient.measurement_unit,
                    amount: usage.amount,
                })
                .collect();
            Ok(RecipeResponse {
                id: recipe.id,
                author: UserResponse::new(author, followed.contains(&recipe.author_id)),
                name: recipe.name,
                image: recipe.image,
                text: recipe.text,
                ingredients,
                cooking_time: recipe.cooking_time,
                is_favorited: flags.is_favorited,
                is_in_shopping_cart: flags.is_in_shopping_cart,
            })
        })
        .collect()
}

fn single_response(
    conn: &mut database::Connection,
    requester: Option<UserId>,
    recipe: Recipe,
) -> Result<RecipeResponse> {
    let mut responses = recipe_responses(conn, requester, vec![recipe])?;
    responses
        .pop()
        .ok_or(Error::Database(diesel::result::Error::NotFound))
}

#[derive(Debug, Deserialize)]
struct IngredientLine {
    id: IngredientId,
    amount: i32,
}

#[derive(Debug, Deserialize)]
struct RecipeBody {
    name: String,
    text: String,
    image: String,
    cooking_time: i32,
    ingredients: Vec<IngredientLine>,
}

impl RecipeBody {
    fn validate(self) -> Result<query::RecipeData> {
        if self.name.trim().is_empty() {
            return Err(Error::bad_request("name must not be blank"));
        }
        if self.name.chars().count() > MAX_RECIPE_NAME_LENGTH {
            return Err(Error::bad_request(format!(
                "name must be at most {MAX_RECIPE_NAME_LENGTH} characters"
            )));
        }
        if self.text.trim().is_empty() {
            return Err(Error::bad_request("text must not be blank"));
        }
        if self.image.trim().is_empty() {
            return Err(Error::bad_request("image must not be blank"));
        }
        if !(MIN_COOKING_TIME..=MAX_COOKING_TIME).contains(&self.cooking_time) {
            return Err(Error::bad_request(format!(
                "cooking_time must be between {MIN_COOKING_TIME} and {MAX_COOKING_TIME}"
            )));
        }
        if self.ingredients.is_empty() {
            return Err(Error::bad_request("at least one ingredient is required"));
        }

        let mut seen = std::collections::HashSet::new();
        for line in &self.ingredients {
            if !seen.insert(line.id) {
                return Err(Error::bad_request("duplicate ingredients are not allowed"));
            }
            if !(MIN_INGREDIENT_AMOUNT..=MAX_INGREDIENT_AMOUNT).contains(&line.amount) {
                return Err(Error::bad_request(format!(
                    "ingredient amount must be between \
                     {MIN_INGREDIENT_AMOUNT} and {MAX_INGREDIENT_AMOUNT}"
                )));
            }
        }

        Ok(query::RecipeData {
            name: self.name,
            text: self.text,
            image: self.image,
            cooking_time: self.cooking_time,
            ingredients: self
                .ingredients
                .into_iter()
                .map(|line| (line.id, line.amount))
                .collect(),
        })
    }
}

#[derive(Deserialize)]
struct ListParams {
    author: Option<String>,
    is_favorited: Option<String>,
    is_in_shopping_cart: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

impl ListParams {
    fn filter(&self) -> Result<RecipeFilter> {
        let author = self
            .author
            .as_deref()
            .map(|value| {
                value
                    .parse::<i32>()
                    .map(UserId::from)
                    .map_err(|_| Error::bad_request("author must be an integer id"))
            })
            .transpose()?;
        Ok(RecipeFilter {
            author,
            is_favorited: self.is_favorited.clone(),
            is_in_shopping_cart: self.is_in_shopping_cart.clone(),
        })
    }
}

#[get("/")]
async fn list(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    params: web::Query<ListParams>,
) -> Result<HttpResponse> {
    let requester = auth::optional_user(&pool, &req).await?.map(|u| u.id);
    let filter = params.filter()?;
    let page = Page::new(params.page, params.limit);

    let pool = pool.into_inner();
    let response = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let (count, recipes) = query::list_recipes(&mut conn, requester, &filter, &page)?;
        let results = recipe_responses(&mut conn, requester, recipes)?;
        Ok(ListResponse { count, results })
    })
    .await??;

    Ok(HttpResponse::Ok().json(response))
}

#[post("/")]
async fn create(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    body: web::Json<RecipeBody>,
) -> Result<HttpResponse> {
    let requester = auth::require_user(&pool, &req).await?;
    let data = body.into_inner().validate()?;

    let pool = pool.into_inner();
    let response = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let recipe = query::create_recipe(&mut conn, requester.id, data)?;
        single_response(&mut conn, Some(requester.id), recipe)
    })
    .await??;

    Ok(HttpResponse::Created().json(response))
}

#[get("/download_shopping_cart/")]
async fn download_shopping_cart(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
) -> Result<HttpResponse> {
    let requester = auth::require_user(&pool, &req).await?;

    let pool = pool.into_inner();
    let text = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let items = query::shopping_list(&mut conn, requester.id)?;
        Ok(query::format_shopping_list(&items))
    })
    .await??;

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            "attachment; filename=\"shopping_list.txt\"",
        ))
        .body(text))
}

#[get("/{id}/")]
async fn detail(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let requester = auth::optional_user(&pool, &req).await?.map(|u| u.id);
    let recipe_id = RecipeId::from(path.into_inner());

    let pool = pool.into_inner();
    let response = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let recipe = query::get_recipe(&mut conn, recipe_id)?
            .ok_or(Error::NotFound("recipe not found"))?;
        single_response(&mut conn, requester, recipe)
    })
    .await??;

    Ok(HttpResponse::Ok().json(response))
}

#[route("/{id}/", method = "PUT", method = "PATCH")]
async fn update(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<RecipeBody>,
) -> Result<HttpResponse> {
    let requester = auth::require_user(&pool, &req).await?;
    let recipe_id = RecipeId::from(path.into_inner());
    let data = body.into_inner().validate()?;

    let pool = pool.into_inner();
    let response = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let recipe = query::get_recipe(&mut conn, recipe_id)?
            .ok_or(Error::NotFound("recipe not found"))?;
        if recipe.author_id != requester.id {
            return Err(Error::Forbidden("only the author may edit a recipe"));
        }
        let updated = query::update_recipe(&mut conn, recipe_id, data)?;
        single_response(&mut conn, Some(requester.id), updated)
    })
    .await??;

    Ok(HttpResponse::Ok().json(response))
}

#[delete("/{id}/")]
async fn remove(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let requester = auth::require_user(&pool, &req).await?;
    let recipe_id = RecipeId::from(path.into_inner());

    let pool = pool.into_inner();
    web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let recipe = query::get_recipe(&mut conn, recipe_id)?
            .ok_or(Error::NotFound("recipe not found"))?;
        if recipe.author_id != requester.id && !requester.is_admin {
            return Err(Error::Forbidden("only the author may delete a recipe"));
        }
        query::delete_recipe(&mut conn, recipe_id)
    })
    .await??;

    Ok(HttpResponse::NoContent().finish())
}

/// Shared shape of the four favorite / shopping-cart toggle handlers.
async fn toggle(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    recipe_id: RecipeId,
    apply: fn(&mut database::Connection, UserId, RecipeId) -> Result<()>,
    added: bool,
) -> Result<HttpResponse> {
    let requester = auth::require_user(&pool, &req).await?;

    let pool = pool.into_inner();
    let minified = web::block(move || -> Result<_> {
        let mut conn = pool.get()?;
        let recipe = query::get_recipe(&mut conn, recipe_id)?
            .ok_or(Error::NotFound("recipe not found"))?;
        apply(&mut conn, requester.id, recipe_id)?;
        Ok(RecipeMinified::new(&recipe))
    })
    .await??;

    if added {
        Ok(HttpResponse::Created().json(minified))
    } else {
        Ok(HttpResponse::NoContent().finish())
    }
}

#[post("/{id}/favorite/")]
async fn add_favorite(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let recipe_id = RecipeId::from(path.into_inner());
    toggle(pool, req, recipe_id, query::add_favorite, true).await
}

#[delete("/{id}/favorite/")]
async fn remove_favorite(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let recipe_id = RecipeId::from(path.into_inner());
    toggle(pool, req, recipe_id, query::remove_favorite, false).await
}

#[post("/{id}/shopping_cart/")]
async fn add_to_cart(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let recipe_id = RecipeId::from(path.into_inner());
    toggle(pool, req, recipe_id, query::add_to_cart, true).await
}

#[delete("/{id}/shopping_cart/")]
async fn remove_from_cart(
    pool: web::Data<database::Pool>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let recipe_id = RecipeId::from(path.into_inner());
    toggle(pool, req, recipe_id, query::remove_from_cart, false).await
}

pub fn routes() -> impl HttpServiceFactory {
    // Static segments must be registered ahead of the `{id}` routes.
    web::scope("/api/recipes")
        .service(download_shopping_cart)
        .service(list)
        .service(create)
        .service(add_favorite)
        .service(remove_favorite)
        .service(add_to_cart)
        .service(remove_from_cart)
        .service(detail)
        .service(update)
        .service(remove)
}
