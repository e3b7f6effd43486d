// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::{
    AuthToken, Ingredient, IngredientId, NewFavorite, NewIngredient, NewRecipe,
    NewRecipeIngredient, NewShoppingCart, NewSubscription, NewUser, Recipe, RecipeId,
    RecipeIngredient, User, UserId,
};
use crate::error::{Error, Result};
use derive_more::Display;
use diesel::prelude::Connection as _;
use diesel::result::DatabaseErrorKind;
use diesel::ExpressionMethods as _;
use diesel::JoinOnDsl as _;
use diesel::OptionalExtension as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Query-parameter values that count as "true". Anything else non-empty is
/// treated as "false" and inverts the filter.
fn truthy(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn conflict_on_unique(e: diesel::result::Error, message: &'static str) -> Error {
    match e {
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            Error::Conflict(message)
        }
        e => e.into(),
    }
}

#[derive(Debug, Default, Clone)]
pub struct RecipeFilter {
    pub author: Option<UserId>,
    pub is_favorited: Option<String>,
    pub is_in_shopping_cart: Option<String>,
}

#[derive(Debug, Copy, Clone)]
pub struct Page {
    pub number: i64,
    pub limit: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 6;
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(number: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            number: number.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    // Saturating so an absurd page number yields an empty page instead of
    // overflowing.
    pub fn offset(&self) -> usize {
        let offset = self.number.saturating_sub(1).saturating_mul(self.limit);
        usize::try_from(offset).unwrap_or(usize::MAX)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

fn filtered_recipes<'a>(
    requester: Option<UserId>,
    filter: &RecipeFilter,
) -> database::schema::recipes::BoxedQuery<'a, diesel::sqlite::Sqlite> {
    use database::schema::recipes::dsl::*;

    let mut query = recipes.into_boxed();

    if let Some(author) = filter.author {
        query = query.filter(author_id.eq(author));
    }

    // The membership filters only mean anything for an authenticated
    // requester; anonymous requests pass through unfiltered.
    if let (Some(user), Some(value)) = (requester, filter.is_favorited.as_deref()) {
        if !value.is_empty() {
            let marked = {
                use database::schema::favorites::dsl;
                dsl::favorites
                    .filter(dsl::user_id.eq(user))
                    .select(dsl::recipe_id)
            };
            query = if truthy(value) {
                query.filter(id.eq_any(marked))
            } else {
                query.filter(id.ne_all(marked))
            };
        }
    }

    if let (Some(user), Some(value)) = (requester, filter.is_in_shopping_cart.as_deref()) {
        if !value.is_empty() {
            let marked = {
                use database::schema::shopping_carts::dsl;
                dsl::shopping_carts
                    .filter(dsl::user_id.eq(user))
                    .select(dsl::recipe_id)
            };
            query = if truthy(value) {
                query.filter(id.eq_any(marked))
            } else {
                query.filter(id.ne_all(marked))
            };
        }
    }

    query
}

/// Returns the total number of matching recipes along with the requested
/// page, newest first.
pub fn list_recipes(
    conn: &mut database::Connection,
    requester: Option<UserId>,
    filter: &RecipeFilter,
    page: &Page,
) -> Result<(i64, Vec<Recipe>)> {
    use database::schema::recipes::dsl::*;

    let matching: Vec<Recipe> = filtered_recipes(requester, filter)
        .order((created.desc(), id.desc()))
        .load(conn)?;

    let total = matching.len() as i64;
    let items = matching
        .into_iter()
        .skip(page.offset())
        .take(page.limit as usize)
        .collect();
    Ok((total, items))
}

pub fn get_recipe(
    conn: &mut database::Connection,
    recipe: RecipeId,
) -> Result<Option<Recipe>> {
    use database::schema::recipes::dsl::*;

    Ok(recipes
        .filter(id.eq(recipe))
        .select(Recipe::as_select())
        .first(conn)
        .optional()?)
}

/// The requester's favorite / shopping-cart membership, loaded once and
/// consulted when serializing a batch of recipes. Anonymous requesters get
/// empty sets.
pub struct UserMarks {
    favorites: HashSet<RecipeId>,
    cart: HashSet<RecipeId>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RecipeFlags {
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

impl UserMarks {
    pub fn load(conn: &mut database::Connection, requester: Option<UserId>) -> Result<Self> {
        let Some(user) = requester else {
            return Ok(Self {
                favorites: HashSet::new(),
                cart: HashSet::new(),
            });
        };

        let favorites = {
            use database::schema::favorites::dsl::*;
            favorites
                .filter(user_id.eq(user))
                .select(recipe_id)
                .load(conn)?
                .into_iter()
                .collect()
        };
        let cart = {
            use database::schema::shopping_carts::dsl::*;
            shopping_carts
                .filter(user_id.eq(user))
                .select(recipe_id)
                .load(conn)?
                .into_iter()
                .collect()
        };
        Ok(Self { favorites, cart })
    }

    pub fn flags(&self, recipe: RecipeId) -> RecipeFlags {
        RecipeFlags {
            is_favorited: self.favorites.contains(&recipe),
            is_in_shopping_cart: self.cart.contains(&recipe),
        }
    }
}

pub struct RecipeData {
    pub name: String,
    pub text: String,
    pub image: String,
    pub cooking_time: i32,
    pub ingredients: Vec<(IngredientId, i32)>,
}

fn check_ingredients_exist(
    conn: &mut database::Connection,
    wanted: &[(IngredientId, i32)],
) -> Result<()> {
    use database::schema::ingredients::dsl::*;

    let wanted_ids: Vec<IngredientId> = wanted.iter().map(|&(ing, _)| ing).collect();
    let known: HashSet<IngredientId> = ingredients
        .filter(id.eq_any(wanted_ids.clone()))
        .select(id)
        .load(conn)?
        .into_iter()
        .collect();

    if let Some(missing) = wanted_ids.iter().find(|ing| !known.contains(ing)) {
        return Err(Error::bad_request(format!(
            "ingredient {missing} does not exist"
        )));
    }
    Ok(())
}

fn insert_recipe_ingredients(
    conn: &mut database::Connection,
    recipe: RecipeId,
    lines: &[(IngredientId, i32)],
) -> Result<()> {
    use database::schema::recipe_ingredients::dsl::*;

    let rows: Vec<_> = lines
        .iter()
        .map(|&(ing, line_amount)| NewRecipeIngredient {
            recipe_id: recipe,
            ingredient_id: ing,
            amount: line_amount,
        })
        .collect();
    diesel::insert_into(recipe_ingredients)
        .values(rows)
        .execute(conn)?;
    Ok(())
}

pub fn create_recipe(
    conn: &mut database::Connection,
    author: UserId,
    data: RecipeData,
) -> Result<Recipe> {
    conn.transaction(|conn| {
        check_ingredients_exist(conn, &data.ingredients)?;

        let recipe: Recipe = {
            use database::schema::recipes::dsl::*;
            diesel::insert_into(recipes)
                .values(NewRecipe {
                    author_id: author,
                    name: data.name,
                    text: data.text,
                    image: data.image,
                    cooking_time: data.cooking_time,
                })
                .returning(Recipe::as_returning())
                .get_result(conn)?
        };

        insert_recipe_ingredients(conn, recipe.id, &data.ingredients)?;
        Ok(recipe)
    })
}

/// Replaces the recipe's fields and its entire ingredient list.
pub fn update_recipe(
    conn: &mut database::Connection,
    recipe: RecipeId,
    data: RecipeData,
) -> Result<Recipe> {
    conn.transaction(|conn| {
        check_ingredients_exist(conn, &data.ingredients)?;

        let updated: Recipe = {
            use database::schema::recipes::dsl::*;
            diesel::update(recipes.filter(id.eq(recipe)))
                .set((
                    name.eq(data.name),
                    text.eq(data.text),
                    image.eq(data.image),
                    cooking_time.eq(data.cooking_time),
                ))
                .returning(Recipe::as_returning())
                .get_result(conn)?
        };

        {
            use database::schema::recipe_ingredients::dsl::*;
            diesel::delete(recipe_ingredients.filter(recipe_id.eq(recipe))).execute(conn)?;
        }
        insert_recipe_ingredients(conn, recipe, &data.ingredients)?;
        Ok(updated)
    })
}

pub fn delete_recipe(conn: &mut database::Connection, recipe: RecipeId) -> Result<()> {
    conn.transaction(|conn| {
        {
            use database::schema::recipe_ingredients::dsl::*;
            diesel::delete(recipe_ingredients.filter(recipe_id.eq(recipe))).execute(conn)?;
        }
        {
            use database::schema::favorites::dsl::*;
            diesel::delete(favorites.filter(recipe_id.eq(recipe))).execute(conn)?;
        }
        {
            use database::schema::shopping_carts::dsl::*;
            diesel::delete(shopping_carts.filter(recipe_id.eq(recipe))).execute(conn)?;
        }
        {
            use database::schema::recipes::dsl::*;
            diesel::delete(recipes.filter(id.eq(recipe))).execute(conn)?;
        }
        Ok(())
    })
}

pub fn ingredients_for_recipes(
    conn: &mut database::Connection,
    recipe_ids: &[RecipeId],
) -> Result<HashMap<RecipeId, Vec<(RecipeIngredient, Ingredient)>>> {
    let rows: Vec<(RecipeIngredient, Ingredient)> = {
        use database::schema::ingredients::dsl as ing;
        use database::schema::recipe_ingredients::dsl::*;
        recipe_ingredients
            .inner_join(ing::ingredients)
            .filter(recipe_id.eq_any(recipe_ids.to_vec()))
            .select((RecipeIngredient::as_select(), Ingredient::as_select()))
            .order((recipe_id.asc(), id.asc()))
            .load(conn)?
    };

    let mut by_recipe: HashMap<RecipeId, Vec<(RecipeIngredient, Ingredient)>> = HashMap::new();
    for (usage, ingredient) in rows {
        by_recipe
            .entry(usage.recipe_id)
            .or_default()
            .push((usage, ingredient));
    }
    Ok(by_recipe)
}

pub fn add_favorite(
    conn: &mut database::Connection,
    user: UserId,
    recipe: RecipeId,
) -> Result<()> {
    use database::schema::favorites::dsl::*;

    diesel::insert_into(favorites)
        .values(NewFavorite {
            user_id: user,
            recipe_id: recipe,
        })
        .execute(conn)
        .map_err(|e| conflict_on_unique(e, "recipe is already in favorites"))?;
    Ok(())
}

pub fn remove_favorite(
    conn: &mut database::Connection,
    user: UserId,
    recipe: RecipeId,
) -> Result<()> {
    use database::schema::favorites::dsl::*;

    let deleted = diesel::delete(
        favorites
            .filter(user_id.eq(user))
            .filter(recipe_id.eq(recipe)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(Error::NotFound("recipe is not in favorites"));
    }
    Ok(())
}

pub fn add_to_cart(conn: &mut database::Connection, user: UserId, recipe: RecipeId) -> Result<()> {
    use database::schema::shopping_carts::dsl::*;

    diesel::insert_into(shopping_carts)
        .values(NewShoppingCart {
            user_id: user,
            recipe_id: recipe,
        })
        .execute(conn)
        .map_err(|e| conflict_on_unique(e, "recipe is already in the shopping cart"))?;
    Ok(())
}

pub fn remove_from_cart(
    conn: &mut database::Connection,
    user: UserId,
    recipe: RecipeId,
) -> Result<()> {
    use database::schema::shopping_carts::dsl::*;

    let deleted = diesel::delete(
        shopping_carts
            .filter(user_id.eq(user))
            .filter(recipe_id.eq(recipe)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(Error::NotFound("recipe is not in the shopping cart"));
    }
    Ok(())
}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("{name} ({measurement_unit}) — {amount}")]
pub struct ShoppingListItem {
    pub name: String,
    pub measurement_unit: String,
    pub amount: i64,
}

/// Flattens every ingredient line across the requester's cart, summing
/// amounts per (name, unit). Order is deterministic: by name, then unit.
pub fn shopping_list(
    conn: &mut database::Connection,
    user: UserId,
) -> Result<Vec<ShoppingListItem>> {
    let rows: Vec<(String, String, i32)> = {
        use database::schema::ingredients::dsl as ing;
        use database::schema::recipe_ingredients::dsl::*;

        let in_cart = {
            use database::schema::shopping_carts::dsl;
            dsl::shopping_carts
                .filter(dsl::user_id.eq(user))
                .select(dsl::recipe_id)
        };
        recipe_ingredients
            .inner_join(ing::ingredients)
            .filter(recipe_id.eq_any(in_cart))
            .select((ing::name, ing::measurement_unit, amount))
            .load(conn)?
    };

    let mut totals = BTreeMap::new();
    for (name, unit, amount) in rows {
        *totals.entry((name, unit)).or_insert(0i64) += amount as i64;
    }

    Ok(totals
        .into_iter()
        .map(|((name, measurement_unit), amount)| ShoppingListItem {
            name,
            measurement_unit,
            amount,
        })
        .collect())
}

/// One line per consolidated item, e.g. `salt (g) — 8`. Empty cart yields an
/// empty string.
pub fn format_shopping_list(items: &[ShoppingListItem]) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(&item.to_string());
        out.push('\n');
    }
    out
}

pub fn search_ingredients(
    conn: &mut database::Connection,
    name_prefix: Option<&str>,
) -> Result<Vec<Ingredient>> {
    use database::schema::ingredients::dsl::*;
    use diesel::expression_methods::EscapeExpressionMethods as _;
    use diesel::expression_methods::TextExpressionMethods as _;

    let mut query = ingredients
        .select(Ingredient::as_select())
        .order((name.asc(), id.asc()))
        .into_boxed();
    if let Some(prefix) = name_prefix {
        // LIKE wildcards in the prefix must match literally.
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        query = query.filter(name.like(format!("{escaped}%")).escape('\\'));
    }
    Ok(query.load(conn)?)
}

pub fn get_ingredient(
    conn: &mut database::Connection,
    ingredient: IngredientId,
) -> Result<Option<Ingredient>> {
    use database::schema::ingredients::dsl::*;

    Ok(ingredients
        .filter(id.eq(ingredient))
        .select(Ingredient::as_select())
        .first(conn)
        .optional()?)
}

/// Inserts one reference ingredient, skipping (name, unit) pairs that are
/// already present. Returns whether a row was inserted.
pub fn add_ingredient(
    conn: &mut database::Connection,
    ingredient: NewIngredient,
) -> Result<bool> {
    use database::schema::ingredients::dsl::*;

    let inserted = diesel::insert_into(ingredients)
        .values(ingredient)
        .on_conflict((name, measurement_unit))
        .do_nothing()
        .execute(conn)?;
    Ok(inserted > 0)
}

pub fn get_user(conn: &mut database::Connection, user: UserId) -> Result<Option<User>> {
    use database::schema::users::dsl::*;

    Ok(users
        .filter(id.eq(user))
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

pub fn users_by_ids(
    conn: &mut database::Connection,
    ids: &[UserId],
) -> Result<HashMap<UserId, User>> {
    use database::schema::users::dsl::*;

    Ok(users
        .filter(id.eq_any(ids.to_vec()))
        .select(User::as_select())
        .load(conn)?
        .into_iter()
        .map(|user| (user.id, user))
        .collect())
}

pub fn create_user(conn: &mut database::Connection, new_user: NewUser) -> Result<User> {
    use database::schema::users::dsl::*;

    diesel::insert_into(users)
        .values(new_user)
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(|e| conflict_on_unique(e, "username or email is already taken"))
}

pub fn issue_token(conn: &mut database::Connection, user: UserId, token: String) -> Result<()> {
    use database::schema::auth_tokens::dsl::*;

    diesel::insert_into(auth_tokens)
        .values(AuthToken {
            key: token,
            user_id: user,
        })
        .execute(conn)?;
    Ok(())
}

pub fn user_for_token(conn: &mut database::Connection, token: &str) -> Result<Option<User>> {
    use database::schema::auth_tokens::dsl::*;
    use database::schema::users::dsl as u;

    Ok(auth_tokens
        .inner_join(u::users)
        .filter(key.eq(token))
        .select(User::as_select())
        .first(conn)
        .optional()?)
}

pub fn subscribe(
    conn: &mut database::Connection,
    follower: UserId,
    followed: UserId,
) -> Result<()> {
    use database::schema::subscriptions::dsl::*;

    if follower == followed {
        return Err(Error::bad_request("cannot subscribe to yourself"));
    }
    diesel::insert_into(subscriptions)
        .values(NewSubscription {
            follower_id: follower,
            followed_id: followed,
        })
        .execute(conn)
        .map_err(|e| conflict_on_unique(e, "already subscribed to this user"))?;
    Ok(())
}

pub fn unsubscribe(
    conn: &mut database::Connection,
    follower: UserId,
    followed: UserId,
) -> Result<()> {
    use database::schema::subscriptions::dsl::*;

    let deleted = diesel::delete(
        subscriptions
            .filter(follower_id.eq(follower))
            .filter(followed_id.eq(followed)),
    )
    .execute(conn)?;
    if deleted == 0 {
        return Err(Error::NotFound("not subscribed to this user"));
    }
    Ok(())
}

/// Users the requester follows, most recent subscription first.
pub fn subscribed_users(conn: &mut database::Connection, follower: UserId) -> Result<Vec<User>> {
    use database::schema::subscriptions::dsl::*;
    use database::schema::users::dsl as u;

    Ok(subscriptions
        .inner_join(u::users.on(u::id.eq(followed_id)))
        .filter(follower_id.eq(follower))
        .order(id.desc())
        .select(User::as_select())
        .load(conn)?)
}

pub fn followed_set(
    conn: &mut database::Connection,
    requester: Option<UserId>,
) -> Result<HashSet<UserId>> {
    use database::schema::subscriptions::dsl::*;

    let Some(follower) = requester else {
        return Ok(HashSet::new());
    };
    Ok(subscriptions
        .filter(follower_id.eq(follower))
        .select(followed_id)
        .load(conn)?
        .into_iter()
        .collect())
}

pub fn recipes_by_authors(
    conn: &mut database::Connection,
    authors: &[UserId],
) -> Result<HashMap<UserId, Vec<Recipe>>> {
    use database::schema::recipes::dsl::*;

    let rows: Vec<Recipe> = recipes
        .filter(author_id.eq_any(authors.to_vec()))
        .order((created.desc(), id.desc()))
        .select(Recipe::as_select())
        .load(conn)?;

    let mut by_author: HashMap<UserId, Vec<Recipe>> = HashMap::new();
    for recipe in rows {
        by_author.entry(recipe.author_id).or_default().push(recipe);
    }
    Ok(by_author)
}
