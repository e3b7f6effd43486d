// Copyright 2023 Remi Bernotavicius

use actix_web::{middleware, web, App, HttpServer};
use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

mod api;
mod auth;
mod database;
mod error;
mod import;
mod query;

type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
struct Args {
    /// Path to the SQLite database. Defaults to the platform data directory.
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        listen: String,
    },
    /// Bulk-load reference ingredients from a JSON file
    LoadIngredients { path: PathBuf },
    /// Create a user and print a fresh API token for them
    AddUser {
        username: String,
        email: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long)]
        admin: bool,
    },
}

/// This is where the database lives on-disk when no path is given. On Linux
/// it should be like: `~/.local/share/recipe_share/`
fn data_path() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new().ok_or("failed to get user home directory")?;
    let path = dirs.data_dir().join("recipe_share");
    std::fs::create_dir_all(&path)?;
    Ok(path)
}

fn serve(pool: database::Pool, listen: &str) -> Result<()> {
    log::info!("listening on http://{listen}");
    let listen = listen.to_owned();
    actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(pool.clone()))
                .wrap(middleware::Logger::default())
                .configure(api::configure)
        })
        .bind(listen)?
        .run()
        .await
    })?;
    Ok(())
}

fn add_user(
    conn: &mut database::Connection,
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    admin: bool,
) -> Result<()> {
    let user = query::create_user(
        conn,
        database::models::NewUser {
            username,
            email,
            first_name,
            last_name,
            is_admin: admin,
        },
    )?;
    let token = uuid::Uuid::new_v4().simple().to_string();
    query::issue_token(conn, user.id, token.clone())?;
    println!("created user {} (id {})", user.username, user.id);
    println!("token: {token}");
    Ok(())
}

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()?;

    let args = Args::parse();
    let database_path = match args.database {
        Some(path) => path,
        None => data_path()?.join("data.sqlite"),
    };

    match args.commands {
        Commands::Serve { listen } => {
            serve(database::establish_pool(&database_path)?, &listen)?
        }
        Commands::LoadIngredients { path } => {
            let mut conn = database::establish_connection(&database_path)?;
            import::load_ingredients(&mut conn, path)?;
        }
        Commands::AddUser {
            username,
            email,
            first_name,
            last_name,
            admin,
        } => {
            let mut conn = database::establish_connection(&database_path)?;
            add_user(&mut conn, username, email, first_name, last_name, admin)?;
        }
    }
    Ok(())
}
