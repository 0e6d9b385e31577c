use clap::{Parser, Subcommand};
use library_server::auth::{AdminAuth, NewAdmin, DEFAULT_ROLE};
use library_server::books::{sample_books, BookCatalog};
use library_server::store::DocumentStore;
use library_server::LibraryConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "library-admin")]
#[command(about = "Operator tasks for the Immersive Library document store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an administrator account
    CreateAdmin {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = DEFAULT_ROLE)]
        role: String,
    },
    /// Insert the default administrator if no admin exists yet
    SeedAdmin,
    /// Insert the bundled sample books
    SeedBooks {
        /// Delete every existing book first
        #[arg(long)]
        replace: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    library_server::init_tracing();
    let cli = Cli::parse();
    let config = LibraryConfig::from_env()?;

    let documents = DocumentStore::connect(&config.database_url, 1).await?;
    let result = execute(cli.command, &documents, &config).await;
    documents.close().await;
    result
}

async fn execute(
    command: Command,
    documents: &DocumentStore,
    config: &LibraryConfig,
) -> anyhow::Result<()> {
    match command {
        Command::CreateAdmin {
            name,
            email,
            password,
            role,
        } => {
            let admin = AdminAuth::new(documents.clone())
                .create_admin(NewAdmin {
                    name,
                    email,
                    password,
                    role,
                })
                .await?;
            println!("Created admin {} <{}> ({})", admin.name, admin.email, admin.role);
        }
        Command::SeedAdmin => {
            match AdminAuth::new(documents.clone()).seed_default_admin().await? {
                Some(admin) => {
                    println!("Created default admin {}", admin.email);
                    println!("Change its password before exposing the server.");
                }
                None => println!("Admin accounts already exist; nothing to do."),
            }
        }
        Command::SeedBooks { replace } => {
            let catalog = BookCatalog::new(documents.clone(), config.max_page_size);
            let books = catalog.import(sample_books()?, replace).await?;

            info!("Seeded {} books into {}", books.len(), config.database_url);
            for (i, book) in books.iter().enumerate() {
                println!("{:>3}. {} - {} ({})", i + 1, book.title, book.author, book.category);
            }
        }
    }

    Ok(())
}
