use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use server_api::ApiContext;
use session::SessionConfig;
use shared::{
    domain::{CollectionId, CollectionKind, ComicId, EntryId, EntryOrder, UserId},
    error::ApiException,
    protocol::{AddEntryRequest, CreateCollectionRequest},
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/community.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
    },
    /// Prints a bearer token for the given user.
    MintToken {
        user_id: UserId,
        #[arg(long, env = "APP__SESSION_SECRET", default_value = "devsecret")]
        secret: String,
        #[arg(long, env = "APP__SESSION_ISSUER", default_value = "comic-community")]
        issuer: String,
        #[arg(long, default_value_t = 3600)]
        ttl_seconds: i64,
    },
    CreateComic {
        title: String,
        #[arg(long)]
        cover_url: Option<String>,
    },
    CreateCollection {
        owner_user_id: UserId,
        kind: CollectionKind,
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    AddEntry {
        owner_user_id: UserId,
        collection_id: CollectionId,
        title: String,
        #[arg(long)]
        comic_id: Option<ComicId>,
        #[arg(long)]
        order: Option<i64>,
    },
    ListEntries {
        collection_id: CollectionId,
    },
    /// Applies `entryId=newOrder` placements as one reorder.
    Reorder {
        owner_user_id: UserId,
        collection_id: CollectionId,
        #[arg(required = true, value_parser = parse_placement)]
        placements: Vec<EntryOrder>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open {}", cli.database_url))?;
    let ctx = ApiContext::new(storage);

    match cli.command {
        Command::CreateUser { username } => {
            let user_id = ctx.storage.create_user(&username).await?;
            println!("created user_id={user_id}");
        }
        Command::MintToken {
            user_id,
            secret,
            issuer,
            ttl_seconds,
        } => {
            if !ctx.storage.user_exists(user_id).await? {
                bail!("user {user_id} does not exist");
            }
            let cfg = SessionConfig {
                issuer,
                secret,
                ttl_seconds,
            };
            println!("{}", session::mint_token(&cfg, user_id)?);
        }
        Command::CreateComic { title, cover_url } => {
            let comic_id = ctx
                .storage
                .create_comic(&title, cover_url.as_deref())
                .await?;
            println!("created comic_id={comic_id}");
        }
        Command::CreateCollection {
            owner_user_id,
            kind,
            title,
            description,
        } => {
            let collection = server_api::create_collection(
                &ctx,
                owner_user_id,
                CreateCollectionRequest {
                    kind,
                    title,
                    description,
                },
            )
            .await
            .map_err(ApiException::from)?;
            println!("created {} collection_id={}", collection.kind, collection.id);
        }
        Command::AddEntry {
            owner_user_id,
            collection_id,
            title,
            comic_id,
            order,
        } => {
            let entry = server_api::add_entry(
                &ctx,
                owner_user_id,
                collection_id,
                None,
                AddEntryRequest {
                    title,
                    image_url: None,
                    comic_id,
                    order,
                },
            )
            .await
            .map_err(ApiException::from)?;
            println!("created entry_id={} order={}", entry.id, entry.order);
        }
        Command::ListEntries { collection_id } => {
            let entries = server_api::list_entries(&ctx, collection_id, None)
                .await
                .map_err(ApiException::from)?;
            print_entries(&entries);
        }
        Command::Reorder {
            owner_user_id,
            collection_id,
            placements,
        } => {
            let entries =
                server_api::reorder_entries(&ctx, owner_user_id, collection_id, None, &placements)
                    .await
                    .map_err(ApiException::from)?;
            print_entries(&entries);
        }
    }

    Ok(())
}

fn print_entries(entries: &[shared::protocol::EntrySummary]) {
    for entry in entries {
        println!("{:>4}  {}  {}", entry.order, entry.id, entry.title);
    }
}

fn parse_placement(raw: &str) -> Result<EntryOrder> {
    let (entry_id, order) = raw
        .split_once('=')
        .with_context(|| format!("expected entryId=newOrder, got '{raw}'"))?;
    Ok(EntryOrder {
        entry_id: entry_id.trim().parse::<EntryId>()?,
        new_order: order.trim().parse()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_placement_pairs() {
        let id = EntryId::generate();
        let placement = parse_placement(&format!("{id}=3")).expect("placement");
        assert_eq!(placement.entry_id, id);
        assert_eq!(placement.new_order, 3);
    }

    #[test]
    fn rejects_malformed_placements() {
        assert!(parse_placement("no-separator").is_err());
        assert!(parse_placement(&format!("{}=x", EntryId::generate())).is_err());
        assert!(parse_placement("not-a-uuid=1").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
